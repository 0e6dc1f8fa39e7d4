//! Local LLM backend speaking the Ollama HTTP API.

use reqwest::blocking::Client;
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use std::sync::Mutex;
use std::time::Duration;

use super::{BackendError, DraftingContext, ProseBackend};
use crate::schema::character::Role;
use crate::schema::novel::BackendKind;
use crate::schema::outline::BeatKind;

pub const DEFAULT_HOST: &str = "http://localhost:11434";

/// Highest quality first. Matched exactly, then by family prefix.
pub const PREFERRED_MODELS: &[&str] = &[
    "llama3.1:70b",
    "llama3.1:8b",
    "llama3.1",
    "mistral:7b",
    "mistral",
    "llama3.2:3b",
    "llama3.2",
    "phi3:medium",
    "gemma2",
    "phi3",
    "llama3.2:1b",
    "phi3:mini",
    "gemma",
    "llama2",
    "neural-chat",
    "vicuna",
];

#[derive(Debug, Clone, PartialEq)]
pub struct OllamaConfig {
    pub host: String,
    /// Pinned model; otherwise the best installed one is chosen.
    pub model: Option<String>,
    pub probe_timeout: Duration,
    pub generate_timeout: Duration,
    pub temperature: f32,
    pub top_p: f32,
    pub repeat_penalty: f32,
}

impl Default for OllamaConfig {
    fn default() -> Self {
        Self {
            host: DEFAULT_HOST.to_string(),
            model: None,
            probe_timeout: Duration::from_secs(3),
            generate_timeout: Duration::from_secs(900),
            temperature: 0.82,
            top_p: 0.92,
            repeat_penalty: 1.12,
        }
    }
}

#[derive(Debug, Deserialize)]
struct TagsResponse {
    #[serde(default)]
    models: Vec<ModelEntry>,
}

#[derive(Debug, Deserialize)]
struct ModelEntry {
    name: String,
}

#[derive(Debug, Serialize)]
struct GenerateRequest<'a> {
    model: &'a str,
    prompt: &'a str,
    stream: bool,
    options: GenerateOptions,
}

#[derive(Debug, Serialize)]
struct GenerateOptions {
    temperature: f32,
    top_p: f32,
    repeat_penalty: f32,
    num_predict: usize,
}

#[derive(Debug, Deserialize)]
struct GenerateResponse {
    #[serde(default)]
    response: String,
}

pub struct OllamaBackend {
    config: OllamaConfig,
    probe: Client,
    generate: Client,
    model: Mutex<Option<String>>,
}

impl OllamaBackend {
    pub fn new(config: OllamaConfig) -> Result<Self, BackendError> {
        let build = |timeout| {
            Client::builder()
                .timeout(timeout)
                .build()
                .map_err(|e| BackendError::Unavailable(e.to_string()))
        };
        Ok(Self {
            probe: build(config.probe_timeout)?,
            generate: build(config.generate_timeout)?,
            config,
            model: Mutex::new(None),
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{path}", self.config.host.trim_end_matches('/'))
    }

    fn installed_models(&self) -> Result<Vec<String>, BackendError> {
        let resp = self
            .probe
            .get(self.url("/api/tags"))
            .send()
            .map_err(|e| BackendError::Unavailable(e.to_string()))?;
        if !resp.status().is_success() {
            return Err(BackendError::Unavailable(format!("/api/tags returned {}", resp.status())));
        }
        let tags: TagsResponse = resp
            .json()
            .map_err(|e| BackendError::Unavailable(e.to_string()))?;
        Ok(tags.models.into_iter().map(|m| m.name).collect())
    }

    /// Resolve and cache the model to generate with.
    fn model(&self) -> Result<String, BackendError> {
        let mut cached = self
            .model
            .lock()
            .map_err(|_| BackendError::Unavailable("model cache poisoned".to_string()))?;
        if let Some(m) = cached.as_ref() {
            return Ok(m.clone());
        }
        let installed = self.installed_models()?;
        let chosen = match &self.config.model {
            Some(pinned) => installed
                .iter()
                .find(|m| *m == pinned || m.starts_with(&format!("{pinned}:")))
                .cloned(),
            None => select_model(&installed),
        }
        .ok_or_else(|| BackendError::Unavailable("no usable model installed".to_string()))?;
        tracing::info!(model = %chosen, "using ollama model");
        *cached = Some(chosen.clone());
        Ok(chosen)
    }
}

/// Pick the best installed model by [`PREFERRED_MODELS`] rank.
pub fn select_model(installed: &[String]) -> Option<String> {
    if let Some(exact) = PREFERRED_MODELS
        .iter()
        .find(|p| installed.iter().any(|m| m == *p))
    {
        return Some(exact.to_string());
    }
    for &preferred in PREFERRED_MODELS {
        let family = preferred.split(':').next().unwrap_or(preferred);
        if let Some(m) = installed.iter().find(|m| m.starts_with(family)) {
            return Some(m.clone());
        }
    }
    installed.first().cloned()
}

impl ProseBackend for OllamaBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::Llm
    }

    fn available(&self) -> bool {
        match self.model() {
            Ok(_) => true,
            Err(e) => {
                tracing::debug!(error = %e, host = %self.config.host, "ollama probe failed");
                false
            }
        }
    }

    fn draft(&self, ctx: &DraftingContext<'_>, target_words: usize) -> Result<String, BackendError> {
        let model = self.model()?;
        let prompt = build_prompt(ctx, target_words);
        let body = GenerateRequest {
            model: &model,
            prompt: &prompt,
            stream: false,
            options: GenerateOptions {
                temperature: self.config.temperature,
                top_p: self.config.top_p,
                repeat_penalty: self.config.repeat_penalty,
                num_predict: (target_words * 2).max(2048),
            },
        };
        tracing::debug!(chapter = ctx.beat.number, model = %model, attempt = ctx.attempt, "ollama generate");
        let resp = self
            .generate
            .post(self.url("/api/generate"))
            .json(&body)
            .send()
            // The host already answered the probe; a dropped connection now is retried.
            .map_err(|e| BackendError::Transient(e.to_string()))?;
        match resp.status() {
            s if s.is_success() => {}
            StatusCode::NOT_FOUND => {
                return Err(BackendError::Unavailable(format!("model '{model}' not found")))
            }
            s => return Err(BackendError::Transient(format!("/api/generate returned {s}"))),
        }
        let out: GenerateResponse = resp
            .json()
            .map_err(|e| BackendError::Transient(e.to_string()))?;
        let text = out.response.trim().to_string();
        if text.is_empty() {
            return Err(BackendError::Transient("empty response".to_string()));
        }
        Ok(text)
    }
}

fn beat_direction(kind: BeatKind) -> &'static str {
    match kind {
        BeatKind::IncitingIncident => {
            "Establish the protagonist's ordinary world with sensory precision, then break it. \
             The inciting incident must force a choice the protagonist cannot take back."
        }
        BeatKind::RisingAction => {
            "The protagonist pursues the goal and meets resistance. Each scene should raise \
             the stakes and reveal something new about a character or the world."
        }
        BeatKind::Complication => {
            "An unexpected obstacle changes the shape of the problem. Plans fail, alliances \
             strain, and the cost of continuing becomes clear."
        }
        BeatKind::Midpoint => {
            "A revelation or reversal turns the story. What the protagonist believed is \
             shown to be incomplete or wrong, and the goal itself shifts."
        }
        BeatKind::DarkestMoment => {
            "Strip the protagonist of a key ally, a cherished belief, or a primary strategy. \
             Write with honesty about failure. End with the smallest reason to continue."
        }
        BeatKind::ClimaxBuildup => {
            "The protagonist gathers what remains and moves toward the final confrontation. \
             Everything learned so far is now in play."
        }
        BeatKind::Climax => {
            "The central conflict peaks in a decisive confrontation. The protagonist makes a \
             defining choice that costs something real."
        }
        BeatKind::Resolution => {
            "Show the aftermath. What has been gained and lost? Resolve remaining arcs and \
             end on an image that carries the emotional truth of the story."
        }
        BeatKind::Finale => {
            "Bring the central conflict to its decisive confrontation, then show its \
             aftermath. Resolve every remaining thread."
        }
        BeatKind::FullArc => {
            "Tell a complete arc: establish the world, disrupt it, escalate, reach the lowest \
             point, force a defining choice and show the transformation."
        }
    }
}

/// The full instruction sent to the model. Pure: same context, same prompt.
pub fn build_prompt(ctx: &DraftingContext<'_>, target_words: usize) -> String {
    let beat = ctx.beat;
    let total = ctx.total_chapters();
    let genre = ctx.world.genre.label();
    let mut p = String::new();

    p.push_str(&format!(
        "You are writing a {genre} novel at the level of a published literary author; think {}.\n\
         Your prose is precise, sensory, psychologically deep and emotionally honest.\n\n",
        ctx.profile.style_reference
    ));
    p.push_str(&format!("Write Chapter {}: {}\n\n", beat.number, beat.title));

    p.push_str("NOVEL CONTEXT\n");
    p.push_str(&format!("Genre: {genre}\n"));
    p.push_str(&format!(
        "Setting: {} in {}. {}\n",
        ctx.world.primary.name, ctx.world.primary.era, ctx.world.primary.description
    ));
    p.push_str(&format!("Atmosphere: {}\n", ctx.world.atmosphere));
    p.push_str(&format!("Central conflict: {}\n", ctx.world.central_conflict));
    p.push_str(&format!("This chapter's location: {}\n", beat.location));
    if let Some(pov) = ctx.pov() {
        p.push_str(&format!(
            "Point of view: {} ({}; trait: {}; flaw: {}; wants: {})\n",
            pov.name,
            pov.role,
            pov.traits.first().map(String::as_str).unwrap_or("unremarkable"),
            pov.flaw,
            pov.motivation
        ));
    }
    for role in [Role::Protagonist, Role::Antagonist, Role::Supporting] {
        let names: Vec<&str> = ctx.cast.by_role(role).map(|c| c.name.as_str()).collect();
        if !names.is_empty() {
            p.push_str(&format!("{}: {}\n", capitalised_role(role), names.join(", ")));
        }
    }
    if let Some(prev) = ctx.previous {
        p.push_str(&format!(
            "\nThe previous chapter ended ({}) with: {}\nContinue seamlessly from there.\n",
            prev.ending.label(),
            prev.excerpt
        ));
    }

    p.push_str("\nESTABLISHED FACTS\nNever contradict any of the following:\n");
    for fact in ctx.facts() {
        p.push_str(&format!("- {fact}\n"));
    }
    let open: Vec<&str> = ctx.state.open_threads().map(|(_, t)| t.label.as_str()).collect();
    if !open.is_empty() {
        p.push_str(&format!("Open plot threads: {}\n", open.join("; ")));
    }

    p.push_str("\nCHAPTER POSITION\n");
    if beat.number == 1 {
        p.push_str("This is the OPENING CHAPTER. Drop the reader directly into a specific moment.\n");
    } else if ctx.is_final_chapter() {
        p.push_str(&format!(
            "This is the FINAL CHAPTER ({total} of {total}). Resolve all remaining threads. \
             The last sentence of this chapter is the last sentence of the novel.\n"
        ));
    } else {
        p.push_str(&format!(
            "This is chapter {} of {total}, act {}, tension {}/10.\n",
            beat.number, beat.act, beat.tension
        ));
    }

    p.push_str(&format!("\nDRAMATIC FUNCTION: {}\n", beat.kind));
    p.push_str(beat_direction(beat.kind));
    p.push('\n');
    p.push_str(&format!("Goal: {}\n", beat.goal));
    p.push_str(&format!("Conflict: {}\n", beat.conflict));
    p.push_str(&format!("Turning point: {}\n", beat.turning_point));
    p.push_str(&format!("End the chapter on a {} note.\n", beat.ending.label()));

    p.push_str("\nWRITING REQUIREMENTS\n");
    p.push_str(&format!("- Write approximately {target_words} words of fiction prose\n"));
    p.push_str("- Mix short sentences with longer flowing ones\n");
    p.push_str("- Ground every scene in physical, sensory reality\n");
    p.push_str("- Show psychology through action and telling detail\n");
    p.push_str("- Dialogue must reveal character and advance the plot\n");
    p.push_str("- At least three distinct scenes with purposeful transitions\n");
    for note in &ctx.profile.craft_notes {
        p.push_str(&format!("- {note}\n"));
    }
    p.push_str("- No author notes, preamble or commentary outside the chapter text\n\n");
    p.push_str("Begin writing now.\n");
    p
}

fn capitalised_role(role: Role) -> &'static str {
    match role {
        Role::Protagonist => "Protagonist",
        Role::Antagonist => "Antagonist",
        Role::Supporting => "Supporting characters",
        Role::Minor => "Minor characters",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::backend::fixture::Story;
    use crate::schema::genre::Genre;

    fn names(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn exact_match_beats_rank_order_of_installation() {
        let installed = names(&["phi3:mini", "mistral:7b", "llama3.2:3b"]);
        assert_eq!(select_model(&installed).as_deref(), Some("mistral:7b"));
    }

    #[test]
    fn prefix_match_when_no_exact() {
        let installed = names(&["codellama:13b", "gemma2:9b"]);
        assert_eq!(select_model(&installed).as_deref(), Some("gemma2:9b"));
    }

    #[test]
    fn unknown_models_fall_back_to_first() {
        let installed = names(&["qwen2:7b", "starcoder"]);
        assert_eq!(select_model(&installed).as_deref(), Some("qwen2:7b"));
        assert_eq!(select_model(&[]), None);
    }

    #[test]
    fn connection_lost_while_generating_is_transient() {
        let story = Story::new("A bell-ringer in Prague hears the dead", Genre::Horror, 2);
        let backend = OllamaBackend::new(OllamaConfig {
            host: "http://127.0.0.1:9".to_string(),
            generate_timeout: Duration::from_millis(200),
            ..OllamaConfig::default()
        })
        .unwrap();
        *backend.model.lock().unwrap() = Some("llama3.1:8b".to_string());
        let err = backend.draft(&story.context(1), 200).unwrap_err();
        assert!(matches!(err, BackendError::Transient(_)), "{err}");
    }

    #[test]
    fn unreachable_host_is_unavailable() {
        let backend = OllamaBackend::new(OllamaConfig {
            host: "http://127.0.0.1:9".to_string(),
            probe_timeout: Duration::from_millis(200),
            ..OllamaConfig::default()
        })
        .unwrap();
        assert!(!backend.available());
    }
}
