//! Prose backends: anything that turns a drafting context into chapter text.
//!
//! A [`BackendChain`] holds an optional LLM backend and the always-available
//! [`LocalSynthesizer`]. Transient failures are retried with exponential
//! backoff; a backend that reports itself unavailable is skipped for the rest
//! of the run.

pub mod llm;
pub mod synth;

use regex::Regex;
use std::sync::{Arc, OnceLock};
use std::time::Duration;
use thiserror::Error;

use crate::genre_templates::GenreProfile;
use crate::schema::character::{Cast, Character};
use crate::schema::novel::{word_count, BackendKind};
use crate::schema::outline::{ChapterBeat, PlotOutline};
use crate::schema::research::ResearchBrief;
use crate::schema::state::{ChapterClosing, NarrativeState};
use crate::schema::world::WorldModel;

pub use llm::{OllamaBackend, OllamaConfig};
pub use synth::LocalSynthesizer;

/// Output below this share of the target triggers one extra attempt.
const SHORT_OUTPUT_RATIO: f64 = 0.5;
/// Word counts within this band of the target are on target.
const TARGET_TOLERANCE: f64 = 0.15;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum BackendError {
    /// Worth retrying: timeouts, 5xx responses, empty output.
    #[error("transient backend failure: {0}")]
    Transient(String),
    /// Not worth retrying in this run: unreachable host, missing model.
    #[error("backend unavailable: {0}")]
    Unavailable(String),
}

/// Read-only view of everything a backend may draw on for one chapter.
///
/// `state` is the snapshot taken before this chapter; backends never see
/// facts established by later chapters.
#[derive(Debug, Clone, Copy)]
pub struct DraftingContext<'a> {
    pub profile: &'a GenreProfile,
    pub brief: &'a ResearchBrief,
    pub world: &'a WorldModel,
    pub cast: &'a Cast,
    pub outline: &'a PlotOutline,
    pub beat: &'a ChapterBeat,
    pub state: &'a NarrativeState,
    pub previous: Option<&'a ChapterClosing>,
    /// Zero on the first try; bumped on every retry of this chapter.
    pub attempt: u32,
}

impl<'a> DraftingContext<'a> {
    pub fn pov(&self) -> Option<&'a Character> {
        self.cast.get(self.beat.pov)
    }

    pub fn total_chapters(&self) -> u32 {
        self.outline.beats.len() as u32
    }

    pub fn is_final_chapter(&self) -> bool {
        self.beat.number == self.total_chapters()
    }

    /// Established fact texts, oldest first.
    pub fn facts(&self) -> impl Iterator<Item = &'a str> {
        self.state.facts.iter().map(|f| f.text.as_str())
    }
}

pub trait ProseBackend: Send + Sync {
    fn kind(&self) -> BackendKind;

    /// Cheap reachability probe; false means skip this backend for the run.
    fn available(&self) -> bool;

    fn draft(&self, ctx: &DraftingContext<'_>, target_words: usize) -> Result<String, BackendError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Retries after the first failed attempt.
    pub max_retries: u32,
    pub backoff_base: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 2,
            backoff_base: Duration::from_millis(500),
        }
    }
}

impl RetryPolicy {
    /// Delay before retry number `retry` (zero-based): base, 2x base, 4x base...
    pub fn backoff(&self, retry: u32) -> Duration {
        self.backoff_base.saturating_mul(1u32 << retry.min(16))
    }
}

/// A chapter body plus which backend wrote it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Drafted {
    pub text: String,
    pub backend: BackendKind,
    pub warnings: Vec<String>,
}

/// Ordered backends for one run. The local synthesizer is always last.
pub struct BackendChain {
    llm: Option<Arc<dyn ProseBackend>>,
    local: LocalSynthesizer,
    policy: RetryPolicy,
}

impl BackendChain {
    pub fn new(llm: Option<Arc<dyn ProseBackend>>, local: LocalSynthesizer, policy: RetryPolicy) -> Self {
        Self { llm, local, policy }
    }

    /// Probe the LLM once per run. Returns a warning when it had to be dropped.
    pub fn probe(&mut self) -> Option<String> {
        let llm = self.llm.as_ref()?;
        if llm.available() {
            tracing::info!(backend = %llm.kind(), "prose backend available");
            return None;
        }
        self.llm = None;
        let msg = "LLM backend unreachable; drafting every chapter with the local synthesizer".to_string();
        tracing::warn!("{msg}");
        Some(msg)
    }

    pub fn has_llm(&self) -> bool {
        self.llm.is_some()
    }

    /// Draft one chapter, falling through the chain on failure.
    pub fn draft(&mut self, ctx: &DraftingContext<'_>, target_words: usize) -> Result<Drafted, BackendError> {
        let mut warnings = Vec::new();

        if let Some(llm) = self.llm.clone() {
            match attempt(llm.as_ref(), ctx, target_words, self.policy, &mut warnings) {
                Ok(text) => {
                    return Ok(Drafted {
                        text,
                        backend: llm.kind(),
                        warnings,
                    })
                }
                Err(BackendError::Unavailable(msg)) => {
                    self.llm = None;
                    let w = format!(
                        "chapter {}: LLM backend became unavailable ({msg}); disabled for the rest of the run",
                        ctx.beat.number
                    );
                    tracing::warn!("{w}");
                    warnings.push(w);
                }
                Err(BackendError::Transient(msg)) => {
                    let w = format!(
                        "chapter {}: LLM backend failed after {} retries ({msg}); used local synthesizer",
                        ctx.beat.number, self.policy.max_retries
                    );
                    tracing::warn!("{w}");
                    warnings.push(w);
                }
            }
        }

        let text = attempt(&self.local, ctx, target_words, self.policy, &mut warnings)?;
        Ok(Drafted {
            text,
            backend: self.local.kind(),
            warnings,
        })
    }
}

/// Run one backend with transient retries and a single short-output retry.
fn attempt(
    backend: &dyn ProseBackend,
    ctx: &DraftingContext<'_>,
    target_words: usize,
    policy: RetryPolicy,
    warnings: &mut Vec<String>,
) -> Result<String, BackendError> {
    let chapter = ctx.beat.number;
    let mut tries = 0u32;
    let mut transient_retries = 0u32;
    let mut short_retried = false;

    loop {
        let this = DraftingContext {
            attempt: tries,
            ..*ctx
        };
        tries += 1;
        match backend.draft(&this, target_words) {
            Ok(raw) => {
                let text = strip_heading(&raw);
                let words = word_count(&text);
                if (words as f64) < target_words as f64 * SHORT_OUTPUT_RATIO && !short_retried {
                    short_retried = true;
                    tracing::warn!(chapter, words, target_words, backend = %backend.kind(), "short chapter, retrying");
                    continue;
                }
                let deviation = (words as f64 - target_words as f64).abs() / target_words.max(1) as f64;
                if deviation > TARGET_TOLERANCE {
                    tracing::info!(chapter, words, target_words, "chapter length off target");
                    if short_retried && (words as f64) < target_words as f64 * SHORT_OUTPUT_RATIO {
                        warnings.push(format!(
                            "chapter {chapter}: only {words} of {target_words} target words"
                        ));
                    }
                }
                tracing::debug!(chapter, words, backend = %backend.kind(), "chapter drafted");
                return Ok(text);
            }
            Err(BackendError::Transient(msg)) if transient_retries < policy.max_retries => {
                let delay = policy.backoff(transient_retries);
                transient_retries += 1;
                tracing::warn!(
                    chapter,
                    retry = transient_retries,
                    delay_ms = delay.as_millis() as u64,
                    error = %msg,
                    "transient backend failure, backing off"
                );
                if !delay.is_zero() {
                    std::thread::sleep(delay);
                }
            }
            Err(e) => return Err(e),
        }
    }
}

fn heading_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?i)\A\s*(?:#+\s*)?chapter\s+(?:\d+|[ivxlc]+)\b[^\n]*\n(?:\s*[-─=*]{3,}\s*\n)?")
            .expect("valid regex")
    })
}

/// Drop a leading "Chapter N: Title" heading; the compiler adds its own.
pub fn strip_heading(text: &str) -> String {
    heading_re().replace(text, "").trim().to_string()
}

/// A small offline story prepared up to drafting, shared by backend tests.
#[cfg(test)]
pub(crate) mod fixture {
    use super::{DraftingContext, LocalSynthesizer};
    use crate::core::cast::CastBuilder;
    use crate::core::outline::PlotOutliner;
    use crate::core::research::{OfflineProvider, ResearchBriefBuilder};
    use crate::core::world::WorldBuilder;
    use crate::genre_templates::GenreLibrary;
    use crate::schema::character::Cast;
    use crate::schema::genre::Genre;
    use crate::schema::outline::PlotOutline;
    use crate::schema::research::ResearchBrief;
    use crate::schema::state::NarrativeState;
    use crate::schema::world::WorldModel;

    pub(crate) struct Story {
        pub library: GenreLibrary,
        pub brief: ResearchBrief,
        pub world: WorldModel,
        pub cast: Cast,
        pub outline: PlotOutline,
        pub state: NarrativeState,
    }

    impl Story {
        pub fn new(idea: &str, genre: Genre, chapters: u32) -> Self {
            let library = GenreLibrary::load().unwrap();
            let brief = ResearchBriefBuilder::new(&OfflineProvider, &library).build(idea, genre);
            let world = WorldBuilder::new(&library).build(idea, &brief, 7);
            let cast = CastBuilder::new(&library).build(&world, chapters, 7);
            let outline = PlotOutliner::new(&world, &cast).build(chapters, 7).unwrap();
            let state = NarrativeState::seeded(&world, cast.characters.iter().map(|c| c.id));
            Self {
                library,
                brief,
                world,
                cast,
                outline,
                state,
            }
        }

        pub fn context(&self, chapter: u32) -> DraftingContext<'_> {
            DraftingContext {
                profile: self.library.profile(self.world.genre),
                brief: &self.brief,
                world: &self.world,
                cast: &self.cast,
                outline: &self.outline,
                beat: self.outline.beat(chapter).unwrap(),
                state: &self.state,
                previous: None,
                attempt: 0,
            }
        }

        pub fn synthesizer(&self) -> LocalSynthesizer {
            LocalSynthesizer::new(self.library.grammar().clone(), &self.brief, 7)
        }
    }
}
