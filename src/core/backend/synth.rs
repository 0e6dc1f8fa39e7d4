//! Offline prose: expands the shared prose grammar against the chapter's
//! beat, cast and established facts. Never needs the network.

use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};

use super::{BackendError, DraftingContext, ProseBackend};
use crate::core::context::ProseContext;
use crate::core::grammar::{capitalize_first, tidy, GrammarSet, SelectionContext};
use crate::core::markov::{MarkovModel, MarkovTrainer};
use crate::core::seed::{stable_seed, RETRY_PRIME};
use crate::schema::character::{Character, Role};
use crate::schema::novel::{word_count, BackendKind};
use crate::schema::research::ResearchBrief;

const RESEARCH_CORPUS: &str = "research";
const MAX_REROLLS: u32 = 3;
/// Chapters are padded until they reach this share of the target.
const FILL_RATIO: f64 = 0.95;

/// The fixed scene frame every chapter walks through before padding.
const FRAME: &[&str] = &[
    "goal_paragraph",
    "body_paragraph",
    "body_paragraph",
    "conflict_paragraph",
    "body_paragraph",
    "turn_paragraph",
];

/// Rules the synthesizer expands directly. The grammar must define all of them.
pub const ENTRY_RULES: &[&str] = &[
    "chapter_opening",
    "goal_paragraph",
    "body_paragraph",
    "conflict_paragraph",
    "turn_paragraph",
    "extension_paragraph",
    "chapter_closing",
];

/// Every `binding.field` the synthesizer fills in before expanding. `prev.*`
/// is bound only after the first chapter and `fact.*` once a fact exists.
pub const BOUND_FIELDS: &[&str] = &[
    "pov.name",
    "pov.first",
    "pov.role",
    "pov.trait",
    "pov.flaw",
    "pov.motivation",
    "pov.inner",
    "pov.backstory",
    "other.name",
    "other.first",
    "other.role",
    "opponent.name",
    "opponent.first",
    "opponent.role",
    "world.place",
    "world.setting",
    "world.era",
    "world.atmosphere",
    "world.conflict",
    "world.adj",
    "world.theme",
    "world.rule",
    "world.location2",
    "beat.goal",
    "beat.conflict",
    "beat.turn",
    "beat.title",
    "prev.place",
    "fact.text",
];

pub struct LocalSynthesizer {
    grammar: GrammarSet,
    research: Option<MarkovModel>,
    seed: u64,
}

impl LocalSynthesizer {
    /// Trains the research corpus from the brief's facts. A brief too thin
    /// to train on simply disables research paragraphs.
    pub fn new(grammar: GrammarSet, brief: &ResearchBrief, seed: u64) -> Self {
        let research = MarkovTrainer::train_sentences(
            brief.facts.iter().map(|f| f.text.as_str()),
            RESEARCH_CORPUS,
            3,
        )
        .ok()
        .filter(|model| {
            let mut rng = StdRng::seed_from_u64(seed);
            !model.is_empty() && model.generate(&mut rng, Some(RESEARCH_CORPUS), 6, 28).is_ok()
        });
        tracing::debug!(research_corpus = research.is_some(), "local synthesizer ready");
        Self {
            grammar,
            research,
            seed,
        }
    }

    fn selection<'m>(&'m self, ctx: &DraftingContext<'_>, rng: &mut StdRng) -> Result<SelectionContext<'m>, BackendError> {
        let beat = ctx.beat;
        let pov = ctx
            .pov()
            .ok_or_else(|| BackendError::Unavailable(format!("chapter {} has no POV character", beat.number)))?;
        let others: Vec<&Character> = ctx.cast.characters.iter().filter(|c| c.id != pov.id).collect();
        let other = beat
            .key_character
            .filter(|id| *id != pov.id)
            .and_then(|id| ctx.cast.get(id))
            .or_else(|| others.choose(rng).copied())
            .unwrap_or(pov);
        let opponent = match pov.role {
            Role::Antagonist => ctx.cast.protagonist(),
            _ => ctx.cast.by_role(Role::Antagonist).next(),
        }
        .unwrap_or(other);

        let mut sel = SelectionContext::new();
        sel.tag(beat.kind.tag())
            .tag(beat.ending.tag())
            .tag(ctx.world.genre.tag())
            .tag(format!("pov:{}", pov.role.label()));
        if beat.tension >= 7 {
            sel.tag("tension:high");
        } else if beat.tension <= 3 {
            sel.tag("tension:low");
        }
        if let Some(model) = &self.research {
            sel.tag("has:research_corpus");
            sel.markov_models.insert(RESEARCH_CORPUS.to_string(), model);
        }
        sel.pronouns = Some(pov.pronouns);

        bind_character(&mut sel, "pov", pov);
        sel.bind("pov", "trait", pov.traits.first().cloned().unwrap_or_else(|| "watchful".to_string()))
            .bind("pov", "flaw", pov.flaw.clone())
            .bind("pov", "motivation", pov.motivation.clone())
            .bind("pov", "inner", pov.internal_conflict.clone())
            .bind("pov", "backstory", pov.backstory.clone());
        bind_character(&mut sel, "other", other);
        bind_character(&mut sel, "opponent", opponent);

        let world = ctx.world;
        let profile = ctx.profile;
        sel.bind("world", "place", beat.location.clone())
            .bind("world", "setting", world.primary.name.clone())
            .bind("world", "era", world.primary.era.clone())
            .bind("world", "atmosphere", world.atmosphere.clone())
            .bind("world", "conflict", world.central_conflict.clone())
            .bind("world", "adj", profile.power_words.choose(rng).cloned().unwrap_or_default())
            .bind("world", "theme", world.themes.choose(rng).cloned().unwrap_or_default())
            .bind("world", "rule", rule_clause(world.rules.choose(rng).map(String::as_str).unwrap_or("")));
        let elsewhere: Vec<&str> = world
            .locations()
            .into_iter()
            .filter(|l| *l != beat.location)
            .collect();
        sel.bind(
            "world",
            "location2",
            elsewhere
                .choose(rng)
                .copied()
                .unwrap_or(world.primary.name.as_str())
                .to_string(),
        );

        sel.bind("beat", "goal", beat.goal.clone())
            .bind("beat", "conflict", beat.conflict.clone())
            .bind("beat", "turn", beat.turning_point.clone())
            .bind("beat", "title", beat.title.clone());

        if let Some(prev) = ctx.previous {
            if let Some(prev_beat) = ctx.outline.beat(prev.number) {
                sel.tag("has:previous");
                sel.bind("prev", "place", prev_beat.location.clone());
            }
        }
        Ok(sel)
    }

    /// Expand `rule`, re-rolling up to [`MAX_REROLLS`] times when the result
    /// repeats a sentence or opening already used in this chapter.
    fn paragraph(
        &self,
        rule: &str,
        sel: &SelectionContext<'_>,
        prose: &mut ProseContext,
        rng: &mut StdRng,
    ) -> Result<String, BackendError> {
        let base: u64 = rng.gen();
        let mut text = String::new();
        for retry in 0..MAX_REROLLS {
            let mut r = StdRng::seed_from_u64(base.wrapping_add(retry as u64 * RETRY_PRIME));
            let raw = self
                .grammar
                .expand(rule, sel, &mut r)
                .map_err(|e| BackendError::Unavailable(format!("prose grammar: {e}")))?;
            text = tidy_blocks(&raw);
            if prose.check_repetition(&text).is_empty() {
                break;
            }
        }
        prose.record(&text);
        Ok(text)
    }
}

impl ProseBackend for LocalSynthesizer {
    fn kind(&self) -> BackendKind {
        BackendKind::Local
    }

    fn available(&self) -> bool {
        true
    }

    fn draft(&self, ctx: &DraftingContext<'_>, target_words: usize) -> Result<String, BackendError> {
        let chapter = ctx.beat.number.to_string();
        let seed = stable_seed(self.seed, &["chapter", &chapter])
            .wrapping_add(ctx.attempt as u64 * RETRY_PRIME);
        let mut rng = StdRng::seed_from_u64(seed);
        let mut sel = self.selection(ctx, &mut rng)?;
        let mut prose = ProseContext::default();

        // Newest first.
        let facts: Vec<String> = ctx
            .state
            .facts
            .iter()
            .rev()
            .map(|f| sentence(&f.text))
            .collect();

        let mut paragraphs = vec![self.paragraph("chapter_opening", &sel, &mut prose, &mut rng)?];
        for rule in FRAME {
            rebind_fact(&mut sel, &facts, &mut rng);
            paragraphs.push(self.paragraph(rule, &sel, &mut prose, &mut rng)?);
        }
        let closing = self.paragraph("chapter_closing", &sel, &mut prose, &mut rng)?;

        let floor = (target_words as f64 * FILL_RATIO) as usize;
        let mut words = word_count(&paragraphs.join(" ")) + word_count(&closing);
        let max_extra = target_words / 10 + 16;
        let mut extra = 0;
        while words < floor && extra < max_extra {
            let rule = if extra % 3 == 2 { "extension_paragraph" } else { "body_paragraph" };
            rebind_fact(&mut sel, &facts, &mut rng);
            let p = self.paragraph(rule, &sel, &mut prose, &mut rng)?;
            words += word_count(&p);
            paragraphs.push(p);
            extra += 1;
        }
        paragraphs.push(closing);

        tracing::debug!(chapter = ctx.beat.number, words, paragraphs = paragraphs.len(), "synthesized chapter");
        Ok(paragraphs.join("\n\n"))
    }
}

fn bind_character(sel: &mut SelectionContext<'_>, binding: &str, c: &Character) {
    sel.bind(binding, "name", c.name.clone())
        .bind(binding, "first", c.first_name().to_string())
        .bind(binding, "role", c.role.label());
}

/// Memory paragraphs quote one established fact; vary it per paragraph.
fn rebind_fact(sel: &mut SelectionContext<'_>, facts: &[String], rng: &mut StdRng) {
    let pick = if rng.gen_bool(0.6) {
        facts[..facts.len().min(4)].choose(rng)
    } else {
        facts.choose(rng)
    };
    if let Some(fact) = pick {
        sel.tag("has:fact");
        sel.bind("fact", "text", fact.clone());
    }
}

/// Tidy each paragraph block separately so dialogue keeps its breaks.
fn tidy_blocks(raw: &str) -> String {
    raw.split("\n\n")
        .map(tidy)
        .filter(|b| !b.is_empty())
        .collect::<Vec<_>>()
        .join("\n\n")
}

/// A world rule as it reads mid-sentence: "the dead do not stay buried".
fn rule_clause(rule: &str) -> String {
    let rule = rule.trim().trim_end_matches('.');
    let mut chars = rule.chars();
    match (chars.next(), chars.next()) {
        (Some(first), Some(second)) if second.is_lowercase() => {
            first.to_lowercase().chain(rule.chars().skip(1)).collect()
        }
        _ => rule.to_string(),
    }
}

/// Ensure a fact reads as a complete sentence.
fn sentence(text: &str) -> String {
    let text = capitalize_first(text.trim());
    if text.ends_with(['.', '!', '?']) {
        text
    } else {
        format!("{text}.")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::backend::fixture::Story;
    use crate::schema::genre::Genre;
    use crate::schema::outline::EndingState;
    use crate::schema::state::ChapterClosing;

    #[test]
    fn selection_binds_every_listed_field() {
        let story = Story::new("A lighthouse keeper who collects storms", Genre::Fantasy, 4);
        let synth = story.synthesizer();
        let closing = ChapterClosing {
            number: 1,
            ending: EndingState::Cliffhanger,
            excerpt: "The lamp went out.".to_string(),
        };
        let ctx = DraftingContext {
            previous: Some(&closing),
            ..story.context(2)
        };
        let mut rng = StdRng::seed_from_u64(1);
        let sel = synth.selection(&ctx, &mut rng).unwrap();
        for field in BOUND_FIELDS.iter().filter(|f| !f.starts_with("fact.")) {
            assert!(sel.fields.contains_key(*field), "{field} is not bound");
        }
    }

    #[test]
    fn rule_clause_lowercases_only_ordinary_words() {
        assert_eq!(rule_clause("The dead do not stay buried."), "the dead do not stay buried");
        assert_eq!(rule_clause("NASA keeps its secrets"), "NASA keeps its secrets");
        assert_eq!(rule_clause(""), "");
    }

    #[test]
    fn facts_become_sentences() {
        assert_eq!(sentence("magic always has a cost"), "Magic always has a cost.");
        assert_eq!(sentence("It rang twice!"), "It rang twice!");
    }

    #[test]
    fn dialogue_breaks_survive_tidying() {
        let raw = "\"Stay,\"   she said.\n\n\"No.\"  ";
        assert_eq!(tidy_blocks(raw), "\"Stay,\" she said.\n\n\"No.\"");
    }
}
