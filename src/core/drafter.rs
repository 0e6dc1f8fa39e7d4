//! Chapter drafting: one beat in, one chapter plus its state update out.
//!
//! The drafter never mutates [`NarrativeState`] itself. It reads a snapshot
//! and returns a [`StateUpdate`] for the caller to apply, which keeps an
//! aborted chapter from leaking into the running state.

use regex::Regex;
use std::sync::OnceLock;
use thiserror::Error;

use crate::core::backend::{BackendChain, BackendError, DraftingContext};
use crate::genre_templates::GenreProfile;
use crate::schema::character::{Cast, Character};
use crate::schema::novel::{BackendKind, Chapter};
use crate::schema::outline::{BeatKind, ChapterBeat, PlotOutline, ThreadId};
use crate::schema::research::ResearchBrief;
use crate::schema::state::{ChapterClosing, CharacterUpdate, NarrativeState, StateUpdate};
use crate::schema::world::WorldModel;

/// Phrases that mark a sentence as disclosing something new.
const DISCLOSURE_MARKERS: &[&str] = &[
    "discovered that",
    "learned that",
    "revealed that",
    "realised that",
    "realized that",
    "confirmed that",
    "the truth was that",
];
const MAX_FACTS_PER_CHAPTER: usize = 3;
/// Longer disclosure sentences are usually run-ons, not facts.
const MAX_FACT_WORDS: usize = 40;
const EXCERPT_WORDS: usize = 60;

#[derive(Debug, Error)]
pub enum DraftError {
    #[error("no beat for chapter {0}")]
    NoBeat(u32),
    #[error("chapter {chapter}: {source}")]
    Backend {
        chapter: u32,
        #[source]
        source: BackendError,
    },
}

/// A drafted chapter plus what it contributes to the running state.
#[derive(Debug, Clone)]
pub struct DraftedChapter {
    pub chapter: Chapter,
    pub update: StateUpdate,
    pub warnings: Vec<String>,
}

pub struct ChapterDrafter<'a> {
    pub profile: &'a GenreProfile,
    pub brief: &'a ResearchBrief,
    pub world: &'a WorldModel,
    pub cast: &'a Cast,
    pub outline: &'a PlotOutline,
    pub target_words: usize,
}

impl<'a> ChapterDrafter<'a> {
    /// Draft the chapter `state` is waiting for.
    pub fn draft_next(
        &self,
        chain: &mut BackendChain,
        state: &NarrativeState,
    ) -> Result<DraftedChapter, DraftError> {
        let number = state.next_chapter();
        let beat = self.outline.beat(number).ok_or(DraftError::NoBeat(number))?;
        let ctx = DraftingContext {
            profile: self.profile,
            brief: self.brief,
            world: self.world,
            cast: self.cast,
            outline: self.outline,
            beat,
            state,
            previous: state.last_closing.as_ref(),
            attempt: 0,
        };
        tracing::info!(chapter = number, title = %beat.title, kind = beat.kind.slug(), "drafting chapter");

        let drafted = chain
            .draft(&ctx, self.target_words)
            .map_err(|source| DraftError::Backend { chapter: number, source })?;
        let update = extract_update(beat, self.cast, self.world, state, &drafted.text);
        let chapter = Chapter::new(number, beat.title.clone(), drafted.text, drafted.backend);
        tracing::info!(
            chapter = number,
            words = chapter.word_count,
            backend = %chapter.backend,
            new_facts = update.facts.len(),
            "chapter drafted"
        );
        Ok(DraftedChapter {
            chapter,
            update,
            warnings: drafted.warnings,
        })
    }
}

/// Light signals read back out of a finished chapter.
pub fn extract_update(
    beat: &ChapterBeat,
    cast: &Cast,
    world: &WorldModel,
    state: &NarrativeState,
    text: &str,
) -> StateUpdate {
    let mut facts = disclosed_facts(text);
    let turn = as_fact(&beat.turning_point);
    if !facts.contains(&turn) {
        facts.push(turn);
    }

    let characters = cast
        .characters
        .iter()
        .filter_map(|c| {
            let is_pov = c.id == beat.pov;
            let is_key = beat.key_character == Some(c.id);
            if !is_pov && !mentions(text, c) {
                return None;
            }
            Some(CharacterUpdate {
                id: c.id,
                location: (is_pov || is_key).then(|| beat.location.clone()),
                emotion: is_pov.then(|| emotion_for(beat.kind).to_string()),
                learned: if is_pov { facts.clone() } else { Vec::new() },
            })
        })
        .collect();

    let mut open = Vec::new();
    if !state.threads.contains_key(&beat.thread) {
        open.push((beat.thread.clone(), thread_label(&beat.thread, beat, cast, world)));
    }

    StateUpdate {
        chapter: beat.number,
        open,
        resolve: beat.resolves.clone(),
        characters,
        facts,
        closing: ChapterClosing {
            number: beat.number,
            ending: beat.ending,
            excerpt: closing_excerpt(text),
        },
    }
}

fn thread_label(id: &ThreadId, beat: &ChapterBeat, cast: &Cast, world: &WorldModel) -> String {
    if id.is_primary() {
        return world.central_conflict.clone();
    }
    match cast.get(beat.pov) {
        Some(owner) => format!("{}: {}", owner.name, owner.motivation),
        None => id.to_string(),
    }
}

/// Whole-word match on the full name or the first name.
pub fn mentions(text: &str, character: &Character) -> bool {
    [character.name.as_str(), character.first_name()]
        .iter()
        .any(|needle| {
            Regex::new(&format!(r"\b{}\b", regex::escape(needle)))
                .map(|re| re.is_match(text))
                .unwrap_or(false)
        })
}

fn sentence_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r#"[^.!?\n]+[.!?]+"#).expect("valid regex"))
}

/// Sentences carrying a disclosure marker, at most three per chapter.
pub fn disclosed_facts(text: &str) -> Vec<String> {
    let mut out: Vec<String> = Vec::new();
    for m in sentence_re().find_iter(text) {
        let sentence = m.as_str().trim().trim_matches(|c: char| c == '"' || c == '\'').trim();
        let lowered = sentence.to_lowercase();
        let words = sentence.split_whitespace().count();
        if words > MAX_FACT_WORDS || !DISCLOSURE_MARKERS.iter().any(|mk| lowered.contains(mk)) {
            continue;
        }
        let fact = as_fact(sentence);
        if !out.contains(&fact) {
            out.push(fact);
        }
        if out.len() == MAX_FACTS_PER_CHAPTER {
            break;
        }
    }
    out
}

fn as_fact(text: &str) -> String {
    let text = text.trim();
    if text.ends_with(['.', '!', '?']) {
        text.to_string()
    } else {
        format!("{text}.")
    }
}

fn emotion_for(kind: BeatKind) -> &'static str {
    match kind {
        BeatKind::IncitingIncident => "unsettled",
        BeatKind::RisingAction => "determined",
        BeatKind::Complication => "frustrated",
        BeatKind::Midpoint => "shaken",
        BeatKind::DarkestMoment => "despairing",
        BeatKind::ClimaxBuildup => "resolute",
        BeatKind::Climax => "desperate",
        BeatKind::Resolution => "at peace",
        BeatKind::Finale | BeatKind::FullArc => "changed",
    }
}

/// The tail of the last paragraph, trimmed to whole words.
fn closing_excerpt(text: &str) -> String {
    let last = text
        .trim()
        .rsplit("\n\n")
        .find(|p| !p.trim().is_empty())
        .unwrap_or("");
    let words: Vec<&str> = last.split_whitespace().collect();
    let start = words.len().saturating_sub(EXCERPT_WORDS);
    words[start..].join(" ")
}

/// Which backend each chapter came from, for reporting.
pub fn backend_tally(chapters: &[Chapter]) -> (usize, usize) {
    chapters.iter().fold((0, 0), |(llm, local), c| match c.backend {
        BackendKind::Llm => (llm + 1, local),
        BackendKind::Local => (llm, local + 1),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::character::{CharacterId, Pronouns, Role};
    use crate::schema::genre::Genre;
    use crate::schema::outline::EndingState;
    use crate::schema::world::Setting;

    fn character(id: u64, name: &str, role: Role) -> Character {
        Character {
            id: CharacterId(id),
            name: name.to_string(),
            pronouns: Pronouns::SheHer,
            role,
            traits: vec!["stubborn".to_string()],
            flaw: "pride".to_string(),
            motivation: "to know the truth".to_string(),
            backstory: String::new(),
            internal_conflict: String::new(),
            arc: String::new(),
            relationships: Vec::new(),
        }
    }

    fn cast() -> Cast {
        Cast {
            characters: vec![
                character(1, "Ada Vane", Role::Protagonist),
                character(2, "Silas Crane", Role::Antagonist),
                character(3, "Mira Holt", Role::Supporting),
            ],
        }
    }

    fn world() -> WorldModel {
        WorldModel {
            title: "The World of Glass".to_string(),
            genre: Genre::Mystery,
            primary: Setting {
                name: "Paris".to_string(),
                era: "the 1920s".to_string(),
                description: String::new(),
            },
            secondary_locations: Vec::new(),
            rules: Vec::new(),
            central_conflict: "a string of impossible murders".to_string(),
            atmosphere: String::new(),
            themes: Vec::new(),
        }
    }

    fn beat() -> ChapterBeat {
        ChapterBeat {
            number: 1,
            title: "The Voice".to_string(),
            kind: BeatKind::IncitingIncident,
            act: 1,
            pov: CharacterId(1),
            goal: "find the source of the voice".to_string(),
            conflict: "nobody believes her".to_string(),
            turning_point: "The voice belongs to a dead man".to_string(),
            ending: EndingState::Cliffhanger,
            tension: 2,
            location: "the morgue".to_string(),
            key_character: Some(CharacterId(3)),
            summary: String::new(),
            thread: ThreadId::primary(),
            resolves: Vec::new(),
        }
    }

    #[test]
    fn mentions_match_whole_first_names() {
        let c = &cast().characters[0];
        assert!(mentions("Ada opened the door.", c));
        assert!(mentions("It was Ada Vane's coat.", c));
        assert!(!mentions("Adam opened the door.", c));
    }

    #[test]
    fn disclosures_capped_at_three() {
        let text = "She learned that the key was brass. He discovered that the lock was new. \
                    They confirmed that the clock had stopped. Mira revealed that the maid lied. \
                    Nothing else happened.";
        let facts = disclosed_facts(text);
        assert_eq!(facts.len(), 3);
        assert_eq!(facts[0], "She learned that the key was brass.");
    }

    #[test]
    fn update_records_turn_mentions_and_thread() {
        let state = NarrativeState::seeded(&world(), [CharacterId(1), CharacterId(2), CharacterId(3)]);
        let text = "Ada walked in.\n\nMira waited. Ada realised that the clock was wrong.\n\n\"Go,\" said Mira.";
        let update = extract_update(&beat(), &cast(), &world(), &state, text);

        assert_eq!(update.chapter, 1);
        assert_eq!(
            update.facts,
            vec![
                "Ada realised that the clock was wrong.".to_string(),
                "The voice belongs to a dead man.".to_string()
            ]
        );
        let ids: Vec<u64> = update.characters.iter().map(|c| c.id.0).collect();
        assert_eq!(ids, vec![1, 3]);
        assert_eq!(update.characters[0].emotion.as_deref(), Some("unsettled"));
        assert_eq!(update.characters[1].location.as_deref(), Some("the morgue"));
        assert_eq!(update.open, vec![(ThreadId::primary(), "a string of impossible murders".to_string())]);
        assert_eq!(update.closing.excerpt, "\"Go,\" said Mira.");
        assert_eq!(update.closing.ending, EndingState::Cliffhanger);
    }

    #[test]
    fn known_threads_are_not_reopened() {
        let mut state = NarrativeState::seeded(&world(), []);
        let first = extract_update(&beat(), &cast(), &world(), &state, "Ada.");
        state.apply(first).unwrap();
        let mut second = beat();
        second.number = 2;
        let update = extract_update(&second, &cast(), &world(), &state, "Ada.");
        assert!(update.open.is_empty());
    }

    #[test]
    fn tally_counts_backends() {
        let chapters = vec![
            Chapter::new(1, "a", "x".to_string(), BackendKind::Llm),
            Chapter::new(2, "b", "y".to_string(), BackendKind::Local),
            Chapter::new(3, "c", "z".to_string(), BackendKind::Local),
        ];
        assert_eq!(backend_tally(&chapters), (1, 2));
    }
}
