use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use thiserror::Error;

use super::character::CharacterId;
use super::outline::{EndingState, ThreadId};
use super::world::WorldModel;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum StateError {
    #[error("state update for chapter {got} out of order (expected chapter {expected})")]
    OutOfOrder { expected: u32, got: u32 },
}

/// What a character is doing as of the last chapter they appeared in.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CharacterStatus {
    pub location: Option<String>,
    pub emotion: Option<String>,
    pub knowledge: BTreeSet<String>,
    pub last_seen: Option<u32>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ThreadStatus {
    Open,
    Resolved { chapter: u32 },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlotThread {
    pub label: String,
    pub opened_in: u32,
    pub status: ThreadStatus,
}

impl PlotThread {
    pub fn is_open(&self) -> bool {
        self.status == ThreadStatus::Open
    }
}

/// A statement later chapters must not contradict. Chapter 0 means the world itself.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EstablishedFact {
    pub text: String,
    pub chapter: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChapterClosing {
    pub number: u32,
    pub ending: EndingState,
    pub excerpt: String,
}

/// Observed changes for a single character in one chapter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CharacterUpdate {
    pub id: CharacterId,
    pub location: Option<String>,
    pub emotion: Option<String>,
    pub learned: Vec<String>,
}

/// Everything one drafted chapter contributes to the running state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StateUpdate {
    pub chapter: u32,
    pub open: Vec<(ThreadId, String)>,
    pub resolve: Vec<ThreadId>,
    pub characters: Vec<CharacterUpdate>,
    pub facts: Vec<String>,
    pub closing: ChapterClosing,
}

/// Cross-chapter memory, threaded explicitly through the drafting loop.
///
/// Every successful [`apply`](Self::apply) bumps `version` by one, so a
/// state for chapter K always has `version == K - 1` before drafting it.
/// Facts are append-only and threads only move from open to resolved.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NarrativeState {
    pub version: u32,
    pub characters: BTreeMap<CharacterId, CharacterStatus>,
    pub threads: BTreeMap<ThreadId, PlotThread>,
    pub facts: Vec<EstablishedFact>,
    pub last_closing: Option<ChapterClosing>,
}

impl NarrativeState {
    /// Initial state: world facts recorded as chapter 0, every character known but unseen.
    pub fn seeded(world: &WorldModel, characters: impl IntoIterator<Item = CharacterId>) -> Self {
        let mut state = Self::default();
        state.push_fact(
            format!(
                "The story is set in {} during {}.",
                world.primary.name, world.primary.era
            ),
            0,
        );
        state.push_fact(
            format!("At the heart of events lies {}.", world.central_conflict),
            0,
        );
        for rule in &world.rules {
            state.push_fact(rule.clone(), 0);
        }
        for id in characters {
            state.characters.entry(id).or_default();
        }
        state
    }

    /// The chapter number the next update must carry.
    pub fn next_chapter(&self) -> u32 {
        self.version + 1
    }

    pub fn apply(&mut self, update: StateUpdate) -> Result<(), StateError> {
        let expected = self.next_chapter();
        if update.chapter != expected {
            return Err(StateError::OutOfOrder {
                expected,
                got: update.chapter,
            });
        }

        for (id, label) in update.open {
            self.threads.entry(id).or_insert(PlotThread {
                label,
                opened_in: update.chapter,
                status: ThreadStatus::Open,
            });
        }
        for id in update.resolve {
            if let Some(thread) = self.threads.get_mut(&id) {
                if thread.is_open() {
                    thread.status = ThreadStatus::Resolved {
                        chapter: update.chapter,
                    };
                }
            }
        }
        for c in update.characters {
            let status = self.characters.entry(c.id).or_default();
            if c.location.is_some() {
                status.location = c.location;
            }
            if c.emotion.is_some() {
                status.emotion = c.emotion;
            }
            status.knowledge.extend(c.learned);
            status.last_seen = Some(update.chapter);
        }
        for fact in update.facts {
            self.push_fact(fact, update.chapter);
        }
        self.last_closing = Some(update.closing);
        self.version = update.chapter;
        Ok(())
    }

    pub fn open_threads(&self) -> impl Iterator<Item = (&ThreadId, &PlotThread)> {
        self.threads.iter().filter(|(_, t)| t.is_open())
    }

    pub fn has_fact(&self, text: &str) -> bool {
        self.facts.iter().any(|f| f.text == text)
    }

    fn push_fact(&mut self, text: String, chapter: u32) {
        let text = text.trim().to_string();
        if !text.is_empty() && !self.has_fact(&text) {
            self.facts.push(EstablishedFact { text, chapter });
        }
    }
}
