use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use super::character::Cast;
use super::genre::Genre;
use super::outline::PlotOutline;
use super::research::{ResearchBrief, SourceMode};
use super::world::WorldModel;

/// Which prose backend variant produced a chapter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    Llm,
    Local,
}

impl BackendKind {
    pub fn label(&self) -> &'static str {
        match self {
            Self::Llm => "llm",
            Self::Local => "local",
        }
    }
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Chapter {
    pub number: u32,
    pub title: String,
    pub body: String,
    pub word_count: usize,
    pub backend: BackendKind,
}

impl Chapter {
    pub fn new(number: u32, title: impl Into<String>, body: String, backend: BackendKind) -> Self {
        let word_count = word_count(&body);
        Self {
            number,
            title: title.into(),
            body,
            word_count,
            backend,
        }
    }
}

pub fn word_count(text: &str) -> usize {
    text.split_whitespace().count()
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChapterRecord {
    pub number: u32,
    pub title: String,
    pub word_count: usize,
    pub backend: BackendKind,
}

/// Aggregate record handed to persistence alongside the novel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NovelMetadata {
    pub title: String,
    pub genre: String,
    pub total_words: usize,
    pub requested_chapters: u32,
    pub completed_chapters: u32,
    pub research_source: SourceMode,
    pub generated_at: DateTime<Utc>,
    pub chapters: Vec<ChapterRecord>,
}

impl NovelMetadata {
    pub fn is_complete(&self) -> bool {
        self.completed_chapters == self.requested_chapters
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Novel {
    pub idea: String,
    pub genre: Genre,
    pub brief: ResearchBrief,
    pub world: WorldModel,
    pub cast: Cast,
    pub outline: PlotOutline,
    pub chapters: Vec<Chapter>,
    pub metadata: NovelMetadata,
}

impl Novel {
    pub fn title(&self) -> &str {
        &self.metadata.title
    }
}
