use serde::{Deserialize, Serialize};

use super::genre::Genre;

/// Where the facts of a research brief came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SourceMode {
    Network,
    OfflineFallback,
}

impl SourceMode {
    pub fn label(&self) -> &'static str {
        match self {
            Self::Network => "network",
            Self::OfflineFallback => "offline-fallback",
        }
    }
}

/// A single researched fact with its source tag (e.g. "wikipedia:Paris").
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FactSnippet {
    pub text: String,
    pub source: String,
}

impl FactSnippet {
    pub fn new(text: impl Into<String>, source: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            source: source.into(),
        }
    }
}

/// Structured background research for one generation run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResearchBrief {
    pub topic: String,
    pub genre: Genre,
    pub facts: Vec<FactSnippet>,
    pub keywords: Vec<String>,
    pub source_mode: SourceMode,
}

impl ResearchBrief {
    /// All fact text joined into one corpus, one fact per line.
    pub fn corpus(&self) -> String {
        self.facts
            .iter()
            .map(|f| f.text.as_str())
            .collect::<Vec<_>>()
            .join("\n")
    }

    /// Plain-text research notes, disclosing provenance.
    pub fn render(&self) -> String {
        let mut lines = vec![
            format!("RESEARCH NOTES: '{}' ({})", truncate(&self.topic, 80), self.genre),
            "=".repeat(60),
            String::new(),
            format!("Source mode: {}", self.source_mode.label()),
            String::new(),
            "FACTS".to_string(),
            "-".repeat(40),
        ];
        for fact in &self.facts {
            lines.push(format!("* {} [{}]", fact.text, fact.source));
        }
        lines.push(String::new());
        lines.push("THEMATIC KEYWORDS".to_string());
        lines.push("-".repeat(40));
        lines.push(self.keywords.join(", "));
        lines.push(String::new());
        lines.push("NOVEL IDEA (original prompt)".to_string());
        lines.push("-".repeat(40));
        lines.push(self.topic.clone());
        lines.join("\n")
    }
}

fn truncate(s: &str, max_chars: usize) -> String {
    s.chars().take(max_chars).collect()
}
