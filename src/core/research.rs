//! Research stage: turns the idea into a `ResearchBrief`.
//!
//! Lookup goes through a [`ResearchProvider`]; any failure or empty result
//! falls back to the genre's built-in fact table, so building a brief never
//! fails.

use regex::Regex;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::sync::OnceLock;
use std::time::Duration;
use thiserror::Error;

use crate::genre_templates::GenreLibrary;
use crate::schema::genre::Genre;
use crate::schema::research::{FactSnippet, ResearchBrief, SourceMode};

pub const WIKIPEDIA_API: &str = "https://en.wikipedia.org/w/api.php";
const USER_AGENT: &str = concat!("novel-engine/", env!("CARGO_PKG_VERSION"));

/// Keywords kept from an idea.
const MAX_KEYWORDS: usize = 8;
/// Characters read from each article before splitting it into facts.
const MAX_EXTRACT_CHARS: usize = 3500;
/// Facts taken from one article.
const FACTS_PER_ARTICLE: usize = 6;

const STOP_WORDS: &[&str] = &[
    "a", "an", "the", "and", "or", "but", "in", "on", "at", "to", "for", "of", "with", "by",
    "from", "about", "as", "is", "are", "was", "were", "be", "been", "being", "have", "has",
    "had", "do", "does", "did", "will", "would", "could", "should", "may", "might", "that",
    "this", "it", "its", "who", "what", "where", "when", "how", "which", "i", "my", "me", "we",
    "our", "you", "your", "he", "she", "his", "her", "they", "their", "can", "not", "no", "up",
    "so", "into", "out", "want", "just", "like", "story", "novel", "book", "character", "plot",
    "write", "writing", "fiction", "generate", "idea", "them", "then", "than", "there", "these",
    "those",
];

#[derive(Debug, Error)]
pub enum ResearchError {
    #[error("research provider unavailable: {0}")]
    Unavailable(String),
    #[error("research request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("research returned no usable facts")]
    Empty,
}

/// External lookup capability. An empty result counts as a failure.
pub trait ResearchProvider: Send + Sync {
    fn fetch(&self, topic: &str) -> Result<Vec<FactSnippet>, ResearchError>;
}

/// A provider that never answers, for offline runs.
#[derive(Debug, Clone, Copy, Default)]
pub struct OfflineProvider;

impl ResearchProvider for OfflineProvider {
    fn fetch(&self, _topic: &str) -> Result<Vec<FactSnippet>, ResearchError> {
        Err(ResearchError::Unavailable("offline mode".to_string()))
    }
}

#[derive(Debug, Clone)]
pub struct WikipediaConfig {
    pub endpoint: String,
    pub timeout_secs: u64,
    pub max_articles: usize,
}

impl Default for WikipediaConfig {
    fn default() -> Self {
        Self {
            endpoint: WIKIPEDIA_API.to_string(),
            timeout_secs: 12,
            max_articles: 3,
        }
    }
}

/// MediaWiki search + plain-text extracts.
pub struct WikipediaProvider {
    client: reqwest::blocking::Client,
    config: WikipediaConfig,
}

#[derive(Debug, Deserialize)]
struct SearchResponse {
    #[serde(default)]
    query: Option<SearchQuery>,
}

#[derive(Debug, Deserialize)]
struct SearchQuery {
    #[serde(default)]
    search: Vec<SearchHit>,
}

#[derive(Debug, Deserialize)]
struct SearchHit {
    title: String,
}

#[derive(Debug, Deserialize)]
struct ExtractResponse {
    #[serde(default)]
    query: Option<ExtractQuery>,
}

#[derive(Debug, Deserialize)]
struct ExtractQuery {
    #[serde(default)]
    pages: BTreeMap<String, ExtractPage>,
}

#[derive(Debug, Deserialize)]
struct ExtractPage {
    #[serde(default)]
    extract: Option<String>,
}

impl WikipediaProvider {
    pub fn new(config: WikipediaConfig) -> Result<Self, ResearchError> {
        let client = reqwest::blocking::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .user_agent(USER_AGENT)
            .build()?;
        Ok(Self { client, config })
    }

    fn search(&self, query: &str) -> Result<Option<String>, ResearchError> {
        let resp: SearchResponse = self
            .client
            .get(&self.config.endpoint)
            .query(&[
                ("action", "query"),
                ("format", "json"),
                ("list", "search"),
                ("srsearch", query),
                ("srlimit", "3"),
                ("utf8", "1"),
            ])
            .send()?
            .error_for_status()?
            .json()?;
        Ok(resp
            .query
            .and_then(|q| q.search.into_iter().next())
            .map(|hit| hit.title))
    }

    fn extract(&self, title: &str) -> Result<Option<String>, ResearchError> {
        let resp: ExtractResponse = self
            .client
            .get(&self.config.endpoint)
            .query(&[
                ("action", "query"),
                ("format", "json"),
                ("titles", title),
                ("prop", "extracts"),
                ("explaintext", "1"),
                ("exsectionformat", "plain"),
                ("redirects", "1"),
            ])
            .send()?
            .error_for_status()?
            .json()?;
        Ok(resp
            .query
            .into_iter()
            .flat_map(|q| q.pages.into_values())
            .filter_map(|p| p.extract)
            .find(|e| e.len() > 100)
            .map(|e| e.chars().take(MAX_EXTRACT_CHARS).collect()))
    }
}

impl ResearchProvider for WikipediaProvider {
    fn fetch(&self, topic: &str) -> Result<Vec<FactSnippet>, ResearchError> {
        let mut titles: Vec<String> = Vec::new();
        let mut facts = Vec::new();
        let mut last_error = None;

        for keyword in extract_keywords(topic, None) {
            if titles.len() >= self.config.max_articles {
                break;
            }
            let title = match self.search(&keyword) {
                Ok(Some(title)) => title,
                Ok(None) => continue,
                Err(e) => {
                    tracing::debug!(keyword = %keyword, error = %e, "wikipedia search failed");
                    last_error = Some(e);
                    continue;
                }
            };
            if titles.iter().any(|t| t.eq_ignore_ascii_case(&title)) {
                continue;
            }
            match self.extract(&title) {
                Ok(Some(text)) => {
                    let source = format!("wikipedia:{title}");
                    facts.extend(
                        fact_sentences(&text)
                            .take(FACTS_PER_ARTICLE)
                            .map(|s| FactSnippet::new(s, source.clone())),
                    );
                    titles.push(title);
                }
                Ok(None) => {}
                Err(e) => {
                    tracing::debug!(title = %title, error = %e, "wikipedia extract failed");
                    last_error = Some(e);
                }
            }
        }

        match (facts.is_empty(), last_error) {
            (false, _) => Ok(facts),
            (true, Some(e)) => Err(e),
            (true, None) => Err(ResearchError::Empty),
        }
    }
}

/// Sentences from an extract that read as standalone facts.
fn fact_sentences(text: &str) -> impl Iterator<Item = String> + '_ {
    text.split_inclusive(['.', '!', '?'])
        .map(|s| s.split_whitespace().collect::<Vec<_>>().join(" "))
        .filter(|s| {
            let words = s.split_whitespace().count();
            (6..=60).contains(&words) && s.ends_with('.')
        })
}

fn quoted_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r#""([^"]+)""#).expect("valid regex"))
}

fn pair_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\b([A-Z][a-z]+\s+[A-Z][a-z]+)\b").expect("valid regex"))
}

fn word_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\b[a-zA-Z]{4,}\b").expect("valid regex"))
}

pub(crate) fn is_stop_word(word: &str) -> bool {
    STOP_WORDS.contains(&word.to_lowercase().as_str())
}

/// Searchable keywords: the genre first (when given), then quoted phrases,
/// capitalised pairs and substantive words. De-duplicated case-insensitively.
pub fn extract_keywords(idea: &str, genre: Option<Genre>) -> Vec<String> {
    let genre_key = genre.map(|g| match g {
        Genre::SciFi => "science fiction".to_string(),
        other => other.label().to_lowercase().replace('-', " "),
    });
    let phrases = quoted_re()
        .captures_iter(idea)
        .chain(pair_re().captures_iter(idea))
        .filter_map(|c| c.get(1))
        .map(|m| m.as_str().to_string());
    let words = word_re()
        .find_iter(idea)
        .map(|m| m.as_str().to_lowercase())
        .filter(|w| !is_stop_word(w));

    let mut out: Vec<String> = Vec::new();
    for item in genre_key.into_iter().chain(phrases).chain(words) {
        if !out.iter().any(|k| k.eq_ignore_ascii_case(&item)) {
            out.push(item);
        }
        if out.len() == MAX_KEYWORDS {
            break;
        }
    }
    out
}

pub struct ResearchBriefBuilder<'a> {
    provider: &'a dyn ResearchProvider,
    library: &'a GenreLibrary,
}

impl<'a> ResearchBriefBuilder<'a> {
    pub fn new(provider: &'a dyn ResearchProvider, library: &'a GenreLibrary) -> Self {
        Self { provider, library }
    }

    /// Never fails: provider errors and empty results use the offline table.
    pub fn build(&self, topic: &str, genre: Genre) -> ResearchBrief {
        let profile = self.library.profile(genre);
        let (facts, source_mode) = match self.provider.fetch(topic) {
            Ok(facts) if !facts.is_empty() => (facts, SourceMode::Network),
            Ok(_) => {
                tracing::warn!(topic, "research returned nothing, using offline facts");
                (offline_facts(genre, self.library), SourceMode::OfflineFallback)
            }
            Err(e) => {
                tracing::warn!(topic, error = %e, "research unavailable, using offline facts");
                (offline_facts(genre, self.library), SourceMode::OfflineFallback)
            }
        };

        let mut keywords = extract_keywords(topic, Some(genre));
        for theme in &profile.themes {
            if !keywords.iter().any(|k| k.eq_ignore_ascii_case(theme)) {
                keywords.push(theme.clone());
            }
        }

        tracing::info!(
            facts = facts.len(),
            keywords = keywords.len(),
            source = source_mode.label(),
            "research brief built"
        );
        ResearchBrief {
            topic: topic.to_string(),
            genre,
            facts,
            keywords,
            source_mode,
        }
    }
}

fn offline_facts(genre: Genre, library: &GenreLibrary) -> Vec<FactSnippet> {
    let profile = library.profile(genre);
    let offline = format!("offline:{}", genre.slug());
    let craft = format!("craft:{}", genre.slug());
    profile
        .offline_facts
        .iter()
        .map(|f| FactSnippet::new(f.clone(), offline.clone()))
        .chain(
            profile
                .craft_notes
                .iter()
                .map(|n| FactSnippet::new(n.clone(), craft.clone())),
        )
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Fixed(Vec<FactSnippet>);

    impl ResearchProvider for Fixed {
        fn fetch(&self, _topic: &str) -> Result<Vec<FactSnippet>, ResearchError> {
            Ok(self.0.clone())
        }
    }

    const IDEA: &str = "A detective in 1920s Paris who hears murder victims' last thoughts";

    #[test]
    fn keywords_put_genre_first_and_skip_stop_words() {
        let kws = extract_keywords(IDEA, Some(Genre::Mystery));
        assert_eq!(kws[0], "mystery");
        assert!(kws.contains(&"detective".to_string()));
        assert!(kws.contains(&"paris".to_string()));
        assert!(!kws.iter().any(|k| k == "who"));
        assert!(kws.len() <= MAX_KEYWORDS);
    }

    #[test]
    fn keywords_keep_quoted_phrases_and_proper_pairs() {
        let kws = extract_keywords(r#"Smugglers near "the Iron Bridge" in New Orleans"#, Some(Genre::SciFi));
        assert_eq!(kws[0], "science fiction");
        assert_eq!(kws[1], "the Iron Bridge");
        assert!(kws.contains(&"New Orleans".to_string()));
        assert_eq!(kws.iter().filter(|k| k.eq_ignore_ascii_case("smugglers")).count(), 1);
    }

    #[test]
    fn offline_provider_falls_back() {
        let lib = GenreLibrary::load().unwrap();
        let brief = ResearchBriefBuilder::new(&OfflineProvider, &lib).build(IDEA, Genre::Mystery);
        assert_eq!(brief.source_mode, SourceMode::OfflineFallback);
        assert!(!brief.facts.is_empty());
        assert!(brief.facts.iter().all(|f| f.source.ends_with("mystery")));
    }

    #[test]
    fn empty_result_treated_as_failure() {
        let lib = GenreLibrary::load().unwrap();
        let brief = ResearchBriefBuilder::new(&Fixed(Vec::new()), &lib).build(IDEA, Genre::Horror);
        assert_eq!(brief.source_mode, SourceMode::OfflineFallback);
        assert!(!brief.facts.is_empty());
    }

    #[test]
    fn network_facts_kept_in_order() {
        let lib = GenreLibrary::load().unwrap();
        let facts = vec![
            FactSnippet::new("Paris had over 20,000 cafes in the 1920s.", "wikipedia:Paris"),
            FactSnippet::new("The Sûreté was the detective arm of the police.", "wikipedia:Sûreté"),
        ];
        let brief = ResearchBriefBuilder::new(&Fixed(facts.clone()), &lib).build(IDEA, Genre::Mystery);
        assert_eq!(brief.source_mode, SourceMode::Network);
        assert_eq!(brief.facts, facts);
        assert!(brief.keywords.iter().any(|k| k == "guilt and its disguises"));
    }

    #[test]
    fn fact_sentences_skip_fragments() {
        let text = "Paris. Paris is the capital and largest city of France by population. It is big.";
        let facts: Vec<String> = fact_sentences(text).collect();
        assert_eq!(facts, vec!["Paris is the capital and largest city of France by population."]);
    }
}
