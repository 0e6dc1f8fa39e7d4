//! Markov chain phrase generator, trained per run on research text.

use rand::distributions::WeightedIndex;
use rand::prelude::Distribution;
use rand::rngs::StdRng;
use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum MarkovError {
    #[error("no data for generation (model is empty or tag has no data)")]
    NoData,
    #[error("no sentence start found")]
    NoSentenceStart,
    #[error("n-gram depth must be 2-4, got {0}")]
    InvalidDepth(usize),
}

const SENTENCE_START: &str = "<S>";
const SENTENCE_END: &str = "</S>";

const SENTENCE_ENDERS: &[char] = &['.', '!', '?'];
const PUNCTUATION: &[char] = &['.', '!', '?', ',', ';', ':', '"'];

type Table = FxHashMap<Vec<String>, Vec<(String, u32)>>;

/// A trained Markov model storing n-gram transition counts.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct MarkovModel {
    /// N-gram depth (e.g., 2 for bigrams, 3 for trigrams).
    pub n: usize,
    pub transitions: Table,
    pub tagged_transitions: FxHashMap<String, Table>,
}

impl MarkovModel {
    pub fn is_empty(&self) -> bool {
        self.transitions.is_empty()
    }

    /// Walk the chain from a sentence start, stopping at the first sentence
    /// boundary once `min_words` is reached. Output never exceeds `max_words`
    /// unless no sentence boundary was seen yet.
    pub fn generate(
        &self,
        rng: &mut StdRng,
        tag: Option<&str>,
        min_words: usize,
        max_words: usize,
    ) -> Result<String, MarkovError> {
        let transitions = match tag {
            Some(tag) => self.tagged_transitions.get(tag).ok_or(MarkovError::NoData)?,
            None => &self.transitions,
        };
        if transitions.is_empty() {
            return Err(MarkovError::NoData);
        }

        let start = vec![SENTENCE_START.to_string(); self.n - 1];
        let mut tokens: Vec<String> = Vec::new();
        let mut state = start.clone();
        let mut words = 0;
        let mut last_boundary = 0;

        for _ in 0..(max_words * 3) {
            let Some(next) = pick_next(transitions, &state, rng) else {
                break;
            };

            if next == SENTENCE_END {
                last_boundary = tokens.len();
                if words >= min_words {
                    break;
                }
                state = start.clone();
                continue;
            }

            if !is_punct(&next) {
                words += 1;
            }
            tokens.push(next.clone());
            state.remove(0);
            state.push(next);

            if words >= max_words {
                if last_boundary > 0 {
                    tokens.truncate(last_boundary);
                }
                break;
            }
        }

        if tokens.is_empty() {
            return Err(MarkovError::NoSentenceStart);
        }
        Ok(reassemble_tokens(&tokens))
    }
}

fn is_punct(tok: &str) -> bool {
    let mut chars = tok.chars();
    matches!((chars.next(), chars.next()), (Some(c), None) if PUNCTUATION.contains(&c))
}

fn pick_next(transitions: &Table, state: &[String], rng: &mut StdRng) -> Option<String> {
    let options = transitions.get(state)?;
    let weights: Vec<u32> = options.iter().map(|(_, count)| *count).collect();
    let dist = WeightedIndex::new(&weights).ok()?;
    Some(options[dist.sample(rng)].0.clone())
}

/// Reassemble tokens into natural text (attach punctuation to previous word).
fn reassemble_tokens(tokens: &[String]) -> String {
    let mut result = String::new();
    for (i, tok) in tokens.iter().enumerate() {
        if i > 0 && !is_punct(tok) {
            result.push(' ');
        }
        result.push_str(tok);
    }
    result
}

/// Trains Markov models from raw text.
pub struct MarkovTrainer;

impl MarkovTrainer {
    /// Train a model with the given n-gram depth.
    ///
    /// Lines of the form `[tag]` apply that tag to subsequent text until the
    /// next tag line.
    pub fn train(text: &str, n: usize) -> Result<MarkovModel, MarkovError> {
        if !(2..=4).contains(&n) {
            return Err(MarkovError::InvalidDepth(n));
        }

        let mut model = MarkovModel {
            n,
            ..MarkovModel::default()
        };
        let mut current_tag: Option<String> = None;

        for line in text.lines().map(str::trim) {
            if line.len() > 2 && line.starts_with('[') && line.ends_with(']') {
                current_tag = Some(line[1..line.len() - 1].to_string());
                continue;
            }
            if line.is_empty() {
                continue;
            }

            for sentence in split_into_sentences(&tokenize(line)) {
                let mut padded = vec![SENTENCE_START.to_string(); n - 1];
                padded.extend(sentence);
                padded.push(SENTENCE_END.to_string());

                for window in padded.windows(n) {
                    let prefix = window[..n - 1].to_vec();
                    let next = &window[n - 1];
                    if let Some(tag) = &current_tag {
                        let table = model.tagged_transitions.entry(tag.clone()).or_default();
                        add_transition(table, prefix.clone(), next);
                    }
                    add_transition(&mut model.transitions, prefix, next);
                }
            }
        }

        Ok(model)
    }

    /// Train on a list of independent sentences, all under one tag.
    pub fn train_sentences<'s>(
        sentences: impl IntoIterator<Item = &'s str>,
        tag: &str,
        n: usize,
    ) -> Result<MarkovModel, MarkovError> {
        let mut text = format!("[{tag}]\n");
        for s in sentences {
            text.push_str(s);
            text.push('\n');
        }
        Self::train(&text, n)
    }
}

fn add_transition(table: &mut Table, prefix: Vec<String>, next: &str) {
    let entries = table.entry(prefix).or_default();
    match entries.iter_mut().find(|(tok, _)| tok == next) {
        Some(entry) => entry.1 += 1,
        None => entries.push((next.to_string(), 1)),
    }
}

/// Split on whitespace, separating punctuation into its own tokens.
fn tokenize(text: &str) -> Vec<String> {
    let mut tokens = Vec::new();
    for word in text.split_whitespace() {
        let mut rest = word;
        while let Some(first) = rest.chars().next() {
            if PUNCTUATION.contains(&first) {
                tokens.push(first.to_string());
                rest = &rest[first.len_utf8()..];
                continue;
            }
            match rest.find(|c: char| PUNCTUATION.contains(&c)) {
                Some(pos) => {
                    tokens.push(rest[..pos].to_string());
                    rest = &rest[pos..];
                }
                None => {
                    tokens.push(rest.to_string());
                    break;
                }
            }
        }
    }
    tokens
}

fn split_into_sentences(tokens: &[String]) -> Vec<Vec<String>> {
    let mut sentences = Vec::new();
    let mut current = Vec::new();
    for tok in tokens {
        current.push(tok.clone());
        if tok.chars().count() == 1 && tok.chars().all(|c| SENTENCE_ENDERS.contains(&c)) {
            sentences.push(std::mem::take(&mut current));
        }
    }
    if !current.is_empty() {
        sentences.push(current);
    }
    sentences
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;

    fn train_test_corpus() -> MarkovModel {
        let corpus = std::fs::read_to_string("tests/fixtures/test_corpus.txt").unwrap();
        MarkovTrainer::train(&corpus, 2).unwrap()
    }

    #[test]
    fn tokenize_basic() {
        assert_eq!(tokenize("Hello, world."), vec!["Hello", ",", "world", "."]);
    }

    #[test]
    fn tokenize_keeps_apostrophes_inside_words() {
        assert_eq!(tokenize("Paris's river"), vec!["Paris's", "river"]);
    }

    #[test]
    fn train_rejects_bad_depth() {
        assert_eq!(
            MarkovTrainer::train("text", 5).unwrap_err(),
            MarkovError::InvalidDepth(5)
        );
    }

    #[test]
    fn train_creates_tagged_transitions() {
        let model = train_test_corpus();
        assert_eq!(model.n, 2);
        assert!(!model.is_empty());
        for tag in ["neutral", "tense", "warm"] {
            assert!(model.tagged_transitions.contains_key(tag), "missing {tag}");
        }
    }

    #[test]
    fn generate_deterministic() {
        let model = train_test_corpus();
        let mut rng1 = StdRng::seed_from_u64(42);
        let mut rng2 = StdRng::seed_from_u64(42);
        assert_eq!(
            model.generate(&mut rng1, None, 3, 20).unwrap(),
            model.generate(&mut rng2, None, 3, 20).unwrap()
        );
    }

    #[test]
    fn generate_with_tag() {
        let model = train_test_corpus();
        let mut rng = StdRng::seed_from_u64(42);
        let result = model.generate(&mut rng, Some("tense"), 3, 20).unwrap();
        assert!(result.split_whitespace().count() >= 3);
    }

    #[test]
    fn generate_invalid_tag_returns_error() {
        let model = train_test_corpus();
        let mut rng = StdRng::seed_from_u64(42);
        assert_eq!(
            model.generate(&mut rng, Some("nonexistent_tag"), 3, 20),
            Err(MarkovError::NoData)
        );
    }

    #[test]
    fn empty_model_has_no_data() {
        let model = MarkovTrainer::train("", 3).unwrap();
        let mut rng = StdRng::seed_from_u64(0);
        assert_eq!(model.generate(&mut rng, None, 1, 5), Err(MarkovError::NoData));
    }

    #[test]
    fn trigram_sentences_reproduce_single_source() {
        let model =
            MarkovTrainer::train_sentences(["The bridge was completed in 1889."], "research", 3)
                .unwrap();
        let mut rng = StdRng::seed_from_u64(7);
        assert_eq!(
            model.generate(&mut rng, Some("research"), 3, 20).unwrap(),
            "The bridge was completed in 1889."
        );
    }

    #[test]
    fn reassemble_attaches_punctuation() {
        let tokens: Vec<String> = ["Hello", ",", "world", "."].iter().map(|s| s.to_string()).collect();
        assert_eq!(reassemble_tokens(&tokens), "Hello, world.");
    }
}
