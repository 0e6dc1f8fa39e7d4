//! Repetition guard for synthesized prose.
//!
//! Remembers every sentence emitted in the current chapter plus the
//! openings of the most recent paragraphs, so the synthesizer can re-roll
//! a paragraph that would repeat itself.

use rustc_hash::{FxHashSet, FxHasher};
use std::collections::VecDeque;
use std::hash::{Hash, Hasher};

/// Sentences shorter than this are allowed to recur ("Nobody moved.").
const MIN_TRACKED_WORDS: usize = 5;
/// Words of a paragraph opening compared against recent paragraphs.
const OPENING_WORDS: usize = 3;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RepetitionIssue {
    RepeatedSentence(String),
    RepeatedOpening(String),
}

#[derive(Debug, Clone)]
pub struct ProseContext {
    sentences: FxHashSet<u64>,
    openings: VecDeque<String>,
    window: usize,
}

impl Default for ProseContext {
    fn default() -> Self {
        Self::with_window(4)
    }
}

impl ProseContext {
    pub fn with_window(window: usize) -> Self {
        Self {
            sentences: FxHashSet::default(),
            openings: VecDeque::with_capacity(window),
            window,
        }
    }

    pub fn check_repetition(&self, paragraph: &str) -> Vec<RepetitionIssue> {
        let mut issues = Vec::new();
        if let Some(opening) = opening_of(paragraph) {
            if self.openings.contains(&opening) {
                issues.push(RepetitionIssue::RepeatedOpening(opening));
            }
        }
        for sentence in sentences(paragraph) {
            if word_len(sentence) >= MIN_TRACKED_WORDS
                && self.sentences.contains(&fingerprint(sentence))
            {
                issues.push(RepetitionIssue::RepeatedSentence(sentence.to_string()));
            }
        }
        issues
    }

    pub fn record(&mut self, paragraph: &str) {
        for sentence in sentences(paragraph) {
            if word_len(sentence) >= MIN_TRACKED_WORDS {
                self.sentences.insert(fingerprint(sentence));
            }
        }
        if let Some(opening) = opening_of(paragraph) {
            if self.openings.len() == self.window {
                self.openings.pop_front();
            }
            self.openings.push_back(opening);
        }
    }
}

fn sentences(text: &str) -> impl Iterator<Item = &str> {
    text.split_inclusive(['.', '!', '?'])
        .map(str::trim)
        .filter(|s| !s.is_empty())
}

fn word_len(s: &str) -> usize {
    s.split_whitespace().count()
}

fn normalise(s: &str) -> String {
    s.split_whitespace()
        .map(|w| {
            w.trim_matches(|c: char| !c.is_alphanumeric())
                .to_lowercase()
        })
        .filter(|w| !w.is_empty())
        .collect::<Vec<_>>()
        .join(" ")
}

fn fingerprint(sentence: &str) -> u64 {
    let mut hasher = FxHasher::default();
    normalise(sentence).hash(&mut hasher);
    hasher.finish()
}

fn opening_of(paragraph: &str) -> Option<String> {
    let normalised = normalise(paragraph);
    let words: Vec<&str> = normalised.split(' ').take(OPENING_WORDS).collect();
    (words.len() == OPENING_WORDS).then(|| words.join(" "))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fresh_context_reports_nothing() {
        let ctx = ProseContext::default();
        assert!(ctx.check_repetition("The rain came down over the harbour.").is_empty());
    }

    #[test]
    fn repeated_sentence_detected_ignoring_case_and_punctuation() {
        let mut ctx = ProseContext::default();
        ctx.record("The rain came down over the harbour. Nobody moved.");
        let issues = ctx.check_repetition("Later, she slept. the rain came down over the harbour!");
        assert_eq!(issues.len(), 1);
        assert!(matches!(&issues[0], RepetitionIssue::RepeatedSentence(_)));
    }

    #[test]
    fn short_sentences_may_recur() {
        let mut ctx = ProseContext::default();
        ctx.record("Nobody moved. Then the bell rang twice.");
        assert!(ctx.check_repetition("Later again. Nobody moved.").is_empty());
    }

    #[test]
    fn openings_slide_out_of_window() {
        let mut ctx = ProseContext::with_window(2);
        ctx.record("She walked home alone.");
        assert_eq!(
            ctx.check_repetition("She walked home again."),
            vec![RepetitionIssue::RepeatedOpening("she walked home".to_string())]
        );
        ctx.record("A dog barked somewhere.");
        ctx.record("The lamps were lit.");
        assert!(ctx.check_repetition("She walked home again.").is_empty());
    }
}
