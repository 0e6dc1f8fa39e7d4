//! Built-in genre content, compiled into the binary.
//!
//! Each genre ships a `profile.ron` under `genre_data/<slug>/`; the prose
//! grammar shared by all genres lives in `genre_data/prose/grammar.ron` and
//! selects genre-specific variants through `genre:<slug>` tags.

use serde::Deserialize;
use std::collections::BTreeMap;
use thiserror::Error;

use crate::core::grammar::{GrammarError, GrammarSet};
use crate::schema::character::Pronouns;
use crate::schema::genre::Genre;

#[derive(Debug, Error)]
pub enum TemplateError {
    #[error("genre profile '{genre}' is invalid: {source}")]
    Profile {
        genre: &'static str,
        source: ron::error::SpannedError,
    },
    #[error("name bank is invalid: {0}")]
    Names(ron::error::SpannedError),
    #[error("genre profile '{0}' is missing required content")]
    Incomplete(&'static str),
    #[error("prose grammar: {0}")]
    Grammar(#[from] GrammarError),
}

#[derive(Debug, Clone, Deserialize)]
pub struct NameBank {
    pub first: Vec<(String, Pronouns)>,
    pub last: Vec<String>,
}

impl NameBank {
    /// Number of distinct full names this bank can produce.
    pub fn capacity(&self) -> usize {
        self.first.len() * self.last.len()
    }
}

/// Genre conventions consumed by every pipeline stage.
#[derive(Debug, Clone, Deserialize)]
pub struct GenreProfile {
    pub atmosphere: Vec<String>,
    pub locations: Vec<String>,
    pub power_words: Vec<String>,
    pub conflict_elements: Vec<String>,
    pub world_rules: Vec<String>,
    pub themes: Vec<String>,
    pub time_period: String,
    /// Genres without their own bank draw from the shared one.
    #[serde(default)]
    pub names: Option<NameBank>,
    pub offline_facts: Vec<String>,
    pub craft_notes: Vec<String>,
    pub style_reference: String,
    /// Each pattern contains one `{}` for the salient idea term.
    pub title_patterns: Vec<String>,
}

impl GenreProfile {
    fn check(&self, slug: &'static str) -> Result<(), TemplateError> {
        let lists = [
            &self.atmosphere,
            &self.locations,
            &self.power_words,
            &self.conflict_elements,
            &self.world_rules,
            &self.themes,
            &self.offline_facts,
            &self.title_patterns,
        ];
        // Worlds need a primary plus at least two distinct secondary locations.
        if lists.iter().any(|l| l.is_empty()) || self.locations.len() < 3 {
            return Err(TemplateError::Incomplete(slug));
        }
        if self.title_patterns.iter().any(|p| !p.contains("{}")) {
            return Err(TemplateError::Incomplete(slug));
        }
        Ok(())
    }
}

fn profile_source(genre: Genre) -> &'static str {
    match genre {
        Genre::Fantasy => include_str!("../genre_data/fantasy/profile.ron"),
        Genre::SciFi => include_str!("../genre_data/sci_fi/profile.ron"),
        Genre::Mystery => include_str!("../genre_data/mystery/profile.ron"),
        Genre::Romance => include_str!("../genre_data/romance/profile.ron"),
        Genre::Thriller => include_str!("../genre_data/thriller/profile.ron"),
        Genre::HistoricalFiction => include_str!("../genre_data/historical_fiction/profile.ron"),
        Genre::Horror => include_str!("../genre_data/horror/profile.ron"),
        Genre::LiteraryFiction => include_str!("../genre_data/literary_fiction/profile.ron"),
        Genre::Adventure => include_str!("../genre_data/adventure/profile.ron"),
        Genre::General => include_str!("../genre_data/general/profile.ron"),
    }
}

const DEFAULT_NAMES: &str = include_str!("../genre_data/names.ron");
const PROSE_GRAMMAR: &str = include_str!("../genre_data/prose/grammar.ron");

/// Every genre profile, the shared name bank, and the prose grammar.
#[derive(Debug, Clone)]
pub struct GenreLibrary {
    profiles: BTreeMap<Genre, GenreProfile>,
    default_names: NameBank,
    grammar: GrammarSet,
}

impl GenreLibrary {
    pub fn load() -> Result<Self, TemplateError> {
        let mut profiles = BTreeMap::new();
        for genre in Genre::ALL {
            let profile: GenreProfile = ron::from_str(profile_source(genre))
                .map_err(|source| TemplateError::Profile {
                    genre: genre.slug(),
                    source,
                })?;
            profile.check(genre.slug())?;
            profiles.insert(genre, profile);
        }
        let default_names: NameBank =
            ron::from_str(DEFAULT_NAMES).map_err(TemplateError::Names)?;
        let grammar = GrammarSet::parse_ron(PROSE_GRAMMAR)?;
        tracing::debug!(
            profiles = profiles.len(),
            rules = grammar.rules.len(),
            "genre library loaded"
        );
        Ok(Self {
            profiles,
            default_names,
            grammar,
        })
    }

    pub fn profile(&self, genre: Genre) -> &GenreProfile {
        // `load` inserts every genre.
        &self.profiles[&genre]
    }

    pub fn names(&self, genre: Genre) -> &NameBank {
        self.profile(genre)
            .names
            .as_ref()
            .unwrap_or(&self.default_names)
    }

    pub fn grammar(&self) -> &GrammarSet {
        &self.grammar
    }
}
