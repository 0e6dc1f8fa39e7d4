use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// The closed set of genres a novel can be generated in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Genre {
    Fantasy,
    SciFi,
    Mystery,
    Romance,
    Thriller,
    HistoricalFiction,
    Horror,
    LiteraryFiction,
    Adventure,
    General,
}

#[derive(Debug, Error, PartialEq, Eq)]
#[error("unknown genre '{0}'")]
pub struct GenreParseError(pub String);

impl Genre {
    pub const ALL: [Genre; 10] = [
        Genre::Fantasy,
        Genre::SciFi,
        Genre::Mystery,
        Genre::Romance,
        Genre::Thriller,
        Genre::HistoricalFiction,
        Genre::Horror,
        Genre::LiteraryFiction,
        Genre::Adventure,
        Genre::General,
    ];

    /// Human-readable name, as shown in compiled documents.
    pub fn label(&self) -> &'static str {
        match self {
            Self::Fantasy => "Fantasy",
            Self::SciFi => "Sci-Fi",
            Self::Mystery => "Mystery",
            Self::Romance => "Romance",
            Self::Thriller => "Thriller",
            Self::HistoricalFiction => "Historical Fiction",
            Self::Horror => "Horror",
            Self::LiteraryFiction => "Literary Fiction",
            Self::Adventure => "Adventure",
            Self::General => "General",
        }
    }

    /// Lowercase identifier used for data directories and grammar tags.
    pub fn slug(&self) -> &'static str {
        match self {
            Self::Fantasy => "fantasy",
            Self::SciFi => "sci_fi",
            Self::Mystery => "mystery",
            Self::Romance => "romance",
            Self::Thriller => "thriller",
            Self::HistoricalFiction => "historical_fiction",
            Self::Horror => "horror",
            Self::LiteraryFiction => "literary_fiction",
            Self::Adventure => "adventure",
            Self::General => "general",
        }
    }

    /// Returns the tag string for this genre (e.g., "genre:mystery").
    pub fn tag(&self) -> String {
        format!("genre:{}", self.slug())
    }
}

impl Default for Genre {
    fn default() -> Self {
        Self::General
    }
}

impl fmt::Display for Genre {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

impl FromStr for Genre {
    type Err = GenreParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized: String = s
            .trim()
            .to_lowercase()
            .chars()
            .filter(|c| c.is_alphanumeric())
            .collect();
        let genre = match normalized.as_str() {
            "fantasy" => Self::Fantasy,
            "scifi" | "sciencefiction" | "sf" => Self::SciFi,
            "mystery" | "detective" => Self::Mystery,
            "romance" => Self::Romance,
            "thriller" => Self::Thriller,
            "historicalfiction" | "historical" => Self::HistoricalFiction,
            "horror" => Self::Horror,
            "literaryfiction" | "literary" => Self::LiteraryFiction,
            "adventure" => Self::Adventure,
            "general" => Self::General,
            _ => return Err(GenreParseError(s.to_string())),
        };
        Ok(genre)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_accepts_label_and_slug_forms() {
        assert_eq!("Sci-Fi".parse::<Genre>(), Ok(Genre::SciFi));
        assert_eq!("science fiction".parse::<Genre>(), Ok(Genre::SciFi));
        assert_eq!("historical_fiction".parse::<Genre>(), Ok(Genre::HistoricalFiction));
        assert_eq!("  MYSTERY ".parse::<Genre>(), Ok(Genre::Mystery));
    }

    #[test]
    fn parse_rejects_unknown() {
        assert!("cookbook".parse::<Genre>().is_err());
    }

    #[test]
    fn every_label_round_trips() {
        for genre in Genre::ALL {
            assert_eq!(genre.label().parse::<Genre>(), Ok(genre));
            assert_eq!(genre.slug().parse::<Genre>(), Ok(genre));
        }
    }

    #[test]
    fn genre_tags() {
        assert_eq!(Genre::Mystery.tag(), "genre:mystery");
        assert_eq!(Genre::SciFi.tag(), "genre:sci_fi");
    }
}
