//! World stage: derives the setting model from idea, genre and research.

use rand::seq::SliceRandom;
use rand::Rng;
use regex::Regex;
use std::sync::OnceLock;

use crate::core::grammar::capitalize_first;
use crate::core::research::is_stop_word;
use crate::core::seed::rng_for;
use crate::genre_templates::GenreLibrary;
use crate::schema::research::ResearchBrief;
use crate::schema::world::{Setting, WorldModel};

const MIN_SECONDARY: usize = 2;
const MAX_SECONDARY: usize = 5;

fn decade_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\b(1[0-9]|20)([0-9]0)s\b").expect("valid regex"))
}

fn century_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?i)\b([0-9]{1,2})(st|nd|rd|th)[ -]century\b").expect("valid regex")
    })
}

fn named_era_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?i)\b(victorian|medieval|renaissance|regency|future)\b").expect("valid regex")
    })
}

/// An explicit era mentioned in `text`, normalised ("the 1920s").
pub fn detect_era(text: &str) -> Option<String> {
    if let Some(c) = decade_re().captures(text) {
        return Some(format!("the {}{}s", &c[1], &c[2]));
    }
    if let Some(c) = century_re().captures(text) {
        return Some(format!("the {}{} century", &c[1], c[2].to_lowercase()));
    }
    named_era_re().captures(text).map(|c| {
        match c[1].to_lowercase().as_str() {
            "victorian" => "the Victorian era",
            "medieval" => "the medieval period",
            "renaissance" => "the Renaissance",
            "regency" => "the Regency era",
            _ => "the distant future",
        }
        .to_string()
    })
}

/// Words that introduce a setting: "in Paris", "across Patagonia".
const PLACE_PREPOSITIONS: &[&str] = &[
    "in", "at", "near", "across", "outside", "beneath", "under", "through", "beyond", "around",
];
/// Capitalised words after a preposition that name a time, not a place.
const CALENDAR_WORDS: &[&str] = &[
    "january", "february", "march", "april", "may", "june", "july", "august", "september",
    "october", "november", "december", "monday", "tuesday", "wednesday", "thursday", "friday",
    "saturday", "sunday", "spring", "summer", "autumn", "winter", "christmas", "easter",
];
const MAX_NAME_WORDS: usize = 3;

/// A word stripped of surrounding punctuation and a possessive `'s`.
fn bare(raw: &str) -> &str {
    let word = raw.trim_matches(|c: char| !c.is_alphanumeric());
    word.strip_suffix("'s")
        .or_else(|| word.strip_suffix("\u{2019}s"))
        .unwrap_or(word)
}

fn is_name_word(word: &str) -> bool {
    let mut chars = word.chars();
    chars.next().is_some_and(char::is_uppercase)
        && chars.all(char::is_lowercase)
        && word.chars().count() >= 3
        && !is_stop_word(word)
}

/// The run of capitalised words starting at `words[start]`, e.g. `Buenos Aires`.
fn name_at(words: &[&str], start: usize) -> Option<String> {
    let mut parts = Vec::new();
    for raw in words.iter().skip(start).take(MAX_NAME_WORDS) {
        let word = bare(raw);
        if !is_name_word(word) {
            break;
        }
        parts.push(word);
        if word != *raw {
            break;
        }
    }
    (!parts.is_empty()).then(|| parts.join(" "))
}

/// A place the idea names after a preposition: `Paris` in "a detective in
/// 1920s Paris". Names elsewhere in the idea usually belong to characters.
pub fn detect_place(idea: &str) -> Option<String> {
    let words: Vec<&str> = idea.split_whitespace().collect();
    words.iter().enumerate().find_map(|(i, raw)| {
        if !PLACE_PREPOSITIONS.contains(&raw.to_lowercase().as_str()) {
            return None;
        }
        // Step over an era: "in 1920s Paris".
        let start = match words.get(i + 1) {
            Some(next) if next.chars().any(|c| c.is_ascii_digit()) => i + 2,
            _ => i + 1,
        };
        name_at(&words, start).filter(|name| {
            let first = name.split(' ').next().unwrap_or(name).to_lowercase();
            !CALENDAR_WORDS.contains(&first.as_str())
        })
    })
}

/// First capitalised name that does not open a sentence, e.g. `Captain Ahab`.
pub fn proper_noun(idea: &str) -> Option<String> {
    let words: Vec<&str> = idea.split_whitespace().collect();
    let mut sentence_start = true;
    for (i, raw) in words.iter().enumerate() {
        if !sentence_start {
            if let Some(name) = name_at(&words, i) {
                return Some(name);
            }
        }
        sentence_start = raw.ends_with(['.', '!', '?']);
    }
    None
}

pub struct WorldBuilder<'a> {
    library: &'a GenreLibrary,
}

impl<'a> WorldBuilder<'a> {
    pub fn new(library: &'a GenreLibrary) -> Self {
        Self { library }
    }

    /// Pure function of its inputs and `seed`.
    pub fn build(&self, idea: &str, brief: &ResearchBrief, seed: u64) -> WorldModel {
        let genre = brief.genre;
        let profile = self.library.profile(genre);
        let mut rng = rng_for(seed, &["world", genre.slug(), idea]);

        let era = detect_era(idea)
            .or_else(|| brief.keywords.iter().find_map(|k| detect_era(k)))
            .or_else(|| brief.facts.iter().find_map(|f| detect_era(&f.text)))
            .unwrap_or_else(|| profile.time_period.clone());

        let atmosphere = pick(&profile.atmosphere, &mut rng);
        let power_word = pick(&profile.power_words, &mut rng);
        let theme = pick(&profile.themes, &mut rng);

        let (primary_name, pool): (String, Vec<&String>) = match detect_place(idea) {
            Some(place) => (place, profile.locations.iter().collect()),
            None => {
                let mut pool: Vec<&String> = profile.locations.iter().collect();
                pool.shuffle(&mut rng);
                let primary = pool.remove(0).clone();
                (primary, pool)
            }
        };
        let wanted = rng.gen_range(MIN_SECONDARY..=MAX_SECONDARY).min(pool.len());
        let secondary_locations: Vec<String> = pool
            .choose_multiple(&mut rng, wanted)
            .filter(|l| **l != &primary_name)
            .map(|l| (*l).clone())
            .collect();

        let description = format!(
            "{}. A {} place in {}, where {}.",
            capitalize_first(&atmosphere),
            power_word,
            era,
            theme
        );

        let mut rules = profile.world_rules.clone();
        rules.push(format!(
            "Nothing happens that could not happen in {era}"
        ));

        let central_conflict = pick(&profile.conflict_elements, &mut rng);

        tracing::info!(
            setting = %primary_name,
            era = %era,
            locations = secondary_locations.len(),
            "world built"
        );
        WorldModel {
            title: world_title(idea, genre.label()),
            genre,
            primary: Setting {
                name: primary_name,
                era,
                description,
            },
            secondary_locations,
            rules,
            central_conflict,
            atmosphere,
            themes: profile.themes.clone(),
        }
    }
}

fn pick<R: Rng>(items: &[String], rng: &mut R) -> String {
    items.choose(rng).cloned().unwrap_or_default()
}

fn world_title(idea: &str, genre_label: &str) -> String {
    let words: Vec<String> = idea
        .split(|c: char| !c.is_alphanumeric())
        .filter(|w| w.chars().count() > 3)
        .take(3)
        .map(capitalize_first)
        .collect();
    if words.is_empty() {
        format!("The World of the {genre_label} Novel")
    } else {
        format!("The World of {}", words.join(" "))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::genre::Genre;
    use crate::schema::research::{FactSnippet, SourceMode};
    use crate::schema::state::NarrativeState;

    fn brief(genre: Genre, topic: &str) -> ResearchBrief {
        ResearchBrief {
            topic: topic.to_string(),
            genre,
            facts: vec![FactSnippet::new("Bridges need maintenance.", "offline:general")],
            keywords: vec!["bridges".to_string()],
            source_mode: SourceMode::OfflineFallback,
        }
    }

    const IDEA: &str = "A detective in 1920s Paris who hears murder victims' last thoughts";

    #[test]
    fn era_detection() {
        assert_eq!(detect_era(IDEA).as_deref(), Some("the 1920s"));
        assert_eq!(detect_era("a 17th-century plague port").as_deref(), Some("the 17th century"));
        assert_eq!(detect_era("A Victorian orphanage").as_deref(), Some("the Victorian era"));
        assert_eq!(detect_era("two sisters and a farm"), None);
    }

    #[test]
    fn places_follow_a_preposition() {
        assert_eq!(detect_place(IDEA).as_deref(), Some("Paris"));
        assert_eq!(detect_place("Lighthouses. Storms gather at Finisterre.").as_deref(), Some("Finisterre"));
        assert_eq!(detect_place("A tango singer lost in Buenos Aires").as_deref(), Some("Buenos Aires"));
        assert_eq!(detect_place("A feud in Venice's glass quarter").as_deref(), Some("Venice"));
        assert_eq!(detect_place("A quiet farm"), None);
        assert_eq!(detect_place("A wedding in June"), None);
    }

    #[test]
    fn character_names_are_not_places() {
        assert_eq!(detect_place("An elf called Arwen steals a crown"), None);
        assert_eq!(detect_place("A detective named Marlowe hunts a killer"), None);
        assert_eq!(detect_place("The widow of Captain Ahab sails again"), None);
    }

    #[test]
    fn proper_nouns_skip_sentence_starts() {
        assert_eq!(proper_noun("An elf called Arwen steals a crown").as_deref(), Some("Arwen"));
        assert_eq!(proper_noun("The widow of Captain Ahab sails again").as_deref(), Some("Captain Ahab"));
        assert_eq!(proper_noun(IDEA).as_deref(), Some("Paris"));
        assert_eq!(proper_noun("Storms. Nobody listens."), None);
    }

    #[test]
    fn named_character_does_not_become_the_setting() {
        let lib = GenreLibrary::load().unwrap();
        let idea = "An elf called Arwen steals a crown";
        let world = WorldBuilder::new(&lib).build(idea, &brief(Genre::Fantasy, idea), 7);
        assert_ne!(world.primary.name, "Arwen");
        assert!(lib.profile(Genre::Fantasy).locations.contains(&world.primary.name));
        let state = NarrativeState::seeded(&world, []);
        assert!(state.facts.iter().all(|f| !f.text.contains("Arwen")));
    }

    #[test]
    fn idea_era_and_place_anchor_primary_setting() {
        let lib = GenreLibrary::load().unwrap();
        let world = WorldBuilder::new(&lib).build(IDEA, &brief(Genre::Mystery, IDEA), 7);
        assert_eq!(world.primary.name, "Paris");
        assert_eq!(world.primary.era, "the 1920s");
        assert!(world.rules.iter().any(|r| r.contains("the 1920s")));
        assert_eq!(world.title, "The World of Detective 1920s Paris");
    }

    #[test]
    fn secondary_locations_are_distinct_and_bounded() {
        let lib = GenreLibrary::load().unwrap();
        for seed in 0..20 {
            let idea = "a quiet farm where nothing grows";
            let world = WorldBuilder::new(&lib).build(idea, &brief(Genre::Fantasy, idea), seed);
            let n = world.secondary_locations.len();
            assert!((MIN_SECONDARY..=MAX_SECONDARY).contains(&n), "{n} locations");
            assert!(!world.secondary_locations.contains(&world.primary.name));
            let mut sorted = world.secondary_locations.clone();
            sorted.sort();
            sorted.dedup();
            assert_eq!(sorted.len(), n);
            assert_eq!(world.primary.era, lib.profile(Genre::Fantasy).time_period);
        }
    }

    #[test]
    fn fantasy_world_carries_magic_cost_rule() {
        let lib = GenreLibrary::load().unwrap();
        let idea = "an apprentice who steals a spell";
        let world = WorldBuilder::new(&lib).build(idea, &brief(Genre::Fantasy, idea), 1);
        assert!(world.rules.iter().any(|r| r.contains("Magic")));
    }

    #[test]
    fn same_inputs_same_world() {
        let lib = GenreLibrary::load().unwrap();
        let b = brief(Genre::Horror, IDEA);
        let a = WorldBuilder::new(&lib).build(IDEA, &b, 99);
        let c = WorldBuilder::new(&lib).build(IDEA, &b, 99);
        assert_eq!(a, c);
    }
}
