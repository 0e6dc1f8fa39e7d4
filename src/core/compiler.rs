//! Assembles the finished parts of a run into a [`Novel`] and renders it.
//!
//! Compilation is pure aggregation: the timestamp is handed in, and nothing
//! here generates prose beyond the fixed front and back matter.

use chrono::{DateTime, Utc};

use crate::core::grammar::capitalize_first;
use crate::core::research::extract_keywords;
use crate::core::seed::stable_seed;
use crate::core::world::proper_noun;
use crate::genre_templates::GenreProfile;
use crate::schema::character::Cast;
use crate::schema::genre::Genre;
use crate::schema::novel::{Chapter, ChapterRecord, Novel, NovelMetadata};
use crate::schema::outline::PlotOutline;
use crate::schema::research::ResearchBrief;
use crate::schema::world::WorldModel;

const RULE_WIDTH: usize = 60;
const SUB_RULE_WIDTH: usize = 40;

/// Every stage output a novel is compiled from.
#[derive(Debug, Clone)]
pub struct NovelParts {
    pub idea: String,
    pub genre: Genre,
    pub brief: ResearchBrief,
    pub world: WorldModel,
    pub cast: Cast,
    pub outline: PlotOutline,
    pub chapters: Vec<Chapter>,
}

pub struct NovelCompiler<'a> {
    profile: &'a GenreProfile,
}

impl<'a> NovelCompiler<'a> {
    pub fn new(profile: &'a GenreProfile) -> Self {
        Self { profile }
    }

    pub fn compile(&self, mut parts: NovelParts, title: Option<&str>, generated_at: DateTime<Utc>) -> Novel {
        parts.chapters.sort_by_key(|c| c.number);
        let title = match title.map(str::trim).filter(|t| !t.is_empty()) {
            Some(t) => t.to_string(),
            None => derive_title(&parts.idea, parts.genre, self.profile),
        };
        let chapters: Vec<ChapterRecord> = parts
            .chapters
            .iter()
            .map(|c| ChapterRecord {
                number: c.number,
                title: c.title.clone(),
                word_count: c.word_count,
                backend: c.backend,
            })
            .collect();
        let metadata = NovelMetadata {
            title,
            genre: parts.genre.label().to_string(),
            total_words: parts.chapters.iter().map(|c| c.word_count).sum(),
            requested_chapters: parts.outline.len() as u32,
            completed_chapters: parts.chapters.len() as u32,
            research_source: parts.brief.source_mode,
            generated_at,
            chapters,
        };
        tracing::info!(
            title = %metadata.title,
            words = metadata.total_words,
            chapters = metadata.completed_chapters,
            complete = metadata.is_complete(),
            "novel compiled"
        );
        Novel {
            idea: parts.idea,
            genre: parts.genre,
            brief: parts.brief,
            world: parts.world,
            cast: parts.cast,
            outline: parts.outline,
            chapters: parts.chapters,
            metadata,
        }
    }
}

/// Title from one of the genre's patterns and the most salient idea term.
pub fn derive_title(idea: &str, genre: Genre, profile: &GenreProfile) -> String {
    let term = proper_noun(idea)
        .or_else(|| extract_keywords(idea, None).into_iter().next().map(|k| capitalize_first(&k)))
        .unwrap_or_else(|| genre.label().to_string());
    let patterns = &profile.title_patterns;
    if patterns.is_empty() {
        return term;
    }
    let pick = stable_seed(0, &["title", idea]) as usize % patterns.len();
    patterns[pick].replacen("{}", &term, 1)
}

fn chapter_heading(c: &Chapter) -> String {
    format!("Chapter {}: {}", c.number, c.title)
}

fn epilogue(novel: &Novel) -> String {
    let name = novel
        .cast
        .protagonist()
        .map(|c| c.name.as_str())
        .unwrap_or("the protagonist");
    let first = novel.world.themes.first().map(String::as_str).unwrap_or("what was lost");
    let second = novel.world.themes.get(1).map(String::as_str).unwrap_or("what it costs");
    format!(
        "Every story ends in the middle of other stories. What happened to {name} did not \
         resolve neatly into silence; it folded into the larger continuity of a life. The \
         questions of {first} and {second} did not disappear. They changed form. They became \
         liveable.\n\n- End -"
    )
}

/// Plain-text manuscript: title page, contents, chapters, epilogue.
pub fn render_text(novel: &Novel) -> String {
    let meta = &novel.metadata;
    let rule = "=".repeat(RULE_WIDTH);
    let sub = "-".repeat(SUB_RULE_WIDTH);
    let mut parts = vec![
        rule.clone(),
        meta.title.to_uppercase(),
        format!("A {} novel", meta.genre),
        format!(
            "{} words | generated {} | research: {}",
            meta.total_words,
            meta.generated_at.format("%Y-%m-%d %H:%M UTC"),
            meta.research_source.label()
        ),
        rule.clone(),
    ];

    let mut toc = vec!["TABLE OF CONTENTS".to_string(), sub.clone()];
    toc.extend(novel.chapters.iter().map(|c| format!("  {}", chapter_heading(c))));
    if meta.is_complete() {
        toc.push("  Epilogue".to_string());
    }
    parts.push(toc.join("\n"));
    parts.push(rule.clone());

    for c in &novel.chapters {
        parts.push(format!("{}\n{}\n\n{}", chapter_heading(c), sub, c.body));
    }

    parts.push(rule.clone());
    if meta.is_complete() {
        parts.push(format!("EPILOGUE\n{sub}\n\n{}", epilogue(novel)));
    } else {
        parts.push(format!(
            "[Incomplete: {} of {} chapters were written.]",
            meta.completed_chapters, meta.requested_chapters
        ));
    }
    parts.push(rule);
    parts.join("\n\n")
}

/// Markdown variant of the manuscript.
pub fn render_markdown(novel: &Novel) -> String {
    let meta = &novel.metadata;
    let mut out = vec![
        format!("# {}", meta.title),
        format!("*A {} novel*", meta.genre),
        "## Table of Contents".to_string(),
    ];
    let mut toc: Vec<String> = novel
        .chapters
        .iter()
        .map(|c| format!("{}. {}", c.number, c.title))
        .collect();
    if meta.is_complete() {
        toc.push(format!("{}. Epilogue", novel.chapters.len() + 1));
    }
    out.push(toc.join("\n"));
    for c in &novel.chapters {
        out.push(format!("## {}", chapter_heading(c)));
        out.push(c.body.clone());
    }
    if meta.is_complete() {
        out.push("## Epilogue".to_string());
        out.push(epilogue(novel));
    }
    out.push(format!(
        "---\n*{} words. Research source: {}.*",
        meta.total_words,
        meta.research_source.label()
    ));
    out.join("\n\n")
}

pub fn render_metadata(novel: &Novel) -> Result<String, serde_json::Error> {
    serde_json::to_string_pretty(&novel.metadata)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::genre_templates::GenreLibrary;
    use crate::schema::character::{Character, CharacterId, Pronouns, Role};
    use crate::schema::novel::BackendKind;
    use crate::schema::research::{FactSnippet, SourceMode};
    use crate::schema::world::Setting;
    use chrono::TimeZone;

    fn parts(chapters: u32, written: u32) -> NovelParts {
        let beats = (1..=chapters)
            .map(|n| crate::schema::outline::ChapterBeat {
                number: n,
                title: format!("Beat {n}"),
                kind: crate::schema::outline::BeatKind::RisingAction,
                act: 2,
                pov: CharacterId(1),
                goal: "g".to_string(),
                conflict: "c".to_string(),
                turning_point: "t".to_string(),
                ending: crate::schema::outline::EndingState::Transitional,
                tension: 5,
                location: "here".to_string(),
                key_character: None,
                summary: String::new(),
                thread: crate::schema::outline::ThreadId::primary(),
                resolves: Vec::new(),
            })
            .collect();
        NovelParts {
            idea: "A detective in 1920s Paris who hears murder victims' last thoughts".to_string(),
            genre: Genre::Mystery,
            brief: ResearchBrief {
                topic: "t".to_string(),
                genre: Genre::Mystery,
                facts: vec![FactSnippet::new("Paris has bridges.", "offline:mystery")],
                keywords: Vec::new(),
                source_mode: SourceMode::OfflineFallback,
            },
            world: WorldModel {
                title: "w".to_string(),
                genre: Genre::Mystery,
                primary: Setting {
                    name: "Paris".to_string(),
                    era: "the 1920s".to_string(),
                    description: String::new(),
                },
                secondary_locations: Vec::new(),
                rules: Vec::new(),
                central_conflict: "murder".to_string(),
                atmosphere: String::new(),
                themes: vec!["guilt".to_string()],
            },
            cast: Cast {
                characters: vec![Character {
                    id: CharacterId(1),
                    name: "Ada Vane".to_string(),
                    pronouns: Pronouns::SheHer,
                    role: Role::Protagonist,
                    traits: Vec::new(),
                    flaw: String::new(),
                    motivation: String::new(),
                    backstory: String::new(),
                    internal_conflict: String::new(),
                    arc: String::new(),
                    relationships: Vec::new(),
                }],
            },
            outline: PlotOutline {
                beats,
                act_boundaries: (1, 2),
            },
            chapters: (1..=written)
                .rev()
                .map(|n| Chapter::new(n, format!("Beat {n}"), "one two three".to_string(), BackendKind::Local))
                .collect(),
        }
    }

    fn at() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap()
    }

    #[test]
    fn compile_orders_chapters_and_sums_words() {
        let lib = GenreLibrary::load().unwrap();
        let novel = NovelCompiler::new(lib.profile(Genre::Mystery)).compile(parts(3, 3), None, at());
        let numbers: Vec<u32> = novel.chapters.iter().map(|c| c.number).collect();
        assert_eq!(numbers, vec![1, 2, 3]);
        assert_eq!(novel.metadata.total_words, 9);
        assert!(novel.metadata.is_complete());
        assert!(novel.title().contains("Paris"), "{}", novel.title());
    }

    #[test]
    fn explicit_title_wins() {
        let lib = GenreLibrary::load().unwrap();
        let novel = NovelCompiler::new(lib.profile(Genre::Mystery)).compile(parts(2, 2), Some("  Glass Voices "), at());
        assert_eq!(novel.title(), "Glass Voices");
    }

    #[test]
    fn partial_novel_has_no_epilogue() {
        let lib = GenreLibrary::load().unwrap();
        let novel = NovelCompiler::new(lib.profile(Genre::Mystery)).compile(parts(10, 3), None, at());
        assert_eq!(novel.metadata.requested_chapters, 10);
        assert_eq!(novel.metadata.completed_chapters, 3);
        let text = render_text(&novel);
        assert!(!text.contains("EPILOGUE"));
        assert!(text.contains("3 of 10 chapters"));
        assert!(!render_markdown(&novel).contains("## Epilogue"));
    }

    #[test]
    fn renders_contain_every_chapter_heading() {
        let lib = GenreLibrary::load().unwrap();
        let novel = NovelCompiler::new(lib.profile(Genre::Mystery)).compile(parts(3, 3), None, at());
        let text = render_text(&novel);
        let md = render_markdown(&novel);
        for n in 1..=3 {
            assert!(text.contains(&format!("Chapter {n}: Beat {n}")));
            assert!(md.contains(&format!("## Chapter {n}: Beat {n}")));
        }
        assert!(text.contains("EPILOGUE"));
        assert!(text.contains("Ada Vane"));
        assert!(text.contains("2024-05-01 12:00 UTC"));
        let json: serde_json::Value = serde_json::from_str(&render_metadata(&novel).unwrap()).unwrap();
        assert_eq!(json["completed_chapters"], 3);
        assert_eq!(json["research_source"], "offline-fallback");
    }

    #[test]
    fn titles_are_stable_and_fall_back_to_keywords() {
        let lib = GenreLibrary::load().unwrap();
        let p = lib.profile(Genre::Fantasy);
        let a = derive_title("a lighthouse keeper who collects storms", Genre::Fantasy, p);
        assert_eq!(a, derive_title("a lighthouse keeper who collects storms", Genre::Fantasy, p));
        assert!(a.contains("Lighthouse"), "{a}");
    }
}
