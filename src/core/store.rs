//! Persistence for finished novels: one versioned directory per
//! (date, title), holding the manuscript and its companion artifacts.

use regex::Regex;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;
use thiserror::Error;

use crate::core::compiler::{render_markdown, render_metadata, render_text};
use crate::schema::novel::Novel;

const MAX_TITLE_CHARS: usize = 80;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("IO error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("metadata serialization failed: {0}")]
    Json(#[from] serde_json::Error),
}

/// Where a novel ended up.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SavedNovel {
    pub dir: PathBuf,
    pub version: u32,
    pub files: Vec<PathBuf>,
}

pub trait NovelStore {
    fn save(&self, novel: &Novel) -> Result<SavedNovel, StoreError>;
}

/// Writes `<root>/<YYYY-MM-DD>/<Safe_Title>/vN/`.
#[derive(Debug, Clone)]
pub struct FsNovelStore {
    root: PathBuf,
}

impl FsNovelStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }
}

fn io_err(path: &Path) -> impl FnOnce(std::io::Error) -> StoreError + '_ {
    move |source| StoreError::Io {
        path: path.to_path_buf(),
        source,
    }
}

impl NovelStore for FsNovelStore {
    fn save(&self, novel: &Novel) -> Result<SavedNovel, StoreError> {
        let safe = sanitize_title(novel.title());
        let date = novel.metadata.generated_at.format("%Y-%m-%d").to_string();
        let title_dir = self.root.join(date).join(&safe);
        fs::create_dir_all(&title_dir).map_err(io_err(&title_dir))?;

        let version = next_version(&title_dir)?;
        let dir = title_dir.join(format!("v{version}"));
        fs::create_dir(&dir).map_err(io_err(&dir))?;

        let artifacts = [
            (format!("{safe}_v{version}.txt"), render_text(novel)),
            (format!("{safe}_v{version}.md"), render_markdown(novel)),
            ("research_notes.txt".to_string(), novel.brief.render()),
            ("characters.txt".to_string(), novel.cast.render()),
            ("world.txt".to_string(), novel.world.render()),
            ("plot_outline.txt".to_string(), novel.outline.render()),
            ("metadata.json".to_string(), render_metadata(novel)?),
        ];
        let mut files = Vec::with_capacity(artifacts.len());
        for (name, contents) in artifacts {
            let path = dir.join(name);
            fs::write(&path, contents).map_err(io_err(&path))?;
            files.push(path);
        }
        tracing::info!(dir = %dir.display(), version, files = files.len(), "novel saved");
        Ok(SavedNovel {
            dir,
            version,
            files,
        })
    }
}

/// One past the highest existing `vN` directory.
fn next_version(title_dir: &Path) -> Result<u32, StoreError> {
    let entries = fs::read_dir(title_dir).map_err(io_err(title_dir))?;
    let mut highest = 0;
    for entry in entries {
        let entry = entry.map_err(io_err(title_dir))?;
        let name = entry.file_name();
        let parsed = name
            .to_str()
            .and_then(|n| n.strip_prefix('v'))
            .and_then(|n| n.parse::<u32>().ok());
        if let Some(v) = parsed {
            highest = highest.max(v);
        }
    }
    Ok(highest + 1)
}

fn unsafe_chars_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"[^\w\-]").expect("valid regex"))
}

fn underscores_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"_+").expect("valid regex"))
}

/// Filesystem-safe form of a title: "The Paris Affair!" becomes "The_Paris_Affair".
pub fn sanitize_title(title: &str) -> String {
    let spaced = title.split_whitespace().collect::<Vec<_>>().join("_");
    let kept = unsafe_chars_re().replace_all(&spaced, "");
    let collapsed = underscores_re().replace_all(&kept, "_");
    let trimmed: String = collapsed
        .trim_matches('_')
        .chars()
        .take(MAX_TITLE_CHARS)
        .collect();
    if trimmed.is_empty() {
        "Untitled".to_string()
    } else {
        trimmed
    }
}
