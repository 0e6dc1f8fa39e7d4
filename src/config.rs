//! Layered settings.
//!
//! Precedence, highest first:
//! 1. Environment variables (`NOVEL_` prefix, `__` between levels)
//! 2. `novel.toml` / `novel.local.toml` in the working directory, or an explicit file
//! 3. Built-in defaults
//!
//! # Environment examples
//! - `NOVEL_GENERATION__TARGET_WORDS=2000`
//! - `NOVEL_BACKEND__LLM_HOST=http://gpu-box:11434`
//! - `NOVEL_BACKEND__PREFERENCE=local`
//! - `NOVEL_RESEARCH__ENABLED=false`

use config::{Config, Environment, File};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

use crate::core::backend::{OllamaConfig, RetryPolicy};
use crate::core::outline::{MAX_CHAPTERS, MIN_CHAPTERS};
use crate::core::research::{WikipediaConfig, WIKIPEDIA_API};
use crate::schema::novel::BackendKind;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to load configuration: {0}")]
    Load(#[from] config::ConfigError),
    #[error("configuration validation failed: {0}")]
    Invalid(String),
}

const CONFIG_FILE_NAMES: &[&str] = &["novel", "novel.local"];

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub generation: GenerationSettings,
    pub research: ResearchSettings,
    pub backend: BackendSettings,
    pub output: OutputSettings,
    pub log: LogSettings,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GenerationSettings {
    pub chapters: u32,
    pub target_words: usize,
    /// Fixed seed for reproducible runs; random when absent.
    pub seed: Option<u64>,
}

impl Default for GenerationSettings {
    fn default() -> Self {
        Self {
            chapters: 10,
            target_words: 3500,
            seed: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ResearchSettings {
    pub enabled: bool,
    pub endpoint: String,
    pub timeout_secs: u64,
    pub max_articles: usize,
}

impl Default for ResearchSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            endpoint: WIKIPEDIA_API.to_string(),
            timeout_secs: 12,
            max_articles: 3,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BackendSettings {
    /// Backend kinds in the order they are tried: `llm`, `local`.
    pub preference: Vec<String>,
    pub llm_host: String,
    pub model: Option<String>,
    pub probe_timeout_secs: u64,
    pub generate_timeout_secs: u64,
    pub max_retries: u32,
    pub backoff_ms: u64,
}

impl Default for BackendSettings {
    fn default() -> Self {
        Self {
            preference: vec!["llm".to_string(), "local".to_string()],
            llm_host: crate::core::backend::llm::DEFAULT_HOST.to_string(),
            model: None,
            probe_timeout_secs: 3,
            generate_timeout_secs: 900,
            max_retries: 2,
            backoff_ms: 500,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OutputSettings {
    pub novels_dir: PathBuf,
}

impl Default for OutputSettings {
    fn default() -> Self {
        Self {
            novels_dir: PathBuf::from("novels"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LogSettings {
    pub level: String,
}

impl Default for LogSettings {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

impl Settings {
    /// Load from the default file names and the environment.
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from(None)
    }

    /// Load with an explicit (required) config file instead of the default names.
    pub fn load_from(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut builder = Config::builder();
        match path {
            Some(path) => builder = builder.add_source(File::from(path).required(true)),
            None => {
                for name in CONFIG_FILE_NAMES {
                    builder = builder.add_source(File::with_name(name).required(false));
                }
            }
        }
        builder = builder.add_source(
            Environment::with_prefix("NOVEL")
                .prefix_separator("_")
                .separator("__")
                .list_separator(",")
                .with_list_parse_key("backend.preference")
                .try_parsing(true),
        );
        let settings: Settings = builder.build()?.try_deserialize()?;
        settings.validate()?;
        tracing::debug!(?settings, "settings loaded");
        Ok(settings)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let g = &self.generation;
        if !(MIN_CHAPTERS..=MAX_CHAPTERS).contains(&g.chapters) {
            return Err(ConfigError::Invalid(format!(
                "generation.chapters must be within {MIN_CHAPTERS}..={MAX_CHAPTERS}, got {}",
                g.chapters
            )));
        }
        if g.target_words == 0 {
            return Err(ConfigError::Invalid("generation.target_words must be positive".to_string()));
        }
        if self.research.enabled && self.research.endpoint.trim().is_empty() {
            return Err(ConfigError::Invalid("research.endpoint cannot be empty".to_string()));
        }
        self.backend_preference()?;
        if self.backend.llm_host.trim().is_empty() {
            return Err(ConfigError::Invalid("backend.llm_host cannot be empty".to_string()));
        }
        if self.output.novels_dir.as_os_str().is_empty() {
            return Err(ConfigError::Invalid("output.novels_dir cannot be empty".to_string()));
        }
        Ok(())
    }

    /// The configured preference order, de-duplicated.
    pub fn backend_preference(&self) -> Result<Vec<BackendKind>, ConfigError> {
        let mut out = Vec::new();
        for raw in &self.backend.preference {
            let kind = match raw.trim().to_lowercase().as_str() {
                "llm" | "ollama" => BackendKind::Llm,
                "local" | "synth" => BackendKind::Local,
                other => {
                    return Err(ConfigError::Invalid(format!("unknown backend '{other}'")));
                }
            };
            if !out.contains(&kind) {
                out.push(kind);
            }
        }
        if out.is_empty() {
            return Err(ConfigError::Invalid("backend.preference cannot be empty".to_string()));
        }
        Ok(out)
    }

    /// True when an LLM should be tried before the local synthesizer.
    pub fn prefers_llm(&self) -> bool {
        self.backend_preference()
            .map(|p| p.first() == Some(&BackendKind::Llm))
            .unwrap_or(false)
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_retries: self.backend.max_retries,
            backoff_base: Duration::from_millis(self.backend.backoff_ms),
        }
    }

    pub fn ollama(&self) -> OllamaConfig {
        OllamaConfig {
            host: self.backend.llm_host.clone(),
            model: self.backend.model.clone(),
            probe_timeout: Duration::from_secs(self.backend.probe_timeout_secs),
            generate_timeout: Duration::from_secs(self.backend.generate_timeout_secs),
            ..OllamaConfig::default()
        }
    }

    pub fn wikipedia(&self) -> WikipediaConfig {
        WikipediaConfig {
            endpoint: self.research.endpoint.clone(),
            timeout_secs: self.research.timeout_secs,
            max_articles: self.research.max_articles,
        }
    }
}
