//! The novel pipeline: idea → research → world → cast → outline →
//! chapters → compiled novel.
//!
//! Each run owns its brief, world, cast, outline and narrative state, so one
//! `NovelPipeline` can serve concurrent runs from several threads.

use chrono::Utc;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use thiserror::Error;

use crate::config::{ConfigError, Settings};
use crate::core::backend::{BackendChain, LocalSynthesizer, OllamaBackend, ProseBackend, RetryPolicy};
use crate::core::cast::CastBuilder;
use crate::core::compiler::{NovelCompiler, NovelParts};
use crate::core::drafter::ChapterDrafter;
use crate::core::outline::{OutlineError, PlotOutliner, MAX_CHAPTERS, MIN_CHAPTERS};
use crate::core::research::{OfflineProvider, ResearchBriefBuilder, ResearchProvider, WikipediaProvider};
use crate::core::world::WorldBuilder;
use crate::genre_templates::{GenreLibrary, TemplateError};
use crate::schema::genre::Genre;
use crate::schema::novel::{BackendKind, Novel};
use crate::schema::state::{NarrativeState, StateError};

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("invalid request: {0}")]
    InvalidRequest(String),
    #[error("configuration: {0}")]
    Config(#[from] ConfigError),
    #[error("genre data: {0}")]
    Templates(#[from] TemplateError),
    #[error("outline: {0}")]
    Outline(#[from] OutlineError),
    #[error("narrative state: {0}")]
    State(#[from] StateError),
}

/// What to write.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NovelRequest {
    pub idea: String,
    pub genre: Genre,
    pub chapters: u32,
    /// Derived from the idea and genre when absent.
    pub title: Option<String>,
}

impl NovelRequest {
    pub fn new(idea: impl Into<String>, genre: Genre, chapters: u32) -> Self {
        Self {
            idea: idea.into(),
            genre,
            chapters,
            title: None,
        }
    }

    fn validate(&self) -> Result<(), PipelineError> {
        if self.idea.trim().is_empty() {
            return Err(PipelineError::InvalidRequest("idea is empty".to_string()));
        }
        if !(MIN_CHAPTERS..=MAX_CHAPTERS).contains(&self.chapters) {
            return Err(PipelineError::InvalidRequest(format!(
                "chapters must be within {MIN_CHAPTERS}..={MAX_CHAPTERS}, got {}",
                self.chapters
            )));
        }
        Ok(())
    }
}

/// Cooperative cancellation, checked before every chapter.
#[derive(Debug, Clone, Default)]
pub struct CancellationToken(Arc<AtomicBool>);

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PartialReason {
    Cancelled,
    /// Every backend failed for a chapter; drafting stopped there.
    BackendFailure(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunStatus {
    Complete,
    Partial(PartialReason),
}

impl RunStatus {
    pub fn is_complete(&self) -> bool {
        *self == Self::Complete
    }
}

#[derive(Debug, Clone)]
pub struct GenerationReport {
    pub novel: Novel,
    pub status: RunStatus,
    pub warnings: Vec<String>,
    /// Narrative state after the last completed chapter.
    pub state: NarrativeState,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Research,
    World,
    Cast,
    Outline,
    Drafting,
    Compile,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Research => "research",
            Self::World => "world",
            Self::Cast => "cast",
            Self::Outline => "outline",
            Self::Drafting => "drafting",
            Self::Compile => "compile",
        })
    }
}

/// Progress notifications for front ends.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PipelineEvent {
    StageStarted(Stage),
    BackendSelected { llm: bool },
    ChapterStarted { number: u32, total: u32, title: String },
    ChapterCompleted { number: u32, words: usize, backend: BackendKind },
    Warning(String),
    Finished { chapters: u32, words: usize, complete: bool },
}

pub type Observer = Arc<dyn Fn(&PipelineEvent) + Send + Sync>;

pub struct NovelPipeline {
    library: Arc<GenreLibrary>,
    research: Arc<dyn ResearchProvider>,
    llm: Option<Arc<dyn ProseBackend>>,
    seed: u64,
    target_words: usize,
    retry: RetryPolicy,
    observer: Option<Observer>,
}

/// Builder for [`NovelPipeline`]. Anything not set comes from [`Settings`].
#[derive(Default)]
pub struct NovelPipelineBuilder {
    settings: Option<Settings>,
    library: Option<Arc<GenreLibrary>>,
    research: Option<Arc<dyn ResearchProvider>>,
    llm: Option<Option<Arc<dyn ProseBackend>>>,
    seed: Option<u64>,
    target_words: Option<usize>,
    retry: Option<RetryPolicy>,
    observer: Option<Observer>,
}

impl NovelPipelineBuilder {
    pub fn settings(mut self, settings: Settings) -> Self {
        self.settings = Some(settings);
        self
    }

    pub fn library(mut self, library: Arc<GenreLibrary>) -> Self {
        self.library = Some(library);
        self
    }

    pub fn research_provider(mut self, provider: Arc<dyn ResearchProvider>) -> Self {
        self.research = Some(provider);
        self
    }

    pub fn llm_backend(mut self, backend: Arc<dyn ProseBackend>) -> Self {
        self.llm = Some(Some(backend));
        self
    }

    /// Draft every chapter with the local synthesizer.
    pub fn without_llm(mut self) -> Self {
        self.llm = Some(None);
        self
    }

    pub fn seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }

    pub fn target_words(mut self, words: usize) -> Self {
        self.target_words = Some(words);
        self
    }

    pub fn retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.retry = Some(policy);
        self
    }

    pub fn observer(mut self, observer: impl Fn(&PipelineEvent) + Send + Sync + 'static) -> Self {
        self.observer = Some(Arc::new(observer));
        self
    }

    pub fn build(self) -> Result<NovelPipeline, PipelineError> {
        let settings = self.settings.unwrap_or_default();
        settings.validate()?;

        let library = match self.library {
            Some(lib) => lib,
            None => Arc::new(GenreLibrary::load()?),
        };

        let research: Arc<dyn ResearchProvider> = match self.research {
            Some(provider) => provider,
            None if settings.research.enabled => match WikipediaProvider::new(settings.wikipedia()) {
                Ok(provider) => Arc::new(provider),
                Err(e) => {
                    tracing::warn!(error = %e, "research provider unavailable, running offline");
                    Arc::new(OfflineProvider)
                }
            },
            None => Arc::new(OfflineProvider),
        };

        let llm = if settings.prefers_llm() {
            match self.llm {
                Some(explicit) => explicit,
                None => match OllamaBackend::new(settings.ollama()) {
                    Ok(backend) => Some(Arc::new(backend) as Arc<dyn ProseBackend>),
                    Err(e) => {
                        tracing::warn!(error = %e, "LLM client could not be built");
                        None
                    }
                },
            }
        } else {
            None
        };

        let seed = self
            .seed
            .or(settings.generation.seed)
            .unwrap_or_else(rand::random);
        let target_words = self.target_words.unwrap_or(settings.generation.target_words);
        if target_words == 0 {
            return Err(PipelineError::InvalidRequest("target words must be positive".to_string()));
        }

        tracing::info!(seed, target_words, llm = llm.is_some(), "pipeline ready");
        Ok(NovelPipeline {
            library,
            research,
            llm,
            seed,
            target_words,
            retry: self.retry.unwrap_or_else(|| settings.retry_policy()),
            observer: self.observer,
        })
    }
}

impl NovelPipeline {
    pub fn builder() -> NovelPipelineBuilder {
        NovelPipelineBuilder::default()
    }

    pub fn seed(&self) -> u64 {
        self.seed
    }

    pub fn library(&self) -> &GenreLibrary {
        &self.library
    }

    fn emit(&self, event: PipelineEvent) {
        if let Some(observer) = &self.observer {
            observer(&event);
        }
    }

    fn warn(&self, warnings: &mut Vec<String>, message: String) {
        self.emit(PipelineEvent::Warning(message.clone()));
        warnings.push(message);
    }

    /// Run every stage for `request`. A cancelled or backend-starved run
    /// still returns its completed prefix as a partial novel.
    pub fn generate(
        &self,
        request: &NovelRequest,
        cancel: &CancellationToken,
    ) -> Result<GenerationReport, PipelineError> {
        request.validate()?;
        let span = tracing::info_span!("generate", genre = %request.genre, chapters = request.chapters);
        let _enter = span.enter();

        let library = self.library.as_ref();
        let genre = request.genre;
        let idea = request.idea.trim();
        let mut warnings = Vec::new();

        self.emit(PipelineEvent::StageStarted(Stage::Research));
        let brief = ResearchBriefBuilder::new(self.research.as_ref(), library).build(idea, genre);

        self.emit(PipelineEvent::StageStarted(Stage::World));
        let world = WorldBuilder::new(library).build(idea, &brief, self.seed);

        self.emit(PipelineEvent::StageStarted(Stage::Cast));
        let cast = CastBuilder::new(library).build(&world, request.chapters, self.seed);

        self.emit(PipelineEvent::StageStarted(Stage::Outline));
        let outline = PlotOutliner::new(&world, &cast).build(request.chapters, self.seed)?;

        self.emit(PipelineEvent::StageStarted(Stage::Drafting));
        let local = LocalSynthesizer::new(library.grammar().clone(), &brief, self.seed);
        let mut chain = BackendChain::new(self.llm.clone(), local, self.retry);
        if let Some(w) = chain.probe() {
            self.warn(&mut warnings, w);
        }
        self.emit(PipelineEvent::BackendSelected { llm: chain.has_llm() });

        let mut state = NarrativeState::seeded(&world, cast.characters.iter().map(|c| c.id));
        let drafter = ChapterDrafter {
            profile: library.profile(genre),
            brief: &brief,
            world: &world,
            cast: &cast,
            outline: &outline,
            target_words: self.target_words,
        };
        let total = outline.len() as u32;
        let mut chapters = Vec::with_capacity(outline.len());
        let mut status = RunStatus::Complete;

        for beat in &outline.beats {
            if cancel.is_cancelled() {
                tracing::info!(completed = chapters.len(), total, "generation cancelled");
                status = RunStatus::Partial(PartialReason::Cancelled);
                break;
            }
            self.emit(PipelineEvent::ChapterStarted {
                number: beat.number,
                total,
                title: beat.title.clone(),
            });
            match drafter.draft_next(&mut chain, &state) {
                Ok(drafted) => {
                    for w in drafted.warnings {
                        self.warn(&mut warnings, w);
                    }
                    state.apply(drafted.update)?;
                    self.emit(PipelineEvent::ChapterCompleted {
                        number: drafted.chapter.number,
                        words: drafted.chapter.word_count,
                        backend: drafted.chapter.backend,
                    });
                    chapters.push(drafted.chapter);
                }
                Err(e) => {
                    tracing::error!(error = %e, "drafting stopped");
                    self.warn(&mut warnings, e.to_string());
                    status = RunStatus::Partial(PartialReason::BackendFailure(e.to_string()));
                    break;
                }
            }
        }

        self.emit(PipelineEvent::StageStarted(Stage::Compile));
        let parts = NovelParts {
            idea: idea.to_string(),
            genre,
            brief,
            world,
            cast,
            outline,
            chapters,
        };
        let novel = NovelCompiler::new(library.profile(genre)).compile(parts, request.title.as_deref(), Utc::now());
        self.emit(PipelineEvent::Finished {
            chapters: novel.metadata.completed_chapters,
            words: novel.metadata.total_words,
            complete: status.is_complete(),
        });

        Ok(GenerationReport {
            novel,
            status,
            warnings,
            state,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    fn pipeline() -> NovelPipelineBuilder {
        NovelPipeline::builder()
            .research_provider(Arc::new(OfflineProvider))
            .without_llm()
            .seed(11)
            .target_words(300)
    }

    #[test]
    fn rejects_bad_requests() {
        let p = pipeline().build().unwrap();
        let cancel = CancellationToken::new();
        let empty = NovelRequest::new("   ", Genre::Horror, 3);
        assert!(matches!(p.generate(&empty, &cancel), Err(PipelineError::InvalidRequest(_))));
        let too_long = NovelRequest::new("a ghost story", Genre::Horror, 51);
        assert!(matches!(p.generate(&too_long, &cancel), Err(PipelineError::InvalidRequest(_))));
    }

    #[test]
    fn events_arrive_in_stage_order() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let p = pipeline()
            .observer(move |e| sink.lock().unwrap().push(e.clone()))
            .build()
            .unwrap();
        let report = p
            .generate(&NovelRequest::new("a haunted lighthouse", Genre::Horror, 2), &CancellationToken::new())
            .unwrap();
        assert!(report.status.is_complete());

        let events = seen.lock().unwrap();
        assert_eq!(events[0], PipelineEvent::StageStarted(Stage::Research));
        assert!(events.contains(&PipelineEvent::BackendSelected { llm: false }));
        let completed = events
            .iter()
            .filter(|e| matches!(e, PipelineEvent::ChapterCompleted { backend: BackendKind::Local, .. }))
            .count();
        assert_eq!(completed, 2);
        assert!(matches!(events.last(), Some(PipelineEvent::Finished { chapters: 2, complete: true, .. })));
    }

    #[test]
    fn cancelled_before_start_yields_empty_partial() {
        let p = pipeline().build().unwrap();
        let cancel = CancellationToken::new();
        cancel.cancel();
        let report = p
            .generate(&NovelRequest::new("a heist on a moon", Genre::SciFi, 4), &cancel)
            .unwrap();
        assert_eq!(report.status, RunStatus::Partial(PartialReason::Cancelled));
        assert!(report.novel.chapters.is_empty());
        assert_eq!(report.novel.metadata.requested_chapters, 4);
        assert_eq!(report.state.version, 0);
    }

    #[test]
    fn local_preference_skips_llm() {
        let mut settings = Settings::default();
        settings.backend.preference = vec!["local".to_string()];
        let p = NovelPipeline::builder()
            .settings(settings)
            .research_provider(Arc::new(OfflineProvider))
            .seed(1)
            .build()
            .unwrap();
        assert!(p.llm.is_none());
    }
}
