//! Novel Engine: turns a short prose idea into a multi-chapter novel.
//!
//! A run moves through fixed stages (research, world, cast, outline,
//! chapter drafting, compilation). Chapters are drafted by a local LLM when
//! one is reachable and by a grammar-driven synthesizer otherwise, with a
//! running narrative state carried between chapters so later chapters stay
//! consistent with earlier ones.

pub mod config;
pub mod core;
pub mod genre_templates;
pub mod schema;

pub use crate::core::pipeline::{
    CancellationToken, GenerationReport, NovelPipeline, NovelRequest, PartialReason, PipelineError,
    PipelineEvent, RunStatus,
};
pub use crate::core::store::{FsNovelStore, NovelStore};
pub use crate::schema::genre::Genre;
pub use crate::schema::novel::Novel;
