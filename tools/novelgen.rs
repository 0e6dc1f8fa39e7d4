//! novelgen: generate a novel from a one-line idea.
//!
//! Usage: novelgen "A detective in 1920s Paris..." --genre mystery --chapters 12
use anyhow::Context;
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;

use novel_engine::config::Settings;
use novel_engine::core::research::OfflineProvider;
use novel_engine::{
    CancellationToken, FsNovelStore, Genre, NovelPipeline, NovelRequest, NovelStore, PipelineEvent,
    RunStatus,
};

#[derive(Debug, Parser)]
#[command(name = "novelgen", version, about = "Turn a short idea into a multi-chapter novel")]
struct Args {
    /// The story idea, in a sentence or two.
    idea: String,

    #[arg(short, long, default_value = "general")]
    genre: Genre,

    /// Number of chapters (1-50). Defaults to the configured value.
    #[arg(short, long)]
    chapters: Option<u32>,

    #[arg(short, long)]
    title: Option<String>,

    /// Config file; `novel.toml` in the working directory is used otherwise.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Skip Wikipedia and use the built-in genre facts.
    #[arg(long)]
    offline: bool,

    /// Draft every chapter with the local synthesizer.
    #[arg(long)]
    local_only: bool,

    #[arg(long)]
    seed: Option<u64>,

    /// Target words per chapter.
    #[arg(long)]
    words: Option<usize>,

    /// Output root; overrides `output.novels_dir`.
    #[arg(short, long)]
    out: Option<PathBuf>,

    /// Print the manuscript instead of saving it.
    #[arg(long)]
    no_save: bool,
}

fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    let settings = Settings::load_from(args.config.as_deref()).context("failed to load settings")?;

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&settings.log.level)),
        )
        .with_writer(std::io::stderr)
        .init();

    let chapters = args.chapters.unwrap_or(settings.generation.chapters);
    let novels_dir = args.out.clone().unwrap_or_else(|| settings.output.novels_dir.clone());

    let mut builder = NovelPipeline::builder()
        .settings(settings)
        .observer(report_progress);
    if args.offline {
        builder = builder.research_provider(Arc::new(OfflineProvider));
    }
    if args.local_only {
        builder = builder.without_llm();
    }
    if let Some(seed) = args.seed {
        builder = builder.seed(seed);
    }
    if let Some(words) = args.words {
        builder = builder.target_words(words);
    }
    let pipeline = builder.build()?;

    let request = NovelRequest {
        idea: args.idea,
        genre: args.genre,
        chapters,
        title: args.title,
    };
    let report = pipeline.generate(&request, &CancellationToken::new())?;
    let novel = &report.novel;

    if args.no_save {
        println!("{}", novel_engine::core::compiler::render_text(novel));
    } else {
        let saved = FsNovelStore::new(novels_dir).save(novel)?;
        eprintln!("Saved to {}", saved.dir.display());
        for file in &saved.files {
            eprintln!("  {}", file.display());
        }
    }

    eprintln!(
        "\"{}\": {} of {} chapters, {} words (seed {})",
        novel.title(),
        novel.metadata.completed_chapters,
        novel.metadata.requested_chapters,
        novel.metadata.total_words,
        pipeline.seed()
    );
    if let RunStatus::Partial(reason) = &report.status {
        eprintln!("Stopped early: {reason:?}");
        std::process::exit(2);
    }
    Ok(())
}

fn report_progress(event: &PipelineEvent) {
    match event {
        PipelineEvent::StageStarted(stage) => eprintln!("[{stage}]"),
        PipelineEvent::BackendSelected { llm } => {
            eprintln!("  drafting with {}", if *llm { "local LLM" } else { "local synthesizer" });
        }
        PipelineEvent::ChapterStarted { number, total, title } => {
            eprintln!("  chapter {number}/{total}: {title}");
        }
        PipelineEvent::ChapterCompleted { words, backend, .. } => {
            eprintln!("    {words} words ({})", backend.label());
        }
        PipelineEvent::Warning(message) => eprintln!("  warning: {message}"),
        PipelineEvent::Finished { .. } => {}
    }
}
