//! # Tutor Harness CLI (`tutor`)
//!
//! The `tutor` binary is the primary interface for Tutor Harness. It
//! provides commands for database initialization, source-material
//! ingestion, retrieval inspection, knowledge-base statistics, and
//! running adaptive tutoring sessions.
//!
//! ## Usage
//!
//! ```bash
//! tutor --config ./config/tutor.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `tutor init` | Create the SQLite database and schema |
//! | `tutor ingest <topic-or-path>` | Ingest source material into the knowledge base |
//! | `tutor search "<query>"` | Inspect retrieval for a query |
//! | `tutor stats` | Show knowledge-base counters |
//! | `tutor run <topic>` | Run an adaptive tutoring session |

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::info;
use tracing_subscriber::EnvFilter;

use tutor_harness::affect::{self, AffectSignal, CHANNEL_CAPACITY};
use tutor_harness::config::{self, Config};
use tutor_harness::embedding::HttpEmbedder;
use tutor_harness::generate::HttpGenerator;
use tutor_harness::ingest::{self, IngestInput};
use tutor_harness::plan::ContentPlan;
use tutor_harness::report;
use tutor_harness::retrieve::Retriever;
use tutor_harness::scrape::WikipediaSource;
use tutor_harness::session::SessionOrchestrator;
use tutor_harness::store;

/// Tutor Harness CLI — a local-first adaptive tutoring engine.
///
/// All commands accept a `--config` flag pointing to a TOML configuration
/// file. See `config/tutor.example.toml` for a full example.
#[derive(Parser)]
#[command(
    name = "tutor",
    about = "Tutor Harness — a local-first adaptive tutoring engine",
    version,
    long_about = "Tutor Harness ingests source material into a retrieval knowledge base \
    (chunking, embedding, vector index) and drives four-segment tutoring sessions whose \
    content is grounded in retrieved passages and whose pacing adapts to a live affect signal."
)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/tutor.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

/// Top-level CLI commands.
#[derive(Subcommand)]
enum Commands {
    /// Initialize the database schema.
    ///
    /// Creates the SQLite database file and all required tables
    /// (documents, chunks, chunk_vectors). Idempotent.
    Init,

    /// Ingest source material into the knowledge base.
    ///
    /// The argument is either a path (file or directory scanned with the
    /// configured include/exclude globs) or a free-text topic; a topic
    /// pulls open-access articles from the web, seeding a minimal topic
    /// document when scraping yields nothing so the session can still run.
    Ingest {
        /// Path to a file or directory, or a free-text topic.
        source: String,

        /// Maximum number of documents to process.
        #[arg(long)]
        max_documents: Option<usize>,
    },

    /// Search the knowledge base.
    ///
    /// Embeds the query and prints ranked passages with scores and
    /// provenance. Useful for verifying ingestion before a session.
    Search {
        /// The search query string.
        query: String,

        /// Maximum number of results to return.
        #[arg(long)]
        top_k: Option<usize>,
    },

    /// Show knowledge-base counters (documents, chunks, vectors).
    Stats,

    /// Run an adaptive tutoring session on a topic.
    ///
    /// Ingests local material for the topic if the knowledge base is
    /// empty, plans four segments, generates grounded content, presents
    /// each segment while polling the affect feed, and writes a final
    /// markdown report to the output directory.
    Run {
        /// Session topic.
        topic: String,

        /// Learner name used in the final report.
        #[arg(long, default_value = "learner")]
        learner: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cli = Cli::parse();
    let cfg = config::load_config(&cli.config)?;

    match cli.command {
        Commands::Init => {
            let pool = store::connect(&cfg.db.path).await?;
            store::init(&pool).await?;
            println!("Database initialized at {}", cfg.db.path.display());
        }
        Commands::Ingest {
            source,
            max_documents,
        } => {
            run_ingest(&cfg, &source, max_documents).await?;
        }
        Commands::Search { query, top_k } => {
            run_search(&cfg, &query, top_k).await?;
        }
        Commands::Stats => {
            let pool = store::connect(&cfg.db.path).await?;
            store::init(&pool).await?;
            let stats = store::stats(&pool).await?;
            println!("Documents: {}", stats.document_count);
            println!("Chunks:    {}", stats.chunk_count);
            println!("Vectors:   {}", stats.index_size);
        }
        Commands::Run { topic, learner } => {
            run_session(&cfg, &topic, &learner).await?;
        }
    }

    Ok(())
}

async fn run_ingest(cfg: &Config, source: &str, max_documents: Option<usize>) -> Result<()> {
    let pool = store::connect(&cfg.db.path).await?;
    store::init(&pool).await?;
    let embedder = HttpEmbedder::new(&cfg.embedding)?;
    let index = ingest::load_index(&pool, cfg.embedding.dims).await?;

    let input = ingest_input(cfg, source)?;
    let max = max_documents.unwrap_or(cfg.ingest.max_documents);
    let scraper = WikipediaSource::new()?;
    let report = ingest::ingest(cfg, &pool, &index, &embedder, &scraper, input, max).await?;

    println!(
        "Ingested {} document(s), {} chunk(s) written, {} skipped, {} chunk(s) dropped.",
        report.documents_ingested,
        report.chunks_written,
        report.documents_skipped,
        report.chunks_dropped
    );
    for warning in &report.warnings {
        println!("  warning: {}", warning);
    }
    Ok(())
}

/// Interpret the ingest argument: an existing path is scanned as
/// material, anything else is a topic.
fn ingest_input(cfg: &Config, source: &str) -> Result<IngestInput> {
    let path = Path::new(source);
    if path.is_dir() {
        let mut scoped = cfg.clone();
        scoped.ingest.input_dir = path.to_path_buf();
        return Ok(IngestInput::Paths(ingest::scan_input_dir(&scoped)?));
    }
    if path.is_file() {
        return Ok(IngestInput::Paths(vec![path.to_path_buf()]));
    }
    Ok(IngestInput::Topic(source.to_string()))
}

async fn run_search(cfg: &Config, query: &str, top_k: Option<usize>) -> Result<()> {
    let pool = store::connect(&cfg.db.path).await?;
    store::init(&pool).await?;
    let embedder = HttpEmbedder::new(&cfg.embedding)?;
    let index = ingest::load_index(&pool, cfg.embedding.dims).await?;
    let retriever = Retriever::new(&pool, &index, &embedder);

    let results = retriever
        .search(query, top_k.unwrap_or(cfg.retrieval.top_k))
        .await?;
    if results.is_empty() {
        println!("No results.");
        return Ok(());
    }
    for (rank, r) in results.iter().enumerate() {
        let snippet: String = r.text.chars().take(160).collect();
        println!(
            "{:2}. [{:.4}] {}#{}\n    {}",
            rank + 1,
            r.score,
            r.source_uri,
            r.ordinal,
            snippet
        );
    }
    Ok(())
}

async fn run_session(cfg: &Config, topic: &str, learner: &str) -> Result<()> {
    let pool = store::connect(&cfg.db.path).await?;
    store::init(&pool).await?;
    let embedder = HttpEmbedder::new(&cfg.embedding)?;
    let mut index = ingest::load_index(&pool, cfg.embedding.dims).await?;

    // Material for the topic must exist before planning; an empty
    // knowledge base pulls from the configured input directory, then the
    // web scrape fallback, then a topic seed. Zero usable documents
    // aborts the session.
    if index.is_empty() {
        let input = match ingest::scan_input_dir(cfg) {
            Ok(paths) if !paths.is_empty() => IngestInput::Paths(paths),
            _ => IngestInput::Topic(topic.to_string()),
        };
        let scraper = WikipediaSource::new()?;
        let report = ingest::ingest(
            cfg,
            &pool,
            &index,
            &embedder,
            &scraper,
            input,
            cfg.ingest.max_documents,
        )
        .await?;
        info!(
            documents = report.documents_ingested,
            chunks = report.chunks_written,
            "knowledge base populated"
        );
        index = ingest::load_index(&pool, cfg.embedding.dims).await?;
    }

    // Fix each segment's grounding at planning time; pacing changes
    // regenerate against the same grounding.
    let retriever = Retriever::new(&pool, &index, &embedder);
    let plan = ContentPlan::derive(topic);
    let mut groundings = Vec::with_capacity(plan.segments.len());
    for planned in &plan.segments {
        let grounding = retriever
            .grounding_context(
                &planned.focus_query,
                cfg.retrieval.top_k,
                cfg.retrieval.context_tokens,
            )
            .await?;
        groundings.push(grounding);
    }

    let session_dir = cfg.session.output_dir.join(format!(
        "session_{}",
        chrono::Utc::now().format("%Y%m%d_%H%M%S")
    ));
    let generator = Arc::new(HttpGenerator::new(&cfg.generation, &session_dir)?);

    let (tx, rx) = mpsc::channel(CHANNEL_CAPACITY);
    let poller = cfg.affect.feed_path.clone().map(|feed| {
        affect::spawn_feed_poller(feed, cfg.affect.poll_interval(), tx)
    });
    let signal = AffectSignal::new(rx, &cfg.affect);

    let orchestrator = SessionOrchestrator::new(
        cfg.session.clone(),
        cfg.affect.clone(),
        topic,
        learner,
        groundings,
        generator.clone(),
        generator,
        signal,
    );
    let state = orchestrator.run().await?;

    if let Some(poller) = poller {
        poller.abort();
    }

    let report_path = report::write_report(&state, &session_dir)?;
    println!("Session {} complete.", state.session_id);
    if let Some(quiz) = &state.quiz {
        println!(
            "Quiz: {}/{} correct ({:.0}%).",
            quiz.correct,
            quiz.questions,
            quiz.score() * 100.0
        );
    }
    println!("Report written to {}", report_path.display());
    Ok(())
}
