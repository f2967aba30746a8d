use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use indicatif::{ProgressBar, ProgressStyle};
use tracing_subscriber::EnvFilter;

use citerag_core::citations::format_citation_block;
use citerag_core::config::{resolve_with_base, Config, GenerationProvider, Settings};
use citerag_core::traits::Generator;
use citerag_core::Error;
use citerag_embed::embedder_from_settings;
use citerag_hybrid::{Collaborators, ExtractiveGenerator, OpenAiGenerator, PipelineConfig, RagPipeline, TermOverlapScorer};
use citerag_vector::LanceStore;

#[derive(Parser)]
#[command(name = "citerag", version, about = "Cited question answering over a local document corpus")]
struct Cli {
    #[command(subcommand)]
    command: Command,
    /// Emit query responses as JSON
    #[arg(long, global = true)]
    json: bool,
}

#[derive(Subcommand)]
enum Command {
    /// Segment and index every supported file below DIR (default: data.docs_dir)
    Ingest { dir: Option<PathBuf> },
    /// Answer a question from the indexed corpus
    Query {
        question: String,
        /// Number of reranked chunks handed to the generator (1-20)
        #[arg(long)]
        top_k: Option<usize>,
    },
    /// Show the published index generation
    Status,
}

fn init_tracing(level: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    tracing_subscriber::fmt().with_env_filter(filter).with_target(false).with_writer(std::io::stderr).init();
}

fn build_generator(settings: &Settings) -> Result<Arc<dyn Generator>> {
    let generation = &settings.generation;
    Ok(match generation.provider {
        GenerationProvider::Extractive => Arc::new(ExtractiveGenerator),
        GenerationProvider::OpenAi => {
            let api_key = std::env::var(&generation.api_key_env)
                .with_context(|| format!("{} must be set for the openai provider", generation.api_key_env))?;
            Arc::new(OpenAiGenerator::with_base_url(api_key, generation.model.clone(), generation.base_url.clone()))
        }
    })
}

async fn build_pipeline(settings: &Settings, base: &Path) -> Result<RagPipeline> {
    let lancedb_dir = resolve_with_base(base, &settings.data.lancedb_dir);
    let store = LanceStore::open(&lancedb_dir.to_string_lossy(), settings.embedding.dim).await?;
    let collaborators = Collaborators {
        embedder: embedder_from_settings(&settings.embedding)?,
        vector_store: Arc::new(store),
        cross_encoder: Arc::new(TermOverlapScorer),
        generator: build_generator(settings)?,
    };
    Ok(RagPipeline::new(PipelineConfig::from_settings(settings, base), collaborators))
}

fn spinner(message: String) -> Result<ProgressBar> {
    let pb = ProgressBar::new_spinner();
    pb.set_style(ProgressStyle::default_spinner().template("{spinner:.green} [{elapsed_precise}] {msg}")?);
    pb.enable_steady_tick(Duration::from_millis(120));
    pb.set_message(message);
    Ok(pb)
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = Config::load().map_err(|e| {
        eprintln!("Error loading config: {}", e);
        e
    })?;
    let settings = config.settings()?;
    init_tracing(&settings.logging.level);
    tracing::info!(env = config.env_name(), provider = ?settings.generation.provider, "configuration loaded");

    let base = std::env::current_dir()?;
    let pipeline = build_pipeline(&settings, &base).await?;

    match cli.command {
        Command::Ingest { dir } => {
            let dir = dir.unwrap_or_else(|| resolve_with_base(&base, &settings.data.docs_dir));
            let pb = spinner(format!("Indexing {}", dir.display()))?;
            let result = pipeline.ingest(&dir).await;
            pb.finish_and_clear();
            let count = result?;
            match pipeline.manifest() {
                Some(manifest) => println!("Ingest complete ({count} chunks, collection {})", manifest.collection),
                None => println!("Nothing to index in {}", dir.display()),
            }
        }
        Command::Query { question, top_k } => {
            pipeline.load_indexes().await.context("no index found; run `citerag ingest` first")?;
            let response = match top_k {
                Some(k) => pipeline.query_with(&question, k).await?,
                None => pipeline.query(&question).await?,
            };
            if cli.json {
                println!("{}", serde_json::to_string_pretty(&response)?);
            } else {
                println!("{}{}", response.answer, format_citation_block(&response.citations));
            }
        }
        Command::Status => match pipeline.load_indexes().await {
            Ok(()) => {
                if let Some(manifest) = pipeline.manifest() {
                    println!("ready: {} chunks in collection {} (built {})", manifest.chunk_count, manifest.collection, manifest.built_at);
                }
            }
            Err(Error::NotFound(_)) => println!("empty: no index has been built yet"),
            Err(e) => return Err(e.into()),
        },
    }
    Ok(())
}
