use std::path::{Path, PathBuf};

use anyhow::Result;
use clap::{ArgGroup, Parser};
use indicatif::{ProgressBar, ProgressStyle};

use rag_gateway::config::Settings;
use rag_gateway::indexer::chunker::ChunkingConfig;
use rag_gateway::indexer::source::{fetch_url, read_file};
use rag_gateway::indexer::walker::walk_directory;
use rag_gateway::rag::{self, Document, IngestionPipeline};

#[derive(Parser, Debug)]
#[command(name = "rag-ingest")]
#[command(about = "Ingest documents into the RAG document store")]
#[command(group(ArgGroup::new("input").required(true).args(["url", "file", "dir"])))]
struct Args {
    /// Fetch and ingest the document at this URL
    #[arg(long)]
    url: Option<String>,

    /// Ingest a single text file
    #[arg(long)]
    file: Option<PathBuf>,

    /// Recursively ingest every text file in a directory
    #[arg(short, long)]
    dir: Option<PathBuf>,

    /// Maximum chunk size in bytes (defaults to chunking.chunk_size)
    #[arg(long)]
    chunk_size: Option<usize>,

    /// Overlap between chunks in bytes (defaults to chunking.overlap)
    #[arg(long)]
    chunk_overlap: Option<usize>,

    /// Store each document as a single chunk
    #[arg(long, conflicts_with_all = ["chunk_size", "chunk_overlap"])]
    whole_document: bool,

    /// Extra metadata attached to every chunk
    #[arg(long = "meta", value_name = "KEY=VALUE", value_parser = parse_key_val)]
    meta: Vec<(String, String)>,

    /// Path to the TOML configuration file
    #[arg(long, env = "RAG_CONFIG")]
    config: Option<PathBuf>,
}

fn parse_key_val(s: &str) -> Result<(String, String), String> {
    let (key, value) = s
        .split_once('=')
        .ok_or_else(|| format!("expected KEY=VALUE, got '{}'", s))?;
    if key.is_empty() {
        return Err(format!("empty key in '{}'", s));
    }
    Ok((key.to_string(), value.to_string()))
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    let settings = Settings::load(args.config.as_deref())?;
    rag_gateway::logging::init();

    let chunking = if args.whole_document {
        ChunkingConfig::whole_document()
    } else {
        ChunkingConfig::new(
            args.chunk_size.unwrap_or(settings.chunking.chunk_size),
            args.chunk_overlap.unwrap_or(settings.chunking.overlap),
        )?
    };

    let secrets = settings.secret_provider();
    println!("Initializing embedder...");
    let embedder = rag::build_embedder(&settings, secrets.as_ref())?;
    println!("Connecting to document store at {}...", settings.store.url);
    let store = rag::build_store(&settings, secrets.as_ref()).await?;
    let pipeline = IngestionPipeline::new(embedder, store, settings.timeouts.embed(), settings.timeouts.store());

    let documents = load_documents(&args, &settings).await?;
    if documents.is_empty() {
        println!("No supported files found. Exiting.");
        return Ok(());
    }

    let pb = ProgressBar::new(documents.len() as u64);
    pb.set_style(
        ProgressStyle::default_bar()
            .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} {msg}")?
            .progress_chars("#>-"),
    );

    let mut total_chunks = 0usize;
    let mut failures: Vec<(String, String)> = Vec::new();

    for mut document in documents {
        for (key, value) in &args.meta {
            document.metadata.insert(key.clone(), value.clone());
        }
        let source = document.metadata.get("source").cloned().unwrap_or_default();
        pb.set_message(source.clone());

        match pipeline.ingest(&document, &chunking).await {
            Ok(report) => {
                total_chunks += report.chunk_ids.len();
                pb.println(format!("{} -> {} chunks", source, report.chunk_ids.len()));
                for id in &report.chunk_ids {
                    pb.println(format!("  {}", id));
                }
            }
            Err(e) => {
                tracing::warn!("Failed to ingest {}: {}", source, e);
                total_chunks += e.committed.len();
                pb.println(format!("{} -> FAILED after {} chunks", source, e.committed.len()));
                for id in &e.committed {
                    pb.println(format!("  {}", id));
                }
                failures.push((source, e.source.to_string()));
            }
        }
        pb.inc(1);
    }

    pb.finish_with_message("done");

    println!("\nIngestion complete!");
    println!("  Chunks stored:   {}", total_chunks);
    println!("  Failed sources:  {}", failures.len());
    println!("  Collection:      {}", settings.store.collection);

    if !failures.is_empty() {
        println!("\nFailed sources:");
        for (source, err) in &failures {
            println!("  {}: {}", source, err);
        }
        anyhow::bail!("{} source(s) failed to ingest", failures.len());
    }

    Ok(())
}

async fn load_documents(args: &Args, settings: &Settings) -> Result<Vec<Document>> {
    if let Some(ref url) = args.url {
        println!("Fetching {}...", url);
        return Ok(vec![fetch_url(url, settings.timeouts.request()).await?]);
    }
    if let Some(ref file) = args.file {
        return Ok(vec![read_file(file)?]);
    }
    match args.dir {
        Some(ref dir) => load_directory(dir),
        None => Ok(Vec::new()),
    }
}

fn load_directory(dir: &Path) -> Result<Vec<Document>> {
    if !dir.exists() {
        anyhow::bail!("Directory does not exist: {}", dir.display());
    }
    println!("Scanning directory: {}", dir.display());
    let files = walk_directory(dir);
    println!("Found {} supported files", files.len());

    let mut documents = Vec::with_capacity(files.len());
    for path in files {
        match read_file(&path) {
            Ok(doc) if !doc.text.trim().is_empty() => documents.push(doc),
            Ok(_) => tracing::debug!("Skipping empty file {}", path.display()),
            Err(e) => tracing::warn!("{:#}", e),
        }
    }
    Ok(documents)
}
