use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use ragdb::config::load_config;
use ragdb::embedder::{EmbedBackend, Embedder, HashEmbedder};
use ragdb::orchestrator::{
    touch_recent_database, CustomMetadata, DataFormat, DeleteTarget, Engine, IngestDataMetadata,
};
use serde_json::json;
use std::path::PathBuf;
use std::sync::Arc;

/// Thin CLI adapter over the retrieval engine (`ragdb::orchestrator::Engine`).
/// No RPC/tool-protocol transport lives here — the REST/tool surface and the
/// UI are out of scope for the retrieval core.
#[derive(Debug, Parser)]
#[command(name = "ragdb")]
#[command(version)]
#[command(about = "Local-first hybrid retrieval engine: semantic chunking, PDF boundary filtering, vector+BM25 search")]
struct Cli {
    /// Database root directory (holds chunks.lance/ and raw-data/).
    #[arg(long, global = true, value_name = "PATH", default_value = "./ragdb-data")]
    db: PathBuf,

    /// Base directory parsers validate file paths against.
    #[arg(long, global = true, value_name = "PATH")]
    base_dir: Option<PathBuf>,

    /// Override the embedding model repo ID (HuggingFace) used by model2vec-rs.
    #[arg(long, global = true, value_name = "MODEL_ID")]
    embed_model: Option<String>,

    #[command(subcommand)]
    cmd: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Ingest a file from disk.
    IngestFile {
        #[arg(value_name = "ABS_PATH")]
        path: PathBuf,
        /// Custom metadata as repeated key=value pairs.
        #[arg(long = "meta", value_name = "KEY=VALUE")]
        metadata: Vec<String>,
    },
    /// Ingest raw string content (text, html, or markdown).
    IngestData {
        #[arg(long)]
        source: String,
        #[arg(long, value_enum)]
        format: CliDataFormat,
        /// Content to ingest; reads stdin if omitted.
        #[arg(long)]
        content: Option<String>,
        #[arg(long = "meta", value_name = "KEY=VALUE")]
        metadata: Vec<String>,
    },
    /// Delete by absolute file path.
    DeleteFile { path: PathBuf },
    /// Delete by raw-data source.
    DeleteSource { source: String },
    /// List ingested files.
    ListFiles,
    /// Print engine status.
    Status,
    /// Run a hybrid query.
    Query {
        query: String,
        #[arg(long, default_value_t = 10)]
        limit: usize,
        #[arg(long)]
        explain: bool,
    },
    /// Pin a result for a query (moves it earlier in future rankings).
    FeedbackPin {
        query: String,
        file_path: String,
        chunk_index: u32,
    },
    /// Undo a prior pin.
    FeedbackUnpin {
        query: String,
        file_path: String,
        chunk_index: u32,
    },
    /// Dismiss a result for a query (moves it later in future rankings).
    FeedbackDismiss {
        query: String,
        file_path: String,
        chunk_index: u32,
    },
    /// Show feedback event counts.
    FeedbackStats,
}

#[derive(Debug, Clone, Copy, clap::ValueEnum)]
enum CliDataFormat {
    Text,
    Html,
    Markdown,
}

impl From<CliDataFormat> for DataFormat {
    fn from(f: CliDataFormat) -> Self {
        match f {
            CliDataFormat::Text => DataFormat::Text,
            CliDataFormat::Html => DataFormat::Html,
            CliDataFormat::Markdown => DataFormat::Markdown,
        }
    }
}

fn parse_metadata(pairs: &[String]) -> Result<CustomMetadata> {
    let mut out = CustomMetadata::new();
    for pair in pairs {
        let (k, v) = pair
            .split_once('=')
            .with_context(|| format!("malformed --meta entry (expected KEY=VALUE): {pair}"))?;
        out.insert(k.to_string(), v.to_string());
    }
    Ok(out)
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();

    let mut cfg = load_config(&cli.db);
    if let Some(base_dir) = cli.base_dir.clone() {
        cfg.base_dir = base_dir;
    }
    if let Some(model) = cli.embed_model.clone() {
        cfg.embedding.model = model;
    }

    // Hermetic-test hook: `RAGDB_EMBED_BACKEND=hash` swaps in a deterministic,
    // offline embedder instead of downloading a real model2vec model, so
    // integration tests driving this binary don't need network access.
    let embedder: Arc<dyn EmbedBackend> = match std::env::var("RAGDB_EMBED_BACKEND").as_deref() {
        Ok("hash") => Arc::new(HashEmbedder::new(64)),
        _ => Arc::new(
            Embedder::load(
                &cfg.embedding.model,
                cfg.embedding.cache_dir.as_deref(),
                cfg.embedding.batch_size,
            )
            .context("failed to load embedding model")?,
        ),
    };

    let model_id = embedder.model_id().to_string();
    let engine = Engine::open(&cli.db, cfg, embedder)
        .await
        .context("failed to open database")?;
    touch_recent_database(&cli.db, &model_id);

    match cli.cmd {
        Command::IngestFile { path, metadata } => {
            let custom = parse_metadata(&metadata)?;
            let custom = (!custom.is_empty()).then_some(custom);
            let summary = engine.ingest_file(&path, custom).await?;
            println!(
                "{}",
                json!({
                    "file_path": summary.file_path,
                    "chunk_count": summary.chunk_count,
                    "timestamp": summary.timestamp,
                })
            );
        }
        Command::IngestData {
            source,
            format,
            content,
            metadata,
        } => {
            let content = match content {
                Some(c) => c,
                None => std::io::read_to_string(std::io::stdin()).context("reading stdin")?,
            };
            let custom = parse_metadata(&metadata)?;
            let custom = (!custom.is_empty()).then_some(custom);
            let summary = engine
                .ingest_data(
                    &content,
                    IngestDataMetadata {
                        source,
                        format: format.into(),
                        custom,
                    },
                )
                .await?;
            println!(
                "{}",
                json!({
                    "file_path": summary.file_path,
                    "chunk_count": summary.chunk_count,
                    "timestamp": summary.timestamp,
                })
            );
        }
        Command::DeleteFile { path } => {
            let summary = engine
                .delete(DeleteTarget::FilePath(path.to_string_lossy().to_string()))
                .await?;
            println!(
                "{}",
                json!({
                    "file_path": summary.file_path,
                    "deleted": summary.deleted,
                    "timestamp": summary.timestamp,
                })
            );
        }
        Command::DeleteSource { source } => {
            let summary = engine.delete(DeleteTarget::Source(source)).await?;
            println!(
                "{}",
                json!({
                    "file_path": summary.file_path,
                    "deleted": summary.deleted,
                    "timestamp": summary.timestamp,
                })
            );
        }
        Command::ListFiles => {
            let files = engine.list_files().await?;
            let out: Vec<_> = files
                .into_iter()
                .map(|f| json!({"file_path": f.file_path, "chunk_count": f.chunk_count, "source": f.source}))
                .collect();
            println!("{}", serde_json::to_string_pretty(&out)?);
        }
        Command::Status => {
            let status = engine.status().await?;
            println!(
                "{}",
                json!({
                    "document_count": status.document_count,
                    "chunk_count": status.chunk_count,
                    "memory_usage": status.memory_usage_bytes,
                    "uptime": status.uptime_secs,
                    "fts_index_enabled": status.fts_index_enabled,
                    "search_mode": match status.search_mode {
                        ragdb::vector_store::SearchMode::Hybrid => "hybrid",
                        ragdb::vector_store::SearchMode::VectorOnly => "vector-only",
                    },
                })
            );
        }
        Command::Query { query, limit, explain } => {
            let results = engine.query_documents(&query, limit, explain).await?;
            let out: Vec<_> = results
                .into_iter()
                .map(|r| {
                    json!({
                        "file_path": r.file_path,
                        "chunk_index": r.chunk_index,
                        "text": r.text,
                        "score": r.score,
                        "source": r.source,
                        "metadata": r.metadata,
                        "explanation": r.explanation,
                    })
                })
                .collect();
            println!("{}", serde_json::to_string_pretty(&out)?);
        }
        Command::FeedbackPin {
            query,
            file_path,
            chunk_index,
        } => {
            engine.feedback_pin(&query, &file_path, chunk_index, None);
            println!("{}", json!({"ok": true}));
        }
        Command::FeedbackUnpin {
            query,
            file_path,
            chunk_index,
        } => {
            engine.feedback_unpin(&query, &file_path, chunk_index, None);
            println!("{}", json!({"ok": true}));
        }
        Command::FeedbackDismiss {
            query,
            file_path,
            chunk_index,
        } => {
            engine.feedback_dismiss(&query, &file_path, chunk_index, None);
            println!("{}", json!({"ok": true}));
        }
        Command::FeedbackStats => {
            let stats = engine.feedback_stats();
            println!(
                "{}",
                json!({
                    "event_count": stats.event_count,
                    "pinned_pairs": stats.pinned_pairs,
                    "dismissed_pairs": stats.dismissed_pairs,
                })
            );
        }
    }

    Ok(())
}
