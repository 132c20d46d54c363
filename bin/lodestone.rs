use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Result;
use clap::{Parser, Subcommand, ValueEnum};
use tracing::info;

use lodestone::{EngineConfig, IndexManager, QueryEngine, SearchResult};

const ANSI_HIGHLIGHT: &str = "\u{1b}[1;33m";
const ANSI_RESET: &str = "\u{1b}[0m";
const MAX_LIMIT: usize = 1000;

#[derive(Parser)]
#[command(name = "lodestone")]
#[command(about = "Local full-text search over your files", long_about = None)]
struct Args {
    /// Index directory
    #[arg(long, env = "LODESTONE_INDEX_DIR", default_value = "./index")]
    index_dir: PathBuf,

    /// Ingest worker threads (clamped to [1, 64])
    #[arg(long, env = "LODESTONE_THREADS")]
    threads: Option<usize>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum OutputFormat {
    Text,
    Json,
}

#[derive(Subcommand)]
enum Command {
    /// Incrementally index the given paths
    Index {
        /// Source files or directories
        #[arg(required = true)]
        paths: Vec<PathBuf>,
    },
    /// Run a query against the index
    Search {
        query: String,
        /// Maximum number of hits (clamped to [0, 1000])
        #[arg(long, default_value_t = 10)]
        limit: usize,
        #[arg(long, value_enum, default_value_t = OutputFormat::Text)]
        format: OutputFormat,
    },
    /// Show index statistics
    Status,
    /// Drop the index and re-ingest the given paths
    Rebuild {
        #[arg(required = true)]
        paths: Vec<PathBuf>,
    },
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::WARN.into()),
        )
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();
    let mut config = EngineConfig::new(&args.index_dir);
    if let Some(threads) = args.threads {
        config = config.with_threads(threads);
    }

    match args.command {
        Command::Index { paths } => {
            let manager = IndexManager::open(config)?;
            let report = manager.update(&paths)?;
            println!(
                "indexed: {} added, {} updated, {} deleted, {} failed ({} ms)",
                report.added, report.updated, report.deleted, report.failed, report.elapsed_ms
            );
        }
        Command::Search {
            query,
            limit,
            format,
        } => {
            if query.len() > lodestone::query::MAX_QUERY_BYTES {
                anyhow::bail!(
                    "query exceeds {} bytes",
                    lodestone::query::MAX_QUERY_BYTES
                );
            }
            let limit = limit.min(MAX_LIMIT);
            let manager = Arc::new(IndexManager::open(config)?);
            let engine = QueryEngine::new(manager);
            let result = engine.search(&query, limit)?;
            match format {
                OutputFormat::Text => print_text(&result),
                OutputFormat::Json => print_json(&result)?,
            }
        }
        Command::Status => {
            let manager = IndexManager::open(config)?;
            let status = manager.status()?;
            println!("documents:  {}", status.doc_count);
            println!("segments:   {}", status.segment_count);
            println!("index size: {} bytes", status.total_size_bytes);
        }
        Command::Rebuild { paths } => {
            let manager = IndexManager::open(config)?;
            info!("rebuilding index from scratch");
            let report = manager.rebuild(&paths)?;
            println!(
                "rebuilt: {} added, {} failed ({} ms)",
                report.added, report.failed, report.elapsed_ms
            );
        }
    }

    Ok(())
}

fn print_text(result: &SearchResult) {
    println!(
        "{} matches ({} shown, {} ms)",
        result.total_matches,
        result.hits.len(),
        result.elapsed_ms
    );
    for hit in &result.hits {
        println!();
        println!("{}  (score {:.3})", hit.document.path, hit.score);
        for snippet in &hit.snippets {
            println!("  line {}: {}", snippet.line_number, colorize(snippet));
        }
    }
}

/// Wrap each highlight span in ANSI color codes
fn colorize(snippet: &lodestone::Snippet) -> String {
    let chars: Vec<char> = snippet.text.chars().collect();
    let mut out = String::with_capacity(snippet.text.len() + 16);
    let mut cursor = 0usize;
    for span in &snippet.highlights {
        if span.start > cursor {
            out.extend(&chars[cursor..span.start]);
        }
        out.push_str(ANSI_HIGHLIGHT);
        out.extend(&chars[span.start..span.end.min(chars.len())]);
        out.push_str(ANSI_RESET);
        cursor = span.end.min(chars.len());
    }
    if cursor < chars.len() {
        out.extend(&chars[cursor..]);
    }
    out.replace('\n', " ")
}

fn print_json(result: &SearchResult) -> Result<()> {
    let hits: Vec<serde_json::Value> = result
        .hits
        .iter()
        .map(|hit| {
            serde_json::json!({
                "path": hit.document.path,
                "score": hit.score,
                "sizeBytes": hit.document.size_bytes,
                "mtime": hit.document.mtime.to_rfc3339(),
                "docType": hit.document.doc_type,
                "snippets": hit.snippets.iter().map(|s| {
                    serde_json::json!({
                        "text": s.text,
                        "lineNumber": s.line_number,
                        "offset": s.offset,
                        "highlights": s.highlights.iter()
                            .map(|h| serde_json::json!([h.start, h.end]))
                            .collect::<Vec<_>>(),
                    })
                }).collect::<Vec<_>>(),
            })
        })
        .collect();

    let payload = serde_json::json!({
        "query": result.query,
        "totalMatches": result.total_matches,
        "elapsedMs": result.elapsed_ms,
        "hits": hits,
    });
    println!("{}", serde_json::to_string_pretty(&payload)?);
    Ok(())
}
