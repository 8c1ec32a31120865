//! # Multimodal RAG CLI (`mrag`)
//!
//! The `mrag` binary ingests a parsed document and answers questions about it.
//!
//! ## Usage
//!
//! ```bash
//! mrag --config ./config/mrag.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `mrag ingest <doc> --elements <file>` | Summarize elements and populate the index |
//! | `mrag ask "<question>"` | Answer one question |
//! | `mrag batch <file>` | Answer one question per line |
//! | `mrag search "<text>"` | Raw similarity search over summaries |
//! | `mrag chat` | Interactive question loop |
//! | `mrag stats` | Index name and document count |
//! | `mrag cache clear` | Delete the summary cache |
//! | `mrag index reset` | Drop all indexed documents |
//! | `mrag completions <shell>` | Print shell completions |

use anyhow::{bail, Context};
use clap::{CommandFactory, Parser, Subcommand};
use std::io::{BufRead, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

use multimodal_rag::config::{self, Config};
use multimodal_rag::error::QueryError;
use multimodal_rag::ingest;
use multimodal_rag::models::{truncate_chars, ElementType, RagResponse};
use multimodal_rag::progress::ProgressMode;
use multimodal_rag::rag::{format_response, QueryEngine};

/// Multimodal RAG: ask questions about a document's text, tables, and images.
///
/// All commands accept a `--config` flag pointing to a TOML configuration
/// file. Without it, `./config/mrag.toml` is used when present and built-in
/// defaults otherwise.
#[derive(Parser)]
#[command(
    name = "mrag",
    about = "Multimodal RAG: question answering over a document's text, tables, and images",
    version
)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

/// Top-level CLI commands.
#[derive(Subcommand)]
enum Commands {
    /// Summarize a parsed document and add it to the knowledge index.
    ///
    /// Summaries are cached by document fingerprint; an unchanged document
    /// reuses them without calling any model. Indexing is skipped when the
    /// cache was reused and the index already holds documents.
    Ingest {
        /// The original document. Only its bytes are read, for fingerprinting.
        document: PathBuf,

        /// JSON manifest of parsed elements.
        #[arg(long)]
        elements: PathBuf,

        /// Progress output on stderr: `human`, `json`, or `off`.
        /// Defaults to human when stderr is a terminal.
        #[arg(long)]
        progress: Option<String>,
    },

    /// Answer a question from the indexed document.
    Ask {
        question: String,

        /// Number of summaries to retrieve.
        #[arg(long)]
        k: Option<usize>,

        /// Print the response as JSON.
        #[arg(long)]
        json: bool,
    },

    /// Answer every question in a file, one per line.
    Batch {
        file: PathBuf,

        #[arg(long)]
        k: Option<usize>,

        /// Print a JSON array of responses.
        #[arg(long)]
        json: bool,
    },

    /// Similarity search over the indexed summaries.
    Search {
        text: String,

        #[arg(long)]
        k: Option<usize>,

        /// Restrict results to one element type: `text`, `table`, or `image`.
        #[arg(long = "type")]
        element_type: Option<String>,
    },

    /// Interactive question loop.
    ///
    /// `quit`, `exit`, or `q` leaves; `clear` deletes the summary cache.
    Chat {
        #[arg(long)]
        k: Option<usize>,
    },

    /// Show the index name and document count.
    Stats,

    /// Manage the summary cache.
    Cache {
        #[command(subcommand)]
        action: CacheAction,
    },

    /// Manage the knowledge index.
    Index {
        #[command(subcommand)]
        action: IndexAction,
    },

    /// Print shell completions.
    Completions {
        shell: clap_complete::Shell,
    },
}

#[derive(Subcommand)]
enum CacheAction {
    /// Delete the cached summaries so the next ingest regenerates them.
    Clear,
}

#[derive(Subcommand)]
enum IndexAction {
    /// Delete every indexed document and the recorded embedding function.
    ///
    /// Required after changing the `[embedding]` configuration.
    Reset,
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init();
}

fn resolve_config(path: Option<&Path>) -> anyhow::Result<Config> {
    match path {
        Some(path) => config::load_config(path),
        None => {
            let default = Path::new("./config/mrag.toml");
            if default.exists() {
                config::load_config(default)
            } else {
                Ok(Config::default())
            }
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();
    let cli = Cli::parse();

    if let Commands::Completions { shell } = &cli.command {
        clap_complete::generate(*shell, &mut Cli::command(), "mrag", &mut std::io::stdout());
        return Ok(());
    }

    let cfg = resolve_config(cli.config.as_deref())?;

    match cli.command {
        Commands::Ingest {
            document,
            elements,
            progress,
        } => {
            let mode = match progress.as_deref() {
                Some(value) => ProgressMode::parse(value).with_context(|| {
                    format!("Unknown progress mode '{}': use human, json, or off", value)
                })?,
                None => ProgressMode::default_for_tty(),
            };
            let reporter = mode.reporter();
            let report =
                ingest::run_ingest(&cfg, &document, &elements, reporter.as_ref()).await?;

            println!("Fingerprint: {}", report.fingerprint);
            println!(
                "Elements: {} text, {} tables, {} images",
                report.counts.text, report.counts.tables, report.counts.images
            );
            if report.from_cache {
                println!("Summaries: reused from cache");
            } else {
                println!("Summaries: generated");
            }
            println!("Indexed: {} new documents", report.ingested);
            println!("Total documents: {}", report.total_documents);
        }
        Commands::Ask { question, k, json } => {
            let engine = open_engine(&cfg).await?;
            let response = engine
                .answer(&question, k.unwrap_or(cfg.retrieval.k))
                .await?;
            print_response(&response, json)?;
        }
        Commands::Batch { file, k, json } => {
            let content = std::fs::read_to_string(&file)
                .with_context(|| format!("Failed to read questions: {}", file.display()))?;
            let questions: Vec<String> = content
                .lines()
                .map(str::trim)
                .filter(|line| !line.is_empty())
                .map(String::from)
                .collect();

            let engine = open_engine(&cfg).await?;
            let responses = engine
                .batch_answer(&questions, k.unwrap_or(cfg.retrieval.k))
                .await?;
            if json {
                println!("{}", serde_json::to_string_pretty(&responses)?);
            } else {
                for (question, response) in questions.iter().zip(&responses) {
                    println!("QUESTION: {}", question);
                    print!("{}", format_response(response));
                }
            }
        }
        Commands::Search {
            text,
            k,
            element_type,
        } => {
            let filter = match element_type.as_deref() {
                Some(value) => match ElementType::parse(value) {
                    Some(t) => Some(t),
                    None => bail!("Unknown element type '{}': use text, table, or image", value),
                },
                None => None,
            };
            let index = ingest::build_index(&cfg).await?;
            let hits = index
                .query_scored(&text, k.unwrap_or(cfg.retrieval.k), filter)
                .await?;
            if hits.is_empty() {
                println!("No results.");
            }
            for (i, hit) in hits.iter().enumerate() {
                let meta = &hit.document.metadata;
                println!(
                    "{}. [{:.3}] {} {} (page {})",
                    i + 1,
                    hit.score,
                    meta.element_type,
                    meta.element_id,
                    meta.page
                );
                println!(
                    "    {}",
                    truncate_chars(&hit.document.content, cfg.retrieval.preview_chars)
                );
            }
        }
        Commands::Chat { k } => {
            let engine = open_engine(&cfg).await?;
            let stdin = std::io::stdin();
            run_chat(
                &cfg,
                &engine,
                k.unwrap_or(cfg.retrieval.k),
                stdin.lock(),
                &mut std::io::stdout(),
            )
            .await?;
        }
        Commands::Stats => {
            let index = ingest::build_index(&cfg).await?;
            let stats = index.stats().await?;
            println!("Index: {}", stats.name);
            println!("Documents: {}", stats.total_documents);
        }
        Commands::Cache { action } => match action {
            CacheAction::Clear => {
                ingest::clear_cache(&cfg)?;
                println!("Cache cleared: {}", cfg.cache_file().display());
            }
        },
        Commands::Index { action } => match action {
            IndexAction::Reset => {
                let removed = ingest::reset_index(&cfg).await?;
                println!("Index reset: {} documents removed.", removed);
            }
        },
        Commands::Completions { .. } => {}
    }

    Ok(())
}

async fn open_engine(cfg: &Config) -> anyhow::Result<QueryEngine> {
    let index = Arc::new(ingest::build_index(cfg).await?);
    ingest::build_engine(cfg, index)
}

fn print_response(response: &RagResponse, json: bool) -> anyhow::Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(response)?);
    } else {
        print!("{}", format_response(response));
    }
    Ok(())
}

async fn run_chat(
    cfg: &Config,
    engine: &QueryEngine,
    k: usize,
    input: impl BufRead,
    out: &mut impl Write,
) -> anyhow::Result<()> {
    writeln!(
        out,
        "Ask a question about the document. Type 'quit' to exit, 'clear' to clear the cache."
    )?;
    let mut lines = input.lines();

    loop {
        write!(out, "\nQuestion: ")?;
        out.flush()?;

        let line = match lines.next() {
            Some(line) => line?,
            None => break,
        };
        let input = line.trim();

        match input.to_lowercase().as_str() {
            "" => continue,
            "quit" | "exit" | "q" => break,
            "clear" => {
                match ingest::clear_cache(cfg) {
                    Ok(()) => writeln!(out, "Cache cleared.")?,
                    Err(e) => eprintln!("Error: {:#}", e),
                }
                continue;
            }
            _ => {}
        }

        match engine.answer(input, k).await {
            Ok(response) => write!(out, "{}", format_response(&response))?,
            Err(QueryError::EmptyQuestion) => continue,
            Err(e) => eprintln!("Error: {:#}", anyhow::Error::from(e)),
        }
    }

    writeln!(out, "Goodbye!")?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use multimodal_rag::embedding::HashEmbedder;
    use multimodal_rag::generation::MockGenerator;
    use multimodal_rag::index::KnowledgeIndex;
    use multimodal_rag::models::IndexedDocument;
    use multimodal_rag::store::{SearchHit, VectorBackend};
    use tempfile::TempDir;

    struct UnreadableBackend;

    #[async_trait]
    impl VectorBackend for UnreadableBackend {
        async fn add(&self, _: &[IndexedDocument], _: &[Vec<f32>]) -> anyhow::Result<()> {
            anyhow::bail!("disk I/O error")
        }
        async fn search(
            &self,
            _: &[f32],
            _: usize,
            _: Option<ElementType>,
        ) -> anyhow::Result<Vec<SearchHit>> {
            anyhow::bail!("disk I/O error")
        }
        async fn count(&self) -> anyhow::Result<usize> {
            anyhow::bail!("disk I/O error")
        }
        async fn clear(&self) -> anyhow::Result<()> {
            anyhow::bail!("disk I/O error")
        }
    }

    #[tokio::test]
    async fn chat_keeps_going_after_an_index_failure() {
        let tmp = TempDir::new().unwrap();
        let mut cfg = Config::default();
        cfg.cache.dir = tmp.path().join("cache");

        let index = KnowledgeIndex::new(
            "broken",
            Box::new(HashEmbedder::new(16)),
            Box::new(UnreadableBackend),
        );
        let generator = Arc::new(MockGenerator::with_text("unused"));
        let engine = QueryEngine::new(Arc::new(index), generator.clone());

        let input = std::io::Cursor::new("first question\nsecond question\nclear\nquit\n");
        let mut out = Vec::new();
        run_chat(&cfg, &engine, 3, input, &mut out).await.unwrap();

        let out = String::from_utf8(out).unwrap();
        assert_eq!(out.matches("Question: ").count(), 4);
        assert!(out.contains("Cache cleared."));
        assert!(out.trim_end().ends_with("Goodbye!"));
        assert_eq!(generator.request_count(), 0);
    }
}
