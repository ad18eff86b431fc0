//! coderank CLI: index a project, search it, and teach the ranker.
//!
//! ```bash
//! coderank index ./my-project
//! coderank search "validate jwt token" --language rust
//! coderank search "session cache" --fusion rrf
//! coderank feedback "validate jwt token" 3f9a0c1d2e4b5a69 useful --rank 2
//! ```

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use indicatif::{ProgressBar, ProgressStyle};
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use coderank::config::Config;
use coderank::embedder::Embedder;
use coderank::embedder::mock::MockEmbedder;
use coderank::feedback::EventType;
use coderank::rerank::{RerankModel, TermOverlapModel};
use coderank::search::fusion::FusionStrategy;
use coderank::{IndexOptions, ResponseStatus, RetrievalEngine, RetrievalResponse, RetrieveOptions};

#[derive(Parser, Debug)]
#[command(name = "coderank")]
#[command(author, version, about = "Hybrid code retrieval with a feedback-trained ranker", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    #[command(flatten)]
    global: GlobalOptions,
}

#[derive(Args, Debug, Clone)]
struct GlobalOptions {
    /// Path to the JSON configuration file
    #[arg(long, short = 'c', global = true, env = "CODERANK_CONFIG", default_value = "")]
    config: String,

    /// Collection to operate on
    #[arg(long, global = true, env = "CODERANK_COLLECTION", default_value = "default")]
    collection: String,

    /// Print machine-readable JSON on stdout
    #[arg(long, global = true)]
    json: bool,

    /// Enable debug logging
    #[arg(long, short = 'v', global = true)]
    verbose: bool,

    /// Only log errors and hide progress
    #[arg(long, short = 'q', global = true)]
    quiet: bool,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Index (or re-sync) a project directory
    Index {
        path: PathBuf,
        /// Re-chunk unchanged files too
        #[arg(long)]
        force: bool,
        /// Skip building the call graph
        #[arg(long)]
        no_graph: bool,
    },

    /// Rank indexed code for a query
    Search(SearchArgs),

    /// Record how useful a result was
    Feedback {
        query: String,
        chunk_id: String,
        /// click, useful or not_useful
        #[arg(value_parser = parse_event_type)]
        event: EventType,
        /// 1-based rank the result was shown at
        #[arg(long)]
        rank: Option<usize>,
    },

    /// List recorded feedback for one query and chunk
    History { query: String, chunk_id: String },

    /// Show what the collection holds
    Status,

    /// Fold old feedback events into aggregates
    Cleanup,
}

#[derive(Args, Debug)]
struct SearchArgs {
    query: String,

    /// Number of results
    #[arg(long, short = 'k')]
    top_k: Option<usize>,

    /// Restrict to one language
    #[arg(long, short = 'l')]
    language: Option<String>,

    #[arg(long)]
    no_vector: bool,

    #[arg(long)]
    no_expand: bool,

    #[arg(long)]
    no_feedback: bool,

    /// Add callers and callees of the top results
    #[arg(long)]
    graph: bool,

    /// Re-score the top results with the rerank model
    #[arg(long)]
    rerank: bool,

    /// Score fusion: linear, rrf or max
    #[arg(long, value_parser = parse_fusion)]
    fusion: Option<FusionStrategy>,
}

impl SearchArgs {
    fn options(&self, config: &Config) -> RetrieveOptions {
        let mut options = RetrieveOptions::from_config(&config.retrieval);
        if let Some(top_k) = self.top_k {
            options.top_k = top_k;
        }
        options.language = self.language.clone();
        options.use_vector &= !self.no_vector;
        options.use_query_expansion &= !self.no_expand;
        options.use_feedback &= !self.no_feedback;
        options.use_graph |= self.graph;
        options.use_rerank |= self.rerank;
        if let Some(strategy) = self.fusion {
            options.fusion_strategy = strategy;
        }
        options
    }
}

fn parse_event_type(s: &str) -> Result<EventType, String> {
    s.parse().map_err(|e: coderank::Error| e.to_string())
}

fn parse_fusion(s: &str) -> Result<FusionStrategy, String> {
    s.parse().map_err(|e: coderank::Error| e.to_string())
}

fn spinner(message: &str, quiet: bool) -> Option<ProgressBar> {
    if quiet {
        return None;
    }
    let pb = ProgressBar::new_spinner();
    pb.set_style(
        ProgressStyle::default_spinner()
            .template("{spinner:.cyan} {msg}")
            .expect("valid template"),
    );
    pb.set_message(message.to_string());
    pb.enable_steady_tick(Duration::from_millis(100));
    Some(pb)
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn print_response(response: &RetrievalResponse) {
    if response.status == ResponseStatus::NotIndexed {
        println!("Collection is empty; run `coderank index <path>` first.");
        return;
    }
    if response.results.is_empty() {
        println!("No results for \"{}\"", response.query);
    }
    for item in &response.results {
        let stages: Vec<&str> = item.score.provenance.iter().map(|s| s.as_str()).collect();
        println!(
            "{:>2}. {}:{}-{}  {:.4}  [{}]  {}",
            item.rank,
            item.file_path,
            item.start_line,
            item.end_line,
            item.score.final_score,
            stages.join(","),
            item.chunk_id(),
        );
        if let Some(symbol) = &item.symbol {
            println!("    {symbol}");
        }
    }
    if !response.degraded.is_empty() {
        let degraded: Vec<&str> = response.degraded.iter().map(|s| s.as_str()).collect();
        println!("(skipped: {})", degraded.join(", "));
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let g = &cli.global;

    let default_level = if g.quiet {
        "error"
    } else if g.verbose {
        "debug"
    } else {
        "info"
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)),
        )
        .with_writer(std::io::stderr)
        .init();

    let config = Config::load(&g.config)?;
    config.validate().context("invalid configuration")?;

    let embedder: Arc<dyn Embedder> = Arc::new(MockEmbedder::default());
    let rerank_model: Option<Arc<dyn RerankModel>> = Some(Arc::new(TermOverlapModel::new()));
    let engine = RetrievalEngine::open(config, &g.collection, embedder, rerank_model)
        .with_context(|| format!("failed to open collection {}", g.collection))?;

    match cli.command {
        Commands::Index { path, force, no_graph } => {
            let cancel = CancellationToken::new();
            let on_signal = cancel.clone();
            tokio::spawn(async move {
                if tokio::signal::ctrl_c().await.is_ok() {
                    warn!("Interrupted, finishing the current file");
                    on_signal.cancel();
                }
            });

            let pb = spinner(&format!("Indexing {}", path.display()), g.quiet);
            let options = IndexOptions {
                force,
                build_graph: !no_graph,
                cancel,
            };
            let result = engine.index(&path, options).await;
            if let Some(pb) = pb {
                pb.finish_and_clear();
            }
            let summary = result?;

            if g.json {
                print_json(&summary)?;
            } else {
                println!(
                    "Indexed {} files ({} unchanged, {} removed): {} chunks in {} files [{}]",
                    summary.files_indexed,
                    summary.files_unchanged,
                    summary.files_removed,
                    summary.chunk_count,
                    summary.file_count,
                    summary.languages.join(", "),
                );
                if let Some(graph) = &summary.graph {
                    println!("Call graph: {} symbols, {} edges", graph.node_count, graph.edge_count);
                }
                for failure in &summary.failures {
                    println!("  failed: {} ({})", failure.path, failure.reason);
                }
                if summary.cancelled {
                    println!("Indexing was cancelled; the collection is partially updated.");
                }
            }
        }
        Commands::Search(args) => {
            let options = args.options(engine.config());
            let response = engine.retrieve(&args.query, &options).await?;
            if g.json {
                print_json(&response)?;
            } else {
                print_response(&response);
            }
        }
        Commands::Feedback {
            query,
            chunk_id,
            event,
            rank,
        } => {
            engine.record_feedback(&query, &chunk_id, event, rank).await?;
            info!("Recorded {event} for {chunk_id}");
        }
        Commands::History { query, chunk_id } => {
            let events = engine.feedback_history(&query, &chunk_id).await?;
            if g.json {
                print_json(&events)?;
            } else if events.is_empty() {
                println!("No feedback for {chunk_id} under \"{query}\"");
            } else {
                for event in &events {
                    let rank = event.observed_rank.map_or_else(|| "-".to_string(), |r| r.to_string());
                    println!("{}  {:<10}  rank {rank}", event.timestamp.to_rfc3339(), event.event_type.as_str());
                }
            }
        }
        Commands::Status => {
            let status = engine.status();
            if g.json {
                print_json(&status)?;
            } else {
                println!("Collection:   {}", status.collection);
                if let Some(root) = &status.project_root {
                    println!("Project root: {}", root.display());
                }
                println!("Chunks:       {} ({} embedded)", status.chunk_count, status.embedded_chunks);
                println!("Files:        {}", status.file_count);
                println!("Languages:    {}", status.languages.join(", "));
                if status.graph_built {
                    println!("Call graph:   {} symbols, {} edges", status.graph_nodes, status.graph_edges);
                } else {
                    println!("Call graph:   not built");
                }
                println!("Feedback:     {} events", status.feedback_events);
            }
        }
        Commands::Cleanup => {
            let summary = engine.cleanup_feedback().await?;
            if g.json {
                print_json(&summary)?;
            } else {
                println!(
                    "Rolled up {} events into {} aggregates",
                    summary.events_rolled_up, summary.aggregates_written
                );
            }
        }
    }
    Ok(())
}
