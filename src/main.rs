//! # ctx — the code-context CLI
//!
//! Thin clap front-end over the [`ctx_engine`] library. Commands map 1:1 to
//! engine operations:
//!
//! | Command | Operation |
//! |---------|-----------|
//! | `ctx init [path]` | create `.ctx/`, write default config, full index |
//! | `ctx query <q>` | multi-strategy search with fusion and re-ranking |
//! | `ctx ask <q>` | planner-driven search (classifier planner by default) |
//! | `ctx watch [path]` | debounced re-indexing on file changes |
//! | `ctx status [path]` | index statistics |
//! | `ctx config <show\|get\|set\|reset>` | config management |
//!
//! Exit codes: `0` success, `1` expected (typed) error, `2` unexpected.
//! `--verbose` or `CTX_DEBUG=1` turns on debug diagnostics on stderr.

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use ctx_engine::engine::{self, QueryOptions};
use ctx_engine::error::CoreError;
use ctx_engine::indexer::IndexOptions;
use ctx_engine::search::{SearchResult, Strategy};
use ctx_engine::{config, watch, ClassifierPlanner, DefaultEmbedderFactory};

/// ctx — local code-context engine for AI coding agents.
#[derive(Parser)]
#[command(
    name = "ctx",
    about = "Local code-context engine: incremental indexing and hybrid code search",
    version
)]
struct Cli {
    /// Enable debug diagnostics on stderr.
    #[arg(long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize the project: create `.ctx/`, write defaults, build the index.
    Init {
        /// Project root (defaults to the current directory).
        path: Option<PathBuf>,

        /// Skip the embedding phase (index stays searchable via fts/ast/path).
        #[arg(long)]
        no_vectors: bool,
    },

    /// Search the index with the hybrid strategy pipeline.
    Query {
        /// The search query.
        query: String,

        /// Maximum results to return.
        #[arg(long)]
        limit: Option<usize>,

        /// Comma-separated strategy set (vector,fts,ast,path,dependency).
        #[arg(long)]
        strategy: Option<String>,

        /// Restrict results to one language tag.
        #[arg(long)]
        language: Option<String>,

        /// Output format.
        #[arg(long, default_value = "text")]
        format: String,

        /// Never run the vector strategy.
        #[arg(long)]
        no_vectors: bool,
    },

    /// Planner-driven search; uses the classifier planner (no LLM required).
    Ask {
        /// The question or query.
        query: String,

        /// Maximum results to return.
        #[arg(long)]
        limit: Option<usize>,

        /// Output format.
        #[arg(long, default_value = "text")]
        format: String,

        /// Hide the plan rationale.
        #[arg(long)]
        no_explain: bool,
    },

    /// Watch the project and re-index on changes.
    Watch {
        /// Project root (defaults to the current directory).
        path: Option<PathBuf>,

        /// Run a full index before watching.
        #[arg(long)]
        init: bool,

        /// Debounce window in milliseconds (overrides config).
        #[arg(long)]
        debounce: Option<u64>,
    },

    /// Show index statistics.
    Status {
        /// Project root (defaults to the current directory).
        path: Option<PathBuf>,

        /// Output format.
        #[arg(long, default_value = "text")]
        format: String,
    },

    /// Manage project configuration.
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand)]
enum ConfigAction {
    /// Print the full effective configuration.
    Show,
    /// Read one value by dotted key (e.g. `embedder.model`).
    Get { key: String },
    /// Set one value by dotted key. JSON values are parsed, else stored as strings.
    Set { key: String, value: String },
    /// Rewrite the configuration with defaults.
    Reset,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    match run(cli.command).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("error: {}", err);
            let mut source = std::error::Error::source(&err);
            while let Some(cause) = source {
                eprintln!("  caused by: {}", cause);
                source = cause.source();
            }
            ExitCode::from(err.exit_code() as u8)
        }
    }
}

fn init_logging(verbose: bool) {
    let debug = verbose || std::env::var("CTX_DEBUG").as_deref() == Ok("1");
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        if debug {
            EnvFilter::new("ctx_engine=debug,ctx=debug,warn")
        } else {
            EnvFilter::new("warn")
        }
    });
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

async fn run(command: Commands) -> ctx_engine::Result<()> {
    let factory = DefaultEmbedderFactory;

    match command {
        Commands::Init { path, no_vectors } => {
            let root = resolve_root(path)?;
            let options = IndexOptions {
                skip_embedding: no_vectors,
                ..IndexOptions::default()
            };
            let stats = engine::index(&root, &factory, options).await?;
            println!("initialized {}", root.display());
            print_index_stats(&stats);
            Ok(())
        }

        Commands::Query {
            query,
            limit,
            strategy,
            language,
            format,
            no_vectors,
        } => {
            let root = resolve_root(None)?;
            let options = QueryOptions {
                limit,
                strategies: parse_strategies(strategy.as_deref())?,
                language,
                skip_vectors: no_vectors,
                ..QueryOptions::default()
            };
            let results = engine::query(&root, &query, &options, &factory).await?;
            print_results(&results, &format)?;
            Ok(())
        }

        Commands::Ask {
            query,
            limit,
            format,
            no_explain,
        } => {
            let root = resolve_root(None)?;
            let options = QueryOptions {
                limit,
                ..QueryOptions::default()
            };
            let outcome =
                engine::ask(&root, &query, &options, &ClassifierPlanner, &factory).await?;
            if !no_explain && format == "text" {
                if let Some(rationale) = &outcome.plan.rationale {
                    let names: Vec<&str> =
                        outcome.plan.strategies.iter().map(|s| s.as_str()).collect();
                    println!("plan: {} [{}]", rationale, names.join(", "));
                    println!();
                }
            }
            print_results(&outcome.results, &format)?;
            Ok(())
        }

        Commands::Watch {
            path,
            init,
            debounce,
        } => {
            let root = resolve_root(path)?;
            watch::run(&root, &factory, debounce, init).await
        }

        Commands::Status { path, format } => {
            let root = resolve_root(path)?;
            let report = engine::status(&root).await?;
            if format == "json" {
                println!(
                    "{}",
                    serde_json::to_string_pretty(&report)
                        .map_err(|e| CoreError::SearchFailed(e.to_string()))?
                );
                return Ok(());
            }
            println!("ctx — index status");
            println!();
            println!("  files:    {}", report.stats.files);
            println!("  chunks:   {}", report.stats.chunks);
            println!("  vectors:  {}", report.stats.vectors);
            println!("  db size:  {}", format_bytes(report.db_size_bytes));
            if let Some(ts) = report.stats.last_indexed {
                let when = chrono::DateTime::from_timestamp(ts, 0)
                    .map(|dt| dt.format("%Y-%m-%d %H:%M:%S UTC").to_string())
                    .unwrap_or_else(|| ts.to_string());
                println!("  indexed:  {}", when);
            }
            if !report.stats.by_language.is_empty() {
                println!();
                println!("  languages:");
                for (language, count) in &report.stats.by_language {
                    println!("    {:<12} {}", language, count);
                }
            }
            Ok(())
        }

        Commands::Config { action } => {
            let root = resolve_root(None)?;
            match action {
                ConfigAction::Show => {
                    let loaded = config::load(&root)?;
                    println!(
                        "{}",
                        serde_json::to_string_pretty(&loaded)
                            .map_err(|e| CoreError::ConfigInvalid(e.to_string()))?
                    );
                }
                ConfigAction::Get { key } => {
                    let value = config::get_value(&root, &key)?;
                    println!("{}", value);
                }
                ConfigAction::Set { key, value } => {
                    config::set_value(&root, &key, &value)?;
                    println!("{} = {}", key, config::get_value(&root, &key)?);
                }
                ConfigAction::Reset => {
                    config::reset(&root)?;
                    println!("configuration reset to defaults");
                }
            }
            Ok(())
        }
    }
}

fn resolve_root(path: Option<PathBuf>) -> ctx_engine::Result<PathBuf> {
    match path {
        Some(path) => Ok(path),
        None => std::env::current_dir().map_err(CoreError::from),
    }
}

fn parse_strategies(raw: Option<&str>) -> ctx_engine::Result<Option<Vec<Strategy>>> {
    let Some(raw) = raw else { return Ok(None) };
    let strategies = raw
        .split(',')
        .filter(|name| !name.trim().is_empty())
        .map(Strategy::parse)
        .collect::<ctx_engine::Result<Vec<_>>>()?;
    if strategies.is_empty() {
        return Ok(None);
    }
    Ok(Some(strategies))
}

fn print_results(results: &[SearchResult], format: &str) -> ctx_engine::Result<()> {
    if format == "json" {
        println!(
            "{}",
            serde_json::to_string_pretty(results)
                .map_err(|e| CoreError::SearchFailed(e.to_string()))?
        );
        return Ok(());
    }

    if results.is_empty() {
        println!("No results.");
        return Ok(());
    }

    for (index, result) in results.iter().enumerate() {
        let name = result.name.as_deref().unwrap_or("");
        println!(
            "{}. [{:.2}] {}:{}-{}  {} {}",
            index + 1,
            result.score,
            result.file_path,
            result.line_start,
            result.line_end,
            result.chunk_type,
            name
        );
        let excerpt: String = result
            .text
            .lines()
            .take(3)
            .map(|line| format!("    | {}", line))
            .collect::<Vec<_>>()
            .join("\n");
        if !excerpt.is_empty() {
            println!("{}", excerpt);
        }
        println!();
    }
    Ok(())
}

fn print_index_stats(stats: &ctx_engine::IndexStats) {
    println!("  discovered: {} files", stats.files_discovered);
    println!(
        "  added: {}  modified: {}  deleted: {}  unchanged: {}",
        stats.files_added, stats.files_modified, stats.files_deleted, stats.files_unchanged
    );
    println!("  chunks: {}", stats.chunks_created);
    println!("  vectors: {}", stats.vectors_created);
    if !stats.by_language.is_empty() {
        let mut languages: Vec<_> = stats.by_language.iter().collect();
        languages.sort_by(|a, b| b.1.cmp(a.1).then(a.0.cmp(b.0)));
        let summary: Vec<String> = languages
            .iter()
            .map(|(language, count)| format!("{} {}", language, count))
            .collect();
        println!("  languages: {}", summary.join(", "));
    }
    println!("  took {}ms", stats.duration_ms);
}

fn format_bytes(bytes: u64) -> String {
    const UNITS: &[&str] = &["B", "KiB", "MiB", "GiB"];
    let mut value = bytes as f64;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    if unit == 0 {
        format!("{} {}", bytes, UNITS[unit])
    } else {
        format!("{:.1} {}", value, UNITS[unit])
    }
}
