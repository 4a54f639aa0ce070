use anyhow::Context;
use clap::{Parser, Subcommand};
use medcompress::processing::{self, Instructions, RunOptions};
use medcompress::storage::DocumentStore;
use medcompress::{config, logging};
use std::path::PathBuf;
use std::time::Duration;

/// Summarize extracted medical guidelines held in the document store.
#[derive(Debug, Parser)]
#[command(name = "medcompress", version, about)]
struct Cli {
    /// Log at debug level unless `RUST_LOG` says otherwise.
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Claim and summarize documents until interrupted.
    Run {
        /// Stop after this many claim cycles.
        #[arg(long)]
        cycles: Option<usize>,
        /// Exit as soon as no eligible document is left.
        #[arg(long)]
        stop_when_idle: bool,
        /// Seconds to wait before polling again when idle.
        #[arg(long, default_value_t = 30)]
        idle_secs: u64,
    },
    /// Run a single claim cycle and print its outcome.
    Once,
    /// Print document counts per processing state.
    Status,
    /// Make terminally failed documents eligible again.
    ResetFailed,
    /// Summarize a local text file without touching the store.
    SummarizeFile {
        /// Plain-text input.
        path: PathBuf,
        /// Instruction for both stages instead of the built-in ones.
        #[arg(long)]
        prompt: Option<String>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    logging::init_tracing(if cli.verbose { "debug" } else { "info" });
    let config = config::init_config().context("Failed to load configuration")?;

    match cli.command {
        Command::Run {
            cycles,
            stop_when_idle,
            idle_secs,
        } => {
            let claimer = processing::connect_worker(config).await?;
            let snapshot = claimer
                .run(RunOptions {
                    max_cycles: cycles,
                    stop_when_idle,
                    idle_wait: Duration::from_secs(idle_secs),
                })
                .await;
            println!("{}", serde_json::to_string_pretty(&snapshot)?);
        }
        Command::Once => {
            let claimer = processing::connect_worker(config).await?;
            let outcome = claimer.claim_and_process().await;
            println!("{}", serde_json::to_string_pretty(&outcome)?);
        }
        Command::Status => {
            let store = open_store(&config.database_url).await?;
            let counts = store.status_counts().await?;
            println!("{}", serde_json::to_string_pretty(&counts)?);
        }
        Command::ResetFailed => {
            let store = open_store(&config.database_url).await?;
            let reset = store.reset_failed().await?;
            tracing::info!(documents = reset, "Reset failed documents");
            println!("{reset}");
        }
        Command::SummarizeFile { path, prompt } => {
            let text = tokio::fs::read_to_string(&path)
                .await
                .with_context(|| format!("Failed to read {}", path.display()))?;
            let reducer = processing::build_reducer(config)?;
            let report = reducer
                .reduce(&text, &Instructions::from_stored_prompt(prompt))
                .await;
            tracing::info!(
                rounds = report.rounds,
                chunks = report.chunks_total,
                failed_chunks = report.chunks_failed,
                best_effort = report.best_effort,
                "Reduction finished"
            );
            match report.summary {
                Some(summary) => println!("{summary}"),
                None => anyhow::bail!("No summary produced for {}", path.display()),
            }
        }
    }

    Ok(())
}

async fn open_store(database_url: &str) -> anyhow::Result<DocumentStore> {
    let store = DocumentStore::connect(database_url).await?;
    store.ensure_schema().await?;
    Ok(store)
}
