//! Wakepro CLI
//!
//! Replays group chat traffic through the wake engine and inspects the
//! configuration and relevance scorer.

mod logging;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use serde::Deserialize;
use serde_json::json;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, BufReader};
use tokio::sync::broadcast;
use tracing::{error, info, warn};
use wakepro_config::Config;
use wakepro_core::{
    LexiconSentiment, NeutralSentiment, SentimentScorer, StateStore, WakeEngine, WakeRuntime,
};
use wakepro_ipc::{Envelope, EventBus};
use wakepro_relevance::RelevanceEngine;

#[derive(Parser)]
#[command(name = "wakepro")]
#[command(about = "Wake, silence and merge arbitration for group chat agents", long_about = None)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Config file path
    #[arg(short, long)]
    config: Option<String>,

    /// Log level (overrides the config file)
    #[arg(short, long)]
    log_level: Option<String>,
}

#[derive(Subcommand)]
enum Commands {
    /// Replay JSONL envelopes and print one decision per inbound message
    Run {
        /// Input file (stdin if omitted)
        #[arg(short, long)]
        input: Option<PathBuf>,
    },

    /// Load and validate the configuration
    CheckConfig,

    /// Score a message against candidate replies on a fresh corpus
    Similarity {
        /// Candidate reply (repeatable)
        #[arg(short, long = "against", required = true)]
        against: Vec<String>,

        text: String,
    },
}

/// One line of a replay file: an envelope plus an optional delay before it
/// is published.
#[derive(Debug, Deserialize)]
struct ReplayLine {
    #[serde(default)]
    after_ms: u64,
    #[serde(flatten)]
    envelope: Envelope,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = load_config(cli.config.as_deref())?;
    let log_level = cli
        .log_level
        .clone()
        .or_else(|| config.core.log_level.clone())
        .unwrap_or_else(|| "info".to_string());

    match cli.command {
        Commands::Run { input } => {
            let log_dir = get_data_dir(&config).map(|dir| dir.join("logs"));
            let _logging_guard = logging::init_logging(log_dir.as_deref(), &log_level)?;
            run(config, input.as_deref()).await?;
        }

        Commands::CheckConfig => {
            let _logging_guard = logging::init_logging(None, &log_level)?;
            print_config_summary(&config);
        }

        Commands::Similarity { against, text } => {
            let _logging_guard = logging::init_logging(None, &log_level)?;
            let engine = RelevanceEngine::new(&config.relevance);
            let mut corpus = engine.new_corpus();
            let score = engine.similarity(&mut corpus, &text, &against);
            println!(
                "{}",
                json!({ "model": engine.model(), "score": score, "candidates": against.len() })
            );
        }
    }

    Ok(())
}

/// An explicit path must load; the default path is used only if it exists.
fn load_config(config_path: Option<&str>) -> Result<Config> {
    if let Some(path) = config_path {
        return Config::load(path).with_context(|| format!("Failed to load config {}", path));
    }
    match Config::default_path() {
        Some(path) if path.exists() => Config::load(&path)
            .with_context(|| format!("Failed to load config {}", path.display())),
        _ => Ok(Config::default()),
    }
}

fn get_data_dir(config: &Config) -> Option<PathBuf> {
    config
        .core
        .data_dir
        .as_ref()
        .map(PathBuf::from)
        .or_else(|| dirs::data_dir().map(|dir| dir.join("wakepro")))
}

fn build_engine(config: &Config) -> Arc<WakeEngine> {
    let store = Arc::new(StateStore::from_config(config));
    let sentiment: Arc<dyn SentimentScorer> = if config.sentiment.is_empty() {
        Arc::new(NeutralSentiment)
    } else {
        Arc::new(LexiconSentiment::new(&config.sentiment))
    };
    Arc::new(WakeEngine::new(config, store, sentiment))
}

async fn run(config: Config, input: Option<&Path>) -> Result<()> {
    let bus = EventBus::new();
    let runtime = WakeRuntime::new(build_engine(&config), &bus);
    let mut decisions = bus.outbound_subscribe();

    let printer = tokio::spawn(async move {
        loop {
            match decisions.recv().await {
                Ok(decision) => match serde_json::to_string(&decision) {
                    Ok(line) => println!("{}", line),
                    Err(e) => error!("Failed to encode decision {}: {}", decision.trace_id, e),
                },
                Err(broadcast::error::RecvError::Closed) => break,
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    warn!("Decision printer lagged by {} decisions", n);
                }
            }
        }
    });
    let runtime = tokio::spawn(runtime.run());

    let reader: Box<dyn AsyncBufRead + Unpin + Send> = match input {
        Some(path) => {
            let file = tokio::fs::File::open(path)
                .await
                .with_context(|| format!("Failed to open {}", path.display()))?;
            Box::new(BufReader::new(file))
        }
        None => Box::new(BufReader::new(tokio::io::stdin())),
    };

    let published = replay(reader, &bus).await?;
    info!("Replayed {} envelope(s), waiting for open merge sessions", published);

    drop(bus);
    runtime.await.context("Runtime task failed")?;
    printer.await.context("Printer task failed")?;
    Ok(())
}

async fn replay(reader: Box<dyn AsyncBufRead + Unpin + Send>, bus: &EventBus) -> Result<usize> {
    let mut lines = reader.lines();
    let mut line_no = 0;
    let mut published = 0;

    while let Some(line) = lines.next_line().await? {
        line_no += 1;
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }

        let entry: ReplayLine = match serde_json::from_str(line) {
            Ok(entry) => entry,
            Err(e) => {
                warn!("Skipping line {}: {}", line_no, e);
                continue;
            }
        };

        if entry.after_ms > 0 {
            tokio::time::sleep(Duration::from_millis(entry.after_ms)).await;
        }
        bus.publish(entry.envelope)?;
        published += 1;
        // Let the runtime pick the envelope up before the next one.
        tokio::task::yield_now().await;
    }

    Ok(published)
}

fn print_config_summary(config: &Config) {
    let on_off = |enabled: bool| if enabled { "on" } else { "off" };

    println!("Configuration OK");
    println!(
        "  filters: {} whitelisted group(s), {} blacklisted group(s), {} blacklisted user(s), {} forbidden word(s), builtin block {}",
        config.filters.group_whitelist.len(),
        config.filters.group_blacklist.len(),
        config.filters.user_blacklist.len(),
        config.filters.forbidden_words.len(),
        on_off(config.filters.block_builtin)
    );
    println!(
        "  wake: {} keyword(s), cooldown policy {:?}, extend {:?}",
        config.wake.keywords().len(),
        config.wake.cooldown_policy,
        config.wake.extend_window()
    );
    println!(
        "  merge: {}",
        match config.merge.delay() {
            Some(delay) => format!(
                "on, delay {:?}, cap {}, request cooldown {:?}",
                delay,
                config.merge.max_buffered,
                config.merge.request_cooldown()
            ),
            None => "off".to_string(),
        }
    );
    println!(
        "  relevance: {:?}, window {}",
        config.relevance.model, config.relevance.history_limit
    );
    println!(
        "  sentiment: {}",
        if config.sentiment.is_empty() {
            "neutral"
        } else {
            "lexicon"
        }
    );
}
