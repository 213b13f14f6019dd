#![forbid(unsafe_code)]

mod commands;
mod config;
mod constants;
mod coordinator;
mod document;
mod observer;
mod persistence;
mod poller;
mod presenter;
mod scanner;
mod types;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;
use tracing::{info, Level as TraceLevel};
use tracing_subscriber::FmtSubscriber;
use url::Url;

use config::Settings;
use coordinator::Suite;
use persistence::{FileBackend, MemoryBackend, StateBackend, StateStore};
use poller::AnnouncementPoller;
use presenter::{ConsolePresenter, render_assets};
use scanner::AssetScanner;

#[derive(Debug, Parser)]
#[command(
    name = "media-audit",
    version,
    about = "Inspect a document's media elements and follow operator announcements"
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Scan an HTML document once and print its media assets
    Scan {
        file: PathBuf,
        /// Base URL relative sources resolve against
        #[arg(long)]
        base_url: Option<Url>,
        /// Print the snapshot as JSON
        #[arg(long)]
        json: bool,
    },
    /// Watch a document, poll announcements and take commands from stdin
    Run {
        file: PathBuf,
        #[arg(long)]
        base_url: Option<Url>,
        /// Keep state in memory only
        #[arg(long)]
        no_persist: bool,
    },
    /// Print the persisted panel state
    State,
    /// Flip the persisted minimized flag
    Toggle,
}

fn init_logging() -> Result<()> {
    // Parse log level from environment variable
    let log_level = match std::env::var(constants::env::LOG_LEVEL)
        .unwrap_or_else(|_| "info".to_string())
        .to_lowercase()
        .as_str()
    {
        "trace" => TraceLevel::TRACE,
        "debug" => TraceLevel::DEBUG,
        "warn" => TraceLevel::WARN,
        "error" => TraceLevel::ERROR,
        _ => TraceLevel::INFO,
    };

    // stdout carries command output
    let subscriber = FmtSubscriber::builder()
        .with_max_level(log_level)
        .with_writer(std::io::stderr)
        .finish();

    tracing::subscriber::set_global_default(subscriber).context("Failed to install log subscriber")
}

fn open_store(settings: &Settings, persist: bool) -> StateStore {
    let backend: Box<dyn StateBackend> = if persist {
        let dir = settings.resolved_state_dir();
        info!(dir = %dir.display(), "Using file-backed state");
        Box::new(FileBackend::new(dir))
    } else {
        info!("Using in-memory state");
        Box::new(MemoryBackend::new())
    };
    StateStore::open(backend)
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    init_logging()?;
    let cli = Cli::parse();

    match cli.command {
        Commands::Scan { file, base_url, json } => {
            let doc = document::html::load_document(&file, base_url)?;
            let snapshot = AssetScanner::new().scan(&doc);
            if json {
                let text = serde_json::to_string_pretty(&snapshot)
                    .context("Failed to serialize snapshot")?;
                println!("{text}");
            } else {
                print!("{}", render_assets(&snapshot));
            }
        }
        Commands::Run { file, base_url, no_persist } => {
            let settings = Settings::load();
            info!(settings = ?settings, "Loaded settings");

            let doc = document::html::load_document(&file, base_url)?;
            let store = Arc::new(Mutex::new(open_store(&settings, !no_persist)));
            let poller = AnnouncementPoller::from_settings(&settings, store.clone())?;
            let suite = Suite::new(doc, store, poller, ConsolePresenter::new());

            let (command_tx, command_rx) = mpsc::unbounded_channel();
            let _listener = commands::spawn_listener(command_tx);
            suite.run(command_rx).await?;
        }
        Commands::State => {
            let settings = Settings::load();
            let store = open_store(&settings, true);
            let text = serde_json::to_string_pretty(store.state())
                .context("Failed to serialize state")?;
            println!("{text}");
        }
        Commands::Toggle => {
            let settings = Settings::load();
            let mut store = open_store(&settings, true);
            let minimized = store.toggle_minimized();
            println!("minimized: {minimized}");
        }
    }
    Ok(())
}
