//! Interlink command-line interface.
//!
//! Exit codes: 0 on success, 1 on a fatal startup error, 2 on invalid
//! configuration.

// Layer 1: Standard library imports
use std::path::PathBuf;
use std::process::ExitCode;

// Layer 2: Third-party crate imports
use clap::{Parser, Subcommand};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

// Layer 3: Internal module imports
use interlink_engine::config::{load_path, sample_config_json};
use interlink_engine::engine::{EngineConfig, ProductionEngine};

const EXIT_OK: u8 = 0;
const EXIT_FATAL: u8 = 1;
const EXIT_INVALID_CONFIG: u8 = 2;

/// Environment variable selecting the log filter (`info`, `debug`, ...).
const LOG_ENV: &str = "INTERLINK_LOG";
/// Environment variable selecting the log format (`text` or `json`).
const LOG_FORMAT_ENV: &str = "INTERLINK_LOG_FORMAT";

#[derive(Parser)]
#[command(
    name = "interlink",
    about = "Healthcare integration engine",
    version,
    propagate_version = true
)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run a production from a configuration file until shutdown.
    Run {
        /// Path to the production configuration (JSON).
        config: PathBuf,
    },
    /// Parse and validate a configuration, reporting errors.
    Validate {
        /// Path to the production configuration (JSON).
        config: PathBuf,
    },
    /// Write a sample configuration to the given path.
    Init {
        /// Destination path for the sample configuration.
        path: PathBuf,
    },
}

fn init_tracing() {
    let filter = EnvFilter::try_from_env(LOG_ENV).unwrap_or_else(|_| EnvFilter::new("info"));
    let json = std::env::var(LOG_FORMAT_ENV)
        .map(|v| v.eq_ignore_ascii_case("json"))
        .unwrap_or(false);

    if json {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .json()
            .init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }
}

async fn run(config_path: PathBuf) -> ExitCode {
    let engine = ProductionEngine::new(EngineConfig::default());

    if let Err(e) = engine.load(&config_path) {
        error!(error = %e, kind = e.kind(), "configuration rejected");
        return ExitCode::from(EXIT_INVALID_CONFIG);
    }

    if let Err(e) = engine.start().await {
        error!(error = %e, kind = e.kind(), "production failed to start");
        return ExitCode::from(EXIT_FATAL);
    }

    info!(
        production = %engine.production_name().unwrap_or_default(),
        "production running, press Ctrl-C to stop"
    );
    engine.wait_for_shutdown().await;
    ExitCode::from(EXIT_OK)
}

fn validate(config_path: PathBuf) -> ExitCode {
    match load_path(&config_path) {
        Ok(config) => {
            println!(
                "{}: ok ({} items, {} connections, {} rules)",
                config.name,
                config.items.len(),
                config.connections.len(),
                config.rules.len()
            );
            ExitCode::from(EXIT_OK)
        }
        Err(e) => {
            eprintln!("invalid configuration: {e}");
            ExitCode::from(EXIT_INVALID_CONFIG)
        }
    }
}

fn init(path: PathBuf) -> ExitCode {
    let sample = match sample_config_json() {
        Ok(sample) => sample,
        Err(e) => {
            eprintln!("sample generation failed: {e}");
            return ExitCode::from(EXIT_FATAL);
        }
    };
    if path.exists() {
        eprintln!("refusing to overwrite existing file: {}", path.display());
        return ExitCode::from(EXIT_FATAL);
    }
    match std::fs::write(&path, sample) {
        Ok(()) => {
            println!("sample configuration written to {}", path.display());
            ExitCode::from(EXIT_OK)
        }
        Err(e) => {
            eprintln!("write failed: {e}");
            ExitCode::from(EXIT_FATAL)
        }
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    init_tracing();
    let cli = Cli::parse();

    match cli.command {
        Command::Run { config } => run(config).await,
        Command::Validate { config } => validate(config),
        Command::Init { path } => init(path),
    }
}
