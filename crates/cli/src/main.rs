//! TaskRAG CLI — the main entry point.
//!
//! Commands:
//! - `serve`   — Start the HTTP/WebSocket gateway (and Telegram, if enabled)
//! - `chat`    — Run one turn and stream the answer to stdout
//! - `config`  — Show the effective configuration or write a starter file

use std::path::{Path, PathBuf};

use clap::{Parser, Subcommand};
use taskrag_config::{AppConfig, ConfigError, LoggingConfig};

mod commands;

#[derive(Parser)]
#[command(
    name = "taskrag",
    about = "TaskRAG — conversational task assistant",
    version,
    author
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Config file (defaults to ~/.taskrag/config.toml)
    #[arg(short, long, global = true, env = "TASKRAG_CONFIG")]
    config: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the HTTP gateway (plus the Telegram relay when enabled)
    Serve {
        /// Override the port
        #[arg(short, long)]
        port: Option<u16>,
    },

    /// Send one message and stream the answer
    Chat {
        #[arg(short, long)]
        message: String,

        /// Continue an existing session (a new one is created otherwise)
        #[arg(short, long)]
        session: Option<String>,
    },

    /// Show configuration, or create a starter config file
    Config {
        /// Write a default config file
        #[arg(long)]
        init: bool,

        /// Overwrite an existing file with --init
        #[arg(long, requires = "init")]
        force: bool,
    },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    let config_path = cli
        .config
        .clone()
        .unwrap_or_else(|| AppConfig::config_dir().join("config.toml"));

    match cli.command {
        Commands::Config { init, force } => {
            init_tracing(cli.verbose, &LoggingConfig::default());
            commands::config_cmd::run(&config_path, init, force)?
        }
        Commands::Serve { port } => {
            let config = load_config(&config_path)?;
            init_tracing(cli.verbose, &config.logging);
            commands::serve::run(config, port).await?
        }
        Commands::Chat { message, session } => {
            let config = load_config(&config_path)?;
            init_tracing(cli.verbose, &config.logging);
            commands::chat::run(config, message, session).await?
        }
    }

    Ok(())
}

/// File values, then environment overrides, then validation.
fn load_config(path: &Path) -> Result<AppConfig, ConfigError> {
    let mut config = AppConfig::load_from(path)?;
    config.apply_overrides(|key| std::env::var(key).ok());
    config.validate()?;
    Ok(config)
}

/// `RUST_LOG` wins; otherwise `--verbose` or `logging.level`. Logs go to
/// stderr so `chat` output stays clean on stdout.
fn init_tracing(verbose: bool, logging: &LoggingConfig) {
    let default = if verbose { "debug" } else { logging.level.as_str() };
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default));

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr);

    if logging.json {
        builder.json().init();
    } else {
        builder.init();
    }
}
