//! Pursuit CLI, the main entry point.
//!
//! Commands:
//! - `onboard`    Write a default config file
//! - `ask`        One question, or an interactive thread
//! - `serve`      Start the HTTP gateway
//! - `calibrate`  Fit the sparse curve and sweep the answer threshold

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use pursuit_config::AppConfig;

mod commands;

#[derive(Parser)]
#[command(
    name = "pursuit",
    about = "Pursuit: multi-turn question answering over a published corpus",
    version
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Config file (defaults to ~/.pursuit/config.toml)
    #[arg(short, long, global = true, env = "PURSUIT_CONFIG")]
    config: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Write a default configuration file
    Onboard,

    /// Ask a question; without a message, read questions from stdin
    Ask {
        /// The question
        message: Option<String>,

        /// Continue an existing thread
        #[arg(short, long)]
        thread: Option<String>,

        /// Print the full response as JSON
        #[arg(long)]
        json: bool,
    },

    /// Start the HTTP gateway
    Serve {
        /// Override the port
        #[arg(short, long)]
        port: Option<u16>,

        /// Override the bind address
        #[arg(long)]
        host: Option<String>,
    },

    /// Calibrate retrieval against a labeled probe set
    Calibrate {
        /// JSONL file with one probe per line
        #[arg(long)]
        probes: PathBuf,

        /// Threshold sweep step
        #[arg(long, default_value_t = 0.05)]
        step: f64,

        /// Largest acceptable confident-but-wrong rate
        #[arg(long, default_value_t = 0.05)]
        max_fp: f64,

        /// Print the full report as JSON
        #[arg(long)]
        json: bool,
    },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    if let Commands::Onboard = cli.command {
        init_tracing(cli.verbose, "pretty");
        return commands::onboard::run(cli.config.as_deref());
    }

    let config = match &cli.config {
        Some(path) => AppConfig::load_from(path),
        None => AppConfig::load(),
    }
    .map_err(|e| format!("Failed to load config: {e}"))?;
    init_tracing(cli.verbose, &config.logging.format);

    match cli.command {
        Commands::Onboard => {}
        Commands::Ask { message, thread, json } => commands::ask::run(config, message, thread, json).await?,
        Commands::Serve { port, host } => commands::serve::run(config, port, host).await?,
        Commands::Calibrate {
            probes,
            step,
            max_fp,
            json,
        } => commands::calibrate::run(config, &probes, step, max_fp, json).await?,
    }

    Ok(())
}

fn init_tracing(verbose: bool, format: &str) {
    let filter = if verbose { "debug" } else { "info" };
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(filter));

    let builder = tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_writer(std::io::stderr)
        .with_target(false);
    if format == "json" {
        builder.json().init();
    } else {
        builder.init();
    }
}
