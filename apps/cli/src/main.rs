//! abllama CLI - run and fine-tune causal language models
//!
//! This CLI provides an `abllama` command with two subcommands:
//! `generate` (interactive or batch generation) and `train` (low-rank
//! adapter fine-tuning).

mod commands;
mod config;

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing::Level;
use tracing_subscriber::{EnvFilter, FmtSubscriber};

/// abllama - generation and LoRA fine-tuning driver
#[derive(Parser, Debug)]
#[command(
    name = "abllama",
    author,
    version,
    about = "abllama - generation and LoRA fine-tuning for causal language models"
)]
struct Args {
    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long, default_value = "info", global = true)]
    log_level: String,

    /// Configuration file (layered over ./abllama.toml and ~/.abllama/config.toml)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Engine override (defaults to `backend.engine` from the configuration)
    #[arg(short, long, global = true)]
    engine: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Generate text from a model
    ///
    /// Runs either an interactive prompt loop (`--interactive`) or a batch
    /// over a prompt file (`--input-file` plus `--output-file`).
    Generate {
        /// Model directory
        #[arg(short, long)]
        model: PathBuf,

        /// Read prompts from the terminal until a blank line
        #[arg(short, long)]
        interactive: bool,

        /// Prompt file, one prompt per line
        #[arg(long)]
        input_file: Option<PathBuf>,

        /// Output file, one generation per line
        #[arg(long)]
        output_file: Option<PathBuf>,
    },

    /// Fine-tune a model with a low-rank adapter
    ///
    /// Splits the dataset into train and eval sets, trains the adapter and
    /// writes it, its configuration and a training manifest to the output
    /// directory.
    Train {
        /// Base model directory
        #[arg(short, long)]
        model: PathBuf,

        /// Training dataset (.csv with a header or .jsonl)
        #[arg(long)]
        input_file: Option<PathBuf>,

        /// Output directory for the adapter and checkpoints
        #[arg(long)]
        output_dir: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    // Initialize tracing
    let level = match args.log_level.as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    // Diagnostics go to stderr; stdout carries the interactive session.
    if std::env::var_os(EnvFilter::DEFAULT_ENV).is_some() {
        let subscriber = FmtSubscriber::builder()
            .with_env_filter(EnvFilter::from_default_env())
            .with_writer(std::io::stderr)
            .without_time()
            .with_target(false)
            .finish();
        tracing::subscriber::set_global_default(subscriber)?;
    } else {
        let subscriber = FmtSubscriber::builder()
            .with_max_level(level)
            .with_writer(std::io::stderr)
            .without_time()
            .with_target(false)
            .finish();
        tracing::subscriber::set_global_default(subscriber)?;
    }

    let options = config::GlobalOptions { config: args.config, engine: args.engine };

    match args.command {
        Command::Generate { model, interactive, input_file, output_file } => {
            commands::generate::execute(&options, model, interactive, input_file, output_file).await
        }
        Command::Train { model, input_file, output_dir } => {
            commands::train::execute(&options, model, input_file, output_dir).await
        }
    }
}
