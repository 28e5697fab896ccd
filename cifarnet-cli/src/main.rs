//! cifarnet CLI: the CIFAR-10 course scripts as subcommands.
//!
//! Inspect the dataset, train and evaluate a model, classify a photograph,
//! and run the dropout, activation and optimizer sweeps.

mod commands;

use clap::Parser;
use std::path::PathBuf;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer};

/// cifarnet: convolutional image classification on CIFAR-10
#[derive(Parser, Debug)]
#[command(name = "cifarnet", version, about, long_about = None)]
struct Cli {
    /// Workspace directory (looked up for cifarnet.toml)
    #[arg(short, long, default_value = ".")]
    workspace: PathBuf,

    /// Configuration file path
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Directory holding the CIFAR-10 .bin batch files
    #[arg(long)]
    data_dir: Option<PathBuf>,

    /// Keep at most this many training images
    #[arg(long)]
    max_train: Option<usize>,

    /// Keep at most this many test images
    #[arg(long)]
    max_test: Option<usize>,

    /// Increase verbosity (-v, -vv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Suppress non-essential output
    #[arg(short, long)]
    quiet: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(clap::Subcommand, Debug)]
enum Commands {
    /// Print dataset shapes, class counts and pixel statistics
    Inspect,
    /// Build, train and evaluate a model, then save it
    Train {
        /// Architecture to build
        #[arg(short, long, value_enum)]
        architecture: Option<ArchitectureKind>,
        /// Dropout rate for the dropout architecture
        #[arg(long)]
        dropout_rate: Option<f32>,
        /// Hidden activation for the simple architecture
        #[arg(long)]
        activation: Option<String>,
        /// Output layer of the simple architecture
        #[arg(long, value_enum)]
        output: Option<OutputArg>,
        /// Optimizer: sgd, rmsprop or adam
        #[arg(long)]
        optimizer: Option<String>,
        #[arg(short, long)]
        epochs: Option<usize>,
        #[arg(short, long)]
        batch_size: Option<usize>,
        /// Do not write the model and history to the output directory
        #[arg(long)]
        no_save: bool,
    },
    /// Score a saved model on the test set
    Evaluate {
        /// Saved model path (defaults to the intro model in the output dir)
        #[arg(short, long)]
        model: Option<PathBuf>,
    },
    /// Classify a photograph with a saved model
    Predict {
        /// Image to classify (defaults to data.custom_image)
        image: Option<PathBuf>,
        /// Saved model path (defaults to the intro model in the output dir)
        #[arg(short, long)]
        model: Option<PathBuf>,
    },
    /// Run a hyperparameter sweep
    Sweep {
        #[arg(value_enum)]
        kind: SweepKind,
        /// Override the sweep's epoch budget
        #[arg(short, long)]
        epochs: Option<usize>,
    },
    /// Manage configuration
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(clap::ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
enum ArchitectureKind {
    Intro,
    Dropout,
    Simple,
}

#[derive(clap::ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
enum OutputArg {
    Softmax,
    Logits,
}

#[derive(clap::ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
enum SweepKind {
    Dropout,
    Activation,
    Optimizer,
}

#[derive(clap::Subcommand, Debug)]
enum ConfigAction {
    /// Write a default cifarnet.toml into the workspace
    Init,
    /// Show the merged configuration
    Show,
}

fn main() -> anyhow::Result<()> {
    // Load .env file if present
    let _ = dotenvy::dotenv();

    let cli = Cli::parse();

    let filter = match cli.verbose {
        0 if cli.quiet => "error",
        0 => "info",
        1 => "debug",
        _ => "trace",
    };

    let stderr_layer = tracing_subscriber::fmt::layer()
        .with_target(false)
        .with_writer(std::io::stderr)
        .with_filter(EnvFilter::new(filter));

    // JSON file layer for structured logging
    let log_dir = directories::ProjectDirs::from("dev", "cifarnet", "cifarnet")
        .map(|d| d.data_dir().join("logs"))
        .unwrap_or_else(|| PathBuf::from("."));
    let _ = std::fs::create_dir_all(&log_dir);
    let file_appender = tracing_appender::rolling::daily(&log_dir, "cifarnet.log");
    let (non_blocking, _guard) = tracing_appender::non_blocking(file_appender);
    let json_layer = tracing_subscriber::fmt::layer()
        .json()
        .with_writer(non_blocking)
        .with_filter(EnvFilter::new("debug"));

    tracing_subscriber::registry()
        .with(stderr_layer)
        .with(json_layer)
        .init();

    let workspace = cli
        .workspace
        .canonicalize()
        .unwrap_or_else(|_| std::env::current_dir().unwrap_or_else(|_| PathBuf::from(".")));

    let mut config = cifarnet_ml::load_config(Some(&workspace), cli.config.as_deref())
        .map_err(|e| anyhow::anyhow!("Configuration error: {}", e))?;

    if let Some(dir) = cli.data_dir {
        config.data.data_dir = dir;
    }
    if cli.max_train.is_some() {
        config.data.max_train_samples = cli.max_train;
    }
    if cli.max_test.is_some() {
        config.data.max_test_samples = cli.max_test;
    }

    commands::handle_command(cli.command, config, &workspace)
}
