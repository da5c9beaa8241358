//! Inferlink CLI
//!
//! Command-line interface for the inference platform.
//!
//! # Usage
//!
//! ```bash
//! # List the inferences of a model for a patient
//! inferlink inferences --model-id m1 --patient-mrn 1
//!
//! # Also download every segmentation
//! inferlink inferences --model-id m1 --patient-mrn 1 --download-dir ./segmentations
//!
//! # Show the effective configuration
//! inferlink config
//! ```

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use inferlink_client::{Inference, InferenceClient};
use tracing::{debug, info};
use tracing_subscriber::{fmt, EnvFilter};

mod config;

use config::{LoadedConfig, Overrides};

#[derive(Parser)]
#[command(name = "inferlink")]
#[command(about = "Query the inference platform")]
#[command(version)]
struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Configuration file (defaults to the platform config directory)
    #[arg(long, global = true, value_name = "PATH")]
    config: Option<PathBuf>,

    /// Identity declared in signing assertions
    #[arg(long, global = true, env = "INFERLINK_IDENTITY")]
    identity: Option<String>,

    /// Path to a PEM-encoded RSA private key
    #[arg(long, global = true, env = "INFERLINK_PRIVATE_KEY_FILE", value_name = "PATH")]
    private_key_file: Option<PathBuf>,

    /// PEM-encoded RSA private key
    #[arg(
        long,
        global = true,
        env = "INFERLINK_PRIVATE_KEY",
        hide_env_values = true,
        conflicts_with = "private_key_file"
    )]
    private_key: Option<String>,

    /// Base URL of the platform API
    #[arg(long, global = true, env = "INFERLINK_BASE_URL")]
    base_url: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List the inferences of a model for a patient
    Inferences {
        /// Model identifier
        #[arg(long)]
        model_id: String,

        /// Patient medical record number
        #[arg(long)]
        patient_mrn: String,

        /// Download segmentations into this directory
        #[arg(long, value_name = "DIR")]
        download_dir: Option<PathBuf>,

        /// Output format
        #[arg(short, long, value_enum, default_value_t = OutputFormat::Text)]
        format: OutputFormat,
    },

    /// Print the effective configuration
    Config,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum OutputFormat {
    Text,
    Json,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    let loaded = config::load_config(cli.config.as_deref())?;
    if let Some(path) = &loaded.path {
        debug!("Loaded configuration from {:?}", path);
    }

    let overrides = Overrides {
        identity: cli.identity,
        private_key_file: cli.private_key_file,
        private_key: cli.private_key,
        base_url: cli.base_url,
    };
    let loaded = LoadedConfig {
        config: loaded.config.apply(overrides),
        path: loaded.path,
    };

    match cli.command {
        Commands::Inferences {
            model_id,
            patient_mrn,
            download_dir,
            format,
        } => list_inferences(&loaded, &model_id, &patient_mrn, download_dir.as_deref(), format).await,
        Commands::Config => show_config(&loaded),
    }
}

/// Logs go to stderr so JSON output on stdout stays machine-readable.
fn init_logging(verbose: bool) {
    let default_level = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_level));

    fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

async fn list_inferences(
    loaded: &LoadedConfig,
    model_id: &str,
    patient_mrn: &str,
    download_dir: Option<&Path>,
    format: OutputFormat,
) -> Result<()> {
    let client_config = loaded.config.to_client_config()?;
    let client = InferenceClient::new(client_config).context("Failed to create client")?;

    let inferences = match download_dir {
        Some(dir) => {
            tokio::fs::create_dir_all(dir)
                .await
                .with_context(|| format!("Failed to create download directory {:?}", dir))?;
            let inferences = client
                .get_inferences_with_segmentations(model_id, patient_mrn, dir)
                .await
                .with_context(|| format!("Failed to fetch inferences for model {}", model_id))?;
            info!("Segmentations saved under {:?}", dir);
            inferences
        }
        None => client
            .get_inferences(model_id, patient_mrn)
            .await
            .with_context(|| format!("Failed to fetch inferences for model {}", model_id))?,
    };

    match format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&inferences)?),
        OutputFormat::Text => print_inferences(model_id, patient_mrn, &inferences),
    }
    Ok(())
}

fn print_inferences(model_id: &str, patient_mrn: &str, inferences: &[Inference]) {
    println!(
        "{} inference(s) for model {} / patient {}",
        inferences.len(),
        model_id,
        patient_mrn
    );
    for (index, inference) in inferences.iter().enumerate() {
        println!(
            "  [{}] {} segmentation(s)",
            index,
            inference.segmentation_presigned_urls.len()
        );
        for url in &inference.segmentation_presigned_urls {
            println!("      {}", url);
        }
    }
}

fn show_config(loaded: &LoadedConfig) -> Result<()> {
    match &loaded.path {
        Some(path) => println!("# Loaded from {}", path.display()),
        None => match config::default_config_path() {
            Some(path) => println!("# No config file found (looked for {})", path.display()),
            None => println!("# No config file found"),
        },
    }

    let printed = toml::to_string_pretty(&loaded.config.redacted())
        .context("Failed to serialize configuration")?;
    print!("{}", printed);

    if let Err(e) = loaded.config.to_client_config() {
        println!("# Configuration is incomplete: {:#}", e);
    }
    Ok(())
}
