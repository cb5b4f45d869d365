//! Inference Adapter - Main Entry Point
//!
//! `inference-adapter <model_path> <request>` runs one request and writes a
//! single JSON envelope to stdout. Exit code 0 on success, 1 on any failure.

use anyhow::anyhow;
use clap::error::ErrorKind;
use clap::Parser;
use inference_adapter::{config, Adapter, AppConfig, ResponseEnvelope};
use std::path::PathBuf;
use tracing::{debug, info};

#[derive(Parser, Debug)]
#[command(name = "inference-adapter", version, about = "Run one inference request against a model file")]
struct Cli {
    /// Path to the model file
    model_path: PathBuf,

    /// Path to a JSON request file, or an inline JSON request
    request: String,
}

fn main() {
    let envelope = run();
    println!("{}", envelope.to_json());
    std::process::exit(envelope.exit_code());
}

fn run() -> ResponseEnvelope {
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(e) if matches!(e.kind(), ErrorKind::DisplayHelp | ErrorKind::DisplayVersion) => {
            // help and version go to stderr; stdout is reserved for the envelope
            eprint!("{}", e);
            std::process::exit(0);
        }
        Err(e) => {
            let err = anyhow!("{}", e.to_string().trim())
                .context("Expected <model_path> and <request> arguments");
            return ResponseEnvelope::from_error(&err);
        }
    };

    let config = match AppConfig::load() {
        Ok(config) => config,
        Err(err) => return ResponseEnvelope::from_error(&err),
    };
    if let Err(e) = config::init_logging(&config.logging) {
        eprintln!("{:#}", e);
    }

    info!(model = %cli.model_path.display(), "Starting inference adapter");
    debug!(config = ?config, "Configuration loaded");

    Adapter::new(&config).respond(&cli.model_path, &cli.request)
}
