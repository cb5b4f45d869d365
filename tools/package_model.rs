//! Model Packager
//!
//! Validates a model with the adapter's loader, hashes it and writes a
//! package directory with `model_metadata.json` and a copy of the model.

use anyhow::Result;
use clap::Parser;
use inference_adapter::config::AppConfig;
use inference_adapter::models::{DeclaredFormat, ModelLoader};
use inference_adapter::packaging::{package_model, Framework, PackageOptions, MODEL_TYPES};
use inference_adapter::types::InputSize;
use std::path::PathBuf;
use tracing::{error, info};

#[derive(Parser, Debug)]
#[command(name = "package-model", version, about = "Package a model with metadata for distribution")]
struct Args {
    /// Path to the model file
    model_path: PathBuf,

    /// Output directory for the packaged model
    output_dir: PathBuf,

    /// Model name
    #[arg(long)]
    name: String,

    /// Model description
    #[arg(long)]
    description: String,

    /// Type of model
    #[arg(long, value_parser = MODEL_TYPES)]
    model_type: String,

    /// ML framework used
    #[arg(long, value_enum)]
    framework: Framework,

    /// Description of expected input format
    #[arg(long)]
    input_format: Option<String>,

    /// Description of model output format
    #[arg(long)]
    output_format: Option<String>,

    /// Model version
    #[arg(long, default_value = "1.0.0")]
    version: String,

    /// Creator name or organization
    #[arg(long)]
    creator: Option<String>,

    /// License
    #[arg(long, default_value = "MIT")]
    license: String,

    /// Comma-separated output labels (for classification)
    #[arg(long, value_delimiter = ',')]
    labels: Option<Vec<String>>,

    /// Input dimensions, e.g. 224x224
    #[arg(long)]
    input_size: Option<InputSize>,

    /// Model representation, overriding extension detection
    #[arg(long)]
    format: Option<DeclaredFormat>,
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("package_model=info".parse()?)
                .add_directive("inference_adapter=info".parse()?),
        )
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();
    let config = AppConfig::load()?;
    let loader = ModelLoader::new(&config.runtime);

    let options = PackageOptions {
        input_format: args.input_format,
        output_format: args.output_format,
        version: args.version,
        creator: args.creator,
        license: args.license,
        labels: args.labels,
        input_size: args.input_size,
        format: args.format,
        ..PackageOptions::new(args.name, args.description, args.model_type, args.framework)
    };

    match package_model(&loader, &args.model_path, &args.output_dir, &options) {
        Ok(metadata) => {
            info!(output_dir = %args.output_dir.display(), "Model packaged successfully");
            println!("{}", serde_json::to_string_pretty(&metadata)?);
            Ok(())
        }
        Err(e) => {
            error!(error = %format!("{:#}", e), "Packaging failed");
            eprintln!("Error: {:#}", e);
            std::process::exit(1);
        }
    }
}
