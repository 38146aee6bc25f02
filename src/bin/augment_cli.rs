//! Augment CLI - JSON bridge to the augmentation pipeline
//!
//! Commands: transforms, presets, status, validate, process, augment
//! Outputs JSON to stdout, logs to stderr
//! Exit codes: 0 success, 1 usage or IO error, 2 processing failure

use clap::{Parser, Subcommand};
use serde::Serialize;
use std::fmt::Display;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;

use augment_core::{
    codec,
    hooks::{OutputVerificationHook, Stage},
    AugmentRequest, AugmentationPipeline, ImageProcessor, PresetRegistry, ProcessingLimits, Seed,
    SeedState, TransformSpec,
};

#[derive(Parser)]
#[command(name = "augment-cli")]
#[command(about = "Augment CLI - Reproducible Image Augmentation")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Directory of additional preset JSON files
    #[arg(long)]
    presets_dir: Option<PathBuf>,

    /// JSON file with processing limits (environment overrides still apply)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Log at debug level
    #[arg(short, long)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// List registered transforms
    Transforms,

    /// List available presets
    Presets,

    /// Show registered hooks and supported stages
    Status,

    /// Parse a prompt through the pre_mcp and post_mcp stages
    Validate {
        #[arg(short, long)]
        prompt: String,
    },

    /// Apply an explicit transform list (JSON array of TransformSpec)
    Process {
        #[arg(short, long)]
        input: PathBuf,

        #[arg(short, long)]
        transforms: String,

        #[arg(short, long)]
        seed: Option<Seed>,

        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Run the full pipeline from a prompt or preset
    Augment {
        #[arg(short, long)]
        input: PathBuf,

        #[arg(short, long)]
        output: PathBuf,

        #[arg(short, long)]
        prompt: Option<String>,

        #[arg(long)]
        preset: Option<String>,

        /// Seed for this call only
        #[arg(short, long)]
        seed: Option<Seed>,

        /// Default seed used when no call seed is given
        #[arg(long)]
        default_seed: Option<Seed>,
    },
}

fn init_tracing(verbose: bool) {
    let default_filter = if verbose { "debug" } else { "warn" };
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| default_filter.into()),
        )
        .init();
}

fn load_limits(config: Option<&Path>) -> Result<ProcessingLimits, augment_core::ConfigError> {
    match config {
        Some(path) => ProcessingLimits::load_from_file(path)?.with_overrides(|k| std::env::var(k).ok()),
        None => ProcessingLimits::from_env(),
    }
}

fn print_json<T: Serialize>(value: &T) -> bool {
    match serde_json::to_string_pretty(value) {
        Ok(text) => {
            println!("{}", text);
            true
        }
        Err(e) => {
            eprintln!("Failed to serialize output: {}", e);
            false
        }
    }
}

fn fail(message: impl Display) -> ExitCode {
    print_json(&serde_json::json!({
        "success": false,
        "error": message.to_string(),
    }));
    ExitCode::FAILURE
}

fn finish(value: &impl Serialize, success: bool) -> ExitCode {
    if !print_json(value) {
        return ExitCode::FAILURE;
    }
    if success {
        ExitCode::SUCCESS
    } else {
        ExitCode::from(2) // Processing failure
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let limits = match load_limits(cli.config.as_deref()) {
        Ok(l) => l,
        Err(e) => return fail(format!("Failed to load configuration: {}", e)),
    };

    let presets = match &cli.presets_dir {
        Some(dir) => match PresetRegistry::load_from_dir(dir) {
            Ok(r) => r,
            Err(e) => return fail(format!("Failed to load presets: {}", e)),
        },
        None => PresetRegistry::with_builtins(),
    };

    let processor = ImageProcessor::new(limits, Arc::new(SeedState::new()));
    let pipeline = AugmentationPipeline::with_default_hooks(processor, Arc::new(presets)).await;

    match cli.command {
        Commands::Transforms => {
            let transforms: Vec<_> = pipeline
                .processor()
                .compiler()
                .backend()
                .known_transforms()
                .iter()
                .map(|t| {
                    serde_json::json!({
                        "name": t.name,
                        "description": t.description,
                        "parameters": t.parameters,
                        "default_probability": t.default_probability,
                    })
                })
                .collect();
            finish(&transforms, true)
        }

        Commands::Presets => {
            let presets: Vec<_> = pipeline
                .presets()
                .list()
                .iter()
                .map(|p| {
                    serde_json::json!({
                        "id": p.id,
                        "name": p.name,
                        "description": p.description,
                        "use_cases": p.use_cases,
                        "transforms": p.transforms.len(),
                    })
                })
                .collect();
            finish(&presets, true)
        }

        Commands::Status => finish(&pipeline.status().await, true),

        Commands::Validate { prompt } => {
            let response = pipeline.parse_prompt_with_hooks(&prompt, None).await;
            let success = response.success;
            finish(&response, success)
        }

        Commands::Process {
            input,
            transforms,
            seed,
            output,
        } => {
            let specs: Vec<TransformSpec> = match serde_json::from_str(&transforms) {
                Ok(s) => s,
                Err(e) => return fail(format!("Invalid transforms: {}", e)),
            };
            let image = match codec::load_image(&input) {
                Ok(i) => i,
                Err(e) => return fail(e),
            };

            let result = pipeline.processor().process_image(&image, &specs, seed);
            if let (Some(path), Some(out)) = (&output, &result.augmented_image) {
                if let Err(e) = codec::save_image(path, out) {
                    return fail(e);
                }
            }
            finish(&result, result.success)
        }

        Commands::Augment {
            input,
            output,
            prompt,
            preset,
            seed,
            default_seed,
        } => {
            let image = match codec::load_image(&input) {
                Ok(i) => i,
                Err(e) => return fail(e),
            };
            if default_seed.is_some() {
                pipeline.set_default_seed(default_seed);
            }
            pipeline
                .registry()
                .register(Stage::PostTransformVerify, Arc::new(OutputVerificationHook))
                .await;

            let request = AugmentRequest {
                image,
                prompt,
                preset,
                seed,
                session_id: None,
            };
            let response = match pipeline.augment_image(request).await {
                Ok(r) => r,
                Err(e) => return fail(e),
            };

            if let Some(out) = &response.augmented_image {
                if let Err(e) = codec::save_image(&output, out) {
                    return fail(e);
                }
            }
            let success = response.success;
            finish(&response, success)
        }
    }
}
