#![allow(clippy::multiple_crate_versions)]

use clap::{Parser, Subcommand};
use indicatif::{ProgressBar, ProgressStyle};
use onnx_convert::config::Config;
use onnx_convert::hub::download::format_bytes;
use onnx_convert::pipeline::{ConversionRequest, Coordinator};
use onnx_convert::toolchain::Toolchain;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "onnx-convert")]
#[command(about = "Convert Hugging Face models to ONNX and publish them", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Serve the conversion page (default)
    Serve {
        /// Address to bind to
        #[arg(long)]
        host: Option<String>,
        /// Port to listen on
        #[arg(short, long)]
        port: Option<u16>,
    },
    /// Convert one model and publish it
    Convert {
        /// Model identifier, e.g. EleutherAI/pythia-14m
        model_id: String,
        /// Apply dynamic quantization after export
        #[arg(short, long)]
        quantize: bool,
        /// Allow custom model code (requires --user-token)
        #[arg(long)]
        trust_remote_code: bool,
        /// Upload into the source repository when you own it
        #[arg(long)]
        same_repo: bool,
        /// Publish with this token instead of the configured one
        #[arg(long, env = "ONNX_CONVERT_USER_TOKEN", hide_env_values = true)]
        user_token: Option<String>,
    },
    /// Show where a model would be published
    Preview {
        model_id: String,
        #[arg(long)]
        same_repo: bool,
    },
    /// Show the account of the configured token
    Whoami,
    /// Download the conversion scripts
    Setup,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let config = Config::load()?;

    match cli.command {
        None => serve(&config, None, None).await,
        Some(Commands::Serve { host, port }) => serve(&config, host, port).await,
        Some(Commands::Convert {
            model_id,
            quantize,
            trust_remote_code,
            same_repo,
            user_token,
        }) => {
            let request = ConversionRequest {
                model_id,
                quantize,
                trust_remote_code,
                same_repo,
                user_credential: user_token
                    .as_deref()
                    .and_then(onnx_convert::hub::Credential::new),
            };
            run_convert(&config, &request).await
        }
        Some(Commands::Preview {
            model_id,
            same_repo,
        }) => {
            let coordinator = Coordinator::from_config(&config)?;
            let preview = coordinator.preview(&model_id, same_repo, None).await?;
            println!("{}", preview.destination_url);
            if preview.already_converted {
                println!("This model has already been converted.");
            }
            Ok(())
        }
        Some(Commands::Whoami) => {
            let coordinator = Coordinator::from_config(&config)?;
            println!("{}", coordinator.username(None).await?);
            Ok(())
        }
        Some(Commands::Setup) => {
            let toolchain = Toolchain::from_config(&config.toolchain)?;
            toolchain.ensure_installed().await?;
            println!("✓ Conversion scripts ready at {}", toolchain.repo_path().display());
            Ok(())
        }
    }
}

async fn serve(config: &Config, host: Option<String>, port: Option<u16>) -> anyhow::Result<()> {
    let host = host.unwrap_or_else(|| config.server.host.clone());
    let port = port.unwrap_or(config.server.port);

    tracing::info!("Starting onnx-convert server");

    let toolchain = Toolchain::from_config(&config.toolchain)?;
    toolchain.ensure_installed().await?;

    let coordinator = Coordinator::from_config(config)?;
    onnx_convert::web::serve(coordinator, &host, port).await
}

async fn run_convert(config: &Config, request: &ConversionRequest) -> anyhow::Result<()> {
    let coordinator = Coordinator::from_config(config)?;

    let spinner = ProgressBar::new_spinner();
    spinner.set_style(ProgressStyle::with_template("{spinner} {msg} [{elapsed}]")?);
    spinner.set_message(format!("Converting {}", request.model_id));
    spinner.enable_steady_tick(Duration::from_millis(120));

    let result = coordinator.convert(request).await;
    spinner.finish_and_clear();

    if result.success {
        println!(
            "✓ Published {} ({})",
            result.destination_name.as_deref().unwrap_or_default(),
            format_bytes(result.artifact_bytes.unwrap_or(0))
        );
        if let Some(url) = &result.destination_url {
            println!("{url}");
        }
        Ok(())
    } else {
        eprintln!(
            "Error: {}",
            result.error_message.as_deref().unwrap_or("conversion failed")
        );
        std::process::exit(1);
    }
}
