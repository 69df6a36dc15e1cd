//! CLI entry point for the WebP optimizer
//!
//! Parses command line arguments, installs logging and starts the server.

use clap::Parser;
use std::path::PathBuf;
use std::process::ExitCode;
use tracing::{error, info};
use webp_optimizer::{init_logging, resolve_log_filter, Config, Daemon};

/// WebP Optimizer - resize uploaded images and re-encode them as WebP
#[derive(Parser, Debug)]
#[command(name = "webp-optimizer")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to the configuration file (config.toml). Defaults apply when omitted.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Listen port, overriding the config file and PORT
    #[arg(short, long)]
    port: Option<u16>,

    /// Tracing filter directive, overriding RUST_LOG and the config file
    #[arg(long)]
    log_filter: Option<String>,
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();

    let config = match &args.config {
        Some(path) => Config::load(path),
        None => Config::from_env(),
    };
    let mut config = match config {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Failed to load configuration: {}", e);
            return ExitCode::FAILURE;
        }
    };
    if let Some(port) = args.port {
        config.server.port = port;
    }

    let env_filter = std::env::var("RUST_LOG").ok();
    let filter = resolve_log_filter(
        args.log_filter.as_deref(),
        env_filter.as_deref(),
        Some(config.logging.filter.as_str()),
    );
    if let Err(e) = init_logging(&filter) {
        eprintln!("{}", e);
    }

    info!(
        config = ?args.config,
        incoming_dir = %config.storage.incoming_dir.display(),
        output_dir = %config.storage.output_dir.display(),
        max_file_bytes = config.upload.max_file_bytes,
        "WebP optimizer starting"
    );

    let daemon = match Daemon::new(config).await {
        Ok(daemon) => daemon,
        Err(e) => {
            error!(error = %e, "Failed to initialize daemon");
            return ExitCode::FAILURE;
        }
    };

    if let Err(e) = daemon.run().await {
        error!(error = %e, "Daemon error");
        return ExitCode::FAILURE;
    }

    ExitCode::SUCCESS
}
