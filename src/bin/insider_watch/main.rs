//! Insider watcher for prediction market exchanges.
//!
//! This binary streams exchange fills, flags traders placing large early bets
//! and keeps the classification state on disk across restarts.

mod config;
mod error;
mod watcher;

use std::process::exit;

use clap::Parser;
use insider_watch::pipeline::PipelineConfig;
use tracing::info;

use config::{CliConfig, EnvConfig};
use error::Result;
use watcher::InsiderWatcher;

/// Reads environment and CLI configuration.
fn load_config() -> Result<(EnvConfig, PipelineConfig)> {
    let env_config = EnvConfig::from_env()?;
    let start_block = env_config.start_block.unwrap_or(0);
    let pipeline_config = CliConfig::parse().to_pipeline_config(start_block)?;
    Ok((env_config, pipeline_config))
}

#[tokio::main]
async fn main() {
    // Load .env file
    if let Err(e) = dotenvy::dotenv() {
        eprintln!("Warning: Failed to load .env file: {}", e);
    }

    let (env_config, pipeline_config) = match load_config() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Invalid configuration: {}", e);
            exit(1);
        }
    };

    // Set up logging
    if std::env::var("RUST_LOG").is_err() {
        unsafe {
            std::env::set_var("RUST_LOG", "info");
        }
    }

    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let mut watcher = match InsiderWatcher::try_new(&env_config, pipeline_config).await {
        Ok(watcher) => watcher,
        Err(e) => {
            eprintln!("Failed to create insider watcher: {}", e);
            exit(1);
        }
    };

    tokio::select! {
        _ = watcher.run() => {}
        result = tokio::signal::ctrl_c() => {
            if let Err(e) = result {
                eprintln!("Failed to listen for shutdown signal: {}", e);
            }
            info!("Shutdown requested");
        }
    }

    watcher.shutdown().await;
}
