//! Error types for the insider watcher.

use crate::config::ConfigError;

/// Main error type for the insider watcher.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Environment configuration error: {0}")]
    EnvConfig(#[from] envy::Error),

    #[error("Insider watch error: {0}")]
    Watch(#[from] insider_watch::error::Error),

    #[error("Invalid RPC URL: {0}")]
    InvalidRpcUrl(#[from] url::ParseError),

    #[error("Invalid address: {0}")]
    InvalidAddress(#[from] alloy::primitives::hex::FromHexError),
}

pub type Result<T> = std::result::Result<T, Error>;
