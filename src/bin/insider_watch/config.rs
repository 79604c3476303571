//! Configuration for the insider watcher.
//!
//! Configuration comes from two sources:
//! - Environment variables (via .env file or shell): node connection, storage paths
//! - CLI arguments: classification parameters

use std::{path::PathBuf, time::Duration};

use alloy::primitives::{Address, U256};
use clap::Parser;
use fastnum::{UD64, decimal::Context};
use insider_watch::{persist::PersistorConfig, pipeline::PipelineConfig, types::Usdc};

/// Decimals of USDC amounts on chain.
const USDC_DECIMALS: i16 = 6;

/// Decimals of basis point prices.
const BPS_DECIMALS: i16 = 4;

/// Environment configuration (node connection, storage).
#[derive(Debug, serde::Deserialize)]
pub struct EnvConfig {
    /// RPC URL for the node
    pub node_rpc_url: String,

    /// Directory classification snapshots are kept in
    pub snapshot_dir: PathBuf,

    /// Optional file the last durable cursor is written to
    pub checkpoint_path: Option<PathBuf>,

    /// Block to start from if there is no state to resume from (default: 0)
    pub start_block: Option<u64>,

    /// Interval to poll for new blocks at (default: 2000ms)
    pub poll_interval_ms: Option<u64>,

    /// Optional chain ID, Polygon if not set
    pub chain_id: Option<u64>,

    /// Optional comma-separated exchange addresses, Polygon exchanges if not set
    pub exchange_addresses: Option<String>,
}

impl EnvConfig {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self, envy::Error> {
        envy::from_env()
    }

    /// Parse the exchange addresses, if set.
    pub fn exchange_addresses(
        &self,
    ) -> Result<Option<Vec<Address>>, alloy::primitives::hex::FromHexError> {
        self.exchange_addresses
            .as_deref()
            .map(|addresses| {
                addresses
                    .split(',')
                    .map(|address| address.trim().parse())
                    .collect()
            })
            .transpose()
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms.unwrap_or(2000))
    }
}

/// CLI arguments for insider classification.
#[derive(Debug, Parser)]
#[command(name = "insider-watch")]
#[command(about = "Flags prediction market traders making large early bets")]
pub struct CliConfig {
    /// Window after a trader's first trade their volume is summed over, in minutes
    #[arg(long, default_value_t = 15)]
    pub window_minutes: u64,

    /// Window volume in USDC at which a trader is flagged (e.g., 4000)
    #[arg(long, default_value = "4000")]
    pub volume_threshold: String,

    /// Fills priced at or above this are ignored (e.g., 0.95)
    #[arg(long, default_value = "0.95")]
    pub min_price: String,

    /// Number of processed blocks between snapshot saves
    #[arg(long, default_value_t = 30)]
    pub save_interval: u64,
}

impl CliConfig {
    /// Convert CLI config to the pipeline config.
    pub fn to_pipeline_config(&self, start_block: u64) -> Result<PipelineConfig, ConfigError> {
        if self.window_minutes == 0 {
            return Err(ConfigError::ZeroWindow);
        }
        if self.save_interval == 0 {
            return Err(ConfigError::ZeroSaveInterval);
        }

        let volume_threshold = UD64::from_str(&self.volume_threshold, Context::default())
            .map_err(|_| ConfigError::InvalidVolumeThreshold)?;
        let volume_threshold: Usdc = to_fixed_point(volume_threshold, USDC_DECIMALS)
            .ok_or(ConfigError::InvalidVolumeThreshold)?;
        if volume_threshold == 0 {
            return Err(ConfigError::InvalidVolumeThreshold);
        }

        let min_price = UD64::from_str(&self.min_price, Context::default())
            .map_err(|_| ConfigError::InvalidMinPrice)?;
        let min_price_bps = to_fixed_point(min_price, BPS_DECIMALS)
            .filter(|bps| (1..=10_000).contains(bps))
            .ok_or(ConfigError::InvalidMinPrice)?;

        Ok(PipelineConfig {
            window: Duration::from_secs(self.window_minutes * 60),
            volume_threshold,
            min_price_bps,
            persistor: PersistorConfig {
                save_interval_batches: self.save_interval,
                ..Default::default()
            },
            start_block,
        })
    }
}

impl Default for CliConfig {
    fn default() -> Self {
        Self {
            window_minutes: 15,
            volume_threshold: "4000".to_string(),
            min_price: "0.95".to_string(),
            save_interval: 30,
        }
    }
}

/// Scales a decimal to an integer with `decimals` fractional digits.
fn to_fixed_point(value: UD64, decimals: i16) -> Option<u64> {
    let rescaled = value.rescale(decimals);
    u64::try_from(U256::from_le_slice(
        rescaled.digits().to_radix_le(256).as_slice(),
    ))
    .ok()
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("window_minutes cannot be zero")]
    ZeroWindow,

    #[error("save_interval cannot be zero")]
    ZeroSaveInterval,

    #[error("Invalid volume threshold value")]
    InvalidVolumeThreshold,

    #[error("min_price must be above 0 and at most 1")]
    InvalidMinPrice,
}
