use std::time::Duration;

use crate::{
    persist::PersistorConfig,
    types::{FIXED_POINT_SCALE, Usdc},
};

/// Default window anchored at a trader's first qualifying trade.
pub const DEFAULT_WINDOW: Duration = Duration::from_secs(15 * 60);

/// Default insider volume threshold: 4000 USDC.
pub const DEFAULT_VOLUME_THRESHOLD: Usdc = 4_000 * FIXED_POINT_SCALE;

/// Default price fills must stay strictly below: 0.95.
pub const DEFAULT_MIN_PRICE_BPS: u64 = 9_500;

/// Classification pipeline parameters.
#[derive(Clone, Copy, Debug)]
pub struct PipelineConfig {
    /// Window a trader's volume is accumulated over, starting at their first
    /// qualifying trade.
    pub window: Duration,

    /// Window volume at or above which a trader is an insider, 6-decimal
    /// fixed point.
    pub volume_threshold: Usdc,

    /// Fills priced at or above this many basis points are ignored.
    pub min_price_bps: u64,

    /// Snapshot writer settings.
    pub persistor: PersistorConfig,

    /// Block to start from when there is no snapshot or checkpoint to resume from.
    pub start_block: u64,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            window: DEFAULT_WINDOW,
            volume_threshold: DEFAULT_VOLUME_THRESHOLD,
            min_price_bps: DEFAULT_MIN_PRICE_BPS,
            persistor: PersistorConfig::default(),
            start_block: 0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = PipelineConfig::default();
        assert_eq!(config.window.as_secs(), 900);
        assert_eq!(config.volume_threshold, 4_000_000_000);
        assert_eq!(config.min_price_bps, 9500);
        assert_eq!(config.persistor.save_interval_batches, 30);
    }
}
