use std::collections::HashMap;

use super::{AssetId, Fill, Timestamp, TraderId, Usdc};
use crate::{error::Error, window::Windowed};

/// Per-asset activity within a trader's window.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct AssetStats {
    pub volume: Usdc,
    pub trade_count: u32,
}

/// Aggregated qualifying activity of a trader within the window anchored at
/// their first observed trade.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TraderWindowEntry {
    trader: TraderId,
    assets: HashMap<AssetId, AssetStats>,
    volume: Usdc,
    trade_count: u32,
    first_seen: Timestamp,
}

impl TraderWindowEntry {
    pub fn new(trader: TraderId, first_seen: Timestamp) -> Self {
        Self {
            trader,
            assets: HashMap::new(),
            volume: 0,
            trade_count: 0,
            first_seen,
        }
    }

    pub fn trader(&self) -> TraderId {
        self.trader
    }

    /// Total USDC volume, 6-decimal fixed point.
    pub fn volume(&self) -> Usdc {
        self.volume
    }

    pub fn trade_count(&self) -> u32 {
        self.trade_count
    }

    pub fn assets(&self) -> &HashMap<AssetId, AssetStats> {
        &self.assets
    }

    /// Adds a fill to the aggregate.
    pub fn record(&mut self, fill: &Fill) -> Result<(), Error> {
        self.volume = self
            .volume
            .checked_add(fill.usdc)
            .ok_or(Error::VolumeOverflow(self.trader))?;
        self.trade_count = self.trade_count.saturating_add(1);

        let stats = self.assets.entry(fill.asset_id).or_default();
        stats.volume = stats.volume.saturating_add(fill.usdc);
        stats.trade_count = stats.trade_count.saturating_add(1);
        Ok(())
    }

    /// Folds another aggregate of the same trader into this one in place,
    /// keeping this entry's `first_seen`.
    pub fn merge(&mut self, other: &TraderWindowEntry) -> Result<(), Error> {
        self.volume = self
            .volume
            .checked_add(other.volume)
            .ok_or(Error::VolumeOverflow(self.trader))?;
        self.trade_count = self.trade_count.saturating_add(other.trade_count);

        for (asset_id, other_stats) in &other.assets {
            let stats = self.assets.entry(*asset_id).or_default();
            stats.volume = stats.volume.saturating_add(other_stats.volume);
            stats.trade_count = stats.trade_count.saturating_add(other_stats.trade_count);
        }
        Ok(())
    }
}

impl Windowed for TraderWindowEntry {
    fn first_seen(&self) -> Timestamp {
        self.first_seen
    }
}
