use alloy::primitives::TxHash;

use super::{AssetId, BPS_SCALE, Cursor, Timestamp, TraderId, Usdc};

/// Side of the fill from the trader's point of view.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Side {
    Buy,
    Sell,
}

/// A single order fill attributed to one trader.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Fill {
    /// Trader the fill is attributed to.
    pub trader: TraderId,

    /// Outcome token traded.
    pub asset_id: AssetId,

    pub side: Side,

    /// Collateral exchanged, 6-decimal fixed point.
    pub usdc: Usdc,

    /// Outcome shares exchanged, 6-decimal fixed point.
    pub shares: u64,

    /// Timestamp of the block the fill was included in.
    pub timestamp: Timestamp,

    pub block_number: u64,

    pub tx_hash: TxHash,

    pub tx_index: u64,

    pub log_index: u64,
}

impl Fill {
    /// Checks if the fill price (`usdc / shares`) is strictly below
    /// `max_price_bps` basis points.
    ///
    /// Compared in integers to avoid rounding at the boundary. Fills with zero
    /// shares have no defined price and never pass.
    pub fn is_priced_below(&self, max_price_bps: u64) -> bool {
        (self.usdc as u128) * (BPS_SCALE as u128) < (self.shares as u128) * (max_price_bps as u128)
    }
}

/// Fills from a single block.
#[derive(Clone, Debug, Default)]
pub struct FillBatch {
    /// Position of the block in the stream, its timestamp being the
    /// stream-state timestamp.
    pub cursor: Cursor,

    /// Block header timestamp if the source tracks it separately.
    pub header_timestamp: Option<Timestamp>,

    /// Fills in log order.
    pub fills: Vec<Fill>,
}

impl FillBatch {
    pub fn new(cursor: Cursor, fills: Vec<Fill>) -> Self {
        Self {
            cursor,
            header_timestamp: None,
            fills,
        }
    }

    /// Timestamp the batch is processed at: stream-state timestamp, then
    /// header timestamp, then the first fill's timestamp.
    pub fn reference_timestamp(&self) -> Option<Timestamp> {
        self.cursor
            .timestamp()
            .or(self.header_timestamp)
            .or_else(|| self.fills.first().map(|f| f.timestamp))
    }

    pub fn is_empty(&self) -> bool {
        self.fills.is_empty()
    }

    pub fn len(&self) -> usize {
        self.fills.len()
    }
}

/// Item of the ordered fill stream.
#[derive(Clone, Debug)]
pub enum StreamMessage {
    /// Next block in stream order.
    Batch(FillBatch),

    /// Previously delivered blocks that are no longer canonical, most recent first.
    Rollback(Vec<Cursor>),
}

#[cfg(test)]
mod tests {
    use alloy::primitives::{Address, U256};

    use super::*;

    fn fill(usdc: u64, shares: u64) -> Fill {
        Fill {
            trader: Address::ZERO,
            asset_id: U256::from(1),
            side: Side::Buy,
            usdc,
            shares,
            timestamp: 100,
            block_number: 1,
            tx_hash: TxHash::ZERO,
            tx_index: 0,
            log_index: 0,
        }
    }

    #[test]
    fn test_price_filter_is_strict() {
        // 0.95 exactly
        assert!(!fill(950_000, 1_000_000).is_priced_below(9500));
        // 0.949999
        assert!(fill(949_999, 1_000_000).is_priced_below(9500));
        // 0.96
        assert!(!fill(960_000, 1_000_000).is_priced_below(9500));
        assert!(!fill(1, 0).is_priced_below(9500));
    }

    #[test]
    fn test_reference_timestamp_fallbacks() {
        let mut batch = FillBatch::new(Cursor::new(5, None, Some(300)), vec![fill(1, 2)]);
        batch.header_timestamp = Some(200);
        assert_eq!(batch.reference_timestamp(), Some(300));

        batch.cursor = Cursor::at(5);
        assert_eq!(batch.reference_timestamp(), Some(200));

        batch.header_timestamp = None;
        assert_eq!(batch.reference_timestamp(), Some(100));

        batch.fills.clear();
        assert_eq!(batch.reference_timestamp(), None);
    }
}
