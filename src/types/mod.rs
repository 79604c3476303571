mod cursor;
mod entry;
mod fill;

pub use cursor::{Checkpoint, Cursor};
pub use entry::{AssetStats, TraderWindowEntry};
pub use fill::{Fill, FillBatch, Side, StreamMessage};

use alloy::primitives::{Address, U256};

/// Trader (maker) address on the exchange.
pub type TraderId = Address;

/// ERC-1155 position token ID of a market outcome.
pub type AssetId = U256;

/// Unix timestamp in seconds.
pub type Timestamp = u64;

/// USDC amount in 6-decimal fixed point.
pub type Usdc = u64;

/// Number of 6-decimal fixed-point units in one USDC or one outcome share.
pub const FIXED_POINT_SCALE: u64 = 1_000_000;

/// Denominator of basis-point prices.
pub const BPS_SCALE: u64 = 10_000;
