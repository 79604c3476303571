//! Insider trader detection for prediction market fills.
//!
//! # Overview
//!
//! Flags traders placing large, high-conviction bets shortly after their first
//! observed trade. Qualifying buys, priced below a configurable limit, are
//! summed per trader over a window starting at the trader's first trade. A
//! trader reaching the volume threshold within the window is an insider,
//! otherwise the trader becomes a not-insider once the window elapses.
//! Classification is final.
//!
//! Use [`stream::fills`] to produce ordered per-block fill batches from the
//! exchange contracts, then [`pipeline::PipelineBuilder`] to restore the
//! classification state from [`persist`]ed snapshots and feed the stream into
//! the resulting [`pipeline::Pipeline`].
//!
//! # Limitations
//!
//! * Classification decisions made on blocks that are later reorganized out
//!   of the chain are not reverted.
//!
//! * Classification sets store 32-bit trader hashes, so membership checks of
//!   unrelated traders may collide.

pub mod abi;
pub mod classify;
pub mod error;
pub mod persist;
pub mod pipeline;
pub mod stream;
pub mod types;
pub mod window;

use alloy::primitives::{Address, address};

#[derive(Clone, Debug)]
/// Chain the exchange contracts are deployed on.
pub struct Chain {
    chain_id: u64,
    exchanges: Vec<Address>,
}

impl Chain {
    /// Polygon PoS with the CTF and neg-risk CTF exchanges.
    pub fn polygon() -> Self {
        Self {
            chain_id: 137,
            exchanges: vec![
                address!("0x4bFb41d5B3570DeFd03C39a9A4D8dE6Bd8B8982E"),
                address!("0xC5d563A36AE78145C45a50134d48A1215220f80a"),
            ],
        }
    }

    pub fn custom(chain_id: u64, exchanges: Vec<Address>) -> Self {
        Self {
            chain_id,
            exchanges,
        }
    }

    pub fn chain_id(&self) -> u64 {
        self.chain_id
    }

    /// Exchange contracts emitting `OrderFilled` events.
    pub fn exchanges(&self) -> &[Address] {
        &self.exchanges
    }
}
