use alloy::primitives::B256;
use serde::{Deserialize, Serialize};

/// Position in chain history all persisted classification state is
/// consistent with.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct Cursor {
    number: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    hash: Option<B256>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    timestamp: Option<u64>,
}

impl Cursor {
    pub fn new(number: u64, hash: Option<B256>, timestamp: Option<u64>) -> Self {
        Self {
            number,
            hash,
            timestamp,
        }
    }

    /// Cursor carrying only the block number.
    pub fn at(number: u64) -> Self {
        Self::new(number, None, None)
    }

    pub fn number(&self) -> u64 {
        self.number
    }

    pub fn hash(&self) -> Option<B256> {
        self.hash
    }

    pub fn timestamp(&self) -> Option<u64> {
        self.timestamp
    }

    /// Block the stream should resume from after this cursor.
    pub fn next_block(&self) -> u64 {
        self.number.saturating_add(1)
    }
}

/// On-disk checkpoint file format.
///
/// Older checkpoints contain a bare block number, newer ones the full cursor.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Checkpoint {
    Number(u64),
    Cursor(Cursor),
}

impl From<Checkpoint> for Cursor {
    fn from(value: Checkpoint) -> Self {
        match value {
            Checkpoint::Number(number) => Cursor::at(number),
            Checkpoint::Cursor(cursor) => cursor,
        }
    }
}
