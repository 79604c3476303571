//! Durable classification state.
//!
//! Classification sets are persisted incrementally: every save appends the
//! hashes added since the previous save together with the cumulative count
//! and the [`Cursor`] the state is consistent with. Loading a set unions all
//! appended deltas.
//!
//! [`SnapshotPersistor`] drives the writes in the background, [`CheckpointFile`]
//! keeps the last durable cursor in a standalone file.

mod checkpoint;
mod file;
mod memory;
mod persistor;

pub use checkpoint::CheckpointFile;
pub use file::FileStore;
pub use memory::MemoryStore;
pub use persistor::{PersistorConfig, PersistorStatus, SaveTask, SetDelta, SnapshotPersistor};

use std::{collections::HashSet, future::Future};

use serde::{Deserialize, Serialize};

use crate::{
    classify::{SetId, TraderHash},
    error::Result,
    types::Cursor,
};

/// Key/value store of incremental classification set snapshots.
pub trait SnapshotStore: Send + Sync + 'static {
    /// Durably appends `delta` to the snapshot of `set_id`.
    fn save(
        &self,
        set_id: SetId,
        delta: &[TraderHash],
        cumulative_count: u64,
        cursor: Cursor,
    ) -> impl Future<Output = Result<()>> + Send;

    /// Loads the full snapshot of `set_id`, `None` if nothing was saved yet.
    fn load(&self, set_id: SetId) -> impl Future<Output = Result<Option<Snapshot>>> + Send;
}

/// Single appended snapshot delta.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SnapshotRecord {
    pub hashes: Vec<TraderHash>,
    pub cumulative_count: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cursor: Option<Cursor>,
}

/// Classification set state restored from the store.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Snapshot {
    pub hashes: HashSet<TraderHash>,
    pub cumulative_count: u64,
    pub cursor: Option<Cursor>,
}

impl Snapshot {
    /// Folds appended records in write order: hashes are unioned, count and
    /// cursor come from the most recent record carrying them.
    pub fn from_records(records: impl IntoIterator<Item = SnapshotRecord>) -> Option<Self> {
        let mut records = records.into_iter().peekable();
        records.peek()?;

        let mut snapshot = Snapshot::default();
        for record in records {
            snapshot.hashes.extend(record.hashes);
            snapshot.cumulative_count = record.cumulative_count;
            if record.cursor.is_some() {
                snapshot.cursor = record.cursor;
            }
        }
        Some(snapshot)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_snapshot_from_records() {
        assert_eq!(Snapshot::from_records(vec![]), None);

        let snapshot = Snapshot::from_records(vec![
            SnapshotRecord {
                hashes: vec![1, 2],
                cumulative_count: 2,
                cursor: Some(Cursor::at(10)),
            },
            SnapshotRecord {
                hashes: vec![2, 3],
                cumulative_count: 3,
                cursor: None,
            },
        ])
        .unwrap();

        assert_eq!(snapshot.hashes, HashSet::from([1, 2, 3]));
        assert_eq!(snapshot.cumulative_count, 3);
        assert_eq!(snapshot.cursor, Some(Cursor::at(10)));
    }
}
