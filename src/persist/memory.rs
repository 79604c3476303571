use dashmap::DashMap;

use super::{Snapshot, SnapshotRecord, SnapshotStore};
use crate::{
    classify::{SetId, TraderHash},
    error::Result,
    types::Cursor,
};

/// In-process snapshot store, for tests and dry runs.
#[derive(Debug, Default)]
pub struct MemoryStore {
    records: DashMap<SetId, Vec<SnapshotRecord>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a raw record as if it was saved earlier.
    pub fn insert(&self, set_id: SetId, record: SnapshotRecord) {
        self.records.entry(set_id).or_default().push(record);
    }

    /// Records saved for `set_id`, in write order.
    pub fn records(&self, set_id: SetId) -> Vec<SnapshotRecord> {
        self.records
            .get(&set_id)
            .map(|records| records.clone())
            .unwrap_or_default()
    }
}

impl SnapshotStore for MemoryStore {
    async fn save(
        &self,
        set_id: SetId,
        delta: &[TraderHash],
        cumulative_count: u64,
        cursor: Cursor,
    ) -> Result<()> {
        self.insert(
            set_id,
            SnapshotRecord {
                hashes: delta.to_vec(),
                cumulative_count,
                cursor: Some(cursor),
            },
        );
        Ok(())
    }

    async fn load(&self, set_id: SetId) -> Result<Option<Snapshot>> {
        Ok(Snapshot::from_records(self.records(set_id)))
    }
}
