use std::sync::Arc;

use tracing::{debug, info, warn};

use super::{Pipeline, PipelineConfig};
use crate::{
    classify::{ClassificationCounts, ClassificationObserver, ClassificationSets, SetId},
    persist::{CheckpointFile, SnapshotPersistor, SnapshotStore},
    types::Cursor,
};

/// How the classification state of a [`Pipeline`] was initialized.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Recovery {
    /// Both classification sets restored from their snapshots.
    Restored,

    /// No snapshot found, starting with empty sets.
    Empty,

    /// Only one of the sets had a snapshot. It is discarded and the pipeline
    /// starts with empty sets.
    PartialSnapshot,

    /// Loading snapshots failed, starting with empty sets.
    LoadFailed,
}

/// Restores classification state and prepares a [`Pipeline`] for streaming.
#[derive(derive_more::Debug)]
pub struct PipelineBuilder<S> {
    config: PipelineConfig,
    #[debug(skip)]
    store: Arc<S>,
    checkpoint: Option<CheckpointFile>,
    #[debug(skip)]
    observer: Box<dyn ClassificationObserver + Send>,
}

impl<S: SnapshotStore> PipelineBuilder<S> {
    /// Creates a builder restoring state from `store` without a checkpoint
    /// file and without classification observer.
    pub fn new(config: PipelineConfig, store: Arc<S>) -> Self {
        Self {
            config,
            store,
            checkpoint: None,
            observer: Box::new(()),
        }
    }

    /// Sets the checkpoint file to resume from when snapshots carry no cursor,
    /// and to record every durable cursor in.
    pub fn with_checkpoint(mut self, checkpoint: CheckpointFile) -> Self {
        self.checkpoint = Some(checkpoint);
        self
    }

    /// Sets the observer notified of every classification decision, on top
    /// of the built-in counters.
    pub fn with_observer(mut self, observer: impl ClassificationObserver + Send + 'static) -> Self {
        self.observer = Box::new(observer);
        self
    }

    /// Loads both snapshots, determines the resume position and spawns the
    /// snapshot writer.
    ///
    /// Snapshot load failures are not fatal: the pipeline starts with empty
    /// sets instead.
    pub async fn build(self) -> Pipeline {
        info!("Recovering classification state");

        let (insider, not_insider) = tokio::join!(
            self.store.load(SetId::Insider),
            self.store.load(SetId::NotInsider)
        );

        let mut sets = ClassificationSets::new();
        let mut counts = ClassificationCounts::default();
        let (recovery, snapshot_cursor) = match (insider, not_insider) {
            (Ok(Some(insider)), Ok(Some(not_insider))) => {
                sets.insider.restore(insider.hashes);
                sets.not_insider.restore(not_insider.hashes);
                counts = ClassificationCounts::new(
                    insider.cumulative_count,
                    not_insider.cumulative_count,
                );
                // Sets may have been written up to different cursors if one
                // of the writes failed, the earlier one is consistent for both
                let cursor = [insider.cursor, not_insider.cursor]
                    .into_iter()
                    .flatten()
                    .min_by_key(Cursor::number);
                info!(
                    insiders = sets.insider.len(),
                    not_insiders = sets.not_insider.len(),
                    insider_total = counts.insider,
                    not_insider_total = counts.not_insider,
                    block = cursor.map(|c| c.number()),
                    "Classification sets restored"
                );
                (Recovery::Restored, cursor)
            }
            (Ok(None), Ok(None)) => {
                info!("No snapshots found, starting with empty classification sets");
                (Recovery::Empty, None)
            }
            (Ok(insider), Ok(not_insider)) => {
                warn!(
                    insider = insider.is_some(),
                    not_insider = not_insider.is_some(),
                    "Snapshot found for one classification set only, starting with empty sets"
                );
                (Recovery::PartialSnapshot, None)
            }
            (Err(e), _) | (_, Err(e)) => {
                warn!(?e, "Failed to load snapshots, starting with empty classification sets");
                (Recovery::LoadFailed, None)
            }
        };

        let checkpoint_cursor = match &self.checkpoint {
            Some(checkpoint) => match checkpoint.read().await {
                Ok(cursor) => cursor,
                Err(e) => {
                    warn!(?e, path = %checkpoint.path().display(), "Failed to read checkpoint");
                    None
                }
            },
            None => None,
        };
        if let (Some(snapshot), Some(checkpoint)) = (snapshot_cursor, checkpoint_cursor) {
            if snapshot.number() != checkpoint.number() {
                debug!(
                    snapshot_block = snapshot.number(),
                    checkpoint_block = checkpoint.number(),
                    "Snapshot cursor differs from checkpoint, using snapshot"
                );
            }
        }
        let cursor = snapshot_cursor.or(checkpoint_cursor);

        let checkpoint = self.checkpoint.clone();
        let persistor = SnapshotPersistor::spawn(
            self.store,
            move |cursor| {
                let checkpoint = checkpoint.clone();
                async move {
                    match checkpoint {
                        Some(checkpoint) => checkpoint.write(cursor).await,
                        None => Ok(()),
                    }
                }
            },
            self.config.persistor,
        );

        let pipeline = Pipeline::new(
            self.config,
            sets,
            counts,
            self.observer,
            persistor,
            recovery,
            cursor,
        );
        info!(
            ?recovery,
            resume_from = pipeline.resume_from(),
            "Pipeline ready for streaming"
        );
        pipeline
    }
}
