//! Streaming classification pipeline.
//!
//! [`Pipeline`] consumes ordered [`FillBatch`]es, accumulates qualifying buys
//! per trader in a [`WindowBuffer`] anchored at each trader's first trade and
//! classifies traders either as soon as their window volume reaches the
//! threshold, or once their window elapses. Classification sets are saved in
//! the background every few batches.
//!
//! A pipeline is created through [`PipelineBuilder`], which restores
//! classification state from the last snapshots before streaming starts.

mod config;
mod recovery;

pub use config::*;
pub use recovery::{PipelineBuilder, Recovery};

use std::collections::HashMap;

use futures::{Stream, StreamExt};
use tracing::{debug, error, info, warn};

use crate::{
    classify::{
        ClassificationCounts, ClassificationObserver, ClassificationSets, InsiderEvaluator,
    },
    error::{Error, Result},
    persist::{PersistorStatus, SaveTask, SnapshotPersistor},
    types::{Cursor, FillBatch, Side, StreamMessage, Timestamp, TraderId, TraderWindowEntry},
    window::{WindowBuffer, Windowed},
};

/// Result of handling rolled back blocks.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RollbackOutcome {
    /// Classification state is kept as is, decisions made on rolled back
    /// blocks stay in effect.
    NoAutomatedRollback,
}

/// Outcome of processing a single batch.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct BatchSummary {
    pub block: u64,
    pub fills: usize,
    /// Buys below the price limit from not yet classified traders.
    pub qualifying_fills: usize,
    pub new_insiders: u64,
    pub new_not_insiders: u64,
    /// Whether a snapshot save was enqueued after the batch.
    pub save_enqueued: bool,
}

/// Forwards classification decisions to the counters and the user observer.
struct Tally<'a> {
    counts: &'a mut ClassificationCounts,
    observer: &'a mut dyn ClassificationObserver,
}

impl ClassificationObserver for Tally<'_> {
    fn on_insider(&mut self, trader: &TraderId, entry: &TraderWindowEntry) {
        self.counts.on_insider(trader, entry);
        self.observer.on_insider(trader, entry);
    }

    fn on_not_insider(&mut self, trader: &TraderId, entry: &TraderWindowEntry) {
        self.counts.on_not_insider(trader, entry);
        self.observer.on_not_insider(trader, entry);
    }
}

/// Insider classification state machine fed by the fill stream.
#[derive(derive_more::Debug)]
pub struct Pipeline {
    config: PipelineConfig,
    evaluator: InsiderEvaluator,
    window: WindowBuffer<TraderId, TraderWindowEntry>,
    sets: ClassificationSets,
    counts: ClassificationCounts,
    #[debug(skip)]
    observer: Box<dyn ClassificationObserver + Send>,
    persistor: SnapshotPersistor,
    recovery: Recovery,
    cursor: Option<Cursor>,
}

impl Pipeline {
    fn new(
        config: PipelineConfig,
        sets: ClassificationSets,
        counts: ClassificationCounts,
        observer: Box<dyn ClassificationObserver + Send>,
        persistor: SnapshotPersistor,
        recovery: Recovery,
        cursor: Option<Cursor>,
    ) -> Self {
        Self {
            evaluator: InsiderEvaluator::new(config.volume_threshold),
            window: WindowBuffer::new(config.window),
            config,
            sets,
            counts,
            observer,
            persistor,
            recovery,
            cursor,
        }
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// How the classification state was initialized.
    pub fn recovery(&self) -> Recovery {
        self.recovery
    }

    /// Cursor of the last processed block, if any.
    pub fn cursor(&self) -> Option<Cursor> {
        self.cursor
    }

    /// Block number the fill stream should start from.
    pub fn resume_from(&self) -> u64 {
        self.cursor
            .map_or(self.config.start_block, |cursor| cursor.next_block())
    }

    pub fn is_insider(&self, trader: &TraderId) -> bool {
        self.sets.insider.has(trader)
    }

    pub fn is_not_insider(&self, trader: &TraderId) -> bool {
        self.sets.not_insider.has(trader)
    }

    pub fn sets(&self) -> &ClassificationSets {
        &self.sets
    }

    /// Cumulative classification counts, including the restored ones.
    pub fn counts(&self) -> ClassificationCounts {
        self.counts
    }

    /// Window aggregate of a trader not classified yet.
    pub fn window_stats(&self, trader: &TraderId) -> Option<&TraderWindowEntry> {
        self.window.get(trader)
    }

    /// Number of traders with an open window.
    pub fn open_windows(&self) -> usize {
        self.window.len()
    }

    pub async fn persistor_status(&self) -> PersistorStatus {
        self.persistor.status().await
    }

    /// Processes the next batch of the stream.
    ///
    /// Batches must arrive with strictly increasing block numbers. A batch at
    /// or below the last processed block is rejected with
    /// [`Error::BlockOutOfOrder`] without touching any state. If aggregating
    /// the fills fails, none of them are applied and the cursor stays put.
    pub async fn process_batch(&mut self, batch: &FillBatch) -> Result<BatchSummary> {
        let block = batch.cursor.number();
        if let Some(last) = self.cursor.map(|c| c.number()) {
            if block <= last {
                return Err(Error::BlockOutOfOrder(last, block));
            }
        }

        let before = self.counts;
        let mut summary = BatchSummary {
            block,
            fills: batch.len(),
            ..Default::default()
        };

        match batch.reference_timestamp() {
            Some(reference) => {
                summary.qualifying_fills = self.classify(batch, reference)?;
            }
            None => {
                warn!(block, "Batch without timestamp, skipping window processing");
            }
        }
        summary.new_insiders = self.counts.insider - before.insider;
        summary.new_not_insiders = self.counts.not_insider - before.not_insider;

        let cursor = batch.cursor;
        self.cursor = Some(cursor);
        let (sets, counts) = (&mut self.sets, self.counts);
        summary.save_enqueued = self
            .persistor
            .on_batch_processed(|| SaveTask::capture(sets, counts, cursor))
            .await;

        Ok(summary)
    }

    /// Handles blocks removed from the canonical chain.
    ///
    /// Classification state is not reverted. The last processed block moves
    /// back before the earliest rolled back block so their replacements are
    /// accepted.
    pub fn on_rollback(&mut self, blocks: &[Cursor]) -> RollbackOutcome {
        let Some(earliest) = blocks.iter().map(Cursor::number).min() else {
            return RollbackOutcome::NoAutomatedRollback;
        };
        warn!(
            blocks = blocks.len(),
            from_block = earliest,
            "Chain reorganization, classification state is not rolled back"
        );
        if self.cursor.is_some_and(|c| c.number() >= earliest) {
            self.cursor = earliest.checked_sub(1).map(Cursor::at);
        }
        RollbackOutcome::NoAutomatedRollback
    }

    /// Consumes `stream` until it ends or fails.
    ///
    /// Failed batches are logged and skipped, a stream error stops
    /// processing and is returned.
    pub async fn run<St>(&mut self, stream: St) -> Result<()>
    where
        St: Stream<Item = Result<StreamMessage>>,
    {
        futures::pin_mut!(stream);
        while let Some(message) = stream.next().await {
            match message {
                Ok(StreamMessage::Batch(batch)) => match self.process_batch(&batch).await {
                    Ok(summary) => {
                        if summary.new_insiders > 0 || summary.new_not_insiders > 0 {
                            info!(
                                block = summary.block,
                                new_insiders = summary.new_insiders,
                                new_not_insiders = summary.new_not_insiders,
                                insider_total = self.counts.insider,
                                not_insider_total = self.counts.not_insider,
                                "Traders classified"
                            );
                        } else {
                            debug!(block = summary.block, fills = summary.fills, "Batch processed");
                        }
                    }
                    Err(e) => {
                        warn!(?e, block = batch.cursor.number(), "Skipping batch");
                    }
                },
                Ok(StreamMessage::Rollback(blocks)) => {
                    self.on_rollback(&blocks);
                }
                Err(e) => {
                    error!(?e, "Fill stream failed");
                    return Err(e);
                }
            }
        }
        info!("Fill stream ended");
        Ok(())
    }

    /// Saves the current state regardless of the save interval and stops the
    /// snapshot writer once everything is written.
    pub async fn shutdown(mut self) -> ClassificationCounts {
        if let Some(cursor) = self.cursor {
            info!(block = cursor.number(), "Saving final snapshot");
            self.persistor
                .force_save(SaveTask::capture(&mut self.sets, self.counts, cursor))
                .await;
        }
        self.persistor.shutdown().await;
        self.counts
    }

    /// Runs window expiry and aggregation for a batch with a known reference
    /// timestamp, returns the number of qualifying fills.
    fn classify(&mut self, batch: &FillBatch, reference: Timestamp) -> Result<usize> {
        let flushed = self.window.flush(Some(reference));
        self.evaluate(&flushed);

        let (aggregates, qualifying) = self.aggregate(batch)?;

        // Merge into copies first so a failure leaves the window untouched
        let merged = aggregates
            .into_iter()
            .map(
                |(trader, aggregate)| -> Result<(TraderId, TraderWindowEntry)> {
                    match self.window.get(&trader) {
                        Some(existing) => {
                            let mut entry = existing.clone();
                            entry.merge(&aggregate)?;
                            Ok((trader, entry))
                        }
                        None => Ok((trader, aggregate)),
                    }
                },
            )
            .collect::<Result<Vec<_>>>()?;

        for (trader, entry) in merged {
            let within_window = !self.window.is_expired(entry.first_seen(), reference);
            if within_window && self.evaluator.meets_threshold(entry.volume()) {
                self.window.delete(&trader);
                if self.sets.insider.add(&trader) {
                    let mut tally = Tally {
                        counts: &mut self.counts,
                        observer: self.observer.as_mut(),
                    };
                    tally.on_insider(&trader, &entry);
                }
            } else {
                self.window.set(trader, entry);
            }
        }

        let updated = batch
            .fills
            .iter()
            .map(|fill| fill.timestamp)
            .fold(reference, Timestamp::max);
        let flushed = self.window.flush(Some(updated));
        self.evaluate(&flushed);

        Ok(qualifying)
    }

    /// Sums qualifying fills per trader without touching pipeline state.
    ///
    /// A fill qualifies if it is a buy priced below the limit, from a trader
    /// not classified yet, within the window of the trader's first trade.
    fn aggregate(
        &self,
        batch: &FillBatch,
    ) -> Result<(HashMap<TraderId, TraderWindowEntry>, usize)> {
        let mut aggregates: HashMap<TraderId, TraderWindowEntry> = HashMap::new();
        let mut qualifying = 0;

        for fill in &batch.fills {
            if fill.side != Side::Buy
                || !fill.is_priced_below(self.config.min_price_bps)
                || self.sets.is_classified(&fill.trader)
            {
                continue;
            }

            let first_seen = self
                .window
                .get(&fill.trader)
                .or_else(|| aggregates.get(&fill.trader))
                .map_or(fill.timestamp, |entry| entry.first_seen());
            if self.window.is_expired(first_seen, fill.timestamp) {
                continue;
            }

            aggregates
                .entry(fill.trader)
                .or_insert_with(|| TraderWindowEntry::new(fill.trader, first_seen))
                .record(fill)?;
            qualifying += 1;
        }

        Ok((aggregates, qualifying))
    }

    fn evaluate(&mut self, flushed: &HashMap<TraderId, TraderWindowEntry>) {
        if flushed.is_empty() {
            return;
        }
        let mut tally = Tally {
            counts: &mut self.counts,
            observer: self.observer.as_mut(),
        };
        self.evaluator.evaluate(flushed, &mut self.sets, &mut tally);
    }
}
