use std::collections::HashMap;

use super::{ClassificationObserver, ClassificationSets};
use crate::types::{TraderId, TraderWindowEntry, Usdc};

/// Classifies traders whose window elapsed by their total window volume.
#[derive(Clone, Copy, Debug)]
pub struct InsiderEvaluator {
    volume_threshold: Usdc,
}

impl InsiderEvaluator {
    pub fn new(volume_threshold: Usdc) -> Self {
        Self { volume_threshold }
    }

    pub fn volume_threshold(&self) -> Usdc {
        self.volume_threshold
    }

    /// Checks if the volume qualifies as insider activity.
    pub fn meets_threshold(&self, volume: Usdc) -> bool {
        volume >= self.volume_threshold
    }

    /// Routes flushed window entries into classification sets.
    ///
    /// Traders already in the not-insider set are skipped and never moved.
    /// Insiders are added one by one, not-insiders in a single bulk insert
    /// after the loop. The observer is only notified for traders whose hash
    /// was actually inserted.
    pub fn evaluate<O: ClassificationObserver + ?Sized>(
        &self,
        flushed: &HashMap<TraderId, TraderWindowEntry>,
        sets: &mut ClassificationSets,
        observer: &mut O,
    ) {
        let mut not_insiders = Vec::new();

        for (trader, entry) in flushed {
            if sets.not_insider.has(trader) {
                continue;
            }
            if self.meets_threshold(entry.volume()) {
                if sets.insider.add(trader) {
                    observer.on_insider(trader, entry);
                }
            } else {
                not_insiders.push(trader);
            }
        }

        if not_insiders.is_empty() {
            return;
        }
        for trader in sets.not_insider.add_many(not_insiders) {
            if let Some(entry) = flushed.get(trader) {
                observer.on_not_insider(trader, entry);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use alloy::primitives::{Address, TxHash, U256, address};

    use super::*;
    use crate::{
        classify::ClassificationCounts,
        types::{Fill, Side},
    };

    const A: Address = address!("0x00000000000000000000000000000000000000aa");
    const B: Address = address!("0x00000000000000000000000000000000000000bb");

    fn entry(trader: Address, volume: Usdc) -> TraderWindowEntry {
        let mut entry = TraderWindowEntry::new(trader, 0);
        entry
            .record(&Fill {
                trader,
                asset_id: U256::from(7),
                side: Side::Buy,
                usdc: volume,
                shares: volume * 2,
                timestamp: 0,
                block_number: 1,
                tx_hash: TxHash::ZERO,
                tx_index: 0,
                log_index: 0,
            })
            .unwrap();
        entry
    }

    #[test]
    fn test_routes_by_threshold() {
        let evaluator = InsiderEvaluator::new(4_000_000_000);
        let mut sets = ClassificationSets::new();
        let mut counts = ClassificationCounts::default();

        let flushed = HashMap::from([
            (A, entry(A, 4_000_000_000)),
            (B, entry(B, 3_999_999_999)),
        ]);
        evaluator.evaluate(&flushed, &mut sets, &mut counts);

        assert!(sets.insider.has(&A) && !sets.not_insider.has(&A));
        assert!(sets.not_insider.has(&B) && !sets.insider.has(&B));
        assert_eq!(counts, ClassificationCounts::new(1, 1));
    }

    #[test]
    fn test_not_insider_is_never_promoted() {
        let evaluator = InsiderEvaluator::new(4_000_000_000);
        let mut sets = ClassificationSets::new();
        sets.not_insider.add(&A);
        let mut counts = ClassificationCounts::default();

        let flushed = HashMap::from([(A, entry(A, 9_000_000_000))]);
        evaluator.evaluate(&flushed, &mut sets, &mut counts);

        assert!(!sets.insider.has(&A));
        assert!(sets.not_insider.has(&A));
        assert_eq!(counts, ClassificationCounts::default());
    }

    #[test]
    fn test_existing_member_is_not_counted_again() {
        let evaluator = InsiderEvaluator::new(4_000_000_000);
        let mut sets = ClassificationSets::new();
        sets.insider.add(&A);
        sets.insider.clear_unsaved();
        let mut counts = ClassificationCounts::default();

        let flushed = HashMap::from([
            (A, entry(A, 5_000_000_000)),
            (B, entry(B, 1_000_000)),
        ]);
        evaluator.evaluate(&flushed, &mut sets, &mut counts);

        assert!(sets.insider.has(&A));
        assert!(sets.insider.unsaved().is_empty());
        assert!(sets.not_insider.has(&B));
        assert_eq!(counts, ClassificationCounts::new(0, 1));
    }
}
