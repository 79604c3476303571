//! Trader classification.
//!
//! [`ClassificationSets`] hold traders already classified as insiders or
//! not-insiders, [`InsiderEvaluator`] routes traders whose window elapsed into
//! one of them and reports each decision to a [`ClassificationObserver`].

mod evaluator;
mod set;

pub use evaluator::InsiderEvaluator;
pub use set::{ClassificationSet, ClassificationSets, SetId, TraderHash, trader_hash};

use crate::types::{TraderId, TraderWindowEntry};

/// Receives classification decisions, eg. to update counters or metrics.
pub trait ClassificationObserver {
    fn on_insider(&mut self, _trader: &TraderId, _entry: &TraderWindowEntry) {}

    fn on_not_insider(&mut self, _trader: &TraderId, _entry: &TraderWindowEntry) {}
}

impl ClassificationObserver for () {}

/// Cumulative number of traders classified into each set.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ClassificationCounts {
    pub insider: u64,
    pub not_insider: u64,
}

impl ClassificationCounts {
    pub fn new(insider: u64, not_insider: u64) -> Self {
        Self {
            insider,
            not_insider,
        }
    }

    pub fn get(&self, id: SetId) -> u64 {
        match id {
            SetId::Insider => self.insider,
            SetId::NotInsider => self.not_insider,
        }
    }
}

impl ClassificationObserver for ClassificationCounts {
    fn on_insider(&mut self, _trader: &TraderId, _entry: &TraderWindowEntry) {
        self.insider += 1;
    }

    fn on_not_insider(&mut self, _trader: &TraderId, _entry: &TraderWindowEntry) {
        self.not_insider += 1;
    }
}
