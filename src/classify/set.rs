use std::{collections::HashSet, fmt};

use alloy::primitives::keccak256;
use serde::{Deserialize, Serialize};

use crate::types::TraderId;

/// 32-bit hash the classification sets are keyed by.
pub type TraderHash = u32;

/// Hashes a trader address to the 32-bit key used by classification sets.
///
/// Takes the leading four bytes of `keccak256(address)`. Distinct traders may
/// collide; the sets then answer membership for both, which is accepted.
pub fn trader_hash(trader: &TraderId) -> TraderHash {
    let digest = keccak256(trader);
    u32::from_be_bytes([digest[0], digest[1], digest[2], digest[3]])
}

/// Identifier of a classification set in the snapshot store.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SetId {
    Insider,
    NotInsider,
}

impl SetId {
    pub fn as_str(&self) -> &'static str {
        match self {
            SetId::Insider => "insider",
            SetId::NotInsider => "not-insider",
        }
    }

    pub fn all() -> [SetId; 2] {
        [SetId::Insider, SetId::NotInsider]
    }
}

impl fmt::Display for SetId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Exact-membership set of trader hashes tracking members added since the
/// last durable snapshot.
#[derive(Clone, Debug)]
pub struct ClassificationSet {
    id: SetId,
    members: HashSet<TraderHash>,
    unsaved: HashSet<TraderHash>,
}

impl ClassificationSet {
    pub fn new(id: SetId) -> Self {
        Self {
            id,
            members: HashSet::new(),
            unsaved: HashSet::new(),
        }
    }

    pub fn id(&self) -> SetId {
        self.id
    }

    /// Adds a trader, returns `true` if its hash was not present yet.
    pub fn add(&mut self, trader: &TraderId) -> bool {
        self.insert_hash(trader_hash(trader))
    }

    /// Adds all traders, returns those whose hash was not present yet.
    pub fn add_many<'a>(
        &mut self,
        traders: impl IntoIterator<Item = &'a TraderId>,
    ) -> Vec<&'a TraderId> {
        traders
            .into_iter()
            .filter(|trader| self.insert_hash(trader_hash(trader)))
            .collect()
    }

    pub fn has(&self, trader: &TraderId) -> bool {
        self.members.contains(&trader_hash(trader))
    }

    pub fn contains_hash(&self, hash: TraderHash) -> bool {
        self.members.contains(&hash)
    }

    /// Number of distinct hashes.
    pub fn len(&self) -> usize {
        self.members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    /// Hashes added since the last clear, restore or take.
    pub fn unsaved(&self) -> &HashSet<TraderHash> {
        &self.unsaved
    }

    pub fn clear_unsaved(&mut self) {
        self.unsaved.clear();
    }

    /// Swaps the unsaved delta for an empty one, handing the current delta
    /// to a pending snapshot write.
    pub fn take_unsaved(&mut self) -> HashSet<TraderHash> {
        std::mem::take(&mut self.unsaved)
    }

    /// Returns a delta whose write did not complete, so it is included in the
    /// next snapshot.
    pub fn restore_unsaved(&mut self, hashes: impl IntoIterator<Item = TraderHash>) {
        self.unsaved.extend(hashes);
    }

    /// Replaces membership with already durable `hashes`.
    pub fn restore(&mut self, hashes: impl IntoIterator<Item = TraderHash>) {
        self.members = hashes.into_iter().collect();
        self.unsaved.clear();
    }

    fn insert_hash(&mut self, hash: TraderHash) -> bool {
        let inserted = self.members.insert(hash);
        if inserted {
            self.unsaved.insert(hash);
        }
        inserted
    }
}

/// Insider and not-insider classification sets.
#[derive(Clone, Debug)]
pub struct ClassificationSets {
    pub insider: ClassificationSet,
    pub not_insider: ClassificationSet,
}

impl ClassificationSets {
    pub fn new() -> Self {
        Self {
            insider: ClassificationSet::new(SetId::Insider),
            not_insider: ClassificationSet::new(SetId::NotInsider),
        }
    }

    /// Checks if the trader is in either set.
    pub fn is_classified(&self, trader: &TraderId) -> bool {
        let hash = trader_hash(trader);
        self.insider.contains_hash(hash) || self.not_insider.contains_hash(hash)
    }

    pub fn get(&self, id: SetId) -> &ClassificationSet {
        match id {
            SetId::Insider => &self.insider,
            SetId::NotInsider => &self.not_insider,
        }
    }

    pub fn get_mut(&mut self, id: SetId) -> &mut ClassificationSet {
        match id {
            SetId::Insider => &mut self.insider,
            SetId::NotInsider => &mut self.not_insider,
        }
    }
}

impl Default for ClassificationSets {
    fn default() -> Self {
        Self::new()
    }
}
