//! Double-spend-safe input selection over the spend-salt chain.
//!
//! The wallet's unspent view lags behind what has already been shielded and
//! queued, so the allocator keeps its own record of consumed salts. That
//! record, not the unspent view, decides whether a note may be spent.
//!
//! Reconciliation runs on two paths:
//!
//! 1. **Mark on success**: a salt is recorded only once its transaction has
//!    been shielded. A failed shield leaves the salt free for a later attempt.
//! 2. **Unmark on reject**: when the network rejects a queued job, its input
//!    salts are unlocked so the unspent view is authoritative for them again.

use std::collections::HashSet;
use stressnet_types::{Salt, SpendUnit};

/// Tracks consumed salts for one participant.
#[derive(Debug, Default)]
pub struct SpendChainAllocator {
    used: HashSet<Salt>,
}

impl SpendChainAllocator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Pick the first candidate whose salt has not been consumed.
    ///
    /// Candidates are scanned in the order the wallet returned them.
    pub fn select_input<'a>(&self, candidates: &'a [SpendUnit]) -> Option<&'a SpendUnit> {
        candidates.iter().find(|note| !self.used.contains(&note.salt))
    }

    /// Record a salt as consumed. Returns false if it already was.
    pub fn mark_used(&mut self, salt: Salt) -> bool {
        self.used.insert(salt)
    }

    /// Release salts so they become selectable again. Returns how many were held.
    pub fn unlock<'a>(&mut self, salts: impl IntoIterator<Item = &'a Salt>) -> usize {
        salts
            .into_iter()
            .filter(|salt| self.used.remove(*salt))
            .count()
    }

    pub fn is_used(&self, salt: &Salt) -> bool {
        self.used.contains(salt)
    }

    /// Number of salts currently consumed.
    pub fn len(&self) -> usize {
        self.used.len()
    }

    pub fn is_empty(&self) -> bool {
        self.used.is_empty()
    }
}
