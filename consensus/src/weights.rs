//! Cached representative weights, maintained incrementally.
//!
//! Avoids scanning all accounts to compute a representative's delegated
//! weight. The cache is rebuilt once at startup from the full account set,
//! then updated as representative changes are confirmed. Weight is
//! denominated in raw units — each account's delegated weight equals its
//! balance.

use std::collections::HashMap;

use strand_types::{Account, Amount};

/// Per-representative delegated weight totals.
pub struct RepWeightCache {
    /// representative → total delegated balance.
    weights: HashMap<Account, Amount>,
    /// Sum over all representatives.
    total_weight: Amount,
}

impl RepWeightCache {
    pub fn new() -> Self {
        Self {
            weights: HashMap::new(),
            total_weight: Amount::ZERO,
        }
    }

    /// Add delegated weight to a representative.
    pub fn add_weight(&mut self, rep: &Account, weight: Amount) {
        let entry = self.weights.entry(*rep).or_insert(Amount::ZERO);
        *entry = entry.saturating_add(weight);
        self.total_weight = self.total_weight.saturating_add(weight);
    }

    /// Remove delegated weight from a representative.
    pub fn remove_weight(&mut self, rep: &Account, weight: Amount) {
        if let Some(entry) = self.weights.get_mut(rep) {
            let removed = weight.min(*entry);
            *entry = entry.saturating_sub(removed);
            self.total_weight = self.total_weight.saturating_sub(removed);
            if entry.is_zero() {
                self.weights.remove(rep);
            }
        }
    }

    /// Move an account's delegated weight between representatives.
    pub fn change_rep(&mut self, old_rep: &Account, new_rep: &Account, weight: Amount) {
        self.remove_weight(old_rep, weight);
        self.add_weight(new_rep, weight);
    }

    /// A representative's current weight; zero when unknown.
    pub fn weight(&self, rep: &Account) -> Amount {
        self.weights.get(rep).copied().unwrap_or(Amount::ZERO)
    }

    pub fn total_weight(&self) -> Amount {
        self.total_weight
    }

    pub fn all_weights(&self) -> &HashMap<Account, Amount> {
        &self.weights
    }

    pub fn rep_count(&self) -> usize {
        self.weights.len()
    }

    /// Rebuild from a full account sweep. Each item yields
    /// `(representative, balance)` — every account's balance is delegated
    /// to its representative.
    pub fn rebuild<I: IntoIterator<Item = (Account, Amount)>>(&mut self, accounts: I) {
        self.weights.clear();
        self.total_weight = Amount::ZERO;
        for (rep, balance) in accounts {
            self.add_weight(&rep, balance);
        }
    }
}

impl Default for RepWeightCache {
    fn default() -> Self {
        Self::new()
    }
}
