//! Read-only ledger view consumed by the node core.

use std::collections::HashMap;
use std::sync::Arc;

use strand_types::{Account, Amount, BlockHash, Timestamp};

use crate::Block;

/// Head state of an account chain.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct AccountInfo {
    /// Height of the head block.
    pub head_height: u64,
    /// Hash of the head block.
    pub head: BlockHash,
}

/// Reward eligibility tied to a prior block.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RewardableInfo {
    /// Earliest timestamp at which the reward may be claimed.
    pub valid_timestamp: Timestamp,
    /// The claimable amount.
    pub amount: Amount,
}

/// Read view over the ledger.
///
/// Implementations take consistent snapshots per call; the core holds no
/// transaction handle across calls.
pub trait Ledger: Send + Sync {
    /// Head information for an account, or `None` if the account has no chain.
    fn account_info(&self, account: &Account) -> Option<AccountInfo>;

    /// Look up a block by hash.
    fn block(&self, hash: &BlockHash) -> Option<Arc<Block>>;

    /// Rewardable state for a representative keyed by the triggering block.
    fn rewardable_info(&self, representative: &Account, previous: &BlockHash)
        -> Option<RewardableInfo>;

    /// Current per-representative voting weights.
    fn representative_weights(&self) -> HashMap<Account, Amount>;

    /// Total weight considered online for quorum purposes.
    fn online_weight(&self) -> Amount;
}
