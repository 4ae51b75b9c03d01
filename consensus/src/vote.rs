//! Vote records — a representative's signed endorsement of one block.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use strand_ledger::Block;
use strand_types::{Amount, BlockHash, Signature};

/// A representative's endorsement of one block hash at one logical time.
///
/// Timestamps are monotonic per representative from the protocol's
/// perspective; two votes from the same representative that satisfy
/// [`Vote::conflicts_with`] constitute a fork proof.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Vote {
    pub timestamp: u64,
    pub signature: Signature,
    pub hash: BlockHash,
}

impl Vote {
    pub fn new(timestamp: u64, signature: Signature, hash: BlockHash) -> Self {
        Self {
            timestamp,
            signature,
            hash,
        }
    }

    /// Whether an incoming vote from the same representative contradicts
    /// this (already recorded) vote.
    ///
    /// A vote for a different hash at a timestamp not newer than the recorded
    /// one can never be a legitimate replacement: equal timestamps for
    /// different hashes are the canonical fork proof, and an older timestamp
    /// for a different hash means the representative signed both orders.
    /// A strictly newer timestamp is an ordinary re-vote.
    pub fn conflicts_with(&self, incoming: &Vote) -> bool {
        self.hash != incoming.hash && self.timestamp >= incoming.timestamp
    }
}

/// Per-representative vote state inside an election.
#[derive(Clone, Debug)]
pub struct RepVoteInfo {
    /// Latched when this representative is caught voting both ways.
    pub conflict_found: bool,
    /// Voting weight recorded with the most recent vote.
    pub weight: Amount,
    /// The vote currently counted for this representative.
    pub last_vote: Vote,
}

impl RepVoteInfo {
    pub fn new(weight: Amount, last_vote: Vote) -> Self {
        Self {
            conflict_found: false,
            weight,
            last_vote,
        }
    }
}

/// A candidate block in an election.
///
/// `refs` counts how many representatives' counted votes point at this
/// block; candidates offered by the engine's `add` start at zero.
#[derive(Clone, Debug)]
pub struct BlockReference {
    pub refs: u32,
    pub block: Arc<Block>,
}
