//! The per-account election record.
//!
//! An election decides which block occupies one `(account, height)` slot.
//! It tracks candidate blocks, the latest counted vote per representative,
//! and evidence of representatives voting both ways. The bookkeeping here
//! maintains three invariants the engine's tally relies on:
//!
//! 1. the ref-count sum over candidates equals the number of counted votes,
//!    and every counted vote's hash is a live candidate;
//! 2. a representative has a `conflicts` entry exactly when its
//!    `conflict_found` flag is set;
//! 3. a non-zero `winner` is always a live candidate.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use strand_ledger::Block;
use strand_types::{Account, Amount, BlockHash};

use crate::vote::{BlockReference, RepVoteInfo, Vote};

/// What applying a confirmation vote did to the election.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ConfirmOutcome {
    /// First vote from this representative.
    Recorded,
    /// The representative re-voted for a different block at a newer timestamp.
    Replaced,
    /// Same block as before; timestamp/weight refreshed.
    Refreshed,
    /// The vote contradicts the recorded one. `first` is set when this
    /// latched the election's fork flag.
    Conflict { first: bool },
    /// Vote from a representative already caught equivocating.
    Ignored,
}

/// In-memory state of one account's election.
#[derive(Clone, Debug)]
pub struct Election {
    /// The account whose chain slot is being decided.
    pub account: Account,
    /// The chain height being decided.
    pub height: u64,
    /// Latched when two contradictory votes from one representative are seen.
    pub fork_found: bool,
    /// Scheduler wake-ups since creation.
    pub rounds: u32,
    /// Scheduler wake-ups since the fork was detected.
    pub rounds_fork: u32,
    /// Consecutive rounds the current winner has led the tally.
    pub wins: u32,
    /// Consecutive rounds the leading weight met the confirmation threshold.
    pub confirms: u32,
    /// Current leading block hash (zero before the first tally with votes).
    pub winner: BlockHash,
    /// When the engine will next process this election.
    pub wakeup: Instant,
    /// Candidate blocks by hash.
    pub blocks: HashMap<BlockHash, BlockReference>,
    /// Latest counted vote per representative.
    pub votes: HashMap<Account, RepVoteInfo>,
    /// The contradicting vote for each equivocating representative.
    pub conflicts: HashMap<Account, Vote>,
}

impl Election {
    pub fn new(account: Account, height: u64, wakeup: Instant) -> Self {
        Self {
            account,
            height,
            fork_found: false,
            rounds: 0,
            rounds_fork: 0,
            wins: 0,
            confirms: 0,
            winner: BlockHash::ZERO,
            wakeup,
            blocks: HashMap::new(),
            votes: HashMap::new(),
            conflicts: HashMap::new(),
        }
    }

    /// Offer a candidate block. Ref-counts are untouched; they are driven
    /// exclusively by votes.
    pub fn insert_candidate(&mut self, block: Arc<Block>) {
        self.blocks
            .entry(block.hash)
            .or_insert(BlockReference { refs: 0, block });
    }

    /// Look up a candidate block.
    pub fn block(&self, hash: &BlockHash) -> Option<Arc<Block>> {
        self.blocks.get(hash).map(|r| r.block.clone())
    }

    /// Apply a confirmation vote from `rep`.
    pub fn apply_confirm(
        &mut self,
        rep: Account,
        vote: Vote,
        block: Arc<Block>,
        weight: Amount,
    ) -> ConfirmOutcome {
        let existing = self
            .votes
            .get(&rep)
            .map(|info| (info.conflict_found, info.last_vote.clone()));

        match existing {
            None => {
                self.insert_candidate(block);
                self.add_ref(&vote.hash);
                self.votes.insert(rep, RepVoteInfo::new(weight, vote));
                ConfirmOutcome::Recorded
            }
            Some((true, _)) => ConfirmOutcome::Ignored,
            Some((false, last)) if last.hash == vote.hash => {
                if let Some(info) = self.votes.get_mut(&rep) {
                    if vote.timestamp > info.last_vote.timestamp {
                        info.last_vote = vote;
                    }
                    info.weight = weight;
                }
                ConfirmOutcome::Refreshed
            }
            Some((false, last)) if last.conflicts_with(&vote) => {
                // The recorded vote stays counted; the contradicting one is
                // kept as evidence.
                if let Some(info) = self.votes.get_mut(&rep) {
                    info.conflict_found = true;
                    info.weight = weight;
                }
                self.conflicts.insert(rep, vote);
                let first = !self.fork_found;
                self.fork_found = true;
                ConfirmOutcome::Conflict { first }
            }
            Some((false, last)) => {
                // Strictly newer timestamp for a different hash: re-vote.
                self.del_ref(&last.hash);
                self.insert_candidate(block);
                self.add_ref(&vote.hash);
                if let Some(info) = self.votes.get_mut(&rep) {
                    info.last_vote = vote;
                    info.weight = weight;
                }
                ConfirmOutcome::Replaced
            }
        }
    }

    /// Apply a ready-made fork proof: `vote` is counted, `other` is stored as
    /// the contradicting evidence. Returns true when this latched the fork
    /// flag for the first time.
    pub fn apply_conflict(
        &mut self,
        rep: Account,
        vote: Vote,
        block: Arc<Block>,
        other: Vote,
        weight: Amount,
    ) -> bool {
        let old_hash = self.votes.get(&rep).map(|info| info.last_vote.hash);
        match old_hash {
            Some(old) if old == vote.hash => {}
            Some(old) => {
                self.del_ref(&old);
                self.insert_candidate(block);
                self.add_ref(&vote.hash);
            }
            None => {
                self.insert_candidate(block);
                self.add_ref(&vote.hash);
            }
        }

        self.votes.insert(
            rep,
            RepVoteInfo {
                conflict_found: true,
                weight,
                last_vote: vote,
            },
        );
        self.conflicts.insert(rep, other);

        let first = !self.fork_found;
        self.fork_found = true;
        first
    }

    fn add_ref(&mut self, hash: &BlockHash) {
        if let Some(reference) = self.blocks.get_mut(hash) {
            reference.refs += 1;
        }
    }

    fn del_ref(&mut self, hash: &BlockHash) {
        if let Some(reference) = self.blocks.get_mut(hash) {
            reference.refs = reference.refs.saturating_sub(1);
            if reference.refs == 0 {
                self.blocks.remove(hash);
                if self.winner == *hash {
                    self.winner = BlockHash::ZERO;
                    self.wins = 0;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use strand_ledger::BlockOpcode;
    use strand_types::{Signature, Timestamp};

    fn make_account(byte: u8) -> Account {
        Account::new([byte; 32])
    }

    fn make_block(account: Account, height: u64, link_byte: u8) -> Arc<Block> {
        Arc::new(Block::new(
            BlockOpcode::Send,
            account,
            height,
            BlockHash::new([0xAA; 32]),
            make_account(0xEE),
            Amount::new(100),
            BlockHash::new([link_byte; 32]),
            Timestamp::new(1000),
            Signature::ZERO,
        ))
    }

    fn make_vote(timestamp: u64, hash: BlockHash) -> Vote {
        Vote::new(timestamp, Signature::ZERO, hash)
    }

    fn make_election() -> Election {
        Election::new(make_account(1), 5, Instant::now())
    }

    fn refs_sum(election: &Election) -> u32 {
        election.blocks.values().map(|r| r.refs).sum()
    }

    fn check_invariants(election: &Election) {
        assert_eq!(refs_sum(election), election.votes.len() as u32);
        for info in election.votes.values() {
            assert!(election.blocks.contains_key(&info.last_vote.hash));
        }
        for (rep, info) in &election.votes {
            assert_eq!(info.conflict_found, election.conflicts.contains_key(rep));
        }
        if !election.winner.is_zero() {
            assert!(election.blocks.contains_key(&election.winner));
        }
    }

    #[test]
    fn first_vote_is_recorded() {
        let mut election = make_election();
        let block = make_block(election.account, 5, 1);
        let outcome =
            election.apply_confirm(make_account(2), make_vote(10, block.hash), block.clone(), Amount::new(60));

        assert_eq!(outcome, ConfirmOutcome::Recorded);
        assert_eq!(election.blocks.get(&block.hash).map(|r| r.refs), Some(1));
        check_invariants(&election);
    }

    #[test]
    fn revote_moves_the_ref() {
        let mut election = make_election();
        let rep = make_account(2);
        let b1 = make_block(election.account, 5, 1);
        let b2 = make_block(election.account, 5, 2);

        election.apply_confirm(rep, make_vote(10, b1.hash), b1.clone(), Amount::new(60));
        let outcome = election.apply_confirm(rep, make_vote(11, b2.hash), b2.clone(), Amount::new(60));

        assert_eq!(outcome, ConfirmOutcome::Replaced);
        // b1 lost its only ref and is gone; b2 carries it now.
        assert!(!election.blocks.contains_key(&b1.hash));
        assert_eq!(election.blocks.get(&b2.hash).map(|r| r.refs), Some(1));
        check_invariants(&election);
    }

    #[test]
    fn revote_keeps_shared_candidate_alive() {
        let mut election = make_election();
        let b1 = make_block(election.account, 5, 1);
        let b2 = make_block(election.account, 5, 2);

        election.apply_confirm(make_account(2), make_vote(10, b1.hash), b1.clone(), Amount::new(60));
        election.apply_confirm(make_account(3), make_vote(10, b1.hash), b1.clone(), Amount::new(40));
        election.apply_confirm(make_account(2), make_vote(11, b2.hash), b2.clone(), Amount::new(60));

        assert_eq!(election.blocks.get(&b1.hash).map(|r| r.refs), Some(1));
        assert_eq!(election.blocks.get(&b2.hash).map(|r| r.refs), Some(1));
        check_invariants(&election);
    }

    #[test]
    fn same_hash_refreshes_timestamp() {
        let mut election = make_election();
        let rep = make_account(2);
        let block = make_block(election.account, 5, 1);

        election.apply_confirm(rep, make_vote(10, block.hash), block.clone(), Amount::new(60));
        let outcome = election.apply_confirm(rep, make_vote(12, block.hash), block.clone(), Amount::new(70));

        assert_eq!(outcome, ConfirmOutcome::Refreshed);
        let info = election.votes.get(&rep).expect("vote recorded");
        assert_eq!(info.last_vote.timestamp, 12);
        assert_eq!(info.weight, Amount::new(70));
        assert_eq!(refs_sum(&election), 1);
        check_invariants(&election);
    }

    #[test]
    fn stale_different_hash_latches_conflict() {
        let mut election = make_election();
        let rep = make_account(2);
        let b1 = make_block(election.account, 5, 1);
        let b2 = make_block(election.account, 5, 2);

        election.apply_confirm(rep, make_vote(10, b1.hash), b1.clone(), Amount::new(60));
        let outcome = election.apply_confirm(rep, make_vote(10, b2.hash), b2.clone(), Amount::new(60));

        assert_eq!(outcome, ConfirmOutcome::Conflict { first: true });
        assert!(election.fork_found);
        // The counted vote is unchanged; the contradicting one is evidence.
        let info = election.votes.get(&rep).expect("vote recorded");
        assert!(info.conflict_found);
        assert_eq!(info.last_vote.hash, b1.hash);
        assert_eq!(election.conflicts.get(&rep).map(|v| v.hash), Some(b2.hash));
        check_invariants(&election);
    }

    #[test]
    fn second_conflict_is_not_first() {
        let mut election = make_election();
        let b1 = make_block(election.account, 5, 1);
        let b2 = make_block(election.account, 5, 2);

        election.apply_confirm(make_account(2), make_vote(10, b1.hash), b1.clone(), Amount::new(60));
        election.apply_confirm(make_account(3), make_vote(10, b1.hash), b1.clone(), Amount::new(40));

        let first = election.apply_confirm(make_account(2), make_vote(10, b2.hash), b2.clone(), Amount::new(60));
        let second = election.apply_confirm(make_account(3), make_vote(9, b2.hash), b2.clone(), Amount::new(40));

        assert_eq!(first, ConfirmOutcome::Conflict { first: true });
        assert_eq!(second, ConfirmOutcome::Conflict { first: false });
        check_invariants(&election);
    }

    #[test]
    fn equivocating_rep_votes_are_ignored() {
        let mut election = make_election();
        let rep = make_account(2);
        let b1 = make_block(election.account, 5, 1);
        let b2 = make_block(election.account, 5, 2);

        election.apply_confirm(rep, make_vote(10, b1.hash), b1.clone(), Amount::new(60));
        election.apply_confirm(rep, make_vote(10, b2.hash), b2.clone(), Amount::new(60));

        let outcome = election.apply_confirm(rep, make_vote(20, b2.hash), b2.clone(), Amount::new(60));
        assert_eq!(outcome, ConfirmOutcome::Ignored);
        check_invariants(&election);
    }

    #[test]
    fn apply_conflict_records_both_votes() {
        let mut election = make_election();
        let rep = make_account(2);
        let b1 = make_block(election.account, 5, 1);
        let v1 = make_vote(10, b1.hash);
        let v2 = make_vote(10, BlockHash::new([2; 32]));

        let first = election.apply_conflict(rep, v1.clone(), b1.clone(), v2.clone(), Amount::new(60));

        assert!(first);
        assert!(election.fork_found);
        assert_eq!(
            election.votes.get(&rep).map(|i| i.last_vote.hash),
            Some(b1.hash)
        );
        assert_eq!(election.conflicts.get(&rep), Some(&v2));
        check_invariants(&election);
    }

    #[test]
    fn candidate_without_votes_survives() {
        let mut election = make_election();
        let block = make_block(election.account, 5, 1);
        election.insert_candidate(block.clone());

        assert_eq!(election.blocks.get(&block.hash).map(|r| r.refs), Some(0));
        check_invariants(&election);
    }

    #[test]
    fn winner_cleared_when_its_candidate_drops() {
        let mut election = make_election();
        let rep = make_account(2);
        let b1 = make_block(election.account, 5, 1);
        let b2 = make_block(election.account, 5, 2);

        election.apply_confirm(rep, make_vote(10, b1.hash), b1.clone(), Amount::new(60));
        election.winner = b1.hash;
        election.wins = 2;

        election.apply_confirm(rep, make_vote(11, b2.hash), b2.clone(), Amount::new(60));

        assert!(election.winner.is_zero());
        assert_eq!(election.wins, 0);
        check_invariants(&election);
    }
}
