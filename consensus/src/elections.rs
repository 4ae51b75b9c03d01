//! The election engine.
//!
//! A dual-indexed collection of per-account elections: a hash map for
//! account lookup and an ordered set keyed by wake-up time. One dedicated
//! worker pops the earliest due election, re-tallies it with the lock
//! released, then reschedules it. Votes arriving between wake-ups mutate
//! the election in place; a vote that arrives while its election is being
//! processed is dropped, exactly like a vote for an unknown account.

use std::collections::{BTreeSet, HashMap};
use std::sync::{Arc, Condvar, Mutex};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use strand_ledger::{Block, Ledger};
use strand_types::{Account, Amount, BlockHash, Signature};

use crate::election::{ConfirmOutcome, Election};
use crate::error::ConsensusError;
use crate::vote::Vote;

/// Network side of an election: publish our vote, or ask others for theirs.
pub trait ElectionNetwork: Send + Sync {
    /// Broadcast the local representative's vote for the winning block.
    fn broadcast_confirm(&self, account: &Account, height: u64, winner: &Arc<Block>);

    /// Ask `representatives` to confirm `winner` for `(account, height)`.
    fn request_confirm(
        &self,
        account: &Account,
        height: u64,
        winner: &BlockHash,
        representatives: &[Account],
    );
}

/// Terminal outcome of an election, delivered to the status observer.
#[derive(Clone, Debug)]
pub struct ElectionStatus {
    pub account: Account,
    pub height: u64,
    /// The winner led the final tally.
    pub win: bool,
    /// The winner gathered the confirmation threshold for the required
    /// number of consecutive rounds.
    pub confirm: bool,
    /// The election was destroyed without resolution (round cap hit).
    pub error: bool,
    /// The winning block, when one was held.
    pub block: Option<Arc<Block>>,
}

/// Callback invoked (off-lock, on the worker thread) for each terminal
/// election outcome.
pub type StatusObserver = Box<dyn Fn(&ElectionStatus) + Send + Sync>;

/// Engine tuning. The interval defaults are protocol constants; the caps and
/// quorum are node configuration.
#[derive(Clone, Debug)]
pub struct ElectionsConfig {
    /// Confirmation threshold as basis points of online weight.
    pub quorum_bps: u32,
    /// Consecutive threshold-meeting rounds required to confirm.
    pub confirms_required: u32,
    /// Round cap for non-forked elections.
    pub rounds_max: u32,
    /// Round cap counted from fork detection for forked elections.
    pub rounds_fork_max: u32,
    /// Maximum number of simultaneous elections.
    pub max_elections: usize,
    /// Set when this node votes as a representative itself.
    pub local_representative: Option<Account>,
    /// First wake-up delay for a fresh election.
    pub non_fork_delay: Duration,
    /// Wake-up interval while unforked.
    pub non_fork_interval: Duration,
    /// Wake-up delay applied when a fork is first detected.
    pub fork_delay: Duration,
    /// Wake-up interval while forked.
    pub fork_interval: Duration,
}

impl Default for ElectionsConfig {
    fn default() -> Self {
        Self {
            quorum_bps: 6700,
            confirms_required: 2,
            rounds_max: 300,
            rounds_fork_max: 120,
            max_elections: 16_384,
            local_representative: None,
            non_fork_delay: Elections::NON_FORK_ELECTION_DELAY,
            non_fork_interval: Elections::NON_FORK_ELECTION_INTERVAL,
            fork_delay: Elections::FORK_ELECTION_DELAY,
            fork_interval: Elections::FORK_ELECTION_INTERVAL,
        }
    }
}

/// The election engine. Dropping it stops and joins the worker.
pub struct Elections {
    shared: Arc<Shared>,
    thread: Mutex<Option<JoinHandle<()>>>,
}

struct Shared {
    config: ElectionsConfig,
    ledger: Arc<dyn Ledger>,
    network: Arc<dyn ElectionNetwork>,
    observer: StatusObserver,
    state: Mutex<State>,
    condition: Condvar,
}

struct State {
    elections: HashMap<Account, Election>,
    by_wakeup: BTreeSet<(Instant, Account)>,
    stopped: bool,
}

impl State {
    /// Insert (or replace) an election in both indices. Returns true when
    /// the inserted entry became the earliest wake-up.
    fn insert(&mut self, election: Election) -> bool {
        let key = (election.wakeup, election.account);
        if let Some(prev) = self.elections.insert(election.account, election) {
            self.by_wakeup.remove(&(prev.wakeup, prev.account));
        }
        self.by_wakeup.insert(key);
        self.by_wakeup.iter().next() == Some(&key)
    }

    /// Remove an election from both indices.
    fn remove(&mut self, account: &Account) -> Option<Election> {
        let election = self.elections.remove(account)?;
        self.by_wakeup.remove(&(election.wakeup, election.account));
        Some(election)
    }
}

impl Elections {
    pub const FORK_ELECTION_DELAY: Duration = Duration::from_secs(60);
    pub const FORK_ELECTION_INTERVAL: Duration = Duration::from_secs(30);
    pub const NON_FORK_ELECTION_DELAY: Duration = Duration::from_secs(1);
    pub const NON_FORK_ELECTION_INTERVAL: Duration = Duration::from_secs(1);

    /// Create the engine and start its worker thread.
    pub fn new(
        config: ElectionsConfig,
        ledger: Arc<dyn Ledger>,
        network: Arc<dyn ElectionNetwork>,
        observer: StatusObserver,
    ) -> Self {
        let shared = Arc::new(Shared {
            config,
            ledger,
            network,
            observer,
            state: Mutex::new(State {
                elections: HashMap::new(),
                by_wakeup: BTreeSet::new(),
                stopped: false,
            }),
            condition: Condvar::new(),
        });

        let worker = Arc::clone(&shared);
        let handle = std::thread::Builder::new()
            .name("elections".to_string())
            .spawn(move || worker.run())
            .expect("failed to spawn election worker");

        Self {
            shared,
            thread: Mutex::new(Some(handle)),
        }
    }

    /// Offer candidate blocks.
    ///
    /// A block for an account without an election starts one at that block's
    /// height; a block for an existing election at the same height joins its
    /// candidate set; any other height is ignored.
    pub fn add(&self, blocks: &[Arc<Block>]) -> Result<(), ConsensusError> {
        let mut notify = false;
        let mut result = Ok(());
        {
            let mut guard = self.shared.state.lock().unwrap();
            if guard.stopped {
                return Ok(());
            }
            let now = Instant::now();
            for block in blocks {
                if let Some(election) = guard.elections.get_mut(&block.account) {
                    if election.height == block.height {
                        election.insert_candidate(block.clone());
                    } else {
                        tracing::trace!(
                            account = %block.account,
                            height = block.height,
                            election_height = election.height,
                            "candidate height mismatch, ignored"
                        );
                    }
                    continue;
                }

                if guard.elections.len() >= self.shared.config.max_elections {
                    result = Err(ConsensusError::ElectionCapacityReached(
                        guard.elections.len(),
                    ));
                    break;
                }

                let wakeup = now + self.shared.config.non_fork_delay;
                let mut election = Election::new(block.account, block.height, wakeup);
                election.insert_candidate(block.clone());
                notify |= guard.insert(election);
            }
        }
        if notify {
            self.shared.condition.notify_one();
        }
        result
    }

    /// Absorb a confirmation vote from a representative. Votes for unknown
    /// accounts or mismatched heights are dropped.
    pub fn process_confirm(
        &self,
        rep: Account,
        timestamp: u64,
        signature: Signature,
        block: Arc<Block>,
        weight: Amount,
    ) {
        let vote = Vote::new(timestamp, signature, block.hash);

        let mut guard = self.shared.state.lock().unwrap();
        if guard.stopped {
            return;
        }
        let state = &mut *guard;
        let Some(election) = state.elections.get_mut(&block.account) else {
            return;
        };
        if election.height != block.height {
            return;
        }

        let outcome = election.apply_confirm(rep, vote, block, weight);
        if let ConfirmOutcome::Conflict { first: true } = outcome {
            tracing::debug!(account = %election.account, height = election.height, "fork detected");
            let old = election.wakeup;
            election.wakeup = Instant::now() + self.shared.config.fork_delay;
            let key = (election.wakeup, election.account);
            state.by_wakeup.remove(&(old, key.1));
            state.by_wakeup.insert(key);
        }
    }

    /// Inject a ready-made fork proof: two validly signed votes from the
    /// same representative. `block1`'s vote is counted, the other is kept as
    /// evidence.
    #[allow(clippy::too_many_arguments)]
    pub fn process_conflict(
        &self,
        rep: Account,
        timestamp1: u64,
        timestamp2: u64,
        signature1: Signature,
        signature2: Signature,
        block1: Arc<Block>,
        block2: Arc<Block>,
        weight: Amount,
    ) {
        let vote1 = Vote::new(timestamp1, signature1, block1.hash);
        let vote2 = Vote::new(timestamp2, signature2, block2.hash);

        let mut guard = self.shared.state.lock().unwrap();
        if guard.stopped {
            return;
        }
        let state = &mut *guard;
        let Some(election) = state.elections.get_mut(&block1.account) else {
            return;
        };
        if election.height != block1.height {
            return;
        }

        let first = election.apply_conflict(rep, vote1, block1, vote2, weight);
        if first {
            tracing::debug!(account = %election.account, height = election.height, "fork proof injected");
            let old = election.wakeup;
            election.wakeup = Instant::now() + self.shared.config.fork_delay;
            let key = (election.wakeup, election.account);
            state.by_wakeup.remove(&(old, key.1));
            state.by_wakeup.insert(key);
        }
    }

    /// Number of active elections.
    pub fn len(&self) -> usize {
        self.shared.state.lock().unwrap().elections.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Stop the worker and join it. Idempotent.
    pub fn stop(&self) {
        {
            let mut state = self.shared.state.lock().unwrap();
            if state.stopped {
                return;
            }
            state.stopped = true;
        }
        self.shared.condition.notify_all();
        if let Some(handle) = self.thread.lock().unwrap().take() {
            let _ = handle.join();
        }
    }
}

impl Drop for Elections {
    fn drop(&mut self) {
        self.stop();
    }
}

impl Shared {
    fn run(&self) {
        let mut guard = self.state.lock().unwrap();
        loop {
            if guard.stopped {
                break;
            }

            let now = Instant::now();
            let next = guard.by_wakeup.iter().next().copied();
            match next {
                Some((wakeup, account)) if wakeup <= now => {
                    let Some(election) = guard.remove(&account) else {
                        continue;
                    };
                    drop(guard);
                    let kept = self.process_election(election);
                    guard = self.state.lock().unwrap();
                    if let Some(election) = kept {
                        if !guard.stopped {
                            guard.insert(election);
                        }
                    }
                }
                Some((wakeup, _)) => {
                    let timeout = wakeup.duration_since(now);
                    let (g, _) = self.condition.wait_timeout(guard, timeout).unwrap();
                    guard = g;
                }
                None => {
                    guard = self.condition.wait(guard).unwrap();
                }
            }
        }
    }

    /// One tally round. Returns the election for rescheduling, or `None`
    /// when it reached a terminal state.
    fn process_election(&self, mut election: Election) -> Option<Election> {
        let weights = self.ledger.representative_weights();
        let online = self.ledger.online_weight();
        let threshold = Amount::new(
            online
                .raw()
                .saturating_mul(self.config.quorum_bps as u128)
                / 10_000,
        );

        if let Some((leader, leader_weight)) = tally(&election, &weights) {
            if election.winner == leader {
                election.wins += 1;
            } else {
                election.winner = leader;
                election.wins = 1;
            }

            if leader_weight >= threshold {
                election.confirms += 1;
            } else {
                election.confirms = 0;
            }

            if election.confirms >= self.config.confirms_required {
                let block = election.block(&leader);
                tracing::debug!(
                    account = %election.account,
                    height = election.height,
                    winner = %leader,
                    tally = %leader_weight,
                    "election confirmed"
                );
                (self.observer)(&ElectionStatus {
                    account: election.account,
                    height: election.height,
                    win: true,
                    confirm: true,
                    error: false,
                    block,
                });
                return None;
            }
        }

        self.solicit(&election, &weights);

        election.rounds += 1;
        if election.fork_found {
            election.rounds_fork += 1;
        }

        let expired = if election.fork_found {
            election.rounds_fork > self.config.rounds_fork_max
        } else {
            election.rounds > self.config.rounds_max
        };
        if expired {
            tracing::debug!(
                account = %election.account,
                height = election.height,
                rounds = election.rounds,
                fork = election.fork_found,
                "election unresolved, giving up"
            );
            let block = election.block(&election.winner);
            (self.observer)(&ElectionStatus {
                account: election.account,
                height: election.height,
                win: false,
                confirm: false,
                error: true,
                block,
            });
            return None;
        }

        let interval = if election.fork_found {
            self.config.fork_interval
        } else {
            self.config.non_fork_interval
        };
        election.wakeup = Instant::now() + interval;
        Some(election)
    }

    /// Broadcast our own vote when we are a representative holding the
    /// winner; otherwise solicit the representatives that have not voted.
    fn solicit(&self, election: &Election, weights: &HashMap<Account, Amount>) {
        if self.config.local_representative.is_some() {
            if let Some(block) = election.block(&election.winner) {
                self.network
                    .broadcast_confirm(&election.account, election.height, &block);
                return;
            }
        }

        let missing: Vec<Account> = weights
            .keys()
            .filter(|rep| !election.votes.contains_key(*rep))
            .copied()
            .collect();
        if missing.is_empty() {
            return;
        }

        // With no votes yet there is no winner; cite the smallest candidate
        // so the request content is deterministic.
        let target = if !election.winner.is_zero() {
            election.winner
        } else {
            election.blocks.keys().min().copied().unwrap_or(BlockHash::ZERO)
        };
        if target.is_zero() {
            return;
        }

        self.network
            .request_confirm(&election.account, election.height, &target, &missing);
    }
}

/// Sum each candidate's weight from the representatives currently voting
/// for it. The winner is the heaviest block; ties break to the smaller hash.
fn tally(
    election: &Election,
    weights: &HashMap<Account, Amount>,
) -> Option<(BlockHash, Amount)> {
    let mut totals: HashMap<BlockHash, Amount> = HashMap::new();
    for (rep, info) in &election.votes {
        // Fall back to the weight recorded with the vote when the rep has
        // dropped out of the current weight table.
        let weight = weights.get(rep).copied().unwrap_or(info.weight);
        let entry = totals.entry(info.last_vote.hash).or_insert(Amount::ZERO);
        *entry = entry.saturating_add(weight);
    }

    let mut leader: Option<(BlockHash, Amount)> = None;
    for (hash, weight) in totals {
        leader = match leader {
            None => Some((hash, weight)),
            Some((best_hash, best_weight)) => {
                if weight > best_weight || (weight == best_weight && hash < best_hash) {
                    Some((hash, weight))
                } else {
                    Some((best_hash, best_weight))
                }
            }
        };
    }
    leader
}
