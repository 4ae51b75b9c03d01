//! Account pull-sync.
//!
//! One state machine per account: QUERY (a peer query is outstanding) →
//! PROCESS (the returned block was handed to the block processor) → QUERY at
//! the next height, until the chain is caught up or the sync is dropped.
//! Appended blocks fan out to related accounts: a send pulls its destination,
//! and a block whose representative has a mature reward pulls that
//! representative.
//!
//! All callbacks capture a `Weak` back-reference; completions that arrive
//! after the syncer is gone finish quietly without touching anything.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, Weak};

use strand_ledger::{Block, BlockOpcode, Ledger};
use strand_types::{Account, BlockHash, Timestamp};

use crate::block_processor::{BlockOperation, BlockProcessResult, BlockProcessor, ProcessCode};
use crate::block_queries::{
    BlockQueries, QueryCallback, QueryCallbackStatus, QueryStatus,
};

/// Where an account's sync currently is.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SyncStatus {
    /// A peer query is outstanding.
    Query,
    /// A block was submitted to the processor; awaiting its outcome.
    Process,
}

/// Per-account sync state.
#[derive(Clone, Debug)]
pub struct SyncInfo {
    pub status: SyncStatus,
    /// Whether the very first query has yet to succeed. Controls miss
    /// statistics: only first-query misses count.
    pub first: bool,
    pub batch_id: u32,
    /// The next height to pull.
    pub height: u64,
    /// Hash of the block preceding `height` (zero when unknown).
    pub previous: BlockHash,
    /// The hash submitted to the processor while in PROCESS (zero otherwise).
    pub current: BlockHash,
}

/// Query statistics.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct SyncStat {
    /// Stat-tracked syncs started.
    pub total: u64,
    /// First queries that never found a block.
    pub miss: u64,
}

struct SyncerState {
    syncs: HashMap<Account, SyncInfo>,
    /// query id → batch id, for every outstanding peer query.
    queries: HashMap<u64, u32>,
    stat: SyncStat,
    current_query_id: u64,
}

/// Per-account pull-sync driver.
pub struct Syncer {
    /// Back-reference handed to every callback; see the module docs.
    weak_self: Weak<Syncer>,
    state: Mutex<SyncerState>,
    ledger: Arc<dyn Ledger>,
    processor: Arc<dyn BlockProcessor>,
    block_queries: Arc<dyn BlockQueries>,
}

impl Syncer {
    /// Soft cap on simultaneous account syncs; see [`Syncer::busy`].
    pub const BUSY_SIZE: usize = 4096;
    /// Consecutive peer misses before a query is a definitive miss.
    pub const MISS_RETRY_LIMIT: u32 = 5;
    /// Sentinel batch id for queries that no longer resolve to a batch.
    pub const DEFAULT_BATCH_ID: u32 = u32::MAX;

    /// Build the syncer and subscribe it to the processor outcome bus.
    pub fn new(
        ledger: Arc<dyn Ledger>,
        processor: Arc<dyn BlockProcessor>,
        block_queries: Arc<dyn BlockQueries>,
    ) -> Arc<Self> {
        let syncer = Arc::new_cyclic(|weak_self| Self {
            weak_self: weak_self.clone(),
            state: Mutex::new(SyncerState {
                syncs: HashMap::new(),
                queries: HashMap::new(),
                stat: SyncStat::default(),
                current_query_id: 0,
            }),
            ledger,
            processor,
            block_queries,
        });

        let weak = Arc::downgrade(&syncer);
        syncer.processor.subscribe(Box::new(move |result, block| {
            if let Some(syncer) = weak.upgrade() {
                syncer.processor_callback(result, block);
            }
        }));

        syncer
    }

    /// Begin a pull-sync for `account` starting at `height` with known
    /// predecessor `previous` (zero when none). Refused silently when a sync
    /// for the account is already pending.
    pub fn add(
        &self,
        account: Account,
        height: u64,
        previous: BlockHash,
        stat: bool,
        batch_id: u32,
    ) {
        let info = SyncInfo {
            status: SyncStatus::Query,
            first: stat,
            batch_id,
            height,
            previous,
            current: BlockHash::ZERO,
        };

        {
            let mut state = self.state.lock().unwrap();
            if state.syncs.contains_key(&account) {
                return;
            }
            state.syncs.insert(account, info.clone());
            if stat {
                state.stat.total += 1;
            }
        }

        self.block_query(account, &info);
    }

    /// Start syncing an account from its local head, or from scratch when
    /// the ledger has no chain for it.
    pub fn sync_account(&self, account: Account, batch_id: u32) {
        match self.ledger.account_info(&account) {
            None => self.add(account, 0, BlockHash::ZERO, false, batch_id),
            Some(info) => self.add(account, info.head_height + 1, info.head, false, batch_id),
        }
    }

    /// Whether the sync table has reached its soft cap.
    pub fn busy(&self) -> bool {
        self.state.lock().unwrap().syncs.len() >= Self::BUSY_SIZE
    }

    pub fn empty(&self) -> bool {
        self.state.lock().unwrap().syncs.is_empty()
    }

    /// Number of account syncs in flight.
    pub fn size(&self) -> usize {
        self.state.lock().unwrap().syncs.len()
    }

    /// Number of outstanding peer queries.
    pub fn queries(&self) -> usize {
        self.state.lock().unwrap().queries.len()
    }

    pub fn exists(&self, account: &Account) -> bool {
        self.state.lock().unwrap().syncs.contains_key(account)
    }

    /// True when neither the sync table nor the query table references the
    /// batch.
    pub fn finished(&self, batch_id: u32) -> bool {
        let state = self.state.lock().unwrap();
        !state.syncs.values().any(|info| info.batch_id == batch_id)
            && !state.queries.values().any(|id| *id == batch_id)
    }

    /// The batch a query belongs to, or [`Syncer::DEFAULT_BATCH_ID`] when the
    /// query is no longer registered.
    pub fn batch_id(&self, query_id: u64) -> u32 {
        self.state
            .lock()
            .unwrap()
            .queries
            .get(&query_id)
            .copied()
            .unwrap_or(Self::DEFAULT_BATCH_ID)
    }

    pub fn stat(&self) -> SyncStat {
        self.state.lock().unwrap().stat
    }

    /// Zero the counters and clear every `first` flag so subsequent misses
    /// on existing syncs don't inflate the statistics.
    pub fn reset_stat(&self) {
        let mut state = self.state.lock().unwrap();
        state.stat = SyncStat::default();
        for info in state.syncs.values_mut() {
            info.first = false;
        }
    }

    /// Drop an account's sync, if any.
    pub fn erase(&self, account: &Account) {
        self.state.lock().unwrap().syncs.remove(account);
    }

    /// Unregister an outstanding query.
    pub fn erase_query(&self, query_id: u64) {
        self.state.lock().unwrap().queries.remove(&query_id);
    }

    /// Allocate a query id and register it against `batch_id`. Ids are
    /// monotonic and skip any still in use after wrap-around.
    fn add_query(&self, batch_id: u32) -> u64 {
        let mut state = self.state.lock().unwrap();
        loop {
            let query_id = state.current_query_id;
            state.current_query_id = state.current_query_id.wrapping_add(1);
            if state.queries.contains_key(&query_id) {
                continue;
            }
            state.queries.insert(query_id, batch_id);
            return query_id;
        }
    }

    /// Issue the peer query matching an account's sync position.
    fn block_query(&self, account: Account, info: &SyncInfo) {
        let query_id = self.add_query(info.batch_id);
        let callback = self.account_query_callback(account, query_id);
        if info.height == 0 || info.previous.is_zero() {
            self.block_queries
                .query_by_height(&account, info.height, false, callback);
        } else {
            self.block_queries
                .query_by_previous(&account, info.height, &info.previous, false, callback);
        }
    }

    /// Issue a by-hash discovery query for a block whose account is unknown.
    fn hash_query(&self, hash: BlockHash, batch_id: u32) {
        let query_id = self.add_query(batch_id);
        let callback = self.hash_query_callback(query_id);
        self.block_queries
            .query_by_hash(&Account::ZERO, Block::INVALID_HEIGHT, &hash, true, callback);
    }

    /// The transport-facing callback for an account query. The miss counter
    /// lives here because it belongs to this one query, not to the account.
    fn account_query_callback(&self, account: Account, query_id: u64) -> QueryCallback {
        let weak = self.weak_self.clone();
        let mut misses = 0u32;
        Box::new(move |acks, result| {
            let Some(syncer) = Weak::upgrade(&weak) else {
                fill_finish(result, acks.len());
                return;
            };

            if acks.len() != 1 {
                fill_finish(result, acks.len());
                syncer.erase(&account);
                syncer.erase_query(query_id);
                return;
            }

            let ack = &acks[0];
            match ack.status {
                QueryStatus::Success | QueryStatus::Fork => {
                    result.push(QueryCallbackStatus::Finish);
                    syncer.query_callback(&account, ack.status, ack.block.clone());
                    syncer.erase_query(query_id);
                }
                QueryStatus::Miss => {
                    misses += 1;
                    if misses >= Syncer::MISS_RETRY_LIMIT {
                        result.push(QueryCallbackStatus::Finish);
                        syncer.query_callback(&account, QueryStatus::Miss, None);
                        syncer.erase_query(query_id);
                    } else {
                        result.push(QueryCallbackStatus::Continue);
                    }
                }
                QueryStatus::Pruned | QueryStatus::Timeout => {
                    result.push(QueryCallbackStatus::Continue);
                }
            }
        })
    }

    /// The transport-facing callback for a by-hash discovery query.
    fn hash_query_callback(&self, query_id: u64) -> QueryCallback {
        let weak = self.weak_self.clone();
        let mut misses = 0u32;
        Box::new(move |acks, result| {
            let Some(syncer) = Weak::upgrade(&weak) else {
                fill_finish(result, acks.len());
                return;
            };

            if acks.len() != 1 {
                fill_finish(result, acks.len());
                syncer.erase_query(query_id);
                return;
            }

            let ack = &acks[0];
            match ack.status {
                QueryStatus::Success => {
                    result.push(QueryCallbackStatus::Finish);
                    if let Some(block) = &ack.block {
                        let batch_id = syncer.batch_id(query_id);
                        syncer.sync_account(block.account, batch_id);
                    }
                    syncer.erase_query(query_id);
                }
                QueryStatus::Miss => {
                    misses += 1;
                    if misses >= Syncer::MISS_RETRY_LIMIT {
                        result.push(QueryCallbackStatus::Finish);
                        syncer.erase_query(query_id);
                    } else {
                        result.push(QueryCallbackStatus::Continue);
                    }
                }
                QueryStatus::Timeout | QueryStatus::Fork | QueryStatus::Pruned => {
                    result.push(QueryCallbackStatus::Continue);
                }
            }
        })
    }

    /// Inner transition for a definitive account query answer.
    fn query_callback(
        &self,
        account: &Account,
        status: QueryStatus,
        block: Option<Arc<Block>>,
    ) {
        let submit = {
            let mut state = self.state.lock().unwrap();
            let Some(info) = state.syncs.get_mut(account) else {
                return;
            };
            if info.status != SyncStatus::Query {
                return;
            }

            match status {
                QueryStatus::Miss => {
                    let first = info.first;
                    state.syncs.remove(account);
                    if first {
                        state.stat.miss += 1;
                    }
                    None
                }
                QueryStatus::Success => match block {
                    Some(block) => {
                        debug_assert_eq!(info.height, block.height);
                        info.first = false;
                        info.status = SyncStatus::Process;
                        info.current = block.hash;
                        Some(block)
                    }
                    None => {
                        state.syncs.remove(account);
                        None
                    }
                },
                QueryStatus::Fork => {
                    tracing::debug!(account = %account, "pull-sync hit a fork, dropping");
                    state.syncs.remove(account);
                    None
                }
                QueryStatus::Pruned | QueryStatus::Timeout => {
                    // Never forwarded here; transient statuses retry upstream.
                    state.syncs.remove(account);
                    None
                }
            }
        };

        if let Some(block) = submit {
            self.processor.add(block);
        }
    }

    /// Processor outcome handler: the sole writer of PROCESS → QUERY
    /// transitions. Acts only on APPEND/DROP for the account's in-flight
    /// block.
    fn processor_callback(&self, result: &BlockProcessResult, block: &Arc<Block>) {
        if result.operation != BlockOperation::Append && result.operation != BlockOperation::Drop {
            return;
        }

        let mut requery: Option<SyncInfo> = None;
        let mut source_miss = false;
        let mut sync_related = false;
        let batch_id;

        {
            let mut state = self.state.lock().unwrap();
            let Some(info) = state.syncs.get_mut(&block.account) else {
                return;
            };
            if info.status != SyncStatus::Process || info.current != block.hash {
                return;
            }
            batch_id = info.batch_id;

            if result.operation == BlockOperation::Drop {
                info.status = SyncStatus::Query;
                info.current = BlockHash::ZERO;
                requery = Some(info.clone());
            } else {
                match result.code {
                    ProcessCode::Success | ProcessCode::Exists => {
                        info.status = SyncStatus::Query;
                        info.current = BlockHash::ZERO;
                        info.height = block.height + 1;
                        info.previous = block.hash;
                        requery = Some(info.clone());
                        sync_related = true;
                    }
                    ProcessCode::GapReceiveSource
                    | ProcessCode::GapRewardSource
                    | ProcessCode::Unrewardable => {
                        // The source account's history is missing; pivot to
                        // discovering it.
                        source_miss = true;
                        state.syncs.remove(&block.account);
                    }
                    _ => {
                        tracing::debug!(
                            account = %block.account,
                            code = ?result.code,
                            "pull-sync block rejected, dropping"
                        );
                        state.syncs.remove(&block.account);
                        return;
                    }
                }
            }
        }

        if let Some(info) = requery {
            self.block_query(block.account, &info);
        }
        if source_miss {
            self.hash_query(block.link, batch_id);
        }
        if sync_related {
            self.sync_related(block, batch_id);
        }
    }

    /// Fan out from a freshly appended block to the accounts it references.
    fn sync_related(&self, block: &Arc<Block>, batch_id: u32) {
        if !block.has_representative() && block.opcode != BlockOpcode::Send {
            return;
        }

        if block.opcode == BlockOpcode::Send {
            self.sync_account(block.destination(), batch_id);
        }

        if block.has_representative() && block.height > 0 {
            let mut rep = block.representative;
            if block.opcode == BlockOpcode::Change {
                // A change block's reward accrues to the representative it
                // replaced.
                match self.ledger.block(&block.previous) {
                    Some(previous) => rep = previous.representative,
                    None => return,
                }
            }

            let Some(rewardable) = self.ledger.rewardable_info(&rep, &block.previous) else {
                return;
            };
            if rewardable.valid_timestamp > Timestamp::now() {
                return;
            }
            self.sync_account(rep, batch_id);
        }
    }
}

fn fill_finish(result: &mut Vec<QueryCallbackStatus>, count: usize) {
    result.extend(std::iter::repeat(QueryCallbackStatus::Finish).take(count));
}
