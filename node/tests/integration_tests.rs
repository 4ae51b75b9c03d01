//! End-to-end tests for the node core: a scripted peer transport answers
//! queries synchronously, an auto-acknowledging processor emits outcomes
//! inline, and the syncer walks whole chains in a single call stack.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use strand_consensus::{ElectionNetwork, RepWeightCache};
use strand_ledger::{AccountInfo, Block, BlockOpcode, Ledger, RewardableInfo};
use strand_node::{
    BlockOperation, BlockProcessResult, BlockProcessor, BlockQueries, Node, NodeConfig,
    ProcessCode, ProcessObservers, QueryAck, QueryCallback, QueryCallbackStatus, QueryStatus,
    ShutdownController, Syncer,
};
use strand_types::{Account, Amount, BlockHash, Signature, Timestamp};

// ── Test doubles ───────────────────────────────────────────────────────

#[derive(Default)]
struct InMemoryLedger {
    accounts: Mutex<HashMap<Account, AccountInfo>>,
    blocks: Mutex<HashMap<BlockHash, Arc<Block>>>,
    weights: Mutex<RepWeightCache>,
}

impl Ledger for InMemoryLedger {
    fn account_info(&self, account: &Account) -> Option<AccountInfo> {
        self.accounts.lock().unwrap().get(account).copied()
    }

    fn block(&self, hash: &BlockHash) -> Option<Arc<Block>> {
        self.blocks.lock().unwrap().get(hash).cloned()
    }

    fn rewardable_info(
        &self,
        _representative: &Account,
        _previous: &BlockHash,
    ) -> Option<RewardableInfo> {
        None
    }

    fn representative_weights(&self) -> HashMap<Account, Amount> {
        self.weights.lock().unwrap().all_weights().clone()
    }

    fn online_weight(&self) -> Amount {
        self.weights.lock().unwrap().total_weight()
    }
}

/// Processor that acknowledges every submission inline, with per-hash
/// overrides for the outcome code.
#[derive(Default)]
struct AutoProcessor {
    added: Mutex<Vec<Arc<Block>>>,
    plan: Mutex<HashMap<BlockHash, ProcessCode>>,
    observers: ProcessObservers,
}

impl AutoProcessor {
    fn added_heights(&self) -> Vec<u64> {
        self.added.lock().unwrap().iter().map(|b| b.height).collect()
    }
}

impl BlockProcessor for AutoProcessor {
    fn add(&self, block: Arc<Block>) {
        self.added.lock().unwrap().push(block.clone());
        let code = self
            .plan
            .lock()
            .unwrap()
            .get(&block.hash)
            .copied()
            .unwrap_or(ProcessCode::Success);
        let result = BlockProcessResult {
            operation: BlockOperation::Append,
            code,
        };
        self.observers.emit(&result, &block);
    }

    fn subscribe(&self, observer: strand_node::ProcessObserver) {
        self.observers.subscribe(observer);
    }
}

/// Transport double backed by a "remote" block set; answers every query
/// synchronously and keeps polling while the callback asks to CONTINUE,
/// exactly like a real transport cycling through peers.
#[derive(Default)]
struct ScriptedQueries {
    by_position: Mutex<HashMap<(Account, u64), Arc<Block>>>,
    by_hash: Mutex<HashMap<BlockHash, Arc<Block>>>,
}

impl ScriptedQueries {
    fn insert_chain(&self, blocks: &[Arc<Block>]) {
        let mut by_position = self.by_position.lock().unwrap();
        let mut by_hash = self.by_hash.lock().unwrap();
        for block in blocks {
            by_position.insert((block.account, block.height), block.clone());
            by_hash.insert(block.hash, block.clone());
        }
    }

    fn respond(&self, found: Option<Arc<Block>>, mut callback: QueryCallback) {
        let ack = match found {
            Some(block) => QueryAck {
                status: QueryStatus::Success,
                block: Some(block),
            },
            None => QueryAck {
                status: QueryStatus::Miss,
                block: None,
            },
        };
        for _ in 0..8 {
            let mut statuses = Vec::new();
            callback(std::slice::from_ref(&ack), &mut statuses);
            if statuses.first() != Some(&QueryCallbackStatus::Continue) {
                break;
            }
        }
    }
}

impl BlockQueries for ScriptedQueries {
    fn query_by_height(&self, account: &Account, height: u64, _priority: bool, callback: QueryCallback) {
        let found = self
            .by_position
            .lock()
            .unwrap()
            .get(&(*account, height))
            .cloned();
        self.respond(found, callback);
    }

    fn query_by_previous(
        &self,
        account: &Account,
        height: u64,
        _previous: &BlockHash,
        _priority: bool,
        callback: QueryCallback,
    ) {
        let found = self
            .by_position
            .lock()
            .unwrap()
            .get(&(*account, height))
            .cloned();
        self.respond(found, callback);
    }

    fn query_by_hash(
        &self,
        _account: &Account,
        _height: u64,
        hash: &BlockHash,
        _priority: bool,
        callback: QueryCallback,
    ) {
        let found = self.by_hash.lock().unwrap().get(hash).cloned();
        self.respond(found, callback);
    }
}

struct NullNetwork;

impl ElectionNetwork for NullNetwork {
    fn broadcast_confirm(&self, _account: &Account, _height: u64, _winner: &Arc<Block>) {}

    fn request_confirm(
        &self,
        _account: &Account,
        _height: u64,
        _winner: &BlockHash,
        _representatives: &[Account],
    ) {
    }
}

// ── Helpers ────────────────────────────────────────────────────────────

fn make_account(byte: u8) -> Account {
    Account::new([byte; 32])
}

fn make_block(
    opcode: BlockOpcode,
    account: Account,
    height: u64,
    previous: BlockHash,
    link: BlockHash,
) -> Arc<Block> {
    Arc::new(Block::new(
        opcode,
        account,
        height,
        previous,
        make_account(0xEE),
        Amount::new(100),
        link,
        Timestamp::new(1000),
        Signature::ZERO,
    ))
}

fn chain_of_receives(account: Account, len: u64) -> Vec<Arc<Block>> {
    let mut blocks = Vec::new();
    let mut previous = BlockHash::ZERO;
    for height in 0..len {
        let opcode = if height == 0 {
            BlockOpcode::Open
        } else {
            BlockOpcode::Receive
        };
        let block = make_block(opcode, account, height, previous, BlockHash::ZERO);
        previous = block.hash;
        blocks.push(block);
    }
    blocks
}

struct Core {
    ledger: Arc<InMemoryLedger>,
    processor: Arc<AutoProcessor>,
    queries: Arc<ScriptedQueries>,
    syncer: Arc<Syncer>,
}

fn core() -> Core {
    let ledger = Arc::new(InMemoryLedger::default());
    let processor = Arc::new(AutoProcessor::default());
    let queries = Arc::new(ScriptedQueries::default());
    let syncer = Syncer::new(ledger.clone(), processor.clone(), queries.clone());
    Core {
        ledger,
        processor,
        queries,
        syncer,
    }
}

// ── Syncer end-to-end ──────────────────────────────────────────────────

#[test]
fn whole_chain_is_pulled_in_order() {
    let core = core();
    let account = make_account(1);
    let chain = chain_of_receives(account, 3);
    core.queries.insert_chain(&chain);

    core.syncer.add(account, 0, BlockHash::ZERO, true, 7);

    // The scripted transport answered everything synchronously: three
    // appends in height order, then a definitive miss at height 3.
    assert_eq!(core.processor.added_heights(), vec![0, 1, 2]);
    assert!(core.syncer.empty());
    assert!(core.syncer.finished(7));

    let stat = core.syncer.stat();
    assert_eq!(stat.total, 1);
    // The first query succeeded, so the trailing miss is not counted.
    assert_eq!(stat.miss, 0);
}

#[test]
fn unknown_account_counts_one_miss() {
    let core = core();

    core.syncer.add(make_account(9), 0, BlockHash::ZERO, true, 1);

    assert!(core.syncer.empty());
    assert!(core.syncer.finished(1));
    let stat = core.syncer.stat();
    assert_eq!(stat.total, 1);
    assert_eq!(stat.miss, 1);
}

#[test]
fn gap_source_discovers_and_syncs_the_author() {
    let core = core();
    let account = make_account(1);
    let author = make_account(2);

    // The author's one-block chain, reachable by position and by hash.
    let source = make_block(BlockOpcode::Open, author, 0, BlockHash::ZERO, BlockHash::ZERO);
    core.queries.insert_chain(std::slice::from_ref(&source));

    // Account A's chain: an opening block, then a receive referencing the
    // author's block as its source.
    let opening = make_block(BlockOpcode::Open, account, 0, BlockHash::ZERO, BlockHash::ZERO);
    let receive = make_block(BlockOpcode::Receive, account, 1, opening.hash, source.hash);
    core.queries.insert_chain(&[opening.clone(), receive.clone()]);

    // The processor reports the receive's source history as missing.
    core.processor
        .plan
        .lock()
        .unwrap()
        .insert(receive.hash, ProcessCode::GapReceiveSource);

    core.syncer.add(account, 0, BlockHash::ZERO, true, 3);

    // A's sync was dropped at the gap, the source block was discovered by
    // hash, and its author's chain was pulled under the same batch.
    assert!(!core.syncer.exists(&account));
    let added = core.processor.added.lock().unwrap();
    assert!(added.iter().any(|b| b.hash == source.hash));
    drop(added);
    assert!(core.syncer.empty());
    assert!(core.syncer.finished(3));
}

#[test]
fn resumed_account_starts_from_ledger_head() {
    let core = core();
    let account = make_account(1);
    let chain = chain_of_receives(account, 4);
    core.queries.insert_chain(&chain);

    // Locally we already hold heights 0 and 1.
    core.ledger.accounts.lock().unwrap().insert(
        account,
        AccountInfo {
            head_height: 1,
            head: chain[1].hash,
        },
    );

    core.syncer.sync_account(account, 2);

    // Only the missing tail was pulled.
    assert_eq!(core.processor.added_heights(), vec![2, 3]);
    assert!(core.syncer.finished(2));
}

// ── Node assembly ──────────────────────────────────────────────────────

fn node_with_weights(weights: &[(Account, u128)]) -> (Node, Arc<InMemoryLedger>) {
    let ledger = Arc::new(InMemoryLedger::default());
    {
        let mut cache = ledger.weights.lock().unwrap();
        for (rep, weight) in weights {
            cache.add_weight(rep, Amount::new(*weight));
        }
    }
    let node = Node::new(
        NodeConfig::default(),
        ledger.clone(),
        Arc::new(AutoProcessor::default()),
        Arc::new(ScriptedQueries::default()),
        Arc::new(NullNetwork),
    );
    (node, ledger)
}

#[test]
fn election_with_quorum_confirms_and_drains() {
    let alice = make_account(2);
    let bob = make_account(3);
    let (node, _ledger) = node_with_weights(&[(alice, 400), (bob, 300)]);

    let account = make_account(1);
    let block = make_block(BlockOpcode::Send, account, 5, BlockHash::new([0xAA; 32]), BlockHash::ZERO);
    node.elections().add(std::slice::from_ref(&block)).unwrap();
    node.elections()
        .process_confirm(alice, 10, Signature::ZERO, block.clone(), Amount::new(400));
    node.elections()
        .process_confirm(bob, 10, Signature::ZERO, block.clone(), Amount::new(300));

    // Two one-second rounds at quorum confirm and destroy the election;
    // expiry would take minutes, so a fast drain means confirmation.
    let deadline = Instant::now() + Duration::from_secs(10);
    while !node.elections().is_empty() {
        assert!(Instant::now() < deadline, "election did not confirm in time");
        std::thread::sleep(Duration::from_millis(50));
    }

    node.stop();
}

#[tokio::test]
async fn shutdown_controller_stops_the_node() {
    let (node, _ledger) = node_with_weights(&[]);
    let shutdown = ShutdownController::new();

    // `join!` polls the run future first, so it subscribes before the
    // trigger fires.
    let run = node.run_until_shutdown(&shutdown);
    let trigger = async {
        shutdown.shutdown();
    };
    tokio::join!(run, trigger);

    // The engine is stopped: new elections are ignored.
    let block = make_block(BlockOpcode::Open, make_account(1), 0, BlockHash::ZERO, BlockHash::ZERO);
    node.elections().add(std::slice::from_ref(&block)).unwrap();
    assert!(node.elections().is_empty());
}
