//! Block processor seam: submission interface and outcome bus.
//!
//! The actual validation pipeline lives outside the core. The core submits
//! blocks through [`BlockProcessor::add`] and learns their fate from the
//! observer bus, which fires `(result, block)` for every processed block.

use std::sync::{Arc, Mutex};

use strand_ledger::Block;

/// What the processor did with a block.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BlockOperation {
    /// The block was appended to (or rejected from) its account chain.
    Append,
    /// The block was dropped before reaching the chain, e.g. a full queue.
    Drop,
    /// The block was confirmed by consensus.
    Confirm,
    /// The block was rolled back from its chain.
    Rollback,
}

/// Detail code accompanying an operation.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ProcessCode {
    /// Applied cleanly.
    Success,
    /// Already present in the ledger.
    Exists,
    /// The previous block is unknown.
    GapPrevious,
    /// A receive whose source block's account history is missing.
    GapReceiveSource,
    /// A reward claim whose source history is missing.
    GapRewardSource,
    /// A reward claim that is not (yet) claimable.
    Unrewardable,
    /// Failed validation.
    Rejected,
}

/// Outcome of processing one block.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct BlockProcessResult {
    pub operation: BlockOperation,
    pub code: ProcessCode,
}

/// Listener on the processor outcome bus.
pub type ProcessObserver = Box<dyn Fn(&BlockProcessResult, &Arc<Block>) + Send + Sync>;

/// Block submission interface with an outcome bus.
pub trait BlockProcessor: Send + Sync {
    /// Submit a block for processing. Fire-and-forget; the outcome arrives
    /// on the observer bus.
    fn add(&self, block: Arc<Block>);

    /// Register an outcome listener.
    fn subscribe(&self, observer: ProcessObserver);
}

/// Synchronous fan-out bus for processor outcomes.
///
/// Listeners run inline on the emitting thread; keep handlers fast to avoid
/// stalling the processing pipeline.
pub struct ProcessObservers {
    listeners: Mutex<Vec<ProcessObserver>>,
}

impl ProcessObservers {
    pub fn new() -> Self {
        Self {
            listeners: Mutex::new(Vec::new()),
        }
    }

    pub fn subscribe(&self, observer: ProcessObserver) {
        self.listeners.lock().unwrap().push(observer);
    }

    pub fn emit(&self, result: &BlockProcessResult, block: &Arc<Block>) {
        for listener in self.listeners.lock().unwrap().iter() {
            listener(result, block);
        }
    }
}

impl Default for ProcessObservers {
    fn default() -> Self {
        Self::new()
    }
}
