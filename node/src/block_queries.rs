//! Peer block query seam.
//!
//! Queries are fire-and-forget: the transport polls peers and feeds their
//! acks to the supplied callback, one batch per peer response. The callback
//! writes a FINISH/CONTINUE status per ack, telling the transport whether to
//! stop or keep polling other peers.

use std::sync::Arc;

use strand_ledger::Block;
use strand_types::{Account, BlockHash};

/// A peer's answer to a block query.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum QueryStatus {
    /// The peer returned the requested block.
    Success,
    /// The peer does not have the block.
    Miss,
    /// The peer holds a different block for that slot.
    Fork,
    /// The peer pruned that part of history.
    Pruned,
    /// The peer did not answer in time.
    Timeout,
}

/// One peer ack delivered to a query callback.
#[derive(Clone, Debug)]
pub struct QueryAck {
    pub status: QueryStatus,
    pub block: Option<Arc<Block>>,
}

/// Per-ack verdict written by the callback.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum QueryCallbackStatus {
    /// Stop polling peers for this query.
    Finish,
    /// Try another peer.
    Continue,
}

/// Callback invoked with each batch of peer acks. Must push exactly one
/// status per ack.
pub type QueryCallback = Box<dyn FnMut(&[QueryAck], &mut Vec<QueryCallbackStatus>) + Send>;

/// Asynchronous peer block query interface.
pub trait BlockQueries: Send + Sync {
    /// Request the block at `(account, height)`.
    fn query_by_height(&self, account: &Account, height: u64, priority: bool, callback: QueryCallback);

    /// Request the block at `(account, height)` whose predecessor is `previous`.
    fn query_by_previous(
        &self,
        account: &Account,
        height: u64,
        previous: &BlockHash,
        priority: bool,
        callback: QueryCallback,
    );

    /// Request a block by hash when its account is unknown; `account` and
    /// `height` are placeholders.
    fn query_by_hash(
        &self,
        account: &Account,
        height: u64,
        hash: &BlockHash,
        priority: bool,
        callback: QueryCallback,
    );
}
