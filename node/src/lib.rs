//! Strand node core — the subsystems that finalize blocks and pull missing
//! account history from peers.
//!
//! The core consumes a read-only ledger view, a block processor submission
//! interface with an outcome bus, an asynchronous peer query interface and a
//! network broadcast interface; it owns the election engine (in
//! `strand_consensus`) and the [`syncer::Syncer`].

pub mod block_processor;
pub mod block_queries;
pub mod config;
pub mod error;
pub mod logging;
pub mod node;
pub mod shutdown;
pub mod syncer;

pub use block_processor::{
    BlockOperation, BlockProcessResult, BlockProcessor, ProcessCode, ProcessObserver,
    ProcessObservers,
};
pub use block_queries::{
    BlockQueries, QueryAck, QueryCallback, QueryCallbackStatus, QueryStatus,
};
pub use config::NodeConfig;
pub use error::NodeError;
pub use logging::{init_logging, LogFormat};
pub use node::Node;
pub use shutdown::ShutdownController;
pub use syncer::{SyncInfo, SyncStat, SyncStatus, Syncer};
