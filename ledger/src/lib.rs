//! Block format and read-only ledger interface.
//!
//! The node core never writes the ledger directly — blocks reach storage
//! through the block processor. What the core needs is a read view: account
//! heads for sync resumption, blocks by hash for representative lookups, and
//! rewardable state for reward-follow decisions.

pub mod block;
pub mod error;
pub mod ledger;

pub use block::{Block, BlockOpcode};
pub use error::LedgerError;
pub use ledger::{AccountInfo, Ledger, RewardableInfo};
