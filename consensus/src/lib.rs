//! Consensus — block finalization via representative-weighted voting.
//!
//! Each account delegates its balance to a representative. When competing
//! blocks claim the same `(account, height)`, representatives vote and the
//! block that holds a supermajority of online weight for enough consecutive
//! tally rounds is confirmed.
//!
//! ## Module overview
//!
//! - [`vote`] — signed vote records and per-representative vote state.
//! - [`election`] — the per-account election record and its vote bookkeeping.
//! - [`elections`] — the engine: scheduled tally rounds, confirmation,
//!   fork handling, vote solicitation.
//! - [`weights`] — incremental representative weight cache.
//! - [`error`] — consensus error types.

pub mod election;
pub mod elections;
pub mod error;
pub mod vote;
pub mod weights;

pub use election::{ConfirmOutcome, Election};
pub use elections::{ElectionNetwork, ElectionStatus, Elections, ElectionsConfig, StatusObserver};
pub use error::ConsensusError;
pub use vote::{BlockReference, RepVoteInfo, Vote};
pub use weights::RepWeightCache;
