//! Fundamental types for the strand ledger.
//!
//! Every other crate in the workspace builds on these: account identifiers,
//! block hashes, amounts, timestamps and signatures.

pub mod account;
pub mod amount;
pub mod hash;
pub mod keys;
pub mod time;

pub use account::Account;
pub use amount::Amount;
pub use hash::BlockHash;
pub use keys::Signature;
pub use time::Timestamp;
