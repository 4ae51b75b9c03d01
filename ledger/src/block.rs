//! State block — the block format of the strand block-lattice.
//!
//! Every account owns its own chain of state blocks with strictly increasing
//! heights. Each block carries the full account state after the operation,
//! so a single block suffices to resume syncing or to tally an election.

use blake2::digest::consts::U32;
use blake2::{Blake2b, Digest};
use serde::{Deserialize, Serialize};
use strand_types::{Account, Amount, BlockHash, Signature, Timestamp};

type Blake2b256 = Blake2b<U32>;

/// The operation a block performs on its account chain.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum BlockOpcode {
    /// Account opening block (height 0).
    Open,
    /// Transfer to another account; `link` holds the destination account.
    Send,
    /// Receive a transfer; `link` holds the matching send block hash.
    Receive,
    /// Change the account's consensus representative.
    Change,
    /// Claim a representative reward; `link` holds the reward source hash.
    Reward,
}

/// A state block in an account's chain.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Block {
    /// The operation this block performs.
    pub opcode: BlockOpcode,

    /// The account this block belongs to.
    pub account: Account,

    /// Position in the account's chain; 0 for the opening block.
    pub height: u64,

    /// Hash of the previous block in this chain (zero at height 0).
    pub previous: BlockHash,

    /// The account's consensus representative after this block.
    pub representative: Account,

    /// Balance after this block.
    pub balance: Amount,

    /// Context-dependent reference:
    /// - `Send`: the destination account (same 32-byte representation)
    /// - `Receive`: the send block hash being received
    /// - `Reward`: the reward source hash
    /// - otherwise unused (zero)
    pub link: BlockHash,

    /// Block timestamp.
    pub timestamp: Timestamp,

    /// Signature by the account holder.
    pub signature: Signature,

    /// The computed hash of this block.
    pub hash: BlockHash,
}

impl Block {
    /// Placeholder height for queries that identify a block by hash only.
    pub const INVALID_HEIGHT: u64 = u64::MAX;

    /// Build a block and fill in its hash.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        opcode: BlockOpcode,
        account: Account,
        height: u64,
        previous: BlockHash,
        representative: Account,
        balance: Amount,
        link: BlockHash,
        timestamp: Timestamp,
        signature: Signature,
    ) -> Self {
        let mut block = Self {
            opcode,
            account,
            height,
            previous,
            representative,
            balance,
            link,
            timestamp,
            signature,
            hash: BlockHash::ZERO,
        };
        block.hash = block.compute_hash();
        block
    }

    /// Compute the hash of this block from its contents.
    ///
    /// All fields except `signature` and the stored `hash` are fed to
    /// Blake2b-256 in canonical order with fixed-width big-endian integers.
    pub fn compute_hash(&self) -> BlockHash {
        let mut hasher = Blake2b256::new();
        hasher.update([self.opcode as u8]);
        hasher.update(self.account.as_bytes());
        hasher.update(self.height.to_be_bytes());
        hasher.update(self.previous.as_bytes());
        hasher.update(self.representative.as_bytes());
        hasher.update(self.balance.raw().to_be_bytes());
        hasher.update(self.link.as_bytes());
        hasher.update(self.timestamp.as_secs().to_be_bytes());

        let digest = hasher.finalize();
        let mut bytes = [0u8; 32];
        bytes.copy_from_slice(&digest);
        BlockHash::new(bytes)
    }

    /// Whether this is the first block in an account chain.
    pub fn is_open(&self) -> bool {
        self.opcode == BlockOpcode::Open
    }

    /// Whether this block names a consensus representative.
    ///
    /// Reward claims do not restate the representative; every other opcode
    /// carries one.
    pub fn has_representative(&self) -> bool {
        self.opcode != BlockOpcode::Reward
    }

    /// The destination account of a send block.
    pub fn destination(&self) -> Account {
        self.link.into_account()
    }

    /// Serialize for the peer wire (bincode).
    pub fn to_wire(&self) -> Vec<u8> {
        bincode::serialize(self).expect("block serialization is infallible")
    }

    /// Deserialize from the peer wire.
    pub fn from_wire(bytes: &[u8]) -> Result<Self, crate::LedgerError> {
        bincode::deserialize(bytes).map_err(|e| crate::LedgerError::WireFormat(e.to_string()))
    }
}
