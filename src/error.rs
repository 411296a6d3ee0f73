//! Error taxonomy for the DBFT engine.

use alloy_primitives::{Address, B256};

/// Every failure mode the engine can surface, one variant per row of the
/// spec's error table. `FutureMessage` and `OldMessage` are returned by the
/// PBFT per-message handlers but are intercepted by the dispatcher before
/// reaching an external caller (buffered / silently dropped respectively).
#[derive(Debug, thiserror::Error)]
pub enum DbftError {
    #[error("unknown block: verification attempted on the genesis header")]
    UnknownBlock,

    #[error("unknown ancestor for block {number} (parent {parent_hash})")]
    UnknownAncestor { number: u64, parent_hash: B256 },

    #[error("header timestamp {header_time} is in the future (now {now})")]
    FutureBlock { header_time: u64, now: u64 },

    #[error("invalid mix digest")]
    InvalidMixDigest,

    #[error("invalid uncle hash: uncles are meaningless under DBFT")]
    InvalidUncleHash,

    #[error("invalid timestamp: parent {parent_time} + period {period} > header {header_time}")]
    InvalidTimestamp { parent_time: u64, period: u64, header_time: u64 },

    #[error("invalid difficulty: expected {expected}, got {got}")]
    InvalidDifficulty { expected: u64, got: u64 },

    #[error("unauthorized: {signer} is not the in-turn proposer")]
    Unauthorized { signer: Address },

    #[error("invalid signature")]
    InvalidSignature,

    #[error("zero committed seals on a sealed header")]
    EmptyCommittedSeals,

    #[error("invalid committed seals: {valid} valid of {total}, need > 2F={two_f}")]
    InvalidCommittedSeals { valid: usize, total: usize, two_f: usize },

    #[error("invalid voting chain: headers are not contiguous")]
    InvalidVotingChain,

    #[error("{signer} signed recently and cannot sign again yet")]
    RecentlySigned { signer: Address },

    #[error("not in turn to seal at this slot")]
    NotInTurn,

    #[error("future message for proposer {proposer} at sequence {sequence}")]
    FutureMessage { proposer: Address, sequence: u64 },

    #[error("old message for proposer {proposer} at sequence {sequence}")]
    OldMessage { proposer: Address, sequence: u64 },

    #[error("inconsistent subject: view/digest mismatch")]
    InconsistentSubject,

    #[error("unauthorized address: {address} is not a current validator")]
    UnauthorizedAddress { address: Address },

    #[error("invalid proposal: backend rejected it during pre-prepare")]
    InvalidProposal,

    #[error("failed to decode message")]
    DecodeFailed,

    #[error("invalid extra-data: {0}")]
    InvalidExtra(&'static str),

    #[error("validator contract call failed: {0}")]
    ValidatorContract(String),
}
