//! Normative constants for the DBFT engine.

/// Fixed 32-byte marker the engine writes into `mix_digest` to flag a DBFT block.
pub const DBFT_MARKER: [u8; 32] = *b"dpos-bft consensus engine\0\0\0\0\0\0\0";

/// Bytes reserved for the free-form vanity prefix at the start of `extra`.
pub const VANITY: usize = 32;

/// Byte length of a single secp256k1 seal (r || s || v).
pub const SEAL_LEN: usize = 65;

/// Difficulty assigned to an on-time, in-turn block.
pub const DEFAULT_DIFFICULTY: u64 = 0xFFFF_FFFF;

/// Number of blocks between on-disk snapshot checkpoints.
pub const CHECKPOINT_INTERVAL: u64 = 1024;

/// Recent-snapshot LRU capacity.
pub const IN_MEMORY_SNAPSHOTS: u32 = 128;

/// Recovered-signer LRU capacity.
pub const IN_MEMORY_SIGNATURES: u32 = 4096;

/// Bounded capacity of the inbound PBFT message channel.
pub const MSG_CHAN_SIZE: usize = 64;

/// Maximum number of buffered future messages per proposer.
pub const MAX_FUTURE_MSG: usize = 64;

/// Block reward in wei credited to the proposer before any halving.
pub const BASE_REWARD: u128 = 5_000_000_000_000_000_000;

/// Seconds in a reward-halving year.
pub const HALVING_SECONDS: u64 = 31_536_000;
