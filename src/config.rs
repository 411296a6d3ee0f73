//! Runtime-configurable parameters, serializable for genesis / chain-config
//! wiring the way `params.DbftConfig` is.

use serde::{Deserialize, Serialize};

use crate::constants::{
    BASE_REWARD, CHECKPOINT_INTERVAL, HALVING_SECONDS, IN_MEMORY_SIGNATURES, IN_MEMORY_SNAPSHOTS,
    MAX_FUTURE_MSG, MSG_CHAN_SIZE,
};

/// Tunables for one DBFT chain. Everything not listed here (vanity/seal
/// lengths, the marker bytes) is a protocol constant, not a chain parameter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DbftConfig {
    /// Target seconds between blocks.
    pub block_period: u64,
    /// Number of blocks per validator-set epoch.
    pub epoch: u64,
    /// Blocks between on-disk snapshot checkpoints.
    pub checkpoint_interval: u64,
    /// In-memory snapshot LRU capacity.
    pub in_memory_snapshots: u32,
    /// In-memory recovered-signer LRU capacity.
    pub in_memory_signatures: u32,
    /// Bounded inbound PBFT message channel capacity.
    pub msg_chan_size: usize,
    /// Per-proposer cap on buffered future messages.
    pub max_future_msg: usize,
    /// Block reward in wei before any halving.
    pub base_reward: u128,
    /// Seconds per halving period.
    pub halving_seconds: u64,
}

impl Default for DbftConfig {
    fn default() -> Self {
        Self {
            block_period: 3,
            epoch: 30_000,
            checkpoint_interval: CHECKPOINT_INTERVAL,
            in_memory_snapshots: IN_MEMORY_SNAPSHOTS,
            in_memory_signatures: IN_MEMORY_SIGNATURES,
            msg_chan_size: MSG_CHAN_SIZE,
            max_future_msg: MAX_FUTURE_MSG,
            base_reward: BASE_REWARD,
            halving_seconds: HALVING_SECONDS,
        }
    }
}
