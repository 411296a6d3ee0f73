//! A delegated-proof-of-stake + practical-Byzantine-fault-tolerant
//! consensus core for a permissioned chain.

pub mod config;
pub mod constants;
pub mod crypto;
pub mod engine;
pub mod error;
pub mod message;
pub mod pbft;
pub mod rewards;
pub mod seal;
pub mod snapshot;
pub mod state;
pub mod testutil;
pub mod types;
pub mod validators;

pub use config::DbftConfig;
pub use error::DbftError;
pub use types::{Address, Block, Hash, Header, Proposal, Signature};
