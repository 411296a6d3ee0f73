//! PBFT wire types, ported from `consensus/dbft/{pbft,types}.go`'s
//! `Message`, `View`, `Subject`, and `Preprepare`.

use alloy_primitives::Bytes;
use alloy_rlp::{RlpDecodable, RlpEncodable};

use crate::types::{Address, Hash, Proposal};

/// The three PBFT message codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageCode {
    PrePrepare = 0,
    Prepare = 1,
    Commit = 2,
}

impl MessageCode {
    pub fn from_u64(v: u64) -> Option<Self> {
        match v {
            0 => Some(Self::PrePrepare),
            1 => Some(Self::Prepare),
            2 => Some(Self::Commit),
            _ => None,
        }
    }
}

/// `{proposer, sequence}` — identifies a single consensus instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, RlpEncodable, RlpDecodable)]
pub struct View {
    pub proposer: Address,
    pub sequence: u64,
}

/// `{view, digest}` — what PREPARE and COMMIT messages sign over.
#[derive(Debug, Clone, Copy, PartialEq, Eq, RlpEncodable, RlpDecodable)]
pub struct Subject {
    pub view: View,
    pub digest: Hash,
}

/// `{view, proposal}` — the PREPREPARE payload.
#[derive(Debug, Clone, PartialEq, Eq, RlpEncodable, RlpDecodable)]
pub struct Preprepare<P: Proposal> {
    pub view: View,
    pub proposal: P,
}

/// The signed envelope every PBFT message travels in. `signature` covers
/// the RLP encoding of this envelope with `signature` itself blanked
/// ([`Envelope::payload_no_sig`]); `committed_seal` is set only on COMMIT.
#[derive(Debug, Clone, PartialEq, Eq, RlpEncodable, RlpDecodable)]
pub struct Envelope {
    pub code: u64,
    pub msg: Bytes,
    pub sender: Address,
    pub signature: Bytes,
    pub committed_seal: Bytes,
}

impl Envelope {
    /// The signing domain: this envelope RLP-encoded with `signature`
    /// blanked to an empty byte string.
    pub fn payload_no_sig(&self) -> Vec<u8> {
        let blanked = Envelope {
            code: self.code,
            msg: self.msg.clone(),
            sender: self.sender,
            signature: Bytes::new(),
            committed_seal: self.committed_seal.clone(),
        };
        alloy_rlp::encode(&blanked)
    }

    pub fn code(&self) -> Option<MessageCode> {
        MessageCode::from_u64(self.code)
    }
}
