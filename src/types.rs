//! Core data model: addresses, hashes, signatures, the consensus-relevant
//! header projection, and the polymorphic `Proposal` abstraction the PBFT
//! layer is built against.

use alloy_primitives::{Bytes, FixedBytes};
use alloy_rlp::{Decodable, Encodable, RlpDecodable, RlpEncodable};
use std::fmt;

/// 20-byte account identifier.
pub type Address = alloy_primitives::Address;

/// 32-byte Keccak-256 digest.
pub type Hash = alloy_primitives::B256;

/// A 65-byte secp256k1 signature, `r ‖ s ‖ v`.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct Signature(pub [u8; 65]);

impl Signature {
    pub fn from_slice(data: &[u8]) -> Option<Self> {
        if data.len() != 65 {
            return None;
        }
        let mut buf = [0u8; 65];
        buf.copy_from_slice(data);
        Some(Self(buf))
    }

    pub fn as_bytes(&self) -> &[u8; 65] {
        &self.0
    }
}

impl fmt::Debug for Signature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Signature(0x{})", alloy_primitives::hex::encode(self.0))
    }
}

impl alloy_rlp::Encodable for Signature {
    fn encode(&self, out: &mut dyn bytes::buf::BufMut) {
        self.0.as_slice().encode(out)
    }
    fn length(&self) -> usize {
        self.0.as_slice().length()
    }
}

impl alloy_rlp::Decodable for Signature {
    fn decode(buf: &mut &[u8]) -> alloy_rlp::Result<Self> {
        let raw = Bytes::decode(buf)?;
        Signature::from_slice(&raw).ok_or(alloy_rlp::Error::UnexpectedLength)
    }
}

/// Consensus-relevant header fields. The remaining block
/// machinery (state root, transactions, receipts, ...) belongs to the
/// out-of-scope chain module; this is the projection the DBFT engine
/// reads and writes.
#[derive(Debug, Clone, PartialEq, Eq, RlpEncodable, RlpDecodable)]
pub struct Header {
    pub number: u64,
    pub parent_hash: Hash,
    pub time: u64,
    pub difficulty: alloy_primitives::U256,
    pub coinbase: Address,
    pub mix_digest: Hash,
    pub uncle_hash: Hash,
    pub nonce: FixedBytes<8>,
    pub extra: Bytes,
}

impl Header {
    /// Keccak-256 of this header's canonical RLP encoding, `extra` included
    /// as-is. Block/chain identity, not a signing domain — committed-seal
    /// verification uses [`crate::seal::proposal_hash`] instead, which is
    /// stable across the committed-seal field changing underneath it.
    pub fn hash(&self) -> Hash {
        alloy_primitives::keccak256(alloy_rlp::encode(self))
    }
}

/// The abstract surface the PBFT layer needs from whatever the embedding
/// chain calls a "block".
pub trait Proposal: Encodable + Decodable + Clone + fmt::Debug + Send + Sync + 'static {
    fn number(&self) -> u64;
    fn time(&self) -> u64;
    fn hash(&self) -> Hash;
    fn header(&self) -> &Header;
    fn header_mut(&mut self) -> &mut Header;
}

/// A minimal concrete proposal: a header plus an opaque, uninterpreted body.
/// Good enough for tests and for embedders that have no richer block type
/// of their own; real transaction/state handling stays out of scope.
#[derive(Debug, Clone, PartialEq, Eq, RlpEncodable, RlpDecodable)]
pub struct Block {
    pub header: Header,
    pub body: Bytes,
}

impl Proposal for Block {
    fn number(&self) -> u64 {
        self.header.number
    }
    fn time(&self) -> u64 {
        self.header.time
    }
    fn hash(&self) -> Hash {
        self.header.hash()
    }
    fn header(&self) -> &Header {
        &self.header
    }
    fn header_mut(&mut self) -> &mut Header {
        &mut self.header
    }
}
