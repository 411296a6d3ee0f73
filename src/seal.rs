//! Seal codec: encodes and decodes the consensus payload carried in a
//! header's `extra` field.
//!
//! `extra` is laid out as `[vanity:32] ‖ rlp({seal, committed_seals})`,
//! ported from `core/types/dbft.go` (`DbftExtra`, `ExtractDbftExtra`,
//! `DbftFilteredHeader`) and `consensus/dbft/backend/engine.go`
//! (`writeSeal`, `writeCommittedSeals`, `sigHash`).

use alloy_primitives::{keccak256, Bytes};
use alloy_rlp::{Encodable, RlpDecodable, RlpEncodable};

use crate::{
    constants::{SEAL_LEN, VANITY},
    error::DbftError,
    types::{Hash, Header, Signature},
};

#[derive(Debug, Clone, Default, PartialEq, Eq, RlpEncodable, RlpDecodable)]
struct ExtraPayload {
    seal: Bytes,
    committed_seals: Vec<Bytes>,
}

/// The decoded consensus payload of a header's `extra` field.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExtraData {
    pub vanity: [u8; VANITY],
    pub seal: Option<Signature>,
    pub committed_seals: Vec<Signature>,
}

/// Parse `header.extra` into its vanity prefix, optional proposer seal, and
/// committed-seal list.
pub fn extract(header: &Header) -> Result<ExtraData, DbftError> {
    if header.extra.len() < VANITY {
        return Err(DbftError::InvalidExtra("extra shorter than vanity prefix"));
    }
    let mut vanity = [0u8; VANITY];
    vanity.copy_from_slice(&header.extra[..VANITY]);

    let payload: ExtraPayload = alloy_rlp::decode_exact(&header.extra[VANITY..])
        .map_err(|_| DbftError::InvalidExtra("malformed rlp payload"))?;

    let seal = if payload.seal.is_empty() {
        None
    } else {
        Some(Signature::from_slice(&payload.seal).ok_or(DbftError::InvalidSignature)?)
    };

    let mut committed_seals = Vec::with_capacity(payload.committed_seals.len());
    for raw in &payload.committed_seals {
        committed_seals.push(Signature::from_slice(raw).ok_or(DbftError::InvalidSignature)?);
    }

    Ok(ExtraData { vanity, seal, committed_seals })
}

/// Build a fresh `extra` field carrying `vanity` and no seal or committed
/// seals yet, for a header about to be proposed.
pub fn init_extra(vanity: &[u8]) -> Bytes {
    encode_extra(vanity, &[], &[])
}

fn encode_extra(vanity: &[u8], seal: &[u8], committed_seals: &[Signature]) -> Bytes {
    let payload = ExtraPayload {
        seal: Bytes::copy_from_slice(seal),
        committed_seals: committed_seals.iter().map(|s| Bytes::copy_from_slice(&s.0)).collect(),
    };
    let mut out = Vec::with_capacity(VANITY + payload.length());
    out.extend_from_slice(vanity);
    let mut padded = out;
    if padded.len() < VANITY {
        padded.resize(VANITY, 0);
    }
    alloy_rlp::Encodable::encode(&payload, &mut padded);
    Bytes::from(padded)
}

fn vanity_of(header: &Header) -> [u8; VANITY] {
    let mut vanity = [0u8; VANITY];
    let have = header.extra.len().min(VANITY);
    vanity[..have].copy_from_slice(&header.extra[..have]);
    vanity
}

/// Replace the proposer seal, preserving vanity and (per `writeSeal`) any
/// committed seals already present.
pub fn write_seal(header: &mut Header, seal: Signature) -> Result<(), DbftError> {
    if seal.0.len() != SEAL_LEN {
        return Err(DbftError::InvalidSignature);
    }
    let existing = extract(header).unwrap_or(ExtraData {
        vanity: vanity_of(header),
        seal: None,
        committed_seals: Vec::new(),
    });
    header.extra = encode_extra(&existing.vanity, &seal.0, &existing.committed_seals);
    Ok(())
}

/// Replace the committed-seal list, preserving whatever proposer seal is
/// already present — `writeCommittedSeals` extracts the existing payload
/// and only overwrites the committed-seal field before re-encoding.
pub fn write_committed_seals(header: &mut Header, seals: &[Signature]) -> Result<(), DbftError> {
    if seals.is_empty() {
        return Err(DbftError::InvalidCommittedSeals { valid: 0, total: 0, two_f: 0 });
    }
    let existing = extract(header)?;
    let seal_bytes = existing.seal.map(|s| s.0);
    let seal_slice: &[u8] = seal_bytes.as_ref().map(|b| b.as_slice()).unwrap_or(&[]);
    header.extra = encode_extra(&existing.vanity, seal_slice, seals);
    Ok(())
}

/// The signing domain for the proposer seal: `keccak256(rlp(header))` with
/// `seal` and `committed_seals` both blanked, vanity preserved.
pub fn sig_hash(header: &Header) -> Result<Hash, DbftError> {
    let existing = extract(header).unwrap_or(ExtraData {
        vanity: vanity_of(header),
        seal: None,
        committed_seals: Vec::new(),
    });
    let mut filtered = header.clone();
    filtered.extra = encode_extra(&existing.vanity, &[], &[]);
    Ok(keccak256(alloy_rlp::encode(&filtered)))
}

/// The signing domain for committed seals: `keccak256(rlp(header))` with
/// `committed_seals` blanked to an empty list, vanity and proposer seal
/// preserved. Every commit in a round signs this same digest regardless of
/// how many committed seals have landed so far or been written back into
/// the header yet, so a verifier recomputes it from the final sealed header
/// the same way each signer computed it from the pre-commit one.
pub fn proposal_hash(header: &Header) -> Hash {
    let existing = extract(header).unwrap_or(ExtraData {
        vanity: vanity_of(header),
        seal: None,
        committed_seals: Vec::new(),
    });
    let seal_bytes = existing.seal.map(|s| s.0);
    let seal_slice: &[u8] = seal_bytes.as_ref().map(|b| b.as_slice()).unwrap_or(&[]);
    let mut filtered = header.clone();
    filtered.extra = encode_extra(&existing.vanity, seal_slice, &[]);
    keccak256(alloy_rlp::encode(&filtered))
}
