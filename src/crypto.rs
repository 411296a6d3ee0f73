//! Signing and signature-recovery helpers, ported from
//! `consensus/dbft/utils.go` (`GetSignatureAddress`) onto `secp256k1`, the
//! way `recover_proposer` does it in `consensus/parlia.rs`.

use alloy_primitives::{keccak256, Address};
use secp256k1::{
    ecdsa::{RecoverableSignature, RecoveryId},
    Message, SecretKey, SECP256K1,
};

use crate::{error::DbftError, types::{Hash, Signature}};

/// Sign `digest` (already hashed) with `key`, returning `r ‖ s ‖ v`.
pub fn sign(key: &SecretKey, digest: Hash) -> Result<Signature, DbftError> {
    let message = Message::from_digest(digest.0);
    let (recovery_id, compact) = SECP256K1.sign_ecdsa_recoverable(&message, key).serialize_compact();

    let mut buf = [0u8; 65];
    buf[..64].copy_from_slice(&compact);
    buf[64] = recovery_id.to_i32() as u8;
    Ok(Signature(buf))
}

/// Recover the signer address from `digest` and its `signature`.
pub fn recover_address(digest: Hash, signature: &Signature) -> Result<Address, DbftError> {
    let recovery_id =
        RecoveryId::from_i32(signature.0[64] as i32).map_err(|_| DbftError::InvalidSignature)?;
    let recoverable = RecoverableSignature::from_compact(&signature.0[..64], recovery_id)
        .map_err(|_| DbftError::InvalidSignature)?;

    let message = Message::from_digest(digest.0);
    let public_key = SECP256K1
        .recover_ecdsa(&message, &recoverable)
        .map_err(|_| DbftError::InvalidSignature)?;

    let uncompressed = public_key.serialize_uncompressed();
    let hash = keccak256(&uncompressed[1..]);
    Ok(Address::from_slice(&hash[12..]))
}

/// `keccak256(data)` then recover — mirrors `GetSignatureAddress`, which
/// hashes the raw payload before recovery.
pub fn recover_address_from_payload(payload: &[u8], signature: &Signature) -> Result<Address, DbftError> {
    recover_address(keccak256(payload), signature)
}

/// `keccak256(data)` then sign — mirrors `backend.Sign`, which hashes
/// whatever byte string it is handed (a raw message payload, or already a
/// header/proposal hash) before signing.
pub fn sign_payload(key: &SecretKey, payload: &[u8]) -> Result<Signature, DbftError> {
    sign(key, keccak256(payload))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key() -> SecretKey {
        SecretKey::from_slice(&[0x11; 32]).unwrap()
    }

    #[test]
    fn recover_address_round_trips_through_sign() {
        let key = key();
        let public = secp256k1::PublicKey::from_secret_key(SECP256K1, &key);
        let uncompressed = public.serialize_uncompressed();
        let expected = Address::from_slice(&keccak256(&uncompressed[1..])[12..]);

        let digest = keccak256(b"dbft");
        let signature = sign(&key, digest).unwrap();
        assert_eq!(recover_address(digest, &signature).unwrap(), expected);
    }

    #[test]
    fn sign_payload_matches_the_double_hash_recovery_path() {
        let key = key();
        let payload = b"preprepare payload";
        let signature = sign_payload(&key, payload).unwrap();

        let signer = recover_address_from_payload(payload, &signature).unwrap();
        let direct = recover_address(keccak256(payload), &signature).unwrap();
        assert_eq!(signer, direct);
    }

    #[test]
    fn signature_does_not_recover_the_signer_under_a_different_digest() {
        let key = key();
        let digest = keccak256(b"dbft");
        let other_digest = keccak256(b"not dbft");
        let signature = sign(&key, digest).unwrap();

        let signer = recover_address(digest, &signature).unwrap();
        let under_wrong_digest = recover_address(other_digest, &signature).ok();
        assert_ne!(under_wrong_digest, Some(signer));
    }
}
