//! ECDSA sign/recover over secp256k1 and the node-id/address derivations
//! built on top of it.
//!
//! Ethereum never uses compressed/DER-encoded signatures on the wire: `r`
//! and `s` are fixed 32-byte big-endian integers, `s` is normalized low
//! (`s <= n/2`), and the recovery id is a single byte in `{0, 1}`.

use ethereum_types::{Address, H256};
use secp256k1::{
    ecdsa::{RecoverableSignature, RecoveryId},
    Message, PublicKey, SecretKey, SECP256K1,
};
use thiserror::Error;

use crate::crypto::keccak::keccak256;

#[derive(Debug, Error)]
pub enum SigError {
    #[error("invalid signature")]
    InvalidSignature,
    #[error("invalid public key")]
    InvalidPublicKey,
    #[error("recovery failed")]
    RecoveryFailed,
}

/// A 64-byte uncompressed public key with the leading `0x04` tag stripped,
/// the form used throughout the devp2p wire (node ids, `Hello`, auth
/// messages).
pub type UncompressedPublicKey = [u8; 64];

pub fn public_key_to_uncompressed(public_key: &PublicKey) -> UncompressedPublicKey {
    let serialized = public_key.serialize_uncompressed();
    let mut out = [0_u8; 64];
    out.copy_from_slice(&serialized[1..]);
    out
}

pub fn public_key_from_uncompressed(bytes: &UncompressedPublicKey) -> Result<PublicKey, SigError> {
    let mut tagged = [0_u8; 65];
    tagged[0] = 0x04;
    tagged[1..].copy_from_slice(bytes);
    PublicKey::from_slice(&tagged).map_err(|_| SigError::InvalidPublicKey)
}

/// The devp2p node id: keccak256 of the 64-byte uncompressed public key,
/// i.e. keccak(Qx ∥ Qy).
pub fn id_from_public_key(public_key: &PublicKey) -> H256 {
    keccak256(public_key_to_uncompressed(public_key))
}

/// The Ethereum account address: the low 20 bytes of `id_from_public_key`.
pub fn public_key_to_address(public_key: &PublicKey) -> Address {
    Address::from_slice(&id_from_public_key(public_key).as_bytes()[12..])
}

/// Sign `hash` with `secret_key`, returning `(r ∥ s, recovery_id)` with `s`
/// normalized low. `secp256k1`'s `sign_ecdsa_recoverable` is deterministic
/// (RFC 6979) so this has no hidden randomness.
pub fn sign(hash: H256, secret_key: &SecretKey) -> Result<([u8; 64], RecoveryId), SigError> {
    let message = Message::from_slice(hash.as_bytes()).map_err(|_| SigError::InvalidSignature)?;
    let sig = SECP256K1.sign_ecdsa_recoverable(&message, secret_key);
    let (recovery_id, data) = sig.serialize_compact();
    Ok((data, recovery_id))
}

/// Recover the public key that produced `(signature, recovery_id)` over
/// `hash`.
pub fn recover(
    hash: H256,
    signature: &[u8; 64],
    recovery_id: RecoveryId,
) -> Result<PublicKey, SigError> {
    let message = Message::from_slice(hash.as_bytes()).map_err(|_| SigError::InvalidSignature)?;
    let sig = RecoverableSignature::from_compact(signature, recovery_id)
        .map_err(|_| SigError::InvalidSignature)?;
    SECP256K1
        .recover_ecdsa(&message, &sig)
        .map_err(|_| SigError::RecoveryFailed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::OsRng;

    #[test]
    fn sign_then_recover_round_trips() {
        let secret_key = SecretKey::new(&mut OsRng);
        let public_key = PublicKey::from_secret_key(SECP256K1, &secret_key);
        let hash = keccak256(b"some message to sign");

        let (signature, recovery_id) = sign(hash, &secret_key).unwrap();
        let recovered = recover(hash, &signature, recovery_id).unwrap();

        assert_eq!(recovered, public_key);
        assert_eq!(
            public_key_to_address(&recovered),
            public_key_to_address(&public_key)
        );
    }

    #[test]
    fn uncompressed_round_trips() {
        let secret_key = SecretKey::new(&mut OsRng);
        let public_key = PublicKey::from_secret_key(SECP256K1, &secret_key);
        let bytes = public_key_to_uncompressed(&public_key);
        assert_eq!(public_key_from_uncompressed(&bytes).unwrap(), public_key);
    }
}
