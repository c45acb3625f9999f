//! ECIES: ephemeral-static ECDH + a NIST SP 800-56 concatenation KDF +
//! AES-256-CTR + an HMAC-SHA256 tag. Used exclusively to encrypt the RLPx
//! EIP-8 auth/auth-ack messages (§4.6/§4.7) — the framed session itself
//! uses the rolling Keccak MAC construction in [`crate::net::rlpx::session`]
//! instead.

use aes::Aes256;
use cipher::generic_array::GenericArray;
use cipher::{NewCipher, StreamCipher};
use ctr::Ctr128BE;
use hmac::{Hmac, Mac, NewMac};
use rand::rngs::OsRng;
use secp256k1::{ecdh::SharedSecret, PublicKey, SecretKey, SECP256K1};
use sha2::{Digest, Sha256};
use thiserror::Error;

type Aes256Ctr64 = Ctr128BE<Aes256>;
type HmacSha256 = Hmac<Sha256>;

const IV_LEN: usize = 16;
const MAC_LEN: usize = 32;
const PUBKEY_LEN: usize = 65;

#[derive(Debug, Error)]
pub enum EciesError {
    #[error("ciphertext shorter than the public key/iv/mac envelope")]
    TooShort,
    #[error("invalid ephemeral public key in envelope")]
    InvalidPublicKey,
    #[error("mac mismatch")]
    InvalidMac,
}

/// Concatenation KDF (NIST SP 800-56A, hash = SHA-256): derive `len` bytes
/// from `shared_secret` by hashing `counter_be32 ∥ shared_secret` for
/// increasing 32-bit counters and concatenating the digests.
fn concat_kdf(shared_secret: &[u8], len: usize) -> Vec<u8> {
    let mut out = Vec::with_capacity(len);
    let mut counter: u32 = 1;
    while out.len() < len {
        let mut hasher = Sha256::new();
        hasher.update(counter.to_be_bytes());
        hasher.update(shared_secret);
        out.extend_from_slice(&hasher.finalize());
        counter += 1;
    }
    out.truncate(len);
    out
}

/// Raw x-coordinate of the ECDH shared point (no implicit hash), as the KDF
/// input spec.md §4.6 calls for. Exposed to [`crate::net::rlpx::handshake`],
/// which needs the same primitive for the static/ephemeral ECDH steps of
/// secret derivation (§4.7), not just for ECIES encryption.
pub(crate) fn ecdh_shared_x(secret_key: &SecretKey, public_key: &PublicKey) -> [u8; 32] {
    fn raw_x(x: &[u8], _y: &[u8]) -> [u8; 32] {
        let mut out = [0_u8; 32];
        out.copy_from_slice(x);
        out
    }
    let shared = SharedSecret::new_with_hash(public_key, secret_key, raw_x);
    *shared.as_ref()
}

/// Derive `(aes_key[32], mac_key[32])` from an ECDH shared secret.
fn derive_keys(shared_x: &[u8; 32]) -> ([u8; 32], [u8; 32]) {
    let derived = concat_kdf(shared_x, 64);
    let mut aes_key = [0_u8; 32];
    aes_key.copy_from_slice(&derived[..32]);
    let mac_key = Sha256::digest(&derived[32..64]).into();
    (aes_key, mac_key)
}

/// Encrypt `plaintext` to `remote_public_key`, returning
/// `ephemeral_pubkey(65) ∥ iv(16) ∥ ciphertext ∥ mac(32)`. `shared_mac_data`
/// is folded into the tag (EIP-8 passes the auth-message size prefix here).
pub fn ecies_encrypt(
    remote_public_key: &PublicKey,
    plaintext: &[u8],
    shared_mac_data: &[u8],
) -> Vec<u8> {
    let ephemeral_secret = SecretKey::new(&mut OsRng);
    let ephemeral_public = PublicKey::from_secret_key(SECP256K1, &ephemeral_secret);

    let shared_x = ecdh_shared_x(&ephemeral_secret, remote_public_key);
    let (aes_key, mac_key) = derive_keys(&shared_x);

    let mut iv = [0_u8; IV_LEN];
    rand::RngCore::fill_bytes(&mut OsRng, &mut iv);

    let mut ciphertext = plaintext.to_vec();
    let mut cipher = Aes256Ctr64::new(GenericArray::from_slice(&aes_key), GenericArray::from_slice(&iv));
    cipher.apply_keystream(&mut ciphertext);

    let mut mac = HmacSha256::new_from_slice(&mac_key).expect("hmac accepts any key length");
    mac.update(&iv);
    mac.update(&ciphertext);
    mac.update(shared_mac_data);
    let tag = mac.finalize().into_bytes();

    let mut out = Vec::with_capacity(PUBKEY_LEN + IV_LEN + ciphertext.len() + MAC_LEN);
    out.extend_from_slice(&ephemeral_public.serialize_uncompressed());
    out.extend_from_slice(&iv);
    out.extend_from_slice(&ciphertext);
    out.extend_from_slice(&tag);
    out
}

/// Decrypt an envelope produced by [`ecies_encrypt`] using `secret_key`.
pub fn ecies_decrypt(
    secret_key: &SecretKey,
    envelope: &[u8],
    shared_mac_data: &[u8],
) -> Result<Vec<u8>, EciesError> {
    if envelope.len() < PUBKEY_LEN + IV_LEN + MAC_LEN {
        return Err(EciesError::TooShort);
    }

    let (ephemeral_public_bytes, rest) = envelope.split_at(PUBKEY_LEN);
    let ephemeral_public =
        PublicKey::from_slice(ephemeral_public_bytes).map_err(|_| EciesError::InvalidPublicKey)?;

    let (iv, rest) = rest.split_at(IV_LEN);
    let (ciphertext, tag) = rest.split_at(rest.len() - MAC_LEN);

    let shared_x = ecdh_shared_x(secret_key, &ephemeral_public);
    let (aes_key, mac_key) = derive_keys(&shared_x);

    let mut mac = HmacSha256::new_from_slice(&mac_key).expect("hmac accepts any key length");
    mac.update(iv);
    mac.update(ciphertext);
    mac.update(shared_mac_data);
    mac.verify(tag).map_err(|_| EciesError::InvalidMac)?;

    let mut plaintext = ciphertext.to_vec();
    let mut cipher = Aes256Ctr64::new(GenericArray::from_slice(&aes_key), GenericArray::from_slice(iv));
    cipher.apply_keystream(&mut plaintext);
    Ok(plaintext)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encrypt_then_decrypt_round_trips() {
        let secret_key = SecretKey::new(&mut OsRng);
        let public_key = PublicKey::from_secret_key(SECP256K1, &secret_key);

        let plaintext = b"the auth message body";
        let envelope = ecies_encrypt(&public_key, plaintext, b"size-prefix");
        let decrypted = ecies_decrypt(&secret_key, &envelope, b"size-prefix").unwrap();

        assert_eq!(decrypted, plaintext);
    }

    #[test]
    fn tampered_mac_is_rejected() {
        let secret_key = SecretKey::new(&mut OsRng);
        let public_key = PublicKey::from_secret_key(SECP256K1, &secret_key);

        let mut envelope = ecies_encrypt(&public_key, b"hello", b"");
        let last = envelope.len() - 1;
        envelope[last] ^= 0xFF;

        assert!(ecies_decrypt(&secret_key, &envelope, b"").is_err());
    }
}
