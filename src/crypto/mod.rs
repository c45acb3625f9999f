//! Cryptographic primitives backing the RLPx handshake and discovery wire:
//! keccak256 hashing, secp256k1 signing/recovery, and ECIES encryption.

pub mod ecies;
pub mod keccak;
pub mod secp256k1;

pub use ecies::{ecies_decrypt, ecies_encrypt};
pub use keccak::keccak256;
pub use secp256k1::{id_from_public_key, public_key_to_address, recover, sign, SigError};
