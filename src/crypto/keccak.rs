//! keccak256, the Ethereum variant of Keccak-f\[1600\] (rate 1088, trailing
//! `0x01` domain byte — *not* NIST SHA3's `0x06`).

use ethereum_types::H256;
use sha3::{Digest, Keccak256};

/// Hash `data` and return the 32-byte digest.
pub fn keccak256(data: impl AsRef<[u8]>) -> H256 {
    H256::from_slice(&Keccak256::digest(data.as_ref()))
}

/// Hash the concatenation of `parts` without allocating an intermediate
/// buffer for the whole input.
pub fn keccak256_concat(parts: &[&[u8]]) -> H256 {
    let mut hasher = Keccak256::new();
    for part in parts {
        hasher.update(part);
    }
    H256::from_slice(&hasher.finalize())
}
