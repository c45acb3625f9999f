//! The rolling Keccak-256 MAC state chained across handshake secret
//! derivation and every subsequent frame (§4.7/§4.8). Egress and ingress
//! each own one independent `RollingMac`.

use aes::Aes128;
use cipher::generic_array::GenericArray;
use cipher::{BlockEncrypt, NewBlockCipher};
use ethereum_types::H256;
use sha3::{Digest, Keccak256};

/// A Keccak-256 hasher that is never finalized-and-discarded: callers peek
/// its current digest with [`RollingMac::digest`] (which clones the
/// internal state) and keep feeding it more bytes afterward.
#[derive(Clone)]
pub struct RollingMac {
    hasher: Keccak256,
}

impl RollingMac {
    /// Seed the rolling state with `mac_secret XOR nonce` followed by the
    /// handshake transcript (the auth or ack packet bytes), per §4.7.
    pub fn seeded(mac_secret: &H256, nonce: H256, transcript: &[u8]) -> Self {
        let mut hasher = Keccak256::new();
        let mut seed = [0_u8; 32];
        for i in 0..32 {
            seed[i] = mac_secret.as_bytes()[i] ^ nonce.as_bytes()[i];
        }
        hasher.update(seed);
        hasher.update(transcript);
        Self { hasher }
    }

    fn update(&mut self, data: &[u8]) {
        self.hasher.update(data);
    }

    fn digest(&self) -> [u8; 32] {
        self.hasher.clone().finalize().into()
    }

    fn digest16(&self) -> [u8; 16] {
        let full = self.digest();
        let mut out = [0_u8; 16];
        out.copy_from_slice(&full[..16]);
        out
    }

    /// `updateHeaderMAC` (§4.8): fold the encrypted 16-byte frame header
    /// into the rolling state and return the new MAC tag.
    pub fn update_header_mac(&mut self, mac_secret: &H256, enc_header: &[u8; 16]) -> [u8; 16] {
        let seed = self.digest16();
        let enc16 = aes128_encrypt_block(mac_secret, &seed);
        let mixed = xor16(&enc16, enc_header);
        self.update(&mixed);
        self.digest16()
    }

    /// `updateFrameMAC` (§4.8): fold the encrypted frame body into the
    /// rolling state and return the new MAC tag.
    pub fn update_frame_mac(&mut self, mac_secret: &H256, enc_body: &[u8]) -> [u8; 16] {
        self.update(enc_body);
        let seed = self.digest16();
        let enc16 = aes128_encrypt_block(mac_secret, &seed);
        let mixed = xor16(&enc16, &seed);
        self.update(&mixed);
        self.digest16()
    }
}

fn aes128_encrypt_block(key: &H256, block: &[u8; 16]) -> [u8; 16] {
    // The MAC secret is a 32-byte Keccak digest; only its first 16 bytes
    // are used as the AES-128 key for the MAC block cipher (§4.8).
    let cipher = Aes128::new(GenericArray::from_slice(&key.as_bytes()[..16]));
    let mut buf = GenericArray::clone_from_slice(block);
    cipher.encrypt_block(&mut buf);
    let mut out = [0_u8; 16];
    out.copy_from_slice(&buf);
    out
}

fn xor16(a: &[u8; 16], b: &[u8; 16]) -> [u8; 16] {
    let mut out = [0_u8; 16];
    for i in 0..16 {
        out[i] = a[i] ^ b[i];
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn chain_is_deterministic_given_identical_inputs() {
        let mac_secret = H256::repeat_byte(0x11);
        let nonce = H256::repeat_byte(0x22);

        let mut a = RollingMac::seeded(&mac_secret, nonce, b"transcript");
        let mut b = RollingMac::seeded(&mac_secret, nonce, b"transcript");

        let header = [7_u8; 16];
        let tag_a = a.update_header_mac(&mac_secret, &header);
        let tag_b = b.update_header_mac(&mac_secret, &header);
        assert_eq!(tag_a, tag_b);

        let body = [9_u8; 32];
        assert_eq!(
            a.update_frame_mac(&mac_secret, &body),
            b.update_frame_mac(&mac_secret, &body)
        );
    }

    #[test]
    fn tampering_with_header_changes_the_chain() {
        let mac_secret = H256::repeat_byte(0x11);
        let nonce = H256::repeat_byte(0x22);

        let mut a = RollingMac::seeded(&mac_secret, nonce, b"transcript");
        let mut b = RollingMac::seeded(&mac_secret, nonce, b"transcript");

        a.update_header_mac(&mac_secret, &[1_u8; 16]);
        b.update_header_mac(&mac_secret, &[2_u8; 16]);

        let body = [0_u8; 16];
        assert_ne!(
            a.update_frame_mac(&mac_secret, &body),
            b.update_frame_mac(&mac_secret, &body)
        );
    }
}
