//! EIP-8 RLPx auth/auth-ack handshake and secret derivation (§4.7).
//!
//! The initiator signs `static_shared XOR nonce` with its *ephemeral* key
//! rather than sending the ephemeral public key directly; the recipient
//! recovers it from the signature. This is the standard devp2p
//! construction and is what lets both sides agree on an ephemeral ECDH
//! point without another round trip.

use std::io::{Read, Write};

use bytes::{Bytes, BytesMut};
use ethereum_types::H256;
use rand::{rngs::OsRng, RngCore};
use secp256k1::{ecdsa::RecoveryId, PublicKey, SecretKey, SECP256K1};

use crate::crypto::ecies::{ecdh_shared_x, ecies_decrypt, ecies_encrypt};
use crate::crypto::keccak::keccak256_concat;
use crate::crypto::secp256k1::{public_key_from_uncompressed, public_key_to_uncompressed, recover, sign};
use crate::error::RlpxError;
use crate::rlp::{decode_list_payload, Decodable, Encodable};

use super::mac::RollingMac;

const EIP8_VERSION: u8 = 4;
const MIN_PAD: usize = 100;
const MAX_PAD: usize = 300;

/// This node's static identity, used for every handshake it runs.
#[derive(Clone)]
pub struct LocalKeys {
    pub static_secret: SecretKey,
    pub static_public: PublicKey,
}

impl LocalKeys {
    pub fn new(static_secret: SecretKey) -> Self {
        let static_public = PublicKey::from_secret_key(SECP256K1, &static_secret);
        Self {
            static_secret,
            static_public,
        }
    }
}

/// The derived RLPx session material: two stream-cipher secrets and the
/// two independently-chained rolling MAC states.
pub struct Secrets {
    pub aes_secret: H256,
    pub mac_secret: H256,
    pub egress_mac: RollingMac,
    pub ingress_mac: RollingMac,
}

struct AuthMessage {
    signature: [u8; 65],
    initiator_public_key: PublicKey,
    nonce: H256,
    version: u8,
}

impl AuthMessage {
    fn encode_plain(&self) -> Bytes {
        crate::rlp::encode_list(|out| {
            self.signature.as_ref().encode(out);
            public_key_to_uncompressed(&self.initiator_public_key)
                .as_ref()
                .encode(out);
            self.nonce.encode(out);
            self.version.encode(out);
        })
    }

    fn decode_plain(buf: &[u8]) -> Result<Self, RlpxError> {
        let mut rest = buf;
        let payload = decode_list_payload(&mut rest)?;
        let mut p = payload;

        let sig_bytes = Bytes::decode(&mut p)?;
        if sig_bytes.len() != 65 {
            return Err(RlpxError::HandshakeFailed("auth signature length".into()));
        }
        let mut signature = [0_u8; 65];
        signature.copy_from_slice(&sig_bytes);

        let pubkey_bytes = Bytes::decode(&mut p)?;
        if pubkey_bytes.len() != 64 {
            return Err(RlpxError::HandshakeFailed("auth pubkey length".into()));
        }
        let mut pubkey_array = [0_u8; 64];
        pubkey_array.copy_from_slice(&pubkey_bytes);
        let initiator_public_key = public_key_from_uncompressed(&pubkey_array)
            .map_err(|_| RlpxError::HandshakeFailed("auth pubkey invalid".into()))?;

        let nonce = H256::decode(&mut p)?;
        let version = u8::decode(&mut p)?;

        Ok(Self {
            signature,
            initiator_public_key,
            nonce,
            version,
        })
    }
}

struct AuthAckMessage {
    ephemeral_public_key: PublicKey,
    nonce: H256,
    version: u8,
}

impl AuthAckMessage {
    fn encode_plain(&self) -> Bytes {
        crate::rlp::encode_list(|out| {
            public_key_to_uncompressed(&self.ephemeral_public_key)
                .as_ref()
                .encode(out);
            self.nonce.encode(out);
            self.version.encode(out);
        })
    }

    fn decode_plain(buf: &[u8]) -> Result<Self, RlpxError> {
        let mut rest = buf;
        let payload = decode_list_payload(&mut rest)?;
        let mut p = payload;

        let pubkey_bytes = Bytes::decode(&mut p)?;
        if pubkey_bytes.len() != 64 {
            return Err(RlpxError::HandshakeFailed("ack pubkey length".into()));
        }
        let mut pubkey_array = [0_u8; 64];
        pubkey_array.copy_from_slice(&pubkey_bytes);
        let ephemeral_public_key = public_key_from_uncompressed(&pubkey_array)
            .map_err(|_| RlpxError::HandshakeFailed("ack pubkey invalid".into()))?;

        let nonce = H256::decode(&mut p)?;
        let version = u8::decode(&mut p)?;

        Ok(Self {
            ephemeral_public_key,
            nonce,
            version,
        })
    }
}

fn random_nonce() -> H256 {
    let mut bytes = [0_u8; 32];
    OsRng.fill_bytes(&mut bytes);
    H256::from(bytes)
}

fn xor32(a: [u8; 32], b: [u8; 32]) -> [u8; 32] {
    let mut out = [0_u8; 32];
    for i in 0..32 {
        out[i] = a[i] ^ b[i];
    }
    out
}

/// Append EIP-8's random 100-300 byte padding so the wire length of the
/// initial exchange doesn't betray the plain pre-EIP-8 format.
fn eip8_pad(plain: &Bytes) -> Vec<u8> {
    let pad_len = MIN_PAD + (OsRng.next_u32() as usize % (MAX_PAD - MIN_PAD + 1));
    let mut padding = vec![0_u8; pad_len];
    OsRng.fill_bytes(&mut padding);
    let mut out = BytesMut::with_capacity(plain.len() + pad_len);
    out.extend_from_slice(plain);
    out.extend_from_slice(&padding);
    out.to_vec()
}

/// ECIES-encrypt `padded` to `remote_public_key` and prepend the 2-byte
/// big-endian size prefix, itself folded into the ECIES MAC as
/// `shared_mac_data` (§4.7).
fn eip8_encrypt(remote_public_key: &PublicKey, padded: &[u8]) -> Vec<u8> {
    const ECIES_OVERHEAD: usize = 65 + 16 + 32; // ephemeral pubkey + iv + mac
    let total_len = (padded.len() + ECIES_OVERHEAD) as u16;
    let size_prefix = total_len.to_be_bytes();
    let envelope = ecies_encrypt(remote_public_key, padded, &size_prefix);
    let mut out = Vec::with_capacity(2 + envelope.len());
    out.extend_from_slice(&size_prefix);
    out.extend_from_slice(&envelope);
    out
}

fn read_eip8_packet(stream: &mut impl Read) -> Result<(Vec<u8>, [u8; 2]), RlpxError> {
    let mut size_prefix = [0_u8; 2];
    stream.read_exact(&mut size_prefix)?;
    let size = u16::from_be_bytes(size_prefix) as usize;
    let mut body = vec![0_u8; size];
    stream.read_exact(&mut body)?;
    Ok((body, size_prefix))
}

fn derive_secrets(
    ecdh_secret: &[u8; 32],
    init_nonce: H256,
    resp_nonce: H256,
    auth_packet: &[u8],
    ack_packet: &[u8],
    is_initiator: bool,
) -> Secrets {
    let shared_hash = keccak256_concat(&[ecdh_secret, keccak256_concat(&[resp_nonce.as_bytes(), init_nonce.as_bytes()]).as_bytes()]);
    let aes_secret = keccak256_concat(&[ecdh_secret, shared_hash.as_bytes()]);
    let mac_secret = keccak256_concat(&[ecdh_secret, aes_secret.as_bytes()]);

    let (egress_nonce, egress_transcript, ingress_nonce, ingress_transcript) = if is_initiator {
        (resp_nonce, auth_packet, init_nonce, ack_packet)
    } else {
        (init_nonce, ack_packet, resp_nonce, auth_packet)
    };

    Secrets {
        aes_secret,
        mac_secret,
        egress_mac: RollingMac::seeded(&mac_secret, egress_nonce, egress_transcript),
        ingress_mac: RollingMac::seeded(&mac_secret, ingress_nonce, ingress_transcript),
    }
}

/// Run the initiator side of the handshake over an already-connected
/// stream, returning the derived session secrets.
pub fn run_initiator(
    stream: &mut (impl Read + Write),
    local: &LocalKeys,
    remote_static_public: &PublicKey,
) -> Result<Secrets, RlpxError> {
    let local_nonce = random_nonce();
    let ephemeral_secret = SecretKey::new(&mut OsRng);

    let static_shared = ecdh_shared_x(&local.static_secret, remote_static_public);
    let to_sign = H256(xor32(static_shared, local_nonce.0));
    let (sig_compact, recovery_id) =
        sign(to_sign, &ephemeral_secret).map_err(|e| RlpxError::HandshakeFailed(e.to_string()))?;
    let mut signature = [0_u8; 65];
    signature[..64].copy_from_slice(&sig_compact);
    signature[64] = recovery_id.to_i32() as u8;

    let auth = AuthMessage {
        signature,
        initiator_public_key: local.static_public,
        nonce: local_nonce,
        version: EIP8_VERSION,
    };
    let padded = eip8_pad(&auth.encode_plain());
    let auth_packet = eip8_encrypt(remote_static_public, &padded);
    stream.write_all(&auth_packet)?;

    let (ack_body, ack_size_prefix) = read_eip8_packet(stream)?;
    let ack_plain = ecies_decrypt(&local.static_secret, &ack_body, &ack_size_prefix)
        .map_err(|e| RlpxError::HandshakeFailed(e.to_string()))?;
    let ack = AuthAckMessage::decode_plain(&ack_plain)?;

    let mut ack_packet = Vec::with_capacity(2 + ack_body.len());
    ack_packet.extend_from_slice(&ack_size_prefix);
    ack_packet.extend_from_slice(&ack_body);

    let ecdh_secret = ecdh_shared_x(&ephemeral_secret, &ack.ephemeral_public_key);
    Ok(derive_secrets(
        &ecdh_secret,
        local_nonce,
        ack.nonce,
        &auth_packet,
        &ack_packet,
        true,
    ))
}

/// Run the recipient side of the handshake over an accepted stream,
/// returning the derived session secrets.
pub fn run_recipient(stream: &mut (impl Read + Write), local: &LocalKeys) -> Result<Secrets, RlpxError> {
    let (auth_body, auth_size_prefix) = read_eip8_packet(stream)?;
    let auth_plain = ecies_decrypt(&local.static_secret, &auth_body, &auth_size_prefix)
        .map_err(|e| RlpxError::HandshakeFailed(e.to_string()))?;
    let auth = AuthMessage::decode_plain(&auth_plain)?;

    let mut auth_packet = Vec::with_capacity(2 + auth_body.len());
    auth_packet.extend_from_slice(&auth_size_prefix);
    auth_packet.extend_from_slice(&auth_body);

    let static_shared = ecdh_shared_x(&local.static_secret, &auth.initiator_public_key);
    let to_verify = H256(xor32(static_shared, auth.nonce.0));
    let recovery_id = RecoveryId::from_i32(auth.signature[64] as i32)
        .map_err(|_| RlpxError::HandshakeFailed("bad recovery id".into()))?;
    let mut sig_compact = [0_u8; 64];
    sig_compact.copy_from_slice(&auth.signature[..64]);
    let remote_ephemeral_public = recover(to_verify, &sig_compact, recovery_id)
        .map_err(|e| RlpxError::HandshakeFailed(e.to_string()))?;

    let recipient_nonce = random_nonce();
    let ephemeral_secret = SecretKey::new(&mut OsRng);
    let ack = AuthAckMessage {
        ephemeral_public_key: PublicKey::from_secret_key(SECP256K1, &ephemeral_secret),
        nonce: recipient_nonce,
        version: EIP8_VERSION,
    };
    let padded = eip8_pad(&ack.encode_plain());
    let ack_packet = eip8_encrypt(&auth.initiator_public_key, &padded);
    stream.write_all(&ack_packet)?;

    let ecdh_secret = ecdh_shared_x(&ephemeral_secret, &remote_ephemeral_public);
    Ok(derive_secrets(
        &ecdh_secret,
        auth.nonce,
        recipient_nonce,
        &auth_packet,
        &ack_packet,
        false,
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    /// A pair of cursors standing in for the two ends of a TCP connection,
    /// so the handshake can be exercised without a socket.
    struct Pipe {
        read_from: Cursor<Vec<u8>>,
        written: Vec<u8>,
    }

    impl Read for Pipe {
        fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
            self.read_from.read(buf)
        }
    }

    impl Write for Pipe {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.written.extend_from_slice(buf);
            Ok(buf.len())
        }
        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn initiator_and_recipient_agree_on_secrets() {
        let initiator_keys = LocalKeys::new(SecretKey::new(&mut OsRng));
        let recipient_keys = LocalKeys::new(SecretKey::new(&mut OsRng));

        // Run the initiator against an in-memory pipe that has no reply
        // queued yet, just to capture the auth packet it writes.
        let mut initiator_pipe = Pipe {
            read_from: Cursor::new(Vec::new()),
            written: Vec::new(),
        };
        let initiator_nonce = random_nonce();
        let ephemeral_secret = SecretKey::new(&mut OsRng);
        let static_shared = ecdh_shared_x(&initiator_keys.static_secret, &recipient_keys.static_public);
        let to_sign = H256(xor32(static_shared, initiator_nonce.0));
        let (sig_compact, recovery_id) = sign(to_sign, &ephemeral_secret).unwrap();
        let mut signature = [0_u8; 65];
        signature[..64].copy_from_slice(&sig_compact);
        signature[64] = recovery_id.to_i32() as u8;
        let auth = AuthMessage {
            signature,
            initiator_public_key: initiator_keys.static_public,
            nonce: initiator_nonce,
            version: EIP8_VERSION,
        };
        let padded = eip8_pad(&auth.encode_plain());
        let auth_packet = eip8_encrypt(&recipient_keys.static_public, &padded);
        initiator_pipe.written = auth_packet.clone();

        // Feed that packet to the recipient side as its input stream.
        let mut recipient_pipe = Pipe {
            read_from: Cursor::new(auth_packet.clone()),
            written: Vec::new(),
        };
        let recipient_secrets = run_recipient(&mut recipient_pipe, &recipient_keys).unwrap();

        // Feed the recipient's ack back to a fresh initiator run that
        // reuses the same ephemeral key/nonce to finish the exchange.
        let (ack_body, ack_size_prefix) = {
            let mut rest = &recipient_pipe.written[..];
            let mut size_prefix = [0_u8; 2];
            size_prefix.copy_from_slice(&rest[..2]);
            rest = &rest[2..];
            (rest.to_vec(), size_prefix)
        };
        let ack_plain = ecies_decrypt(&initiator_keys.static_secret, &ack_body, &ack_size_prefix).unwrap();
        let ack = AuthAckMessage::decode_plain(&ack_plain).unwrap();
        let mut ack_packet = Vec::new();
        ack_packet.extend_from_slice(&ack_size_prefix);
        ack_packet.extend_from_slice(&ack_body);

        let ecdh_secret = ecdh_shared_x(&ephemeral_secret, &ack.ephemeral_public_key);
        let initiator_secrets = derive_secrets(&ecdh_secret, initiator_nonce, ack.nonce, &auth_packet, &ack_packet, true);

        assert_eq!(initiator_secrets.aes_secret, recipient_secrets.aes_secret);
        assert_eq!(initiator_secrets.mac_secret, recipient_secrets.mac_secret);
    }
}
