//! The framed, encrypted RLPx session (§4.8): two AES-256-CTR ciphers
//! (egress/ingress), shared counters, and the chained Keccak MAC from
//! [`super::mac`]. A session is created only after a successful handshake
//! and is strictly serial — one writer and one reader at a time, enforced
//! by the caller owning `&mut self` on every operation (§5).

use std::io::{Read, Write};

use aes::Aes256;
use bytes::{BufMut, Bytes, BytesMut};
use cipher::generic_array::GenericArray;
use cipher::{NewCipher, StreamCipher};
use ctr::Ctr128BE;

use crate::error::RlpxError;
use crate::rlp::{self, Decodable, Encodable};

use super::handshake::Secrets;
use super::mac::RollingMac;

type Aes256Ctr64 = Ctr128BE<Aes256>;

/// Frame bodies are padded to this boundary and bounded by the 16 MiB-1
/// cap §4.8 states for (decompressed) message payloads.
const BLOCK_SIZE: usize = 16;
const MAX_PAYLOAD_SIZE: usize = 16 * 1024 * 1024 - 1;

/// The header sentinel RLPx frames use in place of a real RLP list
/// (§4.8): `[0xC2, 0x80, 0x80]`, an empty two-element list, historically
/// reserved for a frame context that devp2p never ended up using.
const HEADER_SENTINEL: [u8; 3] = [0xC2, 0x80, 0x80];

pub struct RlpxSession {
    egress_cipher: Aes256Ctr64,
    ingress_cipher: Aes256Ctr64,
    egress_mac: RollingMac,
    ingress_mac: RollingMac,
    mac_secret: ethereum_types::H256,
    /// `true` once both peers' Hello advertised snappy support.
    pub snappy_enabled: bool,
}

/// One devp2p message: `[code, data]`, RLP-encoded as the frame payload.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Message {
    pub code: u64,
    pub data: Bytes,
}

impl RlpxSession {
    pub fn new(secrets: Secrets) -> Self {
        let iv = [0_u8; 16];
        let key = GenericArray::from_slice(&secrets.aes_secret.0);
        let nonce = GenericArray::from_slice(&iv);
        let egress_cipher = Aes256Ctr64::new(key, nonce);
        let ingress_cipher = Aes256Ctr64::new(key, nonce);
        Self {
            egress_cipher,
            ingress_cipher,
            egress_mac: secrets.egress_mac,
            ingress_mac: secrets.ingress_mac,
            mac_secret: secrets.mac_secret,
            snappy_enabled: false,
        }
    }

    /// Frame and write one message. Snappy-compresses the payload first if
    /// `snappy_enabled` (post-Hello, §4.8).
    pub fn write_message(&mut self, stream: &mut impl Write, message: &Message) -> Result<(), RlpxError> {
        let mut rlp_payload = BytesMut::new();
        message.code.encode(&mut rlp_payload);
        let data: Bytes = if self.snappy_enabled {
            snap::raw::Encoder::new()
                .compress_vec(&message.data)
                .map_err(|_| RlpxError::DecompressionFailed)?
                .into()
        } else {
            message.data.clone()
        };
        if data.len() > MAX_PAYLOAD_SIZE {
            return Err(RlpxError::MessageTooLarge);
        }
        data.encode(&mut rlp_payload);

        let frame_body = rlp::encode_list(|out| out.put_slice(&rlp_payload));
        if frame_body.len() > MAX_PAYLOAD_SIZE {
            return Err(RlpxError::MessageTooLarge);
        }

        let mut header = [0_u8; 16];
        let body_size = frame_body.len() as u32;
        header[0] = (body_size >> 16) as u8;
        header[1] = (body_size >> 8) as u8;
        header[2] = body_size as u8;
        header[3..6].copy_from_slice(&HEADER_SENTINEL);

        let mut enc_header = header;
        self.egress_cipher.apply_keystream(&mut enc_header);
        let header_mac = self.egress_mac.update_header_mac(&self.mac_secret, &enc_header);

        let padded_len = round_up(frame_body.len(), BLOCK_SIZE);
        let mut enc_body = vec![0_u8; padded_len];
        enc_body[..frame_body.len()].copy_from_slice(&frame_body);
        self.egress_cipher.apply_keystream(&mut enc_body);
        let body_mac = self.egress_mac.update_frame_mac(&self.mac_secret, &enc_body);

        stream.write_all(&enc_header)?;
        stream.write_all(&header_mac)?;
        stream.write_all(&enc_body)?;
        stream.write_all(&body_mac)?;
        Ok(())
    }

    /// Read and decode one frame.
    pub fn read_message(&mut self, stream: &mut impl Read) -> Result<Message, RlpxError> {
        let mut enc_header = [0_u8; 16];
        stream.read_exact(&mut enc_header)?;
        let mut header_mac = [0_u8; 16];
        stream.read_exact(&mut header_mac)?;

        let expected_header_mac = self.ingress_mac.update_header_mac(&self.mac_secret, &enc_header);
        if expected_header_mac != header_mac {
            return Err(RlpxError::InvalidHeaderMac);
        }

        let mut header = enc_header;
        self.ingress_cipher.apply_keystream(&mut header);
        let body_size = ((header[0] as usize) << 16) | ((header[1] as usize) << 8) | header[2] as usize;
        if body_size > MAX_PAYLOAD_SIZE {
            return Err(RlpxError::MessageTooLarge);
        }

        let padded_len = round_up(body_size, BLOCK_SIZE);
        let mut enc_body = vec![0_u8; padded_len];
        stream.read_exact(&mut enc_body)?;
        let mut body_mac = [0_u8; 16];
        stream.read_exact(&mut body_mac)?;

        let expected_body_mac = self.ingress_mac.update_frame_mac(&self.mac_secret, &enc_body);
        if expected_body_mac != body_mac {
            return Err(RlpxError::InvalidFrameMac);
        }

        self.ingress_cipher.apply_keystream(&mut enc_body);
        enc_body.truncate(body_size);

        let payload = rlp::decode_list_payload(&mut &enc_body[..])?;
        let mut p = payload;
        let code = u64::decode(&mut p)?;
        let raw_data = Bytes::decode(&mut p)?;

        let data = if self.snappy_enabled {
            let decompressed = snap::raw::Decoder::new()
                .decompress_vec(&raw_data)
                .map_err(|_| RlpxError::DecompressionFailed)?;
            if decompressed.len() > MAX_PAYLOAD_SIZE {
                return Err(RlpxError::MessageTooLarge);
            }
            Bytes::from(decompressed)
        } else {
            raw_data
        };

        Ok(Message { code, data })
    }
}

fn round_up(n: usize, multiple: usize) -> usize {
    if n % multiple == 0 {
        n
    } else {
        n + (multiple - n % multiple)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn frame_round_trip_with_matching_secrets() {
        // Build two sessions that share identical secrets (as a real
        // handshake would produce) by constructing `Secrets` directly
        // rather than running the socket-based handshake twice.
        let mac_secret = ethereum_types::H256::repeat_byte(0x42);
        let aes_secret = ethereum_types::H256::repeat_byte(0x24);
        let nonce_a = ethereum_types::H256::repeat_byte(0x01);
        let nonce_b = ethereum_types::H256::repeat_byte(0x02);

        let sender_secrets = Secrets {
            aes_secret,
            mac_secret,
            egress_mac: RollingMac::seeded(&mac_secret, nonce_a, b"auth"),
            ingress_mac: RollingMac::seeded(&mac_secret, nonce_b, b"ack"),
        };
        let receiver_secrets = Secrets {
            aes_secret,
            mac_secret,
            egress_mac: RollingMac::seeded(&mac_secret, nonce_b, b"ack"),
            ingress_mac: RollingMac::seeded(&mac_secret, nonce_a, b"auth"),
        };

        let mut sender = RlpxSession::new(sender_secrets);
        let mut receiver = RlpxSession::new(receiver_secrets);

        let mut wire = Vec::new();
        let message = Message {
            code: 0x10,
            data: Bytes::from_static(&[0x01, 0x02, 0x03]),
        };
        sender.write_message(&mut wire, &message).unwrap();

        let mut cursor = Cursor::new(wire);
        let received = receiver.read_message(&mut cursor).unwrap();
        assert_eq!(received, message);
    }

    #[test]
    fn tampered_frame_is_rejected() {
        let mac_secret = ethereum_types::H256::repeat_byte(0x42);
        let aes_secret = ethereum_types::H256::repeat_byte(0x24);
        let nonce_a = ethereum_types::H256::repeat_byte(0x01);
        let nonce_b = ethereum_types::H256::repeat_byte(0x02);

        let sender_secrets = Secrets {
            aes_secret,
            mac_secret,
            egress_mac: RollingMac::seeded(&mac_secret, nonce_a, b"auth"),
            ingress_mac: RollingMac::seeded(&mac_secret, nonce_b, b"ack"),
        };
        let receiver_secrets = Secrets {
            aes_secret,
            mac_secret,
            egress_mac: RollingMac::seeded(&mac_secret, nonce_b, b"ack"),
            ingress_mac: RollingMac::seeded(&mac_secret, nonce_a, b"auth"),
        };

        let mut sender = RlpxSession::new(sender_secrets);
        let mut receiver = RlpxSession::new(receiver_secrets);

        let mut wire = Vec::new();
        sender
            .write_message(
                &mut wire,
                &Message {
                    code: 0x10,
                    data: Bytes::from_static(b"hello"),
                },
            )
            .unwrap();
        let last = wire.len() - 1;
        wire[last] ^= 0xFF;

        let mut cursor = Cursor::new(wire);
        assert!(receiver.read_message(&mut cursor).is_err());
    }
}
