//! A small, hand-rolled RLP (Recursive Length Prefix) codec.
//!
//! Used for the Hello/disconnect/ping/pong payloads (§4.7/§4.8) and the
//! discovery v4 packet bodies (§4.9). The trait split mirrors the
//! `Encodable`/`Decodable` shape used by `alloy-rlp` (named in the
//! `reth-discv4`/`reth-network` manifests this crate's networking half is
//! grounded on) but the wire format itself is implemented directly from
//! spec.md rather than pulled in as a dependency.

use bytes::{Buf, BufMut, Bytes, BytesMut};
use ethereum_types::{Address, H256, U256};
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum RlpError {
    #[error("input ended before the declared length")]
    UnexpectedEof,
    #[error("length prefix overflowed a usize")]
    LengthOverflow,
    #[error("non-canonical length encoding")]
    NonCanonicalLength,
    #[error("expected a list, found a string")]
    ExpectedList,
    #[error("expected a string, found a list")]
    ExpectedString,
    #[error("integer has a leading zero byte")]
    LeadingZero,
    #[error("integer does not fit the target type")]
    Overflow,
    #[error("trailing bytes after decoding")]
    TrailingBytes,
}

/// Header of one RLP item: whether it's a list, and the length of its
/// payload (not including the header bytes themselves).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Header {
    pub list: bool,
    pub payload_length: usize,
}

impl Header {
    pub fn decode(buf: &mut &[u8]) -> Result<Self, RlpError> {
        let first = *buf.first().ok_or(RlpError::UnexpectedEof)?;
        match first {
            0..=0x7F => Ok(Self {
                list: false,
                payload_length: 0, // handled by caller: single-byte string is its own payload
            }),
            0x80..=0xB7 => {
                let len = (first - 0x80) as usize;
                buf.advance(1);
                Ok(Self {
                    list: false,
                    payload_length: len,
                })
            }
            0xB8..=0xBF => {
                let len_of_len = (first - 0xB7) as usize;
                buf.advance(1);
                let len = decode_length(buf, len_of_len)?;
                if len <= 55 {
                    return Err(RlpError::NonCanonicalLength);
                }
                Ok(Self {
                    list: false,
                    payload_length: len,
                })
            }
            0xC0..=0xF7 => {
                let len = (first - 0xC0) as usize;
                buf.advance(1);
                Ok(Self {
                    list: true,
                    payload_length: len,
                })
            }
            0xF8..=0xFF => {
                let len_of_len = (first - 0xF7) as usize;
                buf.advance(1);
                let len = decode_length(buf, len_of_len)?;
                if len <= 55 {
                    return Err(RlpError::NonCanonicalLength);
                }
                Ok(Self {
                    list: true,
                    payload_length: len,
                })
            }
        }
    }
}

fn decode_length(buf: &mut &[u8], len_of_len: usize) -> Result<usize, RlpError> {
    if buf.len() < len_of_len {
        return Err(RlpError::UnexpectedEof);
    }
    if buf[0] == 0 {
        return Err(RlpError::NonCanonicalLength);
    }
    if len_of_len > core::mem::size_of::<usize>() {
        return Err(RlpError::LengthOverflow);
    }
    let mut len: usize = 0;
    for _ in 0..len_of_len {
        len = (len << 8) | buf[0] as usize;
        buf.advance(1);
    }
    Ok(len)
}

/// Write a length-header for a string/list payload of `len` bytes.
fn put_header(out: &mut BytesMut, list: bool, len: usize) {
    let (short_base, long_base) = if list { (0xC0_u8, 0xF7_u8) } else { (0x80_u8, 0xB7_u8) };
    if len < 56 {
        out.put_u8(short_base + len as u8);
    } else {
        let len_bytes = len.to_be_bytes();
        let first_nonzero = len_bytes.iter().position(|&b| b != 0).unwrap_or(len_bytes.len() - 1);
        let trimmed = &len_bytes[first_nonzero..];
        out.put_u8(long_base + trimmed.len() as u8);
        out.put_slice(trimmed);
    }
}

pub trait Encodable {
    fn encode(&self, out: &mut BytesMut);

    fn encoded(&self) -> Bytes {
        let mut out = BytesMut::new();
        self.encode(&mut out);
        out.freeze()
    }
}

pub trait Decodable: Sized {
    fn decode(buf: &mut &[u8]) -> Result<Self, RlpError>;
}

impl Encodable for [u8] {
    fn encode(&self, out: &mut BytesMut) {
        if self.len() == 1 && self[0] < 0x80 {
            out.put_u8(self[0]);
        } else {
            put_header(out, false, self.len());
            out.put_slice(self);
        }
    }
}

impl Encodable for Bytes {
    fn encode(&self, out: &mut BytesMut) {
        self.as_ref().encode(out)
    }
}

impl Encodable for Vec<u8> {
    fn encode(&self, out: &mut BytesMut) {
        self.as_slice().encode(out)
    }
}

impl Decodable for Bytes {
    fn decode(buf: &mut &[u8]) -> Result<Self, RlpError> {
        let first = *buf.first().ok_or(RlpError::UnexpectedEof)?;
        if first < 0x80 {
            buf.advance(1);
            return Ok(Bytes::copy_from_slice(&[first]));
        }
        let header = Header::decode(buf)?;
        if header.list {
            return Err(RlpError::ExpectedString);
        }
        if buf.len() < header.payload_length {
            return Err(RlpError::UnexpectedEof);
        }
        let (payload, rest) = buf.split_at(header.payload_length);
        let out = Bytes::copy_from_slice(payload);
        *buf = rest;
        Ok(out)
    }
}

macro_rules! impl_uint {
    ($ty:ty) => {
        impl Encodable for $ty {
            fn encode(&self, out: &mut BytesMut) {
                let be = self.to_be_bytes();
                let first_nonzero = be.iter().position(|&b| b != 0);
                match first_nonzero {
                    None => out.put_u8(0x80),
                    Some(i) => be[i..].encode(out),
                }
            }
        }

        impl Decodable for $ty {
            fn decode(buf: &mut &[u8]) -> Result<Self, RlpError> {
                let bytes = Bytes::decode(buf)?;
                if bytes.len() > core::mem::size_of::<$ty>() {
                    return Err(RlpError::Overflow);
                }
                if !bytes.is_empty() && bytes[0] == 0 {
                    return Err(RlpError::LeadingZero);
                }
                let mut padded = [0_u8; core::mem::size_of::<$ty>()];
                padded[core::mem::size_of::<$ty>() - bytes.len()..].copy_from_slice(&bytes);
                Ok(<$ty>::from_be_bytes(padded))
            }
        }
    };
}

impl_uint!(u8);
impl_uint!(u16);
impl_uint!(u32);
impl_uint!(u64);

impl Encodable for U256 {
    fn encode(&self, out: &mut BytesMut) {
        let mut be = [0_u8; 32];
        self.to_big_endian(&mut be);
        let first_nonzero = be.iter().position(|&b| b != 0);
        match first_nonzero {
            None => out.put_u8(0x80),
            Some(i) => be[i..].encode(out),
        }
    }
}

impl Decodable for U256 {
    fn decode(buf: &mut &[u8]) -> Result<Self, RlpError> {
        let bytes = Bytes::decode(buf)?;
        if bytes.len() > 32 {
            return Err(RlpError::Overflow);
        }
        if !bytes.is_empty() && bytes[0] == 0 {
            return Err(RlpError::LeadingZero);
        }
        Ok(U256::from_big_endian(&bytes))
    }
}

impl Encodable for Address {
    fn encode(&self, out: &mut BytesMut) {
        self.as_bytes().encode(out)
    }
}

impl Decodable for Address {
    fn decode(buf: &mut &[u8]) -> Result<Self, RlpError> {
        let bytes = Bytes::decode(buf)?;
        if bytes.len() != 20 {
            return Err(RlpError::Overflow);
        }
        Ok(Address::from_slice(&bytes))
    }
}

impl Encodable for H256 {
    fn encode(&self, out: &mut BytesMut) {
        self.as_bytes().encode(out)
    }
}

impl Decodable for H256 {
    fn decode(buf: &mut &[u8]) -> Result<Self, RlpError> {
        let bytes = Bytes::decode(buf)?;
        if bytes.len() != 32 {
            return Err(RlpError::Overflow);
        }
        Ok(H256::from_slice(&bytes))
    }
}

impl<T: Encodable> Encodable for Vec<T> {
    fn encode(&self, out: &mut BytesMut) {
        let mut payload = BytesMut::new();
        for item in self {
            item.encode(&mut payload);
        }
        put_header(out, true, payload.len());
        out.put_slice(&payload);
    }
}

impl<T: Decodable> Decodable for Vec<T> {
    fn decode(buf: &mut &[u8]) -> Result<Self, RlpError> {
        let first = *buf.first().ok_or(RlpError::UnexpectedEof)?;
        if first < 0xC0 {
            return Err(RlpError::ExpectedList);
        }
        let header = Header::decode(buf)?;
        if buf.len() < header.payload_length {
            return Err(RlpError::UnexpectedEof);
        }
        let (mut payload, rest) = buf.split_at(header.payload_length);
        let mut items = Vec::new();
        while !payload.is_empty() {
            items.push(T::decode(&mut payload)?);
        }
        *buf = rest;
        Ok(items)
    }
}

/// Build an RLP list from already-encoded items, e.g.
/// `rlp::list(|payload| { a.encode(payload); b.encode(payload); })`.
pub fn encode_list(f: impl FnOnce(&mut BytesMut)) -> Bytes {
    let mut payload = BytesMut::new();
    f(&mut payload);
    let mut out = BytesMut::new();
    put_header(&mut out, true, payload.len());
    out.put_slice(&payload);
    out.freeze()
}

/// Split a decoded list's raw payload bytes off `buf`, returning the
/// payload slice so a caller can decode its elements positionally.
pub fn decode_list_payload<'a>(buf: &mut &'a [u8]) -> Result<&'a [u8], RlpError> {
    let first = *buf.first().ok_or(RlpError::UnexpectedEof)?;
    if first < 0xC0 {
        return Err(RlpError::ExpectedList);
    }
    let header = Header::decode(buf)?;
    if buf.len() < header.payload_length {
        return Err(RlpError::UnexpectedEof);
    }
    let (payload, rest) = buf.split_at(header.payload_length);
    *buf = rest;
    Ok(payload)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn short_string_round_trips() {
        let mut out = BytesMut::new();
        b"dog".as_ref().encode(&mut out);
        assert_eq!(&out[..], &hex_literal::hex!("83646f67"));

        let mut buf = &out[..];
        assert_eq!(Bytes::decode(&mut buf).unwrap(), Bytes::from_static(b"dog"));
        assert!(buf.is_empty());
    }

    #[test]
    fn empty_string_is_0x80() {
        let mut out = BytesMut::new();
        b"".as_ref().encode(&mut out);
        assert_eq!(&out[..], &[0x80]);
    }

    #[test]
    fn integers_strip_leading_zeroes() {
        let mut out = BytesMut::new();
        0_u64.encode(&mut out);
        assert_eq!(&out[..], &[0x80]);

        let mut out = BytesMut::new();
        1024_u64.encode(&mut out);
        let mut buf = &out[..];
        assert_eq!(u64::decode(&mut buf).unwrap(), 1024);
    }

    #[test]
    fn list_round_trips() {
        let items: Vec<u64> = vec![1, 2, 3, 0xFFFFFFFF];
        let mut out = BytesMut::new();
        items.encode(&mut out);

        let mut buf = &out[..];
        let decoded: Vec<u64> = Vec::decode(&mut buf).unwrap();
        assert_eq!(decoded, items);
        assert!(buf.is_empty());
    }

    #[test]
    fn long_string_uses_length_of_length_prefix() {
        let payload = vec![0x42_u8; 100];
        let mut out = BytesMut::new();
        payload.encode(&mut out);
        assert_eq!(out[0], 0xB7 + 1);
        assert_eq!(out[1], 100);

        let mut buf = &out[..];
        assert_eq!(Bytes::decode(&mut buf).unwrap().to_vec(), payload);
    }
}
