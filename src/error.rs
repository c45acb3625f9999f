//! Networking error taxonomy (§7). Every fallible networking function
//! returns one of these; a task that receives an `Err` logs it and
//! terminates only its own connection/loop, never the process.

use thiserror::Error;

use crate::crypto::secp256k1::SigError;
use crate::crypto::ecies::EciesError;
use crate::rlp::RlpError;

#[derive(Debug, Error)]
pub enum CryptoError {
    #[error(transparent)]
    Signature(#[from] SigError),
    #[error(transparent)]
    Ecies(#[from] EciesError),
}

#[derive(Debug, Error)]
pub enum RlpxError {
    #[error("header MAC mismatch")]
    InvalidHeaderMac,
    #[error("frame MAC mismatch")]
    InvalidFrameMac,
    #[error("incomplete frame")]
    IncompleteFrame,
    #[error("message exceeds the 16 MiB-1 frame bound")]
    MessageTooLarge,
    #[error("handshake failed: {0}")]
    HandshakeFailed(String),
    #[error("snappy decompression failed")]
    DecompressionFailed,
    #[error(transparent)]
    Rlp(#[from] RlpError),
    #[error(transparent)]
    Crypto(#[from] CryptoError),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

#[derive(Debug, Error)]
pub enum DiscoveryError {
    #[error("packet too small")]
    PacketTooSmall,
    #[error("packet exceeds the 1280-byte bound")]
    PacketTooLarge,
    #[error("hash does not match sig/type/payload")]
    BadHash,
    #[error("signature does not recover a valid public key")]
    BadSignature,
    #[error("packet expiration is in the past")]
    ExpiredPacket,
    #[error("find_node from an unbonded node")]
    UnbondedNode,
    #[error(transparent)]
    Rlp(#[from] RlpError),
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum DialError {
    #[error("refusing to dial our own node id")]
    IsSelf,
    #[error("already dialing this node")]
    AlreadyDialing,
    #[error("already connected to this node")]
    AlreadyConnected,
    #[error("dialed within the last 35s")]
    RecentlyDialed,
    #[error("node is not whitelisted")]
    NotWhitelisted,
    #[error("node advertises no TCP port")]
    NoPort,
    #[error("peer limit reached")]
    TooManyPeers,
    #[error("exceeded the retry budget for this node")]
    TooManyAttempts,
    #[error("zero shared capabilities")]
    UselessPeer,
    #[error("handshake did not complete before the timeout")]
    HandshakeTimeout,
}

#[derive(Debug, Error)]
pub enum SetupError {
    #[error(transparent)]
    Rlpx(#[from] RlpxError),
    #[error(transparent)]
    Dial(#[from] DialError),
    #[error("already connected: {0}")]
    AlreadyConnected(String),
    #[error("too many peers")]
    TooManyPeers,
    #[error("useless peer: no shared capabilities")]
    UselessPeer,
    #[error(transparent)]
    Io(#[from] std::io::Error),
}
