//! The peer-lifecycle server (§4.12): accepts inbound connections, drives
//! outbound dials, runs the RLPx + devp2p handshakes, and multiplexes the
//! resulting peer sessions.

use std::collections::HashMap;
use std::net::{IpAddr, TcpListener, TcpStream};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use bytes::Bytes;
use crossbeam_channel::{bounded, Receiver, Sender};
use parking_lot::Mutex;
use secp256k1::PublicKey;
use tracing::{info, warn};

use crate::crypto::secp256k1::{id_from_public_key, public_key_from_uncompressed, public_key_to_uncompressed};
use crate::error::{RlpxError, SetupError};
use crate::net::node::NodeId;
use crate::net::rlpx::handshake::LocalKeys;
use crate::net::rlpx::session::{Message, RlpxSession};
use crate::net::rlpx::{run_initiator, run_recipient};
use crate::rlp::{self, Decodable, Encodable};

/// Base protocol message codes (§6): everything below 0x10 is handled by
/// the server itself, never forwarded to a subprotocol.
pub mod base_code {
    pub const HELLO: u64 = 0x00;
    pub const DISCONNECT: u64 = 0x01;
    pub const PING: u64 = 0x02;
    pub const PONG: u64 = 0x03;
    pub const FIRST_SUBPROTOCOL: u64 = 0x10;
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(u8)]
pub enum DisconnectReason {
    Requested = 0x00,
    TcpError = 0x01,
    ProtocolBreach = 0x02,
    UselessPeer = 0x03,
    TooManyPeers = 0x04,
    AlreadyConnected = 0x05,
    IncompatibleVersion = 0x06,
    InvalidIdentity = 0x07,
    ClientQuitting = 0x08,
    UnexpectedIdentity = 0x09,
    SameIdentity = 0x0A,
    Timeout = 0x0B,
    SubprotocolError = 0x10,
}

const PING_INTERVAL: Duration = Duration::from_secs(15);
const PONG_TIMEOUT: Duration = Duration::from_secs(30);
const INBOUND_THROTTLE_WINDOW: Duration = Duration::from_secs(30);

/// `[protocol_version, client_id, [[name, version], ...], listen_port, node_id]` (§6).
#[derive(Clone, Debug)]
pub struct Hello {
    pub protocol_version: u8,
    pub client_id: String,
    pub capabilities: Vec<(String, u8)>,
    pub listen_port: u16,
    pub node_id: PublicKey,
}

impl Hello {
    fn encode(&self) -> Bytes {
        rlp::encode_list(|out| {
            self.protocol_version.encode(out);
            self.client_id.clone().into_bytes().encode(out);
            let caps: Vec<Bytes> = self
                .capabilities
                .iter()
                .map(|(name, version)| {
                    rlp::encode_list(|c| {
                        name.clone().into_bytes().encode(c);
                        version.encode(c);
                    })
                })
                .collect();
            caps.encode(out);
            self.listen_port.encode(out);
            public_key_to_uncompressed(&self.node_id).as_ref().encode(out);
        })
    }

    fn decode(buf: &[u8]) -> Result<Self, RlpxError> {
        let mut rest = buf;
        let payload = rlp::decode_list_payload(&mut rest)?;
        let mut p = payload;
        let protocol_version = u8::decode(&mut p)?;
        let client_id = String::from_utf8_lossy(&Bytes::decode(&mut p)?).into_owned();

        let caps_bytes = Bytes::decode(&mut p)?;
        let mut caps_rest = &caps_bytes[..];
        let mut capabilities = Vec::new();
        while !caps_rest.is_empty() {
            let mut item = rlp::decode_list_payload(&mut caps_rest)?;
            let name = String::from_utf8_lossy(&Bytes::decode(&mut item)?).into_owned();
            let version = u8::decode(&mut item)?;
            capabilities.push((name, version));
        }

        let listen_port = u16::decode(&mut p)?;
        let node_id_bytes = Bytes::decode(&mut p)?;
        if node_id_bytes.len() != 64 {
            return Err(RlpxError::HandshakeFailed("hello node id length".into()));
        }
        let mut arr = [0_u8; 64];
        arr.copy_from_slice(&node_id_bytes);
        let node_id = public_key_from_uncompressed(&arr).map_err(|_| RlpxError::HandshakeFailed("hello node id invalid".into()))?;

        Ok(Self {
            protocol_version,
            client_id,
            capabilities,
            listen_port,
            node_id,
        })
    }
}

/// A connected, post-handshake peer as seen by the rest of the server.
pub struct PeerHandle {
    pub id: NodeId,
    pub addr: IpAddr,
    pub trusted: bool,
    pub inbound: bool,
    pub outbox: Sender<Message>,
}

struct PeerSlot {
    handle: Arc<PeerHandle>,
}

/// Server-wide configuration (§4.12, §5's concurrency section).
pub struct ServerConfig {
    pub local_keys: LocalKeys,
    pub max_peers: usize,
    pub max_dialed_peers: usize,
    pub capabilities: Vec<(String, u8)>,
    pub client_id: String,
    pub listen_port: u16,
}

/// Owns the listener, the peer map, and the quit flag; the accept loop,
/// discovery loop, and dial-scheduler loop each run on their own thread
/// and report into this struct's checkpoints (§4.12, §5).
pub struct Server {
    config: ServerConfig,
    listener: TcpListener,
    peers: Mutex<HashMap<NodeId, PeerSlot>>,
    trusted: Mutex<std::collections::HashSet<NodeId>>,
    inbound_history: Mutex<Vec<(IpAddr, Instant)>>,
    quit: Arc<AtomicBool>,
}

impl Server {
    pub fn new(config: ServerConfig, listener: TcpListener) -> Self {
        Self {
            config,
            listener,
            peers: Mutex::new(HashMap::new()),
            trusted: Mutex::new(std::collections::HashSet::new()),
            inbound_history: Mutex::new(Vec::new()),
            quit: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn quit_flag(&self) -> Arc<AtomicBool> {
        self.quit.clone()
    }

    /// Reject an inbound IP seen again within [`INBOUND_THROTTLE_WINDOW`]
    /// (§4.12). Expired entries are swept out on every call.
    fn check_inbound_throttle(&self, ip: IpAddr) -> bool {
        let now = Instant::now();
        let mut history = self.inbound_history.lock();
        history.retain(|(_, seen)| now.duration_since(*seen) < INBOUND_THROTTLE_WINDOW);
        if history.iter().any(|(entry_ip, _)| *entry_ip == ip) {
            return false;
        }
        history.push((ip, now));
        true
    }

    /// Post-handshake checks applied once both RLPx and Hello have
    /// succeeded, before a peer is admitted (§4.12).
    fn check_add_peer(&self, id: NodeId, inbound: bool, capabilities_overlap: bool) -> Result<(), SetupError> {
        let peers = self.peers.lock();
        let trusted = self.trusted.lock().contains(&id);
        if peers.len() >= self.config.max_peers && !trusted {
            return Err(SetupError::TooManyPeers);
        }
        if inbound {
            let inbound_count = peers.values().filter(|slot| slot.handle.inbound).count();
            let max_inbound = self.config.max_peers.saturating_sub(self.config.max_dialed_peers);
            if inbound_count >= max_inbound {
                return Err(SetupError::TooManyPeers);
            }
        }
        if peers.contains_key(&id) {
            return Err(SetupError::AlreadyConnected(hex::encode(id.as_bytes())));
        }
        if !capabilities_overlap {
            return Err(SetupError::UselessPeer);
        }
        Ok(())
    }

    /// Run the RLPx handshake, Hello exchange, and admission checks over
    /// an accepted or dialed stream — the shared `SetupConn` code path
    /// (§4.12).
    fn setup_conn(self: &Arc<Self>, mut stream: TcpStream, inbound: bool, remote_static_public: Option<PublicKey>) -> Result<(), SetupError> {
        stream.set_read_timeout(Some(Duration::from_secs(10)))?;
        let secrets = if inbound {
            run_recipient(&mut stream, &self.config.local_keys)?
        } else {
            let remote = remote_static_public.expect("outbound dial always knows the remote static key");
            run_initiator(&mut stream, &self.config.local_keys, &remote)?
        };
        let mut session = RlpxSession::new(secrets);

        let our_hello = Hello {
            protocol_version: 5,
            client_id: self.config.client_id.clone(),
            capabilities: self.config.capabilities.clone(),
            listen_port: self.config.listen_port,
            node_id: self.config.local_keys.static_public,
        };
        session.write_message(
            &mut stream,
            &Message {
                code: base_code::HELLO,
                data: our_hello.encode(),
            },
        )?;
        let reply = session.read_message(&mut stream)?;
        if reply.code != base_code::HELLO {
            return Err(SetupError::Rlpx(RlpxError::HandshakeFailed("expected hello".into())));
        }
        let their_hello = Hello::decode(&reply.data)?;

        let remote_id = id_from_public_key(&their_hello.node_id);
        let overlap = their_hello
            .capabilities
            .iter()
            .any(|(name, _)| self.config.capabilities.iter().any(|(our_name, _)| our_name == name));
        self.check_add_peer(remote_id, inbound, overlap)?;

        let (outbox_tx, outbox_rx) = bounded::<Message>(64);
        let handle = Arc::new(PeerHandle {
            id: remote_id,
            addr: stream.peer_addr().map(|a| a.ip()).unwrap_or(IpAddr::V4(std::net::Ipv4Addr::UNSPECIFIED)),
            trusted: self.trusted.lock().contains(&remote_id),
            inbound,
            outbox: outbox_tx,
        });
        self.peers.lock().insert(remote_id, PeerSlot { handle: handle.clone() });

        let server = self.clone();
        std::thread::spawn(move || {
            server.run_peer_loop(stream, session, handle, outbox_rx);
        });
        Ok(())
    }

    /// The per-peer read/write loop (§4.12): inline handling of ping/pong/
    /// disconnect, idle-ping and pong-timeout enforcement, and dispatch of
    /// everything else to the outbox/inbox the caller owns.
    fn run_peer_loop(self: Arc<Self>, mut stream: TcpStream, mut session: RlpxSession, handle: Arc<PeerHandle>, outbox: Receiver<Message>) {
        let _ = stream.set_read_timeout(Some(Duration::from_millis(500)));
        let mut last_pong = Instant::now();
        let mut last_ping_sent = Instant::now();

        loop {
            if self.quit.load(Ordering::Relaxed) {
                let _ = session.write_message(
                    &mut stream,
                    &Message {
                        code: base_code::DISCONNECT,
                        data: Bytes::from(vec![DisconnectReason::Requested as u8]),
                    },
                );
                break;
            }

            while let Ok(outgoing) = outbox.try_recv() {
                if session.write_message(&mut stream, &outgoing).is_err() {
                    break;
                }
            }

            if last_ping_sent.elapsed() >= PING_INTERVAL {
                let _ = session.write_message(
                    &mut stream,
                    &Message {
                        code: base_code::PING,
                        data: Bytes::new(),
                    },
                );
                last_ping_sent = Instant::now();
            }
            if last_pong.elapsed() >= PONG_TIMEOUT {
                warn!(id = %hex::encode(handle.id.as_bytes()), "peer timed out, disconnecting");
                break;
            }

            match session.read_message(&mut stream) {
                Ok(message) => match message.code {
                    base_code::PING => {
                        let _ = session.write_message(
                            &mut stream,
                            &Message {
                                code: base_code::PONG,
                                data: Bytes::new(),
                            },
                        );
                    }
                    base_code::PONG => last_pong = Instant::now(),
                    base_code::DISCONNECT => break,
                    base_code::HELLO => {
                        warn!("protocol error: hello after handshake");
                        break;
                    }
                    _ => {
                        // Dispatch to a registered subprotocol by subtracting
                        // its base offset; no subprotocols are registered in
                        // this server, so unknown codes are simply logged.
                        warn!(code = message.code, "no subprotocol registered for message code");
                    }
                },
                Err(e) if matches!(e, RlpxError::Io(ref io) if io.kind() == std::io::ErrorKind::WouldBlock || io.kind() == std::io::ErrorKind::TimedOut) => {
                    continue;
                }
                Err(e) => {
                    warn!(?e, "peer connection error");
                    break;
                }
            }
        }

        self.peers.lock().remove(&handle.id);
        info!(id = %hex::encode(handle.id.as_bytes()), "peer disconnected");
    }

    /// The accept loop: runs on its own thread, handing every accepted
    /// stream to `setup_conn` on a fresh thread so the loop itself never
    /// blocks on a handshake (§5).
    pub fn run_accept_loop(self: &Arc<Self>) -> std::io::Result<()> {
        self.listener.set_nonblocking(true)?;
        while !self.quit.load(Ordering::Relaxed) {
            match self.listener.accept() {
                Ok((stream, addr)) => {
                    if !self.check_inbound_throttle(addr.ip()) {
                        continue;
                    }
                    let server = self.clone();
                    std::thread::spawn(move || {
                        if let Err(e) = server.setup_conn(stream, true, None) {
                            warn!(?e, %addr, "inbound setup failed");
                        }
                    });
                }
                Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => {
                    std::thread::sleep(Duration::from_millis(100));
                }
                Err(e) => return Err(e),
            }
        }
        Ok(())
    }

    /// Dial `remote_static_public` at `addr` and run the shared setup path
    /// outbound.
    pub fn dial(self: &Arc<Self>, addr: std::net::SocketAddr, remote_static_public: PublicKey) -> Result<(), SetupError> {
        let stream = TcpStream::connect_timeout(&addr, Duration::from_secs(10))?;
        self.setup_conn(stream, false, Some(remote_static_public))
    }

    /// Set the quit flag: the accept loop, peer loops, and any other
    /// server-owned loop observe it at their next iteration and unwind
    /// (§4.12 "Shutdown", §5 "Cancellation").
    pub fn shutdown(&self) {
        self.quit.store(true, Ordering::Relaxed);
    }

    pub fn peer_count(&self) -> usize {
        self.peers.lock().len()
    }

    pub fn add_trusted(&self, id: NodeId) {
        self.trusted.lock().insert(id);
    }

    pub fn remove_trusted(&self, id: NodeId) {
        self.trusted.lock().remove(&id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hello_round_trips() {
        let secret = secp256k1::SecretKey::new(&mut rand::rngs::OsRng);
        let public = PublicKey::from_secret_key(secp256k1::SECP256K1, &secret);
        let hello = Hello {
            protocol_version: 5,
            client_id: "evmoxide/v0.1".into(),
            capabilities: vec![("eth".into(), 68)],
            listen_port: 30303,
            node_id: public,
        };
        let encoded = hello.encode();
        let decoded = Hello::decode(&encoded).unwrap();
        assert_eq!(decoded.protocol_version, 5);
        assert_eq!(decoded.client_id, "evmoxide/v0.1");
        assert_eq!(decoded.capabilities, vec![("eth".to_string(), 68)]);
        assert_eq!(decoded.listen_port, 30303);
        assert_eq!(decoded.node_id, public);
    }

    #[test]
    fn inbound_throttle_blocks_repeat_ip_within_window() {
        let config = ServerConfig {
            local_keys: LocalKeys::new(secp256k1::SecretKey::new(&mut rand::rngs::OsRng)),
            max_peers: 50,
            max_dialed_peers: 25,
            capabilities: vec![("eth".into(), 68)],
            client_id: "evmoxide/v0.1".into(),
            listen_port: 30303,
        };
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let server = Server::new(config, listener);
        let ip = IpAddr::V4(std::net::Ipv4Addr::new(10, 0, 0, 1));
        assert!(server.check_inbound_throttle(ip));
        assert!(!server.check_inbound_throttle(ip));
    }
}
