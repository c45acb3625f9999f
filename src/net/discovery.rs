//! Discovery v4 (§4.9): the UDP wire protocol used to find and bond with
//! peers before they're ever dialed over TCP.

use std::net::{SocketAddr, UdpSocket};
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use bytes::Bytes;
use ethereum_types::H256;
use parking_lot::Mutex;
use secp256k1::ecdsa::RecoveryId;
use secp256k1::{PublicKey, SecretKey, SECP256K1};
use tracing::{debug, warn};

use crate::crypto::keccak::keccak256;
use crate::crypto::secp256k1::{id_from_public_key, public_key_from_uncompressed, public_key_to_uncompressed, recover, sign};
use crate::error::DiscoveryError;
use crate::rlp::{self, Decodable, Encodable};

use super::kademlia::KademliaTable;
use super::node::{BondState, Node, NodeId};

/// The wire bound on a single UDP datagram (§4.9).
pub const MAX_PACKET_SIZE: usize = 1280;
/// How far in the future a ping/pong/find_node's expiration is normally set.
pub const DEFAULT_EXPIRATION: Duration = Duration::from_secs(60);
const LOOKUP_ALPHA: usize = 3;
const LOOKUP_K: usize = 16;
const NEIGHBORS_PER_PACKET: usize = 12;
/// How often the revalidation loop pings a random bucket's tail (§4.9).
pub const REVALIDATION_INTERVAL: Duration = Duration::from_secs(5);
/// How long a revalidation ping waits for its pong before the tail is
/// declared dead.
const REVALIDATION_PONG_TIMEOUT: Duration = Duration::from_secs(2);
/// How often the bucket-refresh loop checks for stale buckets; the
/// staleness threshold itself is `KademliaTable::BUCKET_REFRESH_INTERVAL`.
const BUCKET_REFRESH_CHECK_INTERVAL: Duration = Duration::from_secs(60);
/// Per-round wait used by the lookup a bucket refresh launches.
const REFRESH_LOOKUP_ROUND_TIMEOUT: Duration = Duration::from_secs(2);

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(u8)]
pub enum PacketKind {
    Ping = 0x01,
    Pong = 0x02,
    FindNode = 0x03,
    Neighbors = 0x04,
    EnrRequest = 0x05,
    EnrResponse = 0x06,
}

impl PacketKind {
    fn from_byte(b: u8) -> Option<Self> {
        Some(match b {
            0x01 => Self::Ping,
            0x02 => Self::Pong,
            0x03 => Self::FindNode,
            0x04 => Self::Neighbors,
            0x05 => Self::EnrRequest,
            0x06 => Self::EnrResponse,
            _ => return None,
        })
    }
}

fn now_unix() -> u64 {
    SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default().as_secs()
}

fn default_expiration() -> u64 {
    now_unix() + DEFAULT_EXPIRATION.as_secs()
}

/// Sign and frame a packet: `hash(32) ∥ sig(65) ∥ type(1) ∥ payload`, where
/// `hash = keccak(sig ∥ type ∥ payload)` and `sig` covers
/// `keccak(type ∥ payload)` (§4.9).
fn seal_packet(secret_key: &SecretKey, kind: PacketKind, payload: &[u8]) -> Vec<u8> {
    let mut signed = Vec::with_capacity(1 + payload.len());
    signed.push(kind as u8);
    signed.extend_from_slice(payload);
    let digest = keccak256(&signed);

    let (sig, recovery_id) = sign(digest, secret_key).expect("signing with a valid secret key cannot fail");
    let mut sig_bytes = [0_u8; 65];
    sig_bytes[..64].copy_from_slice(&sig);
    sig_bytes[64] = recovery_id.to_i32() as u8;

    let mut to_hash = Vec::with_capacity(65 + signed.len());
    to_hash.extend_from_slice(&sig_bytes);
    to_hash.extend_from_slice(&signed);
    let hash = keccak256(&to_hash);

    let mut out = Vec::with_capacity(32 + to_hash.len());
    out.extend_from_slice(hash.as_bytes());
    out.extend_from_slice(&to_hash);
    out
}

struct VerifiedPacket {
    sender_id: NodeId,
    sender_public_key: PublicKey,
    kind: PacketKind,
    payload: Bytes,
    hash: H256,
}

fn verify_packet(datagram: &[u8]) -> Result<VerifiedPacket, DiscoveryError> {
    if datagram.len() < 32 + 65 + 1 {
        return Err(DiscoveryError::PacketTooSmall);
    }
    if datagram.len() > MAX_PACKET_SIZE {
        return Err(DiscoveryError::PacketTooLarge);
    }

    let (claimed_hash, rest) = datagram.split_at(32);
    let actual_hash = keccak256(rest);
    if actual_hash.as_bytes() != claimed_hash {
        return Err(DiscoveryError::BadHash);
    }

    let (sig_bytes, rest) = rest.split_at(65);
    let (kind_byte, payload) = rest.split_at(1);
    let kind = PacketKind::from_byte(kind_byte[0]).ok_or(DiscoveryError::BadSignature)?;

    let mut signed = Vec::with_capacity(rest.len());
    signed.extend_from_slice(kind_byte);
    signed.extend_from_slice(payload);
    let digest = keccak256(&signed);

    let recovery_id = RecoveryId::from_i32(sig_bytes[64] as i32).map_err(|_| DiscoveryError::BadSignature)?;
    let mut compact = [0_u8; 64];
    compact.copy_from_slice(&sig_bytes[..64]);
    let sender_public_key = recover(digest, &compact, recovery_id).map_err(|_| DiscoveryError::BadSignature)?;

    Ok(VerifiedPacket {
        sender_id: id_from_public_key(&sender_public_key),
        sender_public_key,
        kind,
        payload: Bytes::copy_from_slice(payload),
        hash: actual_hash,
    })
}

struct PingPayload {
    target: SocketAddr,
    expiration: u64,
}

impl PingPayload {
    fn encode(&self) -> Bytes {
        rlp::encode_list(|out| {
            4_u8.encode(out); // wire version
            self.target.ip().to_string().into_bytes().encode(out);
            self.target.port().encode(out);
            self.expiration.encode(out);
        })
    }

    fn decode(buf: &[u8]) -> Result<Self, DiscoveryError> {
        let mut rest = buf;
        let payload = rlp::decode_list_payload(&mut rest)?;
        let mut p = payload;
        let _version = u8::decode(&mut p)?;
        let ip_bytes = Bytes::decode(&mut p)?;
        let port = u16::decode(&mut p)?;
        let expiration = u64::decode(&mut p)?;
        let ip = String::from_utf8_lossy(&ip_bytes)
            .parse()
            .map_err(|_| DiscoveryError::BadSignature)?;
        Ok(Self {
            target: SocketAddr::new(ip, port),
            expiration,
        })
    }
}

/// Discovery v4 over a single UDP socket. One receive loop processes
/// inbound datagrams (§5); the sending side (`ping`/`find_node`) is called
/// from that same loop and from the revalidation/refresh tasks.
pub struct Discovery {
    socket: UdpSocket,
    secret_key: SecretKey,
    local_id: NodeId,
    table: KademliaTable,
    bonds: Mutex<Vec<BondState>>,
    pending_pings: Mutex<Vec<(NodeId, H256, Instant)>>,
}

impl Discovery {
    pub fn new(socket: UdpSocket, secret_key: SecretKey) -> Self {
        let public_key = PublicKey::from_secret_key(SECP256K1, &secret_key);
        let local_id = id_from_public_key(&public_key);
        Self {
            socket,
            secret_key,
            local_id,
            table: KademliaTable::new(local_id),
            bonds: Mutex::new(Vec::new()),
            pending_pings: Mutex::new(Vec::new()),
        }
    }

    pub fn table(&self) -> &KademliaTable {
        &self.table
    }

    fn bond_state(&self, id: NodeId) -> Option<BondState> {
        self.bonds.lock().iter().find(|b| b.node_id == id).cloned()
    }

    fn is_bonded(&self, id: NodeId, now: Instant) -> bool {
        self.bond_state(id).map(|b| b.is_bonded(now)).unwrap_or(false)
    }

    /// Send a ping to `dest`, recording the outstanding hash so a matching
    /// pong can be recognized (§4.9 "the pong must cite the exact hash").
    pub fn send_ping(&self, dest: SocketAddr, dest_id: NodeId) -> std::io::Result<()> {
        let payload = PingPayload {
            target: dest,
            expiration: default_expiration(),
        }
        .encode();
        let packet = seal_packet(&self.secret_key, PacketKind::Ping, &payload);
        let ping_hash = keccak256(&packet[32..]);
        self.pending_pings.lock().push((dest_id, ping_hash, Instant::now()));

        let mut bonds = self.bonds.lock();
        match bonds.iter_mut().find(|b| b.node_id == dest_id) {
            Some(bond) => bond.last_ping_sent = Some(Instant::now()),
            None => {
                let mut bond = BondState::new(dest_id);
                bond.last_ping_sent = Some(Instant::now());
                bonds.push(bond);
            }
        }

        self.socket.send_to(&packet, dest)?;
        Ok(())
    }

    fn send_pong(&self, dest: SocketAddr, ping_hash: H256) -> std::io::Result<()> {
        let payload = rlp::encode_list(|out| {
            dest.ip().to_string().into_bytes().encode(out);
            dest.port().encode(out);
            ping_hash.encode(out);
            default_expiration().encode(out);
        });
        let packet = seal_packet(&self.secret_key, PacketKind::Pong, &payload);
        self.socket.send_to(&packet, dest)?;
        Ok(())
    }

    fn send_find_node(&self, dest: SocketAddr, target: NodeId) -> std::io::Result<()> {
        let payload = rlp::encode_list(|out| {
            target.encode(out);
            default_expiration().encode(out);
        });
        let packet = seal_packet(&self.secret_key, PacketKind::FindNode, &payload);
        self.socket.send_to(&packet, dest)?;
        Ok(())
    }

    fn send_neighbors(&self, dest: SocketAddr, nodes: &[Node]) -> std::io::Result<()> {
        for chunk in nodes.chunks(NEIGHBORS_PER_PACKET) {
            let nodes_list = rlp::encode_list(|out| {
                for node in chunk {
                    let encoded = rlp::encode_list(|n| {
                        node.ip.to_string().into_bytes().encode(n);
                        node.udp_port.encode(n);
                        node.tcp_port.encode(n);
                        node.id.encode(n);
                    });
                    out.extend_from_slice(&encoded);
                }
            });
            let payload = rlp::encode_list(|out| {
                out.extend_from_slice(&nodes_list);
                default_expiration().encode(out);
            });
            let packet = seal_packet(&self.secret_key, PacketKind::Neighbors, &payload);
            self.socket.send_to(&packet, dest)?;
        }
        Ok(())
    }

    /// Process one inbound datagram, replying and updating routing-table
    /// state as needed. Every rejection just drops the packet (§7).
    pub fn handle_datagram(&self, datagram: &[u8], from: SocketAddr) -> Result<(), DiscoveryError> {
        let packet = match verify_packet(datagram) {
            Ok(p) => p,
            Err(e) => {
                debug!(?e, "dropping malformed discovery packet");
                return Err(e);
            }
        };

        match packet.kind {
            PacketKind::Ping => {
                let ping = PingPayload::decode(&packet.payload)?;
                if ping.expiration < now_unix() {
                    return Err(DiscoveryError::ExpiredPacket);
                }
                let _ = self.send_pong(from, packet.hash);
                let node = Node::new(packet.sender_id, from.ip(), from.port(), from.port());
                self.table.add_seen(node, Instant::now());

                // A peer pinging us proves nothing about whether *we* can
                // reach *them* — only a pong answering our own ping can set
                // `last_pong_received` (§3, §4.9). Solicit one if we don't
                // already consider this node bonded.
                if !self.is_bonded(packet.sender_id, Instant::now()) {
                    let addr = SocketAddr::new(from.ip(), from.port());
                    let _ = self.send_ping(addr, packet.sender_id);
                }
            }
            PacketKind::Pong => {
                let mut pending = self.pending_pings.lock();
                let matched = pending
                    .iter()
                    .position(|(id, hash, _)| *id == packet.sender_id && rest_cites(&packet.payload, hash));
                if let Some(i) = matched {
                    pending.remove(i);
                    drop(pending);
                    let mut bonds = self.bonds.lock();
                    match bonds.iter_mut().find(|b| b.node_id == packet.sender_id) {
                        Some(bond) => bond.last_pong_received = Some(Instant::now()),
                        None => {
                            let mut bond = BondState::new(packet.sender_id);
                            bond.last_pong_received = Some(Instant::now());
                            bonds.push(bond);
                        }
                    }
                    let node = Node::new(packet.sender_id, from.ip(), from.port(), from.port());
                    self.table.add_verified(node, Instant::now());
                }
            }
            PacketKind::FindNode => {
                if !self.is_bonded(packet.sender_id, Instant::now()) {
                    return Err(DiscoveryError::UnbondedNode);
                }
                let mut rest = &packet.payload[..];
                let list_payload = rlp::decode_list_payload(&mut rest)?;
                let mut p = list_payload;
                let target = NodeId::decode(&mut p)?;
                let expiration = u64::decode(&mut p)?;
                if expiration < now_unix() {
                    return Err(DiscoveryError::ExpiredPacket);
                }
                let closest = self.table.find_closest(target, LOOKUP_K);
                let _ = self.send_neighbors(from, &closest);
            }
            PacketKind::Neighbors => {
                let mut rest = &packet.payload[..];
                let list_payload = rlp::decode_list_payload(&mut rest)?;
                let nodes = decode_neighbors(list_payload)?;
                for node in nodes {
                    self.table.add_seen(node, Instant::now());
                }
            }
            PacketKind::EnrRequest | PacketKind::EnrResponse => {
                // ENR extension records aren't part of the routing logic
                // this crate implements; acknowledged but otherwise ignored.
            }
        }
        let _ = &packet.sender_public_key;
        Ok(())
    }

    /// Blocking receive loop: reads one datagram per iteration, handling it
    /// in place. Intended to run on its own thread (§5).
    pub fn run_receive_loop(&self, quit: &std::sync::atomic::AtomicBool) -> std::io::Result<()> {
        let mut buf = [0_u8; MAX_PACKET_SIZE];
        while !quit.load(std::sync::atomic::Ordering::Relaxed) {
            let (len, from) = match self.socket.recv_from(&mut buf) {
                Ok(pair) => pair,
                Err(e) if e.kind() == std::io::ErrorKind::WouldBlock || e.kind() == std::io::ErrorKind::TimedOut => {
                    continue;
                }
                Err(e) => return Err(e),
            };
            if let Err(e) = self.handle_datagram(&buf[..len], from) {
                warn!(?e, %from, "discovery packet rejected");
            }
        }
        Ok(())
    }

    /// A lookup towards `target`: iteratively query the closest known
    /// nodes until no closer result comes back, returning up to `k`
    /// results (§4.9). This drives the UDP exchange synchronously and is
    /// meant to be called from a worker thread, not the receive loop.
    pub fn lookup(&self, target: NodeId, timeout: Duration) -> Vec<Node> {
        let mut queried = std::collections::HashSet::new();
        let mut closest = self.table.find_closest(target, LOOKUP_K);

        loop {
            let round: Vec<Node> = closest
                .iter()
                .filter(|n| !queried.contains(&n.id))
                .take(LOOKUP_ALPHA)
                .cloned()
                .collect();
            if round.is_empty() {
                break;
            }
            for node in &round {
                queried.insert(node.id);
                let addr = SocketAddr::new(node.ip, node.udp_port);
                let _ = self.send_find_node(addr, target);
            }
            std::thread::sleep(timeout);

            let refreshed = self.table.find_closest(target, LOOKUP_K);
            let improved = refreshed
                .first()
                .zip(closest.first())
                .map(|(new, old)| Node::distance(target, new.id) < Node::distance(target, old.id))
                .unwrap_or(!refreshed.is_empty() && closest.is_empty());
            closest = refreshed;
            if !improved {
                break;
            }
        }
        closest
    }

    /// §4.9's 5 s revalidation tick: ping a random non-empty bucket's tail
    /// entry; a failed exchange evicts it via `replace_dead`, a successful
    /// one re-bonds it at the head via `add_verified`. Meant to run on its
    /// own thread until `quit` is set.
    pub fn run_revalidation_loop(&self, quit: &std::sync::atomic::AtomicBool) {
        while !quit.load(std::sync::atomic::Ordering::Relaxed) {
            std::thread::sleep(REVALIDATION_INTERVAL);
            if quit.load(std::sync::atomic::Ordering::Relaxed) {
                break;
            }
            let Some(node) = self.table.random_tail_for_revalidation() else {
                continue;
            };
            let addr = SocketAddr::new(node.ip, node.udp_port);
            if self.send_ping(addr, node.id).is_err() {
                self.table.replace_dead(node.id);
                continue;
            }
            std::thread::sleep(REVALIDATION_PONG_TIMEOUT);
            if self.is_bonded(node.id, Instant::now()) {
                self.table.add_verified(node, Instant::now());
            } else {
                self.table.replace_dead(node.id);
            }
        }
    }

    /// §4.9's bucket-refresh tick: any bucket `stale_buckets` reports is
    /// refreshed by looking up a target that falls into it, built by
    /// flipping that bucket's index bit of our own id. Meant to run on its
    /// own thread until `quit` is set.
    pub fn run_bucket_refresh_loop(&self, quit: &std::sync::atomic::AtomicBool) {
        while !quit.load(std::sync::atomic::Ordering::Relaxed) {
            std::thread::sleep(BUCKET_REFRESH_CHECK_INTERVAL);
            if quit.load(std::sync::atomic::Ordering::Relaxed) {
                break;
            }
            for idx in self.table.stale_buckets(Instant::now()) {
                let target = flip_bit(self.local_id, idx);
                self.lookup(target, REFRESH_LOOKUP_ROUND_TIMEOUT);
            }
        }
    }
}

/// Flip bit `idx` of `id`, counting from the most significant bit (matching
/// `Node::bucket_index`'s `clz(xor)` convention), producing a target
/// guaranteed to land in bucket `idx` relative to `id` (§4.9 "Bucket
/// refresh").
fn flip_bit(id: NodeId, idx: usize) -> NodeId {
    let mut bytes = [0_u8; 32];
    bytes.copy_from_slice(id.as_bytes());
    let byte_idx = idx / 8;
    let bit_in_byte = 7 - (idx % 8);
    bytes[byte_idx] ^= 1 << bit_in_byte;
    H256::from(bytes)
}

fn rest_cites(pong_payload: &[u8], ping_hash: &H256) -> bool {
    let mut rest = pong_payload;
    let Ok(list_payload) = rlp::decode_list_payload(&mut rest) else {
        return false;
    };
    let mut p = list_payload;
    let Ok(_ip) = Bytes::decode(&mut p) else { return false };
    let Ok(_port) = u16::decode(&mut p) else { return false };
    match H256::decode(&mut p) {
        Ok(cited) => cited == *ping_hash,
        Err(_) => false,
    }
}

fn decode_neighbors(list_payload: &[u8]) -> Result<Vec<Node>, DiscoveryError> {
    let mut p = list_payload;
    let nodes_payload = rlp::decode_list_payload(&mut p)?;
    let _expiration = u64::decode(&mut p)?;

    let mut nodes = Vec::new();
    let mut rest = nodes_payload;
    while !rest.is_empty() {
        let mut item = rlp::decode_list_payload(&mut rest)?;
        let ip_bytes = Bytes::decode(&mut item)?;
        let udp_port = u16::decode(&mut item)?;
        let tcp_port = u16::decode(&mut item)?;
        let id = NodeId::decode(&mut item)?;
        let ip = String::from_utf8_lossy(&ip_bytes)
            .parse()
            .map_err(|_| DiscoveryError::BadSignature)?;
        nodes.push(Node::new(id, ip, udp_port, tcp_port));
    }
    Ok(nodes)
}

/// §4.9's public key re-derivation used when a caller needs the full
/// secp256k1 key rather than just the reduced node id (e.g. to feed an
/// RLPx dial from a discovered node).
pub fn public_key_from_node_id_payload(bytes: &[u8; 64]) -> Result<PublicKey, DiscoveryError> {
    public_key_from_uncompressed(bytes).map_err(|_| DiscoveryError::BadSignature)
}

#[allow(dead_code)]
fn node_id_payload(public_key: &PublicKey) -> [u8; 64] {
    public_key_to_uncompressed(public_key)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::Ipv4Addr;

    fn secret() -> SecretKey {
        SecretKey::new(&mut rand::rngs::OsRng)
    }

    #[test]
    fn ping_packet_round_trips_through_verify() {
        let key = secret();
        let target = SocketAddr::new(std::net::IpAddr::V4(Ipv4Addr::LOCALHOST), 30303);
        let payload = PingPayload {
            target,
            expiration: default_expiration(),
        }
        .encode();
        let packet = seal_packet(&key, PacketKind::Ping, &payload);

        let verified = verify_packet(&packet).unwrap();
        assert_eq!(verified.kind, PacketKind::Ping);
        let decoded = PingPayload::decode(&verified.payload).unwrap();
        assert_eq!(decoded.target, target);
        assert_eq!(
            verified.sender_id,
            id_from_public_key(&PublicKey::from_secret_key(SECP256K1, &key))
        );
    }

    #[test]
    fn tampered_packet_fails_hash_check() {
        let key = secret();
        let target = SocketAddr::new(std::net::IpAddr::V4(Ipv4Addr::LOCALHOST), 30303);
        let payload = PingPayload {
            target,
            expiration: default_expiration(),
        }
        .encode();
        let mut packet = seal_packet(&key, PacketKind::Ping, &payload);
        let last = packet.len() - 1;
        packet[last] ^= 0xFF;

        assert!(matches!(verify_packet(&packet), Err(DiscoveryError::BadHash)));
    }

    #[test]
    fn oversized_packet_is_rejected() {
        let oversized = vec![0_u8; MAX_PACKET_SIZE + 1];
        assert!(matches!(verify_packet(&oversized), Err(DiscoveryError::PacketTooLarge)));
    }

    #[test]
    fn inbound_ping_does_not_bond_without_a_pong() {
        let socket = UdpSocket::bind((std::net::Ipv4Addr::LOCALHOST, 0)).unwrap();
        let discovery = Discovery::new(socket, secret());

        let peer_key = secret();
        let peer_id = id_from_public_key(&PublicKey::from_secret_key(SECP256K1, &peer_key));
        let from = SocketAddr::new(std::net::IpAddr::V4(Ipv4Addr::LOCALHOST), 30303);
        let payload = PingPayload {
            target: from,
            expiration: default_expiration(),
        }
        .encode();
        let packet = seal_packet(&peer_key, PacketKind::Ping, &payload);

        discovery.handle_datagram(&packet, from).unwrap();
        assert!(!discovery.is_bonded(peer_id, Instant::now()));
    }

    #[test]
    fn flip_bit_targets_the_requested_bucket() {
        let local = H256::zero();
        for idx in [0_usize, 1, 128, 255] {
            let target = flip_bit(local, idx);
            assert_eq!(Node::bucket_index(local, target), Some(idx));
        }
    }
}
