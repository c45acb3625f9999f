//! Discovery-table node identity and the instant source behind `last_seen`
//! bookkeeping.

use std::net::IpAddr;
use std::time::{Duration, Instant};

use ethereum_types::H256;

/// A node's devp2p identity: the keccak256 of its uncompressed secp256k1
/// public key (§3 "Node (discovery)").
pub type NodeId = H256;

/// A known discovery-table peer.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Node {
    pub id: NodeId,
    pub ip: IpAddr,
    pub udp_port: u16,
    pub tcp_port: u16,
}

impl Node {
    pub fn new(id: NodeId, ip: IpAddr, udp_port: u16, tcp_port: u16) -> Self {
        Self {
            id,
            ip,
            udp_port,
            tcp_port,
        }
    }

    /// XOR distance between two node ids, treated as a 256-bit integer.
    pub fn distance(a: NodeId, b: NodeId) -> [u8; 32] {
        let mut out = [0_u8; 32];
        for i in 0..32 {
            out[i] = a.as_bytes()[i] ^ b.as_bytes()[i];
        }
        out
    }

    /// `clz(xor(a, b))`: the Kademlia bucket index of `b` relative to `a`.
    /// Returns `None` when `a == b` (no bucket holds the local id).
    pub fn bucket_index(a: NodeId, b: NodeId) -> Option<usize> {
        let xor = Self::distance(a, b);
        let mut leading_zero_bits = 0_usize;
        for byte in xor {
            if byte == 0 {
                leading_zero_bits += 8;
            } else {
                leading_zero_bits += byte.leading_zeros() as usize;
                break;
            }
        }
        if leading_zero_bits == 256 {
            return None;
        }
        Some(leading_zero_bits)
    }
}

/// Liveness bookkeeping kept alongside a `Node` in the routing table.
#[derive(Clone, Debug)]
pub struct NodeEntry {
    pub node: Node,
    pub last_seen: Instant,
    pub liveness_checks: u32,
    /// Set once a mutual ping/pong bond has been confirmed (§3 "is_valid").
    /// A node merely reported by a neighbor, or that has only pinged us,
    /// stays `false` until our own ping gets a matching pong.
    pub is_valid: bool,
}

impl NodeEntry {
    pub fn new(node: Node, now: Instant) -> Self {
        Self {
            node,
            last_seen: now,
            liveness_checks: 0,
            is_valid: false,
        }
    }

    pub fn touch(&mut self, now: Instant) {
        self.last_seen = now;
        self.liveness_checks += 1;
    }
}

/// A bond is valid for 24 hours after the last pong (§3 "Bond state").
pub const BOND_EXPIRY: Duration = Duration::from_secs(24 * 60 * 60);

/// `(node_id, last_ping_sent, last_pong_received, bonded)`.
#[derive(Clone, Debug)]
pub struct BondState {
    pub node_id: NodeId,
    pub last_ping_sent: Option<Instant>,
    pub last_pong_received: Option<Instant>,
}

impl BondState {
    pub fn new(node_id: NodeId) -> Self {
        Self {
            node_id,
            last_ping_sent: None,
            last_pong_received: None,
        }
    }

    pub fn is_bonded(&self, now: Instant) -> bool {
        matches!(self.last_pong_received, Some(t) if now.duration_since(t) < BOND_EXPIRY)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::Ipv4Addr;

    fn id(byte: u8) -> NodeId {
        H256::from([byte; 32])
    }

    #[test]
    fn bucket_index_is_none_for_self() {
        assert_eq!(Node::bucket_index(id(1), id(1)), None);
    }

    #[test]
    fn bucket_index_orders_by_leading_common_bits() {
        let local = id(0b0000_0000);
        // Differs only in the lowest bit: maximal common prefix (255 leading
        // zero bits in the XOR), bucket 255.
        let mut close = [0_u8; 32];
        close[31] = 1;
        let close = H256::from(close);
        assert_eq!(Node::bucket_index(local, close), Some(255));

        // Differs in the top bit: no common prefix, bucket 0.
        let mut far = [0_u8; 32];
        far[0] = 0b1000_0000;
        let far = H256::from(far);
        assert_eq!(Node::bucket_index(local, far), Some(0));
    }

    #[test]
    fn bond_expires_after_24h() {
        let mut bond = BondState::new(id(1));
        let now = Instant::now();
        bond.last_pong_received = Some(now);
        assert!(bond.is_bonded(now));
        assert!(!bond.is_bonded(now + BOND_EXPIRY + Duration::from_secs(1)));
    }

    #[allow(dead_code)]
    fn sample_node() -> Node {
        Node::new(id(7), IpAddr::V4(Ipv4Addr::LOCALHOST), 30303, 30303)
    }
}
