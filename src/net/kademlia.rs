//! The Kademlia routing table (§3 "Bucket"/"KademliaTable", §4.10).
//!
//! All mutation goes through `KademliaTable`'s single `parking_lot::Mutex`,
//! matching §5's "guarded by one mutex" resource rule.

use std::time::{Duration, Instant};

use parking_lot::Mutex;
use rand::seq::SliceRandom;

use super::node::{Node, NodeEntry, NodeId};

const BUCKET_SIZE: usize = 16;
const REPLACEMENT_SIZE: usize = 10;
const NUM_BUCKETS: usize = 256;

/// How long a bucket may go untouched before §4.9's refresh rule applies.
pub const BUCKET_REFRESH_INTERVAL: Duration = Duration::from_secs(60 * 60);

/// Up to 16 verified entries (head = most recently seen) plus up to 10
/// replacement candidates.
#[derive(Default)]
struct Bucket {
    entries: Vec<NodeEntry>,
    replacements: Vec<NodeEntry>,
    last_touched: Option<Instant>,
}

impl Bucket {
    fn contains(&self, id: NodeId) -> bool {
        self.entries.iter().any(|e| e.node.id == id) || self.replacements.iter().any(|e| e.node.id == id)
    }

    fn promote_to_head(&mut self, id: NodeId) -> bool {
        if let Some(pos) = self.entries.iter().position(|e| e.node.id == id) {
            let mut entry = self.entries.remove(pos);
            entry.touch(Instant::now());
            entry.is_valid = true;
            self.entries.insert(0, entry);
            true
        } else {
            false
        }
    }
}

/// 256 buckets indexed by `clz(xor(local_id, node_id))`; the local id is
/// never inserted.
pub struct KademliaTable {
    local_id: NodeId,
    buckets: Mutex<Vec<Bucket>>,
}

impl KademliaTable {
    pub fn new(local_id: NodeId) -> Self {
        let mut buckets = Vec::with_capacity(NUM_BUCKETS);
        buckets.resize_with(NUM_BUCKETS, Bucket::default);
        Self {
            local_id,
            buckets: Mutex::new(buckets),
        }
    }

    fn bucket_index(&self, id: NodeId) -> Option<usize> {
        Node::bucket_index(self.local_id, id)
    }

    /// Insert or refresh a verified (bonded) node: move to head if present,
    /// insert at head if the bucket has room, else append to the
    /// replacement list.
    pub fn add_verified(&self, node: Node, now: Instant) {
        let Some(idx) = self.bucket_index(node.id) else {
            return;
        };
        let mut buckets = self.buckets.lock();
        let bucket = &mut buckets[idx];
        bucket.last_touched = Some(now);

        if bucket.promote_to_head(node.id) {
            return;
        }
        bucket.replacements.retain(|e| e.node.id != node.id);

        let mut entry = NodeEntry::new(node, now);
        entry.is_valid = true;
        if bucket.entries.len() < BUCKET_SIZE {
            bucket.entries.insert(0, entry);
        } else {
            if bucket.replacements.len() >= REPLACEMENT_SIZE {
                bucket.replacements.remove(0);
            }
            bucket.replacements.push(entry);
        }
    }

    /// Insert a node seen (but not bonded) in a response: appended to the
    /// tail only, marked unverified, and never promoted to verified status
    /// without a bond (§3/§4.10 — only `add_verified` sets `is_valid`).
    pub fn add_seen(&self, node: Node, now: Instant) {
        let Some(idx) = self.bucket_index(node.id) else {
            return;
        };
        let mut buckets = self.buckets.lock();
        let bucket = &mut buckets[idx];
        if bucket.contains(node.id) {
            return;
        }
        let entry = NodeEntry::new(node, now);
        if bucket.entries.len() < BUCKET_SIZE {
            bucket.entries.push(entry);
        } else if bucket.replacements.len() < REPLACEMENT_SIZE {
            bucket.replacements.push(entry);
        }
    }

    /// A liveness check on `id` failed: if it's at its bucket's tail,
    /// evict it and promote the newest replacement.
    pub fn replace_dead(&self, id: NodeId) {
        let Some(idx) = self.bucket_index(id) else {
            return;
        };
        let mut buckets = self.buckets.lock();
        let bucket = &mut buckets[idx];
        if bucket.entries.last().map(|e| e.node.id) != Some(id) {
            return;
        }
        bucket.entries.pop();
        if let Some(replacement) = bucket.replacements.pop() {
            bucket.entries.push(replacement);
        }
    }

    /// The `n` verified entries closest to `target` by XOR distance; falls
    /// back to all verified entries (still sorted) if none are closer than
    /// the whole set, matching §4.10's "if none verified, fall back to all."
    pub fn find_closest(&self, target: NodeId, n: usize) -> Vec<Node> {
        let buckets = self.buckets.lock();
        let mut verified: Vec<Node> = buckets
            .iter()
            .flat_map(|b| b.entries.iter().filter(|e| e.is_valid).map(|e| e.node.clone()))
            .collect();
        if verified.is_empty() {
            verified = buckets
                .iter()
                .flat_map(|b| b.entries.iter().map(|e| e.node.clone()))
                .collect();
        }
        verified.sort_by_key(|node| Node::distance(target, node.id));
        verified.truncate(n);
        verified
    }

    /// Fisher-Yates shuffle of all verified entries, returning up to `n`.
    pub fn random_nodes(&self, n: usize) -> Vec<Node> {
        let buckets = self.buckets.lock();
        let mut all: Vec<Node> = buckets
            .iter()
            .flat_map(|b| b.entries.iter().map(|e| e.node.clone()))
            .collect();
        all.shuffle(&mut rand::thread_rng());
        all.truncate(n);
        all
    }

    /// Buckets untouched for longer than [`BUCKET_REFRESH_INTERVAL`],
    /// identified by index so the caller can flip that bit of the local id
    /// to build the lookup target (§4.9 "Bucket refresh").
    pub fn stale_buckets(&self, now: Instant) -> Vec<usize> {
        let buckets = self.buckets.lock();
        buckets
            .iter()
            .enumerate()
            .filter(|(_, b)| {
                !b.entries.is_empty()
                    && b.last_touched
                        .map(|t| now.duration_since(t) >= BUCKET_REFRESH_INTERVAL)
                        .unwrap_or(true)
            })
            .map(|(i, _)| i)
            .collect()
    }

    /// A random non-empty bucket's tail entry, for §4.9's 5 s revalidation
    /// tick.
    pub fn random_tail_for_revalidation(&self) -> Option<Node> {
        let buckets = self.buckets.lock();
        let non_empty: Vec<usize> = buckets
            .iter()
            .enumerate()
            .filter(|(_, b)| !b.entries.is_empty())
            .map(|(i, _)| i)
            .collect();
        let idx = *non_empty.choose(&mut rand::thread_rng())?;
        buckets[idx].entries.last().map(|e| e.node.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::{IpAddr, Ipv4Addr};
    use ethereum_types::H256;

    fn node_with_id(byte: u8) -> Node {
        Node::new(H256::from([byte; 32]), IpAddr::V4(Ipv4Addr::LOCALHOST), 30303, 30303)
    }

    #[test]
    fn seventeenth_entry_becomes_a_replacement() {
        let table = KademliaTable::new(H256::zero());
        let now = Instant::now();

        // All fall in the same bucket as `H256::zero()`'s all-0x01 sibling
        // by construction: vary only the last byte so the XOR distance's
        // leading bits (hence bucket index) stay identical.
        let mut ids = Vec::new();
        for i in 0..17_u8 {
            // Setting the top bit fixes the leading-zero count (and hence
            // the bucket index) at 0 regardless of the varying low byte.
            let mut bytes = [0_u8; 32];
            bytes[0] = 0b1000_0000;
            bytes[31] = i + 1;
            ids.push(H256::from(bytes));
        }
        for id in &ids {
            table.add_verified(
                Node::new(*id, IpAddr::V4(Ipv4Addr::LOCALHOST), 30303, 30303),
                now,
            );
        }

        let idx = Node::bucket_index(H256::zero(), ids[0]).unwrap();
        let buckets = table.buckets.lock();
        assert_eq!(buckets[idx].entries.len(), 16);
        assert_eq!(buckets[idx].replacements.len(), 1);
        assert_eq!(buckets[idx].entries.last().unwrap().node.id, ids[0]);
        drop(buckets);

        table.replace_dead(ids[0]);
        let buckets = table.buckets.lock();
        assert!(!buckets[idx].entries.iter().any(|e| e.node.id == ids[0]));
        assert!(buckets[idx].replacements.is_empty());
    }

    #[test]
    fn find_closest_is_sorted_and_duplicate_free() {
        let table = KademliaTable::new(H256::zero());
        let now = Instant::now();
        for i in 1..8_u8 {
            table.add_verified(node_with_id(i), now);
        }
        let closest = table.find_closest(H256::zero(), 4);
        assert_eq!(closest.len(), 4);
        let mut ids: Vec<_> = closest.iter().map(|n| n.id).collect();
        let before = ids.clone();
        ids.sort();
        ids.dedup();
        assert_eq!(ids.len(), before.len());
    }

    #[test]
    fn dead_tail_is_replaced_by_newest_replacement() {
        let table = KademliaTable::new(H256::zero());
        let now = Instant::now();
        let mut ids = Vec::new();
        for i in 0..17_u8 {
            // Setting the top bit fixes the leading-zero count (and hence
            // the bucket index) at 0 regardless of the varying low byte.
            let mut bytes = [0_u8; 32];
            bytes[0] = 0b1000_0000;
            bytes[31] = i + 1;
            ids.push(H256::from(bytes));
        }
        for id in &ids {
            table.add_verified(
                Node::new(*id, IpAddr::V4(Ipv4Addr::LOCALHOST), 30303, 30303),
                now,
            );
        }
        let idx = Node::bucket_index(H256::zero(), ids[0]).unwrap();
        let tail_id = table.buckets.lock()[idx].entries.last().unwrap().node.id;

        table.replace_dead(tail_id);

        let buckets = table.buckets.lock();
        assert!(!buckets[idx].entries.iter().any(|e| e.node.id == tail_id));
        assert_eq!(buckets[idx].entries.len(), 16);
        assert!(buckets[idx].replacements.is_empty());
    }
}
