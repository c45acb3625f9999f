//! The dial scheduler (§4.11): keeps a pool of static peers dialed and
//! fills spare capacity with dynamic candidates discovered over UDP.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use rand::seq::SliceRandom;

use super::node::{Node, NodeId};
use crate::error::DialError;

/// An attempt older than this no longer counts against `check_dial`'s
/// "recently dialed" rejection (§4.11).
pub const DIAL_HISTORY_EXPIRY: Duration = Duration::from_secs(35);

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DialFlavor {
    Static,
    Dynamic,
}

/// `(dest, flags, static_pool_index, last_resolved)` — static tasks
/// outlive individual attempts; dynamic ones are destroyed on completion.
#[derive(Clone, Debug)]
pub struct DialTask {
    pub dest: Node,
    pub flavor: DialFlavor,
    pub static_pool_index: Option<usize>,
}

struct State {
    dialing: HashMap<NodeId, DialTask>,
    static_pool: Vec<Node>,
    history: HashMap<NodeId, Instant>,
}

/// Configuration the scheduler needs to compute `free_slots` and run
/// `check_dial` (§4.11).
pub struct DialConfig {
    pub max_active_dials: usize,
    pub max_dial_peers: usize,
    pub self_id: NodeId,
}

pub struct DialScheduler {
    config: DialConfig,
    state: Mutex<State>,
}

impl DialScheduler {
    pub fn new(config: DialConfig, static_nodes: Vec<Node>) -> Self {
        Self {
            config,
            state: Mutex::new(State {
                dialing: HashMap::new(),
                static_pool: static_nodes,
                history: HashMap::new(),
            }),
        }
    }

    /// `free_slots = min(max_active_dials, 2*(max_dial_peers - dial_peers_count)) - dialing.count`.
    pub fn free_slots(&self, dial_peers_count: usize) -> usize {
        let state = self.state.lock();
        let remaining_peers = self.config.max_dial_peers.saturating_sub(dial_peers_count);
        let cap = self.config.max_active_dials.min(2 * remaining_peers);
        cap.saturating_sub(state.dialing.len())
    }

    /// Reject reasons from §4.11: self-id, no TCP port, already dialing,
    /// already connected, not whitelisted, or a recent-enough history
    /// entry.
    pub fn check_dial(
        &self,
        node: &Node,
        connected: &dyn Fn(NodeId) -> bool,
        whitelisted: &dyn Fn(NodeId) -> bool,
        now: Instant,
    ) -> Result<(), DialError> {
        if node.id == self.config.self_id {
            return Err(DialError::IsSelf);
        }
        if node.tcp_port == 0 {
            return Err(DialError::NoPort);
        }
        if !whitelisted(node.id) {
            return Err(DialError::NotWhitelisted);
        }
        let state = self.state.lock();
        if state.dialing.contains_key(&node.id) {
            return Err(DialError::AlreadyDialing);
        }
        drop(state);
        if connected(node.id) {
            return Err(DialError::AlreadyConnected);
        }
        let state = self.state.lock();
        if let Some(&last) = state.history.get(&node.id) {
            if now.duration_since(last) < DIAL_HISTORY_EXPIRY {
                return Err(DialError::RecentlyDialed);
            }
        }
        Ok(())
    }

    /// Pop a random eligible static task if any room remains, per §4.11's
    /// tick: "while free_slots > 0 and the static pool is non-empty, pop a
    /// random static task and start it."
    pub fn pop_random_static(&self, now: Instant) -> Option<DialTask> {
        let mut state = self.state.lock();
        let eligible: Vec<usize> = state
            .static_pool
            .iter()
            .enumerate()
            .filter(|(_, n)| {
                state
                    .history
                    .get(&n.id)
                    .map(|last| now.duration_since(*last) >= DIAL_HISTORY_EXPIRY)
                    .unwrap_or(true)
            })
            .map(|(i, _)| i)
            .collect();
        let idx = *eligible.choose(&mut rand::thread_rng())?;
        let node = state.static_pool.remove(idx);
        let task = DialTask {
            dest: node.clone(),
            flavor: DialFlavor::Static,
            static_pool_index: Some(idx),
        };
        state.dialing.insert(node.id, task.clone());
        Some(task)
    }

    pub fn start_dynamic(&self, node: Node) -> DialTask {
        let task = DialTask {
            dest: node.clone(),
            flavor: DialFlavor::Dynamic,
            static_pool_index: None,
        };
        self.state.lock().dialing.insert(node.id, task.clone());
        task
    }

    /// A dial attempt finished (successfully or not): remove it from
    /// `dialing`, record the history entry, and — if static — return it to
    /// the pool once its history entry expires (here: immediately, since
    /// `pop_random_static` itself re-checks history before selecting it).
    pub fn complete(&self, task: &DialTask, now: Instant) {
        let mut state = self.state.lock();
        state.dialing.remove(&task.dest.id);
        state.history.insert(task.dest.id, now);
        if task.flavor == DialFlavor::Static {
            state.static_pool.push(task.dest.clone());
        }
    }

    pub fn dialing_count(&self) -> usize {
        self.state.lock().dialing.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ethereum_types::H256;
    use std::net::{IpAddr, Ipv4Addr};

    fn node(byte: u8, tcp_port: u16) -> Node {
        Node::new(H256::from([byte; 32]), IpAddr::V4(Ipv4Addr::LOCALHOST), 30303, tcp_port)
    }

    #[test]
    fn free_slots_accounts_for_in_flight_dials() {
        let config = DialConfig {
            max_active_dials: 10,
            max_dial_peers: 5,
            self_id: H256::zero(),
        };
        let scheduler = DialScheduler::new(config, vec![]);
        assert_eq!(scheduler.free_slots(3), 4); // min(10, 2*2) - 0
        scheduler.start_dynamic(node(1, 30303));
        assert_eq!(scheduler.free_slots(3), 3);
    }

    #[test]
    fn check_dial_rejects_no_port_and_self() {
        let config = DialConfig {
            max_active_dials: 10,
            max_dial_peers: 5,
            self_id: H256::from([9; 32]),
        };
        let scheduler = DialScheduler::new(config, vec![]);
        let now = Instant::now();

        assert_eq!(
            scheduler.check_dial(&node(9, 30303), &|_| false, &|_| true, now),
            Err(DialError::IsSelf)
        );
        assert_eq!(
            scheduler.check_dial(&node(1, 0), &|_| false, &|_| true, now),
            Err(DialError::NoPort)
        );
        assert_eq!(
            scheduler.check_dial(&node(1, 30303), &|_| true, &|_| true, now),
            Err(DialError::AlreadyConnected)
        );
    }

    #[test]
    fn recently_dialed_node_is_rejected_until_history_expires() {
        let config = DialConfig {
            max_active_dials: 10,
            max_dial_peers: 5,
            self_id: H256::zero(),
        };
        let scheduler = DialScheduler::new(config, vec![]);
        let n = node(1, 30303);
        let task = scheduler.start_dynamic(n.clone());
        let now = Instant::now();
        scheduler.complete(&task, now);

        assert_eq!(
            scheduler.check_dial(&n, &|_| false, &|_| true, now + Duration::from_secs(10)),
            Err(DialError::RecentlyDialed)
        );
        assert!(scheduler
            .check_dial(&n, &|_| false, &|_| true, now + DIAL_HISTORY_EXPIRY + Duration::from_secs(1))
            .is_ok());
    }
}
