//! The devp2p/RLPx networking core: discovery v4 over UDP, the Kademlia
//! routing table it maintains, RLPx's authenticated TCP transport, the
//! dial scheduler that keeps outbound connections flowing, and the peer
//! lifecycle server tying all of it together (§4.9-§4.12).

pub mod dial;
pub mod discovery;
pub mod kademlia;
pub mod node;
pub mod rlpx;
pub mod server;

pub use dial::{DialConfig, DialScheduler};
pub use discovery::Discovery;
pub use kademlia::KademliaTable;
pub use node::{Node, NodeId};
pub use server::{Server, ServerConfig};
