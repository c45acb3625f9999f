//! RLPx: the authenticated, encrypted transport devp2p peers speak over
//! TCP (§4.7 handshake, §4.8 framed session).

pub mod handshake;
mod mac;
pub mod session;

pub use handshake::{run_initiator, run_recipient, Secrets};
pub use session::RlpxSession;
