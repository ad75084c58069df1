//! Control plane: the two-FIFO handshake/heartbeat/stats channel that binds
//! the backend to a single consumer and announces the shared-memory
//! segment's identity.

pub mod fifo;
pub mod handshake;

pub use handshake::{ControlPlane, ShmAnnouncement};
