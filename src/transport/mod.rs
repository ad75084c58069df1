//! Lock-free double-buffered shared-memory transport.
//!
//! A single writer publishes height maps by filling the currently-inactive
//! buffer and flipping a header word; any number of readers can poll the
//! active buffer without coordinating with the writer or each other. See
//! [`layout`] for the exact byte layout.

pub mod layout;
pub mod reader;
pub mod writer;

pub use reader::{FrameView, SharedMemoryReader};
pub use writer::{SendOutcome, SharedMemoryWriter};
