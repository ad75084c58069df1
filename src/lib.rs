//! Caldera — a real-time depth-sensor processing backend.
//!
//! Ingests raw depth frames from one or more sensors (live or synthetic),
//! runs them through a configurable per-frame processing pipeline, and
//! publishes the resulting height maps over a lock-free shared-memory
//! channel. A two-pipe handshake/heartbeat control plane binds the backend
//! to a single consumer and announces the shared-memory segment identity.

pub mod app;
pub mod calibration;
pub mod checksum;
pub mod clock;
pub mod config;
pub mod control;
pub mod harness;
pub mod logging;
pub mod processing;
pub mod sensor;
pub mod transport;
pub mod types;
