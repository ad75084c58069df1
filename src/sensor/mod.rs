//! Sensor abstraction layer.
//!
//! A [`Sensor`] produces raw depth (and optionally color) frames on its own
//! worker thread and pushes them to a [`FrameHandler`] registered before
//! `open()`. Today the only implementation is [`synthetic`], a deterministic
//! in-process generator used for development and integration testing; the
//! trait boundary is where a real depth-camera driver would plug in.

pub mod synthetic;

use crate::types::{RawColorFrame, RawDepthFrame};
use anyhow::Result;

/// Receives frames pushed by a running [`Sensor`]. Implementations must be
/// cheap and non-blocking: they run on the sensor's own capture thread.
pub trait FrameHandler: Send {
    fn on_frame(&mut self, depth: RawDepthFrame, color: Option<RawColorFrame>);
}

/// A `FnMut`-backed [`FrameHandler`], for callers that would rather hand a
/// closure than implement the trait.
impl<F> FrameHandler for F
where
    F: FnMut(RawDepthFrame, Option<RawColorFrame>) + Send,
{
    fn on_frame(&mut self, depth: RawDepthFrame, color: Option<RawColorFrame>) {
        self(depth, color)
    }
}

/// A source of raw depth frames, live or synthetic.
pub trait Sensor: Send {
    /// Start the capture thread. Must be idempotent against a second call
    /// while already running.
    fn open(&mut self) -> Result<()>;

    /// Stop the capture thread and join it. Safe to call when not running.
    fn close(&mut self);

    fn is_running(&self) -> bool;

    fn device_id(&self) -> &str;

    /// Install the handler that receives frames once `open()` is called.
    /// Must be called before `open()`.
    fn set_frame_handler(&mut self, handler: Box<dyn FrameHandler>);
}
