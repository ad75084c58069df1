//! Orchestrator wiring a sensor into the processing pipeline into the
//! transport and control planes, and owning their lifecycle.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use crate::config::Config;
use crate::control::{ControlPlane, ShmAnnouncement};
use crate::processing::metrics::FrameMetrics;
use crate::processing::Pipeline;
use crate::types::WorldFrame;
use crate::sensor::Sensor;
use crate::transport::{layout, SharedMemoryWriter};

/// Counters surfaced to the control plane's periodic stats tick and to
/// callers inspecting backend health.
#[derive(Debug, Default)]
pub struct AppStats {
    pub frames_in: AtomicU64,
    pub frames_published: AtomicU64,
    pub frames_dropped_oversized: AtomicU64,
}

impl AppStats {
    fn to_json(&self) -> String {
        format!(
            "{{\"type\":\"server_stats\",\"frames_in\":{},\"frames_published\":{},\"frames_dropped_oversized\":{}}}",
            self.frames_in.load(Ordering::Relaxed),
            self.frames_published.load(Ordering::Relaxed),
            self.frames_dropped_oversized.load(Ordering::Relaxed),
        )
    }
}

pub struct App {
    config: Config,
    sensor: Box<dyn Sensor>,
    pipeline: Arc<Pipeline>,
    writer: Arc<Mutex<SharedMemoryWriter>>,
    control: ControlPlane,
    stats: Arc<AppStats>,
    running: bool,
}

impl App {
    /// Wires `device -> pipeline -> shared memory`. Nothing starts running
    /// until [`App::start`] is called.
    pub fn new(config: Config, mut sensor: Box<dyn Sensor>) -> Self {
        let pipeline = Arc::new(Pipeline::new(config.pipeline.clone()));
        let writer = Arc::new(Mutex::new(SharedMemoryWriter::new(config.transport.clone())));
        let stats = Arc::new(AppStats::default());

        {
            let pipeline = Arc::clone(&pipeline);
            let stats = Arc::clone(&stats);
            sensor.set_frame_handler(Box::new(move |depth, _color| {
                stats.frames_in.fetch_add(1, Ordering::Relaxed);
                pipeline.process_raw_depth_frame(&depth);
            }));
        }
        {
            let writer = Arc::clone(&writer);
            let stats = Arc::clone(&stats);
            pipeline.set_world_frame_handler(Box::new(move |frame: &WorldFrame, _metrics: &FrameMetrics| {
                let outcome = writer.lock().unwrap().send_world_frame(frame);
                match outcome {
                    Ok(crate::transport::SendOutcome::Published) => {
                        stats.frames_published.fetch_add(1, Ordering::Relaxed);
                    }
                    Ok(crate::transport::SendOutcome::DroppedOversized) => {
                        stats.frames_dropped_oversized.fetch_add(1, Ordering::Relaxed);
                    }
                    Err(e) => tracing::warn!(target: "app.lifecycle", error = %e, "failed to publish world frame"),
                }
            }));
        }

        let control = ControlPlane::new(config.control.clone());
        Self {
            config,
            sensor,
            pipeline,
            writer,
            control,
            stats,
            running: false,
        }
    }

    pub fn pipeline(&self) -> &Arc<Pipeline> {
        &self.pipeline
    }

    pub fn stats(&self) -> &Arc<AppStats> {
        &self.stats
    }

    pub fn start(&mut self) -> anyhow::Result<()> {
        if self.running {
            return Ok(());
        }
        tracing::info!(target: "app.lifecycle", "starting backend subsystems");

        self.writer.lock().unwrap().start()?;

        let announcement = ShmAnnouncement {
            shm_name: self.config.transport.shm_name.clone(),
            shm_size: layout::segment_size(self.config.transport.max_width, self.config.transport.max_height),
            max_width: self.config.transport.max_width,
            max_height: self.config.transport.max_height,
        };
        let stats = Arc::clone(&self.stats);
        self.control.start(announcement, move || stats.to_json())?;

        if self.sensor.open().is_err() {
            tracing::error!(target: "app.lifecycle", "failed to open sensor device; pipeline will not produce frames");
        }
        self.running = true;
        Ok(())
    }

    pub fn stop(&mut self) {
        if !self.running {
            return;
        }
        tracing::info!(target: "app.lifecycle", "stopping backend subsystems");
        self.sensor.close();
        self.control.stop();
        self.writer.lock().unwrap().stop();
        self.running = false;
    }
}

impl Drop for App {
    fn drop(&mut self) {
        self.stop();
    }
}
