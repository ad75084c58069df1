//! In-process integration harness: wires a synthetic sensor through a real
//! pipeline into a real shared-memory segment, with latency and throughput
//! accounting, for tests that want to exercise the full stack without a
//! spawned process pair.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use crate::config::{PipelineConfig, TransportConfig};
use crate::processing::metrics::FrameMetrics;
use crate::processing::Pipeline;
use crate::sensor::synthetic::{self, SyntheticSensorDevice};
use crate::sensor::Sensor;
use crate::transport::{SendOutcome, SharedMemoryReader, SharedMemoryWriter};
use crate::types::WorldFrame;

const LATENCY_SAMPLE_CAP: usize = 512;

pub struct HarnessConfig {
    pub shm_name: String,
    pub max_width: u32,
    pub max_height: u32,
    pub pipeline: PipelineConfig,
}

impl Default for HarnessConfig {
    fn default() -> Self {
        Self {
            shm_name: "/caldera_integration_harness".to_string(),
            max_width: 64,
            max_height: 64,
            pipeline: PipelineConfig::default(),
        }
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct HarnessStats {
    pub frames_in: u64,
    pub frames_out: u64,
    pub frames_published: u64,
    pub frames_dropped_oversized: u64,
    pub last_latency_ns: u64,
    pub mean_latency_ns: f64,
    pub p95_latency_ns: u64,
}

struct Counters {
    frames_in: AtomicU64,
    frames_out: AtomicU64,
    frames_published: AtomicU64,
    frames_dropped_oversized: AtomicU64,
    last_latency_ns: AtomicU64,
    latency_sum_ns: AtomicU64,
    latency_count: AtomicU64,
    latency_samples: Mutex<Vec<u64>>,
}

impl Default for Counters {
    fn default() -> Self {
        Self {
            frames_in: AtomicU64::new(0),
            frames_out: AtomicU64::new(0),
            frames_published: AtomicU64::new(0),
            frames_dropped_oversized: AtomicU64::new(0),
            last_latency_ns: AtomicU64::new(0),
            latency_sum_ns: AtomicU64::new(0),
            latency_count: AtomicU64::new(0),
            latency_samples: Mutex::new(Vec::with_capacity(LATENCY_SAMPLE_CAP)),
        }
    }
}

/// Drives a [`SyntheticSensorDevice`] through a real [`Pipeline`] and a real
/// [`SharedMemoryWriter`]; callers read published frames back out through a
/// [`SharedMemoryReader`] it also owns.
pub struct IntegrationHarness {
    sensor: Option<SyntheticSensorDevice>,
    pipeline: Arc<Pipeline>,
    writer: Arc<Mutex<SharedMemoryWriter>>,
    reader: SharedMemoryReader,
    counters: Arc<Counters>,
    shm_name: String,
    running: bool,
}

impl IntegrationHarness {
    pub fn new(hc: HarnessConfig) -> Self {
        let pipeline = Arc::new(Pipeline::new(hc.pipeline));
        let transport_config = TransportConfig {
            shm_name: hc.shm_name.clone(),
            max_width: hc.max_width,
            max_height: hc.max_height,
            checksum_interval_ms: 0,
        };
        let writer = Arc::new(Mutex::new(SharedMemoryWriter::new(transport_config)));
        let counters = Arc::new(Counters::default());

        {
            let writer = Arc::clone(&writer);
            let counters = Arc::clone(&counters);
            pipeline.set_world_frame_handler(Box::new(move |frame: &WorldFrame, _metrics: &FrameMetrics| {
                let now_ns = crate::clock::monotonic_ns();
                if frame.timestamp_ns <= now_ns {
                    let lat = now_ns - frame.timestamp_ns;
                    counters.last_latency_ns.store(lat, Ordering::Relaxed);
                    counters.latency_sum_ns.fetch_add(lat, Ordering::Relaxed);
                    counters.latency_count.fetch_add(1, Ordering::Relaxed);
                    let mut samples = counters.latency_samples.lock().unwrap();
                    if samples.len() < LATENCY_SAMPLE_CAP {
                        samples.push(lat);
                    }
                }
                match writer.lock().unwrap().send_world_frame(frame) {
                    Ok(SendOutcome::Published) => {
                        counters.frames_published.fetch_add(1, Ordering::Relaxed);
                        counters.frames_out.fetch_add(1, Ordering::Relaxed);
                    }
                    Ok(SendOutcome::DroppedOversized) => {
                        counters.frames_dropped_oversized.fetch_add(1, Ordering::Relaxed);
                    }
                    Err(e) => tracing::warn!(target: "app.lifecycle", error = %e, "harness failed to publish frame"),
                }
            }));
        }

        Self {
            sensor: None,
            pipeline,
            writer,
            reader: SharedMemoryReader::new(),
            counters,
            shm_name: hc.shm_name,
            running: false,
        }
    }

    pub fn add_synthetic_sensor(&mut self, cfg: synthetic::Config) {
        self.sensor = Some(SyntheticSensorDevice::new(cfg));
    }

    pub fn pipeline(&self) -> &Arc<Pipeline> {
        &self.pipeline
    }

    pub fn synthetic_sensor(&mut self) -> Option<&mut SyntheticSensorDevice> {
        self.sensor.as_mut()
    }

    pub fn start(&mut self, max_width: u32, max_height: u32) -> anyhow::Result<()> {
        if self.running {
            return Ok(());
        }
        self.writer.lock().unwrap().start()?;
        self.reader.open(&self.shm_name, max_width, max_height)?;

        if let Some(sensor) = self.sensor.as_mut() {
            let pipeline = Arc::clone(&self.pipeline);
            let counters = Arc::clone(&self.counters);
            sensor.set_frame_handler(Box::new(move |depth, _color| {
                counters.frames_in.fetch_add(1, Ordering::Relaxed);
                pipeline.process_raw_depth_frame(&depth);
            }));
            sensor.open()?;
        }
        self.running = true;
        Ok(())
    }

    pub fn stop(&mut self) {
        if !self.running {
            return;
        }
        if let Some(sensor) = self.sensor.as_mut() {
            sensor.close();
        }
        self.writer.lock().unwrap().stop();
        self.reader.close();
        self.running = false;
    }

    pub fn latest_frame_checksum_valid(&self) -> Option<bool> {
        self.reader.latest().map(|view| view.verify_checksum())
    }

    pub fn frames_published(&self) -> u64 {
        self.counters.frames_published.load(Ordering::Relaxed)
    }

    pub fn stats(&self) -> HarnessStats {
        let frames_in = self.counters.frames_in.load(Ordering::Relaxed);
        let frames_out = self.counters.frames_out.load(Ordering::Relaxed);
        let latency_count = self.counters.latency_count.load(Ordering::Relaxed);
        let mean_latency_ns = if latency_count > 0 {
            self.counters.latency_sum_ns.load(Ordering::Relaxed) as f64 / latency_count as f64
        } else {
            0.0
        };
        HarnessStats {
            frames_in,
            frames_out,
            frames_published: self.counters.frames_published.load(Ordering::Relaxed),
            frames_dropped_oversized: self.counters.frames_dropped_oversized.load(Ordering::Relaxed),
            last_latency_ns: self.counters.last_latency_ns.load(Ordering::Relaxed),
            mean_latency_ns,
            p95_latency_ns: self.latency_p95_ns(),
        }
    }

    fn latency_p95_ns(&self) -> u64 {
        let mut samples = self.counters.latency_samples.lock().unwrap().clone();
        if samples.is_empty() {
            return 0;
        }
        samples.sort_unstable();
        let idx = ((0.95 * samples.len() as f64).ceil() as usize).saturating_sub(1).min(samples.len() - 1);
        samples[idx]
    }
}

impl Drop for IntegrationHarness {
    fn drop(&mut self) {
        self.stop();
    }
}
