//! Two-FIFO handshake, heartbeat, and periodic stats worker.
//!
//! One named pipe carries server-to-client messages (the handshake
//! response, then periodic stats JSON); the other carries client-to-server
//! messages (the initial HELLO, then heartbeat/telemetry lines). Both run
//! on a single background thread so the rest of the backend never blocks on
//! pipe I/O.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use anyhow::Context;

use crate::config::ControlConfig;

use super::fifo::{read_line_with_timeout, write_line, Fifo};

const CLIENT_HELLO: &str = "HELLO_CALDERA_CLIENT_V1";

/// Fields the handshake response JSON needs from the transport layer.
///
/// The original two-process protocol names both halves of its double buffer
/// as separate shared-memory segments, `shm_name_a`/`shm_name_b`, and clients
/// expect both keys in the handshake response. This implementation keeps
/// both buffers inside one mapped segment (`shm_name`) instead of two
/// separate `shm_open` objects, so `shm_name_a` and `shm_name_b` both carry
/// that same segment name — a client following the wire protocol still finds
/// both keys present, and opening either just attaches the one segment
/// twice.
#[derive(Debug, Clone)]
pub struct ShmAnnouncement {
    pub shm_name: String,
    pub shm_size: usize,
    pub max_width: u32,
    pub max_height: u32,
}

impl ShmAnnouncement {
    fn to_json(&self) -> String {
        format!(
            "{{\n  \"protocol_version\": \"1.0\",\n  \"shm_name\": \"{}\",\n  \"shm_name_a\": \"{}\",\n  \"shm_name_b\": \"{}\",\n  \"shm_size\": {},\n  \"height_map_width\": {},\n  \"height_map_height\": {}\n}}",
            self.shm_name, self.shm_name, self.shm_name, self.shm_size, self.max_width, self.max_height
        )
    }
}

struct Shared {
    running: AtomicBool,
    handshake_completed: AtomicBool,
    last_heartbeat_ns: AtomicU64,
}

/// Owns the background worker thread; dropping without calling `stop()`
/// still joins cleanly via `Drop`.
pub struct ControlPlane {
    config: ControlConfig,
    shared: Arc<Shared>,
    worker: Option<JoinHandle<()>>,
}

impl ControlPlane {
    pub fn new(config: ControlConfig) -> Self {
        Self {
            config,
            shared: Arc::new(Shared {
                running: AtomicBool::new(false),
                handshake_completed: AtomicBool::new(false),
                last_heartbeat_ns: AtomicU64::new(0),
            }),
            worker: None,
        }
    }

    pub fn is_handshake_complete(&self) -> bool {
        self.shared.handshake_completed.load(Ordering::Acquire)
    }

    /// `true` iff a heartbeat or telemetry line arrived within `timeout` of
    /// now. Always `false` before the first one arrives.
    pub fn is_client_alive(&self, timeout: Duration) -> bool {
        let last = self.shared.last_heartbeat_ns.load(Ordering::Acquire);
        if last == 0 {
            return false;
        }
        let now_ns = crate::clock::monotonic_ns();
        now_ns.saturating_sub(last) <= timeout.as_nanos() as u64
    }

    /// Starts the background worker, which performs the handshake and then
    /// loops serving heartbeats and periodic stats until `stop()`.
    /// `stats_provider` is polled every `server_stats_interval_ms` once the
    /// handshake completes; an empty string suppresses that tick's emission.
    pub fn start(
        &mut self,
        announcement: ShmAnnouncement,
        stats_provider: impl Fn() -> String + Send + 'static,
    ) -> anyhow::Result<()> {
        if self.shared.running.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        self.shared.handshake_completed.store(false, Ordering::Release);
        self.shared.last_heartbeat_ns.store(0, Ordering::Release);

        let config = self.config.clone();
        let shared = Arc::clone(&self.shared);
        let stats_provider = Arc::new(Mutex::new(stats_provider));
        let handle = std::thread::Builder::new()
            .name("caldera-control".into())
            .spawn(move || {
                worker_loop(config, shared, announcement, stats_provider);
            })
            .context("spawn control-plane worker thread")?;
        self.worker = Some(handle);
        Ok(())
    }

    pub fn stop(&mut self) {
        self.shared.running.store(false, Ordering::Release);
        if let Some(handle) = self.worker.take() {
            let _ = handle.join();
        }
    }
}

impl Drop for ControlPlane {
    fn drop(&mut self) {
        self.stop();
    }
}

fn worker_loop(
    config: ControlConfig,
    shared: Arc<Shared>,
    announcement: ShmAnnouncement,
    stats_provider: Arc<Mutex<impl Fn() -> String>>,
) {
    let fifo_s2c = Fifo::new(config.pipe_s2c.clone());
    let fifo_c2s = Fifo::new(config.pipe_c2s.clone());
    if fifo_s2c.create(true).is_err() || fifo_c2s.create(true).is_err() {
        tracing::error!(target: "transport.handshake", "failed to create control FIFOs");
        shared.running.store(false, Ordering::Release);
        return;
    }
    tracing::info!(target: "transport.handshake", s2c = %config.pipe_s2c, c2s = %config.pipe_c2s, "control FIFOs created");

    let mut rfd = match fifo_c2s.open_for_reading(false) {
        Ok(f) => f,
        Err(e) => {
            tracing::error!(target: "transport.handshake", error = %e, "failed to open c2s for handshake read");
            cleanup(&fifo_s2c, &fifo_c2s, &shared);
            return;
        }
    };

    tracing::info!(target: "transport.handshake", timeout_ms = config.handshake_timeout_ms, "waiting for client HELLO");
    let hello = read_line_with_timeout(&mut rfd, config.max_json_field_len, Duration::from_millis(config.handshake_timeout_ms));
    drop(rfd);

    if hello.as_deref() != Some(CLIENT_HELLO) {
        tracing::error!(target: "transport.handshake", got = ?hello, "handshake failed: no valid HELLO");
        cleanup(&fifo_s2c, &fifo_c2s, &shared);
        return;
    }

    let mut wfd = match fifo_s2c.open_for_writing(true) {
        Ok(f) => f,
        Err(e) => {
            tracing::error!(target: "transport.handshake", error = %e, "failed to open s2c for handshake response");
            cleanup(&fifo_s2c, &fifo_c2s, &shared);
            return;
        }
    };
    if write_line(&mut wfd, &announcement.to_json()).is_err() {
        tracing::error!(target: "transport.handshake", "failed to write handshake response");
        cleanup(&fifo_s2c, &fifo_c2s, &shared);
        return;
    }
    shared.handshake_completed.store(true, Ordering::Release);
    tracing::info!(target: "transport.handshake", "handshake complete");

    let mut cfd = match fifo_c2s.open_for_reading(false) {
        Ok(f) => f,
        Err(e) => {
            tracing::error!(target: "transport.handshake", error = %e, "failed to reopen c2s for heartbeat loop");
            cleanup(&fifo_s2c, &fifo_c2s, &shared);
            return;
        }
    };

    let mut last_log_heartbeat = Instant::now() - Duration::from_secs(3600);
    let mut last_stats_emit: Option<Instant> = None;
    while shared.running.load(Ordering::Acquire) {
        if let Some(line) = read_line_with_timeout(&mut cfd, config.max_json_field_len, Duration::from_millis(20)) {
            if line.contains("heartbeat") || line.contains("telemetry") {
                shared.last_heartbeat_ns.store(crate::clock::monotonic_ns(), Ordering::Release);
                if line.contains("heartbeat") && last_log_heartbeat.elapsed() >= Duration::from_millis(config.heartbeat_log_throttle_ms) {
                    last_log_heartbeat = Instant::now();
                    tracing::info!(target: "transport.handshake", "heartbeat ok");
                } else if line.contains("telemetry") {
                    tracing::info!(target: "transport.handshake", %line, "telemetry received");
                }
            } else if !line.is_empty() {
                tracing::warn!(target: "transport.handshake", %line, "unknown client message");
            }
        }

        if config.server_stats_interval_ms > 0 {
            let due = last_stats_emit
                .map(|at| at.elapsed() >= Duration::from_millis(config.server_stats_interval_ms))
                .unwrap_or(true);
            if due {
                last_stats_emit = Some(Instant::now());
                let stats_json = (stats_provider.lock().unwrap())();
                if !stats_json.is_empty() && write_line(&mut wfd, &stats_json).is_err() {
                    tracing::warn!(target: "transport.handshake", "stats pipe closed by client, halting stats emission");
                }
            }
        }
    }

    tracing::info!(target: "transport.handshake", "control worker exiting");
    cleanup(&fifo_s2c, &fifo_c2s, &shared);
}

fn cleanup(fifo_s2c: &Fifo, fifo_c2s: &Fifo, shared: &Shared) {
    shared.running.store(false, Ordering::Release);
    fifo_s2c.remove();
    fifo_c2s.remove();
}
