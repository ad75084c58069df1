//! Control-plane handshake and heartbeat-liveness properties, driven through
//! the public `ControlPlane` API by writing directly to its named pipes the
//! way a real client process would.

use std::io::{Read as _, Write as _};
use std::time::{Duration, Instant};

use caldera::config::ControlConfig;
use caldera::control::{ControlPlane, ShmAnnouncement};

const CLIENT_HELLO: &str = "HELLO_CALDERA_CLIENT_V1";

fn test_config(dir: &std::path::Path) -> ControlConfig {
    ControlConfig {
        pipe_s2c: dir.join("s2c").to_string_lossy().to_string(),
        pipe_c2s: dir.join("c2s").to_string_lossy().to_string(),
        handshake_timeout_ms: 1000,
        max_json_field_len: 1024,
        heartbeat_log_throttle_ms: 2000,
        server_stats_interval_ms: 0,
        max_sessions: u32::MAX,
    }
}

fn announcement() -> ShmAnnouncement {
    ShmAnnouncement {
        shm_name: "/caldera_control_props".into(),
        shm_size: 4096,
        max_width: 64,
        max_height: 64,
    }
}

fn wait_for(mut cond: impl FnMut() -> bool, timeout: Duration) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if cond() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(10));
    }
    cond()
}

/// Property 12 (handshake round trip) / Scenario S5: a malformed hello is
/// rejected and the handshake never completes within the configured timeout.
#[test]
fn wrong_hello_never_completes_handshake() {
    let dir = tempfile::tempdir().unwrap();
    let cfg = test_config(dir.path());
    let mut plane = ControlPlane::new(cfg.clone());
    plane.start(announcement(), || String::new()).unwrap();

    std::thread::sleep(Duration::from_millis(80));
    let c2s_path = cfg.pipe_c2s.clone();
    std::thread::spawn(move || {
        if let Ok(mut f) = std::fs::OpenOptions::new().write(true).open(&c2s_path) {
            let _ = writeln!(f, "HELLO_WRONG");
        }
    });

    std::thread::sleep(Duration::from_millis(1200));
    assert!(!plane.is_handshake_complete());
    plane.stop();
}

/// Property 13: heartbeat liveness — a client that keeps sending heartbeat
/// lines is reported alive; one that goes silent eventually is not.
#[test]
fn heartbeat_liveness_tracks_recent_client_activity() {
    let dir = tempfile::tempdir().unwrap();
    let cfg = test_config(dir.path());
    let mut plane = ControlPlane::new(cfg.clone());
    plane.start(announcement(), || String::new()).unwrap();

    std::thread::sleep(Duration::from_millis(80));
    let c2s_path = cfg.pipe_c2s.clone();
    std::thread::spawn(move || {
        if let Ok(mut f) = std::fs::OpenOptions::new().write(true).open(&c2s_path) {
            let _ = writeln!(f, "{CLIENT_HELLO}");
            std::thread::sleep(Duration::from_millis(100));
            for _ in 0..5 {
                let _ = writeln!(f, "heartbeat");
                std::thread::sleep(Duration::from_millis(50));
            }
        }
    });

    assert!(wait_for(|| plane.is_handshake_complete(), Duration::from_secs(2)));
    assert!(wait_for(|| plane.is_client_alive(Duration::from_millis(500)), Duration::from_secs(2)));

    plane.stop();
}

/// Property 12: the handshake response a real client reads off the wire
/// names both shared-memory buffer segments, not just one.
#[test]
fn handshake_response_names_both_shm_buffers_on_the_wire() {
    let dir = tempfile::tempdir().unwrap();
    let cfg = test_config(dir.path());
    let mut plane = ControlPlane::new(cfg.clone());
    plane.start(announcement(), || String::new()).unwrap();

    std::thread::sleep(Duration::from_millis(80));
    let c2s_path = cfg.pipe_c2s.clone();
    let s2c_path = cfg.pipe_s2c.clone();

    let reader = std::thread::spawn(move || {
        let mut f = std::fs::OpenOptions::new().read(true).open(&s2c_path).unwrap();
        let mut buf = String::new();
        f.read_to_string(&mut buf).unwrap();
        buf
    });

    std::thread::sleep(Duration::from_millis(20));
    {
        let mut f = std::fs::OpenOptions::new().write(true).open(&c2s_path).unwrap();
        let _ = writeln!(f, "{CLIENT_HELLO}");
    }

    assert!(wait_for(|| plane.is_handshake_complete(), Duration::from_secs(2)));
    plane.stop();

    let response = reader.join().unwrap();
    assert!(response.contains("\"shm_name_a\""), "response missing shm_name_a: {response}");
    assert!(response.contains("\"shm_name_b\""), "response missing shm_name_b: {response}");
}
