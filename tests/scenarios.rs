//! The concrete scenarios from the processing/transport design notes (S1,
//! S2, S3, S4, S6 — S5 lives in `control_properties.rs` alongside the rest
//! of the handshake tests).

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::mpsc;
use std::sync::Arc;
use std::time::{Duration, Instant};

use caldera::config::{PipelineConfig, TransportConfig};
use caldera::processing::metrics::FrameMetrics;
use caldera::processing::Pipeline;
use caldera::sensor::synthetic::{Config as SyntheticConfig, FaultInjectionConfig, Pattern, SyntheticSensorDevice};
use caldera::sensor::Sensor;
use caldera::transport::{SendOutcome, SharedMemoryReader, SharedMemoryWriter};
use caldera::types::{HeightMap, RawDepthFrame, TransformParameters, WorldFrame};

/// S1: an 8x8 ramp-pattern sensor, round-tripped through the pipeline and
/// shared memory, produces `data[y*8+x] == (x+y)*0.001` with a valid CRC
/// once enough frames have accumulated for temporal stabilization.
#[test]
fn s1_ramp_pattern_round_trips_through_shared_memory() {
    let mut pipeline_cfg = PipelineConfig::default();
    // The ramp's z-range (0..0.014m) sits well under the default validity
    // band, so widen it enough that every ramp pixel passes the plane gate.
    pipeline_cfg.min_valid_plane = caldera::types::PlaneEquation::new(0.0, 0.0, 1.0, -0.0);
    pipeline_cfg.max_valid_plane = caldera::types::PlaneEquation::new(0.0, 0.0, 1.0, -10.0);
    pipeline_cfg.temporal_min_samples = 10;

    let pipeline = Arc::new(Pipeline::new(pipeline_cfg));
    pipeline.set_transform_parameters(TransformParameters {
        focal_length_x: 1.0,
        focal_length_y: 1.0,
        ..TransformParameters::default()
    });

    let shm_name = "/caldera_scenario_s1";
    let writer = Arc::new(std::sync::Mutex::new(SharedMemoryWriter::new(TransportConfig {
        shm_name: shm_name.to_string(),
        max_width: 8,
        max_height: 8,
        checksum_interval_ms: 0,
    })));
    writer.lock().unwrap().start().unwrap();

    {
        let writer = Arc::clone(&writer);
        pipeline.set_world_frame_handler(Box::new(move |frame: &WorldFrame, _: &FrameMetrics| {
            let _ = writer.lock().unwrap().send_world_frame(frame);
        }));
    }

    let mut sensor = SyntheticSensorDevice::new(SyntheticConfig {
        width: 8,
        height: 8,
        fps: 500.0,
        pattern: Pattern::Ramp,
        sensor_id: "s1".into(),
        ..SyntheticConfig::default()
    });
    sensor.set_stop_after(10);
    {
        let pipeline = Arc::clone(&pipeline);
        sensor.set_frame_handler(Box::new(move |depth: RawDepthFrame, _color| {
            pipeline.process_raw_depth_frame(&depth);
        }));
    }
    sensor.open().unwrap();

    let deadline = Instant::now() + Duration::from_secs(3);
    while sensor.frames_generated() < 10 && Instant::now() < deadline {
        std::thread::sleep(Duration::from_millis(10));
    }
    std::thread::sleep(Duration::from_millis(50));
    sensor.close();

    let mut reader = SharedMemoryReader::new();
    reader.open(shm_name, 8, 8).unwrap();
    let view = reader.latest().expect("frame should be published");
    assert!(view.frame_id >= 9);
    assert_eq!(view.data.len(), 64);
    for y in 0..8usize {
        for x in 0..8usize {
            let expected = ((x + y) as f32) * 0.001;
            let actual = view.data[y * 8 + x];
            assert!((actual - expected).abs() < 1e-4, "pixel ({x},{y}): expected {expected}, got {actual}");
        }
    }
    assert!(view.verify_checksum());
    writer.lock().unwrap().stop();
}

fn frame_with_dims(frame_id: u64, timestamp_ns: u64, width: u32, height: u32, fill: f32) -> WorldFrame {
    let mut hm = HeightMap::new(width, height);
    hm.data.iter_mut().for_each(|v| *v = fill);
    WorldFrame { frame_id, timestamp_ns, height_map: hm, checksum: 0 }
}

/// S2: capacity overflow — an oversized frame between two in-capacity ones
/// is dropped without disturbing their `frame_id`/`timestamp_ns` bookkeeping.
#[test]
fn s2_capacity_overflow_drops_middle_frame_only() {
    let name = "/caldera_scenario_s2";
    let mut writer = SharedMemoryWriter::new(TransportConfig {
        shm_name: name.to_string(),
        max_width: 8,
        max_height: 8,
        checksum_interval_ms: 0,
    });
    writer.start().unwrap();

    assert_eq!(writer.send_world_frame(&frame_with_dims(0, 0, 8, 8, 1.0)).unwrap(), SendOutcome::Published);
    assert_eq!(writer.send_world_frame(&frame_with_dims(1, 1, 16, 8, 2.0)).unwrap(), SendOutcome::DroppedOversized);
    assert_eq!(writer.send_world_frame(&frame_with_dims(2, 3, 8, 8, 3.0)).unwrap(), SendOutcome::Published);

    let mut reader = SharedMemoryReader::new();
    reader.open(name, 8, 8).unwrap();
    let view = reader.latest().unwrap();
    assert_eq!(view.frame_id, 2);
    assert_eq!(view.timestamp_ns, 3);
    writer.stop();
}

/// S3: a reader's `open` fails against a segment whose version word has been
/// corrupted after a frame was already published.
#[test]
fn s3_version_corruption_is_rejected_by_a_fresh_reader() {
    let name = "/caldera_scenario_s3";
    let mut writer = SharedMemoryWriter::new(TransportConfig {
        shm_name: name.to_string(),
        max_width: 4,
        max_height: 4,
        checksum_interval_ms: 0,
    });
    writer.start().unwrap();
    writer.send_world_frame(&frame_with_dims(0, 0, 2, 2, 1.0)).unwrap();

    // Corrupt the version word (offset 4) externally, the way a misbehaving
    // writer process or bit flip would.
    let fd = nix::sys::mman::shm_open(name, nix::fcntl::OFlag::O_RDWR, nix::sys::stat::Mode::empty()).unwrap();
    let file = std::fs::File::from(fd);
    let mut mmap = unsafe { memmap2::MmapMut::map_mut(&file).unwrap() };
    mmap[4..8].copy_from_slice(&999u32.to_ne_bytes());

    let mut reader = SharedMemoryReader::new();
    assert!(reader.open(name, 4, 4).is_err());
    writer.stop();
}

/// S4: the plane gate admits only the middle of a three-value row whose
/// scaled depths straddle the validity band.
#[test]
fn s4_plane_gate_admits_only_the_middle_pixel() {
    let mut cfg = PipelineConfig::default();
    cfg.min_valid_plane = caldera::types::PlaneEquation::new(0.0, 0.0, 1.0, -1.0); // z >= 1.0
    cfg.max_valid_plane = caldera::types::PlaneEquation::new(0.0, 0.0, 1.0, -1.5); // z <= 1.5
    cfg.depth_scale = 0.001;

    let pipeline = Pipeline::new(cfg);
    let mut raw = RawDepthFrame::new("s4", 0, 3, 1);
    raw.data = vec![900, 1000, 1600];
    pipeline.process_raw_depth_frame(&raw);

    let summary = pipeline.last_validation_summary();
    assert_eq!(summary.valid, 1, "only the 1000 raw-value pixel (z=1.0) should pass");
    assert_eq!(summary.invalid, 2);
}

/// S6: dropping every 5th of 100 emitted cycles yields exactly 80 delivered
/// frames and 20 dropped, with delivered pipeline `frame_id`s dense from 0.
#[test]
fn s6_drop_every_fifth_frame_yields_eighty_delivered() {
    let pipeline = Arc::new(Pipeline::new(PipelineConfig::default()));
    let (tx, rx) = mpsc::channel();
    pipeline.set_world_frame_handler(Box::new(move |f: &WorldFrame, _: &FrameMetrics| {
        let _ = tx.send(f.frame_id);
    }));

    let mut sensor = SyntheticSensorDevice::new(SyntheticConfig {
        width: 1,
        height: 1,
        fps: 2000.0,
        ..SyntheticConfig::default()
    });
    sensor.configure_fault_injection(FaultInjectionConfig {
        drop_every_n: 5,
        jitter_max_ms: 0,
        seed: 7,
    });
    sensor.set_stop_after(100);

    let delivered = Arc::new(AtomicU64::new(0));
    {
        let pipeline = Arc::clone(&pipeline);
        let delivered = Arc::clone(&delivered);
        sensor.set_frame_handler(Box::new(move |depth: RawDepthFrame, _color| {
            pipeline.process_raw_depth_frame(&depth);
            delivered.fetch_add(1, Ordering::SeqCst);
        }));
    }
    sensor.open().unwrap();

    let deadline = Instant::now() + Duration::from_secs(3);
    while sensor.frames_generated() < 100 && Instant::now() < deadline {
        std::thread::sleep(Duration::from_millis(10));
    }
    std::thread::sleep(Duration::from_millis(50));
    sensor.close();

    let stats = sensor.stats();
    assert_eq!(stats.emitted, 80);
    assert_eq!(stats.dropped, 20);
    assert_eq!(delivered.load(Ordering::SeqCst), 80);

    let ids: Vec<u64> = rx.try_iter().collect();
    assert_eq!(ids, (0..80).collect::<Vec<u64>>());
}
