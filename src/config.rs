//! Single source of runtime configuration.
//!
//! The original implementation read many individual `getenv` calls scattered
//! through the processing manager, transport server, and control plane. Per
//! the re-architecture notes, all tunables are collected here into one
//! `Config`, read from the environment exactly once at construction and then
//! passed down into the components that need it.

use crate::types::PlaneEquation;
use std::env;

/// Pipeline stage tuning. Field names match the `CALDERA_*` options listed
/// in the configuration surface.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// Stage spec string; falls back to the canonical stage list on parse
    /// failure.
    pub pipeline_spec: String,
    pub depth_scale: f32,
    pub depth_offset: f32,
    pub min_valid_plane: PlaneEquation,
    pub max_valid_plane: PlaneEquation,

    pub temporal_slots: u32,
    pub temporal_min_samples: u32,
    pub temporal_max_variance: f32,
    pub temporal_hysteresis: f32,
    pub temporal_retain_valids: bool,
    pub temporal_instable_value: f32,

    pub spatial_kernel: SpatialKernel,
    pub spatial_when: SpatialWhen,
    pub spatial_strong_kernel: SpatialKernel,
    pub spatial_sample_count: u32,

    pub adaptive_mode: AdaptiveMode,
    pub adaptive_stability_min: f32,
    pub adaptive_variance_max: f32,
    pub adaptive_on_streak: u32,
    pub adaptive_off_streak: u32,
    pub adaptive_strong_var_mult: f32,
    pub adaptive_strong_stab_frac: f32,
    pub adaptive_strong_double_pass: bool,
    pub adaptive_temporal_scale: f32,

    pub confidence_enabled: bool,
    pub confidence_weights: (f32, f32, f32),
    pub confidence_low: f32,
    pub confidence_high: f32,

    pub fusion_duplicate_layer: bool,
    pub fusion_duplicate_shift: f32,
    pub fusion_duplicate_base_conf: f32,
    pub fusion_duplicate_dup_conf: f32,

    pub stability_metrics_enabled: bool,
    pub confidence_export_enabled: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SpatialKernel {
    Classic,
    ClassicDouble,
    Wide5,
    FastGauss,
}

impl SpatialKernel {
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_ascii_lowercase().as_str() {
            "classic" => Some(Self::Classic),
            "classic_double" => Some(Self::ClassicDouble),
            "wide5" => Some(Self::Wide5),
            "fastgauss" => Some(Self::FastGauss),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SpatialWhen {
    Always,
    Never,
    Adaptive,
    AdaptiveStrong,
}

impl SpatialWhen {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "always" => Some(Self::Always),
            "never" => Some(Self::Never),
            "adaptive" => Some(Self::Adaptive),
            "adaptiveStrong" => Some(Self::AdaptiveStrong),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AdaptiveMode {
    Off,
    Static,
    Adaptive,
}

impl AdaptiveMode {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "off" => Some(Self::Off),
            "static" => Some(Self::Static),
            "adaptive" => Some(Self::Adaptive),
            _ => None,
        }
    }
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            pipeline_spec: "build,plane_validate,temporal,spatial,fusion,confidence".to_string(),
            depth_scale: 0.001,
            depth_offset: 0.0,
            min_valid_plane: PlaneEquation::new(0.0, 0.0, 1.0, -0.5),
            max_valid_plane: PlaneEquation::new(0.0, 0.0, 1.0, -2.0),

            temporal_slots: 30,
            temporal_min_samples: 10,
            temporal_max_variance: 1_000_000.0,
            temporal_hysteresis: 500.0,
            temporal_retain_valids: true,
            temporal_instable_value: 0.0,

            spatial_kernel: SpatialKernel::Classic,
            spatial_when: SpatialWhen::Adaptive,
            spatial_strong_kernel: SpatialKernel::ClassicDouble,
            spatial_sample_count: 0,

            adaptive_mode: AdaptiveMode::Off,
            adaptive_stability_min: 0.85,
            adaptive_variance_max: 0.02,
            adaptive_on_streak: 2,
            adaptive_off_streak: 3,
            adaptive_strong_var_mult: 2.0,
            adaptive_strong_stab_frac: 0.75,
            adaptive_strong_double_pass: true,
            adaptive_temporal_scale: 1.0,

            confidence_enabled: false,
            confidence_weights: (0.6, 0.25, 0.15),
            confidence_low: 0.3,
            confidence_high: 0.8,

            fusion_duplicate_layer: false,
            fusion_duplicate_shift: 0.02,
            fusion_duplicate_base_conf: 0.9,
            fusion_duplicate_dup_conf: 0.5,

            stability_metrics_enabled: false,
            confidence_export_enabled: false,
        }
    }
}

/// Shared-memory transport tuning.
#[derive(Debug, Clone)]
pub struct TransportConfig {
    pub shm_name: String,
    pub max_width: u32,
    pub max_height: u32,
    pub checksum_interval_ms: u64,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            shm_name: "/caldera_shm".to_string(),
            max_width: 512,
            max_height: 512,
            checksum_interval_ms: 0,
        }
    }
}

/// Control-plane (handshake/heartbeat/stats) tuning.
#[derive(Debug, Clone)]
pub struct ControlConfig {
    pub pipe_s2c: String,
    pub pipe_c2s: String,
    pub handshake_timeout_ms: u64,
    pub max_json_field_len: usize,
    pub heartbeat_log_throttle_ms: u64,
    pub server_stats_interval_ms: u64,
    pub max_sessions: u32,
}

impl Default for ControlConfig {
    fn default() -> Self {
        Self {
            pipe_s2c: "/tmp/caldera_s2c".to_string(),
            pipe_c2s: "/tmp/caldera_c2s".to_string(),
            handshake_timeout_ms: 3000,
            max_json_field_len: 1024,
            heartbeat_log_throttle_ms: 2000,
            server_stats_interval_ms: 1000,
            max_sessions: u32::MAX,
        }
    }
}

/// Aggregate configuration for one backend instance.
#[derive(Debug, Clone, Default)]
pub struct Config {
    pub pipeline: PipelineConfig,
    pub transport: TransportConfig,
    pub control: ControlConfig,
}

impl Config {
    /// Populate from the environment, once. Unset variables keep their
    /// default. This is the only place the process reads `CALDERA_*`
    /// environment variables — components never call `getenv` themselves.
    pub fn from_env() -> Self {
        let mut cfg = Config::default();

        if let Ok(v) = env::var("CALDERA_PIPELINE_SPEC") {
            cfg.pipeline.pipeline_spec = v;
        }
        if let Some(v) = env_f32("CALDERA_DEPTH_SCALE") {
            cfg.pipeline.depth_scale = v;
        }
        if let Some(v) = env_f32("CALDERA_DEPTH_OFFSET") {
            cfg.pipeline.depth_offset = v;
        }
        if let Some(v) = env_u32("CALDERA_TEMPORAL_SLOTS") {
            cfg.pipeline.temporal_slots = v;
        }
        if let Some(v) = env_u32("CALDERA_TEMPORAL_MIN_SAMPLES") {
            cfg.pipeline.temporal_min_samples = v;
        }
        if let Some(v) = env_f32("CALDERA_TEMPORAL_MAX_VARIANCE") {
            cfg.pipeline.temporal_max_variance = v;
        }
        if let Some(v) = env_f32("CALDERA_TEMPORAL_HYSTERESIS") {
            cfg.pipeline.temporal_hysteresis = v;
        }
        if let Ok(v) = env::var("CALDERA_SPATIAL_KERNEL") {
            if let Some(k) = SpatialKernel::parse(&v) {
                cfg.pipeline.spatial_kernel = k;
            }
        }
        if let Ok(v) = env::var("CALDERA_SPATIAL_WHEN") {
            if let Some(w) = SpatialWhen::parse(&v) {
                cfg.pipeline.spatial_when = w;
            }
        }
        if let Ok(v) = env::var("CALDERA_ADAPTIVE_MODE") {
            if let Some(m) = AdaptiveMode::parse(&v) {
                cfg.pipeline.adaptive_mode = m;
            }
        }
        if let Ok(v) = env::var("CALDERA_CONFIDENCE_ENABLED") {
            cfg.pipeline.confidence_enabled = parse_bool(&v);
        }
        if let Ok(v) = env::var("CALDERA_SHM_NAME") {
            cfg.transport.shm_name = v;
        }
        if let Some(v) = env_u32("CALDERA_MAX_WIDTH") {
            cfg.transport.max_width = v;
        }
        if let Some(v) = env_u32("CALDERA_MAX_HEIGHT") {
            cfg.transport.max_height = v;
        }
        if let Some(v) = env_u64("CALDERA_CHECKSUM_INTERVAL_MS") {
            cfg.transport.checksum_interval_ms = v;
        }
        if let Ok(v) = env::var("CALDERA_PIPE_S2C") {
            cfg.control.pipe_s2c = v;
        }
        if let Ok(v) = env::var("CALDERA_PIPE_C2S") {
            cfg.control.pipe_c2s = v;
        }
        if let Some(v) = env_u64("CALDERA_HANDSHAKE_TIMEOUT_MS") {
            cfg.control.handshake_timeout_ms = v;
        }
        if let Some(v) = env_u64("CALDERA_SERVER_STATS_INTERVAL_MS") {
            cfg.control.server_stats_interval_ms = v;
        }

        cfg
    }
}

fn env_f32(name: &str) -> Option<f32> {
    env::var(name).ok().and_then(|v| v.parse().ok())
}

fn env_u32(name: &str) -> Option<u32> {
    env::var(name).ok().and_then(|v| v.parse().ok())
}

fn env_u64(name: &str) -> Option<u64> {
    env::var(name).ok().and_then(|v| v.parse().ok())
}

fn parse_bool(v: &str) -> bool {
    matches!(v, "1" | "true" | "TRUE" | "yes")
}
