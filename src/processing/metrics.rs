//! Per-frame instrumentation emitted alongside each [`WorldFrame`](crate::types::WorldFrame).
//!
//! Mirrors the original processing manager's stability-metrics struct
//! field-for-field; design-level only, not part of the wire format.

/// Validity accounting for one frame: `valid + invalid == width * height`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FrameValidationSummary {
    pub valid: u32,
    pub invalid: u32,
}

#[derive(Debug, Clone, Default)]
pub struct FrameMetrics {
    pub frame_id: u64,
    pub width: u32,
    pub height: u32,
    /// Pixels invalidated by geometric (plane) validation, as opposed to raw
    /// sensor invalidity.
    pub hard_invalid: u32,
    pub stability_ratio: f32,
    /// Running exponential moving average of the per-pixel variance proxy.
    pub avg_variance: f32,
    pub proc_total_ms: f32,
    pub build_ms: f32,
    pub filter_ms: f32,
    pub fuse_ms: f32,
    pub adaptive_spatial: bool,
    pub adaptive_strong: bool,
    pub adaptive_streak: u32,
    pub spatial_variance_ratio: f32,
    pub spatial_edge_preservation_ratio: f32,
    pub adaptive_temporal_blend: bool,
    pub mean_confidence: f32,
    pub fraction_low_confidence: f32,
    pub fraction_high_confidence: f32,
}
