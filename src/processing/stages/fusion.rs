//! `fusion` stage: merges one or more layer height maps and per-layer
//! confidences into the final output.
//!
//! The default single-layer case is a pass-through. The duplicated-layer
//! mode is a development/diagnostic tool (under-specified upstream): it
//! synthesizes a second layer shifted by a configurable offset and combines
//! both layers by a confidence-weighted average.

pub struct DuplicateLayerParams {
    pub shift: f32,
    pub base_confidence: f32,
    pub duplicate_confidence: f32,
}

/// Runs fusion in place over `height_map`. When `duplicate` is `Some`, a
/// synthetic second layer is blended in per invalid-aware, confidence
/// weighted averaging; invalid pixels are left at `0.0` and excluded.
pub fn run(height_map: &mut [f32], invalid: &[bool], duplicate: Option<&DuplicateLayerParams>) {
    let Some(params) = duplicate else {
        return;
    };

    for (i, value) in height_map.iter_mut().enumerate() {
        if invalid[i] {
            continue;
        }
        let base = *value;
        let dup = base + params.shift;
        let total_conf = params.base_confidence + params.duplicate_confidence;
        *value = if total_conf > f32::EPSILON {
            (base * params.base_confidence + dup * params.duplicate_confidence) / total_conf
        } else {
            base
        };
    }
}
