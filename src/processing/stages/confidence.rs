//! `confidence` stage: per-pixel confidence as a weighted blend of
//! stability, spatial-variance-reduction, and temporal-consistency proxies.

#[derive(Debug, Clone, Default)]
pub struct ConfidenceResult {
    pub map: Vec<f32>,
    pub mean: f32,
    pub fraction_low: f32,
    pub fraction_high: f32,
}

pub struct StageParams {
    pub weights: (f32, f32, f32),
    pub low_threshold: f32,
    pub high_threshold: f32,
}

/// `stability` is the temporal stage's per-pixel stable flag (`S`).
/// `spatial_variance_ratio` is the scalar `R` proxy from the spatial stage's
/// sampled metrics (`1.0` when no spatial pass ran this frame).
/// `previous_height_map`, when present, drives the per-pixel temporal
/// consistency proxy `T`.
pub fn run(
    height_map: &[f32],
    invalid: &[bool],
    stability: &[bool],
    spatial_variance_ratio: f32,
    previous_height_map: Option<&[f32]>,
    params: &StageParams,
) -> ConfidenceResult {
    let n = height_map.len();
    let mut map = vec![0.0f32; n];
    let (w_s, w_r, w_t) = params.weights;
    // R is a frame-global proxy: a ratio below 1 (variance reduced) maps to
    // a higher confidence contribution than a ratio at or above 1.
    let r = (2.0 - spatial_variance_ratio.clamp(0.0, 2.0)).clamp(0.0, 1.0);

    let mut sum = 0.0f64;
    let mut low = 0u32;
    let mut high = 0u32;
    let mut valid_count = 0u32;

    for i in 0..n {
        if invalid[i] {
            map[i] = 0.0;
            continue;
        }
        let s = if stability[i] { 1.0 } else { 0.0 };
        let t = previous_height_map
            .map(|prev| {
                let diff = (height_map[i] - prev[i]).abs();
                (1.0 - diff.min(1.0)).clamp(0.0, 1.0)
            })
            .unwrap_or(1.0);

        let conf = (w_s * s + w_r * r + w_t * t).clamp(0.0, 1.0);
        map[i] = conf;
        sum += conf as f64;
        valid_count += 1;
        if conf < params.low_threshold {
            low += 1;
        }
        if conf > params.high_threshold {
            high += 1;
        }
    }

    let mean = if valid_count > 0 { (sum / valid_count as f64) as f32 } else { 0.0 };
    let fraction_low = if valid_count > 0 { low as f32 / valid_count as f32 } else { 0.0 };
    let fraction_high = if valid_count > 0 { high as f32 / valid_count as f32 } else { 0.0 };

    ConfidenceResult {
        map,
        mean,
        fraction_low,
        fraction_high,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params() -> StageParams {
        StageParams {
            weights: (0.6, 0.25, 0.15),
            low_threshold: 0.3,
            high_threshold: 0.8,
        }
    }

    #[test]
    fn invalid_pixels_are_forced_to_zero() {
        let hm = vec![1.0, 1.0];
        let invalid = vec![true, false];
        let stability = vec![true, true];
        let result = run(&hm, &invalid, &stability, 1.0, None, &params());
        assert_eq!(result.map[0], 0.0);
        assert!(result.map[1] > 0.0);
    }

    #[test]
    fn fully_stable_no_spatial_no_history_hits_ceiling_weight() {
        let hm = vec![1.0];
        let invalid = vec![false];
        let stability = vec![true];
        let result = run(&hm, &invalid, &stability, 1.0, None, &params());
        // s=1, r=1 (ratio==1.0 -> r=1), t=1 (no history -> assumed consistent)
        assert!((result.map[0] - 1.0).abs() < 1e-5);
    }

    #[test]
    fn unstable_pixel_scores_lower_than_stable() {
        let hm = vec![1.0, 1.0];
        let invalid = vec![false, false];
        let stability = vec![true, false];
        let result = run(&hm, &invalid, &stability, 1.0, None, &params());
        assert!(result.map[0] > result.map[1]);
    }
}
