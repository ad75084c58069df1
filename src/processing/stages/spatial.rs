//! `spatial` stage: edge-preserving smoothing, gated by the adaptive
//! controller and run only over valid pixels.

use crate::config::SpatialKernel;

#[derive(Debug, Clone, Copy, Default)]
pub struct SpatialMetrics {
    pub sampled: bool,
    pub pre_variance: f32,
    pub post_variance: f32,
    pub pre_edge_energy: f32,
    pub post_edge_energy: f32,
}

impl SpatialMetrics {
    /// `post_variance / pre_variance`; `1.0` when not sampled, matching the
    /// "no spatial pass" default used by the confidence stage.
    pub fn variance_ratio(&self) -> f32 {
        if !self.sampled || self.pre_variance <= f32::EPSILON {
            1.0
        } else {
            self.post_variance / self.pre_variance
        }
    }

    pub fn edge_preservation_ratio(&self) -> f32 {
        if !self.sampled || self.pre_edge_energy <= f32::EPSILON {
            1.0
        } else {
            self.post_edge_energy / self.pre_edge_energy
        }
    }
}

/// Smooth `height_map` in place. `strong` requests an escalated pass: for
/// [`SpatialKernel::ClassicDouble`] this means a second box pass; for other
/// kernels the caller is expected to have already substituted the
/// configured strong kernel.
pub fn run(height_map: &mut [f32], invalid: &[bool], width: u32, height: u32, kernel: SpatialKernel, sample_count: u32) -> SpatialMetrics {
    let mut metrics = SpatialMetrics::default();
    if sample_count > 0 {
        metrics.sampled = true;
        let (var, edge) = sample_stats(height_map, invalid, width, height, sample_count);
        metrics.pre_variance = var;
        metrics.pre_edge_energy = edge;
    }

    let radius = match kernel {
        SpatialKernel::Classic | SpatialKernel::FastGauss => 1,
        SpatialKernel::Wide5 => 2,
        SpatialKernel::ClassicDouble => 1,
    };
    box_blur_valid(height_map, invalid, width, height, radius);
    if kernel == SpatialKernel::ClassicDouble {
        box_blur_valid(height_map, invalid, width, height, radius);
    }

    if sample_count > 0 {
        let (var, edge) = sample_stats(height_map, invalid, width, height, sample_count);
        metrics.post_variance = var;
        metrics.post_edge_energy = edge;
    }

    metrics
}

fn box_blur_valid(height_map: &mut [f32], invalid: &[bool], width: u32, height: u32, radius: i64) {
    let (w, h) = (width as i64, height as i64);
    let src = height_map.to_vec();

    for y in 0..h {
        for x in 0..w {
            let idx = (y * w + x) as usize;
            if invalid[idx] {
                continue;
            }
            let mut sum = 0.0f32;
            let mut count = 0u32;
            for dy in -radius..=radius {
                for dx in -radius..=radius {
                    let (nx, ny) = (x + dx, y + dy);
                    if nx < 0 || ny < 0 || nx >= w || ny >= h {
                        continue;
                    }
                    let nidx = (ny * w + nx) as usize;
                    if invalid[nidx] {
                        continue;
                    }
                    sum += src[nidx];
                    count += 1;
                }
            }
            if count > 0 {
                height_map[idx] = sum / count as f32;
            }
        }
    }
}

fn sample_stats(height_map: &[f32], invalid: &[bool], width: u32, height: u32, sample_count: u32) -> (f32, f32) {
    let w = width as usize;
    let total = height_map.len();
    let stride = (total / sample_count.max(1) as usize).max(1);

    let mut values = Vec::new();
    let mut gradients = Vec::new();
    let mut i = 0;
    while i < total && values.len() < sample_count as usize {
        if !invalid[i] {
            values.push(height_map[i]);
            if w > 0 && i + 1 < total && (i + 1) % w != 0 && !invalid[i + 1] {
                gradients.push((height_map[i + 1] - height_map[i]).abs());
            }
        }
        i += stride;
    }

    let variance = variance_of(&values);
    let edge_energy: f32 = gradients.iter().sum();
    (variance, edge_energy)
}

fn variance_of(values: &[f32]) -> f32 {
    if values.len() < 2 {
        return 0.0;
    }
    let mean = values.iter().sum::<f32>() / values.len() as f32;
    values.iter().map(|v| (v - mean).powi(2)).sum::<f32>() / values.len() as f32
}
