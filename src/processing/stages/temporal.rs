//! `temporal` stage: per-pixel multi-frame stabilization with hysteresis.
//!
//! Grounded on the original backend's `TemporalFilter`: samples are tracked
//! in a fixed-width circular buffer so old contributions can be subtracted
//! out of the running sum/sum-of-squares exactly, and internal statistics
//! are kept in integer millimeter units (`HEIGHT_SCALE`) to match its
//! variance/hysteresis thresholds, which are expressed in those units.

const HEIGHT_SCALE: f32 = 1000.0;
const INVALID_SLOT: u16 = u16::MAX;
const MAX_BUFFER_MM: u16 = u16::MAX - 1;

#[derive(Debug, Clone, Copy, Default)]
struct PixelStats {
    num_samples: u32,
    sum_samples: u64,
    sum_squares: u64,
    last_valid_value: f32,
    is_stable: bool,
    has_valid_value: bool,
}

impl PixelStats {
    fn mean_mm(&self) -> f32 {
        if self.num_samples == 0 {
            0.0
        } else {
            self.sum_samples as f32 / self.num_samples as f32
        }
    }

    fn variance_mm2(&self) -> f32 {
        if self.num_samples <= 1 {
            return f32::MAX;
        }
        let mean = self.sum_samples as f64 / self.num_samples as f64;
        let variance = (self.sum_squares as f64 / self.num_samples as f64) - mean * mean;
        variance.max(0.0) as f32
    }
}

/// Owned temporal-stage state for one pipeline instance, resized whenever
/// frame dimensions change.
#[derive(Debug, Default)]
pub struct TemporalState {
    width: u32,
    height: u32,
    slots: u32,
    slot_index: u32,
    buffer: Vec<u16>,
    stats: Vec<PixelStats>,
}

pub struct StageParams {
    pub slots: u32,
    pub min_samples: u32,
    pub max_variance: f32,
    pub hysteresis: f32,
    pub retain_valids: bool,
    pub instable_value: f32,
}

impl TemporalState {
    fn ensure_sized(&mut self, width: u32, height: u32, slots: u32) {
        if self.width == width && self.height == height && self.slots == slots {
            return;
        }
        self.width = width;
        self.height = height;
        self.slots = slots.max(1);
        let pixel_count = (width as usize) * (height as usize);
        self.buffer = vec![INVALID_SLOT; pixel_count * self.slots as usize];
        self.stats = vec![PixelStats::default(); pixel_count];
        self.slot_index = 0;
    }

    /// Per-pixel stability flags from the most recent call to [`run`].
    pub fn stability_mask(&self) -> Vec<bool> {
        self.stats.iter().map(|s| s.is_stable).collect()
    }

    /// Current average variance across pixels with more than one sample, in
    /// meters-squared, for the adaptive controller's EMA input.
    pub fn average_variance_meters(&self) -> f32 {
        let mut total = 0.0f64;
        let mut count = 0u32;
        for stat in &self.stats {
            if stat.num_samples > 1 {
                total += stat.variance_mm2() as f64;
                count += 1;
            }
        }
        if count == 0 {
            0.0
        } else {
            ((total / count as f64) as f32) / (HEIGHT_SCALE * HEIGHT_SCALE)
        }
    }
}

/// Runs the temporal stage in place over `height_map`. `invalid[i] == true`
/// pixels bypass filtering entirely and inherit the previous stable value
/// (or stay invalid if none exists yet).
///
/// Returns the count of pixels classified stable this frame, for the
/// caller's stability-ratio bookkeeping.
pub fn run(state: &mut TemporalState, height_map: &mut [f32], invalid: &mut [bool], width: u32, height: u32, params: &StageParams) -> u32 {
    state.ensure_sized(width, height, params.slots);
    let pixel_count = (width as usize) * (height as usize);
    let slots = state.slots as usize;
    let mut stable_count = 0u32;

    for i in 0..pixel_count {
        if invalid[i] {
            let stats = &state.stats[i];
            if stats.has_valid_value {
                height_map[i] = stats.last_valid_value;
                invalid[i] = false;
            }
            continue;
        }

        let buffer_idx = i + (state.slot_index as usize) * pixel_count;
        let old_slot = state.buffer[buffer_idx];
        let new_mm = height_to_buffer(height_map[i]);
        state.buffer[buffer_idx] = new_mm;

        let stats = &mut state.stats[i];
        stats.num_samples += 1;
        stats.sum_samples += new_mm as u64;
        stats.sum_squares += (new_mm as u64) * (new_mm as u64);
        if old_slot != INVALID_SLOT {
            stats.num_samples = stats.num_samples.saturating_sub(1);
            stats.sum_samples = stats.sum_samples.saturating_sub(old_slot as u64);
            stats.sum_squares = stats.sum_squares.saturating_sub((old_slot as u64) * (old_slot as u64));
        }
        if stats.num_samples == 0 {
            stats.sum_samples = 0;
            stats.sum_squares = 0;
        }

        let is_stable = stats.num_samples >= params.min_samples && stats.variance_mm2() <= params.max_variance;
        if is_stable {
            let candidate_mm = stats.mean_mm();
            let last_mm = stats.last_valid_value * HEIGHT_SCALE;
            let output_mm = if !stats.has_valid_value || (candidate_mm - last_mm).abs() >= params.hysteresis {
                candidate_mm
            } else {
                last_mm
            };
            let output = buffer_to_height(output_mm);
            height_map[i] = output;
            stats.last_valid_value = output;
            stats.has_valid_value = true;
            stats.is_stable = true;
            stable_count += 1;
        } else {
            stats.is_stable = false;
            if params.retain_valids && stats.has_valid_value {
                height_map[i] = stats.last_valid_value;
            } else {
                height_map[i] = params.instable_value;
            }
        }
    }

    state.slot_index = (state.slot_index + 1) % slots as u32;
    stable_count
}

fn height_to_buffer(height_m: f32) -> u16 {
    let mm = height_m * HEIGHT_SCALE;
    if mm < 0.0 {
        0
    } else if mm >= MAX_BUFFER_MM as f32 {
        MAX_BUFFER_MM
    } else {
        mm as u16
    }
}

fn buffer_to_height(mm: f32) -> f32 {
    mm / HEIGHT_SCALE
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params() -> StageParams {
        StageParams {
            slots: 30,
            min_samples: 10,
            max_variance: 1_000_000.0,
            hysteresis: 500.0,
            retain_valids: true,
            instable_value: 0.0,
        }
    }

    #[test]
    fn identical_frames_converge_to_input_value() {
        let mut state = TemporalState::default();
        let p = params();
        let mut last_output = 0.0;
        for _ in 0..15 {
            let mut hm = vec![1.234f32];
            let mut inv = vec![false];
            run(&mut state, &mut hm, &mut inv, 1, 1, &p);
            last_output = hm[0];
        }
        assert!((last_output - 1.234).abs() < 0.001, "got {last_output}");
    }

    #[test]
    fn hysteresis_suppresses_small_changes_once_stable() {
        let mut state = TemporalState::default();
        let p = params();
        for _ in 0..15 {
            let mut hm = vec![1.000f32];
            let mut inv = vec![false];
            run(&mut state, &mut hm, &mut inv, 1, 1, &p);
        }
        // A change smaller than the 500mm hysteresis threshold should not move the output.
        let mut hm = vec![1.100f32];
        let mut inv = vec![false];
        run(&mut state, &mut hm, &mut inv, 1, 1, &p);
        assert!((hm[0] - 1.000).abs() < 0.001);
    }

    #[test]
    fn invalid_pixel_inherits_previous_stable_value() {
        let mut state = TemporalState::default();
        let p = params();
        for _ in 0..15 {
            let mut hm = vec![2.0f32];
            let mut inv = vec![false];
            run(&mut state, &mut hm, &mut inv, 1, 1, &p);
        }
        let mut hm = vec![0.0f32];
        let mut inv = vec![true];
        run(&mut state, &mut hm, &mut inv, 1, 1, &p);
        assert!((hm[0] - 2.0).abs() < 0.001);
        assert!(!inv[0]);
    }
}
