//! `build` stage: raw depth samples to a scaled working height map.

use crate::types::RawDepthFrame;

/// `height_map` and `invalid` are resized to `raw.width * raw.height` and
/// filled in place. A raw sample of `0`, or one that scales to a non-finite
/// value, is invalid and emitted as `0.0`. A `raw.data` shorter than
/// `width * height` is tolerated: the missing tail is treated as invalid.
pub fn run(raw: &RawDepthFrame, depth_scale: f32, depth_offset: f32, height_map: &mut Vec<f32>, invalid: &mut Vec<bool>) {
    let pixel_count = (raw.width as usize) * (raw.height as usize);
    height_map.clear();
    height_map.resize(pixel_count, 0.0);
    invalid.clear();
    invalid.resize(pixel_count, true);

    for i in 0..pixel_count {
        let Some(&raw_value) = raw.data.get(i) else {
            continue;
        };
        if raw_value == 0 {
            continue;
        }
        let height = raw_value as f32 * depth_scale + depth_offset;
        if !height.is_finite() {
            continue;
        }
        height_map[i] = height;
        invalid[i] = false;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scales_raw_samples_and_flags_zero_as_invalid() {
        let mut raw = RawDepthFrame::new("s", 0, 2, 1);
        raw.data = vec![0, 1000];
        let mut hm = Vec::new();
        let mut inv = Vec::new();
        run(&raw, 0.001, 0.0, &mut hm, &mut inv);
        assert_eq!(hm, vec![0.0, 1.0]);
        assert_eq!(inv, vec![true, false]);
    }

    #[test]
    fn short_data_tail_is_invalid() {
        let mut raw = RawDepthFrame::new("s", 0, 2, 2);
        raw.data = vec![1000, 2000];
        let mut hm = Vec::new();
        let mut inv = Vec::new();
        run(&raw, 0.001, 0.0, &mut hm, &mut inv);
        assert_eq!(hm.len(), 4);
        assert_eq!(inv, vec![false, false, true, true]);
    }
}
