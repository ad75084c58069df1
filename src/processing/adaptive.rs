//! Adaptive spatial-filtering controller.
//!
//! Classifies the previous frame's stability metrics as "unstable" or
//! "stable" and drives a hysteresis state machine deciding whether the
//! spatial stage runs this frame, and whether it should escalate to a
//! "strong" pass.

use crate::config::{AdaptiveMode, PipelineConfig};

#[derive(Debug, Clone, Copy, Default)]
pub struct AdaptiveDecision {
    pub run_spatial: bool,
    pub strong: bool,
    pub streak: u32,
}

#[derive(Debug, Default)]
pub struct AdaptiveController {
    unstable_streak: u32,
    stable_streak: u32,
    spatial_active: bool,
}

impl AdaptiveController {
    pub fn new() -> Self {
        Self::default()
    }

    /// Update streak state from the previous frame's stability ratio and EMA
    /// variance, and decide whether the spatial stage should run this frame.
    ///
    /// Activation requires `unstable_streak` to exceed `on_streak` — i.e.
    /// the stage first activates on the `(on_streak + 1)`-th consecutive
    /// unstable frame, matching the documented hysteresis behavior.
    /// Deactivation requires `stable_streak` to reach `off_streak`.
    pub fn update(&mut self, cfg: &PipelineConfig, prev_stability_ratio: f32, prev_ema_variance: f32) -> AdaptiveDecision {
        if cfg.adaptive_mode != AdaptiveMode::Adaptive {
            self.unstable_streak = 0;
            self.stable_streak = 0;
            self.spatial_active = false;
            return AdaptiveDecision::default();
        }

        let unstable = prev_stability_ratio < cfg.adaptive_stability_min || prev_ema_variance > cfg.adaptive_variance_max;
        if unstable {
            self.unstable_streak += 1;
            self.stable_streak = 0;
        } else {
            self.stable_streak += 1;
            self.unstable_streak = 0;
        }

        if !self.spatial_active && self.unstable_streak > cfg.adaptive_on_streak {
            self.spatial_active = true;
        }
        if self.spatial_active && self.stable_streak >= cfg.adaptive_off_streak {
            self.spatial_active = false;
        }

        let strong_trigger = prev_ema_variance >= cfg.adaptive_variance_max * cfg.adaptive_strong_var_mult
            || prev_stability_ratio <= cfg.adaptive_strong_stab_frac;

        AdaptiveDecision {
            run_spatial: self.spatial_active,
            strong: self.spatial_active && strong_trigger,
            streak: if self.spatial_active { self.unstable_streak } else { 0 },
        }
    }
}
