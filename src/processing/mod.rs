//! The processing pipeline: stage graph, adaptive control, and per-frame
//! metrics.
//!
//! One [`Pipeline`] instance owns all per-instance mutable state (working
//! buffers, temporal/adaptive state, metrics) behind a single coarse mutex,
//! matching the upstream design: the entire per-frame transformation is one
//! critical section, so multiple sensor threads feeding one pipeline are
//! safe without finer-grained locking.

pub mod adaptive;
pub mod metrics;
pub mod parser;
pub mod stages;

use std::sync::Mutex;
use std::time::Instant;

use anyhow::Result;
use tracing::warn;

use crate::config::{AdaptiveMode, PipelineConfig, SpatialKernel, SpatialWhen};
use crate::logging::targets;
use crate::types::{HeightMap, RawDepthFrame, TransformParameters, WorldFrame};

use adaptive::AdaptiveController;
use metrics::{FrameMetrics, FrameValidationSummary};
use parser::StageSpec;
use stages::temporal::TemporalState;

/// Receives each [`WorldFrame`] the pipeline emits, in strict `frame_id`
/// order. Runs on the thread that called [`Pipeline::process_raw_depth_frame`].
pub trait WorldFrameHandler: Send {
    fn on_world_frame(&mut self, frame: &WorldFrame, metrics: &FrameMetrics);
}

impl<F> WorldFrameHandler for F
where
    F: FnMut(&WorldFrame, &FrameMetrics) + Send,
{
    fn on_world_frame(&mut self, frame: &WorldFrame, metrics: &FrameMetrics) {
        self(frame, metrics)
    }
}

struct State {
    frame_counter: u64,
    width: u32,
    height: u32,
    height_map: Vec<f32>,
    invalid: Vec<bool>,
    temporal: TemporalState,
    adaptive: AdaptiveController,
    ema_variance: f32,
    prev_stability_ratio: f32,
    prev_filtered_height: Vec<f32>,
    prev_filtered_valid: bool,
    confidence_map: Vec<f32>,
    transform: TransformParameters,
    last_validation: FrameValidationSummary,
    last_metrics: FrameMetrics,
    /// Adaptive decision computed by the spatial stage, carried forward so
    /// the *next* frame's temporal stage can apply `adaptive_temporal_scale`
    /// — the spatial stage runs after temporal within a frame, so a
    /// decision made this frame can only affect the following one.
    last_adaptive_decision: adaptive::AdaptiveDecision,
}

impl State {
    fn new() -> Self {
        Self {
            frame_counter: 0,
            width: 0,
            height: 0,
            height_map: Vec::new(),
            invalid: Vec::new(),
            temporal: TemporalState::default(),
            adaptive: AdaptiveController::new(),
            ema_variance: 0.0,
            prev_stability_ratio: 1.0,
            prev_filtered_height: Vec::new(),
            prev_filtered_valid: false,
            confidence_map: Vec::new(),
            transform: TransformParameters::default(),
            last_validation: FrameValidationSummary::default(),
            last_metrics: FrameMetrics::default(),
            last_adaptive_decision: adaptive::AdaptiveDecision::default(),
        }
    }
}

/// A configured, stateful per-frame transformation from raw depth to world
/// frames.
pub struct Pipeline {
    config: PipelineConfig,
    stages: Vec<StageSpec>,
    state: Mutex<State>,
    handler: Mutex<Option<Box<dyn WorldFrameHandler>>>,
}

impl Pipeline {
    pub fn new(config: PipelineConfig) -> Self {
        let stages = match parser::parse_pipeline_spec(&config.pipeline_spec) {
            Ok(stages) => stages,
            Err(err) => {
                warn!(target: targets::PROC_ORCH, error = %err, "pipeline spec parse failed, falling back to canonical stage list");
                parser::ensure_build_first(parser::canonical_stages())
            }
        };
        Self {
            config,
            stages,
            state: Mutex::new(State::new()),
            handler: Mutex::new(None),
        }
    }

    pub fn set_world_frame_handler(&self, handler: Box<dyn WorldFrameHandler>) {
        *self.handler.lock().unwrap() = Some(handler);
    }

    pub fn set_transform_parameters(&self, params: TransformParameters) {
        self.state.lock().unwrap().transform = params;
    }

    pub fn last_validation_summary(&self) -> FrameValidationSummary {
        self.state.lock().unwrap().last_validation
    }

    pub fn last_metrics(&self) -> FrameMetrics {
        self.state.lock().unwrap().last_metrics.clone()
    }

    /// Transform one raw depth frame into a world frame and dispatch it to
    /// the registered handler. `width`/`height` of zero produce an empty
    /// frame with `frame_id` still advanced; no input condition returns an
    /// error here — resource-level failures are reported elsewhere (the
    /// transport/sensor layers), not by the pipeline itself.
    pub fn process_raw_depth_frame(&self, raw: &RawDepthFrame) {
        let frame_start = Instant::now();
        let mut state = self.state.lock().unwrap();

        let frame_id = state.frame_counter;
        state.frame_counter += 1;

        state.width = raw.width;
        state.height = raw.height;
        let (width, height) = (raw.width, raw.height);

        let mut build_ms = 0.0f32;
        let mut filter_ms = 0.0f32;
        let mut fuse_ms = 0.0f32;
        let mut validation = FrameValidationSummary::default();
        let mut adaptive_decision = adaptive::AdaptiveDecision::default();
        let mut spatial_metrics = stages::spatial::SpatialMetrics::default();
        let mut confidence_result = stages::confidence::ConfidenceResult::default();
        let mut confidence_ran = false;

        for stage in &self.stages {
            match stage.name.as_str() {
                "build" => {
                    let t0 = Instant::now();
                    let depth_scale = param_f32(stage, "depth_scale", self.config.depth_scale);
                    let depth_offset = param_f32(stage, "depth_offset", self.config.depth_offset);
                    let mut height_map = std::mem::take(&mut state.height_map);
                    let mut invalid = std::mem::take(&mut state.invalid);
                    stages::build::run(raw, depth_scale, depth_offset, &mut height_map, &mut invalid);
                    state.height_map = height_map;
                    state.invalid = invalid;
                    build_ms += t0.elapsed().as_secs_f32() * 1000.0;
                }
                "plane_validate" => {
                    let t0 = Instant::now();
                    let transform = state.transform.clone();
                    let mut height_map = std::mem::take(&mut state.height_map);
                    let mut invalid = std::mem::take(&mut state.invalid);
                    validation = stages::plane_validate::run(&mut height_map, &mut invalid, width, height, &transform);
                    state.height_map = height_map;
                    state.invalid = invalid;
                    build_ms += t0.elapsed().as_secs_f32() * 1000.0;
                }
                "temporal" => {
                    let t0 = Instant::now();
                    let temporal_scale = if state.last_adaptive_decision.run_spatial { self.config.adaptive_temporal_scale } else { 1.0 };
                    let temporal_params = stages::temporal::StageParams {
                        slots: param_u32(stage, "slots", self.config.temporal_slots),
                        min_samples: param_u32(stage, "min_samples", self.config.temporal_min_samples),
                        max_variance: param_f32(stage, "max_variance", self.config.temporal_max_variance) * temporal_scale,
                        hysteresis: param_f32(stage, "hysteresis", self.config.temporal_hysteresis),
                        retain_valids: self.config.temporal_retain_valids,
                        instable_value: self.config.temporal_instable_value,
                    };
                    let mut height_map = std::mem::take(&mut state.height_map);
                    let mut invalid = std::mem::take(&mut state.invalid);
                    let mut temporal = std::mem::take(&mut state.temporal);
                    stages::temporal::run(&mut temporal, &mut height_map, &mut invalid, width, height, &temporal_params);
                    state.ema_variance = temporal.average_variance_meters();
                    state.height_map = height_map;
                    state.invalid = invalid;
                    state.temporal = temporal;
                    filter_ms += t0.elapsed().as_secs_f32() * 1000.0;
                }
                "spatial" => {
                    let t0 = Instant::now();
                    let prev_stability_ratio = state.prev_stability_ratio;
                    let ema_variance = state.ema_variance;
                    adaptive_decision = state.adaptive.update(&self.config, prev_stability_ratio, ema_variance);
                    state.last_adaptive_decision = adaptive_decision;
                    let run_spatial = match self.config.spatial_when {
                        SpatialWhen::Always => true,
                        SpatialWhen::Never => false,
                        SpatialWhen::Adaptive | SpatialWhen::AdaptiveStrong => {
                            self.config.adaptive_mode == AdaptiveMode::Adaptive && adaptive_decision.run_spatial
                        }
                    };
                    if run_spatial {
                        let strong = adaptive_decision.strong && self.config.spatial_when == SpatialWhen::AdaptiveStrong;
                        let kernel = kernel_for(stage, &self.config, strong);
                        let sample_count = param_u32(stage, "sample_count", self.config.spatial_sample_count);
                        let mut height_map = std::mem::take(&mut state.height_map);
                        let invalid = std::mem::take(&mut state.invalid);
                        spatial_metrics = stages::spatial::run(&mut height_map, &invalid, width, height, kernel, sample_count);
                        state.height_map = height_map;
                        state.invalid = invalid;
                    }
                    filter_ms += t0.elapsed().as_secs_f32() * 1000.0;
                }
                "fusion" => {
                    let t0 = Instant::now();
                    if self.config.fusion_duplicate_layer {
                        let params = stages::fusion::DuplicateLayerParams {
                            shift: param_f32(stage, "shift", self.config.fusion_duplicate_shift),
                            base_confidence: self.config.fusion_duplicate_base_conf,
                            duplicate_confidence: self.config.fusion_duplicate_dup_conf,
                        };
                        let mut height_map = std::mem::take(&mut state.height_map);
                        let invalid = std::mem::take(&mut state.invalid);
                        stages::fusion::run(&mut height_map, &invalid, Some(&params));
                        state.height_map = height_map;
                        state.invalid = invalid;
                    }
                    fuse_ms += t0.elapsed().as_secs_f32() * 1000.0;
                }
                "confidence" => {
                    if !self.config.confidence_enabled {
                        continue;
                    }
                    confidence_ran = true;
                    let stability = state.temporal.stability_mask();
                    let params = stages::confidence::StageParams {
                        weights: self.config.confidence_weights,
                        low_threshold: self.config.confidence_low,
                        high_threshold: self.config.confidence_high,
                    };
                    let prev = if state.prev_filtered_valid { Some(state.prev_filtered_height.as_slice()) } else { None };
                    confidence_result = stages::confidence::run(
                        &state.height_map,
                        &state.invalid,
                        &stability,
                        spatial_metrics.variance_ratio(),
                        prev,
                        &params,
                    );
                }
                unknown => {
                    warn!(target: targets::PROC_ORCH, stage = unknown, "unrecognized pipeline stage name, skipping");
                }
            }
        }

        let pixel_count = (width as usize) * (height as usize);
        let stable_this_frame = state.temporal.stability_mask().iter().filter(|s| **s).count() as u32;
        let considered = validation.valid.max(1);
        state.prev_stability_ratio = stable_this_frame as f32 / considered as f32;

        state.prev_filtered_height = state.height_map.clone();
        state.prev_filtered_valid = pixel_count > 0;
        if confidence_ran {
            state.confidence_map = confidence_result.map.clone();
        }

        let mut height_map = HeightMap::new(width, height);
        height_map.data.copy_from_slice(&state.height_map[..pixel_count.min(state.height_map.len())]);

        // Checksum is left at 0 ("absent"): whether and how often to compute
        // one is the transport layer's call (`checksum_interval_ms`), not
        // the pipeline's.
        let world_frame = WorldFrame {
            frame_id,
            timestamp_ns: raw.timestamp_ns,
            height_map,
            checksum: 0,
        };

        let proc_total_ms = frame_start.elapsed().as_secs_f32() * 1000.0;
        let metrics = FrameMetrics {
            frame_id,
            width,
            height,
            hard_invalid: validation.invalid,
            stability_ratio: state.prev_stability_ratio,
            avg_variance: state.ema_variance,
            proc_total_ms,
            build_ms,
            filter_ms,
            fuse_ms,
            adaptive_spatial: adaptive_decision.run_spatial,
            adaptive_strong: adaptive_decision.strong,
            adaptive_streak: adaptive_decision.streak,
            spatial_variance_ratio: spatial_metrics.variance_ratio(),
            spatial_edge_preservation_ratio: spatial_metrics.edge_preservation_ratio(),
            adaptive_temporal_blend: adaptive_decision.run_spatial && self.config.adaptive_temporal_scale != 1.0,
            mean_confidence: confidence_result.mean,
            fraction_low_confidence: confidence_result.fraction_low,
            fraction_high_confidence: confidence_result.fraction_high,
        };
        state.last_validation = validation;
        state.last_metrics = metrics.clone();

        drop(state);

        if let Some(handler) = self.handler.lock().unwrap().as_mut() {
            handler.on_world_frame(&world_frame, &metrics);
        }
    }
}

fn param_f32(stage: &StageSpec, key: &str, default: f32) -> f32 {
    stage.params.get(key).and_then(|v| v.parse().ok()).unwrap_or(default)
}

fn param_u32(stage: &StageSpec, key: &str, default: u32) -> u32 {
    stage.params.get(key).and_then(|v| v.parse().ok()).unwrap_or(default)
}

fn kernel_for(stage: &StageSpec, config: &PipelineConfig, strong: bool) -> SpatialKernel {
    if let Some(name) = stage.params.get("kernel") {
        if let Some(k) = SpatialKernel::parse(name) {
            return k;
        }
    }
    if strong {
        config.spatial_strong_kernel
    } else {
        config.spatial_kernel
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::RawDepthFrame;
    use std::sync::mpsc;

    fn uniform_raw(value: u16, width: u32, height: u32) -> RawDepthFrame {
        let mut raw = RawDepthFrame::new("s", 0, width, height);
        raw.data = vec![value; (width * height) as usize];
        raw
    }

    #[test]
    fn frame_ids_are_dense_and_start_at_zero() {
        let pipeline = Pipeline::new(PipelineConfig::default());
        let (tx, rx) = mpsc::channel();
        pipeline.set_world_frame_handler(Box::new(move |f: &WorldFrame, _: &FrameMetrics| {
            let _ = tx.send(f.frame_id);
        }));
        for _ in 0..5 {
            pipeline.process_raw_depth_frame(&uniform_raw(1000, 2, 2));
        }
        let ids: Vec<_> = rx.try_iter().collect();
        assert_eq!(ids, vec![0, 1, 2, 3, 4]);
    }

    #[test]
    fn validity_accounting_sums_to_pixel_count() {
        let pipeline = Pipeline::new(PipelineConfig::default());
        pipeline.process_raw_depth_frame(&uniform_raw(1000, 4, 4));
        let summary = pipeline.last_validation_summary();
        assert_eq!(summary.valid + summary.invalid, 16);
    }

    #[test]
    fn depth_height_linearity_holds_for_valid_pixels() {
        let mut cfg = PipelineConfig::default();
        cfg.min_valid_plane = crate::types::PlaneEquation::new(0.0, 0.0, 1.0, -0.0001);
        cfg.max_valid_plane = crate::types::PlaneEquation::new(0.0, 0.0, 1.0, -100.0);
        let pipeline = Pipeline::new(cfg);
        let (tx, rx) = mpsc::channel();
        pipeline.set_world_frame_handler(Box::new(move |f: &WorldFrame, _: &FrameMetrics| {
            let _ = tx.send(f.height_map.clone());
        }));
        pipeline.process_raw_depth_frame(&uniform_raw(1000, 2, 2));
        let hm = rx.recv().unwrap();
        for v in hm.data {
            assert!((v - 1.0).abs() < 0.01, "expected ~1.0, got {v}");
        }
    }

    #[test]
    fn spec_without_build_stage_does_not_panic() {
        let mut cfg = PipelineConfig::default();
        cfg.pipeline_spec = "plane_validate,confidence".to_string();
        let pipeline = Pipeline::new(cfg);
        pipeline.process_raw_depth_frame(&uniform_raw(1000, 3, 3));
        let summary = pipeline.last_validation_summary();
        assert_eq!(summary.valid + summary.invalid, 9);
    }
}
