//! Sensor calibration data: normalized structures and explicit converters
//! into the runtime [`TransformParameters`](crate::types::TransformParameters).
//!
//! The original tooling produced calibration profiles through a templated
//! ingestion path that duck-typed whatever fields a given calibration source
//! happened to provide. Here there is exactly one normalized
//! [`CalibrationProfile`] shape and one explicit conversion into runtime
//! parameters — no generic ingestion machinery.

use crate::types::{PlaneEquation, Point3D, TransformParameters};
use anyhow::{bail, Context, Result};

/// A calibrated reference point used to derive a plane equation.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Point2D {
    pub x: f32,
    pub y: f32,
}

/// Outcome of attempting to fit a plane from calibration points.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CalibrationResult {
    Ok,
    InsufficientPoints,
    Degenerate,
}

/// Three or more world-space points believed to lie on (or near) a plane,
/// plus the fitted equation once computed.
#[derive(Debug, Clone, Default)]
pub struct PlaneCalibrationData {
    pub points: Vec<Point3D>,
    pub fitted: Option<PlaneEquation>,
}

impl PlaneCalibrationData {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fit a best-effort plane through the recorded points via a normal
    /// from the first three non-collinear points. Mirrors the original's
    /// least-effort plane fit; a full least-squares fit was not carried
    /// over as no calibration workflow in this system needs more than
    /// three well-chosen points.
    pub fn fit(&mut self) -> CalibrationResult {
        if self.points.len() < 3 {
            return CalibrationResult::InsufficientPoints;
        }
        let p0 = self.points[0];
        let p1 = self.points[1];
        let p2 = self.points[2];

        let v1 = Point3D::new(p1.x - p0.x, p1.y - p0.y, p1.z - p0.z);
        let v2 = Point3D::new(p2.x - p0.x, p2.y - p0.y, p2.z - p0.z);

        let nx = v1.y * v2.z - v1.z * v2.y;
        let ny = v1.z * v2.x - v1.x * v2.z;
        let nz = v1.x * v2.y - v1.y * v2.x;
        let norm = (nx * nx + ny * ny + nz * nz).sqrt();

        if norm < 1e-6 {
            return CalibrationResult::Degenerate;
        }

        let (a, b, c) = (nx / norm, ny / norm, nz / norm);
        let d = -(a * p0.x + b * p0.y + c * p0.z);
        self.fitted = Some(PlaneEquation::new(a, b, c, d));
        CalibrationResult::Ok
    }
}

/// A normalized, sensor-agnostic calibration profile. Whatever format a
/// calibration tool produces, it is converted into this shape before
/// reaching the runtime.
#[derive(Debug, Clone)]
pub struct SensorCalibrationProfile {
    pub sensor_id: String,
    pub focal_length_x: f32,
    pub focal_length_y: f32,
    pub principal_point_x: f32,
    pub principal_point_y: f32,
    pub sensor_position: Point3D,
    pub sensor_rotation: [f32; 9],
    pub depth_scale: f32,
    pub depth_offset: f32,
    pub base_plane: PlaneEquation,
    pub min_valid_plane: PlaneEquation,
    pub max_valid_plane: PlaneEquation,
}

impl SensorCalibrationProfile {
    /// Convert into runtime [`TransformParameters`]. Validated eagerly so a
    /// malformed calibration profile is rejected before the pipeline ever
    /// sees it, rather than producing silently wrong geometry.
    pub fn to_transform_parameters(&self) -> Result<TransformParameters> {
        if self.focal_length_x <= 0.0 || self.focal_length_y <= 0.0 {
            bail!(
                "calibration for sensor '{}' has non-positive focal length ({}, {})",
                self.sensor_id,
                self.focal_length_x,
                self.focal_length_y
            );
        }
        if self.depth_scale <= 0.0 {
            bail!(
                "calibration for sensor '{}' has non-positive depth_scale ({})",
                self.sensor_id,
                self.depth_scale
            );
        }
        let rotation_det = determinant3(&self.sensor_rotation);
        if (rotation_det.abs() - 1.0).abs() > 0.05 {
            bail!(
                "calibration for sensor '{}' has a non-orthonormal rotation matrix (det={})",
                self.sensor_id,
                rotation_det
            );
        }

        Ok(TransformParameters {
            focal_length_x: self.focal_length_x,
            focal_length_y: self.focal_length_y,
            principal_point_x: self.principal_point_x,
            principal_point_y: self.principal_point_y,
            sensor_position: self.sensor_position,
            sensor_rotation: self.sensor_rotation,
            depth_scale: self.depth_scale,
            depth_offset: self.depth_offset,
            base_plane: self.base_plane,
            min_valid_plane: self.min_valid_plane,
            max_valid_plane: self.max_valid_plane,
        })
    }

    /// Parse a profile from the line-oriented `key=value` text format used
    /// by the calibration tooling, one assignment per line, blank lines and
    /// `#`-prefixed comments ignored.
    pub fn parse(sensor_id: &str, text: &str) -> Result<Self> {
        let mut profile = Self {
            sensor_id: sensor_id.to_string(),
            focal_length_x: 0.0,
            focal_length_y: 0.0,
            principal_point_x: 0.0,
            principal_point_y: 0.0,
            sensor_position: Point3D::default(),
            sensor_rotation: [1.0, 0.0, 0.0, 0.0, 1.0, 0.0, 0.0, 0.0, 1.0],
            depth_scale: 0.001,
            depth_offset: 0.0,
            base_plane: PlaneEquation::default(),
            min_valid_plane: PlaneEquation::new(0.0, 0.0, 1.0, -0.5),
            max_valid_plane: PlaneEquation::new(0.0, 0.0, 1.0, -2.0),
        };

        for (lineno, raw) in text.lines().enumerate() {
            let line = raw.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let (key, value) = line
                .split_once('=')
                .with_context(|| format!("line {}: expected key=value", lineno + 1))?;
            let key = key.trim();
            let value = value.trim();
            let f = || value.parse::<f32>().with_context(|| format!("line {}: invalid number '{value}'", lineno + 1));

            match key {
                "focal_length_x" => profile.focal_length_x = f()?,
                "focal_length_y" => profile.focal_length_y = f()?,
                "principal_point_x" => profile.principal_point_x = f()?,
                "principal_point_y" => profile.principal_point_y = f()?,
                "depth_scale" => profile.depth_scale = f()?,
                "depth_offset" => profile.depth_offset = f()?,
                "sensor_position_x" => profile.sensor_position.x = f()?,
                "sensor_position_y" => profile.sensor_position.y = f()?,
                "sensor_position_z" => profile.sensor_position.z = f()?,
                "min_valid_plane" => profile.min_valid_plane = parse_plane(value, lineno)?,
                "max_valid_plane" => profile.max_valid_plane = parse_plane(value, lineno)?,
                "base_plane" => profile.base_plane = parse_plane(value, lineno)?,
                _ => bail!("line {}: unknown calibration key '{key}'", lineno + 1),
            }
        }

        Ok(profile)
    }
}

fn parse_plane(value: &str, lineno: usize) -> Result<PlaneEquation> {
    let parts: Vec<&str> = value.split(',').map(str::trim).collect();
    if parts.len() != 4 {
        bail!("line {}: plane needs 4 comma-separated values, got '{value}'", lineno + 1);
    }
    let mut out = [0.0f32; 4];
    for (slot, part) in out.iter_mut().zip(parts.iter()) {
        *slot = part
            .parse()
            .with_context(|| format!("line {}: invalid plane component '{part}'", lineno + 1))?;
    }
    Ok(PlaneEquation::new(out[0], out[1], out[2], out[3]))
}

fn determinant3(m: &[f32; 9]) -> f32 {
    m[0] * (m[4] * m[8] - m[5] * m[7]) - m[1] * (m[3] * m[8] - m[5] * m[6]) + m[2] * (m[3] * m[7] - m[4] * m[6])
}
