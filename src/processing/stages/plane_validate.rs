//! `plane_validate` stage: geometric validation against the sensor's
//! min/max validity planes.

use crate::processing::metrics::FrameValidationSummary;
use crate::types::{Point3D, TransformParameters};

/// For each non-invalid pixel, project its (pixel, height) sample into world
/// space through the camera intrinsics and sensor pose, then test it against
/// `min_valid_plane`/`max_valid_plane`. Pixels already marked invalid by an
/// earlier stage are left untouched and excluded from the summary's `valid`
/// count.
pub fn run(height_map: &mut [f32], invalid: &mut [bool], width: u32, height: u32, params: &TransformParameters) -> FrameValidationSummary {
    let mut summary = FrameValidationSummary::default();

    for y in 0..height {
        for x in 0..width {
            let idx = (y * width + x) as usize;
            if invalid[idx] {
                summary.invalid += 1;
                continue;
            }

            let depth = height_map[idx];
            let world = pixel_to_world(params, x as i64, y as i64, depth);
            if params.validate_point(world.x, world.y, world.z) {
                summary.valid += 1;
            } else {
                invalid[idx] = true;
                height_map[idx] = 0.0;
                summary.invalid += 1;
            }
        }
    }

    summary
}

fn pixel_to_world(params: &TransformParameters, pixel_x: i64, pixel_y: i64, depth: f32) -> Point3D {
    let x_norm = (pixel_x as f32 - params.principal_point_x) / non_zero(params.focal_length_x);
    let y_norm = (pixel_y as f32 - params.principal_point_y) / non_zero(params.focal_length_y);

    let cam = Point3D::new(x_norm * depth, y_norm * depth, depth);
    let r = &params.sensor_rotation;
    let rotated = Point3D::new(
        r[0] * cam.x + r[1] * cam.y + r[2] * cam.z,
        r[3] * cam.x + r[4] * cam.y + r[5] * cam.z,
        r[6] * cam.x + r[7] * cam.y + r[8] * cam.z,
    );
    Point3D::new(
        rotated.x + params.sensor_position.x,
        rotated.y + params.sensor_position.y,
        rotated.z + params.sensor_position.z,
    )
}

fn non_zero(v: f32) -> f32 {
    if v.abs() < 1e-9 {
        1.0
    } else {
        v
    }
}
