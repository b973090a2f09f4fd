//! Screen-space reprojection math
//!
//! CPU mirror of the camera and object motion shaders. The CPU backend renders
//! with these functions and tests use them to derive expected values; the WGSL
//! in `shaders/` must stay in sync.
//!
//! Conventions: UV in [0,1] with v pointing down, NDC with y up and depth in
//! [0,1] (wgpu / glam `perspective_rh`), column-major matrices.

use glam::{Mat4, Vec2, Vec3, Vec4};

/// Velocities shorter than this many pixels are not blurred
pub const MIN_BLUR_PIXELS: f32 = 0.5;

/// UV plus depth to normalized device coordinates
pub fn uv_to_ndc(uv: Vec2, depth: f32) -> Vec3 {
    Vec3::new(uv.x * 2.0 - 1.0, 1.0 - uv.y * 2.0, depth)
}

/// NDC x/y to UV
pub fn ndc_to_uv(ndc: Vec2) -> Vec2 {
    Vec2::new(ndc.x * 0.5 + 0.5, 0.5 - ndc.y * 0.5)
}

/// World position of the surface seen at `uv` with the given NDC depth
pub fn reconstruct_world_position(uv: Vec2, depth: f32, inv_view_proj: Mat4) -> Vec3 {
    let world = inv_view_proj * uv_to_ndc(uv, depth).extend(1.0);
    world.truncate() / world.w
}

/// UV of a world position; `None` if it lies behind the camera
pub fn project_to_uv(view_proj: Mat4, world: Vec3) -> Option<Vec2> {
    clip_to_uv(view_proj * world.extend(1.0))
}

fn clip_to_uv(clip: Vec4) -> Option<Vec2> {
    if clip.w <= 0.0 {
        return None;
    }
    Some(ndc_to_uv(clip.truncate().truncate() / clip.w))
}

/// Camera-induced motion at `uv`: current UV minus the UV the same world
/// point had under `prev_view_proj`, scaled by `factor`
///
/// Points that were behind the previous camera produce no motion.
pub fn camera_motion(
    uv: Vec2,
    depth: f32,
    view_proj: Mat4,
    prev_view_proj: Mat4,
    factor: f32,
) -> Vec2 {
    let world = reconstruct_world_position(uv, depth, view_proj.inverse());
    match project_to_uv(prev_view_proj, world) {
        Some(prev_uv) => (uv - prev_uv) * factor,
        None => Vec2::ZERO,
    }
}

/// Object-induced motion of local point `position`, both transforms seen
/// through the current camera so camera movement is excluded
pub fn object_motion(
    view_proj: Mat4,
    model: Mat4,
    previous_model: Mat4,
    position: Vec3,
    factor: f32,
) -> Vec2 {
    let current = clip_to_uv(view_proj * model * position.extend(1.0));
    let previous = clip_to_uv(view_proj * previous_model * position.extend(1.0));
    match (current, previous) {
        (Some(current), Some(previous)) => (current - previous) * factor,
        _ => Vec2::ZERO,
    }
}

/// Whether a UV-space velocity covers less than half a pixel of a
/// `width` x `height` target
pub fn is_negligible_velocity(velocity: Vec2, width: u32, height: u32) -> bool {
    let pixels = velocity * Vec2::new(width as f32, height as f32);
    pixels.length_squared() < MIN_BLUR_PIXELS * MIN_BLUR_PIXELS
}

/// Offset of blur tap `index` of `count` along the velocity, in [-0.5, 0.5]
pub fn blur_tap_offset(index: u32, count: u32) -> f32 {
    if count <= 1 {
        return 0.0;
    }
    index as f32 / (count - 1) as f32 - 0.5
}

#[cfg(test)]
mod tests {
    use super::*;

    fn camera(eye: Vec3) -> Mat4 {
        let projection = Mat4::perspective_rh(60f32.to_radians(), 1.0, 0.1, 100.0);
        projection * Mat4::look_to_rh(eye, Vec3::NEG_Z, Vec3::Y)
    }

    #[test]
    fn uv_ndc_roundtrip_flips_y() {
        let ndc = uv_to_ndc(Vec2::new(0.0, 0.0), 0.5);
        assert_eq!(ndc, Vec3::new(-1.0, 1.0, 0.5));
        assert_eq!(ndc_to_uv(ndc.truncate()), Vec2::ZERO);
    }

    #[test]
    fn reconstruct_then_project_returns_the_uv() {
        let view_proj = camera(Vec3::ZERO);
        let uv = Vec2::new(0.3, 0.7);
        let world = reconstruct_world_position(uv, 0.9, view_proj.inverse());
        let projected = project_to_uv(view_proj, world).unwrap();
        assert!((projected - uv).abs().max_element() < 1e-4);
    }

    #[test]
    fn static_camera_has_no_motion() {
        let view_proj = camera(Vec3::new(1.0, 2.0, 3.0));
        let motion = camera_motion(Vec2::new(0.25, 0.75), 0.95, view_proj, view_proj, 1.0);
        assert!(motion.abs().max_element() < 1e-4);
    }

    #[test]
    fn camera_moving_right_moves_scene_left() {
        let previous = camera(Vec3::ZERO);
        let current = camera(Vec3::new(0.5, 0.0, 0.0));
        let motion = camera_motion(Vec2::splat(0.5), 0.95, current, previous, 1.0);
        assert!(motion.x < 0.0);
        assert!(motion.y.abs() < 1e-4);
    }

    #[test]
    fn camera_factor_scales_motion() {
        let previous = camera(Vec3::ZERO);
        let current = camera(Vec3::new(0.5, 0.0, 0.0));
        let uv = Vec2::splat(0.5);
        let full = camera_motion(uv, 0.95, current, previous, 1.0);
        let half = camera_motion(uv, 0.95, current, previous, 0.5);
        assert!((full * 0.5 - half).abs().max_element() < 1e-6);
        assert_eq!(camera_motion(uv, 0.95, current, previous, 0.0), Vec2::ZERO);
    }

    #[test]
    fn points_behind_the_previous_camera_have_no_motion() {
        let previous = camera(Vec3::new(0.0, 0.0, -50.0));
        let current = camera(Vec3::ZERO);
        assert_eq!(camera_motion(Vec2::splat(0.5), 0.5, current, previous, 1.0), Vec2::ZERO);
    }

    #[test]
    fn object_motion_ignores_the_camera() {
        let view_proj = camera(Vec3::ZERO);
        let previous_model = Mat4::from_translation(Vec3::new(0.0, 0.0, -5.0));
        let model = Mat4::from_translation(Vec3::new(0.5, 0.0, -5.0));

        let motion = object_motion(view_proj, model, previous_model, Vec3::ZERO, 1.0);
        assert!(motion.x > 0.0);
        assert!(motion.y.abs() < 1e-5);
        assert_eq!(object_motion(view_proj, model, model, Vec3::ZERO, 1.0), Vec2::ZERO);
    }

    #[test]
    fn half_pixel_threshold() {
        assert!(is_negligible_velocity(Vec2::new(0.4 / 100.0, 0.0), 100, 100));
        assert!(!is_negligible_velocity(Vec2::new(0.6 / 100.0, 0.0), 100, 100));
    }

    #[test]
    fn blur_taps_are_centred() {
        assert_eq!(blur_tap_offset(0, 8), -0.5);
        assert_eq!(blur_tap_offset(7, 8), 0.5);
        assert_eq!(blur_tap_offset(0, 1), 0.0);
    }
}
