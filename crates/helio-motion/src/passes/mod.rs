//! Motion render passes

pub mod motion_blur;
pub mod motion_vectors;

pub use motion_blur::{MotionBlurPass, PingPong};
pub use motion_vectors::MotionVectorPass;

/// Global texture holding this frame's motion vectors
pub const MOTION_VECTOR_TEXTURE: &str = "motion_vector_texture";
/// Previous frame's view-projection matrix
pub const PREV_VIEW_PROJ: &str = "prev_view_proj";
pub const PER_OBJECT_MOTION_FACTOR: &str = "per_object_motion_factor";
pub const CAMERA_MOTION_FACTOR: &str = "camera_motion_factor";
pub const MOTION_BLUR_INTENSITY: &str = "motion_blur_intensity";
/// Input of the current blur step
pub const SOURCE_TEXTURE: &str = "source_texture";
/// (1/width, 1/height, width, height) of the blur source
pub const SOURCE_TEXEL_SIZE: &str = "source_texel_size";

/// Graph resource of the camera's depth buffer
pub const CAMERA_DEPTH: &str = "camera_depth";
/// Graph resource of the camera's color target
pub const CAMERA_COLOR: &str = "camera_color";
