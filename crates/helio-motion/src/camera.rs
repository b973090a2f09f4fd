//! Camera descriptors handed in by the host pipeline

use crate::command::TargetDescriptor;
use bitflags::bitflags;
use glam::{Mat4, Vec3};

/// HDR color format of camera targets and blur temporaries
pub const HDR_FORMAT: wgpu::TextureFormat = wgpu::TextureFormat::Rgba16Float;

/// Stable identity of a camera across frames
#[derive(Debug, Copy, Clone, Hash, Eq, PartialEq, Ord, PartialOrd)]
pub struct CameraId(pub u64);

/// What a camera renders for
#[derive(Debug, Copy, Clone, Hash, Eq, PartialEq, Default)]
pub enum CameraKind {
    /// Game / main view
    #[default]
    Standard,
    /// Editor thumbnails and asset previews
    Preview,
    /// Reflection capture
    Reflection,
}

impl CameraKind {
    /// Only standard cameras get motion vectors
    pub fn receives_motion_vectors(self) -> bool {
        matches!(self, CameraKind::Standard)
    }

    /// Previews never get blurred; reflections still run the blur pass
    pub fn receives_motion_blur(self) -> bool {
        !matches!(self, CameraKind::Preview)
    }
}

bitflags! {
    /// Per-camera capture requests read by the host at frame start
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct CaptureFlags: u32 {
        /// Keep a sampleable depth texture for this camera
        const DEPTH = 1 << 0;
        /// Track previous-frame object transforms for this camera
        const MOTION_VECTORS = 1 << 1;
    }
}

/// Camera data for one frame
#[derive(Clone, Debug, PartialEq)]
pub struct CameraDescriptor {
    pub id: CameraId,
    pub kind: CameraKind,
    /// Target resolution in pixels
    pub width: u32,
    pub height: u32,
    /// Layer mask renderers must intersect to be drawn
    pub culling_mask: u32,
    pub view: Mat4,
    pub projection: Mat4,
}

impl CameraDescriptor {
    pub fn new(id: CameraId, width: u32, height: u32, view: Mat4, projection: Mat4) -> Self {
        Self {
            id,
            kind: CameraKind::Standard,
            width,
            height,
            culling_mask: u32::MAX,
            view,
            projection,
        }
    }

    /// Create a perspective camera looking from `position` towards `target`
    #[allow(clippy::too_many_arguments)]
    pub fn perspective(
        id: CameraId,
        position: Vec3,
        target: Vec3,
        up: Vec3,
        fov_y: f32,
        near: f32,
        far: f32,
        width: u32,
        height: u32,
    ) -> Self {
        let aspect = width as f32 / height.max(1) as f32;
        let view = Mat4::look_at_rh(position, target, up);
        let projection = Mat4::perspective_rh(fov_y, aspect, near, far);
        Self::new(id, width, height, view, projection)
    }

    pub fn with_kind(mut self, kind: CameraKind) -> Self {
        self.kind = kind;
        self
    }

    pub fn with_culling_mask(mut self, mask: u32) -> Self {
        self.culling_mask = mask;
        self
    }

    pub fn with_view(mut self, view: Mat4) -> Self {
        self.view = view;
        self
    }

    /// Combined view-projection matrix
    pub fn view_projection(&self) -> Mat4 {
        self.projection * self.view
    }

    /// World-space camera position
    pub fn position(&self) -> Vec3 {
        self.view.inverse().w_axis.truncate()
    }

    /// Descriptor of the camera's color target
    pub fn target_descriptor(&self) -> TargetDescriptor {
        TargetDescriptor::new(self.width, self.height, HDR_FORMAT).with_depth_bits(32)
    }

    /// Whether a renderer on `layer` passes this camera's culling mask
    pub fn sees_layer(&self, layer: u32) -> bool {
        layer < 32 && self.culling_mask & (1 << layer) != 0
    }
}
