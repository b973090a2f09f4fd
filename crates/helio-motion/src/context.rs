//! Host pipeline interface
//!
//! The host owns scene culling, draw submission and GPU execution. The motion
//! passes only talk to it through [`RenderContext`].

use crate::camera::{CameraDescriptor, CaptureFlags};
use crate::command::CommandBuffer;
use crate::Result;
use bitflags::bitflags;
use std::ops::RangeInclusive;

/// Per-camera frame data passed to every pass
#[derive(Clone, Debug)]
pub struct RenderingData {
    pub camera: CameraDescriptor,
    /// Capture flags as they were when the frame started
    pub capture: CaptureFlags,
    /// Frames already rendered for this camera
    pub frame: u64,
    pub supports_dynamic_batching: bool,
}

impl RenderingData {
    pub fn new(camera: CameraDescriptor) -> Self {
        Self {
            camera,
            capture: CaptureFlags::empty(),
            frame: 0,
            supports_dynamic_batching: true,
        }
    }
}

/// Range of render queues a draw accepts
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RenderQueueRange(pub RangeInclusive<u32>);

impl RenderQueueRange {
    pub const OPAQUE_MAX: u32 = 2500;

    pub fn opaque() -> Self {
        Self(0..=Self::OPAQUE_MAX)
    }

    pub fn transparent() -> Self {
        Self(Self::OPAQUE_MAX + 1..=5000)
    }

    pub fn all() -> Self {
        Self(0..=u32::MAX)
    }

    pub fn contains(&self, queue: u32) -> bool {
        self.0.contains(&queue)
    }
}

/// Draw ordering requested from the host
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum SortingCriteria {
    /// Front to back, for early depth rejection
    CommonOpaque,
    /// Back to front
    CommonTransparent,
    None,
}

bitflags! {
    /// Extra per-object data the host must provide to a draw
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct PerObjectData: u32 {
        /// Previous-frame object transform
        const MOTION_VECTORS = 1 << 0;
    }
}

/// How matching renderers are drawn
#[derive(Clone, Debug, PartialEq)]
pub struct DrawingSettings {
    /// Material pass tags; renderers without any of them are skipped
    pub shader_passes: Vec<&'static str>,
    pub sorting: SortingCriteria,
    pub per_object_data: PerObjectData,
    pub enable_dynamic_batching: bool,
    pub enable_instancing: bool,
}

impl DrawingSettings {
    pub fn new(shader_passes: &[&'static str], sorting: SortingCriteria) -> Self {
        Self {
            shader_passes: shader_passes.to_vec(),
            sorting,
            per_object_data: PerObjectData::empty(),
            enable_dynamic_batching: false,
            enable_instancing: false,
        }
    }

    /// Whether a material exposing `tags` has a matching pass
    pub fn accepts<S: AsRef<str>>(&self, tags: &[S]) -> bool {
        tags.iter()
            .any(|tag| self.shader_passes.iter().any(|pass| *pass == tag.as_ref()))
    }
}

/// Which culled renderers are eligible
#[derive(Clone, Debug, PartialEq)]
pub struct FilteringSettings {
    pub queue_range: RenderQueueRange,
    pub layer_mask: u32,
}

impl FilteringSettings {
    pub fn new(queue_range: RenderQueueRange, layer_mask: u32) -> Self {
        Self { queue_range, layer_mask }
    }

    pub fn accepts(&self, queue: u32, layer: u32) -> bool {
        self.queue_range.contains(queue) && layer < 32 && self.layer_mask & (1 << layer) != 0
    }
}

/// Renderers visible to a camera, as host-side indices
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct CullingResults {
    pub visible: Vec<usize>,
}

/// Frame execution services provided by the host pipeline
pub trait RenderContext {
    /// Called by the orchestrator before any pass of a camera runs
    fn begin_camera(&mut self, rendering: &RenderingData) -> Result<()> {
        let _ = rendering;
        Ok(())
    }

    /// Execute the recorded commands in order and clear the buffer
    fn execute_command_buffer(&mut self, cmd: &mut CommandBuffer) -> Result<()>;

    /// Cull the scene for `camera`; `None` if the camera cannot be culled
    fn cull(&mut self, camera: &CameraDescriptor) -> Option<CullingResults>;

    /// Draw culled renderers into the currently bound target
    fn draw_renderers(
        &mut self,
        culling: &CullingResults,
        drawing: &DrawingSettings,
        filtering: &FilteringSettings,
    ) -> Result<()>;
}
