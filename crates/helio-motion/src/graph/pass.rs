//! Render pass trait and execution contexts

use super::PassResourceBuilder;
use crate::command::{CommandBuffer, TargetDescriptor};
use crate::context::{RenderContext, RenderingData};
use crate::history::CameraMotionState;
use crate::Result;

/// Lifecycle point of the host frame a pass is inserted at
#[derive(Debug, Copy, Clone, Hash, Eq, PartialEq, Ord, PartialOrd)]
pub enum RenderPassEvent {
    BeforeRenderingOpaques = 250,
    AfterRenderingOpaques = 300,
    BeforeRenderingPostProcessing = 550,
    AfterRenderingPostProcessing = 600,
}

/// Render pass trait - implemented by all motion passes
///
/// **Lifecycle, per camera per frame:**
/// 1. `configure()` - allocate and bind per-frame targets
/// 2. `execute()` - record and submit the pass's work
/// 3. `frame_cleanup()` - release what `configure()` allocated; always runs
pub trait RenderPass: Send + Sync + AsAny {
    /// Unique name for this pass
    fn name(&self) -> &str;

    /// Host lifecycle point this pass runs at
    fn event(&self) -> RenderPassEvent;

    /// Declare resource dependencies
    ///
    /// Called once during graph building to order passes sharing an event.
    fn declare_resources(&self, _builder: &mut PassResourceBuilder) {}

    /// Allocate per-frame targets; commands recorded here run before `execute`
    fn configure(&mut self, _ctx: &mut ConfigureContext) -> Result<()> {
        Ok(())
    }

    /// Execute the pass
    fn execute(&mut self, ctx: &mut PassContext) -> Result<()>;

    /// Release per-frame resources
    ///
    /// `None` means the host has no command buffer to record into, which is a
    /// lifecycle violation for passes that own per-frame targets.
    fn frame_cleanup(&mut self, _cmd: Option<&mut CommandBuffer>) -> Result<()> {
        Ok(())
    }
}

/// Context for `RenderPass::configure`
pub struct ConfigureContext<'a> {
    /// Flushed to the host right after `configure` returns
    pub cmd: &'a mut CommandBuffer,
    /// Descriptor of the camera's color target
    pub target: &'a TargetDescriptor,
    pub rendering: &'a RenderingData,
    /// Persistent state of the camera being rendered
    pub camera_state: &'a mut CameraMotionState,
}

/// Context for `RenderPass::execute`
pub struct PassContext<'a> {
    pub render: &'a mut dyn RenderContext,
    pub rendering: &'a RenderingData,
    pub camera_state: &'a CameraMotionState,
}

/// Helper trait for downcasting pass trait objects
pub trait AsAny {
    fn as_any(&self) -> &dyn std::any::Any;
    fn as_any_mut(&mut self) -> &mut dyn std::any::Any;
}

impl<T: RenderPass + 'static> AsAny for T {
    fn as_any(&self) -> &dyn std::any::Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn std::any::Any {
        self
    }
}
