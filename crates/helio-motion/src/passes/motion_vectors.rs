//! Motion vector pass - per-pixel screen-space velocity after opaques
//!
//! Fills an `Rg16Float` buffer with camera motion (full-screen reprojection of
//! the depth buffer through the previous view-projection) plus additive
//! object motion from renderers whose material exposes a motion vector pass.

use super::{
    CAMERA_DEPTH, CAMERA_MOTION_FACTOR, MOTION_VECTOR_TEXTURE, PER_OBJECT_MOTION_FACTOR,
    PREV_VIEW_PROJ,
};
use crate::camera::CaptureFlags;
use crate::command::{CommandBuffer, RenderTargetId};
use crate::context::{
    DrawingSettings, FilteringSettings, PerObjectData, RenderQueueRange, RenderingData,
    SortingCriteria,
};
use crate::graph::{
    ConfigureContext, PassContext, PassResourceBuilder, RenderPass, RenderPassEvent,
    ResourceHandle,
};
use crate::settings::MotionBlurSettings;
use crate::shader::{ShaderProgram, ShaderRegistry, CAMERA_MOTION_SHADER, OBJECT_MOTION_SHADER};
use crate::{Error, Result};

const PROFILING_TAG: &str = "Motion Vectors";

/// Material pass tags that opt a renderer into object motion
pub const MOTION_VECTOR_PASS_TAGS: [&str; 2] = ["motion_vectors", "helio_motion_vectors"];

/// Two half-float channels of UV-space velocity
pub const MOTION_VECTOR_FORMAT: wgpu::TextureFormat = wgpu::TextureFormat::Rg16Float;

/// Depth bits of the motion buffer's own depth attachment
pub const MOTION_VECTOR_DEPTH_BITS: u32 = 32;

/// Graph / pool handle of the motion vector buffer
pub fn motion_vector_handle() -> ResourceHandle {
    ResourceHandle::named(MOTION_VECTOR_TEXTURE)
}

#[derive(Debug, Copy, Clone)]
struct Programs {
    camera: ShaderProgram,
    object: ShaderProgram,
}

/// Generates the motion vector buffer consumed by [`MotionBlurPass`](super::MotionBlurPass)
pub struct MotionVectorPass {
    settings: MotionBlurSettings,
    programs: Option<Programs>,
    motion_vectors_enabled: bool,
    /// Buffer acquired in `configure`, released in `frame_cleanup`
    allocated: Option<ResourceHandle>,
}

impl MotionVectorPass {
    pub fn new() -> Self {
        Self {
            settings: MotionBlurSettings::default(),
            programs: None,
            motion_vectors_enabled: true,
            allocated: None,
        }
    }

    /// Store a settings snapshot and resolve the motion programs
    ///
    /// Safe to call again on every configuration change.
    pub fn setup(
        &mut self,
        settings: &MotionBlurSettings,
        shaders: &dyn ShaderRegistry,
    ) -> Result<()> {
        let programs = Programs {
            camera: shaders.resolve(CAMERA_MOTION_SHADER)?,
            object: shaders.resolve(OBJECT_MOTION_SHADER)?,
        };
        self.programs = Some(programs);
        self.settings = *settings;
        log::info!("Motion vector pass set up with {:?}", programs);
        Ok(())
    }

    /// Global motion vector switch; when off the buffer is left cleared
    pub fn set_motion_vectors_enabled(&mut self, enabled: bool) {
        self.motion_vectors_enabled = enabled;
    }

    pub fn motion_vectors_enabled(&self) -> bool {
        self.motion_vectors_enabled
    }

    pub fn settings(&self) -> &MotionBlurSettings {
        &self.settings
    }

    /// Program host materials use for their motion vector pass
    pub fn object_program(&self) -> Option<ShaderProgram> {
        self.programs.map(|p| p.object)
    }

    pub fn is_set_up(&self) -> bool {
        self.programs.is_some()
    }

    fn drawing_settings(rendering: &RenderingData) -> DrawingSettings {
        let mut drawing =
            DrawingSettings::new(&MOTION_VECTOR_PASS_TAGS, SortingCriteria::CommonOpaque);
        drawing.per_object_data = PerObjectData::MOTION_VECTORS;
        drawing.enable_dynamic_batching = rendering.supports_dynamic_batching;
        drawing.enable_instancing = true;
        drawing
    }

    fn draw_motion(
        ctx: &mut PassContext,
        cmd: &mut CommandBuffer,
        camera_program: ShaderProgram,
        target: ResourceHandle,
    ) -> Result<()> {
        let rendering = ctx.rendering;

        cmd.set_render_target(RenderTargetId::Temporary(target), true)
            .draw_fullscreen(camera_program, 0);
        ctx.render.execute_command_buffer(cmd)?;

        let Some(culling) = ctx.render.cull(&rendering.camera) else {
            log::trace!("Camera {:?} cannot be culled, no object motion", rendering.camera.id);
            return Ok(());
        };

        let drawing = Self::drawing_settings(rendering);
        let filtering =
            FilteringSettings::new(RenderQueueRange::opaque(), rendering.camera.culling_mask);
        ctx.render.draw_renderers(&culling, &drawing, &filtering)
    }
}

impl RenderPass for MotionVectorPass {
    fn name(&self) -> &str {
        "motion_vectors"
    }

    fn event(&self) -> RenderPassEvent {
        RenderPassEvent::AfterRenderingOpaques
    }

    fn declare_resources(&self, builder: &mut PassResourceBuilder) {
        let motion = motion_vector_handle();
        builder
            .read(ResourceHandle::named(CAMERA_DEPTH))
            .create(motion)
            .write(motion);
    }

    fn configure(&mut self, ctx: &mut ConfigureContext) -> Result<()> {
        if self.programs.is_none() {
            return Err(Error::Precondition(
                "Motion vector pass configured before setup".to_string(),
            ));
        }

        let camera = &ctx.rendering.camera;
        if !camera.kind.receives_motion_vectors() {
            return Ok(());
        }

        let handle = motion_vector_handle();
        let target = RenderTargetId::Temporary(handle);
        let desc = ctx
            .target
            .with_format(MOTION_VECTOR_FORMAT)
            .with_depth_bits(MOTION_VECTOR_DEPTH_BITS);

        ctx.cmd
            .get_temporary_target(handle, desc, wgpu::FilterMode::Nearest)
            .set_global_texture(MOTION_VECTOR_TEXTURE, target)
            .set_render_target(target, true)
            .clear_render_target(Some([0.0; 4]), Some(1.0));
        self.allocated = Some(handle);

        if self.motion_vectors_enabled {
            let already_active = ctx
                .camera_state
                .request_capture(CaptureFlags::DEPTH | CaptureFlags::MOTION_VECTORS);
            if !already_active {
                log::debug!(
                    "Requested depth and motion vector capture for camera {:?}; \
                     object motion starts next frame",
                    camera.id
                );
            }
        }

        Ok(())
    }

    fn execute(&mut self, ctx: &mut PassContext) -> Result<()> {
        let rendering = ctx.rendering;
        // Never draw in previews or reflections
        if !rendering.camera.kind.receives_motion_vectors() {
            return Ok(());
        }

        let programs = self.programs.ok_or_else(|| {
            Error::Precondition("Motion vector pass executed before setup".to_string())
        })?;
        let target = self.allocated.ok_or_else(|| {
            Error::Precondition("Motion vector pass executed before configure".to_string())
        })?;

        let history = &ctx.camera_state.history;
        let view_proj = rendering.camera.view_projection();
        let camera_factor = if history.is_first_frame() {
            0.0
        } else {
            self.settings.camera_intensity
        };

        let mut cmd = CommandBuffer::new(PROFILING_TAG);
        cmd.begin_sample(PROFILING_TAG)
            .set_global_matrix(PREV_VIEW_PROJ, history.previous_or(view_proj))
            .set_global_float(PER_OBJECT_MOTION_FACTOR, self.settings.per_object_intensity)
            .set_global_float(CAMERA_MOTION_FACTOR, camera_factor);
        ctx.render.execute_command_buffer(&mut cmd)?;

        let drawn = if self.motion_vectors_enabled {
            Self::draw_motion(ctx, &mut cmd, programs.camera, target)
        } else {
            Ok(())
        };

        // Whatever a failed draw left behind must not run
        cmd.clear();
        cmd.end_sample(PROFILING_TAG);
        let flushed = ctx.render.execute_command_buffer(&mut cmd);
        drawn.and(flushed)
    }

    fn frame_cleanup(&mut self, cmd: Option<&mut CommandBuffer>) -> Result<()> {
        let Some(cmd) = cmd else {
            return Err(Error::Precondition(
                "Motion vector frame cleanup without a command buffer".to_string(),
            ));
        };
        if let Some(handle) = self.allocated.take() {
            cmd.release_temporary_target(handle);
        }
        Ok(())
    }
}

impl Default for MotionVectorPass {
    fn default() -> Self {
        Self::new()
    }
}
