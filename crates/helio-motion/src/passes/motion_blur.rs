//! Motion blur pass - directional blur of the color target along motion vectors

use super::{
    CAMERA_COLOR, MOTION_BLUR_INTENSITY, MOTION_VECTOR_TEXTURE, SOURCE_TEXEL_SIZE, SOURCE_TEXTURE,
};
use crate::camera::HDR_FORMAT;
use crate::command::{CommandBuffer, RenderTargetId};
use crate::graph::{PassContext, PassResourceBuilder, RenderPass, RenderPassEvent, ResourceHandle};
use crate::settings::MotionBlurSettings;
use crate::shader::{ShaderProgram, ShaderRegistry, MOTION_BLUR_SHADER};
use crate::{Error, Result};

const PROFILING_TAG: &str = "Motion Blur";

/// Blur steps per frame; even, so the result lands back in the camera target
pub const COMPOSITE_STEPS: usize = 2;

/// Depth bits of the temporary color buffer
pub const TEMPORARY_DEPTH_BITS: u32 = 16;

/// Pool handle of the temporary color buffer
pub fn temporary_handle() -> ResourceHandle {
    ResourceHandle::named("motion_blur_temporary")
}

/// Source and destination roles of a ping-pong composite
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct PingPong {
    pub read: RenderTargetId,
    pub write: RenderTargetId,
}

impl PingPong {
    pub fn new(read: RenderTargetId, write: RenderTargetId) -> Self {
        Self { read, write }
    }

    pub fn swap(&mut self) {
        std::mem::swap(&mut self.read, &mut self.write);
    }
}

/// Blurs the camera color target with the motion vector buffer
pub struct MotionBlurPass {
    settings: MotionBlurSettings,
    program: Option<ShaderProgram>,
}

impl MotionBlurPass {
    pub fn new() -> Self {
        Self {
            settings: MotionBlurSettings::default(),
            program: None,
        }
    }

    /// Store a settings snapshot and resolve the blur program
    pub fn setup(
        &mut self,
        settings: &MotionBlurSettings,
        shaders: &dyn ShaderRegistry,
    ) -> Result<()> {
        let program = shaders.resolve(MOTION_BLUR_SHADER)?;
        self.program = Some(program);
        self.settings = *settings;
        log::info!(
            "Motion blur pass set up: {:?} quality, intensity {}",
            settings.quality,
            settings.intensity
        );
        Ok(())
    }

    pub fn settings(&self) -> &MotionBlurSettings {
        &self.settings
    }

    pub fn is_set_up(&self) -> bool {
        self.program.is_some()
    }
}

impl RenderPass for MotionBlurPass {
    fn name(&self) -> &str {
        "motion_blur"
    }

    fn event(&self) -> RenderPassEvent {
        RenderPassEvent::AfterRenderingPostProcessing
    }

    fn declare_resources(&self, builder: &mut PassResourceBuilder) {
        let color = ResourceHandle::named(CAMERA_COLOR);
        builder
            .read(ResourceHandle::named(MOTION_VECTOR_TEXTURE))
            .read(color)
            .write(color);
    }

    fn execute(&mut self, ctx: &mut PassContext) -> Result<()> {
        let rendering = ctx.rendering;
        // Never draw in previews
        if !rendering.camera.kind.receives_motion_blur() {
            return Ok(());
        }

        let program = self.program.ok_or_else(|| {
            Error::Precondition("Motion blur pass executed before setup".to_string())
        })?;
        let sub_pass = self.settings.quality.pass_index();

        let handle = temporary_handle();
        let desc = rendering
            .camera
            .target_descriptor()
            .with_format(HDR_FORMAT)
            .with_depth_bits(TEMPORARY_DEPTH_BITS);

        let mut cmd = CommandBuffer::new(PROFILING_TAG);
        cmd.begin_sample(PROFILING_TAG)
            .set_global_float(MOTION_BLUR_INTENSITY, self.settings.intensity)
            .get_temporary_target(handle, desc, wgpu::FilterMode::Linear);
        if let Err(err) = ctx.render.execute_command_buffer(&mut cmd) {
            // Nothing is leased to this pass, so there is nothing to release
            cmd.clear();
            cmd.end_sample(PROFILING_TAG);
            if let Err(close) = ctx.render.execute_command_buffer(&mut cmd) {
                log::warn!("Failed to close motion blur sample: {}", close);
            }
            return Err(err);
        }

        let mut roles =
            PingPong::new(RenderTargetId::CameraColor, RenderTargetId::Temporary(handle));
        for _ in 0..COMPOSITE_STEPS {
            cmd.set_global_texture(SOURCE_TEXTURE, roles.read)
                .set_global_vector(SOURCE_TEXEL_SIZE, desc.texel_size())
                .set_render_target(roles.write, false)
                .draw_fullscreen(program, sub_pass);
            roles.swap();
        }
        let composited = ctx.render.execute_command_buffer(&mut cmd);

        // The acquired temporary is returned even when compositing failed
        cmd.clear();
        cmd.release_temporary_target(handle).end_sample(PROFILING_TAG);
        let released = ctx.render.execute_command_buffer(&mut cmd);

        composited.and(released)
    }
}

impl Default for MotionBlurPass {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::camera::{CameraDescriptor, CameraId, CameraKind};
    use crate::command::{Command, GlobalValue};
    use crate::context::RenderingData;
    use crate::history::CameraMotionState;
    use crate::passes::recording::RecordingContext;
    use crate::settings::MotionBlurQuality;
    use crate::shader::ShaderLibrary;
    use glam::{Mat4, Vec4};

    fn pass(quality: MotionBlurQuality) -> MotionBlurPass {
        let mut pass = MotionBlurPass::new();
        let settings = MotionBlurSettings::default().with_quality(quality).with_intensity(0.5);
        pass.setup(&settings, &ShaderLibrary::with_builtin()).unwrap();
        pass
    }

    fn run(pass: &mut MotionBlurPass, kind: CameraKind) -> RecordingContext {
        let mut ctx = RecordingContext::new();
        execute(pass, kind, &mut ctx).unwrap();
        ctx
    }

    fn execute(
        pass: &mut MotionBlurPass,
        kind: CameraKind,
        ctx: &mut RecordingContext,
    ) -> Result<()> {
        let camera = CameraDescriptor::new(CameraId(1), 4, 2, Mat4::IDENTITY, Mat4::IDENTITY)
            .with_kind(kind);
        let rendering = RenderingData::new(camera);
        let state = CameraMotionState::new();
        pass.execute(&mut PassContext {
            render: ctx,
            rendering: &rendering,
            camera_state: &state,
        })
    }

    fn sub_passes(commands: &[Command]) -> Vec<u32> {
        commands
            .iter()
            .filter_map(|c| match c {
                Command::DrawFullscreen { sub_pass, .. } => Some(*sub_pass),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn ping_pong_swaps_roles() {
        let temporary = RenderTargetId::Temporary(temporary_handle());
        let mut roles = PingPong::new(RenderTargetId::CameraColor, temporary);
        roles.swap();
        assert_eq!(roles, PingPong::new(temporary, RenderTargetId::CameraColor));
    }

    #[test]
    fn composite_reads_color_then_writes_it_back() {
        let ctx = run(&mut pass(MotionBlurQuality::Medium), CameraKind::Standard);
        let temporary = RenderTargetId::Temporary(temporary_handle());

        let sources: Vec<_> = ctx
            .commands
            .iter()
            .filter_map(|c| match c {
                Command::SetGlobal {
                    name: SOURCE_TEXTURE,
                    value: GlobalValue::Texture(t),
                } => Some(*t),
                _ => None,
            })
            .collect();
        let targets: Vec<_> = ctx
            .commands
            .iter()
            .filter_map(|c| match c {
                Command::SetRenderTarget { target, depth: false } => Some(*target),
                _ => None,
            })
            .collect();

        assert_eq!(sources, vec![RenderTargetId::CameraColor, temporary]);
        assert_eq!(targets, vec![temporary, RenderTargetId::CameraColor]);
        assert!(ctx.commands.contains(&Command::SetGlobal {
            name: SOURCE_TEXEL_SIZE,
            value: GlobalValue::Vector(Vec4::new(0.25, 0.5, 4.0, 2.0)),
        }));
        assert!(ctx.commands.contains(&Command::SetGlobal {
            name: MOTION_BLUR_INTENSITY,
            value: GlobalValue::Float(0.5),
        }));
    }

    #[test]
    fn both_steps_use_the_quality_sub_pass() {
        for quality in MotionBlurQuality::ALL {
            let ctx = run(&mut pass(quality), CameraKind::Standard);
            let expected = vec![quality.pass_index(); COMPOSITE_STEPS];
            assert_eq!(sub_passes(&ctx.commands), expected);
        }
    }

    #[test]
    fn temporary_is_hdr_with_16_bit_depth_and_released() {
        let ctx = run(&mut pass(MotionBlurQuality::Low), CameraKind::Standard);
        let acquired: Vec<_> = ctx
            .commands
            .iter()
            .filter_map(|c| match c {
                Command::GetTemporaryTarget { desc, filter, .. } => Some((*desc, *filter)),
                _ => None,
            })
            .collect();
        assert_eq!(acquired.len(), 1);
        assert_eq!(acquired[0].0.format, HDR_FORMAT);
        assert_eq!(acquired[0].0.depth_bits, 16);
        assert_eq!(acquired[0].1, wgpu::FilterMode::Linear);

        let released = ctx
            .commands
            .iter()
            .filter(|c| matches!(c, Command::ReleaseTemporaryTarget { .. }))
            .count();
        assert_eq!(released, 1);
        assert_eq!(ctx.commands.last(), Some(&Command::EndSample(PROFILING_TAG)));
    }

    #[test]
    fn failed_acquire_releases_nothing() {
        let mut ctx = RecordingContext::new();
        ctx.fail_acquire = true;
        let result = execute(&mut pass(MotionBlurQuality::Low), CameraKind::Standard, &mut ctx);

        assert!(matches!(result, Err(Error::Resource(_))));
        assert!(!ctx
            .commands
            .iter()
            .any(|c| matches!(c, Command::ReleaseTemporaryTarget { .. })));
        assert_eq!(sub_passes(&ctx.commands), Vec::<u32>::new());
        assert_eq!(ctx.commands.last(), Some(&Command::EndSample(PROFILING_TAG)));
    }

    #[test]
    fn preview_cameras_are_skipped_reflections_are_not() {
        assert!(run(&mut pass(MotionBlurQuality::High), CameraKind::Preview).commands.is_empty());
        let reflection = run(&mut pass(MotionBlurQuality::High), CameraKind::Reflection);
        assert!(!reflection.commands.is_empty());
    }

    #[test]
    fn missing_blur_program_fails_setup() {
        let mut pass = MotionBlurPass::new();
        assert!(matches!(
            pass.setup(&MotionBlurSettings::default(), &ShaderLibrary::new()),
            Err(Error::Shader(_))
        ));
    }
}
