//! Per-camera frame orchestration of the motion passes

use crate::camera::{CameraDescriptor, CameraId};
use crate::context::{RenderContext, RenderingData};
use crate::graph::RenderGraph;
use crate::history::{CameraMotionState, MotionHistory, MotionHistoryStore};
use crate::passes::{MotionBlurPass, MotionVectorPass};
use crate::settings::MotionBlurSettings;
use crate::shader::ShaderRegistry;
use crate::Result;
use serde::{Deserialize, Serialize};

/// Configuration for [`MotionRenderer`]
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MotionRendererConfig {
    pub settings: MotionBlurSettings,
    /// Global motion vector capability; off leaves the motion buffer zeroed
    pub motion_vectors: bool,
    /// Add the blur pass; off produces only the motion vector buffer
    pub motion_blur: bool,
}

impl Default for MotionRendererConfig {
    fn default() -> Self {
        Self {
            settings: MotionBlurSettings::default(),
            motion_vectors: true,
            motion_blur: true,
        }
    }
}

impl MotionRendererConfig {
    pub fn with_settings(mut self, settings: MotionBlurSettings) -> Self {
        self.settings = settings;
        self
    }

    pub fn with_motion_vectors(mut self, enabled: bool) -> Self {
        self.motion_vectors = enabled;
        self
    }

    pub fn with_motion_blur(mut self, enabled: bool) -> Self {
        self.motion_blur = enabled;
        self
    }

    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }
}

/// Runs the motion vector and motion blur passes for every camera frame
pub struct MotionRenderer {
    config: MotionRendererConfig,
    graph: RenderGraph,
    cameras: MotionHistoryStore,
}

impl MotionRenderer {
    /// Build the pass graph and set up every pass
    ///
    /// Fails if any motion program cannot be resolved from `shaders`.
    pub fn new(config: MotionRendererConfig, shaders: &dyn ShaderRegistry) -> Result<Self> {
        log::info!("Creating motion renderer: {:?}", config);

        let mut graph = RenderGraph::new();
        let mut motion_vectors = MotionVectorPass::new();
        motion_vectors.set_motion_vectors_enabled(config.motion_vectors);
        motion_vectors.setup(&config.settings, shaders)?;
        graph.add_pass(motion_vectors);

        if config.motion_blur {
            let mut motion_blur = MotionBlurPass::new();
            motion_blur.setup(&config.settings, shaders)?;
            graph.add_pass(motion_blur);
        }

        graph.build()?;

        Ok(Self {
            config,
            graph,
            cameras: MotionHistoryStore::new(),
        })
    }

    pub fn config(&self) -> &MotionRendererConfig {
        &self.config
    }

    pub fn settings(&self) -> &MotionBlurSettings {
        &self.config.settings
    }

    /// Apply a new settings snapshot to every pass
    pub fn set_settings(
        &mut self,
        settings: MotionBlurSettings,
        shaders: &dyn ShaderRegistry,
    ) -> Result<()> {
        if let Some(pass) = self.graph.pass_mut::<MotionVectorPass>() {
            pass.setup(&settings, shaders)?;
        }
        if let Some(pass) = self.graph.pass_mut::<MotionBlurPass>() {
            pass.setup(&settings, shaders)?;
        }
        self.config.settings = settings;
        Ok(())
    }

    pub fn set_motion_vectors_enabled(&mut self, enabled: bool) {
        if let Some(pass) = self.graph.pass_mut::<MotionVectorPass>() {
            pass.set_motion_vectors_enabled(enabled);
        }
        self.config.motion_vectors = enabled;
        log::info!("Motion vectors {}", if enabled { "enabled" } else { "disabled" });
    }

    pub fn graph(&self) -> &RenderGraph {
        &self.graph
    }

    /// Start tracking a camera; rendering an unknown camera registers it too
    pub fn register_camera(&mut self, id: CameraId) -> &mut CameraMotionState {
        self.cameras.register(id)
    }

    /// Forget a camera; if it renders again it starts without history
    pub fn remove_camera(&mut self, id: CameraId) -> Option<CameraMotionState> {
        self.cameras.remove(id)
    }

    pub fn camera_state(&self, id: CameraId) -> Option<&CameraMotionState> {
        self.cameras.get(id)
    }

    pub fn history(&self, id: CameraId) -> Option<&MotionHistory> {
        self.cameras.get(id).map(|state| &state.history)
    }

    pub fn camera_count(&self) -> usize {
        self.cameras.len()
    }

    /// Render one frame of `camera`
    ///
    /// Capture flags are snapshotted before any pass runs. The camera's
    /// view-projection is recorded into its history once the passes are done,
    /// whether or not they succeeded.
    pub fn render(&mut self, ctx: &mut dyn RenderContext, camera: &CameraDescriptor) -> Result<()> {
        let state = self.cameras.register(camera.id);

        let mut rendering = RenderingData::new(camera.clone());
        rendering.capture = state.capture();
        rendering.frame = state.history.frames_recorded();

        ctx.begin_camera(&rendering)?;
        let result = self.graph.execute(ctx, &rendering, state);
        state.history.end_frame(camera.view_projection());

        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::settings::MotionBlurQuality;
    use crate::shader::{ShaderLibrary, MOTION_BLUR_SHADER};

    #[test]
    fn graph_orders_motion_vectors_before_blur() {
        let shaders = ShaderLibrary::with_builtin();
        let renderer = MotionRenderer::new(MotionRendererConfig::default(), &shaders).unwrap();
        assert_eq!(renderer.graph().execution_order(), vec!["motion_vectors", "motion_blur"]);
    }

    #[test]
    fn blur_can_be_left_out() {
        let config = MotionRendererConfig::default().with_motion_blur(false);
        let renderer = MotionRenderer::new(config, &ShaderLibrary::with_builtin()).unwrap();
        assert_eq!(renderer.graph().execution_order(), vec!["motion_vectors"]);
    }

    #[test]
    fn blur_program_is_only_needed_with_blur() {
        let mut shaders = ShaderLibrary::new();
        shaders.register(crate::shader::CAMERA_MOTION_SHADER);
        shaders.register(crate::shader::OBJECT_MOTION_SHADER);

        assert!(MotionRenderer::new(MotionRendererConfig::default(), &shaders).is_err());
        let config = MotionRendererConfig::default().with_motion_blur(false);
        assert!(MotionRenderer::new(config, &shaders).is_ok());

        shaders.register(MOTION_BLUR_SHADER);
        assert!(MotionRenderer::new(MotionRendererConfig::default(), &shaders).is_ok());
    }

    #[test]
    fn settings_reach_every_pass() {
        let shaders = ShaderLibrary::with_builtin();
        let mut renderer = MotionRenderer::new(MotionRendererConfig::default(), &shaders).unwrap();
        let settings = MotionBlurSettings::default().with_quality(MotionBlurQuality::High);
        renderer.set_settings(settings, &shaders).unwrap();

        assert_eq!(renderer.settings(), &settings);
        assert_eq!(renderer.graph.pass_mut::<MotionBlurPass>().unwrap().settings(), &settings);
        assert_eq!(renderer.graph.pass_mut::<MotionVectorPass>().unwrap().settings(), &settings);
    }

    #[test]
    fn config_parses_partial_json() {
        let config = MotionRendererConfig::from_json(r#"{ "motion_blur": false }"#).unwrap();
        assert!(!config.motion_blur);
        assert!(config.motion_vectors);
        assert_eq!(config.settings, MotionBlurSettings::default());
    }
}
