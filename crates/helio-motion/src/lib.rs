//! Helio Motion - motion vectors and motion blur for the Helio renderer
//!
//! Two cooperating passes run once per frame per camera:
//!
//! - [`MotionVectorPass`] runs after opaque geometry and fills a two-channel
//!   float buffer with per-pixel screen-space velocity: a full-screen camera
//!   contribution reprojected from the previous frame's view-projection, plus
//!   additive per-object contributions from movable renderers.
//! - [`MotionBlurPass`] runs after post-processing and blurs the color target
//!   along those velocities with a two-step ping-pong composite.
//!
//! [`MotionRenderer`] orchestrates both passes and owns the per-camera
//! [`MotionHistory`]. Passes record [`command::Command`]s that a host
//! [`RenderContext`] executes; [`backend::gpu`] does so with wgpu and
//! [`backend::cpu`] is a reference implementation on plain images.

pub mod backend;
pub mod camera;
pub mod command;
pub mod context;
pub mod graph;
pub mod history;
pub mod passes;
pub mod reprojection;
pub mod resources;
pub mod settings;
pub mod shader;

mod renderer;

pub use camera::{CameraDescriptor, CameraId, CameraKind, CaptureFlags};
pub use command::{CommandBuffer, RenderTargetId, TargetDescriptor};
pub use context::{RenderContext, RenderingData};
pub use history::{CameraMotionState, MotionHistory, MotionHistoryStore};
pub use passes::{MotionBlurPass, MotionVectorPass};
pub use renderer::{MotionRenderer, MotionRendererConfig};
pub use settings::{MotionBlurQuality, MotionBlurSettings};
pub use shader::{ShaderLibrary, ShaderProgram, ShaderRegistry};

/// Result type for motion rendering operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while setting up or recording the motion passes
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// A named shader program could not be resolved
    #[error("Shader error: {0}")]
    Shader(String),

    /// The host broke the pass lifecycle contract
    #[error("Precondition violated: {0}")]
    Precondition(String),

    #[error("Graph error: {0}")]
    Graph(String),

    #[error("Resource error: {0}")]
    Resource(String),

    #[error("Config error: {0}")]
    Config(String),

    #[error("WGPU error: {0}")]
    Wgpu(String),
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::Config(err.to_string())
    }
}
