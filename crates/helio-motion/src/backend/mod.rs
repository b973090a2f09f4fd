//! Host context implementations
//!
//! - [`gpu`]: executes recorded commands with wgpu
//! - [`cpu`]: reference implementation on f32 images, used by the tests

pub mod cpu;
pub mod gpu;

pub use cpu::{CpuContext, CpuRenderer, CpuStats, CpuTarget, Image};
pub use gpu::{GpuContext, GpuRenderer, GpuShaderLibrary, MotionGlobals, ObjectMotion};
