//! Deferred command recording
//!
//! Passes never touch the GPU directly. They record commands into a
//! [`CommandBuffer`] and hand it to the host [`RenderContext`], which executes
//! them in order and drains the buffer.
//!
//! [`RenderContext`]: crate::context::RenderContext

use crate::graph::ResourceHandle;
use crate::shader::ShaderProgram;
use glam::{Mat4, Vec4};

/// Render target a command refers to
#[derive(Debug, Copy, Clone, Hash, Eq, PartialEq)]
pub enum RenderTargetId {
    /// The camera's color target (and its depth when used as depth)
    CameraColor,
    /// A temporary target acquired with [`Command::GetTemporaryTarget`]
    Temporary(ResourceHandle),
}

/// Size and format of a render target
#[derive(Debug, Copy, Clone, Hash, Eq, PartialEq)]
pub struct TargetDescriptor {
    pub width: u32,
    pub height: u32,
    pub format: wgpu::TextureFormat,
    /// 0 for no depth attachment, otherwise 16, 24 or 32
    pub depth_bits: u32,
}

impl TargetDescriptor {
    pub fn new(width: u32, height: u32, format: wgpu::TextureFormat) -> Self {
        Self {
            width,
            height,
            format,
            depth_bits: 0,
        }
    }

    pub fn with_format(mut self, format: wgpu::TextureFormat) -> Self {
        self.format = format;
        self
    }

    pub fn with_depth_bits(mut self, depth_bits: u32) -> Self {
        self.depth_bits = depth_bits;
        self
    }

    /// Depth format matching `depth_bits`
    pub fn depth_format(&self) -> Option<wgpu::TextureFormat> {
        match self.depth_bits {
            0 => None,
            1..=16 => Some(wgpu::TextureFormat::Depth16Unorm),
            17..=24 => Some(wgpu::TextureFormat::Depth24Plus),
            _ => Some(wgpu::TextureFormat::Depth32Float),
        }
    }

    /// (1/width, 1/height, width, height)
    pub fn texel_size(&self) -> Vec4 {
        let w = self.width.max(1) as f32;
        let h = self.height.max(1) as f32;
        Vec4::new(1.0 / w, 1.0 / h, w, h)
    }
}

/// Value of a named global shader input
#[derive(Debug, Copy, Clone, PartialEq)]
pub enum GlobalValue {
    Float(f32),
    Vector(Vec4),
    Matrix(Mat4),
    Texture(RenderTargetId),
}

/// A single recorded command
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    /// Open a named profiling / debug scope
    BeginSample(&'static str),
    EndSample(&'static str),
    GetTemporaryTarget {
        handle: ResourceHandle,
        desc: TargetDescriptor,
        filter: wgpu::FilterMode,
    },
    ReleaseTemporaryTarget {
        handle: ResourceHandle,
    },
    /// Bind `target` for subsequent draws; `depth` also binds its depth attachment
    SetRenderTarget {
        target: RenderTargetId,
        depth: bool,
    },
    /// Clear the bound target's color and/or depth
    ClearRenderTarget {
        color: Option<[f32; 4]>,
        depth: Option<f32>,
    },
    SetGlobal {
        name: &'static str,
        value: GlobalValue,
    },
    /// Full-screen triangle with the given program sub-pass
    DrawFullscreen {
        program: ShaderProgram,
        sub_pass: u32,
    },
}

/// Ordered list of commands awaiting execution
#[derive(Debug, Clone, Default)]
pub struct CommandBuffer {
    name: String,
    commands: Vec<Command>,
}

impl CommandBuffer {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            commands: Vec::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn commands(&self) -> &[Command] {
        &self.commands
    }

    pub fn len(&self) -> usize {
        self.commands.len()
    }

    pub fn is_empty(&self) -> bool {
        self.commands.is_empty()
    }

    /// Take all recorded commands, leaving the buffer empty
    pub fn drain(&mut self) -> Vec<Command> {
        std::mem::take(&mut self.commands)
    }

    pub fn clear(&mut self) {
        self.commands.clear();
    }

    pub fn push(&mut self, command: Command) -> &mut Self {
        self.commands.push(command);
        self
    }

    pub fn begin_sample(&mut self, name: &'static str) -> &mut Self {
        self.push(Command::BeginSample(name))
    }

    pub fn end_sample(&mut self, name: &'static str) -> &mut Self {
        self.push(Command::EndSample(name))
    }

    pub fn get_temporary_target(
        &mut self,
        handle: ResourceHandle,
        desc: TargetDescriptor,
        filter: wgpu::FilterMode,
    ) -> &mut Self {
        self.push(Command::GetTemporaryTarget { handle, desc, filter })
    }

    pub fn release_temporary_target(&mut self, handle: ResourceHandle) -> &mut Self {
        self.push(Command::ReleaseTemporaryTarget { handle })
    }

    pub fn set_render_target(&mut self, target: RenderTargetId, depth: bool) -> &mut Self {
        self.push(Command::SetRenderTarget { target, depth })
    }

    pub fn clear_render_target(
        &mut self,
        color: Option<[f32; 4]>,
        depth: Option<f32>,
    ) -> &mut Self {
        self.push(Command::ClearRenderTarget { color, depth })
    }

    pub fn set_global_float(&mut self, name: &'static str, value: f32) -> &mut Self {
        self.push(Command::SetGlobal { name, value: GlobalValue::Float(value) })
    }

    pub fn set_global_vector(&mut self, name: &'static str, value: Vec4) -> &mut Self {
        self.push(Command::SetGlobal { name, value: GlobalValue::Vector(value) })
    }

    pub fn set_global_matrix(&mut self, name: &'static str, value: Mat4) -> &mut Self {
        self.push(Command::SetGlobal { name, value: GlobalValue::Matrix(value) })
    }

    pub fn set_global_texture(&mut self, name: &'static str, target: RenderTargetId) -> &mut Self {
        self.push(Command::SetGlobal { name, value: GlobalValue::Texture(target) })
    }

    pub fn draw_fullscreen(&mut self, program: ShaderProgram, sub_pass: u32) -> &mut Self {
        self.push(Command::DrawFullscreen { program, sub_pass })
    }
}
