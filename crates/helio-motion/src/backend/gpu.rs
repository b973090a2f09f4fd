//! wgpu backend
//!
//! [`GpuShaderLibrary`] compiles the motion WGSL into pipelines and
//! [`GpuContext`] translates recorded commands into render passes on a
//! single command encoder per frame.
//!
//! The host owns the camera's color (`Rgba16Float`) and depth textures; both
//! need `RENDER_ATTACHMENT | TEXTURE_BINDING` usage.

use crate::camera::{CameraDescriptor, CaptureFlags, HDR_FORMAT};
use crate::command::{Command, CommandBuffer, GlobalValue, RenderTargetId};
use crate::context::{
    CullingResults, DrawingSettings, FilteringSettings, PerObjectData, RenderContext,
    RenderingData, SortingCriteria,
};
use crate::passes::motion_vectors::MOTION_VECTOR_FORMAT;
use crate::passes::{
    CAMERA_MOTION_FACTOR, MOTION_BLUR_INTENSITY, MOTION_VECTOR_TEXTURE, PER_OBJECT_MOTION_FACTOR,
    PREV_VIEW_PROJ, SOURCE_TEXEL_SIZE, SOURCE_TEXTURE,
};
use crate::resources::{PoolStats, TargetKey, TargetPool};
use crate::settings::MotionBlurQuality;
use crate::shader::{
    ShaderLibrary, ShaderProgram, ShaderRegistry, CAMERA_MOTION_SHADER, MOTION_BLUR_SHADER,
};
use crate::{Error, Result};
use bytemuck::{Pod, Zeroable};
use glam::{Mat4, Vec4};
use std::collections::HashMap;
use std::sync::Arc;
use wgpu::util::DeviceExt;

const GLOBALS_WGSL: &str = include_str!("../../shaders/globals.wgsl");
const FULLSCREEN_WGSL: &str = include_str!("../../shaders/fullscreen.wgsl");
const CAMERA_MOTION_WGSL: &str = include_str!("../../shaders/camera_motion.wgsl");
const MOTION_BLUR_WGSL: &str = include_str!("../../shaders/motion_blur.wgsl");
const OBJECT_MOTION_WGSL: &str = include_str!("../../shaders/object_motion.wgsl");

const MOTION_DEPTH_FORMAT: wgpu::TextureFormat = wgpu::TextureFormat::Depth32Float;

const ADDITIVE: wgpu::BlendState = wgpu::BlendState {
    color: wgpu::BlendComponent {
        src_factor: wgpu::BlendFactor::One,
        dst_factor: wgpu::BlendFactor::One,
        operation: wgpu::BlendOperation::Add,
    },
    alpha: wgpu::BlendComponent {
        src_factor: wgpu::BlendFactor::One,
        dst_factor: wgpu::BlendFactor::One,
        operation: wgpu::BlendOperation::Add,
    },
};

/// Uniform block shared by every motion shader (group 0)
#[repr(C)]
#[derive(Debug, Clone, Copy, Pod, Zeroable)]
pub struct MotionGlobals {
    pub view_proj: [[f32; 4]; 4],
    pub inv_view_proj: [[f32; 4]; 4],
    pub prev_view_proj: [[f32; 4]; 4],
    /// (1/width, 1/height, width, height) of the blur source
    pub source_texel_size: [f32; 4],
    pub camera_motion_factor: f32,
    pub per_object_motion_factor: f32,
    pub blur_intensity: f32,
    pub _pad: f32,
}

/// Per-renderer transforms for the object motion shader (group 1)
#[repr(C)]
#[derive(Debug, Clone, Copy, Pod, Zeroable)]
pub struct ObjectMotion {
    pub model: [[f32; 4]; 4],
    pub previous_model: [[f32; 4]; 4],
}

/// Compiled motion pipelines, addressable by program name
pub struct GpuShaderLibrary {
    names: ShaderLibrary,
    camera_program: ShaderProgram,
    blur_program: ShaderProgram,
    globals_layout: wgpu::BindGroupLayout,
    textures_layout: wgpu::BindGroupLayout,
    object_layout: wgpu::BindGroupLayout,
    camera_motion: wgpu::RenderPipeline,
    /// Indexed by blur quality sub-pass
    blur: Vec<wgpu::RenderPipeline>,
    object_motion: Arc<wgpu::RenderPipeline>,
}

impl GpuShaderLibrary {
    pub fn new(device: &wgpu::Device) -> Result<Self> {
        let names = ShaderLibrary::with_builtin();
        let camera_program = names.resolve(CAMERA_MOTION_SHADER)?;
        let blur_program = names.resolve(MOTION_BLUR_SHADER)?;

        let globals_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("Motion Globals Layout"),
            entries: &[wgpu::BindGroupLayoutEntry {
                binding: 0,
                visibility: wgpu::ShaderStages::VERTEX_FRAGMENT,
                ty: wgpu::BindingType::Buffer {
                    ty: wgpu::BufferBindingType::Uniform,
                    has_dynamic_offset: false,
                    min_binding_size: None,
                },
                count: None,
            }],
        });

        let float_texture = |binding| wgpu::BindGroupLayoutEntry {
            binding,
            visibility: wgpu::ShaderStages::FRAGMENT,
            ty: wgpu::BindingType::Texture {
                sample_type: wgpu::TextureSampleType::Float { filterable: true },
                view_dimension: wgpu::TextureViewDimension::D2,
                multisampled: false,
            },
            count: None,
        };
        let textures_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("Motion Textures Layout"),
            entries: &[
                // source_texture
                float_texture(0),
                // motion_texture
                float_texture(1),
                wgpu::BindGroupLayoutEntry {
                    binding: 2,
                    visibility: wgpu::ShaderStages::FRAGMENT,
                    ty: wgpu::BindingType::Texture {
                        sample_type: wgpu::TextureSampleType::Depth,
                        view_dimension: wgpu::TextureViewDimension::D2,
                        multisampled: false,
                    },
                    count: None,
                },
                wgpu::BindGroupLayoutEntry {
                    binding: 3,
                    visibility: wgpu::ShaderStages::FRAGMENT,
                    ty: wgpu::BindingType::Sampler(wgpu::SamplerBindingType::Filtering),
                    count: None,
                },
            ],
        });

        let object_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("Object Motion Layout"),
            entries: &[wgpu::BindGroupLayoutEntry {
                binding: 0,
                visibility: wgpu::ShaderStages::VERTEX,
                ty: wgpu::BindingType::Buffer {
                    ty: wgpu::BufferBindingType::Uniform,
                    has_dynamic_offset: false,
                    min_binding_size: None,
                },
                count: None,
            }],
        });

        let fullscreen_shader = device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some("Motion Fullscreen Shader"),
            source: wgpu::ShaderSource::Wgsl(
                [GLOBALS_WGSL, FULLSCREEN_WGSL, CAMERA_MOTION_WGSL, MOTION_BLUR_WGSL]
                    .concat()
                    .into(),
            ),
        });
        let object_shader = device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some("Object Motion Shader"),
            source: wgpu::ShaderSource::Wgsl([GLOBALS_WGSL, OBJECT_MOTION_WGSL].concat().into()),
        });

        let fullscreen_layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some("Motion Fullscreen Pipeline Layout"),
            bind_group_layouts: &[&globals_layout, &textures_layout],
            push_constant_ranges: &[],
        });

        let camera_motion = fullscreen_pipeline(
            device,
            &fullscreen_layout,
            &fullscreen_shader,
            "fs_camera_motion",
            MOTION_VECTOR_FORMAT,
            Some(wgpu::DepthStencilState {
                format: MOTION_DEPTH_FORMAT,
                depth_write_enabled: false,
                depth_compare: wgpu::CompareFunction::Always,
                stencil: wgpu::StencilState::default(),
                bias: wgpu::DepthBiasState::default(),
            }),
        );

        let blur = MotionBlurQuality::ALL
            .iter()
            .map(|quality| {
                let entry_point = match quality {
                    MotionBlurQuality::Low => "fs_blur_low",
                    MotionBlurQuality::Medium => "fs_blur_medium",
                    MotionBlurQuality::High => "fs_blur_high",
                };
                fullscreen_pipeline(
                    device,
                    &fullscreen_layout,
                    &fullscreen_shader,
                    entry_point,
                    HDR_FORMAT,
                    None,
                )
            })
            .collect();

        let object_pipeline_layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some("Object Motion Pipeline Layout"),
            bind_group_layouts: &[&globals_layout, &object_layout],
            push_constant_ranges: &[],
        });
        let object_motion = device.create_render_pipeline(&wgpu::RenderPipelineDescriptor {
            label: Some("Object Motion Pipeline"),
            layout: Some(&object_pipeline_layout),
            cache: None,
            vertex: wgpu::VertexState {
                module: &object_shader,
                entry_point: Some("vs_object_motion"),
                buffers: &[wgpu::VertexBufferLayout {
                    // position only
                    array_stride: 12,
                    step_mode: wgpu::VertexStepMode::Vertex,
                    attributes: &[wgpu::VertexAttribute {
                        format: wgpu::VertexFormat::Float32x3,
                        offset: 0,
                        shader_location: 0,
                    }],
                }],
                compilation_options: wgpu::PipelineCompilationOptions::default(),
            },
            fragment: Some(wgpu::FragmentState {
                module: &object_shader,
                entry_point: Some("fs_object_motion"),
                targets: &[Some(wgpu::ColorTargetState {
                    format: MOTION_VECTOR_FORMAT,
                    blend: Some(ADDITIVE),
                    write_mask: wgpu::ColorWrites::ALL,
                })],
                compilation_options: wgpu::PipelineCompilationOptions::default(),
            }),
            primitive: wgpu::PrimitiveState {
                topology: wgpu::PrimitiveTopology::TriangleList,
                front_face: wgpu::FrontFace::Ccw,
                cull_mode: Some(wgpu::Face::Back),
                ..Default::default()
            },
            depth_stencil: Some(wgpu::DepthStencilState {
                format: MOTION_DEPTH_FORMAT,
                depth_write_enabled: true,
                depth_compare: wgpu::CompareFunction::LessEqual,
                stencil: wgpu::StencilState::default(),
                bias: wgpu::DepthBiasState::default(),
            }),
            multisample: wgpu::MultisampleState::default(),
            multiview: None,
        });

        log::info!("Compiled motion pipelines");

        Ok(Self {
            names,
            camera_program,
            blur_program,
            globals_layout,
            textures_layout,
            object_layout,
            camera_motion,
            blur,
            object_motion: Arc::new(object_motion),
        })
    }

    /// Pipeline for host materials exposing a motion vector pass
    pub fn object_motion_pipeline(&self) -> Arc<wgpu::RenderPipeline> {
        self.object_motion.clone()
    }

    pub fn globals_layout(&self) -> &wgpu::BindGroupLayout {
        &self.globals_layout
    }

    pub fn object_layout(&self) -> &wgpu::BindGroupLayout {
        &self.object_layout
    }
}

impl ShaderRegistry for GpuShaderLibrary {
    fn find(&self, name: &str) -> Option<ShaderProgram> {
        self.names.find(name)
    }
}

fn fullscreen_pipeline(
    device: &wgpu::Device,
    layout: &wgpu::PipelineLayout,
    shader: &wgpu::ShaderModule,
    fragment_entry: &str,
    format: wgpu::TextureFormat,
    depth_stencil: Option<wgpu::DepthStencilState>,
) -> wgpu::RenderPipeline {
    device.create_render_pipeline(&wgpu::RenderPipelineDescriptor {
        label: Some(fragment_entry),
        layout: Some(layout),
        cache: None,
        vertex: wgpu::VertexState {
            module: shader,
            entry_point: Some("vs_fullscreen"),
            buffers: &[],
            compilation_options: wgpu::PipelineCompilationOptions::default(),
        },
        fragment: Some(wgpu::FragmentState {
            module: shader,
            entry_point: Some(fragment_entry),
            targets: &[Some(wgpu::ColorTargetState {
                format,
                blend: None,
                write_mask: wgpu::ColorWrites::ALL,
            })],
            compilation_options: wgpu::PipelineCompilationOptions::default(),
        }),
        primitive: wgpu::PrimitiveState {
            topology: wgpu::PrimitiveTopology::TriangleList,
            ..Default::default()
        },
        depth_stencil,
        multisample: wgpu::MultisampleState::default(),
        multiview: None,
    })
}

/// Pooled temporary texture with optional depth attachment
struct GpuTarget {
    view: wgpu::TextureView,
    depth_view: Option<wgpu::TextureView>,
    filter: wgpu::FilterMode,
}

impl GpuTarget {
    fn new(device: &wgpu::Device, key: &TargetKey, filter: wgpu::FilterMode) -> Self {
        let size = wgpu::Extent3d {
            width: key.width.max(1),
            height: key.height.max(1),
            depth_or_array_layers: 1,
        };
        let texture = device.create_texture(&wgpu::TextureDescriptor {
            label: Some("Motion Temporary Target"),
            size,
            mip_level_count: 1,
            sample_count: 1,
            dimension: wgpu::TextureDimension::D2,
            format: key.format,
            usage: wgpu::TextureUsages::RENDER_ATTACHMENT
                | wgpu::TextureUsages::TEXTURE_BINDING
                | wgpu::TextureUsages::COPY_SRC,
            view_formats: &[],
        });
        let depth_view = key.to_descriptor().depth_format().map(|format| {
            device
                .create_texture(&wgpu::TextureDescriptor {
                    label: Some("Motion Temporary Depth"),
                    size,
                    mip_level_count: 1,
                    sample_count: 1,
                    dimension: wgpu::TextureDimension::D2,
                    format,
                    usage: wgpu::TextureUsages::RENDER_ATTACHMENT,
                    view_formats: &[],
                })
                .create_view(&wgpu::TextureViewDescriptor::default())
        });

        Self {
            view: texture.create_view(&wgpu::TextureViewDescriptor::default()),
            depth_view,
            filter,
        }
    }
}

/// The camera's own color and depth textures for the current frame
struct FrameTargets {
    color_view: wgpu::TextureView,
    /// Every aspect, for use as an attachment
    depth_view: wgpu::TextureView,
    /// Depth aspect only, for binding as `texture_depth_2d`
    depth_sample_view: wgpu::TextureView,
    has_stencil: bool,
    width: u32,
    height: u32,
}

/// A host mesh that can contribute object motion
pub struct GpuRenderer {
    /// Float32x3 positions
    pub vertex_buffer: Arc<wgpu::Buffer>,
    /// Uint32 indices
    pub index_buffer: Arc<wgpu::Buffer>,
    pub index_count: u32,
    pub model: Mat4,
    pub previous_model: Mat4,
    pub queue: u32,
    pub layer: u32,
    /// Material pass tags
    pub shader_passes: Vec<String>,
    /// Material motion vector pipeline; renderers without one are not drawn
    pub motion_pipeline: Option<Arc<wgpu::RenderPipeline>>,
}

impl GpuRenderer {
    pub fn new(
        vertex_buffer: Arc<wgpu::Buffer>,
        index_buffer: Arc<wgpu::Buffer>,
        index_count: u32,
    ) -> Self {
        Self {
            vertex_buffer,
            index_buffer,
            index_count,
            model: Mat4::IDENTITY,
            previous_model: Mat4::IDENTITY,
            queue: 2000,
            layer: 0,
            shader_passes: vec!["forward".to_string()],
            motion_pipeline: None,
        }
    }

    /// Give the material a motion vector pass using `pipeline`
    pub fn with_motion_pipeline(mut self, pipeline: Arc<wgpu::RenderPipeline>) -> Self {
        self.shader_passes.push("motion_vectors".to_string());
        self.motion_pipeline = Some(pipeline);
        self
    }

    pub fn with_model(mut self, model: Mat4) -> Self {
        self.model = model;
        self.previous_model = model;
        self
    }

    pub fn with_layer(mut self, layer: u32) -> Self {
        self.layer = layer;
        self
    }

    /// Advance one frame: the current transform becomes the previous one
    pub fn set_model(&mut self, model: Mat4) {
        self.previous_model = self.model;
        self.model = model;
    }
}

/// [`RenderContext`] recording into a wgpu command encoder
pub struct GpuContext {
    device: Arc<wgpu::Device>,
    queue: Arc<wgpu::Queue>,
    library: Arc<GpuShaderLibrary>,
    pool: TargetPool<GpuTarget>,
    globals: HashMap<&'static str, GlobalValue>,
    linear_sampler: wgpu::Sampler,
    point_sampler: wgpu::Sampler,
    fallback_color: wgpu::TextureView,
    fallback_depth: wgpu::TextureView,
    frame: Option<FrameTargets>,
    renderers: Vec<GpuRenderer>,
    encoder: Option<wgpu::CommandEncoder>,
    bound: Option<(RenderTargetId, bool)>,
    rendering: Option<RenderingData>,
}

impl GpuContext {
    pub fn new(
        device: Arc<wgpu::Device>,
        queue: Arc<wgpu::Queue>,
        library: Arc<GpuShaderLibrary>,
    ) -> Self {
        let sampler = |filter, label| {
            device.create_sampler(&wgpu::SamplerDescriptor {
                label: Some(label),
                address_mode_u: wgpu::AddressMode::ClampToEdge,
                address_mode_v: wgpu::AddressMode::ClampToEdge,
                address_mode_w: wgpu::AddressMode::ClampToEdge,
                mag_filter: filter,
                min_filter: filter,
                ..Default::default()
            })
        };
        let linear_sampler = sampler(wgpu::FilterMode::Linear, "Motion Linear Sampler");
        let point_sampler = sampler(wgpu::FilterMode::Nearest, "Motion Point Sampler");

        let fallback = |format, usage, label| {
            device
                .create_texture(&wgpu::TextureDescriptor {
                    label: Some(label),
                    size: wgpu::Extent3d { width: 1, height: 1, depth_or_array_layers: 1 },
                    mip_level_count: 1,
                    sample_count: 1,
                    dimension: wgpu::TextureDimension::D2,
                    format,
                    usage,
                    view_formats: &[],
                })
                .create_view(&wgpu::TextureViewDescriptor::default())
        };
        // Zero-initialized: no motion, black source
        let fallback_color = fallback(
            HDR_FORMAT,
            wgpu::TextureUsages::TEXTURE_BINDING,
            "Motion Fallback Color",
        );
        let fallback_depth = fallback(
            MOTION_DEPTH_FORMAT,
            wgpu::TextureUsages::TEXTURE_BINDING | wgpu::TextureUsages::RENDER_ATTACHMENT,
            "Motion Fallback Depth",
        );

        Self {
            device,
            queue,
            library,
            pool: TargetPool::new(),
            globals: HashMap::new(),
            linear_sampler,
            point_sampler,
            fallback_color,
            fallback_depth,
            frame: None,
            renderers: Vec::new(),
            encoder: None,
            bound: None,
            rendering: None,
        }
    }

    /// Set the camera textures the next camera renders into
    ///
    /// `depth` may carry a stencil aspect; the stencil contents are preserved.
    pub fn set_frame_targets(
        &mut self,
        color: &wgpu::Texture,
        depth: &wgpu::Texture,
    ) -> Result<()> {
        if color.format() != HDR_FORMAT {
            return Err(Error::Wgpu(format!(
                "Camera color must be {:?}, got {:?}",
                HDR_FORMAT,
                color.format()
            )));
        }
        if !depth.format().has_depth_aspect() {
            return Err(Error::Wgpu(format!("{:?} is not a depth format", depth.format())));
        }
        self.frame = Some(FrameTargets {
            color_view: color.create_view(&wgpu::TextureViewDescriptor::default()),
            depth_view: depth.create_view(&wgpu::TextureViewDescriptor::default()),
            depth_sample_view: depth.create_view(&wgpu::TextureViewDescriptor {
                label: Some("Camera Depth Sample View"),
                aspect: wgpu::TextureAspect::DepthOnly,
                ..Default::default()
            }),
            has_stencil: depth.format().has_stencil_aspect(),
            width: color.width(),
            height: color.height(),
        });
        Ok(())
    }

    pub fn add_renderer(&mut self, renderer: GpuRenderer) -> usize {
        self.renderers.push(renderer);
        self.renderers.len() - 1
    }

    pub fn renderer_mut(&mut self, index: usize) -> Option<&mut GpuRenderer> {
        self.renderers.get_mut(index)
    }

    /// Submit everything recorded since the last submit
    pub fn submit(&mut self) {
        if let Some(encoder) = self.encoder.take() {
            self.queue.submit(std::iter::once(encoder.finish()));
        }
    }

    pub fn pool_stats(&self) -> PoolStats {
        self.pool.stats()
    }

    fn with_encoder<R>(
        &mut self,
        f: impl FnOnce(&Self, &mut wgpu::CommandEncoder) -> Result<R>,
    ) -> Result<R> {
        let mut encoder = self.encoder.take().ok_or_else(|| {
            Error::Precondition("Commands recorded outside of a camera".to_string())
        })?;
        let result = f(self, &mut encoder);
        self.encoder = Some(encoder);
        result
    }

    fn rendering(&self) -> Result<&RenderingData> {
        self.rendering
            .as_ref()
            .ok_or_else(|| Error::Precondition("Draw outside of a camera".to_string()))
    }

    fn bound(&self) -> Result<(RenderTargetId, bool)> {
        self.bound
            .ok_or_else(|| Error::Precondition("Draw without a render target".to_string()))
    }

    fn color_view(&self, id: RenderTargetId) -> Result<&wgpu::TextureView> {
        match id {
            RenderTargetId::CameraColor => self
                .frame
                .as_ref()
                .map(|frame| &frame.color_view)
                .ok_or_else(|| Error::Precondition("No camera targets set".to_string())),
            RenderTargetId::Temporary(handle) => self
                .pool
                .get(handle)
                .map(|target| &target.view)
                .ok_or_else(|| Error::Precondition(format!("Unknown render target {:?}", handle))),
        }
    }

    /// Depth attachment view of `id` and whether it also has a stencil aspect
    fn depth_attachment(&self, id: RenderTargetId) -> Option<(&wgpu::TextureView, bool)> {
        match id {
            RenderTargetId::CameraColor => {
                self.frame.as_ref().map(|frame| (&frame.depth_view, frame.has_stencil))
            }
            RenderTargetId::Temporary(handle) => self
                .pool
                .get(handle)
                .and_then(|t| t.depth_view.as_ref())
                .map(|view| (view, false)),
        }
    }

    fn filter_of(&self, id: RenderTargetId) -> wgpu::FilterMode {
        match id {
            RenderTargetId::CameraColor => wgpu::FilterMode::Linear,
            RenderTargetId::Temporary(handle) => self
                .pool
                .get(handle)
                .map_or(wgpu::FilterMode::Linear, |target| target.filter),
        }
    }

    fn global_float(&self, name: &str) -> f32 {
        match self.globals.get(name) {
            Some(GlobalValue::Float(value)) => *value,
            _ => 0.0,
        }
    }

    fn global_texture(&self, name: &str) -> Option<RenderTargetId> {
        match self.globals.get(name) {
            Some(GlobalValue::Texture(value)) => Some(*value),
            _ => None,
        }
    }

    fn motion_globals(&self) -> Result<MotionGlobals> {
        let view_proj = self.rendering()?.camera.view_projection();
        let prev_view_proj = match self.globals.get(PREV_VIEW_PROJ) {
            Some(GlobalValue::Matrix(value)) => *value,
            _ => view_proj,
        };
        let source_texel_size = match self.globals.get(SOURCE_TEXEL_SIZE) {
            Some(GlobalValue::Vector(value)) => *value,
            _ => Vec4::ZERO,
        };
        Ok(MotionGlobals {
            view_proj: view_proj.to_cols_array_2d(),
            inv_view_proj: view_proj.inverse().to_cols_array_2d(),
            prev_view_proj: prev_view_proj.to_cols_array_2d(),
            source_texel_size: source_texel_size.to_array(),
            camera_motion_factor: self.global_float(CAMERA_MOTION_FACTOR),
            per_object_motion_factor: self.global_float(PER_OBJECT_MOTION_FACTOR),
            blur_intensity: self.global_float(MOTION_BLUR_INTENSITY),
            _pad: 0.0,
        })
    }

    /// Globals are baked into a fresh buffer per draw so each draw sees the
    /// values recorded before it
    fn globals_bind_group(&self) -> Result<wgpu::BindGroup> {
        let globals = self.motion_globals()?;
        let buffer = self.device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some("Motion Globals"),
            contents: bytemuck::bytes_of(&globals),
            usage: wgpu::BufferUsages::UNIFORM,
        });
        Ok(self.device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("Motion Globals Bind Group"),
            layout: &self.library.globals_layout,
            entries: &[wgpu::BindGroupEntry {
                binding: 0,
                resource: buffer.as_entire_binding(),
            }],
        }))
    }

    /// A texture global, or the fallback when unset, released or being written
    fn sampled_view(
        &self,
        name: &str,
        bound: RenderTargetId,
    ) -> (&wgpu::TextureView, wgpu::FilterMode) {
        match self.global_texture(name) {
            Some(id) if id != bound => match self.color_view(id) {
                Ok(view) => (view, self.filter_of(id)),
                Err(_) => (&self.fallback_color, wgpu::FilterMode::Linear),
            },
            _ => (&self.fallback_color, wgpu::FilterMode::Linear),
        }
    }

    fn textures_bind_group(&self, bound: RenderTargetId, bound_depth: bool) -> wgpu::BindGroup {
        let (source, filter) = self.sampled_view(SOURCE_TEXTURE, bound);
        let (motion, _) = self.sampled_view(MOTION_VECTOR_TEXTURE, bound);
        let depth = match &self.frame {
            Some(frame) if !(bound == RenderTargetId::CameraColor && bound_depth) => {
                &frame.depth_sample_view
            }
            _ => &self.fallback_depth,
        };
        let sampler = match filter {
            wgpu::FilterMode::Nearest => &self.point_sampler,
            wgpu::FilterMode::Linear => &self.linear_sampler,
        };

        self.device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("Motion Textures Bind Group"),
            layout: &self.library.textures_layout,
            entries: &[
                wgpu::BindGroupEntry {
                    binding: 0,
                    resource: wgpu::BindingResource::TextureView(source),
                },
                wgpu::BindGroupEntry {
                    binding: 1,
                    resource: wgpu::BindingResource::TextureView(motion),
                },
                wgpu::BindGroupEntry {
                    binding: 2,
                    resource: wgpu::BindingResource::TextureView(depth),
                },
                wgpu::BindGroupEntry {
                    binding: 3,
                    resource: wgpu::BindingResource::Sampler(sampler),
                },
            ],
        })
    }

    fn begin_pass<'e>(
        &self,
        encoder: &'e mut wgpu::CommandEncoder,
        label: &str,
        target: RenderTargetId,
        depth_bound: bool,
        color_load: wgpu::LoadOp<wgpu::Color>,
        depth_load: wgpu::LoadOp<f32>,
    ) -> Result<wgpu::RenderPass<'e>> {
        let view = self.color_view(target)?;
        let depth_view = if depth_bound { self.depth_attachment(target) } else { None };
        Ok(encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
            label: Some(label),
            color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                view,
                resolve_target: None,
                ops: wgpu::Operations {
                    load: color_load,
                    store: wgpu::StoreOp::Store,
                },
            })],
            depth_stencil_attachment: depth_view.map(|(view, has_stencil)| {
                wgpu::RenderPassDepthStencilAttachment {
                    view,
                    depth_ops: Some(wgpu::Operations {
                        load: depth_load,
                        store: wgpu::StoreOp::Store,
                    }),
                    stencil_ops: has_stencil.then_some(wgpu::Operations {
                        load: wgpu::LoadOp::Load,
                        store: wgpu::StoreOp::Store,
                    }),
                }
            }),
            timestamp_writes: None,
            occlusion_query_set: None,
        }))
    }

    fn clear(&mut self, color: Option<[f32; 4]>, depth: Option<f32>) -> Result<()> {
        let (target, depth_bound) = self.bound()?;
        let color_load = color.map_or(wgpu::LoadOp::Load, |[r, g, b, a]| {
            wgpu::LoadOp::Clear(wgpu::Color {
                r: r as f64,
                g: g as f64,
                b: b as f64,
                a: a as f64,
            })
        });
        let depth_load = depth.map_or(wgpu::LoadOp::Load, wgpu::LoadOp::Clear);

        self.with_encoder(|ctx, encoder| {
            ctx.begin_pass(encoder, "Motion Clear", target, depth_bound, color_load, depth_load)?;
            Ok(())
        })
    }

    fn draw_fullscreen(&mut self, program: ShaderProgram, sub_pass: u32) -> Result<()> {
        let library = self.library.clone();
        let (target, depth_bound) = self.bound()?;

        let pipeline = if program == library.camera_program {
            &library.camera_motion
        } else if program == library.blur_program {
            if self.global_texture(SOURCE_TEXTURE) == Some(target) {
                return Err(Error::Precondition(
                    "Motion blur source and destination are the same target".to_string(),
                ));
            }
            library
                .blur
                .get(sub_pass as usize)
                .ok_or_else(|| Error::Shader(format!("Motion blur has no sub-pass {}", sub_pass)))?
        } else {
            return Err(Error::Shader(format!("{:?} is not a full-screen program", program)));
        };

        let globals = self.globals_bind_group()?;
        let textures = self.textures_bind_group(target, depth_bound);
        self.with_encoder(|ctx, encoder| {
            let mut pass = ctx.begin_pass(
                encoder,
                "Motion Fullscreen",
                target,
                depth_bound,
                wgpu::LoadOp::Load,
                wgpu::LoadOp::Load,
            )?;
            pass.set_pipeline(pipeline);
            pass.set_bind_group(0, &globals, &[]);
            pass.set_bind_group(1, &textures, &[]);
            pass.draw(0..3, 0..1);
            Ok(())
        })
    }

    fn record_renderers(
        &self,
        encoder: &mut wgpu::CommandEncoder,
        culling: &CullingResults,
        drawing: &DrawingSettings,
        filtering: &FilteringSettings,
    ) -> Result<usize> {
        let (target, depth_bound) = self.bound()?;
        let rendering = self.rendering()?;
        let eye = rendering.camera.position();
        let tracks_previous = rendering.capture.contains(CaptureFlags::MOTION_VECTORS)
            && drawing.per_object_data.contains(PerObjectData::MOTION_VECTORS);

        let mut draws: Vec<(&GpuRenderer, &Arc<wgpu::RenderPipeline>)> = culling
            .visible
            .iter()
            .filter_map(|&i| self.renderers.get(i))
            .filter(|r| {
                filtering.accepts(r.queue, r.layer) && drawing.accepts(r.shader_passes.as_slice())
            })
            .filter_map(|r| r.motion_pipeline.as_ref().map(|pipeline| (r, pipeline)))
            .collect();
        if draws.is_empty() {
            return Ok(0);
        }
        if !depth_bound || self.depth_attachment(target).is_none() {
            return Err(Error::Precondition(
                "Object motion needs a depth attachment".to_string(),
            ));
        }

        let distance = |r: &GpuRenderer| (r.model.w_axis.truncate() - eye).length_squared();
        match drawing.sorting {
            SortingCriteria::CommonOpaque => {
                draws.sort_by(|a, b| distance(a.0).total_cmp(&distance(b.0)))
            }
            SortingCriteria::CommonTransparent => {
                draws.sort_by(|a, b| distance(b.0).total_cmp(&distance(a.0)))
            }
            SortingCriteria::None => {}
        }

        let globals = self.globals_bind_group()?;
        let objects: Vec<wgpu::BindGroup> = draws
            .iter()
            .map(|(renderer, _)| {
                let previous_model = if tracks_previous {
                    renderer.previous_model
                } else {
                    renderer.model
                };
                let uniform = ObjectMotion {
                    model: renderer.model.to_cols_array_2d(),
                    previous_model: previous_model.to_cols_array_2d(),
                };
                let buffer = self.device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
                    label: Some("Object Motion Uniform"),
                    contents: bytemuck::bytes_of(&uniform),
                    usage: wgpu::BufferUsages::UNIFORM,
                });
                self.device.create_bind_group(&wgpu::BindGroupDescriptor {
                    label: Some("Object Motion Bind Group"),
                    layout: &self.library.object_layout,
                    entries: &[wgpu::BindGroupEntry {
                        binding: 0,
                        resource: buffer.as_entire_binding(),
                    }],
                })
            })
            .collect();

        let mut pass = self.begin_pass(
            encoder,
            "Object Motion",
            target,
            true,
            wgpu::LoadOp::Load,
            wgpu::LoadOp::Load,
        )?;
        for ((renderer, pipeline), object) in draws.iter().zip(&objects) {
            pass.set_pipeline(pipeline);
            pass.set_bind_group(0, &globals, &[]);
            pass.set_bind_group(1, object, &[]);
            pass.set_vertex_buffer(0, renderer.vertex_buffer.slice(..));
            pass.set_index_buffer(renderer.index_buffer.slice(..), wgpu::IndexFormat::Uint32);
            pass.draw_indexed(0..renderer.index_count, 0, 0..1);
        }

        Ok(draws.len())
    }

    fn execute_command(&mut self, command: Command) -> Result<()> {
        match command {
            Command::BeginSample(name) => {
                self.with_encoder(|_, encoder| {
                    encoder.push_debug_group(name);
                    Ok(())
                })?;
            }
            Command::EndSample(_) => {
                self.with_encoder(|_, encoder| {
                    encoder.pop_debug_group();
                    Ok(())
                })?;
            }
            Command::GetTemporaryTarget { handle, desc, filter } => {
                let device = &self.device;
                let target = self
                    .pool
                    .acquire(handle, &desc, |key| GpuTarget::new(device, key, filter))?;
                target.filter = filter;
            }
            Command::ReleaseTemporaryTarget { handle } => {
                self.pool.release(handle)?;
                let temporary = RenderTargetId::Temporary(handle);
                if matches!(self.bound, Some((bound, _)) if bound == temporary) {
                    self.bound = None;
                }
            }
            Command::SetRenderTarget { target, depth } => {
                self.color_view(target)?;
                if depth && self.depth_attachment(target).is_none() {
                    return Err(Error::Precondition(format!(
                        "{:?} has no depth attachment",
                        target
                    )));
                }
                self.bound = Some((target, depth));
            }
            Command::ClearRenderTarget { color, depth } => self.clear(color, depth)?,
            Command::SetGlobal { name, value } => {
                self.globals.insert(name, value);
            }
            Command::DrawFullscreen { program, sub_pass } => {
                self.draw_fullscreen(program, sub_pass)?
            }
        }
        Ok(())
    }
}

impl RenderContext for GpuContext {
    fn begin_camera(&mut self, rendering: &RenderingData) -> Result<()> {
        let camera = &rendering.camera;
        let frame = self
            .frame
            .as_ref()
            .ok_or_else(|| Error::Precondition("No camera targets set".to_string()))?;
        if (frame.width, frame.height) != (camera.width, camera.height) {
            return Err(Error::Precondition(format!(
                "Camera is {}x{}, targets are {}x{}",
                camera.width, camera.height, frame.width, frame.height
            )));
        }

        if self.encoder.is_none() {
            self.encoder = Some(self.device.create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("Motion Encoder"),
            }));
        }
        self.pool.begin_frame();
        self.bound = None;
        self.rendering = Some(rendering.clone());
        Ok(())
    }

    fn execute_command_buffer(&mut self, cmd: &mut CommandBuffer) -> Result<()> {
        log::trace!("Recording '{}' ({} commands)", cmd.name(), cmd.len());
        for command in cmd.drain() {
            self.execute_command(command)?;
        }
        Ok(())
    }

    fn cull(&mut self, camera: &CameraDescriptor) -> Option<CullingResults> {
        let visible = self
            .renderers
            .iter()
            .enumerate()
            .filter(|(_, r)| camera.sees_layer(r.layer))
            .map(|(i, _)| i)
            .collect();
        Some(CullingResults { visible })
    }

    fn draw_renderers(
        &mut self,
        culling: &CullingResults,
        drawing: &DrawingSettings,
        filtering: &FilteringSettings,
    ) -> Result<()> {
        let drawn = self.with_encoder(|ctx, encoder| {
            ctx.record_renderers(encoder, culling, drawing, filtering)
        })?;
        log::trace!("Drew {} renderers into the motion buffer", drawn);
        Ok(())
    }
}

impl std::fmt::Debug for GpuContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GpuContext")
            .field("leased_targets", &self.pool.leased_count())
            .field("renderers", &self.renderers.len())
            .field("recording", &self.encoder.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn uniform_layouts_match_wgsl() {
        // 3 x mat4x4<f32> + vec4<f32> + 4 x f32
        assert_eq!(std::mem::size_of::<MotionGlobals>(), 224);
        assert_eq!(std::mem::size_of::<ObjectMotion>(), 128);
    }

    #[test]
    fn shaders_declare_every_entry_point() {
        let fullscreen =
            [GLOBALS_WGSL, FULLSCREEN_WGSL, CAMERA_MOTION_WGSL, MOTION_BLUR_WGSL].concat();
        let entries = [
            "vs_fullscreen",
            "fs_camera_motion",
            "fs_blur_low",
            "fs_blur_medium",
            "fs_blur_high",
        ];
        for entry in entries {
            assert!(fullscreen.contains(&format!("fn {}(", entry)), "missing {}", entry);
        }
        for entry in ["vs_object_motion", "fs_object_motion"] {
            assert!(OBJECT_MOTION_WGSL.contains(&format!("fn {}(", entry)), "missing {}", entry);
        }
    }
}
