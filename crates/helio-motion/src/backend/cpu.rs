//! CPU reference backend
//!
//! Executes motion pass commands on plain f32 images with the math in
//! [`crate::reprojection`]. Scene objects are screen-aligned pixel rectangles
//! at a fixed NDC depth; their depth is stamped into the camera depth buffer
//! when a camera begins, standing in for the host's opaque pass.

use crate::camera::{CameraDescriptor, CaptureFlags};
use crate::command::{Command, CommandBuffer, GlobalValue, RenderTargetId, TargetDescriptor};
use crate::context::{
    CullingResults, DrawingSettings, FilteringSettings, PerObjectData, RenderContext,
    RenderingData, SortingCriteria,
};
use crate::graph::ResourceHandle;
use crate::passes::{
    CAMERA_MOTION_FACTOR, MOTION_BLUR_INTENSITY, MOTION_VECTOR_TEXTURE, PER_OBJECT_MOTION_FACTOR,
    PREV_VIEW_PROJ, SOURCE_TEXTURE,
};
use crate::reprojection::{
    blur_tap_offset, camera_motion, is_negligible_velocity, object_motion,
    reconstruct_world_position,
};
use crate::resources::{PoolStats, TargetPool};
use crate::settings::MotionBlurQuality;
use crate::shader::{
    ShaderProgram, ShaderRegistry, CAMERA_MOTION_SHADER, MOTION_BLUR_SHADER, OBJECT_MOTION_SHADER,
};
use crate::{Error, Result};
use glam::{Mat4, UVec2, Vec2, Vec4};
use std::collections::{HashMap, HashSet};

/// Pixels in a `width` x `height` image, computed without `u32` overflow
fn pixel_count(width: u32, height: u32) -> usize {
    width as usize * height as usize
}

/// Row-major 2D image
#[derive(Clone, Debug, PartialEq)]
pub struct Image<T> {
    width: u32,
    height: u32,
    pixels: Vec<T>,
}

impl<T: Copy> Image<T> {
    pub fn new(width: u32, height: u32, fill: T) -> Self {
        Self {
            width,
            height,
            pixels: vec![fill; pixel_count(width, height)],
        }
    }

    pub fn from_fn(width: u32, height: u32, mut f: impl FnMut(u32, u32) -> T) -> Self {
        let mut pixels = Vec::with_capacity(pixel_count(width, height));
        for y in 0..height {
            for x in 0..width {
                pixels.push(f(x, y));
            }
        }
        Self { width, height, pixels }
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn pixels(&self) -> &[T] {
        &self.pixels
    }

    fn index(&self, x: u32, y: u32) -> usize {
        pixel_count(self.width, y) + x as usize
    }

    pub fn get(&self, x: u32, y: u32) -> T {
        self.pixels[self.index(x, y)]
    }

    pub fn set(&mut self, x: u32, y: u32, value: T) {
        let index = self.index(x, y);
        self.pixels[index] = value;
    }

    pub fn fill(&mut self, value: T) {
        self.pixels.fill(value);
    }

    fn get_clamped(&self, x: i64, y: i64) -> T {
        let x = x.clamp(0, self.width as i64 - 1) as u32;
        let y = y.clamp(0, self.height as i64 - 1) as u32;
        self.get(x, y)
    }

    /// Point sample with clamp-to-edge addressing
    pub fn sample_nearest(&self, uv: Vec2) -> T {
        let x = (uv.x * self.width as f32).floor() as i64;
        let y = (uv.y * self.height as f32).floor() as i64;
        self.get_clamped(x, y)
    }
}

impl Image<Vec4> {
    /// Bilinear sample with clamp-to-edge addressing
    pub fn sample_bilinear(&self, uv: Vec2) -> Vec4 {
        let px = uv.x * self.width as f32 - 0.5;
        let py = uv.y * self.height as f32 - 0.5;
        let x0 = px.floor();
        let y0 = py.floor();
        let (fx, fy) = (px - x0, py - y0);
        let (x0, y0) = (x0 as i64, y0 as i64);

        let top = self.get_clamped(x0, y0).lerp(self.get_clamped(x0 + 1, y0), fx);
        let bottom = self
            .get_clamped(x0, y0 + 1)
            .lerp(self.get_clamped(x0 + 1, y0 + 1), fx);
        top.lerp(bottom, fy)
    }
}

/// UV of the centre of pixel (x, y)
fn pixel_uv(x: u32, y: u32, width: u32, height: u32) -> Vec2 {
    Vec2::new(
        (x as f32 + 0.5) / width as f32,
        (y as f32 + 0.5) / height as f32,
    )
}

/// Color plus optional depth attachment
#[derive(Clone, Debug)]
pub struct CpuTarget {
    pub desc: TargetDescriptor,
    pub filter: wgpu::FilterMode,
    pub color: Image<Vec4>,
    /// NDC depth, 1.0 is the far plane
    pub depth: Option<Image<f32>>,
}

impl CpuTarget {
    pub fn new(desc: TargetDescriptor, filter: wgpu::FilterMode) -> Self {
        Self {
            desc,
            filter,
            color: Image::new(desc.width, desc.height, Vec4::ZERO),
            depth: (desc.depth_bits > 0).then(|| Image::new(desc.width, desc.height, 1.0)),
        }
    }

    /// Motion vector stored at pixel (x, y)
    pub fn motion(&self, x: u32, y: u32) -> Vec2 {
        self.color.get(x, y).truncate().truncate()
    }
}

/// A movable scene object covering a pixel rectangle
#[derive(Clone, Debug)]
pub struct CpuRenderer {
    pub name: String,
    /// Inclusive top-left pixel
    pub min: UVec2,
    /// Exclusive bottom-right pixel
    pub max: UVec2,
    /// NDC depth of the whole rectangle
    pub depth: f32,
    pub model: Mat4,
    /// Transform of the previous frame, tracked when motion vectors are captured
    pub previous_model: Mat4,
    pub queue: u32,
    pub layer: u32,
    /// Material pass tags
    pub shader_passes: Vec<String>,
}

impl CpuRenderer {
    pub fn new(name: impl Into<String>, min: UVec2, max: UVec2, depth: f32) -> Self {
        Self {
            name: name.into(),
            min,
            max,
            depth,
            model: Mat4::IDENTITY,
            previous_model: Mat4::IDENTITY,
            queue: 2000,
            layer: 0,
            shader_passes: vec!["forward".to_string(), "motion_vectors".to_string()],
        }
    }

    pub fn with_model(mut self, model: Mat4) -> Self {
        self.model = model;
        self.previous_model = model;
        self
    }

    pub fn with_queue(mut self, queue: u32) -> Self {
        self.queue = queue;
        self
    }

    pub fn with_layer(mut self, layer: u32) -> Self {
        self.layer = layer;
        self
    }

    pub fn with_shader_passes(mut self, passes: &[&str]) -> Self {
        self.shader_passes = passes.iter().map(|p| p.to_string()).collect();
        self
    }

    /// Advance one frame: the current transform becomes the previous one
    pub fn set_model(&mut self, model: Mat4) {
        self.previous_model = self.model;
        self.model = model;
    }

    pub fn covers(&self, x: u32, y: u32) -> bool {
        x >= self.min.x && x < self.max.x && y >= self.min.y && y < self.max.y
    }
}

/// What the CPU backend was asked to do
#[derive(Clone, Debug, Default)]
pub struct CpuStats {
    /// (program, sub-pass) of every full-screen draw
    pub fullscreen_draws: Vec<(ShaderProgram, u32)>,
    /// Draws and clears that wrote the camera color target
    pub color_target_writes: usize,
    /// Scene objects drawn by `draw_renderers`
    pub renderer_draws: usize,
    /// Profiling samples opened, in order
    pub samples: Vec<&'static str>,
}

#[derive(Debug, Default, Clone, Copy)]
struct Programs {
    camera_motion: Option<ShaderProgram>,
    object_motion: Option<ShaderProgram>,
    motion_blur: Option<ShaderProgram>,
}

/// [`RenderContext`] on CPU images
pub struct CpuContext {
    width: u32,
    height: u32,
    programs: Programs,
    camera: CpuTarget,
    background_depth: Image<f32>,
    renderers: Vec<CpuRenderer>,
    cullable: bool,
    pool: TargetPool<CpuTarget>,
    retain: HashSet<ResourceHandle>,
    retained: HashMap<ResourceHandle, CpuTarget>,
    globals: HashMap<&'static str, GlobalValue>,
    bound: Option<(RenderTargetId, bool)>,
    open_samples: Vec<&'static str>,
    rendering: Option<RenderingData>,
    stats: CpuStats,
}

impl CpuContext {
    /// Context for `width` x `height` cameras, resolving programs from `shaders`
    pub fn new(width: u32, height: u32, shaders: &dyn ShaderRegistry) -> Self {
        let desc =
            TargetDescriptor::new(width, height, crate::camera::HDR_FORMAT).with_depth_bits(32);
        Self {
            width,
            height,
            programs: Programs {
                camera_motion: shaders.find(CAMERA_MOTION_SHADER),
                object_motion: shaders.find(OBJECT_MOTION_SHADER),
                motion_blur: shaders.find(MOTION_BLUR_SHADER),
            },
            camera: CpuTarget::new(desc, wgpu::FilterMode::Linear),
            background_depth: Image::new(width, height, 1.0),
            renderers: Vec::new(),
            cullable: true,
            pool: TargetPool::new(),
            retain: HashSet::new(),
            retained: HashMap::new(),
            globals: HashMap::new(),
            bound: None,
            open_samples: Vec::new(),
            rendering: None,
            stats: CpuStats::default(),
        }
    }

    /// Camera color target
    pub fn color(&self) -> &Image<Vec4> {
        &self.camera.color
    }

    pub fn set_color(&mut self, color: Image<Vec4>) -> Result<()> {
        self.check_size(color.width(), color.height())?;
        self.camera.color = color;
        Ok(())
    }

    /// Camera depth as of the last `begin_camera`
    pub fn depth(&self) -> Option<&Image<f32>> {
        self.camera.depth.as_ref()
    }

    /// Depth of everything that isn't a [`CpuRenderer`]
    pub fn set_background_depth(&mut self, depth: Image<f32>) -> Result<()> {
        self.check_size(depth.width(), depth.height())?;
        self.background_depth = depth;
        Ok(())
    }

    pub fn add_renderer(&mut self, renderer: CpuRenderer) -> usize {
        self.renderers.push(renderer);
        self.renderers.len() - 1
    }

    pub fn renderer_mut(&mut self, index: usize) -> Option<&mut CpuRenderer> {
        self.renderers.get_mut(index)
    }

    /// Make `cull` fail, as for cameras without culling parameters
    pub fn set_cullable(&mut self, cullable: bool) {
        self.cullable = cullable;
    }

    /// Keep a copy of the temporary target `handle` whenever it is released
    pub fn retain_target(&mut self, handle: ResourceHandle) {
        self.retain.insert(handle);
    }

    /// Last released copy of a retained target
    pub fn retained(&self, handle: ResourceHandle) -> Option<&CpuTarget> {
        self.retained.get(&handle)
    }

    pub fn global(&self, name: &str) -> Option<GlobalValue> {
        self.globals.get(name).copied()
    }

    pub fn stats(&self) -> &CpuStats {
        &self.stats
    }

    pub fn reset_stats(&mut self) {
        self.stats = CpuStats::default();
    }

    pub fn pool_stats(&self) -> PoolStats {
        self.pool.stats()
    }

    /// Temporary targets currently acquired
    pub fn live_targets(&self) -> usize {
        self.pool.leased_count()
    }

    fn check_size(&self, width: u32, height: u32) -> Result<()> {
        if (width, height) != (self.width, self.height) {
            return Err(Error::Precondition(format!(
                "Image is {}x{}, context is {}x{}",
                width, height, self.width, self.height
            )));
        }
        Ok(())
    }

    fn rendering(&self) -> Result<&RenderingData> {
        self.rendering
            .as_ref()
            .ok_or_else(|| Error::Precondition("Draw outside of a camera".to_string()))
    }

    fn target(&self, id: RenderTargetId) -> Result<&CpuTarget> {
        match id {
            RenderTargetId::CameraColor => Ok(&self.camera),
            RenderTargetId::Temporary(handle) => self
                .pool
                .get(handle)
                .ok_or_else(|| Error::Precondition(format!("Unknown render target {:?}", handle))),
        }
    }

    fn target_mut(&mut self, id: RenderTargetId) -> Result<&mut CpuTarget> {
        if id == RenderTargetId::CameraColor {
            self.stats.color_target_writes += 1;
        }
        match id {
            RenderTargetId::CameraColor => Ok(&mut self.camera),
            RenderTargetId::Temporary(handle) => self
                .pool
                .get_mut(handle)
                .ok_or_else(|| Error::Precondition(format!("Unknown render target {:?}", handle))),
        }
    }

    fn bound(&self) -> Result<(RenderTargetId, bool)> {
        self.bound
            .ok_or_else(|| Error::Precondition("Draw without a render target".to_string()))
    }

    fn global_float(&self, name: &str) -> f32 {
        match self.globals.get(name) {
            Some(GlobalValue::Float(value)) => *value,
            _ => 0.0,
        }
    }

    fn global_matrix(&self, name: &str) -> Option<Mat4> {
        match self.globals.get(name) {
            Some(GlobalValue::Matrix(value)) => Some(*value),
            _ => None,
        }
    }

    fn global_texture(&self, name: &str) -> Option<RenderTargetId> {
        match self.globals.get(name) {
            Some(GlobalValue::Texture(value)) => Some(*value),
            _ => None,
        }
    }

    /// Camera depth: background plus every renderer the camera can see
    fn stamp_scene_depth(&mut self, camera: &CameraDescriptor) {
        let mut depth = self.background_depth.clone();
        for renderer in self.renderers.iter().filter(|r| camera.sees_layer(r.layer)) {
            for y in renderer.min.y..renderer.max.y.min(self.height) {
                for x in renderer.min.x..renderer.max.x.min(self.width) {
                    if renderer.depth < depth.get(x, y) {
                        depth.set(x, y, renderer.depth);
                    }
                }
            }
        }
        self.camera.depth = Some(depth);
    }

    fn execute_command(&mut self, command: Command) -> Result<()> {
        match command {
            Command::BeginSample(name) => {
                self.open_samples.push(name);
                self.stats.samples.push(name);
            }
            Command::EndSample(name) => {
                if self.open_samples.pop() != Some(name) {
                    return Err(Error::Precondition(format!("Unbalanced sample '{}'", name)));
                }
            }
            Command::GetTemporaryTarget { handle, desc, filter } => {
                let target = self
                    .pool
                    .acquire(handle, &desc, |key| CpuTarget::new(key.to_descriptor(), filter))?;
                target.filter = filter;
            }
            Command::ReleaseTemporaryTarget { handle } => {
                if self.retain.contains(&handle) {
                    if let Some(target) = self.pool.get(handle) {
                        self.retained.insert(handle, target.clone());
                    }
                }
                self.pool.release(handle)?;
                let temporary = RenderTargetId::Temporary(handle);
                if matches!(self.bound, Some((bound, _)) if bound == temporary) {
                    self.bound = None;
                }
            }
            Command::SetRenderTarget { target, depth } => {
                self.target(target)?;
                self.bound = Some((target, depth));
            }
            Command::ClearRenderTarget { color, depth } => {
                let (id, depth_bound) = self.bound()?;
                let target = self.target_mut(id)?;
                if let Some(color) = color {
                    target.color.fill(Vec4::from_array(color));
                }
                if let (Some(value), true) = (depth, depth_bound) {
                    if let Some(image) = target.depth.as_mut() {
                        image.fill(value);
                    }
                }
            }
            Command::SetGlobal { name, value } => {
                self.globals.insert(name, value);
            }
            Command::DrawFullscreen { program, sub_pass } => {
                self.stats.fullscreen_draws.push((program, sub_pass));
                if Some(program) == self.programs.camera_motion {
                    self.draw_camera_motion()?;
                } else if Some(program) == self.programs.motion_blur {
                    self.draw_motion_blur(sub_pass)?;
                } else {
                    return Err(Error::Shader(format!(
                        "{:?} is not a full-screen program",
                        program
                    )));
                }
            }
        }
        Ok(())
    }

    fn draw_camera_motion(&mut self) -> Result<()> {
        let (target_id, _) = self.bound()?;
        let view_proj = self.rendering()?.camera.view_projection();
        let prev_view_proj = self.global_matrix(PREV_VIEW_PROJ).unwrap_or(view_proj);
        let factor = self.global_float(CAMERA_MOTION_FACTOR);
        let scene_depth = self
            .camera
            .depth
            .clone()
            .ok_or_else(|| Error::Precondition("Camera has no depth".to_string()))?;

        let target = self.target_mut(target_id)?;
        let (width, height) = (target.color.width(), target.color.height());
        target.color = Image::from_fn(width, height, |x, y| {
            let uv = pixel_uv(x, y, width, height);
            let depth = scene_depth.sample_nearest(uv);
            let motion = camera_motion(uv, depth, view_proj, prev_view_proj, factor);
            Vec4::new(motion.x, motion.y, 0.0, 0.0)
        });
        Ok(())
    }

    fn draw_motion_blur(&mut self, sub_pass: u32) -> Result<()> {
        let quality = MotionBlurQuality::from_pass_index(sub_pass)
            .ok_or_else(|| Error::Shader(format!("Motion blur has no sub-pass {}", sub_pass)))?;
        let (target_id, _) = self.bound()?;
        let source_id = self.global_texture(SOURCE_TEXTURE).ok_or_else(|| {
            Error::Precondition("Motion blur drawn without a source texture".to_string())
        })?;
        if source_id == target_id {
            return Err(Error::Precondition(
                "Motion blur source and destination are the same target".to_string(),
            ));
        }

        let source = self.target(source_id)?.color.clone();
        // A missing or released motion buffer reads as no motion
        let motion = self
            .global_texture(MOTION_VECTOR_TEXTURE)
            .and_then(|id| self.target(id).ok())
            .map(|target| target.color.clone());
        let intensity = self.global_float(MOTION_BLUR_INTENSITY);
        let samples = quality.sample_count();

        let target = self.target_mut(target_id)?;
        let (width, height) = (target.color.width(), target.color.height());
        let same_size = (source.width(), source.height()) == (width, height);
        target.color = Image::from_fn(width, height, |x, y| {
            let uv = pixel_uv(x, y, width, height);
            let velocity = motion
                .as_ref()
                .map_or(Vec2::ZERO, |m| m.sample_nearest(uv).truncate().truncate())
                * intensity;

            if is_negligible_velocity(velocity, source.width(), source.height()) {
                return if same_size { source.get(x, y) } else { source.sample_nearest(uv) };
            }
            let sum = (0..samples).fold(Vec4::ZERO, |acc, i| {
                acc + source.sample_bilinear(uv + velocity * blur_tap_offset(i, samples))
            });
            sum / samples as f32
        });
        Ok(())
    }
}

impl RenderContext for CpuContext {
    fn begin_camera(&mut self, rendering: &RenderingData) -> Result<()> {
        let camera = &rendering.camera;
        if camera.width == 0 || camera.height == 0 {
            return Err(Error::Precondition("Camera has an empty viewport".to_string()));
        }
        self.check_size(camera.width, camera.height)?;

        log::trace!("CPU context begins camera {:?} frame {}", camera.id, rendering.frame);
        self.stamp_scene_depth(camera);
        self.pool.begin_frame();
        self.bound = None;
        self.rendering = Some(rendering.clone());
        Ok(())
    }

    fn execute_command_buffer(&mut self, cmd: &mut CommandBuffer) -> Result<()> {
        log::trace!("Executing '{}' ({} commands)", cmd.name(), cmd.len());
        for command in cmd.drain() {
            self.execute_command(command)?;
        }
        Ok(())
    }

    fn cull(&mut self, camera: &CameraDescriptor) -> Option<CullingResults> {
        if !self.cullable {
            return None;
        }
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
        let (target_id, depth_bound) = self.bound()?;
        let rendering = self.rendering()?;
        let view_proj = rendering.camera.view_projection();
        let tracks_previous = rendering.capture.contains(CaptureFlags::MOTION_VECTORS)
            && drawing.per_object_data.contains(PerObjectData::MOTION_VECTORS);
        let factor = self.global_float(PER_OBJECT_MOTION_FACTOR);
        if self.programs.object_motion.is_none() {
            return Err(Error::Shader(format!("'{}' not available", OBJECT_MOTION_SHADER)));
        }

        let mut draws: Vec<CpuRenderer> = culling
            .visible
            .iter()
            .filter_map(|&i| self.renderers.get(i))
            .filter(|r| {
                filtering.accepts(r.queue, r.layer) && drawing.accepts(r.shader_passes.as_slice())
            })
            .cloned()
            .collect();
        match drawing.sorting {
            SortingCriteria::CommonOpaque => draws.sort_by(|a, b| a.depth.total_cmp(&b.depth)),
            SortingCriteria::CommonTransparent => draws.sort_by(|a, b| b.depth.total_cmp(&a.depth)),
            SortingCriteria::None => {}
        }

        let inv_view_proj = view_proj.inverse();
        let target = self.target_mut(target_id)?;
        let (width, height) = (target.color.width(), target.color.height());
        for renderer in &draws {
            let previous_model = if tracks_previous {
                renderer.previous_model
            } else {
                renderer.model
            };
            let inv_model = renderer.model.inverse();

            for y in renderer.min.y..renderer.max.y.min(height) {
                for x in renderer.min.x..renderer.max.x.min(width) {
                    if depth_bound {
                        if let Some(depth) = target.depth.as_mut() {
                            if renderer.depth > depth.get(x, y) {
                                continue;
                            }
                            depth.set(x, y, renderer.depth);
                        }
                    }

                    let uv = pixel_uv(x, y, width, height);
                    let world = reconstruct_world_position(uv, renderer.depth, inv_view_proj);
                    let local = inv_model.transform_point3(world);
                    let motion =
                        object_motion(view_proj, renderer.model, previous_model, local, factor);
                    let color = target.color.get(x, y);
                    target
                        .color
                        .set(x, y, color + Vec4::new(motion.x, motion.y, 0.0, 0.0));
                }
            }
        }
        self.stats.renderer_draws += draws.len();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::camera::CameraId;
    use crate::shader::ShaderLibrary;
    use glam::Vec3;

    fn context() -> CpuContext {
        CpuContext::new(4, 4, &ShaderLibrary::with_builtin())
    }

    fn rendering() -> RenderingData {
        let view = Mat4::look_to_rh(Vec3::ZERO, Vec3::NEG_Z, Vec3::Y);
        let projection = Mat4::perspective_rh(1.0, 1.0, 0.1, 10.0);
        RenderingData::new(CameraDescriptor::new(CameraId(0), 4, 4, view, projection))
    }

    #[test]
    #[cfg(target_pointer_width = "64")]
    fn pixel_count_does_not_wrap_at_u32() {
        assert_eq!(pixel_count(70_000, 70_000), 4_900_000_000);
        assert_eq!(pixel_count(u32::MAX, 2), 2 * u32::MAX as usize);
    }

    #[test]
    fn wide_rows_index_by_row_then_column() {
        let image = Image::from_fn(5, 3, |x, y| (x, y));
        assert_eq!(image.pixels().len(), 15);
        assert_eq!(image.get(4, 2), (4, 2));
        assert_eq!(image.pixels()[2 * 5 + 4], (4, 2));
    }

    #[test]
    fn bilinear_sampling_at_texel_centres_is_exact() {
        let image = Image::from_fn(3, 2, |x, y| Vec4::splat((x + 10 * y) as f32));
        assert_eq!(image.sample_bilinear(pixel_uv(1, 1, 3, 2)), Vec4::splat(11.0));
        let between = image.sample_bilinear(Vec2::new(0.5 / 3.0 + 0.5 / 3.0, 0.25));
        assert!((between.x - 0.5).abs() < 1e-5);
    }

    #[test]
    fn nearest_sampling_clamps_to_edge() {
        let image = Image::from_fn(2, 2, |x, y| (x + 2 * y) as f32);
        assert_eq!(image.sample_nearest(Vec2::new(-1.0, 0.0)), 0.0);
        assert_eq!(image.sample_nearest(Vec2::new(2.0, 2.0)), 3.0);
    }

    #[test]
    fn renderers_are_stamped_into_scene_depth() {
        let mut ctx = context();
        ctx.add_renderer(CpuRenderer::new("box", UVec2::new(1, 1), UVec2::new(3, 3), 0.5));
        ctx.begin_camera(&rendering()).unwrap();

        let depth = ctx.depth().unwrap();
        assert_eq!(depth.get(0, 0), 1.0);
        assert_eq!(depth.get(1, 1), 0.5);
        assert_eq!(depth.get(3, 3), 1.0);
    }

    #[test]
    fn wrong_camera_size_is_rejected() {
        let mut ctx = CpuContext::new(8, 8, &ShaderLibrary::with_builtin());
        assert!(matches!(ctx.begin_camera(&rendering()), Err(Error::Precondition(_))));
    }

    #[test]
    fn temporary_targets_are_pooled_and_retained() {
        let mut ctx = context();
        ctx.begin_camera(&rendering()).unwrap();
        let handle = ResourceHandle::named("scratch");
        ctx.retain_target(handle);

        let desc = TargetDescriptor::new(4, 4, wgpu::TextureFormat::Rg16Float).with_depth_bits(32);
        let mut cmd = CommandBuffer::new("test");
        cmd.get_temporary_target(handle, desc, wgpu::FilterMode::Nearest)
            .set_render_target(RenderTargetId::Temporary(handle), true)
            .clear_render_target(Some([1.0, 2.0, 0.0, 0.0]), Some(1.0))
            .release_temporary_target(handle);
        ctx.execute_command_buffer(&mut cmd).unwrap();

        assert!(cmd.is_empty());
        assert_eq!(ctx.live_targets(), 0);
        assert_eq!(ctx.pool_stats().outstanding(), 0);
        let kept = ctx.retained(handle).unwrap();
        assert_eq!(kept.motion(2, 2), Vec2::new(1.0, 2.0));
        assert_eq!(kept.filter, wgpu::FilterMode::Nearest);
    }

    #[test]
    fn drawing_into_a_released_target_fails() {
        let mut ctx = context();
        ctx.begin_camera(&rendering()).unwrap();
        let mut cmd = CommandBuffer::new("test");
        cmd.set_render_target(RenderTargetId::Temporary(ResourceHandle::named("gone")), false);
        assert!(matches!(ctx.execute_command_buffer(&mut cmd), Err(Error::Precondition(_))));
    }

    #[test]
    fn blur_refuses_aliased_source_and_destination() {
        let mut ctx = context();
        ctx.begin_camera(&rendering()).unwrap();
        let program = ShaderLibrary::with_builtin().resolve(MOTION_BLUR_SHADER).unwrap();
        let mut cmd = CommandBuffer::new("test");
        cmd.set_global_texture(SOURCE_TEXTURE, RenderTargetId::CameraColor)
            .set_render_target(RenderTargetId::CameraColor, false)
            .draw_fullscreen(program, 0);
        assert!(matches!(ctx.execute_command_buffer(&mut cmd), Err(Error::Precondition(_))));
    }

    #[test]
    fn unbalanced_samples_are_rejected() {
        let mut ctx = context();
        let mut cmd = CommandBuffer::new("test");
        cmd.begin_sample("a").end_sample("b");
        assert!(ctx.execute_command_buffer(&mut cmd).is_err());
    }
}
