//! Smoke test of the wgpu backend; needs an adapter, so it is ignored by default

use glam::{Mat4, Vec3};
use helio_motion::backend::{GpuContext, GpuRenderer, GpuShaderLibrary};
use helio_motion::camera::HDR_FORMAT;
use helio_motion::{CameraDescriptor, CameraId, MotionRenderer, MotionRendererConfig};
use std::sync::Arc;
use wgpu::util::DeviceExt;

const WIDTH: u32 = 64;
const HEIGHT: u32 = 32;

fn device() -> Option<(Arc<wgpu::Device>, Arc<wgpu::Queue>)> {
    let instance = wgpu::Instance::new(wgpu::InstanceDescriptor::default());
    let adapter =
        pollster::block_on(instance.request_adapter(&wgpu::RequestAdapterOptions::default()))?;
    let (device, queue) = pollster::block_on(adapter.request_device(
        &wgpu::DeviceDescriptor {
            label: Some("Motion Test Device"),
            required_limits: wgpu::Limits::downlevel_defaults(),
            ..Default::default()
        },
        None,
    ))
    .ok()?;
    Some((Arc::new(device), Arc::new(queue)))
}

fn camera_texture(device: &wgpu::Device, format: wgpu::TextureFormat) -> wgpu::Texture {
    device.create_texture(&wgpu::TextureDescriptor {
        label: Some("Camera Target"),
        size: wgpu::Extent3d { width: WIDTH, height: HEIGHT, depth_or_array_layers: 1 },
        mip_level_count: 1,
        sample_count: 1,
        dimension: wgpu::TextureDimension::D2,
        format,
        usage: wgpu::TextureUsages::RENDER_ATTACHMENT | wgpu::TextureUsages::TEXTURE_BINDING,
        view_formats: &[],
    })
}

fn quad(device: &wgpu::Device, library: &GpuShaderLibrary) -> GpuRenderer {
    let positions: [[f32; 3]; 4] =
        [[-0.5, -0.5, 0.0], [0.5, -0.5, 0.0], [0.5, 0.5, 0.0], [-0.5, 0.5, 0.0]];
    let indices: [u32; 6] = [0, 1, 2, 0, 2, 3];
    let vertex_buffer = device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
        label: Some("Quad Vertices"),
        contents: bytemuck::cast_slice(&positions),
        usage: wgpu::BufferUsages::VERTEX,
    });
    let index_buffer = device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
        label: Some("Quad Indices"),
        contents: bytemuck::cast_slice(&indices),
        usage: wgpu::BufferUsages::INDEX,
    });
    GpuRenderer::new(Arc::new(vertex_buffer), Arc::new(index_buffer), indices.len() as u32)
        .with_model(Mat4::from_translation(Vec3::new(0.0, 0.0, -3.0)))
        .with_motion_pipeline(library.object_motion_pipeline())
}

fn camera(x: f32) -> CameraDescriptor {
    let eye = Vec3::new(x, 0.0, 0.0);
    CameraDescriptor::perspective(
        CameraId(1),
        eye,
        eye + Vec3::NEG_Z,
        Vec3::Y,
        1.0,
        0.1,
        100.0,
        WIDTH,
        HEIGHT,
    )
}

#[test]
#[ignore = "needs a GPU adapter"]
fn frames_record_and_submit() {
    let _ = env_logger::builder().is_test(true).try_init();
    let Some((device, queue)) = device() else {
        eprintln!("No adapter available, skipping");
        return;
    };

    let library = Arc::new(GpuShaderLibrary::new(&device).unwrap());
    let mut renderer =
        MotionRenderer::new(MotionRendererConfig::default(), library.as_ref()).unwrap();
    let mut ctx = GpuContext::new(device.clone(), queue, library.clone());

    let color = camera_texture(&device, HDR_FORMAT);
    let depth = camera_texture(&device, wgpu::TextureFormat::Depth32Float);
    ctx.set_frame_targets(&color, &depth).unwrap();
    let index = ctx.add_renderer(quad(&device, &library));

    for frame in 0..3 {
        renderer.render(&mut ctx, &camera(frame as f32 * 0.1)).unwrap();
        ctx.submit();
        let _ = device.poll(wgpu::Maintain::Wait);

        ctx.renderer_mut(index)
            .unwrap()
            .set_model(Mat4::from_translation(Vec3::new(frame as f32 * 0.2, 0.0, -3.0)));
    }

    assert_eq!(ctx.pool_stats().outstanding(), 0);
    assert_eq!(ctx.pool_stats().created, 2);
}

#[test]
#[ignore = "needs a GPU adapter"]
fn depth_stencil_camera_targets_render() {
    let _ = env_logger::builder().is_test(true).try_init();
    let Some((device, queue)) = device() else {
        return;
    };
    let library = Arc::new(GpuShaderLibrary::new(&device).unwrap());
    let mut renderer =
        MotionRenderer::new(MotionRendererConfig::default(), library.as_ref()).unwrap();
    let mut ctx = GpuContext::new(device.clone(), queue, library);

    let color = camera_texture(&device, HDR_FORMAT);
    let depth = camera_texture(&device, wgpu::TextureFormat::Depth24PlusStencil8);
    ctx.set_frame_targets(&color, &depth).unwrap();

    device.push_error_scope(wgpu::ErrorFilter::Validation);
    for x in [0.0, 0.5] {
        renderer.render(&mut ctx, &camera(x)).unwrap();
        ctx.submit();
    }
    let error = pollster::block_on(device.pop_error_scope());
    assert!(error.is_none(), "validation failed: {:?}", error);
    assert_eq!(ctx.pool_stats().outstanding(), 0);
}

#[test]
#[ignore = "needs a GPU adapter"]
fn camera_color_must_be_hdr() {
    let Some((device, queue)) = device() else {
        return;
    };
    let library = Arc::new(GpuShaderLibrary::new(&device).unwrap());
    let mut ctx = GpuContext::new(device.clone(), queue, library);

    let color = camera_texture(&device, wgpu::TextureFormat::Rgba8Unorm);
    let depth = camera_texture(&device, wgpu::TextureFormat::Depth32Float);
    assert!(ctx.set_frame_targets(&color, &depth).is_err());
}
