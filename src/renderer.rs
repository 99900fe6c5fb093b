mod gpu_texture;
mod mesh_pass;
mod window_surface;

pub use gpu_texture::{GpuTexture, WgpuTextureBackend};
pub use window_surface::{SurfaceFrame, WindowSurface};

use crate::config::WindowConfig;
use crate::lifecycle::{FrameScene, SceneRenderer};
use anyhow::Result;
use mesh_pass::{material_refs, FrameUniforms, MeshPass};
use winit::dpi::PhysicalSize;
use winit::event_loop::ActiveEventLoop;
use winit::window::Window;

pub const DEPTH_FORMAT: wgpu::TextureFormat = wgpu::TextureFormat::Depth32Float;

/// Forward renderer for the configurator scene.
pub struct Renderer {
    surface: WindowSurface,
    mesh_pass: MeshPass,
}

impl Renderer {
    pub fn new(window_cfg: &WindowConfig) -> Self {
        Self { surface: WindowSurface::new(window_cfg), mesh_pass: MeshPass::new() }
    }

    pub fn ensure_window(&mut self, event_loop: &ActiveEventLoop) -> Result<()> {
        self.surface.ensure_window(event_loop)?;
        let format = self.surface.surface_format()?;
        let (device, queue) = self.surface.device_and_queue()?;
        self.mesh_pass.ensure_pipeline(device, queue, format);
        Ok(())
    }

    pub fn window(&self) -> Option<&Window> {
        self.surface.window()
    }

    pub fn size(&self) -> PhysicalSize<u32> {
        self.surface.size()
    }

    /// Backend that uploads composed rasters on this renderer's device.
    pub fn texture_backend(&self) -> Result<WgpuTextureBackend> {
        let (device, queue) = self.surface.device_and_queue()?;
        Ok(WgpuTextureBackend::new(device.clone(), queue.clone()))
    }

    pub fn uploaded_meshes(&self) -> usize {
        self.mesh_pass.mesh_count()
    }

    fn draw(&mut self, frame: &FrameScene<'_, GpuTexture>) -> Result<()> {
        let (device, queue) = self.surface.device_and_queue()?;
        let meshes = frame.model.map(|model| model.meshes.as_slice()).unwrap_or(&[]);
        self.mesh_pass.sync_meshes(device, meshes);
        self.mesh_pass.sync_materials(device, queue, &material_refs(meshes));
        if let Some(buffer) = self.mesh_pass.frame_buffer.as_ref() {
            let uniforms = FrameUniforms::new(frame.camera, frame.lights, frame.viewport);
            queue.write_buffer(buffer, 0, bytemuck::bytes_of(&uniforms));
        }

        let surface_frame = self.surface.acquire_surface_frame()?;
        let (device, queue) = self.surface.device_and_queue()?;
        let depth_view = self.surface.depth_view()?;
        let [r, g, b] = frame.lights.background.to_linear();
        let mut encoder = device.create_command_encoder(&wgpu::CommandEncoderDescriptor { label: Some("Scene Encoder") });
        {
            let mut pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
                label: Some("Scene Pass"),
                color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                    view: surface_frame.view(),
                    depth_slice: None,
                    resolve_target: None,
                    ops: wgpu::Operations {
                        load: wgpu::LoadOp::Clear(wgpu::Color { r: r as f64, g: g as f64, b: b as f64, a: 1.0 }),
                        store: wgpu::StoreOp::Store,
                    },
                })],
                depth_stencil_attachment: Some(wgpu::RenderPassDepthStencilAttachment {
                    view: depth_view,
                    depth_ops: Some(wgpu::Operations { load: wgpu::LoadOp::Clear(1.0), store: wgpu::StoreOp::Store }),
                    stencil_ops: None,
                }),
                occlusion_query_set: None,
                timestamp_writes: None,
            });
            self.mesh_pass.draw(&mut pass, meshes);
        }
        queue.submit(std::iter::once(encoder.finish()));
        surface_frame.present();
        Ok(())
    }
}

impl SceneRenderer for Renderer {
    type Texture = GpuTexture;

    fn resize(&mut self, viewport: PhysicalSize<u32>) {
        self.surface.resize(viewport);
    }

    fn render(&mut self, frame: &FrameScene<'_, GpuTexture>) -> Result<()> {
        if !self.surface.is_attached() {
            return Ok(());
        }
        self.draw(frame)
    }

    fn detach_surface(&mut self) {
        self.surface.detach();
    }

    fn dispose(&mut self) {
        self.mesh_pass.release();
        self.surface.release();
    }
}
