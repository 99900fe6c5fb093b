use crate::camera3d::Camera3D;
use crate::lifecycle::LightRig;
use crate::mesh::MeshVertex;
use crate::scene::{MaterialId, MeshId, SceneMaterial, SceneMesh};
use std::collections::{HashMap, HashSet};
use wgpu::util::DeviceExt;
use winit::dpi::PhysicalSize;

use super::gpu_texture::GpuTexture;
use super::DEPTH_FORMAT;

#[repr(C)]
#[derive(Clone, Copy, Debug, bytemuck::Pod, bytemuck::Zeroable)]
pub(super) struct FrameUniforms {
    pub view_proj: [[f32; 4]; 4],
    pub camera_pos: [f32; 4],
    pub light_dir: [f32; 4],
    pub light_color: [f32; 4],
    pub ambient: [f32; 4],
    pub sky_color: [f32; 4],
    pub ground_color: [f32; 4],
}

impl FrameUniforms {
    pub fn new(camera: &Camera3D, lights: &LightRig, viewport: PhysicalSize<u32>) -> Self {
        let ambient = lights.ambient.color.to_linear().map(|c| c * lights.ambient.intensity);
        let [sx, sy, sz] = lights.hemisphere.sky.to_linear();
        let [gx, gy, gz] = lights.hemisphere.ground.to_linear();
        let [lr, lg, lb] = lights.directional.color.to_linear();
        let dir = lights.directional.direction;
        Self {
            view_proj: camera.view_projection(viewport).to_cols_array_2d(),
            camera_pos: camera.position.extend(1.0).to_array(),
            light_dir: [dir.x, dir.y, dir.z, lights.directional.intensity],
            light_color: [lr, lg, lb, 1.0],
            ambient: [ambient[0], ambient[1], ambient[2], 1.0],
            sky_color: [sx, sy, sz, lights.hemisphere.intensity],
            ground_color: [gx, gy, gz, 1.0],
        }
    }
}

#[repr(C)]
#[derive(Clone, Copy, Debug, bytemuck::Pod, bytemuck::Zeroable)]
pub(super) struct MaterialUniforms {
    pub base_color: [f32; 4],
    pub params: [f32; 4],
}

pub(super) struct MeshPipelineResources {
    pub pipeline: wgpu::RenderPipeline,
    pub material_bgl: wgpu::BindGroupLayout,
    pub sampler: wgpu::Sampler,
    /// Bound in place of a map on untextured materials.
    pub white: GpuTexture,
}

pub(super) struct GpuMesh {
    vertex_buffer: wgpu::Buffer,
    index_buffer: wgpu::Buffer,
}

struct MaterialBinding {
    texture_key: Option<String>,
    uniform_buffer: wgpu::Buffer,
    bind_group: wgpu::BindGroup,
}

/// Draws the active model with one bind group per material slot.
#[derive(Default)]
pub(super) struct MeshPass {
    pub resources: Option<MeshPipelineResources>,
    pub frame_buffer: Option<wgpu::Buffer>,
    pub frame_bind_group: Option<wgpu::BindGroup>,
    meshes: HashMap<MeshId, GpuMesh>,
    materials: HashMap<MaterialId, MaterialBinding>,
}

impl MeshPass {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn ensure_pipeline(&mut self, device: &wgpu::Device, queue: &wgpu::Queue, format: wgpu::TextureFormat) {
        if self.resources.is_some() {
            return;
        }
        let shader = device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some("Configurator Shader"),
            source: wgpu::ShaderSource::Wgsl(include_str!("../../assets/shaders/configurator.wgsl").into()),
        });

        let frame_bgl = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("Frame BGL"),
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
        let material_bgl = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("Material BGL"),
            entries: &[
                wgpu::BindGroupLayoutEntry {
                    binding: 0,
                    visibility: wgpu::ShaderStages::FRAGMENT,
                    ty: wgpu::BindingType::Buffer {
                        ty: wgpu::BufferBindingType::Uniform,
                        has_dynamic_offset: false,
                        min_binding_size: None,
                    },
                    count: None,
                },
                wgpu::BindGroupLayoutEntry {
                    binding: 1,
                    visibility: wgpu::ShaderStages::FRAGMENT,
                    ty: wgpu::BindingType::Texture {
                        multisampled: false,
                        view_dimension: wgpu::TextureViewDimension::D2,
                        sample_type: wgpu::TextureSampleType::Float { filterable: true },
                    },
                    count: None,
                },
                wgpu::BindGroupLayoutEntry {
                    binding: 2,
                    visibility: wgpu::ShaderStages::FRAGMENT,
                    ty: wgpu::BindingType::Sampler(wgpu::SamplerBindingType::Filtering),
                    count: None,
                },
            ],
        });

        let pipeline_layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some("Mesh Pipeline Layout"),
            bind_group_layouts: &[&frame_bgl, &material_bgl],
            push_constant_ranges: &[],
        });
        let pipeline = device.create_render_pipeline(&wgpu::RenderPipelineDescriptor {
            label: Some("Mesh Pipeline"),
            layout: Some(&pipeline_layout),
            vertex: wgpu::VertexState {
                module: &shader,
                entry_point: Some("vs_main"),
                buffers: &[MeshVertex::layout()],
                compilation_options: wgpu::PipelineCompilationOptions::default(),
            },
            fragment: Some(wgpu::FragmentState {
                module: &shader,
                entry_point: Some("fs_main"),
                targets: &[Some(wgpu::ColorTargetState {
                    format,
                    blend: Some(wgpu::BlendState::ALPHA_BLENDING),
                    write_mask: wgpu::ColorWrites::ALL,
                })],
                compilation_options: wgpu::PipelineCompilationOptions::default(),
            }),
            // Garment panels are single sheets seen from both sides.
            primitive: wgpu::PrimitiveState {
                topology: wgpu::PrimitiveTopology::TriangleList,
                cull_mode: None,
                ..Default::default()
            },
            depth_stencil: Some(wgpu::DepthStencilState {
                format: DEPTH_FORMAT,
                depth_write_enabled: true,
                depth_compare: wgpu::CompareFunction::LessEqual,
                stencil: wgpu::StencilState::default(),
                bias: wgpu::DepthBiasState::default(),
            }),
            multisample: wgpu::MultisampleState::default(),
            multiview: None,
            cache: None,
        });

        let sampler = device.create_sampler(&wgpu::SamplerDescriptor {
            label: Some("Zone Texture Sampler"),
            address_mode_u: wgpu::AddressMode::ClampToEdge,
            address_mode_v: wgpu::AddressMode::ClampToEdge,
            address_mode_w: wgpu::AddressMode::ClampToEdge,
            mag_filter: wgpu::FilterMode::Linear,
            min_filter: wgpu::FilterMode::Linear,
            ..Default::default()
        });
        let white = GpuTexture::from_rgba8(device, queue, "White Texture", &[255, 255, 255, 255], 1, 1);

        let frame_buffer = device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("Frame Uniforms"),
            size: std::mem::size_of::<FrameUniforms>() as u64,
            usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });
        let frame_bind_group = device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("Frame BG"),
            layout: &frame_bgl,
            entries: &[wgpu::BindGroupEntry { binding: 0, resource: frame_buffer.as_entire_binding() }],
        });

        self.frame_buffer = Some(frame_buffer);
        self.frame_bind_group = Some(frame_bind_group);
        self.resources = Some(MeshPipelineResources { pipeline, material_bgl, sampler, white });
    }

    /// Uploads geometry for new meshes and drops buffers of meshes that left the scene.
    pub fn sync_meshes<T>(&mut self, device: &wgpu::Device, meshes: &[SceneMesh<T>]) {
        let live: HashSet<MeshId> = meshes.iter().map(|mesh| mesh.id).collect();
        self.meshes.retain(|id, _| live.contains(id));
        let live_materials: HashSet<MaterialId> =
            meshes.iter().flat_map(|mesh| mesh.materials.iter().map(|material| material.id)).collect();
        self.materials.retain(|id, _| live_materials.contains(id));

        for mesh in meshes {
            if self.meshes.contains_key(&mesh.id) || mesh.indices.is_empty() {
                continue;
            }
            let vertex_buffer = device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
                label: Some("Mesh VB"),
                contents: bytemuck::cast_slice(&mesh.vertices),
                usage: wgpu::BufferUsages::VERTEX,
            });
            let index_buffer = device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
                label: Some("Mesh IB"),
                contents: bytemuck::cast_slice(&mesh.indices),
                usage: wgpu::BufferUsages::INDEX,
            });
            self.meshes.insert(mesh.id, GpuMesh { vertex_buffer, index_buffer });
        }
    }

    /// Refreshes material uniforms and rebuilds bind groups whose texture changed.
    pub fn sync_materials(&mut self, device: &wgpu::Device, queue: &wgpu::Queue, materials: &[&SceneMaterial<GpuTexture>]) {
        let Some(resources) = self.resources.as_ref() else {
            return;
        };
        for material in materials {
            let uniforms = MaterialUniforms {
                base_color: material.base_color,
                params: [if material.map.is_some() { 1.0 } else { 0.0 }, 0.0, 0.0, 0.0],
            };
            let key = material.map_key().map(str::to_string);
            let stale = self.materials.get(&material.id).map_or(true, |binding| binding.texture_key != key);
            if stale {
                let uniform_buffer = device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
                    label: Some("Material Uniforms"),
                    contents: bytemuck::bytes_of(&uniforms),
                    usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
                });
                let texture: &GpuTexture = match &material.map {
                    Some(bound) => bound.texture.as_ref(),
                    None => &resources.white,
                };
                let bind_group = device.create_bind_group(&wgpu::BindGroupDescriptor {
                    label: Some("Material BG"),
                    layout: &resources.material_bgl,
                    entries: &[
                        wgpu::BindGroupEntry { binding: 0, resource: uniform_buffer.as_entire_binding() },
                        wgpu::BindGroupEntry { binding: 1, resource: wgpu::BindingResource::TextureView(texture.view()) },
                        wgpu::BindGroupEntry { binding: 2, resource: wgpu::BindingResource::Sampler(&resources.sampler) },
                    ],
                });
                self.materials.insert(material.id, MaterialBinding { texture_key: key, uniform_buffer, bind_group });
            } else if let Some(binding) = self.materials.get(&material.id) {
                queue.write_buffer(&binding.uniform_buffer, 0, bytemuck::bytes_of(&uniforms));
            }
        }
    }

    pub fn draw(&self, pass: &mut wgpu::RenderPass<'_>, meshes: &[SceneMesh<GpuTexture>]) {
        let (Some(resources), Some(frame_bind_group)) = (self.resources.as_ref(), self.frame_bind_group.as_ref())
        else {
            return;
        };
        pass.set_pipeline(&resources.pipeline);
        pass.set_bind_group(0, frame_bind_group, &[]);
        for mesh in meshes {
            let Some(gpu) = self.meshes.get(&mesh.id) else {
                continue;
            };
            pass.set_vertex_buffer(0, gpu.vertex_buffer.slice(..));
            pass.set_index_buffer(gpu.index_buffer.slice(..), wgpu::IndexFormat::Uint32);
            for subset in &mesh.subsets {
                let Some(binding) =
                    mesh.materials.get(subset.material_slot).and_then(|material| self.materials.get(&material.id))
                else {
                    continue;
                };
                pass.set_bind_group(1, &binding.bind_group, &[]);
                let start = subset.index_offset;
                pass.draw_indexed(start..start + subset.index_count, 0, 0..1);
            }
        }
    }

    /// Drops every GPU buffer and bind group.
    pub fn clear(&mut self) {
        self.meshes.clear();
        self.materials.clear();
    }

    pub fn mesh_count(&self) -> usize {
        self.meshes.len()
    }

    pub fn release(&mut self) {
        self.clear();
        self.frame_bind_group = None;
        self.frame_buffer = None;
        if let Some(resources) = self.resources.take() {
            resources.white.destroy();
        }
    }
}

pub(super) fn material_refs<T>(meshes: &[SceneMesh<T>]) -> Vec<&SceneMaterial<T>> {
    meshes.iter().flat_map(|mesh| mesh.materials.iter()).collect()
}
