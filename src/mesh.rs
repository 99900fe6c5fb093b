use crate::error::AssetLoadError;
use glam::{Mat3, Mat4, Vec2, Vec3};
use gltf::mesh::Mode;

#[repr(C)]
#[derive(Clone, Copy, Debug, PartialEq, bytemuck::Pod, bytemuck::Zeroable)]
pub struct MeshVertex {
    pub position: [f32; 3],
    pub normal: [f32; 3],
    pub uv: [f32; 2],
}

impl MeshVertex {
    pub fn new(position: Vec3, normal: Vec3, uv: Vec2) -> Self {
        Self { position: position.to_array(), normal: normal.to_array(), uv: uv.to_array() }
    }

    pub fn layout<'a>() -> wgpu::VertexBufferLayout<'a> {
        use std::mem;
        wgpu::VertexBufferLayout {
            array_stride: mem::size_of::<MeshVertex>() as wgpu::BufferAddress,
            step_mode: wgpu::VertexStepMode::Vertex,
            attributes: &[
                wgpu::VertexAttribute { offset: 0, shader_location: 0, format: wgpu::VertexFormat::Float32x3 },
                wgpu::VertexAttribute { offset: 12, shader_location: 1, format: wgpu::VertexFormat::Float32x3 },
                wgpu::VertexAttribute { offset: 24, shader_location: 2, format: wgpu::VertexFormat::Float32x2 },
            ],
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct MeshBounds {
    pub min: Vec3,
    pub max: Vec3,
    pub center: Vec3,
    pub radius: f32,
}

/// Contiguous index range drawn with one material slot.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MeshSubset {
    pub index_offset: u32,
    pub index_count: u32,
    pub material_slot: usize,
}

#[derive(Clone, Debug, PartialEq)]
pub struct ImportedMaterial {
    /// Material name from the asset; unnamed materials have none.
    pub name: Option<String>,
    pub base_color: [f32; 4],
}

/// One drawable node, with vertices already in model space.
#[derive(Clone, Debug)]
pub struct ImportedMesh {
    pub name: String,
    pub vertices: Vec<MeshVertex>,
    pub indices: Vec<u32>,
    pub subsets: Vec<MeshSubset>,
    /// Per slot: index into [`ImportedScene::materials`], or `None` when the primitive had no material.
    pub material_slots: Vec<Option<usize>>,
    pub bounds: MeshBounds,
}

#[derive(Clone, Debug)]
pub struct ImportedScene {
    pub meshes: Vec<ImportedMesh>,
    pub materials: Vec<ImportedMaterial>,
}

impl ImportedScene {
    pub fn material_names(&self) -> Vec<String> {
        self.materials.iter().filter_map(|m| m.name.clone()).collect()
    }
}

/// Imports every triangle mesh reachable from the default scene of a glTF or GLB payload.
pub fn import_gltf_slice(bytes: &[u8], location: &str) -> Result<ImportedScene, AssetLoadError> {
    let (document, buffers, _images) = gltf::import_slice(bytes)
        .map_err(|err| AssetLoadError::Parse { location: location.to_string(), message: err.to_string() })?;

    let materials = document
        .materials()
        .map(|material| ImportedMaterial {
            name: material.name().map(str::to_string),
            base_color: material.pbr_metallic_roughness().base_color_factor(),
        })
        .collect::<Vec<_>>();

    let mut meshes = Vec::new();
    let roots: Vec<gltf::Node> = match document.default_scene().or_else(|| document.scenes().next()) {
        Some(scene) => scene.nodes().collect(),
        None => document.nodes().collect(),
    };
    let mut stack: Vec<(gltf::Node, Mat4)> = roots.into_iter().rev().map(|node| (node, Mat4::IDENTITY)).collect();
    while let Some((node, parent)) = stack.pop() {
        let world = parent * Mat4::from_cols_array_2d(&node.transform().matrix());
        if let Some(mesh) = node.mesh() {
            let name = node
                .name()
                .or_else(|| mesh.name())
                .map(str::to_string)
                .unwrap_or_else(|| format!("mesh_{}", mesh.index()));
            if let Some(imported) = import_mesh(&mesh, &buffers, world, name, location)? {
                meshes.push(imported);
            }
        }
        for child in node.children().collect::<Vec<_>>().into_iter().rev() {
            stack.push((child, world));
        }
    }

    if meshes.is_empty() {
        return Err(AssetLoadError::Empty { location: location.to_string() });
    }
    Ok(ImportedScene { meshes, materials })
}

fn import_mesh(
    mesh: &gltf::Mesh,
    buffers: &[gltf::buffer::Data],
    world: Mat4,
    name: String,
    location: &str,
) -> Result<Option<ImportedMesh>, AssetLoadError> {
    let normal_matrix = Mat3::from_mat4(world).inverse().transpose();
    let mut vertices: Vec<MeshVertex> = Vec::new();
    let mut indices: Vec<u32> = Vec::new();
    let mut subsets: Vec<MeshSubset> = Vec::new();
    let mut material_slots: Vec<Option<usize>> = Vec::new();

    for primitive in mesh.primitives() {
        if primitive.mode() != Mode::Triangles {
            continue;
        }
        let reader = primitive.reader(|buffer| buffers.get(buffer.index()).map(|data| &data[..]));
        let positions: Vec<Vec3> = reader
            .read_positions()
            .ok_or_else(|| AssetLoadError::Parse {
                location: location.to_string(),
                message: format!("POSITION attribute missing in mesh '{name}'"),
            })?
            .map(Vec3::from_array)
            .collect();
        if positions.is_empty() {
            continue;
        }
        let local_indices: Vec<u32> = reader
            .read_indices()
            .map(|read| read.into_u32().collect())
            .unwrap_or_else(|| (0..positions.len() as u32).collect());
        if local_indices.iter().any(|&i| i as usize >= positions.len()) {
            return Err(AssetLoadError::Parse {
                location: location.to_string(),
                message: format!("mesh '{name}' references vertices out of range"),
            });
        }

        let mut normals: Vec<Vec3> = reader
            .read_normals()
            .map(|it| it.map(Vec3::from_array).collect())
            .unwrap_or_default();
        if normals.len() != positions.len() || normals.iter().all(|n| n.length_squared() == 0.0) {
            normals = compute_normals(&positions, &local_indices);
        }
        let mut tex_coords: Vec<Vec2> = reader
            .read_tex_coords(0)
            .map(|coords| coords.into_f32().map(Vec2::from_array).collect())
            .unwrap_or_default();
        if tex_coords.len() != positions.len() {
            tex_coords.resize(positions.len(), Vec2::ZERO);
        }

        let base_vertex = vertices.len() as u32;
        vertices.extend(positions.iter().zip(normals.iter()).zip(tex_coords.iter()).map(|((pos, norm), uv)| {
            let position = world.transform_point3(*pos);
            let normal = (normal_matrix * *norm).normalize_or_zero();
            MeshVertex::new(position, normal, *uv)
        }));

        let material = primitive.material().index();
        let slot = match material_slots.iter().position(|existing| *existing == material) {
            Some(slot) => slot,
            None => {
                material_slots.push(material);
                material_slots.len() - 1
            }
        };
        let index_offset = indices.len() as u32;
        indices.extend(local_indices.iter().map(|idx| idx + base_vertex));
        subsets.push(MeshSubset { index_offset, index_count: local_indices.len() as u32, material_slot: slot });
    }

    if subsets.is_empty() {
        return Ok(None);
    }
    let bounds = MeshBounds::from_vertices(&vertices);
    Ok(Some(ImportedMesh { name, vertices, indices, subsets, material_slots, bounds }))
}

fn compute_normals(positions: &[Vec3], indices: &[u32]) -> Vec<Vec3> {
    let mut normals = vec![Vec3::ZERO; positions.len()];
    for tri in indices.chunks_exact(3) {
        let i0 = tri[0] as usize;
        let i1 = tri[1] as usize;
        let i2 = tri[2] as usize;
        if i0 >= positions.len() || i1 >= positions.len() || i2 >= positions.len() {
            continue;
        }
        let a = positions[i0];
        let b = positions[i1];
        let c = positions[i2];
        let normal = (b - a).cross(c - a);
        if normal.length_squared() > 0.0 {
            normals[i0] += normal;
            normals[i1] += normal;
            normals[i2] += normal;
        }
    }
    for normal in &mut normals {
        *normal = if normal.length_squared() > 0.0 { normal.normalize() } else { Vec3::Y };
    }
    normals
}

impl MeshBounds {
    pub fn from_vertices(vertices: &[MeshVertex]) -> Self {
        Self::from_points(vertices.iter().map(|v| Vec3::from_array(v.position)))
    }

    pub fn from_points(points: impl Iterator<Item = Vec3> + Clone) -> Self {
        let mut min = Vec3::splat(f32::INFINITY);
        let mut max = Vec3::splat(f32::NEG_INFINITY);
        let mut any = false;
        for pos in points.clone() {
            min = min.min(pos);
            max = max.max(pos);
            any = true;
        }
        if !any {
            return MeshBounds { min: Vec3::ZERO, max: Vec3::ZERO, center: Vec3::ZERO, radius: 0.0 };
        }
        let center = (min + max) * 0.5;
        let radius = points.fold(0.0_f32, |radius, pos| radius.max((pos - center).length()));
        MeshBounds { min, max, center, radius }
    }

    pub fn size(&self) -> Vec3 {
        self.max - self.min
    }

    pub fn union(&self, other: &MeshBounds) -> MeshBounds {
        let corners = [self.min, self.max, other.min, other.max];
        MeshBounds::from_points(corners.into_iter())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn computed_normals_follow_winding() {
        let positions = [Vec3::ZERO, Vec3::X, Vec3::Y];
        let normals = compute_normals(&positions, &[0, 1, 2]);
        for normal in normals {
            assert!((normal - Vec3::Z).length_squared() < 1e-6);
        }
    }

    #[test]
    fn bounds_cover_all_vertices() {
        let vertices = [
            MeshVertex::new(Vec3::new(-1.0, 0.0, 0.0), Vec3::Z, Vec2::ZERO),
            MeshVertex::new(Vec3::new(1.0, 2.0, 0.5), Vec3::Z, Vec2::ONE),
        ];
        let bounds = MeshBounds::from_vertices(&vertices);
        assert_eq!(bounds.min, Vec3::new(-1.0, 0.0, 0.0));
        assert_eq!(bounds.max, Vec3::new(1.0, 2.0, 0.5));
        assert_eq!(bounds.center, Vec3::new(0.0, 1.0, 0.25));
        assert_eq!(bounds.size(), Vec3::new(2.0, 2.0, 0.5));
    }

    #[test]
    fn garbage_payload_is_a_parse_error() {
        let err = import_gltf_slice(b"not a gltf", "broken.glb").unwrap_err();
        assert!(matches!(err, AssetLoadError::Parse { .. }));
    }
}
