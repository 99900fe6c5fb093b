use crate::mesh::{ImportedScene, MeshBounds, MeshSubset, MeshVertex};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

static NEXT_SCENE_ID: AtomicU64 = AtomicU64::new(1);

fn next_id() -> u64 {
    NEXT_SCENE_ID.fetch_add(1, Ordering::Relaxed)
}

/// Process-unique identity of a mesh node. Reloading an asset yields new ids.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct MeshId(u64);

/// Process-unique identity of a material instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct MaterialId(u64);

impl MeshId {
    pub fn fresh() -> Self {
        Self(next_id())
    }

    pub fn raw(self) -> u64 {
        self.0
    }
}

impl MaterialId {
    pub fn fresh() -> Self {
        Self(next_id())
    }

    pub fn raw(self) -> u64 {
        self.0
    }
}

/// A texture bound to a material, with the cache key that owns it.
#[derive(Debug)]
pub struct BoundTexture<T> {
    pub key: String,
    pub texture: Arc<T>,
}

impl<T> Clone for BoundTexture<T> {
    fn clone(&self) -> Self {
        Self { key: self.key.clone(), texture: self.texture.clone() }
    }
}

#[derive(Debug)]
pub struct SceneMaterial<T> {
    pub id: MaterialId,
    pub name: String,
    pub base_color: [f32; 4],
    pub map: Option<BoundTexture<T>>,
    /// Inserted because the asset had no material for this slot.
    pub is_default: bool,
}

impl<T> SceneMaterial<T> {
    pub fn new(name: impl Into<String>, base_color: [f32; 4]) -> Self {
        Self { id: MaterialId::fresh(), name: name.into(), base_color, map: None, is_default: false }
    }

    /// Neutral white material for drawables that came without one.
    pub fn neutral(name: impl Into<String>) -> Self {
        Self { is_default: true, ..Self::new(name, [1.0, 1.0, 1.0, 1.0]) }
    }

    pub fn map_key(&self) -> Option<&str> {
        self.map.as_ref().map(|bound| bound.key.as_str())
    }
}

#[derive(Debug)]
pub struct SceneMesh<T> {
    pub id: MeshId,
    pub name: String,
    pub vertices: Vec<MeshVertex>,
    pub indices: Vec<u32>,
    pub subsets: Vec<MeshSubset>,
    pub materials: Vec<SceneMaterial<T>>,
    pub bounds: MeshBounds,
    pub cast_shadow: bool,
    pub receive_shadow: bool,
}

impl<T> SceneMesh<T> {
    /// Positions of the triangles drawn with `material_slot`, with their UVs.
    pub fn triangles_for_slot(&self, material_slot: usize) -> impl Iterator<Item = [&MeshVertex; 3]> + '_ {
        self.subsets.iter().filter(move |subset| subset.material_slot == material_slot).flat_map(move |subset| {
            let start = subset.index_offset as usize;
            let end = (start + subset.index_count as usize).min(self.indices.len());
            self.indices.get(start..end).unwrap_or(&[]).chunks_exact(3).filter_map(move |tri| {
                Some([
                    self.vertices.get(tri[0] as usize)?,
                    self.vertices.get(tri[1] as usize)?,
                    self.vertices.get(tri[2] as usize)?,
                ])
            })
        })
    }

    /// Bounds of the vertices drawn with one material slot.
    pub fn slot_bounds(&self, material_slot: usize) -> Option<MeshBounds> {
        let points: Vec<glam::Vec3> = self
            .triangles_for_slot(material_slot)
            .flat_map(|tri| tri.into_iter().map(|v| glam::Vec3::from_array(v.position)))
            .collect();
        if points.is_empty() {
            None
        } else {
            Some(MeshBounds::from_points(points.into_iter()))
        }
    }

    pub fn material(&self, id: MaterialId) -> Option<(usize, &SceneMaterial<T>)> {
        self.materials.iter().enumerate().find(|(_, material)| material.id == id)
    }
}

/// The single active model of a scene.
#[derive(Debug)]
pub struct ModelInstance<T> {
    pub model_id: String,
    pub meshes: Vec<SceneMesh<T>>,
    pub bounds: MeshBounds,
}

impl<T> ModelInstance<T> {
    /// Builds scene meshes from an import, enabling shadows and giving every
    /// material slot a material.
    pub fn from_import(model_id: impl Into<String>, imported: ImportedScene) -> Self {
        let ImportedScene { meshes: imported_meshes, materials } = imported;
        let mut meshes = Vec::with_capacity(imported_meshes.len());
        for mesh in imported_meshes {
            let scene_materials = mesh
                .material_slots
                .iter()
                .enumerate()
                .map(|(slot, source)| match source.and_then(|index| materials.get(index).map(|m| (index, m))) {
                    Some((index, material)) => {
                        let name = material.name.clone().unwrap_or_else(|| format!("material_{index}"));
                        SceneMaterial::new(name, material.base_color)
                    }
                    None => SceneMaterial::neutral(format!("{}::default_{slot}", mesh.name)),
                })
                .collect();
            meshes.push(SceneMesh {
                id: MeshId::fresh(),
                name: mesh.name,
                vertices: mesh.vertices,
                indices: mesh.indices,
                subsets: mesh.subsets,
                materials: scene_materials,
                bounds: mesh.bounds,
                cast_shadow: true,
                receive_shadow: true,
            });
        }
        let bounds = meshes
            .iter()
            .map(|mesh| mesh.bounds.clone())
            .reduce(|acc, next| acc.union(&next))
            .unwrap_or_else(|| MeshBounds::from_points(std::iter::empty::<glam::Vec3>()));
        Self { model_id: model_id.into(), meshes, bounds }
    }

    pub fn mesh(&self, id: MeshId) -> Option<&SceneMesh<T>> {
        self.meshes.iter().find(|mesh| mesh.id == id)
    }

    pub fn mesh_mut(&mut self, id: MeshId) -> Option<&mut SceneMesh<T>> {
        self.meshes.iter_mut().find(|mesh| mesh.id == id)
    }

    pub fn material_mut(&mut self, mesh: MeshId, material: MaterialId) -> Option<&mut SceneMaterial<T>> {
        self.mesh_mut(mesh)?.materials.iter_mut().find(|m| m.id == material)
    }

    pub fn material_names(&self) -> Vec<String> {
        let mut names: Vec<String> = Vec::new();
        for material in self.meshes.iter().flat_map(|mesh| mesh.materials.iter()) {
            if !names.contains(&material.name) {
                names.push(material.name.clone());
            }
        }
        names
    }

    /// Cache keys of every texture currently bound to a material.
    pub fn bound_texture_keys(&self) -> Vec<String> {
        self.meshes
            .iter()
            .flat_map(|mesh| mesh.materials.iter())
            .filter_map(|material| material.map_key().map(str::to_string))
            .collect()
    }

    /// Drops geometry and material bindings, returning the cache keys that were bound.
    pub fn dispose(&mut self) -> Vec<String> {
        let keys = self.bound_texture_keys();
        for mesh in &mut self.meshes {
            for material in &mut mesh.materials {
                material.map = None;
            }
        }
        self.meshes.clear();
        keys
    }
}
