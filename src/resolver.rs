use crate::assets::{AssetPaths, AssetSource};
use crate::error::AssetLoadError;
use crate::mesh::import_gltf_slice;
use crate::model_config::ModelConfig;
use crate::scene::{MaterialId, MeshId, ModelInstance};
use crate::zone::default_zone_ids;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

/// Concrete mesh and material a zone id resolved to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SurfaceRef {
    pub mesh: MeshId,
    pub material: MaterialId,
    pub material_index: usize,
    pub material_name: String,
}

/// Zone id to surface. A zone resolves to at most one surface.
pub type SurfaceMap = BTreeMap<String, SurfaceRef>;

#[derive(Debug)]
pub struct LoadedModel<T> {
    pub model: ModelInstance<T>,
    pub surface_map: SurfaceMap,
    /// Zone ids in asset order.
    pub zone_ids: Vec<String>,
    pub config: Option<ModelConfig>,
}

pub struct ModelAssetResolver {
    source: Arc<dyn AssetSource>,
    paths: AssetPaths,
    timeout: Duration,
}

impl ModelAssetResolver {
    pub fn new(source: Arc<dyn AssetSource>, paths: AssetPaths, timeout: Duration) -> Self {
        Self { source, paths, timeout }
    }

    pub fn paths(&self) -> &AssetPaths {
        &self.paths
    }

    /// Loads the model at `path` plus the companion config for `model_id`.
    /// A missing or malformed config is logged and the material names are used as zone ids.
    pub fn load_asset<T>(&self, path: &str, model_id: &str) -> Result<LoadedModel<T>, AssetLoadError> {
        let config = match ModelConfig::fetch(self.source.as_ref(), &self.paths, model_id, self.timeout) {
            Ok(config) => Some(config),
            Err(err) => {
                log::warn!("model config for '{model_id}' unavailable ({err}); using material names as zones");
                None
            }
        };
        let bytes = self.source.fetch(path, self.timeout)?;
        let imported = import_gltf_slice(&bytes, path)?;
        let model = ModelInstance::from_import(model_id, imported);
        let (surface_map, zone_ids) = build_surface_map(&model, config.as_ref());
        log::info!(
            "loaded model '{model_id}' from {path}: {} meshes, {} materials, {} zones",
            model.meshes.len(),
            model.material_names().len(),
            zone_ids.len()
        );
        Ok(LoadedModel { model, surface_map, zone_ids, config })
    }

    /// Loads the model through the standard `models/{id}.glb` location.
    pub fn load_model<T>(&self, model_id: &str) -> Result<LoadedModel<T>, AssetLoadError> {
        let path = self.paths.model(model_id);
        self.load_asset(&path, model_id)
    }
}

/// Static zone list used before the asset has loaded.
pub fn get_default_zone_ids(_model_id: &str) -> Vec<String> {
    default_zone_ids()
}

/// Assigns every drawable material a zone id. Configured mappings win; other
/// materials use their own name, and slots that only carry a generated default
/// material use the mesh name. The first surface found for a zone is kept.
pub fn build_surface_map<T>(model: &ModelInstance<T>, config: Option<&ModelConfig>) -> (SurfaceMap, Vec<String>) {
    let mut surface_map = SurfaceMap::new();
    let mut zone_ids = Vec::new();
    for mesh in &model.meshes {
        for (index, material) in mesh.materials.iter().enumerate() {
            let zone_id = match config.and_then(|cfg| cfg.zone_for_material(&material.name)) {
                Some(zone) => zone.to_string(),
                None if material.is_default => mesh.name.clone(),
                None => material.name.clone(),
            };
            if surface_map.contains_key(&zone_id) {
                log::debug!("zone '{zone_id}' already resolved; ignoring material '{}'", material.name);
                continue;
            }
            zone_ids.push(zone_id.clone());
            surface_map.insert(
                zone_id,
                SurfaceRef {
                    mesh: mesh.id,
                    material: material.id,
                    material_index: index,
                    material_name: material.name.clone(),
                },
            );
        }
    }

    if let Some(config) = config {
        let available = model.material_names();
        for mapping in &config.zones {
            if !available.iter().any(|name| name == &mapping.mesh_name) {
                log::warn!(
                    "zone '{}' maps to material '{}' which is not in model '{}'; available materials: {}",
                    mapping.part_id,
                    mapping.mesh_name,
                    model.model_id,
                    available.join(", ")
                );
            }
        }
    }
    (surface_map, zone_ids)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mesh::{ImportedMaterial, ImportedMesh, ImportedScene, MeshBounds, MeshSubset, MeshVertex};
    use crate::model_config::ZoneMapping;
    use glam::{Vec2, Vec3};

    fn model(material_names: &[Option<&str>]) -> ModelInstance<()> {
        let vertices: Vec<MeshVertex> =
            (0..3).map(|i| MeshVertex::new(Vec3::new(i as f32, 0.0, 0.0), Vec3::Z, Vec2::ZERO)).collect();
        let subsets = (0..material_names.len())
            .map(|slot| MeshSubset { index_offset: 0, index_count: 3, material_slot: slot })
            .collect();
        let material_slots =
            material_names.iter().enumerate().map(|(i, name)| name.map(|_| i)).collect::<Vec<_>>();
        let materials = material_names
            .iter()
            .map(|name| ImportedMaterial { name: name.map(str::to_string), base_color: [1.0; 4] })
            .collect();
        let bounds = MeshBounds::from_vertices(&vertices);
        ModelInstance::from_import(
            "shirt",
            ImportedScene {
                meshes: vec![ImportedMesh {
                    name: "Shirt".into(),
                    vertices,
                    indices: vec![0, 1, 2],
                    subsets,
                    material_slots,
                    bounds,
                }],
                materials,
            },
        )
    }

    #[test]
    fn config_mapping_wins_and_unmapped_materials_keep_their_name() {
        let model = model(&[Some("Mat.Front"), Some("Collar")]);
        let config = ModelConfig {
            model_id: "shirt".into(),
            zones: vec![
                ZoneMapping { mesh_name: "Mat.Front".into(), part_id: "front".into() },
                ZoneMapping { mesh_name: "Mat.Missing".into(), part_id: "back".into() },
            ],
            ..Default::default()
        };
        let (map, ids) = build_surface_map(&model, Some(&config));
        assert_eq!(ids, vec!["front", "Collar"]);
        let front = &map["front"];
        assert_eq!(front.material_name, "Mat.Front");
        assert_eq!(front.material_index, 0);
        assert_eq!(front.mesh, model.meshes[0].id);
        assert_eq!(front.material, model.meshes[0].materials[0].id);
        assert!(!map.contains_key("back"));
    }

    #[test]
    fn without_config_material_names_are_zones() {
        let model = model(&[Some("front"), None]);
        let (map, ids) = build_surface_map(&model, None);
        assert_eq!(ids, vec!["front", "Shirt"]);
        assert_eq!(map["Shirt"].material_index, 1);
    }

    #[test]
    fn default_zone_ids_are_static() {
        assert_eq!(get_default_zone_ids("anything"), vec!["front", "back", "sleeve_left", "sleeve_right"]);
    }
}
