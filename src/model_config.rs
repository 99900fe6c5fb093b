use crate::assets::{AssetPaths, AssetSource};
use crate::error::ConfigLoadError;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Duration;

/// Binds a material name inside the asset to a zone id.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ZoneMapping {
    pub mesh_name: String,
    pub part_id: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Design {
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub base_textures: BTreeMap<String, String>,
}

impl Design {
    pub fn base_texture(&self, zone_id: &str) -> Option<&str> {
        self.base_textures.get(zone_id).map(String::as_str).filter(|url| !url.trim().is_empty())
    }
}

/// Declarative companion document of a 3D asset.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct ModelConfig {
    pub model_id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub zones: Vec<ZoneMapping>,
    #[serde(default)]
    pub designs: Vec<Design>,
}

impl ModelConfig {
    pub fn from_slice(bytes: &[u8], location: &str) -> Result<Self, ConfigLoadError> {
        serde_json::from_slice(bytes)
            .map_err(|source| ConfigLoadError::Parse { location: location.to_string(), source })
    }

    pub fn fetch(
        source: &dyn AssetSource,
        paths: &AssetPaths,
        model_id: &str,
        timeout: Duration,
    ) -> Result<Self, ConfigLoadError> {
        let location = paths.model_config(model_id);
        let bytes = source.fetch(&location, timeout)?;
        Self::from_slice(&bytes, &location)
    }

    /// Zone id configured for a material name, if any.
    pub fn zone_for_material(&self, material_name: &str) -> Option<&str> {
        self.zones.iter().find(|mapping| mapping.mesh_name == material_name).map(|mapping| mapping.part_id.as_str())
    }

    pub fn zone_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = Vec::new();
        for mapping in &self.zones {
            if !ids.contains(&mapping.part_id) {
                ids.push(mapping.part_id.clone());
            }
        }
        ids
    }

    /// The design with `design_id`, or the first design when no id is given or it is unknown.
    pub fn current_design(&self, design_id: Option<&str>) -> Option<&Design> {
        if let Some(id) = design_id {
            if let Some(design) = self.designs.iter().find(|design| design.id == id) {
                return Some(design);
            }
            log::warn!("model '{}' has no design '{id}', using the first design", self.model_id);
        }
        self.designs.first()
    }
}
