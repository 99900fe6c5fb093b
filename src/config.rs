use anyhow::{Context, Result};
use serde::Deserialize;
use std::fs;
use std::path::Path;
use std::time::Duration;

#[derive(Debug, Clone, Deserialize)]
pub struct WindowConfig {
    pub title: String,
    pub width: u32,
    pub height: u32,
    pub vsync: bool,
    pub fullscreen: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AssetConfig {
    #[serde(default = "AssetConfig::default_base_dir")]
    pub base_dir: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CompositionConfig {
    #[serde(default = "CompositionConfig::default_size")]
    pub width: u32,
    #[serde(default = "CompositionConfig::default_size")]
    pub height: u32,
    #[serde(default = "CompositionConfig::default_image_timeout_ms")]
    pub background_timeout_ms: u64,
    #[serde(default = "CompositionConfig::default_image_timeout_ms")]
    pub logo_timeout_ms: u64,
    #[serde(default = "CompositionConfig::default_image_timeout_ms")]
    pub font_timeout_ms: u64,
    #[serde(default = "CompositionConfig::default_overlay_timeout_ms")]
    pub overlay_timeout_ms: u64,
    #[serde(default = "CompositionConfig::default_logo_scale")]
    pub logo_scale: f32,
    #[serde(default = "CompositionConfig::default_overlay_opacity")]
    pub overlay_opacity: f32,
    #[serde(default)]
    pub debug_overlays: bool,
    #[serde(default = "CompositionConfig::default_font_path")]
    pub default_font: Option<String>,
    #[serde(default = "CompositionConfig::default_text_size")]
    pub text_size: f32,
    #[serde(default = "CompositionConfig::default_number_size")]
    pub number_size: f32,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CacheConfig {
    #[serde(default = "CacheConfig::default_capacity")]
    pub capacity: usize,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SyncConfig {
    #[serde(default = "SyncConfig::default_debounce_ms")]
    pub debounce_ms: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CameraConfig {
    #[serde(default = "CameraConfig::default_fov_degrees")]
    pub fov_degrees: f32,
    #[serde(default = "CameraConfig::default_near")]
    pub near: f32,
    #[serde(default = "CameraConfig::default_far")]
    pub far: f32,
    #[serde(default = "CameraConfig::default_position")]
    pub position: [f32; 3],
    #[serde(default)]
    pub target: [f32; 3],
    #[serde(default = "CameraConfig::default_fallback_target")]
    pub fallback_target: [f32; 3],
    #[serde(default = "CameraConfig::default_focus_duration_ms")]
    pub focus_duration_ms: u64,
    #[serde(default = "CameraConfig::default_focus_distance_factor")]
    pub focus_distance_factor: f32,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LightingConfig {
    #[serde(default = "LightingConfig::default_background")]
    pub background: String,
    #[serde(default = "LightingConfig::default_ambient_intensity")]
    pub ambient_intensity: f32,
    #[serde(default = "LightingConfig::default_directional_intensity")]
    pub directional_intensity: f32,
    #[serde(default = "LightingConfig::default_directional_position")]
    pub directional_position: [f32; 3],
    #[serde(default = "LightingConfig::default_hemisphere_sky")]
    pub hemisphere_sky: String,
    #[serde(default = "LightingConfig::default_hemisphere_ground")]
    pub hemisphere_ground: String,
    #[serde(default = "LightingConfig::default_hemisphere_intensity")]
    pub hemisphere_intensity: f32,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SceneConfig {
    #[serde(default = "SceneConfig::default_model_id")]
    pub model_id: String,
    #[serde(default)]
    pub design_id: Option<String>,
    #[serde(default)]
    pub zones_file: Option<String>,
    #[serde(default)]
    pub export_dir: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct AppConfig {
    #[serde(default)]
    pub window: WindowConfig,
    #[serde(default)]
    pub assets: AssetConfig,
    #[serde(default)]
    pub composition: CompositionConfig,
    #[serde(default)]
    pub cache: CacheConfig,
    #[serde(default)]
    pub sync: SyncConfig,
    #[serde(default)]
    pub camera: CameraConfig,
    #[serde(default)]
    pub lighting: LightingConfig,
    #[serde(default)]
    pub scene: SceneConfig,
}

#[derive(Debug, Clone, Default)]
pub struct AppConfigOverrides {
    pub width: Option<u32>,
    pub height: Option<u32>,
    pub vsync: Option<bool>,
    pub model_id: Option<String>,
    pub design_id: Option<String>,
    pub assets_dir: Option<String>,
    pub zones_file: Option<String>,
    pub export_dir: Option<String>,
    pub debug_overlays: Option<bool>,
}

impl Default for WindowConfig {
    fn default() -> Self {
        Self { title: "Atelier Configurator".to_string(), width: 1280, height: 720, vsync: true, fullscreen: false }
    }
}

impl AssetConfig {
    fn default_base_dir() -> String {
        "assets".to_string()
    }
}

impl Default for AssetConfig {
    fn default() -> Self {
        Self { base_dir: Self::default_base_dir() }
    }
}

impl CompositionConfig {
    const fn default_size() -> u32 {
        1024
    }

    const fn default_image_timeout_ms() -> u64 {
        10_000
    }

    const fn default_overlay_timeout_ms() -> u64 {
        2_000
    }

    const fn default_logo_scale() -> f32 {
        0.3
    }

    const fn default_overlay_opacity() -> f32 {
        0.3
    }

    fn default_font_path() -> Option<String> {
        Some("assets/fonts/default.ttf".to_string())
    }

    const fn default_text_size() -> f32 {
        48.0
    }

    const fn default_number_size() -> f32 {
        72.0
    }

    pub fn background_timeout(&self) -> Duration {
        Duration::from_millis(self.background_timeout_ms)
    }

    pub fn logo_timeout(&self) -> Duration {
        Duration::from_millis(self.logo_timeout_ms)
    }

    pub fn font_timeout(&self) -> Duration {
        Duration::from_millis(self.font_timeout_ms)
    }

    pub fn overlay_timeout(&self) -> Duration {
        Duration::from_millis(self.overlay_timeout_ms)
    }
}

impl Default for CompositionConfig {
    fn default() -> Self {
        Self {
            width: Self::default_size(),
            height: Self::default_size(),
            background_timeout_ms: Self::default_image_timeout_ms(),
            logo_timeout_ms: Self::default_image_timeout_ms(),
            font_timeout_ms: Self::default_image_timeout_ms(),
            overlay_timeout_ms: Self::default_overlay_timeout_ms(),
            logo_scale: Self::default_logo_scale(),
            overlay_opacity: Self::default_overlay_opacity(),
            debug_overlays: false,
            default_font: Self::default_font_path(),
            text_size: Self::default_text_size(),
            number_size: Self::default_number_size(),
        }
    }
}

impl CacheConfig {
    const fn default_capacity() -> usize {
        50
    }
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self { capacity: Self::default_capacity() }
    }
}

impl SyncConfig {
    const fn default_debounce_ms() -> u64 {
        200
    }

    pub fn debounce(&self) -> Duration {
        Duration::from_millis(self.debounce_ms)
    }
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self { debounce_ms: Self::default_debounce_ms() }
    }
}

impl CameraConfig {
    const fn default_fov_degrees() -> f32 {
        75.0
    }

    const fn default_near() -> f32 {
        0.1
    }

    const fn default_far() -> f32 {
        1000.0
    }

    const fn default_position() -> [f32; 3] {
        [0.0, 1.5, 3.0]
    }

    const fn default_fallback_target() -> [f32; 3] {
        [0.0, 1.0, 0.0]
    }

    const fn default_focus_duration_ms() -> u64 {
        1_000
    }

    const fn default_focus_distance_factor() -> f32 {
        2.5
    }

    pub fn focus_duration(&self) -> Duration {
        Duration::from_millis(self.focus_duration_ms)
    }
}

impl Default for CameraConfig {
    fn default() -> Self {
        Self {
            fov_degrees: Self::default_fov_degrees(),
            near: Self::default_near(),
            far: Self::default_far(),
            position: Self::default_position(),
            target: [0.0; 3],
            fallback_target: Self::default_fallback_target(),
            focus_duration_ms: Self::default_focus_duration_ms(),
            focus_distance_factor: Self::default_focus_distance_factor(),
        }
    }
}

impl LightingConfig {
    fn default_background() -> String {
        "#f5f5f5".to_string()
    }

    const fn default_ambient_intensity() -> f32 {
        0.6
    }

    const fn default_directional_intensity() -> f32 {
        0.8
    }

    const fn default_directional_position() -> [f32; 3] {
        [5.0, 10.0, 5.0]
    }

    fn default_hemisphere_sky() -> String {
        "#ffffff".to_string()
    }

    fn default_hemisphere_ground() -> String {
        "#444444".to_string()
    }

    const fn default_hemisphere_intensity() -> f32 {
        0.4
    }
}

impl Default for LightingConfig {
    fn default() -> Self {
        Self {
            background: Self::default_background(),
            ambient_intensity: Self::default_ambient_intensity(),
            directional_intensity: Self::default_directional_intensity(),
            directional_position: Self::default_directional_position(),
            hemisphere_sky: Self::default_hemisphere_sky(),
            hemisphere_ground: Self::default_hemisphere_ground(),
            hemisphere_intensity: Self::default_hemisphere_intensity(),
        }
    }
}

impl SceneConfig {
    fn default_model_id() -> String {
        "tshirt".to_string()
    }
}

impl Default for SceneConfig {
    fn default() -> Self {
        Self { model_id: Self::default_model_id(), design_id: None, zones_file: None, export_dir: None }
    }
}

impl AppConfig {
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let bytes =
            fs::read(path).with_context(|| format!("Failed to read config file {}", path.display()))?;
        let cfg = serde_json::from_slice(&bytes)
            .with_context(|| format!("Failed to parse config file {}", path.display()))?;
        Ok(cfg)
    }

    pub fn load_or_default(path: impl AsRef<Path>) -> Self {
        match Self::load(path) {
            Ok(cfg) => cfg,
            Err(err) => {
                log::warn!("Config load error: {err:?}. Falling back to defaults.");
                Self::default()
            }
        }
    }

    pub fn apply_overrides(&mut self, overrides: &AppConfigOverrides) {
        if let Some(width) = overrides.width {
            self.window.width = width;
        }
        if let Some(height) = overrides.height {
            self.window.height = height;
        }
        if let Some(vsync) = overrides.vsync {
            self.window.vsync = vsync;
        }
        if let Some(model_id) = &overrides.model_id {
            self.scene.model_id = model_id.clone();
        }
        if let Some(design_id) = &overrides.design_id {
            self.scene.design_id = Some(design_id.clone());
        }
        if let Some(dir) = &overrides.assets_dir {
            self.assets.base_dir = dir.clone();
        }
        if let Some(zones) = &overrides.zones_file {
            self.scene.zones_file = Some(zones.clone());
        }
        if let Some(dir) = &overrides.export_dir {
            self.scene.export_dir = Some(dir.clone());
        }
        if let Some(enabled) = overrides.debug_overlays {
            self.composition.debug_overlays = enabled;
        }
    }
}

impl AppConfigOverrides {
    pub fn is_empty(&self) -> bool {
        self.applied_fields().is_empty()
    }

    pub fn applied_fields(&self) -> Vec<&'static str> {
        let mut fields = Vec::new();
        if self.width.is_some() {
            fields.push("width");
        }
        if self.height.is_some() {
            fields.push("height");
        }
        if self.vsync.is_some() {
            fields.push("vsync");
        }
        if self.model_id.is_some() {
            fields.push("model");
        }
        if self.design_id.is_some() {
            fields.push("design");
        }
        if self.assets_dir.is_some() {
            fields.push("assets");
        }
        if self.zones_file.is_some() {
            fields.push("zones");
        }
        if self.export_dir.is_some() {
            fields.push("export-dir");
        }
        if self.debug_overlays.is_some() {
            fields.push("debug-overlays");
        }
        fields
    }
}
