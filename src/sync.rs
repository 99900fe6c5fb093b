use crate::compositor::{CanvasSize, ComposedRaster, Compositor};
use crate::error::SyncError;
use crate::resolver::LoadedModel;
use crate::scene::BoundTexture;
use crate::texture_cache::{TextureCache, TextureResource};
use crate::zone::{BackgroundSource, ZoneConfig, ZoneConfigs};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Turns composed rasters into renderable textures.
pub trait TextureBackend {
    type Texture: TextureResource;

    fn upload(&mut self, key: &str, raster: &ComposedRaster) -> anyhow::Result<Self::Texture>;
}

/// Called after each zone with `(completed, total)`.
pub type ProgressFn = Box<dyn FnMut(usize, usize)>;

/// Handle for one `apply_config` call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct ApplyTicket(u64);

/// Trailing-edge debouncer driven by explicit timestamps.
#[derive(Debug)]
pub struct Debouncer<A> {
    window: Duration,
    pending: Option<(A, Instant)>,
    issued: u64,
    settled: u64,
}

impl<A> Debouncer<A> {
    pub fn new(window: Duration) -> Self {
        Self { window, pending: None, issued: 0, settled: 0 }
    }

    pub fn window(&self) -> Duration {
        self.window
    }

    /// Records `args` as the latest request, superseding any pending one.
    pub fn call(&mut self, args: A, now: Instant) -> ApplyTicket {
        if self.pending.is_some() {
            log::debug!("debounced request superseded");
        }
        self.issued += 1;
        self.pending = Some((args, now));
        ApplyTicket(self.issued)
    }

    pub fn is_pending(&self) -> bool {
        self.pending.is_some()
    }

    /// Takes the pending request once the window has elapsed since the last call.
    /// Every ticket issued so far is settled by the returned request.
    pub fn take_due(&mut self, now: Instant) -> Option<A> {
        let due = matches!(&self.pending, Some((_, at)) if now.saturating_duration_since(*at) >= self.window);
        if !due {
            return None;
        }
        self.settled = self.issued;
        self.pending.take().map(|(args, _)| args)
    }

    /// Drops the pending request. Its tickets settle without any work.
    pub fn cancel(&mut self) -> bool {
        self.settled = self.issued;
        self.pending.take().is_some()
    }

    pub fn is_settled(&self, ticket: ApplyTicket) -> bool {
        ticket.0 <= self.settled
    }
}

/// Snapshot captured by `apply_config`.
pub struct ApplyRequest {
    pub zones: ZoneConfigs,
    pub model_id: String,
    pub on_progress: Option<ProgressFn>,
}

#[derive(Debug, Clone, Default)]
pub struct SyncSettings {
    pub canvas: Option<CanvasSize>,
    pub debug_overlays: bool,
    pub design_id: Option<String>,
    pub export_dir: Option<PathBuf>,
}

/// Outcome of one synchronizer execution.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SyncReport {
    pub total: usize,
    pub bound: Vec<String>,
    /// Zones with configuration but no surface in the model.
    pub unresolved: Vec<String>,
    pub failed: Vec<(String, String)>,
    pub exported: Vec<PathBuf>,
}

/// Recomposes zone textures and binds them onto the resolved surfaces.
pub struct SceneSynchronizer<B: TextureBackend> {
    compositor: Compositor,
    cache: TextureCache<B::Texture>,
    backend: B,
    debounce: Debouncer<ApplyRequest>,
    settings: SyncSettings,
    next_key: u64,
    last_report: Option<SyncReport>,
}

impl<B: TextureBackend> SceneSynchronizer<B> {
    pub fn new(compositor: Compositor, backend: B, cache_capacity: usize, debounce: Duration) -> Self {
        Self {
            compositor,
            cache: TextureCache::new(cache_capacity),
            backend,
            debounce: Debouncer::new(debounce),
            settings: SyncSettings::default(),
            next_key: 0,
            last_report: None,
        }
    }

    pub fn with_settings(mut self, settings: SyncSettings) -> Self {
        self.settings = settings;
        self
    }

    pub fn settings_mut(&mut self) -> &mut SyncSettings {
        &mut self.settings
    }

    pub fn cache(&self) -> &TextureCache<B::Texture> {
        &self.cache
    }

    pub fn cache_mut(&mut self) -> &mut TextureCache<B::Texture> {
        &mut self.cache
    }

    pub fn backend_mut(&mut self) -> &mut B {
        &mut self.backend
    }

    pub fn compositor_mut(&mut self) -> &mut Compositor {
        &mut self.compositor
    }

    pub fn last_report(&self) -> Option<&SyncReport> {
        self.last_report.as_ref()
    }

    /// Schedules a sync with a snapshot of `zones`. Calls inside the debounce
    /// window replace each other; only the last one runs.
    pub fn apply_config(
        &mut self,
        zones: &ZoneConfigs,
        model_id: &str,
        on_progress: Option<ProgressFn>,
        now: Instant,
    ) -> ApplyTicket {
        let request = ApplyRequest { zones: zones.clone(), model_id: model_id.to_string(), on_progress };
        self.debounce.call(request, now)
    }

    pub fn is_pending(&self) -> bool {
        self.debounce.is_pending()
    }

    pub fn is_settled(&self, ticket: ApplyTicket) -> bool {
        self.debounce.is_settled(ticket)
    }

    pub fn cancel(&mut self) -> bool {
        self.debounce.cancel()
    }

    /// Runs the pending request if its debounce window has elapsed.
    pub fn poll(&mut self, now: Instant, target: &mut LoadedModel<B::Texture>) -> Option<&SyncReport> {
        let request = self.debounce.take_due(now)?;
        let report = self.execute(request, target);
        self.last_report = Some(report);
        self.last_report.as_ref()
    }

    /// Runs a request immediately, bypassing the debounce window.
    pub fn apply_now(&mut self, request: ApplyRequest, target: &mut LoadedModel<B::Texture>) -> SyncReport {
        self.debounce.cancel();
        let report = self.execute(request, target);
        self.last_report = Some(report.clone());
        report
    }

    /// Composes every configured zone and writes it as PNG without touching the scene.
    pub fn export_zones(
        &mut self,
        zones: &ZoneConfigs,
        model_id: &str,
        target: &LoadedModel<B::Texture>,
        dir: &Path,
    ) -> Vec<PathBuf> {
        let mut written = Vec::new();
        for zone_id in union_zone_ids(target, zones) {
            let config = self.effective_config(&zone_id, zones, target);
            let canvas = self.canvas();
            match self.compositor.compose(&config, None, canvas) {
                Ok(raster) => match export_png(dir, model_id, &zone_id, &raster) {
                    Ok(path) => written.push(path),
                    Err(err) => log::warn!("export of zone '{zone_id}' failed: {err}"),
                },
                Err(err) => log::warn!("export of zone '{zone_id}' failed: {err}"),
            }
        }
        written
    }

    fn execute(&mut self, mut request: ApplyRequest, target: &mut LoadedModel<B::Texture>) -> SyncReport {
        if target.model.model_id != request.model_id {
            log::debug!(
                "sync for model '{}' runs against surfaces of '{}'",
                request.model_id,
                target.model.model_id
            );
        }
        let zone_ids = union_zone_ids(target, &request.zones);
        let mut report = SyncReport { total: zone_ids.len(), ..Default::default() };

        for (index, zone_id) in zone_ids.iter().enumerate() {
            if !target.surface_map.contains_key(zone_id) {
                log::warn!("zone '{zone_id}' has configuration but no surface in model '{}'", target.model.model_id);
                report.unresolved.push(zone_id.clone());
            } else {
                if request.zones.get(zone_id).is_none() {
                    log::warn!("surface '{zone_id}' has no configuration; using defaults");
                }
                let config = self.effective_config(zone_id, &request.zones, target);
                match self.compose_and_bind(zone_id, &config, &request, target) {
                    Ok(exported) => {
                        report.bound.push(zone_id.clone());
                        report.exported.extend(exported);
                    }
                    Err(err) => {
                        log::warn!("zone '{zone_id}' skipped: {err}");
                        report.failed.push((zone_id.clone(), err.to_string()));
                    }
                }
            }
            if let Some(progress) = request.on_progress.as_mut() {
                progress(index + 1, zone_ids.len());
            }
        }

        log::info!(
            "sync of '{}' finished: {} bound, {} unresolved, {} failed, {} cached textures",
            request.model_id,
            report.bound.len(),
            report.unresolved.len(),
            report.failed.len(),
            self.cache.len()
        );
        report
    }

    /// Zone config with the current design's base texture merged in as a
    /// persistent background when the zone has no background of its own.
    fn effective_config(&self, zone_id: &str, zones: &ZoneConfigs, target: &LoadedModel<B::Texture>) -> ZoneConfig {
        let mut config = zones.get(zone_id).cloned().unwrap_or_default();
        if config.background.is_none() {
            let design = target.config.as_ref().and_then(|cfg| cfg.current_design(self.settings.design_id.as_deref()));
            if let Some(url) = design.and_then(|design| design.base_texture(zone_id)) {
                config.background = Some(BackgroundSource::Persistent(url.to_string()));
            }
        }
        config
    }

    fn compose_and_bind(
        &mut self,
        zone_id: &str,
        config: &ZoneConfig,
        request: &ApplyRequest,
        target: &mut LoadedModel<B::Texture>,
    ) -> Result<Option<PathBuf>, SyncError> {
        let surface = target
            .surface_map
            .get(zone_id)
            .cloned()
            .ok_or_else(|| SyncError::StaleSurface { zone_id: zone_id.to_string() })?;
        let overlay = self
            .settings
            .debug_overlays
            .then(|| self.compositor.paths().uv_overlay(&request.model_id, zone_id));
        let canvas = self.canvas();
        let raster = self.compositor.compose(config, overlay.as_deref(), canvas)?;

        let exported = match &self.settings.export_dir {
            Some(dir) => match export_png(dir, &request.model_id, zone_id, &raster) {
                Ok(path) => Some(path),
                Err(err) => {
                    log::warn!("export of zone '{zone_id}' failed: {err}");
                    None
                }
            },
            None => None,
        };

        self.next_key += 1;
        let key = format!("zone_{zone_id}_{}_{}", request.zones.generation(), self.next_key);
        let texture = self
            .backend
            .upload(&key, &raster)
            .map_err(|err| SyncError::Upload { key: key.clone(), message: format!("{err:#}") })?;
        let texture = self.cache.put(key.clone(), Arc::new(texture));
        self.cache.pin(&key);

        let Some(material) = target.model.material_mut(surface.mesh, surface.material) else {
            self.cache.release(&key);
            return Err(SyncError::StaleSurface { zone_id: zone_id.to_string() });
        };
        let previous = material.map.replace(BoundTexture { key, texture: texture.clone() });
        if let Some(previous) = previous {
            if !Arc::ptr_eq(&previous.texture, &texture) {
                self.cache.release(&previous.key);
            }
        }
        Ok(exported)
    }

    fn canvas(&self) -> CanvasSize {
        self.settings.canvas.unwrap_or_else(|| CanvasSize::from(self.compositor.settings()))
    }
}

/// Surface zone ids in asset order, then configured ids without a surface.
fn union_zone_ids<T>(target: &LoadedModel<T>, zones: &ZoneConfigs) -> Vec<String> {
    let mut ids: Vec<String> = Vec::new();
    let known = target.zone_ids.iter().chain(target.surface_map.keys()).map(String::as_str);
    for id in known.chain(zones.zone_ids()) {
        if !ids.iter().any(|existing| existing == id) {
            ids.push(id.to_string());
        }
    }
    ids
}

/// Writes `{dir}/{model_id}_{zone_id}.png`.
pub fn export_png(dir: &Path, model_id: &str, zone_id: &str, raster: &ComposedRaster) -> anyhow::Result<PathBuf> {
    use anyhow::Context;
    fs::create_dir_all(dir).with_context(|| format!("Failed to create export dir {}", dir.display()))?;
    let path = dir.join(format!("{model_id}_{zone_id}.png"));
    let png = raster.encode_png()?;
    fs::write(&path, png).with_context(|| format!("Failed to write {}", path.display()))?;
    Ok(path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::assets::{AssetPaths, MemoryAssetSource};
    use crate::config::CompositionConfig;
    use crate::mesh::{ImportedMaterial, ImportedMesh, ImportedScene, MeshBounds, MeshSubset, MeshVertex};
    use crate::model_config::{Design, ModelConfig};
    use crate::resolver::build_surface_map;
    use crate::scene::ModelInstance;
    use crate::zone::Rgb;
    use glam::{Vec2, Vec3};
    use std::cell::RefCell;
    use std::rc::Rc;
    use std::sync::atomic::{AtomicBool, Ordering};

    #[derive(Debug, Default)]
    struct FakeTexture {
        corner: [u8; 4],
        disposed: AtomicBool,
    }

    impl TextureResource for FakeTexture {
        fn dispose(&self) {
            self.disposed.store(true, Ordering::SeqCst);
        }
    }

    #[derive(Default)]
    struct FakeBackend {
        uploads: Vec<String>,
        failing_zone: Option<&'static str>,
    }

    impl TextureBackend for FakeBackend {
        type Texture = FakeTexture;

        fn upload(&mut self, key: &str, raster: &ComposedRaster) -> anyhow::Result<FakeTexture> {
            self.uploads.push(key.to_string());
            if let Some(zone) = self.failing_zone {
                anyhow::ensure!(!key.starts_with(&format!("zone_{zone}_")), "device lost");
            }
            let corner = raster.pixel(0, 0).unwrap_or_default();
            Ok(FakeTexture { corner, ..Default::default() })
        }
    }

    fn loaded(config: Option<ModelConfig>) -> LoadedModel<FakeTexture> {
        let vertices: Vec<MeshVertex> =
            (0..3).map(|i| MeshVertex::new(Vec3::new(i as f32, 0.0, 0.0), Vec3::Z, Vec2::ZERO)).collect();
        let bounds = MeshBounds::from_vertices(&vertices);
        let imported = ImportedScene {
            meshes: vec![ImportedMesh {
                name: "Body".into(),
                vertices,
                indices: vec![0, 1, 2, 0, 1, 2],
                subsets: vec![
                    MeshSubset { index_offset: 0, index_count: 3, material_slot: 0 },
                    MeshSubset { index_offset: 3, index_count: 3, material_slot: 1 },
                ],
                material_slots: vec![Some(0), Some(1)],
                bounds,
            }],
            materials: vec![
                ImportedMaterial { name: Some("front".into()), base_color: [1.0; 4] },
                ImportedMaterial { name: Some("back".into()), base_color: [1.0; 4] },
            ],
        };
        let model = ModelInstance::from_import("shirt", imported);
        let (surface_map, zone_ids) = build_surface_map(&model, config.as_ref());
        LoadedModel { model, surface_map, zone_ids, config }
    }

    fn synchronizer(source: MemoryAssetSource) -> SceneSynchronizer<FakeBackend> {
        synchronizer_with(source, FakeBackend::default(), 8)
    }

    fn synchronizer_with(source: MemoryAssetSource, backend: FakeBackend, capacity: usize) -> SceneSynchronizer<FakeBackend> {
        let compositor = Compositor::new(Arc::new(source), AssetPaths::new("a"), CompositionConfig::default());
        SceneSynchronizer::new(compositor, backend, capacity, Duration::from_millis(200))
            .with_settings(SyncSettings { canvas: Some(CanvasSize::square(8)), ..Default::default() })
    }

    fn bound_corner(target: &LoadedModel<FakeTexture>, zone: &str) -> Option<[u8; 4]> {
        let surface = &target.surface_map[zone];
        let mesh = target.model.mesh(surface.mesh)?;
        let (_, material) = mesh.material(surface.material)?;
        material.map.as_ref().map(|bound| bound.texture.corner)
    }

    #[test]
    fn debouncer_runs_once_with_last_arguments() {
        let start = Instant::now();
        let mut debounce = Debouncer::new(Duration::from_millis(200));
        let tickets: Vec<_> = (0..5).map(|i| debounce.call(i, start + Duration::from_millis(i * 50))).collect();
        assert_eq!(debounce.take_due(start + Duration::from_millis(300)), None);
        assert!(tickets.iter().all(|t| !debounce.is_settled(*t)));
        assert_eq!(debounce.take_due(start + Duration::from_millis(400)), Some(4));
        assert!(tickets.iter().all(|t| debounce.is_settled(*t)));
        assert_eq!(debounce.take_due(start + Duration::from_secs(5)), None);
    }

    #[test]
    fn cancel_drops_pending_request() {
        let start = Instant::now();
        let mut debounce = Debouncer::new(Duration::from_millis(10));
        let ticket = debounce.call("a", start);
        assert!(debounce.cancel());
        assert!(debounce.is_settled(ticket));
        assert_eq!(debounce.take_due(start + Duration::from_secs(1)), None);
    }

    #[test]
    fn poll_binds_textures_and_reports_progress() {
        let mut sync = synchronizer(MemoryAssetSource::new());
        let mut target = loaded(None);
        let mut zones = ZoneConfigs::with_zone_ids(["front", "collar"]);
        zones.set_color("front", Rgb::new(255, 0, 0));
        let progress = Rc::new(RefCell::new(Vec::new()));
        let sink = progress.clone();
        let start = Instant::now();
        let ticket = sync.apply_config(
            &zones,
            "shirt",
            Some(Box::new(move |done, total| sink.borrow_mut().push((done, total)))),
            start,
        );
        assert!(sync.poll(start + Duration::from_millis(50), &mut target).is_none());
        let report = sync.poll(start + Duration::from_millis(250), &mut target).cloned().expect("executed");
        assert!(sync.is_settled(ticket));
        assert_eq!(report.total, 3);
        assert_eq!(report.bound, vec!["front", "back"]);
        assert_eq!(report.unresolved, vec!["collar"]);
        assert_eq!(*progress.borrow(), vec![(1, 3), (2, 3), (3, 3)]);
        assert_eq!(bound_corner(&target, "front"), Some([255, 0, 0, 255]));
        assert_eq!(bound_corner(&target, "back"), Some([255, 255, 255, 255]));
    }

    #[test]
    fn rebinding_releases_previous_texture_through_cache() {
        let mut sync = synchronizer(MemoryAssetSource::new());
        let mut target = loaded(None);
        let zones = ZoneConfigs::with_zone_ids(["front"]);
        let request = |zones: &ZoneConfigs| ApplyRequest { zones: zones.clone(), model_id: "shirt".into(), on_progress: None };
        sync.apply_now(request(&zones), &mut target);
        let first = target.model.meshes[0].materials[0].map.clone().expect("bound");
        sync.apply_now(request(&zones), &mut target);
        let second = target.model.meshes[0].materials[0].map.clone().expect("bound");
        assert_ne!(first.key, second.key);
        assert!(first.texture.disposed.load(Ordering::SeqCst));
        assert!(!second.texture.disposed.load(Ordering::SeqCst));
        assert!(!sync.cache().contains(&first.key));
        assert_eq!(sync.cache().len(), 2);
    }

    #[test]
    fn design_texture_backs_zones_without_background() {
        let png = {
            let img = image::RgbaImage::from_pixel(1, 1, image::Rgba([0, 0, 255, 255]));
            let mut out = std::io::Cursor::new(Vec::new());
            img.write_to(&mut out, image::ImageFormat::Png).expect("png");
            out.into_inner()
        };
        let source = MemoryAssetSource::new().with("camo.png", png);
        let mut sync = synchronizer(source);
        let config = ModelConfig {
            model_id: "shirt".into(),
            designs: vec![Design {
                id: "camo".into(),
                name: "Camo".into(),
                base_textures: [("front".to_string(), "camo.png".to_string()), ("back".to_string(), "camo.png".to_string())]
                    .into_iter()
                    .collect(),
            }],
            ..Default::default()
        };
        let mut target = loaded(Some(config));
        let mut zones = ZoneConfigs::with_zone_ids(["front", "back"]);
        zones.set_texture_url("back", "missing.png");
        let report = sync.apply_now(ApplyRequest { zones, model_id: "shirt".into(), on_progress: None }, &mut target);
        assert!(report.failed.is_empty());
        assert_eq!(bound_corner(&target, "front"), Some([0, 0, 255, 255]));
        // the zone's own background wins even when it fails to load
        assert_eq!(bound_corner(&target, "back"), Some([255, 255, 255, 255]));
    }

    #[test]
    fn export_writes_one_png_per_zone() {
        let dir = tempfile::tempdir().expect("tempdir");
        let mut sync = synchronizer(MemoryAssetSource::new());
        sync.settings_mut().export_dir = Some(dir.path().to_path_buf());
        let mut target = loaded(None);
        let zones = ZoneConfigs::with_zone_ids(["front"]);
        let report = sync.apply_now(ApplyRequest { zones, model_id: "shirt".into(), on_progress: None }, &mut target);
        assert_eq!(report.exported.len(), 2);
        assert!(dir.path().join("shirt_front.png").is_file());
        assert!(dir.path().join("shirt_back.png").is_file());
    }

    #[test]
    fn failing_upload_skips_only_its_zone() {
        let backend = FakeBackend { failing_zone: Some("front"), ..Default::default() };
        let mut sync = synchronizer_with(MemoryAssetSource::new(), backend, 8);
        let mut target = loaded(None);
        let zones = ZoneConfigs::with_zone_ids(["front", "back"]);
        let progress = Rc::new(RefCell::new(Vec::new()));
        let sink = progress.clone();
        let request = ApplyRequest {
            zones,
            model_id: "shirt".into(),
            on_progress: Some(Box::new(move |done, total| sink.borrow_mut().push((done, total)))),
        };
        let report = sync.apply_now(request, &mut target);
        assert_eq!(report.bound, vec!["back"]);
        assert_eq!(report.failed.len(), 1);
        assert_eq!(report.failed[0].0, "front");
        assert_eq!(progress.borrow().last(), Some(&(2, 2)));
        assert_eq!(bound_corner(&target, "front"), None);
        assert_eq!(bound_corner(&target, "back"), Some([255, 255, 255, 255]));
    }

    #[test]
    fn small_cache_never_disposes_bound_textures() {
        let mut sync = synchronizer_with(MemoryAssetSource::new(), FakeBackend::default(), 1);
        let mut target = loaded(None);
        let zones = ZoneConfigs::with_zone_ids(["front", "back"]);
        let request = |zones: &ZoneConfigs| ApplyRequest { zones: zones.clone(), model_id: "shirt".into(), on_progress: None };
        for _ in 0..2 {
            let report = sync.apply_now(request(&zones), &mut target);
            assert_eq!(report.bound, vec!["front", "back"]);
        }
        for material in &target.model.meshes[0].materials {
            let bound = material.map.as_ref().expect("bound");
            assert!(!bound.texture.disposed.load(Ordering::SeqCst), "'{}' disposed while bound", bound.key);
            assert!(sync.cache().contains(&bound.key));
        }
        assert_eq!(sync.cache().len(), 2);
    }
}
