mod session;

pub use session::ConfiguratorSession;

use crate::assets::{AssetPaths, AssetSource, DefaultAssetSource};
use crate::compositor::{CanvasSize, Compositor};
use crate::config::{AppConfig, AppConfigOverrides};
use crate::input::{Input, InputAction, InputEvent};
use crate::lifecycle::{FrameOutcome, SceneLifecycle};
use crate::picker::{focus_on_part, ClickKind};
use crate::renderer::{Renderer, WgpuTextureBackend};
use crate::resolver::ModelAssetResolver;
use crate::sync::{ProgressFn, SceneSynchronizer, SyncSettings};
use crate::time::FrameClock;
use crate::upload::{LocalUploader, UploadFile};
use crate::zone::{default_zone_ids, ZoneConfigs};

use anyhow::{Context, Result};
use glam::Vec2;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;
use winit::application::ApplicationHandler;
use winit::dpi::PhysicalSize;
use winit::event::{DeviceEvent, WindowEvent};
use winit::event_loop::{ActiveEventLoop, EventLoop};

const CONFIG_PATH: &str = "config/app.json";
const BINDINGS_PATH: &str = "config/input.json";
/// Radians of orbit per pixel of right-drag motion.
const ORBIT_SENSITIVITY: f32 = 0.005;
const ZOOM_STEP: f32 = 0.9;

pub async fn run() -> Result<()> {
    run_with_overrides(AppConfigOverrides::default()).await
}

pub async fn run_with_overrides(overrides: AppConfigOverrides) -> Result<()> {
    let mut config = AppConfig::load_or_default(CONFIG_PATH);
    if !overrides.is_empty() {
        log::info!("command line overrides: {}", overrides.applied_fields().join(", "));
    }
    config.apply_overrides(&overrides);
    let event_loop = EventLoop::new().context("Failed to create winit event loop")?;
    let mut app = App::new(config);
    event_loop.run_app(&mut app).context("Event loop execution failed")?;
    Ok(())
}

pub struct App {
    config: AppConfig,
    source: Arc<dyn AssetSource>,
    paths: AssetPaths,
    resolver: ModelAssetResolver,
    lifecycle: SceneLifecycle<Renderer>,
    sync: Option<SceneSynchronizer<WgpuTextureBackend>>,
    session: ConfiguratorSession,
    input: Input,
    clock: FrameClock,
    should_close: bool,
}

impl App {
    pub fn new(config: AppConfig) -> Self {
        let source: Arc<dyn AssetSource> = Arc::new(DefaultAssetSource::new());
        let paths = AssetPaths::new(config.assets.base_dir.clone());
        let resolver =
            ModelAssetResolver::new(source.clone(), paths.clone(), config.composition.background_timeout());
        let viewport = PhysicalSize::new(config.window.width, config.window.height);
        let lifecycle =
            SceneLifecycle::new(Renderer::new(&config.window), &config.camera, &config.lighting, viewport);
        let zones = initial_zones(config.scene.zones_file.as_deref());
        let mut session = ConfiguratorSession::new(zones, config.scene.model_id.clone());
        match LocalUploader::new(paths.uploads_dir()) {
            Ok(uploader) => session = session.with_uploader(Box::new(uploader)),
            Err(err) => log::warn!("uploads disabled: {err:?}"),
        }
        Self {
            config,
            source,
            paths,
            resolver,
            lifecycle,
            sync: None,
            session,
            input: Input::from_config(BINDINGS_PATH),
            clock: FrameClock::new(),
            should_close: false,
        }
    }

    fn init_scene(&mut self, event_loop: &ActiveEventLoop) -> Result<()> {
        let Some(renderer) = self.lifecycle.renderer_mut() else {
            anyhow::bail!("scene was already torn down");
        };
        renderer.ensure_window(event_loop)?;
        let size = renderer.size();
        if self.sync.is_none() {
            let backend = renderer.texture_backend()?;
            self.sync = Some(self.build_synchronizer(backend));
        }
        self.lifecycle.resize(size);

        if self.lifecycle.model().is_none() {
            self.load_model()?;
        }
        self.lifecycle.start();
        Ok(())
    }

    fn build_synchronizer(&self, backend: WgpuTextureBackend) -> SceneSynchronizer<WgpuTextureBackend> {
        let compositor = Compositor::new(self.source.clone(), self.paths.clone(), self.config.composition.clone());
        let settings = SyncSettings {
            canvas: Some(CanvasSize::from(&self.config.composition)),
            debug_overlays: self.config.composition.debug_overlays,
            design_id: self.config.scene.design_id.clone(),
            export_dir: self.config.scene.export_dir.as_ref().map(PathBuf::from),
        };
        SceneSynchronizer::new(compositor, backend, self.config.cache.capacity, self.config.sync.debounce())
            .with_settings(settings)
    }

    fn load_model(&mut self) -> Result<()> {
        let model_id = self.session.model_id().to_string();
        let loaded = self.resolver.load_model(&model_id).with_context(|| format!("Failed to load model '{model_id}'"))?;
        self.session.zones_mut().ensure_zones(loaded.zone_ids.iter().map(String::as_str));
        let sync = self.sync.as_mut().context("synchronizer not initialised")?;
        if let Some(previous) = self.lifecycle.replace_model(loaded, sync.cache_mut()) {
            log::info!("replaced model '{previous}'");
        }
        self.schedule_sync(self.clock.now());
        Ok(())
    }

    fn schedule_sync(&mut self, now: Instant) {
        let Some(sync) = self.sync.as_mut() else {
            return;
        };
        let progress: ProgressFn = Box::new(|done, total| log::debug!("composed {done}/{total} zones"));
        sync.apply_config(self.session.zones(), self.session.model_id(), Some(progress), now);
    }

    fn handle_actions(&mut self, event_loop: &ActiveEventLoop, now: Instant) {
        for action in self.input.take_actions() {
            match action {
                InputAction::Quit => self.should_close = true,
                InputAction::TogglePicker => {
                    self.session.toggle_picker();
                }
                InputAction::ExportTextures => self.export_textures(),
                InputAction::ModifierShift => {}
                focus => {
                    if let Some(zone_id) = focus.focus_zone() {
                        self.focus_zone(zone_id, now);
                    }
                }
            }
        }
        if self.should_close {
            event_loop.exit();
        }
    }

    fn focus_zone(&mut self, zone_id: &str, now: Instant) {
        let Some(model) = self.lifecycle.model() else {
            return;
        };
        if let Some(transition) = focus_on_part(zone_id, model, self.lifecycle.camera(), &self.config.camera, now) {
            self.lifecycle.animate_camera(transition);
            self.session.select_zone(zone_id);
        }
    }

    fn export_textures(&mut self) {
        let dir = self.config.scene.export_dir.clone().unwrap_or_else(|| "exports".to_string());
        let (Some(sync), Some(model)) = (self.sync.as_mut(), self.lifecycle.model()) else {
            return;
        };
        let written = sync.export_zones(self.session.zones(), self.session.model_id(), model, Path::new(&dir));
        log::info!("exported {} zone textures to {dir}", written.len());
    }

    fn handle_pointer(&mut self) {
        if self.input.right_held() {
            let (dx, dy) = self.input.mouse_delta;
            if dx != 0.0 || dy != 0.0 {
                self.lifecycle.orbit(Vec2::new(-dx, -dy) * ORBIT_SENSITIVITY);
            }
        }
        if let Some(delta) = self.input.consume_wheel_delta() {
            self.lifecycle.zoom(ZOOM_STEP.powf(delta));
        }
        if !self.input.take_left_click() {
            return;
        }
        let (Some((x, y)), Some(model)) = (self.input.cursor_position(), self.lifecycle.model()) else {
            return;
        };
        let kind = if self.input.shift_held() { ClickKind::Select } else { ClickKind::Place };
        let viewport = self.lifecycle.viewport();
        let camera = self.lifecycle.camera();
        self.session.picker_mut().handle_click(kind, Vec2::new(x, y), viewport, camera, model);
    }

    fn handle_dropped_file(&mut self, path: &Path) {
        let file = match UploadFile::from_path(path) {
            Ok(file) => file,
            Err(err) => {
                log::warn!("could not read dropped file {}: {err}", path.display());
                return;
            }
        };
        match self.session.attach_logo(file) {
            Ok(receipt) => {
                log::info!("logo for '{}' stored at {}", self.session.selected_zone(), receipt.url);
                self.schedule_sync(self.clock.now());
            }
            Err(err) => log::warn!("upload rejected: {err}"),
        }
    }

    fn teardown(&mut self) {
        if let Some(sync) = self.sync.as_mut() {
            sync.cancel();
            self.lifecycle.teardown(sync.cache_mut());
        }
    }
}

fn initial_zones(zones_file: Option<&str>) -> ZoneConfigs {
    let Some(path) = zones_file else {
        return ZoneConfigs::with_zone_ids(default_zone_ids());
    };
    match ZoneConfigs::load(path) {
        Ok(zones) => zones,
        Err(err) => {
            log::warn!("Zone config load error: {err:?}. Starting from default zones.");
            ZoneConfigs::with_zone_ids(default_zone_ids())
        }
    }
}

impl ApplicationHandler for App {
    fn resumed(&mut self, event_loop: &ActiveEventLoop) {
        if let Err(err) = self.init_scene(event_loop) {
            log::error!("Scene initialization error: {err:?}");
            self.should_close = true;
        }
    }

    fn window_event(&mut self, _el: &ActiveEventLoop, _id: winit::window::WindowId, event: WindowEvent) {
        self.input.push(InputEvent::from_window_event(&event));
        match &event {
            WindowEvent::CloseRequested => self.should_close = true,
            WindowEvent::Resized(size) => self.lifecycle.resize(*size),
            WindowEvent::DroppedFile(path) => self.handle_dropped_file(path),
            _ => {}
        }
    }

    fn device_event(&mut self, _e: &ActiveEventLoop, _dev: winit::event::DeviceId, ev: DeviceEvent) {
        self.input.push(InputEvent::from_device_event(&ev));
    }

    fn about_to_wait(&mut self, event_loop: &ActiveEventLoop) {
        if self.should_close {
            event_loop.exit();
            return;
        }
        let now = self.clock.tick();
        self.handle_actions(event_loop, now);
        self.handle_pointer();
        if self.session.drain_picker_events() {
            self.schedule_sync(now);
        }

        if let (Some(sync), Some(model)) = (self.sync.as_mut(), self.lifecycle.model_mut()) {
            if let Some(report) = sync.poll(now, model) {
                log::info!(
                    "sync: {}/{} zones bound, {} unresolved, {} failed",
                    report.bound.len(),
                    report.total,
                    report.unresolved.len(),
                    report.failed.len()
                );
            }
        }

        match self.lifecycle.frame(now) {
            Ok(FrameOutcome::Rendered) => {
                if let Some(window) = self.lifecycle.renderer().and_then(Renderer::window) {
                    window.request_redraw();
                }
            }
            Ok(FrameOutcome::Idle | FrameOutcome::Skipped) => {}
            Err(err) => log::error!("Frame error: {err:?}"),
        }
        self.input.clear_frame();
    }

    fn exiting(&mut self, _event_loop: &ActiveEventLoop) {
        self.teardown();
    }
}
