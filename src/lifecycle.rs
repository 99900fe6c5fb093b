use crate::camera3d::{Camera3D, CameraTransition, OrbitCamera};
use crate::config::{CameraConfig, LightingConfig};
use crate::resolver::LoadedModel;
use crate::scene::ModelInstance;
use crate::texture_cache::{TextureCache, TextureResource};
use crate::zone::Rgb;
use anyhow::Result;
use glam::{Vec2, Vec3};
use std::time::Instant;
use winit::dpi::PhysicalSize;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AmbientLight {
    pub color: Rgb,
    pub intensity: f32,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DirectionalLight {
    /// Unit vector pointing from the scene towards the light.
    pub direction: Vec3,
    pub color: Rgb,
    pub intensity: f32,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct HemisphereLight {
    pub sky: Rgb,
    pub ground: Rgb,
    pub intensity: f32,
}

/// Ambient fill plus a key light and a sky/ground bounce.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LightRig {
    pub background: Rgb,
    pub ambient: AmbientLight,
    pub directional: DirectionalLight,
    pub hemisphere: HemisphereLight,
}

impl LightRig {
    pub fn from_config(config: &LightingConfig) -> Self {
        let position = Vec3::from_array(config.directional_position);
        let direction = if position.length_squared() > f32::EPSILON { position.normalize() } else { Vec3::Y };
        Self {
            background: parse_color("background", &config.background, Rgb::new(0xf5, 0xf5, 0xf5)),
            ambient: AmbientLight { color: Rgb::WHITE, intensity: config.ambient_intensity },
            directional: DirectionalLight { direction, color: Rgb::WHITE, intensity: config.directional_intensity },
            hemisphere: HemisphereLight {
                sky: parse_color("hemisphere sky", &config.hemisphere_sky, Rgb::WHITE),
                ground: parse_color("hemisphere ground", &config.hemisphere_ground, Rgb::new(0x44, 0x44, 0x44)),
                intensity: config.hemisphere_intensity,
            },
        }
    }
}

impl Default for LightRig {
    fn default() -> Self {
        Self::from_config(&LightingConfig::default())
    }
}

fn parse_color(what: &str, raw: &str, fallback: Rgb) -> Rgb {
    Rgb::parse_hex(raw).unwrap_or_else(|| {
        log::warn!("invalid {what} colour '{raw}', using {fallback}");
        fallback
    })
}

/// What a renderer needs to draw one frame.
pub struct FrameScene<'a, T> {
    pub camera: &'a Camera3D,
    pub lights: &'a LightRig,
    pub model: Option<&'a ModelInstance<T>>,
    pub viewport: PhysicalSize<u32>,
}

/// Drawing backend owned by the lifecycle manager.
pub trait SceneRenderer {
    type Texture: TextureResource;

    fn resize(&mut self, viewport: PhysicalSize<u32>);
    fn render(&mut self, frame: &FrameScene<'_, Self::Texture>) -> Result<()>;
    /// Releases the presentation surface. Rendering is impossible afterwards.
    fn detach_surface(&mut self);
    fn dispose(&mut self);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameOutcome {
    Rendered,
    /// The loop is stopped or torn down.
    Idle,
    /// A frame was already in progress.
    Skipped,
}

/// Owns the renderer, camera, controls, lights and the active model, and ties
/// the frame loop to explicit start/stop calls.
pub struct SceneLifecycle<R: SceneRenderer> {
    renderer: Option<R>,
    camera: Camera3D,
    controls: Option<OrbitCamera>,
    transition: Option<CameraTransition>,
    lights: LightRig,
    viewport: PhysicalSize<u32>,
    model: Option<LoadedModel<R::Texture>>,
    running: bool,
    in_frame: bool,
}

impl<R: SceneRenderer> SceneLifecycle<R> {
    pub fn new(renderer: R, camera_config: &CameraConfig, lighting: &LightingConfig, viewport: PhysicalSize<u32>) -> Self {
        let camera = Camera3D::from_config(camera_config);
        let controls = OrbitCamera::looking_from(camera.position, camera.target);
        let mut lifecycle = Self {
            renderer: Some(renderer),
            camera,
            controls: Some(controls),
            transition: None,
            lights: LightRig::from_config(lighting),
            viewport,
            model: None,
            running: false,
            in_frame: false,
        };
        lifecycle.resize(viewport);
        lifecycle
    }

    pub fn start(&mut self) -> bool {
        if self.renderer.is_none() {
            log::warn!("cannot start a torn-down scene");
            return false;
        }
        let was_running = self.running;
        self.running = true;
        !was_running
    }

    pub fn stop(&mut self) {
        self.running = false;
    }

    pub fn is_running(&self) -> bool {
        self.running
    }

    pub fn is_torn_down(&self) -> bool {
        self.renderer.is_none()
    }

    pub fn camera(&self) -> &Camera3D {
        &self.camera
    }

    pub fn lights(&self) -> &LightRig {
        &self.lights
    }

    pub fn viewport(&self) -> PhysicalSize<u32> {
        self.viewport
    }

    pub fn renderer(&self) -> Option<&R> {
        self.renderer.as_ref()
    }

    pub fn renderer_mut(&mut self) -> Option<&mut R> {
        self.renderer.as_mut()
    }

    pub fn model(&self) -> Option<&LoadedModel<R::Texture>> {
        self.model.as_ref()
    }

    pub fn model_mut(&mut self) -> Option<&mut LoadedModel<R::Texture>> {
        self.model.as_mut()
    }

    /// Updates the viewport and hands it to the renderer. Zero-sized
    /// viewports (minimised windows) are ignored.
    pub fn resize(&mut self, viewport: PhysicalSize<u32>) {
        if viewport.width == 0 || viewport.height == 0 {
            return;
        }
        self.viewport = viewport;
        if let Some(renderer) = self.renderer.as_mut() {
            renderer.resize(viewport);
        }
    }

    /// Swaps in a new model. Only the previous model's textures are released.
    pub fn replace_model(
        &mut self,
        model: LoadedModel<R::Texture>,
        cache: &mut TextureCache<R::Texture>,
    ) -> Option<String> {
        let previous = self.dispose_model(cache);
        log::info!(
            "model '{}' active: {} meshes, {} zones",
            model.model.model_id,
            model.model.meshes.len(),
            model.surface_map.len()
        );
        self.model = Some(model);
        previous
    }

    /// Drops the active model and releases its bound textures from `cache`.
    pub fn dispose_model(&mut self, cache: &mut TextureCache<R::Texture>) -> Option<String> {
        let mut loaded = self.model.take()?;
        let keys = loaded.model.dispose();
        let released = keys.iter().filter(|key| cache.release(key)).count();
        log::debug!("disposed model '{}', released {released} textures", loaded.model.model_id);
        Some(loaded.model.model_id)
    }

    pub fn orbit(&mut self, delta: Vec2) {
        self.transition = None;
        if let Some(controls) = self.controls.as_mut() {
            controls.orbit(delta);
            controls.apply(&mut self.camera);
        }
    }

    pub fn zoom(&mut self, factor: f32) {
        self.transition = None;
        if let Some(controls) = self.controls.as_mut() {
            controls.zoom(factor);
            controls.apply(&mut self.camera);
        }
    }

    pub fn animate_camera(&mut self, transition: CameraTransition) {
        self.transition = Some(transition);
    }

    pub fn is_animating(&self) -> bool {
        self.transition.is_some()
    }

    /// Advances the camera animation and draws one frame while running.
    pub fn frame(&mut self, now: Instant) -> Result<FrameOutcome> {
        if !self.running {
            return Ok(FrameOutcome::Idle);
        }
        if self.in_frame {
            return Ok(FrameOutcome::Skipped);
        }
        self.in_frame = true;
        let result = self.render_frame(now);
        self.in_frame = false;
        result.map(|_| FrameOutcome::Rendered)
    }

    fn render_frame(&mut self, now: Instant) -> Result<()> {
        if let Some(transition) = &self.transition {
            if transition.apply(&mut self.camera, now) {
                self.transition = None;
                self.controls = Some(OrbitCamera::looking_from(self.camera.position, self.camera.target));
            }
        }
        let Some(renderer) = self.renderer.as_mut() else {
            return Ok(());
        };
        let frame = FrameScene {
            camera: &self.camera,
            lights: &self.lights,
            model: self.model.as_ref().map(|loaded| &loaded.model),
            viewport: self.viewport,
        };
        renderer.render(&frame)
    }

    /// Stops the loop, detaches the surface, releases every scene texture,
    /// drops the controls and disposes the renderer. Safe to call twice.
    pub fn teardown(&mut self, cache: &mut TextureCache<R::Texture>) {
        self.stop();
        if let Some(renderer) = self.renderer.as_mut() {
            renderer.detach_surface();
        }
        self.dispose_model(cache);
        cache.clear();
        self.transition = None;
        self.controls = None;
        if let Some(mut renderer) = self.renderer.take() {
            renderer.dispose();
            log::info!("scene torn down");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mesh::{ImportedMaterial, ImportedMesh, ImportedScene, MeshBounds, MeshSubset, MeshVertex};
    use crate::resolver::build_surface_map;
    use crate::scene::BoundTexture;
    use std::cell::RefCell;
    use std::rc::Rc;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    #[derive(Debug, Default)]
    struct Probe {
        disposed: AtomicBool,
    }

    impl TextureResource for Probe {
        fn dispose(&self) {
            self.disposed.store(true, Ordering::SeqCst);
        }
    }

    #[derive(Default)]
    struct RecordingRenderer {
        calls: Rc<RefCell<Vec<String>>>,
    }

    impl SceneRenderer for RecordingRenderer {
        type Texture = Probe;

        fn resize(&mut self, viewport: PhysicalSize<u32>) {
            self.calls.borrow_mut().push(format!("resize {}x{}", viewport.width, viewport.height));
        }

        fn render(&mut self, frame: &FrameScene<'_, Probe>) -> Result<()> {
            let meshes = frame.model.map(|model| model.meshes.len()).unwrap_or(0);
            self.calls.borrow_mut().push(format!("render {meshes}"));
            Ok(())
        }

        fn detach_surface(&mut self) {
            self.calls.borrow_mut().push("detach".into());
        }

        fn dispose(&mut self) {
            self.calls.borrow_mut().push("dispose".into());
        }
    }

    fn loaded(model_id: &str) -> LoadedModel<Probe> {
        let vertices = vec![
            MeshVertex::new(Vec3::ZERO, Vec3::Z, Vec2::ZERO),
            MeshVertex::new(Vec3::X, Vec3::Z, Vec2::X),
            MeshVertex::new(Vec3::Y, Vec3::Z, Vec2::Y),
        ];
        let bounds = MeshBounds::from_vertices(&vertices);
        let imported = ImportedScene {
            meshes: vec![ImportedMesh {
                name: "Body".into(),
                vertices,
                indices: vec![0, 1, 2],
                subsets: vec![MeshSubset { index_offset: 0, index_count: 3, material_slot: 0 }],
                material_slots: vec![Some(0)],
                bounds,
            }],
            materials: vec![ImportedMaterial { name: Some("front".into()), base_color: [1.0; 4] }],
        };
        let model = ModelInstance::from_import(model_id, imported);
        let (surface_map, zone_ids) = build_surface_map(&model, None);
        LoadedModel { model, surface_map, zone_ids, config: None }
    }

    fn bind(model: &mut LoadedModel<Probe>, cache: &mut TextureCache<Probe>, key: &str) -> Arc<Probe> {
        let texture = cache.put(key, Arc::new(Probe::default()));
        let surface = model.surface_map.get("front").cloned().expect("front surface");
        let material = model.model.material_mut(surface.mesh, surface.material).expect("material");
        material.map = Some(BoundTexture { key: key.to_string(), texture: texture.clone() });
        texture
    }

    fn lifecycle(calls: &Rc<RefCell<Vec<String>>>) -> SceneLifecycle<RecordingRenderer> {
        SceneLifecycle::new(
            RecordingRenderer { calls: calls.clone() },
            &CameraConfig::default(),
            &LightingConfig::default(),
            PhysicalSize::new(800, 600),
        )
    }

    #[test]
    fn frames_only_render_while_running() {
        let calls = Rc::new(RefCell::new(Vec::new()));
        let mut scene = lifecycle(&calls);
        let now = Instant::now();
        assert_eq!(scene.frame(now).expect("frame"), FrameOutcome::Idle);
        assert!(scene.start());
        assert!(!scene.start());
        assert_eq!(scene.frame(now).expect("frame"), FrameOutcome::Rendered);
        scene.stop();
        assert_eq!(scene.frame(now).expect("frame"), FrameOutcome::Idle);
        assert_eq!(calls.borrow().as_slice(), ["resize 800x600", "render 0"]);
    }

    #[test]
    fn resize_ignores_zero_sizes() {
        let calls = Rc::new(RefCell::new(Vec::new()));
        let mut scene = lifecycle(&calls);
        scene.resize(PhysicalSize::new(0, 300));
        scene.resize(PhysicalSize::new(1024, 512));
        assert_eq!(scene.viewport(), PhysicalSize::new(1024, 512));
        assert_eq!(calls.borrow().last().map(String::as_str), Some("resize 1024x512"));
    }

    #[test]
    fn replacing_model_releases_only_its_textures() {
        let calls = Rc::new(RefCell::new(Vec::new()));
        let mut scene = lifecycle(&calls);
        let mut cache = TextureCache::new(8);
        let unrelated = cache.put("other", Arc::new(Probe::default()));

        let mut first = loaded("shirt");
        let first_texture = bind(&mut first, &mut cache, "zone_front_1");
        scene.replace_model(first, &mut cache);
        assert_eq!(cache.len(), 2);

        let previous = scene.replace_model(loaded("hoodie"), &mut cache);
        assert_eq!(previous.as_deref(), Some("shirt"));
        assert!(first_texture.disposed.load(Ordering::SeqCst));
        assert!(!unrelated.disposed.load(Ordering::SeqCst));
        assert!(cache.contains("other"));
        assert_eq!(scene.model().map(|m| m.model.model_id.as_str()), Some("hoodie"));
    }

    #[test]
    fn teardown_runs_in_order_and_disposes_everything() {
        let calls = Rc::new(RefCell::new(Vec::new()));
        let mut scene = lifecycle(&calls);
        let mut cache = TextureCache::new(8);
        let mut model = loaded("shirt");
        let texture = bind(&mut model, &mut cache, "zone_front_1");
        scene.replace_model(model, &mut cache);
        scene.start();

        scene.teardown(&mut cache);
        assert!(scene.is_torn_down());
        assert!(!scene.is_running());
        assert!(texture.disposed.load(Ordering::SeqCst));
        assert!(cache.is_empty());
        assert_eq!(calls.borrow().as_slice(), ["resize 800x600", "detach", "dispose"]);

        scene.teardown(&mut cache);
        assert!(!scene.start());
        assert_eq!(calls.borrow().len(), 3);
    }

    #[test]
    fn finished_animation_hands_back_to_orbit_controls() {
        let calls = Rc::new(RefCell::new(Vec::new()));
        let mut scene = lifecycle(&calls);
        scene.start();
        let start = Instant::now();
        let transition =
            CameraTransition::new(scene.camera(), Vec3::new(0.0, 1.0, -4.0), Vec3::Y, start, Duration::from_millis(100));
        scene.animate_camera(transition);
        scene.frame(start + Duration::from_millis(200)).expect("frame");
        assert!(!scene.is_animating());
        assert_eq!(scene.camera().position, Vec3::new(0.0, 1.0, -4.0));

        scene.zoom(0.5);
        assert!((scene.camera().position - Vec3::new(0.0, 1.0, -2.0)).length() < 1e-4);
    }

    #[test]
    fn light_rig_normalises_key_light() {
        let rig = LightRig::default();
        assert!((rig.directional.direction.length() - 1.0).abs() < 1e-6);
        assert_eq!(rig.hemisphere.ground, Rgb::new(0x44, 0x44, 0x44));
        assert_eq!(rig.background, Rgb::new(0xf5, 0xf5, 0xf5));
        let broken = LightingConfig { background: "nope".into(), ..LightingConfig::default() };
        assert_eq!(LightRig::from_config(&broken).background, Rgb::new(0xf5, 0xf5, 0xf5));
    }
}
