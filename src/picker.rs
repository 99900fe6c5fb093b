use crate::camera3d::{Camera3D, CameraTransition};
use crate::config::CameraConfig;
use crate::raycast::{intersect_model, Ray, SurfaceHit};
use crate::resolver::{LoadedModel, SurfaceMap};
use crate::zone::PercentPos;
use glam::{Vec2, Vec3};
use std::collections::HashSet;
use std::sync::mpsc::Sender;
use std::time::Instant;
use winit::dpi::PhysicalSize;

/// Messages from the picker to whoever owns the zone configuration.
#[derive(Debug, Clone, PartialEq)]
pub enum PickerEvent {
    Place { zone_id: String, position: PercentPos },
    Select { zone_id: String, position: PercentPos },
}

impl PickerEvent {
    pub fn zone_id(&self) -> &str {
        match self {
            PickerEvent::Place { zone_id, .. } | PickerEvent::Select { zone_id, .. } => zone_id,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClickKind {
    Place,
    Select,
}

#[derive(Debug, Default)]
enum PickerState {
    #[default]
    Disabled,
    Enabled(Sender<PickerEvent>),
}

#[derive(Debug, Clone, PartialEq)]
pub struct PickResult {
    pub zone_id: String,
    /// UV clamped into the unit square.
    pub uv: Vec2,
    pub position: PercentPos,
    pub hit: SurfaceHit,
}

/// Click-to-UV placement tool. Starts disabled.
#[derive(Debug, Default)]
pub struct UvPicker {
    state: PickerState,
}

impl UvPicker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn enable(&mut self, events: Sender<PickerEvent>) {
        self.state = PickerState::Enabled(events);
    }

    pub fn disable(&mut self) {
        self.state = PickerState::Disabled;
    }

    pub fn is_enabled(&self) -> bool {
        matches!(self.state, PickerState::Enabled(_))
    }

    /// Picks at a pixel position and emits an event. Does nothing while disabled.
    pub fn handle_click<T>(
        &mut self,
        kind: ClickKind,
        screen: Vec2,
        viewport: PhysicalSize<u32>,
        camera: &Camera3D,
        target: &LoadedModel<T>,
    ) -> Option<PickResult> {
        let PickerState::Enabled(events) = &self.state else {
            return None;
        };
        let (origin, dir) = camera.screen_ray(screen, viewport)?;
        let ray = Ray::new(origin, dir)?;
        let picked = pick(&ray, target)?;
        let event = match kind {
            ClickKind::Place => PickerEvent::Place { zone_id: picked.zone_id.clone(), position: picked.position },
            ClickKind::Select => PickerEvent::Select { zone_id: picked.zone_id.clone(), position: picked.position },
        };
        if events.send(event).is_err() {
            log::warn!("picker event receiver dropped; disabling picker");
            self.disable();
        }
        Some(picked)
    }
}

/// Casts `ray` against the meshes that carry a resolved zone and converts the
/// nearest hit into a zone id and a top-down percentage position.
pub fn pick<T>(ray: &Ray, target: &LoadedModel<T>) -> Option<PickResult> {
    let meshes: HashSet<_> = target.surface_map.values().map(|surface| surface.mesh).collect();
    if meshes.is_empty() {
        log::debug!("no resolved surfaces to pick against");
        return None;
    }
    let hit = intersect_model(ray, &target.model, |mesh, _| meshes.contains(&mesh))?;
    let Some(zone_id) = resolve_zone(&target.surface_map, &hit) else {
        log::warn!("clicked material '{}' does not belong to any zone", hit.material_name);
        return None;
    };
    let uv = clamp_uv(hit.uv);
    let position = uv_to_percent(uv);
    log::debug!("picked zone '{zone_id}' at ({:.2}, {:.2})", position.x, position.y);
    Some(PickResult { zone_id, uv, position, hit })
}

/// Exact mesh and material identity first, then the material name.
pub fn resolve_zone(surface_map: &SurfaceMap, hit: &SurfaceHit) -> Option<String> {
    surface_map
        .iter()
        .find(|(_, surface)| surface.mesh == hit.mesh && surface.material == hit.material)
        .or_else(|| surface_map.iter().find(|(_, surface)| surface.material_name == hit.material_name))
        .map(|(zone_id, _)| zone_id.clone())
}

/// Clamps both components into `[0, 1]`, logging when a value moved.
pub fn clamp_uv(uv: Vec2) -> Vec2 {
    let fix = |v: f32| if v.is_finite() { v.clamp(0.0, 1.0) } else { 0.5 };
    let clamped = Vec2::new(fix(uv.x), fix(uv.y));
    if clamped != uv {
        log::warn!("uv ({}, {}) out of range, clamped to ({}, {})", uv.x, uv.y, clamped.x, clamped.y);
    }
    clamped
}

/// UV rows run bottom-up; percentages run top-down.
pub fn uv_to_percent(uv: Vec2) -> PercentPos {
    PercentPos::new(uv.x * 100.0, (1.0 - uv.y) * 100.0)
}

/// Camera position that frames a zone centred at `center`.
pub fn focus_vantage(zone_id: &str, center: Vec3, distance: f32) -> Vec3 {
    match zone_id {
        "back" => Vec3::new(0.0, center.y, -distance),
        "sleeve_left" => Vec3::new(-distance, center.y, 0.0),
        "sleeve_right" => Vec3::new(distance, center.y, 0.0),
        _ => Vec3::new(0.0, center.y, distance),
    }
}

/// Animation that frames the surface of `zone_id`, or `None` when the zone is unresolved.
pub fn focus_on_part<T>(
    zone_id: &str,
    target: &LoadedModel<T>,
    camera: &Camera3D,
    config: &CameraConfig,
    now: Instant,
) -> Option<CameraTransition> {
    let Some(surface) = target.surface_map.get(zone_id) else {
        log::warn!("cannot focus '{zone_id}': no surface for this zone");
        return None;
    };
    let mesh = target.model.mesh(surface.mesh)?;
    let bounds = mesh.slot_bounds(surface.material_index).unwrap_or_else(|| mesh.bounds.clone());
    let size = bounds.size();
    let distance = size.x.max(size.y).max(size.z) * config.focus_distance_factor;
    let position = focus_vantage(zone_id, bounds.center, distance);
    Some(CameraTransition::new(camera, position, bounds.center, now, config.focus_duration()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::zone::clamp_percent;

    #[test]
    fn uv_percent_flips_vertical_axis() {
        assert_eq!(uv_to_percent(Vec2::new(0.25, 0.75)), PercentPos::new(25.0, 25.0));
        assert_eq!(uv_to_percent(Vec2::new(1.0, 0.0)), PercentPos::new(100.0, 100.0));
    }

    #[test]
    fn uv_clamp_keeps_in_range_values() {
        assert_eq!(clamp_uv(Vec2::new(0.3, 0.6)), Vec2::new(0.3, 0.6));
        assert_eq!(clamp_uv(Vec2::new(-0.2, 1.7)), Vec2::new(0.0, 1.0));
        assert_eq!(clamp_uv(Vec2::new(f32::NAN, 0.1)), Vec2::new(0.5, 0.1));
    }

    #[test]
    fn clamped_percent_is_nearest_bound() {
        for value in [-250.0, -0.01, 100.01, 1e9] {
            let clamped = clamp_percent(value);
            assert!((0.0..=100.0).contains(&clamped));
            assert_eq!(clamped, if value < 0.0 { 0.0 } else { 100.0 });
        }
    }

    #[test]
    fn vantage_depends_on_zone_name() {
        let c = Vec3::new(1.0, 2.0, 3.0);
        assert_eq!(focus_vantage("back", c, 4.0), Vec3::new(0.0, 2.0, -4.0));
        assert_eq!(focus_vantage("front", c, 4.0), Vec3::new(0.0, 2.0, 4.0));
        assert_eq!(focus_vantage("sleeve_left", c, 4.0), Vec3::new(-4.0, 2.0, 0.0));
        assert_eq!(focus_vantage("sleeve_right", c, 4.0), Vec3::new(4.0, 2.0, 0.0));
        assert_eq!(focus_vantage("collar", c, 4.0), Vec3::new(0.0, 2.0, 4.0));
    }

    #[test]
    fn disabled_picker_ignores_clicks() {
        let mut picker = UvPicker::new();
        assert!(!picker.is_enabled());
        let (tx, _rx) = std::sync::mpsc::channel();
        picker.enable(tx);
        assert!(picker.is_enabled());
        picker.disable();
        assert!(!picker.is_enabled());
    }
}
