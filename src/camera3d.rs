use crate::config::CameraConfig;
use glam::{Mat4, Quat, Vec2, Vec3, Vec4};
use std::time::{Duration, Instant};
use winit::dpi::PhysicalSize;

const DEFAULT_UP: Vec3 = Vec3::Y;

/// Perspective camera looking at a target point.
#[derive(Debug, Clone)]
pub struct Camera3D {
    pub position: Vec3,
    pub target: Vec3,
    pub up: Vec3,
    pub fov_y_radians: f32,
    pub near: f32,
    pub far: f32,
}

impl Camera3D {
    pub fn new(position: Vec3, target: Vec3, fov_y_radians: f32, near: f32, far: f32) -> Self {
        Self { position, target, up: DEFAULT_UP, fov_y_radians, near, far }
    }

    pub fn from_config(config: &CameraConfig) -> Self {
        Self::new(
            Vec3::from_array(config.position),
            Vec3::from_array(config.target),
            config.fov_degrees.to_radians(),
            config.near,
            config.far,
        )
    }

    pub fn view_matrix(&self) -> Mat4 {
        Mat4::look_at_rh(self.position, self.target, self.up)
    }

    pub fn projection_matrix(&self, aspect: f32) -> Mat4 {
        Mat4::perspective_rh(self.fov_y_radians, aspect.max(0.0001), self.near, self.far)
    }

    pub fn view_projection(&self, viewport: PhysicalSize<u32>) -> Mat4 {
        self.projection_matrix(aspect_ratio(viewport)) * self.view_matrix()
    }

    /// World-space ray from the camera through a pixel position.
    pub fn screen_ray(&self, screen: Vec2, viewport: PhysicalSize<u32>) -> Option<(Vec3, Vec3)> {
        let ndc = screen_to_ndc(screen, viewport)?;
        self.ndc_ray(ndc, aspect_ratio(viewport))
    }

    /// World-space ray through a normalized device coordinate in `[-1, 1]`.
    pub fn ndc_ray(&self, ndc: Vec2, aspect: f32) -> Option<(Vec3, Vec3)> {
        let inv_view_proj = (self.projection_matrix(aspect) * self.view_matrix()).inverse();
        let far = inv_view_proj * Vec4::new(ndc.x, ndc.y, 1.0, 1.0);
        if far.w.abs() < f32::EPSILON {
            return None;
        }
        let dir = (far.truncate() / far.w) - self.position;
        if !dir.is_finite() || dir.length_squared() <= f32::EPSILON {
            return None;
        }
        Some((self.position, dir.normalize()))
    }

    pub fn project_point(&self, point: Vec3, viewport: PhysicalSize<u32>) -> Option<Vec2> {
        if viewport.width == 0 || viewport.height == 0 {
            return None;
        }
        let clip = self.view_projection(viewport) * point.extend(1.0);
        if clip.w.abs() < f32::EPSILON {
            return None;
        }
        let ndc = clip.truncate() / clip.w;
        let x = (ndc.x + 1.0) * 0.5 * viewport.width as f32;
        let y = (1.0 - ndc.y) * 0.5 * viewport.height as f32;
        Some(Vec2::new(x, y))
    }
}

pub fn aspect_ratio(viewport: PhysicalSize<u32>) -> f32 {
    if viewport.height > 0 {
        viewport.width as f32 / viewport.height as f32
    } else {
        1.0
    }
}

/// Pixel position to normalized device coordinates, y up.
pub fn screen_to_ndc(screen: Vec2, viewport: PhysicalSize<u32>) -> Option<Vec2> {
    if viewport.width == 0 || viewport.height == 0 {
        return None;
    }
    Some(Vec2::new((2.0 * screen.x / viewport.width as f32) - 1.0, 1.0 - (2.0 * screen.y / viewport.height as f32)))
}

/// Orbit controls: yaw/pitch around a target.
#[derive(Debug, Clone)]
pub struct OrbitCamera {
    pub target: Vec3,
    pub radius: f32,
    pub yaw_radians: f32,
    pub pitch_radians: f32,
}

impl OrbitCamera {
    pub fn new(target: Vec3, radius: f32) -> Self {
        Self { target, radius: radius.max(0.01), yaw_radians: 0.0, pitch_radians: 0.0 }
    }

    /// Controls that reproduce a camera placed at `position` looking at `target`.
    pub fn looking_from(position: Vec3, target: Vec3) -> Self {
        let offset = position - target;
        let radius = offset.length().max(0.01);
        let yaw_radians = offset.x.atan2(offset.z);
        let pitch_radians = (-offset.y / radius).clamp(-1.0, 1.0).asin();
        let mut orbit = Self { target, radius, yaw_radians, pitch_radians: 0.0 };
        orbit.orbit(Vec2::new(0.0, pitch_radians));
        orbit
    }

    pub fn position(&self) -> Vec3 {
        let rotation = Quat::from_euler(glam::EulerRot::YXZ, self.yaw_radians, self.pitch_radians, 0.0);
        self.target + rotation * Vec3::new(0.0, 0.0, self.radius)
    }

    pub fn to_camera(&self, fov_y_radians: f32, near: f32, far: f32) -> Camera3D {
        Camera3D::new(self.position(), self.target, fov_y_radians, near, far)
    }

    /// Moves `camera` onto this orbit, keeping its lens.
    pub fn apply(&self, camera: &mut Camera3D) {
        camera.position = self.position();
        camera.target = self.target;
    }

    pub fn orbit(&mut self, delta: Vec2) {
        self.yaw_radians += delta.x;
        self.pitch_radians = (self.pitch_radians + delta.y)
            .clamp(-std::f32::consts::FRAC_PI_2 + 0.01, std::f32::consts::FRAC_PI_2 - 0.01);
    }

    pub fn zoom(&mut self, factor: f32) {
        self.radius = (self.radius * factor).clamp(0.1, 10_000.0);
    }
}

/// Quadratic ease-in-out over `[0, 1]`.
pub fn ease_in_out(progress: f32) -> f32 {
    let p = progress.clamp(0.0, 1.0);
    if p < 0.5 {
        2.0 * p * p
    } else {
        1.0 - (-2.0 * p + 2.0).powi(2) / 2.0
    }
}

/// Timed move of camera position and look-at target.
#[derive(Debug, Clone)]
pub struct CameraTransition {
    from_position: Vec3,
    from_target: Vec3,
    pub to_position: Vec3,
    pub to_target: Vec3,
    started: Instant,
    duration: Duration,
}

impl CameraTransition {
    pub fn new(camera: &Camera3D, to_position: Vec3, to_target: Vec3, started: Instant, duration: Duration) -> Self {
        Self {
            from_position: camera.position,
            from_target: camera.target,
            to_position,
            to_target,
            started,
            duration,
        }
    }

    pub fn progress(&self, now: Instant) -> f32 {
        if self.duration.is_zero() {
            return 1.0;
        }
        (now.saturating_duration_since(self.started).as_secs_f32() / self.duration.as_secs_f32()).min(1.0)
    }

    /// Position and target at `now`.
    pub fn sample(&self, now: Instant) -> (Vec3, Vec3) {
        let t = ease_in_out(self.progress(now));
        (self.from_position.lerp(self.to_position, t), self.from_target.lerp(self.to_target, t))
    }

    /// Moves `camera` along the transition. Returns true once finished.
    pub fn apply(&self, camera: &mut Camera3D, now: Instant) -> bool {
        let (position, target) = self.sample(now);
        camera.position = position;
        camera.target = target;
        self.progress(now) >= 1.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn camera3d_view_projection_is_finite() {
        let camera = Camera3D::from_config(&CameraConfig::default());
        let vp = camera.view_projection(PhysicalSize::new(1280, 720));
        assert!(!vp.to_cols_array().iter().any(|v| v.is_nan() || v.is_infinite()));
    }

    #[test]
    fn centre_ray_points_at_target() {
        let camera = Camera3D::new(Vec3::new(0.0, 0.0, 5.0), Vec3::ZERO, 60f32.to_radians(), 0.1, 100.0);
        let (origin, dir) = camera.screen_ray(Vec2::new(400.0, 300.0), PhysicalSize::new(800, 600)).expect("ray");
        assert_eq!(origin, camera.position);
        assert!((dir - Vec3::NEG_Z).length() < 1e-4);
        let projected = camera.project_point(Vec3::ZERO, PhysicalSize::new(800, 600)).expect("projected");
        assert!((projected - Vec2::new(400.0, 300.0)).length() < 1e-3);
    }

    #[test]
    fn orbit_round_trips_through_position() {
        let mut orbit = OrbitCamera::new(Vec3::Y, 4.0);
        orbit.orbit(Vec2::new(0.7, -0.3));
        let rebuilt = OrbitCamera::looking_from(orbit.position(), Vec3::Y);
        assert!((rebuilt.position() - orbit.position()).length() < 1e-4);
    }

    #[test]
    fn ease_in_out_is_symmetric() {
        assert_eq!(ease_in_out(0.0), 0.0);
        assert_eq!(ease_in_out(0.5), 0.5);
        assert_eq!(ease_in_out(1.0), 1.0);
        assert!((ease_in_out(0.25) + ease_in_out(0.75) - 1.0).abs() < 1e-6);
        assert_eq!(ease_in_out(0.25), 0.125);
    }

    #[test]
    fn transition_reaches_destination() {
        let start = Instant::now();
        let mut camera = Camera3D::new(Vec3::new(0.0, 0.0, 3.0), Vec3::ZERO, 1.0, 0.1, 10.0);
        let transition =
            CameraTransition::new(&camera, Vec3::new(0.0, 1.0, -5.0), Vec3::Y, start, Duration::from_millis(1000));
        assert!(!transition.apply(&mut camera, start + Duration::from_millis(500)));
        assert!((camera.position - Vec3::new(0.0, 0.5, -1.0)).length() < 1e-5);
        assert!(transition.apply(&mut camera, start + Duration::from_millis(1500)));
        assert_eq!(camera.position, Vec3::new(0.0, 1.0, -5.0));
        assert_eq!(camera.target, Vec3::Y);
    }
}
