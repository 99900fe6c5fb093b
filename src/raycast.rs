use crate::mesh::MeshBounds;
use crate::scene::{MaterialId, MeshId, ModelInstance};
use glam::{Vec2, Vec3};

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Ray {
    pub origin: Vec3,
    pub dir: Vec3,
}

impl Ray {
    /// Returns `None` for a degenerate direction.
    pub fn new(origin: Vec3, dir: Vec3) -> Option<Self> {
        if !origin.is_finite() || !dir.is_finite() || dir.length_squared() <= f32::EPSILON {
            return None;
        }
        Some(Self { origin, dir: dir.normalize() })
    }

    pub fn at(&self, t: f32) -> Vec3 {
        self.origin + self.dir * t
    }
}

/// Closest surface struck by a ray.
#[derive(Debug, Clone, PartialEq)]
pub struct SurfaceHit {
    pub distance: f32,
    pub point: Vec3,
    /// Interpolated texture coordinate, not clamped.
    pub uv: Vec2,
    pub mesh: MeshId,
    pub material: MaterialId,
    pub material_name: String,
}

pub fn ray_aabb_intersection(ray: &Ray, bounds: &MeshBounds) -> Option<f32> {
    let mut t_min: f32 = 0.0;
    let mut t_max: f32 = f32::INFINITY;
    for axis in 0..3 {
        let o = ray.origin[axis];
        let d = ray.dir[axis];
        let (min_axis, max_axis) = (bounds.min[axis], bounds.max[axis]);
        if d.abs() < 1e-6 {
            if o < min_axis || o > max_axis {
                return None;
            }
        } else {
            let inv_d = 1.0 / d;
            let mut t1 = (min_axis - o) * inv_d;
            let mut t2 = (max_axis - o) * inv_d;
            if t1 > t2 {
                std::mem::swap(&mut t1, &mut t2);
            }
            t_min = t_min.max(t1);
            t_max = t_max.min(t2);
            if t_min > t_max {
                return None;
            }
        }
    }
    Some(t_min)
}

/// Möller–Trumbore, double sided. Returns the distance and barycentric `(u, v)`
/// weights of the second and third vertex.
pub fn ray_triangle_intersection(ray: &Ray, a: Vec3, b: Vec3, c: Vec3) -> Option<(f32, f32, f32)> {
    const EPS: f32 = 1e-7;
    let edge1 = b - a;
    let edge2 = c - a;
    let p = ray.dir.cross(edge2);
    let det = edge1.dot(p);
    if det.abs() < EPS {
        return None;
    }
    let inv_det = 1.0 / det;
    let s = ray.origin - a;
    let u = s.dot(p) * inv_det;
    if !(0.0..=1.0).contains(&u) {
        return None;
    }
    let q = s.cross(edge1);
    let v = ray.dir.dot(q) * inv_det;
    if v < 0.0 || u + v > 1.0 {
        return None;
    }
    let t = edge2.dot(q) * inv_det;
    (t > EPS).then_some((t, u, v))
}

/// Intersects every material slot of every mesh, keeping the nearest hit.
/// `filter` limits the test to selected (mesh, material) pairs.
pub fn intersect_model<T>(
    ray: &Ray,
    model: &ModelInstance<T>,
    mut filter: impl FnMut(MeshId, MaterialId) -> bool,
) -> Option<SurfaceHit> {
    let mut best: Option<SurfaceHit> = None;
    for mesh in &model.meshes {
        let Some(entry) = ray_aabb_intersection(ray, &mesh.bounds) else {
            continue;
        };
        if best.as_ref().is_some_and(|hit| hit.distance < entry) {
            continue;
        }
        for (slot, material) in mesh.materials.iter().enumerate() {
            if !filter(mesh.id, material.id) {
                continue;
            }
            for [va, vb, vc] in mesh.triangles_for_slot(slot) {
                let a = Vec3::from_array(va.position);
                let b = Vec3::from_array(vb.position);
                let c = Vec3::from_array(vc.position);
                let Some((t, u, v)) = ray_triangle_intersection(ray, a, b, c) else {
                    continue;
                };
                if best.as_ref().is_some_and(|hit| hit.distance <= t) {
                    continue;
                }
                let w = 1.0 - u - v;
                let uv = Vec2::from_array(va.uv) * w + Vec2::from_array(vb.uv) * u + Vec2::from_array(vc.uv) * v;
                best = Some(SurfaceHit {
                    distance: t,
                    point: ray.at(t),
                    uv,
                    mesh: mesh.id,
                    material: material.id,
                    material_name: material.name.clone(),
                });
            }
        }
    }
    best
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bounds(min: Vec3, max: Vec3) -> MeshBounds {
        MeshBounds::from_points([min, max].into_iter())
    }

    #[test]
    fn aabb_hit_from_outside_and_inside() {
        let b = bounds(Vec3::splat(-1.0), Vec3::splat(1.0));
        let ray = Ray::new(Vec3::new(0.0, 0.0, 5.0), Vec3::NEG_Z).expect("ray");
        assert!((ray_aabb_intersection(&ray, &b).expect("hit") - 4.0).abs() < 1e-5);
        let inside = Ray::new(Vec3::ZERO, Vec3::X).expect("ray");
        assert_eq!(ray_aabb_intersection(&inside, &b), Some(0.0));
        let away = Ray::new(Vec3::new(0.0, 0.0, 5.0), Vec3::Z).expect("ray");
        assert_eq!(ray_aabb_intersection(&away, &b), None);
    }

    #[test]
    fn triangle_barycentrics() {
        let ray = Ray::new(Vec3::new(0.25, 0.25, 1.0), Vec3::NEG_Z).expect("ray");
        let (t, u, v) = ray_triangle_intersection(&ray, Vec3::ZERO, Vec3::X, Vec3::Y).expect("hit");
        assert!((t - 1.0).abs() < 1e-6);
        assert!((u - 0.25).abs() < 1e-6 && (v - 0.25).abs() < 1e-6);
        let miss = Ray::new(Vec3::new(0.9, 0.9, 1.0), Vec3::NEG_Z).expect("ray");
        assert!(ray_triangle_intersection(&miss, Vec3::ZERO, Vec3::X, Vec3::Y).is_none());
    }

    #[test]
    fn degenerate_ray_is_rejected() {
        assert!(Ray::new(Vec3::ZERO, Vec3::ZERO).is_none());
        assert!(Ray::new(Vec3::splat(f32::NAN), Vec3::X).is_none());
    }
}
