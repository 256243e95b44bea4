//! Convex hulls and their world-space plane cache
//!
//! A hull is described in model space by points and outward normals. The
//! first `normals.len()` points lie on the plane of the matching normal; any
//! further points only take part in the point-in-volume tests.

use std::sync::Arc;

use glam::{Mat4, Vec3, Vec4};

use crate::util::math;

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum HullError {
    #[error("hull has no planes")]
    Empty,
    #[error("hull has {normals} planes but only {points} points")]
    MissingPlanePoints { normals: usize, points: usize },
}

/// Model-space convex hull, shared between entities of the same model
#[derive(Debug, Clone, PartialEq)]
pub struct Hull {
    points: Vec<Vec3>,
    normals: Vec<Vec3>,
    bounding_radius: f32,
}

impl Hull {
    pub fn new(points: Vec<Vec3>, normals: Vec<Vec3>) -> Result<Self, HullError> {
        if normals.is_empty() {
            return Err(HullError::Empty);
        }
        if points.len() < normals.len() {
            return Err(HullError::MissingPlanePoints {
                normals: normals.len(),
                points: points.len(),
            });
        }
        let bounding_radius = points.iter().map(|p| p.length()).fold(0.0, f32::max);
        Ok(Self {
            points,
            normals,
            bounding_radius,
        })
    }

    /// Axis aligned box centred on the origin
    pub fn cuboid(half_extents: Vec3) -> Arc<Self> {
        let h = half_extents;
        let normals = vec![Vec3::X, -Vec3::X, Vec3::Y, -Vec3::Y, Vec3::Z, -Vec3::Z];
        let mut points: Vec<Vec3> = normals.iter().map(|n| *n * h).collect();
        for &x in &[-h.x, h.x] {
            for &y in &[-h.y, h.y] {
                for &z in &[-h.z, h.z] {
                    points.push(Vec3::new(x, y, z));
                }
            }
        }
        let bounding_radius = h.length();
        Arc::new(Self {
            points,
            normals,
            bounding_radius,
        })
    }

    #[inline]
    pub fn points(&self) -> &[Vec3] {
        &self.points
    }

    #[inline]
    pub fn normals(&self) -> &[Vec3] {
        &self.normals
    }

    /// Radius of the model-space sphere enclosing every point
    #[inline]
    pub fn bounding_radius(&self) -> f32 {
        self.bounding_radius
    }
}

/// World-space points and planes of one entity's hull.
///
/// Planes are stored as `(a, b, c, d)` with `a*x + b*y + c*z + d = 0`.
/// Normals are not unit length when the entity is scaled.
#[derive(Debug, Clone)]
pub struct PlaneCache {
    world_points: Vec<Vec4>,
    world_planes: Vec<Vec4>,
    position: Vec3,
    angle: Vec3,
    scale: Vec3,
    invalidated: bool,
}

impl Default for PlaneCache {
    fn default() -> Self {
        Self {
            world_points: Vec::new(),
            world_planes: Vec::new(),
            position: Vec3::ZERO,
            angle: Vec3::ZERO,
            scale: Vec3::ONE,
            invalidated: true,
        }
    }
}

impl PlaneCache {
    /// Force a full rebuild on the next update (model changed)
    #[inline]
    pub fn invalidate(&mut self) {
        self.invalidated = true;
    }

    #[inline]
    pub fn is_invalidated(&self) -> bool {
        self.invalidated
    }

    /// Bring the cache in line with `transform`, which must have been built
    /// from `position`, `angle` and `scale`.
    ///
    /// Nothing happens when all three match the cached state. A position-only
    /// change re-transforms the points and recomputes each plane's `d`; the
    /// normals are rebuilt only when invalidated or angle/scale changed.
    pub fn update_model_to_world(
        &mut self,
        hull: &Hull,
        transform: &Mat4,
        position: Vec3,
        angle: Vec3,
        scale: Vec3,
    ) {
        let angle_scale_changed = self.angle != angle || self.scale != scale;
        if !self.invalidated && self.position == position && !angle_scale_changed {
            return;
        }

        self.world_points.clear();
        self.world_points
            .extend(hull.points().iter().map(|p| *transform * p.extend(1.0)));

        if self.invalidated || angle_scale_changed {
            let n = math::normal_matrix(angle, scale);
            self.world_planes.clear();
            self.world_planes
                .extend(hull.normals().iter().map(|normal| (n * *normal).extend(0.0)));
            self.angle = angle;
            self.scale = scale;
        }

        for (plane, point) in self.world_planes.iter_mut().zip(&self.world_points) {
            plane.w = -plane.truncate().dot(point.truncate());
        }

        self.position = position;
        self.invalidated = false;
    }

    #[inline]
    pub fn world_points(&self) -> &[Vec4] {
        &self.world_points
    }

    #[inline]
    pub fn world_planes(&self) -> &[Vec4] {
        &self.world_planes
    }

    /// Point on or behind every plane
    pub fn is_point_in_volume(&self, point: Vec4) -> bool {
        self.world_planes.iter().all(|plane| plane.dot(point) <= 0.0)
    }

    /// Any of this cache's points inside the volume of `other`
    pub fn is_any_point_in_volume(&self, other: &PlaneCache) -> bool {
        self.world_points.iter().any(|p| other.is_point_in_volume(*p))
    }

    /// Sphere centre within `radius` of every plane.
    ///
    /// Works when the sphere is small relative to the volume. Reports a hit
    /// near convex corners where the sphere is within every plane's slab but
    /// outside the volume.
    pub fn collides_with_sphere(&self, center: Vec3, radius: f32) -> bool {
        let point = center.extend(1.0);
        self.world_planes
            .iter()
            .all(|plane| plane.dot(point) <= radius * plane.truncate().length())
    }

    /// Any point of either hull inside the other
    pub fn collides(a: &PlaneCache, b: &PlaneCache) -> bool {
        a.is_any_point_in_volume(b) || b.is_any_point_in_volume(a)
    }
}
