//! Transform helpers shared by the entity transform memo and the plane cache
//!
//! Every world transform in the kernel is composed the same way:
//! translate · rotate(XYZ Euler) · scale. Knowing that shape lets the plane
//! cache build normal matrices without a generic inverse.

use glam::{EulerRot, Mat3, Mat4, Vec3};

/// Rotation for Euler angles applied in X, Y, Z order
#[inline]
pub fn rotation(angle: Vec3) -> Mat3 {
    Mat3::from_euler(EulerRot::XYZ, angle.x, angle.y, angle.z)
}

/// Model -> world matrix: `T * R * S`
pub fn world_transform(position: Vec3, angle: Vec3, scale: Vec3) -> Mat4 {
    Mat4::from_translation(position)
        * Mat4::from_euler(EulerRot::XYZ, angle.x, angle.y, angle.z)
        * Mat4::from_scale(scale)
}

#[inline]
pub fn is_uniform_scale(scale: Vec3) -> bool {
    scale.x == scale.y && scale.y == scale.z
}

/// Matrix that carries model-space plane normals into world space.
///
/// The general answer is `transpose(inverse(mat3(M)))`. For `M = T * R * S`
/// that reduces to `R` when the scale is uniform (normals only need
/// renormalizing) and to `R * S^-1` otherwise. Resulting normals are not
/// unit length when scaled.
pub fn normal_matrix(angle: Vec3, scale: Vec3) -> Mat3 {
    let r = rotation(angle);
    if is_uniform_scale(scale) {
        r
    } else {
        r * Mat3::from_diagonal(scale.recip())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::f32::consts::FRAC_PI_2;

    fn approx(a: Vec3, b: Vec3) -> bool {
        (a - b).length() < 1e-5
    }

    #[test]
    fn test_world_transform_order() {
        // scale first, then rotate, then translate
        let m = world_transform(
            Vec3::new(10.0, 0.0, 0.0),
            Vec3::new(0.0, 0.0, FRAC_PI_2),
            Vec3::new(2.0, 1.0, 1.0),
        );
        let p = m.transform_point3(Vec3::X);
        // (1,0,0) -> scaled (2,0,0) -> rotated 90deg about z (0,2,0) -> +10 x
        assert!(approx(p, Vec3::new(10.0, 2.0, 0.0)), "got {p:?}");
    }

    #[test]
    fn test_identity_transform() {
        let m = world_transform(Vec3::ZERO, Vec3::ZERO, Vec3::ONE);
        assert_eq!(m, Mat4::IDENTITY);
    }

    #[test]
    fn test_uniform_normal_matrix_is_rotation() {
        let angle = Vec3::new(0.3, -1.1, 0.7);
        assert_eq!(normal_matrix(angle, Vec3::splat(3.0)), rotation(angle));
    }

    #[test]
    fn test_non_uniform_normal_stays_perpendicular() {
        let scale = Vec3::new(2.0, 1.0, 0.5);
        let angle = Vec3::new(0.2, 0.4, -0.3);
        let m = world_transform(Vec3::ZERO, angle, scale);

        let normal = Vec3::new(1.0, 1.0, 0.0).normalize();
        let tangent = Vec3::new(1.0, -1.0, 0.0);

        let world_tangent = m.transform_vector3(tangent);
        let world_normal = normal_matrix(angle, scale) * normal;

        assert!(world_tangent.dot(world_normal).abs() < 1e-5);
    }
}
