//! Collision response and diagnostics for sphere bodies

use glam::Vec3;

use crate::sim::entity::Body;

/// Perfectly elastic
pub const RESTITUTION: f32 = 1.0;

/// Apply an impulse along the line of centres to two colliding spheres.
///
/// Momentum is conserved and the bodies are weighted by mass. Nothing is
/// applied when the spheres are already separating, when the relative
/// velocity is NaN (coincident centres) or when the total mass is not
/// positive. Returns true when velocities changed.
pub fn apply_elastic_impulse(b1: &mut Body, b2: &mut Body) -> bool {
    let normal = (b2.position - b1.position).normalize();
    let relative_velocity = (b2.linear_velocity - b1.linear_velocity).dot(normal);

    if relative_velocity >= 0.0 || relative_velocity.is_nan() {
        return false;
    }

    let total_mass = b1.mass + b2.mass;
    if total_mass <= 0.0 || total_mass.is_nan() {
        return false;
    }

    let impulse = (1.0 + RESTITUTION) * relative_velocity / total_mass;
    b1.linear_velocity += impulse * b2.mass * normal;
    b2.linear_velocity -= impulse * b1.mass * normal;
    true
}

/// Calculate kinetic energy for a body
pub fn kinetic_energy(mass: f32, velocity: Vec3) -> f32 {
    0.5 * mass * velocity.length_squared()
}

/// Calculate momentum for a body
pub fn momentum(mass: f32, velocity: Vec3) -> Vec3 {
    velocity * mass
}
