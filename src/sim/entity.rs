//! Simulation entities: physical body plus collaborator-supplied behaviour

use std::sync::Arc;

use glam::{Mat4, Vec3};
use smallvec::SmallVec;

use crate::sim::frame::SimContext;
use crate::sim::grid::CellSpan;
use crate::sim::planes::{Hull, PlaneCache};
use crate::sim::render::{DrawCommand, RenderList};
use crate::sim::store::Handle;
use crate::util::math;

/// Handle of an entity in the simulation store
pub type EntityId = Handle;

/// Stamp value meaning "not yet this frame"
const NEVER: u32 = u32::MAX;

/// Cached `T * R * S` and the inputs it was built from
#[derive(Debug, Clone)]
struct TransformMemo {
    position: Vec3,
    angle: Vec3,
    scale: Vec3,
    matrix: Mat4,
    valid: bool,
}

impl Default for TransformMemo {
    fn default() -> Self {
        Self {
            position: Vec3::ZERO,
            angle: Vec3::ZERO,
            scale: Vec3::ONE,
            matrix: Mat4::IDENTITY,
            valid: false,
        }
    }
}

/// Physical state of an entity
#[derive(Debug, Clone)]
pub struct Body {
    // === HOT FIELDS (broad phase and integration, every frame) ===
    pub position: Vec3,
    pub bounding_radius: f32,
    /// What this entity is
    pub collision_bits: u32,
    /// What this entity reacts to
    pub collision_mask: u32,
    pub linear_velocity: Vec3,
    pub acceleration: Vec3,
    /// Euler angles, radians, applied X then Y then Z
    pub angle: Vec3,
    pub angular_velocity: Vec3,
    pub scale: Vec3,

    // === WARM FIELDS (collision handling) ===
    pub mass: f32,
    pub is_sphere: bool,
    pub is_static: bool,
    pub(crate) is_dead: bool,
    pub(crate) overlaps_cells: bool,
    pub(crate) updated_at_tick: u32,
    pub(crate) rendered_at_tick: u32,
    /// Entities in contact with this one during the current frame
    pub(crate) contacts: SmallVec<[EntityId; 8]>,
    /// Contacts of the previous frame. A pair found in both is not dispatched again.
    pub(crate) previous_contacts: SmallVec<[EntityId; 8]>,

    // === COLD FIELDS ===
    id: EntityId,
    pub name: String,
    model: u32,
    hull: Option<Arc<Hull>>,
    planes: PlaneCache,
    transform: TransformMemo,
    pub(crate) cell_span: Option<CellSpan>,
}

impl Default for Body {
    fn default() -> Self {
        Self {
            position: Vec3::ZERO,
            bounding_radius: 0.0,
            collision_bits: 0,
            collision_mask: 0,
            linear_velocity: Vec3::ZERO,
            acceleration: Vec3::ZERO,
            angle: Vec3::ZERO,
            angular_velocity: Vec3::ZERO,
            scale: Vec3::ONE,

            mass: 0.0,
            is_sphere: false,
            is_static: false,
            is_dead: false,
            overlaps_cells: false,
            updated_at_tick: NEVER,
            rendered_at_tick: NEVER,
            contacts: SmallVec::new(),
            previous_contacts: SmallVec::new(),

            id: Handle::new(u32::MAX, 0),
            name: String::new(),
            model: 0,
            hull: None,
            planes: PlaneCache::default(),
            transform: TransformMemo::default(),
            cell_span: None,
        }
    }
}

impl Body {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    pub fn with_position(mut self, position: Vec3) -> Self {
        self.position = position;
        self
    }

    pub fn with_velocity(mut self, velocity: Vec3) -> Self {
        self.linear_velocity = velocity;
        self
    }

    pub fn with_angular_velocity(mut self, angular_velocity: Vec3) -> Self {
        self.angular_velocity = angular_velocity;
        self
    }

    pub fn with_angle(mut self, angle: Vec3) -> Self {
        self.angle = angle;
        self
    }

    pub fn with_radius(mut self, radius: f32) -> Self {
        self.bounding_radius = radius;
        self
    }

    pub fn with_collision(mut self, bits: u32, mask: u32) -> Self {
        self.collision_bits = bits;
        self.collision_mask = mask;
        self
    }

    pub fn with_mass(mut self, mass: f32) -> Self {
        self.mass = mass;
        self
    }

    pub fn with_model(mut self, model: u32) -> Self {
        self.set_model(model);
        self
    }

    /// Sphere collision shape, bounding radius is the sphere radius
    pub fn as_sphere(mut self) -> Self {
        self.is_sphere = true;
        self
    }

    pub fn as_static(mut self) -> Self {
        self.is_static = true;
        self
    }

    /// Convex hull collision shape. Sets the bounding radius from the hull.
    pub fn with_hull(mut self, hull: Arc<Hull>) -> Self {
        self.set_hull(hull);
        self
    }

    /// Also rescales the bounding radius of hull bodies
    pub fn with_scale(mut self, scale: Vec3) -> Self {
        self.scale = scale;
        if let Some(hull) = &self.hull {
            self.bounding_radius = hull.bounding_radius() * scale.max_element();
        }
        self
    }

    #[inline]
    pub fn id(&self) -> EntityId {
        self.id
    }

    #[inline]
    pub fn model(&self) -> u32 {
        self.model
    }

    /// Switch model. Plane cache is rebuilt on next use.
    pub fn set_model(&mut self, model: u32) {
        self.model = model;
        self.planes.invalidate();
    }

    pub fn set_hull(&mut self, hull: Arc<Hull>) {
        self.bounding_radius = hull.bounding_radius() * self.scale.max_element();
        self.is_sphere = false;
        self.hull = Some(hull);
        self.planes.invalidate();
    }

    #[inline]
    pub fn hull(&self) -> Option<&Arc<Hull>> {
        self.hull.as_ref()
    }

    #[inline]
    pub fn is_dead(&self) -> bool {
        self.is_dead
    }

    /// True when inserted into more than one cell this frame
    #[inline]
    pub fn overlaps_cells(&self) -> bool {
        self.overlaps_cells
    }

    /// Default motion: `v += a*dt`, `p += v*dt`, `angle += w*dt`
    pub fn integrate(&mut self, dt: f32) {
        self.linear_velocity += self.acceleration * dt;
        self.position += self.linear_velocity * dt;
        self.angle += self.angular_velocity * dt;
    }

    /// Model -> world matrix, rebuilt only when position, angle or scale
    /// changed since the last call
    pub fn world_transform(&mut self) -> Mat4 {
        let memo = &mut self.transform;
        if !memo.valid
            || memo.position != self.position
            || memo.angle != self.angle
            || memo.scale != self.scale
        {
            memo.matrix = math::world_transform(self.position, self.angle, self.scale);
            memo.position = self.position;
            memo.angle = self.angle;
            memo.scale = self.scale;
            memo.valid = true;
        }
        memo.matrix
    }

    /// Narrow phase treats bodies without a hull as spheres
    #[inline]
    pub fn collides_as_sphere(&self) -> bool {
        self.is_sphere || self.hull.is_none()
    }

    /// World-space planes of the hull, refreshed for the current transform.
    /// `None` for sphere bodies.
    pub fn hull_planes(&mut self) -> Option<&PlaneCache> {
        if self.collides_as_sphere() {
            return None;
        }
        let transform = self.world_transform();
        let hull = self.hull.as_deref()?;
        self.planes
            .update_model_to_world(hull, &transform, self.position, self.angle, self.scale);
        Some(&self.planes)
    }

    /// True when in contact with `other` during the current frame
    #[inline]
    pub fn is_touching(&self, other: EntityId) -> bool {
        self.contacts.contains(&other)
    }

    /// True when in contact with `other` during the previous frame
    #[inline]
    pub fn was_touching(&self, other: EntityId) -> bool {
        self.previous_contacts.contains(&other)
    }

    /// Start a new frame: the current contacts become the previous ones
    pub(crate) fn roll_contacts(&mut self) {
        std::mem::swap(&mut self.contacts, &mut self.previous_contacts);
        self.contacts.clear();
    }
}

/// Copy of the other party's state handed to `on_collision`
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CollisionPeer {
    pub id: EntityId,
    pub position: Vec3,
    pub linear_velocity: Vec3,
    pub bounding_radius: f32,
    pub collision_bits: u32,
    pub mass: f32,
    pub is_sphere: bool,
    pub model: u32,
}

impl CollisionPeer {
    pub fn of(body: &Body) -> Self {
        Self {
            id: body.id,
            position: body.position,
            linear_velocity: body.linear_velocity,
            bounding_radius: body.bounding_radius,
            collision_bits: body.collision_bits,
            mass: body.mass,
            is_sphere: body.collides_as_sphere(),
            model: body.model,
        }
    }
}

/// Per-kind rules supplied by the game.
///
/// Callbacks run with the entity's slot locked and may run on grid worker
/// threads. They may spawn through `ctx` but never reach other entities
/// directly.
pub trait Behavior: Send {
    /// Advance one frame. Returning false kills the entity.
    fn update(&mut self, body: &mut Body, ctx: &SimContext<'_>) -> bool {
        body.integrate(ctx.dt());
        true
    }

    fn render(&mut self, body: &mut Body, out: &mut RenderList) {
        out.push(DrawCommand {
            id: body.id(),
            model: body.model(),
            transform: body.world_transform(),
        });
    }

    /// Notified of a confirmed collision. Returning false kills the entity.
    fn on_collision(&mut self, _body: &mut Body, _other: &CollisionPeer, _ctx: &SimContext<'_>) -> bool {
        true
    }
}

/// Behaviour with every default: integrate, draw, survive
#[derive(Debug, Clone, Copy, Default)]
pub struct Inert;

impl Behavior for Inert {}

/// Body plus behaviour, stored in one slot
pub struct Entity {
    pub body: Body,
    behavior: Box<dyn Behavior>,
}

impl Entity {
    pub fn new(body: Body, behavior: impl Behavior + 'static) -> Self {
        Self {
            body,
            behavior: Box::new(behavior),
        }
    }

    #[inline]
    pub fn id(&self) -> EntityId {
        self.body.id
    }

    pub(crate) fn with_id(mut self, id: EntityId) -> Self {
        self.body.id = id;
        self
    }

    pub(crate) fn update(&mut self, ctx: &SimContext<'_>) -> bool {
        self.behavior.update(&mut self.body, ctx)
    }

    pub(crate) fn render(&mut self, out: &mut RenderList) {
        self.behavior.render(&mut self.body, out);
    }

    pub(crate) fn on_collision(&mut self, other: &CollisionPeer, ctx: &SimContext<'_>) -> bool {
        self.behavior.on_collision(&mut self.body, other, ctx)
    }
}

impl std::fmt::Debug for Entity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Entity").field("body", &self.body).finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_integrate() {
        let mut body = Body::new("body")
            .with_velocity(Vec3::new(1.0, 0.0, 0.0))
            .with_angular_velocity(Vec3::new(0.0, 2.0, 0.0));
        body.acceleration = Vec3::new(0.0, 0.0, 4.0);

        body.integrate(0.5);

        assert_eq!(body.linear_velocity, Vec3::new(1.0, 0.0, 2.0));
        assert_eq!(body.position, Vec3::new(0.5, 0.0, 1.0));
        assert_eq!(body.angle, Vec3::new(0.0, 1.0, 0.0));
    }

    #[test]
    fn test_world_transform_memo() {
        let mut body = Body::new("body")
            .with_position(Vec3::new(1.0, 2.0, 3.0))
            .with_angle(Vec3::new(0.1, 0.2, 0.3));

        let first = body.world_transform();
        let second = body.world_transform();
        assert_eq!(first.to_cols_array(), second.to_cols_array());

        body.position.x += 1.0;
        let moved = body.world_transform();
        assert_ne!(first, moved);
        assert_eq!(moved, math::world_transform(body.position, body.angle, body.scale));

        body.angle.z = 1.0;
        assert_eq!(body.world_transform(), math::world_transform(body.position, body.angle, body.scale));

        body.scale = Vec3::splat(2.0);
        assert_eq!(body.world_transform(), math::world_transform(body.position, body.angle, body.scale));
    }

    #[test]
    fn test_hull_sets_shape() {
        let body = Body::new("crate")
            .as_sphere()
            .with_hull(Hull::cuboid(Vec3::new(3.0, 0.0, 4.0)))
            .with_scale(Vec3::splat(2.0));

        assert!(!body.is_sphere);
        assert!(!body.collides_as_sphere());
        assert_eq!(body.bounding_radius, 10.0);
    }

    #[test]
    fn test_hull_planes_only_for_polytopes() {
        let mut ball = Body::new("ball").as_sphere().with_radius(1.0);
        assert!(ball.hull_planes().is_none());

        let mut plain = Body::new("plain").with_radius(1.0);
        assert!(plain.collides_as_sphere());
        assert!(plain.hull_planes().is_none());

        let mut cube = Body::new("cube")
            .with_hull(Hull::cuboid(Vec3::ONE))
            .with_position(Vec3::new(5.0, 0.0, 0.0));
        let planes = cube.hull_planes().unwrap();
        assert!(planes.is_point_in_volume(glam::Vec4::new(5.0, 0.0, 0.0, 1.0)));

        // model change invalidates
        cube.set_model(3);
        cube.position.x = -5.0;
        let planes = cube.hull_planes().unwrap();
        assert!(!planes.is_invalidated());
        assert!(planes.is_point_in_volume(glam::Vec4::new(-5.0, 0.0, 0.0, 1.0)));
    }

    #[test]
    fn test_contacts_roll_over_one_frame() {
        let mut body = Body::new("a");
        let other = Handle::new(4, 0);
        body.contacts.push(other);
        assert!(body.is_touching(other));
        assert!(!body.is_touching(Handle::new(4, 1)));
        assert!(!body.was_touching(other));

        body.roll_contacts();
        assert!(!body.is_touching(other));
        assert!(body.was_touching(other));

        // a frame without contact forgets it
        body.roll_contacts();
        assert!(!body.was_touching(other));
    }

    #[test]
    fn test_default_render_uses_transform() {
        let mut entity = Entity::new(
            Body::new("a").with_position(Vec3::new(0.0, 1.0, 0.0)).with_model(7),
            Inert,
        )
        .with_id(Handle::new(2, 5));
        let mut list = RenderList::default();
        entity.render(&mut list);

        assert_eq!(list.len(), 1);
        let cmd = list.commands()[0];
        assert_eq!(cmd.id, Handle::new(2, 5));
        assert_eq!(cmd.model, 7);
        assert_eq!(cmd.transform, Mat4::from_translation(Vec3::new(0.0, 1.0, 0.0)));
    }
}
