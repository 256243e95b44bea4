//! One grid bucket: per-bucket update/render and the collision pipeline
//!
//! A frame runs `update`, then `resolve_collisions`, which is three ordered
//! phases over the bucket's entries:
//! 1. broad phase: bounding spheres of masked pairs
//! 2. narrow phase: sphere/sphere, sphere/hull or hull/hull
//! 3. dispatch: `on_collision` callbacks and sphere impulses
//!
//! The broad phase reads positions as they are after the update pass, not
//! as they were at insertion.
//!
//! Entities that overlap several cells are seen by each of them, possibly
//! from different threads. Their per-frame stamps keep them updated and
//! rendered once. Each body also keeps the set of entities it touched this
//! frame and last frame, so a pair is notified once per contact: not again
//! from a second cell, and not again while the contact lasts.

use std::cell::RefCell;

use glam::Vec3;

use crate::sim::entity::{Body, CollisionPeer, Entity, EntityId};
use crate::sim::frame::{FrameCounters, SimContext};
use crate::sim::physics;
use crate::sim::render::RenderList;
use crate::sim::store::Store;

// Thread-local reusable buffers for the broad phase
thread_local! {
    static SCRATCH: RefCell<Scratch> = RefCell::new(Scratch::with_capacity(256));
}

/// Copy of the fields the broad phase reads. Taken at insertion and
/// refreshed from the body before each broad phase.
#[derive(Debug, Clone, Copy)]
pub(crate) struct Entry {
    pub(crate) position: Vec3,
    pub(crate) radius: f32,
    pub(crate) collision_bits: u32,
    pub(crate) collision_mask: u32,
    pub(crate) is_sphere: bool,
    pub(crate) id: EntityId,
}

impl Entry {
    pub(crate) fn of(body: &Body) -> Self {
        Self {
            position: body.position,
            radius: body.bounding_radius,
            collision_bits: body.collision_bits,
            collision_mask: body.collision_mask,
            is_sphere: body.collides_as_sphere(),
            id: body.id(),
        }
    }
}

/// Pair whose bounding spheres intersect
#[derive(Debug, Clone, Copy)]
pub(crate) struct Candidate {
    pub(crate) first: EntityId,
    pub(crate) second: EntityId,
    pub(crate) first_is_sphere: bool,
    pub(crate) second_is_sphere: bool,
    /// first's mask matches second's bits
    pub(crate) notify_first: bool,
    /// second's mask matches first's bits
    pub(crate) notify_second: bool,
    pub(crate) is_collision: bool,
}

/// Per-thread buffers reused across cells and frames
#[derive(Debug, Default)]
pub(crate) struct Scratch {
    statics: Vec<Entry>,
    mobile: Vec<Entry>,
    pub(crate) candidates: Vec<Candidate>,
}

impl Scratch {
    fn with_capacity(capacity: usize) -> Self {
        Self {
            statics: Vec::with_capacity(capacity),
            mobile: Vec::with_capacity(capacity),
            candidates: Vec::with_capacity(capacity),
        }
    }
}

/// Where a confirmed pair stands against the contacts already recorded
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Contact {
    /// First frame of this contact
    New,
    /// Also in contact last frame
    Persisting,
    /// Already recorded this frame from another cell
    Duplicate,
}

#[inline]
fn bounding_spheres_overlap(a: &Entry, b: &Entry) -> bool {
    let d = a.radius + b.radius;
    (b.position - a.position).length_squared() < d * d
}

fn push_if_candidate(a: &Entry, b: &Entry, out: &mut Vec<Candidate>) {
    let notify_first = a.collision_mask & b.collision_bits != 0;
    let notify_second = b.collision_mask & a.collision_bits != 0;
    if (notify_first || notify_second) && bounding_spheres_overlap(a, b) {
        out.push(Candidate {
            first: a.id,
            second: b.id,
            first_is_sphere: a.is_sphere,
            second_is_sphere: b.is_sphere,
            notify_first,
            notify_second,
            is_collision: false,
        });
    }
}

#[derive(Debug, Default)]
pub struct Cell {
    mobile: Vec<Entry>,
    statics: Vec<Entry>,
}

impl Cell {
    pub(crate) fn add(&mut self, body: &Body) {
        self.mobile.push(Entry::of(body));
    }

    pub(crate) fn add_static(&mut self, body: &Body) {
        self.statics.push(Entry::of(body));
    }

    /// Swap-remove a static entry. Returns false when not present.
    pub(crate) fn remove_static(&mut self, id: EntityId) -> bool {
        swap_remove_entry(&mut self.statics, id)
    }

    /// Swap-remove a mobile entry. Returns false when not present.
    pub(crate) fn remove(&mut self, id: EntityId) -> bool {
        swap_remove_entry(&mut self.mobile, id)
    }

    pub(crate) fn clear_mobile(&mut self) {
        self.mobile.clear();
    }

    #[inline]
    pub fn mobile_count(&self) -> usize {
        self.mobile.len()
    }

    #[inline]
    pub fn static_count(&self) -> usize {
        self.statics.len()
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.mobile.len() + self.statics.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.mobile.is_empty() && self.statics.is_empty()
    }

    /// Ids of every entry, mobile first
    pub fn ids(&self) -> impl Iterator<Item = EntityId> + '_ {
        self.mobile.iter().chain(&self.statics).map(|e| e.id)
    }

    pub fn contains(&self, id: EntityId) -> bool {
        self.ids().any(|e| e == id)
    }

    /// Advance every entity in the bucket once for this frame
    pub(crate) fn update(&self, ctx: &SimContext<'_>) {
        let updated = update_entries(&self.mobile, ctx) + update_entries(&self.statics, ctx);
        ctx.counters().add_updated(updated);
    }

    pub(crate) fn resolve_collisions(&self, ctx: &SimContext<'_>) {
        // take the buffers out so a nested pass on this thread gets its own
        let mut scratch = SCRATCH.with(|buffer| std::mem::take(&mut *buffer.borrow_mut()));

        self.make_candidates(ctx.store(), &mut scratch);
        ctx.counters().add_candidates(scratch.candidates.len() as u64);
        classify_candidates(&mut scratch.candidates, ctx);
        handle_candidates(&scratch.candidates, ctx);

        scratch.candidates.clear();
        SCRATCH.with(|buffer| *buffer.borrow_mut() = scratch);
    }

    /// Broad phase: static x mobile, then mobile x mobile with `i < j`.
    ///
    /// Reads current positions and radii. Dead entities take no part.
    pub(crate) fn make_candidates(&self, store: &Store<Entity>, scratch: &mut Scratch) {
        let Scratch {
            statics,
            mobile,
            candidates,
        } = scratch;
        refresh_entries(&self.statics, store, statics);
        refresh_entries(&self.mobile, store, mobile);
        candidates.clear();

        for s in statics.iter() {
            for m in mobile.iter() {
                push_if_candidate(s, m, candidates);
            }
        }

        for (i, a) in mobile.iter().enumerate() {
            for b in &mobile[i + 1..] {
                push_if_candidate(a, b, candidates);
            }
        }
    }

    /// Single threaded
    pub(crate) fn render(
        &self,
        store: &Store<Entity>,
        tick: u32,
        out: &mut RenderList,
        counters: &FrameCounters,
    ) {
        let mut rendered = 0;
        for e in self.mobile.iter().chain(&self.statics) {
            let Some(mut entity) = store.lock(e.id) else {
                continue;
            };
            if entity.body.is_dead {
                continue;
            }
            if entity.body.overlaps_cells {
                if entity.body.rendered_at_tick == tick {
                    continue;
                }
                entity.body.rendered_at_tick = tick;
            }
            entity.render(out);
            rendered += 1;
        }
        counters.add_rendered(rendered);
    }
}

fn swap_remove_entry(entries: &mut Vec<Entry>, id: EntityId) -> bool {
    match entries.iter().position(|e| e.id == id) {
        Some(index) => {
            entries.swap_remove(index);
            true
        }
        None => false,
    }
}

fn refresh_entries(entries: &[Entry], store: &Store<Entity>, out: &mut Vec<Entry>) {
    out.clear();
    out.extend(entries.iter().filter_map(|e| {
        let entity = store.lock(e.id)?;
        if entity.body.is_dead {
            return None;
        }
        Some(Entry::of(&entity.body))
    }));
}

fn update_entries(entries: &[Entry], ctx: &SimContext<'_>) -> u64 {
    let tick = ctx.frame().tick();
    let mut updated = 0;

    for e in entries {
        let Some(mut entity) = ctx.store().lock(e.id) else {
            continue;
        };
        if entity.body.is_dead {
            continue;
        }
        if entity.body.overlaps_cells {
            // already advanced from another cell this frame
            if entity.body.updated_at_tick == tick {
                continue;
            }
            entity.body.updated_at_tick = tick;
        }

        updated += 1;
        if !entity.update(ctx) {
            entity.body.is_dead = true;
            drop(entity);
            ctx.release(e.id);
            continue;
        }
        entity.body.roll_contacts();
    }

    updated
}

/// Narrow phase
pub(crate) fn classify_candidates(candidates: &mut [Candidate], ctx: &SimContext<'_>) {
    for c in candidates.iter_mut() {
        if c.first_is_sphere && c.second_is_sphere {
            c.is_collision = true;
            continue;
        }

        let Some((mut a, mut b)) = ctx.store().lock_pair(c.first, c.second) else {
            continue;
        };

        c.is_collision = match (c.first_is_sphere, c.second_is_sphere) {
            (true, _) => {
                let (center, radius) = (a.body.position, a.body.bounding_radius);
                b.body
                    .hull_planes()
                    .is_some_and(|planes| planes.collides_with_sphere(center, radius))
            }
            (_, true) => {
                let (center, radius) = (b.body.position, b.body.bounding_radius);
                a.body
                    .hull_planes()
                    .is_some_and(|planes| planes.collides_with_sphere(center, radius))
            }
            _ => match (a.body.hull_planes(), b.body.hull_planes()) {
                (Some(pa), Some(pb)) => crate::sim::planes::PlaneCache::collides(pa, pb),
                _ => false,
            },
        };
    }
}

/// Dispatch confirmed collisions
pub(crate) fn handle_candidates(candidates: &[Candidate], ctx: &SimContext<'_>) {
    let mut collisions = 0;
    let mut impulses = 0;

    for c in candidates.iter().filter(|c| c.is_collision) {
        collisions += 1;

        if record_contact(ctx, c.first, c.second) != Some(Contact::New) {
            continue;
        }

        if c.notify_first {
            dispatch_collision(ctx, c.first, c.second);
        }
        if c.notify_second {
            dispatch_collision(ctx, c.second, c.first);
        }

        // hulls: notify only, the game resolves the response
        if c.first_is_sphere && c.second_is_sphere && apply_impulse(ctx, c.first, c.second) {
            impulses += 1;
        }
    }

    ctx.counters().add_collisions(collisions);
    ctx.counters().add_impulses(impulses);
}

/// Record the contact on both bodies. Both are locked together so two cells
/// racing on the same pair see it recorded exactly once.
fn record_contact(ctx: &SimContext<'_>, first: EntityId, second: EntityId) -> Option<Contact> {
    let (mut a, mut b) = ctx.store().lock_pair(first, second)?;
    if a.body.is_touching(second) {
        return Some(Contact::Duplicate);
    }
    a.body.contacts.push(second);
    b.body.contacts.push(first);

    if a.body.was_touching(second) || b.body.was_touching(first) {
        Some(Contact::Persisting)
    } else {
        Some(Contact::New)
    }
}

/// Notify `receiver` of `other` unless the receiver is already dead
fn dispatch_collision(ctx: &SimContext<'_>, receiver: EntityId, other: EntityId) {
    let Some(peer) = ctx.store().lock(other).map(|e| CollisionPeer::of(&e.body)) else {
        return;
    };

    let Some(mut entity) = ctx.store().lock(receiver) else {
        return;
    };
    if entity.body.is_dead {
        return;
    }

    ctx.counters().add_dispatched(1);
    if !entity.on_collision(&peer, ctx) {
        entity.body.is_dead = true;
        drop(entity);
        ctx.release(receiver);
    }
}

fn apply_impulse(ctx: &SimContext<'_>, first: EntityId, second: EntityId) -> bool {
    match ctx.store().lock_pair(first, second) {
        Some((mut a, mut b)) => physics::apply_elastic_impulse(&mut a.body, &mut b.body),
        None => false,
    }
}
