//! Per-frame timing input, counters and the context handed to behaviours

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::sim::entity::{Entity, EntityId};
use crate::sim::store::{ExhaustionPolicy, Store, StoreError};

/// Longest step the realtime clock reports (10 fps floor)
pub const MAX_DT: f32 = 0.1;
/// Shortest step the realtime clock reports
pub const MIN_DT: f32 = 0.000_001;

/// Timing of one frame: number, milliseconds since start, step in seconds
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct FrameContext {
    pub frame_num: u64,
    pub ms: u64,
    pub dt: f32,
}

impl FrameContext {
    /// Stamp used for the per-frame update/render dedup
    #[inline]
    pub fn tick(&self) -> u32 {
        self.frame_num as u32
    }
}

/// Source of frame timing when the caller does not supply its own
#[derive(Debug, Clone)]
pub enum FrameClock {
    /// Same step every frame, simulated time only
    Fixed { dt: f32, frame_num: u64, elapsed: f64 },
    /// Wall clock, step clamped to `[MIN_DT, MAX_DT]`
    Realtime {
        start: Instant,
        last: Instant,
        frame_num: u64,
    },
}

impl FrameClock {
    pub fn fixed(dt: f32) -> Self {
        FrameClock::Fixed {
            dt,
            frame_num: 0,
            elapsed: 0.0,
        }
    }

    pub fn realtime() -> Self {
        let now = Instant::now();
        FrameClock::Realtime {
            start: now,
            last: now,
            frame_num: 0,
        }
    }

    /// Advance one frame. Frame numbers start at 1.
    pub fn next_frame(&mut self) -> FrameContext {
        match self {
            FrameClock::Fixed {
                dt,
                frame_num,
                elapsed,
            } => {
                *frame_num += 1;
                let frame = FrameContext {
                    frame_num: *frame_num,
                    ms: (*elapsed * 1000.0) as u64,
                    dt: *dt,
                };
                *elapsed += f64::from(*dt);
                frame
            }
            FrameClock::Realtime {
                start,
                last,
                frame_num,
            } => {
                let now = Instant::now();
                let dt = clamp_dt(now.duration_since(*last).as_secs_f32());
                *last = now;
                *frame_num += 1;
                FrameContext {
                    frame_num: *frame_num,
                    ms: now.duration_since(*start).as_millis() as u64,
                    dt,
                }
            }
        }
    }
}

#[inline]
pub fn clamp_dt(dt: f32) -> f32 {
    if dt > MAX_DT {
        MAX_DT
    } else if dt <= 0.0 || dt.is_nan() {
        MIN_DT
    } else {
        dt.max(MIN_DT)
    }
}

/// Counters filled by the cells during one frame
#[derive(Debug, Default)]
pub struct FrameCounters {
    updated: AtomicU64,
    candidates: AtomicU64,
    collisions: AtomicU64,
    dispatched: AtomicU64,
    impulses: AtomicU64,
    rendered: AtomicU64,
}

/// Plain copy of [`FrameCounters`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FrameStats {
    pub updated: u64,
    pub candidates: u64,
    pub collisions: u64,
    pub dispatched: u64,
    pub impulses: u64,
    pub rendered: u64,
}

impl FrameCounters {
    #[inline]
    pub fn add_updated(&self, n: u64) {
        self.updated.fetch_add(n, Ordering::Relaxed);
    }

    #[inline]
    pub fn add_candidates(&self, n: u64) {
        self.candidates.fetch_add(n, Ordering::Relaxed);
    }

    #[inline]
    pub fn add_collisions(&self, n: u64) {
        self.collisions.fetch_add(n, Ordering::Relaxed);
    }

    #[inline]
    pub fn add_dispatched(&self, n: u64) {
        self.dispatched.fetch_add(n, Ordering::Relaxed);
    }

    #[inline]
    pub fn add_impulses(&self, n: u64) {
        self.impulses.fetch_add(n, Ordering::Relaxed);
    }

    #[inline]
    pub fn add_rendered(&self, n: u64) {
        self.rendered.fetch_add(n, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> FrameStats {
        FrameStats {
            updated: self.updated.load(Ordering::Relaxed),
            candidates: self.candidates.load(Ordering::Relaxed),
            collisions: self.collisions.load(Ordering::Relaxed),
            dispatched: self.dispatched.load(Ordering::Relaxed),
            impulses: self.impulses.load(Ordering::Relaxed),
            rendered: self.rendered.load(Ordering::Relaxed),
        }
    }

    pub fn reset(&self) {
        self.updated.store(0, Ordering::Relaxed);
        self.candidates.store(0, Ordering::Relaxed);
        self.collisions.store(0, Ordering::Relaxed);
        self.dispatched.store(0, Ordering::Relaxed);
        self.impulses.store(0, Ordering::Relaxed);
        self.rendered.store(0, Ordering::Relaxed);
    }
}

/// Everything a cell pass and the behaviours it calls can reach.
///
/// Shared by reference across grid workers. Store failures raised inside
/// callbacks cannot be returned through them, so the first one is parked
/// here and surfaced by the grid once the pass ends.
pub struct SimContext<'a> {
    frame: FrameContext,
    store: &'a Store<Entity>,
    counters: &'a FrameCounters,
    policy: ExhaustionPolicy,
    fault: Mutex<Option<StoreError>>,
}

impl<'a> SimContext<'a> {
    pub fn new(
        frame: FrameContext,
        store: &'a Store<Entity>,
        counters: &'a FrameCounters,
        policy: ExhaustionPolicy,
    ) -> Self {
        Self {
            frame,
            store,
            counters,
            policy,
            fault: Mutex::new(None),
        }
    }

    #[inline]
    pub fn frame(&self) -> &FrameContext {
        &self.frame
    }

    #[inline]
    pub fn dt(&self) -> f32 {
        self.frame.dt
    }

    #[inline]
    pub fn counters(&self) -> &FrameCounters {
        self.counters
    }

    #[inline]
    pub(crate) fn store(&self) -> &Store<Entity> {
        self.store
    }

    /// Create an entity mid-frame. It joins the grid at the next sync.
    ///
    /// `None` when the store is full. Under [`ExhaustionPolicy::Fail`] the
    /// exhaustion is also recorded and fails the current pass.
    pub fn spawn(&self, entity: Entity) -> Option<EntityId> {
        match self.policy {
            ExhaustionPolicy::ReturnNone => self.store.try_allocate_with(|id| entity.with_id(id)),
            ExhaustionPolicy::Fail => match self.store.allocate_with(|id| entity.with_id(id)) {
                Ok(id) => Some(id),
                Err(err) => {
                    self.record_fault(err);
                    None
                }
            },
        }
    }

    /// Queue `id` for destruction, recording store check failures
    pub(crate) fn release(&self, id: EntityId) {
        if let Err(err) = self.store.release(id) {
            self.record_fault(err);
        }
    }

    pub(crate) fn record_fault(&self, err: StoreError) {
        let mut fault = self.fault.lock();
        if fault.is_none() {
            tracing::debug!(frame = self.frame.frame_num, error = %err, "store fault during pass");
            *fault = Some(err);
        }
    }

    pub fn take_fault(&self) -> Option<StoreError> {
        self.fault.lock().take()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fixed_clock_counts_from_one() {
        let mut clock = FrameClock::fixed(0.25);
        let first = clock.next_frame();
        let second = clock.next_frame();
        let third = clock.next_frame();

        assert_eq!(first.frame_num, 1);
        assert_eq!(first.ms, 0);
        assert_eq!(second.ms, 250);
        assert_eq!(third.frame_num, 3);
        assert_eq!(third.ms, 500);
        assert_eq!(third.dt, 0.25);
    }

    #[test]
    fn test_realtime_clock_dt_is_clamped() {
        let mut clock = FrameClock::realtime();
        let frame = clock.next_frame();
        assert!(frame.dt >= MIN_DT && frame.dt <= MAX_DT);
        assert_eq!(frame.frame_num, 1);
    }

    #[test]
    fn test_clamp_dt() {
        assert_eq!(clamp_dt(1.0), MAX_DT);
        assert_eq!(clamp_dt(0.0), MIN_DT);
        assert_eq!(clamp_dt(f32::NAN), MIN_DT);
        assert_eq!(clamp_dt(0.016), 0.016);
    }

    #[test]
    fn test_counters_snapshot_and_reset() {
        let counters = FrameCounters::default();
        counters.add_candidates(3);
        counters.add_impulses(1);
        counters.add_impulses(1);

        let stats = counters.snapshot();
        assert_eq!(stats.candidates, 3);
        assert_eq!(stats.impulses, 2);
        assert_eq!(stats.dispatched, 0);

        counters.reset();
        assert_eq!(counters.snapshot(), FrameStats::default());
    }

    #[test]
    fn test_spawn_on_full_store() {
        use crate::sim::entity::{Body, Inert};
        use crate::sim::store::StoreChecks;

        let store = Store::new("test", 1, StoreChecks::ALL);
        let counters = FrameCounters::default();
        let frame = FrameContext { frame_num: 1, ms: 0, dt: 0.1 };
        let spawn = |ctx: &SimContext<'_>| ctx.spawn(Entity::new(Body::new("body"), Inert));

        let strict = SimContext::new(frame, &store, &counters, ExhaustionPolicy::Fail);
        let id = spawn(&strict).unwrap();
        assert_eq!(store.lock(id).unwrap().id(), id);
        assert!(strict.take_fault().is_none());

        assert_eq!(spawn(&strict), None);
        assert!(matches!(strict.take_fault(), Some(StoreError::Exhausted { capacity: 1, .. })));
        assert!(strict.take_fault().is_none());

        let lenient = SimContext::new(frame, &store, &counters, ExhaustionPolicy::ReturnNone);
        assert_eq!(spawn(&lenient), None);
        assert!(lenient.take_fault().is_none());
    }
}
