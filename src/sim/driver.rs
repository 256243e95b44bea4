//! Frame driver
//!
//! Per frame, in order:
//! 1. sync changes made between frames, clear mobile grid entries and
//!    re-insert every live mobile entity
//! 2. update every cell
//! 3. resolve collisions (optional)
//! 4. compact released entities, sync static grid membership
//! 5. application hook, then sync again
//! 6. build the draw list
//!
//! In overlapped mode the draw list of frame N is presented on the calling
//! thread while a scoped update thread runs frame N+1.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use tracing::{debug, info, trace};

use crate::config::SimConfig;
use crate::metrics::Metrics;
use crate::sim::entity::{Entity, EntityId};
use crate::sim::error::SimError;
use crate::sim::frame::{FrameClock, FrameContext, FrameCounters, FrameStats, SimContext};
use crate::sim::grid::Grid;
use crate::sim::handoff::{FrameHandoff, ShutdownGuard};
use crate::sim::render::{RenderList, Renderer};
use crate::sim::store::{ExhaustionPolicy, Store, StoreError};

/// Entity store plus the grid indexing it
pub struct World {
    store: Store<Entity>,
    grid: Grid,
    policy: ExhaustionPolicy,
}

impl World {
    pub fn new(config: &SimConfig) -> Self {
        Self {
            store: Store::new("objects", config.object_capacity, config.store_checks),
            grid: Grid::new(
                config.grid_rows,
                config.grid_columns,
                config.grid_cell_size,
                config.threaded_grid,
            ),
            policy: config.exhaustion,
        }
    }

    /// Add an entity. It joins the grid at the next frame (mobile) or the
    /// next sync (static).
    ///
    /// `Ok(None)` only under [`ExhaustionPolicy::ReturnNone`] with a full store.
    pub fn spawn(&self, entity: Entity) -> Result<Option<EntityId>, StoreError> {
        match self.policy {
            ExhaustionPolicy::Fail => self.store.allocate_with(|id| entity.with_id(id)).map(Some),
            ExhaustionPolicy::ReturnNone => Ok(self.store.try_allocate_with(|id| entity.with_id(id))),
        }
    }

    /// Mark an entity dead and queue it for destruction.
    /// Returns false when it is already dead or gone.
    pub fn release(&self, id: EntityId) -> Result<bool, StoreError> {
        {
            let Some(mut entity) = self.store.lock(id) else {
                return Ok(false);
            };
            if entity.body.is_dead {
                return Ok(false);
            }
            entity.body.is_dead = true;
        }
        self.store.release(id)?;
        Ok(true)
    }

    /// Run `f` on a live entity
    pub fn with_entity<R>(&self, id: EntityId, f: impl FnOnce(&mut Entity) -> R) -> Option<R> {
        self.store.lock(id).map(|mut entity| f(&mut entity))
    }

    pub fn entity_mut(&mut self, id: EntityId) -> Option<&mut Entity> {
        self.store.get_mut(id)
    }

    pub fn is_live(&self, id: EntityId) -> bool {
        self.store.is_live(id)
    }

    pub fn live_count(&self) -> usize {
        self.store.live_count()
    }

    pub fn for_each(&mut self, f: impl FnMut(EntityId, &mut Entity)) {
        self.store.for_each_mut(f);
    }

    #[inline]
    pub fn grid(&self) -> &Grid {
        &self.grid
    }

    #[inline]
    pub fn store(&self) -> &Store<Entity> {
        &self.store
    }

    /// Rebuild the mobile half of the grid from the live entities
    pub(crate) fn populate_grid(&mut self) {
        let Self { store, grid, .. } = self;
        grid.clear_mobile();
        store.for_each_mut(|_, entity| {
            if !entity.body.is_static && !entity.body.is_dead {
                grid.add(&mut entity.body);
            }
        });
    }

    /// Destroy released entities, pulling them out of the grid first, then
    /// insert newly allocated statics. Returns `(destroyed, statics added)`.
    pub(crate) fn sync_grid(&mut self) -> (usize, usize) {
        let Self { store, grid, .. } = self;

        let destroyed = store.compact(|_, entity| {
            if entity.body.is_static {
                grid.remove_static(&mut entity.body);
            } else {
                grid.remove(&mut entity.body);
            }
        });

        let mut added = 0;
        store.drain_allocated(|_, entity| {
            if entity.body.is_static && !entity.body.is_dead {
                grid.add_static(&mut entity.body);
                added += 1;
            }
        });

        (destroyed, added)
    }
}

/// Game code driving the simulation
pub trait Application: Send {
    /// Create the initial scene
    fn init(&mut self, _world: &mut World) -> Result<(), SimError> {
        Ok(())
    }

    /// Called on the update thread after collisions are resolved and before
    /// the frame is rendered
    fn on_update_done(&mut self, _world: &mut World, _frame: &FrameContext) -> Result<(), SimError> {
        Ok(())
    }
}

impl Application for () {}

/// Sleeps out the rest of a frame when a target rate is set
#[derive(Debug, Clone, Copy)]
struct FramePacer {
    frame_time: Option<Duration>,
}

impl FramePacer {
    fn new(target_fps: Option<u32>) -> Self {
        Self {
            frame_time: target_fps
                .filter(|fps| *fps > 0)
                .map(|fps| Duration::from_secs_f64(1.0 / f64::from(fps))),
        }
    }

    fn wait(&self, started: Instant) {
        if let Some(frame_time) = self.frame_time {
            let elapsed = started.elapsed();
            if elapsed < frame_time {
                std::thread::sleep(frame_time - elapsed);
            }
        }
    }
}

fn present(renderer: &mut impl Renderer, list: &RenderList, metrics: &Metrics) {
    let started = Instant::now();
    renderer.present(list);
    metrics.record_render_pass(started.elapsed(), list.len() as u64);
}

pub struct Simulation<A: Application> {
    config: SimConfig,
    world: World,
    app: A,
    clock: FrameClock,
    counters: FrameCounters,
    metrics: Arc<Metrics>,
    frame: FrameContext,
    render_list: RenderList,
}

impl<A: Application> Simulation<A> {
    /// Validate `config`, build the world and let `app` populate it
    pub fn new(config: SimConfig, mut app: A) -> Result<Self, SimError> {
        config.validate()?;

        let mut world = World::new(&config);
        app.init(&mut world)?;
        let (_, statics) = world.sync_grid();

        let clock = match config.fixed_dt {
            Some(dt) => FrameClock::fixed(dt),
            None => FrameClock::realtime(),
        };

        debug!(
            rows = config.grid_rows,
            columns = config.grid_columns,
            cell_size = config.grid_cell_size,
            capacity = config.object_capacity,
            threaded_grid = config.threaded_grid,
            threaded_update = config.threaded_update,
            entities = world.live_count(),
            statics,
            "simulation initialised"
        );

        let metrics = Arc::new(Metrics::new(Duration::from_millis(config.metrics_interval_ms)));
        let render_list = RenderList::with_capacity(config.object_capacity);

        Ok(Self {
            config,
            world,
            app,
            clock,
            counters: FrameCounters::default(),
            metrics,
            frame: FrameContext::default(),
            render_list,
        })
    }

    #[inline]
    pub fn config(&self) -> &SimConfig {
        &self.config
    }

    #[inline]
    pub fn world(&self) -> &World {
        &self.world
    }

    #[inline]
    pub fn world_mut(&mut self) -> &mut World {
        &mut self.world
    }

    #[inline]
    pub fn app(&self) -> &A {
        &self.app
    }

    #[inline]
    pub fn app_mut(&mut self) -> &mut A {
        &mut self.app
    }

    #[inline]
    pub fn metrics(&self) -> &Arc<Metrics> {
        &self.metrics
    }

    /// Timing of the last simulated frame
    #[inline]
    pub fn frame(&self) -> &FrameContext {
        &self.frame
    }

    /// Draw list of the last simulated frame
    #[inline]
    pub fn render_list(&self) -> &RenderList {
        &self.render_list
    }

    /// Simulate one frame with timing from the configured clock
    pub fn step(&mut self) -> Result<FrameStats, SimError> {
        let frame = self.clock.next_frame();
        self.step_with(frame)
    }

    /// Simulate one frame with externally supplied timing (remote
    /// authoritative clock). Frame numbers must change every frame.
    pub fn step_with(&mut self, frame: FrameContext) -> Result<FrameStats, SimError> {
        let started = Instant::now();

        self.begin_frame(frame);
        self.advance()?;
        self.metrics.record_update_pass(started.elapsed());

        self.build_render_list();

        let stats = self.counters.snapshot();
        self.metrics.record_frame_stats(&stats, self.world.live_count());
        Ok(stats)
    }

    fn begin_frame(&mut self, frame: FrameContext) {
        self.frame = frame;
        self.counters.reset();
        // pick up statics spawned or entities released between frames
        self.world.sync_grid();
        self.world.populate_grid();
        trace!(frame = frame.frame_num, dt = frame.dt, "frame begin");
    }

    fn advance(&mut self) -> Result<(), SimError> {
        {
            let ctx = SimContext::new(self.frame, &self.world.store, &self.counters, self.world.policy);
            self.world.grid.update(&ctx)?;
            if self.config.resolve_collisions {
                self.world.grid.resolve_collisions(&ctx)?;
            }
        }

        let (destroyed, added) = self.world.sync_grid();
        self.app.on_update_done(&mut self.world, &self.frame)?;
        let (destroyed_by_app, added_by_app) = self.world.sync_grid();

        trace!(
            frame = self.frame.frame_num,
            destroyed = destroyed + destroyed_by_app,
            statics_added = added + added_by_app,
            live = self.world.live_count(),
            "frame advanced"
        );
        Ok(())
    }

    fn build_render_list(&mut self) {
        self.render_list.reset(self.frame);
        self.world.grid.render(
            &self.world.store,
            self.frame.tick(),
            &mut self.render_list,
            &self.counters,
        );
    }

    fn should_continue(&self, frames: u64, stop: &AtomicBool) -> bool {
        !stop.load(Ordering::Relaxed) && self.config.max_frames.map_or(true, |max| frames < max)
    }

    fn finish_frame(&self, started: Instant) {
        if self.metrics.record_frame_time(started.elapsed()) {
            info!("{}", self.metrics.summary());
        }
    }

    /// Run until `stop` is set or the configured frame limit is reached.
    /// Returns the number of frames simulated.
    pub fn run(&mut self, renderer: &mut impl Renderer, stop: &AtomicBool) -> Result<u64, SimError> {
        info!(
            threaded_update = self.config.threaded_update,
            threaded_grid = self.config.threaded_grid,
            max_frames = ?self.config.max_frames,
            "simulation loop starting"
        );

        let frames = if self.config.threaded_update {
            self.run_overlapped(renderer, stop)?
        } else {
            self.run_sequential(renderer, stop)?
        };

        info!(frames, "simulation loop stopped: {}", self.metrics.summary());
        Ok(frames)
    }

    fn run_sequential(&mut self, renderer: &mut impl Renderer, stop: &AtomicBool) -> Result<u64, SimError> {
        let pacer = FramePacer::new(self.config.target_fps);
        let mut frames = 0;

        while self.should_continue(frames, stop) {
            let started = Instant::now();
            self.step()?;
            present(renderer, &self.render_list, &self.metrics);
            frames += 1;
            self.finish_frame(started);
            pacer.wait(started);
        }

        Ok(frames)
    }

    fn run_overlapped(&mut self, renderer: &mut impl Renderer, stop: &AtomicBool) -> Result<u64, SimError> {
        let handoff = FrameHandoff::new(self.config.object_capacity);
        let metrics = Arc::clone(&self.metrics);

        std::thread::scope(|scope| {
            let update = scope.spawn(|| {
                let _shutdown = ShutdownGuard(&handoff);
                self.update_loop(&handoff, stop)
            });

            {
                let _shutdown = ShutdownGuard(&handoff);
                while handoff.present_next(|list| present(renderer, list, &metrics)) {}
            }

            update.join().map_err(|_| SimError::UpdateThreadPanicked)?
        })
    }

    fn update_loop(&mut self, handoff: &FrameHandoff, stop: &AtomicBool) -> Result<u64, SimError> {
        let pacer = FramePacer::new(self.config.target_fps);
        let mut frames = 0;

        while self.should_continue(frames, stop) {
            let started = Instant::now();
            self.step()?;
            frames += 1;
            if !handoff.publish(&mut self.render_list) {
                debug!(frames, "render side gone, update loop exiting");
                break;
            }
            self.finish_frame(started);
            pacer.wait(started);
        }

        Ok(frames)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sim::entity::{Behavior, Body, Inert};
    use glam::Vec3;

    fn config() -> SimConfig {
        SimConfig {
            fixed_dt: Some(0.1),
            target_fps: None,
            object_capacity: 16,
            ..SimConfig::default()
        }
    }

    fn ball(x: f32, z: f32) -> Entity {
        Entity::new(
            Body::new("ball")
                .as_sphere()
                .with_radius(1.0)
                .with_mass(1.0)
                .with_position(Vec3::new(x, 0.0, z)),
            Inert,
        )
    }

    #[derive(Default)]
    struct CountingRenderer {
        frames: Vec<u64>,
        draws: usize,
    }

    impl Renderer for CountingRenderer {
        fn present(&mut self, list: &RenderList) {
            self.frames.push(list.frame().frame_num);
            self.draws += list.len();
        }
    }

    #[test]
    fn test_spawn_policy() {
        let strict = World::new(&SimConfig { object_capacity: 1, ..config() });
        assert!(strict.spawn(ball(0.0, 0.0)).unwrap().is_some());
        assert!(matches!(
            strict.spawn(ball(0.0, 0.0)),
            Err(StoreError::Exhausted { capacity: 1, .. })
        ));

        let lenient = World::new(&SimConfig {
            object_capacity: 1,
            exhaustion: ExhaustionPolicy::ReturnNone,
            ..config()
        });
        assert!(lenient.spawn(ball(0.0, 0.0)).unwrap().is_some());
        assert_eq!(lenient.spawn(ball(0.0, 0.0)).unwrap(), None);
    }

    #[test]
    fn test_release_is_idempotent() {
        let mut world = World::new(&config());
        let id = world.spawn(ball(0.0, 0.0)).unwrap().unwrap();

        assert!(world.release(id).unwrap());
        assert!(!world.release(id).unwrap());
        assert!(world.is_live(id));

        world.sync_grid();
        assert!(!world.is_live(id));
        assert!(!world.release(id).unwrap());
    }

    #[test]
    fn test_sync_adds_and_removes_statics() {
        let mut world = World::new(&config());
        let wall = Entity::new(
            Body::new("wall").as_sphere().as_static().with_radius(1.0),
            Inert,
        );
        let id = world.spawn(wall).unwrap().unwrap();

        assert_eq!(world.sync_grid(), (0, 1));
        assert_eq!(world.grid().stats().static_entries, 4);

        world.release(id).unwrap();
        assert_eq!(world.sync_grid(), (1, 0));
        assert_eq!(world.grid().stats(), Default::default());
    }

    #[test]
    fn test_compaction_removes_mobile_entries() {
        let mut world = World::new(&config());
        let id = world.spawn(ball(-15.0, -15.0)).unwrap().unwrap();
        world.populate_grid();
        assert_eq!(world.grid().stats().mobile_entries, 1);

        world.release(id).unwrap();
        world.sync_grid();
        assert_eq!(world.grid().stats().mobile_entries, 0);
    }

    #[test]
    fn test_step_moves_and_renders() {
        struct Scene;
        impl Application for Scene {
            fn init(&mut self, world: &mut World) -> Result<(), SimError> {
                let body = Body::new("mover")
                    .as_sphere()
                    .with_radius(1.0)
                    .with_velocity(Vec3::new(1.0, 0.0, 0.0));
                world.spawn(Entity::new(body, Inert))?;
                Ok(())
            }
        }

        let mut sim = Simulation::new(config(), Scene).unwrap();
        let stats = sim.step().unwrap();

        assert_eq!(sim.frame().frame_num, 1);
        assert_eq!(stats.updated, 1);
        assert_eq!(stats.rendered, 1);
        assert_eq!(sim.render_list().len(), 1);
        let t = sim.render_list().commands()[0].transform;
        assert!((t.w_axis.x - 0.1).abs() < 1e-6);
    }

    #[test]
    fn test_hook_spawns_are_rendered_same_frame() {
        struct Spawner;
        impl Application for Spawner {
            fn on_update_done(&mut self, world: &mut World, frame: &FrameContext) -> Result<(), SimError> {
                if frame.frame_num == 2 {
                    let pillar = Body::new("pillar").as_sphere().as_static().with_radius(1.0);
                    world.spawn(Entity::new(pillar, Inert))?;
                }
                Ok(())
            }
        }

        let mut sim = Simulation::new(config(), Spawner).unwrap();
        sim.step().unwrap();
        assert_eq!(sim.render_list().len(), 0);
        sim.step().unwrap();
        assert_eq!(sim.render_list().len(), 1);
        assert_eq!(sim.world().grid().stats().static_entries, 4);
    }

    #[test]
    fn test_dead_entities_leave_before_render() {
        struct Mayfly;
        impl Behavior for Mayfly {
            fn update(&mut self, _body: &mut Body, _ctx: &SimContext<'_>) -> bool {
                false
            }
        }

        let mut sim = Simulation::new(config(), ()).unwrap();
        sim.world()
            .spawn(Entity::new(Body::new("mayfly").as_sphere().with_radius(1.0), Mayfly))
            .unwrap();
        // inside a single cell
        sim.world().spawn(ball(15.0, 15.0)).unwrap();

        sim.step().unwrap();
        assert_eq!(sim.world().live_count(), 1);
        assert_eq!(sim.render_list().len(), 1);
        assert_eq!(sim.world().grid().stats().mobile_entries, 1);
    }

    #[test]
    fn test_run_sequential_until_frame_limit() {
        let cfg = SimConfig { max_frames: Some(5), ..config() };
        let mut sim = Simulation::new(cfg, ()).unwrap();
        sim.world().spawn(ball(0.0, 5.0)).unwrap();

        let mut renderer = CountingRenderer::default();
        let frames = sim.run(&mut renderer, &AtomicBool::new(false)).unwrap();

        assert_eq!(frames, 5);
        assert_eq!(renderer.frames, vec![1, 2, 3, 4, 5]);
        assert_eq!(renderer.draws, 5);
        assert_eq!(sim.metrics().snapshot().frames, 5);
    }

    #[test]
    fn test_run_overlapped_presents_every_frame_in_order() {
        let cfg = SimConfig {
            max_frames: Some(30),
            threaded_update: true,
            threaded_grid: true,
            ..config()
        };
        let mut sim = Simulation::new(cfg, ()).unwrap();
        for i in 0..4 {
            sim.world().spawn(ball(-15.0 + 10.0 * i as f32, 0.0)).unwrap();
        }

        let mut renderer = CountingRenderer::default();
        let frames = sim.run(&mut renderer, &AtomicBool::new(false)).unwrap();

        assert_eq!(frames, 30);
        assert_eq!(renderer.frames, (1..=30).collect::<Vec<_>>());
        assert_eq!(renderer.draws, 4 * 30);
    }

    #[test]
    fn test_stop_flag_halts_run() {
        let mut sim = Simulation::new(config(), ()).unwrap();
        let stop = AtomicBool::new(true);
        let frames = sim.run(&mut CountingRenderer::default(), &stop).unwrap();
        assert_eq!(frames, 0);
    }

    #[test]
    fn test_invalid_config_rejected() {
        let cfg = SimConfig { lockstep: true, threaded_update: true, ..config() };
        assert!(matches!(Simulation::new(cfg, ()), Err(SimError::Config(_))));
    }
}
