//! Scalability benchmarks for the simulation kernel
//!
//! Measures full frames (populate, update, collisions, compaction, draw list)
//! at various entity counts, sequential against threaded grid passes.
//!
//! Run with: cargo bench --bench scalability

use std::sync::Arc;

use arcade_sim::config::SimConfig;
use arcade_sim::demo::{Asteroid, AsteroidSize, GameArea};
use arcade_sim::sim::{Body, Entity, Hull, Inert, Simulation};
use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use glam::Vec3;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

fn config(count: usize, threaded_grid: bool) -> SimConfig {
    SimConfig {
        grid_rows: 16,
        grid_columns: 16,
        grid_cell_size: 10.0,
        object_capacity: count * 2,
        threaded_grid,
        fixed_dt: Some(1.0 / 60.0),
        target_fps: None,
        ..SimConfig::default()
    }
}

/// Simulation with `count` randomly placed bouncing spheres
fn create_sim_with_spheres(count: usize, threaded_grid: bool) -> Simulation<()> {
    let cfg = config(count, threaded_grid);
    let (width, depth) = cfg.world_size();
    let sim = Simulation::new(cfg, ()).expect("valid config");
    let mut rng = StdRng::seed_from_u64(42);

    for i in 0..count {
        let position = Vec3::new(
            rng.gen_range(-width / 2.0..width / 2.0),
            0.0,
            rng.gen_range(-depth / 2.0..depth / 2.0),
        );
        let velocity = Vec3::new(rng.gen_range(-5.0..5.0), 0.0, rng.gen_range(-5.0..5.0));
        let body = Body::new(format!("sphere{}", i))
            .as_sphere()
            .with_radius(rng.gen_range(0.3..1.5))
            .with_mass(rng.gen_range(1.0..10.0))
            .with_collision(1, 1)
            .with_position(position)
            .with_velocity(velocity);
        sim.world().spawn(Entity::new(body, Inert)).expect("capacity");
    }

    sim
}

/// Mix of wrapping asteroids and tumbling boxes, to exercise the hull tests
fn create_sim_with_hulls(count: usize) -> Simulation<()> {
    let cfg = config(count, false);
    let area = GameArea::for_config(&cfg);
    let sim = Simulation::new(cfg, ()).expect("valid config");
    let mut rng = StdRng::seed_from_u64(7);
    let hull = Hull::cuboid(Vec3::splat(0.8));
    let score = Arc::default();

    for i in 0..count {
        let position = Vec3::new(
            rng.gen_range(area.min.x..area.max.x),
            0.0,
            rng.gen_range(area.min.z..area.max.z),
        );
        let velocity = Vec3::new(rng.gen_range(-3.0..3.0), 0.0, rng.gen_range(-3.0..3.0));
        let entity = if i % 2 == 0 {
            let body = Body::new("box")
                .with_hull(Arc::clone(&hull))
                .with_collision(1, 1)
                .with_angular_velocity(Vec3::new(0.2, 0.9, 0.0))
                .with_position(position)
                .with_velocity(velocity);
            Entity::new(body, Inert)
        } else {
            // hit by boxes without being notified, so none of them split
            let body = Asteroid::body(AsteroidSize::Small, position, velocity).with_collision(1, 0);
            Entity::new(body, Asteroid::new(AsteroidSize::Small, area, i as u64, Arc::clone(&score)))
        };
        sim.world().spawn(entity).expect("capacity");
    }

    sim
}

/// Full frame, sequential grid
fn bench_frame_sequential(c: &mut Criterion) {
    let mut group = c.benchmark_group("frame_sequential");
    group.sample_size(50);

    for count in [250, 1000, 4000] {
        let mut sim = create_sim_with_spheres(count, false);

        group.throughput(Throughput::Elements(count as u64));
        group.bench_with_input(BenchmarkId::new("spheres", count), &count, |b, _| {
            b.iter(|| black_box(sim.step().expect("frame")))
        });
    }
    group.finish();
}

/// Full frame, one rayon task per grid row
fn bench_frame_threaded(c: &mut Criterion) {
    let mut group = c.benchmark_group("frame_threaded");
    group.sample_size(50);

    for count in [250, 1000, 4000] {
        let mut sim = create_sim_with_spheres(count, true);

        group.throughput(Throughput::Elements(count as u64));
        group.bench_with_input(BenchmarkId::new("spheres", count), &count, |b, _| {
            b.iter(|| black_box(sim.step().expect("frame")))
        });
    }
    group.finish();
}

/// Narrow phase against convex hulls
fn bench_hull_frames(c: &mut Criterion) {
    let mut group = c.benchmark_group("hull_frames");
    group.sample_size(30);

    for count in [250, 1000] {
        let mut sim = create_sim_with_hulls(count);

        group.throughput(Throughput::Elements(count as u64));
        group.bench_with_input(BenchmarkId::new("mixed", count), &count, |b, _| {
            b.iter(|| black_box(sim.step().expect("frame")))
        });
    }
    group.finish();
}

criterion_group!(
    benches,
    bench_frame_sequential,
    bench_frame_threaded,
    bench_hull_frames,
);

criterion_main!(benches);
