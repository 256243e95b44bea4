//! Headless asteroid-field scene
//!
//! Drives the kernel with a small game: asteroids that split when shot,
//! bullets fired from the centre, fragments that fade, tumbling crates with
//! box hulls and static pillars that asteroids bounce off.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use glam::Vec3;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tracing::{debug, trace, warn};

use crate::config::SimConfig;
use crate::sim::driver::{Application, World};
use crate::sim::entity::{Behavior, Body, CollisionPeer, Entity};
use crate::sim::error::SimError;
use crate::sim::frame::{FrameContext, SimContext};
use crate::sim::planes::Hull;
use crate::sim::render::{RenderList, Renderer};

/// Collision categories
pub mod bits {
    pub const NONE: u32 = 0;
    pub const HERO: u32 = 1 << 0;
    pub const HERO_BULLET: u32 = 1 << 1;
    pub const ASTEROID: u32 = 1 << 2;
    pub const POWER_UP: u32 = 1 << 3;
    pub const UFO: u32 = 1 << 4;
    pub const UFO_BULLET: u32 = 1 << 5;
    pub const STATIC: u32 = 1 << 6;
}

/// Model ids handed to the renderer
pub mod models {
    pub const ASTEROID_LARGE: u32 = 1;
    pub const ASTEROID_MEDIUM: u32 = 2;
    pub const ASTEROID_SMALL: u32 = 3;
    pub const BULLET: u32 = 4;
    pub const FRAGMENT: u32 = 5;
    pub const CRATE: u32 = 6;
    pub const PILLAR: u32 = 7;
}

const ASTEROID_LARGE_SPEED: f32 = 10.0;
const ASTEROID_SPLIT: usize = 4;
const ASTEROID_SPLIT_SPEED: f32 = 6.0;
const BULLET_SPEED: f32 = 17.0;
const BULLET_LIFETIME_MS: u64 = 3_000;
const FRAGMENT_LIFETIME_MS: u64 = 500;

/// Uniform in `[-range / 2, range / 2]`
fn spread(rng: &mut impl Rng, range: f32) -> f32 {
    let half = range.abs() / 2.0;
    rng.gen_range(-half..=half)
}

/// Playfield bounds, padded so the largest asteroid wraps fully off screen
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GameArea {
    pub min: Vec3,
    pub max: Vec3,
}

impl GameArea {
    /// Screen depth along Y
    const HALF_DEPTH: f32 = 10.0;

    pub fn for_config(config: &SimConfig) -> Self {
        let (width, depth) = config.world_size();
        let pad = AsteroidSize::Large.radius();
        let half = Vec3::new(width / 2.0, Self::HALF_DEPTH, depth / 2.0) + Vec3::splat(pad);
        Self { min: -half, max: half }
    }

    /// Wrap a position that left the area to the opposite edge
    pub fn roll(&self, position: &mut Vec3) {
        for axis in 0..3 {
            if position[axis] < self.min[axis] {
                position[axis] = self.max[axis];
            } else if position[axis] > self.max[axis] {
                position[axis] = self.min[axis];
            }
        }
    }

    pub fn contains(&self, position: Vec3) -> bool {
        position.cmpge(self.min).all() && position.cmple(self.max).all()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AsteroidSize {
    Large,
    Medium,
    Small,
}

impl AsteroidSize {
    pub fn radius(self) -> f32 {
        match self {
            AsteroidSize::Large => 2.0,
            AsteroidSize::Medium => 1.2,
            AsteroidSize::Small => 0.75,
        }
    }

    pub fn mass(self) -> f32 {
        match self {
            AsteroidSize::Large => 1500.0,
            AsteroidSize::Medium => 400.0,
            AsteroidSize::Small => 100.0,
        }
    }

    pub fn points(self) -> u64 {
        match self {
            AsteroidSize::Large => 10,
            AsteroidSize::Medium => 20,
            AsteroidSize::Small => 40,
        }
    }

    pub fn model(self) -> u32 {
        match self {
            AsteroidSize::Large => models::ASTEROID_LARGE,
            AsteroidSize::Medium => models::ASTEROID_MEDIUM,
            AsteroidSize::Small => models::ASTEROID_SMALL,
        }
    }

    /// What a hit breaks this asteroid into
    pub fn fragments(self) -> Option<AsteroidSize> {
        match self {
            AsteroidSize::Large => Some(AsteroidSize::Medium),
            AsteroidSize::Medium => Some(AsteroidSize::Small),
            AsteroidSize::Small => None,
        }
    }
}

pub struct Asteroid {
    size: AsteroidSize,
    area: GameArea,
    rng: StdRng,
    score: Arc<AtomicU64>,
}

impl Asteroid {
    pub fn new(size: AsteroidSize, area: GameArea, seed: u64, score: Arc<AtomicU64>) -> Self {
        Self {
            size,
            area,
            rng: StdRng::seed_from_u64(seed),
            score,
        }
    }

    pub fn body(size: AsteroidSize, position: Vec3, velocity: Vec3) -> Body {
        Body::new("asteroid")
            .as_sphere()
            .with_model(size.model())
            .with_radius(size.radius())
            .with_mass(size.mass())
            .with_collision(bits::ASTEROID, bits::HERO | bits::HERO_BULLET)
            .with_position(position)
            .with_velocity(velocity)
    }
}

impl Behavior for Asteroid {
    fn update(&mut self, body: &mut Body, ctx: &SimContext<'_>) -> bool {
        body.integrate(ctx.dt());
        self.area.roll(&mut body.position);
        true
    }

    fn on_collision(&mut self, body: &mut Body, other: &CollisionPeer, ctx: &SimContext<'_>) -> bool {
        self.score.fetch_add(self.size.points(), Ordering::Relaxed);
        trace!(asteroid = %body.id(), by = %other.id, size = ?self.size, "asteroid hit");

        let Some(next) = self.size.fragments() else {
            return false;
        };

        let half_radius = body.bounding_radius / 2.0;
        for _ in 0..ASTEROID_SPLIT {
            let offset = Vec3::new(
                spread(&mut self.rng, half_radius),
                0.0,
                spread(&mut self.rng, half_radius),
            );
            let direction = offset.try_normalize().unwrap_or(Vec3::X);
            let speed = self.rng.gen_range(0.0..=ASTEROID_SPLIT_SPEED);
            let child = Asteroid::body(
                next,
                body.position + offset,
                body.linear_velocity + direction * speed,
            )
            .with_angular_velocity(Vec3::splat(spread(&mut self.rng, 3.5)));
            let behavior = Asteroid::new(next, self.area, self.rng.gen(), Arc::clone(&self.score));

            if ctx.spawn(Entity::new(child, behavior)).is_none() {
                break;
            }
        }

        false
    }
}

/// Dies on impact or when it leaves the area
pub struct Bullet {
    area: GameArea,
    death_ms: u64,
}

impl Bullet {
    pub fn new(area: GameArea, death_ms: u64) -> Self {
        Self { area, death_ms }
    }

    pub fn body(position: Vec3, velocity: Vec3) -> Body {
        Body::new("bullet")
            .as_sphere()
            .with_model(models::BULLET)
            .with_radius(0.25)
            .with_mass(5.0)
            .with_collision(bits::HERO_BULLET, bits::ASTEROID | bits::UFO)
            .with_position(position)
            .with_velocity(velocity)
    }
}

impl Behavior for Bullet {
    fn update(&mut self, body: &mut Body, ctx: &SimContext<'_>) -> bool {
        body.integrate(ctx.dt());
        self.area.contains(body.position) && ctx.frame().ms <= self.death_ms
    }

    fn on_collision(&mut self, body: &mut Body, _other: &CollisionPeer, ctx: &SimContext<'_>) -> bool {
        let fragment = Body::new("fragment")
            .as_sphere()
            .with_model(models::FRAGMENT)
            .with_radius(0.25)
            .with_mass(10.0)
            .with_position(body.position)
            .with_angular_velocity(Vec3::new(0.0, 6.0, 0.0));
        ctx.spawn(Entity::new(
            fragment,
            Fragment {
                death_ms: ctx.frame().ms + FRAGMENT_LIFETIME_MS,
            },
        ));
        false
    }
}

/// Short-lived debris, collides with nothing
pub struct Fragment {
    pub death_ms: u64,
}

impl Behavior for Fragment {
    fn update(&mut self, body: &mut Body, ctx: &SimContext<'_>) -> bool {
        body.integrate(ctx.dt());
        ctx.frame().ms <= self.death_ms
    }
}

/// Tumbling box. Hulls only get notified, so crates pass through each other
/// and count the contacts.
pub struct Crate {
    area: GameArea,
    contacts: Arc<AtomicU64>,
}

impl Crate {
    pub fn new(area: GameArea, contacts: Arc<AtomicU64>) -> Self {
        Self { area, contacts }
    }

    pub fn body(hull: Arc<Hull>, position: Vec3, velocity: Vec3) -> Body {
        Body::new("crate")
            .with_model(models::CRATE)
            .with_hull(hull)
            .with_mass(10.0)
            .with_collision(bits::POWER_UP, bits::POWER_UP)
            .with_position(position)
            .with_velocity(velocity)
    }
}

impl Behavior for Crate {
    fn update(&mut self, body: &mut Body, ctx: &SimContext<'_>) -> bool {
        body.integrate(ctx.dt());
        self.area.roll(&mut body.position);
        true
    }

    fn on_collision(&mut self, _body: &mut Body, _other: &CollisionPeer, _ctx: &SimContext<'_>) -> bool {
        self.contacts.fetch_add(1, Ordering::Relaxed);
        true
    }
}

/// Immovable obstacle asteroids bounce off
pub struct Pillar;

impl Pillar {
    pub fn body(position: Vec3, radius: f32) -> Body {
        Body::new("pillar")
            .as_sphere()
            .as_static()
            .with_model(models::PILLAR)
            .with_radius(radius)
            .with_mass(1.0e9)
            .with_collision(bits::STATIC, bits::ASTEROID)
            .with_position(position)
    }
}

impl Behavior for Pillar {
    fn update(&mut self, _body: &mut Body, _ctx: &SimContext<'_>) -> bool {
        true
    }
}

#[derive(Debug, Clone)]
pub struct DemoSettings {
    pub seed: u64,
    pub asteroids: usize,
    pub crates: usize,
    pub pillars: usize,
    /// Frames between shots, 0 disables firing
    pub fire_every: u64,
}

impl Default for DemoSettings {
    fn default() -> Self {
        Self {
            seed: 1,
            asteroids: 8,
            crates: 4,
            pillars: 2,
            fire_every: 10,
        }
    }
}

impl DemoSettings {
    /// Defaults overridden by `DEMO_SEED`, `DEMO_ASTEROIDS`, `DEMO_CRATES`,
    /// `DEMO_PILLARS` and `DEMO_FIRE_EVERY`
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Same as [`DemoSettings::from_env`] with an injectable source.
    /// Unparseable values are logged and the default kept.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut settings = Self::default();

        let number = |key: &str, target: &mut u64| {
            if let Some(raw) = lookup(key) {
                match raw.trim().parse::<u64>() {
                    Ok(parsed) => *target = parsed,
                    Err(_) => warn!("Invalid {} '{}', using default", key, raw),
                }
            }
        };
        let count = |key: &str, target: &mut usize| {
            if let Some(raw) = lookup(key) {
                match raw.trim().parse::<usize>() {
                    Ok(parsed) => *target = parsed,
                    Err(_) => warn!("Invalid {} '{}', using default", key, raw),
                }
            }
        };

        number("DEMO_SEED", &mut settings.seed);
        count("DEMO_ASTEROIDS", &mut settings.asteroids);
        count("DEMO_CRATES", &mut settings.crates);
        count("DEMO_PILLARS", &mut settings.pillars);
        number("DEMO_FIRE_EVERY", &mut settings.fire_every);
        settings
    }
}

/// Scene setup plus the gun, fired from the frame hook
pub struct DemoScene {
    settings: DemoSettings,
    area: GameArea,
    rng: StdRng,
    score: Arc<AtomicU64>,
    crate_contacts: Arc<AtomicU64>,
    shots: u64,
}

impl DemoScene {
    pub fn new(config: &SimConfig, settings: DemoSettings) -> Self {
        Self {
            area: GameArea::for_config(config),
            rng: StdRng::seed_from_u64(settings.seed),
            settings,
            score: Arc::new(AtomicU64::new(0)),
            crate_contacts: Arc::new(AtomicU64::new(0)),
            shots: 0,
        }
    }

    pub fn score(&self) -> u64 {
        self.score.load(Ordering::Relaxed)
    }

    pub fn crate_contacts(&self) -> u64 {
        self.crate_contacts.load(Ordering::Relaxed)
    }

    pub fn shots(&self) -> u64 {
        self.shots
    }

    fn random_point(&mut self) -> Vec3 {
        let x = self.rng.gen_range(self.area.min.x..self.area.max.x);
        let z = self.rng.gen_range(self.area.min.z..self.area.max.z);
        Vec3::new(x, 0.0, z)
    }

    fn random_heading(&mut self) -> Vec3 {
        let angle = self.rng.gen_range(0.0..std::f32::consts::TAU);
        Vec3::new(angle.cos(), 0.0, angle.sin())
    }
}

impl Application for DemoScene {
    fn init(&mut self, world: &mut World) -> Result<(), SimError> {
        for i in 0..self.settings.pillars {
            let angle = i as f32 / self.settings.pillars as f32 * std::f32::consts::TAU;
            let position = Vec3::new(angle.cos(), 0.0, angle.sin()) * (self.area.max.x / 2.0);
            world.spawn(Entity::new(Pillar::body(position, 1.5), Pillar))?;
        }

        for _ in 0..self.settings.asteroids {
            let position = self.random_point();
            let velocity = self.random_heading() * self.rng.gen_range(0.0..ASTEROID_LARGE_SPEED);
            let body = Asteroid::body(AsteroidSize::Large, position, velocity)
                .with_angular_velocity(Vec3::new(0.0, spread(&mut self.rng, 1.3), 0.0));
            let behavior = Asteroid::new(AsteroidSize::Large, self.area, self.rng.gen(), Arc::clone(&self.score));
            world.spawn(Entity::new(body, behavior))?;
        }

        let hull = Hull::cuboid(Vec3::splat(1.0));
        for _ in 0..self.settings.crates {
            let position = self.random_point();
            let velocity = self.random_heading() * 2.0;
            let body = Crate::body(Arc::clone(&hull), position, velocity)
                .with_angular_velocity(Vec3::new(0.3, 0.7, 0.0));
            world.spawn(Entity::new(body, Crate::new(self.area, Arc::clone(&self.crate_contacts))))?;
        }

        debug!(entities = world.live_count(), "demo scene ready");
        Ok(())
    }

    fn on_update_done(&mut self, world: &mut World, frame: &FrameContext) -> Result<(), SimError> {
        let fire_every = self.settings.fire_every;
        if fire_every == 0 || frame.frame_num % fire_every != 0 {
            return Ok(());
        }

        let heading = self.random_heading();
        let bullet = Entity::new(
            Bullet::body(Vec3::ZERO, heading * BULLET_SPEED),
            Bullet::new(self.area, frame.ms + BULLET_LIFETIME_MS),
        );
        if world.spawn(bullet)?.is_some() {
            self.shots += 1;
        }
        Ok(())
    }
}

/// Renderer that only keeps totals, for benchmarks and headless runs
#[derive(Debug, Default)]
pub struct HeadlessRenderer {
    pub frames: u64,
    pub draws: u64,
    pub last_frame: u64,
}

impl Renderer for HeadlessRenderer {
    fn present(&mut self, list: &RenderList) {
        self.frames += 1;
        self.draws += list.len() as u64;
        self.last_frame = list.frame().frame_num;
    }
}
