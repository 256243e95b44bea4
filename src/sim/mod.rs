//! Simulation kernel
//!
//! Entities live in a fixed-capacity [`store::Store`] and are indexed by a
//! uniform [`grid::Grid`] on the XZ plane. Each frame the grid's cells advance
//! their entities, then run a broad phase (bounding spheres), a narrow phase
//! (spheres and convex hulls) and dispatch collisions back to behaviours.

pub mod cell;
pub mod driver;
pub mod entity;
pub mod error;
pub mod frame;
pub mod grid;
pub mod handoff;
pub mod physics;
pub mod planes;
pub mod render;
pub mod store;

pub use driver::{Application, Simulation, World};
pub use entity::{Behavior, Body, CollisionPeer, Entity, EntityId, Inert};
pub use error::SimError;
pub use frame::{FrameClock, FrameContext, FrameStats, SimContext};
pub use grid::{CellSpan, Grid, GridStats};
pub use planes::{Hull, PlaneCache};
pub use render::{DrawCommand, RenderList, Renderer};
pub use store::{ExhaustionPolicy, Handle, Store, StoreChecks, StoreError};
