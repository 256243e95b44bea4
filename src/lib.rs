//! Arcade simulation kernel
//!
//! Real-time simulation core for a 3D arcade game: a fixed-capacity object
//! store with O(1) allocation and deferred compaction, a uniform spatial grid
//! for broad-phase queries, and a sphere/convex-hull collision pipeline that
//! dispatches gameplay events to entity behaviours.
//!
//! # Threading
//!
//! - `threaded_grid` - cell passes fan out across rayon workers, one task per grid row
//! - `threaded_update` - frame N is presented while frame N+1 is simulated

pub mod config;
pub mod demo;
pub mod metrics;
pub mod sim;
pub mod util;
