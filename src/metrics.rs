//! Simulation metrics
//!
//! Counters are atomics so the update and render threads can record without
//! coordination. Frame times keep a rolling history for percentiles.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use crate::sim::frame::FrameStats;

/// Frame time samples kept for percentiles
const HISTORY_LEN: usize = 1000;

/// Metrics registry for the simulation
#[derive(Debug)]
pub struct Metrics {
    // Frame counter
    pub frame_count: AtomicU64,

    // Entity counts (last frame)
    pub allocated_objects: AtomicU64,
    pub rendered_objects: AtomicU64,
    pub updated_objects: AtomicU64,

    // Collision pipeline totals
    pub candidate_pairs: AtomicU64,
    pub collisions: AtomicU64,
    pub dispatches: AtomicU64,
    pub impulses: AtomicU64,

    // Pass timing (microseconds, last frame)
    pub update_pass_us: AtomicU64,
    pub render_pass_us: AtomicU64,

    // Frame timing (microseconds)
    pub frame_time_us: AtomicU64,
    pub frame_time_p95_us: AtomicU64,
    pub frame_time_p99_us: AtomicU64,
    pub frame_time_max_us: AtomicU64,

    // Frames per second over the last completed interval
    pub fps: AtomicU64,

    start_time: Instant,
    interval: RwLock<FpsInterval>,

    // Rolling frame times for percentile calculation (VecDeque for O(1) pop_front)
    frame_history: RwLock<VecDeque<u64>>,
}

#[derive(Debug)]
struct FpsInterval {
    length: Duration,
    started: Instant,
    frames: u64,
}

/// Serializable copy of [`Metrics`]
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MetricsSnapshot {
    pub frames: u64,
    pub fps: u64,
    pub allocated_objects: u64,
    pub rendered_objects: u64,
    pub updated_objects: u64,
    pub candidate_pairs: u64,
    pub collisions: u64,
    pub dispatches: u64,
    pub impulses: u64,
    pub update_pass_us: u64,
    pub render_pass_us: u64,
    pub frame_time_us: u64,
    pub frame_time_p95_us: u64,
    pub frame_time_p99_us: u64,
    pub frame_time_max_us: u64,
    pub uptime_seconds: u64,
}

impl Metrics {
    pub fn new(fps_interval: Duration) -> Self {
        let now = Instant::now();
        Self {
            frame_count: AtomicU64::new(0),
            allocated_objects: AtomicU64::new(0),
            rendered_objects: AtomicU64::new(0),
            updated_objects: AtomicU64::new(0),
            candidate_pairs: AtomicU64::new(0),
            collisions: AtomicU64::new(0),
            dispatches: AtomicU64::new(0),
            impulses: AtomicU64::new(0),
            update_pass_us: AtomicU64::new(0),
            render_pass_us: AtomicU64::new(0),
            frame_time_us: AtomicU64::new(0),
            frame_time_p95_us: AtomicU64::new(0),
            frame_time_p99_us: AtomicU64::new(0),
            frame_time_max_us: AtomicU64::new(0),
            fps: AtomicU64::new(0),
            start_time: now,
            interval: RwLock::new(FpsInterval {
                length: fps_interval,
                started: now,
                frames: 0,
            }),
            frame_history: RwLock::new(VecDeque::with_capacity(HISTORY_LEN)),
        }
    }

    /// Fold one frame's pipeline counters in
    pub fn record_frame_stats(&self, stats: &FrameStats, allocated_objects: usize) {
        self.allocated_objects.store(allocated_objects as u64, Ordering::Relaxed);
        self.updated_objects.store(stats.updated, Ordering::Relaxed);
        self.candidate_pairs.fetch_add(stats.candidates, Ordering::Relaxed);
        self.collisions.fetch_add(stats.collisions, Ordering::Relaxed);
        self.dispatches.fetch_add(stats.dispatched, Ordering::Relaxed);
        self.impulses.fetch_add(stats.impulses, Ordering::Relaxed);
    }

    pub fn record_update_pass(&self, duration: Duration) {
        self.update_pass_us.store(duration.as_micros() as u64, Ordering::Relaxed);
    }

    pub fn record_render_pass(&self, duration: Duration, rendered: u64) {
        self.render_pass_us.store(duration.as_micros() as u64, Ordering::Relaxed);
        self.rendered_objects.store(rendered, Ordering::Relaxed);
    }

    /// Record a frame time and update percentiles.
    /// Returns true when an fps interval just completed.
    pub fn record_frame_time(&self, duration: Duration) -> bool {
        let us = duration.as_micros() as u64;
        self.frame_time_us.store(us, Ordering::Relaxed);
        self.frame_count.fetch_add(1, Ordering::Relaxed);

        {
            let mut history = self.frame_history.write();
            history.push_back(us);
            while history.len() > HISTORY_LEN {
                history.pop_front();
            }

            if history.len() >= 10 {
                let mut sorted: Vec<u64> = history.iter().copied().collect();
                sorted.sort_unstable();

                let p95_idx = (sorted.len() as f32 * 0.95) as usize;
                let p99_idx = (sorted.len() as f32 * 0.99) as usize;

                self.frame_time_p95_us.store(sorted[p95_idx.min(sorted.len() - 1)], Ordering::Relaxed);
                self.frame_time_p99_us.store(sorted[p99_idx.min(sorted.len() - 1)], Ordering::Relaxed);
                self.frame_time_max_us.store(sorted.last().copied().unwrap_or(0), Ordering::Relaxed);
            }
        }

        let mut interval = self.interval.write();
        interval.frames += 1;
        let elapsed = interval.started.elapsed();
        if elapsed < interval.length {
            return false;
        }
        let fps = (interval.frames as f64 / elapsed.as_secs_f64()).round() as u64;
        self.fps.store(fps, Ordering::Relaxed);
        interval.frames = 0;
        interval.started = Instant::now();
        true
    }

    /// Get uptime in seconds
    pub fn uptime_seconds(&self) -> u64 {
        self.start_time.elapsed().as_secs()
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            frames: self.frame_count.load(Ordering::Relaxed),
            fps: self.fps.load(Ordering::Relaxed),
            allocated_objects: self.allocated_objects.load(Ordering::Relaxed),
            rendered_objects: self.rendered_objects.load(Ordering::Relaxed),
            updated_objects: self.updated_objects.load(Ordering::Relaxed),
            candidate_pairs: self.candidate_pairs.load(Ordering::Relaxed),
            collisions: self.collisions.load(Ordering::Relaxed),
            dispatches: self.dispatches.load(Ordering::Relaxed),
            impulses: self.impulses.load(Ordering::Relaxed),
            update_pass_us: self.update_pass_us.load(Ordering::Relaxed),
            render_pass_us: self.render_pass_us.load(Ordering::Relaxed),
            frame_time_us: self.frame_time_us.load(Ordering::Relaxed),
            frame_time_p95_us: self.frame_time_p95_us.load(Ordering::Relaxed),
            frame_time_p99_us: self.frame_time_p99_us.load(Ordering::Relaxed),
            frame_time_max_us: self.frame_time_max_us.load(Ordering::Relaxed),
            uptime_seconds: self.uptime_seconds(),
        }
    }

    /// One line for the periodic log
    pub fn summary(&self) -> String {
        format!(
            "frames={} fps={} objs={} drawn={} upd_us={} drw_us={} p99_us={} collisions={} impulses={}",
            self.frame_count.load(Ordering::Relaxed),
            self.fps.load(Ordering::Relaxed),
            self.allocated_objects.load(Ordering::Relaxed),
            self.rendered_objects.load(Ordering::Relaxed),
            self.update_pass_us.load(Ordering::Relaxed),
            self.render_pass_us.load(Ordering::Relaxed),
            self.frame_time_p99_us.load(Ordering::Relaxed),
            self.collisions.load(Ordering::Relaxed),
            self.impulses.load(Ordering::Relaxed),
        )
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new(Duration::from_secs(1))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metrics_new() {
        let metrics = Metrics::default();
        assert_eq!(metrics.frame_count.load(Ordering::Relaxed), 0);
        assert_eq!(metrics.snapshot().collisions, 0);
    }

    #[test]
    fn test_record_frame_time() {
        let metrics = Metrics::default();

        for i in 0..100 {
            metrics.record_frame_time(Duration::from_micros(100 + i * 10));
        }

        assert_eq!(metrics.frame_count.load(Ordering::Relaxed), 100);
        assert!(metrics.frame_time_p95_us.load(Ordering::Relaxed) >= 1000);
        assert_eq!(metrics.frame_time_max_us.load(Ordering::Relaxed), 1090);
    }

    #[test]
    fn test_fps_interval_completes() {
        let metrics = Metrics::new(Duration::ZERO);
        assert!(metrics.record_frame_time(Duration::from_micros(10)));
        assert!(metrics.fps.load(Ordering::Relaxed) > 0);
    }

    #[test]
    fn test_frame_stats_accumulate() {
        let metrics = Metrics::default();
        let stats = FrameStats {
            updated: 5,
            candidates: 3,
            collisions: 2,
            dispatched: 4,
            impulses: 1,
            rendered: 5,
        };
        metrics.record_frame_stats(&stats, 12);
        metrics.record_frame_stats(&stats, 11);

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.allocated_objects, 11);
        assert_eq!(snapshot.updated_objects, 5);
        assert_eq!(snapshot.collisions, 4);
        assert_eq!(snapshot.dispatches, 8);
        assert_eq!(snapshot.impulses, 2);
    }

    #[test]
    fn test_snapshot_serializes() {
        let metrics = Metrics::default();
        metrics.record_render_pass(Duration::from_micros(250), 9);
        let json = serde_json::to_string(&metrics.snapshot()).unwrap();
        assert!(json.contains("\"rendered_objects\":9"));
        assert!(json.contains("\"render_pass_us\":250"));
    }

    #[test]
    fn test_summary_line() {
        let metrics = Metrics::default();
        metrics.impulses.store(3, Ordering::Relaxed);
        assert!(metrics.summary().contains("impulses=3"));
    }
}
