use crate::sim::store::{ExhaustionPolicy, StoreChecks};

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ConfigError {
    #[error("grid must have at least one row and one column")]
    EmptyGrid,
    #[error("grid cell size must be a positive number, got {0}")]
    InvalidCellSize(f32),
    #[error("object capacity must be at least 1")]
    ZeroCapacity,
    #[error("fixed dt must be a positive number, got {0}")]
    InvalidFixedDt(f32),
    #[error("threaded update cannot be combined with deterministic lockstep")]
    OverlapInLockstep,
}

/// Simulation configuration
#[derive(Debug, Clone, PartialEq)]
pub struct SimConfig {
    /// Cells along Z
    pub grid_rows: usize,
    /// Cells along X
    pub grid_columns: usize,
    /// Side of a square cell in world units
    pub grid_cell_size: f32,
    /// Preallocated entity slots
    pub object_capacity: usize,
    /// Fan cell passes across rayon workers, one task per grid row
    pub threaded_grid: bool,
    /// Present frame N on the calling thread while frame N+1 is simulated
    pub threaded_update: bool,
    /// Release-time store checks (development)
    pub store_checks: StoreChecks,
    /// Behaviour of allocation when the store is full
    pub exhaustion: ExhaustionPolicy,
    /// Run the collision pass
    pub resolve_collisions: bool,
    /// Frames are driven by an authoritative remote clock and must be
    /// reproducible
    pub lockstep: bool,
    /// Simulated step in seconds. `None` uses the wall clock.
    pub fixed_dt: Option<f32>,
    /// Frame pacing for the run loop. `None` runs unpaced.
    pub target_fps: Option<u32>,
    /// Interval of the periodic metrics line
    pub metrics_interval_ms: u64,
    /// Stop after this many frames
    pub max_frames: Option<u64>,
}

impl Default for SimConfig {
    fn default() -> Self {
        Self {
            // 40 x 40 playfield
            grid_rows: 4,
            grid_columns: 4,
            grid_cell_size: 10.0,
            object_capacity: 1024,
            threaded_grid: false,
            threaded_update: false,
            store_checks: StoreChecks {
                double_free: cfg!(debug_assertions),
                free_limits: cfg!(debug_assertions),
            },
            exhaustion: ExhaustionPolicy::Fail,
            resolve_collisions: true,
            lockstep: false,
            fixed_dt: None,
            target_fps: Some(60),
            metrics_interval_ms: 1000,
            max_frames: None,
        }
    }
}

fn parse_bool(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

impl SimConfig {
    /// Load config from environment or use defaults
    pub fn load_or_default() -> Self {
        Self::load_from(|key| std::env::var(key).ok())
    }

    /// Load config from `lookup` (environment-style keys) or use defaults.
    /// Invalid values are logged and ignored.
    pub fn load_from(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut config = Self::default();

        let positive_usize = |key: &str, target: &mut usize| {
            if let Some(raw) = lookup(key) {
                match raw.trim().parse::<usize>() {
                    Ok(parsed) if parsed > 0 => *target = parsed,
                    Ok(_) => tracing::warn!("{} must be > 0, using default", key),
                    Err(_) => tracing::warn!("Invalid {} '{}', using default", key, raw),
                }
            }
        };
        positive_usize("GRID_ROWS", &mut config.grid_rows);
        positive_usize("GRID_COLUMNS", &mut config.grid_columns);
        positive_usize("OBJECT_CAPACITY", &mut config.object_capacity);

        if let Some(size) = lookup("GRID_CELL_SIZE") {
            match size.trim().parse::<f32>() {
                Ok(parsed) if parsed.is_finite() && parsed > 0.0 => config.grid_cell_size = parsed,
                _ => tracing::warn!("Invalid GRID_CELL_SIZE '{}', using default", size),
            }
        }

        let flag = |key: &str, target: &mut bool| {
            if let Some(raw) = lookup(key) {
                match parse_bool(&raw) {
                    Some(parsed) => *target = parsed,
                    None => tracing::warn!("Invalid {} '{}', using default", key, raw),
                }
            }
        };
        flag("THREADED_GRID", &mut config.threaded_grid);
        flag("THREADED_UPDATE", &mut config.threaded_update);
        flag("STORE_CHECK_DOUBLE_FREE", &mut config.store_checks.double_free);
        flag("STORE_CHECK_FREE_LIMITS", &mut config.store_checks.free_limits);
        flag("RESOLVE_COLLISIONS", &mut config.resolve_collisions);
        flag("LOCKSTEP", &mut config.lockstep);

        let mut return_none = config.exhaustion == ExhaustionPolicy::ReturnNone;
        flag("RETURN_NONE_WHEN_EXHAUSTED", &mut return_none);
        config.exhaustion = if return_none {
            ExhaustionPolicy::ReturnNone
        } else {
            ExhaustionPolicy::Fail
        };

        if let Some(dt) = lookup("FIXED_DT") {
            match dt.trim().parse::<f32>() {
                Ok(parsed) if parsed.is_finite() && parsed > 0.0 => config.fixed_dt = Some(parsed),
                _ => tracing::warn!("Invalid FIXED_DT '{}', using default", dt),
            }
        }

        if let Some(fps) = lookup("TARGET_FPS") {
            match fps.trim().parse::<u32>() {
                Ok(0) => config.target_fps = None,
                Ok(parsed) => config.target_fps = Some(parsed),
                Err(_) => tracing::warn!("Invalid TARGET_FPS '{}', using default", fps),
            }
        }

        if let Some(interval) = lookup("METRICS_INTERVAL_MS") {
            match interval.trim().parse::<u64>() {
                Ok(parsed) if parsed > 0 => config.metrics_interval_ms = parsed,
                _ => tracing::warn!("Invalid METRICS_INTERVAL_MS '{}', using default", interval),
            }
        }

        if let Some(frames) = lookup("FRAMES") {
            match frames.trim().parse::<u64>() {
                Ok(parsed) if parsed > 0 => config.max_frames = Some(parsed),
                _ => tracing::warn!("Invalid FRAMES '{}', using default", frames),
            }
        }

        config
    }

    /// Validate configuration after loading
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.grid_rows == 0 || self.grid_columns == 0 {
            return Err(ConfigError::EmptyGrid);
        }
        if !(self.grid_cell_size.is_finite() && self.grid_cell_size > 0.0) {
            return Err(ConfigError::InvalidCellSize(self.grid_cell_size));
        }
        if self.object_capacity == 0 {
            return Err(ConfigError::ZeroCapacity);
        }
        if let Some(dt) = self.fixed_dt {
            if !(dt.is_finite() && dt > 0.0) {
                return Err(ConfigError::InvalidFixedDt(dt));
            }
        }
        if self.threaded_update && self.lockstep {
            return Err(ConfigError::OverlapInLockstep);
        }
        Ok(())
    }

    /// Playfield extent along X and Z
    pub fn world_size(&self) -> (f32, f32) {
        (
            self.grid_columns as f32 * self.grid_cell_size,
            self.grid_rows as f32 * self.grid_cell_size,
        )
    }
}
