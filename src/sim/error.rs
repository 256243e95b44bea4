use crate::config::ConfigError;
use crate::sim::planes::HullError;
use crate::sim::store::StoreError;

/// Failures surfaced by the frame driver
#[derive(Debug, thiserror::Error)]
pub enum SimError {
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error("invalid configuration: {0}")]
    Config(#[from] ConfigError),
    #[error("invalid hull: {0}")]
    Hull(#[from] HullError),
    #[error("update thread panicked")]
    UpdateThreadPanicked,
}
