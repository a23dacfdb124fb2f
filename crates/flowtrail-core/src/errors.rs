use thiserror::Error;

/// Errors raised by the tracking primitives.
///
/// Per-point estimation failures are never errors: they surface as
/// `FlowEstimate::found == false`. Only contract violations land here.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum TrackingError {
    #[error("Frame dimensions differ: reference is {reference:?}, incoming is {incoming:?}")]
    DimensionMismatch {
        reference: (u32, u32),
        incoming: (u32, u32),
    },

    #[error("Motion estimator returned {returned} estimates for {expected} points")]
    EstimatorContract { expected: usize, returned: usize },

    #[error("Track set has no reference frame; initialize it before propagating")]
    NotInitialized,

    #[error("Frame is empty ({width}x{height})")]
    EmptyFrame { width: u32, height: u32 },
}

/// Errors raised while validating tracker configuration.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum ConfigError {
    #[error("Invalid detector configuration: {0}")]
    Detector(String),

    #[error("Invalid Lucas-Kanade configuration: {0}")]
    Estimator(String),
}

pub type Result<T> = std::result::Result<T, TrackingError>;
