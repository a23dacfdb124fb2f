use flowtrail_core::{ConfigError, TrackingError};
use thiserror::Error;

/// Failure to acquire the next frame. Ends a run without being an error of
/// the run itself.
#[derive(Debug, Error)]
pub enum SourceError {
    #[error("I/O error reading {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to decode frame {index}: {message}")]
    Decode { index: u64, message: String },

    #[error("Capture device failed: {0}")]
    Device(String),
}

#[derive(Debug, Error)]
pub enum EngineError {
    #[error(transparent)]
    Tracking(#[from] TrackingError),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("Frame sink failed: {0}")]
    Sink(String),
}

pub type Result<T> = std::result::Result<T, EngineError>;
