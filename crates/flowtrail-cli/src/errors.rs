use flowtrail_engine::{EngineError, SourceError};
use thiserror::Error;

/// Errors that can occur while running the tracker from the command line
#[derive(Debug, Error)]
pub enum CliError {
    #[error(transparent)]
    Engine(#[from] EngineError),

    #[error(transparent)]
    Source(#[from] SourceError),

    #[error("Failed to decode video: {0}")]
    VideoDecoding(String),

    #[error("Input not found: {0}")]
    InputNotFound(String),

    #[error("No frames found in {0}")]
    NoFrames(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Video input requires building with the `ffmpeg` feature: {0}")]
    VideoUnsupported(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Image error: {0}")]
    Image(#[from] image::ImageError),

    #[error("JSON serialization error: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error("YAML parsing error: {0}")]
    YamlError(#[from] serde_yaml::Error),
}

pub type Result<T> = std::result::Result<T, CliError>;
