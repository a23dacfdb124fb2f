use std::path::Path;
use std::time::{SystemTime, UNIX_EPOCH};

use flowtrail_engine::{RunSummary, Termination};
use serde::{Deserialize, Serialize};

use crate::errors::Result;
use crate::types::RunConfig;

/// Complete tracking output in JSON format
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrackingOutput {
    pub metadata: Metadata,
    pub config: RunConfig,
    pub summary: RunSummary,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Metadata {
    pub input: String,
    /// Seconds since the Unix epoch when processing finished.
    pub processing_timestamp: u64,
    pub interactive: bool,
}

impl Metadata {
    pub fn now(input: impl Into<String>, interactive: bool) -> Self {
        let processing_timestamp = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or(0);
        Self {
            input: input.into(),
            processing_timestamp,
            interactive,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DetectedFrame {
    pub frame_index: u64,
    pub corners: Vec<[f32; 2]>,
}

/// Corners per frame from a detect-only run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DetectionOutput {
    pub metadata: Metadata,
    /// Why the detect loop stopped.
    pub termination: Termination,
    pub frames: Vec<DetectedFrame>,
}

/// Writes any output document as pretty JSON.
pub fn write_json<T: Serialize, P: AsRef<Path>>(value: &T, path: P) -> Result<()> {
    let path = path.as_ref();
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)?;
    }
    let file = std::fs::File::create(path)?;
    serde_json::to_writer_pretty(std::io::BufWriter::new(file), value)?;
    log::info!("Wrote {}", path.display());
    Ok(())
}
