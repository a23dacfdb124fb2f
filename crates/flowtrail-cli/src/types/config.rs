use std::path::Path;

use flowtrail_core::img::Preprocess;
use flowtrail_core::overlay::RenderConfig;
use flowtrail_core::track::{DetectorConfig, LucasKanadeConfig};
use flowtrail_engine::{EngineConfig, OperatorSignal, ScriptedSignals, TrackerConfig};
use serde::{Deserialize, Serialize};

use crate::errors::{CliError, Result};

/// Configuration for a tracking run, loaded from YAML.
///
/// Every field is optional in the file; missing ones take the defaults below.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RunConfig {
    pub detector: DetectorConfig,
    pub estimator: LucasKanadeConfig,
    pub render: RenderConfig,
    pub preprocess: Preprocess,
    /// Skip N frames between processed frames
    pub skip_frames: usize,
    /// Maximum number of frames to process
    pub max_frames: Option<usize>,
    /// Operator signals replayed after the given frames
    pub signals: Vec<ScheduledSignal>,
    /// Cap on per-frame stats kept in the summary
    pub frame_stats_limit: Option<usize>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScheduledSignal {
    pub after_frame: u64,
    pub signal: OperatorSignal,
}

impl RunConfig {
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path)
            .map_err(|e| CliError::InvalidConfig(format!("{}: {}", path.display(), e)))?;
        let config: RunConfig = serde_yaml::from_str(&contents)?;
        config.validate()?;
        log::info!("Loaded run configuration from {}", path.display());
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        self.detector
            .validate()
            .and_then(|_| self.estimator.validate())
            .map_err(|e| CliError::InvalidConfig(e.to_string()))
    }

    pub fn engine_config(&self) -> EngineConfig {
        let defaults = EngineConfig::default();
        EngineConfig {
            tracker: TrackerConfig {
                detector: self.detector,
                estimator: self.estimator,
            },
            render: self.render,
            preprocess: self.preprocess,
            frame_stats_limit: self.frame_stats_limit.unwrap_or(defaults.frame_stats_limit),
        }
    }

    pub fn scripted_signals(&self) -> ScriptedSignals {
        self.signals
            .iter()
            .map(|s| (s.after_frame, s.signal))
            .collect()
    }
}
