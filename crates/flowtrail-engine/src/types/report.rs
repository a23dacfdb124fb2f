use flowtrail_core::img::RgbImage;
use flowtrail_core::overlay::TrailSegment;
use serde::{Deserialize, Serialize};

use crate::track_manager::{PropagateOutcome, TrackPoint};

/// What one processing step did to the track set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum StepOutcome {
    /// The set was seeded from this frame (first frame or after a reset).
    Initialized { detected: usize },
    Propagated { result: PropagateOutcome },
}

impl StepOutcome {
    pub fn dropped(&self) -> usize {
        match self.result() {
            Some(PropagateOutcome::Tracked { dropped, .. })
            | Some(PropagateOutcome::Reinitialized { dropped, .. }) => dropped,
            _ => 0,
        }
    }

    /// Points detected during this step, `None` for plain propagation.
    pub fn detected(&self) -> Option<usize> {
        match *self {
            StepOutcome::Initialized { detected } => Some(detected),
            StepOutcome::Propagated {
                result: PropagateOutcome::Reinitialized { detected, .. },
            } => Some(detected),
            StepOutcome::Propagated { .. } => None,
        }
    }

    /// True when this step replaced the set with a fresh detection.
    pub fn is_seeding(&self) -> bool {
        self.detected().is_some()
    }

    pub fn is_implicit_reinit(&self) -> bool {
        matches!(
            self.result(),
            Some(PropagateOutcome::Reinitialized { .. })
        )
    }

    fn result(&self) -> Option<PropagateOutcome> {
        match *self {
            StepOutcome::Propagated { result } => Some(result),
            StepOutcome::Initialized { .. } => None,
        }
    }
}

/// Everything a sink needs to present one processed frame.
#[derive(Debug, Clone)]
pub struct FrameReport {
    pub frame_index: u64,
    pub outcome: StepOutcome,
    pub points: Vec<TrackPoint>,
    pub segments: Vec<TrailSegment>,
    /// Frame with markers and accumulated trails.
    pub composite: RgbImage,
}

impl FrameReport {
    pub fn stat(&self, elapsed_ms: f64) -> FrameStat {
        FrameStat {
            frame_index: self.frame_index,
            points: self.points.len(),
            dropped: self.outcome.dropped(),
            detected: self.outcome.detected(),
            elapsed_ms,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FrameStat {
    pub frame_index: u64,
    pub points: usize,
    pub dropped: usize,
    pub detected: Option<usize>,
    pub elapsed_ms: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Termination {
    EndOfStream,
    Quit,
    /// The frame source could not deliver a frame.
    SourceFailed,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunSummary {
    pub frames_processed: u64,
    /// Explicit and implicit reinitializations, excluding the first seeding.
    pub reinitializations: u64,
    pub termination: Termination,
    /// The most recent frames, up to `EngineConfig::frame_stats_limit`.
    pub frame_stats: Vec<FrameStat>,
    /// Older stats discarded to respect the limit.
    #[serde(default)]
    pub frame_stats_dropped: u64,
}

impl RunSummary {
    /// Mean point count over the retained frame stats.
    pub fn average_points(&self) -> f64 {
        if self.frame_stats.is_empty() {
            return 0.0;
        }
        let total: usize = self.frame_stats.iter().map(|s| s.points).sum();
        total as f64 / self.frame_stats.len() as f64
    }
}
