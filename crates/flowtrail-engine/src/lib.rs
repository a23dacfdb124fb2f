//! Per-frame tracking loop around the [`TrackSetManager`].

pub mod control;
pub mod errors;
pub mod io;
pub mod track_manager;
pub mod types;

use std::collections::VecDeque;
use std::time::Instant;

use flowtrail_core::img::{to_gray, GrayImage, Preprocess, RgbImage};
use flowtrail_core::overlay::{OverlayRenderer, RenderConfig};
use flowtrail_core::track::{
    FeatureDetector, MotionEstimator, PyramidalLucasKanade, ShiTomasiDetector,
};
use flowtrail_core::TrackingError;
use nalgebra::Vector2;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, info_span, warn};

pub use control::{LoopControl, NoSignals, OperatorSignal, ScriptedSignals, SignalSource};
pub use errors::{EngineError, Result, SourceError};
pub use io::{CapturedFrame, CollectingSink, FrameSink, FrameSource, VecSource};
pub use track_manager::{
    PropagateOutcome, TrackPoint, TrackSet, TrackSetManager, TrackerConfig, TrackerState,
};
pub use types::{FrameReport, FrameStat, RunSummary, StepOutcome, Termination};

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub tracker: TrackerConfig,
    pub render: RenderConfig,
    pub preprocess: Preprocess,
    /// Most recent per-frame stats kept by `run`; older ones are discarded.
    pub frame_stats_limit: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            tracker: TrackerConfig::default(),
            render: RenderConfig::default(),
            preprocess: Preprocess::default(),
            frame_stats_limit: 10_000,
        }
    }
}

impl EngineConfig {
    pub fn validate(&self) -> Result<()> {
        self.tracker.detector.validate()?;
        self.tracker.estimator.validate()?;
        Ok(())
    }
}

/// Corners found by a detect-only pass.
#[derive(Debug, Clone)]
pub struct Detection {
    pub corners: Vec<Vector2<f32>>,
    pub composite: RgbImage,
}

/// Cooperative tracking engine: one call per captured frame.
pub struct TrailEngine<D: FeatureDetector = ShiTomasiDetector, E: MotionEstimator = PyramidalLucasKanade>
{
    manager: TrackSetManager<D, E>,
    renderer: OverlayRenderer,
    preprocess: Preprocess,
    frame_stats_limit: usize,
    frames_processed: u64,
    reinitializations: u64,
    reinit_pending: bool,
}

impl TrailEngine {
    /// Engine with the Shi-Tomasi detector and pyramidal Lucas-Kanade.
    pub fn new(config: EngineConfig) -> Result<Self> {
        Self::with_components(ShiTomasiDetector::new(), PyramidalLucasKanade::new(), config)
    }
}

impl<D: FeatureDetector, E: MotionEstimator> TrailEngine<D, E> {
    pub fn with_components(detector: D, estimator: E, config: EngineConfig) -> Result<Self> {
        config.validate()?;
        info!(
            max_points = config.tracker.detector.max_points,
            window = config.tracker.estimator.window_size,
            levels = config.tracker.estimator.max_level,
            "Creating trail engine"
        );
        Ok(Self {
            manager: TrackSetManager::new(detector, estimator, config.tracker),
            renderer: OverlayRenderer::new(config.render),
            preprocess: config.preprocess,
            frame_stats_limit: config.frame_stats_limit,
            frames_processed: 0,
            reinitializations: 0,
            reinit_pending: false,
        })
    }

    pub fn manager(&self) -> &TrackSetManager<D, E> {
        &self.manager
    }

    pub fn frames_processed(&self) -> u64 {
        self.frames_processed
    }

    pub fn reinitializations(&self) -> u64 {
        self.reinitializations
    }

    fn prepare(&self, frame: &RgbImage) -> Result<GrayImage> {
        let (width, height) = frame.dimensions();
        if width == 0 || height == 0 {
            return Err(TrackingError::EmptyFrame { width, height }.into());
        }
        let gray = to_gray(frame);
        Ok(if self.preprocess.is_identity() {
            gray
        } else {
            self.preprocess.apply(&gray)
        })
    }

    /// Consumes one colour frame: seeds the set when empty, otherwise
    /// propagates it, then draws this step's trail segments and composes the
    /// display frame.
    pub fn process_one_frame(&mut self, frame: &RgbImage) -> Result<FrameReport> {
        let frame_index = self.frames_processed;
        let _span = info_span!("frame", index = frame_index).entered();
        let gray = self.prepare(frame)?;

        let outcome = match self.manager.state() {
            TrackerState::Empty => {
                if std::mem::take(&mut self.reinit_pending) {
                    debug!("Applying deferred reinitialization");
                }
                StepOutcome::Initialized {
                    detected: self.manager.initialize(gray),
                }
            }
            TrackerState::Tracking => {
                let result = self.manager.propagate(gray)?;
                if matches!(result, PropagateOutcome::Reinitialized { .. }) {
                    self.reinitializations += 1;
                }
                StepOutcome::Propagated { result }
            }
        };

        let segments = self.manager.segments();
        // A freshly seeded generation starts from an empty mask.
        if !outcome.is_seeding() {
            self.renderer
                .draw_segments(self.manager.overlay_mut(), &segments);
        }
        let composite = self
            .renderer
            .compose(frame, self.manager.overlay(), &segments);

        self.frames_processed += 1;
        debug!(
            points = self.manager.points().len(),
            dropped = outcome.dropped(),
            "Processed frame"
        );

        Ok(FrameReport {
            frame_index,
            outcome,
            points: self.manager.points().to_vec(),
            segments,
            composite,
        })
    }

    /// Acts on one operator signal between frames.
    pub fn apply_signal(&mut self, signal: OperatorSignal) -> LoopControl {
        match signal {
            OperatorSignal::Quit => {
                info!("Quit requested");
                return LoopControl::Stop;
            }
            OperatorSignal::Reinitialize => match self.manager.reference_frame().cloned() {
                Some(frame) => {
                    let dropped = self.manager.points().len();
                    let detected = self.manager.reinitialize(frame);
                    self.reinitializations += 1;
                    info!(dropped, detected, "Operator reinitialization");
                }
                None => {
                    debug!("Reinitialization deferred until the first frame");
                    self.reinit_pending = true;
                }
            },
            OperatorSignal::Reset => {
                self.manager.reset();
                self.reinit_pending = false;
            }
        }
        LoopControl::Continue
    }

    /// Pulls frames until the stream ends, the operator quits, or the source
    /// fails. Tracking contract violations abort with an error.
    pub fn run<F, S, K>(&mut self, source: &mut F, signals: &mut S, sink: &mut K) -> Result<RunSummary>
    where
        F: FrameSource + ?Sized,
        S: SignalSource + ?Sized,
        K: FrameSink + ?Sized,
    {
        let _span = info_span!("run").entered();
        let start_frames = self.frames_processed;
        let start_reinits = self.reinitializations;
        let mut frame_stats = VecDeque::new();
        let mut frame_stats_dropped = 0u64;

        let termination = 'frames: loop {
            let captured = match source.next_frame() {
                Ok(Some(captured)) => captured,
                Ok(None) => break Termination::EndOfStream,
                Err(err) => {
                    warn!(error = %err, "Frame acquisition failed, stopping");
                    break Termination::SourceFailed;
                }
            };

            let started = Instant::now();
            let report = self.process_one_frame(&captured.image)?;
            let elapsed_ms = started.elapsed().as_secs_f64() * 1000.0;
            sink.present(&report)?;
            frame_stats.push_back(report.stat(elapsed_ms));
            if frame_stats.len() > self.frame_stats_limit {
                frame_stats.pop_front();
                frame_stats_dropped += 1;
            }

            for signal in signals.drain(report.frame_index) {
                if self.apply_signal(signal) == LoopControl::Stop {
                    break 'frames Termination::Quit;
                }
            }
        };

        let summary = RunSummary {
            frames_processed: self.frames_processed - start_frames,
            reinitializations: self.reinitializations - start_reinits,
            termination,
            frame_stats: frame_stats.into(),
            frame_stats_dropped,
        };
        info!(
            frames = summary.frames_processed,
            reinitializations = summary.reinitializations,
            termination = ?summary.termination,
            avg_points = %format!("{:.1}", summary.average_points()),
            "Run finished"
        );
        Ok(summary)
    }

    /// Detects corners on one frame without touching the track set.
    pub fn detect_only(&self, frame: &RgbImage) -> Result<Detection> {
        let gray = self.prepare(frame)?;
        let corners = self.manager.detect(&gray);
        debug!(corners = corners.len(), "Detect-only pass");
        let composite = self.renderer.draw_corners(frame, &corners);
        Ok(Detection { corners, composite })
    }
}
