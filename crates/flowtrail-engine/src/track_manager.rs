use flowtrail_core::img::GrayImage;
use flowtrail_core::overlay::{OverlayMask, TrailSegment};
use flowtrail_core::track::{DetectorConfig, FeatureDetector, LucasKanadeConfig, MotionEstimator};
use flowtrail_core::TrackingError;
use nalgebra::Vector2;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, info_span};

/// A single tracked feature.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TrackPoint {
    /// Assigned at detection time and never reused; picks the trail colour.
    pub identity: u64,
    /// Location in the reference frame.
    pub position: Vector2<f32>,
    /// Location one update earlier; equals `position` right after detection.
    pub trail_origin: Vector2<f32>,
}

impl TrackPoint {
    pub fn detected(identity: u64, position: Vector2<f32>) -> Self {
        Self {
            identity,
            position,
            trail_origin: position,
        }
    }

    pub fn segment(&self) -> TrailSegment {
        TrailSegment {
            identity: self.identity,
            from: self.trail_origin,
            to: self.position,
        }
    }
}

/// Active points plus the frame their positions were measured in.
#[derive(Debug, Clone, Default)]
pub struct TrackSet {
    pub points: Vec<TrackPoint>,
    pub reference_frame: Option<GrayImage>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TrackerState {
    /// No reference frame yet, or after an operator reset.
    Empty,
    /// A reference frame is held; the point set may be empty.
    Tracking,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrackerConfig {
    pub detector: DetectorConfig,
    pub estimator: LucasKanadeConfig,
}

/// What a `propagate` call did to the set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PropagateOutcome {
    /// The set was already empty; only the reference frame moved forward.
    Idle,
    Tracked { retained: usize, dropped: usize },
    /// Every point was lost and the set was re-detected on the new frame.
    Reinitialized { dropped: usize, detected: usize },
}

/// Owns the tracked point set, its overlay mask, and identity numbering.
pub struct TrackSetManager<D: FeatureDetector, E: MotionEstimator> {
    detector: D,
    estimator: E,
    config: TrackerConfig,
    set: TrackSet,
    overlay: OverlayMask,
    next_identity: u64,
    generation: u64,
}

impl<D: FeatureDetector, E: MotionEstimator> TrackSetManager<D, E> {
    pub fn new(detector: D, estimator: E, config: TrackerConfig) -> Self {
        Self {
            detector,
            estimator,
            config,
            set: TrackSet::default(),
            overlay: OverlayMask::default(),
            next_identity: 0,
            generation: 0,
        }
    }

    pub fn state(&self) -> TrackerState {
        if self.set.reference_frame.is_some() {
            TrackerState::Tracking
        } else {
            TrackerState::Empty
        }
    }

    pub fn config(&self) -> &TrackerConfig {
        &self.config
    }

    pub fn points(&self) -> &[TrackPoint] {
        &self.set.points
    }

    pub fn track_set(&self) -> &TrackSet {
        &self.set
    }

    pub fn reference_frame(&self) -> Option<&GrayImage> {
        self.set.reference_frame.as_ref()
    }

    pub fn overlay(&self) -> &OverlayMask {
        &self.overlay
    }

    pub fn overlay_mut(&mut self) -> &mut OverlayMask {
        &mut self.overlay
    }

    /// Identity the next detected point will receive.
    pub fn next_identity(&self) -> u64 {
        self.next_identity
    }

    /// Number of detections performed since construction.
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// One trail segment per active point, from the latest update.
    pub fn segments(&self) -> Vec<TrailSegment> {
        self.set.points.iter().map(TrackPoint::segment).collect()
    }

    /// Starts a fresh set with identities numbered from zero.
    pub fn initialize(&mut self, frame: GrayImage) -> usize {
        self.next_identity = 0;
        self.seed(frame)
    }

    /// Replaces the set with a fresh detection, continuing identity numbering.
    pub fn reinitialize(&mut self, frame: GrayImage) -> usize {
        self.seed(frame)
    }

    /// Drops everything and returns to [`TrackerState::Empty`].
    pub fn reset(&mut self) {
        info!(
            dropped = self.set.points.len(),
            "Track set reset by operator"
        );
        self.set = TrackSet::default();
        self.overlay = OverlayMask::default();
    }

    /// Advances every point into `frame` and drops the ones the estimator
    /// could not follow.
    ///
    /// Losing every point triggers a reinitialization on `frame`. An empty set
    /// only adopts `frame` as its new reference.
    pub fn propagate(&mut self, frame: GrayImage) -> Result<PropagateOutcome, TrackingError> {
        let _span = info_span!("propagate", points = self.set.points.len()).entered();

        let reference = self
            .set
            .reference_frame
            .as_ref()
            .ok_or(TrackingError::NotInitialized)?;
        if reference.dimensions() != frame.dimensions() {
            return Err(TrackingError::DimensionMismatch {
                reference: reference.dimensions(),
                incoming: frame.dimensions(),
            });
        }

        if self.set.points.is_empty() {
            self.set.reference_frame = Some(frame);
            return Ok(PropagateOutcome::Idle);
        }

        let positions: Vec<Vector2<f32>> = self.set.points.iter().map(|p| p.position).collect();
        let estimates =
            self.estimator
                .estimate(reference, &frame, &positions, &self.config.estimator)?;
        if estimates.len() != positions.len() {
            return Err(TrackingError::EstimatorContract {
                expected: positions.len(),
                returned: estimates.len(),
            });
        }

        let before = self.set.points.len();
        let survivors: Vec<TrackPoint> = self
            .set
            .points
            .iter()
            .zip(&estimates)
            .filter_map(|(point, estimate)| {
                let usable = estimate.found
                    && estimate.position.x.is_finite()
                    && estimate.position.y.is_finite();
                if !usable {
                    debug!(
                        identity = point.identity,
                        outcome = ?estimate.outcome,
                        "Track dropped"
                    );
                    return None;
                }
                Some(TrackPoint {
                    identity: point.identity,
                    position: estimate.position,
                    trail_origin: point.position,
                })
            })
            .collect();
        let dropped = before - survivors.len();

        if survivors.is_empty() {
            info!(dropped, "All tracks lost, re-detecting");
            let detected = self.reinitialize(frame);
            return Ok(PropagateOutcome::Reinitialized { dropped, detected });
        }

        self.set.points = survivors;
        self.set.reference_frame = Some(frame);

        debug!(retained = self.set.points.len(), dropped, "Propagated track set");
        Ok(PropagateOutcome::Tracked {
            retained: self.set.points.len(),
            dropped,
        })
    }

    /// Runs the detector without touching the set, capped at `max_points`.
    pub fn detect(&self, frame: &GrayImage) -> Vec<Vector2<f32>> {
        let mut detected = self.detector.detect(frame, &self.config.detector);
        detected.truncate(self.config.detector.max_points);
        detected
    }

    fn seed(&mut self, frame: GrayImage) -> usize {
        let detected = self.detect(&frame);

        let first = self.next_identity;
        self.set.points = detected
            .into_iter()
            .map(|position| {
                let point = TrackPoint::detected(self.next_identity, position);
                self.next_identity += 1;
                point
            })
            .collect();

        let (width, height) = frame.dimensions();
        self.overlay.reset(width, height);
        self.set.reference_frame = Some(frame);
        self.generation += 1;

        info!(
            detected = self.set.points.len(),
            first_identity = first,
            generation = self.generation,
            "Seeded track set"
        );
        self.set.points.len()
    }
}
