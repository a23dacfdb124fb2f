use std::cell::Cell;

use approx::assert_relative_eq;
use flowtrail_core::img::{GrayImage, RgbImage};
use flowtrail_core::track::{
    DetectorConfig, FeatureDetector, FlowEstimate, LucasKanadeConfig, MotionEstimator,
    TrackOutcome,
};
use flowtrail_core::TrackingError;
use flowtrail_engine::{
    CapturedFrame, CollectingSink, EngineConfig, EngineError, FrameSource, NoSignals,
    OperatorSignal, PropagateOutcome, ScriptedSignals, SourceError, StepOutcome, Termination,
    TrailEngine, VecSource,
};
use image::Rgb;
use nalgebra::Vector2;
use rand::rngs::SmallRng;
use rand::{Rng, SeedableRng};

const WIDTH: u32 = 160;
const HEIGHT: u32 = 120;

/// Returns the same grid of points on every call.
struct GridDetector {
    count: usize,
}

impl FeatureDetector for GridDetector {
    fn detect(&self, _gray: &GrayImage, _config: &DetectorConfig) -> Vec<Vector2<f32>> {
        (0..self.count)
            .map(|i| Vector2::new(10.0 + (i % 10) as f32 * 12.0, 10.0 + (i / 10) as f32 * 12.0))
            .collect()
    }
}

/// Shifts every point by one pixel and keeps those `keep` accepts.
struct ShiftEstimator<F: Fn(usize, Vector2<f32>) -> bool> {
    keep: F,
    calls: Cell<usize>,
}

impl<F: Fn(usize, Vector2<f32>) -> bool> ShiftEstimator<F> {
    fn new(keep: F) -> Self {
        Self {
            keep,
            calls: Cell::new(0),
        }
    }
}

impl<F: Fn(usize, Vector2<f32>) -> bool> MotionEstimator for ShiftEstimator<F> {
    fn estimate(
        &self,
        prev: &GrayImage,
        next: &GrayImage,
        points: &[Vector2<f32>],
        _config: &LucasKanadeConfig,
    ) -> Result<Vec<FlowEstimate>, TrackingError> {
        if prev.dimensions() != next.dimensions() {
            return Err(TrackingError::DimensionMismatch {
                reference: prev.dimensions(),
                incoming: next.dimensions(),
            });
        }
        let call = self.calls.get();
        self.calls.set(call + 1);
        Ok(points
            .iter()
            .map(|&p| {
                let found = (self.keep)(call, p);
                FlowEstimate {
                    position: p + Vector2::new(1.0, 0.0),
                    found,
                    outcome: if found {
                        TrackOutcome::Converged
                    } else {
                        TrackOutcome::Diverged
                    },
                    residual: 0.0,
                    iterations: 1,
                    fb_error: None,
                }
            })
            .collect())
    }
}

fn plain_frame(value: u8) -> RgbImage {
    RgbImage::from_pixel(WIDTH, HEIGHT, Rgb([value, value, value]))
}

fn identities(points: &[flowtrail_engine::TrackPoint]) -> Vec<u64> {
    points.iter().map(|p| p.identity).collect()
}

#[test]
fn first_frame_initializes_with_zero_length_trails() {
    let mut engine = TrailEngine::with_components(
        GridDetector { count: 3 },
        ShiftEstimator::new(|_, _| true),
        EngineConfig::default(),
    )
    .unwrap();

    let report = engine.process_one_frame(&plain_frame(10)).unwrap();
    assert_eq!(report.frame_index, 0);
    assert_eq!(report.outcome, StepOutcome::Initialized { detected: 3 });
    assert_eq!(identities(&report.points), vec![0, 1, 2]);
    assert!(report.segments.iter().all(|s| s.from == s.to));
    assert!(engine.manager().overlay().is_empty());
}

#[test]
fn trails_accumulate_until_total_loss() {
    // Every point is lost on the third propagation.
    let mut engine = TrailEngine::with_components(
        GridDetector { count: 3 },
        ShiftEstimator::new(|call, _| call != 2),
        EngineConfig::default(),
    )
    .unwrap();

    engine.process_one_frame(&plain_frame(10)).unwrap();
    for _ in 0..2 {
        let report = engine.process_one_frame(&plain_frame(10)).unwrap();
        assert_eq!(
            report.outcome,
            StepOutcome::Propagated {
                result: PropagateOutcome::Tracked {
                    retained: 3,
                    dropped: 0
                }
            }
        );
    }
    assert!(!engine.manager().overlay().is_empty());

    let report = engine.process_one_frame(&plain_frame(10)).unwrap();
    assert_eq!(
        report.outcome,
        StepOutcome::Propagated {
            result: PropagateOutcome::Reinitialized {
                dropped: 3,
                detected: 3
            }
        }
    );
    assert_eq!(identities(&report.points), vec![3, 4, 5]);
    assert!(report.points.iter().all(|p| p.trail_origin == p.position));
    assert!(engine.manager().overlay().is_empty());
    assert_eq!(engine.reinitializations(), 1);
}

#[test]
fn operator_reinitialize_discards_fifty_points() {
    let mut engine = TrailEngine::with_components(
        GridDetector { count: 50 },
        ShiftEstimator::new(|_, _| true),
        EngineConfig::default(),
    )
    .unwrap();

    engine.process_one_frame(&plain_frame(10)).unwrap();
    engine.process_one_frame(&plain_frame(20)).unwrap();
    assert_eq!(engine.manager().points().len(), 50);
    assert!(!engine.manager().overlay().is_empty());
    let before = identities(engine.manager().points());

    engine.apply_signal(OperatorSignal::Reinitialize);

    let points = engine.manager().points();
    assert_eq!(points.len(), 50);
    assert!(identities(points).iter().all(|id| !before.contains(id)));
    assert_eq!(identities(points)[0], 50);
    assert!(points.iter().all(|p| p.trail_origin == p.position));
    assert!(engine.manager().overlay().is_empty());
    // Detection ran on the frame that was current when the signal arrived.
    let reference = engine.manager().reference_frame().unwrap();
    assert_eq!(reference.get_pixel(0, 0).0[0], 20);
}

#[test]
fn propagation_is_monotone_and_identities_are_stable() {
    let mut rng = SmallRng::seed_from_u64(7);
    let drops: Vec<Vec<bool>> = (0..12)
        .map(|_| (0..40).map(|_| rng.gen_bool(0.9)).collect())
        .collect();
    let mut engine = TrailEngine::with_components(
        GridDetector { count: 40 },
        ShiftEstimator::new(move |call, p| {
            let slot = ((p.y - 10.0) / 12.0).round() as usize * 10 + ((p.x as usize) % 10);
            drops[call % drops.len()][slot % 40]
        }),
        EngineConfig::default(),
    )
    .unwrap();

    let mut previous = engine.process_one_frame(&plain_frame(10)).unwrap().points;
    for _ in 0..12 {
        let report = engine.process_one_frame(&plain_frame(10)).unwrap();
        if let StepOutcome::Propagated {
            result: PropagateOutcome::Tracked { retained, dropped },
        } = report.outcome
        {
            assert_eq!(retained + dropped, previous.len());
            assert!(report.points.len() <= previous.len());
            for point in &report.points {
                let before = previous
                    .iter()
                    .find(|p| p.identity == point.identity)
                    .expect("identity not present in the previous set");
                assert_eq!(point.trail_origin, before.position);
                assert_relative_eq!(point.position.x, before.position.x + 1.0);
            }
        }
        previous = report.points;
    }
}

#[test]
fn detection_never_exceeds_max_points() {
    let config = EngineConfig {
        tracker: flowtrail_engine::TrackerConfig {
            detector: DetectorConfig {
                max_points: 7,
                ..DetectorConfig::default()
            },
            ..Default::default()
        },
        ..EngineConfig::default()
    };
    let mut engine = TrailEngine::with_components(
        GridDetector { count: 30 },
        ShiftEstimator::new(|_, _| false),
        config,
    )
    .unwrap();

    for _ in 0..4 {
        let report = engine.process_one_frame(&plain_frame(10)).unwrap();
        assert!(report.points.len() <= 7);
    }
    engine.apply_signal(OperatorSignal::Reinitialize);
    assert_eq!(engine.manager().points().len(), 7);
}

#[test]
fn empty_tracking_set_stays_empty_without_error() {
    let mut engine = TrailEngine::with_components(
        GridDetector { count: 0 },
        ShiftEstimator::new(|_, _| true),
        EngineConfig::default(),
    )
    .unwrap();

    engine.process_one_frame(&plain_frame(1)).unwrap();
    for value in 2..6 {
        let report = engine.process_one_frame(&plain_frame(value)).unwrap();
        assert_eq!(
            report.outcome,
            StepOutcome::Propagated {
                result: PropagateOutcome::Idle
            }
        );
        assert!(report.points.is_empty());
        assert_eq!(
            engine.manager().reference_frame().unwrap().get_pixel(3, 3).0[0],
            value
        );
    }
}

#[test]
fn dimension_change_aborts_the_run() {
    let mut engine = TrailEngine::with_components(
        GridDetector { count: 3 },
        ShiftEstimator::new(|_, _| true),
        EngineConfig::default(),
    )
    .unwrap();
    let mut source = VecSource::new([plain_frame(1), RgbImage::new(80, 60)]);
    let mut sink = CollectingSink::default();

    let err = engine
        .run(&mut source, &mut NoSignals, &mut sink)
        .unwrap_err();
    assert!(matches!(
        err,
        EngineError::Tracking(TrackingError::DimensionMismatch { .. })
    ));
    assert_eq!(sink.reports.len(), 1);
}

#[test]
fn empty_frames_are_rejected() {
    let mut engine = TrailEngine::new(EngineConfig::default()).unwrap();
    let err = engine.process_one_frame(&RgbImage::new(0, 0)).unwrap_err();
    assert!(matches!(
        err,
        EngineError::Tracking(TrackingError::EmptyFrame { .. })
    ));
}

#[test]
fn invalid_config_is_rejected() {
    let mut config = EngineConfig::default();
    config.tracker.estimator.window_size = 4;
    assert!(matches!(
        TrailEngine::new(config),
        Err(EngineError::Config(_))
    ));
}

#[test]
fn run_stops_at_end_of_stream() {
    let mut engine = TrailEngine::with_components(
        GridDetector { count: 3 },
        ShiftEstimator::new(|_, _| true),
        EngineConfig::default(),
    )
    .unwrap();
    let mut source = VecSource::new((0..5).map(|_| plain_frame(10)));
    let mut sink = CollectingSink::default();

    let summary = engine.run(&mut source, &mut NoSignals, &mut sink).unwrap();
    assert_eq!(summary.termination, Termination::EndOfStream);
    assert_eq!(summary.frames_processed, 5);
    assert_eq!(summary.frame_stats.len(), 5);
    assert_eq!(summary.reinitializations, 0);
    assert_eq!(sink.reports.len(), 5);
    assert_relative_eq!(summary.average_points(), 3.0);
}

#[test]
fn scripted_signals_reinitialize_then_quit() {
    let mut engine = TrailEngine::with_components(
        GridDetector { count: 3 },
        ShiftEstimator::new(|_, _| true),
        EngineConfig::default(),
    )
    .unwrap();
    let mut source = VecSource::new((0..10).map(|_| plain_frame(10)));
    let mut signals = ScriptedSignals::new()
        .with(1, OperatorSignal::Reinitialize)
        .with(3, OperatorSignal::Quit);
    let mut sink = CollectingSink::default();

    let summary = engine.run(&mut source, &mut signals, &mut sink).unwrap();
    assert_eq!(summary.termination, Termination::Quit);
    assert_eq!(summary.frames_processed, 4);
    assert_eq!(summary.reinitializations, 1);
    // Frame 2 propagates the set seeded by the reinitialization after frame 1.
    assert_eq!(identities(&sink.reports[2].points), vec![3, 4, 5]);
}

#[test]
fn reset_signal_restarts_from_empty() {
    let mut engine = TrailEngine::with_components(
        GridDetector { count: 3 },
        ShiftEstimator::new(|_, _| true),
        EngineConfig::default(),
    )
    .unwrap();
    let mut source = VecSource::new((0..4).map(|_| plain_frame(10)));
    let mut signals = ScriptedSignals::new().with(1, OperatorSignal::Reset);
    let mut sink = CollectingSink::default();

    engine.run(&mut source, &mut signals, &mut sink).unwrap();
    assert_eq!(
        sink.reports[2].outcome,
        StepOutcome::Initialized { detected: 3 }
    );
    assert_eq!(identities(&sink.reports[2].points), vec![0, 1, 2]);
}

#[test]
fn reinitialize_before_first_frame_is_deferred() {
    let mut engine = TrailEngine::with_components(
        GridDetector { count: 3 },
        ShiftEstimator::new(|_, _| true),
        EngineConfig::default(),
    )
    .unwrap();
    engine.apply_signal(OperatorSignal::Reinitialize);
    assert!(engine.manager().points().is_empty());

    let report = engine.process_one_frame(&plain_frame(1)).unwrap();
    assert_eq!(report.outcome, StepOutcome::Initialized { detected: 3 });
}

/// Reports every point as found where it already was.
struct StillEstimator;

impl MotionEstimator for StillEstimator {
    fn estimate(
        &self,
        _prev: &GrayImage,
        _next: &GrayImage,
        points: &[Vector2<f32>],
        _config: &LucasKanadeConfig,
    ) -> Result<Vec<FlowEstimate>, TrackingError> {
        Ok(points
            .iter()
            .map(|&position| FlowEstimate {
                position,
                found: true,
                outcome: TrackOutcome::Converged,
                residual: 0.0,
                iterations: 1,
                fb_error: None,
            })
            .collect())
    }
}

#[test]
fn stationary_survivors_mark_the_mask() {
    let mut engine = TrailEngine::with_components(
        GridDetector { count: 1 },
        StillEstimator,
        EngineConfig::default(),
    )
    .unwrap();

    engine.process_one_frame(&plain_frame(10)).unwrap();
    assert!(engine.manager().overlay().is_empty());

    let report = engine.process_one_frame(&plain_frame(10)).unwrap();
    assert_eq!(report.segments[0].from, report.segments[0].to);
    let mask = engine.manager().overlay();
    assert!(!mask.is_empty());
    assert_eq!(
        *mask.image().get_pixel(10, 10),
        flowtrail_core::overlay::color_for_identity(0)
    );

    engine.apply_signal(OperatorSignal::Reinitialize);
    assert!(engine.manager().overlay().is_empty());
}

#[test]
fn run_keeps_only_the_latest_frame_stats() {
    let config = EngineConfig {
        frame_stats_limit: 3,
        ..EngineConfig::default()
    };
    let mut engine =
        TrailEngine::with_components(GridDetector { count: 3 }, StillEstimator, config).unwrap();
    let mut source = VecSource::new((0..8).map(|_| plain_frame(10)));
    let mut sink = CollectingSink::default();

    let summary = engine.run(&mut source, &mut NoSignals, &mut sink).unwrap();
    assert_eq!(summary.frames_processed, 8);
    assert_eq!(summary.frame_stats_dropped, 5);
    let kept: Vec<u64> = summary.frame_stats.iter().map(|s| s.frame_index).collect();
    assert_eq!(kept, vec![5, 6, 7]);
}

struct FailingSource {
    remaining: usize,
}

impl FrameSource for FailingSource {
    fn next_frame(&mut self) -> Result<Option<CapturedFrame>, SourceError> {
        if self.remaining == 0 {
            return Err(SourceError::Device("camera unplugged".into()));
        }
        self.remaining -= 1;
        Ok(Some(CapturedFrame {
            index: 0,
            image: plain_frame(10),
        }))
    }
}

#[test]
fn source_failure_ends_the_run_cleanly() {
    let mut engine = TrailEngine::with_components(
        GridDetector { count: 3 },
        ShiftEstimator::new(|_, _| true),
        EngineConfig::default(),
    )
    .unwrap();
    let mut sink = CollectingSink::default();

    let summary = engine
        .run(&mut FailingSource { remaining: 2 }, &mut NoSignals, &mut sink)
        .unwrap();
    assert_eq!(summary.termination, Termination::SourceFailed);
    assert_eq!(summary.frames_processed, 2);
}

/// Smooth random texture: bilinear interpolation over a coarse random grid.
struct Texture {
    cell: f32,
    cols: usize,
    values: Vec<f32>,
}

impl Texture {
    fn new(seed: u64) -> Self {
        let mut rng = SmallRng::seed_from_u64(seed);
        let cols = 64;
        let values = (0..cols * cols).map(|_| rng.gen_range(20.0..235.0)).collect();
        Self {
            cell: 7.0,
            cols,
            values,
        }
    }

    fn sample(&self, x: f32, y: f32) -> f32 {
        // Offset keeps shifted lookups inside the grid.
        let u = x / self.cell + 4.0;
        let v = y / self.cell + 4.0;
        let (i, j) = (u.floor() as usize, v.floor() as usize);
        let (fx, fy) = (u - u.floor(), v - v.floor());
        let at = |c: usize, r: usize| self.values[r.min(self.cols - 1) * self.cols + c.min(self.cols - 1)];
        let top = at(i, j) * (1.0 - fx) + at(i + 1, j) * fx;
        let bottom = at(i, j + 1) * (1.0 - fx) + at(i + 1, j + 1) * fx;
        top * (1.0 - fy) + bottom * fy
    }

    fn frame(&self, shift: Vector2<f32>) -> RgbImage {
        RgbImage::from_fn(WIDTH, HEIGHT, |x, y| {
            let v = self.sample(x as f32 - shift.x, y as f32 - shift.y).round() as u8;
            Rgb([v, v, v])
        })
    }
}

#[test]
fn real_pipeline_follows_a_translating_texture() {
    let texture = Texture::new(42);
    let step = Vector2::new(1.5f32, 0.75);
    let mut engine = TrailEngine::new(EngineConfig::default()).unwrap();

    let first = engine.process_one_frame(&texture.frame(Vector2::zeros())).unwrap();
    let detected = first.points.len();
    assert!(detected >= 20, "only {detected} corners detected");

    let mut report = first;
    for k in 1..=3 {
        report = engine
            .process_one_frame(&texture.frame(step * k as f32))
            .unwrap();
        assert!(!report.outcome.is_implicit_reinit());
    }

    assert!(report.points.len() * 2 >= detected);
    let mut dx: Vec<f32> = report
        .points
        .iter()
        .map(|p| p.position.x - p.trail_origin.x)
        .collect();
    let mut dy: Vec<f32> = report
        .points
        .iter()
        .map(|p| p.position.y - p.trail_origin.y)
        .collect();
    dx.sort_by(|a, b| a.total_cmp(b));
    dy.sort_by(|a, b| a.total_cmp(b));
    assert_relative_eq!(dx[dx.len() / 2], step.x, epsilon = 0.3);
    assert_relative_eq!(dy[dy.len() / 2], step.y, epsilon = 0.3);
    assert!(!engine.manager().overlay().is_empty());
}
