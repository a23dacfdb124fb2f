use crate::errors::{ConfigError, Result, TrackingError};
use crate::img::image_utils::bilinear_sample_luma;
use crate::img::pyramid::{build_pyramid, Pyramid, PyramidLevel};
use crate::track::health::TrackHealth;
use image::GrayImage;
use nalgebra::Vector2;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use tracing::{debug, debug_span};

/// Squared intensity range, used to express the eigenvalue threshold on a
/// `[0, 1]` intensity scale.
const INTENSITY_RANGE_SQ: f32 = 255.0 * 255.0;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LucasKanadeConfig {
    /// Side length of the square search window, odd.
    pub window_size: usize,
    /// Index of the coarsest pyramid level; 0 tracks at full resolution only.
    pub max_level: usize,
    /// Iteration cap per pyramid level.
    pub max_iterations: usize,
    /// Stop refining once an update moves less than this (pixels).
    pub epsilon: f32,
    /// Minimum normalised eigenvalue of the spatial gradient matrix.
    pub min_eigen_threshold: f32,
    /// Reject estimates whose back-tracked position misses the origin by more
    /// than this many pixels. Disabled when `None`.
    pub max_forward_backward_error: Option<f32>,
}

impl Default for LucasKanadeConfig {
    fn default() -> Self {
        Self {
            window_size: 15,
            max_level: 2,
            max_iterations: 10,
            epsilon: 0.03,
            min_eigen_threshold: 1e-4,
            max_forward_backward_error: None,
        }
    }
}

impl LucasKanadeConfig {
    pub fn validate(&self) -> std::result::Result<(), ConfigError> {
        if self.window_size < 3 || self.window_size % 2 == 0 {
            return Err(ConfigError::Estimator(format!(
                "window_size must be odd and at least 3, got {}",
                self.window_size
            )));
        }
        if self.max_iterations == 0 {
            return Err(ConfigError::Estimator(
                "max_iterations must be at least 1".into(),
            ));
        }
        if !(self.epsilon > 0.0) {
            return Err(ConfigError::Estimator(format!(
                "epsilon must be positive, got {}",
                self.epsilon
            )));
        }
        if let Some(fb) = self.max_forward_backward_error {
            if !(fb > 0.0) {
                return Err(ConfigError::Estimator(format!(
                    "max_forward_backward_error must be positive, got {fb}"
                )));
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TrackOutcome {
    Converged,
    /// Gradient matrix too weak to solve, or the estimate is not finite.
    Diverged,
    /// The point left the image.
    OutOfBounds,
    /// Forward-backward round trip missed the origin.
    Inconsistent,
}

/// Per-point result of a motion estimate.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FlowEstimate {
    /// Estimated location in the next frame.
    pub position: Vector2<f32>,
    /// Confidence flag: `true` only for converged, in-bounds estimates.
    pub found: bool,
    pub outcome: TrackOutcome,
    /// Mean absolute intensity difference over the window at full resolution.
    pub residual: f32,
    /// Total refinement iterations across all levels.
    pub iterations: u32,
    /// Round-trip error, when the forward-backward check ran.
    pub fb_error: Option<f32>,
}

impl FlowEstimate {
    fn lost(position: Vector2<f32>, outcome: TrackOutcome, iterations: u32) -> Self {
        Self {
            position,
            found: false,
            outcome,
            residual: 0.0,
            iterations,
            fb_error: None,
        }
    }
}

/// Estimates where points of one grayscale frame moved to in the next.
///
/// Implementations return exactly one estimate per input point, in input
/// order. Only contract violations (mismatched frames) are errors.
pub trait MotionEstimator {
    fn estimate(
        &self,
        prev: &GrayImage,
        next: &GrayImage,
        points: &[Vector2<f32>],
        config: &LucasKanadeConfig,
    ) -> Result<Vec<FlowEstimate>>;
}

impl<E: MotionEstimator + ?Sized> MotionEstimator for &E {
    fn estimate(
        &self,
        prev: &GrayImage,
        next: &GrayImage,
        points: &[Vector2<f32>],
        config: &LucasKanadeConfig,
    ) -> Result<Vec<FlowEstimate>> {
        (**self).estimate(prev, next, points, config)
    }
}

impl<E: MotionEstimator + ?Sized> MotionEstimator for Box<E> {
    fn estimate(
        &self,
        prev: &GrayImage,
        next: &GrayImage,
        points: &[Vector2<f32>],
        config: &LucasKanadeConfig,
    ) -> Result<Vec<FlowEstimate>> {
        (**self).estimate(prev, next, points, config)
    }
}

/// Coarse-to-fine iterative Lucas-Kanade over Gaussian pyramids.
#[derive(Debug, Clone, Default)]
pub struct PyramidalLucasKanade;

impl PyramidalLucasKanade {
    pub fn new() -> Self {
        Self
    }

    /// Tracks one point through both pyramids, coarsest level first.
    ///
    /// A weak gradient matrix or an out-of-image point on a coarse level only
    /// skips that level; the same condition at full resolution loses the point.
    pub fn track_point(
        &self,
        prev_pyr: &Pyramid,
        next_pyr: &Pyramid,
        point: Vector2<f32>,
        config: &LucasKanadeConfig,
    ) -> FlowEstimate {
        let levels = prev_pyr.len().min(next_pyr.len());
        if levels == 0 || !point.x.is_finite() || !point.y.is_finite() {
            return FlowEstimate::lost(point, TrackOutcome::Diverged, 0);
        }

        let mut flow = Vector2::<f32>::zeros();
        let mut iterations = 0u32;
        let mut residual = 0.0f32;

        for lvl in (0..levels).rev() {
            let prev_level = &prev_pyr.levels()[lvl];
            let next_level = &next_pyr.levels()[lvl];

            match self.track_level(prev_level, next_level, point, flow, config) {
                LevelResult::Refined {
                    delta,
                    iterations: iters,
                    residual: level_residual,
                } => {
                    flow += delta;
                    iterations += iters;
                    residual = level_residual;
                }
                LevelResult::Failed { outcome, iterations: iters } => {
                    iterations += iters;
                    if lvl == 0 {
                        return FlowEstimate::lost(point + flow, outcome, iterations);
                    }
                }
            }

            if lvl > 0 {
                flow *= 2.0;
            }
        }

        let position = point + flow;
        if !position.x.is_finite() || !position.y.is_finite() {
            return FlowEstimate::lost(point, TrackOutcome::Diverged, iterations);
        }
        if !next_pyr.levels()[0].contains(position.x, position.y) {
            return FlowEstimate::lost(position, TrackOutcome::OutOfBounds, iterations);
        }

        FlowEstimate {
            position,
            found: true,
            outcome: TrackOutcome::Converged,
            residual,
            iterations,
            fb_error: None,
        }
    }

    /// Gauss-Newton refinement of the displacement on a single level.
    ///
    /// `flow` is the displacement carried down from coarser levels, already in
    /// this level's units. Returns the additional displacement.
    fn track_level(
        &self,
        prev_level: &PyramidLevel,
        next_level: &PyramidLevel,
        point: Vector2<f32>,
        flow: Vector2<f32>,
        config: &LucasKanadeConfig,
    ) -> LevelResult {
        let origin = Vector2::new(prev_level.to_level(point.x), prev_level.to_level(point.y));
        if !prev_level.contains(origin.x, origin.y) {
            return LevelResult::Failed {
                outcome: TrackOutcome::OutOfBounds,
                iterations: 0,
            };
        }

        let radius = (config.window_size / 2) as i32;

        // Template intensities and gradients at the origin, sampled once.
        let mut template: Vec<(Vector2<f32>, f32, f32, f32)> =
            Vec::with_capacity(((2 * radius + 1) * (2 * radius + 1)) as usize);
        let mut g11 = 0.0f32;
        let mut g12 = 0.0f32;
        let mut g22 = 0.0f32;
        for dy in -radius..=radius {
            for dx in -radius..=radius {
                let offset = Vector2::new(dx as f32, dy as f32);
                let sample = origin + offset;
                let intensity = bilinear_sample_luma(&prev_level.image, sample.x, sample.y);
                let gx = bilinear_sample_luma(&prev_level.grad_x, sample.x, sample.y);
                let gy = bilinear_sample_luma(&prev_level.grad_y, sample.x, sample.y);
                g11 += gx * gx;
                g12 += gx * gy;
                g22 += gy * gy;
                template.push((offset, intensity, gx, gy));
            }
        }

        let area = template.len() as f32;
        let min_eig = (g11 + g22 - ((g11 - g22) * (g11 - g22) + 4.0 * g12 * g12).sqrt())
            / (2.0 * area * INTENSITY_RANGE_SQ);
        let determinant = g11 * g22 - g12 * g12;
        if min_eig < config.min_eigen_threshold || determinant < f32::EPSILON {
            return LevelResult::Failed {
                outcome: TrackOutcome::Diverged,
                iterations: 0,
            };
        }
        let inv_det = 1.0 / determinant;

        let epsilon_sq = config.epsilon * config.epsilon;
        let mut delta_total = Vector2::<f32>::zeros();
        let mut iterations = 0u32;
        let mut residual = 0.0f32;

        while (iterations as usize) < config.max_iterations {
            let target = origin + flow + delta_total;
            if !next_level.contains(target.x, target.y) {
                return LevelResult::Failed {
                    outcome: TrackOutcome::OutOfBounds,
                    iterations,
                };
            }
            iterations += 1;

            // b = Σ ∇T · (T - I), the steepest-descent image.
            let mut bx = 0.0f32;
            let mut by = 0.0f32;
            let mut abs_error = 0.0f32;
            for &(offset, intensity, gx, gy) in &template {
                let sample = target + offset;
                let error =
                    intensity - bilinear_sample_luma(&next_level.image, sample.x, sample.y);
                bx += gx * error;
                by += gy * error;
                abs_error += error.abs();
            }
            residual = abs_error / area;

            let step = Vector2::new(
                (g22 * bx - g12 * by) * inv_det,
                (g11 * by - g12 * bx) * inv_det,
            );
            if !step.x.is_finite() || !step.y.is_finite() {
                return LevelResult::Failed {
                    outcome: TrackOutcome::Diverged,
                    iterations,
                };
            }
            delta_total += step;

            if step.norm_squared() <= epsilon_sq {
                break;
            }
        }

        LevelResult::Refined {
            delta: delta_total,
            iterations,
            residual,
        }
    }
}

enum LevelResult {
    Refined {
        delta: Vector2<f32>,
        iterations: u32,
        residual: f32,
    },
    Failed {
        outcome: TrackOutcome,
        iterations: u32,
    },
}

impl MotionEstimator for PyramidalLucasKanade {
    fn estimate(
        &self,
        prev: &GrayImage,
        next: &GrayImage,
        points: &[Vector2<f32>],
        config: &LucasKanadeConfig,
    ) -> Result<Vec<FlowEstimate>> {
        let _span = debug_span!("lk_estimate", points = points.len()).entered();

        if prev.dimensions() != next.dimensions() {
            return Err(TrackingError::DimensionMismatch {
                reference: prev.dimensions(),
                incoming: next.dimensions(),
            });
        }
        let (width, height) = prev.dimensions();
        if width == 0 || height == 0 {
            return Err(TrackingError::EmptyFrame { width, height });
        }
        if points.is_empty() {
            return Ok(Vec::new());
        }

        let octaves = config.max_level + 1;
        let prev_pyr = build_pyramid(prev, octaves);
        let next_pyr = build_pyramid(next, octaves);

        let mut estimates: Vec<FlowEstimate> = points
            .par_iter()
            .map(|&p| self.track_point(&prev_pyr, &next_pyr, p, config))
            .collect();

        if let Some(max_fb) = config.max_forward_backward_error {
            estimates
                .par_iter_mut()
                .zip(points.par_iter())
                .filter(|(est, _)| est.found)
                .for_each(|(est, &origin)| {
                    let back = self.track_point(&next_pyr, &prev_pyr, est.position, config);
                    let health = TrackHealth::evaluate(
                        origin,
                        est.position,
                        back.found.then_some(back.position),
                        max_fb,
                    );
                    est.fb_error = health.metrics.backward_error;
                    if !health.valid {
                        est.found = false;
                        est.outcome = TrackOutcome::Inconsistent;
                    }
                });
        }

        let found = estimates.iter().filter(|e| e.found).count();
        debug!(
            found,
            lost = estimates.len() - found,
            "Estimated flow for {} points",
            estimates.len()
        );

        Ok(estimates)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Luma;

    /// Smooth, aperiodic-looking texture, sampled with a sub-pixel shift.
    fn texture(width: u32, height: u32, shift: Vector2<f32>) -> GrayImage {
        GrayImage::from_fn(width, height, |x, y| {
            let x = x as f32 - shift.x;
            let y = y as f32 - shift.y;
            let v = 128.0
                + 40.0 * (0.21 * x).sin()
                + 35.0 * (0.19 * y).cos()
                + 25.0 * (0.12 * (x + y)).sin()
                + 15.0 * (0.08 * (x - 2.0 * y)).cos();
            Luma([v.clamp(0.0, 255.0) as u8])
        })
    }

    #[test]
    fn recovers_translation() {
        let shift = Vector2::new(3.5, -2.25);
        let prev = texture(120, 100, Vector2::zeros());
        let next = texture(120, 100, shift);
        let points = vec![Vector2::new(40.0, 40.0), Vector2::new(70.0, 55.0)];

        let estimates = PyramidalLucasKanade::new()
            .estimate(&prev, &next, &points, &LucasKanadeConfig::default())
            .unwrap();

        assert_eq!(estimates.len(), points.len());
        for (est, p) in estimates.iter().zip(&points) {
            assert!(est.found, "lost point {p:?}: {est:?}");
            assert_eq!(est.outcome, TrackOutcome::Converged);
            let err = (est.position - (p + shift)).norm();
            assert!(err < 0.25, "error {err} for {p:?}");
        }
    }

    #[test]
    fn identical_frames_keep_points_in_place() {
        let frame = texture(80, 80, Vector2::zeros());
        let points = vec![Vector2::new(30.0, 30.0)];
        let estimates = PyramidalLucasKanade::new()
            .estimate(&frame, &frame, &points, &LucasKanadeConfig::default())
            .unwrap();
        assert!(estimates[0].found);
        assert!((estimates[0].position - points[0]).norm() < 0.05);
    }

    #[test]
    fn flat_region_is_not_found() {
        let flat = GrayImage::from_pixel(64, 64, Luma([90]));
        let estimates = PyramidalLucasKanade::new()
            .estimate(&flat, &flat, &[Vector2::new(32.0, 32.0)], &LucasKanadeConfig::default())
            .unwrap();
        assert!(!estimates[0].found);
        assert_eq!(estimates[0].outcome, TrackOutcome::Diverged);
    }

    #[test]
    fn point_outside_image_is_not_found() {
        let frame = texture(64, 64, Vector2::zeros());
        let estimates = PyramidalLucasKanade::new()
            .estimate(&frame, &frame, &[Vector2::new(-5.0, 10.0)], &LucasKanadeConfig::default())
            .unwrap();
        assert!(!estimates[0].found);
        assert_eq!(estimates[0].outcome, TrackOutcome::OutOfBounds);
    }

    #[test]
    fn dimension_mismatch_is_an_error() {
        let a = texture(64, 64, Vector2::zeros());
        let b = texture(64, 48, Vector2::zeros());
        let err = PyramidalLucasKanade::new()
            .estimate(&a, &b, &[Vector2::new(10.0, 10.0)], &LucasKanadeConfig::default())
            .unwrap_err();
        assert_eq!(
            err,
            TrackingError::DimensionMismatch {
                reference: (64, 64),
                incoming: (64, 48)
            }
        );
    }

    #[test]
    fn forward_backward_check_keeps_consistent_tracks() {
        let shift = Vector2::new(1.5, 1.0);
        let prev = texture(100, 100, Vector2::zeros());
        let next = texture(100, 100, shift);
        let config = LucasKanadeConfig {
            max_forward_backward_error: Some(0.5),
            ..LucasKanadeConfig::default()
        };
        let estimates = PyramidalLucasKanade::new()
            .estimate(&prev, &next, &[Vector2::new(50.0, 50.0)], &config)
            .unwrap();
        assert!(estimates[0].found);
        assert!(estimates[0].fb_error.unwrap() < 0.5);
    }

    #[test]
    fn config_validation_rejects_even_window() {
        let config = LucasKanadeConfig {
            window_size: 14,
            ..LucasKanadeConfig::default()
        };
        assert!(config.validate().is_err());
        assert!(LucasKanadeConfig::default().validate().is_ok());
    }
}
