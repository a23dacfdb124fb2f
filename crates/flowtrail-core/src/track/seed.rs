use image::GrayImage;
use nalgebra::Vector2;
use serde::{Deserialize, Serialize};

use crate::errors::ConfigError;

pub mod shi_tom_seed;
pub use shi_tom_seed::ShiTomasiDetector;

pub mod utils;

/// Parameters handed to a [`FeatureDetector`] on every call.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DetectorConfig {
    /// Upper bound on the number of returned points.
    pub max_points: usize,
    /// Minimum corner strength relative to the strongest corner, in `(0, 1]`.
    pub quality_threshold: f32,
    /// Minimum pixel distance between two returned points.
    pub min_separation: f32,
    /// Side of the square neighbourhood used to accumulate the structure tensor.
    pub block_size: usize,
}

impl Default for DetectorConfig {
    fn default() -> Self {
        Self {
            max_points: 200,
            quality_threshold: 0.01,
            min_separation: 7.0,
            block_size: 7,
        }
    }
}

impl DetectorConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_points == 0 {
            return Err(ConfigError::Detector("max_points must be at least 1".into()));
        }
        if !(self.quality_threshold > 0.0 && self.quality_threshold <= 1.0) {
            return Err(ConfigError::Detector(format!(
                "quality_threshold must be in (0, 1], got {}",
                self.quality_threshold
            )));
        }
        if !(self.min_separation >= 0.0) {
            return Err(ConfigError::Detector(format!(
                "min_separation must be non-negative, got {}",
                self.min_separation
            )));
        }
        if self.block_size < 3 {
            return Err(ConfigError::Detector(format!(
                "block_size must be at least 3, got {}",
                self.block_size
            )));
        }
        Ok(())
    }
}

/// A scored corner candidate.
#[derive(Debug, Clone, Copy)]
pub struct FeatureSeed {
    pub position: Vector2<f32>,
    pub score: f32,
}

/// Selects visually distinctive points in a grayscale raster.
///
/// Returned points carry no ordering guarantee.
pub trait FeatureDetector {
    fn detect(&self, gray: &GrayImage, config: &DetectorConfig) -> Vec<Vector2<f32>>;
}

impl<D: FeatureDetector + ?Sized> FeatureDetector for &D {
    fn detect(&self, gray: &GrayImage, config: &DetectorConfig) -> Vec<Vector2<f32>> {
        (**self).detect(gray, config)
    }
}

impl<D: FeatureDetector + ?Sized> FeatureDetector for Box<D> {
    fn detect(&self, gray: &GrayImage, config: &DetectorConfig) -> Vec<Vector2<f32>> {
        (**self).detect(gray, config)
    }
}
