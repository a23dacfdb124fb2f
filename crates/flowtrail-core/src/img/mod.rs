pub mod image_utils;
pub mod pyramid;

pub use image::{GrayImage, RgbImage};
pub use image_utils::bilinear_sample_luma;
pub use pyramid::{build_pyramid, sobel_gradients, GradientImage, Pyramid, PyramidLevel};

use imageproc::{contrast::equalize_histogram, filter::gaussian_blur_f32};
use serde::{Deserialize, Serialize};

/// Converts a colour frame into the grayscale raster the tracker consumes.
pub fn to_gray(frame: &RgbImage) -> GrayImage {
    image::imageops::grayscale(frame)
}

/// Optional conditioning applied to grayscale frames before tracking.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Preprocess {
    /// Equalize the histogram to stretch contrast.
    pub equalize: bool,
    /// Gaussian smoothing sigma; `None` leaves the frame sharp.
    pub blur_sigma: Option<f32>,
}

impl Preprocess {
    pub fn is_identity(&self) -> bool {
        !self.equalize && self.blur_sigma.map_or(true, |s| s <= 0.0)
    }

    pub fn apply(&self, gray: &GrayImage) -> GrayImage {
        let mut out = if self.equalize {
            equalize_histogram(gray)
        } else {
            gray.clone()
        };
        if let Some(sigma) = self.blur_sigma.filter(|s| *s > 0.0) {
            out = gaussian_blur_f32(&out, sigma);
        }
        out
    }
}
