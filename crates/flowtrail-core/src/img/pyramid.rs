use image::{
    imageops::{resize, FilterType},
    GrayImage, ImageBuffer, Luma,
};
use imageproc::{
    filter::gaussian_blur_f32,
    gradients::{horizontal_sobel, vertical_sobel},
};

use log::{debug, trace};

/// Single-channel f32 buffer used for gradients.
pub type GradientImage = ImageBuffer<Luma<f32>, Vec<f32>>;

/// Sobel responses are eight times the per-pixel derivative.
const SOBEL_NORMALIZATION: f32 = 1.0 / 8.0;

#[derive(Debug, Clone)]
pub struct PyramidLevel {
    pub octave: usize,
    pub scale: f32,
    pub image: GrayImage,
    pub grad_x: GradientImage,
    pub grad_y: GradientImage,
}

impl PyramidLevel {
    pub fn width(&self) -> u32 {
        self.image.width()
    }

    pub fn height(&self) -> u32 {
        self.image.height()
    }

    /// Maps a full-resolution pixel coordinate onto this level.
    ///
    /// Pixel centres sit on integer coordinates, and halving with a centred
    /// filter shifts them by half a pixel per octave.
    pub fn to_level(&self, coord: f32) -> f32 {
        (coord + 0.5) * self.scale - 0.5
    }

    /// Inverse of [`PyramidLevel::to_level`].
    pub fn from_level(&self, coord: f32) -> f32 {
        (coord + 0.5) / self.scale - 0.5
    }

    pub fn contains(&self, x: f32, y: f32) -> bool {
        x >= 0.0
            && y >= 0.0
            && x <= (self.width() - 1) as f32
            && y <= (self.height() - 1) as f32
    }
}

#[derive(Debug, Clone)]
pub struct Pyramid {
    levels: Vec<PyramidLevel>,
}

impl Pyramid {
    pub fn levels(&self) -> &[PyramidLevel] {
        &self.levels
    }

    pub fn len(&self) -> usize {
        self.levels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.levels.is_empty()
    }
}

/// Builds a pyramid with at most `octaves` levels.
///
/// Level 0 keeps the input untouched so coordinates stay exact; each coarser
/// level is a Gaussian-smoothed half-size copy of the previous one. Building
/// stops once the next level would be smaller than 2x2.
pub fn build_pyramid(base: &GrayImage, octaves: usize) -> Pyramid {
    let octaves = octaves.max(1);

    debug!(
        "Building pyramid with {} octaves from {}x{} image",
        octaves,
        base.width(),
        base.height()
    );

    let mut levels = Vec::with_capacity(octaves);
    let mut current = base.clone();

    for octave in 0..octaves {
        trace!("Processing octave {octave}");
        let (grad_x, grad_y) = sobel_gradients(&current);

        let next = if octave + 1 != octaves {
            let blurred = gaussian_blur_f32(&current, 1.0);
            Some(resize(
                &blurred,
                current.width() / 2,
                current.height() / 2,
                FilterType::Triangle,
            ))
        } else {
            None
        };

        levels.push(PyramidLevel {
            octave,
            scale: 1.0 / 2f32.powi(octave as i32),
            image: current,
            grad_x,
            grad_y,
        });

        match next {
            Some(next) if next.width() >= 2 && next.height() >= 2 => current = next,
            _ => break,
        }
    }

    Pyramid { levels }
}

/// Derivative-normalised horizontal and vertical Sobel gradients.
pub fn sobel_gradients(image: &GrayImage) -> (GradientImage, GradientImage) {
    (
        normalized_gradient(image, Axis::Horizontal),
        normalized_gradient(image, Axis::Vertical),
    )
}

enum Axis {
    Horizontal,
    Vertical,
}

fn normalized_gradient(image: &GrayImage, axis: Axis) -> GradientImage {
    let raw = match axis {
        Axis::Horizontal => horizontal_sobel(image),
        Axis::Vertical => vertical_sobel(image),
    };
    let (width, height) = raw.dimensions();
    let data: Vec<f32> = raw
        .as_raw()
        .iter()
        .map(|&v| v as f32 * SOBEL_NORMALIZATION)
        .collect();
    GradientImage::from_vec(width, height, data).unwrap_or_else(|| GradientImage::new(width, height))
}
