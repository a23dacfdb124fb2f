use crate::img::sobel_gradients;
use crate::track::seed::utils::radius_nms;
use crate::track::seed::{DetectorConfig, FeatureDetector, FeatureSeed};
use image::GrayImage;
use log::debug;
use nalgebra::Vector2;
use rayon::prelude::*;

/// Responses at or below this are treated as a flat image.
const MIN_RESPONSE: f32 = 1e-6;

/// Good-features-to-track corner detector.
///
/// Scores every pixel by the minimum eigenvalue of the gradient structure
/// tensor accumulated over a `block_size` window, keeps 3x3 local maxima above
/// `quality_threshold` times the strongest response, then enforces
/// `min_separation` strongest-first.
#[derive(Debug, Clone, Default)]
pub struct ShiTomasiDetector;

impl ShiTomasiDetector {
    pub fn new() -> Self {
        Self
    }

    /// Computes the minimum-eigenvalue response map, row-major.
    ///
    /// The structure tensor captures the distribution of gradient directions in a local window:
    ///
    /// ```text
    /// M = [ixx  ixy]   where  ixx = ∑Iₓ²,  iyy = ∑Iᵧ²,  ixy = ∑IₓIᵧ
    ///     [ixy  iyy]
    /// ```
    ///
    /// λ_min is large only when gradients are strong in two directions, which
    /// singles out corners over edges and flat regions. Pixels whose window
    /// would leave the image score zero.
    pub fn response_map(gray: &GrayImage, block_size: usize) -> Vec<f32> {
        let width = gray.width() as usize;
        let height = gray.height() as usize;
        let mut response = vec![0.0f32; width * height];

        let half = block_size.max(3) / 2;
        // One extra pixel keeps Sobel border replication out of the window.
        let margin = half + 1;
        if width <= 2 * margin || height <= 2 * margin {
            return response;
        }

        let (grad_x, grad_y) = sobel_gradients(gray);
        let ixx = IntegralImage::from_fn(width, height, |x, y| {
            let gx = grad_x.get_pixel(x as u32, y as u32).0[0] as f64;
            gx * gx
        });
        let iyy = IntegralImage::from_fn(width, height, |x, y| {
            let gy = grad_y.get_pixel(x as u32, y as u32).0[0] as f64;
            gy * gy
        });
        let ixy = IntegralImage::from_fn(width, height, |x, y| {
            let gx = grad_x.get_pixel(x as u32, y as u32).0[0] as f64;
            let gy = grad_y.get_pixel(x as u32, y as u32).0[0] as f64;
            gx * gy
        });

        response
            .par_chunks_mut(width)
            .enumerate()
            .filter(|(y, _)| *y >= margin && *y < height - margin)
            .for_each(|(y, row)| {
                for x in margin..width - margin {
                    let (x0, y0) = (x - half, y - half);
                    let (x1, y1) = (x + half, y + half);
                    let a = ixx.window_sum(x0, y0, x1, y1);
                    let c = iyy.window_sum(x0, y0, x1, y1);
                    let b = ixy.window_sum(x0, y0, x1, y1);
                    let spread = ((a - c) * (a - c) + 4.0 * b * b).sqrt();
                    row[x] = (0.5 * (a + c - spread)).max(0.0) as f32;
                }
            });

        response
    }
}

impl FeatureDetector for ShiTomasiDetector {
    fn detect(&self, gray: &GrayImage, config: &DetectorConfig) -> Vec<Vector2<f32>> {
        let width = gray.width() as usize;
        let height = gray.height() as usize;
        if width < 3 || height < 3 || config.max_points == 0 {
            return Vec::new();
        }

        let response = Self::response_map(gray, config.block_size);
        let max_response = response.iter().copied().fold(0.0f32, f32::max);
        if max_response <= MIN_RESPONSE {
            debug!("Detecting corners in {}x{} → 0 (flat image)", width, height);
            return Vec::new();
        }
        let threshold = max_response * config.quality_threshold.clamp(0.0, 1.0);

        // --- 1) 3x3 local maxima above the relative threshold ---
        let mut seeds: Vec<FeatureSeed> = (1..height - 1)
            .into_par_iter()
            .flat_map_iter(|y| {
                let response = &response;
                (1..width - 1).filter_map(move |x| {
                    let score = response[y * width + x];
                    if score < threshold || score <= MIN_RESPONSE {
                        return None;
                    }
                    let is_peak = (y - 1..=y + 1).all(|ny| {
                        (x - 1..=x + 1).all(|nx| response[ny * width + nx] <= score)
                    });
                    is_peak.then(|| FeatureSeed {
                        position: Vector2::new(x as f32, y as f32),
                        score,
                    })
                })
            })
            .collect();

        // --- 2) Strongest first, then minimum separation and cap ---
        seeds.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        let candidates = seeds.len();
        let seeds = radius_nms(seeds, config.min_separation.max(0.0), config.max_points);

        debug!(
            "Detecting corners in {}x{} (block {}, quality {:.3}, separation {:.1}px) → {} of {} peaks (max {})",
            width,
            height,
            config.block_size,
            config.quality_threshold,
            config.min_separation,
            seeds.len(),
            candidates,
            config.max_points
        );

        seeds.into_iter().map(|s| s.position).collect()
    }
}

/// Summed-area table with a zero row and column in front.
struct IntegralImage {
    stride: usize,
    sums: Vec<f64>,
}

impl IntegralImage {
    fn from_fn(width: usize, height: usize, value: impl Fn(usize, usize) -> f64) -> Self {
        let stride = width + 1;
        let mut sums = vec![0.0f64; stride * (height + 1)];
        for y in 0..height {
            let mut row_sum = 0.0;
            for x in 0..width {
                row_sum += value(x, y);
                sums[(y + 1) * stride + x + 1] = sums[y * stride + x + 1] + row_sum;
            }
        }
        Self { stride, sums }
    }

    /// Inclusive sum over `[x0, x1] x [y0, y1]`.
    fn window_sum(&self, x0: usize, y0: usize, x1: usize, y1: usize) -> f64 {
        let s = self.stride;
        self.sums[(y1 + 1) * s + x1 + 1] - self.sums[y0 * s + x1 + 1] - self.sums[(y1 + 1) * s + x0]
            + self.sums[y0 * s + x0]
    }
}
