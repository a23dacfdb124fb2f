//! Trail overlay: an accumulating mask of per-track segments composed over
//! the live frame.

use image::{Rgb, RgbImage};
use imageproc::drawing::{draw_filled_circle_mut, draw_line_segment_mut};
use nalgebra::Vector2;
use serde::{Deserialize, Serialize};

/// Number of distinct trail colours before identities wrap around.
pub const PALETTE_SIZE: u64 = 1000;

/// Deterministic display colour of a track identity.
///
/// Identities `i` and `i + PALETTE_SIZE` share a colour. Channels avoid the
/// darkest values so trails stay visible against the empty mask.
pub fn color_for_identity(identity: u64) -> Rgb<u8> {
    // splitmix64 finaliser over the palette slot
    let mut z = (identity % PALETTE_SIZE).wrapping_add(0x9E37_79B9_7F4A_7C15);
    z = (z ^ (z >> 30)).wrapping_mul(0xBF58_476D_1CE4_E5B9);
    z = (z ^ (z >> 27)).wrapping_mul(0x94D0_49BB_1331_11EB);
    z ^= z >> 31;
    let channel = |shift: u32| 40 + ((z >> shift) & 0xFF) as u8 % 216;
    Rgb([channel(0), channel(8), channel(16)])
}

/// One trail step of a tracked point, `from` the previous position `to` the
/// current one.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TrailSegment {
    pub identity: u64,
    pub from: Vector2<f32>,
    pub to: Vector2<f32>,
}

impl TrailSegment {
    pub fn is_degenerate(&self) -> bool {
        (self.to - self.from).norm_squared() < f32::EPSILON
    }
}

/// Persistent raster accumulating trail segments between reinitializations.
#[derive(Debug, Clone, PartialEq)]
pub struct OverlayMask {
    image: RgbImage,
}

impl OverlayMask {
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            image: RgbImage::new(width, height),
        }
    }

    pub fn dimensions(&self) -> (u32, u32) {
        self.image.dimensions()
    }

    pub fn image(&self) -> &RgbImage {
        &self.image
    }

    pub fn image_mut(&mut self) -> &mut RgbImage {
        &mut self.image
    }

    /// Wipes every drawn segment.
    pub fn clear(&mut self) {
        self.image.pixels_mut().for_each(|p| *p = Rgb([0, 0, 0]));
    }

    /// Clears and resizes to match a new frame size.
    pub fn reset(&mut self, width: u32, height: u32) {
        if self.dimensions() == (width, height) {
            self.clear();
        } else {
            self.image = RgbImage::new(width, height);
        }
    }

    pub fn is_empty(&self) -> bool {
        self.image.as_raw().iter().all(|&v| v == 0)
    }
}

impl Default for OverlayMask {
    fn default() -> Self {
        Self::new(0, 0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RenderConfig {
    /// Trail line thickness in pixels.
    pub trail_thickness: u32,
    /// Radius of the marker drawn at each current position.
    pub marker_radius: u32,
}

impl Default for RenderConfig {
    fn default() -> Self {
        Self {
            trail_thickness: 2,
            marker_radius: 5,
        }
    }
}

/// Draws trail segments into an [`OverlayMask`] and composes display frames.
///
/// Never touches tracking state; everything it needs arrives per call.
#[derive(Debug, Clone, Default)]
pub struct OverlayRenderer {
    config: RenderConfig,
}

impl OverlayRenderer {
    pub fn new(config: RenderConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &RenderConfig {
        &self.config
    }

    /// Accumulates every segment into the mask in its identity's colour.
    ///
    /// A zero-length segment, from a point that did not move, leaves a dot of
    /// the trail thickness. Callers skip this on seeding steps so a fresh
    /// generation starts from an empty mask.
    pub fn draw_segments(&self, mask: &mut OverlayMask, segments: &[TrailSegment]) {
        let thickness = self.config.trail_thickness.max(1) as i32;
        let image = mask.image_mut();
        for segment in segments {
            let color = color_for_identity(segment.identity);
            if segment.is_degenerate() {
                draw_filled_circle_mut(
                    image,
                    (segment.to.x.round() as i32, segment.to.y.round() as i32),
                    thickness / 2,
                    color,
                );
                continue;
            }
            for offset in 0..thickness {
                let shift = (offset - thickness / 2) as f32;
                // Thicken perpendicular to the dominant direction.
                let d = segment.to - segment.from;
                let (ox, oy) = if d.x.abs() >= d.y.abs() {
                    (0.0, shift)
                } else {
                    (shift, 0.0)
                };
                draw_line_segment_mut(
                    image,
                    (segment.from.x + ox, segment.from.y + oy),
                    (segment.to.x + ox, segment.to.y + oy),
                    color,
                );
            }
        }
    }

    /// Marks current positions on a copy of `frame`, then adds the mask with
    /// per-channel saturation.
    pub fn compose(
        &self,
        frame: &RgbImage,
        mask: &OverlayMask,
        segments: &[TrailSegment],
    ) -> RgbImage {
        let mut out = frame.clone();
        for segment in segments {
            draw_filled_circle_mut(
                &mut out,
                (segment.to.x.round() as i32, segment.to.y.round() as i32),
                self.config.marker_radius as i32,
                color_for_identity(segment.identity),
            );
        }
        if mask.dimensions() == out.dimensions() {
            for (dst, src) in out.pixels_mut().zip(mask.image().pixels()) {
                for c in 0..3 {
                    dst.0[c] = dst.0[c].saturating_add(src.0[c]);
                }
            }
        }
        out
    }

    /// Marks detected corners on a copy of `frame`.
    pub fn draw_corners(&self, frame: &RgbImage, corners: &[Vector2<f32>]) -> RgbImage {
        let mut out = frame.clone();
        for corner in corners {
            draw_filled_circle_mut(
                &mut out,
                (corner.x.round() as i32, corner.y.round() as i32),
                self.config.marker_radius as i32,
                Rgb([0, 255, 0]),
            );
        }
        out
    }
}
