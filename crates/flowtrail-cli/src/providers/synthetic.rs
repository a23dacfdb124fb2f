use flowtrail_engine::{CapturedFrame, FrameSource, SourceError};
use image::{Rgb, RgbImage};
use rand::rngs::SmallRng;
use rand::{Rng, SeedableRng};

/// Grid spacing of the random texture, in pixels.
const CELL: f32 = 8.0;

/// Procedural scene for running without a camera: a smooth random texture
/// sliding by a constant velocity every frame.
pub struct SyntheticSource {
    width: u32,
    height: u32,
    frames: u64,
    velocity: (f32, f32),
    cols: usize,
    rows: usize,
    values: Vec<f32>,
    next: u64,
}

impl SyntheticSource {
    pub fn new(width: u32, height: u32, frames: u64, seed: u64) -> Self {
        Self::with_velocity(width, height, frames, seed, (1.5, 0.5))
    }

    /// Per-frame motion in pixels; negative components are clamped to zero.
    pub fn with_velocity(width: u32, height: u32, frames: u64, seed: u64, velocity: (f32, f32)) -> Self {
        let velocity = (velocity.0.max(0.0), velocity.1.max(0.0));
        // Enough grid to cover the view after the full translation.
        let travel_x = velocity.0 * frames as f32;
        let travel_y = velocity.1 * frames as f32;
        let cols = ((width as f32 + travel_x) / CELL) as usize + 3;
        let rows = ((height as f32 + travel_y) / CELL) as usize + 3;

        let mut rng = SmallRng::seed_from_u64(seed);
        let values = (0..cols * rows).map(|_| rng.gen_range(16.0..240.0)).collect();

        Self {
            width,
            height,
            frames,
            velocity,
            cols,
            rows,
            values,
            next: 0,
        }
    }

    fn sample(&self, x: f32, y: f32) -> f32 {
        let u = (x / CELL).max(0.0);
        let v = (y / CELL).max(0.0);
        let (i, j) = (u as usize, v as usize);
        let (fx, fy) = (u.fract(), v.fract());
        let at = |c: usize, r: usize| {
            self.values[r.min(self.rows - 1) * self.cols + c.min(self.cols - 1)]
        };
        let top = at(i, j) * (1.0 - fx) + at(i + 1, j) * fx;
        let bottom = at(i, j + 1) * (1.0 - fx) + at(i + 1, j + 1) * fx;
        top * (1.0 - fy) + bottom * fy
    }

    /// Renders frame `index`; scene content moves by `+velocity` per frame.
    pub fn render(&self, index: u64) -> RgbImage {
        let travel_x = self.velocity.0 * self.frames as f32;
        let travel_y = self.velocity.1 * self.frames as f32;
        let ox = travel_x - self.velocity.0 * index as f32;
        let oy = travel_y - self.velocity.1 * index as f32;
        RgbImage::from_fn(self.width, self.height, |x, y| {
            let v = self.sample(x as f32 + ox, y as f32 + oy).round() as u8;
            Rgb([v, v, v])
        })
    }
}

impl FrameSource for SyntheticSource {
    fn next_frame(&mut self) -> Result<Option<CapturedFrame>, SourceError> {
        if self.next >= self.frames {
            return Ok(None);
        }
        let index = self.next;
        self.next += 1;
        Ok(Some(CapturedFrame {
            index,
            image: self.render(index),
        }))
    }
}
