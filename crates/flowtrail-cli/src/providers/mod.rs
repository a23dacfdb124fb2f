pub mod image_sequence;
pub mod synthetic;

pub use image_sequence::ImageSequenceSource;
pub use synthetic::SyntheticSource;

use flowtrail_engine::{CapturedFrame, FrameSource, SourceError};

/// Applies `skip_frames` and `max_frames` to any frame source.
///
/// Indices of the passed-through frames keep their position in the
/// underlying stream.
pub struct FrameSelection<S> {
    inner: S,
    skip_frames: usize,
    max_frames: Option<usize>,
    consumed: usize,
}

impl<S: FrameSource> FrameSelection<S> {
    pub fn new(inner: S, skip_frames: usize, max_frames: Option<usize>) -> Self {
        Self {
            inner,
            skip_frames,
            max_frames,
            consumed: 0,
        }
    }
}

impl<S: FrameSource> FrameSource for FrameSelection<S> {
    fn next_frame(&mut self) -> Result<Option<CapturedFrame>, SourceError> {
        loop {
            if let Some(max) = self.max_frames {
                if self.consumed >= max {
                    return Ok(None);
                }
            }
            let Some(frame) = self.inner.next_frame()? else {
                return Ok(None);
            };
            let frame_idx = self.consumed;
            self.consumed += 1;
            if frame_idx % (self.skip_frames + 1) == 0 {
                return Ok(Some(frame));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use flowtrail_engine::VecSource;
    use image::RgbImage;

    fn source(n: usize) -> VecSource {
        VecSource::new((0..n).map(|_| RgbImage::new(4, 4)))
    }

    fn indices(mut source: impl FrameSource) -> Vec<u64> {
        let mut out = Vec::new();
        while let Some(frame) = source.next_frame().unwrap() {
            out.push(frame.index);
        }
        out
    }

    #[test]
    fn skips_between_processed_frames() {
        assert_eq!(indices(FrameSelection::new(source(7), 2, None)), vec![0, 3, 6]);
    }

    #[test]
    fn stops_at_max_frames() {
        assert_eq!(indices(FrameSelection::new(source(10), 0, Some(4))), vec![0, 1, 2, 3]);
        assert_eq!(indices(FrameSelection::new(source(10), 1, Some(5))), vec![0, 2, 4]);
    }
}
