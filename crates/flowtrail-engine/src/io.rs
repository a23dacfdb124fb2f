use flowtrail_core::img::RgbImage;

use crate::errors::{Result, SourceError};
use crate::types::FrameReport;

/// A decoded colour frame and its position in the stream.
#[derive(Debug, Clone)]
pub struct CapturedFrame {
    pub index: u64,
    pub image: RgbImage,
}

/// Ordered supply of frames. `Ok(None)` is the end of the stream.
pub trait FrameSource {
    fn next_frame(&mut self) -> std::result::Result<Option<CapturedFrame>, SourceError>;
}

impl<S: FrameSource + ?Sized> FrameSource for Box<S> {
    fn next_frame(&mut self) -> std::result::Result<Option<CapturedFrame>, SourceError> {
        (**self).next_frame()
    }
}

/// Receives every processed frame, in order.
pub trait FrameSink {
    fn present(&mut self, report: &FrameReport) -> Result<()>;
}

impl<S: FrameSink + ?Sized> FrameSink for Box<S> {
    fn present(&mut self, report: &FrameReport) -> Result<()> {
        (**self).present(report)
    }
}

/// Frames held in memory, mostly for tests and replays.
#[derive(Debug, Clone, Default)]
pub struct VecSource {
    frames: std::collections::VecDeque<RgbImage>,
    next_index: u64,
}

impl VecSource {
    pub fn new(frames: impl IntoIterator<Item = RgbImage>) -> Self {
        Self {
            frames: frames.into_iter().collect(),
            next_index: 0,
        }
    }
}

impl FrameSource for VecSource {
    fn next_frame(&mut self) -> std::result::Result<Option<CapturedFrame>, SourceError> {
        Ok(self.frames.pop_front().map(|image| {
            let index = self.next_index;
            self.next_index += 1;
            CapturedFrame { index, image }
        }))
    }
}

/// Collects per-frame reports in memory.
#[derive(Debug, Default)]
pub struct CollectingSink {
    pub reports: Vec<FrameReport>,
}

impl FrameSink for CollectingSink {
    fn present(&mut self, report: &FrameReport) -> Result<()> {
        self.reports.push(report.clone());
        Ok(())
    }
}
