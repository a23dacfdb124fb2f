use std::path::{Path, PathBuf};

use flowtrail_engine::{EngineError, FrameReport, FrameSink};
use log::debug;

use crate::errors::Result;

/// Writes every `every`-th composited frame as a numbered PNG.
pub struct PngSink {
    dir: PathBuf,
    every: u64,
    written: usize,
}

impl PngSink {
    pub fn create<P: AsRef<Path>>(dir: P, every: u64) -> Result<Self> {
        let dir = dir.as_ref().to_path_buf();
        std::fs::create_dir_all(&dir)?;
        Ok(Self {
            dir,
            every: every.max(1),
            written: 0,
        })
    }

    pub fn written(&self) -> usize {
        self.written
    }

    pub fn frame_path(&self, frame_index: u64) -> PathBuf {
        self.dir.join(format!("frame_{:06}.png", frame_index))
    }
}

impl FrameSink for PngSink {
    fn present(&mut self, report: &FrameReport) -> flowtrail_engine::Result<()> {
        if report.frame_index % self.every != 0 {
            return Ok(());
        }
        let path = self.frame_path(report.frame_index);
        report
            .composite
            .save(&path)
            .map_err(|e| EngineError::Sink(format!("{}: {}", path.display(), e)))?;
        self.written += 1;
        debug!("Saved {}", path.display());
        Ok(())
    }
}

/// Discards frames; used when only the summary is wanted.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullSink;

impl FrameSink for NullSink {
    fn present(&mut self, _report: &FrameReport) -> flowtrail_engine::Result<()> {
        Ok(())
    }
}
