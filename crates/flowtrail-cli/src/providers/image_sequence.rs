use std::path::{Path, PathBuf};

use flowtrail_engine::{CapturedFrame, FrameSource, SourceError};
use log::{debug, info};

use crate::errors::{CliError, Result};

const EXTENSIONS: [&str; 3] = ["png", "jpg", "jpeg"];

/// Frames read from image files in a directory, in file name order.
pub struct ImageSequenceSource {
    paths: Vec<PathBuf>,
    next: usize,
}

impl ImageSequenceSource {
    pub fn open<P: AsRef<Path>>(dir: P) -> Result<Self> {
        let dir = dir.as_ref();
        if !dir.is_dir() {
            return Err(CliError::InputNotFound(dir.display().to_string()));
        }

        let mut paths: Vec<PathBuf> = std::fs::read_dir(dir)?
            .filter_map(|entry| entry.ok().map(|e| e.path()))
            .filter(|path| {
                path.extension()
                    .and_then(|ext| ext.to_str())
                    .map(|ext| EXTENSIONS.contains(&ext.to_ascii_lowercase().as_str()))
                    .unwrap_or(false)
            })
            .collect();
        paths.sort();

        if paths.is_empty() {
            return Err(CliError::NoFrames(dir.display().to_string()));
        }
        info!("Found {} frames in {}", paths.len(), dir.display());
        Ok(Self { paths, next: 0 })
    }

    pub fn len(&self) -> usize {
        self.paths.len()
    }

    pub fn is_empty(&self) -> bool {
        self.paths.is_empty()
    }
}

impl FrameSource for ImageSequenceSource {
    fn next_frame(&mut self) -> std::result::Result<Option<CapturedFrame>, SourceError> {
        let Some(path) = self.paths.get(self.next) else {
            return Ok(None);
        };
        let index = self.next as u64;
        self.next += 1;

        debug!("Loading frame {} from {}", index, path.display());
        let image = image::open(path).map_err(|e| SourceError::Decode {
            index,
            message: format!("{}: {}", path.display(), e),
        })?;
        Ok(Some(CapturedFrame {
            index,
            image: image.to_rgb8(),
        }))
    }
}
