pub mod control;
pub mod errors;
pub mod output;
pub mod providers;
pub mod types;
#[cfg(feature = "ffmpeg")]
pub mod video;

use std::path::{Path, PathBuf};
use std::time::Instant;

use flowtrail_engine::{FrameSink, FrameSource, NoSignals, SignalSource, Termination, TrailEngine};
use log::{debug, info, warn};

use crate::errors::{CliError, Result};
use crate::output::{DetectedFrame, DetectionOutput, Metadata, NullSink, PngSink, TrackingOutput};
use crate::providers::{FrameSelection, ImageSequenceSource, SyntheticSource};
use crate::types::RunConfig;

/// Frame size and length of the built-in synthetic scene.
pub const SYNTHETIC_SIZE: (u32, u32) = (320, 240);
pub const SYNTHETIC_FRAMES: u64 = 120;

/// Where frames come from, as given on the command line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InputSpec {
    Synthetic { seed: u64 },
    Directory(PathBuf),
    Video(PathBuf),
}

impl InputSpec {
    /// `synthetic` or `synthetic:<seed>`, an image directory, or a video file.
    pub fn parse(input: &str) -> Self {
        if let Some(rest) = input.strip_prefix("synthetic") {
            if rest.is_empty() {
                return InputSpec::Synthetic { seed: 7 };
            }
            if let Some(seed) = rest.strip_prefix(':').and_then(|s| s.parse().ok()) {
                return InputSpec::Synthetic { seed };
            }
        }
        let path = PathBuf::from(input);
        if path.is_dir() {
            InputSpec::Directory(path)
        } else {
            InputSpec::Video(path)
        }
    }

    pub fn describe(&self) -> String {
        match self {
            InputSpec::Synthetic { seed } => format!("synthetic:{}", seed),
            InputSpec::Directory(path) | InputSpec::Video(path) => path.display().to_string(),
        }
    }

    pub fn open(&self) -> Result<Box<dyn FrameSource>> {
        match self {
            InputSpec::Synthetic { seed } => Ok(Box::new(SyntheticSource::new(
                SYNTHETIC_SIZE.0,
                SYNTHETIC_SIZE.1,
                SYNTHETIC_FRAMES,
                *seed,
            ))),
            InputSpec::Directory(dir) => Ok(Box::new(ImageSequenceSource::open(dir)?)),
            InputSpec::Video(path) => open_video(path),
        }
    }
}

#[cfg(feature = "ffmpeg")]
fn open_video(path: &Path) -> Result<Box<dyn FrameSource>> {
    video::VideoDecoder::init()?;
    Ok(Box::new(video::VideoDecoder::open(path)?))
}

#[cfg(not(feature = "ffmpeg"))]
fn open_video(path: &Path) -> Result<Box<dyn FrameSource>> {
    if !path.exists() {
        return Err(CliError::InputNotFound(path.display().to_string()));
    }
    Err(CliError::VideoUnsupported(path.display().to_string()))
}

#[derive(Debug, Clone)]
pub struct TrackOptions {
    pub input: InputSpec,
    pub output_dir: Option<PathBuf>,
    pub save_every: u64,
    pub interactive: bool,
}

/// Runs the tracker over recorded or synthetic input
pub struct TrailProcessor {
    config: RunConfig,
}

impl TrailProcessor {
    pub fn new(config: RunConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &RunConfig {
        &self.config
    }

    fn open_source(&self, input: &InputSpec) -> Result<FrameSelection<Box<dyn FrameSource>>> {
        Ok(FrameSelection::new(
            input.open()?,
            self.config.skip_frames,
            self.config.max_frames,
        ))
    }

    /// Tracks points through every frame of the input
    pub fn track(&self, options: &TrackOptions) -> Result<TrackingOutput> {
        info!("Tracking {}", options.input.describe());
        let started = Instant::now();

        let mut engine = TrailEngine::new(self.config.engine_config())?;
        let mut source = self.open_source(&options.input)?;

        let mut signals: Vec<Box<dyn SignalSource>> = Vec::new();
        if !self.config.signals.is_empty() {
            signals.push(Box::new(self.config.scripted_signals()));
        }
        if options.interactive {
            signals.push(Box::new(control::spawn_stdin_reader()?));
        }
        if signals.is_empty() {
            signals.push(Box::new(NoSignals));
        }

        let mut sink: Box<dyn FrameSink> = match &options.output_dir {
            Some(dir) => Box::new(PngSink::create(dir, options.save_every)?),
            None => Box::new(NullSink),
        };

        let summary = engine.run(&mut source, &mut signals, &mut sink)?;
        if summary.frames_processed == 0 {
            return Err(CliError::NoFrames(options.input.describe()));
        }

        info!(
            "Tracked {} frames in {:.2}s ({} reinitializations, {:?})",
            summary.frames_processed,
            started.elapsed().as_secs_f64(),
            summary.reinitializations,
            summary.termination
        );

        Ok(TrackingOutput {
            metadata: Metadata::now(options.input.describe(), options.interactive),
            config: self.config.clone(),
            summary,
        })
    }

    /// Detects corners on every frame without tracking them
    pub fn detect(&self, input: &InputSpec, output_dir: Option<&Path>) -> Result<DetectionOutput> {
        info!("Detecting corners in {}", input.describe());
        let engine = TrailEngine::new(self.config.engine_config())?;
        let mut source = self.open_source(input)?;
        if let Some(dir) = output_dir {
            std::fs::create_dir_all(dir)?;
        }

        let mut frames = Vec::new();
        let termination = loop {
            let frame = match source.next_frame() {
                Ok(Some(frame)) => frame,
                Ok(None) => break Termination::EndOfStream,
                Err(err) => {
                    warn!("Frame acquisition failed, stopping: {}", err);
                    break Termination::SourceFailed;
                }
            };
            let detection = engine.detect_only(&frame.image)?;
            debug!(
                "Frame {}: {} corners",
                frame.index,
                detection.corners.len()
            );
            if let Some(dir) = output_dir {
                detection
                    .composite
                    .save(dir.join(format!("corners_{:06}.png", frame.index)))?;
            }
            frames.push(DetectedFrame {
                frame_index: frame.index,
                corners: detection.corners.iter().map(|c| [c.x, c.y]).collect(),
            });
        };

        if frames.is_empty() {
            return Err(CliError::NoFrames(input.describe()));
        }
        info!(
            "Detected corners in {} frames ({:?})",
            frames.len(),
            termination
        );
        Ok(DetectionOutput {
            metadata: Metadata::now(input.describe(), false),
            termination,
            frames,
        })
    }
}
