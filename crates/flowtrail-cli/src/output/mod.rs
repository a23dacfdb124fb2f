pub mod json;
pub mod sink;

pub use json::{DetectedFrame, DetectionOutput, Metadata, TrackingOutput};
pub use sink::{NullSink, PngSink};
