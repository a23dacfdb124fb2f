pub mod report;

pub use report::{FrameReport, FrameStat, RunSummary, StepOutcome, Termination};
