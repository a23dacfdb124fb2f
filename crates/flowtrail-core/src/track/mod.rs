pub mod health;
pub mod lk;
pub mod seed;

pub use health::{ForwardBackwardMetrics, TrackHealth};
pub use lk::{FlowEstimate, LucasKanadeConfig, MotionEstimator, PyramidalLucasKanade, TrackOutcome};
pub use seed::{DetectorConfig, FeatureDetector, FeatureSeed, ShiTomasiDetector};
