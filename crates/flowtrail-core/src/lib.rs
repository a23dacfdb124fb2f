pub mod errors;
pub mod img;
pub mod overlay;
pub mod track;

pub use errors::{ConfigError, TrackingError};
