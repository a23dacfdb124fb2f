pub mod config;

pub use config::{RunConfig, ScheduledSignal};
