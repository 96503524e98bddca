//! Pipeline orchestration.

mod tracker;

pub use tracker::{ConfigError, Tracker, TrackerConfig};
