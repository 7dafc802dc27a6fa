//! Shared types for the sensor batch pipeline.
//!
//! Holds the record types flowing between the two processing steps, the
//! error taxonomy, detector thresholds, and CLI settings.

pub mod error;
pub mod models;
pub mod settings;
pub mod thresholds;

pub use error::{PipelineError, Result};
