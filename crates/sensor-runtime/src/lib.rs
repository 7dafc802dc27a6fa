//! Restartable execution layer for the sensor batch pipeline.
//!
//! Provides the chunk runner and its component traits, the job repository
//! that stores restart cursors, and the two-step job wiring the data layer
//! into runner components.

pub mod job;
pub mod repository;
pub mod runner;
pub mod steps;

pub use sensor_core as core;
pub use sensor_data as data;
