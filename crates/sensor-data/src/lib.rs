//! Data layer for the sensor batch pipeline.
//!
//! Parses the raw line-oriented input, folds readings into daily aggregates,
//! serializes aggregates to the intermediate XML document and back, detects
//! anomalies, and writes the anomaly report.

pub mod aggregator;
pub mod codec;
pub mod detector;
pub mod parser;
pub mod reader;
pub mod report;

pub use sensor_core as core;
