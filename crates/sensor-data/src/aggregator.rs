//! Daily aggregation of raw readings.
//!
//! A pure fold: readings are accepted one at a time and the per-day
//! aggregates are produced once, at end of stream, in ascending date order.

use std::collections::BTreeMap;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use sensor_core::models::{AggregateStats, DailyAggregate, RawReading};

// ── RunningStats ──────────────────────────────────────────────────────────────

/// Running totals for one day. `mean`, `min` and `max` are meaningful only
/// when `count > 0`.
///
/// The mean is kept incrementally rather than as a sum, so it stays finite
/// for any finite inputs.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct RunningStats {
    pub count: u64,
    pub mean: f64,
    pub min: f64,
    pub max: f64,
}

impl RunningStats {
    fn add(&mut self, value: f64) {
        self.count += 1;
        if self.count == 1 {
            self.mean = value;
            self.min = value;
            self.max = value;
            return;
        }
        let n = self.count as f64;
        // The step lies between 0 and `value - mean`, so the new mean stays
        // between the old mean and `value`.
        self.mean += value / n - self.mean / n;
        self.min = self.min.min(value);
        self.max = self.max.max(value);
    }

    fn finish(&self) -> Option<AggregateStats> {
        if self.count == 0 {
            return None;
        }
        // Rounding in the incremental update can leave the mean of identical
        // values one ulp outside the extremes.
        let mean = self.mean.clamp(self.min, self.max);
        Some(AggregateStats {
            count: self.count,
            mean,
            min: self.min,
            max: self.max,
        })
    }
}

// ── Aggregator ────────────────────────────────────────────────────────────────

/// Groups readings by date.
///
/// The whole state is serializable so a restarted step can continue the fold
/// from its last checkpoint.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Aggregator {
    days: BTreeMap<NaiveDate, RunningStats>,
}

impl Aggregator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fold one reading in.
    ///
    /// A date that was already seen merges into the existing totals rather
    /// than replacing them.
    pub fn accept(&mut self, reading: &RawReading) {
        let day = self.days.entry(reading.date).or_default();
        for &m in &reading.measurements {
            day.add(m);
        }
    }

    /// Finalized aggregates, ascending by date.
    pub fn finish(&self) -> Vec<DailyAggregate> {
        self.days
            .iter()
            .map(|(date, running)| DailyAggregate {
                date: *date,
                stats: running.finish(),
            })
            .collect()
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
