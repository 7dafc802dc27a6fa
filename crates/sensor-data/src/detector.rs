//! Threshold-based anomaly detection over single daily aggregates.

use sensor_core::models::{Anomaly, AnomalyType, DailyAggregate};
use sensor_core::thresholds::Thresholds;

/// Stateless detector; each aggregate is judged on its own.
#[derive(Debug, Clone, Copy, Default)]
pub struct AnomalyDetector {
    thresholds: Thresholds,
}

impl AnomalyDetector {
    pub fn new(thresholds: Thresholds) -> Self {
        Self { thresholds }
    }

    /// Every rule that fires yields one anomaly, in the order
    /// `HIGH`, `LOW`, `MEAN_HIGH`, `MEAN_LOW`.
    ///
    /// A day without statistics never fires.
    pub fn detect(&self, aggregate: &DailyAggregate) -> Vec<Anomaly> {
        let Some(stats) = aggregate.stats else {
            return Vec::new();
        };
        let t = &self.thresholds;

        [
            (stats.max > t.high, AnomalyType::High, stats.max),
            (stats.min < t.low, AnomalyType::Low, stats.min),
            (stats.mean > t.mean_high, AnomalyType::MeanHigh, stats.mean),
            (stats.mean < t.mean_low, AnomalyType::MeanLow, stats.mean),
        ]
        .into_iter()
        .filter(|(fired, _, _)| *fired)
        .map(|(_, kind, value)| Anomaly::new(aggregate.date, kind, value))
        .collect()
    }
}
