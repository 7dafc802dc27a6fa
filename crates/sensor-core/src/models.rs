use std::fmt;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

/// One parsed line of the raw sensor input file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawReading {
    /// Calendar day the measurements belong to.
    pub date: NaiveDate,
    /// Measurements in file order; may be empty.
    pub measurements: Vec<f64>,
}

impl RawReading {
    pub fn new(date: NaiveDate, measurements: Vec<f64>) -> Self {
        Self { date, measurements }
    }
}

/// Derived statistics for a day that had at least one measurement.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AggregateStats {
    /// Number of measurements folded into the aggregate (always > 0).
    pub count: u64,
    pub mean: f64,
    pub min: f64,
    pub max: f64,
}

/// One row of the intermediate aggregate document.
///
/// `stats` is `None` for a day that appeared in the input without any
/// measurements. Numeric fields are then absent, never zero.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DailyAggregate {
    pub date: NaiveDate,
    pub stats: Option<AggregateStats>,
}

impl DailyAggregate {
    /// Aggregate carrying statistics.
    pub fn with_stats(date: NaiveDate, stats: AggregateStats) -> Self {
        Self {
            date,
            stats: Some(stats),
        }
    }

    /// Aggregate for a day without measurements.
    pub fn no_data(date: NaiveDate) -> Self {
        Self { date, stats: None }
    }

    /// Measurement count; `0` when no statistics are present.
    pub fn count(&self) -> u64 {
        self.stats.map(|s| s.count).unwrap_or(0)
    }
}

/// The rule that fired for an [`Anomaly`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AnomalyType {
    /// Daily maximum above the high threshold.
    High,
    /// Daily minimum below the low threshold.
    Low,
    /// Daily mean above the mean-high threshold.
    MeanHigh,
    /// Daily mean below the mean-low threshold.
    MeanLow,
}

impl AnomalyType {
    pub fn as_str(&self) -> &'static str {
        match self {
            AnomalyType::High => "HIGH",
            AnomalyType::Low => "LOW",
            AnomalyType::MeanHigh => "MEAN_HIGH",
            AnomalyType::MeanLow => "MEAN_LOW",
        }
    }
}

impl fmt::Display for AnomalyType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One row of the anomaly report. Field order is the report column order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Anomaly {
    pub date: NaiveDate,
    #[serde(rename = "type")]
    pub anomaly_type: AnomalyType,
    /// The statistic that triggered the rule.
    pub value: f64,
}

impl Anomaly {
    pub fn new(date: NaiveDate, anomaly_type: AnomalyType, value: f64) -> Self {
        Self {
            date,
            anomaly_type,
            value,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn day(s: &str) -> NaiveDate {
        NaiveDate::parse_from_str(s, "%Y-%m-%d").unwrap()
    }

    #[test]
    fn test_count_is_zero_without_stats() {
        let agg = DailyAggregate::no_data(day("2024-01-01"));
        assert_eq!(agg.count(), 0);
        assert!(agg.stats.is_none());
    }

    #[test]
    fn test_count_reads_stats() {
        let agg = DailyAggregate::with_stats(
            day("2024-01-01"),
            AggregateStats {
                count: 3,
                mean: 20.0,
                min: 10.0,
                max: 30.0,
            },
        );
        assert_eq!(agg.count(), 3);
    }

    #[test]
    fn test_anomaly_type_display() {
        assert_eq!(AnomalyType::High.to_string(), "HIGH");
        assert_eq!(AnomalyType::Low.to_string(), "LOW");
        assert_eq!(AnomalyType::MeanHigh.to_string(), "MEAN_HIGH");
        assert_eq!(AnomalyType::MeanLow.to_string(), "MEAN_LOW");
    }

    #[test]
    fn test_anomaly_type_serde_matches_display() {
        let json = serde_json::to_string(&AnomalyType::MeanHigh).unwrap();
        assert_eq!(json, "\"MEAN_HIGH\"");
    }
}
