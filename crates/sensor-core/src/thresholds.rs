use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{PipelineError, Result};

// ── Defaults ──────────────────────────────────────────────────────────────────

/// Daily maximum above this value is reported as `HIGH`.
pub const HIGH_TEMP_THRESHOLD: f64 = 25.0;

/// Daily minimum below this value is reported as `LOW`.
pub const LOW_TEMP_THRESHOLD: f64 = 0.0;

/// Daily mean above this value is reported as `MEAN_HIGH`.
pub const MEAN_HIGH_THRESHOLD: f64 = 25.0;

/// Daily mean below this value is reported as `MEAN_LOW`.
pub const MEAN_LOW_THRESHOLD: f64 = 5.0;

// ── Thresholds ────────────────────────────────────────────────────────────────

/// Limits evaluated by the anomaly detector, in the units of the raw
/// measurements.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Thresholds {
    pub high: f64,
    pub low: f64,
    pub mean_high: f64,
    pub mean_low: f64,
}

impl Default for Thresholds {
    fn default() -> Self {
        Self {
            high: HIGH_TEMP_THRESHOLD,
            low: LOW_TEMP_THRESHOLD,
            mean_high: MEAN_HIGH_THRESHOLD,
            mean_low: MEAN_LOW_THRESHOLD,
        }
    }
}

// ── ThresholdFile ─────────────────────────────────────────────────────────────

/// Optional JSON threshold overrides supplied with `--config`.
///
/// ```json
/// { "high": 30.0, "mean_low": 2.5 }
/// ```
#[derive(Debug, Serialize, Deserialize, Default, Clone, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct ThresholdFile {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub high: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub low: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mean_high: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mean_low: Option<f64>,
}

impl ThresholdFile {
    /// Load overrides from `path`.
    ///
    /// Unlike persisted state, an explicitly supplied config file must exist
    /// and parse; anything else is a configuration error.
    pub fn load_from(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|source| PipelineError::FileRead {
            path: path.to_path_buf(),
            source,
        })?;
        let file: ThresholdFile = serde_json::from_str(&content).map_err(|e| {
            PipelineError::Config(format!("invalid threshold file {}: {e}", path.display()))
        })?;

        for (name, value) in [
            ("high", file.high),
            ("low", file.low),
            ("mean_high", file.mean_high),
            ("mean_low", file.mean_low),
        ] {
            if let Some(v) = value {
                if !v.is_finite() {
                    return Err(PipelineError::Config(format!(
                        "threshold '{name}' must be finite, got {v}"
                    )));
                }
            }
        }

        Ok(file)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_defaults_match_constants() {
        let t = Thresholds::default();
        assert_eq!(t.high, HIGH_TEMP_THRESHOLD);
        assert_eq!(t.low, LOW_TEMP_THRESHOLD);
        assert_eq!(t.mean_high, MEAN_HIGH_THRESHOLD);
        assert_eq!(t.mean_low, MEAN_LOW_THRESHOLD);
    }

    #[test]
    fn test_threshold_file_partial() {
        let tmp = TempDir::new().expect("tempdir");
        let path = tmp.path().join("thresholds.json");
        std::fs::write(&path, r#"{ "high": 30.5, "mean_low": 2.0 }"#).unwrap();

        let file = ThresholdFile::load_from(&path).expect("load");
        assert_eq!(file.high, Some(30.5));
        assert_eq!(file.mean_low, Some(2.0));
        assert!(file.low.is_none());
        assert!(file.mean_high.is_none());
    }

    #[test]
    fn test_threshold_file_missing_is_error() {
        let tmp = TempDir::new().expect("tempdir");
        let err = ThresholdFile::load_from(&tmp.path().join("absent.json")).unwrap_err();
        assert!(matches!(err, PipelineError::FileRead { .. }));
    }

    #[test]
    fn test_threshold_file_unknown_key_is_error() {
        let tmp = TempDir::new().expect("tempdir");
        let path = tmp.path().join("thresholds.json");
        std::fs::write(&path, r#"{ "highest": 30.0 }"#).unwrap();

        let err = ThresholdFile::load_from(&path).unwrap_err();
        assert!(matches!(err, PipelineError::Config(_)));
    }
}
