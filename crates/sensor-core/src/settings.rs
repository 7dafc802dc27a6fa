use clap::{CommandFactory, Parser};
use std::path::PathBuf;

use crate::error::{PipelineError, Result};
use crate::thresholds::{
    ThresholdFile, Thresholds, HIGH_TEMP_THRESHOLD, LOW_TEMP_THRESHOLD, MEAN_HIGH_THRESHOLD,
    MEAN_LOW_THRESHOLD,
};

// ── Settings (CLI) ─────────────────────────────────────────────────────────────

/// Aggregate daily sensor readings and report anomalous days
#[derive(Parser, Debug, Clone)]
#[command(
    name = "sensor-batch",
    about = "Aggregate daily sensor readings and report anomalous days",
    version
)]
pub struct Settings {
    /// Raw sensor input file (one `DATE MEASUREMENT...` line per reading)
    #[arg(long, default_value = "input/HTE2NP.txt")]
    pub input: PathBuf,

    /// Intermediate XML document holding the daily aggregates
    #[arg(long, default_value = "HTE2NP.xml")]
    pub intermediate: PathBuf,

    /// Anomaly report (CSV: date,type,value)
    #[arg(long, default_value = "HTE2NP-anomalies.csv")]
    pub report: PathBuf,

    /// Job repository file (defaults to ~/.sensor-batch/job-repository.json)
    #[arg(long)]
    pub repository: Option<PathBuf>,

    /// Items committed per chunk (1-10000)
    #[arg(long, default_value = "1", value_parser = clap::value_parser!(u64).range(1..=10_000))]
    pub chunk_size: u64,

    /// JSON file with threshold overrides
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Maximum above which a day is reported HIGH
    #[arg(long, default_value_t = HIGH_TEMP_THRESHOLD, allow_negative_numbers = true)]
    pub high_threshold: f64,

    /// Minimum below which a day is reported LOW
    #[arg(long, default_value_t = LOW_TEMP_THRESHOLD, allow_negative_numbers = true)]
    pub low_threshold: f64,

    /// Mean above which a day is reported MEAN_HIGH
    #[arg(long, default_value_t = MEAN_HIGH_THRESHOLD, allow_negative_numbers = true)]
    pub mean_high_threshold: f64,

    /// Mean below which a day is reported MEAN_LOW
    #[arg(long, default_value_t = MEAN_LOW_THRESHOLD, allow_negative_numbers = true)]
    pub mean_low_threshold: f64,

    /// Discard stored step executions and start a new job instance
    #[arg(long)]
    pub fresh: bool,

    /// Print stored step executions and exit
    #[arg(long)]
    pub status: bool,

    /// Logging level
    #[arg(long, default_value = "INFO", value_parser = ["DEBUG", "INFO", "WARNING", "ERROR"])]
    pub log_level: String,

    /// Log file path
    #[arg(long)]
    pub log_file: Option<PathBuf>,

    /// Enable debug logging
    #[arg(long)]
    pub debug: bool,
}

// ── Settings impl ──────────────────────────────────────────────────────────────

impl Settings {
    /// Parse the process arguments and merge the optional threshold file.
    pub fn load() -> Result<Self> {
        Self::load_from_args(std::env::args_os().collect())
    }

    /// Same as [`Settings::load`] but with an explicit argument list.
    ///
    /// Threshold precedence: explicit CLI flag, then `--config` file, then the
    /// built-in constant.
    pub fn load_from_args(args: Vec<std::ffi::OsString>) -> Result<Self> {
        // Raw ArgMatches are needed to query ValueSource.
        let matches = Settings::command().get_matches_from(args.clone());
        let mut settings = Settings::parse_from(args);

        if let Some(path) = settings.config.clone() {
            let file = ThresholdFile::load_from(&path)?;
            // NOTE: clap stores the arg id using the field name (underscores).
            if !is_arg_explicitly_set(&matches, "high_threshold") {
                if let Some(v) = file.high {
                    settings.high_threshold = v;
                }
            }
            if !is_arg_explicitly_set(&matches, "low_threshold") {
                if let Some(v) = file.low {
                    settings.low_threshold = v;
                }
            }
            if !is_arg_explicitly_set(&matches, "mean_high_threshold") {
                if let Some(v) = file.mean_high {
                    settings.mean_high_threshold = v;
                }
            }
            if !is_arg_explicitly_set(&matches, "mean_low_threshold") {
                if let Some(v) = file.mean_low {
                    settings.mean_low_threshold = v;
                }
            }
        }

        let t = settings.thresholds();
        if ![t.high, t.low, t.mean_high, t.mean_low]
            .iter()
            .all(|v| v.is_finite())
        {
            return Err(PipelineError::Config(
                "thresholds must be finite numbers".to_string(),
            ));
        }

        // --debug overrides log level.
        if settings.debug {
            settings.log_level = "DEBUG".to_string();
        }

        Ok(settings)
    }

    /// Detector thresholds after merging.
    pub fn thresholds(&self) -> Thresholds {
        Thresholds {
            high: self.high_threshold,
            low: self.low_threshold,
            mean_high: self.mean_high_threshold,
            mean_low: self.mean_low_threshold,
        }
    }

    /// The job repository path, falling back to the per-user default.
    pub fn repository_path(&self) -> PathBuf {
        self.repository
            .clone()
            .unwrap_or_else(default_repository_path)
    }
}

/// `~/.sensor-batch/job-repository.json`.
pub fn default_repository_path() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".sensor-batch")
        .join("job-repository.json")
}

// ── Helper: check if an arg was explicitly set on the command line ─────────────

/// Returns `true` when `name` was supplied explicitly on the command line
/// (not via default value or environment variable).
fn is_arg_explicitly_set(matches: &clap::ArgMatches, name: &str) -> bool {
    matches.value_source(name) == Some(clap::parser::ValueSource::CommandLine)
}

// ── Tests ──────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn args(list: &[&str]) -> Vec<std::ffi::OsString> {
        list.iter().map(|s| s.into()).collect()
    }

    fn write_config(tmp: &TempDir, body: &str) -> PathBuf {
        let path = tmp.path().join("thresholds.json");
        std::fs::write(&path, body).expect("write config");
        path
    }

    // ── defaults ──────────────────────────────────────────────────────────────

    #[test]
    fn test_settings_default_values() {
        let settings = Settings::parse_from(["sensor-batch"]);

        assert_eq!(settings.input, PathBuf::from("input/HTE2NP.txt"));
        assert_eq!(settings.intermediate, PathBuf::from("HTE2NP.xml"));
        assert_eq!(settings.report, PathBuf::from("HTE2NP-anomalies.csv"));
        assert!(settings.repository.is_none());
        assert_eq!(settings.chunk_size, 1);
        assert!(settings.config.is_none());
        assert_eq!(settings.thresholds(), Thresholds::default());
        assert!(!settings.fresh);
        assert!(!settings.status);
        assert_eq!(settings.log_level, "INFO");
        assert!(settings.log_file.is_none());
        assert!(!settings.debug);
    }

    #[test]
    fn test_settings_cli_paths() {
        let settings = Settings::parse_from([
            "sensor-batch",
            "--input",
            "/data/raw.txt",
            "--report",
            "/out/anomalies.csv",
            "--repository",
            "/state/repo.json",
        ]);
        assert_eq!(settings.input, PathBuf::from("/data/raw.txt"));
        assert_eq!(settings.report, PathBuf::from("/out/anomalies.csv"));
        assert_eq!(settings.repository_path(), PathBuf::from("/state/repo.json"));
    }

    #[test]
    fn test_settings_chunk_size_range() {
        assert!(Settings::try_parse_from(["sensor-batch", "--chunk-size", "0"]).is_err());
        let settings = Settings::parse_from(["sensor-batch", "--chunk-size", "50"]);
        assert_eq!(settings.chunk_size, 50);
    }

    #[test]
    fn test_default_repository_path_file_name() {
        let path = default_repository_path();
        assert!(path.ends_with(".sensor-batch/job-repository.json"));
    }

    // ── load_from_args ────────────────────────────────────────────────────────

    #[test]
    fn test_load_debug_overrides_log_level() {
        let settings = Settings::load_from_args(args(&["sensor-batch", "--debug"])).unwrap();
        assert_eq!(settings.log_level, "DEBUG");
    }

    #[test]
    fn test_load_merges_threshold_file() {
        let tmp = TempDir::new().expect("tempdir");
        let path = write_config(&tmp, r#"{ "high": 40.0, "low": -5.0 }"#);

        let settings = Settings::load_from_args(args(&[
            "sensor-batch",
            "--config",
            path.to_str().unwrap(),
        ]))
        .unwrap();

        let t = settings.thresholds();
        assert_eq!(t.high, 40.0);
        assert_eq!(t.low, -5.0);
        assert_eq!(t.mean_high, MEAN_HIGH_THRESHOLD);
        assert_eq!(t.mean_low, MEAN_LOW_THRESHOLD);
    }

    #[test]
    fn test_load_cli_overrides_threshold_file() {
        let tmp = TempDir::new().expect("tempdir");
        let path = write_config(&tmp, r#"{ "high": 40.0 }"#);

        let settings = Settings::load_from_args(args(&[
            "sensor-batch",
            "--config",
            path.to_str().unwrap(),
            "--high-threshold",
            "12.5",
        ]))
        .unwrap();

        assert_eq!(settings.thresholds().high, 12.5);
    }

    #[test]
    fn test_load_missing_config_is_error() {
        let tmp = TempDir::new().expect("tempdir");
        let missing = tmp.path().join("nope.json");
        let result = Settings::load_from_args(args(&[
            "sensor-batch",
            "--config",
            missing.to_str().unwrap(),
        ]));
        assert!(result.is_err());
    }

    #[test]
    fn test_load_rejects_non_finite_threshold() {
        let result = Settings::load_from_args(args(&["sensor-batch", "--high-threshold", "inf"]));
        assert!(matches!(result, Err(PipelineError::Config(_))));
    }
}
