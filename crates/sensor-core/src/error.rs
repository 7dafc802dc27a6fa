use std::path::PathBuf;
use thiserror::Error;

/// All errors produced by the sensor batch pipeline.
#[derive(Error, Debug)]
pub enum PipelineError {
    /// A raw input line did not match the `DATE MEASUREMENT...` grammar.
    #[error("Malformed line {line}: {reason}")]
    MalformedLine { line: u64, reason: String },

    /// The intermediate aggregate document is corrupt or incompatible.
    #[error("Codec error: {0}")]
    Codec(String),

    /// The job repository could not persist a chunk checkpoint.
    #[error("Commit failed: {0}")]
    CommitFailure(String),

    /// A file could not be opened or read from disk.
    #[error("Failed to read file {path}: {source}")]
    FileRead {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// A JSON document could not be parsed or produced.
    #[error("Failed to parse JSON: {0}")]
    JsonParse(#[from] serde_json::Error),

    /// The anomaly report could not be written.
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    /// A configuration value is missing or invalid.
    #[error("Configuration error: {0}")]
    Config(String),

    /// Pass-through for any raw I/O error that does not carry a path.
    #[error(transparent)]
    Io(#[from] std::io::Error),

    /// Catch-all for errors from third-party crates via `anyhow`.
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl PipelineError {
    /// Build a [`PipelineError::MalformedLine`] for the given 1-based line number.
    pub fn malformed(line: u64, reason: impl Into<String>) -> Self {
        Self::MalformedLine {
            line,
            reason: reason.into(),
        }
    }

    /// Build a [`PipelineError::Codec`] error.
    pub fn codec(reason: impl Into<String>) -> Self {
        Self::Codec(reason.into())
    }
}

/// Convenience alias used throughout the sensor crates.
pub type Result<T> = std::result::Result<T, PipelineError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display_malformed_line() {
        let err = PipelineError::malformed(7, "invalid date '2024-13-01'");
        assert_eq!(err.to_string(), "Malformed line 7: invalid date '2024-13-01'");
    }

    #[test]
    fn test_error_display_codec() {
        let err = PipelineError::codec("missing <date>");
        assert_eq!(err.to_string(), "Codec error: missing <date>");
    }

    #[test]
    fn test_error_display_commit_failure() {
        let err = PipelineError::CommitFailure("repository unreachable".to_string());
        assert_eq!(err.to_string(), "Commit failed: repository unreachable");
    }

    #[test]
    fn test_error_display_file_read() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "no such file");
        let err = PipelineError::FileRead {
            path: PathBuf::from("/some/input.txt"),
            source: io_err,
        };
        let msg = err.to_string();
        assert!(msg.contains("Failed to read file"));
        assert!(msg.contains("/some/input.txt"));
        assert!(msg.contains("no such file"));
    }

    #[test]
    fn test_error_display_config() {
        let err = PipelineError::Config("chunk size must be positive".to_string());
        assert_eq!(
            err.to_string(),
            "Configuration error: chunk size must be positive"
        );
    }

    #[test]
    fn test_error_from_io() {
        let io_err = std::io::Error::new(std::io::ErrorKind::PermissionDenied, "denied");
        let err: PipelineError = io_err.into();
        assert!(err.to_string().contains("denied"));
    }

    #[test]
    fn test_error_from_serde_json() {
        let json_err = serde_json::from_str::<serde_json::Value>("{invalid}").unwrap_err();
        let err: PipelineError = json_err.into();
        assert!(err.to_string().contains("Failed to parse JSON"));
    }
}
