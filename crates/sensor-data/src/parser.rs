//! Line grammar for the raw sensor file.
//!
//! ```text
//! line        := DATE (SEP MEASUREMENT)*
//! DATE        := YYYY-MM-DD
//! SEP         := one or more of whitespace, ',' or ';'
//! MEASUREMENT := finite real number
//! ```
//!
//! Blank lines and `#` comment lines carry no record.

use std::sync::OnceLock;

use chrono::NaiveDate;
use regex::Regex;
use sensor_core::error::{PipelineError, Result};
use sensor_core::models::RawReading;

/// Date format of the leading token.
pub const DATE_FORMAT: &str = "%Y-%m-%d";

/// Lines starting with this prefix (after leading whitespace) are ignored.
pub const COMMENT_PREFIX: char = '#';

fn separator() -> &'static Regex {
    static SEPARATOR: OnceLock<Regex> = OnceLock::new();
    SEPARATOR.get_or_init(|| Regex::new(r"[\s,;]+").expect("regex is valid"))
}

/// Parse one raw line.
///
/// `line_no` is 1-based and only used for error reporting. Returns
/// `Ok(None)` for blank and comment lines, which is how trailing blank lines
/// are told apart from malformed input.
pub fn parse_line(line_no: u64, line: &str) -> Result<Option<RawReading>> {
    let trimmed = line.trim();
    if trimmed.is_empty() || trimmed.starts_with(COMMENT_PREFIX) {
        return Ok(None);
    }

    let mut tokens = separator().split(trimmed).filter(|t| !t.is_empty());

    let date_token = tokens
        .next()
        .ok_or_else(|| PipelineError::malformed(line_no, "missing date"))?;
    let date = NaiveDate::parse_from_str(date_token, DATE_FORMAT).map_err(|e| {
        PipelineError::malformed(line_no, format!("invalid date '{date_token}': {e}"))
    })?;

    let measurements = tokens
        .map(|token| parse_measurement(line_no, token))
        .collect::<Result<Vec<f64>>>()?;

    Ok(Some(RawReading::new(date, measurements)))
}

fn parse_measurement(line_no: u64, token: &str) -> Result<f64> {
    let value: f64 = token.parse().map_err(|_| {
        PipelineError::malformed(line_no, format!("invalid measurement '{token}'"))
    })?;
    if !value.is_finite() {
        return Err(PipelineError::malformed(
            line_no,
            format!("non-finite measurement '{token}'"),
        ));
    }
    Ok(value)
}

/// Render a reading back into the canonical single-space layout.
///
/// Floats use the shortest representation that parses back to the same
/// value, so `parse_line(render_line(r)) == r`.
pub fn render_line(reading: &RawReading) -> String {
    let mut line = reading.date.format(DATE_FORMAT).to_string();
    for m in &reading.measurements {
        line.push(' ');
        line.push_str(&format!("{m:?}"));
    }
    line
}
