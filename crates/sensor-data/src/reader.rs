//! Streaming reader for the raw sensor file.
//!
//! Wraps a buffered file handle and the line [`parser`](crate::parser),
//! yielding one [`RawReading`] per record line. Restart support is by record
//! count: the first `skip` readings are parsed and discarded so that a step
//! resumes exactly after its last committed item.

use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};

use sensor_core::error::{PipelineError, Result};
use sensor_core::models::RawReading;
use tracing::debug;

use crate::parser::parse_line;

pub struct ReadingReader {
    path: PathBuf,
    lines: std::io::Lines<BufReader<File>>,
    /// 1-based number of the last physical line consumed.
    line_no: u64,
}

impl ReadingReader {
    /// Open `path` and skip the first `skip` readings.
    pub fn open(path: &Path, skip: u64) -> Result<Self> {
        let file = File::open(path).map_err(|source| PipelineError::FileRead {
            path: path.to_path_buf(),
            source,
        })?;

        let mut reader = Self {
            path: path.to_path_buf(),
            lines: BufReader::new(file).lines(),
            line_no: 0,
        };

        for skipped in 0..skip {
            if reader.next_reading()?.is_none() {
                debug!(
                    path = %reader.path.display(),
                    skipped,
                    "input ended while skipping committed readings"
                );
                break;
            }
        }

        Ok(reader)
    }

    /// Next reading, or `None` at end of input.
    ///
    /// Blank and comment lines are passed over; a malformed line is an error.
    pub fn next_reading(&mut self) -> Result<Option<RawReading>> {
        for line in self.lines.by_ref() {
            let line = line.map_err(|source| PipelineError::FileRead {
                path: self.path.clone(),
                source,
            })?;
            self.line_no += 1;

            if let Some(reading) = parse_line(self.line_no, &line)? {
                return Ok(Some(reading));
            }
        }
        Ok(None)
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
