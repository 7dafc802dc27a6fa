//! Anomaly report persistence.
//!
//! Header-less CSV, one `date,type,value` row per anomaly. A fresh report
//! replaces any previous file; rows are never appended to an older run.

use std::fs::{File, OpenOptions};
use std::io::{Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use csv::{Terminator, WriterBuilder};
use tracing::debug;

use sensor_core::error::{PipelineError, Result};
use sensor_core::models::Anomaly;

/// Column delimiter of the report.
pub const REPORT_DELIMITER: u8 = b',';

pub struct AnomalyReportWriter {
    path: PathBuf,
    file: File,
    position: u64,
}

impl AnomalyReportWriter {
    /// Start a new report at `path`, truncating any existing file.
    pub fn create(path: &Path) -> Result<Self> {
        let file = File::create(path)?;
        Ok(Self {
            path: path.to_path_buf(),
            file,
            position: 0,
        })
    }

    /// Re-open a partially written report, dropping anything past `offset`.
    pub fn resume(path: &Path, offset: u64) -> Result<Self> {
        let mut file = OpenOptions::new().write(true).open(path)?;
        let len = file.metadata()?.len();
        if len < offset {
            return Err(PipelineError::Io(std::io::Error::new(
                std::io::ErrorKind::UnexpectedEof,
                format!(
                    "{} is {len} bytes, shorter than committed offset {offset}",
                    path.display()
                ),
            )));
        }
        file.set_len(offset)?;
        file.seek(SeekFrom::Start(offset))?;
        debug!(path = %path.display(), offset, "resumed anomaly report");
        Ok(Self {
            path: path.to_path_buf(),
            file,
            position: offset,
        })
    }

    /// Append a batch of anomalies.
    pub fn write(&mut self, anomalies: &[Anomaly]) -> Result<()> {
        if anomalies.is_empty() {
            return Ok(());
        }

        let mut writer = WriterBuilder::new()
            .has_headers(false)
            .delimiter(REPORT_DELIMITER)
            .terminator(Terminator::Any(b'\n'))
            .from_writer(Vec::new());
        for anomaly in anomalies {
            writer.serialize(anomaly)?;
        }
        let bytes = writer
            .into_inner()
            .map_err(|e| PipelineError::Io(e.into_error()))?;

        self.file.write_all(&bytes)?;
        self.position += bytes.len() as u64;
        Ok(())
    }

    /// Make everything written so far durable and return its length.
    pub fn flush(&mut self) -> Result<u64> {
        self.file.flush()?;
        self.file.sync_data()?;
        Ok(self.position)
    }

    /// Discard everything past `offset`.
    pub fn rollback(&mut self, offset: u64) -> Result<()> {
        self.file.set_len(offset)?;
        self.file.seek(SeekFrom::Start(offset))?;
        self.position = offset;
        Ok(())
    }

    pub fn close(mut self) -> Result<u64> {
        let len = self.flush()?;
        debug!(path = %self.path.display(), bytes = len, "closed anomaly report");
        Ok(len)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use csv::ReaderBuilder;
    use sensor_core::models::AnomalyType;
    use tempfile::TempDir;

    fn read_report(path: &Path) -> Vec<Anomaly> {
        let mut reader = ReaderBuilder::new()
            .has_headers(false)
            .delimiter(REPORT_DELIMITER)
            .from_path(path)
            .unwrap();
        reader.deserialize().map(|r| r.unwrap()).collect()
    }

    fn anomaly(date: &str, kind: AnomalyType, value: f64) -> Anomaly {
        Anomaly::new(
            NaiveDate::parse_from_str(date, "%Y-%m-%d").unwrap(),
            kind,
            value,
        )
    }

    #[test]
    fn test_row_layout() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("anomalies.csv");

        let mut writer = AnomalyReportWriter::create(&path).unwrap();
        writer
            .write(&[
                anomaly("2024-01-01", AnomalyType::High, 30.0),
                anomaly("2024-01-03", AnomalyType::MeanLow, 2.5),
            ])
            .unwrap();
        writer.close().unwrap();

        let content = std::fs::read_to_string(&path).unwrap();
        assert_eq!(content, "2024-01-01,HIGH,30.0\n2024-01-03,MEAN_LOW,2.5\n");
    }

    #[test]
    fn test_create_overwrites_previous_report() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("anomalies.csv");
        std::fs::write(&path, "2023-01-01,LOW,-9.0\n2023-01-02,LOW,-9.0\n").unwrap();

        let mut writer = AnomalyReportWriter::create(&path).unwrap();
        writer
            .write(&[anomaly("2024-01-01", AnomalyType::High, 30.0)])
            .unwrap();
        writer.close().unwrap();

        let rows = read_report(&path);
        assert_eq!(rows, vec![anomaly("2024-01-01", AnomalyType::High, 30.0)]);
    }

    #[test]
    fn test_empty_report() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("anomalies.csv");

        let mut writer = AnomalyReportWriter::create(&path).unwrap();
        writer.write(&[]).unwrap();
        assert_eq!(writer.close().unwrap(), 0);
        assert!(read_report(&path).is_empty());
    }

    #[test]
    fn test_rollback_then_resume() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("anomalies.csv");

        let mut writer = AnomalyReportWriter::create(&path).unwrap();
        writer
            .write(&[anomaly("2024-01-01", AnomalyType::High, 30.0)])
            .unwrap();
        let committed = writer.flush().unwrap();
        writer
            .write(&[anomaly("2024-01-02", AnomalyType::Low, -1.0)])
            .unwrap();
        writer.rollback(committed).unwrap();
        drop(writer);

        let mut resumed = AnomalyReportWriter::resume(&path, committed).unwrap();
        resumed
            .write(&[anomaly("2024-01-05", AnomalyType::Low, -2.0)])
            .unwrap();
        resumed.close().unwrap();

        let rows = read_report(&path);
        assert_eq!(
            rows,
            vec![
                anomaly("2024-01-01", AnomalyType::High, 30.0),
                anomaly("2024-01-05", AnomalyType::Low, -2.0),
            ]
        );
    }
}
