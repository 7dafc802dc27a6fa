//! Runner components for the two pipeline steps.
//!
//! Step 1: [`RawReadingItemReader`] → [`AggregatingProcessor`] →
//! [`AggregateItemWriter`]. Step 2: [`AggregateItemReader`] →
//! [`DetectingProcessor`] → [`AnomalyItemWriter`].

use std::path::{Path, PathBuf};

use serde_json::Value;

use sensor_core::error::{PipelineError, Result};
use sensor_core::models::{Anomaly, DailyAggregate, RawReading};
use sensor_core::thresholds::Thresholds;
use sensor_data::aggregator::Aggregator;
use sensor_data::codec::{AggregateCodec, AggregateXmlReader, AggregateXmlWriter};
use sensor_data::detector::AnomalyDetector;
use sensor_data::reader::ReadingReader;
use sensor_data::report::AnomalyReportWriter;

use crate::runner::{ItemProcessor, ItemReader, ItemWriter};

fn not_open(what: &str, path: &Path) -> PipelineError {
    PipelineError::Other(anyhow::anyhow!("{what} {} used before open", path.display()))
}

// ── Step 1 ────────────────────────────────────────────────────────────────────

pub struct RawReadingItemReader {
    path: PathBuf,
    inner: Option<ReadingReader>,
}

impl RawReadingItemReader {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            inner: None,
        }
    }
}

impl ItemReader for RawReadingItemReader {
    type Item = RawReading;

    fn open(&mut self, skip: u64) -> Result<()> {
        self.inner = Some(ReadingReader::open(&self.path, skip)?);
        Ok(())
    }

    fn read(&mut self) -> Result<Option<RawReading>> {
        match self.inner.as_mut() {
            Some(reader) => reader.next_reading(),
            None => Err(not_open("reader", &self.path)),
        }
    }
}

/// Folds readings into per-day statistics; emits them once input ends.
#[derive(Debug, Default)]
pub struct AggregatingProcessor {
    aggregator: Aggregator,
}

impl AggregatingProcessor {
    pub fn new() -> Self {
        Self::default()
    }
}

impl ItemProcessor for AggregatingProcessor {
    type Input = RawReading;
    type Output = DailyAggregate;

    fn process(&mut self, reading: RawReading) -> Result<Vec<DailyAggregate>> {
        self.aggregator.accept(&reading);
        Ok(Vec::new())
    }

    fn finish(&mut self) -> Result<Vec<DailyAggregate>> {
        Ok(self.aggregator.finish())
    }

    fn snapshot(&self) -> Result<Option<Value>> {
        Ok(Some(serde_json::to_value(&self.aggregator)?))
    }

    fn restore(&mut self, state: Value) -> Result<()> {
        self.aggregator = serde_json::from_value(state)?;
        Ok(())
    }
}

pub struct AggregateItemWriter {
    path: PathBuf,
    codec: AggregateCodec,
    inner: Option<AggregateXmlWriter>,
}

impl AggregateItemWriter {
    pub fn new(path: impl Into<PathBuf>, codec: AggregateCodec) -> Self {
        Self {
            path: path.into(),
            codec,
            inner: None,
        }
    }

    fn writer(&mut self) -> Result<&mut AggregateXmlWriter> {
        match self.inner.as_mut() {
            Some(w) => Ok(w),
            None => Err(not_open("aggregate writer", &self.path)),
        }
    }
}

impl ItemWriter for AggregateItemWriter {
    type Item = DailyAggregate;

    fn open(&mut self, resume_offset: Option<u64>) -> Result<u64> {
        let mut writer = match resume_offset {
            Some(offset) => AggregateXmlWriter::resume(&self.path, self.codec, offset)?,
            None => AggregateXmlWriter::create(&self.path, self.codec)?,
        };
        let offset = writer.flush()?;
        self.inner = Some(writer);
        Ok(offset)
    }

    fn write(&mut self, items: &[DailyAggregate]) -> Result<()> {
        self.writer()?.write(items)
    }

    fn flush(&mut self) -> Result<u64> {
        self.writer()?.flush()
    }

    fn rollback(&mut self, offset: u64) -> Result<()> {
        match self.inner.as_mut() {
            Some(w) => w.rollback(offset),
            // Closed (or failed while closing): truncate the file directly.
            None => AggregateXmlWriter::resume(&self.path, self.codec, offset).map(drop),
        }
    }

    fn close(&mut self) -> Result<()> {
        match self.inner.take() {
            Some(w) => w.close().map(drop),
            None => Err(not_open("aggregate writer", &self.path)),
        }
    }
}

// ── Step 2 ────────────────────────────────────────────────────────────────────

pub struct AggregateItemReader {
    path: PathBuf,
    codec: AggregateCodec,
    inner: Option<AggregateXmlReader>,
}

impl AggregateItemReader {
    pub fn new(path: impl Into<PathBuf>, codec: AggregateCodec) -> Self {
        Self {
            path: path.into(),
            codec,
            inner: None,
        }
    }
}

impl ItemReader for AggregateItemReader {
    type Item = DailyAggregate;

    fn open(&mut self, skip: u64) -> Result<()> {
        self.inner = Some(AggregateXmlReader::open(&self.path, self.codec, skip)?);
        Ok(())
    }

    fn read(&mut self) -> Result<Option<DailyAggregate>> {
        match self.inner.as_mut() {
            Some(reader) => reader.next_aggregate(),
            None => Err(not_open("aggregate reader", &self.path)),
        }
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct DetectingProcessor {
    detector: AnomalyDetector,
}

impl DetectingProcessor {
    pub fn new(thresholds: Thresholds) -> Self {
        Self {
            detector: AnomalyDetector::new(thresholds),
        }
    }
}

impl ItemProcessor for DetectingProcessor {
    type Input = DailyAggregate;
    type Output = Anomaly;

    fn process(&mut self, aggregate: DailyAggregate) -> Result<Vec<Anomaly>> {
        Ok(self.detector.detect(&aggregate))
    }
}

pub struct AnomalyItemWriter {
    path: PathBuf,
    inner: Option<AnomalyReportWriter>,
}

impl AnomalyItemWriter {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            inner: None,
        }
    }

    fn writer(&mut self) -> Result<&mut AnomalyReportWriter> {
        match self.inner.as_mut() {
            Some(w) => Ok(w),
            None => Err(not_open("report writer", &self.path)),
        }
    }
}

impl ItemWriter for AnomalyItemWriter {
    type Item = Anomaly;

    fn open(&mut self, resume_offset: Option<u64>) -> Result<u64> {
        let writer = match resume_offset {
            Some(offset) => AnomalyReportWriter::resume(&self.path, offset)?,
            None => AnomalyReportWriter::create(&self.path)?,
        };
        self.inner = Some(writer);
        Ok(resume_offset.unwrap_or(0))
    }

    fn write(&mut self, items: &[Anomaly]) -> Result<()> {
        self.writer()?.write(items)
    }

    fn flush(&mut self) -> Result<u64> {
        self.writer()?.flush()
    }

    fn rollback(&mut self, offset: u64) -> Result<()> {
        match self.inner.as_mut() {
            Some(w) => w.rollback(offset),
            None => AnomalyReportWriter::resume(&self.path, offset).map(drop),
        }
    }

    fn close(&mut self) -> Result<()> {
        match self.inner.take() {
            Some(w) => w.close().map(drop),
            None => Err(not_open("report writer", &self.path)),
        }
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
