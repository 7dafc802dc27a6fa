//! Intermediate aggregate document.
//!
//! One XML document per run: a fixed `<data>` root and one
//! `<dailyAggregatedSensorData>` child per aggregate, each on its own line.
//!
//! ```xml
//! <?xml version="1.0" encoding="UTF-8"?>
//! <data>
//! <dailyAggregatedSensorData><date>2024-01-01</date><count>3</count><mean>20.0</mean>...
//! <dailyAggregatedSensorData><date>2024-01-02</date><noData/></dailyAggregatedSensorData>
//! </data>
//! ```
//!
//! Items with data carry `<count>`, `<mean>`, `<min>` and `<max>` after the
//! date. A day without measurements is written with an explicit `<noData/>` marker
//! so it can never be read back as a real zero.

use std::fs::{File, OpenOptions};
use std::io::{BufRead, BufReader, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use chrono::NaiveDate;
use quick_xml::events::{BytesEnd, BytesStart, BytesText, Event};
use quick_xml::{Reader, Writer};
use tracing::debug;

use sensor_core::error::{PipelineError, Result};
use sensor_core::models::{AggregateStats, DailyAggregate};

pub const ROOT_TAG: &str = "data";
pub const ITEM_TAG: &str = "dailyAggregatedSensorData";
pub const NO_DATA_TAG: &str = "noData";

const DATE_FORMAT: &str = "%Y-%m-%d";
const DOCUMENT_HEADER: &str = "<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n<data>\n";
const DOCUMENT_FOOTER: &str = "</data>\n";

fn xml_err(e: impl std::fmt::Display) -> PipelineError {
    PipelineError::codec(e.to_string())
}

// ── AggregateCodec ────────────────────────────────────────────────────────────

/// Stateless encoder/decoder for single aggregate fragments.
///
/// Passed by value to both the document writer and reader.
#[derive(Debug, Clone, Copy, Default)]
pub struct AggregateCodec;

impl AggregateCodec {
    pub fn new() -> Self {
        Self
    }

    /// Encode one aggregate as a `<dailyAggregatedSensorData>` fragment.
    pub fn encode(&self, aggregate: &DailyAggregate) -> Result<String> {
        let mut writer = Writer::new(Vec::new());
        self.write_item(&mut writer, aggregate)?;
        String::from_utf8(writer.into_inner()).map_err(xml_err)
    }

    /// Decode one `<dailyAggregatedSensorData>` fragment.
    pub fn decode(&self, fragment: &str) -> Result<DailyAggregate> {
        let mut reader = Reader::from_str(fragment);
        reader.config_mut().trim_text(true);
        let mut buf = Vec::new();

        loop {
            let is_item = match reader.read_event_into(&mut buf).map_err(xml_err)? {
                Event::Start(e) if e.name().as_ref() == ITEM_TAG.as_bytes() => true,
                Event::Start(e) => {
                    return Err(PipelineError::codec(format!(
                        "expected <{ITEM_TAG}>, found <{}>",
                        String::from_utf8_lossy(e.name().as_ref())
                    )))
                }
                Event::Eof => {
                    return Err(PipelineError::codec(format!("no <{ITEM_TAG}> element")))
                }
                _ => false,
            };
            buf.clear();
            if is_item {
                return self.read_item_body(&mut reader);
            }
        }
    }

    fn write_item<W: Write>(
        &self,
        writer: &mut Writer<W>,
        aggregate: &DailyAggregate,
    ) -> Result<()> {
        writer
            .write_event(Event::Start(BytesStart::new(ITEM_TAG)))
            .map_err(xml_err)?;

        let date = aggregate.date.format(DATE_FORMAT).to_string();
        write_text_element(writer, "date", &date)?;

        match aggregate.stats {
            Some(stats) => {
                write_text_element(writer, "count", &stats.count.to_string())?;
                write_text_element(writer, "mean", &format!("{:?}", stats.mean))?;
                write_text_element(writer, "min", &format!("{:?}", stats.min))?;
                write_text_element(writer, "max", &format!("{:?}", stats.max))?;
            }
            None => {
                writer
                    .write_event(Event::Empty(BytesStart::new(NO_DATA_TAG)))
                    .map_err(xml_err)?;
            }
        }

        writer
            .write_event(Event::End(BytesEnd::new(ITEM_TAG)))
            .map_err(xml_err)?;
        Ok(())
    }

    /// Read the children of an item whose start tag was just consumed, up to
    /// and including its end tag.
    fn read_item_body<R: BufRead>(&self, reader: &mut Reader<R>) -> Result<DailyAggregate> {
        let mut fields = ItemFields::default();
        let mut current: Option<String> = None;
        let mut buf = Vec::new();

        loop {
            match reader.read_event_into(&mut buf).map_err(xml_err)? {
                Event::Start(e) => {
                    let name = String::from_utf8_lossy(e.name().as_ref()).into_owned();
                    if let Some(parent) = &current {
                        return Err(PipelineError::codec(format!(
                            "unexpected <{name}> inside <{parent}>"
                        )));
                    }
                    current = Some(name);
                }
                Event::Text(t) => {
                    let text = t.unescape().map_err(xml_err)?.into_owned();
                    match &current {
                        Some(name) => fields.set(name, text)?,
                        None => {
                            return Err(PipelineError::codec(format!(
                                "unexpected text '{text}' in <{ITEM_TAG}>"
                            )))
                        }
                    }
                }
                Event::Empty(e) => {
                    if e.name().as_ref() == NO_DATA_TAG.as_bytes() {
                        if fields.no_data {
                            return Err(PipelineError::codec(format!(
                                "repeated <{NO_DATA_TAG}/> in <{ITEM_TAG}>"
                            )));
                        }
                        fields.no_data = true;
                    } else {
                        return Err(PipelineError::codec(format!(
                            "empty <{}> in <{ITEM_TAG}>",
                            String::from_utf8_lossy(e.name().as_ref())
                        )));
                    }
                }
                Event::End(e) => {
                    if e.name().as_ref() == ITEM_TAG.as_bytes() {
                        break;
                    }
                    current = None;
                }
                Event::Eof => {
                    return Err(PipelineError::codec(format!(
                        "document ended inside <{ITEM_TAG}>"
                    )))
                }
                _ => {}
            }
            buf.clear();
        }

        fields.into_aggregate()
    }
}

fn write_text_element<W: Write>(writer: &mut Writer<W>, name: &str, text: &str) -> Result<()> {
    writer
        .write_event(Event::Start(BytesStart::new(name)))
        .map_err(xml_err)?;
    writer
        .write_event(Event::Text(BytesText::new(text)))
        .map_err(xml_err)?;
    writer
        .write_event(Event::End(BytesEnd::new(name)))
        .map_err(xml_err)?;
    Ok(())
}

// ── ItemFields ────────────────────────────────────────────────────────────────

/// Raw child values collected while reading one item.
#[derive(Default)]
struct ItemFields {
    date: Option<String>,
    count: Option<String>,
    mean: Option<String>,
    min: Option<String>,
    max: Option<String>,
    no_data: bool,
}

impl ItemFields {
    fn set(&mut self, name: &str, text: String) -> Result<()> {
        let slot = match name {
            "date" => &mut self.date,
            "count" => &mut self.count,
            "mean" => &mut self.mean,
            "min" => &mut self.min,
            "max" => &mut self.max,
            other => {
                return Err(PipelineError::codec(format!(
                    "unknown element <{other}> in <{ITEM_TAG}>"
                )))
            }
        };
        if slot.is_some() {
            return Err(PipelineError::codec(format!(
                "repeated element <{name}> in <{ITEM_TAG}>"
            )));
        }
        *slot = Some(text);
        Ok(())
    }

    fn into_aggregate(self) -> Result<DailyAggregate> {
        let date_text = self
            .date
            .ok_or_else(|| PipelineError::codec("missing required field <date>"))?;
        let date = NaiveDate::parse_from_str(&date_text, DATE_FORMAT)
            .map_err(|e| PipelineError::codec(format!("invalid <date> '{date_text}': {e}")))?;

        let has_numeric =
            self.count.is_some() || self.mean.is_some() || self.min.is_some() || self.max.is_some();

        if self.no_data {
            if has_numeric {
                return Err(PipelineError::codec(format!(
                    "aggregate for {date_text} has both <{NO_DATA_TAG}/> and statistics"
                )));
            }
            return Ok(DailyAggregate::no_data(date));
        }

        let count_text = required(self.count, "count", &date_text)?;
        let count: u64 = count_text
            .parse()
            .map_err(|_| PipelineError::codec(format!("invalid <count> '{count_text}'")))?;
        if count == 0 {
            return Err(PipelineError::codec(format!(
                "aggregate for {date_text} has count 0 without <{NO_DATA_TAG}/>"
            )));
        }

        Ok(DailyAggregate::with_stats(
            date,
            AggregateStats {
                count,
                mean: parse_float(required(self.mean, "mean", &date_text)?, "mean")?,
                min: parse_float(required(self.min, "min", &date_text)?, "min")?,
                max: parse_float(required(self.max, "max", &date_text)?, "max")?,
            },
        ))
    }
}

fn required(value: Option<String>, name: &str, date: &str) -> Result<String> {
    value.ok_or_else(|| {
        PipelineError::codec(format!("aggregate for {date} is missing required field <{name}>"))
    })
}

fn parse_float(text: String, name: &str) -> Result<f64> {
    text.parse::<f64>()
        .ok()
        .filter(|v| v.is_finite())
        .ok_or_else(|| PipelineError::codec(format!("invalid <{name}> '{text}'")))
}

// ── AggregateXmlWriter ────────────────────────────────────────────────────────

/// Appends aggregates to the intermediate document.
///
/// Tracks the byte length written so far; the runner persists it at commit
/// and a restart truncates back to it.
pub struct AggregateXmlWriter {
    path: PathBuf,
    file: File,
    codec: AggregateCodec,
    position: u64,
}

impl AggregateXmlWriter {
    /// Start a new document at `path`, replacing any existing file.
    pub fn create(path: &Path, codec: AggregateCodec) -> Result<Self> {
        let file = File::create(path)?;
        let mut writer = Self {
            path: path.to_path_buf(),
            file,
            codec,
            position: 0,
        };
        writer.append(DOCUMENT_HEADER)?;
        Ok(writer)
    }

    /// Re-open a partially written document, dropping anything past `offset`.
    pub fn resume(path: &Path, codec: AggregateCodec, offset: u64) -> Result<Self> {
        let mut file = OpenOptions::new().write(true).open(path)?;
        let len = file.metadata()?.len();
        if len < offset {
            return Err(PipelineError::codec(format!(
                "{} is {len} bytes, shorter than committed offset {offset}",
                path.display()
            )));
        }
        file.set_len(offset)?;
        file.seek(SeekFrom::Start(offset))?;
        debug!(path = %path.display(), offset, "resumed aggregate document");
        Ok(Self {
            path: path.to_path_buf(),
            file,
            codec,
            position: offset,
        })
    }

    /// Append a batch of aggregates.
    pub fn write(&mut self, aggregates: &[DailyAggregate]) -> Result<()> {
        let mut chunk = String::new();
        for aggregate in aggregates {
            chunk.push_str(&self.codec.encode(aggregate)?);
            chunk.push('\n');
        }
        self.append(&chunk)
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

    /// Write the closing root tag and flush.
    pub fn close(mut self) -> Result<u64> {
        self.append(DOCUMENT_FOOTER)?;
        let len = self.flush()?;
        debug!(path = %self.path.display(), bytes = len, "closed aggregate document");
        Ok(len)
    }

    fn append(&mut self, text: &str) -> Result<()> {
        self.file.write_all(text.as_bytes())?;
        self.position += text.len() as u64;
        Ok(())
    }
}

// ── AggregateXmlReader ────────────────────────────────────────────────────────

/// Streams aggregates back out of a closed intermediate document.
pub struct AggregateXmlReader {
    reader: Reader<BufReader<File>>,
    codec: AggregateCodec,
    root_open: bool,
    finished: bool,
}

impl AggregateXmlReader {
    /// Open `path` and skip the first `skip` aggregates.
    pub fn open(path: &Path, codec: AggregateCodec, skip: u64) -> Result<Self> {
        let file = File::open(path).map_err(|source| PipelineError::FileRead {
            path: path.to_path_buf(),
            source,
        })?;
        let mut reader = Reader::from_reader(BufReader::new(file));
        reader.config_mut().trim_text(true);

        let mut this = Self {
            reader,
            codec,
            root_open: false,
            finished: false,
        };
        for _ in 0..skip {
            if this.next_aggregate()?.is_none() {
                break;
            }
        }
        Ok(this)
    }

    /// Next aggregate in document order, or `None` after `</data>`.
    ///
    /// A document that ends without its closing root tag is corrupt.
    pub fn next_aggregate(&mut self) -> Result<Option<DailyAggregate>> {
        if self.finished {
            return Ok(None);
        }

        let mut buf = Vec::new();
        loop {
            let step = match self.reader.read_event_into(&mut buf).map_err(xml_err)? {
                Event::Start(e) => match e.name().as_ref() {
                    name if name == ROOT_TAG.as_bytes() && !self.root_open => Step::RootOpened,
                    name if name == ITEM_TAG.as_bytes() && self.root_open => Step::Item,
                    name => Step::Unexpected(String::from_utf8_lossy(name).into_owned()),
                },
                Event::Empty(e) if e.name().as_ref() == ROOT_TAG.as_bytes() && !self.root_open => {
                    Step::RootClosed
                }
                Event::Empty(e) => {
                    Step::Unexpected(String::from_utf8_lossy(e.name().as_ref()).into_owned())
                }
                Event::End(e) if e.name().as_ref() == ROOT_TAG.as_bytes() => Step::RootClosed,
                Event::Text(t) => Step::Unexpected(String::from_utf8_lossy(&t).into_owned()),
                Event::Eof => Step::Eof,
                _ => Step::Skip,
            };
            buf.clear();

            match step {
                Step::Skip => {}
                Step::RootOpened => self.root_open = true,
                Step::Item => return self.codec.read_item_body(&mut self.reader).map(Some),
                Step::RootClosed => {
                    self.finished = true;
                    self.expect_eof()?;
                    return Ok(None);
                }
                Step::Unexpected(what) => {
                    return Err(PipelineError::codec(format!(
                        "unexpected content '{what}' in aggregate document"
                    )))
                }
                Step::Eof => {
                    return Err(PipelineError::codec(format!(
                        "aggregate document ended before </{ROOT_TAG}>"
                    )))
                }
            }
        }
    }
}

impl AggregateXmlReader {
    /// Only comments and processing instructions may follow the root element.
    fn expect_eof(&mut self) -> Result<()> {
        let mut buf = Vec::new();
        loop {
            match self.reader.read_event_into(&mut buf).map_err(xml_err)? {
                Event::Eof => return Ok(()),
                Event::Comment(_) | Event::PI(_) => {}
                Event::Start(e) | Event::Empty(e) => {
                    return Err(PipelineError::codec(format!(
                        "unexpected <{}> after </{ROOT_TAG}>",
                        String::from_utf8_lossy(e.name().as_ref())
                    )))
                }
                other => {
                    return Err(PipelineError::codec(format!(
                        "unexpected content after </{ROOT_TAG}>: {other:?}"
                    )))
                }
            }
            buf.clear();
        }
    }
}

enum Step {
    Skip,
    RootOpened,
    Item,
    RootClosed,
    Unexpected(String),
    Eof,
}

// ── Tests ─────────────────────────────────────────────────────────────────────
