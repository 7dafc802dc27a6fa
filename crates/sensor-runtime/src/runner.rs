//! Chunk-oriented step execution.
//!
//! A step is a reader, a processor and a writer. Items are read and
//! processed `chunk_size` at a time; each chunk's outputs are written,
//! flushed, and then the new [`StepCursor`] is committed to the
//! [`JobRepository`]. A chunk is therefore either fully visible (output bytes
//! plus cursor) or not at all: on any failure the writer is rolled back to the
//! last committed offset.
//!
//! Processors that only produce output once the input is exhausted (the daily
//! aggregator) do so through [`ItemProcessor::finish`]. Their running state is
//! stored in the cursor with every read-phase commit, and the outputs of
//! `finish` are committed in chunks of their own, counted by
//! `emitted_count`, so a restart skips what was already written.

use std::fmt;

use serde_json::Value;
use tracing::{debug, error, info, warn};

use sensor_core::error::{PipelineError, Result};

use crate::repository::{JobRepository, StepCursor, StepStatus};

/// Largest accepted commit interval.
pub const MAX_CHUNK_SIZE: u64 = 10_000;

// ── Component traits ──────────────────────────────────────────────────────────

pub trait ItemReader {
    type Item;

    /// Position the reader after the first `skip` items.
    fn open(&mut self, skip: u64) -> Result<()>;

    /// Next item, or `None` at end of input.
    fn read(&mut self) -> Result<Option<Self::Item>>;
}

pub trait ItemProcessor {
    type Input;
    type Output;

    /// Transform one input into zero or more outputs.
    fn process(&mut self, item: Self::Input) -> Result<Vec<Self::Output>>;

    /// Outputs produced once the input is exhausted. Must be deterministic for
    /// a given state, since a restarted step calls it again.
    fn finish(&mut self) -> Result<Vec<Self::Output>> {
        Ok(Vec::new())
    }

    /// State to store with each commit. Stateless processors return `None`.
    fn snapshot(&self) -> Result<Option<Value>> {
        Ok(None)
    }

    fn restore(&mut self, _state: Value) -> Result<()> {
        Ok(())
    }
}

pub trait ItemWriter {
    type Item;

    /// Open the output. With `Some(offset)` the output is truncated to that
    /// committed offset and reopened for appending; with `None` it is
    /// recreated. Returns the current durable offset.
    fn open(&mut self, resume_offset: Option<u64>) -> Result<u64>;

    fn write(&mut self, items: &[Self::Item]) -> Result<()>;

    /// Make everything written durable and return the output length.
    fn flush(&mut self) -> Result<u64>;

    /// Discard everything past `offset`.
    fn rollback(&mut self, offset: u64) -> Result<()>;

    /// Finalize the output after the last chunk.
    fn close(&mut self) -> Result<()>;
}

// ── StepSummary ───────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq)]
pub struct StepSummary {
    pub name: String,
    pub status: StepStatus,
    pub read_count: u64,
    pub write_count: u64,
    pub commit_count: u64,
    /// Whether execution continued from a stored cursor.
    pub resumed: bool,
}

impl StepSummary {
    pub(crate) fn from_cursor(
        name: &str,
        status: StepStatus,
        cursor: &StepCursor,
        resumed: bool,
    ) -> Self {
        Self {
            name: name.to_string(),
            status,
            read_count: cursor.read_count,
            write_count: cursor.write_count,
            commit_count: cursor.commit_count,
            resumed,
        }
    }
}

impl fmt::Display for StepSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}: {} (read={}, written={}, commits={})",
            self.name, self.status, self.read_count, self.write_count, self.commit_count
        )
    }
}

// ── ChunkRunner ───────────────────────────────────────────────────────────────

pub struct ChunkRunner<'r> {
    repository: &'r mut dyn JobRepository,
    chunk_size: u64,
}

impl<'r> ChunkRunner<'r> {
    /// `chunk_size` must lie in `1..=MAX_CHUNK_SIZE`.
    pub fn new(repository: &'r mut dyn JobRepository, chunk_size: u64) -> Result<Self> {
        if !(1..=MAX_CHUNK_SIZE).contains(&chunk_size) {
            return Err(PipelineError::Config(format!(
                "chunk size {chunk_size} outside 1..={MAX_CHUNK_SIZE}"
            )));
        }
        Ok(Self {
            repository,
            chunk_size,
        })
    }

    /// Run one step to completion, resuming from its stored cursor if any.
    ///
    /// The step is marked `RUNNING` on entry and `COMPLETED` or `FAILED` on
    /// exit. The error that failed the step is returned unchanged.
    pub fn run<R, P, W>(
        &mut self,
        step: &str,
        reader: &mut R,
        processor: &mut P,
        writer: &mut W,
    ) -> Result<StepSummary>
    where
        R: ItemReader,
        P: ItemProcessor<Input = R::Item>,
        W: ItemWriter<Item = P::Output>,
    {
        let stored = self.repository.load_cursor(step)?;
        let resumed = stored.is_some();
        let mut cursor = stored.unwrap_or_default();

        self.repository.mark_status(step, StepStatus::Running, None)?;
        if resumed {
            info!(
                step,
                read = cursor.read_count,
                emitted = cursor.emitted_count,
                offset = cursor.writer_offset,
                "resuming step"
            );
        } else {
            info!(step, chunk_size = self.chunk_size, "starting step");
        }

        match self.drive(step, reader, processor, writer, &mut cursor, resumed) {
            Ok(()) => {
                self.repository.mark_status(step, StepStatus::Completed, None)?;
                info!(
                    step,
                    read = cursor.read_count,
                    written = cursor.write_count,
                    commits = cursor.commit_count,
                    "step completed"
                );
                Ok(StepSummary::from_cursor(step, StepStatus::Completed, &cursor, resumed))
            }
            Err(e) => {
                error!(step, error = %e, "step failed");
                let message = e.to_string();
                if let Err(mark) = self
                    .repository
                    .mark_status(step, StepStatus::Failed, Some(&message))
                {
                    warn!(step, error = %mark, "could not record step failure");
                }
                Err(e)
            }
        }
    }

    fn drive<R, P, W>(
        &mut self,
        step: &str,
        reader: &mut R,
        processor: &mut P,
        writer: &mut W,
        cursor: &mut StepCursor,
        resumed: bool,
    ) -> Result<()>
    where
        R: ItemReader,
        P: ItemProcessor<Input = R::Item>,
        W: ItemWriter<Item = P::Output>,
    {
        if let Some(state) = cursor.processor_state.clone() {
            processor.restore(state)?;
        }
        reader.open(cursor.read_count)?;
        let offset = writer.open(resumed.then_some(cursor.writer_offset))?;
        if !resumed {
            cursor.writer_offset = offset;
        }

        let outcome = self.chunks(step, reader, processor, writer, cursor);
        let outcome = outcome.and_then(|()| writer.close());
        if let Err(e) = outcome {
            if let Err(rb) = writer.rollback(cursor.writer_offset) {
                warn!(step, offset = cursor.writer_offset, error = %rb, "rollback failed");
            } else {
                warn!(step, offset = cursor.writer_offset, "rolled back uncommitted output");
            }
            return Err(e);
        }
        Ok(())
    }

    fn chunks<R, P, W>(
        &mut self,
        step: &str,
        reader: &mut R,
        processor: &mut P,
        writer: &mut W,
        cursor: &mut StepCursor,
    ) -> Result<()>
    where
        R: ItemReader,
        P: ItemProcessor<Input = R::Item>,
        W: ItemWriter<Item = P::Output>,
    {
        // Read phase.
        loop {
            let mut outputs = Vec::new();
            let mut read = 0;
            let mut exhausted = false;
            while read < self.chunk_size {
                match reader.read()? {
                    Some(item) => {
                        read += 1;
                        outputs.extend(processor.process(item)?);
                    }
                    None => {
                        exhausted = true;
                        break;
                    }
                }
            }
            if read > 0 {
                self.commit(step, writer, processor, cursor, &outputs, read, 0)?;
            }
            if exhausted {
                break;
            }
        }

        // Flush phase.
        let already = cursor.emitted_count as usize;
        let pending: Vec<P::Output> = processor.finish()?.into_iter().skip(already).collect();
        if !pending.is_empty() {
            debug!(step, pending = pending.len(), skipped = already, "emitting end-of-input items");
        }
        let mut pending = pending.into_iter().peekable();
        while pending.peek().is_some() {
            let chunk: Vec<P::Output> = pending.by_ref().take(self.chunk_size as usize).collect();
            let emitted = chunk.len() as u64;
            self.commit(step, writer, processor, cursor, &chunk, 0, emitted)?;
        }
        Ok(())
    }

    #[allow(clippy::too_many_arguments)]
    fn commit<P, W>(
        &mut self,
        step: &str,
        writer: &mut W,
        processor: &P,
        cursor: &mut StepCursor,
        items: &[W::Item],
        read: u64,
        emitted: u64,
    ) -> Result<()>
    where
        P: ItemProcessor,
        W: ItemWriter,
    {
        writer.write(items)?;
        let offset = writer.flush()?;
        let next = StepCursor {
            read_count: cursor.read_count + read,
            emitted_count: cursor.emitted_count + emitted,
            write_count: cursor.write_count + items.len() as u64,
            writer_offset: offset,
            commit_count: cursor.commit_count + 1,
            processor_state: processor.snapshot()?,
        };
        self.repository.commit(step, &next)?;
        debug!(
            step,
            commit = next.commit_count,
            read = next.read_count,
            written = next.write_count,
            offset,
            "chunk committed"
        );
        *cursor = next;
        Ok(())
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
