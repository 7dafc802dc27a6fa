//! The two-step sensor job.
//!
//! `aggregate-sensor` turns the raw input into the intermediate XML document;
//! `report-anomalies` turns that document into the anomaly report. The
//! second step only runs after the first completed.
//!
//! Instance resolution works on the stored step executions: if the previous
//! run finished (or there is none) the repository is cleared and a new
//! instance starts from scratch. Otherwise the run is a restart: completed
//! steps are skipped and the interrupted step resumes from its last commit.

use std::fmt;
use std::path::PathBuf;

use tracing::{info, warn};

use sensor_core::error::Result;
use sensor_core::settings::Settings;
use sensor_core::thresholds::Thresholds;
use sensor_data::codec::AggregateCodec;

use crate::repository::{JobRepository, StepStatus};
use crate::runner::{ChunkRunner, StepSummary};
use crate::steps::{
    AggregateItemReader, AggregateItemWriter, AggregatingProcessor, AnomalyItemWriter,
    DetectingProcessor, RawReadingItemReader,
};

pub const AGGREGATE_STEP: &str = "aggregate-sensor";
pub const REPORT_STEP: &str = "report-anomalies";

/// Step names in execution order.
pub const STEPS: [&str; 2] = [AGGREGATE_STEP, REPORT_STEP];

// ── JobConfig ─────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq)]
pub struct JobConfig {
    pub input: PathBuf,
    pub intermediate: PathBuf,
    pub report: PathBuf,
    pub chunk_size: u64,
    pub thresholds: Thresholds,
}

impl JobConfig {
    pub fn from_settings(settings: &Settings) -> Self {
        Self {
            input: settings.input.clone(),
            intermediate: settings.intermediate.clone(),
            report: settings.report.clone(),
            chunk_size: settings.chunk_size,
            thresholds: settings.thresholds(),
        }
    }
}

// ── JobExecution ──────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobStatus {
    Completed,
    Failed,
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            JobStatus::Completed => f.write_str("COMPLETED"),
            JobStatus::Failed => f.write_str("FAILED"),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct JobExecution {
    pub status: JobStatus,
    /// Whether this run continued an unfinished instance.
    pub restarted: bool,
    /// One entry per step that ran or was skipped as already complete.
    pub steps: Vec<StepSummary>,
    /// Message of the error that failed the job.
    pub failure: Option<String>,
}

impl JobExecution {
    pub fn is_success(&self) -> bool {
        self.status == JobStatus::Completed
    }
}

// ── SensorJob ─────────────────────────────────────────────────────────────────

pub struct SensorJob {
    config: JobConfig,
    codec: AggregateCodec,
}

impl SensorJob {
    pub fn new(config: JobConfig) -> Self {
        Self {
            config,
            codec: AggregateCodec::new(),
        }
    }

    /// Run the job against `repository`.
    ///
    /// Step failures are reported through [`JobExecution::status`]; an `Err`
    /// means the repository could not be read or reset before any step ran.
    pub fn run(&self, repository: &mut dyn JobRepository) -> Result<JobExecution> {
        let restarted = needs_restart(repository)?;
        if restarted {
            warn!("restarting unfinished job instance");
        } else {
            repository.reset()?;
            info!(
                input = %self.config.input.display(),
                chunk_size = self.config.chunk_size,
                "starting new job instance"
            );
        }

        let mut execution = JobExecution {
            status: JobStatus::Completed,
            restarted,
            steps: Vec::with_capacity(STEPS.len()),
            failure: None,
        };

        for step in STEPS {
            if let Some(done) = completed_summary(repository, step)? {
                info!(step, "step already completed, skipping");
                execution.steps.push(done);
                continue;
            }

            match self.run_step(repository, step) {
                Ok(summary) => execution.steps.push(summary),
                Err(e) => {
                    warn!(step, error = %e, "job failed");
                    execution.status = JobStatus::Failed;
                    execution.failure = Some(e.to_string());
                    return Ok(execution);
                }
            }
        }

        info!(status = %execution.status, "job finished");
        Ok(execution)
    }

    fn run_step(&self, repository: &mut dyn JobRepository, step: &str) -> Result<StepSummary> {
        let mut runner = ChunkRunner::new(repository, self.config.chunk_size)?;
        match step {
            AGGREGATE_STEP => runner.run(
                step,
                &mut RawReadingItemReader::new(&self.config.input),
                &mut AggregatingProcessor::new(),
                &mut AggregateItemWriter::new(&self.config.intermediate, self.codec),
            ),
            _ => runner.run(
                step,
                &mut AggregateItemReader::new(&self.config.intermediate, self.codec),
                &mut DetectingProcessor::new(self.config.thresholds),
                &mut AnomalyItemWriter::new(&self.config.report),
            ),
        }
    }
}

/// A stored instance is unfinished when some step has a record but the last
/// step has not completed.
fn needs_restart(repository: &dyn JobRepository) -> Result<bool> {
    let mut any = false;
    for step in STEPS {
        any |= repository.step_execution(step)?.is_some();
    }
    let last_done = repository
        .step_execution(REPORT_STEP)?
        .is_some_and(|e| e.status == StepStatus::Completed);
    Ok(any && !last_done)
}

fn completed_summary(repository: &dyn JobRepository, step: &str) -> Result<Option<StepSummary>> {
    Ok(repository
        .step_execution(step)?
        .filter(|e| e.status == StepStatus::Completed)
        .map(|e| {
            let cursor = e.cursor.unwrap_or_default();
            StepSummary::from_cursor(step, StepStatus::Completed, &cursor, true)
        }))
}

// ── Tests ─────────────────────────────────────────────────────────────────────
