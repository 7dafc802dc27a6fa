mod bootstrap;

use std::process::ExitCode;

use anyhow::{Context, Result};
use sensor_core::settings::Settings;
use sensor_runtime::job::{JobConfig, SensorJob, STEPS};
use sensor_runtime::repository::{FileJobRepository, JobRepository};

fn main() -> ExitCode {
    match run() {
        Ok(code) => code,
        Err(e) => {
            tracing::error!("{e:#}");
            eprintln!("Error: {e:#}");
            ExitCode::FAILURE
        }
    }
}

fn run() -> Result<ExitCode> {
    let settings = Settings::load()?;
    let repository_path = settings.repository_path();

    bootstrap::ensure_directories(&repository_path, settings.log_file.as_deref())?;
    bootstrap::setup_logging(&settings.log_level, settings.log_file.as_deref())?;

    tracing::info!("sensor-batch v{} starting", env!("CARGO_PKG_VERSION"));
    tracing::debug!(repository = %repository_path.display(), "using job repository");

    if settings.status {
        let repository = FileJobRepository::open(&repository_path)?;
        print_status(&repository)?;
        return Ok(ExitCode::SUCCESS);
    }

    let mut repository = if settings.fresh {
        let repository = FileJobRepository::create_empty(&repository_path)?;
        tracing::info!("discarded stored step executions");
        repository
    } else {
        FileJobRepository::open(&repository_path).with_context(|| {
            format!(
                "cannot read job repository {}; rerun with --fresh to start a new job instance",
                repository_path.display()
            )
        })?
    };

    let job = SensorJob::new(JobConfig::from_settings(&settings));
    let execution = job.run(&mut repository)?;

    for step in &execution.steps {
        println!("{step}");
    }
    if let Some(failure) = &execution.failure {
        eprintln!("Failure: {failure}");
    }
    println!("Job Status: {}", execution.status);

    Ok(if execution.is_success() {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    })
}

fn print_status(repository: &FileJobRepository) -> Result<()> {
    println!("Repository: {}", repository.path().display());
    for step in STEPS {
        match repository.step_execution(step)? {
            Some(execution) => {
                let cursor = execution.cursor.unwrap_or_default();
                println!(
                    "{step}: {} (read={}, written={}, commits={})",
                    execution.status, cursor.read_count, cursor.write_count, cursor.commit_count
                );
                if let Some(message) = execution.exit_message {
                    println!("  {message}");
                }
            }
            None => println!("{step}: NOT_STARTED"),
        }
    }
    Ok(())
}
