//! Runs conversion jobs on the blocking pool with bounded concurrency.

use std::sync::Arc;
use std::time::Instant;

use futures::future::join_all;
use point_converter::{
    CancellationToken, ConversionContext, ConversionError, ConversionResult, Converter, ErrorKind,
};
use serde::Serialize;
use tokio::sync::Semaphore;
use tracing::{error, info, warn};

use crate::jobs::Job;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Completed,
    /// Stopped at a layer boundary, or never started.
    Cancelled,
    Failed,
}

/// What happened to one job.
#[derive(Debug, Clone, Serialize)]
pub struct JobOutcome {
    pub name: String,
    pub status: JobStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<ConversionResult>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ConversionError>,
}

impl JobOutcome {
    fn from_result(name: String, result: Result<ConversionResult, ConversionError>) -> Self {
        match result {
            Ok(result) => Self {
                name,
                status: if result.cancelled {
                    JobStatus::Cancelled
                } else {
                    JobStatus::Completed
                },
                result: Some(result),
                error: None,
            },
            Err(e) => Self {
                name,
                status: JobStatus::Failed,
                result: None,
                error: Some(e),
            },
        }
    }

    fn not_started(name: String) -> Self {
        Self {
            name,
            status: JobStatus::Cancelled,
            result: None,
            error: None,
        }
    }

    fn task_failed(name: String, message: String) -> Self {
        Self {
            name,
            status: JobStatus::Failed,
            result: None,
            error: Some(ConversionError::new(ErrorKind::Io, message)),
        }
    }
}

/// Run every job, at most `max_concurrent` at a time.
///
/// Outcomes are returned in job order. Cancelling `token` stops running jobs
/// at their next layer boundary and marks jobs not yet started as cancelled.
pub async fn run_jobs(
    jobs: Vec<Job>,
    converter: Converter,
    max_concurrent: usize,
    token: CancellationToken,
) -> Vec<JobOutcome> {
    let total = jobs.len();
    info!(jobs = total, concurrency = max_concurrent, "Starting conversion jobs");
    let start = Instant::now();

    let semaphore = Arc::new(Semaphore::new(max_concurrent.max(1)));
    let converter = Arc::new(converter);
    let mut names = Vec::with_capacity(total);
    let mut handles = Vec::with_capacity(total);

    for job in jobs {
        let semaphore = semaphore.clone();
        let converter = converter.clone();
        let token = token.clone();
        let name = job.name.clone();

        let handle = tokio::spawn(async move {
            let permit = match semaphore.acquire_owned().await {
                Ok(permit) => permit,
                Err(e) => return JobOutcome::task_failed(job.name, e.to_string()),
            };
            if token.is_cancelled() {
                info!(job = %job.name, "Skipping job after cancellation");
                return JobOutcome::not_started(job.name);
            }

            let Job { name, request } = job;
            let progress_name = name.clone();
            let task = tokio::task::spawn_blocking(move || {
                let context = ConversionContext::new()
                    .with_cancellation(token)
                    .with_progress(move |p| info!(job = %progress_name, progress = %p, "Layer finished"));
                converter.convert(&request, &context)
            });

            let outcome = match task.await {
                Ok(result) => JobOutcome::from_result(name, result),
                Err(e) => JobOutcome::task_failed(name, format!("conversion task failed: {}", e)),
            };
            drop(permit);
            outcome
        });
        names.push(name);
        handles.push(handle);
    }

    let mut outcomes = Vec::with_capacity(total);
    for (name, joined) in names.into_iter().zip(join_all(handles).await) {
        let outcome = match joined {
            Ok(outcome) => outcome,
            Err(e) => {
                warn!(job = %name, error = %e, "Job task panicked");
                JobOutcome::task_failed(name, format!("job task failed: {}", e))
            }
        };
        match outcome.status {
            JobStatus::Completed => {
                let written = outcome.result.as_ref().map_or(0, |r| r.counts.records_written);
                info!(job = %outcome.name, records = written, "Job completed");
            }
            JobStatus::Cancelled => info!(job = %outcome.name, "Job cancelled"),
            JobStatus::Failed => {
                if let Some(e) = &outcome.error {
                    error!(job = %outcome.name, error = %e, "Job failed");
                }
            }
        }
        outcomes.push(outcome);
    }

    info!(
        jobs = total,
        duration_ms = start.elapsed().as_millis() as u64,
        "Conversion jobs finished"
    );
    outcomes
}
