//! Validation of new jobs before they enter the queue.

use super::models::Job;
use super::store::{now_ms, JobStore};
use crate::enhance::normalize;
use crate::server::metrics;
use crate::storage::{ObjectPath, StorageError};
use serde::Deserialize;
use serde_json::Value;
use thiserror::Error;
use tracing::info;

pub const MAX_INPUTS_PER_JOB: usize = 32;

#[derive(Debug, Error)]
pub enum SubmissionError {
    #[error("At least one input path is required")]
    NoInputs,

    #[error("Too many input paths: {0} (at most {MAX_INPUTS_PER_JOB})")]
    TooManyInputs(usize),

    #[error(transparent)]
    InvalidInputPath(#[from] StorageError),

    #[error("params must be a JSON object")]
    MalformedParams,

    #[error("Store error: {0}")]
    Store(#[from] anyhow::Error),
}

#[derive(Debug, Clone, Deserialize)]
pub struct SubmitJobRequest {
    #[serde(default)]
    pub params: Value,
    #[serde(default, alias = "input_urls")]
    pub input_paths: Vec<String>,
}

/// Validates a request and builds the queued job. Params are stored in
/// their normalized form.
pub fn prepare_job(request: SubmitJobRequest, now: i64) -> Result<Job, SubmissionError> {
    if request.input_paths.is_empty() {
        return Err(SubmissionError::NoInputs);
    }
    if request.input_paths.len() > MAX_INPUTS_PER_JOB {
        return Err(SubmissionError::TooManyInputs(request.input_paths.len()));
    }
    let input_paths = request
        .input_paths
        .iter()
        .map(|raw| ObjectPath::parse(raw).map(|p| p.to_string()))
        .collect::<Result<Vec<_>, _>>()?;

    let params = match &request.params {
        Value::Null | Value::Object(_) => normalize(&request.params).to_json(),
        _ => return Err(SubmissionError::MalformedParams),
    };

    Ok(Job::new_queued(
        uuid::Uuid::new_v4().to_string(),
        input_paths,
        params,
        now,
    ))
}

pub fn submit_job(store: &dyn JobStore, request: SubmitJobRequest) -> Result<Job, SubmissionError> {
    let job = prepare_job(request, now_ms())?;
    store.create_job(&job)?;
    metrics::record_job_submitted();
    info!(
        "Queued job {} with {} input(s)",
        job.id,
        job.input_paths.len()
    );
    Ok(job)
}
