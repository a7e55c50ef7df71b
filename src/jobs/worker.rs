//! The poll/claim/execute/finalize loop.
//!
//! Each tick claims at most one job. A claimed job always ends in exactly
//! one terminal transition, even when processing panics.

use super::models::*;
use super::store::{now_ms, ClaimResult, EventStore, JobStore};
use crate::enhance::{
    normalize, select, ChannelLayout, ControlSet, EnhanceInput, EnhancePipeline, MediaKind,
    TranscodeError,
};
use crate::server::metrics;
use crate::storage::{ObjectPath, ObjectStorage, StorageError};
use futures::FutureExt;
use serde_json::json;
use std::any::Any;
use std::collections::HashSet;
use std::panic::AssertUnwindSafe;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::io::AsyncReadExt;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Bytes read from the start of an input for magic-number detection.
const SNIFF_LEN: usize = 8192;

#[derive(Debug, Error)]
pub enum WorkerError {
    #[error("input {index} ({path}): {source}")]
    Transcode {
        index: usize,
        path: String,
        #[source]
        source: TranscodeError,
    },

    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("scratch IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("store error: {0:#}")]
    Store(#[from] anyhow::Error),
}

#[derive(Debug, Clone)]
pub struct WorkerConfig {
    pub worker_id: String,
    pub poll_interval: Duration,
    /// Parent of the per-job scratch directories.
    pub scratch_dir: PathBuf,
    /// How long a running job may go without a record update before it is reported.
    pub stale_after: Duration,
    pub stale_check_interval: Duration,
}

impl WorkerConfig {
    pub fn new(worker_id: impl Into<String>, scratch_dir: impl Into<PathBuf>) -> Self {
        WorkerConfig {
            worker_id: worker_id.into(),
            poll_interval: Duration::from_millis(2000),
            scratch_dir: scratch_dir.into(),
            stale_after: Duration::from_secs(3600),
            stale_check_interval: Duration::from_secs(60),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TickOutcome {
    /// Nothing queued, or the store could not be read.
    Idle,
    /// Another worker claimed the job first.
    LostRace(String),
    Processed { job_id: String, status: JobStatus },
}

pub struct EnhanceWorker {
    config: WorkerConfig,
    jobs: Arc<dyn JobStore>,
    events: Arc<dyn EventStore>,
    storage: Arc<dyn ObjectStorage>,
    pipeline: Arc<EnhancePipeline>,
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

/// `<stem>.enhanced.<ext>`, or `<stem>-<index>.enhanced.<ext>` when an
/// earlier input of the same job already took that name, then
/// `<stem>-<index>-<n>.enhanced.<ext>` until the name is unused.
fn output_file_name(
    input_name: &str,
    kind: MediaKind,
    index: usize,
    taken: &mut HashSet<String>,
) -> String {
    let stem = Path::new(input_name)
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .filter(|s| !s.is_empty())
        .unwrap_or_else(|| "output".to_string());
    let ext = kind.output_extension();

    let mut name = format!("{}.enhanced.{}", stem, ext);
    if taken.contains(&name) {
        name = format!("{}-{}.enhanced.{}", stem, index, ext);
    }
    let mut n = 1;
    while taken.contains(&name) {
        name = format!("{}-{}-{}.enhanced.{}", stem, index, n, ext);
        n += 1;
    }
    taken.insert(name.clone());
    name
}

async fn sniff(path: &Path) -> std::io::Result<Vec<u8>> {
    let mut file = tokio::fs::File::open(path).await?;
    let mut head = vec![0u8; SNIFF_LEN];
    let mut filled = 0;
    while filled < SNIFF_LEN {
        let n = file.read(&mut head[filled..]).await?;
        if n == 0 {
            break;
        }
        filled += n;
    }
    head.truncate(filled);
    Ok(head)
}

impl EnhanceWorker {
    pub fn new(
        config: WorkerConfig,
        jobs: Arc<dyn JobStore>,
        events: Arc<dyn EventStore>,
        storage: Arc<dyn ObjectStorage>,
        pipeline: Arc<EnhancePipeline>,
    ) -> Self {
        EnhanceWorker {
            config,
            jobs,
            events,
            storage,
            pipeline,
        }
    }

    pub fn id(&self) -> &str {
        &self.config.worker_id
    }

    /// Runs until `shutdown` is cancelled. A job in flight when the token
    /// fires is finished before the loop exits.
    pub async fn run(&self, shutdown: CancellationToken) {
        info!(
            "Worker {} polling every {:?}",
            self.config.worker_id, self.config.poll_interval
        );
        let mut poll = tokio::time::interval(self.config.poll_interval);
        poll.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut stale_check = tokio::time::interval(self.config.stale_check_interval);
        stale_check.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                biased;
                _ = shutdown.cancelled() => break,
                _ = poll.tick() => {
                    self.tick().await;
                }
                _ = stale_check.tick() => self.report_stale(),
            }
        }
        info!("Worker {} stopped", self.config.worker_id);
    }

    /// One claim attempt, and the full processing of the claimed job if any.
    pub async fn tick(&self) -> TickOutcome {
        let claim = match self
            .jobs
            .claim_next(ENHANCE_JOB_TYPE, &self.config.worker_id)
        {
            Ok(claim) => claim,
            Err(e) => {
                error!("Worker {} failed to claim: {:#}", self.config.worker_id, e);
                return TickOutcome::Idle;
            }
        };

        match claim {
            ClaimResult::Empty => TickOutcome::Idle,
            ClaimResult::Lost(job_id) => {
                info!(
                    "Worker {} lost the claim on job {}, retrying next tick",
                    self.config.worker_id, job_id
                );
                metrics::record_claim_lost();
                TickOutcome::LostRace(job_id)
            }
            ClaimResult::Claimed(job) => {
                info!(
                    "Worker {} claimed job {} ({} input(s))",
                    self.config.worker_id,
                    job.id,
                    job.input_paths.len()
                );
                metrics::record_job_claimed();
                let job_id = job.id.clone();
                let status = self.process(job).await;
                TickOutcome::Processed { job_id, status }
            }
        }
    }

    async fn process(&self, job: Job) -> JobStatus {
        let start = Instant::now();
        let result = AssertUnwindSafe(self.execute(&job)).catch_unwind().await;

        let outcome = match result {
            Ok(Ok(outputs)) => JobOutcome::Completed { outputs },
            Ok(Err(e)) => {
                error!("Job {} failed: {}", job.id, e);
                JobOutcome::Failed {
                    error: e.to_string(),
                }
            }
            Err(panic) => {
                let message = panic_message(panic.as_ref());
                error!("Job {} panicked: {}", job.id, message);
                JobOutcome::Failed {
                    error: format!("internal error: {}", message),
                }
            }
        };

        match self.jobs.finalize(&job.id, &outcome) {
            Ok(true) => info!(
                "Job {} {} after {:?}",
                job.id,
                outcome.status().as_db_str(),
                start.elapsed()
            ),
            Ok(false) => warn!(
                "Job {} was no longer running, terminal state not written",
                job.id
            ),
            Err(e) => error!("Failed to finalize job {}: {:#}", job.id, e),
        }
        metrics::record_job_finished(outcome.status().as_db_str(), start.elapsed());
        outcome.status()
    }

    fn emit(&self, job_id: &str, event: NewJobEvent) -> Result<(), WorkerError> {
        self.events.append_event(job_id, &event)?;
        Ok(())
    }

    async fn execute(&self, job: &Job) -> Result<Vec<String>, WorkerError> {
        tokio::fs::create_dir_all(&self.config.scratch_dir).await?;
        // Removed on every exit path, panics included
        let scratch = tempfile::Builder::new()
            .prefix(&format!("job-{}-", job.id))
            .tempdir_in(&self.config.scratch_dir)?;

        self.emit(
            &job.id,
            NewJobEvent::info(
                EVENT_STARTED,
                json!({ "files": job.input_paths.len(), "worker": self.config.worker_id }),
            ),
        )?;

        let controls = normalize(&job.params);
        let mut taken = HashSet::new();
        let mut outputs = Vec::with_capacity(job.input_paths.len());
        for (index, path) in job.input_paths.iter().enumerate() {
            let output = self
                .process_input(job, &controls, index, path, scratch.path(), &mut taken)
                .await?;
            outputs.push(output);
            self.jobs.record_output(&job.id, &outputs)?;
        }
        Ok(outputs)
    }

    async fn process_input(
        &self,
        job: &Job,
        controls: &ControlSet,
        index: usize,
        raw_path: &str,
        scratch: &Path,
        taken: &mut HashSet<String>,
    ) -> Result<String, WorkerError> {
        let object = ObjectPath::parse(raw_path)?;
        let file_name = object.file_name().to_string();

        self.emit(&job.id, NewJobEvent::progress("download", index, raw_path))?;
        let input_dir = scratch.join(format!("in-{}", index));
        tokio::fs::create_dir_all(&input_dir).await?;
        let local_input = input_dir.join(&file_name);
        let bytes = self.storage.download_to(&object, &local_input).await?;
        debug!("Job {} input {} downloaded ({} bytes)", job.id, index, bytes);

        let kind = MediaKind::detect(&file_name, &sniff(&local_input).await?);
        let layout = match self.pipeline.transcoder().probe(&local_input).await {
            Ok(probe) => probe.layout(),
            Err(e) => {
                warn!(
                    "Job {} input {}: probe failed, assuming stereo: {}",
                    job.id, index, e
                );
                ChannelLayout::Stereo
            }
        };

        self.emit(
            &job.id,
            NewJobEvent::info(
                EVENT_PROGRESS,
                json!({
                    "step": "enhance",
                    "index": index,
                    "path": raw_path,
                    "kind": kind.as_str(),
                    "strategy": select(controls).as_str(),
                }),
            ),
        )?;
        let output_name = output_file_name(&file_name, kind, index, taken);
        let local_output = scratch.join("out").join(&output_name);
        let outcome = self
            .pipeline
            .enhance(
                controls,
                &EnhanceInput {
                    source: &local_input,
                    kind,
                    layout,
                    output: &local_output,
                    scratch,
                },
            )
            .await
            .map_err(|source| WorkerError::Transcode {
                index,
                path: raw_path.to_string(),
                source,
            })?;

        if let Some(reason) = &outcome.fallback_reason {
            self.emit(
                &job.id,
                NewJobEvent::warn(
                    EVENT_SEPARATION_FALLBACK,
                    json!({ "index": index, "path": raw_path, "reason": reason }),
                ),
            )?;
        }

        self.emit(&job.id, NewJobEvent::progress("upload", index, raw_path))?;
        let destination = ObjectPath::output(&job.id, &output_name)?;
        self.storage
            .upload_file(
                &destination,
                &outcome.artifact.path,
                outcome.artifact.content_type,
            )
            .await?;
        info!(
            "Job {} input {} -> {} ({})",
            job.id,
            index,
            destination,
            outcome.strategy.as_str()
        );
        Ok(destination.to_string())
    }

    /// Logs running jobs that have not advanced past the stale threshold.
    /// They are left as they are.
    pub fn report_stale(&self) {
        let cutoff = now_ms() - self.config.stale_after.as_millis() as i64;
        match self.jobs.stale_running(cutoff) {
            Ok(stale) => {
                metrics::set_stale_running_jobs(stale.len());
                for job in &stale {
                    warn!(
                        "Job {} has been running without progress since {} (claimed by {}); not requeued",
                        job.id,
                        job.updated_at,
                        job.claimed_by.as_deref().unwrap_or("unknown")
                    );
                }
            }
            Err(e) => error!("Failed to look up stale running jobs: {:#}", e),
        }
    }
}
