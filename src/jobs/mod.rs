//! Job queue: records, SQLite store, submission and the worker loop.

pub mod models;
mod schema;
pub mod store;
pub mod submission;
pub mod worker;

pub use models::{
    EventLevel, Job, JobEvent, JobOutcome, JobStatus, NewJobEvent, ENHANCE_JOB_TYPE,
    EVENT_COMPLETED, EVENT_FAILED, EVENT_PROGRESS, EVENT_SEPARATION_FALLBACK, EVENT_STARTED,
};
pub use store::{ClaimResult, EventStore, JobStore, SqliteJobStore};
pub use submission::{submit_job, SubmissionError, SubmitJobRequest, MAX_INPUTS_PER_JOB};
pub use worker::{EnhanceWorker, TickOutcome, WorkerConfig, WorkerError};
