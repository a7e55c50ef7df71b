//! Job and event records.

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

/// The only job type this service processes.
pub const ENHANCE_JOB_TYPE: &str = "enhance";

pub const EVENT_STARTED: &str = "Started";
pub const EVENT_PROGRESS: &str = "progress";
pub const EVENT_SEPARATION_FALLBACK: &str = "Separation fallback";
pub const EVENT_COMPLETED: &str = "Completed";
pub const EVENT_FAILED: &str = "Failed";

/// Lifecycle of a job. Transitions only move forward:
/// queued → running → completed | failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Queued,
    Running,
    Completed, // terminal
    Failed,    // terminal
}

impl JobStatus {
    pub fn as_db_str(&self) -> &'static str {
        match self {
            JobStatus::Queued => "queued",
            JobStatus::Running => "running",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
        }
    }

    pub fn from_db_str(s: &str) -> Option<Self> {
        match s {
            "queued" => Some(JobStatus::Queued),
            "running" => Some(JobStatus::Running),
            "completed" => Some(JobStatus::Completed),
            "failed" => Some(JobStatus::Failed),
            _ => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::Failed)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Job {
    pub id: String,
    pub job_type: String,
    pub status: JobStatus,
    /// Object paths of the inputs, processed in this order.
    pub input_paths: Vec<String>,
    /// Normalized ControlSet.
    pub params: Value,
    /// Object path of the most recently uploaded output.
    pub result_url: Option<String>,
    pub outputs: Vec<String>,
    pub error: Option<String>,
    /// Worker that claimed the job.
    pub claimed_by: Option<String>,
    pub created_at: i64,
    pub updated_at: i64,
    pub started_at: Option<i64>,
    pub completed_at: Option<i64>,
}

impl Job {
    /// A fresh queued job. Timestamps are epoch milliseconds.
    pub fn new_queued(id: String, input_paths: Vec<String>, params: Value, now: i64) -> Self {
        Job {
            id,
            job_type: ENHANCE_JOB_TYPE.to_string(),
            status: JobStatus::Queued,
            input_paths,
            params,
            result_url: None,
            outputs: Vec::new(),
            error: None,
            claimed_by: None,
            created_at: now,
            updated_at: now,
            started_at: None,
            completed_at: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventLevel {
    Info,
    Warn,
    Error,
}

impl EventLevel {
    pub fn as_db_str(&self) -> &'static str {
        match self {
            EventLevel::Info => "info",
            EventLevel::Warn => "warn",
            EventLevel::Error => "error",
        }
    }

    pub fn from_db_str(s: &str) -> Option<Self> {
        match s {
            "info" => Some(EventLevel::Info),
            "warn" => Some(EventLevel::Warn),
            "error" => Some(EventLevel::Error),
            _ => None,
        }
    }
}

/// An event about to be appended. The store assigns id and timestamp.
#[derive(Debug, Clone, PartialEq)]
pub struct NewJobEvent {
    pub level: EventLevel,
    pub message: String,
    pub data: Option<Value>,
}

impl NewJobEvent {
    pub fn info(message: impl Into<String>, data: Value) -> Self {
        NewJobEvent {
            level: EventLevel::Info,
            message: message.into(),
            data: Some(data),
        }
    }

    pub fn warn(message: impl Into<String>, data: Value) -> Self {
        NewJobEvent {
            level: EventLevel::Warn,
            message: message.into(),
            data: Some(data),
        }
    }

    pub fn error(message: impl Into<String>, data: Value) -> Self {
        NewJobEvent {
            level: EventLevel::Error,
            message: message.into(),
            data: Some(data),
        }
    }

    pub fn progress(step: &str, index: usize, path: &str) -> Self {
        NewJobEvent::info(
            EVENT_PROGRESS,
            json!({ "step": step, "index": index, "path": path }),
        )
    }
}

/// A stored event. Never updated or deleted.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct JobEvent {
    pub id: i64,
    pub job_id: String,
    pub ts: i64,
    pub level: EventLevel,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl JobEvent {
    pub fn is_terminal(&self) -> bool {
        self.message == EVENT_COMPLETED || self.message == EVENT_FAILED
    }
}

/// How a claimed job ends.
#[derive(Debug, Clone, PartialEq)]
pub enum JobOutcome {
    Completed { outputs: Vec<String> },
    Failed { error: String },
}

impl JobOutcome {
    pub fn status(&self) -> JobStatus {
        match self {
            JobOutcome::Completed { .. } => JobStatus::Completed,
            JobOutcome::Failed { .. } => JobStatus::Failed,
        }
    }

    pub fn terminal_event(&self) -> NewJobEvent {
        match self {
            JobOutcome::Completed { outputs } => {
                NewJobEvent::info(EVENT_COMPLETED, json!({ "outputs": outputs }))
            }
            JobOutcome::Failed { error } => {
                NewJobEvent::error(EVENT_FAILED, json!({ "error": error }))
            }
        }
    }
}
