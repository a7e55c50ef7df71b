//! Sukudo Enhancer Library
//!
//! This library exposes the internal modules for testing and potential reuse.

pub mod config;
pub mod enhance;
pub mod jobs;
pub mod server;
pub mod sqlite_persistence;
pub mod storage;

// Re-export commonly used types for convenience
pub use enhance::{EnhancePipeline, FfmpegTranscoder};
pub use jobs::{EnhanceWorker, JobStore, SqliteJobStore, WorkerConfig};
pub use server::{run_server, RequestsLoggingLevel};
pub use storage::{LocalObjectStorage, ObjectStorage, UrlSigner};
