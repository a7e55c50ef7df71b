//! Common test infrastructure
//!
//! This module provides all the infrastructure needed for end-to-end tests.
//! Tests should only import from this module, not from internal submodules.
//!
//! # Example
//!
//! ```no_run
//! mod common;
//! use common::{ScriptedTranscoder, TestClient, TestServer, TALK_INPUT, WAV_BYTES};
//! use serde_json::json;
//! use std::sync::Arc;
//!
//! #[tokio::test]
//! async fn test_enhance() {
//!     let server = TestServer::spawn().await;
//!     let client = TestClient::new(server.base_url.clone());
//!
//!     client.upload_input(TALK_INPUT, WAV_BYTES).await;
//!     let job_id = client.submit_job_ok(json!({}), &["inputs/e2e/talk.wav"]).await;
//!     server.worker(Arc::new(ScriptedTranscoder::default())).tick().await;
//! }
//! ```

mod client;
mod constants;
mod fixtures;
mod server;

// Public API - this is what tests import
#[allow(unused_imports)]
pub use client::{parse_feed, FeedFrame, TestClient};
pub use constants::*;
pub use fixtures::ScriptedTranscoder;
pub use server::TestServer;
