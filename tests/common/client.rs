//! HTTP client for end-to-end tests
//!
//! Wraps reqwest and provides one method per enhancer endpoint.
//!
//! When API routes or request formats change, update only this file.

use super::constants::*;
use reqwest::Response;
use serde_json::{json, Value};
use std::time::Duration;

/// One `data:` frame of the live event feed.
#[derive(Debug, Clone)]
pub struct FeedFrame {
    pub id: Option<i64>,
    pub data: Value,
}

/// HTTP test client
pub struct TestClient {
    /// The underlying reqwest client (public for custom requests in tests)
    pub client: reqwest::Client,
    /// The base URL of the test server
    pub base_url: String,
}

impl TestClient {
    pub fn new(base_url: String) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .build()
            .expect("Failed to build reqwest client");

        Self { client, base_url }
    }

    // ========================================================================
    // Inputs
    // ========================================================================

    /// PUT /v1/objects/inputs/{path}
    pub async fn upload_input(&self, relative_path: &str, bytes: &[u8]) -> Response {
        self.client
            .put(format!("{}/v1/objects/inputs/{}", self.base_url, relative_path))
            .header("content-type", "application/octet-stream")
            .body(bytes.to_vec())
            .send()
            .await
            .expect("Upload input request failed")
    }

    // ========================================================================
    // Jobs
    // ========================================================================

    /// POST /v1/jobs
    pub async fn submit_job(&self, params: Value, input_paths: &[&str]) -> Response {
        self.client
            .post(format!("{}/v1/jobs", self.base_url))
            .json(&json!({ "params": params, "input_paths": input_paths }))
            .send()
            .await
            .expect("Submit job request failed")
    }

    /// Submits and returns the new job id, asserting 201.
    pub async fn submit_job_ok(&self, params: Value, input_paths: &[&str]) -> String {
        let response = self.submit_job(params, input_paths).await;
        assert_eq!(
            response.status(),
            reqwest::StatusCode::CREATED,
            "Job submission failed"
        );
        let body: Value = response.json().await.expect("Invalid submit response");
        body["id"]
            .as_str()
            .expect("Submit response has no id")
            .to_string()
    }

    /// GET /v1/jobs/{id}
    pub async fn get_job(&self, job_id: &str) -> Response {
        self.client
            .get(format!("{}/v1/jobs/{}", self.base_url, job_id))
            .send()
            .await
            .expect("Get job request failed")
    }

    /// GET /v1/jobs/{id}/events?after=..&limit=..
    pub async fn get_events(&self, job_id: &str, after: i64, limit: Option<usize>) -> Response {
        let mut url = format!("{}/v1/jobs/{}/events?after={}", self.base_url, job_id, after);
        if let Some(limit) = limit {
            url.push_str(&format!("&limit={}", limit));
        }
        self.client
            .get(url)
            .send()
            .await
            .expect("Get events request failed")
    }

    // ========================================================================
    // Live Feed
    // ========================================================================

    /// GET /v1/jobs/{id}/events/stream
    pub async fn open_stream(
        &self,
        job_id: &str,
        after: Option<i64>,
        last_event_id: Option<i64>,
    ) -> Response {
        let mut url = format!("{}/v1/jobs/{}/events/stream", self.base_url, job_id);
        if let Some(after) = after {
            url.push_str(&format!("?after={}", after));
        }
        let mut request = self.client.get(url);
        if let Some(id) = last_event_id {
            request = request.header("last-event-id", id.to_string());
        }
        request.send().await.expect("Open stream request failed")
    }

    /// Reads the feed until the server closes it and returns its data frames.
    pub async fn read_stream(
        &self,
        job_id: &str,
        after: Option<i64>,
        last_event_id: Option<i64>,
    ) -> Vec<FeedFrame> {
        let response = self.open_stream(job_id, after, last_event_id).await;
        assert_eq!(response.status(), reqwest::StatusCode::OK);
        let body = response.text().await.expect("Feed body unreadable");
        parse_feed(&body)
    }

    // ========================================================================
    // Assets
    // ========================================================================

    /// GET /v1/jobs/{id}/assets/{file}
    pub async fn get_asset_url(&self, job_id: &str, file_name: &str) -> Response {
        self.client
            .get(format!(
                "{}/v1/jobs/{}/assets/{}",
                self.base_url, job_id, file_name
            ))
            .send()
            .await
            .expect("Get asset url request failed")
    }

    /// GET on an absolute URL, e.g. a signed asset URL.
    pub async fn get_url(&self, url: &str) -> Response {
        self.client
            .get(url)
            .send()
            .await
            .expect("Request failed")
    }
}

/// Splits an event-stream body into frames, skipping comments and
/// frames without data.
pub fn parse_feed(body: &str) -> Vec<FeedFrame> {
    let mut frames = Vec::new();
    for block in body.split("\n\n") {
        let mut id = None;
        let mut data = String::new();
        for line in block.lines() {
            if let Some(value) = line.strip_prefix("id:") {
                id = value.trim().parse().ok();
            } else if let Some(value) = line.strip_prefix("data:") {
                if !data.is_empty() {
                    data.push('\n');
                }
                data.push_str(value.strip_prefix(' ').unwrap_or(value));
            }
        }
        if !data.is_empty() {
            let data = serde_json::from_str(&data).expect("Feed frame is not JSON");
            frames.push(FeedFrame { id, data });
        }
    }
    frames
}
