//! Job submission, lookup and event paging.

use super::api_error::ApiError;
use super::state::*;
use crate::jobs::{submit_job, Job, SubmitJobRequest};
use crate::storage::ObjectPath;
use axum::{
    body::Bytes,
    extract::{Path, Query, State},
    http::{header, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::debug;

const DEFAULT_UPLOAD_CONTENT_TYPE: &str = "application/octet-stream";

#[derive(Debug, Deserialize)]
pub struct EventsQuery {
    #[serde(default)]
    pub after: i64,
    pub limit: Option<usize>,
}

#[derive(Serialize)]
pub struct AssetUrlResponse {
    url: String,
    path: String,
    expires_in_secs: u64,
}

pub(super) fn load_job(job_store: &GuardedJobStore, id: &str) -> Result<Job, ApiError> {
    job_store
        .get_job(id)?
        .ok_or_else(|| ApiError::job_not_found(id))
}

pub async fn upload_input(
    State(storage): State<GuardedObjectStorage>,
    Path(path): Path<String>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Response, ApiError> {
    let object_path = ObjectPath::input(&path)?;
    let content_type = headers
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .unwrap_or(DEFAULT_UPLOAD_CONTENT_TYPE)
        .to_string();
    let size = body.len();
    storage
        .upload(&object_path, body.to_vec(), &content_type)
        .await?;
    debug!("Stored input {} ({} bytes)", object_path, size);
    Ok((
        StatusCode::CREATED,
        Json(json!({ "path": object_path.as_str(), "size": size })),
    )
        .into_response())
}

pub async fn post_job(
    State(job_store): State<GuardedJobStore>,
    Json(request): Json<SubmitJobRequest>,
) -> Result<Response, ApiError> {
    let job = submit_job(job_store.as_ref(), request)?;
    Ok((
        StatusCode::CREATED,
        Json(json!({ "id": job.id, "status": job.status })),
    )
        .into_response())
}

pub async fn get_job(
    State(job_store): State<GuardedJobStore>,
    Path(id): Path<String>,
) -> Result<Json<Job>, ApiError> {
    Ok(Json(load_job(&job_store, &id)?))
}

/// One page of events strictly after `after`, ascending.
pub async fn get_job_events(
    State(state): State<ServerState>,
    Path(id): Path<String>,
    Query(query): Query<EventsQuery>,
) -> Result<Response, ApiError> {
    load_job(&state.job_store, &id)?;
    let page_size = state.config.feed.page_size;
    let limit = query.limit.unwrap_or(page_size).clamp(1, page_size);
    let events = state.event_store.events_after(&id, query.after, limit)?;
    let next_after = events.last().map(|e| e.id).unwrap_or(query.after);
    Ok(Json(json!({ "events": events, "next_after": next_after })).into_response())
}

/// Signed URL for one of the job's outputs.
pub async fn get_asset_url(
    State(state): State<ServerState>,
    Path((id, file)): Path<(String, String)>,
) -> Result<Json<AssetUrlResponse>, ApiError> {
    let job = load_job(&state.job_store, &id)?;
    let path = ObjectPath::output(&id, &file)?;
    if !job.outputs.iter().any(|o| o == path.as_str()) {
        return Err(ApiError::NotFound(format!(
            "Job {} has no output named {}",
            id, file
        )));
    }
    let ttl = state.config.asset_url_ttl;
    let url = state.storage.signed_url(&path, ttl)?;
    Ok(Json(AssetUrlResponse {
        url,
        path: path.to_string(),
        expires_in_secs: ttl.as_secs(),
    }))
}
