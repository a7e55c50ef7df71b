//! Serving objects through signed, expiring URLs.

use super::api_error::ApiError;
use super::state::ServerState;
use crate::storage::ObjectPath;
use axum::{
    body::Body,
    extract::{Path, Query, State},
    http::{header, StatusCode},
    response::Response,
};
use serde::Deserialize;
use tracing::debug;

#[derive(Debug, Deserialize)]
pub struct SignedQuery {
    pub expires: i64,
    pub sig: String,
}

pub async fn get_signed_asset(
    State(state): State<ServerState>,
    Path(path): Path<String>,
    Query(query): Query<SignedQuery>,
) -> Result<Response, ApiError> {
    let object_path = ObjectPath::parse(&path)?;
    let now = chrono::Utc::now().timestamp();
    if let Err(e) = state
        .url_signer
        .verify(object_path.as_str(), query.expires, &query.sig, now)
    {
        debug!("Rejected asset request for {}: {}", object_path, e);
        return Err(e.into());
    }

    let object = state.storage.download(&object_path).await?;
    Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, object.content_type)
        .header(header::CONTENT_LENGTH, object.bytes.len())
        .header(header::CACHE_CONTROL, "private, no-store")
        .body(Body::from(object.bytes))
        .map_err(|e| ApiError::Internal(e.into()))
}
