use anyhow::{Context, Result};
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::info;

use axum::{
    extract::{DefaultBodyLimit, State},
    middleware,
    response::IntoResponse,
    routing::{get, post, put},
    Json, Router,
};
use serde::Serialize;
use tower_http::limit::RequestBodyLimitLayer;

use super::asset_routes::get_signed_asset;
use super::event_feed::stream_job_events;
use super::job_routes::{get_asset_url, get_job, get_job_events, post_job, upload_input};
use super::{log_requests, metrics, state::*, ServerConfig};

#[derive(Serialize)]
struct ServerStats {
    pub uptime: String,
    pub hash: String,
}

fn format_uptime(duration: Duration) -> String {
    let total_seconds = duration.as_secs();

    let days = total_seconds / 86_400;
    let hours = (total_seconds % 86_400) / 3600;
    let minutes = (total_seconds % 3600) / 60;
    let seconds = total_seconds % 60;

    format!("{}d {:02}:{:02}:{:02}", days, hours, minutes, seconds)
}

async fn home(State(state): State<ServerState>) -> impl IntoResponse {
    let stats = ServerStats {
        uptime: format_uptime(state.start_time.elapsed()),
        hash: state.hash.clone(),
    };
    Json(stats)
}

pub fn make_app(state: ServerState) -> Router {
    let max_upload_bytes = state.config.max_upload_bytes;

    let object_routes: Router = Router::new()
        .route("/inputs/{*path}", put(upload_input))
        .layer(DefaultBodyLimit::disable())
        .layer(RequestBodyLimitLayer::new(max_upload_bytes))
        .with_state(state.clone());

    let job_routes: Router = Router::new()
        .route("/", post(post_job))
        .route("/{id}", get(get_job))
        .route("/{id}/events", get(get_job_events))
        .route("/{id}/events/stream", get(stream_job_events))
        .route("/{id}/assets/{file}", get(get_asset_url))
        .with_state(state.clone());

    let asset_routes: Router = Router::new()
        .route("/{*path}", get(get_signed_asset))
        .with_state(state.clone());

    Router::new()
        .route("/", get(home))
        .with_state(state.clone())
        .nest("/v1/objects", object_routes)
        .nest("/v1/jobs", job_routes)
        .nest("/v1/assets", asset_routes)
        .layer(middleware::from_fn_with_state(state, log_requests))
}

fn make_metrics_app() -> Router {
    Router::new().route("/metrics", get(metrics::metrics_handler))
}

/// Serves the API on `config.port` and Prometheus metrics on `metrics_port`
/// until `shutdown` is cancelled.
pub async fn run_server(
    config: ServerConfig,
    job_store: GuardedJobStore,
    event_store: GuardedEventStore,
    storage: GuardedObjectStorage,
    url_signer: GuardedUrlSigner,
    metrics_port: u16,
    shutdown: CancellationToken,
) -> Result<()> {
    let port = config.port;
    let state = ServerState::new(config, job_store, event_store, storage, url_signer);
    let app = make_app(state);

    let listener = tokio::net::TcpListener::bind(format!("0.0.0.0:{}", port))
        .await
        .with_context(|| format!("Failed to bind API port {}", port))?;
    let metrics_listener = tokio::net::TcpListener::bind(format!("0.0.0.0:{}", metrics_port))
        .await
        .with_context(|| format!("Failed to bind metrics port {}", metrics_port))?;

    info!("Ready to serve at port {}!", port);
    info!("Metrics available at port {}!", metrics_port);

    let api = axum::serve(listener, app).with_graceful_shutdown(shutdown.clone().cancelled_owned());
    let metrics_server = axum::serve(metrics_listener, make_metrics_app())
        .with_graceful_shutdown(shutdown.cancelled_owned());

    tokio::try_join!(
        async { api.await.context("API server failed") },
        async { metrics_server.await.context("Metrics server failed") },
    )?;
    Ok(())
}
