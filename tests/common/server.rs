//! Test server lifecycle management
//!
//! Each test gets an isolated server with its own jobs database and object
//! storage. Workers are not started automatically: tests build one with
//! [`TestServer::worker`] and drive it tick by tick.

use super::constants::*;
use std::sync::Arc;
use std::time::Duration;
use sukudo_enhancer::enhance::{
    DisabledSeparator, EnhancePipeline, StemSeparator, Transcoder,
};
use sukudo_enhancer::jobs::{EnhanceWorker, SqliteJobStore, WorkerConfig};
use sukudo_enhancer::server::{
    make_app, FeedConfig, RequestsLoggingLevel, ServerConfig, ServerState,
};
use sukudo_enhancer::storage::{LocalObjectStorage, UrlSigner};
use tempfile::TempDir;
use tokio::net::TcpListener;

/// Test server instance with isolated database and storage
///
/// When dropped, the server gracefully shuts down and temp resources are cleaned up.
pub struct TestServer {
    /// Base URL for making requests (e.g., "http://127.0.0.1:12345")
    pub base_url: String,

    /// The port the server is listening on
    pub port: u16,

    /// Job and event store shared with the server, for direct inspection
    pub store: Arc<SqliteJobStore>,

    /// Object storage shared with the server
    pub storage: Arc<LocalObjectStorage>,

    temp_dir: TempDir,
    _shutdown_tx: Option<tokio::sync::oneshot::Sender<()>>,
}

impl TestServer {
    /// Spawns a new test server on a random port with a fast feed.
    pub async fn spawn() -> Self {
        Self::spawn_with_feed(FeedConfig {
            poll_interval: Duration::from_millis(TEST_FEED_POLL_MS),
            ..FeedConfig::default()
        })
        .await
    }

    /// Spawns a new test server with the given live feed settings.
    ///
    /// # Panics
    ///
    /// Panics if the database cannot be created, the port cannot be bound,
    /// or the server does not become ready within the timeout.
    pub async fn spawn_with_feed(feed: FeedConfig) -> Self {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");

        let store = Arc::new(
            SqliteJobStore::new(temp_dir.path().join("jobs.db"))
                .expect("Failed to open jobs store"),
        );

        // Bind to random port
        let listener = TcpListener::bind("127.0.0.1:0")
            .await
            .expect("Failed to bind to random port");
        let port = listener
            .local_addr()
            .expect("Failed to get local address")
            .port();
        let base_url = format!("http://127.0.0.1:{}", port);

        let signer = UrlSigner::new(TEST_SIGNING_SECRET);
        let storage = Arc::new(
            LocalObjectStorage::new(temp_dir.path().join("storage"), &base_url, signer.clone())
                .expect("Failed to open object storage"),
        );

        let config = ServerConfig {
            port,
            requests_logging_level: RequestsLoggingLevel::None,
            feed,
            ..ServerConfig::default()
        };
        let state = ServerState::new(
            config,
            store.clone(),
            store.clone(),
            storage.clone(),
            Arc::new(signer),
        );
        let app = make_app(state);

        let (shutdown_tx, shutdown_rx) = tokio::sync::oneshot::channel::<()>();
        tokio::spawn(async move {
            axum::serve(listener, app)
                .with_graceful_shutdown(async {
                    shutdown_rx.await.ok();
                })
                .await
                .expect("Server failed");
        });

        let server = Self {
            base_url,
            port,
            store,
            storage,
            temp_dir,
            _shutdown_tx: Some(shutdown_tx),
        };
        server.wait_for_ready().await;
        server
    }

    /// A worker sharing this server's store and storage, with separation disabled.
    pub fn worker(&self, transcoder: Arc<dyn Transcoder>) -> EnhanceWorker {
        self.worker_with_separator(transcoder, Arc::new(DisabledSeparator))
    }

    pub fn worker_with_separator(
        &self,
        transcoder: Arc<dyn Transcoder>,
        separator: Arc<dyn StemSeparator>,
    ) -> EnhanceWorker {
        let mut config = WorkerConfig::new("e2e-worker", self.temp_dir.path().join("scratch"));
        config.poll_interval = Duration::from_millis(20);
        EnhanceWorker::new(
            config,
            self.store.clone(),
            self.store.clone(),
            self.storage.clone(),
            Arc::new(EnhancePipeline::new(transcoder, separator)),
        )
    }

    /// Waits for the server to become ready by polling the home endpoint
    async fn wait_for_ready(&self) {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_millis(100))
            .build()
            .expect("Failed to build reqwest client");

        let start = std::time::Instant::now();
        let timeout = Duration::from_millis(SERVER_READY_TIMEOUT_MS);

        loop {
            if start.elapsed() > timeout {
                panic!(
                    "Server did not become ready within {}ms",
                    SERVER_READY_TIMEOUT_MS
                );
            }

            match client.get(format!("{}/", self.base_url)).send().await {
                Ok(response) if response.status().is_success() => return,
                _ => {
                    tokio::time::sleep(Duration::from_millis(SERVER_READY_POLL_INTERVAL_MS)).await;
                }
            }
        }
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        if let Some(tx) = self._shutdown_tx.take() {
            let _ = tx.send(());
        }
    }
}
