use axum::extract::FromRef;

use crate::jobs::{EventStore, JobStore};
use crate::storage::{ObjectStorage, UrlSigner};
use std::sync::Arc;
use std::time::Instant;

use super::ServerConfig;

pub type GuardedJobStore = Arc<dyn JobStore>;
pub type GuardedEventStore = Arc<dyn EventStore>;
pub type GuardedObjectStorage = Arc<dyn ObjectStorage>;
pub type GuardedUrlSigner = Arc<UrlSigner>;

#[derive(Clone)]
pub struct ServerState {
    pub config: ServerConfig,
    pub start_time: Instant,
    pub job_store: GuardedJobStore,
    pub event_store: GuardedEventStore,
    pub storage: GuardedObjectStorage,
    /// Verifies signatures on asset URLs; must share the storage's secret.
    pub url_signer: GuardedUrlSigner,
    pub hash: String,
}

impl ServerState {
    pub fn new(
        config: ServerConfig,
        job_store: GuardedJobStore,
        event_store: GuardedEventStore,
        storage: GuardedObjectStorage,
        url_signer: GuardedUrlSigner,
    ) -> Self {
        ServerState {
            config,
            start_time: Instant::now(),
            job_store,
            event_store,
            storage,
            url_signer,
            hash: env!("GIT_HASH").to_string(),
        }
    }
}

impl FromRef<ServerState> for ServerConfig {
    fn from_ref(input: &ServerState) -> Self {
        input.config.clone()
    }
}

impl FromRef<ServerState> for GuardedJobStore {
    fn from_ref(input: &ServerState) -> Self {
        input.job_store.clone()
    }
}

impl FromRef<ServerState> for GuardedEventStore {
    fn from_ref(input: &ServerState) -> Self {
        input.event_store.clone()
    }
}

impl FromRef<ServerState> for GuardedObjectStorage {
    fn from_ref(input: &ServerState) -> Self {
        input.storage.clone()
    }
}

impl FromRef<ServerState> for GuardedUrlSigner {
    fn from_ref(input: &ServerState) -> Self {
        input.url_signer.clone()
    }
}
