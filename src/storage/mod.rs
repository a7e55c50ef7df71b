//! Object storage for job inputs and outputs.

mod local_storage;
mod url_signer;

pub use local_storage::LocalObjectStorage;
pub use url_signer::{SignatureError, UrlSigner};

use async_trait::async_trait;
use std::fmt;
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

pub const INPUTS_PREFIX: &str = "inputs";
pub const OUTPUTS_PREFIX: &str = "outputs";

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Invalid object path '{0}'")]
    InvalidPath(String),

    #[error("Object not found: {0}")]
    NotFound(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Metadata error: {0}")]
    Metadata(#[from] serde_json::Error),
}

/// A validated, relative, slash-separated object key.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ObjectPath(String);

impl ObjectPath {
    /// Accepts `a/b/c` (a leading slash is dropped). Rejects empty, `.` and
    /// `..` segments, backslashes and control characters.
    pub fn parse(raw: &str) -> Result<Self, StorageError> {
        let trimmed = raw.trim_start_matches('/');
        let invalid = || StorageError::InvalidPath(raw.to_string());

        if trimmed.is_empty() || trimmed.contains('\\') || trimmed.chars().any(char::is_control) {
            return Err(invalid());
        }
        if trimmed
            .split('/')
            .any(|segment| segment.is_empty() || segment == "." || segment == "..")
        {
            return Err(invalid());
        }
        Ok(ObjectPath(trimmed.to_string()))
    }

    /// Where the enhanced version of an input goes.
    pub fn output(job_id: &str, file_name: &str) -> Result<Self, StorageError> {
        ObjectPath::parse(&format!("{}/{}/{}", OUTPUTS_PREFIX, job_id, file_name))
    }

    pub fn input(relative: &str) -> Result<Self, StorageError> {
        ObjectPath::parse(&format!("{}/{}", INPUTS_PREFIX, relative.trim_start_matches('/')))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn segments(&self) -> impl Iterator<Item = &str> {
        self.0.split('/')
    }

    /// Last segment.
    pub fn file_name(&self) -> &str {
        self.0.rsplit('/').next().unwrap_or(&self.0)
    }
}

impl fmt::Display for ObjectPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredObject {
    pub bytes: Vec<u8>,
    pub content_type: String,
}

#[async_trait]
pub trait ObjectStorage: Send + Sync {
    async fn upload(
        &self,
        path: &ObjectPath,
        bytes: Vec<u8>,
        content_type: &str,
    ) -> Result<(), StorageError>;

    async fn download(&self, path: &ObjectPath) -> Result<StoredObject, StorageError>;

    /// Short-lived URL a client can fetch the object from without credentials.
    fn signed_url(&self, path: &ObjectPath, ttl: Duration) -> Result<String, StorageError>;

    /// Downloads into a local file, returning its size.
    async fn download_to(&self, path: &ObjectPath, dest: &Path) -> Result<u64, StorageError> {
        let object = self.download(path).await?;
        tokio::fs::write(dest, &object.bytes).await?;
        Ok(object.bytes.len() as u64)
    }

    /// Uploads a local file.
    async fn upload_file(
        &self,
        path: &ObjectPath,
        src: &Path,
        content_type: &str,
    ) -> Result<(), StorageError> {
        let bytes = tokio::fs::read(src).await?;
        self.upload(path, bytes, content_type).await
    }
}
