use super::{ObjectPath, ObjectStorage, StorageError, StoredObject, UrlSigner};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::debug;

const DEFAULT_CONTENT_TYPE: &str = "application/octet-stream";

#[derive(Debug, Serialize, Deserialize)]
struct ObjectMeta {
    content_type: String,
}

/// Object storage on the local filesystem.
///
/// Object bytes live under `<root>/objects/<path>` and a JSON sidecar with
/// the content type under `<root>/meta/<path>.json`. Writes go to a
/// temporary sibling first and are renamed into place.
pub struct LocalObjectStorage {
    root: PathBuf,
    public_base_url: String,
    signer: UrlSigner,
}

impl LocalObjectStorage {
    pub fn new(
        root: impl Into<PathBuf>,
        public_base_url: &str,
        signer: UrlSigner,
    ) -> Result<Self, StorageError> {
        let root = root.into();
        std::fs::create_dir_all(root.join("objects"))?;
        std::fs::create_dir_all(root.join("meta"))?;
        Ok(LocalObjectStorage {
            root,
            public_base_url: public_base_url.trim_end_matches('/').to_string(),
            signer,
        })
    }

    pub fn signer(&self) -> &UrlSigner {
        &self.signer
    }

    fn resolve(&self, area: &str, path: &ObjectPath) -> PathBuf {
        let mut file = self.root.join(area);
        for segment in path.segments() {
            file.push(segment);
        }
        file
    }

    fn object_file(&self, path: &ObjectPath) -> PathBuf {
        self.resolve("objects", path)
    }

    fn meta_file(&self, path: &ObjectPath) -> PathBuf {
        let mut file = self.resolve("meta", path);
        file.as_mut_os_string().push(".json");
        file
    }

    /// Creates the parent directory and returns a unique temporary sibling of `dest`.
    async fn staging_file(dest: &Path) -> Result<PathBuf, StorageError> {
        if let Some(parent) = dest.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let mut tmp = dest.as_os_str().to_owned();
        tmp.push(format!(".tmp-{}", uuid::Uuid::new_v4()));
        Ok(PathBuf::from(tmp))
    }

    async fn commit(tmp: &Path, dest: &Path) -> Result<(), StorageError> {
        if let Err(e) = tokio::fs::rename(tmp, dest).await {
            let _ = tokio::fs::remove_file(tmp).await;
            return Err(e.into());
        }
        Ok(())
    }

    async fn write_atomically(dest: &Path, bytes: &[u8]) -> Result<(), StorageError> {
        let tmp = Self::staging_file(dest).await?;
        tokio::fs::write(&tmp, bytes).await?;
        Self::commit(&tmp, dest).await
    }

    async fn read_content_type(&self, path: &ObjectPath) -> Result<String, StorageError> {
        match tokio::fs::read(self.meta_file(path)).await {
            Ok(raw) => Ok(serde_json::from_slice::<ObjectMeta>(&raw)?.content_type),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(DEFAULT_CONTENT_TYPE.to_string()),
            Err(e) => Err(e.into()),
        }
    }

    fn not_found(path: &ObjectPath) -> impl FnOnce(std::io::Error) -> StorageError + '_ {
        move |e| {
            if e.kind() == ErrorKind::NotFound {
                StorageError::NotFound(path.to_string())
            } else {
                StorageError::Io(e)
            }
        }
    }
}

#[async_trait]
impl ObjectStorage for LocalObjectStorage {
    async fn upload(
        &self,
        path: &ObjectPath,
        bytes: Vec<u8>,
        content_type: &str,
    ) -> Result<(), StorageError> {
        let meta = serde_json::to_vec(&ObjectMeta {
            content_type: content_type.to_string(),
        })?;
        Self::write_atomically(&self.object_file(path), &bytes).await?;
        Self::write_atomically(&self.meta_file(path), &meta).await?;
        debug!("Stored {} ({} bytes, {})", path, bytes.len(), content_type);
        Ok(())
    }

    async fn download(&self, path: &ObjectPath) -> Result<StoredObject, StorageError> {
        let bytes = tokio::fs::read(self.object_file(path))
            .await
            .map_err(Self::not_found(path))?;
        Ok(StoredObject {
            bytes,
            content_type: self.read_content_type(path).await?,
        })
    }

    fn signed_url(&self, path: &ObjectPath, ttl: Duration) -> Result<String, StorageError> {
        let expires = chrono::Utc::now().timestamp() + ttl.as_secs() as i64;
        let encoded = path
            .segments()
            .map(|s| urlencoding::encode(s).into_owned())
            .collect::<Vec<_>>()
            .join("/");
        Ok(format!(
            "{}/v1/assets/{}?expires={}&sig={}",
            self.public_base_url,
            encoded,
            expires,
            self.signer.sign(path.as_str(), expires)
        ))
    }

    async fn download_to(&self, path: &ObjectPath, dest: &Path) -> Result<u64, StorageError> {
        tokio::fs::copy(self.object_file(path), dest)
            .await
            .map_err(Self::not_found(path))
    }

    async fn upload_file(
        &self,
        path: &ObjectPath,
        src: &Path,
        content_type: &str,
    ) -> Result<(), StorageError> {
        let dest = self.object_file(path);
        let tmp = Self::staging_file(&dest).await?;
        tokio::fs::copy(src, &tmp).await?;
        Self::commit(&tmp, &dest).await?;
        let meta = serde_json::to_vec(&ObjectMeta {
            content_type: content_type.to_string(),
        })?;
        Self::write_atomically(&self.meta_file(path), &meta).await
    }
}
