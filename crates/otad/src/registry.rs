//! Firmware registry: stored images plus the current-version pointer.
//!
//! The pointer lives behind a single read-write lock. Uploads persist the
//! payload to a temporary file outside the lock, then rename it into place
//! and move the pointer under the write lock. Fetch and list resolve the
//! pointer and read the files under the read lock, so a reader never sees a
//! pointer to bytes that are still being written. Checksums are computed on
//! the blocking pool.
//!
//! Uploads are trusted: the last committed upload becomes current with no
//! ordering check between versions. Delete never touches the pointer, so
//! deleting the current image leaves it dangling until the next upload.

use crate::store::FirmwareStore;
use latch_common::{
    is_valid_version, sha256_file, sha256_hex, FirmwareInfo, LatchError, Result, PATH_FIRMWARE,
};
use tokio::sync::RwLock;
use tracing::{debug, info};

/// Image served by `fetch`.
#[derive(Debug, Clone)]
pub struct FirmwarePayload {
    pub version: String,
    pub bytes: Vec<u8>,
    pub sha256: String,
}

#[derive(Debug, Clone)]
pub enum FetchOutcome {
    /// Client already runs the current version.
    NotModified { version: String },
    Payload(FirmwarePayload),
}

pub struct Registry {
    store: FirmwareStore,
    current: RwLock<Option<String>>,
    max_upload_bytes: u64,
}

impl Registry {
    pub fn new(store: FirmwareStore, initial_version: Option<String>, max_upload_bytes: u64) -> Self {
        Self {
            store,
            current: RwLock::new(initial_version),
            max_upload_bytes,
        }
    }

    pub fn store(&self) -> &FirmwareStore {
        &self.store
    }

    pub fn max_upload_bytes(&self) -> u64 {
        self.max_upload_bytes
    }

    /// Store `payload` under `version` and make it current.
    pub async fn upload(&self, version: &str, payload: Option<&[u8]>) -> Result<()> {
        if version.is_empty() {
            return Err(LatchError::ClientInput("Version not specified".to_string()));
        }
        if !is_valid_version(version) {
            return Err(LatchError::ClientInput(format!("Invalid version '{}'", version)));
        }
        let payload =
            payload.ok_or_else(|| LatchError::ClientInput("Unable to retrieve file".to_string()))?;
        let size = payload.len() as u64;
        if size > self.max_upload_bytes {
            return Err(LatchError::PayloadTooLarge {
                size,
                limit: self.max_upload_bytes,
            });
        }

        let staged = self.store.stage(payload).await?;

        let mut current = self.current.write().await;
        self.store.commit(staged, version).await?;
        let previous = current.replace(version.to_string());
        drop(current);

        info!(
            "Firmware v{} uploaded ({} bytes), current was {}",
            version,
            size,
            previous.as_deref().unwrap_or("unset")
        );
        Ok(())
    }

    /// Resolve and serve an image.
    ///
    /// With an explicit `requested` version, serves exactly that image.
    /// Otherwise serves the current image, or `NotModified` when
    /// `client_version` already equals it.
    pub async fn fetch(
        &self,
        requested: Option<&str>,
        client_version: Option<&str>,
    ) -> Result<FetchOutcome> {
        let current = self.current.read().await;

        let target = match requested {
            Some(v) => {
                if !is_valid_version(v) {
                    return Err(LatchError::NotFound(v.to_string()));
                }
                v.to_string()
            }
            None => current
                .clone()
                .ok_or_else(|| LatchError::NotFound("no current version".to_string()))?,
        };

        let bytes = self.store.read(&target).await?;
        drop(current);

        if requested.is_none() && client_version == Some(target.as_str()) {
            debug!("Client already runs v{}", target);
            return Ok(FetchOutcome::NotModified { version: target });
        }

        let (bytes, sha256) = tokio::task::spawn_blocking(move || {
            let sha256 = sha256_hex(&bytes);
            (bytes, sha256)
        })
        .await
        .map_err(|e| LatchError::Storage(format!("checksum task failed: {}", e)))?;
        debug!("Serving firmware v{} ({} bytes)", target, bytes.len());
        Ok(FetchOutcome::Payload(FirmwarePayload {
            version: target,
            bytes,
            sha256,
        }))
    }

    /// Metadata for every stored image.
    pub async fn list(&self) -> Result<Vec<FirmwareInfo>> {
        let current = self.current.read().await;
        let entries = self.store.entries().await?;

        let mut list = Vec::with_capacity(entries.len());
        for image in entries {
            let path = image.path.clone();
            let sha256 = tokio::task::spawn_blocking(move || sha256_file(&path))
                .await
                .map_err(|e| LatchError::Storage(format!("checksum task failed: {}", e)))??;

            list.push(FirmwareInfo {
                is_current: current.as_deref() == Some(image.version.as_str()),
                download_url: format!("{}?version={}", PATH_FIRMWARE, image.version),
                version: image.version,
                filename: image.filename,
                size: image.size,
                modified: image.modified.to_rfc3339(),
                sha256,
            });
        }
        Ok(list)
    }

    pub async fn current_version(&self) -> Option<String> {
        self.current.read().await.clone()
    }

    /// Remove a stored image. The current-version pointer is left as is.
    pub async fn delete(&self, version: &str) -> Result<()> {
        if version.is_empty() {
            return Err(LatchError::ClientInput("Version not specified".to_string()));
        }
        if !is_valid_version(version) {
            return Err(LatchError::NotFound(version.to_string()));
        }

        let current = self.current.write().await;
        self.store.remove(version).await?;
        if current.as_deref() == Some(version) {
            info!("Firmware v{} deleted while current; no current image remains", version);
        } else {
            info!("Firmware v{} deleted", version);
        }
        Ok(())
    }
}
