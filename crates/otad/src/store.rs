//! Flat-directory firmware storage.
//!
//! One file per version, `firmware_<version>.bin`. There is no index file;
//! the directory listing is the source of truth. Uploads land in a hidden
//! temporary file first and are renamed into place, so a listing never sees
//! a half-written image.

use chrono::{DateTime, Utc};
use latch_common::{is_valid_version, LatchError, Result};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::{debug, warn};

const FILE_PREFIX: &str = "firmware_";
const FILE_SUFFIX: &str = ".bin";
const TEMP_PREFIX: &str = ".upload-";

/// A stored image as seen in the directory listing.
#[derive(Debug, Clone)]
pub struct StoredImage {
    pub version: String,
    pub filename: String,
    pub size: u64,
    pub modified: DateTime<Utc>,
    pub path: PathBuf,
}

/// An upload written to disk but not yet visible under its version.
#[derive(Debug)]
pub struct StagedUpload {
    path: PathBuf,
}

#[derive(Debug, Clone)]
pub struct FirmwareStore {
    dir: PathBuf,
}

/// File name for `version`.
pub fn file_name(version: &str) -> String {
    format!("{}{}{}", FILE_PREFIX, version, FILE_SUFFIX)
}

/// Version encoded in a stored file name, if it is one of ours.
pub fn version_from_file_name(name: &str) -> Option<&str> {
    let version = name.strip_prefix(FILE_PREFIX)?.strip_suffix(FILE_SUFFIX)?;
    if is_valid_version(version) {
        Some(version)
    } else {
        None
    }
}

fn storage_err(context: &str, path: &Path, e: std::io::Error) -> LatchError {
    LatchError::Storage(format!("{} {}: {}", context, path.display(), e))
}

impl FirmwareStore {
    /// Open the store, creating the directory if needed and removing
    /// uploads left half-written by an earlier run.
    ///
    /// Failure here is fatal to the registry.
    pub async fn open(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        fs::create_dir_all(&dir)
            .await
            .map_err(|e| storage_err("Failed to create firmware directory", &dir, e))?;
        let store = Self { dir };
        store.sweep_stale_uploads().await?;
        Ok(store)
    }

    async fn sweep_stale_uploads(&self) -> Result<()> {
        let mut dir = fs::read_dir(&self.dir)
            .await
            .map_err(|e| storage_err("Unable to read firmware directory", &self.dir, e))?;
        while let Some(entry) = dir
            .next_entry()
            .await
            .map_err(|e| storage_err("Unable to read firmware directory", &self.dir, e))?
        {
            if !entry.file_name().to_string_lossy().starts_with(TEMP_PREFIX) {
                continue;
            }
            match fs::remove_file(entry.path()).await {
                Ok(()) => debug!("Removed stale upload {}", entry.path().display()),
                Err(e) => warn!("Failed to remove stale upload {}: {}", entry.path().display(), e),
            }
        }
        Ok(())
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn path_for(&self, version: &str) -> PathBuf {
        self.dir.join(file_name(version))
    }

    /// Write `bytes` to a fresh temporary file in the store directory.
    pub async fn stage(&self, bytes: &[u8]) -> Result<StagedUpload> {
        let path = self
            .dir
            .join(format!("{}{}.tmp", TEMP_PREFIX, uuid::Uuid::new_v4()));
        if let Err(e) = fs::write(&path, bytes).await {
            let _ = fs::remove_file(&path).await;
            return Err(storage_err("Unable to save file", &path, e));
        }
        debug!("Staged {} bytes at {}", bytes.len(), path.display());
        Ok(StagedUpload { path })
    }

    /// Move a staged upload into place under `version`, replacing any
    /// existing image with that version.
    pub async fn commit(&self, staged: StagedUpload, version: &str) -> Result<()> {
        let target = self.path_for(version);
        if let Err(e) = fs::rename(&staged.path, &target).await {
            self.discard(staged).await;
            return Err(storage_err("Unable to create file", &target, e));
        }
        Ok(())
    }

    pub async fn discard(&self, staged: StagedUpload) {
        if let Err(e) = fs::remove_file(&staged.path).await {
            warn!("Failed to remove staged upload {}: {}", staged.path.display(), e);
        }
    }

    /// Read the full image for `version`.
    pub async fn read(&self, version: &str) -> Result<Vec<u8>> {
        let path = self.path_for(version);
        match fs::read(&path).await {
            Ok(bytes) => Ok(bytes),
            Err(e) if e.kind() == ErrorKind::NotFound => {
                Err(LatchError::NotFound(version.to_string()))
            }
            Err(e) => Err(storage_err("Unable to read file", &path, e)),
        }
    }

    pub async fn remove(&self, version: &str) -> Result<()> {
        let path = self.path_for(version);
        match fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => {
                Err(LatchError::NotFound(version.to_string()))
            }
            Err(e) => Err(storage_err("Unable to delete file", &path, e)),
        }
    }

    /// All stored images, sorted by version string.
    pub async fn entries(&self) -> Result<Vec<StoredImage>> {
        let mut dir = fs::read_dir(&self.dir)
            .await
            .map_err(|e| storage_err("Unable to read firmware directory", &self.dir, e))?;

        let mut images = Vec::new();
        while let Some(entry) = dir
            .next_entry()
            .await
            .map_err(|e| storage_err("Unable to read firmware directory", &self.dir, e))?
        {
            let filename = entry.file_name().to_string_lossy().into_owned();
            let Some(version) = version_from_file_name(&filename) else {
                continue;
            };

            // Removed between listing and stat: skip it.
            let meta = match entry.metadata().await {
                Ok(meta) => meta,
                Err(e) if e.kind() == ErrorKind::NotFound => continue,
                Err(e) => return Err(storage_err("Unable to stat", &entry.path(), e)),
            };
            if !meta.is_file() {
                continue;
            }

            let modified = meta
                .modified()
                .map(DateTime::<Utc>::from)
                .unwrap_or_else(|_| Utc::now());

            images.push(StoredImage {
                version: version.to_string(),
                filename: filename.clone(),
                size: meta.len(),
                modified,
                path: entry.path(),
            });
        }

        images.sort_by(|a, b| a.version.cmp(&b.version));
        Ok(images)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_file_name_round_trip() {
        assert_eq!(file_name("1.2.0"), "firmware_1.2.0.bin");
        assert_eq!(version_from_file_name("firmware_1.2.0.bin"), Some("1.2.0"));
    }

    #[test]
    fn test_foreign_files_ignored() {
        assert_eq!(version_from_file_name("notes.txt"), None);
        assert_eq!(version_from_file_name("firmware_.bin"), None);
        assert_eq!(version_from_file_name(".upload-abc.tmp"), None);
        assert_eq!(version_from_file_name("firmware_1.0.bin.bak"), None);
    }

    #[tokio::test]
    async fn test_open_creates_directory() {
        let tmp = tempfile::tempdir().unwrap();
        let dir = tmp.path().join("nested/firmware");
        let store = FirmwareStore::open(&dir).await.unwrap();
        assert!(store.dir().is_dir());
    }

    #[tokio::test]
    async fn test_stage_commit_read() {
        let tmp = tempfile::tempdir().unwrap();
        let store = FirmwareStore::open(tmp.path()).await.unwrap();

        let staged = store.stage(b"image-bytes").await.unwrap();
        assert!(store.entries().await.unwrap().is_empty());

        store.commit(staged, "1.0.0").await.unwrap();
        assert_eq!(store.read("1.0.0").await.unwrap(), b"image-bytes");

        let entries = store.entries().await.unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].version, "1.0.0");
        assert_eq!(entries[0].size, 11);
    }

    #[tokio::test]
    async fn test_missing_version_is_not_found() {
        let tmp = tempfile::tempdir().unwrap();
        let store = FirmwareStore::open(tmp.path()).await.unwrap();
        assert!(matches!(store.read("9.9.9").await, Err(LatchError::NotFound(_))));
        assert!(matches!(store.remove("9.9.9").await, Err(LatchError::NotFound(_))));
    }

    #[tokio::test]
    async fn test_open_sweeps_stale_uploads() {
        let tmp = tempfile::tempdir().unwrap();
        std::fs::write(tmp.path().join(".upload-left-behind.tmp"), b"partial").unwrap();
        std::fs::write(tmp.path().join("firmware_1.0.0.bin"), b"kept").unwrap();

        let store = FirmwareStore::open(tmp.path()).await.unwrap();

        assert!(!tmp.path().join(".upload-left-behind.tmp").exists());
        assert_eq!(store.read("1.0.0").await.unwrap(), b"kept");
        assert_eq!(std::fs::read_dir(tmp.path()).unwrap().count(), 1);
    }

    #[tokio::test]
    async fn test_discard_leaves_no_trace() {
        let tmp = tempfile::tempdir().unwrap();
        let store = FirmwareStore::open(tmp.path()).await.unwrap();
        let staged = store.stage(b"junk").await.unwrap();
        store.discard(staged).await;
        assert_eq!(std::fs::read_dir(tmp.path()).unwrap().count(), 0);
    }
}
