//! File-backed document store: `base_dir/<kind>/<uuid>[@scope].json`.

use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use niveria_core::{CapabilityKind, DocumentStore, EntityKey, StoreResult, StoredDocument};
use tokio::fs;
use tracing::trace;

/// Stores one pretty-printed JSON document per record.
///
/// Writes merge with the existing file (field-level last-write-wins) and
/// replace it atomically through a temporary file. The gateway is the only
/// writer, so no cross-process locking is attempted.
#[derive(Debug, Clone)]
pub struct FileStore {
    base_dir: PathBuf,
}

impl FileStore {
    /// Creates a store rooted at `base_dir`. Directories are created lazily.
    pub fn new(base_dir: impl Into<PathBuf>) -> Self {
        Self {
            base_dir: base_dir.into(),
        }
    }

    /// Root directory.
    pub fn base_dir(&self) -> &Path {
        &self.base_dir
    }

    /// Path of the document for `(key, kind)`.
    pub fn path_for(&self, key: &EntityKey, kind: CapabilityKind) -> PathBuf {
        self.base_dir
            .join(kind.as_str())
            .join(format!("{}.json", key.file_stem()))
    }

    async fn read(path: &Path) -> StoreResult<Option<StoredDocument>> {
        match fs::read(path).await {
            Ok(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(err) => Err(err.into()),
        }
    }
}

#[async_trait]
impl DocumentStore for FileStore {
    fn name(&self) -> &str {
        "file"
    }

    async fn load(&self, key: &EntityKey, kind: CapabilityKind) -> StoreResult<Option<StoredDocument>> {
        Self::read(&self.path_for(key, kind)).await
    }

    async fn write(&self, document: StoredDocument) -> StoreResult<()> {
        let path = self.path_for(&document.key, document.kind);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).await?;
        }

        let merged = match Self::read(&path).await? {
            Some(mut existing) => {
                existing.merge_lww(document);
                existing
            }
            None => document,
        };

        let tmp = path.with_extension("json.tmp");
        fs::write(&tmp, serde_json::to_vec_pretty(&merged)?).await?;
        fs::rename(&tmp, &path).await?;
        trace!(path = %path.display(), "Document written");
        Ok(())
    }

    async fn ping(&self) -> StoreResult<Duration> {
        let started = std::time::Instant::now();
        fs::create_dir_all(&self.base_dir).await?;
        fs::metadata(&self.base_dir).await?;
        Ok(started.elapsed())
    }
}
