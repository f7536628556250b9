use anyhow::{Context, Result};
use chrono::Utc;
use std::path::{Path, PathBuf};

pub const PHOTO_DIR: &str = "photos";

/// Copies captured photos under the data directory so they outlive the camera's temp files.
#[derive(Debug, Clone)]
pub struct PhotoVault {
    root: PathBuf,
}

impl PhotoVault {
    pub fn new(data_dir: impl AsRef<Path>) -> Self {
        Self {
            root: data_dir.as_ref().join(PHOTO_DIR),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Copies `source` to `photos/<catch_tag>_<millis>.jpg` and returns the new path.
    pub async fn store_photo(&self, source: impl AsRef<Path>, catch_tag: &str) -> Result<PathBuf> {
        let source = source.as_ref();
        tokio::fs::create_dir_all(&self.root)
            .await
            .with_context(|| format!("Failed to create photo directory {}", self.root.display()))?;

        let destination = self
            .root
            .join(format!("{}_{}.jpg", catch_tag, Utc::now().timestamp_millis()));
        tokio::fs::copy(source, &destination).await.with_context(|| {
            format!(
                "Failed to copy photo {} to {}",
                source.display(),
                destination.display()
            )
        })?;

        tracing::debug!("Stored photo {}", destination.display());
        Ok(destination)
    }

    /// Returns the path back if the file is still there.
    pub async fn resolve_photo(&self, stored: impl AsRef<Path>) -> Option<PathBuf> {
        let stored = stored.as_ref();
        match tokio::fs::try_exists(stored).await {
            Ok(true) => Some(stored.to_path_buf()),
            Ok(false) => None,
            Err(e) => {
                tracing::warn!("Failed to check photo {}: {}", stored.display(), e);
                None
            }
        }
    }
}
