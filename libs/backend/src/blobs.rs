use std::{
    io,
    path::{Path, PathBuf},
    sync::Arc,
};

use async_trait::async_trait;
use inlet_core::{ChannelUuid, OrgId};
use thiserror::Error;
use tokio::fs;
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum BlobError {
    #[error("blob io on {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

/// Destination for decoded inline attachments.
#[async_trait]
pub trait BlobStore: Send + Sync {
    /// Stores `data` and returns the public URL it can be fetched from.
    async fn save(
        &self,
        org_id: OrgId,
        channel_uuid: ChannelUuid,
        extension: &str,
        data: &[u8],
    ) -> Result<String, BlobError>;
}

pub type SharedBlobStore = Arc<dyn BlobStore>;

/// Writes blobs below a local directory served under `base_url`.
#[derive(Debug, Clone)]
pub struct FsBlobStore {
    root: PathBuf,
    base_url: String,
}

impl FsBlobStore {
    pub fn new(root: impl Into<PathBuf>, base_url: impl Into<String>) -> Self {
        Self {
            root: root.into(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
        }
    }

    /// Maps a URL returned by [`BlobStore::save`] back to its file.
    pub fn resolve(&self, url: &str) -> Option<PathBuf> {
        let relative = url.strip_prefix(&self.base_url)?.strip_prefix('/')?;
        if relative.split('/').any(|part| part == ".." || part.is_empty()) {
            return None;
        }
        Some(self.root.join(relative))
    }
}

#[async_trait]
impl BlobStore for FsBlobStore {
    async fn save(
        &self,
        org_id: OrgId,
        channel_uuid: ChannelUuid,
        extension: &str,
        data: &[u8],
    ) -> Result<String, BlobError> {
        let relative = format!("{org_id}/{channel_uuid}/{}.{extension}", Uuid::new_v4());
        let path = self.root.join(&relative);
        if let Some(dir) = path.parent() {
            fs::create_dir_all(dir).await.map_err(io_err(dir))?;
        }
        fs::write(&path, data).await.map_err(io_err(&path))?;
        Ok(format!("{}/{relative}", self.base_url))
    }
}

fn io_err(path: &Path) -> impl FnOnce(io::Error) -> BlobError + '_ {
    move |source| BlobError::Io {
        path: path.to_path_buf(),
        source,
    }
}

#[cfg(test)]
mod tests {
    use tempfile::TempDir;

    use super::*;

    #[tokio::test]
    async fn saved_blobs_resolve_to_their_bytes() {
        let dir = TempDir::new().unwrap();
        let blobs = FsBlobStore::new(dir.path(), "https://media.example.com/");
        let url = blobs
            .save(OrgId(3), ChannelUuid::new(), "png", b"bytes")
            .await
            .unwrap();
        assert!(url.starts_with("https://media.example.com/3/"));
        assert!(url.ends_with(".png"));
        let path = blobs.resolve(&url).unwrap();
        assert_eq!(tokio::fs::read(path).await.unwrap(), b"bytes");
        assert!(blobs.resolve("https://media.example.com/../etc/passwd").is_none());
        assert!(blobs.resolve("https://elsewhere/x.png").is_none());
    }
}
