use std::{
    ffi::OsString,
    io,
    path::{Path, PathBuf},
    sync::Arc,
};

use inlet_core::ChannelUuid;
use serde::Serialize;
use thiserror::Error;
use time::OffsetDateTime;
use tokio::{
    fs,
    io::AsyncWriteExt,
    sync::{Mutex, MutexGuard},
};
use tracing::{debug, instrument};
use uuid::Uuid;

use crate::entry::{SpoolEntry, SpoolKind};

/// Suffix appended to entries that could not be parsed or replayed.
pub const ERROR_SUFFIX: &str = "error";
/// Suffix appended to entries that exhausted their replay attempts.
pub const DEAD_SUFFIX: &str = "dead";

const ENTRY_EXTENSION: &str = "json";

#[derive(Debug, Error)]
pub enum SpoolError {
    #[error("spool io on {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("unable to encode spool entry: {0}")]
    Encode(#[from] serde_json::Error),
}

fn io_err(path: &Path) -> impl FnOnce(io::Error) -> SpoolError + '_ {
    move |source| SpoolError::Io {
        path: path.to_path_buf(),
        source,
    }
}

/// Handle on a spool directory. Clones share the flush cycle lock.
#[derive(Debug, Clone)]
pub struct Spool {
    root: PathBuf,
    cycle: Arc<Mutex<()>>,
}

impl Spool {
    /// Opens (creating if needed) the spool rooted at `root`.
    pub async fn open(root: impl Into<PathBuf>) -> Result<Self, SpoolError> {
        let root = root.into();
        for kind in SpoolKind::ALL {
            let dir = root.join(kind.as_str());
            fs::create_dir_all(&dir).await.map_err(io_err(&dir))?;
        }
        Ok(Self {
            root,
            cycle: Arc::new(Mutex::new(())),
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn dir(&self, kind: SpoolKind) -> PathBuf {
        self.root.join(kind.as_str())
    }

    /// Durably writes `payload` as a new entry and returns its path.
    #[instrument(name = "spool.write", skip(self, payload), fields(kind = %kind, channel_uuid = %channel_uuid))]
    pub async fn write<T: Serialize + Sync>(
        &self,
        kind: SpoolKind,
        channel_uuid: ChannelUuid,
        payload: &T,
    ) -> Result<PathBuf, SpoolError> {
        let entry = SpoolEntry::new(kind, channel_uuid, payload);
        let path = self.dir(kind).join(entry_name(entry.spooled_on));
        self.persist(&path, &entry).await?;
        debug!(path = %path.display(), "entry spooled");
        Ok(path)
    }

    /// Pending entries of `kind`, oldest first.
    pub async fn pending(&self, kind: SpoolKind) -> Result<Vec<PathBuf>, SpoolError> {
        self.list(kind, |name| {
            !name.starts_with('.') && name.ends_with(&format!(".{ENTRY_EXTENSION}"))
        })
        .await
    }

    pub async fn pending_count(&self) -> Result<usize, SpoolError> {
        let mut total = 0;
        for kind in SpoolKind::ALL {
            total += self.pending(kind).await?.len();
        }
        Ok(total)
    }

    /// Entries of `kind` that were set aside with `suffix`.
    pub async fn set_aside(&self, kind: SpoolKind, suffix: &str) -> Result<Vec<PathBuf>, SpoolError> {
        let tail = format!(".{suffix}");
        self.list(kind, |name| name.ends_with(&tail)).await
    }

    async fn list(
        &self,
        kind: SpoolKind,
        keep: impl Fn(&str) -> bool,
    ) -> Result<Vec<PathBuf>, SpoolError> {
        let dir = self.dir(kind);
        let mut reader = fs::read_dir(&dir).await.map_err(io_err(&dir))?;
        let mut paths = Vec::new();
        while let Some(item) = reader.next_entry().await.map_err(io_err(&dir))? {
            let name = item.file_name();
            if name.to_str().is_some_and(&keep) {
                paths.push(item.path());
            }
        }
        paths.sort();
        Ok(paths)
    }

    pub async fn read(&self, path: &Path) -> Result<Vec<u8>, SpoolError> {
        fs::read(path).await.map_err(io_err(path))
    }

    pub async fn remove(&self, path: &Path) -> Result<(), SpoolError> {
        fs::remove_file(path).await.map_err(io_err(path))
    }

    /// Replaces the entry at `path` in place.
    pub async fn rewrite<T: Serialize + Sync>(
        &self,
        path: &Path,
        entry: &SpoolEntry<T>,
    ) -> Result<(), SpoolError> {
        self.persist(path, entry).await
    }

    /// Renames the entry so the flusher no longer picks it up.
    pub async fn set_aside_as(&self, path: &Path, suffix: &str) -> Result<PathBuf, SpoolError> {
        let mut target = OsString::from(path.as_os_str());
        target.push(".");
        target.push(suffix);
        let target = PathBuf::from(target);
        fs::rename(path, &target).await.map_err(io_err(path))?;
        Ok(target)
    }

    pub(crate) async fn lock_cycle(&self) -> MutexGuard<'_, ()> {
        self.cycle.lock().await
    }

    /// Writes `value` to a temp file, syncs it and renames it over `path`,
    /// then syncs the directory so the new name survives a crash.
    async fn persist<T: Serialize + Sync>(&self, path: &Path, value: &T) -> Result<(), SpoolError> {
        let bytes = serde_json::to_vec(value)?;
        let tmp = temp_path(path);
        let written = async {
            let mut file = fs::File::create(&tmp).await?;
            file.write_all(&bytes).await?;
            file.sync_all().await?;
            drop(file);
            fs::rename(&tmp, path).await
        }
        .await;
        if let Err(err) = written {
            if let Err(cleanup) = fs::remove_file(&tmp).await {
                debug!(path = %tmp.display(), error = %cleanup, "temp entry not removed");
            }
            return Err(io_err(path)(err));
        }
        match path.parent() {
            Some(dir) => sync_dir(dir).await,
            None => Ok(()),
        }
    }
}

#[cfg(unix)]
async fn sync_dir(dir: &Path) -> Result<(), SpoolError> {
    let handle = fs::File::open(dir).await.map_err(io_err(dir))?;
    handle.sync_all().await.map_err(io_err(dir))
}

#[cfg(not(unix))]
async fn sync_dir(_dir: &Path) -> Result<(), SpoolError> {
    Ok(())
}

fn entry_name(spooled_on: OffsetDateTime) -> String {
    format!(
        "{:020}_{}.{ENTRY_EXTENSION}",
        spooled_on.unix_timestamp_nanos(),
        Uuid::new_v4().simple()
    )
}

fn temp_path(path: &Path) -> PathBuf {
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    path.with_file_name(format!(".{name}.tmp"))
}
