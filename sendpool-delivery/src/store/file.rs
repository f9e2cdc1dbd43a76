use std::{
    path::{Path, PathBuf},
    time::Duration,
};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::{fs, sync::Mutex};

use super::{MailboxStore, MemoryMailboxStore};
use crate::{error::StoreError, mailbox::Mailbox};

#[derive(Debug, Default, Serialize, Deserialize)]
struct PoolDocument {
    #[serde(default)]
    mailboxes: Vec<Mailbox>,
}

/// Mailbox store persisted as a single RON document
///
/// The pool is held in memory and the whole document is rewritten after
/// every mutation using "write to temp, then rename", so a crash leaves
/// either the old or the new pool on disk, never a torn file. Temporary
/// files are named `.tmp_<file name>` next to the target. A mutation whose
/// write fails is undone in memory and its error returned.
#[derive(Debug)]
pub struct FileMailboxStore {
    path: PathBuf,
    pool: MemoryMailboxStore,
    /// Held across each mutation and its write, so a rollback never discards
    /// another writer's change.
    persist: Mutex<()>,
}

impl FileMailboxStore {
    /// Loads the pool at `path`, starting empty when the file does not exist.
    ///
    /// # Errors
    ///
    /// Fails if the file exists but cannot be read or parsed, or if its
    /// parent directory cannot be created.
    pub async fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let path = path.as_ref().to_path_buf();

        let document = match fs::read_to_string(&path).await {
            Ok(contents) => ron::from_str::<PoolDocument>(&contents)
                .map_err(|e| StoreError::Serialization(format!("{}: {e}", path.display())))?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                if let Some(parent) = path.parent()
                    && !parent.as_os_str().is_empty()
                {
                    fs::create_dir_all(parent).await?;
                }
                PoolDocument::default()
            }
            Err(e) => return Err(e.into()),
        };

        tracing::info!(
            path = %path.display(),
            mailboxes = document.mailboxes.len(),
            "Opened file mailbox store"
        );

        Ok(Self {
            path,
            pool: MemoryMailboxStore::from_mailboxes(document.mailboxes),
            persist: Mutex::new(()),
        })
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn temp_path(&self) -> PathBuf {
        let name = self
            .path
            .file_name()
            .map_or_else(|| "pool.ron".into(), |n| n.to_string_lossy());
        self.path.with_file_name(format!(".tmp_{name}"))
    }

    /// Applies `change` to the pool and writes the result. If the write
    /// fails the pool is put back the way it was, so memory never holds
    /// state the file does not.
    async fn commit<T>(
        &self,
        change: impl FnOnce(&MemoryMailboxStore) -> Result<T, StoreError>,
    ) -> Result<T, StoreError> {
        let _guard = self.persist.lock().await;

        let before = self.pool.snapshot();
        let value = change(&self.pool)?;

        if let Err(e) = self.write_document().await {
            tracing::warn!(
                path = %self.path.display(),
                error = %e,
                "Failed to persist mailbox pool, rolling back"
            );
            self.pool.replace_all(before);
            return Err(e);
        }
        Ok(value)
    }

    async fn write_document(&self) -> Result<(), StoreError> {
        let document = PoolDocument {
            mailboxes: self.pool.snapshot(),
        };
        let contents = ron::ser::to_string_pretty(&document, ron::ser::PrettyConfig::default())
            .map_err(|e| StoreError::Serialization(e.to_string()))?;

        let temp = self.temp_path();
        fs::write(&temp, contents).await?;
        fs::rename(&temp, &self.path).await?;

        tracing::trace!(path = %self.path.display(), "Persisted mailbox pool");
        Ok(())
    }
}

#[async_trait]
impl MailboxStore for FileMailboxStore {
    async fn list(&self) -> Result<Vec<Mailbox>, StoreError> {
        Ok(self.pool.snapshot())
    }

    async fn get(&self, id: &str) -> Result<Option<Mailbox>, StoreError> {
        self.pool.get(id).await
    }

    async fn insert(&self, mailbox: Mailbox) -> Result<(), StoreError> {
        self.commit(|pool| pool.insert_sync(mailbox)).await
    }

    async fn update(&self, mailbox: Mailbox) -> Result<(), StoreError> {
        self.commit(|pool| pool.update_sync(mailbox)).await
    }

    async fn remove(&self, id: &str) -> Result<Mailbox, StoreError> {
        self.commit(|pool| pool.remove_sync(id)).await
    }

    async fn record_success(&self, id: &str, _now: DateTime<Utc>) -> Result<Mailbox, StoreError> {
        self.commit(|pool| pool.modify(id, Mailbox::record_success)).await
    }

    async fn record_failure(
        &self,
        id: &str,
        detail: &str,
        now: DateTime<Utc>,
        exclusion: Duration,
    ) -> Result<Mailbox, StoreError> {
        self.commit(|pool| {
            pool.modify(id, |mailbox| mailbox.record_failure(detail, now, exclusion))
        })
        .await
    }

    async fn reset_elapsed_windows(
        &self,
        now: DateTime<Utc>,
        window: Duration,
    ) -> Result<usize, StoreError> {
        let elapsed = |mailbox: &Mailbox| mailbox.window_elapsed(now, window);
        if !self.pool.snapshot().iter().any(elapsed) {
            return Ok(0);
        }
        self.commit(|pool| Ok(pool.reset_where(now, elapsed))).await
    }

    async fn reset_all(&self, now: DateTime<Utc>) -> Result<usize, StoreError> {
        self.commit(|pool| Ok(pool.reset_where(now, |_| true))).await
    }
}
