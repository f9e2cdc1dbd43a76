//! Persistence for the mailbox pool.
//!
//! Accounting mutations (`record_success`, `record_failure` and the window
//! resets) are single operations on the store so that an implementation can
//! apply them atomically; concurrent successes never lose an increment.

mod file;
mod memory;

use std::{path::PathBuf, sync::Arc, time::Duration};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub use file::FileMailboxStore;
pub use memory::MemoryMailboxStore;

use crate::{error::StoreError, mailbox::Mailbox};

/// Keyed storage for [`Mailbox`] records.
#[async_trait]
pub trait MailboxStore: Send + Sync {
    /// All mailboxes, ordered by id.
    async fn list(&self) -> Result<Vec<Mailbox>, StoreError>;

    async fn get(&self, id: &str) -> Result<Option<Mailbox>, StoreError>;

    /// # Errors
    ///
    /// `Duplicate` when the id exists, `Invalid` when validation fails.
    async fn insert(&self, mailbox: Mailbox) -> Result<(), StoreError>;

    /// Replaces an existing mailbox.
    ///
    /// # Errors
    ///
    /// `NotFound` when the id does not exist.
    async fn update(&self, mailbox: Mailbox) -> Result<(), StoreError>;

    async fn remove(&self, id: &str) -> Result<Mailbox, StoreError>;

    /// Applies [`Mailbox::record_success`] and returns the updated record.
    async fn record_success(&self, id: &str, now: DateTime<Utc>) -> Result<Mailbox, StoreError>;

    /// Applies [`Mailbox::record_failure`] and returns the updated record.
    async fn record_failure(
        &self,
        id: &str,
        detail: &str,
        now: DateTime<Utc>,
        exclusion: Duration,
    ) -> Result<Mailbox, StoreError>;

    /// Resets every mailbox whose window has elapsed; returns how many were reset.
    async fn reset_elapsed_windows(
        &self,
        now: DateTime<Utc>,
        window: Duration,
    ) -> Result<usize, StoreError>;

    /// Resets every mailbox's window unconditionally.
    async fn reset_all(&self, now: DateTime<Utc>) -> Result<usize, StoreError>;
}

/// Which store backend to use.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum StoreConfig {
    /// Pool lives in memory; counters are lost on restart.
    #[default]
    Memory,
    /// Pool is persisted as a RON document at `path`.
    File { path: PathBuf },
}

impl StoreConfig {
    /// Opens the configured backend.
    ///
    /// # Errors
    ///
    /// Fails if the file store cannot be read or parsed.
    pub async fn open(&self) -> Result<Arc<dyn MailboxStore>, StoreError> {
        Ok(match self {
            Self::Memory => Arc::new(MemoryMailboxStore::new()),
            Self::File { path } => Arc::new(FileMailboxStore::open(path).await?),
        })
    }
}

/// Makes `store` hold exactly the configured mailboxes.
///
/// New ids are inserted; existing ones get their connection and policy
/// fields refreshed while counters, exclusions and errors are kept. Stored
/// ids that are no longer configured are removed.
///
/// # Errors
///
/// Fails on the first invalid mailbox or store error.
pub async fn seed(store: &dyn MailboxStore, mailboxes: &[Mailbox]) -> Result<(), StoreError> {
    for configured in mailboxes {
        configured.validate()?;

        if let Some(mut existing) = store.get(&configured.id).await? {
            existing.refresh_from(configured);
            store.update(existing).await?;
        } else {
            store.insert(configured.clone()).await?;
        }
    }

    for stale in store.list().await? {
        if !mailboxes.iter().any(|configured| configured.id == stale.id) {
            store.remove(&stale.id).await?;
            tracing::info!(mailbox = %stale.id, "Removed mailbox no longer in configuration");
        }
    }

    tracing::debug!(count = mailboxes.len(), "Seeded mailbox pool");
    Ok(())
}
