use std::{sync::Arc, time::Duration};

use ahash::AHashMap;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;

use super::MailboxStore;
use crate::{error::StoreError, mailbox::Mailbox};

/// In-memory mailbox store
///
/// Every mutation takes the write lock for its whole read-modify-write, so
/// accounting updates are atomic with respect to each other. Cloning shares
/// the underlying pool.
#[derive(Debug, Clone, Default)]
pub struct MemoryMailboxStore {
    mailboxes: Arc<RwLock<AHashMap<String, Mailbox>>>,
}

impl MemoryMailboxStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds a store from records that are already known to be valid, e.g.
    /// a previously persisted pool. Later duplicates replace earlier ones.
    #[must_use]
    pub fn from_mailboxes(mailboxes: impl IntoIterator<Item = Mailbox>) -> Self {
        let map = mailboxes
            .into_iter()
            .map(|mailbox| (mailbox.id.clone(), mailbox))
            .collect();
        Self {
            mailboxes: Arc::new(RwLock::new(map)),
        }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.mailboxes.read().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub(crate) fn snapshot(&self) -> Vec<Mailbox> {
        let mut mailboxes: Vec<Mailbox> = self.mailboxes.read().values().cloned().collect();
        mailboxes.sort_by(|a, b| a.id.cmp(&b.id));
        mailboxes
    }

    pub(crate) fn replace_all(&self, mailboxes: Vec<Mailbox>) {
        *self.mailboxes.write() = mailboxes
            .into_iter()
            .map(|mailbox| (mailbox.id.clone(), mailbox))
            .collect();
    }

    pub(crate) fn insert_sync(&self, mailbox: Mailbox) -> Result<(), StoreError> {
        mailbox.validate()?;

        let mut mailboxes = self.mailboxes.write();
        if mailboxes.contains_key(&mailbox.id) {
            return Err(StoreError::Duplicate(mailbox.id));
        }
        mailboxes.insert(mailbox.id.clone(), mailbox);
        Ok(())
    }

    pub(crate) fn update_sync(&self, mailbox: Mailbox) -> Result<(), StoreError> {
        mailbox.validate()?;

        let mut mailboxes = self.mailboxes.write();
        let Some(slot) = mailboxes.get_mut(&mailbox.id) else {
            return Err(StoreError::NotFound(mailbox.id));
        };
        *slot = mailbox;
        Ok(())
    }

    pub(crate) fn remove_sync(&self, id: &str) -> Result<Mailbox, StoreError> {
        self.mailboxes
            .write()
            .remove(id)
            .ok_or_else(|| StoreError::NotFound(id.to_string()))
    }

    /// Runs `f` against one mailbox under the write lock.
    pub(crate) fn modify(
        &self,
        id: &str,
        f: impl FnOnce(&mut Mailbox),
    ) -> Result<Mailbox, StoreError> {
        let mut mailboxes = self.mailboxes.write();
        let mailbox = mailboxes
            .get_mut(id)
            .ok_or_else(|| StoreError::NotFound(id.to_string()))?;
        f(mailbox);
        Ok(mailbox.clone())
    }

    /// Resets the windows of every mailbox matching `predicate`.
    pub(crate) fn reset_where(
        &self,
        now: DateTime<Utc>,
        predicate: impl Fn(&Mailbox) -> bool,
    ) -> usize {
        let mut reset = 0;
        for mailbox in self.mailboxes.write().values_mut() {
            if predicate(mailbox) {
                mailbox.reset_window(now);
                reset += 1;
            }
        }
        reset
    }
}

#[async_trait]
impl MailboxStore for MemoryMailboxStore {
    async fn list(&self) -> Result<Vec<Mailbox>, StoreError> {
        Ok(self.snapshot())
    }

    async fn get(&self, id: &str) -> Result<Option<Mailbox>, StoreError> {
        Ok(self.mailboxes.read().get(id).cloned())
    }

    async fn insert(&self, mailbox: Mailbox) -> Result<(), StoreError> {
        self.insert_sync(mailbox)
    }

    async fn update(&self, mailbox: Mailbox) -> Result<(), StoreError> {
        self.update_sync(mailbox)
    }

    async fn remove(&self, id: &str) -> Result<Mailbox, StoreError> {
        self.remove_sync(id)
    }

    async fn record_success(&self, id: &str, _now: DateTime<Utc>) -> Result<Mailbox, StoreError> {
        self.modify(id, Mailbox::record_success)
    }

    async fn record_failure(
        &self,
        id: &str,
        detail: &str,
        now: DateTime<Utc>,
        exclusion: Duration,
    ) -> Result<Mailbox, StoreError> {
        self.modify(id, |mailbox| mailbox.record_failure(detail, now, exclusion))
    }

    async fn reset_elapsed_windows(
        &self,
        now: DateTime<Utc>,
        window: Duration,
    ) -> Result<usize, StoreError> {
        Ok(self.reset_where(now, |mailbox| mailbox.window_elapsed(now, window)))
    }

    async fn reset_all(&self, now: DateTime<Utc>) -> Result<usize, StoreError> {
        Ok(self.reset_where(now, |_| true))
    }
}

#[cfg(test)]
mod tests {
    use chrono::{TimeDelta, TimeZone};
    use pretty_assertions::assert_eq;

    use super::*;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap()
    }

    fn mailbox(id: &str) -> Mailbox {
        let mut mailbox = Mailbox::new(id, "smtp.example.com", 587, format!("{id}@example.com"));
        mailbox.window_started_at = now();
        mailbox
    }

    #[tokio::test]
    async fn test_insert_get_list_remove() {
        let store = MemoryMailboxStore::new();
        store.insert(mailbox("b")).await.unwrap();
        store.insert(mailbox("a")).await.unwrap();

        assert!(matches!(
            store.insert(mailbox("a")).await,
            Err(StoreError::Duplicate(id)) if id == "a"
        ));

        let ids: Vec<String> = store.list().await.unwrap().into_iter().map(|m| m.id).collect();
        assert_eq!(ids, vec!["a", "b"]);

        assert_eq!(store.remove("a").await.unwrap().id, "a");
        assert!(store.get("a").await.unwrap().is_none());
        assert!(matches!(store.remove("a").await, Err(StoreError::NotFound(_))));
    }

    #[tokio::test]
    async fn test_update_requires_existing() {
        let store = MemoryMailboxStore::new();
        assert!(matches!(
            store.update(mailbox("a")).await,
            Err(StoreError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_accounting_operations() {
        let store = MemoryMailboxStore::from_mailboxes([mailbox("a")]);

        let updated = store.record_success("a", now()).await.unwrap();
        assert_eq!(updated.sent_count_window, 1);
        assert_eq!(updated.total_sent, 1);

        let updated = store
            .record_failure("a", "421 try later", now(), Duration::from_secs(60))
            .await
            .unwrap();
        assert_eq!(updated.sent_count_window, 1);
        assert_eq!(updated.excluded_until, Some(now() + TimeDelta::seconds(60)));

        assert!(matches!(
            store.record_success("missing", now()).await,
            Err(StoreError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_reset_only_touches_elapsed_windows() {
        let mut old = mailbox("old");
        old.window_started_at = now() - TimeDelta::hours(25);
        old.sent_count_window = 7;
        let mut fresh = mailbox("fresh");
        fresh.window_started_at = now() - TimeDelta::hours(1);
        fresh.sent_count_window = 3;

        let store = MemoryMailboxStore::from_mailboxes([old, fresh]);
        let reset = store
            .reset_elapsed_windows(now(), Duration::from_secs(86_400))
            .await
            .unwrap();
        assert_eq!(reset, 1);

        let old = store.get("old").await.unwrap().unwrap();
        assert_eq!(old.sent_count_window, 0);
        assert_eq!(old.window_started_at, now());
        assert_eq!(store.get("fresh").await.unwrap().unwrap().sent_count_window, 3);

        assert_eq!(store.reset_all(now()).await.unwrap(), 2);
        assert_eq!(store.get("fresh").await.unwrap().unwrap().sent_count_window, 0);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_successes_are_not_lost() {
        let store = MemoryMailboxStore::from_mailboxes([mailbox("a")]);

        let tasks: Vec<_> = (0..64)
            .map(|_| {
                let store = store.clone();
                tokio::spawn(async move { store.record_success("a", now()).await })
            })
            .collect();
        for task in tasks {
            task.await.unwrap().unwrap();
        }

        assert_eq!(store.get("a").await.unwrap().unwrap().sent_count_window, 64);
    }
}
