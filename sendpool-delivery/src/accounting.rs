//! Per-mailbox usage accounting on top of a [`MailboxStore`].

use std::{sync::Arc, time::Duration};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{error::StoreError, mailbox::Mailbox, store::MailboxStore};

/// Accounting window configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccountingConfig {
    /// Length of the window `max_sends_per_window` applies to.
    ///
    /// Default: 86400 seconds (daily)
    #[serde(default = "defaults::window_secs")]
    pub window_secs: u64,

    /// How often the reset job checks for elapsed windows.
    ///
    /// Default: 60 seconds
    #[serde(default = "defaults::reset_interval_secs")]
    pub reset_interval_secs: u64,
}

mod defaults {
    pub const fn window_secs() -> u64 {
        86_400
    }

    pub const fn reset_interval_secs() -> u64 {
        60
    }
}

impl Default for AccountingConfig {
    fn default() -> Self {
        Self {
            window_secs: defaults::window_secs(),
            reset_interval_secs: defaults::reset_interval_secs(),
        }
    }
}

impl AccountingConfig {
    #[must_use]
    pub const fn window(&self) -> Duration {
        Duration::from_secs(self.window_secs)
    }

    #[must_use]
    pub const fn reset_interval(&self) -> Duration {
        Duration::from_secs(self.reset_interval_secs)
    }
}

/// Records send outcomes against mailboxes and rolls accounting windows over.
#[derive(Clone)]
pub struct UsageAccounting {
    store: Arc<dyn MailboxStore>,
}

impl UsageAccounting {
    #[must_use]
    pub fn new(store: Arc<dyn MailboxStore>) -> Self {
        Self { store }
    }

    #[must_use]
    pub fn store(&self) -> &Arc<dyn MailboxStore> {
        &self.store
    }

    /// Counts one accepted message against `id`.
    ///
    /// # Errors
    ///
    /// Propagates store failures, including `NotFound`.
    pub async fn record_success(&self, id: &str, now: DateTime<Utc>) -> Result<Mailbox, StoreError> {
        let mailbox = self.store.record_success(id, now).await?;
        tracing::debug!(
            mailbox_id = %id,
            sent_count_window = mailbox.sent_count_window,
            max_sends_per_window = mailbox.max_sends_per_window,
            "Recorded successful send"
        );
        Ok(mailbox)
    }

    /// Stores `detail` as the last error and excludes `id` until `now + exclusion`.
    ///
    /// # Errors
    ///
    /// Propagates store failures, including `NotFound`.
    pub async fn record_failure(
        &self,
        id: &str,
        detail: &str,
        now: DateTime<Utc>,
        exclusion: Duration,
    ) -> Result<Mailbox, StoreError> {
        let mailbox = self.store.record_failure(id, detail, now, exclusion).await?;
        tracing::info!(
            mailbox_id = %id,
            excluded_until = ?mailbox.excluded_until,
            error = %detail,
            "Excluded mailbox after failed send"
        );
        Ok(mailbox)
    }

    /// # Errors
    ///
    /// Propagates store failures.
    pub async fn reset_elapsed_windows(
        &self,
        now: DateTime<Utc>,
        window: Duration,
    ) -> Result<usize, StoreError> {
        let reset = self.store.reset_elapsed_windows(now, window).await?;
        if reset > 0 {
            tracing::info!(reset, "Reset elapsed accounting windows");
        }
        Ok(reset)
    }

    /// # Errors
    ///
    /// Propagates store failures.
    pub async fn reset_all(&self, now: DateTime<Utc>) -> Result<usize, StoreError> {
        let reset = self.store.reset_all(now).await?;
        tracing::info!(reset, "Reset all accounting windows");
        Ok(reset)
    }
}

#[cfg(test)]
mod tests {
    use chrono::{TimeDelta, TimeZone};
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::{selector::select_mailbox, store::MemoryMailboxStore};

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap()
    }

    fn accounting() -> UsageAccounting {
        let mut mailbox = Mailbox::new("a", "smtp.example.com", 587, "a@example.com");
        mailbox.window_started_at = now();
        UsageAccounting::new(Arc::new(MemoryMailboxStore::from_mailboxes([mailbox])))
    }

    #[tokio::test]
    async fn test_success_increments_by_exactly_one() {
        let accounting = accounting();
        let before = accounting.store().get("a").await.unwrap().unwrap();
        let after = accounting.record_success("a", now()).await.unwrap();
        assert_eq!(after.sent_count_window, before.sent_count_window + 1);
    }

    #[tokio::test]
    async fn test_failure_leaves_count_and_excludes_until_deadline() {
        let accounting = accounting();
        let exclusion = Duration::from_secs(300);

        let after = accounting
            .record_failure("a", "connection refused", now(), exclusion)
            .await
            .unwrap();
        assert_eq!(after.sent_count_window, 0);

        let pool = accounting.store().list().await.unwrap();
        for offset in [0, 1, 150, 299] {
            assert!(select_mailbox(&pool, now() + TimeDelta::seconds(offset)).is_none());
        }
        assert_eq!(
            select_mailbox(&pool, now() + TimeDelta::seconds(300)).map(|m| m.id.as_str()),
            Some("a")
        );
    }

    #[test]
    fn test_config_defaults() {
        let config: AccountingConfig = ron::from_str("()").unwrap();
        assert_eq!(config.window(), Duration::from_secs(86_400));
        assert_eq!(config.reset_interval(), Duration::from_secs(60));
    }
}
