//! Outbound mailbox model and its eligibility rules.

use std::{fmt, time::Duration};

use chrono::{DateTime, TimeDelta, Utc};
use serde::{Deserialize, Serialize};

use crate::error::StoreError;

/// The most recent failure recorded against a mailbox.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LastError {
    pub message: String,
    pub at: DateTime<Utc>,
}

/// One configured outbound SMTP account.
///
/// Connection fields come from configuration; the operational fields are
/// owned by accounting and survive restarts when a file store is used.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Mailbox {
    pub id: String,

    pub host: String,

    #[serde(default = "defaults::port")]
    pub port: u16,

    #[serde(default)]
    pub username: Option<String>,

    #[serde(default)]
    pub password: Option<String>,

    pub from_address: String,

    #[serde(default)]
    pub from_name: Option<String>,

    /// Lower is preferred.
    #[serde(default)]
    pub priority: i32,

    #[serde(default = "defaults::is_active")]
    pub is_active: bool,

    #[serde(default = "defaults::max_sends_per_window")]
    pub max_sends_per_window: u32,

    #[serde(default)]
    pub sent_count_window: u32,

    #[serde(default = "Utc::now")]
    pub window_started_at: DateTime<Utc>,

    #[serde(default)]
    pub excluded_until: Option<DateTime<Utc>>,

    #[serde(default)]
    pub last_error: Option<LastError>,

    /// Lifetime number of accepted messages.
    #[serde(default)]
    pub total_sent: u64,

    /// Skip TLS certificate verification. Testing only.
    #[serde(default)]
    pub accept_invalid_certs: bool,

    /// Allow AUTH on a session that could not be encrypted. Local relays
    /// and testing only.
    #[serde(default)]
    pub allow_plaintext_auth: bool,
}

mod defaults {
    pub const fn port() -> u16 {
        587
    }

    pub const fn is_active() -> bool {
        true
    }

    pub const fn max_sends_per_window() -> u32 {
        500
    }
}

impl fmt::Debug for Mailbox {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Mailbox")
            .field("id", &self.id)
            .field("host", &self.host)
            .field("port", &self.port)
            .field("username", &self.username)
            .field("password", &self.password.as_ref().map(|_| "[REDACTED]"))
            .field("from_address", &self.from_address)
            .field("from_name", &self.from_name)
            .field("priority", &self.priority)
            .field("is_active", &self.is_active)
            .field("sent_count_window", &self.sent_count_window)
            .field("max_sends_per_window", &self.max_sends_per_window)
            .field("window_started_at", &self.window_started_at)
            .field("excluded_until", &self.excluded_until)
            .field("last_error", &self.last_error)
            .field("total_sent", &self.total_sent)
            .finish_non_exhaustive()
    }
}

/// Why a mailbox can or cannot be selected at a given instant.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Eligibility {
    Eligible,
    Inactive,
    Excluded { until: DateTime<Utc> },
    WindowFull { sent: u32, max: u32 },
}

impl fmt::Display for Eligibility {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Eligible => write!(f, "eligible"),
            Self::Inactive => write!(f, "inactive"),
            Self::Excluded { until } => write!(f, "excluded until {}", until.to_rfc3339()),
            Self::WindowFull { sent, max } => write!(f, "window full ({sent}/{max})"),
        }
    }
}

impl Mailbox {
    /// A new active mailbox with default limits and an accounting window starting now.
    #[must_use]
    pub fn new(
        id: impl Into<String>,
        host: impl Into<String>,
        port: u16,
        from_address: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            host: host.into(),
            port,
            username: None,
            password: None,
            from_address: from_address.into(),
            from_name: None,
            priority: 0,
            is_active: true,
            max_sends_per_window: defaults::max_sends_per_window(),
            sent_count_window: 0,
            window_started_at: Utc::now(),
            excluded_until: None,
            last_error: None,
            total_sent: 0,
            accept_invalid_certs: false,
            allow_plaintext_auth: false,
        }
    }

    #[must_use]
    pub fn with_credentials(mut self, username: impl Into<String>, password: impl Into<String>) -> Self {
        self.username = Some(username.into());
        self.password = Some(password.into());
        self
    }

    #[must_use]
    pub const fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    #[must_use]
    pub const fn with_limit(mut self, max_sends_per_window: u32) -> Self {
        self.max_sends_per_window = max_sends_per_window;
        self
    }

    /// `host:port`, as used for the TCP connect.
    #[must_use]
    pub fn server_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    #[must_use]
    pub const fn has_credentials(&self) -> bool {
        self.username.is_some() && self.password.is_some()
    }

    /// Evaluates the selection rules at `now`.
    ///
    /// An exclusion ends exactly at `excluded_until`.
    #[must_use]
    pub fn eligibility(&self, now: DateTime<Utc>) -> Eligibility {
        if !self.is_active {
            return Eligibility::Inactive;
        }

        if let Some(until) = self.excluded_until
            && until > now
        {
            return Eligibility::Excluded { until };
        }

        if self.sent_count_window >= self.max_sends_per_window {
            return Eligibility::WindowFull {
                sent: self.sent_count_window,
                max: self.max_sends_per_window,
            };
        }

        Eligibility::Eligible
    }

    #[must_use]
    pub fn is_selectable(&self, now: DateTime<Utc>) -> bool {
        self.eligibility(now) == Eligibility::Eligible
    }

    /// Counts one accepted message. The window cap is not checked here.
    pub const fn record_success(&mut self) {
        self.sent_count_window = self.sent_count_window.saturating_add(1);
        self.total_sent = self.total_sent.saturating_add(1);
    }

    /// Stores the failure and excludes the mailbox until `now + exclusion`.
    pub fn record_failure(&mut self, detail: impl Into<String>, now: DateTime<Utc>, exclusion: Duration) {
        self.last_error = Some(LastError {
            message: detail.into(),
            at: now,
        });
        self.excluded_until = Some(add_saturating(now, exclusion));
    }

    #[must_use]
    pub fn window_elapsed(&self, now: DateTime<Utc>, window: Duration) -> bool {
        add_saturating(self.window_started_at, window) <= now
    }

    /// Starts a fresh accounting window at `now`.
    pub const fn reset_window(&mut self, now: DateTime<Utc>) {
        self.sent_count_window = 0;
        self.window_started_at = now;
    }

    /// Copies connection and policy fields from a configured definition,
    /// keeping the counters, exclusion and error state.
    pub fn refresh_from(&mut self, configured: &Self) {
        self.host.clone_from(&configured.host);
        self.port = configured.port;
        self.username.clone_from(&configured.username);
        self.password.clone_from(&configured.password);
        self.from_address.clone_from(&configured.from_address);
        self.from_name.clone_from(&configured.from_name);
        self.priority = configured.priority;
        self.is_active = configured.is_active;
        self.max_sends_per_window = configured.max_sends_per_window;
        self.accept_invalid_certs = configured.accept_invalid_certs;
        self.allow_plaintext_auth = configured.allow_plaintext_auth;
    }

    /// Checks the fields a store refuses to persist.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::Invalid` describing the first problem found.
    pub fn validate(&self) -> Result<(), StoreError> {
        let invalid = |reason: &str| StoreError::Invalid {
            id: self.id.clone(),
            reason: reason.to_string(),
        };

        if self.id.trim().is_empty() {
            return Err(invalid("id must not be empty"));
        }
        if self.host.trim().is_empty() {
            return Err(invalid("host must not be empty"));
        }
        if self.port == 0 {
            return Err(invalid("port must not be 0"));
        }
        if parse_address(&self.from_address).is_none() {
            return Err(invalid("from_address is not a single mailbox address"));
        }
        if self.username.is_some() != self.password.is_some() {
            return Err(invalid("username and password must be set together"));
        }

        Ok(())
    }
}

/// Parses a single RFC 5322 mailbox (`a@b` or `Name <a@b>`) and returns the
/// bare address.
pub(crate) fn parse_address(input: &str) -> Option<String> {
    let info = mailparse::addrparse(input).ok()?.extract_single_info()?;
    let (local, domain) = info.addr.rsplit_once('@')?;

    if local.is_empty()
        || domain.is_empty()
        || info.addr.chars().any(|c| c.is_whitespace() || c.is_control())
    {
        return None;
    }

    Some(info.addr)
}

fn add_saturating(at: DateTime<Utc>, by: Duration) -> DateTime<Utc> {
    TimeDelta::from_std(by)
        .ok()
        .and_then(|delta| at.checked_add_signed(delta))
        .unwrap_or(DateTime::<Utc>::MAX_UTC)
}
