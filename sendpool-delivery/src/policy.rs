//! Failover policy for send operations.
//!
//! Failover is exclusion based: a mailbox that fails is benched for
//! `exclusion_secs` and the next attempt goes to a different mailbox. There
//! is no backoff on a single mailbox.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Failover policy configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FailoverPolicy {
    /// Maximum number of mailbox attempts per send. 0 is treated as 1.
    ///
    /// Default: 5 attempts
    #[serde(default = "defaults::max_attempts")]
    pub max_attempts: u32,

    /// How long a mailbox is skipped after a failed attempt (in seconds).
    ///
    /// Default: 600 seconds (10 minutes)
    #[serde(default = "defaults::exclusion_secs")]
    pub exclusion_secs: u64,

    /// Upper bound on one whole attempt, on top of the per-command
    /// SMTP timeouts (in seconds).
    ///
    /// Default: 60 seconds
    #[serde(default = "defaults::attempt_timeout_secs")]
    pub attempt_timeout_secs: u64,
}

mod defaults {
    pub const fn max_attempts() -> u32 {
        5
    }

    pub const fn exclusion_secs() -> u64 {
        600
    }

    pub const fn attempt_timeout_secs() -> u64 {
        60
    }
}

impl Default for FailoverPolicy {
    fn default() -> Self {
        Self {
            max_attempts: defaults::max_attempts(),
            exclusion_secs: defaults::exclusion_secs(),
            attempt_timeout_secs: defaults::attempt_timeout_secs(),
        }
    }
}

impl FailoverPolicy {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// `max_attempts` with 0 clamped to 1.
    #[must_use]
    pub const fn effective_attempts(max_attempts: u32) -> u32 {
        if max_attempts == 0 { 1 } else { max_attempts }
    }

    #[must_use]
    pub const fn exclusion(&self) -> Duration {
        Duration::from_secs(self.exclusion_secs)
    }

    #[must_use]
    pub const fn attempt_timeout(&self) -> Duration {
        Duration::from_secs(self.attempt_timeout_secs)
    }
}
