//! Type definitions for messages, attempts and send reports

use std::{fmt, time::Duration};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// SMTP operation timeout configuration
///
/// Every stage of a submission is bounded on its own, so one hung command
/// fails the attempt instead of stalling the failover loop.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SmtpTimeouts {
    /// Timeout for TCP connect (and the TLS handshake on implicit-TLS ports)
    ///
    /// Default: 30 seconds
    #[serde(default = "default_connect_timeout")]
    pub connect_secs: u64,

    /// Timeout for the server greeting and each EHLO
    ///
    /// Default: 30 seconds
    #[serde(default = "default_ehlo_timeout")]
    pub ehlo_secs: u64,

    /// Timeout for STARTTLS command and TLS upgrade
    ///
    /// Default: 30 seconds
    #[serde(default = "default_starttls_timeout")]
    pub starttls_secs: u64,

    /// Timeout for the whole AUTH exchange
    ///
    /// Default: 30 seconds
    #[serde(default = "default_auth_timeout")]
    pub auth_secs: u64,

    /// Timeout for MAIL FROM command
    ///
    /// Default: 30 seconds
    #[serde(default = "default_mail_from_timeout")]
    pub mail_from_secs: u64,

    /// Timeout for RCPT TO command
    ///
    /// Default: 30 seconds
    #[serde(default = "default_rcpt_to_timeout")]
    pub rcpt_to_secs: u64,

    /// Timeout for DATA command and message transmission
    ///
    /// Default: 120 seconds (2 minutes)
    #[serde(default = "default_data_timeout")]
    pub data_secs: u64,

    /// Timeout for QUIT command
    ///
    /// Default: 10 seconds
    #[serde(default = "default_quit_timeout")]
    pub quit_secs: u64,
}

impl Default for SmtpTimeouts {
    fn default() -> Self {
        Self {
            connect_secs: default_connect_timeout(),
            ehlo_secs: default_ehlo_timeout(),
            starttls_secs: default_starttls_timeout(),
            auth_secs: default_auth_timeout(),
            mail_from_secs: default_mail_from_timeout(),
            rcpt_to_secs: default_rcpt_to_timeout(),
            data_secs: default_data_timeout(),
            quit_secs: default_quit_timeout(),
        }
    }
}

const fn default_connect_timeout() -> u64 {
    30
}

const fn default_ehlo_timeout() -> u64 {
    30
}

const fn default_starttls_timeout() -> u64 {
    30
}

const fn default_auth_timeout() -> u64 {
    30
}

const fn default_mail_from_timeout() -> u64 {
    30
}

const fn default_rcpt_to_timeout() -> u64 {
    30
}

const fn default_data_timeout() -> u64 {
    120
}

const fn default_quit_timeout() -> u64 {
    10
}

/// Content of a system email. At least one body must be present.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutgoingMessage {
    pub subject: String,
    #[serde(default)]
    pub text_body: Option<String>,
    #[serde(default)]
    pub html_body: Option<String>,
}

impl OutgoingMessage {
    #[must_use]
    pub fn text(subject: impl Into<String>, body: impl Into<String>) -> Self {
        Self {
            subject: subject.into(),
            text_body: Some(body.into()),
            html_body: None,
        }
    }

    #[must_use]
    pub fn html(subject: impl Into<String>, body: impl Into<String>) -> Self {
        Self {
            subject: subject.into(),
            text_body: None,
            html_body: Some(body.into()),
        }
    }

    #[must_use]
    pub fn with_text(mut self, body: impl Into<String>) -> Self {
        self.text_body = Some(body.into());
        self
    }

    #[must_use]
    pub const fn has_body(&self) -> bool {
        self.text_body.is_some() || self.html_body.is_some()
    }
}

/// One validated send request as handed to a [`crate::Transport`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Envelope {
    /// Correlates every attempt of one failover call in the logs.
    pub send_id: String,
    /// Bare recipient address (`local@domain`).
    pub recipient: String,
    pub message: OutgoingMessage,
}

/// Record of one mailbox attempt within a failover call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SendAttempt {
    /// 1-based attempt number.
    pub attempt: u32,
    pub mailbox_id: String,
    pub success: bool,
    pub error: Option<String>,
    pub started_at: DateTime<Utc>,
    pub elapsed_ms: u64,
}

impl SendAttempt {
    pub(crate) fn finish(
        attempt: u32,
        mailbox_id: &str,
        started_at: DateTime<Utc>,
        elapsed: Duration,
        error: Option<String>,
    ) -> Self {
        Self {
            attempt,
            mailbox_id: mailbox_id.to_string(),
            success: error.is_none(),
            error,
            started_at,
            elapsed_ms: u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX),
        }
    }
}

/// Why a failover call ended without a successful send.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SendFailure {
    /// Nothing was selectable at the start of the call and no attempt was made.
    NoMailboxAvailable,
    /// At least one attempt was made and all failed, either because
    /// `max_attempts` was spent or because no untried mailbox remained.
    AttemptsExhausted,
    /// The caller's cancellation fired before the call finished.
    Cancelled,
}

impl fmt::Display for SendFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NoMailboxAvailable => write!(f, "NoMailboxAvailable"),
            Self::AttemptsExhausted => write!(f, "AttemptsExhausted"),
            Self::Cancelled => write!(f, "Cancelled"),
        }
    }
}

/// Result of [`crate::FailoverSender::send`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SendReport {
    pub send_id: String,
    pub success: bool,
    /// Mailbox that accepted the message.
    pub mailbox_id: Option<String>,
    pub from_address: Option<String>,
    /// Every attempt, in order.
    pub attempts: Vec<SendAttempt>,
    pub failure: Option<SendFailure>,
}

impl SendReport {
    /// A short human-readable summary, e.g. for CLI output.
    #[must_use]
    pub fn summary(&self) -> String {
        match (&self.mailbox_id, self.failure) {
            (Some(mailbox), _) if self.success => format!(
                "sent via {mailbox} after {} attempt(s)",
                self.attempts.len()
            ),
            (_, Some(failure)) => {
                format!("failed: {failure} after {} attempt(s)", self.attempts.len())
            }
            _ => "failed".to_string(),
        }
    }
}
