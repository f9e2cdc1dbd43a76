//! Audit logging for outbound send events
//!
//! Every mailbox attempt and every final outcome is emitted as a structured
//! `tracing` event so operators can reconstruct which mailbox carried which
//! system email.
//!
//! ## Audit Events
//!
//! - `SendAttempt`: one SMTP submission through a specific mailbox
//! - `SendSuccess`: the message was accepted by a mailbox's server
//! - `SendFailure`: the failover loop gave up (no mailbox, attempts exhausted, cancelled)
//!
//! Recipient addresses can be redacted through [`AuditConfig`].

use std::sync::{Arc, OnceLock};

use serde::{Deserialize, Serialize};

/// Audit logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditConfig {
    /// Enable audit events
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Redact the local part of recipient addresses
    #[serde(default)]
    pub redact_recipients: bool,
}

impl Default for AuditConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            redact_recipients: false,
        }
    }
}

const fn default_true() -> bool {
    true
}

static AUDIT_CONFIG: OnceLock<Arc<AuditConfig>> = OnceLock::new();

/// Initialize audit logging with configuration
///
/// Only the first call takes effect.
pub fn init(config: AuditConfig) {
    AUDIT_CONFIG.get_or_init(|| Arc::new(config));
}

/// Get the current audit configuration
#[must_use]
pub fn config() -> Arc<AuditConfig> {
    AUDIT_CONFIG
        .get()
        .cloned()
        .unwrap_or_else(|| Arc::new(AuditConfig::default()))
}

/// Redact email address if redaction is enabled
#[must_use]
pub fn redact_email(email: &str, redact: bool) -> String {
    if redact {
        // Keep domain but redact local part
        if let Some((_, domain)) = email.split_once('@') {
            format!("[REDACTED]@{domain}")
        } else {
            "[REDACTED]".to_string()
        }
    } else {
        email.to_string()
    }
}

/// Log a single mailbox attempt
///
/// # Fields
/// - `send_id`: correlation id of the whole failover call
/// - `mailbox_id`: mailbox used for this attempt
/// - `server`: `host:port` of the mailbox
/// - `send_attempt`: attempt number (1-based)
pub fn log_send_attempt(
    send_id: &str,
    recipient: &str,
    mailbox_id: &str,
    server: &str,
    attempt: u32,
) {
    let config = config();
    if !config.enabled {
        return;
    }

    tracing::event!(
        tracing::Level::INFO,
        event = "SendAttempt",
        send_id = %send_id,
        recipient = %redact_email(recipient, config.redact_recipients),
        mailbox_id = %mailbox_id,
        server = %server,
        send_attempt = attempt,
        "Audit: Send attempt"
    );
}

/// Log a successful send
pub fn log_send_success(
    send_id: &str,
    recipient: &str,
    mailbox_id: &str,
    attempt: u32,
    duration_ms: u128,
) {
    let config = config();
    if !config.enabled {
        return;
    }

    tracing::event!(
        tracing::Level::INFO,
        event = "SendSuccess",
        send_id = %send_id,
        recipient = %redact_email(recipient, config.redact_recipients),
        mailbox_id = %mailbox_id,
        send_attempt = attempt,
        duration_ms = duration_ms,
        "Audit: Send successful"
    );
}

/// Log the final failure of a send
///
/// `reason` is the report-level failure (`NoMailboxAvailable`, `AttemptsExhausted`, ...).
pub fn log_send_failure(send_id: &str, recipient: &str, reason: &str, attempts: usize) {
    let config = config();
    if !config.enabled {
        return;
    }

    tracing::event!(
        tracing::Level::WARN,
        event = "SendFailure",
        send_id = %send_id,
        recipient = %redact_email(recipient, config.redact_recipients),
        reason = %reason,
        attempts = attempts,
        "Audit: Send failed"
    );
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn test_redact_email() {
        assert_eq!(
            redact_email("user@example.com", true),
            "[REDACTED]@example.com"
        );
        assert_eq!(redact_email("user@example.com", false), "user@example.com");
        assert_eq!(redact_email("invalid", true), "[REDACTED]");
        assert_eq!(redact_email("invalid", false), "invalid");
    }

    #[test]
    fn test_default_config() {
        let config = AuditConfig::default();
        assert!(config.enabled);
        assert!(!config.redact_recipients);
    }

    #[test]
    fn test_audit_disabled() {
        init(AuditConfig {
            enabled: false,
            redact_recipients: true,
        });

        // These should not panic even when disabled
        log_send_attempt("01J0", "rcpt@example.com", "primary", "smtp.example.com:587", 1);
        log_send_success("01J0", "rcpt@example.com", "primary", 1, 120);
        log_send_failure("01J0", "rcpt@example.com", "AttemptsExhausted", 5);
    }
}
