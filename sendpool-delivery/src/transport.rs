//! The seam between the failover loop and the wire.

use async_trait::async_trait;

use crate::{
    error::TransportError,
    mailbox::Mailbox,
    smtp_transaction::SmtpTransaction,
    types::{Envelope, SmtpTimeouts},
};

/// Delivers one envelope through one mailbox.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Submit `envelope` using the connection details and sender of `mailbox`.
    ///
    /// # Errors
    ///
    /// Any failure of the attempt; the caller excludes the mailbox and moves on.
    async fn send(&self, mailbox: &Mailbox, envelope: &Envelope) -> Result<(), TransportError>;
}

/// [`Transport`] that speaks SMTP submission to the mailbox's server.
#[derive(Debug, Clone)]
pub struct SmtpTransport {
    helo_name: String,
    timeouts: SmtpTimeouts,
}

impl SmtpTransport {
    #[must_use]
    pub fn new(helo_name: impl Into<String>, timeouts: SmtpTimeouts) -> Self {
        Self {
            helo_name: helo_name.into(),
            timeouts,
        }
    }
}

#[async_trait]
impl Transport for SmtpTransport {
    async fn send(&self, mailbox: &Mailbox, envelope: &Envelope) -> Result<(), TransportError> {
        SmtpTransaction::new(mailbox, envelope, &self.helo_name, &self.timeouts)
            .execute()
            .await
    }
}
