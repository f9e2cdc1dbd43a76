//! Typed error handling for sending operations.
//!
//! Three layers:
//! - [`TransportError`]: one SMTP attempt through one mailbox failed. Always
//!   recovered locally by excluding the mailbox and moving on.
//! - [`StoreError`]: the mailbox pool could not be read or written.
//! - [`DeliveryError`]: what the public API returns when a send cannot even
//!   start (bad input, unreadable pool).

use sendpool_smtp::client::ClientError;
use thiserror::Error;

/// Failure of a single submission attempt.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TransportError {
    /// TCP connect failed, or the connection dropped mid-session.
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    /// The server refused the mailbox credentials.
    #[error("Authentication failed: {0}")]
    AuthenticationFailed(String),

    /// The server answered a command with a 4xx/5xx reply.
    #[error("Rejected by server: {code} {message}")]
    Rejected { code: u16, message: String },

    /// A stage, or the whole attempt, ran out of time.
    #[error("Timed out: {0}")]
    Timeout(String),

    #[error("TLS failure: {0}")]
    Tls(String),

    /// Malformed reply or a message we could not render.
    #[error("Protocol error: {0}")]
    Protocol(String),
}

impl TransportError {
    /// Whether retrying the same mailbox later could plausibly succeed.
    ///
    /// The failover loop excludes the mailbox either way; this only feeds
    /// logging and operator diagnostics.
    #[must_use]
    pub const fn is_transient(&self) -> bool {
        match self {
            Self::ConnectionFailed(_) | Self::Timeout(_) | Self::Tls(_) => true,
            Self::Rejected { code, .. } => *code >= 400 && *code < 500,
            Self::AuthenticationFailed(_) | Self::Protocol(_) => false,
        }
    }
}

/// Convert from SMTP `ClientError` to `TransportError`.
///
/// - **4xx/5xx replies** → `Rejected` (transience decided by the code)
/// - **I/O and closed connections** → `ConnectionFailed`
/// - **AUTH refusals** → `AuthenticationFailed`
/// - **Parse/UTF-8/builder errors** → `Protocol`
impl From<ClientError> for TransportError {
    fn from(error: ClientError) -> Self {
        match error {
            ClientError::SmtpError { code, message }
            | ClientError::UnexpectedResponse { code, message } => {
                Self::Rejected { code, message }
            }
            ClientError::AuthenticationFailed { code, message } => {
                Self::AuthenticationFailed(format!("{code} {message}"))
            }
            ClientError::NoAuthMechanism(offered) => Self::AuthenticationFailed(format!(
                "no supported AUTH mechanism (server offers: {offered})"
            )),
            ClientError::Io(e) => Self::ConnectionFailed(format!("I/O error: {e}")),
            ClientError::ConnectionClosed => {
                Self::ConnectionFailed("Connection closed unexpectedly".to_string())
            }
            ClientError::TlsError(msg) => Self::Tls(msg),
            ClientError::ParseError(msg) => {
                Self::Protocol(format!("SMTP protocol parse error: {msg}"))
            }
            ClientError::BuilderError(msg) => Self::Protocol(format!("message error: {msg}")),
            ClientError::Utf8Error(e) => Self::Protocol(format!("UTF-8 decoding error: {e}")),
        }
    }
}

/// Errors raised by a [`crate::MailboxStore`].
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Mailbox not found: {0}")]
    NotFound(String),

    #[error("Mailbox already exists: {0}")]
    Duplicate(String),

    /// A mailbox definition failed validation.
    #[error("Invalid mailbox {id}: {reason}")]
    Invalid { id: String, reason: String },

    #[error("Store I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Store serialization error: {0}")]
    Serialization(String),
}

/// Top-level error of the send API.
///
/// Mailbox-level failures never surface here; they end up in the
/// [`crate::SendReport`].
#[derive(Debug, Error)]
pub enum DeliveryError {
    /// Recipient or message failed validation; no attempt was made.
    #[error("Invalid send request: {0}")]
    InvalidRequest(String),

    /// The mailbox pool could not be read.
    #[error(transparent)]
    Store(#[from] StoreError),
}
