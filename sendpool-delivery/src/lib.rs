//! Mailbox selection, SMTP failover and usage accounting
//!
//! This crate provides:
//! - The [`Mailbox`] model and its eligibility rules
//! - Deterministic mailbox selection ([`select_mailbox`])
//! - [`FailoverSender`], which tries mailboxes in turn until one accepts
//! - [`UsageAccounting`] and the periodic [`WindowResetJob`]
//! - The [`MailboxStore`] persistence seam (memory and RON file backends)
//! - [`SmtpTransport`], the real submission path behind [`Transport`]

mod accounting;
mod error;
mod failover;
mod mailbox;
mod policy;
mod selector;
mod smtp_transaction;
pub mod store;
mod transport;
mod types;
mod window;

pub use accounting::{AccountingConfig, UsageAccounting};
pub use error::{DeliveryError, StoreError, TransportError};
pub use failover::{CANCELLED, FailoverSender};
pub use mailbox::{Eligibility, LastError, Mailbox};
pub use policy::FailoverPolicy;
pub use selector::{select_mailbox, select_mailbox_excluding};
pub use smtp_transaction::{IMPLICIT_TLS_PORT, SmtpTransaction};
pub use store::{FileMailboxStore, MailboxStore, MemoryMailboxStore, StoreConfig};
pub use transport::{SmtpTransport, Transport};
pub use types::{
    Envelope, OutgoingMessage, SendAttempt, SendFailure, SendReport, SmtpTimeouts,
};
pub use window::WindowResetJob;
