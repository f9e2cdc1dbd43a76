//! Send with failover across the mailbox pool.
//!
//! Each call runs select → attempt → record → reselect until a mailbox
//! accepts the message, nothing is left to try, `max_attempts` is spent, or
//! the caller cancels. A call that made attempts and ran out of mailboxes
//! fails as exhausted; only a call that could try nothing reports that no
//! mailbox was available. The pool is re-read from the store before every
//! selection so exclusions written by concurrent calls are honoured, and a
//! mailbox is never tried twice within one call.

use std::{
    future::{Future, pending},
    pin::Pin,
    sync::Arc,
    time::Instant,
};

use chrono::Utc;
use sendpool_common::audit;
use tracing::Instrument;

use crate::{
    accounting::UsageAccounting,
    error::{DeliveryError, TransportError},
    mailbox::{Mailbox, parse_address},
    policy::FailoverPolicy,
    selector::select_mailbox_excluding,
    transport::Transport,
    types::{Envelope, OutgoingMessage, SendAttempt, SendFailure, SendReport},
};

/// Error text recorded for an attempt aborted by cancellation.
pub const CANCELLED: &str = "cancelled";

enum Outcome {
    Delivered,
    Failed(TransportError),
    Cancelled,
}

/// Sends system emails through the mailbox pool with failover.
#[derive(Clone)]
pub struct FailoverSender {
    accounting: UsageAccounting,
    transport: Arc<dyn Transport>,
    policy: FailoverPolicy,
    fallback: Option<Mailbox>,
}

impl FailoverSender {
    #[must_use]
    pub fn new(
        accounting: UsageAccounting,
        transport: Arc<dyn Transport>,
        policy: FailoverPolicy,
    ) -> Self {
        Self {
            accounting,
            transport,
            policy,
            fallback: None,
        }
    }

    /// A mailbox tried once when the pool has nothing selectable at the start
    /// of a call. It is never accounted.
    #[must_use]
    pub fn with_fallback(mut self, fallback: Option<Mailbox>) -> Self {
        self.fallback = fallback;
        self
    }

    #[must_use]
    pub const fn policy(&self) -> &FailoverPolicy {
        &self.policy
    }

    #[must_use]
    pub const fn accounting(&self) -> &UsageAccounting {
        &self.accounting
    }

    /// Sends `message` to `recipient`, trying up to `max_attempts` mailboxes.
    ///
    /// # Errors
    ///
    /// `InvalidRequest` for a malformed recipient or a message without a
    /// body, `Store` when the pool cannot be read. Mailbox failures are
    /// reported in the [`SendReport`], not as errors.
    pub async fn send(
        &self,
        recipient: &str,
        message: &OutgoingMessage,
        max_attempts: u32,
    ) -> Result<SendReport, DeliveryError> {
        self.send_until(recipient, message, max_attempts, pending::<()>())
            .await
    }

    /// Like [`Self::send`], stopping as soon as `cancel` resolves.
    ///
    /// `cancel` is checked before every selection, so no new attempt starts
    /// once it has resolved. An attempt in flight at that moment is dropped
    /// and recorded with the error `"cancelled"`; no accounting is written
    /// for it, and the report fails with [`SendFailure::Cancelled`].
    ///
    /// # Errors
    ///
    /// As for [`Self::send`].
    pub async fn send_until<C>(
        &self,
        recipient: &str,
        message: &OutgoingMessage,
        max_attempts: u32,
        cancel: C,
    ) -> Result<SendReport, DeliveryError>
    where
        C: Future<Output = ()> + Send,
    {
        let envelope = Self::validate(recipient, message)?;
        let span = tracing::info_span!("send", send_id = %envelope.send_id);

        let cancel = std::pin::pin!(cancel);
        self.run(envelope, FailoverPolicy::effective_attempts(max_attempts), cancel)
            .instrument(span)
            .await
    }

    fn validate(recipient: &str, message: &OutgoingMessage) -> Result<Envelope, DeliveryError> {
        let Some(recipient) = parse_address(recipient) else {
            return Err(DeliveryError::InvalidRequest(format!(
                "invalid recipient address: {recipient:?}"
            )));
        };

        if !message.has_body() {
            return Err(DeliveryError::InvalidRequest(
                "message needs a text or HTML body".to_string(),
            ));
        }

        Ok(Envelope {
            send_id: ulid::Ulid::new().to_string(),
            recipient,
            message: message.clone(),
        })
    }

    async fn run<C>(
        &self,
        envelope: Envelope,
        max_attempts: u32,
        mut cancel: Pin<&mut C>,
    ) -> Result<SendReport, DeliveryError>
    where
        C: Future<Output = ()> + Send,
    {
        let mut report = SendReport {
            send_id: envelope.send_id.clone(),
            success: false,
            mailbox_id: None,
            from_address: None,
            attempts: Vec::new(),
            failure: None,
        };
        let mut tried: Vec<String> = Vec::new();

        while report.attempts.len() < max_attempts as usize {
            let pool = tokio::select! {
                biased;
                () = cancel.as_mut() => {
                    tracing::info!(
                        attempts = report.attempts.len(),
                        "Send cancelled before selection"
                    );
                    report.failure = Some(SendFailure::Cancelled);
                    return Ok(Self::finish(report, &envelope));
                }
                pool = self.accounting.store().list() => pool?,
            };
            let now = Utc::now();

            let Some(mailbox) = select_mailbox_excluding(&pool, now, &tried).cloned() else {
                if !report.attempts.is_empty() {
                    report.failure = Some(SendFailure::AttemptsExhausted);
                } else if let Some(fallback) = &self.fallback {
                    tracing::info!(
                        mailbox_id = %fallback.id,
                        "No pool mailbox available, using fallback mailbox"
                    );
                    self.fallback_attempt(fallback, &envelope, &mut report, cancel.as_mut())
                        .await;
                } else {
                    report.failure = Some(SendFailure::NoMailboxAvailable);
                }
                return Ok(Self::finish(report, &envelope));
            };

            tried.push(mailbox.id.clone());
            let attempt = next_attempt(&report);
            let started_at = Utc::now();
            let clock = Instant::now();

            match self
                .attempt(&mailbox, &envelope, attempt, cancel.as_mut())
                .await
            {
                Outcome::Delivered => {
                    if let Err(e) = self
                        .accounting
                        .record_success(&mailbox.id, Utc::now())
                        .await
                    {
                        tracing::warn!(
                            mailbox_id = %mailbox.id,
                            error = %e,
                            "Failed to record successful send"
                        );
                    }

                    report.attempts.push(SendAttempt::finish(
                        attempt,
                        &mailbox.id,
                        started_at,
                        clock.elapsed(),
                        None,
                    ));
                    report.success = true;
                    report.mailbox_id = Some(mailbox.id);
                    report.from_address = Some(mailbox.from_address);
                    return Ok(Self::finish(report, &envelope));
                }
                Outcome::Failed(error) => {
                    let detail = error.to_string();
                    tracing::warn!(
                        mailbox_id = %mailbox.id,
                        attempt,
                        transient = error.is_transient(),
                        error = %detail,
                        "Send attempt failed, failing over"
                    );

                    if let Err(e) = self
                        .accounting
                        .record_failure(&mailbox.id, &detail, Utc::now(), self.policy.exclusion())
                        .await
                    {
                        tracing::warn!(
                            mailbox_id = %mailbox.id,
                            error = %e,
                            "Failed to record failed send"
                        );
                    }

                    report.attempts.push(SendAttempt::finish(
                        attempt,
                        &mailbox.id,
                        started_at,
                        clock.elapsed(),
                        Some(detail),
                    ));
                }
                Outcome::Cancelled => {
                    report.attempts.push(SendAttempt::finish(
                        attempt,
                        &mailbox.id,
                        started_at,
                        clock.elapsed(),
                        Some(CANCELLED.to_string()),
                    ));
                    report.failure = Some(SendFailure::Cancelled);
                    return Ok(Self::finish(report, &envelope));
                }
            }
        }

        report.failure = Some(SendFailure::AttemptsExhausted);
        Ok(Self::finish(report, &envelope))
    }

    /// One attempt bounded by the attempt timeout and raced against `cancel`.
    async fn attempt<C>(
        &self,
        mailbox: &Mailbox,
        envelope: &Envelope,
        attempt: u32,
        cancel: Pin<&mut C>,
    ) -> Outcome
    where
        C: Future<Output = ()> + Send,
    {
        audit::log_send_attempt(
            &envelope.send_id,
            &envelope.recipient,
            &mailbox.id,
            &mailbox.server_address(),
            attempt,
        );

        let limit = self.policy.attempt_timeout();
        let delivery = tokio::time::timeout(limit, self.transport.send(mailbox, envelope));

        tokio::select! {
            biased;
            () = cancel => {
                tracing::info!(mailbox_id = %mailbox.id, attempt, "Send cancelled mid-attempt");
                Outcome::Cancelled
            }
            result = delivery => match result {
                Ok(Ok(())) => Outcome::Delivered,
                Ok(Err(error)) => Outcome::Failed(error),
                Err(_) => Outcome::Failed(TransportError::Timeout(format!(
                    "attempt exceeded {limit:?}"
                ))),
            },
        }
    }

    async fn fallback_attempt<C>(
        &self,
        fallback: &Mailbox,
        envelope: &Envelope,
        report: &mut SendReport,
        cancel: Pin<&mut C>,
    ) where
        C: Future<Output = ()> + Send,
    {
        let attempt = next_attempt(report);
        let started_at = Utc::now();
        let clock = Instant::now();

        let error = match self.attempt(fallback, envelope, attempt, cancel).await {
            Outcome::Delivered => None,
            Outcome::Failed(error) => {
                tracing::warn!(mailbox_id = %fallback.id, error = %error, "Fallback mailbox failed");
                report.failure = Some(SendFailure::AttemptsExhausted);
                Some(error.to_string())
            }
            Outcome::Cancelled => {
                report.failure = Some(SendFailure::Cancelled);
                Some(CANCELLED.to_string())
            }
        };

        if error.is_none() {
            report.success = true;
            report.mailbox_id = Some(fallback.id.clone());
            report.from_address = Some(fallback.from_address.clone());
        }

        report.attempts.push(SendAttempt::finish(
            attempt,
            &fallback.id,
            started_at,
            clock.elapsed(),
            error,
        ));
    }

    fn finish(report: SendReport, envelope: &Envelope) -> SendReport {
        if report.success {
            let last = report.attempts.last();
            audit::log_send_success(
                &report.send_id,
                &envelope.recipient,
                report.mailbox_id.as_deref().unwrap_or_default(),
                last.map_or(0, |a| a.attempt),
                last.map_or(0, |a| u128::from(a.elapsed_ms)),
            );
            tracing::info!(
                mailbox_id = ?report.mailbox_id,
                attempts = report.attempts.len(),
                "Message sent"
            );
        } else {
            let reason = report
                .failure
                .map_or_else(|| "unknown".to_string(), |f| f.to_string());
            audit::log_send_failure(
                &report.send_id,
                &envelope.recipient,
                &reason,
                report.attempts.len(),
            );
        }

        report
    }
}

fn next_attempt(report: &SendReport) -> u32 {
    u32::try_from(report.attempts.len()).map_or(u32::MAX, |n| n.saturating_add(1))
}
