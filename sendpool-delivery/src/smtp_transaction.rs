//! SMTP submission through one mailbox
//!
//! Runs a complete authenticated submission session:
//! - Implicit TLS on port 465, otherwise EHLO + STARTTLS
//! - AUTH when the mailbox has credentials
//! - MAIL FROM / RCPT TO / DATA
//! - QUIT for connection cleanup
//!
//! Every stage is bounded by its own timeout from [`SmtpTimeouts`].

use std::{future::Future, time::Duration};

use sendpool_common::{internal, tracing};
use sendpool_smtp::client::{Capabilities, ClientError, MessageBuilder, Response, SmtpClient};

use crate::{
    error::TransportError,
    mailbox::Mailbox,
    types::{Envelope, SmtpTimeouts},
};

/// Port on which the session is TLS from the first byte.
pub const IMPLICIT_TLS_PORT: u16 = 465;

/// Runs one step with a timeout, converting client errors on the way out.
async fn stage<T, F>(name: &str, secs: u64, step: F) -> Result<T, TransportError>
where
    F: Future<Output = Result<T, ClientError>>,
{
    let limit = Duration::from_secs(secs);
    tokio::time::timeout(limit, step)
        .await
        .map_err(|_| TransportError::Timeout(format!("{name} timed out after {limit:?}")))?
        .map_err(TransportError::from)
}

fn expect_success(name: &str, response: Response) -> Result<Response, TransportError> {
    if response.is_success() {
        Ok(response)
    } else {
        tracing::debug!(stage = name, code = response.code, "Server refused command");
        Err(TransportError::Rejected {
            code: response.code,
            message: response.message(),
        })
    }
}

/// A single SMTP submission of one envelope through one mailbox.
pub struct SmtpTransaction<'a> {
    mailbox: &'a Mailbox,
    envelope: &'a Envelope,
    helo_name: &'a str,
    timeouts: &'a SmtpTimeouts,
}

impl<'a> SmtpTransaction<'a> {
    #[must_use]
    pub const fn new(
        mailbox: &'a Mailbox,
        envelope: &'a Envelope,
        helo_name: &'a str,
        timeouts: &'a SmtpTimeouts,
    ) -> Self {
        Self {
            mailbox,
            envelope,
            helo_name,
            timeouts,
        }
    }

    /// Renders the RFC 5322 message for this envelope.
    ///
    /// # Errors
    ///
    /// Returns `Protocol` when the message has no body.
    pub fn render(&self) -> Result<String, TransportError> {
        let message = &self.envelope.message;
        let mut builder = MessageBuilder::new()
            .from(&self.mailbox.from_address, self.mailbox.from_name.as_deref())
            .to(&self.envelope.recipient)
            .subject(&message.subject)
            .header("X-Sendpool-Id", &self.envelope.send_id);

        if let Some(text) = &message.text_body {
            builder = builder.text_body(text);
        }
        if let Some(html) = &message.html_body {
            builder = builder.html_body(html);
        }

        builder.build().map_err(TransportError::from)
    }

    /// Execute the complete SMTP transaction
    ///
    /// 1. Connect (TLS from the start on port 465) and read the greeting
    /// 2. EHLO; upgrade via STARTTLS when offered, and require it when
    ///    credentials would otherwise cross the wire in clear
    /// 3. AUTH (PLAIN, else LOGIN) when the mailbox has credentials
    /// 4. MAIL FROM, RCPT TO, DATA and the message
    /// 5. QUIT, whose failure does not fail the send
    ///
    /// # Errors
    ///
    /// Returns the first failing stage as a [`TransportError`].
    #[tracing::instrument(
        level = "debug",
        skip(self),
        fields(mailbox_id = %self.mailbox.id, server = %self.mailbox.server_address(), send_id = %self.envelope.send_id)
    )]
    pub async fn execute(self) -> Result<(), TransportError> {
        let data = self.render()?;

        if self.mailbox.accept_invalid_certs {
            tracing::warn!(
                mailbox_id = %self.mailbox.id,
                "SECURITY WARNING: TLS certificate validation is disabled for this mailbox"
            );
        }

        let mut client = self.connect_and_greet().await?;
        let capabilities = self.negotiate(&mut client).await?;
        self.authenticate(&mut client, &capabilities).await?;

        let timeouts = self.timeouts;
        expect_success(
            "MAIL FROM",
            stage(
                "MAIL FROM",
                timeouts.mail_from_secs,
                client.mail_from(&self.mailbox.from_address),
            )
            .await?,
        )?;

        expect_success(
            "RCPT TO",
            stage(
                "RCPT TO",
                timeouts.rcpt_to_secs,
                client.rcpt_to(&self.envelope.recipient),
            )
            .await?,
        )?;

        let response = stage("DATA", timeouts.data_secs, client.data()).await?;
        if response.code != 354 {
            return Err(TransportError::Rejected {
                code: response.code,
                message: response.message(),
            });
        }

        expect_success(
            "message",
            stage("message", timeouts.data_secs, client.send_data(&data)).await?,
        )?;

        let quit_timeout = Duration::from_secs(timeouts.quit_secs);
        if tokio::time::timeout(quit_timeout, client.quit()).await.is_err() {
            tracing::warn!(
                mailbox_id = %self.mailbox.id,
                timeout = ?quit_timeout,
                "QUIT timed out after the message was accepted"
            );
        }

        Ok(())
    }

    async fn connect_and_greet(&self) -> Result<SmtpClient, TransportError> {
        let address = self.mailbox.server_address();
        let host = self.mailbox.host.clone();
        let accept_invalid = self.mailbox.accept_invalid_certs;
        let limit = Duration::from_secs(self.timeouts.connect_secs);

        let target = address.clone();
        let implicit_tls = self.mailbox.port == IMPLICIT_TLS_PORT;
        let connect = async move {
            if implicit_tls {
                SmtpClient::connect_tls(&target, host, accept_invalid).await
            } else {
                SmtpClient::connect(&target, host)
                    .await
                    .map(|client| client.accept_invalid_certs(accept_invalid))
            }
        };

        let mut client = tokio::time::timeout(limit, connect)
            .await
            .map_err(|_| {
                TransportError::Timeout(format!("connect to {address} timed out after {limit:?}"))
            })?
            .map_err(|e| match TransportError::from(e) {
                TransportError::ConnectionFailed(msg) => {
                    TransportError::ConnectionFailed(format!("{address}: {msg}"))
                }
                other => other,
            })?;

        internal!("Connected to {address}");

        let greeting = stage("greeting", self.timeouts.ehlo_secs, client.read_greeting()).await?;
        expect_success("greeting", greeting)?;

        Ok(client)
    }

    /// EHLO, then STARTTLS when needed. Returns the capabilities that apply
    /// to the (possibly upgraded) session.
    async fn negotiate(&self, client: &mut SmtpClient) -> Result<Capabilities, TransportError> {
        let ehlo = stage("EHLO", self.timeouts.ehlo_secs, client.ehlo(self.helo_name)).await?;
        let capabilities = Capabilities::from_ehlo(&expect_success("EHLO", ehlo)?);

        if client.is_tls() {
            return Ok(capabilities);
        }

        if !capabilities.starttls {
            if self.mailbox.has_credentials() && !self.mailbox.allow_plaintext_auth {
                return Err(TransportError::Tls(
                    "server does not offer STARTTLS; refusing to send credentials in clear"
                        .to_string(),
                ));
            }
            tracing::debug!(mailbox_id = %self.mailbox.id, "Proceeding without TLS");
            return Ok(capabilities);
        }

        let response = stage("STARTTLS", self.timeouts.starttls_secs, client.starttls()).await?;
        expect_success("STARTTLS", response).map_err(|e| TransportError::Tls(e.to_string()))?;
        internal!("STARTTLS negotiated");

        let ehlo = stage("EHLO", self.timeouts.ehlo_secs, client.ehlo(self.helo_name)).await?;
        Ok(Capabilities::from_ehlo(&expect_success("EHLO", ehlo)?))
    }

    async fn authenticate(
        &self,
        client: &mut SmtpClient,
        capabilities: &Capabilities,
    ) -> Result<(), TransportError> {
        let (Some(username), Some(password)) = (&self.mailbox.username, &self.mailbox.password)
        else {
            return Ok(());
        };

        stage(
            "AUTH",
            self.timeouts.auth_secs,
            client.authenticate(capabilities, username, password),
        )
        .await?;

        internal!("Authenticated as {username}");
        Ok(())
    }
}
