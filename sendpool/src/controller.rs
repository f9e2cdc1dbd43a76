use std::{
    future::Future,
    sync::{Arc, LazyLock},
};

use chrono::Utc;
use sendpool_common::{Signal, audit, internal};
use sendpool_delivery::{
    AccountingConfig, FailoverSender, Mailbox, MailboxStore, OutgoingMessage, SendReport,
    SmtpTransport, Transport, UsageAccounting, WindowResetJob, store,
};
use tokio::sync::broadcast;

use crate::config::Config;

pub static SHUTDOWN_BROADCAST: LazyLock<broadcast::Sender<Signal>> = LazyLock::new(|| {
    let (sender, _receiver) = broadcast::channel(64);
    sender
});

/// Waits for ctrl-c or SIGTERM, then tells every task to stop.
#[tracing::instrument(level = "trace")]
pub async fn shutdown() -> anyhow::Result<()> {
    let mut terminate = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())?;

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            internal!("CTRL+C entered, shutting down");
        }
        _ = terminate.recv() => {
            internal!("Terminate Signal received, shutting down");
        }
    };

    SHUTDOWN_BROADCAST
        .send(Signal::Shutdown)
        .map_err(|e| std::io::Error::new(std::io::ErrorKind::Interrupted, e.to_string()))?;

    Ok(())
}

/// The wired-up service: store, accounting, sender and reset job settings.
pub struct Sendpool {
    store: Arc<dyn MailboxStore>,
    sender: FailoverSender,
    accounting_config: AccountingConfig,
}

impl Sendpool {
    /// Opens the store, seeds the configured mailboxes and builds the sender
    /// around the real SMTP transport.
    ///
    /// # Errors
    ///
    /// Fails if the store cannot be opened or a configured mailbox is invalid.
    pub async fn init(config: Config) -> anyhow::Result<Self> {
        let transport = SmtpTransport::new(config.helo_name.clone(), config.smtp_timeouts.clone());
        Self::with_transport(config, Arc::new(transport)).await
    }

    /// As [`Self::init`] with a caller-supplied transport.
    ///
    /// # Errors
    ///
    /// As for [`Self::init`].
    pub async fn with_transport(
        config: Config,
        transport: Arc<dyn Transport>,
    ) -> anyhow::Result<Self> {
        audit::init(config.audit.clone());

        if let Some(fallback) = &config.fallback {
            fallback.validate()?;
        }

        let store = config.store.open().await?;
        store::seed(store.as_ref(), &config.mailboxes).await?;
        internal!(
            level = INFO,
            "Mailbox pool ready with {} configured mailbox(es)",
            config.mailboxes.len()
        );

        let sender = FailoverSender::new(
            UsageAccounting::new(Arc::clone(&store)),
            transport,
            config.failover,
        )
        .with_fallback(config.fallback);

        Ok(Self {
            store,
            sender,
            accounting_config: config.accounting,
        })
    }

    #[must_use]
    pub const fn sender(&self) -> &FailoverSender {
        &self.sender
    }

    /// Runs the window reset job until a shutdown signal arrives.
    ///
    /// # Errors
    ///
    /// Fails if the signal handlers cannot be installed.
    pub async fn serve(&self) -> anyhow::Result<()> {
        let job = WindowResetJob::new(self.sender.accounting().clone(), &self.accounting_config);

        internal!(level = INFO, "Controller running");

        let ret = tokio::select! {
            () = job.serve(SHUTDOWN_BROADCAST.subscribe()) => Ok(()),
            r = shutdown() => r,
        };

        internal!(level = INFO, "Shutting down...");
        ret
    }

    /// One failover send, stopped early if `cancel` resolves.
    ///
    /// # Errors
    ///
    /// Invalid requests and unreadable pools.
    pub async fn send<C>(
        &self,
        recipient: &str,
        message: &OutgoingMessage,
        max_attempts: Option<u32>,
        cancel: C,
    ) -> anyhow::Result<SendReport>
    where
        C: Future<Output = ()> + Send,
    {
        let max_attempts = max_attempts.unwrap_or(self.sender.policy().max_attempts);
        Ok(self
            .sender
            .send_until(recipient, message, max_attempts, cancel)
            .await?)
    }

    /// The current pool.
    ///
    /// # Errors
    ///
    /// Store read failures.
    pub async fn mailboxes(&self) -> anyhow::Result<Vec<Mailbox>> {
        Ok(self.store.list().await?)
    }

    /// Resets elapsed windows, or every window when `all` is set.
    ///
    /// # Errors
    ///
    /// Store failures.
    pub async fn reset(&self, all: bool) -> anyhow::Result<usize> {
        let accounting = self.sender.accounting();
        let now = Utc::now();

        Ok(if all {
            accounting.reset_all(now).await?
        } else {
            accounting
                .reset_elapsed_windows(now, self.accounting_config.window())
                .await?
        })
    }
}
