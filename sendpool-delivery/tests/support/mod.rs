#![allow(dead_code)]

pub mod mock_server;

use std::{collections::HashMap, sync::Arc, time::Duration};

use async_trait::async_trait;
use parking_lot::Mutex;
use sendpool_delivery::{Envelope, Mailbox, Transport, TransportError};

/// What a scripted mailbox does when asked to send.
#[derive(Debug, Clone)]
pub enum Script {
    Accept,
    Fail(TransportError),
    /// Sleep before accepting; used for timeouts and cancellation.
    Stall(Duration),
}

/// A [`Transport`] whose outcome per mailbox id is fixed up front.
///
/// Mailboxes without a script accept.
#[derive(Clone, Default)]
pub struct ScriptedTransport {
    scripts: Arc<Mutex<HashMap<String, Script>>>,
    calls: Arc<Mutex<Vec<String>>>,
}

impl ScriptedTransport {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with(self, mailbox_id: &str, script: Script) -> Self {
        self.scripts.lock().insert(mailbox_id.to_string(), script);
        self
    }

    #[must_use]
    pub fn failing(self, mailbox_id: &str) -> Self {
        self.with(
            mailbox_id,
            Script::Fail(TransportError::ConnectionFailed(format!(
                "{mailbox_id} unreachable"
            ))),
        )
    }

    /// Mailbox ids in the order `send` was called.
    #[must_use]
    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().clone()
    }
}

#[async_trait]
impl Transport for ScriptedTransport {
    async fn send(&self, mailbox: &Mailbox, _envelope: &Envelope) -> Result<(), TransportError> {
        self.calls.lock().push(mailbox.id.clone());
        let script = self.scripts.lock().get(&mailbox.id).cloned();

        match script {
            None | Some(Script::Accept) => Ok(()),
            Some(Script::Fail(error)) => Err(error),
            Some(Script::Stall(delay)) => {
                tokio::time::sleep(delay).await;
                Ok(())
            }
        }
    }
}

#[must_use]
pub fn mailbox(id: &str, priority: i32, limit: u32) -> Mailbox {
    Mailbox::new(id, "smtp.example.com", 587, format!("{id}@example.com"))
        .with_priority(priority)
        .with_limit(limit)
}
