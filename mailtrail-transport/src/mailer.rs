//! The mailer: a transport plus lifecycle notifications.
//!
//! Listeners hear about every message twice at most: once before it is
//! handed to the transport, and once more after the transport accepted it.
//! There is no failure notification; a send that errors simply never
//! produces the second event.

use std::sync::Arc;

use mailtrail_common::{OutgoingMessage, SentMessage, internal};
use parking_lot::Mutex;

use crate::{error::Result, transport::Transport};

/// Read-only surface a mailer may expose to listeners.
pub trait MailerIntrospection {
    /// Description of the transport doing the actual sending
    fn transport_name(&self) -> String;

    /// The receipt of the most recent successful send
    fn sent_message(&self) -> Option<SentMessage>;
}

/// A reference to the mailer emitting an event.
///
/// Listeners must not assume anything about the concrete mailer; they ask
/// for [`MailerIntrospection`] and ignore mailers that do not offer it.
pub trait MailerHandle: Send + Sync {
    fn introspection(&self) -> Option<&dyn MailerIntrospection>;
}

/// Emitted before the transport is called.
pub struct BeforeSendEvent<'a> {
    pub mailer: &'a dyn MailerHandle,
    pub message: Option<&'a OutgoingMessage>,
}

/// Emitted after the transport accepted a message.
pub struct AfterSendEvent<'a> {
    pub mailer: &'a dyn MailerHandle,
    pub sent: &'a SentMessage,
}

/// Observer of mailer events.
///
/// Listeners run inline on the sending task and must not fail the send.
pub trait MailEventListener: Send + Sync {
    fn before_send(&self, event: &BeforeSendEvent<'_>);

    fn after_send(&self, event: &AfterSendEvent<'_>);
}

/// Sends messages through a transport and notifies listeners.
pub struct Mailer {
    transport: Box<dyn Transport>,
    listeners: Vec<Arc<dyn MailEventListener>>,
    last_sent: Mutex<Option<SentMessage>>,
}

impl std::fmt::Debug for Mailer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Mailer")
            .field("transport", &self.transport.describe())
            .field("listeners", &self.listeners.len())
            .finish_non_exhaustive()
    }
}

impl Mailer {
    #[must_use]
    pub fn new(transport: impl Transport + 'static) -> Self {
        Self {
            transport: Box::new(transport),
            listeners: Vec::new(),
            last_sent: Mutex::new(None),
        }
    }

    #[must_use]
    pub fn with_listener(mut self, listener: Arc<dyn MailEventListener>) -> Self {
        self.listeners.push(listener);
        self
    }

    pub fn add_listener(&mut self, listener: Arc<dyn MailEventListener>) {
        self.listeners.push(listener);
    }

    #[must_use]
    pub fn transport(&self) -> &dyn Transport {
        self.transport.as_ref()
    }

    /// Send `message`, returning exactly what the transport returned.
    ///
    /// # Errors
    ///
    /// Whatever the transport raised; listeners cannot change it.
    pub async fn send(&self, message: &OutgoingMessage) -> Result<SentMessage> {
        {
            let before = BeforeSendEvent {
                mailer: self,
                message: Some(message),
            };
            for listener in &self.listeners {
                listener.before_send(&before);
            }
        }

        let sent = self.transport.send(message).await?;

        internal!(
            level = DEBUG,
            "{} accepted {}",
            self.transport.describe(),
            sent.message_id()
        );
        *self.last_sent.lock() = Some(sent.clone());

        let after = AfterSendEvent {
            mailer: self,
            sent: &sent,
        };
        for listener in &self.listeners {
            listener.after_send(&after);
        }

        Ok(sent)
    }
}

impl MailerHandle for Mailer {
    fn introspection(&self) -> Option<&dyn MailerIntrospection> {
        Some(self)
    }
}

impl MailerIntrospection for Mailer {
    fn transport_name(&self) -> String {
        self.transport.describe()
    }

    fn sent_message(&self) -> Option<SentMessage> {
        self.last_sent.lock().clone()
    }
}
