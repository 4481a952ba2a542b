use std::sync::Arc;

use async_trait::async_trait;
use mailtrail_common::{OutgoingMessage, SentMessage};

use crate::error::Result;

/// Something that can put a message on the wire.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Transmit `message`.
    ///
    /// # Errors
    ///
    /// Any failure to hand the message to the next hop
    async fn send(&self, message: &OutgoingMessage) -> Result<SentMessage>;

    /// Short human-readable name, e.g. `smtp://relay.example.com:587`
    fn describe(&self) -> String;
}

#[async_trait]
impl<T: Transport + ?Sized> Transport for Box<T> {
    async fn send(&self, message: &OutgoingMessage) -> Result<SentMessage> {
        (**self).send(message).await
    }

    fn describe(&self) -> String {
        (**self).describe()
    }
}

#[async_trait]
impl<T: Transport + ?Sized> Transport for Arc<T> {
    async fn send(&self, message: &OutgoingMessage) -> Result<SentMessage> {
        (**self).send(message).await
    }

    fn describe(&self) -> String {
        (**self).describe()
    }
}
