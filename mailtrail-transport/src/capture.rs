//! Failure capture around a transport.
//!
//! [`CaptureTransport`] is a transparent decorator: it forwards every send
//! unchanged and returns the inner result untouched, but leaves a snapshot
//! of the most recent failure in a [`FailureSlot`] shared with whoever
//! reconciles unfinished attempts.

use std::sync::Arc;

use async_trait::async_trait;
use mailtrail_common::{OutgoingMessage, SentMessage, outgoing};
use parking_lot::Mutex;

use crate::{
    error::{Result, TransportError},
    transport::Transport,
};

/// Snapshot of a failed send.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CapturedFailure {
    kind: String,
    message: String,
    failed_message: OutgoingMessage,
}

impl CapturedFailure {
    #[must_use]
    pub fn new(
        kind: impl Into<String>,
        message: impl Into<String>,
        failed_message: OutgoingMessage,
    ) -> Self {
        Self {
            kind: kind.into(),
            message: message.into(),
            failed_message,
        }
    }

    #[must_use]
    pub fn from_error(error: &TransportError, failed_message: OutgoingMessage) -> Self {
        Self::new(error.kind(), error.to_string(), failed_message)
    }

    #[must_use]
    pub fn kind(&self) -> &str {
        &self.kind
    }

    #[must_use]
    pub fn message(&self) -> &str {
        &self.message
    }

    #[must_use]
    pub const fn failed_message(&self) -> &OutgoingMessage {
        &self.failed_message
    }
}

/// Single-slot holder for the last captured failure.
///
/// Cloning shares the slot. It only ever reflects the latest send: every
/// send through a [`CaptureTransport`] clears it first.
#[derive(Debug, Clone, Default)]
pub struct FailureSlot {
    inner: Arc<Mutex<Option<CapturedFailure>>>,
}

impl FailureSlot {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&self, failure: CapturedFailure) {
        *self.inner.lock() = Some(failure);
    }

    pub fn clear(&self) {
        self.inner.lock().take();
    }

    /// Remove and return the captured failure
    pub fn take(&self) -> Option<CapturedFailure> {
        self.inner.lock().take()
    }

    #[must_use]
    pub fn get(&self) -> Option<CapturedFailure> {
        self.inner.lock().clone()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.inner.lock().is_none()
    }
}

/// Transport decorator recording failures into a [`FailureSlot`].
#[derive(Debug)]
pub struct CaptureTransport<T> {
    inner: T,
    slot: FailureSlot,
}

impl<T: Transport> CaptureTransport<T> {
    #[must_use]
    pub const fn new(inner: T, slot: FailureSlot) -> Self {
        Self { inner, slot }
    }

    #[must_use]
    pub const fn slot(&self) -> &FailureSlot {
        &self.slot
    }

    #[must_use]
    pub const fn inner(&self) -> &T {
        &self.inner
    }

    #[must_use]
    pub fn into_inner(self) -> T {
        self.inner
    }
}

#[async_trait]
impl<T: Transport> Transport for CaptureTransport<T> {
    async fn send(&self, message: &OutgoingMessage) -> Result<SentMessage> {
        self.slot.clear();

        let result = self.inner.send(message).await;

        if let Err(err) = &result {
            outgoing!(
                level = DEBUG,
                "Capturing {} failure from {}: {}",
                err.kind(),
                self.inner.describe(),
                err
            );
            self.slot
                .record(CapturedFailure::from_error(err, message.clone()));
        }

        result
    }

    fn describe(&self) -> String {
        self.inner.describe()
    }
}
