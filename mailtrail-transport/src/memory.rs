use std::{collections::VecDeque, sync::Arc};

use async_trait::async_trait;
use mailtrail_common::{OutgoingMessage, SentMessage};
use parking_lot::Mutex;

use crate::{
    error::{Result, TransportError},
    transport::Transport,
};

#[derive(Debug, Default)]
struct State {
    delivered: Vec<OutgoingMessage>,
    failures: VecDeque<TransportError>,
    panic_next: bool,
    sequence: u64,
}

/// In-process transport
///
/// Keeps every delivered message. Failures can be scripted one send at a
/// time with [`MemoryTransport::fail_next`]; they are consumed in order.
#[derive(Debug, Clone, Default)]
pub struct MemoryTransport {
    state: Arc<Mutex<State>>,
}

impl MemoryTransport {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the next send fail with `error`
    pub fn fail_next(&self, error: TransportError) {
        self.state.lock().failures.push_back(error);
    }

    /// Make the next send panic, as a transport crashing mid-send would
    pub fn panic_next(&self) {
        self.state.lock().panic_next = true;
    }

    #[must_use]
    pub fn delivered(&self) -> Vec<OutgoingMessage> {
        self.state.lock().delivered.clone()
    }
}

#[async_trait]
impl Transport for MemoryTransport {
    async fn send(&self, message: &OutgoingMessage) -> Result<SentMessage> {
        let mut state = self.state.lock();

        if std::mem::take(&mut state.panic_next) {
            drop(state);
            panic!("memory transport crashed while sending");
        }

        if let Some(error) = state.failures.pop_front() {
            return Err(error);
        }

        if message.envelope_recipients().is_empty() {
            return Err(TransportError::InvalidMessage(
                "message has no recipients".to_string(),
            ));
        }

        state.sequence += 1;
        let message_id = message
            .message_id()
            .map_or_else(|| format!("<{}@memory>", state.sequence), str::to_string);
        state.delivered.push(message.clone());

        Ok(SentMessage::new(
            message.clone(),
            message_id,
            format!("250 OK queued as {}", state.sequence),
        ))
    }

    fn describe(&self) -> String {
        "memory".to_string()
    }
}
