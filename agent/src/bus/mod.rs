//! Durable message feed boundary

pub mod jetstream;

use async_trait::async_trait;

use crate::errors::AgentError;

/// Acknowledges one delivered message
#[async_trait]
pub trait Acker: Send + Sync {
    async fn ack(&self) -> Result<(), AgentError>;
}

/// A delivered, not yet acknowledged message
pub struct BusMessage {
    pub subject: String,
    pub payload: Vec<u8>,
    acker: Box<dyn Acker>,
}

impl BusMessage {
    pub fn new(subject: impl Into<String>, payload: Vec<u8>, acker: Box<dyn Acker>) -> Self {
        Self {
            subject: subject.into(),
            payload,
            acker,
        }
    }

    /// Acknowledge the message so the feed does not redeliver it
    pub async fn ack(&self) -> Result<(), AgentError> {
        self.acker.ack().await
    }
}

impl std::fmt::Debug for BusMessage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BusMessage")
            .field("subject", &self.subject)
            .field("payload_len", &self.payload.len())
            .finish()
    }
}

/// One-at-a-time source of messages with explicit acknowledgement
#[async_trait]
pub trait MessageFeed: Send {
    /// Next message; `None` once the feed is closed
    async fn next(&mut self) -> Option<Result<BusMessage, AgentError>>;
}
