//! NATS JetStream durable consumer

use async_nats::jetstream::{
    self,
    consumer::{pull, AckPolicy, PullConsumer},
};
use async_trait::async_trait;
use futures::StreamExt;
use tracing::info;

use crate::bus::{Acker, BusMessage, MessageFeed};
use crate::errors::AgentError;

/// JetStream connection settings
#[derive(Debug, Clone)]
pub struct JetStreamOptions {
    pub url: String,
    pub stream_name: String,
    pub consumer_name: String,
    pub filter_subject: String,
}

/// Pending counts reported by the consumer at bind time
#[derive(Debug, Clone)]
pub struct ConsumerStatus {
    pub stream_name: String,
    pub consumer_name: String,
    pub filter_subject: String,
    pub num_pending: u64,
    pub num_ack_pending: usize,
}

/// [`MessageFeed`] over a durable pull consumer with explicit acks
pub struct JetStreamFeed {
    client: async_nats::Client,
    messages: pull::Stream,
    status: ConsumerStatus,
}

impl JetStreamFeed {
    /// Connect, bind (or create) the durable consumer and start pulling
    pub async fn connect(options: &JetStreamOptions) -> Result<Self, AgentError> {
        let client = async_nats::connect(&options.url)
            .await
            .map_err(|e| AgentError::BusError(format!("connect to {}: {}", options.url, e)))?;
        info!("NATS connection established: {}", options.url);

        let context = jetstream::new(client.clone());
        let stream = context
            .get_stream(&options.stream_name)
            .await
            .map_err(|e| {
                AgentError::BusError(format!("stream {}: {}", options.stream_name, e))
            })?;

        let mut consumer: PullConsumer = stream
            .get_or_create_consumer(
                &options.consumer_name,
                pull::Config {
                    durable_name: Some(options.consumer_name.clone()),
                    ack_policy: AckPolicy::Explicit,
                    filter_subject: options.filter_subject.clone(),
                    ..Default::default()
                },
            )
            .await
            .map_err(|e| {
                AgentError::BusError(format!("consumer {}: {}", options.consumer_name, e))
            })?;

        let info = consumer
            .info()
            .await
            .map_err(|e| AgentError::BusError(format!("consumer info: {}", e)))?;
        let status = ConsumerStatus {
            stream_name: info.stream_name.clone(),
            consumer_name: info.name.clone(),
            filter_subject: info.config.filter_subject.clone(),
            num_pending: info.num_pending,
            num_ack_pending: info.num_ack_pending,
        };

        let messages = consumer
            .messages()
            .await
            .map_err(|e| AgentError::BusError(format!("message stream: {}", e)))?;

        Ok(Self {
            client,
            messages,
            status,
        })
    }

    pub fn status(&self) -> &ConsumerStatus {
        &self.status
    }

    /// Flush and drop the connection
    pub async fn close(self) -> Result<(), AgentError> {
        self.client
            .flush()
            .await
            .map_err(|e| AgentError::BusError(e.to_string()))?;
        info!("NATS connection closed");
        Ok(())
    }
}

struct JetStreamAcker(jetstream::Message);

#[async_trait]
impl Acker for JetStreamAcker {
    async fn ack(&self) -> Result<(), AgentError> {
        self.0
            .ack()
            .await
            .map_err(|e| AgentError::BusError(format!("ack: {}", e)))
    }
}

#[async_trait]
impl MessageFeed for JetStreamFeed {
    async fn next(&mut self) -> Option<Result<BusMessage, AgentError>> {
        let message = match self.messages.next().await? {
            Ok(message) => message,
            Err(e) => return Some(Err(AgentError::BusError(e.to_string()))),
        };

        let subject = message.subject.to_string();
        let payload = message.payload.to_vec();
        Some(Ok(BusMessage::new(
            subject,
            payload,
            Box::new(JetStreamAcker(message)),
        )))
    }
}
