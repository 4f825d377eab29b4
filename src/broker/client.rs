use std::sync::Arc;

use anyhow::{Context, Result};
use async_nats::Client;
use async_trait::async_trait;
use futures::StreamExt;
use tokio::task::JoinHandle;
use tracing::{info, warn};
use uuid::Uuid;

use super::correlation::CorrelationBroker;
use super::messages::TranscribeReply;
use super::transport::JobTransport;
use crate::error::TransportError;

/// NATS-backed job transport plus the reply-subject listener.
#[derive(Clone)]
pub struct NatsClient {
    client: Client,
    job_subject: String,
    reply_subject: String,
}

impl NatsClient {
    /// Connect to NATS server
    pub async fn connect(url: &str, job_subject: &str) -> Result<Self> {
        info!("Connecting to NATS at {}", url);

        let client = async_nats::connect(url)
            .await
            .context("Failed to connect to NATS")?;

        info!("Connected to NATS successfully");

        // Process-unique reply subject; the correlation id inside each
        // reply routes it to the right waiter.
        let reply_subject = format!("stt.reply.{}", Uuid::new_v4().simple());

        Ok(Self {
            client,
            job_subject: job_subject.to_string(),
            reply_subject,
        })
    }

    pub fn reply_subject(&self) -> &str {
        &self.reply_subject
    }

    /// Subscribe the reply subject and pump correlated replies into the
    /// broker's waiter table until the subscription ends.
    pub async fn spawn_reply_listener(
        &self,
        broker: Arc<CorrelationBroker>,
    ) -> Result<JoinHandle<()>> {
        let mut subscriber = self
            .client
            .subscribe(self.reply_subject.clone())
            .await
            .context("Failed to subscribe to reply subject")?;

        info!("Subscribed to {}", self.reply_subject);

        Ok(tokio::spawn(async move {
            while let Some(msg) = subscriber.next().await {
                match serde_json::from_slice::<TranscribeReply>(&msg.payload) {
                    Ok(reply) => {
                        let token = reply.correlation_id;
                        broker.on_response(token, reply);
                    }
                    Err(e) => {
                        warn!("Failed to parse worker reply: {}", e);
                    }
                }
            }
            info!("Reply listener stopped");
        }))
    }
}

#[async_trait]
impl JobTransport for NatsClient {
    async fn publish(&self, payload: Vec<u8>) -> Result<(), TransportError> {
        // async-nats reconnects under the hood, so a failed publish is a
        // connection-window fault worth one retry upstream.
        self.client
            .publish(self.job_subject.clone(), payload.into())
            .await
            .map_err(|e| TransportError::Connection(e.to_string()))
    }
}
