use std::sync::Arc;
use std::time::Duration;

use base64::Engine;
use dashmap::DashMap;
use tokio::sync::oneshot;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::messages::{TranscribeJob, TranscribeReply};
use super::transport::JobTransport;
use crate::error::BrokerError;

/// Request/response correlation over an asynchronous job queue.
///
/// Each outbound job gets a fresh UUID token and a parked waiter; the
/// reply listener resolves the waiter when a response carrying the same
/// token arrives. Token lifecycle: PENDING, then exactly one of
/// resolved / timed out / rejected. Whichever side removes the table
/// entry first wins; the loser's effect is a no-op.
pub struct CorrelationBroker {
    transport: Arc<dyn JobTransport>,
    reply_to: String,
    sample_rate: u32,
    waiters: DashMap<Uuid, oneshot::Sender<TranscribeReply>>,
}

impl CorrelationBroker {
    pub fn new(transport: Arc<dyn JobTransport>, reply_to: String, sample_rate: u32) -> Arc<Self> {
        Arc::new(Self {
            transport,
            reply_to,
            sample_rate,
            waiters: DashMap::new(),
        })
    }

    /// Publish `samples` as a transcription job and suspend until the
    /// correlated reply arrives or `timeout` elapses.
    ///
    /// The waiter is removed on every exit path, including caller
    /// cancellation (the drop guard treats it like a timeout).
    pub async fn publish_and_await(
        &self,
        samples: &[u8],
        timeout: Duration,
    ) -> Result<TranscribeReply, BrokerError> {
        let token = Uuid::new_v4();
        let (tx, mut rx) = oneshot::channel();
        self.waiters.insert(token, tx);
        let guard = WaiterGuard {
            waiters: &self.waiters,
            token,
            armed: true,
        };

        let job = TranscribeJob {
            correlation_id: token,
            reply_to: self.reply_to.clone(),
            audio: base64::engine::general_purpose::STANDARD.encode(samples),
            sample_rate: self.sample_rate,
            timestamp: chrono::Utc::now().to_rfc3339(),
        };
        let payload =
            serde_json::to_vec(&job).map_err(|e| BrokerError::Rejected(e.to_string()))?;

        if let Err(first) = self.transport.publish(payload.clone()).await {
            if !first.is_recoverable() {
                return Err(BrokerError::Rejected(first.to_string()));
            }
            warn!("publish failed ({}), retrying once", first);
            self.transport
                .publish(payload)
                .await
                .map_err(|e| BrokerError::Rejected(e.to_string()))?;
        }

        info!("published job {}, awaiting correlated reply", token);

        let sleep = tokio::time::sleep(timeout);
        tokio::pin!(sleep);

        tokio::select! {
            res = &mut rx => {
                guard.disarm();
                // The resolver removed the entry before sending, so a
                // closed channel here means the waiter was abandoned.
                res.map_err(|_| BrokerError::Rejected("waiter abandoned".to_string()))
            }
            _ = &mut sleep => {
                if self.waiters.remove(&token).is_some() {
                    guard.disarm();
                    debug!("job {} timed out after {:?}", token, timeout);
                    Err(BrokerError::Timeout(timeout))
                } else {
                    // A response claimed the token first; its payload is
                    // already in flight on the channel.
                    guard.disarm();
                    rx.await.map_err(|_| BrokerError::Timeout(timeout))
                }
            }
        }
    }

    /// Called by the transport's inbound listener for every reply.
    /// Late, duplicate, or unknown tokens are discarded.
    pub fn on_response(&self, token: Uuid, reply: TranscribeReply) {
        match self.waiters.remove(&token) {
            Some((_, tx)) => {
                if tx.send(reply).is_err() {
                    debug!("waiter for {} gone before resolution", token);
                }
            }
            None => {
                debug!("discarding reply for unknown or settled token {}", token);
            }
        }
    }

    /// Number of outstanding waiters. Every published job is guaranteed
    /// to leave the table via resolve, timeout, or cancellation.
    pub fn pending(&self) -> usize {
        self.waiters.len()
    }
}

/// Removes the waiter if the owning call is cancelled mid-await.
struct WaiterGuard<'a> {
    waiters: &'a DashMap<Uuid, oneshot::Sender<TranscribeReply>>,
    token: Uuid,
    armed: bool,
}

impl WaiterGuard<'_> {
    fn disarm(mut self) {
        self.armed = false;
    }
}

impl Drop for WaiterGuard<'_> {
    fn drop(&mut self) {
        if self.armed && self.waiters.remove(&self.token).is_some() {
            debug!("deregistered waiter {} on cancellation", self.token);
        }
    }
}
