use async_trait::async_trait;

use crate::error::TransportError;

/// Publish side of the job queue, behind a trait so tests can run the
/// correlation machinery against an in-memory transport.
#[async_trait]
pub trait JobTransport: Send + Sync {
    async fn publish(&self, payload: Vec<u8>) -> Result<(), TransportError>;
}
