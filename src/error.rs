use std::time::Duration;

use thiserror::Error;

/// Failure of one broker round trip (publish + correlated reply).
#[derive(Debug, Error)]
pub enum BrokerError {
    #[error("no correlated response within {0:?}")]
    Timeout(Duration),

    #[error("broker transport rejected publish: {0}")]
    Rejected(String),
}

/// Transport-level publish failure, as reported by the broker client.
#[derive(Debug, Error)]
pub enum TransportError {
    /// Connection-level fault. The publish is retried once.
    #[error("connection fault: {0}")]
    Connection(String),

    /// The transport refused the message. Not retried.
    #[error("publish rejected: {0}")]
    Rejected(String),
}

impl TransportError {
    pub fn is_recoverable(&self) -> bool {
        matches!(self, TransportError::Connection(_))
    }
}

/// Failure of the transcription pipeline, mapped to user-facing
/// responses by the HTTP layer.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("audio conversion failed: {0}")]
    ConversionFailed(String),

    #[error("insufficient balance: need {needed}s, have {available}s")]
    InsufficientBalance { needed: i64, available: i64 },

    #[error("transcription backend unavailable: {0}")]
    UpstreamUnavailable(#[from] BrokerError),

    #[error("transcription failed: {0}")]
    TranscriptionFailed(String),

    #[error(transparent)]
    Ledger(#[from] LedgerError),
}

#[derive(Debug, Error)]
pub enum LedgerError {
    #[error("insufficient funds")]
    InsufficientFunds,

    #[error("ledger storage failure: {0}")]
    Storage(#[from] sqlx::Error),
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("dialogue not found")]
    DialogueNotFound,

    #[error("storage failure: {0}")]
    Db(#[from] sqlx::Error),
}
