use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Transcription job published to the worker queue
#[derive(Debug, Serialize, Deserialize)]
pub struct TranscribeJob {
    pub correlation_id: Uuid,
    /// Subject the worker must publish its reply to
    pub reply_to: String,
    /// Base64-encoded f32le mono samples, normalized to [-1, 1]
    pub audio: String,
    pub sample_rate: u32,
    pub timestamp: String, // RFC3339
}

/// Worker reply received on the reply subject. Exactly one of `result`
/// and `error` is set.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TranscribeReply {
    pub correlation_id: Uuid,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}
