use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Who produced a message within a dialogue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "snake_case")]
#[sqlx(rename_all = "snake_case")]
pub enum Sender {
    User,
    Bot,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "snake_case")]
#[sqlx(rename_all = "snake_case")]
pub enum ContentType {
    Text,
    Voice,
    DialogueEnd,
}

/// Metadata for a stored voice recording attached to a message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VoiceInfo {
    pub voice_data_id: String,
    /// Coarse amplitude summary for waveform rendering in clients.
    pub sound_wave: String,
    pub duration_seconds: f64,
}

/// One immutable chat message. `message_id` is assigned by the store,
/// monotonically per dialogue; `user_id` is stamped at fan-out time.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    pub dialogue_id: String,
    pub message_id: i64,
    #[serde(default)]
    pub user_id: String,
    pub sender: Sender,
    pub content_type: ContentType,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub voice: Option<VoiceInfo>,
    pub timestamp: DateTime<Utc>,
}
