//! Relational storage for dialogues, messages, and billing tables.
//!
//! One SQLite connection behind a pool: message ids are allocated
//! inside the insert statement, so per-dialogue monotonicity holds for
//! concurrent writers without application-level locking.

use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::Serialize;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::SqlitePool;
use tracing::info;
use uuid::Uuid;

use crate::error::StoreError;
use crate::message::{ChatMessage, ContentType, Sender, VoiceInfo};

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS dialogues (
    id          TEXT PRIMARY KEY,
    user_id     TEXT NOT NULL,
    name        TEXT NOT NULL,
    created_at  TEXT NOT NULL
);
CREATE TABLE IF NOT EXISTS dialogue_messages (
    dialogue_id       TEXT NOT NULL REFERENCES dialogues(id) ON DELETE CASCADE,
    seq               INTEGER NOT NULL,
    sender            TEXT NOT NULL,
    content_type      TEXT NOT NULL,
    text              TEXT,
    voice_data_id     TEXT,
    sound_wave        TEXT,
    duration_seconds  REAL,
    created_at        TEXT NOT NULL,
    PRIMARY KEY (dialogue_id, seq)
);
CREATE TABLE IF NOT EXISTS user_balance (
    user_id        TEXT PRIMARY KEY,
    voice_seconds  INTEGER NOT NULL DEFAULT 0
);
CREATE TABLE IF NOT EXISTS transactions (
    id                INTEGER PRIMARY KEY AUTOINCREMENT,
    user_id           TEXT NOT NULL,
    amount            INTEGER NOT NULL,
    description       TEXT NOT NULL,
    transaction_type  TEXT NOT NULL,
    created_at        TEXT NOT NULL
);
";

#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct Dialogue {
    pub id: String,
    pub user_id: String,
    pub name: String,
    pub created_at: DateTime<Utc>,
}

pub struct ChatStore {
    pool: SqlitePool,
}

impl ChatStore {
    /// Open (creating if missing) and bootstrap the schema.
    pub async fn connect(url: &str) -> Result<Self, StoreError> {
        let options = SqliteConnectOptions::from_str(url)
            .map_err(sqlx::Error::from)?
            .create_if_missing(true);

        // One connection: SQLite is single-writer anyway, and this keeps
        // in-memory databases usable across the pool.
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(options)
            .await?;

        sqlx::raw_sql(SCHEMA).execute(&pool).await?;
        info!("chat store ready at {}", url);

        Ok(Self { pool })
    }

    /// Shared handle for the billing ledger, which lives in the same
    /// database so its writes stay transactional with the balance.
    pub fn pool(&self) -> SqlitePool {
        self.pool.clone()
    }

    pub async fn create_dialogue(
        &self,
        user_id: &str,
        name: &str,
    ) -> Result<Dialogue, StoreError> {
        let dialogue = Dialogue {
            id: Uuid::new_v4().simple().to_string(),
            user_id: user_id.to_string(),
            name: name.to_string(),
            created_at: Utc::now(),
        };

        sqlx::query("INSERT INTO dialogues (id, user_id, name, created_at) VALUES (?, ?, ?, ?)")
            .bind(&dialogue.id)
            .bind(&dialogue.user_id)
            .bind(&dialogue.name)
            .bind(dialogue.created_at)
            .execute(&self.pool)
            .await?;

        Ok(dialogue)
    }

    /// Fetch a dialogue scoped to its owner; `DialogueNotFound` covers
    /// both missing ids and foreign ownership.
    pub async fn dialogue(&self, user_id: &str, dialogue_id: &str) -> Result<Dialogue, StoreError> {
        sqlx::query_as::<_, Dialogue>(
            "SELECT id, user_id, name, created_at FROM dialogues WHERE id = ? AND user_id = ?",
        )
        .bind(dialogue_id)
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await?
        .ok_or(StoreError::DialogueNotFound)
    }

    pub async fn dialogues(&self, user_id: &str) -> Result<Vec<Dialogue>, StoreError> {
        Ok(sqlx::query_as::<_, Dialogue>(
            "SELECT id, user_id, name, created_at FROM dialogues \
             WHERE user_id = ? ORDER BY created_at",
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?)
    }

    /// Insert a message, allocating the next per-dialogue id inside the
    /// statement itself.
    pub async fn insert_message(
        &self,
        dialogue_id: &str,
        sender: Sender,
        content_type: ContentType,
        text: Option<&str>,
        voice: Option<&VoiceInfo>,
    ) -> Result<ChatMessage, StoreError> {
        let created_at = Utc::now();

        let seq: i64 = sqlx::query_scalar(
            "INSERT INTO dialogue_messages \
             (dialogue_id, seq, sender, content_type, text, voice_data_id, sound_wave, \
              duration_seconds, created_at) \
             VALUES (?1, \
                     (SELECT COALESCE(MAX(seq), 0) + 1 FROM dialogue_messages \
                      WHERE dialogue_id = ?1), \
                     ?2, ?3, ?4, ?5, ?6, ?7, ?8) \
             RETURNING seq",
        )
        .bind(dialogue_id)
        .bind(sender)
        .bind(content_type)
        .bind(text)
        .bind(voice.map(|v| v.voice_data_id.as_str()))
        .bind(voice.map(|v| v.sound_wave.as_str()))
        .bind(voice.map(|v| v.duration_seconds))
        .bind(created_at)
        .fetch_one(&self.pool)
        .await?;

        Ok(ChatMessage {
            dialogue_id: dialogue_id.to_string(),
            message_id: seq,
            user_id: String::new(),
            sender,
            content_type,
            text: text.map(str::to_string),
            voice: voice.cloned(),
            timestamp: created_at,
        })
    }

    /// Messages of a dialogue in id (assignment) order.
    pub async fn messages(&self, dialogue_id: &str) -> Result<Vec<ChatMessage>, StoreError> {
        type Row = (
            i64,
            Sender,
            ContentType,
            Option<String>,
            Option<String>,
            Option<String>,
            Option<f64>,
            DateTime<Utc>,
        );

        let rows: Vec<Row> = sqlx::query_as(
            "SELECT seq, sender, content_type, text, voice_data_id, sound_wave, \
             duration_seconds, created_at \
             FROM dialogue_messages WHERE dialogue_id = ? ORDER BY seq",
        )
        .bind(dialogue_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(
                |(seq, sender, content_type, text, voice_data_id, sound_wave, duration, created_at)| {
                    let voice = match (voice_data_id, sound_wave, duration) {
                        (Some(id), Some(wave), Some(secs)) => Some(VoiceInfo {
                            voice_data_id: id,
                            sound_wave: wave,
                            duration_seconds: secs,
                        }),
                        _ => None,
                    };
                    ChatMessage {
                        dialogue_id: dialogue_id.to_string(),
                        message_id: seq,
                        user_id: String::new(),
                        sender,
                        content_type,
                        text,
                        voice,
                        timestamp: created_at,
                    }
                },
            )
            .collect())
    }
}
