use std::convert::Infallible;

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::sse::{Event, KeepAlive, Sse},
    response::{IntoResponse, Json, Response},
};
use base64::Engine;
use futures::{Stream, StreamExt};
use serde::{Deserialize, Serialize};
use tracing::{error, info};

use super::auth::UserId;
use super::state::AppState;
use crate::error::{LedgerError, PipelineError, StoreError};
use crate::ledger::{Transaction, TransactionKind};
use crate::message::{ChatMessage, ContentType, Sender, VoiceInfo};
use crate::pipeline::{AudioFormat, TranscriptResult};
use crate::store::Dialogue;

// ============================================================================
// Request/Response Types
// ============================================================================

#[derive(Debug, Deserialize)]
pub struct TranscribeRequest {
    /// Base64-encoded audio bytes
    pub audio: String,

    /// "raw_pcm" skips normalization, "encoded" runs ffmpeg
    pub format: AudioFormat,
}

#[derive(Debug, Serialize)]
pub struct TranscribeResponse {
    pub result: String,
    pub duration_seconds: f64,
    pub billed_seconds: i64,
}

#[derive(Debug, Deserialize)]
pub struct CreateDialogueRequest {
    pub name: String,
}

#[derive(Debug, Deserialize)]
pub struct SendMessageRequest {
    pub text: String,
}

#[derive(Debug, Serialize)]
pub struct SendMessageResponse {
    pub dialogue_id: String,
    pub message_id: i64,
}

#[derive(Debug, Serialize)]
pub struct VoiceMessageResponse {
    pub dialogue_id: String,
    pub message_id: i64,
    pub result: String,
    pub billed_seconds: i64,
}

#[derive(Debug, Deserialize)]
pub struct TopUpRequest {
    pub amount: i64,
    pub description: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct TopUpResponse {
    pub transaction_id: i64,
    pub balance: i64,
}

#[derive(Debug, Serialize)]
pub struct BalanceResponse {
    pub user_id: String,
    pub voice_seconds: i64,
}

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
}

fn error_response(status: StatusCode, error: String) -> Response {
    (status, Json(ErrorResponse { error })).into_response()
}

fn pipeline_error(e: PipelineError) -> Response {
    let status = match &e {
        PipelineError::ConversionFailed(_) => StatusCode::UNPROCESSABLE_ENTITY,
        PipelineError::InsufficientBalance { .. } => StatusCode::BAD_REQUEST,
        PipelineError::UpstreamUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
        PipelineError::TranscriptionFailed(_) => StatusCode::INTERNAL_SERVER_ERROR,
        PipelineError::Ledger(_) => StatusCode::INTERNAL_SERVER_ERROR,
    };
    error_response(status, e.to_string())
}

fn store_error(e: StoreError) -> Response {
    let status = match &e {
        StoreError::DialogueNotFound => StatusCode::NOT_FOUND,
        StoreError::Db(_) => StatusCode::INTERNAL_SERVER_ERROR,
    };
    error_response(status, e.to_string())
}

fn ledger_error(e: LedgerError) -> Response {
    let status = match &e {
        LedgerError::InsufficientFunds => StatusCode::BAD_REQUEST,
        LedgerError::Storage(_) => StatusCode::INTERNAL_SERVER_ERROR,
    };
    error_response(status, e.to_string())
}

// ============================================================================
// Handlers
// ============================================================================

/// POST /transcribe
/// Run the transcription pipeline for an uploaded voice clip
pub async fn transcribe(
    State(state): State<AppState>,
    user: UserId,
    Json(req): Json<TranscribeRequest>,
) -> Response {
    let audio = match base64::engine::general_purpose::STANDARD.decode(&req.audio) {
        Ok(bytes) => bytes,
        Err(e) => {
            return error_response(
                StatusCode::BAD_REQUEST,
                format!("invalid base64 audio: {e}"),
            )
        }
    };

    info!(
        "transcribe request from user {} ({} bytes, {:?})",
        user.0,
        audio.len(),
        req.format
    );

    match state.pipeline.transcribe(&user.0, &audio, req.format).await {
        Ok(TranscriptResult {
            text,
            duration_seconds,
            billed_seconds,
            ..
        }) => (
            StatusCode::OK,
            Json(TranscribeResponse {
                result: text,
                duration_seconds,
                billed_seconds,
            }),
        )
            .into_response(),
        Err(e) => {
            error!("transcription failed for user {}: {}", user.0, e);
            pipeline_error(e)
        }
    }
}

/// POST /dialogues
pub async fn create_dialogue(
    State(state): State<AppState>,
    user: UserId,
    Json(req): Json<CreateDialogueRequest>,
) -> Response {
    match state.store.create_dialogue(&user.0, &req.name).await {
        Ok(dialogue) => (StatusCode::CREATED, Json(dialogue)).into_response(),
        Err(e) => {
            error!("failed to create dialogue for user {}: {}", user.0, e);
            store_error(e)
        }
    }
}

/// GET /dialogues
pub async fn list_dialogues(State(state): State<AppState>, user: UserId) -> Response {
    match state.store.dialogues(&user.0).await {
        Ok(dialogues) => (StatusCode::OK, Json::<Vec<Dialogue>>(dialogues)).into_response(),
        Err(e) => store_error(e),
    }
}

/// POST /dialogues/:dialogue_id/messages
/// Store a text message and fan it out to the user's live sessions
pub async fn send_message(
    State(state): State<AppState>,
    user: UserId,
    Path(dialogue_id): Path<String>,
    Json(req): Json<SendMessageRequest>,
) -> Response {
    if let Err(e) = state.store.dialogue(&user.0, &dialogue_id).await {
        return store_error(e);
    }

    let message = match state
        .store
        .insert_message(&dialogue_id, Sender::User, ContentType::Text, Some(&req.text), None)
        .await
    {
        Ok(m) => m,
        Err(e) => {
            error!("failed to store message in dialogue {}: {}", dialogue_id, e);
            return store_error(e);
        }
    };

    let delivered = state.registry.fan_out(&user.0, message.clone());
    info!(
        "message {}/{} fanned out to {} session(s) of user {}",
        dialogue_id, message.message_id, delivered, user.0
    );

    (
        StatusCode::OK,
        Json(SendMessageResponse {
            dialogue_id,
            message_id: message.message_id,
        }),
    )
        .into_response()
}

/// GET /dialogues/:dialogue_id/messages
pub async fn get_messages(
    State(state): State<AppState>,
    user: UserId,
    Path(dialogue_id): Path<String>,
) -> Response {
    if let Err(e) = state.store.dialogue(&user.0, &dialogue_id).await {
        return store_error(e);
    }
    match state.store.messages(&dialogue_id).await {
        Ok(messages) => (StatusCode::OK, Json::<Vec<ChatMessage>>(messages)).into_response(),
        Err(e) => store_error(e),
    }
}

/// POST /dialogues/:dialogue_id/voice
/// Transcribe a voice clip, store it as a voice message, fan out
pub async fn send_voice_message(
    State(state): State<AppState>,
    user: UserId,
    Path(dialogue_id): Path<String>,
    Json(req): Json<TranscribeRequest>,
) -> Response {
    if let Err(e) = state.store.dialogue(&user.0, &dialogue_id).await {
        return store_error(e);
    }

    let audio = match base64::engine::general_purpose::STANDARD.decode(&req.audio) {
        Ok(bytes) => bytes,
        Err(e) => {
            return error_response(
                StatusCode::BAD_REQUEST,
                format!("invalid base64 audio: {e}"),
            )
        }
    };

    let transcript = match state.pipeline.transcribe(&user.0, &audio, req.format).await {
        Ok(t) => t,
        Err(e) => {
            error!("voice message failed for user {}: {}", user.0, e);
            return pipeline_error(e);
        }
    };

    let voice = VoiceInfo {
        voice_data_id: uuid::Uuid::new_v4().simple().to_string(),
        // Computed by the pipeline from the normalized samples, not the
        // uploaded container bytes.
        sound_wave: transcript.sound_wave.clone(),
        duration_seconds: transcript.duration_seconds,
    };

    let message = match state
        .store
        .insert_message(
            &dialogue_id,
            Sender::User,
            ContentType::Voice,
            Some(&transcript.text),
            Some(&voice),
        )
        .await
    {
        Ok(m) => m,
        Err(e) => {
            error!(
                "failed to store voice message in dialogue {}: {}",
                dialogue_id, e
            );
            return store_error(e);
        }
    };

    state.registry.fan_out(&user.0, message.clone());

    (
        StatusCode::OK,
        Json(VoiceMessageResponse {
            dialogue_id,
            message_id: message.message_id,
            result: transcript.text,
            billed_seconds: transcript.billed_seconds,
        }),
    )
        .into_response()
}

/// POST /dialogues/:dialogue_id/end
/// Mark a dialogue finished and notify all live sessions
pub async fn end_dialogue(
    State(state): State<AppState>,
    user: UserId,
    Path(dialogue_id): Path<String>,
) -> Response {
    if let Err(e) = state.store.dialogue(&user.0, &dialogue_id).await {
        return store_error(e);
    }

    let message = match state
        .store
        .insert_message(&dialogue_id, Sender::Bot, ContentType::DialogueEnd, None, None)
        .await
    {
        Ok(m) => m,
        Err(e) => return store_error(e),
    };

    state.registry.fan_out(&user.0, message.clone());

    (
        StatusCode::OK,
        Json(SendMessageResponse {
            dialogue_id,
            message_id: message.message_id,
        }),
    )
        .into_response()
}

/// GET /stream
/// Server-streaming endpoint: opens a session and yields messages
/// until the client disconnects (which deregisters the session)
pub async fn stream_messages(
    State(state): State<AppState>,
    user: UserId,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let handle = state.registry.open_session(&user.0);
    info!("opened message stream for user {}", user.0);

    let stream = handle.map(|message| {
        let event = Event::default()
            .event("message")
            .json_data(&message)
            .unwrap_or_else(|_| Event::default().event("error").data("serialization failure"));
        Ok(event)
    });

    Sse::new(stream).keep_alive(KeepAlive::default())
}

/// GET /transactions
pub async fn get_transactions(State(state): State<AppState>, user: UserId) -> Response {
    match state.ledger.get(&user.0).await {
        Ok(transactions) => {
            (StatusCode::OK, Json::<Vec<Transaction>>(transactions)).into_response()
        }
        Err(e) => ledger_error(e),
    }
}

/// GET /balance
pub async fn get_balance(State(state): State<AppState>, user: UserId) -> Response {
    match state.ledger.balance(&user.0).await {
        Ok(voice_seconds) => (
            StatusCode::OK,
            Json(BalanceResponse {
                user_id: user.0,
                voice_seconds,
            }),
        )
            .into_response(),
        Err(e) => ledger_error(e),
    }
}

/// POST /transactions/topup
/// DEBIT: adds consumable voice seconds
pub async fn top_up(
    State(state): State<AppState>,
    user: UserId,
    Json(req): Json<TopUpRequest>,
) -> Response {
    if req.amount <= 0 {
        return error_response(
            StatusCode::BAD_REQUEST,
            "top-up amount must be positive".to_string(),
        );
    }

    let description = req.description.as_deref().unwrap_or("balance top-up");
    let transaction_id = match state
        .ledger
        .post(&user.0, req.amount, description, TransactionKind::Debit)
        .await
    {
        Ok(id) => id,
        Err(e) => {
            error!("top-up failed for user {}: {}", user.0, e);
            return ledger_error(e);
        }
    };

    match state.ledger.balance(&user.0).await {
        Ok(balance) => (
            StatusCode::OK,
            Json(TopUpResponse {
                transaction_id,
                balance,
            }),
        )
            .into_response(),
        Err(e) => ledger_error(e),
    }
}

/// GET /health
/// Health check endpoint
pub async fn health_check() -> impl IntoResponse {
    (StatusCode::OK, "OK")
}
