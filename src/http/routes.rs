use axum::{
    routing::{get, post},
    Router,
};
use tower_http::trace::TraceLayer;

use super::handlers;
use super::state::AppState;

/// Create the HTTP router with all routes
pub fn create_router(state: AppState) -> Router {
    Router::new()
        // Health check
        .route("/health", get(handlers::health_check))
        // Transcription
        .route("/transcribe", post(handlers::transcribe))
        // Dialogues and messages
        .route(
            "/dialogues",
            post(handlers::create_dialogue).get(handlers::list_dialogues),
        )
        .route(
            "/dialogues/:dialogue_id/messages",
            post(handlers::send_message).get(handlers::get_messages),
        )
        .route(
            "/dialogues/:dialogue_id/voice",
            post(handlers::send_voice_message),
        )
        .route("/dialogues/:dialogue_id/end", post(handlers::end_dialogue))
        // Live message stream (one session per connection)
        .route("/stream", get(handlers::stream_messages))
        // Billing
        .route("/balance", get(handlers::get_balance))
        .route("/transactions", get(handlers::get_transactions))
        .route("/transactions/topup", post(handlers::top_up))
        // Add tracing middleware for request logging
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
