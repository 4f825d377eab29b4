//! REST + streaming surface
//!
//! - POST /transcribe - run the voice pipeline, return the transcript
//! - POST/GET /dialogues, /dialogues/:id/messages - dialogue CRUD
//! - POST /dialogues/:id/voice - transcribe into a dialogue
//! - GET /stream - SSE stream of the caller's chat messages
//! - GET /balance, /transactions; POST /transactions/topup - billing
//! - GET /health - health check
//!
//! Identity is resolved by the `UserId` extractor before any handler
//! body runs; see `auth.rs`.

mod auth;
mod handlers;
mod routes;
mod state;

pub use auth::UserId;
pub use routes::create_router;
pub use state::AppState;
