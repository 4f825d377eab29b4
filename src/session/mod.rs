//! Per-user connection session management
//!
//! This module provides the multi-device fan-out layer:
//! - `StreamSession`: one ordered, unbounded outbox per connected device
//! - `SessionRegistry`: user id -> live sessions, with best-effort fan-out
//! - `SessionHandle`: the consumer side, a `Stream` of messages that
//!   deregisters its session when dropped

mod registry;
mod stream;

pub use registry::{SessionHandle, SessionRegistry};
pub use stream::StreamSession;
