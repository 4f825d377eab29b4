use std::sync::Arc;

use crate::ledger::BillingLedger;
use crate::pipeline::TranscriptionPipeline;
use crate::session::SessionRegistry;
use crate::store::ChatStore;

/// Shared application state for HTTP handlers. Everything here is
/// constructed once at startup and injected; nothing is ambient.
#[derive(Clone)]
pub struct AppState {
    pub registry: Arc<SessionRegistry>,
    pub pipeline: Arc<TranscriptionPipeline>,
    pub ledger: Arc<BillingLedger>,
    pub store: Arc<ChatStore>,
}
