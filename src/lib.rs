pub mod broker;
pub mod config;
pub mod error;
pub mod http;
pub mod ledger;
pub mod message;
pub mod pipeline;
pub mod session;
pub mod store;

pub use broker::{CorrelationBroker, JobTransport, NatsClient, TranscribeJob, TranscribeReply};
pub use config::Config;
pub use error::{BrokerError, LedgerError, PipelineError, StoreError, TransportError};
pub use http::{create_router, AppState};
pub use ledger::{BillingLedger, Transaction, TransactionKind};
pub use message::{ChatMessage, ContentType, Sender, VoiceInfo};
pub use pipeline::{AudioFormat, FfmpegNormalizer, TranscriptionPipeline};
pub use session::{SessionHandle, SessionRegistry, StreamSession};
pub use store::{ChatStore, Dialogue};
