pub mod client;
pub mod correlation;
pub mod messages;
pub mod transport;

pub use client::NatsClient;
pub use correlation::CorrelationBroker;
pub use messages::{TranscribeJob, TranscribeReply};
pub use transport::JobTransport;
