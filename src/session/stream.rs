use tokio::sync::mpsc;
use uuid::Uuid;

use crate::message::ChatMessage;

/// The send half of one device connection: an unbounded FIFO outbox.
///
/// Any number of producers may enqueue; exactly one consumer (the
/// `SessionHandle` held by the streaming endpoint) drains it.
pub struct StreamSession {
    id: Uuid,
    user_id: String,
    outbox: mpsc::UnboundedSender<ChatMessage>,
}

impl StreamSession {
    pub(super) fn new(user_id: String) -> (Self, mpsc::UnboundedReceiver<ChatMessage>) {
        let (outbox, rx) = mpsc::unbounded_channel();
        let session = Self {
            id: Uuid::new_v4(),
            user_id,
            outbox,
        };
        (session, rx)
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn user_id(&self) -> &str {
        &self.user_id
    }

    /// Enqueue a message without blocking. Returns `false` when the
    /// consumer is gone (session tearing down); callers treat that as
    /// a normal disconnect race, not an error.
    pub fn send(&self, message: ChatMessage) -> bool {
        self.outbox.send(message).is_ok()
    }
}
