use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use dashmap::DashMap;
use futures::Stream;
use tokio::sync::mpsc;
use tracing::{debug, info};
use uuid::Uuid;

use super::stream::StreamSession;
use crate::message::ChatMessage;

/// Registry of live sessions, keyed by user id.
///
/// A user may hold several sessions at once (one per device). The
/// registry is constructed once at process start and injected through
/// `AppState`; sessions register on stream-open and deregister when the
/// consumer handle drops.
pub struct SessionRegistry {
    sessions: DashMap<String, Vec<Arc<StreamSession>>>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self {
            sessions: DashMap::new(),
        }
    }

    /// Create and register a session for `user_id`. The returned handle
    /// is the single consumer of the session's outbox.
    pub fn open_session(self: &Arc<Self>, user_id: &str) -> SessionHandle {
        let (session, rx) = StreamSession::new(user_id.to_string());
        let session = Arc::new(session);

        self.sessions
            .entry(user_id.to_string())
            .or_default()
            .push(Arc::clone(&session));

        info!("opened session {} for user {}", session.id(), user_id);

        SessionHandle {
            registry: Arc::clone(self),
            session,
            rx,
        }
    }

    /// Remove exactly one session instance. No-op if it was already
    /// removed; safe to call while a fan-out is in flight.
    pub fn close_session(&self, user_id: &str, session_id: Uuid) {
        if let Some(mut entry) = self.sessions.get_mut(user_id) {
            entry.retain(|s| s.id() != session_id);
        }
        self.sessions.remove_if(user_id, |_, list| list.is_empty());
        debug!("closed session {} for user {}", session_id, user_id);
    }

    /// Deliver `message` to every live session of `user_id`, in
    /// registration order, stamping the user id on the way out.
    ///
    /// Works on a snapshot: sessions added or removed concurrently may
    /// miss this particular message. Sends to a closed outbox are
    /// dropped silently. Returns the number of sessions reached.
    pub fn fan_out(&self, user_id: &str, message: ChatMessage) -> usize {
        let targets: Vec<Arc<StreamSession>> = match self.sessions.get(user_id) {
            Some(entry) => entry.clone(),
            None => return 0,
        };

        let mut stamped = message;
        stamped.user_id = user_id.to_string();

        let mut delivered = 0;
        for session in &targets {
            if session.send(stamped.clone()) {
                delivered += 1;
            } else {
                debug!(
                    "dropping message for closed session {} (user {})",
                    session.id(),
                    user_id
                );
            }
        }
        delivered
    }

    pub fn session_count(&self, user_id: &str) -> usize {
        self.sessions.get(user_id).map(|e| e.len()).unwrap_or(0)
    }
}

impl Default for SessionRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// Consumer side of one session: an ordered stream of messages.
///
/// The stream suspends while the outbox is empty and ends only when the
/// session is torn down. Dropping the handle (client disconnect, task
/// cancellation) deregisters the session from the registry.
pub struct SessionHandle {
    registry: Arc<SessionRegistry>,
    session: Arc<StreamSession>,
    rx: mpsc::UnboundedReceiver<ChatMessage>,
}

impl SessionHandle {
    pub fn session(&self) -> &Arc<StreamSession> {
        &self.session
    }

    pub async fn recv(&mut self) -> Option<ChatMessage> {
        self.rx.recv().await
    }
}

impl Stream for SessionHandle {
    type Item = ChatMessage;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<ChatMessage>> {
        self.get_mut().rx.poll_recv(cx)
    }
}

impl Drop for SessionHandle {
    fn drop(&mut self) {
        self.registry
            .close_session(self.session.user_id(), self.session.id());
    }
}
