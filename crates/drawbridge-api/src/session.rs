//! Live sessions and where progress events are delivered.

use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::mpsc;
use tracing::debug;

use drawbridge_protocols::LiveOutbound;

/// Outbound queue of one connected overlay.
pub type SessionSender = mpsc::UnboundedSender<LiveOutbound>;

/// Connected live sessions by id.
pub struct SessionRegistry {
    sessions: DashMap<String, SessionSender>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self {
            sessions: DashMap::new(),
        }
    }

    pub fn register(&self, id: String, sender: SessionSender) {
        self.sessions.insert(id, sender);
    }

    pub fn unregister(&self, id: &str) {
        self.sessions.remove(id);
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    pub fn contains(&self, id: &str) -> bool {
        self.sessions.contains_key(id)
    }

    /// Queue `message` for `id`. Returns false when the session is gone.
    pub fn send_to(&self, id: &str, message: LiveOutbound) -> bool {
        match self.sessions.get(id) {
            Some(sender) => sender.send(message).is_ok(),
            None => false,
        }
    }
}

impl Default for SessionRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// Destination for the events of one annotation's run.
///
/// Delivery is best effort. A sink whose receiver has gone drops events
/// silently; processing continues either way.
#[derive(Clone)]
pub enum EventSink {
    /// A live channel session, looked up on every send.
    Session {
        registry: Arc<SessionRegistry>,
        session_id: String,
    },
    /// A dedicated stream, e.g. one SSE response.
    Stream(SessionSender),
    Detached,
}

impl EventSink {
    pub fn session(registry: Arc<SessionRegistry>, session_id: impl Into<String>) -> Self {
        EventSink::Session {
            registry,
            session_id: session_id.into(),
        }
    }

    pub fn send(&self, message: impl Into<LiveOutbound>) -> bool {
        let message = message.into();
        let delivered = match self {
            EventSink::Session {
                registry,
                session_id,
            } => registry.send_to(session_id, message),
            EventSink::Stream(sender) => sender.send(message).is_ok(),
            EventSink::Detached => false,
        };
        if !delivered {
            debug!("dropping event for disconnected receiver");
        }
        delivered
    }
}

impl std::fmt::Debug for EventSink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EventSink::Session { session_id, .. } => {
                f.debug_tuple("Session").field(session_id).finish()
            }
            EventSink::Stream(_) => f.write_str("Stream"),
            EventSink::Detached => f.write_str("Detached"),
        }
    }
}
