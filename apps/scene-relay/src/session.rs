use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use parking_lot::Mutex;
use scene_proto::{generate_id, ErrorCode, Message};
use tokio::sync::mpsc;
use tokio::time::Instant;
use tracing::debug;

use crate::metrics;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Waiting for `init` before commands are accepted.
    Connecting,
    Active,
    Closed,
}

/// Frames queued for a connection's writer task.
#[derive(Debug, Clone)]
pub enum Outbound {
    Message(Message),
    Close,
}

/// Bookkeeping for one duplex connection.
pub struct SessionHandle {
    id: String,
    tx: mpsc::UnboundedSender<Outbound>,
    state: Mutex<SessionState>,
    client_type: Mutex<Option<String>>,
    last_heartbeat: Mutex<Instant>,
    inflight: Mutex<HashSet<String>>,
}

impl SessionHandle {
    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn state(&self) -> SessionState {
        *self.state.lock()
    }

    pub fn client_type(&self) -> Option<String> {
        self.client_type.lock().clone()
    }

    pub fn activate(&self, client_type: Option<String>) {
        let mut state = self.state.lock();
        if *state == SessionState::Closed {
            return;
        }
        *state = SessionState::Active;
        if client_type.is_some() {
            *self.client_type.lock() = client_type;
        }
    }

    pub fn close(&self) {
        *self.state.lock() = SessionState::Closed;
    }

    pub fn touch(&self) {
        *self.last_heartbeat.lock() = Instant::now();
    }

    pub fn idle_deadline(&self, idle_timeout: Duration) -> Instant {
        *self.last_heartbeat.lock() + idle_timeout
    }

    /// Claim `command_id` for this session. Returns `false` if it is already
    /// in flight.
    pub fn begin_command(&self, command_id: &str) -> bool {
        self.inflight.lock().insert(command_id.to_string())
    }

    pub fn finish_command(&self, command_id: &str) {
        self.inflight.lock().remove(command_id);
    }

    /// Queue a message for the writer task. Messages for a closed session are
    /// dropped.
    pub fn send(&self, message: Message) -> bool {
        if self.state() == SessionState::Closed {
            return false;
        }
        self.tx.send(Outbound::Message(message)).is_ok()
    }

    pub fn send_error(&self, id: &str, code: ErrorCode, message: impl Into<String>) {
        metrics::PROTOCOL_ERRORS
            .with_label_values(&[code.as_str()])
            .inc();
        let message = message.into();
        debug!(session_id = %self.id, correlation_id = id, code = %code, %message, "sending error");
        self.send(Message::error(id, code, message));
    }

    /// Send a final error and ask the writer to close the socket.
    pub fn terminate(&self, code: ErrorCode, message: &str) {
        self.send_error("", code, message);
        self.close();
        let _ = self.tx.send(Outbound::Close);
    }
}

/// Registry of live duplex sessions.
#[derive(Clone, Default)]
pub struct SessionRegistry {
    sessions: Arc<DashMap<String, Arc<SessionHandle>>>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, tx: mpsc::UnboundedSender<Outbound>, require_init: bool) -> Arc<SessionHandle> {
        let state = if require_init {
            SessionState::Connecting
        } else {
            SessionState::Active
        };
        let handle = Arc::new(SessionHandle {
            id: generate_id(),
            tx,
            state: Mutex::new(state),
            client_type: Mutex::new(None),
            last_heartbeat: Mutex::new(Instant::now()),
            inflight: Mutex::new(HashSet::new()),
        });
        self.sessions.insert(handle.id.clone(), handle.clone());
        metrics::ACTIVE_SESSIONS.inc();
        handle
    }

    pub fn remove(&self, session_id: &str) {
        if let Some((_, handle)) = self.sessions.remove(session_id) {
            handle.close();
            metrics::ACTIVE_SESSIONS.dec();
        }
    }

    pub fn get(&self, session_id: &str) -> Option<Arc<SessionHandle>> {
        self.sessions.get(session_id).map(|entry| entry.value().clone())
    }

    pub fn active_count(&self) -> usize {
        self.sessions.len()
    }
}
