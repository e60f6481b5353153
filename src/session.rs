use serde::{Deserialize, Serialize};
use std::time::Instant;

use crate::types::{ScanMethod, SessionId};

/// Lifecycle state of a scan session.
///
/// `Completed` and `Errored` are terminal for a given session instance; the
/// only way out is a reset or a fresh start, which allocates a new identity.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    Idle,
    Starting,
    Running,
    Stopping,
    Completed,
    Errored,
}

impl std::fmt::Display for SessionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            SessionState::Idle => "idle",
            SessionState::Starting => "starting",
            SessionState::Running => "running",
            SessionState::Stopping => "stopping",
            SessionState::Completed => "completed",
            SessionState::Errored => "errored",
        };
        f.write_str(s)
    }
}

/// Owns session identity and arbitrates user commands against server events.
///
/// The machine itself is a plain value; the controller serializes access to it,
/// so no transition ever races another.
#[derive(Debug)]
pub struct SessionMachine {
    state: SessionState,
    session_id: Option<SessionId>,
    // Id of the most recently discarded session. Until the service assigns
    // the new id, delayed frames from the old session are still in flight and
    // must not be mistaken for the pending start's.
    retired_session: Option<SessionId>,
    method: Option<ScanMethod>,
    started_at: Option<Instant>,
    last_error: Option<String>,
}

impl SessionMachine {
    pub fn new() -> Self {
        Self {
            state: SessionState::Idle,
            session_id: None,
            retired_session: None,
            method: None,
            started_at: None,
            last_error: None,
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn session_id(&self) -> Option<SessionId> {
        self.session_id
    }

    pub fn method(&self) -> Option<ScanMethod> {
        self.method
    }

    pub fn started_at(&self) -> Option<Instant> {
        self.started_at
    }

    pub fn last_error(&self) -> Option<&str> {
        self.last_error.as_deref()
    }

    /// A start is accepted only from `Idle`, `Completed`, or `Errored`; never
    /// while a session is starting, running, or stopping.
    pub fn can_start(&self) -> bool {
        matches!(
            self.state,
            SessionState::Idle | SessionState::Completed | SessionState::Errored
        )
    }

    /// A stop is accepted from `Running` or `Starting`; anywhere else it is a
    /// silent no-op (the UI may call stop defensively).
    pub fn can_stop(&self) -> bool {
        matches!(self.state, SessionState::Running | SessionState::Starting)
    }

    /// Results and progress are ingested only while the active session can
    /// still produce them.
    pub fn accepts_results(&self) -> bool {
        matches!(self.state, SessionState::Running | SessionState::Stopping)
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self.state, SessionState::Completed | SessionState::Errored)
    }

    /// Begin a new session: discard the previous identity and enter `Starting`.
    /// Returns false (unchanged state) when a start is not allowed.
    pub fn begin_start(&mut self, method: ScanMethod) -> bool {
        if !self.can_start() {
            return false;
        }
        self.state = SessionState::Starting;
        if let Some(old) = self.session_id.take() {
            self.retired_session = Some(old);
        }
        self.method = Some(method);
        self.started_at = Some(Instant::now());
        self.last_error = None;
        true
    }

    /// Request a stop. Returns true when the stop should be sent to the
    /// service, false when it was a no-op.
    pub fn begin_stop(&mut self) -> bool {
        if !self.can_stop() {
            return false;
        }
        self.state = SessionState::Stopping;
        true
    }

    /// Start acknowledged: adopt the service-assigned id. From `Starting` this
    /// enters `Running`; if a stop was already issued the machine stays in
    /// `Stopping` and only records the id.
    pub fn acknowledge_start(&mut self, id: SessionId) {
        match self.state {
            SessionState::Starting => {
                self.state = SessionState::Running;
                self.session_id = Some(id);
            }
            SessionState::Stopping if self.session_id.is_none() => {
                self.session_id = Some(id);
            }
            _ => {}
        }
    }

    /// Completion event (also the stop acknowledgment).
    pub fn complete(&mut self) {
        if matches!(self.state, SessionState::Running | SessionState::Stopping) {
            self.state = SessionState::Completed;
        }
    }

    /// Service-reported failure. Terminal; no retry is attempted here.
    pub fn fail(&mut self, message: impl Into<String>) {
        if matches!(
            self.state,
            SessionState::Starting | SessionState::Running | SessionState::Stopping
        ) {
            self.state = SessionState::Errored;
            self.last_error = Some(message.into());
        }
    }

    /// Explicit reset back to `Idle`, destroying the session identity.
    pub fn reset(&mut self) {
        self.state = SessionState::Idle;
        if let Some(old) = self.session_id.take() {
            self.retired_session = Some(old);
        }
        self.method = None;
        self.started_at = None;
        self.last_error = None;
    }

    /// Whether an inbound event belongs to the active session. Events tagged
    /// with a different session id must be discarded, never merged.
    pub fn owns_event(&self, event_session: Option<SessionId>) -> bool {
        match (event_session, self.session_id) {
            (Some(ev), Some(cur)) => ev == cur,
            // Untagged events are attributed to the active session. Tagged
            // events before we learned our id belong to the pending start
            // (which may already be stopping), unless they carry the retired
            // session's id; in any settled state they can only be stale.
            (None, _) => true,
            (Some(ev), None) => {
                self.retired_session != Some(ev)
                    && matches!(self.state, SessionState::Starting | SessionState::Stopping)
            }
        }
    }
}

impl Default for SessionMachine {
    fn default() -> Self {
        Self::new()
    }
}
