use std::collections::VecDeque;
use std::sync::Mutex;

use serde::Serialize;
use thiserror::Error;
use time::format_description::well_known::Rfc3339;
use time::OffsetDateTime;
use tokio::sync::{mpsc, watch};

use crate::aggregate::{AggregateSnapshot, ResultAggregator};
use crate::channel::ChannelHandle;
use crate::session::{SessionMachine, SessionState};
use crate::settings::ScanSettings;
use crate::types::{Command, Event, LogLine, ScanMethod, SessionView};

/// How many scan log lines the controller retains.
const LOG_CAPACITY: usize = 200;

/// Everything needed to start a scan session.
#[derive(Debug, Clone)]
pub struct StartRequest {
    /// Target ranges, one IP or CIDR each. May be empty only for
    /// `ScanMethod::Operators`, which supplies its own targets.
    pub ranges: Vec<String>,
    pub method: ScanMethod,
    pub settings: ScanSettings,
}

/// Synchronous command rejection. Nothing is sent over the channel when a
/// command is rejected.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ControllerError {
    #[error("start not allowed while session is {0}")]
    StartNotAllowed(SessionState),
    #[error("at least one target range is required for this scan method")]
    EmptyRanges,
}

/// Full state readout: the published view plus results and the log buffer.
#[derive(Serialize, Debug, Clone)]
pub struct ControllerSnapshot {
    pub view: SessionView,
    pub aggregate: AggregateSnapshot,
    pub logs: Vec<LogLine>,
}

struct Inner {
    machine: SessionMachine,
    aggregator: ResultAggregator,
    connected: bool,
    version: u64,
    logs: VecDeque<LogLine>,
}

impl Inner {
    fn log(&mut self, level: &str, message: impl Into<String>) {
        if self.logs.len() == LOG_CAPACITY {
            self.logs.pop_front();
        }
        self.logs.push_back(LogLine {
            level: level.to_string(),
            message: message.into(),
            timestamp: now_rfc3339(),
        });
    }

    fn view(&self) -> SessionView {
        SessionView {
            version: self.version,
            state: self.machine.state(),
            session_id: self.machine.session_id(),
            connected: self.connected,
            error: self.machine.last_error().map(str::to_string),
            aggregate: self.aggregator.view().clone(),
        }
    }
}

/// Composes the channel, aggregator, and state machine behind one interface.
///
/// All mutation goes through a single mutex: user commands may arrive from a
/// different task than the event drain, and the design allows at most one
/// in-flight transition at a time. `on_event` is synchronous and does no I/O,
/// so the lock is never held across an await.
pub struct SessionController {
    channel: ChannelHandle,
    inner: Mutex<Inner>,
    view_tx: watch::Sender<SessionView>,
}

impl SessionController {
    pub fn new(channel: ChannelHandle) -> Self {
        let (view_tx, _) = watch::channel(SessionView::default());
        Self {
            channel,
            inner: Mutex::new(Inner {
                machine: SessionMachine::new(),
                aggregator: ResultAggregator::new(),
                connected: false,
                version: 0,
                logs: VecDeque::with_capacity(LOG_CAPACITY),
            }),
            view_tx,
        }
    }

    /// Validate, reset the aggregator, enter `Starting`, and send the start
    /// command. Returns immediately; the acknowledgment arrives as an event.
    pub fn start_scan(&self, request: StartRequest) -> Result<(), ControllerError> {
        let mut inner = self.lock();
        if !inner.machine.can_start() {
            return Err(ControllerError::StartNotAllowed(inner.machine.state()));
        }
        if request.ranges.is_empty() && request.method != ScanMethod::Operators {
            return Err(ControllerError::EmptyRanges);
        }
        inner.aggregator.reset();
        inner.logs.clear();
        inner.machine.begin_start(request.method);
        inner.log("INFO", format!("scan started: method={:?}", request.method));
        self.channel.send(Command::Start {
            ranges: request.ranges,
            method: request.method,
            settings: request.settings,
        });
        self.publish(&mut inner);
        Ok(())
    }

    /// Request a stop if the session allows one; a silent no-op otherwise.
    /// Stopping does not cancel in-flight probes on the service; results keep
    /// arriving until the completion acknowledgment.
    pub fn stop_scan(&self) {
        let mut inner = self.lock();
        if !inner.machine.begin_stop() {
            return;
        }
        inner.log("INFO", "stop requested");
        self.channel.send(Command::Stop {});
        self.publish(&mut inner);
    }

    /// Explicit reset: back to `Idle`, all session data discarded.
    pub fn reset(&self) {
        let mut inner = self.lock();
        inner.machine.reset();
        inner.aggregator.reset();
        inner.logs.clear();
        self.publish(&mut inner);
    }

    /// The single dispatch point for inbound events. Republishes the session
    /// view after every event, including discarded ones, so view versions
    /// track event arrival one to one.
    pub fn on_event(&self, event: Event) {
        let mut inner = self.lock();
        match event {
            Event::ChannelConnected => {
                inner.connected = true;
                inner.log("INFO", "connected to scan service");
            }
            Event::ChannelDisconnected => {
                inner.connected = false;
                inner.log("WARN", "disconnected from scan service");
                // A session that is already running rides out the gap; an
                // unacknowledged start cannot, its command may be lost.
                if inner.machine.state() == SessionState::Starting {
                    inner
                        .machine
                        .fail("channel disconnected before start was acknowledged");
                }
            }
            ref ev if !inner.machine.owns_event(ev.session_id()) => {
                tracing::debug!(event = ?ev, "discarding event from another session");
            }
            Event::ScanStatus {
                status,
                total,
                session_id,
            } => {
                // Only a started/scanning status is the start acknowledgment;
                // any other status string must not adopt an id.
                if let Some(id) = session_id {
                    if inner.machine.session_id().is_none() && is_ack_status(&status) {
                        inner.machine.acknowledge_start(id);
                        inner.aggregator.bind_session(id);
                        inner.log("INFO", format!("session {id} acknowledged: {status}"));
                    }
                }
                if inner.machine.accepts_results() {
                    inner.aggregator.set_total_targets(total);
                }
            }
            Event::ScanProgress {
                percent,
                speed,
                elapsed,
                ..
            } => {
                if inner.machine.accepts_results() {
                    inner.aggregator.ingest_progress(percent, speed, elapsed);
                }
            }
            Event::ScanResult {
                ip,
                ping,
                open_ports,
                score,
                operator,
                ..
            } => {
                // Results are attributable only once the session id is known.
                if inner.machine.accepts_results() {
                    if let Some(id) = inner.machine.session_id() {
                        inner
                            .aggregator
                            .ingest_result(id, ip, ping, open_ports, score, operator);
                    }
                } else {
                    tracing::debug!(%ip, state = %inner.machine.state(), "discarding stale result");
                }
            }
            Event::ScanComplete {
                total_found,
                duration,
                ..
            } => {
                if inner.machine.accepts_results() {
                    inner.aggregator.complete(total_found, duration);
                    inner.machine.complete();
                    inner.log(
                        "INFO",
                        format!("scan complete: {total_found} found in {duration}s"),
                    );
                }
            }
            Event::ScanError { error, .. } => {
                inner.log("ERROR", format!("scan error: {error}"));
                inner.machine.fail(error);
            }
            Event::ScanLog { level, message, .. } => {
                inner.log(&level, message);
            }
        }
        self.publish(&mut inner);
    }

    /// Drain the inbound sequence one event at a time, in arrival order. Ends
    /// when the channel adapter is torn down.
    pub async fn drain(&self, mut events: mpsc::UnboundedReceiver<Event>) {
        while let Some(event) = events.recv().await {
            self.on_event(event);
        }
    }

    /// The sole read surface presentation code should depend on.
    pub fn current_view(&self) -> SessionView {
        self.view_tx.borrow().clone()
    }

    /// Watch the versioned view; a new value is published after every event.
    pub fn subscribe(&self) -> watch::Receiver<SessionView> {
        self.view_tx.subscribe()
    }

    /// Consistent full readout: view, results, and logs from the same lock
    /// acquisition, so the snapshot is never torn.
    pub fn snapshot(&self) -> ControllerSnapshot {
        let inner = self.lock();
        ControllerSnapshot {
            view: inner.view(),
            aggregate: inner.aggregator.snapshot(),
            logs: inner.logs.iter().cloned().collect(),
        }
    }

    pub fn channel(&self) -> &ChannelHandle {
        &self.channel
    }

    fn publish(&self, inner: &mut Inner) {
        inner.version += 1;
        self.view_tx.send_replace(inner.view());
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Inner> {
        self.inner.lock().expect("controller state lock poisoned")
    }
}

fn is_ack_status(status: &str) -> bool {
    matches!(status, "started" | "scanning")
}

fn now_rfc3339() -> String {
    OffsetDateTime::now_utc()
        .format(&Rfc3339)
        .unwrap_or_else(|_| String::from("1970-01-01T00:00:00Z"))
}
