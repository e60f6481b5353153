use serde::{Deserialize, Serialize};

use crate::session::SessionState;
use crate::settings::ScanSettings;

/// Opaque scan session identifier assigned by the service on start.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[serde(transparent)]
pub struct SessionId(pub u64);

impl std::fmt::Display for SessionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// How the service selects and probes targets. Fixed for the lifetime of a session.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum ScanMethod {
    #[default]
    Cloud,
    /// The service supplies its own operator IP ranges; no client ranges required.
    Operators,
    /// User-provided custom config drives target selection.
    Custom,
}

/// One scanned target's outcome, as stored by the aggregator.
///
/// Immutable once appended. `sequence` is assigned at receipt time and is the
/// only total order guarantee; network delivery order is not probe order.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct FoundTarget {
    pub target: String,
    /// Absent means no reply within the probe budget.
    pub latency_ms: Option<f64>,
    pub open_ports: Vec<u16>,
    pub score: Option<f64>,
    /// Present only when the scan method is not `Cloud`.
    pub operator_label: Option<String>,
    pub sequence: u64,
    pub session: SessionId,
}

/// Inbound event pushed by the service over the channel.
///
/// Wire frames are JSON objects tagged by `event`. `ChannelConnected` and
/// `ChannelDisconnected` are synthesized by the channel adapter and never
/// appear on the wire.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum Event {
    ScanProgress {
        percent: f64,
        /// Targets probed per second.
        speed: f64,
        #[serde(default)]
        elapsed: f64,
        session_id: Option<SessionId>,
    },
    ScanResult {
        ip: String,
        ping: Option<f64>,
        #[serde(default)]
        open_ports: Vec<u16>,
        score: Option<f64>,
        operator: Option<String>,
        session_id: Option<SessionId>,
    },
    ScanComplete {
        total_found: u64,
        #[serde(default)]
        duration: f64,
        session_id: Option<SessionId>,
    },
    ScanError {
        error: String,
        session_id: Option<SessionId>,
    },
    ScanLog {
        level: String,
        message: String,
        session_id: Option<SessionId>,
    },
    /// Periodic status snapshot. The first one after a start command (status
    /// `started` or `scanning`) is the acknowledgment that carries the
    /// session id.
    ScanStatus {
        status: String,
        #[serde(default)]
        total: u64,
        session_id: Option<SessionId>,
    },
    ChannelConnected,
    ChannelDisconnected,
}

impl Event {
    /// Session id carried by the event, if any.
    pub fn session_id(&self) -> Option<SessionId> {
        match self {
            Event::ScanProgress { session_id, .. }
            | Event::ScanResult { session_id, .. }
            | Event::ScanComplete { session_id, .. }
            | Event::ScanError { session_id, .. }
            | Event::ScanLog { session_id, .. }
            | Event::ScanStatus { session_id, .. } => *session_id,
            Event::ChannelConnected | Event::ChannelDisconnected => None,
        }
    }
}

/// Outbound command sent to the service over the channel.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(tag = "cmd", rename_all = "snake_case")]
pub enum Command {
    Start {
        ranges: Vec<String>,
        method: ScanMethod,
        settings: ScanSettings,
    },
    Stop {},
}

/// Derived summary statistics, recomputed incrementally from events.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Default)]
pub struct AggregateView {
    pub found_count: u64,
    pub latest_latency_ms: Option<f64>,
    pub average_latency_ms: Option<f64>,
    pub elapsed_seconds: f64,
    pub percent_complete: f64,
    pub throughput_per_second: f64,
    pub total_targets: u64,
}

/// The single read surface published to presentation after every processed
/// event. `version` increments by one per publish.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct SessionView {
    pub version: u64,
    pub state: SessionState,
    pub session_id: Option<SessionId>,
    /// Channel link health; a transient disconnect does not change `state`.
    pub connected: bool,
    /// Service-reported failure message once the session is `Errored`.
    pub error: Option<String>,
    pub aggregate: AggregateView,
}

impl Default for SessionView {
    fn default() -> Self {
        Self {
            version: 0,
            state: SessionState::Idle,
            session_id: None,
            connected: false,
            error: None,
            aggregate: AggregateView::default(),
        }
    }
}

/// One line of the bounded scan log kept by the controller.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct LogLine {
    pub level: String,
    pub message: String,
    pub timestamp: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn result_event_decodes_from_wire_json() {
        let raw = r#"{"event":"scan_result","ip":"203.0.113.9","ping":42.5,
            "open_ports":[443,80],"score":87.0,"operator":null,"session_id":7}"#;
        let ev: Event = serde_json::from_str(raw).expect("decode");
        match ev {
            Event::ScanResult {
                ip,
                ping,
                open_ports,
                session_id,
                ..
            } => {
                assert_eq!(ip, "203.0.113.9");
                assert_eq!(ping, Some(42.5));
                assert_eq!(open_ports, vec![443, 80]);
                assert_eq!(session_id, Some(SessionId(7)));
            }
            other => panic!("wrong variant: {other:?}"),
        }
    }

    #[test]
    fn unknown_event_tag_is_an_error_not_a_panic() {
        let raw = r#"{"event":"scan_telemetry","foo":1}"#;
        assert!(serde_json::from_str::<Event>(raw).is_err());
    }

    #[test]
    fn start_command_encodes_with_cmd_tag() {
        let cmd = Command::Start {
            ranges: vec!["198.51.100.0/24".into()],
            method: ScanMethod::Cloud,
            settings: ScanSettings::default(),
        };
        let json = serde_json::to_value(&cmd).expect("encode");
        assert_eq!(json["cmd"], "start");
        assert_eq!(json["method"], "cloud");
        assert_eq!(json["ranges"][0], "198.51.100.0/24");
    }
}
