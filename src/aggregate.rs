use serde::Serialize;

use crate::types::{AggregateView, FoundTarget, SessionId};

/// Owned copy of the aggregate state at one point in time.
///
/// Produced under the controller's lock, so a snapshot never observes a
/// half-applied ingest (count bumped but result not yet appended).
#[derive(Serialize, Debug, Clone, PartialEq)]
pub struct AggregateSnapshot {
    pub view: AggregateView,
    pub results: Vec<FoundTarget>,
    /// Found total as reported by the completion event, surfaced verbatim.
    /// May differ from `view.found_count` after a reconnect gap.
    pub reported_total_found: Option<u64>,
}

/// Accumulates per-target results and derived counters for one session.
///
/// Append-only: a result is never mutated after it is stored. Progress and
/// status snapshots overwrite their counters last-write-wins, which is also
/// how counts self-correct after events were lost across a reconnect.
#[derive(Debug, Default)]
pub struct ResultAggregator {
    session: Option<SessionId>,
    next_sequence: u64,
    results: Vec<FoundTarget>,
    view: AggregateView,
    latency_sum: f64,
    latency_count: u64,
    reported_total_found: Option<u64>,
}

impl ResultAggregator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Session the accumulated data belongs to, once known.
    pub fn session(&self) -> Option<SessionId> {
        self.session
    }

    /// Clear everything for a new session. Called exactly once per start,
    /// before any result of that session is accepted.
    pub fn reset(&mut self) {
        *self = Self::default();
    }

    /// Record the service-assigned id once the start is acknowledged.
    pub fn bind_session(&mut self, id: SessionId) {
        self.session = Some(id);
    }

    /// Append one result, assigning the next sequence number. O(1) amortized.
    /// No dedup: the service is the source of truth for "a target was found",
    /// and redundant reports are kept as distinct entries.
    pub fn ingest_result(
        &mut self,
        session: SessionId,
        target: String,
        latency_ms: Option<f64>,
        open_ports: Vec<u16>,
        score: Option<f64>,
        operator_label: Option<String>,
    ) -> u64 {
        let sequence = self.next_sequence;
        self.next_sequence += 1;
        self.results.push(FoundTarget {
            target,
            latency_ms,
            open_ports,
            score,
            operator_label,
            sequence,
            session,
        });
        self.view.found_count += 1;
        if let Some(ms) = latency_ms {
            self.view.latest_latency_ms = Some(ms);
            self.latency_sum += ms;
            self.latency_count += 1;
            self.view.average_latency_ms = Some(self.latency_sum / self.latency_count as f64);
        }
        sequence
    }

    /// Progress events are snapshots, not deltas: overwrite last-write-wins.
    pub fn ingest_progress(&mut self, percent: f64, speed: f64, elapsed: f64) {
        self.view.percent_complete = percent;
        self.view.throughput_per_second = speed;
        if elapsed > 0.0 {
            self.view.elapsed_seconds = elapsed;
        }
    }

    /// Total target count from a status snapshot.
    pub fn set_total_targets(&mut self, total: u64) {
        if total > 0 {
            self.view.total_targets = total;
        }
    }

    /// Record the completion report: reported duration wins over the last
    /// progress-derived elapsed time.
    pub fn complete(&mut self, total_found: u64, duration: f64) {
        self.reported_total_found = Some(total_found);
        self.view.percent_complete = 100.0;
        if duration > 0.0 {
            self.view.elapsed_seconds = duration;
        }
    }

    pub fn view(&self) -> &AggregateView {
        &self.view
    }

    pub fn snapshot(&self) -> AggregateSnapshot {
        AggregateSnapshot {
            view: self.view.clone(),
            results: self.results.clone(),
            reported_total_found: self.reported_total_found,
        }
    }
}
