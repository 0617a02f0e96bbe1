//! Request and response bodies of the broker HTTP surface.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::job::{JobId, Outcome};

/// What a worker needs before its first fetch: the kind to run, the
/// directory to run it in, and the result-queue bound.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskDescriptor {
    /// Registered kind name.
    pub kind: String,
    /// Working directory the orchestrator launched from.
    pub workdir: String,
    /// Cooperative bound on queued results; 0 disables the bound.
    pub nqueue: u64,
}

/// Body of `POST /api/jobs`.
#[derive(Debug, Serialize, Deserialize)]
pub struct RegisterRequest {
    /// JSON-encoded argument tuple.
    pub args: Value,
}

/// Reply to `POST /api/jobs`.
#[derive(Debug, Serialize, Deserialize)]
pub struct RegisterResponse {
    /// Assigned dense id.
    pub id: JobId,
}

/// Reply to `POST /api/jobs/{id}/fetch`.
#[derive(Debug, Serialize, Deserialize)]
pub struct FetchResponse {
    /// JSON-encoded argument tuple.
    pub args: Value,
}

/// Body of `POST /api/jobs/{id}/result`.
#[derive(Debug, Serialize, Deserialize)]
pub struct SubmitRequest {
    /// Reported outcome.
    pub outcome: Outcome,
    /// Worker-side wall time in milliseconds.
    pub elapsed_ms: u64,
}

/// Reply to `POST /api/jobs/{id}/result`. `accepted` is false once the
/// registry is stopping; the result was dropped.
#[derive(Debug, Serialize, Deserialize)]
pub struct SubmitResponse {
    /// Whether the result was enqueued.
    pub accepted: bool,
}

/// Body of `POST /api/results/next` (long poll).
#[derive(Debug, Serialize, Deserialize)]
pub struct DrainRequest {
    /// How long the broker may hold the request open waiting for a result.
    pub wait_ms: u64,
}

/// Reply to `GET /api/stored`.
#[derive(Debug, Serialize, Deserialize)]
pub struct StoredCountResponse {
    /// Number of results currently in `Stored`.
    pub stored: usize,
}

/// Per-state job counts.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusCounts {
    /// Jobs not yet requested by a worker.
    pub waiting: usize,
    /// Jobs whose arguments are being handed out.
    pub sending: usize,
    /// Jobs executing remotely.
    pub running: usize,
    /// Results being enqueued.
    pub storing: usize,
    /// Results on the queue, not yet drained.
    pub stored: usize,
    /// Results drained by the orchestrator.
    pub done: usize,
}

impl StatusCounts {
    /// Jobs whose result is available or already collected.
    pub fn ndone(&self) -> usize {
        self.stored + self.done
    }

    /// Transitions currently in flight; `stop` waits for this to hit zero.
    pub fn in_flight(&self) -> usize {
        self.sending + self.storing
    }

    /// Human summary, e.g. `[3 waiting|2 running|1 stored]`.
    pub fn summary(&self) -> String {
        let parts: Vec<String> = [
            (self.waiting, "waiting"),
            (self.sending, "sending"),
            (self.running, "running"),
            (self.storing, "storing"),
            (self.stored, "stored"),
            (self.done, "done"),
        ]
        .into_iter()
        .filter(|(count, _)| *count > 0)
        .map(|(count, label)| format!("{count} {label}"))
        .collect();
        format!("[{}]", parts.join("|"))
    }
}

/// Reply to `GET /api/status`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusSnapshot {
    /// Per-state counts.
    pub counts: StatusCounts,
    /// Human summary of `counts`.
    pub summary: String,
    /// `stored + done`.
    pub ndone: usize,
    /// Total number of registered jobs.
    pub total: usize,
    /// Cumulated worker wall time over all drained results.
    pub total_time_ms: u64,
}

/// Which completion rule `finished` applies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FinishMode {
    /// Drain every stored result into the ordered vector first.
    Map,
    /// Results are drained one by one elsewhere.
    Imap,
}

/// Body of `POST /api/finished`.
#[derive(Debug, Serialize, Deserialize)]
pub struct FinishedRequest {
    /// Completion rule.
    pub mode: FinishMode,
}

/// Reply to `POST /api/finished`.
#[derive(Debug, Serialize, Deserialize)]
pub struct FinishedResponse {
    /// Whether every job has reached `Done`.
    pub finished: bool,
}

/// One entry of the materialized result vector.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResultEntry {
    /// Job id.
    pub id: JobId,
    /// Reported outcome.
    pub outcome: Outcome,
}

/// Reply to `GET /api/results`, ordered by id.
#[derive(Debug, Serialize, Deserialize)]
pub struct ResultsResponse {
    /// Id-ordered outcomes.
    pub results: Vec<ResultEntry>,
}

/// Reply to `GET /api/counter`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CounterSnapshot {
    /// Occurrences per result signature.
    pub counts: BTreeMap<String, u64>,
    /// Last time each signature was seen.
    pub last_seen: BTreeMap<String, DateTime<Utc>>,
}

/// Per-job detail served to monitoring (`GET /api/jobs/{id}`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobView {
    /// Job id.
    pub id: JobId,
    /// Current lifecycle state.
    pub status: crate::job::JobStatus,
    /// When the job was registered.
    pub submitted_at: DateTime<Utc>,
    /// When a worker fetched its arguments.
    pub started_at: Option<DateTime<Utc>>,
    /// When its result was accepted.
    pub finished_at: Option<DateTime<Utc>>,
    /// Worker-side wall time, once reported.
    pub elapsed_ms: Option<u64>,
}

/// Error body returned with every non-2xx response.
#[derive(Debug, Serialize, Deserialize)]
pub struct ApiErrorBody {
    /// Stable machine-readable code.
    pub code: String,
    /// Human description.
    pub message: String,
}
