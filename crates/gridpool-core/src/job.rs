//! Job identity, lifecycle states and result records.

use serde::{Deserialize, Serialize};

/// Dense 0-based job identifier, assigned by registration order.
pub type JobId = u64;

/// Lifecycle of a single job.
///
/// Transitions are one-way along this chain; a regression is a protocol
/// violation, never a recoverable condition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    /// Registered, no worker has asked for it yet.
    Waiting,
    /// A worker is being handed the arguments.
    Sending,
    /// Arguments returned to the worker; the job is executing remotely.
    Running,
    /// The worker posted a result which is being enqueued.
    Storing,
    /// The result sits on the broker's result queue.
    Stored,
    /// The orchestrator dequeued the result.
    Done,
}

impl JobStatus {
    /// Lowercase label used in status summaries.
    pub fn label(self) -> &'static str {
        match self {
            JobStatus::Waiting => "waiting",
            JobStatus::Sending => "sending",
            JobStatus::Running => "running",
            JobStatus::Storing => "storing",
            JobStatus::Stored => "stored",
            JobStatus::Done => "done",
        }
    }

    /// Move forward along the chain, refusing to move backwards.
    pub fn advance(&mut self, next: JobStatus) -> Result<(), StatusRegression> {
        if next < *self {
            return Err(StatusRegression { from: *self, to: next });
        }
        *self = next;
        Ok(())
    }
}

/// Attempted backwards transition of a [`JobStatus`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("job status cannot move from {from:?} back to {to:?}")]
pub struct StatusRegression {
    /// Status the job was in.
    pub from: JobStatus,
    /// Status that was requested.
    pub to: JobStatus,
}

/// The reported outcome of one job.
///
/// `Err` is a normal, terminal outcome: the handler failed and said so. It
/// is not a transport or broker error.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum Outcome {
    /// Handler result, JSON-encoded.
    Ok(serde_json::Value),
    /// Handler failure description.
    Err(String),
}

impl Outcome {
    /// Whether this outcome reports a failure.
    pub fn is_err(&self) -> bool {
        matches!(self, Outcome::Err(_))
    }
}

/// One drained result: job id, outcome, and the worker-side wall time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResultRecord {
    /// Job the record belongs to.
    pub id: JobId,
    /// Reported outcome.
    pub outcome: Outcome,
    /// Wall time on the worker, from fetch to completed execution.
    pub elapsed_ms: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_advances_forward() {
        let mut status = JobStatus::Waiting;
        for next in [
            JobStatus::Sending,
            JobStatus::Running,
            JobStatus::Storing,
            JobStatus::Stored,
            JobStatus::Done,
        ] {
            status.advance(next).unwrap();
            assert_eq!(status, next);
        }
    }

    #[test]
    fn status_refuses_regression() {
        let mut status = JobStatus::Stored;
        let err = status.advance(JobStatus::Running).unwrap_err();
        assert_eq!(err.from, JobStatus::Stored);
        assert_eq!(err.to, JobStatus::Running);
        assert_eq!(status, JobStatus::Stored);
    }

    #[test]
    fn advance_to_same_state_is_allowed() {
        let mut status = JobStatus::Running;
        status.advance(JobStatus::Running).unwrap();
        assert_eq!(status, JobStatus::Running);
    }

    #[test]
    fn outcome_round_trips_through_json() {
        let ok = Outcome::Ok(serde_json::json!([1, 2, 3]));
        let err = Outcome::Err("boom".to_string());
        for outcome in [ok, err] {
            let raw = serde_json::to_string(&outcome).unwrap();
            let back: Outcome = serde_json::from_str(&raw).unwrap();
            assert_eq!(back, outcome);
        }
    }
}
