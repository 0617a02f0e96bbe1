//! The jobs registry.
//!
//! All registry state is owned by a single task consuming commands from an
//! mpsc channel; HTTP handlers talk to it through [`RegistryHandle`]. With
//! one mutation point, every per-job transition is serialized and the state
//! machine stays monotone without locks.

use std::collections::{BTreeMap, VecDeque};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde_json::Value;
use tokio::sync::{mpsc, oneshot};

use gridpool_core::counter::ResultCounter;
use gridpool_core::job::{JobId, JobStatus, Outcome, ResultRecord};
use gridpool_core::wire::{
    CounterSnapshot, FinishMode, JobView, ResultEntry, StatusCounts, StatusSnapshot,
    TaskDescriptor,
};

/// Registry-side failures surfaced to callers.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RegistryError {
    /// Job id out of range.
    #[error("unknown job id {0}")]
    UnknownJob(JobId),
    /// `fetch` on a job that already left `Waiting` (a worker retried a
    /// completed id).
    #[error("job {id} was already fetched (status: {status:?})")]
    AlreadyFetched {
        /// Offending id.
        id: JobId,
        /// Its current status.
        status: JobStatus,
    },
    /// `submit_result` on a job that is not `Running`.
    #[error("job {id} is not running (status: {status:?})")]
    NotRunning {
        /// Offending id.
        id: JobId,
        /// Its current status.
        status: JobStatus,
    },
    /// The registry task is gone.
    #[error("registry task terminated")]
    Closed,
}

struct JobEntry {
    args: Value,
    status: JobStatus,
    submitted_at: DateTime<Utc>,
    started_at: Option<DateTime<Utc>>,
    finished_at: Option<DateTime<Utc>>,
    elapsed_ms: Option<u64>,
}

enum Command {
    Register {
        args: Value,
        reply: oneshot::Sender<JobId>,
    },
    Task {
        reply: oneshot::Sender<TaskDescriptor>,
    },
    Fetch {
        id: JobId,
        reply: oneshot::Sender<Result<Value, RegistryError>>,
    },
    Submit {
        id: JobId,
        outcome: Outcome,
        elapsed_ms: u64,
        reply: oneshot::Sender<Result<bool, RegistryError>>,
    },
    Drain {
        reply: oneshot::Sender<ResultRecord>,
    },
    StoredCount {
        reply: oneshot::Sender<usize>,
    },
    Status {
        reply: oneshot::Sender<StatusSnapshot>,
    },
    Finished {
        mode: FinishMode,
        reply: oneshot::Sender<bool>,
    },
    Results {
        reply: oneshot::Sender<Vec<ResultEntry>>,
    },
    SetStopping {
        reply: oneshot::Sender<()>,
    },
    Counter {
        reply: oneshot::Sender<CounterSnapshot>,
    },
    Job {
        id: JobId,
        reply: oneshot::Sender<Option<JobView>>,
    },
}

struct Registry {
    kind: String,
    workdir: String,
    nqueue: usize,
    jobs: Vec<JobEntry>,
    queue: VecDeque<ResultRecord>,
    waiter: Option<oneshot::Sender<ResultRecord>>,
    results: BTreeMap<JobId, Outcome>,
    counter: ResultCounter,
    total_time_ms: u64,
    stopping: bool,
}

/// Cheap handle to the registry task.
#[derive(Clone)]
pub struct RegistryHandle {
    tx: mpsc::Sender<Command>,
}

/// Start the registry task for one run.
pub fn spawn(kind: String, workdir: String, nqueue: usize) -> RegistryHandle {
    let (tx, mut rx) = mpsc::channel(64);
    let mut registry = Registry {
        kind,
        workdir,
        nqueue,
        jobs: Vec::new(),
        queue: VecDeque::new(),
        waiter: None,
        results: BTreeMap::new(),
        counter: ResultCounter::new(),
        total_time_ms: 0,
        stopping: false,
    };
    tokio::spawn(async move {
        while let Some(cmd) = rx.recv().await {
            registry.handle(cmd);
        }
    });
    RegistryHandle { tx }
}

impl RegistryHandle {
    /// Append a job with the given arguments; returns its dense id.
    pub async fn register(&self, args: Value) -> Result<JobId, RegistryError> {
        self.call(|reply| Command::Register { args, reply }).await
    }

    /// The task descriptor served to workers.
    pub async fn task(&self) -> Result<TaskDescriptor, RegistryError> {
        self.call(|reply| Command::Task { reply }).await
    }

    /// Hand the arguments of `id` to a worker (`Waiting` → `Running`).
    pub async fn fetch(&self, id: JobId) -> Result<Value, RegistryError> {
        self.call(|reply| Command::Fetch { id, reply }).await?
    }

    /// Accept one result (`Running` → `Stored`); false when stopping.
    pub async fn submit(
        &self,
        id: JobId,
        outcome: Outcome,
        elapsed_ms: u64,
    ) -> Result<bool, RegistryError> {
        self.call(|reply| Command::Submit {
            id,
            outcome,
            elapsed_ms,
            reply,
        })
        .await?
    }

    /// Dequeue one result, waiting up to `wait` for one to appear.
    ///
    /// The `Stored` → `Done` transition happens only when the record is
    /// actually delivered; a timed-out wait leaves the queue untouched.
    pub async fn drain(&self, wait: Duration) -> Result<Option<ResultRecord>, RegistryError> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(Command::Drain { reply })
            .await
            .map_err(|_| RegistryError::Closed)?;
        match tokio::time::timeout(wait, rx).await {
            Ok(Ok(record)) => Ok(Some(record)),
            // Waiter replaced by a newer drain, or nothing arrived in time.
            Ok(Err(_)) | Err(_) => Ok(None),
        }
    }

    /// Number of results currently `Stored`.
    pub async fn stored_count(&self) -> Result<usize, RegistryError> {
        self.call(|reply| Command::StoredCount { reply }).await
    }

    /// Counts, summary string and totals.
    pub async fn status(&self) -> Result<StatusSnapshot, RegistryError> {
        self.call(|reply| Command::Status { reply }).await
    }

    /// Completion check; map mode drains stored results first.
    pub async fn finished(&self, mode: FinishMode) -> Result<bool, RegistryError> {
        self.call(|reply| Command::Finished { mode, reply }).await
    }

    /// The id-ordered result vector.
    pub async fn results(&self) -> Result<Vec<ResultEntry>, RegistryError> {
        self.call(|reply| Command::Results { reply }).await
    }

    /// Set the stopping flag; later submissions become silent no-ops.
    pub async fn set_stopping(&self) -> Result<(), RegistryError> {
        self.call(|reply| Command::SetStopping { reply }).await
    }

    /// Result-signature counter snapshot.
    pub async fn counter(&self) -> Result<CounterSnapshot, RegistryError> {
        self.call(|reply| Command::Counter { reply }).await
    }

    /// Per-job detail, for monitoring.
    pub async fn job(&self, id: JobId) -> Result<Option<JobView>, RegistryError> {
        self.call(|reply| Command::Job { id, reply }).await
    }

    async fn call<T>(&self, make: impl FnOnce(oneshot::Sender<T>) -> Command) -> Result<T, RegistryError> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(make(reply))
            .await
            .map_err(|_| RegistryError::Closed)?;
        rx.await.map_err(|_| RegistryError::Closed)
    }
}

impl Registry {
    fn handle(&mut self, cmd: Command) {
        match cmd {
            Command::Register { args, reply } => {
                let id = self.jobs.len() as JobId;
                self.jobs.push(JobEntry {
                    args,
                    status: JobStatus::Waiting,
                    submitted_at: Utc::now(),
                    started_at: None,
                    finished_at: None,
                    elapsed_ms: None,
                });
                let _ = reply.send(id);
            }
            Command::Task { reply } => {
                let _ = reply.send(TaskDescriptor {
                    kind: self.kind.clone(),
                    workdir: self.workdir.clone(),
                    nqueue: self.nqueue as u64,
                });
            }
            Command::Fetch { id, reply } => {
                let _ = reply.send(self.fetch(id));
            }
            Command::Submit {
                id,
                outcome,
                elapsed_ms,
                reply,
            } => {
                let _ = reply.send(self.submit(id, outcome, elapsed_ms));
            }
            Command::Drain { reply } => {
                if let Some(record) = self.queue.pop_front() {
                    self.deliver(record, reply);
                } else {
                    // Single consumer: a newer drain supersedes the old
                    // waiter, whose handler then reports "nothing yet".
                    self.waiter = Some(reply);
                }
            }
            Command::StoredCount { reply } => {
                let _ = reply.send(self.count(JobStatus::Stored));
            }
            Command::Status { reply } => {
                let _ = reply.send(self.status());
            }
            Command::Finished { mode, reply } => {
                if mode == FinishMode::Map {
                    while let Some(record) = self.queue.pop_front() {
                        self.mark_done(record.id, &record.outcome, record.elapsed_ms);
                        self.results.insert(record.id, record.outcome);
                    }
                }
                let _ = reply.send(self.count(JobStatus::Done) == self.jobs.len());
            }
            Command::Results { reply } => {
                let results = self
                    .results
                    .iter()
                    .map(|(id, outcome)| ResultEntry {
                        id: *id,
                        outcome: outcome.clone(),
                    })
                    .collect();
                let _ = reply.send(results);
            }
            Command::SetStopping { reply } => {
                self.stopping = true;
                let _ = reply.send(());
            }
            Command::Counter { reply } => {
                let _ = reply.send(self.counter.snapshot());
            }
            Command::Job { id, reply } => {
                let view = self.jobs.get(id as usize).map(|entry| JobView {
                    id,
                    status: entry.status,
                    submitted_at: entry.submitted_at,
                    started_at: entry.started_at,
                    finished_at: entry.finished_at,
                    elapsed_ms: entry.elapsed_ms,
                });
                let _ = reply.send(view);
            }
        }
    }

    fn fetch(&mut self, id: JobId) -> Result<Value, RegistryError> {
        let entry = self
            .jobs
            .get_mut(id as usize)
            .ok_or(RegistryError::UnknownJob(id))?;
        if entry.status != JobStatus::Waiting {
            return Err(RegistryError::AlreadyFetched {
                id,
                status: entry.status,
            });
        }
        let _ = entry.status.advance(JobStatus::Sending);
        let args = entry.args.clone();
        let _ = entry.status.advance(JobStatus::Running);
        entry.started_at = Some(Utc::now());
        Ok(args)
    }

    fn submit(&mut self, id: JobId, outcome: Outcome, elapsed_ms: u64) -> Result<bool, RegistryError> {
        if self.stopping {
            return Ok(false);
        }
        let entry = self
            .jobs
            .get_mut(id as usize)
            .ok_or(RegistryError::UnknownJob(id))?;
        if entry.status != JobStatus::Running {
            return Err(RegistryError::NotRunning {
                id,
                status: entry.status,
            });
        }
        let _ = entry.status.advance(JobStatus::Storing);
        entry.finished_at = Some(Utc::now());
        entry.elapsed_ms = Some(elapsed_ms);
        self.queue.push_back(ResultRecord {
            id,
            outcome,
            elapsed_ms,
        });
        let _ = entry.status.advance(JobStatus::Stored);
        self.flush_waiter();
        Ok(true)
    }

    /// Hand the oldest queued record to a parked drain, if any.
    fn flush_waiter(&mut self) {
        let Some(waiter) = self.waiter.take() else {
            return;
        };
        let Some(record) = self.queue.pop_front() else {
            self.waiter = Some(waiter);
            return;
        };
        self.deliver(record, waiter);
    }

    /// Send a record to a drain reply; `Done` only on successful delivery.
    fn deliver(&mut self, record: ResultRecord, reply: oneshot::Sender<ResultRecord>) {
        let (id, elapsed_ms) = (record.id, record.elapsed_ms);
        let outcome = record.outcome.clone();
        match reply.send(record) {
            Ok(()) => self.mark_done(id, &outcome, elapsed_ms),
            // The drain timed out before we answered; the record goes
            // back to the head of the queue.
            Err(record) => self.queue.push_front(record),
        }
    }

    fn mark_done(&mut self, id: JobId, outcome: &Outcome, elapsed_ms: u64) {
        if let Some(entry) = self.jobs.get_mut(id as usize) {
            let _ = entry.status.advance(JobStatus::Done);
        }
        self.total_time_ms += elapsed_ms;
        self.counter.record(outcome);
    }

    fn count(&self, status: JobStatus) -> usize {
        self.jobs.iter().filter(|job| job.status == status).count()
    }

    fn status(&self) -> StatusSnapshot {
        let mut counts = StatusCounts::default();
        for job in &self.jobs {
            match job.status {
                JobStatus::Waiting => counts.waiting += 1,
                JobStatus::Sending => counts.sending += 1,
                JobStatus::Running => counts.running += 1,
                JobStatus::Storing => counts.storing += 1,
                JobStatus::Stored => counts.stored += 1,
                JobStatus::Done => counts.done += 1,
            }
        }
        StatusSnapshot {
            counts,
            summary: counts.summary(),
            ndone: counts.ndone(),
            total: self.jobs.len(),
            total_time_ms: self.total_time_ms,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn test_registry(nqueue: usize) -> RegistryHandle {
        spawn("square".to_string(), "/tmp".to_string(), nqueue)
    }

    #[tokio::test]
    async fn register_fetch_submit_drain_cycle() {
        let registry = test_registry(0);
        let id = registry.register(json!([4])).await.unwrap();
        assert_eq!(id, 0);

        let args = registry.fetch(id).await.unwrap();
        assert_eq!(args, json!([4]));
        assert_eq!(registry.status().await.unwrap().counts.running, 1);

        let accepted = registry.submit(id, Outcome::Ok(json!(16)), 120).await.unwrap();
        assert!(accepted);
        assert_eq!(registry.stored_count().await.unwrap(), 1);

        let record = registry
            .drain(Duration::from_millis(100))
            .await
            .unwrap()
            .expect("record available");
        assert_eq!(record.id, id);
        assert_eq!(record.outcome, Outcome::Ok(json!(16)));

        let snap = registry.status().await.unwrap();
        assert_eq!(snap.counts.done, 1);
        assert_eq!(snap.total_time_ms, 120);
    }

    #[tokio::test]
    async fn fetch_twice_is_a_protocol_violation() {
        let registry = test_registry(0);
        let id = registry.register(json!([1])).await.unwrap();
        registry.fetch(id).await.unwrap();
        let err = registry.fetch(id).await.unwrap_err();
        assert_eq!(
            err,
            RegistryError::AlreadyFetched {
                id,
                status: JobStatus::Running
            }
        );
    }

    #[tokio::test]
    async fn submit_without_fetch_is_rejected() {
        let registry = test_registry(0);
        let id = registry.register(json!([1])).await.unwrap();
        let err = registry
            .submit(id, Outcome::Ok(json!(1)), 0)
            .await
            .unwrap_err();
        assert_eq!(
            err,
            RegistryError::NotRunning {
                id,
                status: JobStatus::Waiting
            }
        );
    }

    #[tokio::test]
    async fn unknown_ids_are_rejected() {
        let registry = test_registry(0);
        assert_eq!(
            registry.fetch(7).await.unwrap_err(),
            RegistryError::UnknownJob(7)
        );
    }

    #[tokio::test]
    async fn map_finished_materializes_results_in_id_order() {
        let registry = test_registry(0);
        for i in 0..3i64 {
            registry.register(json!([i])).await.unwrap();
        }
        assert!(!registry.finished(FinishMode::Map).await.unwrap());

        // Complete out of order: 2, 0, 1.
        for id in [2u64, 0, 1] {
            registry.fetch(id).await.unwrap();
            registry
                .submit(id, Outcome::Ok(json!(id * id)), 10)
                .await
                .unwrap();
        }
        assert!(registry.finished(FinishMode::Map).await.unwrap());

        let results = registry.results().await.unwrap();
        let ids: Vec<JobId> = results.iter().map(|entry| entry.id).collect();
        assert_eq!(ids, vec![0, 1, 2]);
        assert_eq!(results[2].outcome, Outcome::Ok(json!(4)));
        assert_eq!(registry.status().await.unwrap().counts.done, 3);
    }

    #[tokio::test]
    async fn drain_delivers_in_arrival_order() {
        let registry = test_registry(0);
        for i in 0..2i64 {
            registry.register(json!([i])).await.unwrap();
        }
        registry.fetch(1).await.unwrap();
        registry.fetch(0).await.unwrap();
        registry.submit(1, Outcome::Ok(json!(1)), 0).await.unwrap();
        registry.submit(0, Outcome::Ok(json!(0)), 0).await.unwrap();

        let first = registry.drain(Duration::from_millis(50)).await.unwrap().unwrap();
        let second = registry.drain(Duration::from_millis(50)).await.unwrap().unwrap();
        assert_eq!((first.id, second.id), (1, 0));
    }

    #[tokio::test]
    async fn parked_drain_wakes_on_submit() {
        let registry = test_registry(0);
        let id = registry.register(json!([5])).await.unwrap();
        registry.fetch(id).await.unwrap();

        let drainer = registry.clone();
        let waiter = tokio::spawn(async move { drainer.drain(Duration::from_secs(5)).await });

        tokio::time::sleep(Duration::from_millis(50)).await;
        registry.submit(id, Outcome::Ok(json!(25)), 0).await.unwrap();

        let record = waiter.await.unwrap().unwrap().expect("woken with record");
        assert_eq!(record.id, id);
        assert_eq!(registry.status().await.unwrap().counts.done, 1);
    }

    #[tokio::test]
    async fn timed_out_drain_does_not_lose_records() {
        let registry = test_registry(0);
        let id = registry.register(json!([5])).await.unwrap();

        // Nothing stored yet: the drain parks and times out empty-handed.
        assert!(registry.drain(Duration::from_millis(50)).await.unwrap().is_none());

        registry.fetch(id).await.unwrap();
        registry.submit(id, Outcome::Ok(json!(25)), 0).await.unwrap();

        // The record submitted after the timeout is still delivered.
        let record = registry.drain(Duration::from_millis(500)).await.unwrap();
        assert_eq!(record.unwrap().id, id);
    }

    #[tokio::test]
    async fn stop_drops_later_submissions_silently() {
        let registry = test_registry(0);
        for i in 0..2i64 {
            registry.register(json!([i])).await.unwrap();
        }
        registry.fetch(0).await.unwrap();
        registry.fetch(1).await.unwrap();
        registry.submit(0, Outcome::Ok(json!(0)), 0).await.unwrap();

        registry.set_stopping().await.unwrap();
        let accepted = registry.submit(1, Outcome::Ok(json!(1)), 0).await.unwrap();
        assert!(!accepted);

        // The dropped job stays in a non-terminal state and the stored
        // result is untouched.
        let snap = registry.status().await.unwrap();
        assert_eq!(snap.counts.running, 1);
        assert_eq!(snap.counts.stored, 1);
        assert_eq!(registry.stored_count().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn status_reports_totals_and_summary() {
        let registry = test_registry(0);
        for i in 0..4i64 {
            registry.register(json!([i])).await.unwrap();
        }
        registry.fetch(0).await.unwrap();
        let snap = registry.status().await.unwrap();
        assert_eq!(snap.total, 4);
        assert_eq!(snap.counts.waiting, 3);
        assert_eq!(snap.counts.running, 1);
        assert_eq!(snap.summary, "[3 waiting|1 running]");
        assert_eq!(snap.ndone, 0);
    }

    #[tokio::test]
    async fn task_descriptor_carries_kind_and_bound() {
        let registry = spawn("resize".to_string(), "/data/run".to_string(), 8);
        let task = registry.task().await.unwrap();
        assert_eq!(task.kind, "resize");
        assert_eq!(task.workdir, "/data/run");
        assert_eq!(task.nqueue, 8);
    }

    #[tokio::test]
    async fn job_view_tracks_the_lifecycle_timestamps() {
        let registry = test_registry(0);
        let id = registry.register(json!([2])).await.unwrap();

        let view = registry.job(id).await.unwrap().unwrap();
        assert_eq!(view.status, JobStatus::Waiting);
        assert!(view.started_at.is_none());

        registry.fetch(id).await.unwrap();
        let view = registry.job(id).await.unwrap().unwrap();
        assert_eq!(view.status, JobStatus::Running);
        assert!(view.started_at.is_some());
        assert!(view.finished_at.is_none());

        registry.submit(id, Outcome::Ok(json!(4)), 35).await.unwrap();
        let view = registry.job(id).await.unwrap().unwrap();
        assert_eq!(view.status, JobStatus::Stored);
        assert!(view.finished_at.is_some());
        assert_eq!(view.elapsed_ms, Some(35));

        assert!(registry.job(99).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn counter_tracks_drained_outcomes_only() {
        let registry = test_registry(0);
        for i in 0..2i64 {
            registry.register(json!([i])).await.unwrap();
        }
        registry.fetch(0).await.unwrap();
        registry.submit(0, Outcome::Ok(json!(9)), 0).await.unwrap();
        assert!(registry.counter().await.unwrap().counts.is_empty());

        registry.drain(Duration::from_millis(50)).await.unwrap().unwrap();
        let counter = registry.counter().await.unwrap();
        assert_eq!(counter.counts.get("9"), Some(&1));
    }
}
