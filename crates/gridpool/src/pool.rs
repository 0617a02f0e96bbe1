//! The caller-facing pools: `map` and `imap_unordered` over a batch
//! scheduler.

use std::marker::PhantomData;
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;

use gridpool_core::client::{BrokerClient, BrokerError};
use gridpool_core::job::{JobId, Outcome};
use gridpool_core::kinds::KindRegistry;
use gridpool_core::wire::{FinishMode, ResultEntry};

use crate::broker_proc::BrokerChild;
use crate::mail;
use crate::progress::Progress;
use crate::submit::condor::{CondorConfig, CondorSubmitter};
use crate::submit::sge::{SgeConfig, SgeSubmitter};
use crate::submit::{SubmitContext, SubmitError, Submitter};

/// Cadence of the orchestrator's status poll.
const POLL: Duration = Duration::from_secs(2);

/// Pool behavior knobs shared by both schedulers.
#[derive(Debug, Clone)]
pub struct PoolOptions {
    /// Show a progress bar and the end-of-run timing block.
    pub progress: bool,
    /// Bound on queued results (imap only); 0 disables the bound.
    pub nqueue: usize,
    /// Send an end-of-run report to this address.
    pub email: Option<String>,
}

impl Default for PoolOptions {
    fn default() -> Self {
        Self {
            progress: true,
            nqueue: 0,
            email: None,
        }
    }
}

/// A job that completed with a reported error.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("job {id} failed: {message}")]
pub struct JobFailure {
    /// Dense job id (equals the input position).
    pub id: JobId,
    /// Failure description from the worker.
    pub message: String,
}

/// Why a run could not produce results.
#[derive(Debug, thiserror::Error)]
pub enum PoolError {
    /// The kind is not in the registry this pool was built with.
    #[error("work kind {0:?} is not registered")]
    UnknownKind(String),
    /// `map` requires the result queue to be unbounded.
    #[error("map is incompatible with a bounded result queue (nqueue = {0}); use imap_unordered")]
    NqueueWithMap(usize),
    /// Ctrl-c; the broker was torn down before returning.
    #[error("run interrupted")]
    Interrupted,
    /// An input failed to serialize.
    #[error("could not encode job arguments: {0}")]
    Encode(#[source] serde_json::Error),
    /// A result failed to deserialize into the requested type.
    #[error("could not decode the result of job {0}: {1}")]
    Decode(JobId, #[source] serde_json::Error),
    /// The materialized result vector had a hole; indicates a broker bug.
    #[error("job {0} is missing from the result set")]
    MissingResult(JobId),
    /// Talking to the broker failed.
    #[error(transparent)]
    Broker(#[from] BrokerError),
    /// The broker child process could not be started.
    #[error("could not start the broker: {0}")]
    BrokerSpawn(String),
    /// The scheduler submit step failed.
    #[error(transparent)]
    Submit(#[from] SubmitError),
}

/// A pool of jobs dispatched through submitter `S`.
pub struct Pool<S> {
    kinds: Arc<KindRegistry>,
    submitter: S,
    options: PoolOptions,
}

/// Pool submitting through HTCondor.
pub type CondorPool = Pool<CondorSubmitter>;

/// Pool submitting through SGE/PBS `qsub`.
pub type SgePool = Pool<SgeSubmitter>;

impl CondorPool {
    /// HTCondor pool with default options.
    pub fn condor(kinds: Arc<KindRegistry>, config: CondorConfig) -> Self {
        Self::new(kinds, CondorSubmitter::new(config), PoolOptions::default())
    }
}

impl SgePool {
    /// SGE/PBS pool with default options.
    pub fn sge(kinds: Arc<KindRegistry>, config: SgeConfig) -> Self {
        Self::new(kinds, SgeSubmitter::new(config), PoolOptions::default())
    }
}

impl<S: Submitter> Pool<S> {
    /// Pool over an arbitrary submitter.
    pub fn new(kinds: Arc<KindRegistry>, submitter: S, options: PoolOptions) -> Self {
        Self {
            kinds,
            submitter,
            options,
        }
    }

    /// Replace the options.
    pub fn with_options(mut self, options: PoolOptions) -> Self {
        self.options = options;
        self
    }

    /// Apply `kind` to every input and collect the outcomes in input
    /// order.
    ///
    /// Blocks (asynchronously) until every job has finished. An `Err`
    /// element is a job whose handler failed; it does not abort the run
    /// and is never retried.
    pub async fn map<A, R>(
        &self,
        kind: &str,
        inputs: impl IntoIterator<Item = A>,
    ) -> Result<Vec<Result<R, JobFailure>>, PoolError>
    where
        A: Serialize,
        R: DeserializeOwned,
    {
        let args = encode_inputs(inputs)?;
        if args.is_empty() {
            return Ok(Vec::new());
        }
        if !self.kinds.contains(kind) {
            return Err(PoolError::UnknownKind(kind.to_string()));
        }
        if self.options.nqueue > 0 {
            return Err(PoolError::NqueueWithMap(self.options.nqueue));
        }

        let run = self.start_run(kind, &args).await?;
        let result = drive_map(&run.client, args.len(), &self.options).await;
        run.broker.terminate().await;
        match result {
            Ok(entries) => decode_entries(entries, args.len()),
            Err(PoolError::Interrupted) => {
                eprintln!("interrupted!");
                Err(PoolError::Interrupted)
            }
            Err(err) => Err(err),
        }
    }

    /// Apply `kind` to every input, yielding outcomes as they become
    /// available, in completion order.
    pub async fn imap_unordered<A, R>(
        &self,
        kind: &str,
        inputs: impl IntoIterator<Item = A>,
    ) -> Result<UnorderedResults<R>, PoolError>
    where
        A: Serialize,
        R: DeserializeOwned,
    {
        let args = encode_inputs(inputs)?;
        if args.is_empty() {
            return Ok(UnorderedResults::empty());
        }
        if !self.kinds.contains(kind) {
            return Err(PoolError::UnknownKind(kind.to_string()));
        }

        let run = self.start_run(kind, &args).await?;
        Ok(UnorderedResults::from_parts(
            run.client,
            Some(run.broker),
            args.len(),
            self.options.progress,
        ))
    }

    /// Spawn the broker child, register every job, and submit to the
    /// scheduler. Any failure tears the broker down before returning.
    async fn start_run(&self, kind: &str, args: &[Value]) -> Result<Run, PoolError> {
        let exe =
            std::env::current_exe().map_err(|err| PoolError::BrokerSpawn(err.to_string()))?;
        println!("Map kind {kind:?} with executable {exe:?}");

        let (broker, uri) = BrokerChild::spawn(kind, self.options.nqueue)
            .await
            .map_err(|err| PoolError::BrokerSpawn(err.to_string()))?;
        tracing::debug!(%uri, kind, "broker child ready");

        let client = match BrokerClient::connect(&uri) {
            Ok(client) => client,
            Err(err) => {
                broker.terminate().await;
                return Err(err.into());
            }
        };
        for value in args {
            if let Err(err) = client.register(value).await {
                broker.terminate().await;
                return Err(err.into());
            }
        }

        let ctx = SubmitContext {
            broker_uri: uri,
            njobs: args.len(),
            exe,
        };
        if let Err(err) = self.submitter.submit(&ctx).await {
            broker.terminate().await;
            return Err(err.into());
        }
        Ok(Run { broker, client })
    }
}

struct Run {
    broker: BrokerChild,
    client: BrokerClient,
}

/// Poll until every job is done in map mode, then fetch the materialized
/// results.
async fn drive_map(
    client: &BrokerClient,
    total: usize,
    options: &PoolOptions,
) -> Result<Vec<ResultEntry>, PoolError> {
    let started = Instant::now();
    let pbar = Progress::new(total, options.progress);
    pbar.update(0, "starting...");

    let mut poll = tokio::time::interval(POLL);
    poll.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
    loop {
        tokio::select! {
            _ = poll.tick() => {
                if client.finished(FinishMode::Map).await? {
                    break;
                }
                let snap = client.status().await?;
                pbar.update(snap.ndone, &snap.summary);
            }
            _ = tokio::signal::ctrl_c() => {
                pbar.abandon();
                let _ = client.stop().await;
                return Err(PoolError::Interrupted);
            }
        }
    }
    pbar.finish();

    let snap = client.status().await?;
    if let Some(dest) = &options.email {
        send_report(dest, client).await;
    }
    if options.progress {
        let elapsed = started.elapsed();
        let cumulated = Duration::from_millis(snap.total_time_ms);
        println!("Elapsed time: {}", fmt_hms(elapsed));
        println!("Cumulated time: {}", fmt_hms(cumulated));
        println!("Ratio is {:.2}", ratio(cumulated, elapsed));
        if total > 0 {
            println!("Average running time: {}", fmt_hms(cumulated / total as u32));
        }
    }

    Ok(client.results().await?)
}

async fn send_report(dest: &str, client: &BrokerClient) {
    let counter = match client.counter().await {
        Ok(counter) => counter,
        Err(err) => {
            eprintln!("warning: could not fetch the result counter: {err:#}");
            return;
        }
    };
    let dest = dest.to_string();
    match tokio::task::spawn_blocking(move || mail::send_report(&dest, &counter)).await {
        Ok(Ok(())) => {}
        Ok(Err(err)) => eprintln!("warning: could not send the report e-mail: {err:#}"),
        Err(err) => eprintln!("warning: report e-mail task failed: {err}"),
    }
}

fn encode_inputs<A: Serialize>(
    inputs: impl IntoIterator<Item = A>,
) -> Result<Vec<Value>, PoolError> {
    inputs
        .into_iter()
        .map(|input| serde_json::to_value(input).map_err(PoolError::Encode))
        .collect()
}

/// Turn the id-ordered entries into the caller's result vector.
fn decode_entries<R: DeserializeOwned>(
    entries: Vec<ResultEntry>,
    total: usize,
) -> Result<Vec<Result<R, JobFailure>>, PoolError> {
    let mut out = Vec::with_capacity(total);
    let mut expected: JobId = 0;
    for entry in entries {
        let id = entry.id;
        if id != expected {
            return Err(PoolError::MissingResult(expected));
        }
        expected += 1;
        match entry.outcome {
            Outcome::Ok(value) => out.push(
                serde_json::from_value::<R>(value)
                    .map(Ok)
                    .map_err(|err| PoolError::Decode(id, err))?,
            ),
            Outcome::Err(message) => out.push(Err(JobFailure { id, message })),
        }
    }
    if out.len() != total {
        return Err(PoolError::MissingResult(out.len() as JobId));
    }
    Ok(out)
}

pub(crate) fn fmt_hms(duration: Duration) -> String {
    let secs = duration.as_secs();
    format!("{}:{:02}:{:02}", secs / 3600, (secs % 3600) / 60, secs % 60)
}

fn ratio(cumulated: Duration, elapsed: Duration) -> f64 {
    cumulated.as_secs_f64() / elapsed.as_secs_f64().max(f64::EPSILON)
}

/// Lazily yields the outcomes of an `imap_unordered` run.
///
/// Dropping this mid-run kills the broker child (best effort); calling
/// [`UnorderedResults::next`] to exhaustion tears it down cleanly and
/// prints the timing block.
pub struct UnorderedResults<R> {
    inner: Option<Imap>,
    _results: PhantomData<fn() -> R>,
}

struct Imap {
    client: BrokerClient,
    broker: Option<BrokerChild>,
    pbar: Progress,
    progress: bool,
    started: Instant,
}

enum Step {
    Record(gridpool_core::job::ResultRecord),
    Finished { total_time_ms: u64 },
}

enum Polled {
    Step(Result<Step, PoolError>),
    Interrupted,
}

impl<R: DeserializeOwned> UnorderedResults<R> {
    /// The next available outcome; `Ok(None)` once every job has been
    /// yielded.
    pub async fn next(&mut self) -> Result<Option<Result<R, JobFailure>>, PoolError> {
        if self.inner.is_none() {
            return Ok(None);
        }

        let polled = {
            let imap = self.inner.as_mut().expect("checked above");
            tokio::select! {
                step = imap.advance() => Polled::Step(step),
                _ = tokio::signal::ctrl_c() => Polled::Interrupted,
            }
        };

        match polled {
            Polled::Interrupted => {
                if let Some(imap) = self.inner.take() {
                    let _ = imap.client.stop().await;
                    imap.pbar.abandon();
                    if let Some(broker) = imap.broker {
                        broker.terminate().await;
                    }
                }
                eprintln!("interrupted!");
                Err(PoolError::Interrupted)
            }
            Polled::Step(Ok(Step::Record(record))) => {
                let id = record.id;
                match record.outcome {
                    Outcome::Ok(value) => match serde_json::from_value::<R>(value) {
                        Ok(result) => Ok(Some(Ok(result))),
                        Err(err) => {
                            self.teardown().await;
                            Err(PoolError::Decode(id, err))
                        }
                    },
                    Outcome::Err(message) => Ok(Some(Err(JobFailure { id, message }))),
                }
            }
            Polled::Step(Ok(Step::Finished { total_time_ms })) => {
                let imap = self.inner.take().expect("checked above");
                imap.pbar.finish();
                if imap.progress {
                    let elapsed = imap.started.elapsed();
                    let cumulated = Duration::from_millis(total_time_ms);
                    println!("Total time: {}", fmt_hms(elapsed));
                    println!("Total CPU time: {}", fmt_hms(cumulated));
                    println!("Ratio is {:.2}", ratio(cumulated, elapsed));
                }
                if let Some(broker) = imap.broker {
                    broker.terminate().await;
                }
                Ok(None)
            }
            Polled::Step(Err(err)) => {
                self.teardown().await;
                Err(err)
            }
        }
    }

    fn empty() -> Self {
        Self {
            inner: None,
            _results: PhantomData,
        }
    }

    fn from_parts(
        client: BrokerClient,
        broker: Option<BrokerChild>,
        total: usize,
        progress: bool,
    ) -> Self {
        let pbar = Progress::new(total, progress);
        pbar.update(0, "starting...");
        Self {
            inner: Some(Imap {
                client,
                broker,
                pbar,
                progress,
                started: Instant::now(),
            }),
            _results: PhantomData,
        }
    }

    async fn teardown(&mut self) {
        if let Some(imap) = self.inner.take() {
            imap.pbar.abandon();
            if let Some(broker) = imap.broker {
                broker.terminate().await;
            }
        }
    }
}

impl Imap {
    /// One turn of the imap poll loop: the next stored record, or the
    /// completion marker.
    async fn advance(&mut self) -> Result<Step, PoolError> {
        loop {
            if self.client.finished(FinishMode::Imap).await? {
                let snap = self.client.status().await?;
                return Ok(Step::Finished {
                    total_time_ms: snap.total_time_ms,
                });
            }
            let snap = self.client.status().await?;
            self.pbar.update(snap.ndone, &snap.summary);
            if snap.counts.stored > 0 {
                if let Some(record) = self.client.drain(POLL).await? {
                    return Ok(Step::Record(record));
                }
            } else {
                tokio::time::sleep(POLL).await;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use gridpool_worker::Assignment;
    use serde_json::json;

    fn test_kinds() -> Arc<KindRegistry> {
        let mut kinds = KindRegistry::new();
        kinds.register("square", |x: i64| Ok(x * x));
        kinds.register("add", |(x, y): (i64, i64)| Ok(x + y));
        kinds.register("square_fail_3", |x: i64| {
            if x == 3 {
                anyhow::bail!("cannot handle 3");
            }
            Ok(x * x)
        });
        kinds.register("slow_square", |x: i64| {
            std::thread::sleep(Duration::from_millis(x as u64 * 40));
            Ok(x * x)
        });
        Arc::new(kinds)
    }

    /// In-process stand-in for the broker child: same registry, same
    /// router, bound to loopback.
    async fn start_broker(kind: &str, nqueue: usize) -> String {
        let workdir = std::env::current_dir().unwrap().display().to_string();
        let handle = gridpool_broker::registry::spawn(kind.to_string(), workdir, nqueue);
        let listener = tokio::net::TcpListener::bind(("127.0.0.1", 0)).await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let _ = axum::serve(listener, gridpool_broker::server::router(handle)).await;
        });
        format!("http://{addr}")
    }

    async fn register_ints(client: &BrokerClient, inputs: impl IntoIterator<Item = i64>) -> usize {
        let mut total = 0;
        for input in inputs {
            client.register(&json!(input)).await.unwrap();
            total += 1;
        }
        total
    }

    fn spawn_worker(
        kinds: &Arc<KindRegistry>,
        uri: &str,
        ids: Vec<JobId>,
    ) -> tokio::task::JoinHandle<gridpool_worker::WorkerReport> {
        let kinds = kinds.clone();
        let uri = uri.to_string();
        tokio::spawn(async move {
            gridpool_worker::run(&kinds, &uri, &Assignment::Explicit(ids))
                .await
                .unwrap()
        })
    }

    fn quiet() -> PoolOptions {
        PoolOptions {
            progress: false,
            ..PoolOptions::default()
        }
    }

    #[tokio::test]
    async fn map_squares_come_back_in_input_order() {
        let kinds = test_kinds();
        let uri = start_broker("square", 0).await;
        let client = BrokerClient::connect(&uri).unwrap();
        let total = register_ints(&client, 0..5).await;
        let worker = spawn_worker(&kinds, &uri, (0..5).collect());

        let entries = drive_map(&client, total, &quiet()).await.unwrap();
        let results: Vec<Result<i64, JobFailure>> = decode_entries(entries, total).unwrap();
        let values: Vec<i64> = results.into_iter().map(Result::unwrap).collect();
        assert_eq!(values, vec![0, 1, 4, 9, 16]);

        let report = worker.await.unwrap();
        assert_eq!(report.executed, 5);
        assert_eq!(report.failed, 0);
        assert_eq!(report.exit_code(), 0);
    }

    #[tokio::test]
    async fn map_zips_two_argument_tuples() {
        let kinds = test_kinds();
        let uri = start_broker("add", 0).await;
        let client = BrokerClient::connect(&uri).unwrap();
        for pair in (0..5i64).zip(5..10i64) {
            client.register(&serde_json::to_value(pair).unwrap()).await.unwrap();
        }
        let worker = spawn_worker(&kinds, &uri, (0..5).collect());

        let entries = drive_map(&client, 5, &quiet()).await.unwrap();
        let results: Vec<Result<i64, JobFailure>> = decode_entries(entries, 5).unwrap();
        let values: Vec<i64> = results.into_iter().map(Result::unwrap).collect();
        assert_eq!(values, vec![5, 7, 9, 11, 13]);
        worker.await.unwrap();
    }

    #[tokio::test]
    async fn imap_yields_every_result_regardless_of_order() {
        let kinds = test_kinds();
        let uri = start_broker("slow_square", 0).await;
        let client = BrokerClient::connect(&uri).unwrap();
        let total = register_ints(&client, 0..10).await;

        // Four workers of uneven speed.
        let mut workers = Vec::new();
        for ids in [vec![0, 1, 2], vec![3, 4, 5], vec![6, 7, 8], vec![9]] {
            workers.push(spawn_worker(&kinds, &uri, ids));
        }

        let mut stream: UnorderedResults<i64> =
            UnorderedResults::from_parts(client, None, total, false);
        let mut sum = 0;
        let mut count = 0;
        while let Some(result) = stream.next().await.unwrap() {
            sum += result.unwrap();
            count += 1;
        }
        assert_eq!(count, 10);
        assert_eq!(sum, 285);
        for worker in workers {
            worker.await.unwrap();
        }
    }

    #[tokio::test]
    async fn bounded_queue_throttles_workers_without_losing_results() {
        let kinds = test_kinds();
        let nqueue = 2;
        let uri = start_broker("square", nqueue).await;
        let client = BrokerClient::connect(&uri).unwrap();
        let total = register_ints(&client, 0..10).await;

        // One producer: the cooperative check is strict for a single
        // worker, so the bound is never exceeded at any observable instant.
        let worker = spawn_worker(&kinds, &uri, (0..10).collect());

        // Slow consumer: drain at most one record per turn while checking
        // the bound.
        let mut drained = 0;
        while !client.finished(FinishMode::Imap).await.unwrap() {
            let stored = client.stored_count().await.unwrap();
            assert!(stored <= nqueue, "stored count {stored} exceeded the bound");
            if stored > 0 {
                if let Some(record) = client.drain(Duration::from_millis(200)).await.unwrap() {
                    assert!(!record.outcome.is_err());
                    drained += 1;
                }
            } else {
                tokio::time::sleep(Duration::from_millis(100)).await;
            }
        }
        assert_eq!(drained, total);
        worker.await.unwrap();
    }

    #[tokio::test]
    async fn failing_jobs_are_reported_not_retried() {
        let kinds = test_kinds();
        let uri = start_broker("square_fail_3", 0).await;
        let client = BrokerClient::connect(&uri).unwrap();
        let total = register_ints(&client, 0..5).await;
        let worker = spawn_worker(&kinds, &uri, (0..5).collect());

        let entries = drive_map(&client, total, &quiet()).await.unwrap();
        let results: Vec<Result<i64, JobFailure>> = decode_entries(entries, total).unwrap();
        assert_eq!(results[0], Ok(0));
        assert_eq!(results[1], Ok(1));
        assert_eq!(results[2], Ok(4));
        let failure = results[3].as_ref().unwrap_err();
        assert_eq!(failure.id, 3);
        assert!(failure.message.contains("cannot handle 3"));
        assert_eq!(results[4], Ok(16));

        let report = worker.await.unwrap();
        assert_eq!(report.failed, 1);
        // More than one id: siblings' results outweigh the failure.
        assert_eq!(report.exit_code(), 0);
    }

    #[tokio::test]
    async fn single_failed_id_makes_the_worker_exit_nonzero() {
        let kinds = test_kinds();
        let uri = start_broker("square_fail_3", 0).await;
        let client = BrokerClient::connect(&uri).unwrap();
        register_ints(&client, [3]).await;

        let report = gridpool_worker::run(
            &kinds,
            &uri,
            &Assignment::Explicit(vec![0]),
        )
        .await
        .unwrap();
        assert_eq!(report.failed, 1);
        assert!(report.single);
        assert_eq!(report.exit_code(), 1);
    }

    #[tokio::test]
    async fn refetched_id_is_reported_as_a_protocol_failure() {
        let kinds = test_kinds();
        let uri = start_broker("square", 0).await;
        let client = BrokerClient::connect(&uri).unwrap();
        register_ints(&client, [6]).await;

        let first = spawn_worker(&kinds, &uri, vec![0]).await.unwrap();
        assert_eq!(first.failed, 0);

        // A scheduler retry of the same id: the fetch is refused and the
        // worker reports it, exiting non-zero since it owned only that id.
        let second = gridpool_worker::run(&kinds, &uri, &Assignment::Explicit(vec![0]))
            .await
            .unwrap();
        assert_eq!(second.failed, 1);
        assert_eq!(second.exit_code(), 1);

        // The first worker's result is intact.
        let record = client.drain(Duration::from_millis(200)).await.unwrap().unwrap();
        assert_eq!(record.outcome, Outcome::Ok(json!(36)));
    }

    #[tokio::test]
    async fn unregistered_kind_fails_every_assigned_job() {
        let kinds = test_kinds();
        let uri = start_broker("cube", 0).await;
        let client = BrokerClient::connect(&uri).unwrap();
        let total = register_ints(&client, 0..2).await;

        let report = gridpool_worker::run(&kinds, &uri, &Assignment::Explicit(vec![0, 1]))
            .await
            .unwrap();
        assert_eq!(report.failed, 2);
        assert_eq!(report.exit_code(), 0);

        let mut failures = 0;
        for _ in 0..total {
            let record = client.drain(Duration::from_millis(200)).await.unwrap().unwrap();
            assert!(record.outcome.is_err());
            failures += 1;
        }
        assert_eq!(failures, 2);
    }

    #[tokio::test]
    async fn empty_input_short_circuits_without_a_broker() {
        let kinds = test_kinds();
        let pool = CondorPool::condor(kinds, CondorConfig::default());
        let results: Vec<Result<i64, JobFailure>> =
            pool.map("square", Vec::<i64>::new()).await.unwrap();
        assert!(results.is_empty());

        let mut stream = pool
            .imap_unordered::<i64, i64>("square", Vec::<i64>::new())
            .await
            .unwrap();
        assert!(stream.next().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn map_rejects_unknown_kinds_and_bounded_queues_up_front() {
        let kinds = test_kinds();
        let pool = CondorPool::condor(kinds.clone(), CondorConfig::default());
        let err = pool.map::<i64, i64>("cube", 0..3).await.unwrap_err();
        assert!(matches!(err, PoolError::UnknownKind(kind) if kind == "cube"));

        let pool = pool.with_options(PoolOptions {
            nqueue: 4,
            progress: false,
            email: None,
        });
        let err = pool.map::<i64, i64>("square", 0..3).await.unwrap_err();
        assert!(matches!(err, PoolError::NqueueWithMap(4)));
    }

    #[test]
    fn hms_formatting() {
        assert_eq!(fmt_hms(Duration::from_secs(0)), "0:00:00");
        assert_eq!(fmt_hms(Duration::from_secs(75)), "0:01:15");
        assert_eq!(fmt_hms(Duration::from_secs(3723)), "1:02:03");
    }

    #[test]
    fn decode_detects_holes() {
        let entries = vec![ResultEntry {
            id: 1,
            outcome: Outcome::Ok(json!(1)),
        }];
        let err = decode_entries::<i64>(entries, 2).unwrap_err();
        assert!(matches!(err, PoolError::MissingResult(0)));
    }
}
