//! The fetch/execute/submit loop.

use std::io::Write as _;
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::Context as _;
use serde_json::Value;

use gridpool_core::client::BrokerClient;
use gridpool_core::job::{JobId, Outcome};
use gridpool_core::kinds::{KindRegistry, WorkKind};

use crate::assignment::Assignment;

/// How often a throttled worker re-checks the stored count.
const BACKPRESSURE_POLL: Duration = Duration::from_secs(2);

/// What happened over one worker invocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WorkerReport {
    /// Jobs this worker attempted.
    pub executed: usize,
    /// Jobs that ended in an `Err` outcome.
    pub failed: usize,
    /// Whether the worker was responsible for exactly one id.
    pub single: bool,
}

impl WorkerReport {
    /// Process exit code: non-zero only when the worker owned exactly one
    /// id and that id failed, so the scheduler's post-mortem view reflects
    /// the failure without discarding sibling results.
    pub fn exit_code(&self) -> i32 {
        if self.single && self.failed > 0 { 1 } else { 0 }
    }
}

/// Execute the assigned jobs against the broker at `broker_uri`.
///
/// Returns `Err` only for transport-level failures (broker unreachable,
/// workdir missing); per-job failures are reported as `Err` outcomes and
/// tallied in the report.
pub async fn run(
    kinds: &KindRegistry,
    broker_uri: &str,
    assignment: &Assignment,
) -> anyhow::Result<WorkerReport> {
    let client = BrokerClient::connect(broker_uri)?;
    let task = client
        .task()
        .await
        .with_context(|| format!("broker at {broker_uri} unreachable"))?;

    std::env::set_current_dir(&task.workdir)
        .with_context(|| format!("cannot change to working directory {}", task.workdir))?;

    let handler = kinds.get(&task.kind);
    if handler.is_none() {
        tracing::error!(kind = %task.kind, "work kind not registered in this binary");
    }

    let ids = assignment.job_ids();
    let mut report = WorkerReport {
        executed: 0,
        failed: 0,
        single: ids.len() == 1,
    };
    let host = gethostname::gethostname().to_string_lossy().into_owned();

    for &id in &ids {
        write_headers(&host, id);
        report.executed += 1;
        let started = Instant::now();

        let Some(handler) = handler.clone() else {
            let message = format!("work kind {:?} is not registered on this worker", task.kind);
            submit_failure(&client, id, message, started).await?;
            report.failed += 1;
            continue;
        };

        let args = match client.fetch(id).await {
            Ok(args) => args,
            Err(err) if err.is_protocol_violation() => {
                tracing::warn!(id, %err, "fetch rejected");
                submit_failure(&client, id, err.to_string(), started).await?;
                report.failed += 1;
                continue;
            }
            Err(err) => return Err(err.into()),
        };

        // Cooperative backpressure: do not start work that would overflow
        // the bounded result queue.
        if task.nqueue > 0 {
            while client.stored_count().await? as u64 >= task.nqueue {
                tokio::time::sleep(BACKPRESSURE_POLL).await;
            }
        }

        let outcome = execute(handler, args).await;
        if let Outcome::Err(message) = &outcome {
            eprintln!("{message}");
            report.failed += 1;
        }
        let elapsed_ms = started.elapsed().as_millis() as u64;
        client.submit(id, outcome, elapsed_ms).await?;
    }

    Ok(report)
}

/// Run the handler on a blocking thread, capturing failures and panics as
/// the job's reported outcome.
async fn execute(handler: Arc<dyn WorkKind>, args: Value) -> Outcome {
    match tokio::task::spawn_blocking(move || handler.call(args)).await {
        Ok(Ok(value)) => Outcome::Ok(value),
        Ok(Err(err)) => Outcome::Err(err.to_string()),
        Err(join) => {
            if join.is_panic() {
                Outcome::Err(format!("handler panicked: {}", panic_message(join)))
            } else {
                Outcome::Err("handler was cancelled".to_string())
            }
        }
    }
}

fn panic_message(join: tokio::task::JoinError) -> String {
    let payload = join.into_panic();
    if let Some(msg) = payload.downcast_ref::<&str>() {
        (*msg).to_string()
    } else if let Some(msg) = payload.downcast_ref::<String>() {
        msg.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

/// Report a per-job failure as the job's outcome. A conflict answer means
/// another worker already resolved the id; that is not this worker's error.
async fn submit_failure(
    client: &BrokerClient,
    id: JobId,
    message: String,
    started: Instant,
) -> anyhow::Result<()> {
    eprintln!("{message}");
    let elapsed_ms = started.elapsed().as_millis() as u64;
    match client.submit(id, Outcome::Err(message), elapsed_ms).await {
        Ok(_) => Ok(()),
        Err(err) if err.is_protocol_violation() => {
            tracing::warn!(id, %err, "failure report rejected");
            Ok(())
        }
        Err(err) => Err(err.into()),
    }
}

/// The per-job marker lines ops look for in the scheduler's log files.
fn write_headers(host: &str, id: JobId) {
    println!("### Output log on {host} (job {id}) ###");
    let _ = std::io::stdout().flush();
    eprintln!("### Error log on {host} (job {id}) ###");
    let _ = std::io::stderr().flush();
}
