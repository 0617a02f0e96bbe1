//! Submission adapters: turn a registered job set into a batch-scheduler
//! submission artifact and hand it to the scheduler's submit command.

use std::path::PathBuf;
use std::time::Duration;

pub mod condor;
pub mod sge;

/// Pause after a successful submit before the orchestrator starts polling.
const SETTLE: Duration = Duration::from_secs(3);

/// Everything an adapter needs to submit one run.
#[derive(Debug, Clone)]
pub struct SubmitContext {
    /// Endpoint of the broker workers will connect to.
    pub broker_uri: String,
    /// Number of registered jobs.
    pub njobs: usize,
    /// Executable the scheduler launches (the user binary itself).
    pub exe: PathBuf,
}

/// Why a submission failed. Any failure tears the broker down; nothing was
/// reliably enqueued.
#[derive(Debug, thiserror::Error)]
pub enum SubmitError {
    /// Writing the artifact or creating the log directory failed.
    #[error("could not prepare submission: {0}")]
    Io(#[from] std::io::Error),
    /// The submit command itself could not be started.
    #[error("could not run {command}: {source}")]
    Spawn {
        /// Command line that failed.
        command: String,
        /// Underlying error.
        source: std::io::Error,
    },
    /// The submit command exited non-zero.
    #[error("{command} failed with {status}")]
    CommandFailed {
        /// Command line that failed.
        command: String,
        /// Its exit status.
        status: std::process::ExitStatus,
    },
}

/// A batch-scheduler adapter.
#[allow(async_fn_in_trait)]
pub trait Submitter: Send + Sync {
    /// Write the submission artifact and invoke the scheduler's submit
    /// command. The artifact lives in a scoped temporary location and is
    /// removed whether or not the submit succeeded.
    async fn submit(&self, ctx: &SubmitContext) -> Result<(), SubmitError>;
}

/// Jobs per scheduler task: an explicit `ngroups` overrides `groupsize` by
/// dividing the job count.
pub(crate) fn effective_groupsize(njobs: usize, groupsize: usize, ngroups: Option<usize>) -> usize {
    match ngroups {
        Some(n) if n > 0 => njobs.div_ceil(n).max(1),
        _ => groupsize.max(1),
    }
}

/// Partition `0..njobs` into groups of `groupsize` consecutive ids.
pub(crate) fn id_groups(njobs: usize, groupsize: usize) -> Vec<Vec<usize>> {
    (0..njobs)
        .collect::<Vec<_>>()
        .chunks(groupsize.max(1))
        .map(|chunk| chunk.to_vec())
        .collect()
}

/// Environment forwarded from the submitting host to the workers. Missing
/// variables default to empty strings.
#[derive(Debug, Clone, Default)]
pub(crate) struct EnvPassthrough {
    pub(crate) path: String,
    pub(crate) ld_library_path: String,
    pub(crate) rust_log: String,
}

impl EnvPassthrough {
    pub(crate) fn capture() -> Self {
        let var = |name: &str| std::env::var(name).unwrap_or_default();
        Self {
            path: var("PATH"),
            ld_library_path: var("LD_LIBRARY_PATH"),
            rust_log: var("RUST_LOG"),
        }
    }
}

/// Run a scheduler submit command, mapping failures onto [`SubmitError`].
pub(crate) async fn run_submit_command(
    program: &str,
    args: &[&str],
) -> Result<(), SubmitError> {
    let command = std::iter::once(program)
        .chain(args.iter().copied())
        .collect::<Vec<_>>()
        .join(" ");
    let status = tokio::process::Command::new(program)
        .args(args)
        .status()
        .await
        .map_err(|source| SubmitError::Spawn {
            command: command.clone(),
            source,
        })?;
    if !status.success() {
        return Err(SubmitError::CommandFailed { command, status });
    }
    tokio::time::sleep(SETTLE).await;
    Ok(())
}
