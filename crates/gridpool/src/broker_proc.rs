//! The broker child process.
//!
//! Running the broker as a child process rather than a task is what makes
//! cancellation reliable: a stuck request handler can always be killed from
//! the orchestrator, and ctrl-c never leaves a request loop behind.

use std::process::Stdio;
use std::time::Duration;

use tokio::io::{AsyncBufReadExt as _, BufReader};
use tokio::process::{Child, Command};

use crate::role::MARKER;

/// How long the child gets to publish its endpoint URI.
const URI_DEADLINE: Duration = Duration::from_secs(10);

/// Why the broker child could not be started.
#[derive(Debug, thiserror::Error)]
pub(crate) enum SpawnError {
    /// Spawn or pipe plumbing failed.
    #[error("could not spawn broker process: {0}")]
    Io(#[from] std::io::Error),
    /// The child exited or closed stdout before publishing its URI.
    #[error("broker exited without publishing an endpoint")]
    NoUri,
    /// The published line was not an endpoint URI.
    #[error("broker published a malformed endpoint: {0:?}")]
    BadUri(String),
    /// The child did not publish within the deadline.
    #[error("broker did not publish an endpoint within {URI_DEADLINE:?}")]
    Timeout,
}

pub(crate) struct BrokerChild {
    child: Child,
}

impl BrokerChild {
    /// Spawn the broker role of the current executable and wait for the
    /// endpoint URI on its stdout.
    pub(crate) async fn spawn(kind: &str, nqueue: usize) -> Result<(Self, String), SpawnError> {
        let exe = std::env::current_exe()?;
        let mut child = Command::new(exe)
            .arg(MARKER)
            .arg("broker")
            .arg("--kind")
            .arg(kind)
            .arg("--nqueue")
            .arg(nqueue.to_string())
            .stdout(Stdio::piped())
            .kill_on_drop(true)
            .spawn()?;

        let stdout = child.stdout.take().ok_or(SpawnError::NoUri)?;
        let mut lines = BufReader::new(stdout).lines();
        let line = tokio::time::timeout(URI_DEADLINE, lines.next_line())
            .await
            .map_err(|_| SpawnError::Timeout)??
            .ok_or(SpawnError::NoUri)?;
        let uri = line.trim().to_string();
        if !uri.starts_with("http://") {
            let _ = child.start_kill();
            return Err(SpawnError::BadUri(uri));
        }
        Ok((Self { child }, uri))
    }

    /// Kill the broker and reap it. Idempotent with respect to an already
    /// dead child.
    pub(crate) async fn terminate(mut self) {
        let _ = self.child.start_kill();
        let _ = self.child.wait().await;
    }
}
