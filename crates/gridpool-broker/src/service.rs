//! Broker process entry: bind, publish the endpoint, serve until killed.

use std::io::Write as _;

use crate::{net, registry, server};

/// Run the broker for one map/imap run.
///
/// The endpoint URI is written to stdout as a single line; the parent
/// orchestrator reads it as the one-shot startup channel, so nothing else
/// may be printed there. Termination is by signal from the parent; the
/// serve loop has no shutdown path of its own.
pub async fn run(kind: String, nqueue: usize) -> anyhow::Result<()> {
    let ip = net::routable_ipv4()?;
    let listener = tokio::net::TcpListener::bind((ip, 0)).await?;
    let addr = listener.local_addr()?;
    let uri = format!("http://{addr}");

    println!("{uri}");
    std::io::stdout().flush()?;
    tracing::info!(%uri, kind, nqueue, "broker listening");

    let workdir = std::env::current_dir()?.display().to_string();
    let handle = registry::spawn(kind, workdir, nqueue);
    axum::serve(listener, server::router(handle)).await?;
    Ok(())
}
