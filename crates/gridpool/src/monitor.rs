//! Live monitor of a running broker's result counter.

use std::io::Write as _;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use chrono::Utc;
use crossterm::cursor::MoveTo;
use crossterm::event::{Event, KeyCode, KeyModifiers};
use crossterm::execute;
use crossterm::terminal::{Clear, ClearType, disable_raw_mode, enable_raw_mode};
use tokio::sync::mpsc;

use gridpool_core::client::BrokerClient;
use gridpool_core::wire::CounterSnapshot;

use crate::pool::fmt_hms;

const REFRESH: Duration = Duration::from_secs(2);

/// Attach to the broker at `broker_uri` and display its result counter
/// until `q` (or ctrl-c) is pressed or the broker goes away.
pub(crate) async fn run(broker_uri: &str) -> anyhow::Result<()> {
    let client = BrokerClient::connect(broker_uri)?;

    enable_raw_mode()?;
    let stop = Arc::new(AtomicBool::new(false));
    let (quit_tx, mut quit_rx) = mpsc::unbounded_channel::<()>();
    let input_stop = stop.clone();
    let input = std::thread::spawn(move || {
        while !input_stop.load(Ordering::Relaxed) {
            if !crossterm::event::poll(Duration::from_millis(200)).unwrap_or(false) {
                continue;
            }
            let Ok(event) = crossterm::event::read() else {
                continue;
            };
            if let Event::Key(key) = event {
                let quit = key.code == KeyCode::Char('q')
                    || (key.code == KeyCode::Char('c')
                        && key.modifiers.contains(KeyModifiers::CONTROL));
                if quit {
                    let _ = quit_tx.send(());
                    return;
                }
            }
        }
    });

    let result = watch(&client, broker_uri, &mut quit_rx).await;

    stop.store(true, Ordering::Relaxed);
    let _ = input.join();
    let _ = disable_raw_mode();
    println!();
    result
}

async fn watch(
    client: &BrokerClient,
    broker_uri: &str,
    quit_rx: &mut mpsc::UnboundedReceiver<()>,
) -> anyhow::Result<()> {
    let mut ticker = tokio::time::interval(REFRESH);
    loop {
        tokio::select! {
            _ = quit_rx.recv() => return Ok(()),
            _ = ticker.tick() => {
                match client.counter().await {
                    Ok(counter) => redraw(broker_uri, &counter)?,
                    Err(_) => {
                        write!(std::io::stdout(), "\r\nBroker has been terminated.\r\n")?;
                        return Ok(());
                    }
                }
            }
        }
    }
}

fn redraw(broker_uri: &str, counter: &CounterSnapshot) -> anyhow::Result<()> {
    let mut out = std::io::stdout();
    execute!(out, MoveTo(0, 0), Clear(ClearType::All))?;
    // Raw mode: carriage returns are not implied.
    write!(out, "Monitoring broker {broker_uri}...\r\n")?;
    write!(out, "Press q to quit\r\n\r\n")?;
    write!(out, "Last results obtained:\r\n")?;
    if counter.counts.is_empty() {
        write!(out, "(None)\r\n")?;
    }

    let mut entries: Vec<_> = counter.counts.iter().collect();
    entries.sort_by_key(|(signature, _)| counter.last_seen.get(*signature).copied());
    let now = Utc::now();
    for (signature, count) in entries {
        let ago = counter
            .last_seen
            .get(signature)
            .map(|seen| now.signed_duration_since(*seen).num_seconds().max(0) as u64)
            .unwrap_or(0);
        let times = if *count == 1 { "time" } else { "times" };
        write!(
            out,
            " {signature} ({count} {times}, latest {} ago)\r\n",
            fmt_hms(Duration::from_secs(ago))
        )?;
    }
    out.flush()?;
    Ok(())
}
