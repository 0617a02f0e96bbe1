//! Optional end-of-run report e-mail.

use lettre::{Message, SmtpTransport, Transport as _};

use gridpool_core::wire::CounterSnapshot;

/// Send a plain-text summary of the result counter through the local SMTP
/// relay, the traditional cluster-host mail path.
pub(crate) fn send_report(dest: &str, counter: &CounterSnapshot) -> anyhow::Result<()> {
    let mut body = format!("Jobs finished at {}\n\n", chrono::Local::now());
    for (signature, count) in &counter.counts {
        body.push_str(&format!("{signature}: {count} times\n"));
    }

    let email = Message::builder()
        .from("gridpool@localhost".parse()?)
        .to(dest.parse()?)
        .subject("[gridpool] jobs done")
        .body(body)?;

    let mailer = SmtpTransport::builder_dangerous("localhost").build();
    mailer.send(&email)?;
    println!("report e-mail sent to {dest}");
    Ok(())
}
