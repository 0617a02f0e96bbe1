//! Embedded role dispatch.
//!
//! The scheduler and the broker spawn re-run the *user's* binary with a
//! marker argv prefix; [`run_role`] turns such a copy into the requested
//! role before any of the user's own code runs.

use clap::{Parser, Subcommand};

use gridpool_core::kinds::KindRegistry;
use gridpool_worker::Assignment;

/// First argv element of a role invocation. Kept out of the user's normal
/// CLI namespace.
pub(crate) const MARKER: &str = "__gridpool";

#[derive(Debug, Parser)]
#[command(name = "gridpool", about = "gridpool embedded roles")]
struct RoleCli {
    #[command(subcommand)]
    role: Role,
}

#[derive(Debug, Subcommand)]
enum Role {
    /// Execute assigned jobs against a running broker.
    Worker {
        /// Broker endpoint, e.g. `http://10.0.0.7:41273`.
        broker_uri: String,
        /// `C` (explicit id list) or `A` (array task).
        mode: String,
        /// Ids for `C`; `<array_index> <groupsize> <total>` for `A`.
        args: Vec<u64>,
    },
    /// Serve the jobs registry for one run.
    Broker {
        /// Work kind workers will execute.
        #[arg(long)]
        kind: String,
        /// Result-queue bound; 0 disables it.
        #[arg(long, default_value_t = 0)]
        nqueue: usize,
    },
    /// Watch a running broker's result counter.
    Monitor {
        /// Broker endpoint.
        broker_uri: String,
    },
}

/// Run an embedded role if this process was started as one.
///
/// Returns `Ok(None)` when the process is a plain orchestrator and the
/// caller should continue; otherwise the role has completed and the caller
/// must exit with the returned code. Call this before any of your own CLI
/// handling.
pub async fn run_role(kinds: &KindRegistry) -> anyhow::Result<Option<i32>> {
    let mut argv = std::env::args();
    let _program = argv.next();
    if argv.next().as_deref() != Some(MARKER) {
        return Ok(None);
    }

    init_tracing();

    let cli = match RoleCli::try_parse_from(std::iter::once(MARKER.to_string()).chain(argv)) {
        Ok(cli) => cli,
        Err(err) => {
            let _ = err.print();
            return Ok(Some(2));
        }
    };

    let code = match cli.role {
        Role::Worker {
            broker_uri,
            mode,
            args,
        } => {
            let assignment = match parse_assignment(&mode, &args) {
                Ok(assignment) => assignment,
                Err(message) => {
                    eprintln!("{message}");
                    return Ok(Some(2));
                }
            };
            match gridpool_worker::run(kinds, &broker_uri, &assignment).await {
                Ok(report) => report.exit_code(),
                Err(err) => {
                    eprintln!("worker failed: {err:#}");
                    1
                }
            }
        }
        Role::Broker { kind, nqueue } => match gridpool_broker::service::run(kind, nqueue).await {
            Ok(()) => 0,
            Err(err) => {
                eprintln!("broker failed: {err:#}");
                1
            }
        },
        Role::Monitor { broker_uri } => match crate::monitor::run(&broker_uri).await {
            Ok(()) => 0,
            Err(err) => {
                eprintln!("monitor failed: {err:#}");
                1
            }
        },
    };
    Ok(Some(code))
}

fn parse_assignment(mode: &str, args: &[u64]) -> Result<Assignment, String> {
    match mode {
        "C" => Ok(Assignment::Explicit(args.to_vec())),
        "A" => match args {
            [index, groupsize, total] => Ok(Assignment::Array {
                index: *index,
                groupsize: *groupsize,
                total: *total,
            }),
            _ => Err("worker A mode expects <array_index> <groupsize> <total>".to_string()),
        },
        other => Err(format!("unknown worker mode {other:?} (expected C or A)")),
    }
}

fn init_tracing() {
    use tracing_subscriber::EnvFilter;

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    // stdout stays clean: the broker publishes its URI there.
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn explicit_mode_keeps_the_id_list() {
        let assignment = parse_assignment("C", &[4, 7, 9]).unwrap();
        assert_eq!(assignment, Assignment::Explicit(vec![4, 7, 9]));
    }

    #[test]
    fn array_mode_needs_exactly_three_values() {
        let assignment = parse_assignment("A", &[2, 5, 14]).unwrap();
        assert_eq!(
            assignment,
            Assignment::Array {
                index: 2,
                groupsize: 5,
                total: 14
            }
        );
        assert!(parse_assignment("A", &[2, 5]).is_err());
        assert!(parse_assignment("A", &[2, 5, 14, 1]).is_err());
    }

    #[test]
    fn unknown_modes_are_rejected() {
        assert!(parse_assignment("Q", &[1]).is_err());
    }
}
