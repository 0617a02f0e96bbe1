#![forbid(unsafe_code)]
#![deny(unreachable_pub)]

//! Map a registered work-kind over inputs, fanned out across an HTCondor or
//! SGE/PBS cluster.
//!
//! `map` behaves like the built-in map but executes each element on a
//! remote worker started by the batch scheduler; `imap_unordered` returns
//! results as they become available instead of waiting for all of them.
//!
//! A process-local *broker* (spawned as a child process) holds the job
//! registry for the duration of one run. Workers connect to it over HTTP,
//! fetch the kind name and their arguments, execute, and push outcomes
//! back. The same user binary plays every part: [`run_role`] turns a
//! scheduler-started copy of it into a worker (or the broker child, or a
//! monitor) before any orchestration code runs.
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use gridpool::{CondorConfig, CondorPool, KindRegistry};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let mut kinds = KindRegistry::new();
//!     kinds.register("square", |x: i64| Ok(x * x));
//!     let kinds = Arc::new(kinds);
//!
//!     // Scheduler-started copies of this binary become workers here.
//!     if let Some(code) = gridpool::run_role(&kinds).await? {
//!         std::process::exit(code);
//!     }
//!
//!     let pool = CondorPool::condor(kinds, CondorConfig::default());
//!     let results = pool.map::<i64, i64>("square", 0..5).await?;
//!     for result in results {
//!         println!("{result:?}");
//!     }
//!     Ok(())
//! }
//! ```
//!
//! The handler must be registered under the same name in every copy of the
//! binary, and `run_role` must run before any of your own CLI handling so
//! that scheduler-started copies never fall through into the orchestrator
//! path.

mod broker_proc;
mod mail;
mod monitor;
mod pool;
mod progress;
mod role;
pub mod submit;

pub use gridpool_core::job::{JobId, Outcome};
pub use gridpool_core::kinds::{KindError, KindRegistry, WorkKind};
pub use pool::{CondorPool, JobFailure, Pool, PoolError, PoolOptions, SgePool, UnorderedResults};
pub use role::run_role;
pub use submit::condor::{CondorConfig, CondorSubmitter};
pub use submit::sge::{SgeConfig, SgeSubmitter};
pub use submit::{SubmitContext, SubmitError, Submitter};
