#![forbid(unsafe_code)]
#![deny(unreachable_pub)]

//! The gridpool worker runtime: started on a remote host by the batch
//! scheduler, pulls its assigned jobs from the broker, runs them, and
//! pushes the outcomes back.

pub mod assignment;
pub mod runtime;

pub use assignment::Assignment;
pub use runtime::{WorkerReport, run};
