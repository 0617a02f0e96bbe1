#![forbid(unsafe_code)]
#![deny(unreachable_pub)]

//! Shared protocol for `gridpool`: the work-kind registry, the job/state
//! model, the wire types spoken between orchestrator, broker and workers,
//! and the HTTP client both remote sides use to talk to the broker.

pub mod client;
pub mod counter;
pub mod job;
pub mod kinds;
pub mod wire;
