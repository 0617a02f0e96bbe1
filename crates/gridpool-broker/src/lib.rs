#![forbid(unsafe_code)]
#![deny(unreachable_pub)]

//! The gridpool broker: a registry of jobs and their results, served over
//! HTTP for the lifetime of one map/imap run.

pub mod net;
pub mod registry;
pub mod server;
pub mod service;
