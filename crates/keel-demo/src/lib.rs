//! Keel demo: wires the runtime to a configured backend and runs a sample
//! account workflow.

pub mod account;
pub mod backend;
pub mod config;
pub mod error;
pub mod scenario;
