//! Keel Core: event-sourced aggregate runtime.
//!
//! This crate defines the aggregate engine, the commit and snapshot value
//! objects, the rehydration pipeline, and the storage capabilities the engine
//! consumes. It contains no infrastructure code.

pub mod aggregate;
pub mod clock;
pub mod command;
pub mod commit;
pub mod error;
pub mod event;
pub mod handler;
pub mod loader;
pub mod snapshot;
pub mod store;
