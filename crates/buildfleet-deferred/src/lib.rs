//! Deferred results for cloud connector orchestration
//!
//! Cloud management planes answer every request through an asynchronous
//! callback, and a connector has to combine many of those answers: fan a
//! listing out into per-instance lookups, chain a storage-account resolution
//! through its keys, and still report partial failure per entity. This crate
//! provides the small promise engine the BuildFleet connectors are built on:
//!
//! - [`Deferred`] / [`Promise`]: a single-assignment result that is resolved
//!   or rejected exactly once, with `done`/`fail`/`always` callbacks and a
//!   blocking wait for synchronous entry points.
//! - [`join::when`] and [`join::when_settled`]: combinators that observe
//!   every input settlement exactly once, so one failing call never cancels
//!   or hides its siblings.
//! - [`task::spawn_deferred`]: the bridge that settles a promise from a
//!   future running on a tokio runtime.

pub mod deferred;
pub mod join;
pub mod task;

// Re-exports
pub use deferred::{AlreadySettled, Deferred, Promise, Settlement, WaitInterrupted};
pub use join::{Joined, when, when_settled};
pub use task::spawn_deferred;
