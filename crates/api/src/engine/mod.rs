//! Import job execution engine.
//!
//! Contains the [`JobRunner`] that accepts validation, publish and rollback
//! jobs and runs them off the request path, the job bodies themselves, the
//! source file facade they read through, and the progress forwarder that
//! writes percentage updates to the job row.

pub mod operations;
pub mod progress;
pub mod runner;
pub mod source;

pub use runner::JobRunner;
