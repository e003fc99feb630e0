//! Request handlers.
//!
//! Handlers delegate to the repositories in `linework_db`, the source
//! readers in [`crate::engine::source`] and the job runner, and map errors
//! via [`AppError`](crate::error::AppError).

pub mod imports;
pub mod jobs;
