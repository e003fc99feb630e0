//! Request extractors shared by the import handlers.
//!
//! - [`actor::Actor`] -- The caller identity from the `x-user-id` header.

pub mod actor;
