//! Row models and DTOs.
//!
//! Each submodule contains:
//! - A `FromRow` + `Serialize` entity struct matching the database row
//! - `Deserialize` or plain input structs for inserts and updates

pub mod asset;
pub mod import_job;
pub mod import_version;
