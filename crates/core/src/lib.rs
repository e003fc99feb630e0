//! Pure domain logic for the linework import engine.
//!
//! Nothing in this crate talks to a database or the network. Storage is
//! reached through the traits in [`store`], which the `db` and `api` crates
//! implement for PostgreSQL and the local filesystem.

pub mod crs;
pub mod diff;
pub mod error;
pub mod feature;
pub mod geojson;
pub mod geometry;
pub mod import_version;
pub mod job;
pub mod production;
pub mod publish;
pub mod rollback;
pub mod snapshot;
pub mod store;
pub mod types;
pub mod validation;
pub mod wkb;
