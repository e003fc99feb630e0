//! Repository layer.
//!
//! Each repository is a zero-sized struct providing async methods that
//! accept `&PgPool` (or `&mut PgConnection` inside a transaction) as the
//! first argument.

pub mod asset_repo;
pub mod import_job_repo;
pub mod import_version_repo;

pub use asset_repo::AssetRepo;
pub use import_job_repo::ImportJobRepo;
pub use import_version_repo::ImportVersionRepo;
