//! Storage seams used by publish and rollback.
//!
//! [`ScopeTransaction`] is one open database transaction: every call made
//! through it commits or rolls back together, and the implementor is
//! responsible for the isolation level. [`ArtifactStore`] is the
//! write-once blob store holding snapshot and diff artifacts.

use async_trait::async_trait;

use crate::geometry::BoundingBox;
use crate::import_version::{MergeMode, VersionStatus};
use crate::production::ProductionRecord;
use crate::types::DbId;

/// Failure inside a [`ScopeTransaction`].
#[derive(Debug, Clone, thiserror::Error)]
#[error("{message}")]
pub struct StoreError {
    pub message: String,
    /// A serialization conflict or deadlock; the whole operation may be
    /// repeated from a fresh transaction.
    pub retryable: bool,
}

impl StoreError {
    pub fn fatal(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            retryable: false,
        }
    }

    pub fn retryable(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            retryable: true,
        }
    }
}

/// The ledger fields publish and rollback need, read under a row lock.
#[derive(Debug, Clone, PartialEq)]
pub struct LockedVersion {
    pub id: DbId,
    pub status: VersionStatus,
    pub import_scope: Option<BoundingBox>,
    pub merge_mode: MergeMode,
    pub default_data_source: Option<String>,
    pub snapshot_path: Option<String>,
    pub diff_path: Option<String>,
}

/// A single write against production records.
#[derive(Debug, Clone, PartialEq)]
pub enum RecordMutation {
    /// Create a new active record attributed to the version.
    Insert(ProductionRecord),
    /// Replace geometry and attributes in place and mark the record active.
    /// A `None` data source keeps the existing tag.
    Update(ProductionRecord),
    /// Mark inactive. Records are never hard-deleted by a publish.
    Deactivate { feature_id: String },
    /// Write the record back exactly as captured, creating it if needed.
    Restore(ProductionRecord),
    /// Delete a record a publish created.
    Remove { feature_id: String },
}

#[async_trait]
pub trait ScopeTransaction: Send {
    /// Lock the ledger row for the rest of the transaction.
    async fn lock_version(&mut self, version_id: DbId) -> Result<Option<LockedVersion>, StoreError>;

    /// Records intersecting `scope`, plus records whose id is in `feature_ids`.
    async fn load_scope(
        &mut self,
        scope: &BoundingBox,
        feature_ids: &[String],
    ) -> Result<Vec<ProductionRecord>, StoreError>;

    /// Identifiers of records first inserted by `version_id`.
    async fn records_created_by(&mut self, version_id: DbId) -> Result<Vec<String>, StoreError>;

    async fn apply(&mut self, version_id: DbId, mutation: &RecordMutation) -> Result<(), StoreError>;

    async fn set_snapshot_path(&mut self, version_id: DbId, path: &str) -> Result<(), StoreError>;

    /// Record the diff artifact and move the version to `published`.
    async fn mark_published(
        &mut self,
        version_id: DbId,
        diff_path: &str,
        published_by: &str,
    ) -> Result<(), StoreError>;

    async fn mark_rolled_back(&mut self, version_id: DbId) -> Result<(), StoreError>;
}

#[derive(Debug, Clone, thiserror::Error, PartialEq, Eq)]
pub enum ArtifactError {
    #[error("artifact not found: {0}")]
    NotFound(String),
    #[error("artifact already exists: {0}")]
    AlreadyExists(String),
    #[error("invalid artifact key: {0}")]
    InvalidKey(String),
    #[error("artifact I/O error: {0}")]
    Io(String),
}

/// Write-once, read-many blob storage addressed by path.
#[async_trait]
pub trait ArtifactStore: Send + Sync {
    /// Durably store `bytes` under `key` and return the stable path.
    /// Fails with [`ArtifactError::AlreadyExists`] rather than overwrite.
    async fn put(&self, key: &str, bytes: Vec<u8>) -> Result<String, ArtifactError>;

    async fn get(&self, path: &str) -> Result<Vec<u8>, ArtifactError>;
}

/// Receives percentage updates from a running operation.
pub trait ProgressSink: Send + Sync {
    fn report(&self, percent: u8);
}

/// Discards progress.
pub struct NoProgress;

impl ProgressSink for NoProgress {
    fn report(&self, _percent: u8) {}
}
