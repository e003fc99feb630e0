use crate::store::StoreError;
use crate::types::DbId;

#[derive(Debug, thiserror::Error)]
pub enum CoreError {
    #[error("Entity not found: {entity} with id {id}")]
    NotFound { entity: &'static str, id: DbId },

    #[error("Validation failed: {0}")]
    Validation(String),
}

/// Failures raised by the import engine.
///
/// Grouped the way callers need to react to them: input errors are
/// rejected before any job exists, state errors leave the ledger untouched,
/// and `Store` carries a `retryable` flag for serialization conflicts.
#[derive(Debug, thiserror::Error)]
pub enum ImportError {
    // ── Input errors ─────────────────────────────────────────────────
    #[error("Failed to parse {format} file: {message}")]
    Parse {
        format: &'static str,
        message: String,
    },

    #[error("Layer '{0}' not found in dataset")]
    LayerNotFound(String),

    #[error("Unsupported file type '{0}', expected .geojson, .json or .gpkg")]
    UnsupportedFormat(String),

    #[error("Unsupported coordinate reference system: {0}")]
    InvalidCrs(String),

    // ── State errors ─────────────────────────────────────────────────
    #[error("Import version {0} not found")]
    VersionNotFound(DbId),

    #[error("Import version {0} must be configured before this operation")]
    NotConfigured(DbId),

    #[error("Import version {id} is {status}, expected draft")]
    NotDraft { id: DbId, status: String },

    #[error("Import version {id} is {status}, expected published")]
    NotPublished { id: DbId, status: String },

    #[error("Import version {0} has no import scope; configure it with a layer containing geometry")]
    EmptyScope(DbId),

    #[error("Import version {id} failed validation with {error_count} error(s)")]
    ValidationFailed { id: DbId, error_count: usize },

    #[error("Import version {0} has no snapshot to restore")]
    NoSnapshot(DbId),

    #[error("A job is already pending or running for import version {0}")]
    JobAlreadyRunning(DbId),

    #[error("Imports are frozen; publishing is disabled")]
    ImportsFrozen,

    // ── Artifact errors ──────────────────────────────────────────────
    #[error("Import version {0} has not been published; no applied diff exists")]
    NoAppliedDiff(DbId),

    #[error("Artifact not found: {0}")]
    ArtifactMissing(String),

    #[error("Artifact {path} is unreadable: {message}")]
    ArtifactUnreadable { path: String, message: String },

    #[error("Snapshot {path} is unreadable: {message}")]
    SnapshotUnreadable { path: String, message: String },

    #[error("Artifact store error: {0}")]
    Artifact(String),

    // ── Transactional errors ─────────────────────────────────────────
    #[error(transparent)]
    Store(#[from] StoreError),
}

impl ImportError {
    /// Whether repeating the whole operation from a fresh read may succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Store(err) if err.retryable)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_retryable_store_errors_are_retryable() {
        assert!(ImportError::Store(StoreError::retryable("could not serialize access")).is_retryable());
        assert!(!ImportError::Store(StoreError::fatal("constraint violated")).is_retryable());
        assert!(!ImportError::NoSnapshot(3).is_retryable());
    }

    #[test]
    fn messages_name_the_version() {
        let err = ImportError::NotDraft {
            id: 7,
            status: "published".into(),
        };
        assert_eq!(err.to_string(), "Import version 7 is published, expected draft");
    }
}
