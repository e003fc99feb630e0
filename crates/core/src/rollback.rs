//! Rollback executor: restore a published version's scope to its snapshot.

use std::collections::HashSet;

use serde::{Deserialize, Serialize};

use crate::error::ImportError;
use crate::import_version::VersionStatus;
use crate::publish::artifact_error;
use crate::snapshot::Snapshot;
use crate::store::{ArtifactError, ArtifactStore, ProgressSink, RecordMutation, ScopeTransaction};
use crate::types::DbId;

const PROGRESS_LOADED: u8 = 20;
const PROGRESS_RESTORED: u8 = 90;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RollbackOutcome {
    pub version_id: DbId,
    pub snapshot_path: String,
    /// Records written back to their captured state.
    pub restored_count: usize,
    /// Records the publish created that the snapshot does not contain.
    pub removed_count: usize,
}

/// Restore every snapshot record and remove what the publish added.
///
/// A draft version, or one whose snapshot path is unset or whose artifact
/// is gone, fails with [`ImportError::NoSnapshot`]. An artifact that exists
/// but cannot be decoded fails with [`ImportError::SnapshotUnreadable`].
pub async fn restore_snapshot<T>(
    tx: &mut T,
    artifacts: &dyn ArtifactStore,
    version_id: DbId,
    progress: &dyn ProgressSink,
) -> Result<RollbackOutcome, ImportError>
where
    T: ScopeTransaction + ?Sized,
{
    let version = tx
        .lock_version(version_id)
        .await?
        .ok_or(ImportError::VersionNotFound(version_id))?;
    match version.status {
        VersionStatus::Draft => return Err(ImportError::NoSnapshot(version_id)),
        status if status.can_transition_to(VersionStatus::RolledBack) => {}
        other => {
            return Err(ImportError::NotPublished {
                id: version_id,
                status: other.to_string(),
            })
        }
    }
    let path = version
        .snapshot_path
        .ok_or(ImportError::NoSnapshot(version_id))?;

    let bytes = match artifacts.get(&path).await {
        Ok(bytes) => bytes,
        Err(ArtifactError::NotFound(_)) => return Err(ImportError::NoSnapshot(version_id)),
        Err(other) => return Err(artifact_error(other)),
    };
    let snapshot = Snapshot::from_bytes(&bytes).map_err(|message| {
        ImportError::SnapshotUnreadable {
            path: path.clone(),
            message,
        }
    })?;
    if snapshot.version_id != version_id {
        return Err(ImportError::SnapshotUnreadable {
            path,
            message: format!("snapshot belongs to version {}", snapshot.version_id),
        });
    }
    progress.report(PROGRESS_LOADED);

    let captured: HashSet<&str> = snapshot.records.iter().map(|r| r.feature_id.as_str()).collect();
    let created = tx.records_created_by(version_id).await?;
    let mut removed_count = 0;
    for feature_id in created {
        if !captured.contains(feature_id.as_str()) {
            tx.apply(version_id, &RecordMutation::Remove { feature_id }).await?;
            removed_count += 1;
        }
    }

    for record in &snapshot.records {
        tx.apply(version_id, &RecordMutation::Restore(record.clone())).await?;
    }
    progress.report(PROGRESS_RESTORED);

    tx.mark_rolled_back(version_id).await?;

    Ok(RollbackOutcome {
        version_id,
        snapshot_path: path,
        restored_count: snapshot.records.len(),
        removed_count,
    })
}
