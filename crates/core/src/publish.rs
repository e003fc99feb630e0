//! Two-phase publish.
//!
//! Phase one ([`capture`]) locks the version, checks it, and durably writes
//! the pre-publish snapshot. Phase two ([`apply`]) can only be called with
//! the [`CapturedSnapshot`] phase one returns, so no code path can mutate
//! production before a snapshot exists. Both phases run inside the same
//! [`ScopeTransaction`]; the caller commits it only after `apply` succeeds.

use chrono::Utc;
use serde::{Deserialize, Serialize};

use crate::diff::{compute_diff, DiffOptions, DiffStats};
use crate::error::ImportError;
use crate::feature::CanonicalFeature;
use crate::geometry::BoundingBox;
use crate::import_version::{MergeMode, VersionStatus};
use crate::production::ProductionRecord;
use crate::snapshot::{diff_key, snapshot_key, AppliedDiff, Snapshot};
use crate::store::{
    ArtifactError, ArtifactStore, LockedVersion, ProgressSink, RecordMutation, ScopeTransaction,
};
use crate::types::DbId;
use crate::validation::{validate, ValidationConfig};

// Progress checkpoints, in percent.
const PROGRESS_LOCKED: u8 = 5;
const PROGRESS_VALIDATED: u8 = 15;
const PROGRESS_SNAPSHOT_WRITTEN: u8 = 35;
const PROGRESS_DIFFED: u8 = 45;
const PROGRESS_APPLIED: u8 = 90;

/// Report progress at most this often while applying mutations.
const PROGRESS_BATCH: usize = 250;

pub struct PublishRequest<'a> {
    pub version_id: DbId,
    pub published_by: &'a str,
    pub features: &'a [CanonicalFeature],
    pub validation: &'a ValidationConfig,
}

/// Proof that the snapshot for this publish is durably stored.
///
/// Only [`capture`] constructs one.
#[derive(Debug)]
pub struct CapturedSnapshot {
    version: LockedVersion,
    scope: BoundingBox,
    records: Vec<ProductionRecord>,
    path: String,
}

/// Result summary of a successful publish.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PublishOutcome {
    pub version_id: DbId,
    pub snapshot_path: String,
    pub diff_path: String,
    pub stats: DiffStats,
}

/// Map an artifact read or write failure into the engine taxonomy.
pub fn artifact_error(err: ArtifactError) -> ImportError {
    match err {
        ArtifactError::NotFound(path) => ImportError::ArtifactMissing(path),
        other => ImportError::Artifact(other.to_string()),
    }
}

fn encode_error(err: serde_json::Error) -> ImportError {
    ImportError::Artifact(format!("failed to encode artifact: {err}"))
}

/// Phase one: lock, check, snapshot.
pub async fn capture<T>(
    tx: &mut T,
    artifacts: &dyn ArtifactStore,
    request: &PublishRequest<'_>,
    progress: &dyn ProgressSink,
) -> Result<CapturedSnapshot, ImportError>
where
    T: ScopeTransaction + ?Sized,
{
    let id = request.version_id;
    let version = tx
        .lock_version(id)
        .await?
        .ok_or(ImportError::VersionNotFound(id))?;
    if !version.status.can_transition_to(VersionStatus::Published) {
        return Err(ImportError::NotDraft {
            id,
            status: version.status.to_string(),
        });
    }
    let scope = version.import_scope.ok_or(ImportError::EmptyScope(id))?;
    progress.report(PROGRESS_LOCKED);

    let report = validate(request.features, request.validation);
    if !report.valid {
        return Err(ImportError::ValidationFailed {
            id,
            error_count: report.errors.len(),
        });
    }
    progress.report(PROGRESS_VALIDATED);

    let feature_ids: Vec<String> = request
        .features
        .iter()
        .filter_map(|f| f.feature_id.clone())
        .collect();
    let records = tx.load_scope(&scope, &feature_ids).await?;

    let snapshot = Snapshot {
        version_id: id,
        captured_at: Utc::now(),
        scope,
        records,
    };
    let bytes = snapshot.to_bytes().map_err(encode_error)?;
    let path = artifacts
        .put(&snapshot_key(id), bytes)
        .await
        .map_err(artifact_error)?;
    tx.set_snapshot_path(id, &path).await?;
    progress.report(PROGRESS_SNAPSHOT_WRITTEN);

    Ok(CapturedSnapshot {
        version,
        scope,
        records: snapshot.records,
        path,
    })
}

/// Phase two: diff against the captured state and apply it.
pub async fn apply<T>(
    tx: &mut T,
    artifacts: &dyn ArtifactStore,
    captured: CapturedSnapshot,
    request: &PublishRequest<'_>,
    progress: &dyn ProgressSink,
) -> Result<PublishOutcome, ImportError>
where
    T: ScopeTransaction + ?Sized,
{
    let id = captured.version.id;
    let merge_mode = captured.version.merge_mode;
    let diff = compute_diff(
        request.features,
        &captured.records,
        DiffOptions {
            scope: &captured.scope,
            merge_mode,
            default_data_source: captured.version.default_data_source.as_deref(),
        },
    );
    progress.report(PROGRESS_DIFFED);

    let mut mutations: Vec<RecordMutation> = Vec::with_capacity(
        diff.added.len() + diff.updated.len() + diff.relocated.len() + diff.deactivated.len(),
    );
    mutations.extend(diff.added.iter().map(|a| {
        RecordMutation::Insert(ProductionRecord {
            feature_id: a.feature_id.clone(),
            geometry: a.geometry.clone(),
            properties: a.properties.clone(),
            is_active: true,
            data_source: a.data_source.clone(),
        })
    }));
    mutations.extend(diff.updated.iter().chain(&diff.relocated).map(|u| {
        RecordMutation::Update(ProductionRecord {
            feature_id: u.feature_id.clone(),
            geometry: u.geometry.clone(),
            properties: u.properties.clone(),
            is_active: true,
            data_source: u.data_source.clone(),
        })
    }));
    if merge_mode == MergeMode::RegionalRefresh {
        mutations.extend(diff.deactivated.iter().map(|d| RecordMutation::Deactivate {
            feature_id: d.feature_id.clone(),
        }));
    }

    let total = mutations.len().max(1);
    for (i, mutation) in mutations.iter().enumerate() {
        tx.apply(id, mutation).await?;
        if (i + 1) % PROGRESS_BATCH == 0 {
            let span = usize::from(PROGRESS_APPLIED - PROGRESS_DIFFED);
            progress.report(PROGRESS_DIFFED + (span * (i + 1) / total) as u8);
        }
    }
    progress.report(PROGRESS_APPLIED);

    let stats = diff.stats;
    let applied = AppliedDiff {
        version_id: id,
        applied_at: Utc::now(),
        published_by: request.published_by.to_string(),
        snapshot_path: captured.path.clone(),
        diff,
    };
    let diff_path = artifacts
        .put(&diff_key(id), applied.to_bytes().map_err(encode_error)?)
        .await
        .map_err(artifact_error)?;
    tx.mark_published(id, &diff_path, request.published_by).await?;

    Ok(PublishOutcome {
        version_id: id,
        snapshot_path: captured.path,
        diff_path,
        stats,
    })
}

/// Snapshot, then apply, in one transaction.
pub async fn capture_then_apply<T>(
    tx: &mut T,
    artifacts: &dyn ArtifactStore,
    request: &PublishRequest<'_>,
    progress: &dyn ProgressSink,
) -> Result<PublishOutcome, ImportError>
where
    T: ScopeTransaction + ?Sized,
{
    let captured = capture(tx, artifacts, request, progress).await?;
    apply(tx, artifacts, captured, request, progress).await
}
