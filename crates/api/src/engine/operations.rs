//! The three job bodies: validation, publish and rollback.
//!
//! Publish and rollback each run as one `SERIALIZABLE` transaction. A
//! serialization failure or deadlock, whether raised mid-transaction or at
//! commit, discards the attempt and starts again from a fresh read, up to
//! `publish_max_attempts` attempts in total.

use sqlx::PgPool;

use linework_core::error::ImportError;
use linework_core::feature::CanonicalFeature;
use linework_core::publish::{capture_then_apply, PublishOutcome, PublishRequest};
use linework_core::rollback::{restore_snapshot, RollbackOutcome};
use linework_core::store::ProgressSink;
use linework_core::types::DbId;
use linework_core::validation::{validate, ValidationReport};
use linework_db::models::import_version::ImportVersion;
use linework_db::repositories::{ImportJobRepo, ImportVersionRepo};
use linework_db::scope::PgScope;

use crate::artifacts::LocalArtifactStore;
use crate::engine::source;
use crate::error::AppResult;

/// Progress once the source file has been read and normalized.
const PROGRESS_LOADED: u8 = 20;

/// What a job body needs from the runner.
pub struct JobContext<'a> {
    pub pool: &'a PgPool,
    pub artifacts: &'a LocalArtifactStore,
    pub job_id: DbId,
    pub max_attempts: u32,
}

async fn find_version(pool: &PgPool, id: DbId) -> AppResult<ImportVersion> {
    Ok(ImportVersionRepo::find_by_id(pool, id)
        .await?
        .ok_or(ImportError::VersionNotFound(id))?)
}

async fn load(
    ctx: &JobContext<'_>,
    version: &ImportVersion,
    progress: &dyn ProgressSink,
) -> AppResult<Vec<CanonicalFeature>> {
    let features = source::load_features(ctx.artifacts, version).await?;
    progress.report(PROGRESS_LOADED);
    Ok(features)
}

/// Whether a failed attempt should be repeated.
fn should_retry(ctx: &JobContext<'_>, err: &ImportError, attempt: u32, operation: &str) -> bool {
    if !err.is_retryable() || attempt >= ctx.max_attempts {
        return false;
    }
    tracing::warn!(
        job_id = ctx.job_id,
        attempt,
        max_attempts = ctx.max_attempts,
        operation,
        error = %err,
        "Serialization conflict, retrying from a fresh read",
    );
    true
}

pub async fn run_validation(
    ctx: &JobContext<'_>,
    version_id: DbId,
    progress: &dyn ProgressSink,
) -> AppResult<ValidationReport> {
    let version = find_version(ctx.pool, version_id).await?;
    if !version.is_configured() {
        return Err(ImportError::NotConfigured(version_id).into());
    }
    let features = load(ctx, &version, progress).await?;
    let report = validate(&features, &version.validation_config());
    tracing::info!(
        job_id = ctx.job_id,
        version_id,
        valid = report.valid,
        errors = report.errors.len(),
        warnings = report.warnings.len(),
        "Validation finished",
    );
    Ok(report)
}

pub async fn run_publish(
    ctx: &JobContext<'_>,
    version_id: DbId,
    published_by: &str,
    progress: &dyn ProgressSink,
) -> AppResult<PublishOutcome> {
    let version = find_version(ctx.pool, version_id).await?;
    let features = load(ctx, &version, progress).await?;
    let validation = version.validation_config();
    let request = PublishRequest {
        version_id,
        published_by,
        features: &features,
        validation: &validation,
    };

    let mut attempt = 0;
    loop {
        attempt += 1;
        ImportJobRepo::record_attempt(ctx.pool, ctx.job_id).await?;

        let mut scope = PgScope::begin(ctx.pool).await.map_err(ImportError::from)?;
        let result = match capture_then_apply(&mut scope, ctx.artifacts, &request, progress).await {
            Ok(outcome) => scope
                .commit()
                .await
                .map(|()| outcome)
                .map_err(ImportError::from),
            Err(e) => {
                drop(scope);
                Err(e)
            }
        };

        match result {
            Ok(outcome) => {
                tracing::info!(
                    job_id = ctx.job_id,
                    version_id,
                    attempt,
                    added = outcome.stats.added,
                    updated = outcome.stats.updated,
                    relocated = outcome.stats.relocated,
                    deactivated = outcome.stats.deactivated,
                    "Publish committed",
                );
                return Ok(outcome);
            }
            Err(e) if should_retry(ctx, &e, attempt, "publish") => continue,
            Err(e) => return Err(e.into()),
        }
    }
}

pub async fn run_rollback(
    ctx: &JobContext<'_>,
    version_id: DbId,
    progress: &dyn ProgressSink,
) -> AppResult<RollbackOutcome> {
    let mut attempt = 0;
    loop {
        attempt += 1;
        ImportJobRepo::record_attempt(ctx.pool, ctx.job_id).await?;

        let mut scope = PgScope::begin(ctx.pool).await.map_err(ImportError::from)?;
        let result = match restore_snapshot(&mut scope, ctx.artifacts, version_id, progress).await {
            Ok(outcome) => scope
                .commit()
                .await
                .map(|()| outcome)
                .map_err(ImportError::from),
            Err(e) => {
                drop(scope);
                Err(e)
            }
        };

        match result {
            Ok(outcome) => {
                tracing::info!(
                    job_id = ctx.job_id,
                    version_id,
                    attempt,
                    restored = outcome.restored_count,
                    removed = outcome.removed_count,
                    "Rollback committed",
                );
                return Ok(outcome);
            }
            Err(e) if should_retry(ctx, &e, attempt, "rollback") => continue,
            Err(e) => return Err(e.into()),
        }
    }
}
