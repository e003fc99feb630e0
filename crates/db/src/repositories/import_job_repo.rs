//! Repository for the `import_jobs` table.
//!
//! Every transition is guarded on the current status so a job reaches a
//! terminal state exactly once; a lost race shows up as `false` or `0`
//! rows affected.

use sqlx::types::Json;
use sqlx::PgPool;

use linework_core::job::{JobResultSummary, JobStatus, JobType};
use linework_core::types::DbId;

use crate::models::import_job::ImportJob;

/// Column list for `import_jobs` queries.
const COLUMNS: &str = "\
    id, version_id, job_type, status, progress_percent, submitted_by, attempts, \
    result_summary, error_message, created_at, started_at, heartbeat_at, \
    completed_at, updated_at";

/// Maximum page size for job listing.
const MAX_LIMIT: i64 = 100;

/// Default page size for job listing.
const DEFAULT_LIMIT: i64 = 50;

/// Name of the partial unique index allowing one active job per version.
pub const ACTIVE_JOB_CONSTRAINT: &str = "uq_import_jobs_active_version";

pub struct ImportJobRepo;

impl ImportJobRepo {
    /// Create a pending job. Fails with a unique violation on
    /// [`ACTIVE_JOB_CONSTRAINT`] if the version already has an active job.
    pub async fn submit(
        pool: &PgPool,
        version_id: DbId,
        job_type: JobType,
        submitted_by: &str,
    ) -> Result<ImportJob, sqlx::Error> {
        let query = format!(
            "INSERT INTO import_jobs (version_id, job_type, status, submitted_by) \
             VALUES ($1, $2, $3, $4) \
             RETURNING {COLUMNS}"
        );
        sqlx::query_as::<_, ImportJob>(&query)
            .bind(version_id)
            .bind(job_type.as_str())
            .bind(JobStatus::Pending.as_str())
            .bind(submitted_by)
            .fetch_one(pool)
            .await
    }

    pub async fn find_by_id(pool: &PgPool, id: DbId) -> Result<Option<ImportJob>, sqlx::Error> {
        let query = format!("SELECT {COLUMNS} FROM import_jobs WHERE id = $1");
        sqlx::query_as::<_, ImportJob>(&query)
            .bind(id)
            .fetch_optional(pool)
            .await
    }

    /// The pending or running job for a version, if any.
    pub async fn find_active_for_version(
        pool: &PgPool,
        version_id: DbId,
    ) -> Result<Option<ImportJob>, sqlx::Error> {
        let query = format!(
            "SELECT {COLUMNS} FROM import_jobs \
             WHERE version_id = $1 AND status IN ($2, $3)"
        );
        sqlx::query_as::<_, ImportJob>(&query)
            .bind(version_id)
            .bind(JobStatus::Pending.as_str())
            .bind(JobStatus::Running.as_str())
            .fetch_optional(pool)
            .await
    }

    /// Jobs for a version, newest first.
    pub async fn list_for_version(
        pool: &PgPool,
        version_id: DbId,
        limit: Option<i64>,
        offset: Option<i64>,
    ) -> Result<Vec<ImportJob>, sqlx::Error> {
        let limit = limit.unwrap_or(DEFAULT_LIMIT).clamp(1, MAX_LIMIT);
        let offset = offset.unwrap_or(0).max(0);
        let query = format!(
            "SELECT {COLUMNS} FROM import_jobs \
             WHERE version_id = $1 \
             ORDER BY created_at DESC, id DESC \
             LIMIT $2 OFFSET $3"
        );
        sqlx::query_as::<_, ImportJob>(&query)
            .bind(version_id)
            .bind(limit)
            .bind(offset)
            .fetch_all(pool)
            .await
    }

    /// Most recent completed job of a type for a version.
    pub async fn latest_completed(
        pool: &PgPool,
        version_id: DbId,
        job_type: JobType,
    ) -> Result<Option<ImportJob>, sqlx::Error> {
        let query = format!(
            "SELECT {COLUMNS} FROM import_jobs \
             WHERE version_id = $1 AND job_type = $2 AND status = $3 \
             ORDER BY completed_at DESC, id DESC \
             LIMIT 1"
        );
        sqlx::query_as::<_, ImportJob>(&query)
            .bind(version_id)
            .bind(job_type.as_str())
            .bind(JobStatus::Completed.as_str())
            .fetch_optional(pool)
            .await
    }

    /// `pending -> running`, stamping start and first heartbeat.
    pub async fn mark_running(pool: &PgPool, id: DbId) -> Result<bool, sqlx::Error> {
        let result = sqlx::query(
            "UPDATE import_jobs \
             SET status = $2, started_at = NOW(), heartbeat_at = NOW() \
             WHERE id = $1 AND status = $3",
        )
        .bind(id)
        .bind(JobStatus::Running.as_str())
        .bind(JobStatus::Pending.as_str())
        .execute(pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Raise progress. Never lowers it.
    pub async fn update_progress(pool: &PgPool, id: DbId, percent: i16) -> Result<(), sqlx::Error> {
        sqlx::query(
            "UPDATE import_jobs \
             SET progress_percent = GREATEST(progress_percent, LEAST($2, 100)), \
                 heartbeat_at = NOW() \
             WHERE id = $1 AND status = $3",
        )
        .bind(id)
        .bind(percent)
        .bind(JobStatus::Running.as_str())
        .execute(pool)
        .await?;
        Ok(())
    }

    pub async fn heartbeat(pool: &PgPool, id: DbId) -> Result<bool, sqlx::Error> {
        let result = sqlx::query(
            "UPDATE import_jobs SET heartbeat_at = NOW() WHERE id = $1 AND status = $2",
        )
        .bind(id)
        .bind(JobStatus::Running.as_str())
        .execute(pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Count one more transaction attempt.
    pub async fn record_attempt(pool: &PgPool, id: DbId) -> Result<(), sqlx::Error> {
        sqlx::query("UPDATE import_jobs SET attempts = attempts + 1 WHERE id = $1")
            .bind(id)
            .execute(pool)
            .await?;
        Ok(())
    }

    /// `running -> completed` with the typed result summary.
    pub async fn complete(
        pool: &PgPool,
        id: DbId,
        summary: &JobResultSummary,
    ) -> Result<bool, sqlx::Error> {
        let result = sqlx::query(
            "UPDATE import_jobs \
             SET status = $2, result_summary = $3, progress_percent = 100, completed_at = NOW() \
             WHERE id = $1 AND status = $4",
        )
        .bind(id)
        .bind(JobStatus::Completed.as_str())
        .bind(Json(summary))
        .bind(JobStatus::Running.as_str())
        .execute(pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    /// `{pending | running} -> failed`.
    pub async fn fail(pool: &PgPool, id: DbId, error: &str) -> Result<bool, sqlx::Error> {
        let result = sqlx::query(
            "UPDATE import_jobs \
             SET status = $2, error_message = $3, completed_at = NOW() \
             WHERE id = $1 AND status IN ($4, $5)",
        )
        .bind(id)
        .bind(JobStatus::Failed.as_str())
        .bind(error)
        .bind(JobStatus::Pending.as_str())
        .bind(JobStatus::Running.as_str())
        .execute(pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Fail every active job whose heartbeat (or creation, if it never
    /// started) is older than `lease_secs`. Returns the ids failed.
    pub async fn fail_stale(
        pool: &PgPool,
        lease_secs: i64,
        error: &str,
    ) -> Result<Vec<DbId>, sqlx::Error> {
        sqlx::query_scalar::<_, DbId>(
            "UPDATE import_jobs \
             SET status = $2, error_message = $3, completed_at = NOW() \
             WHERE status IN ($4, $5) \
               AND COALESCE(heartbeat_at, created_at) < NOW() - make_interval(secs => $1) \
             RETURNING id",
        )
        .bind(lease_secs as f64)
        .bind(JobStatus::Failed.as_str())
        .bind(error)
        .bind(JobStatus::Pending.as_str())
        .bind(JobStatus::Running.as_str())
        .fetch_all(pool)
        .await
    }
}
