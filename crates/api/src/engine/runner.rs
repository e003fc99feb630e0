//! The job runner.
//!
//! [`JobRunner::submit`] checks the version synchronously, inserts a
//! `pending` job and returns it; the work runs on a tracked task. A
//! partial unique index on `import_jobs` allows one active job per version,
//! so a second submission fails with `JobAlreadyRunning` instead of
//! queueing, across every process sharing the database.
//!
//! The task moves the job to `running` before touching anything, keeps a
//! heartbeat alive while it works, and finishes it as `completed` with the
//! typed result or `failed` with the error message. Failed jobs are never
//! retried automatically.

use std::sync::Arc;
use std::time::Duration;

use sqlx::PgPool;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

use linework_core::error::{CoreError, ImportError};
use linework_core::import_version::VersionStatus;
use linework_core::job::{JobResultSummary, JobType};
use linework_core::types::DbId;
use linework_db::models::import_job::ImportJob;
use linework_db::models::import_version::ImportVersion;
use linework_db::repositories::import_job_repo::ACTIVE_JOB_CONSTRAINT;
use linework_db::repositories::{ImportJobRepo, ImportVersionRepo};

use crate::artifacts::LocalArtifactStore;
use crate::config::ServerConfig;
use crate::engine::operations::{self, JobContext};
use crate::engine::progress;
use crate::error::{AppError, AppResult};

#[derive(Clone)]
pub struct JobRunner {
    inner: Arc<RunnerInner>,
}

struct RunnerInner {
    pool: PgPool,
    config: Arc<ServerConfig>,
    artifacts: Arc<LocalArtifactStore>,
    tracker: TaskTracker,
}

/// Reject submissions the version's state cannot satisfy, before a job
/// row exists.
pub fn check_submission(
    version: &ImportVersion,
    job_type: JobType,
    imports_frozen: bool,
) -> Result<(), AppError> {
    let id = version.id;
    if job_type == JobType::Publish && imports_frozen {
        return Err(ImportError::ImportsFrozen.into());
    }
    let status = version.status()?;
    match job_type {
        JobType::Validation => {
            if !version.is_configured() {
                return Err(ImportError::NotConfigured(id).into());
            }
        }
        JobType::Publish => {
            if !status.can_transition_to(VersionStatus::Published) {
                return Err(ImportError::NotDraft {
                    id,
                    status: status.to_string(),
                }
                .into());
            }
            if !version.is_configured() {
                return Err(ImportError::NotConfigured(id).into());
            }
            if version.scope().is_none() {
                return Err(ImportError::EmptyScope(id).into());
            }
        }
        JobType::Rollback => match status {
            VersionStatus::Draft => return Err(ImportError::NoSnapshot(id).into()),
            status if status.can_transition_to(VersionStatus::RolledBack) => {
                if version.snapshot_path.is_none() {
                    return Err(ImportError::NoSnapshot(id).into());
                }
            }
            other => {
                return Err(ImportError::NotPublished {
                    id,
                    status: other.to_string(),
                }
                .into());
            }
        },
    }
    Ok(())
}

fn is_active_job_conflict(err: &sqlx::Error) -> bool {
    match err {
        sqlx::Error::Database(db) => {
            db.code().as_deref() == Some("23505")
                && db.constraint() == Some(ACTIVE_JOB_CONSTRAINT)
        }
        _ => false,
    }
}

impl JobRunner {
    pub fn new(pool: PgPool, config: Arc<ServerConfig>, artifacts: Arc<LocalArtifactStore>) -> Self {
        Self {
            inner: Arc::new(RunnerInner {
                pool,
                config,
                artifacts,
                tracker: TaskTracker::new(),
            }),
        }
    }

    /// Accept a job for `version_id` and start it in the background.
    pub async fn submit(
        &self,
        version_id: DbId,
        job_type: JobType,
        submitted_by: &str,
    ) -> AppResult<ImportJob> {
        let inner = &self.inner;
        if job_type == JobType::Publish && inner.config.imports_frozen {
            return Err(ImportError::ImportsFrozen.into());
        }
        let version = ImportVersionRepo::find_by_id(&inner.pool, version_id)
            .await?
            .ok_or(ImportError::VersionNotFound(version_id))?;
        check_submission(&version, job_type, inner.config.imports_frozen)?;

        let job = ImportJobRepo::submit(&inner.pool, version_id, job_type, submitted_by)
            .await
            .map_err(|e| {
                if is_active_job_conflict(&e) {
                    AppError::Import(ImportError::JobAlreadyRunning(version_id))
                } else {
                    AppError::Database(e)
                }
            })?;

        tracing::info!(
            job_id = job.id,
            version_id,
            job_type = %job_type,
            submitted_by,
            "Import job submitted",
        );

        let task_inner = Arc::clone(inner);
        let job_id = job.id;
        let actor = submitted_by.to_string();
        inner.tracker.spawn(async move {
            run_job(task_inner, job_id, version_id, job_type, actor).await;
        });

        Ok(job)
    }

    pub async fn get_job(&self, job_id: DbId) -> AppResult<ImportJob> {
        ImportJobRepo::find_by_id(&self.inner.pool, job_id)
            .await?
            .ok_or_else(|| {
                AppError::Core(CoreError::NotFound {
                    entity: "ImportJob",
                    id: job_id,
                })
            })
    }

    /// Stop accepting tasks and wait up to `timeout` for running jobs.
    /// Returns `false` if some were still running.
    pub async fn shutdown(&self, timeout: Duration) -> bool {
        let tracker = &self.inner.tracker;
        tracker.close();
        let running = tracker.len();
        if running > 0 {
            tracing::info!(running, "Waiting for import jobs to finish");
        }
        tokio::time::timeout(timeout, tracker.wait()).await.is_ok()
    }
}

async fn run_job(
    inner: Arc<RunnerInner>,
    job_id: DbId,
    version_id: DbId,
    job_type: JobType,
    actor: String,
) {
    match ImportJobRepo::mark_running(&inner.pool, job_id).await {
        Ok(true) => {}
        Ok(false) => {
            tracing::warn!(job_id, "Import job was no longer pending, not starting");
            return;
        }
        Err(e) => {
            tracing::error!(job_id, error = %e, "Failed to mark import job running");
            finish(&inner.pool, job_id, Err(e.into())).await;
            return;
        }
    }
    tracing::info!(job_id, version_id, job_type = %job_type, "Import job started");

    let heartbeat_cancel = CancellationToken::new();
    let heartbeat = tokio::spawn(heartbeat_loop(
        inner.pool.clone(),
        job_id,
        inner.config.job_heartbeat(),
        heartbeat_cancel.clone(),
    ));
    let (sink, forwarder) = progress::start(inner.pool.clone(), job_id);

    let ctx = JobContext {
        pool: &inner.pool,
        artifacts: &inner.artifacts,
        job_id,
        max_attempts: inner.config.publish_max_attempts,
    };
    let result = match job_type {
        JobType::Validation => operations::run_validation(&ctx, version_id, &sink)
            .await
            .map(JobResultSummary::Validation),
        JobType::Publish => operations::run_publish(&ctx, version_id, &actor, &sink)
            .await
            .map(JobResultSummary::Publish),
        JobType::Rollback => operations::run_rollback(&ctx, version_id, &sink)
            .await
            .map(JobResultSummary::Rollback),
    };

    drop(sink);
    if let Err(e) = forwarder.await {
        tracing::error!(job_id, error = %e, "Progress forwarder task failed");
    }
    heartbeat_cancel.cancel();
    if let Err(e) = heartbeat.await {
        tracing::error!(job_id, error = %e, "Job heartbeat task failed");
    }

    finish(&inner.pool, job_id, result).await;
}

/// Record the terminal state. The status guards in the repository make
/// this a no-op if the sweeper already failed the job.
async fn finish(pool: &PgPool, job_id: DbId, result: AppResult<JobResultSummary>) {
    match result {
        Ok(summary) => match ImportJobRepo::complete(pool, job_id, &summary).await {
            Ok(true) => tracing::info!(job_id, "Import job completed"),
            Ok(false) => tracing::warn!(job_id, "Import job finished after it was failed"),
            Err(e) => tracing::error!(job_id, error = %e, "Failed to mark import job completed"),
        },
        Err(err) => {
            let message = err.to_string();
            tracing::error!(job_id, error = %message, "Import job failed");
            if let Err(e) = ImportJobRepo::fail(pool, job_id, &message).await {
                tracing::error!(job_id, error = %e, "Failed to mark import job failed");
            }
        }
    }
}

async fn heartbeat_loop(pool: PgPool, job_id: DbId, every: Duration, cancel: CancellationToken) {
    let mut interval = tokio::time::interval(every);
    // The first tick fires immediately; `mark_running` already stamped it.
    interval.tick().await;
    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = interval.tick() => {
                match ImportJobRepo::heartbeat(&pool, job_id).await {
                    Ok(true) => tracing::trace!(job_id, "Import job heartbeat"),
                    Ok(false) => {
                        tracing::warn!(job_id, "Import job is no longer running, heartbeat stopped");
                        break;
                    }
                    Err(e) => tracing::error!(job_id, error = %e, "Import job heartbeat failed"),
                }
            }
        }
    }
}
