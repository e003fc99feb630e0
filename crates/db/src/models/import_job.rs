//! Import job rows.

use serde::Serialize;
use sqlx::types::Json;
use sqlx::FromRow;

use linework_core::error::CoreError;
use linework_core::job::{JobResultSummary, JobStatus, JobType};
use linework_core::types::{DbId, Timestamp};

/// A row from the `import_jobs` table.
#[derive(Debug, Clone, FromRow, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ImportJob {
    pub id: DbId,
    pub version_id: DbId,
    pub job_type: String,
    pub status: String,
    pub progress_percent: i16,
    pub submitted_by: String,
    /// Transaction attempts made so far (publish and rollback retry on
    /// serialization conflicts).
    pub attempts: i32,
    pub result_summary: Option<Json<JobResultSummary>>,
    pub error_message: Option<String>,
    pub created_at: Timestamp,
    pub started_at: Option<Timestamp>,
    pub heartbeat_at: Option<Timestamp>,
    pub completed_at: Option<Timestamp>,
    pub updated_at: Timestamp,
}

impl ImportJob {
    pub fn job_type(&self) -> Result<JobType, CoreError> {
        JobType::parse(&self.job_type)
    }

    pub fn status(&self) -> Result<JobStatus, CoreError> {
        JobStatus::parse(&self.status)
    }
}
