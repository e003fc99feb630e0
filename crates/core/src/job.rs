//! Import job types, statuses and result summaries.

use serde::{Deserialize, Serialize};

use crate::error::CoreError;
use crate::publish::PublishOutcome;
use crate::rollback::RollbackOutcome;
use crate::validation::ValidationReport;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobType {
    Validation,
    Publish,
    Rollback,
}

impl JobType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Validation => "validation",
            Self::Publish => "publish",
            Self::Rollback => "rollback",
        }
    }

    pub fn parse(s: &str) -> Result<Self, CoreError> {
        match s {
            "validation" => Ok(Self::Validation),
            "publish" => Ok(Self::Publish),
            "rollback" => Ok(Self::Rollback),
            other => Err(CoreError::Validation(format!("Unknown job type '{other}'"))),
        }
    }

    /// Publish and rollback write production records.
    pub fn mutates_production(&self) -> bool {
        matches!(self, Self::Publish | Self::Rollback)
    }
}

impl std::fmt::Display for JobType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// `pending -> running -> {completed | failed}`; terminal states are final.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Pending,
    Running,
    Completed,
    Failed,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }

    pub fn parse(s: &str) -> Result<Self, CoreError> {
        match s {
            "pending" => Ok(Self::Pending),
            "running" => Ok(Self::Running),
            "completed" => Ok(Self::Completed),
            "failed" => Ok(Self::Failed),
            other => Err(CoreError::Validation(format!("Unknown job status '{other}'"))),
        }
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Job result, tagged by `jobType` so clients can switch on it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "jobType", rename_all = "snake_case")]
pub enum JobResultSummary {
    Validation(ValidationReport),
    Publish(PublishOutcome),
    Rollback(RollbackOutcome),
}

impl JobResultSummary {
    pub fn job_type(&self) -> JobType {
        match self {
            Self::Validation(_) => JobType::Validation,
            Self::Publish(_) => JobType::Publish,
            Self::Rollback(_) => JobType::Rollback,
        }
    }
}

/// Progress never moves backwards and stays within 0..=100.
pub fn next_progress(current: i16, reported: i32) -> i16 {
    let clamped = reported.clamp(0, 100) as i16;
    current.max(clamped)
}
