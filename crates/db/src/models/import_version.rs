//! Import version ledger rows and DTOs.

use serde::{Deserialize, Serialize};
use sqlx::types::Json;
use sqlx::FromRow;

use linework_core::error::CoreError;
use linework_core::geometry::BoundingBox;
use linework_core::import_version::{ImportFormat, MergeMode, VersionStatus};
use linework_core::store::LockedVersion;
use linework_core::types::{DbId, Timestamp};
use linework_core::validation::ValidationConfig;

/// A row from the `import_versions` table.
#[derive(Debug, Clone, FromRow, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ImportVersion {
    pub id: DbId,
    pub version_number: i64,
    pub status: String,
    pub file_name: String,
    pub format: String,
    #[serde(skip_serializing)]
    pub file_path: String,
    pub file_size_bytes: i64,
    pub checksum_sha256: String,
    pub layer_name: Option<String>,
    #[serde(rename = "sourceCRS")]
    pub source_crs: Option<String>,
    pub id_property: String,
    pub required_attributes: Json<Vec<String>>,
    pub import_scope: Option<Json<BoundingBox>>,
    pub regional_refresh: bool,
    pub default_data_source: Option<String>,
    /// Recorded at upload and never changed afterwards.
    pub feature_count: i32,
    pub configured_at: Option<Timestamp>,
    pub uploaded_by: String,
    pub uploaded_at: Timestamp,
    pub published_by: Option<String>,
    pub published_at: Option<Timestamp>,
    pub archived_at: Option<Timestamp>,
    pub rolled_back_at: Option<Timestamp>,
    pub snapshot_path: Option<String>,
    pub diff_path: Option<String>,
    pub notes: Option<String>,
    pub created_at: Timestamp,
    pub updated_at: Timestamp,
}

impl ImportVersion {
    pub fn status(&self) -> Result<VersionStatus, CoreError> {
        VersionStatus::parse(&self.status)
    }

    pub fn format(&self) -> Result<ImportFormat, CoreError> {
        ImportFormat::parse(&self.format)
    }

    pub fn merge_mode(&self) -> MergeMode {
        MergeMode::from_regional_refresh(self.regional_refresh)
    }

    pub fn is_configured(&self) -> bool {
        self.configured_at.is_some()
    }

    pub fn scope(&self) -> Option<BoundingBox> {
        self.import_scope.as_ref().map(|s| s.0)
    }

    pub fn validation_config(&self) -> ValidationConfig {
        ValidationConfig {
            required_attributes: self.required_attributes.0.clone(),
            default_data_source: self.default_data_source.clone(),
        }
    }

    /// The subset publish and rollback work from.
    pub fn to_locked(&self) -> Result<LockedVersion, CoreError> {
        Ok(LockedVersion {
            id: self.id,
            status: self.status()?,
            import_scope: self.scope(),
            merge_mode: self.merge_mode(),
            default_data_source: self.default_data_source.clone(),
            snapshot_path: self.snapshot_path.clone(),
            diff_path: self.diff_path.clone(),
        })
    }
}

/// Insert DTO built by the upload handler.
#[derive(Debug, Clone)]
pub struct CreateImportVersion {
    pub file_name: String,
    pub format: ImportFormat,
    pub file_path: String,
    pub file_size_bytes: i64,
    pub checksum_sha256: String,
    pub feature_count: i32,
    /// Preselected when the file holds exactly one layer.
    pub layer_name: Option<String>,
    /// Detected from the file, if it declares one.
    pub source_crs: Option<String>,
    pub uploaded_by: String,
}

/// Request body for `POST /api/v1/imports/{id}/configure`.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConfigureRequest {
    pub layer_name: Option<String>,
    #[serde(rename = "sourceCRS", alias = "sourceCrs")]
    pub source_crs: Option<String>,
    pub default_data_source: Option<String>,
    pub regional_refresh: Option<bool>,
    pub id_property: Option<String>,
    pub required_attributes: Option<Vec<String>>,
    pub notes: Option<String>,
}

/// Resolved configuration written by `ImportVersionRepo::configure`.
#[derive(Debug, Clone)]
pub struct ConfigureImportVersion {
    pub layer_name: Option<String>,
    pub source_crs: Option<String>,
    pub default_data_source: Option<String>,
    pub regional_refresh: bool,
    pub id_property: String,
    pub required_attributes: Vec<String>,
    pub notes: Option<String>,
    pub import_scope: Option<BoundingBox>,
}

/// Query parameters for `GET /api/v1/imports`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ImportVersionListQuery {
    /// Filter by status string (e.g. `draft`, `published`).
    pub status: Option<String>,
    /// Maximum number of results. Defaults to 50, capped at 100.
    pub limit: Option<i64>,
    /// Number of results to skip. Defaults to 0.
    pub offset: Option<i64>,
}
