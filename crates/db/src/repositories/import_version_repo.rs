//! Repository for the `import_versions` ledger.
//!
//! Status guards live in the `WHERE` clauses: an update that would break
//! the lifecycle affects zero rows and the caller decides which error that
//! is. Functions taking `&mut PgConnection` run inside a publish or
//! rollback transaction.

use sqlx::types::Json;
use sqlx::{PgConnection, PgPool};

use linework_core::import_version::VersionStatus;
use linework_core::types::DbId;

use crate::models::import_version::{
    ConfigureImportVersion, CreateImportVersion, ImportVersion, ImportVersionListQuery,
};

/// Column list for `import_versions` queries.
const COLUMNS: &str = "\
    id, version_number, status, file_name, format, file_path, file_size_bytes, \
    checksum_sha256, layer_name, source_crs, id_property, required_attributes, \
    import_scope, regional_refresh, default_data_source, feature_count, configured_at, \
    uploaded_by, uploaded_at, published_by, published_at, archived_at, rolled_back_at, \
    snapshot_path, diff_path, notes, created_at, updated_at";

/// Maximum page size for version listing.
const MAX_LIMIT: i64 = 100;

/// Default page size for version listing.
const DEFAULT_LIMIT: i64 = 50;

pub struct ImportVersionRepo;

impl ImportVersionRepo {
    /// Insert a new draft. The version number comes from a sequence, so it
    /// is unique and increasing even across deleted drafts.
    pub async fn create(
        pool: &PgPool,
        input: &CreateImportVersion,
    ) -> Result<ImportVersion, sqlx::Error> {
        let query = format!(
            "INSERT INTO import_versions \
                 (file_name, format, file_path, file_size_bytes, checksum_sha256, \
                  feature_count, layer_name, source_crs, uploaded_by) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9) \
             RETURNING {COLUMNS}"
        );
        sqlx::query_as::<_, ImportVersion>(&query)
            .bind(&input.file_name)
            .bind(input.format.as_str())
            .bind(&input.file_path)
            .bind(input.file_size_bytes)
            .bind(&input.checksum_sha256)
            .bind(input.feature_count)
            .bind(&input.layer_name)
            .bind(&input.source_crs)
            .bind(&input.uploaded_by)
            .fetch_one(pool)
            .await
    }

    pub async fn find_by_id(pool: &PgPool, id: DbId) -> Result<Option<ImportVersion>, sqlx::Error> {
        let query = format!("SELECT {COLUMNS} FROM import_versions WHERE id = $1");
        sqlx::query_as::<_, ImportVersion>(&query)
            .bind(id)
            .fetch_optional(pool)
            .await
    }

    /// List versions, newest first, with an optional status filter.
    pub async fn list(
        pool: &PgPool,
        params: &ImportVersionListQuery,
    ) -> Result<Vec<ImportVersion>, sqlx::Error> {
        let limit = params.limit.unwrap_or(DEFAULT_LIMIT).clamp(1, MAX_LIMIT);
        let offset = params.offset.unwrap_or(0).max(0);

        let (where_clause, bind_idx) = match params.status {
            Some(_) => ("WHERE status = $1", 2),
            None => ("", 1),
        };
        let query = format!(
            "SELECT {COLUMNS} FROM import_versions \
             {where_clause} \
             ORDER BY version_number DESC \
             LIMIT ${bind_idx} OFFSET ${}",
            bind_idx + 1,
        );

        let mut q = sqlx::query_as::<_, ImportVersion>(&query);
        if let Some(status) = &params.status {
            q = q.bind(status);
        }
        q.bind(limit).bind(offset).fetch_all(pool).await
    }

    /// Total rows matching the list filter, ignoring pagination.
    pub async fn count(pool: &PgPool, status: Option<&str>) -> Result<i64, sqlx::Error> {
        sqlx::query_scalar::<_, i64>(
            "SELECT COUNT(*) FROM import_versions WHERE ($1::TEXT IS NULL OR status = $1)",
        )
        .bind(status)
        .fetch_one(pool)
        .await
    }

    /// Apply a configuration to a draft. Returns `None` if the version does
    /// not exist or is no longer a draft.
    pub async fn configure(
        pool: &PgPool,
        id: DbId,
        input: &ConfigureImportVersion,
    ) -> Result<Option<ImportVersion>, sqlx::Error> {
        let query = format!(
            "UPDATE import_versions SET \
                 layer_name = $2, source_crs = $3, default_data_source = $4, \
                 regional_refresh = $5, id_property = $6, required_attributes = $7, \
                 notes = COALESCE($8, notes), import_scope = $9, configured_at = NOW() \
             WHERE id = $1 AND status = $10 \
             RETURNING {COLUMNS}"
        );
        sqlx::query_as::<_, ImportVersion>(&query)
            .bind(id)
            .bind(&input.layer_name)
            .bind(&input.source_crs)
            .bind(&input.default_data_source)
            .bind(input.regional_refresh)
            .bind(&input.id_property)
            .bind(Json(&input.required_attributes))
            .bind(&input.notes)
            .bind(input.import_scope.map(Json))
            .bind(VersionStatus::Draft.as_str())
            .fetch_optional(pool)
            .await
    }

    /// Delete a draft. Returns the deleted row so its upload can be removed,
    /// or `None` if the version is missing or not a draft.
    pub async fn delete_draft(pool: &PgPool, id: DbId) -> Result<Option<ImportVersion>, sqlx::Error> {
        let query = format!(
            "DELETE FROM import_versions WHERE id = $1 AND status = $2 RETURNING {COLUMNS}"
        );
        sqlx::query_as::<_, ImportVersion>(&query)
            .bind(id)
            .bind(VersionStatus::Draft.as_str())
            .fetch_optional(pool)
            .await
    }

    /// `published -> archived`. Returns `None` if the version is not published.
    pub async fn archive(pool: &PgPool, id: DbId) -> Result<Option<ImportVersion>, sqlx::Error> {
        let query = format!(
            "UPDATE import_versions SET status = $2, archived_at = NOW() \
             WHERE id = $1 AND status = $3 \
             RETURNING {COLUMNS}"
        );
        sqlx::query_as::<_, ImportVersion>(&query)
            .bind(id)
            .bind(VersionStatus::Archived.as_str())
            .bind(VersionStatus::Published.as_str())
            .fetch_optional(pool)
            .await
    }

    // -- Transaction-scoped --------------------------------------------------

    /// Read a version and hold its row lock for the rest of the transaction.
    pub async fn lock_for_update(
        conn: &mut PgConnection,
        id: DbId,
    ) -> Result<Option<ImportVersion>, sqlx::Error> {
        let query = format!("SELECT {COLUMNS} FROM import_versions WHERE id = $1 FOR UPDATE");
        sqlx::query_as::<_, ImportVersion>(&query)
            .bind(id)
            .fetch_optional(&mut *conn)
            .await
    }

    pub async fn set_snapshot_path(
        conn: &mut PgConnection,
        id: DbId,
        path: &str,
    ) -> Result<u64, sqlx::Error> {
        let result = sqlx::query(
            "UPDATE import_versions SET snapshot_path = $2 WHERE id = $1 AND status = $3",
        )
        .bind(id)
        .bind(path)
        .bind(VersionStatus::Draft.as_str())
        .execute(&mut *conn)
        .await?;
        Ok(result.rows_affected())
    }

    /// `draft -> published`. The table's check constraint refuses the
    /// update when no snapshot path is recorded.
    pub async fn mark_published(
        conn: &mut PgConnection,
        id: DbId,
        diff_path: &str,
        published_by: &str,
    ) -> Result<u64, sqlx::Error> {
        let result = sqlx::query(
            "UPDATE import_versions \
             SET status = $2, diff_path = $3, published_by = $4, published_at = NOW() \
             WHERE id = $1 AND status = $5",
        )
        .bind(id)
        .bind(VersionStatus::Published.as_str())
        .bind(diff_path)
        .bind(published_by)
        .bind(VersionStatus::Draft.as_str())
        .execute(&mut *conn)
        .await?;
        Ok(result.rows_affected())
    }

    /// `published -> rolled_back`.
    pub async fn mark_rolled_back(conn: &mut PgConnection, id: DbId) -> Result<u64, sqlx::Error> {
        let result = sqlx::query(
            "UPDATE import_versions SET status = $2, rolled_back_at = NOW() \
             WHERE id = $1 AND status = $3",
        )
        .bind(id)
        .bind(VersionStatus::RolledBack.as_str())
        .bind(VersionStatus::Published.as_str())
        .execute(&mut *conn)
        .await?;
        Ok(result.rows_affected())
    }
}
