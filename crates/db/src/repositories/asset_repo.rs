//! Production asset reads and writes made on behalf of imports.
//!
//! All functions run on a transaction connection. Bounding-box columns are
//! kept in step with the geometry so scope queries stay index-backed.

use sqlx::types::Json;
use sqlx::PgConnection;

use linework_core::geometry::BoundingBox;
use linework_core::production::ProductionRecord;
use linework_core::types::DbId;

use crate::models::asset::AssetRow;

const COLUMNS: &str =
    "feature_id, geometry, properties, is_active, data_source, created_by_version_id";

fn bbox_columns(record: &ProductionRecord) -> [Option<f64>; 4] {
    match record.bbox() {
        Some(b) => [Some(b.min_x), Some(b.min_y), Some(b.max_x), Some(b.max_y)],
        None => [None; 4],
    }
}

pub struct AssetRepo;

impl AssetRepo {
    /// Records whose extent intersects `scope` (inclusive), plus any record
    /// named in `feature_ids`, regardless of active flag.
    pub async fn load_scope(
        conn: &mut PgConnection,
        scope: &BoundingBox,
        feature_ids: &[String],
    ) -> Result<Vec<AssetRow>, sqlx::Error> {
        let query = format!(
            "SELECT {COLUMNS} FROM assets \
             WHERE (min_x <= $3 AND max_x >= $1 AND min_y <= $4 AND max_y >= $2) \
                OR feature_id = ANY($5) \
             ORDER BY feature_id"
        );
        sqlx::query_as::<_, AssetRow>(&query)
            .bind(scope.min_x)
            .bind(scope.min_y)
            .bind(scope.max_x)
            .bind(scope.max_y)
            .bind(feature_ids)
            .fetch_all(&mut *conn)
            .await
    }

    pub async fn created_by_version(
        conn: &mut PgConnection,
        version_id: DbId,
    ) -> Result<Vec<String>, sqlx::Error> {
        sqlx::query_scalar::<_, String>(
            "SELECT feature_id FROM assets WHERE created_by_version_id = $1 ORDER BY feature_id",
        )
        .bind(version_id)
        .fetch_all(&mut *conn)
        .await
    }

    pub async fn insert(
        conn: &mut PgConnection,
        version_id: DbId,
        record: &ProductionRecord,
    ) -> Result<(), sqlx::Error> {
        let [min_x, min_y, max_x, max_y] = bbox_columns(record);
        sqlx::query(
            "INSERT INTO assets \
                 (feature_id, geometry, properties, is_active, data_source, \
                  min_x, min_y, max_x, max_y, created_by_version_id, last_import_version_id) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $10)",
        )
        .bind(&record.feature_id)
        .bind(Json(&record.geometry))
        .bind(Json(&record.properties))
        .bind(record.is_active)
        .bind(&record.data_source)
        .bind(min_x)
        .bind(min_y)
        .bind(max_x)
        .bind(max_y)
        .bind(version_id)
        .execute(&mut *conn)
        .await?;
        Ok(())
    }

    /// Replace geometry and attributes and mark active. A `None` data
    /// source keeps the stored tag.
    pub async fn update(
        conn: &mut PgConnection,
        version_id: DbId,
        record: &ProductionRecord,
    ) -> Result<u64, sqlx::Error> {
        let [min_x, min_y, max_x, max_y] = bbox_columns(record);
        let result = sqlx::query(
            "UPDATE assets SET \
                 geometry = $2, properties = $3, is_active = TRUE, \
                 data_source = COALESCE($4, data_source), \
                 min_x = $5, min_y = $6, max_x = $7, max_y = $8, \
                 last_import_version_id = $9 \
             WHERE feature_id = $1",
        )
        .bind(&record.feature_id)
        .bind(Json(&record.geometry))
        .bind(Json(&record.properties))
        .bind(&record.data_source)
        .bind(min_x)
        .bind(min_y)
        .bind(max_x)
        .bind(max_y)
        .bind(version_id)
        .execute(&mut *conn)
        .await?;
        Ok(result.rows_affected())
    }

    pub async fn deactivate(
        conn: &mut PgConnection,
        version_id: DbId,
        feature_id: &str,
    ) -> Result<u64, sqlx::Error> {
        let result = sqlx::query(
            "UPDATE assets SET is_active = FALSE, last_import_version_id = $2 \
             WHERE feature_id = $1",
        )
        .bind(feature_id)
        .bind(version_id)
        .execute(&mut *conn)
        .await?;
        Ok(result.rows_affected())
    }

    /// Write a snapshot record back exactly, recreating it if it was removed.
    pub async fn restore(
        conn: &mut PgConnection,
        version_id: DbId,
        record: &ProductionRecord,
    ) -> Result<(), sqlx::Error> {
        let [min_x, min_y, max_x, max_y] = bbox_columns(record);
        sqlx::query(
            "INSERT INTO assets \
                 (feature_id, geometry, properties, is_active, data_source, \
                  min_x, min_y, max_x, max_y, last_import_version_id) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10) \
             ON CONFLICT (feature_id) DO UPDATE SET \
                 geometry = EXCLUDED.geometry, properties = EXCLUDED.properties, \
                 is_active = EXCLUDED.is_active, data_source = EXCLUDED.data_source, \
                 min_x = EXCLUDED.min_x, min_y = EXCLUDED.min_y, \
                 max_x = EXCLUDED.max_x, max_y = EXCLUDED.max_y, \
                 last_import_version_id = EXCLUDED.last_import_version_id",
        )
        .bind(&record.feature_id)
        .bind(Json(&record.geometry))
        .bind(Json(&record.properties))
        .bind(record.is_active)
        .bind(&record.data_source)
        .bind(min_x)
        .bind(min_y)
        .bind(max_x)
        .bind(max_y)
        .bind(version_id)
        .execute(&mut *conn)
        .await?;
        Ok(())
    }

    pub async fn remove(conn: &mut PgConnection, feature_id: &str) -> Result<u64, sqlx::Error> {
        let result = sqlx::query("DELETE FROM assets WHERE feature_id = $1")
            .bind(feature_id)
            .execute(&mut *conn)
            .await?;
        Ok(result.rows_affected())
    }
}
