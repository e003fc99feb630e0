//! Production asset rows as the import engine reads them.

use sqlx::types::Json;
use sqlx::FromRow;

use linework_core::feature::Properties;
use linework_core::geometry::Geometry;
use linework_core::production::ProductionRecord;
use linework_core::types::DbId;

/// The columns of `assets` the engine reads.
#[derive(Debug, Clone, FromRow)]
pub struct AssetRow {
    pub feature_id: String,
    pub geometry: Json<Geometry>,
    pub properties: Json<Properties>,
    pub is_active: bool,
    pub data_source: Option<String>,
    pub created_by_version_id: Option<DbId>,
}

impl From<AssetRow> for ProductionRecord {
    fn from(row: AssetRow) -> Self {
        ProductionRecord {
            feature_id: row.feature_id,
            geometry: row.geometry.0,
            properties: row.properties.0,
            is_active: row.is_active,
            data_source: row.data_source,
        }
    }
}
