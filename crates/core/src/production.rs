use serde::{Deserialize, Serialize};

use crate::feature::Properties;
use crate::geometry::{BoundingBox, Geometry};

/// A live asset record as the import engine sees it.
///
/// The asset domain owns these rows. Imports only insert, update,
/// deactivate and (on rollback) restore or remove them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProductionRecord {
    pub feature_id: String,
    pub geometry: Geometry,
    pub properties: Properties,
    pub is_active: bool,
    pub data_source: Option<String>,
}

impl ProductionRecord {
    pub fn bbox(&self) -> Option<BoundingBox> {
        self.geometry.bbox()
    }

    pub fn intersects(&self, scope: &BoundingBox) -> bool {
        self.bbox().is_some_and(|b| b.intersects(scope))
    }
}
