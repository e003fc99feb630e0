//! Snapshot and diff artifact formats.
//!
//! A snapshot is a GeoJSON `FeatureCollection` with foreign members that
//! make it replayable: the owning version, capture time, scope, and each
//! feature's `isActive` flag and `dataSource` tag. The applied-diff
//! artifact is the [`DiffResult`] written at publish time.

use serde::{Deserialize, Serialize};

use crate::diff::DiffResult;
use crate::feature::Properties;
use crate::geometry::{BoundingBox, Geometry};
use crate::production::ProductionRecord;
use crate::types::{DbId, Timestamp};

pub const SNAPSHOT_FORMAT: u32 = 1;

/// Key under which a version's snapshot is written. Each attempt gets a
/// fresh key so a retried publish never collides with an earlier write.
pub fn snapshot_key(version_id: DbId) -> String {
    format!("snapshots/version-{version_id}/{}.geojson", uuid::Uuid::now_v7())
}

pub fn diff_key(version_id: DbId) -> String {
    format!("diffs/version-{version_id}/{}.json", uuid::Uuid::now_v7())
}

#[derive(Debug, Clone, PartialEq)]
pub struct Snapshot {
    pub version_id: DbId,
    pub captured_at: Timestamp,
    pub scope: BoundingBox,
    pub records: Vec<ProductionRecord>,
}

#[derive(Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SnapshotDocument {
    #[serde(rename = "type")]
    kind: String,
    format: u32,
    version_id: DbId,
    captured_at: Timestamp,
    scope: BoundingBox,
    features: Vec<SnapshotFeature>,
}

#[derive(Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SnapshotFeature {
    #[serde(rename = "type")]
    kind: String,
    id: String,
    geometry: Geometry,
    properties: Properties,
    is_active: bool,
    #[serde(default)]
    data_source: Option<String>,
}

impl Snapshot {
    pub fn to_bytes(&self) -> Result<Vec<u8>, serde_json::Error> {
        let doc = SnapshotDocument {
            kind: "FeatureCollection".into(),
            format: SNAPSHOT_FORMAT,
            version_id: self.version_id,
            captured_at: self.captured_at,
            scope: self.scope,
            features: self
                .records
                .iter()
                .map(|r| SnapshotFeature {
                    kind: "Feature".into(),
                    id: r.feature_id.clone(),
                    geometry: r.geometry.clone(),
                    properties: r.properties.clone(),
                    is_active: r.is_active,
                    data_source: r.data_source.clone(),
                })
                .collect(),
        };
        serde_json::to_vec(&doc)
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Snapshot, String> {
        let doc: SnapshotDocument = serde_json::from_slice(bytes).map_err(|e| e.to_string())?;
        if doc.kind != "FeatureCollection" {
            return Err(format!("expected a FeatureCollection, found '{}'", doc.kind));
        }
        if doc.format != SNAPSHOT_FORMAT {
            return Err(format!("unsupported snapshot format {}", doc.format));
        }
        Ok(Snapshot {
            version_id: doc.version_id,
            captured_at: doc.captured_at,
            scope: doc.scope,
            records: doc
                .features
                .into_iter()
                .map(|f| ProductionRecord {
                    feature_id: f.id,
                    geometry: f.geometry,
                    properties: f.properties,
                    is_active: f.is_active,
                    data_source: f.data_source,
                })
                .collect(),
        })
    }
}

/// The change set as actually applied, kept for audit after production drifts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AppliedDiff {
    pub version_id: DbId,
    pub applied_at: Timestamp,
    pub published_by: String,
    pub snapshot_path: String,
    #[serde(flatten)]
    pub diff: DiffResult,
}

impl AppliedDiff {
    pub fn to_bytes(&self) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec(self)
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<AppliedDiff, serde_json::Error> {
        serde_json::from_slice(bytes)
    }
}
