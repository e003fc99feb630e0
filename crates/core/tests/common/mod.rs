//! In-memory implementations of the storage seams for publish and rollback
//! tests.
//!
//! [`MemoryDb::begin`] hands out a [`MemoryScope`] working on a private copy
//! of the state; only [`MemoryScope::commit`] makes its writes visible, so
//! a test can drop a scope to simulate a rolled-back transaction.

#![allow(dead_code)]

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use serde_json::{json, Value};

use linework_core::feature::{CanonicalFeature, Properties};
use linework_core::geometry::{BoundingBox, Geometry};
use linework_core::import_version::{MergeMode, VersionStatus};
use linework_core::production::ProductionRecord;
use linework_core::store::{
    ArtifactError, ArtifactStore, LockedVersion, ProgressSink, RecordMutation, ScopeTransaction,
    StoreError,
};
use linework_core::types::DbId;

pub type EventLog = Arc<Mutex<Vec<String>>>;

#[derive(Debug, Clone)]
pub struct StoredRecord {
    pub record: ProductionRecord,
    pub created_by: Option<DbId>,
}

#[derive(Debug, Clone, Default)]
pub struct MemoryState {
    pub versions: HashMap<DbId, LockedVersion>,
    pub published_by: HashMap<DbId, String>,
    pub records: BTreeMap<String, StoredRecord>,
}

#[derive(Clone, Default)]
pub struct MemoryDb {
    pub state: Arc<Mutex<MemoryState>>,
    pub events: EventLog,
}

impl MemoryDb {
    pub fn begin(&self) -> MemoryScope {
        MemoryScope {
            db: self.clone(),
            working: self.state.lock().unwrap().clone(),
            fail_after_applies: None,
            conflict_on_lock: false,
            applies: 0,
        }
    }

    pub fn add_version(&self, version: LockedVersion) {
        self.state.lock().unwrap().versions.insert(version.id, version);
    }

    pub fn version(&self, id: DbId) -> LockedVersion {
        self.state.lock().unwrap().versions[&id].clone()
    }

    pub fn seed(&self, record: ProductionRecord) {
        self.state.lock().unwrap().records.insert(
            record.feature_id.clone(),
            StoredRecord { record, created_by: None },
        );
    }

    pub fn record(&self, feature_id: &str) -> Option<ProductionRecord> {
        self.state
            .lock()
            .unwrap()
            .records
            .get(feature_id)
            .map(|r| r.record.clone())
    }

    pub fn records(&self) -> Vec<ProductionRecord> {
        self.state
            .lock()
            .unwrap()
            .records
            .values()
            .map(|r| r.record.clone())
            .collect()
    }

    pub fn events(&self) -> Vec<String> {
        self.events.lock().unwrap().clone()
    }
}

pub struct MemoryScope {
    db: MemoryDb,
    working: MemoryState,
    /// Fail the n-th `apply` call (1-based) with a fatal error.
    pub fail_after_applies: Option<usize>,
    /// Fail `lock_version` with a retryable serialization error.
    pub conflict_on_lock: bool,
    applies: usize,
}

impl MemoryScope {
    pub fn commit(self) {
        *self.db.state.lock().unwrap() = self.working;
        self.db.events.lock().unwrap().push("tx:commit".into());
    }

    fn log(&self, event: String) {
        self.db.events.lock().unwrap().push(event);
    }

    fn version_mut(&mut self, id: DbId) -> Result<&mut LockedVersion, StoreError> {
        self.working
            .versions
            .get_mut(&id)
            .ok_or_else(|| StoreError::fatal(format!("version {id} missing")))
    }
}

#[async_trait]
impl ScopeTransaction for MemoryScope {
    async fn lock_version(&mut self, version_id: DbId) -> Result<Option<LockedVersion>, StoreError> {
        if self.conflict_on_lock {
            return Err(StoreError::retryable("could not serialize access"));
        }
        self.log(format!("tx:lock {version_id}"));
        Ok(self.working.versions.get(&version_id).cloned())
    }

    async fn load_scope(
        &mut self,
        scope: &BoundingBox,
        feature_ids: &[String],
    ) -> Result<Vec<ProductionRecord>, StoreError> {
        self.log("tx:load_scope".into());
        Ok(self
            .working
            .records
            .values()
            .filter(|r| r.record.intersects(scope) || feature_ids.contains(&r.record.feature_id))
            .map(|r| r.record.clone())
            .collect())
    }

    async fn records_created_by(&mut self, version_id: DbId) -> Result<Vec<String>, StoreError> {
        Ok(self
            .working
            .records
            .values()
            .filter(|r| r.created_by == Some(version_id))
            .map(|r| r.record.feature_id.clone())
            .collect())
    }

    async fn apply(&mut self, version_id: DbId, mutation: &RecordMutation) -> Result<(), StoreError> {
        self.applies += 1;
        if self.fail_after_applies == Some(self.applies) {
            return Err(StoreError::fatal("constraint violated"));
        }
        let records = &mut self.working.records;
        let label = match mutation {
            RecordMutation::Insert(record) => {
                if records.contains_key(&record.feature_id) {
                    return Err(StoreError::fatal("duplicate feature id"));
                }
                records.insert(
                    record.feature_id.clone(),
                    StoredRecord { record: record.clone(), created_by: Some(version_id) },
                );
                format!("insert {}", record.feature_id)
            }
            RecordMutation::Update(record) => {
                let stored = records
                    .get_mut(&record.feature_id)
                    .ok_or_else(|| StoreError::fatal("update of missing record"))?;
                let data_source = record
                    .data_source
                    .clone()
                    .or_else(|| stored.record.data_source.clone());
                stored.record = ProductionRecord {
                    data_source,
                    is_active: true,
                    ..record.clone()
                };
                format!("update {}", record.feature_id)
            }
            RecordMutation::Deactivate { feature_id } => {
                if let Some(stored) = records.get_mut(feature_id) {
                    stored.record.is_active = false;
                }
                format!("deactivate {feature_id}")
            }
            RecordMutation::Restore(record) => {
                let created_by = records.get(&record.feature_id).and_then(|r| r.created_by);
                records.insert(
                    record.feature_id.clone(),
                    StoredRecord { record: record.clone(), created_by },
                );
                format!("restore {}", record.feature_id)
            }
            RecordMutation::Remove { feature_id } => {
                records.remove(feature_id);
                format!("remove {feature_id}")
            }
        };
        self.log(format!("tx:{label}"));
        Ok(())
    }

    async fn set_snapshot_path(&mut self, version_id: DbId, path: &str) -> Result<(), StoreError> {
        self.version_mut(version_id)?.snapshot_path = Some(path.to_string());
        self.log("tx:set_snapshot_path".into());
        Ok(())
    }

    async fn mark_published(
        &mut self,
        version_id: DbId,
        diff_path: &str,
        published_by: &str,
    ) -> Result<(), StoreError> {
        let version = self.version_mut(version_id)?;
        if version.snapshot_path.is_none() {
            return Err(StoreError::fatal("published without snapshot"));
        }
        version.status = VersionStatus::Published;
        version.diff_path = Some(diff_path.to_string());
        self.working
            .published_by
            .insert(version_id, published_by.to_string());
        self.log("tx:mark_published".into());
        Ok(())
    }

    async fn mark_rolled_back(&mut self, version_id: DbId) -> Result<(), StoreError> {
        self.version_mut(version_id)?.status = VersionStatus::RolledBack;
        self.log("tx:mark_rolled_back".into());
        Ok(())
    }
}

#[derive(Clone, Default)]
pub struct MemoryArtifacts {
    pub blobs: Arc<Mutex<HashMap<String, Vec<u8>>>>,
    pub events: EventLog,
}

impl MemoryArtifacts {
    pub fn sharing_log(db: &MemoryDb) -> Self {
        Self {
            blobs: Arc::default(),
            events: db.events.clone(),
        }
    }

    pub fn overwrite(&self, path: &str, bytes: &[u8]) {
        self.blobs.lock().unwrap().insert(path.to_string(), bytes.to_vec());
    }

    pub fn delete(&self, path: &str) {
        self.blobs.lock().unwrap().remove(path);
    }

    pub fn get_now(&self, path: &str) -> Vec<u8> {
        self.blobs.lock().unwrap()[path].clone()
    }
}

#[async_trait]
impl ArtifactStore for MemoryArtifacts {
    async fn put(&self, key: &str, bytes: Vec<u8>) -> Result<String, ArtifactError> {
        let mut blobs = self.blobs.lock().unwrap();
        if blobs.contains_key(key) {
            return Err(ArtifactError::AlreadyExists(key.to_string()));
        }
        blobs.insert(key.to_string(), bytes);
        let prefix = key.split('/').next().unwrap_or(key);
        self.events.lock().unwrap().push(format!("artifact:put {prefix}"));
        Ok(key.to_string())
    }

    async fn get(&self, path: &str) -> Result<Vec<u8>, ArtifactError> {
        self.blobs
            .lock()
            .unwrap()
            .get(path)
            .cloned()
            .ok_or_else(|| ArtifactError::NotFound(path.to_string()))
    }
}

/// Collects every reported percentage.
#[derive(Default)]
pub struct RecordingProgress(pub Mutex<Vec<u8>>);

impl ProgressSink for RecordingProgress {
    fn report(&self, percent: u8) {
        self.0.lock().unwrap().push(percent);
    }
}

// ── Fixtures ─────────────────────────────────────────────────────────

pub const SCOPE: BoundingBox = BoundingBox { min_x: 0.0, min_y: 0.0, max_x: 10.0, max_y: 10.0 };

pub fn props(value: Value) -> Properties {
    value.as_object().cloned().unwrap_or_default()
}

pub fn line(x: f64) -> Geometry {
    Geometry::LineString(vec![[x, 1.0], [x + 1.0, 2.0]])
}

pub fn draft(id: DbId, merge_mode: MergeMode) -> LockedVersion {
    LockedVersion {
        id,
        status: VersionStatus::Draft,
        import_scope: Some(SCOPE),
        merge_mode,
        default_data_source: Some("import-2024".into()),
        snapshot_path: None,
        diff_path: None,
    }
}

pub fn feature(index: usize, id: Option<&str>, geometry: Geometry) -> CanonicalFeature {
    CanonicalFeature {
        index,
        feature_id: id.map(str::to_string),
        geometry: Some(geometry),
        geometry_error: None,
        properties: props(json!({ "lanes": 2 })),
    }
}

pub fn record(id: &str, geometry: Geometry, is_active: bool) -> ProductionRecord {
    ProductionRecord {
        feature_id: id.to_string(),
        geometry,
        properties: props(json!({ "lanes": 2 })),
        is_active,
        data_source: Some("legacy".into()),
    }
}

/// Scenario B: one unchanged, one moved, one new, and one in-scope record
/// the import does not mention. A fifth record lies outside the scope.
pub fn scenario_b(db: &MemoryDb) -> Vec<CanonicalFeature> {
    db.seed(record("same", line(1.0), true));
    db.seed(record("moved", line(3.0), true));
    db.seed(record("gone", line(8.0), true));
    db.seed(record("far", line(50.0), true));
    vec![
        feature(0, Some("same"), line(1.0)),
        feature(1, Some("moved"), line(3.5)),
        feature(2, Some("new"), line(6.0)),
    ]
}
