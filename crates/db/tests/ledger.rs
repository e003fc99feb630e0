//! Ledger, job and publish integration tests against PostgreSQL.
//!
//! `#[sqlx::test]` creates a fresh database per test on the server named by
//! `DATABASE_URL` and applies the crate's migrations.

use std::collections::HashMap;
use std::sync::Mutex;

use assert_matches::assert_matches;
use async_trait::async_trait;
use serde_json::json;
use sqlx::PgPool;

use linework_core::feature::CanonicalFeature;
use linework_core::geometry::{BoundingBox, Geometry};
use linework_core::import_version::{ImportFormat, VersionStatus};
use linework_core::job::JobType;
use linework_core::production::ProductionRecord;
use linework_core::publish::{capture_then_apply, PublishRequest};
use linework_core::rollback::restore_snapshot;
use linework_core::store::{ArtifactError, ArtifactStore, NoProgress, RecordMutation, ScopeTransaction};
use linework_core::validation::ValidationConfig;
use linework_db::models::import_version::{ConfigureImportVersion, CreateImportVersion};
use linework_db::repositories::import_job_repo::ACTIVE_JOB_CONSTRAINT;
use linework_db::repositories::{AssetRepo, ImportJobRepo, ImportVersionRepo};
use linework_db::scope::PgScope;

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

const SCOPE: BoundingBox = BoundingBox { min_x: 0.0, min_y: 0.0, max_x: 10.0, max_y: 10.0 };

#[derive(Default)]
struct MemoryArtifacts(Mutex<HashMap<String, Vec<u8>>>);

#[async_trait]
impl ArtifactStore for MemoryArtifacts {
    async fn put(&self, key: &str, bytes: Vec<u8>) -> Result<String, ArtifactError> {
        self.0.lock().unwrap().insert(key.to_string(), bytes);
        Ok(key.to_string())
    }

    async fn get(&self, path: &str) -> Result<Vec<u8>, ArtifactError> {
        self.0
            .lock()
            .unwrap()
            .get(path)
            .cloned()
            .ok_or_else(|| ArtifactError::NotFound(path.to_string()))
    }
}

fn new_upload(name: &str) -> CreateImportVersion {
    CreateImportVersion {
        file_name: name.to_string(),
        format: ImportFormat::GeoJson,
        file_path: format!("uploads/test/{name}"),
        file_size_bytes: 128,
        checksum_sha256: "00".repeat(32),
        feature_count: 2,
        layer_name: Some("roads".into()),
        source_crs: None,
        uploaded_by: "tester".into(),
    }
}

fn configuration(regional_refresh: bool) -> ConfigureImportVersion {
    ConfigureImportVersion {
        layer_name: Some("roads".into()),
        source_crs: Some("EPSG:4326".into()),
        default_data_source: Some("survey-2024".into()),
        regional_refresh,
        id_property: "id".into(),
        required_attributes: vec![],
        notes: Some("spring survey".into()),
        import_scope: Some(SCOPE),
    }
}

fn line(x: f64) -> Geometry {
    Geometry::LineString(vec![[x, 1.0], [x + 1.0, 2.0]])
}

fn record(id: &str, x: f64) -> ProductionRecord {
    ProductionRecord {
        feature_id: id.to_string(),
        geometry: line(x),
        properties: json!({ "lanes": 2 }).as_object().cloned().unwrap(),
        is_active: true,
        data_source: Some("legacy".into()),
    }
}

fn feature(index: usize, id: &str, x: f64) -> CanonicalFeature {
    CanonicalFeature {
        index,
        feature_id: Some(id.to_string()),
        geometry: Some(line(x)),
        geometry_error: None,
        properties: json!({ "lanes": 2 }).as_object().cloned().unwrap(),
    }
}

async fn seed_assets(pool: &PgPool, records: &[ProductionRecord]) {
    let mut conn = pool.acquire().await.unwrap();
    for r in records {
        sqlx::query(
            "INSERT INTO assets (feature_id, geometry, properties, is_active, data_source, \
                 min_x, min_y, max_x, max_y) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)",
        )
        .bind(&r.feature_id)
        .bind(sqlx::types::Json(&r.geometry))
        .bind(sqlx::types::Json(&r.properties))
        .bind(r.is_active)
        .bind(&r.data_source)
        .bind(r.bbox().unwrap().min_x)
        .bind(r.bbox().unwrap().min_y)
        .bind(r.bbox().unwrap().max_x)
        .bind(r.bbox().unwrap().max_y)
        .execute(&mut *conn)
        .await
        .unwrap();
    }
}

async fn production(pool: &PgPool) -> Vec<ProductionRecord> {
    let mut conn = pool.acquire().await.unwrap();
    let everywhere = BoundingBox { min_x: -180.0, min_y: -90.0, max_x: 180.0, max_y: 90.0 };
    AssetRepo::load_scope(&mut conn, &everywhere, &[])
        .await
        .unwrap()
        .into_iter()
        .map(ProductionRecord::from)
        .collect()
}

// ---------------------------------------------------------------------------
// Test: version ledger
// ---------------------------------------------------------------------------

#[sqlx::test(migrations = "./migrations")]
async fn version_numbers_increase(pool: PgPool) {
    let a = ImportVersionRepo::create(&pool, &new_upload("a.geojson")).await.unwrap();
    let b = ImportVersionRepo::create(&pool, &new_upload("b.geojson")).await.unwrap();
    ImportVersionRepo::delete_draft(&pool, b.id).await.unwrap();
    let c = ImportVersionRepo::create(&pool, &new_upload("c.geojson")).await.unwrap();

    assert!(a.version_number < b.version_number);
    assert!(b.version_number < c.version_number);
    assert_eq!(a.status, "draft");
    assert_eq!(ImportVersionRepo::count(&pool, Some("draft")).await.unwrap(), 2);
}

#[sqlx::test(migrations = "./migrations")]
async fn configure_records_scope_and_options(pool: PgPool) {
    let v = ImportVersionRepo::create(&pool, &new_upload("a.geojson")).await.unwrap();

    let configured = ImportVersionRepo::configure(&pool, v.id, &configuration(true))
        .await
        .unwrap()
        .unwrap();

    assert!(configured.is_configured());
    assert_eq!(configured.scope(), Some(SCOPE));
    assert!(configured.regional_refresh);
    assert_eq!(configured.default_data_source.as_deref(), Some("survey-2024"));
    assert_eq!(configured.notes.as_deref(), Some("spring survey"));
}

#[sqlx::test(migrations = "./migrations")]
async fn publish_without_snapshot_is_refused_by_the_table(pool: PgPool) {
    let v = ImportVersionRepo::create(&pool, &new_upload("a.geojson")).await.unwrap();

    let mut conn = pool.acquire().await.unwrap();
    let err = ImportVersionRepo::mark_published(&mut conn, v.id, "diffs/x.json", "tester")
        .await
        .unwrap_err();
    assert_matches!(err, sqlx::Error::Database(_));
}

#[sqlx::test(migrations = "./migrations")]
async fn archive_requires_published(pool: PgPool) {
    let v = ImportVersionRepo::create(&pool, &new_upload("a.geojson")).await.unwrap();
    assert!(ImportVersionRepo::archive(&pool, v.id).await.unwrap().is_none());
}

// ---------------------------------------------------------------------------
// Test: job exclusion
// ---------------------------------------------------------------------------

#[sqlx::test(migrations = "./migrations")]
async fn one_active_job_per_version(pool: PgPool) {
    let v = ImportVersionRepo::create(&pool, &new_upload("a.geojson")).await.unwrap();
    let other = ImportVersionRepo::create(&pool, &new_upload("b.geojson")).await.unwrap();

    let job = ImportJobRepo::submit(&pool, v.id, JobType::Validation, "tester").await.unwrap();
    let err = ImportJobRepo::submit(&pool, v.id, JobType::Publish, "tester")
        .await
        .unwrap_err();
    assert_matches!(
        err,
        sqlx::Error::Database(ref db) if db.constraint() == Some(ACTIVE_JOB_CONSTRAINT)
    );

    // Unrelated versions are not blocked.
    ImportJobRepo::submit(&pool, other.id, JobType::Validation, "tester").await.unwrap();

    // Once terminal, the version is free again.
    assert!(ImportJobRepo::mark_running(&pool, job.id).await.unwrap());
    assert!(ImportJobRepo::fail(&pool, job.id, "boom").await.unwrap());
    assert!(!ImportJobRepo::fail(&pool, job.id, "again").await.unwrap());
    ImportJobRepo::submit(&pool, v.id, JobType::Validation, "tester").await.unwrap();
}

const ALL_JOB_TYPES: [JobType; 3] = [JobType::Validation, JobType::Publish, JobType::Rollback];

fn assert_active_job_conflict(err: sqlx::Error) {
    assert_matches!(
        err,
        sqlx::Error::Database(ref db) if db.constraint() == Some(ACTIVE_JOB_CONSTRAINT)
    );
}

#[sqlx::test(migrations = "./migrations")]
async fn every_job_type_waits_for_the_active_one(pool: PgPool) {
    for holder in ALL_JOB_TYPES {
        let v = ImportVersionRepo::create(&pool, &new_upload("a.geojson")).await.unwrap();
        let job = ImportJobRepo::submit(&pool, v.id, holder, "tester").await.unwrap();

        // Pending holds the version.
        for attempt in ALL_JOB_TYPES {
            let err = ImportJobRepo::submit(&pool, v.id, attempt, "tester")
                .await
                .unwrap_err();
            assert_active_job_conflict(err);
        }

        // So does running.
        assert!(ImportJobRepo::mark_running(&pool, job.id).await.unwrap());
        for attempt in ALL_JOB_TYPES {
            let err = ImportJobRepo::submit(&pool, v.id, attempt, "tester")
                .await
                .unwrap_err();
            assert_active_job_conflict(err);
        }

        let active = ImportJobRepo::find_active_for_version(&pool, v.id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(active.id, job.id);
        assert_eq!(active.job_type, holder.as_str());
    }
}

#[sqlx::test(migrations = "./migrations")]
async fn rollback_is_refused_while_a_validation_runs(pool: PgPool) {
    let v = ImportVersionRepo::create(&pool, &new_upload("a.geojson")).await.unwrap();
    let validation = ImportJobRepo::submit(&pool, v.id, JobType::Validation, "tester").await.unwrap();
    assert!(ImportJobRepo::mark_running(&pool, validation.id).await.unwrap());

    let err = ImportJobRepo::submit(&pool, v.id, JobType::Rollback, "tester")
        .await
        .unwrap_err();
    assert_active_job_conflict(err);

    assert!(ImportJobRepo::fail(&pool, validation.id, "boom").await.unwrap());
    let rollback = ImportJobRepo::submit(&pool, v.id, JobType::Rollback, "tester").await.unwrap();
    assert_eq!(rollback.job_type, JobType::Rollback.as_str());
}

#[sqlx::test(migrations = "./migrations")]
async fn progress_never_decreases(pool: PgPool) {
    let v = ImportVersionRepo::create(&pool, &new_upload("a.geojson")).await.unwrap();
    let job = ImportJobRepo::submit(&pool, v.id, JobType::Validation, "tester").await.unwrap();
    ImportJobRepo::mark_running(&pool, job.id).await.unwrap();

    ImportJobRepo::update_progress(&pool, job.id, 60).await.unwrap();
    ImportJobRepo::update_progress(&pool, job.id, 20).await.unwrap();

    let job = ImportJobRepo::find_by_id(&pool, job.id).await.unwrap().unwrap();
    assert_eq!(job.progress_percent, 60);
}

// ---------------------------------------------------------------------------
// Test: publish and rollback through PgScope
// ---------------------------------------------------------------------------

#[sqlx::test(migrations = "./migrations")]
async fn publish_then_rollback_round_trips(pool: PgPool) {
    seed_assets(&pool, &[record("same", 1.0), record("moved", 3.0), record("gone", 8.0)]).await;
    let before = production(&pool).await;

    let v = ImportVersionRepo::create(&pool, &new_upload("a.geojson")).await.unwrap();
    ImportVersionRepo::configure(&pool, v.id, &configuration(true)).await.unwrap();

    let features = vec![feature(0, "same", 1.0), feature(1, "moved", 3.5), feature(2, "new", 6.0)];
    let validation = ValidationConfig::default();
    let artifacts = MemoryArtifacts::default();
    let request = PublishRequest {
        version_id: v.id,
        published_by: "tester",
        features: &features,
        validation: &validation,
    };

    let mut scope = PgScope::begin(&pool).await.unwrap();
    let outcome = capture_then_apply(&mut scope, &artifacts, &request, &NoProgress)
        .await
        .unwrap();
    scope.commit().await.unwrap();

    assert_eq!(outcome.stats.added, 1);
    assert_eq!(outcome.stats.updated, 1);
    assert_eq!(outcome.stats.deactivated, 1);
    let published = ImportVersionRepo::find_by_id(&pool, v.id).await.unwrap().unwrap();
    assert_eq!(published.status().unwrap(), VersionStatus::Published);
    assert_eq!(published.published_by.as_deref(), Some("tester"));

    let mut scope = PgScope::begin(&pool).await.unwrap();
    let rolled = restore_snapshot(&mut scope, &artifacts, v.id, &NoProgress)
        .await
        .unwrap();
    scope.commit().await.unwrap();

    assert_eq!(rolled.removed_count, 1);
    assert_eq!(production(&pool).await, before);
    let version = ImportVersionRepo::find_by_id(&pool, v.id).await.unwrap().unwrap();
    assert_eq!(version.status().unwrap(), VersionStatus::RolledBack);
    assert!(version.rolled_back_at.is_some());
}

#[sqlx::test(migrations = "./migrations")]
async fn dropped_scope_rolls_back(pool: PgPool) {
    let v = ImportVersionRepo::create(&pool, &new_upload("a.geojson")).await.unwrap();

    let mut scope = PgScope::begin(&pool).await.unwrap();
    scope.lock_version(v.id).await.unwrap();
    scope
        .apply(v.id, &RecordMutation::Insert(record("ghost", 2.0)))
        .await
        .unwrap();
    drop(scope);

    assert!(production(&pool).await.is_empty());
}
