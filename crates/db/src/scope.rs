//! PostgreSQL implementation of [`ScopeTransaction`].

use async_trait::async_trait;
use sqlx::{PgPool, Postgres, Transaction};

use linework_core::geometry::BoundingBox;
use linework_core::production::ProductionRecord;
use linework_core::store::{LockedVersion, RecordMutation, ScopeTransaction, StoreError};
use linework_core::types::DbId;

use crate::repositories::{AssetRepo, ImportVersionRepo};

/// SQLSTATE codes after which the whole transaction may be retried.
const RETRYABLE_SQLSTATES: [&str; 2] = ["40001", "40P01"];

/// Whether `err` is a serialization failure or deadlock.
pub fn is_retryable(err: &sqlx::Error) -> bool {
    match err {
        sqlx::Error::Database(db) => db
            .code()
            .is_some_and(|code| RETRYABLE_SQLSTATES.contains(&&*code)),
        _ => false,
    }
}

pub fn store_error(err: sqlx::Error) -> StoreError {
    if is_retryable(&err) {
        StoreError::retryable(err.to_string())
    } else {
        StoreError::fatal(err.to_string())
    }
}

fn expect_row(affected: u64, what: &str, version_id: DbId) -> Result<(), StoreError> {
    if affected == 0 {
        return Err(StoreError::fatal(format!(
            "{what} affected no rows for import version {version_id}"
        )));
    }
    Ok(())
}

/// One `SERIALIZABLE` transaction over the ledger and the asset table.
///
/// Dropping a `PgScope` without calling [`PgScope::commit`] rolls back.
pub struct PgScope {
    tx: Transaction<'static, Postgres>,
}

impl PgScope {
    pub async fn begin(pool: &PgPool) -> Result<Self, StoreError> {
        let mut tx = pool.begin().await.map_err(store_error)?;
        sqlx::query("SET TRANSACTION ISOLATION LEVEL SERIALIZABLE")
            .execute(&mut *tx)
            .await
            .map_err(store_error)?;
        Ok(Self { tx })
    }

    /// A serialization failure can surface here, so this is retryable too.
    pub async fn commit(self) -> Result<(), StoreError> {
        self.tx.commit().await.map_err(store_error)
    }
}

#[async_trait]
impl ScopeTransaction for PgScope {
    async fn lock_version(&mut self, version_id: DbId) -> Result<Option<LockedVersion>, StoreError> {
        let row = ImportVersionRepo::lock_for_update(&mut self.tx, version_id)
            .await
            .map_err(store_error)?;
        row.map(|v| v.to_locked().map_err(|e| StoreError::fatal(e.to_string())))
            .transpose()
    }

    async fn load_scope(
        &mut self,
        scope: &BoundingBox,
        feature_ids: &[String],
    ) -> Result<Vec<ProductionRecord>, StoreError> {
        let rows = AssetRepo::load_scope(&mut self.tx, scope, feature_ids)
            .await
            .map_err(store_error)?;
        Ok(rows.into_iter().map(ProductionRecord::from).collect())
    }

    async fn records_created_by(&mut self, version_id: DbId) -> Result<Vec<String>, StoreError> {
        AssetRepo::created_by_version(&mut self.tx, version_id)
            .await
            .map_err(store_error)
    }

    async fn apply(&mut self, version_id: DbId, mutation: &RecordMutation) -> Result<(), StoreError> {
        let conn = &mut *self.tx;
        match mutation {
            RecordMutation::Insert(record) => AssetRepo::insert(conn, version_id, record)
                .await
                .map_err(store_error),
            RecordMutation::Update(record) => {
                let affected = AssetRepo::update(conn, version_id, record)
                    .await
                    .map_err(store_error)?;
                expect_row(affected, "asset update", version_id)
            }
            RecordMutation::Deactivate { feature_id } => {
                AssetRepo::deactivate(conn, version_id, feature_id)
                    .await
                    .map_err(store_error)?;
                Ok(())
            }
            RecordMutation::Restore(record) => AssetRepo::restore(conn, version_id, record)
                .await
                .map_err(store_error),
            RecordMutation::Remove { feature_id } => {
                AssetRepo::remove(conn, feature_id).await.map_err(store_error)?;
                Ok(())
            }
        }
    }

    async fn set_snapshot_path(&mut self, version_id: DbId, path: &str) -> Result<(), StoreError> {
        let affected = ImportVersionRepo::set_snapshot_path(&mut self.tx, version_id, path)
            .await
            .map_err(store_error)?;
        expect_row(affected, "snapshot path update", version_id)
    }

    async fn mark_published(
        &mut self,
        version_id: DbId,
        diff_path: &str,
        published_by: &str,
    ) -> Result<(), StoreError> {
        let affected =
            ImportVersionRepo::mark_published(&mut self.tx, version_id, diff_path, published_by)
                .await
                .map_err(store_error)?;
        expect_row(affected, "publish", version_id)
    }

    async fn mark_rolled_back(&mut self, version_id: DbId) -> Result<(), StoreError> {
        let affected = ImportVersionRepo::mark_rolled_back(&mut self.tx, version_id)
            .await
            .map_err(store_error)?;
        expect_row(affected, "rollback", version_id)
    }
}
