use std::sync::Arc;

use crate::artifacts::LocalArtifactStore;
use crate::config::ServerConfig;
use crate::engine::JobRunner;

/// Shared application state available to all Axum handlers via `State<AppState>`.
///
/// This is cheaply cloneable (inner data is behind `Arc` or is already `Clone`).
#[derive(Clone)]
pub struct AppState {
    /// Database connection pool.
    pub pool: linework_db::DbPool,
    /// Server configuration, including the imports-frozen switch.
    pub config: Arc<ServerConfig>,
    /// Uploads, snapshots and applied diffs.
    pub artifacts: Arc<LocalArtifactStore>,
    /// Runs validation, publish and rollback jobs off the request path.
    pub runner: JobRunner,
}

impl AppState {
    pub fn new(pool: linework_db::DbPool, config: ServerConfig) -> Self {
        let config = Arc::new(config);
        let artifacts = Arc::new(LocalArtifactStore::new(config.artifact_root.clone()));
        let runner = JobRunner::new(pool.clone(), Arc::clone(&config), Arc::clone(&artifacts));
        Self {
            pool,
            config,
            artifacts,
            runner,
        }
    }
}
