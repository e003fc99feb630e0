pub mod health;
pub mod imports;

use axum::Router;

use crate::state::AppState;

/// Build the `/api/v1` route tree.
///
/// Route hierarchy:
///
/// ```text
/// /imports                          list versions
/// /imports/upload                   upload a file (POST, multipart)
/// /imports/jobs/{job_id}            poll a job
/// /imports/{id}                     get, delete draft
/// /imports/{id}/layers              layers in the uploaded file
/// /imports/{id}/configure           configure a draft (POST)
/// /imports/{id}/validate            submit validation (POST)
/// /imports/{id}/validation          latest validation report
/// /imports/{id}/preview             diff against production
/// /imports/{id}/publish             submit publish (POST)
/// /imports/{id}/rollback            submit rollback (POST)
/// /imports/{id}/history             diff as applied at publish
/// /imports/{id}/archive             published -> archived (POST)
/// /imports/{id}/jobs                jobs for a version
/// ```
pub fn api_routes() -> Router<AppState> {
    Router::new().nest("/imports", imports::router())
}
