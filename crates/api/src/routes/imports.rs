//! Route definitions for the `/imports` resource.

use axum::routing::{get, post};
use axum::Router;

use crate::handlers::{imports, jobs};
use crate::state::AppState;

/// Routes mounted at `/imports`.
///
/// ```text
/// GET    /                    -> list_versions
/// POST   /upload              -> upload
/// GET    /jobs/{job_id}       -> get_job
/// GET    /{id}                -> get_version
/// DELETE /{id}                -> delete_version
/// GET    /{id}/layers         -> list_layers
/// POST   /{id}/configure      -> configure
/// POST   /{id}/validate       -> validate
/// GET    /{id}/validation     -> get_validation
/// GET    /{id}/preview        -> preview
/// POST   /{id}/publish        -> publish
/// POST   /{id}/rollback       -> rollback
/// GET    /{id}/history        -> history
/// POST   /{id}/archive        -> archive_version
/// GET    /{id}/jobs           -> list_jobs
/// ```
pub fn router() -> Router<AppState> {
    Router::new()
        .route("/", get(imports::list_versions))
        .route("/upload", post(imports::upload))
        .route("/jobs/{job_id}", get(jobs::get_job))
        .route(
            "/{id}",
            get(imports::get_version).delete(imports::delete_version),
        )
        .route("/{id}/layers", get(imports::list_layers))
        .route("/{id}/configure", post(imports::configure))
        .route("/{id}/validate", post(imports::validate))
        .route("/{id}/validation", get(imports::get_validation))
        .route("/{id}/preview", get(imports::preview))
        .route("/{id}/publish", post(imports::publish))
        .route("/{id}/rollback", post(imports::rollback))
        .route("/{id}/history", get(imports::history))
        .route("/{id}/archive", post(imports::archive_version))
        .route("/{id}/jobs", get(imports::list_jobs))
}
