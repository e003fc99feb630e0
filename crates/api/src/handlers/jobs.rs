//! Handlers for polling import jobs.

use axum::extract::{Path, State};
use axum::Json;

use linework_core::types::DbId;
use linework_db::models::import_job::ImportJob;

use crate::error::AppResult;
use crate::response::DataResponse;
use crate::state::AppState;

/// GET /api/v1/imports/jobs/{job_id}
pub async fn get_job(
    State(state): State<AppState>,
    Path(job_id): Path<DbId>,
) -> AppResult<Json<DataResponse<ImportJob>>> {
    let job = state.runner.get_job(job_id).await?;
    Ok(Json(DataResponse { data: job }))
}
