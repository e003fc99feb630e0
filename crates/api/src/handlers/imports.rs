//! Handlers for import versions: upload, configuration, preview, and the
//! job-backed validate / publish / rollback operations.
//!
//! State errors are checked here, before any job exists. The work itself
//! runs in [`crate::engine::JobRunner`]; these handlers return the job.

use axum::extract::{Multipart, Path, Query, State};
use axum::http::StatusCode;
use axum::Json;
use sha2::{Digest, Sha256};

use linework_core::crs::Crs;
use linework_core::diff::{compute_diff, DiffOptions, DiffResult};
use linework_core::error::{CoreError, ImportError};
use linework_core::feature::{normalize, scope_of, LayerInfo};
use linework_core::import_version::{ImportFormat, VersionStatus};
use linework_core::job::{JobResultSummary, JobType};
use linework_core::production::ProductionRecord;
use linework_core::snapshot::AppliedDiff;
use linework_core::publish::artifact_error;
use linework_core::store::ArtifactStore;
use linework_core::types::DbId;
use linework_core::validation::ValidationReport;
use linework_db::models::import_job::ImportJob;
use linework_db::models::import_version::{
    ConfigureImportVersion, ConfigureRequest, CreateImportVersion, ImportVersion,
    ImportVersionListQuery,
};
use linework_db::repositories::{AssetRepo, ImportJobRepo, ImportVersionRepo};
use linework_db::DbPool;

use crate::artifacts::upload_key;
use crate::engine::source::{self, SourceFile};
use crate::error::{AppError, AppResult};
use crate::middleware::actor::Actor;
use crate::query::PaginationParams;
use crate::response::{DataResponse, ListResponse};
use crate::state::AppState;

// ---- Helpers ----

async fn find_version(pool: &DbPool, id: DbId) -> AppResult<ImportVersion> {
    Ok(ImportVersionRepo::find_by_id(pool, id)
        .await?
        .ok_or(ImportError::VersionNotFound(id))?)
}

fn ensure_draft(version: &ImportVersion) -> AppResult<()> {
    let status = version.status()?;
    if !status.can_transition_to(VersionStatus::Published) {
        return Err(ImportError::NotDraft {
            id: version.id,
            status: status.to_string(),
        }
        .into());
    }
    Ok(())
}

/// Refuse while any job is pending or running for the version.
async fn ensure_idle(pool: &DbPool, id: DbId) -> AppResult<()> {
    if ImportJobRepo::find_active_for_version(pool, id).await?.is_some() {
        return Err(ImportError::JobAlreadyRunning(id).into());
    }
    Ok(())
}

/// Refuse while a publish or rollback is writing the version's scope.
async fn ensure_not_mutating(pool: &DbPool, id: DbId) -> AppResult<()> {
    if let Some(job) = ImportJobRepo::find_active_for_version(pool, id).await? {
        if job.job_type()?.mutates_production() {
            return Err(ImportError::JobAlreadyRunning(id).into());
        }
    }
    Ok(())
}

fn non_blank(value: Option<String>) -> Option<String> {
    value
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
}

async fn discard_upload(state: &AppState, key: &str) {
    if let Err(e) = state.artifacts.remove(key).await {
        tracing::warn!(key, error = %e, "Failed to remove stored upload");
    }
}

/// What the upload handler learns from reading the file once.
struct Inspected {
    feature_count: usize,
    layer_name: Option<String>,
    source_crs: Option<String>,
}

async fn inspect_upload(state: &AppState, file: SourceFile<'_>) -> Result<Inspected, ImportError> {
    match file.format {
        ImportFormat::GeoJson => {
            let layer = source::read_layer(&state.artifacts, file, None).await?;
            Ok(Inspected {
                feature_count: layer.features.len(),
                layer_name: Some(layer.name),
                source_crs: layer.crs.map(|c| c.code()),
            })
        }
        ImportFormat::GeoPackage => {
            let layers = source::list_layers(&state.artifacts, file).await?;
            if layers.is_empty() {
                return Err(ImportError::Parse {
                    format: ImportFormat::GeoPackage.as_str(),
                    message: "file contains no feature layers".into(),
                });
            }
            let layer_name = match layers.as_slice() {
                [only] => Some(only.name.clone()),
                _ => None,
            };
            Ok(Inspected {
                feature_count: layers.iter().map(|l| l.feature_count).sum(),
                layer_name,
                source_crs: None,
            })
        }
    }
}

// ---- Upload ----

/// POST /api/v1/imports/upload
///
/// Store a `.geojson`, `.json` or `.gpkg` file and create a draft version.
/// The file is parsed once here so a broken upload is rejected before a
/// version exists.
pub async fn upload(
    State(state): State<AppState>,
    actor: Actor,
    mut multipart: Multipart,
) -> AppResult<(StatusCode, Json<DataResponse<ImportVersion>>)> {
    let mut received = None;
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| AppError::BadRequest(e.to_string()))?
    {
        let Some(file_name) = field.file_name().map(str::to_string) else {
            continue;
        };
        let data = field
            .bytes()
            .await
            .map_err(|e| AppError::BadRequest(e.to_string()))?;
        received = Some((file_name, data));
        break;
    }
    let (file_name, data) = received
        .ok_or_else(|| AppError::BadRequest("No file received in multipart upload".to_string()))?;

    let format = ImportFormat::from_file_name(&file_name)
        .ok_or_else(|| ImportError::UnsupportedFormat(file_name.clone()))?;
    if data.is_empty() {
        return Err(AppError::BadRequest("Uploaded file is empty".to_string()));
    }

    let checksum_sha256 = format!("{:x}", Sha256::digest(&data));
    let file_size_bytes = i64::try_from(data.len()).unwrap_or(i64::MAX);
    let key = upload_key(&file_name);
    state
        .artifacts
        .put(&key, data.to_vec())
        .await
        .map_err(|e| ImportError::Artifact(e.to_string()))?;

    let file = SourceFile {
        key: &key,
        file_name: &file_name,
        format,
    };
    let inspected = match inspect_upload(&state, file).await {
        Ok(inspected) => inspected,
        Err(e) => {
            discard_upload(&state, &key).await;
            return Err(e.into());
        }
    };

    let input = CreateImportVersion {
        file_name: file_name.clone(),
        format,
        file_path: key.clone(),
        file_size_bytes,
        checksum_sha256,
        feature_count: i32::try_from(inspected.feature_count).unwrap_or(i32::MAX),
        layer_name: inspected.layer_name,
        source_crs: inspected.source_crs,
        uploaded_by: actor.0,
    };
    let version = match ImportVersionRepo::create(&state.pool, &input).await {
        Ok(version) => version,
        Err(e) => {
            discard_upload(&state, &key).await;
            return Err(e.into());
        }
    };

    tracing::info!(
        version_id = version.id,
        version_number = version.version_number,
        file_name = %version.file_name,
        format = %format,
        feature_count = version.feature_count,
        "Import uploaded",
    );
    Ok((StatusCode::CREATED, Json(DataResponse { data: version })))
}

// ---- Layers & configuration ----

/// GET /api/v1/imports/{id}/layers
pub async fn list_layers(
    State(state): State<AppState>,
    Path(id): Path<DbId>,
) -> AppResult<Json<DataResponse<Vec<LayerInfo>>>> {
    let version = find_version(&state.pool, id).await?;
    let layers = source::list_layers(&state.artifacts, SourceFile::of(&version)?).await?;
    Ok(Json(DataResponse { data: layers }))
}

/// POST /api/v1/imports/{id}/configure
///
/// Pick the layer, CRS, identity and merge settings for a draft, then
/// recompute the import scope from the configured layer. Fields left out
/// keep their current value.
pub async fn configure(
    State(state): State<AppState>,
    Path(id): Path<DbId>,
    Json(body): Json<ConfigureRequest>,
) -> AppResult<Json<DataResponse<ImportVersion>>> {
    let version = find_version(&state.pool, id).await?;
    ensure_draft(&version)?;
    ensure_idle(&state.pool, id).await?;
    let file = SourceFile::of(&version)?;

    let requested_layer = non_blank(body.layer_name);
    let layer_changed = requested_layer.is_some() && requested_layer != version.layer_name;
    let mut layer_name = requested_layer.or_else(|| version.layer_name.clone());
    if layer_name.is_none() && file.format.is_multi_layer() {
        let layers = source::list_layers(&state.artifacts, file).await?;
        match layers.as_slice() {
            [only] => layer_name = Some(only.name.clone()),
            _ => {
                return Err(AppError::BadRequest(
                    "layerName is required for files with more than one layer".to_string(),
                ))
            }
        }
    }

    let crs_override = match non_blank(body.source_crs) {
        Some(raw) => Some(Crs::parse(&raw)?),
        None if !layer_changed => version.source_crs.as_deref().map(Crs::parse).transpose()?,
        None => None,
    };

    let layer = source::read_layer(&state.artifacts, file, layer_name.as_deref()).await?;
    let detected_crs = layer.crs;
    let layer_name = Some(layer.name.clone());
    let id_property = non_blank(body.id_property).unwrap_or_else(|| version.id_property.clone());
    let features = normalize(layer, &id_property, crs_override);
    let import_scope = scope_of(&features);
    if import_scope.is_none() {
        tracing::warn!(version_id = id, "Configured layer has no geometry, scope is empty");
    }

    let input = ConfigureImportVersion {
        layer_name,
        source_crs: crs_override.or(detected_crs).map(|c| c.code()),
        default_data_source: non_blank(body.default_data_source)
            .or_else(|| version.default_data_source.clone()),
        regional_refresh: body.regional_refresh.unwrap_or(version.regional_refresh),
        id_property,
        required_attributes: body
            .required_attributes
            .map(|attrs| {
                attrs
                    .into_iter()
                    .filter_map(|a| non_blank(Some(a)))
                    .collect()
            })
            .unwrap_or_else(|| version.required_attributes.0.clone()),
        notes: body.notes,
        import_scope,
    };

    let updated = ImportVersionRepo::configure(&state.pool, id, &input)
        .await?
        .ok_or_else(|| ImportError::NotDraft {
            id,
            status: "no longer draft".to_string(),
        })?;

    tracing::info!(
        version_id = id,
        layer = ?updated.layer_name,
        source_crs = ?updated.source_crs,
        regional_refresh = updated.regional_refresh,
        "Import configured",
    );
    Ok(Json(DataResponse { data: updated }))
}

// ---- Ledger ----

/// GET /api/v1/imports
pub async fn list_versions(
    State(state): State<AppState>,
    Query(params): Query<ImportVersionListQuery>,
) -> AppResult<Json<ListResponse<ImportVersion>>> {
    if let Some(status) = params.status.as_deref() {
        VersionStatus::parse(status)?;
    }
    let data = ImportVersionRepo::list(&state.pool, &params).await?;
    let total = ImportVersionRepo::count(&state.pool, params.status.as_deref()).await?;
    Ok(Json(ListResponse { data, total }))
}

/// GET /api/v1/imports/{id}
pub async fn get_version(
    State(state): State<AppState>,
    Path(id): Path<DbId>,
) -> AppResult<Json<DataResponse<ImportVersion>>> {
    let version = find_version(&state.pool, id).await?;
    Ok(Json(DataResponse { data: version }))
}

/// DELETE /api/v1/imports/{id}
///
/// Drafts only. Removes the stored upload as well, best effort.
pub async fn delete_version(
    State(state): State<AppState>,
    Path(id): Path<DbId>,
) -> AppResult<Json<DataResponse<bool>>> {
    let version = find_version(&state.pool, id).await?;
    let status = version.status()?;
    if !status.can_delete() {
        return Err(ImportError::NotDraft {
            id,
            status: status.to_string(),
        }
        .into());
    }
    ensure_idle(&state.pool, id).await?;

    let deleted = ImportVersionRepo::delete_draft(&state.pool, id)
        .await?
        .ok_or_else(|| ImportError::NotDraft {
            id,
            status: "no longer draft".to_string(),
        })?;
    discard_upload(&state, &deleted.file_path).await;

    tracing::info!(version_id = id, "Draft import deleted");
    Ok(Json(DataResponse { data: true }))
}

/// POST /api/v1/imports/{id}/archive
pub async fn archive_version(
    State(state): State<AppState>,
    Path(id): Path<DbId>,
) -> AppResult<Json<DataResponse<ImportVersion>>> {
    let version = find_version(&state.pool, id).await?;
    let status = version.status()?;
    if !status.can_transition_to(VersionStatus::Archived) {
        return Err(ImportError::NotPublished {
            id,
            status: status.to_string(),
        }
        .into());
    }
    ensure_idle(&state.pool, id).await?;

    let archived = ImportVersionRepo::archive(&state.pool, id)
        .await?
        .ok_or_else(|| ImportError::NotPublished {
            id,
            status: "no longer published".to_string(),
        })?;
    tracing::info!(version_id = id, "Import archived");
    Ok(Json(DataResponse { data: archived }))
}

// ---- Jobs ----

async fn submit(
    state: &AppState,
    id: DbId,
    job_type: JobType,
    actor: &Actor,
) -> AppResult<(StatusCode, Json<DataResponse<ImportJob>>)> {
    let job = state.runner.submit(id, job_type, actor.as_str()).await?;
    Ok((StatusCode::ACCEPTED, Json(DataResponse { data: job })))
}

/// POST /api/v1/imports/{id}/validate
pub async fn validate(
    State(state): State<AppState>,
    Path(id): Path<DbId>,
    actor: Actor,
) -> AppResult<(StatusCode, Json<DataResponse<ImportJob>>)> {
    submit(&state, id, JobType::Validation, &actor).await
}

/// POST /api/v1/imports/{id}/publish
///
/// Refused with 403 while imports are frozen.
pub async fn publish(
    State(state): State<AppState>,
    Path(id): Path<DbId>,
    actor: Actor,
) -> AppResult<(StatusCode, Json<DataResponse<ImportJob>>)> {
    submit(&state, id, JobType::Publish, &actor).await
}

/// POST /api/v1/imports/{id}/rollback
pub async fn rollback(
    State(state): State<AppState>,
    Path(id): Path<DbId>,
    actor: Actor,
) -> AppResult<(StatusCode, Json<DataResponse<ImportJob>>)> {
    submit(&state, id, JobType::Rollback, &actor).await
}

/// GET /api/v1/imports/{id}/jobs
pub async fn list_jobs(
    State(state): State<AppState>,
    Path(id): Path<DbId>,
    Query(params): Query<PaginationParams>,
) -> AppResult<Json<DataResponse<Vec<ImportJob>>>> {
    find_version(&state.pool, id).await?;
    let jobs = ImportJobRepo::list_for_version(&state.pool, id, params.limit, params.offset).await?;
    Ok(Json(DataResponse { data: jobs }))
}

// ---- Results ----

/// GET /api/v1/imports/{id}/validation
///
/// The report of the most recent completed validation job.
pub async fn get_validation(
    State(state): State<AppState>,
    Path(id): Path<DbId>,
) -> AppResult<Json<DataResponse<ValidationReport>>> {
    find_version(&state.pool, id).await?;
    let job = ImportJobRepo::latest_completed(&state.pool, id, JobType::Validation).await?;
    match job.and_then(|j| j.result_summary).map(|s| s.0) {
        Some(JobResultSummary::Validation(report)) => Ok(Json(DataResponse { data: report })),
        _ => Err(AppError::Core(CoreError::NotFound {
            entity: "ValidationResult",
            id,
        })),
    }
}

/// GET /api/v1/imports/{id}/preview
///
/// Read-only diff of the configured layer against current production.
pub async fn preview(
    State(state): State<AppState>,
    Path(id): Path<DbId>,
) -> AppResult<Json<DataResponse<DiffResult>>> {
    let version = find_version(&state.pool, id).await?;
    ensure_draft(&version)?;
    if !version.is_configured() {
        return Err(ImportError::NotConfigured(id).into());
    }
    let scope = version.scope().ok_or(ImportError::EmptyScope(id))?;
    ensure_not_mutating(&state.pool, id).await?;

    let features = source::load_features(&state.artifacts, &version).await?;
    let feature_ids: Vec<String> = features
        .iter()
        .filter_map(|f| f.feature_id.clone())
        .collect();
    let mut conn = state.pool.acquire().await?;
    let production: Vec<ProductionRecord> = AssetRepo::load_scope(&mut conn, &scope, &feature_ids)
        .await?
        .into_iter()
        .map(ProductionRecord::from)
        .collect();
    drop(conn);

    let diff = compute_diff(
        &features,
        &production,
        DiffOptions {
            scope: &scope,
            merge_mode: version.merge_mode(),
            default_data_source: version.default_data_source.as_deref(),
        },
    );
    Ok(Json(DataResponse { data: diff }))
}

/// GET /api/v1/imports/{id}/history
///
/// The diff exactly as applied at publish time, read back from its
/// artifact.
pub async fn history(
    State(state): State<AppState>,
    Path(id): Path<DbId>,
) -> AppResult<Json<DataResponse<AppliedDiff>>> {
    let version = find_version(&state.pool, id).await?;
    let path = version.diff_path.ok_or(ImportError::NoAppliedDiff(id))?;
    let bytes = state
        .artifacts
        .get(&path)
        .await
        .map_err(artifact_error)?;
    let applied = AppliedDiff::from_bytes(&bytes).map_err(|e| ImportError::ArtifactUnreadable {
        path,
        message: e.to_string(),
    })?;
    Ok(Json(DataResponse { data: applied }))
}
