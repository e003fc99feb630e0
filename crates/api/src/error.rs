use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use linework_core::error::{CoreError, ImportError};
use serde_json::json;

/// Application-level error type for HTTP handlers and jobs.
///
/// Wraps [`CoreError`] and [`ImportError`] for domain errors and adds
/// HTTP-specific variants. Implements [`IntoResponse`] to produce
/// consistent JSON error responses.
#[derive(Debug, thiserror::Error)]
pub enum AppError {
    /// A generic domain error from `linework_core`.
    #[error(transparent)]
    Core(#[from] CoreError),

    /// An import engine failure.
    #[error(transparent)]
    Import(#[from] ImportError),

    /// A database error from sqlx.
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// A bad request with a human-readable message.
    #[error("Bad request: {0}")]
    BadRequest(String),

    /// An internal error with a human-readable message.
    #[error("Internal error: {0}")]
    InternalError(String),
}

/// Convenience type alias for handler return values.
pub type AppResult<T> = Result<T, AppError>;

const INTERNAL_MESSAGE: &str = "An internal error occurred";

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, code, message) = match &self {
            // --- CoreError variants ---
            AppError::Core(core) => match core {
                CoreError::NotFound { entity, id } => (
                    StatusCode::NOT_FOUND,
                    "NOT_FOUND",
                    format!("{entity} with id {id} not found"),
                ),
                CoreError::Validation(msg) => {
                    (StatusCode::BAD_REQUEST, "VALIDATION_ERROR", msg.clone())
                }
            },

            // --- ImportError variants ---
            AppError::Import(err) => classify_import_error(err),

            // --- Database errors ---
            AppError::Database(err) => classify_sqlx_error(err),

            // --- HTTP-specific errors ---
            AppError::BadRequest(msg) => (StatusCode::BAD_REQUEST, "BAD_REQUEST", msg.clone()),
            AppError::InternalError(msg) => {
                tracing::error!(error = %msg, "Internal error");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "INTERNAL_ERROR",
                    INTERNAL_MESSAGE.to_string(),
                )
            }
        };

        let body = json!({
            "error": message,
            "code": code,
        });

        (status, axum::Json(body)).into_response()
    }
}

/// Classify an import engine error.
///
/// - Input and state errors map to 400, except an unknown version (404),
///   the frozen switch (403) and a busy version (409).
/// - Absent or corrupt artifacts map to 404 with their own codes so a
///   caller can tell "never computed" from "computed but lost".
/// - Store and artifact I/O failures map to 500 with a sanitized message.
fn classify_import_error(err: &ImportError) -> (StatusCode, &'static str, String) {
    let message = err.to_string();
    match err {
        ImportError::Parse { .. } => (StatusCode::BAD_REQUEST, "PARSE_ERROR", message),
        ImportError::LayerNotFound(_) => (StatusCode::BAD_REQUEST, "LAYER_NOT_FOUND", message),
        ImportError::UnsupportedFormat(_) => {
            (StatusCode::BAD_REQUEST, "UNSUPPORTED_FORMAT", message)
        }
        ImportError::InvalidCrs(_) => (StatusCode::BAD_REQUEST, "INVALID_CRS", message),

        ImportError::VersionNotFound(_) => (StatusCode::NOT_FOUND, "NOT_FOUND", message),
        ImportError::NotConfigured(_) => (StatusCode::BAD_REQUEST, "NOT_CONFIGURED", message),
        ImportError::NotDraft { .. } => (StatusCode::BAD_REQUEST, "NOT_DRAFT", message),
        ImportError::NotPublished { .. } => (StatusCode::BAD_REQUEST, "INVALID_STATE", message),
        ImportError::EmptyScope(_) => (StatusCode::BAD_REQUEST, "EMPTY_SCOPE", message),
        ImportError::ValidationFailed { .. } => {
            (StatusCode::BAD_REQUEST, "VALIDATION_FAILED", message)
        }
        ImportError::NoSnapshot(_) => (StatusCode::BAD_REQUEST, "NO_SNAPSHOT", message),
        ImportError::JobAlreadyRunning(_) => {
            (StatusCode::CONFLICT, "JOB_ALREADY_RUNNING", message)
        }
        ImportError::ImportsFrozen => (StatusCode::FORBIDDEN, "IMPORTS_FROZEN", message),

        ImportError::NoAppliedDiff(_) => (StatusCode::NOT_FOUND, "NOT_PUBLISHED", message),
        ImportError::ArtifactMissing(_) => (StatusCode::NOT_FOUND, "ARTIFACT_NOT_FOUND", message),
        ImportError::ArtifactUnreadable { .. } => {
            (StatusCode::NOT_FOUND, "ARTIFACT_UNREADABLE", message)
        }
        ImportError::SnapshotUnreadable { .. } => {
            (StatusCode::NOT_FOUND, "SNAPSHOT_UNREADABLE", message)
        }

        ImportError::Artifact(_) | ImportError::Store(_) => {
            tracing::error!(error = %err, "Import storage error");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                "INTERNAL_ERROR",
                INTERNAL_MESSAGE.to_string(),
            )
        }
    }
}

/// Classify a sqlx error into an HTTP status, error code, and message.
///
/// - `RowNotFound` maps to 404.
/// - Unique constraint violations (constraint name starting with `uq_`) map to 409.
/// - Everything else maps to 500 with a sanitized message.
fn classify_sqlx_error(err: &sqlx::Error) -> (StatusCode, &'static str, String) {
    match err {
        sqlx::Error::RowNotFound => (
            StatusCode::NOT_FOUND,
            "NOT_FOUND",
            "Resource not found".to_string(),
        ),
        sqlx::Error::Database(db_err) => {
            // PostgreSQL unique constraint violation: error code 23505
            if db_err.code().as_deref() == Some("23505") {
                let constraint = db_err.constraint().unwrap_or("unknown");
                if constraint.starts_with("uq_") {
                    return (
                        StatusCode::CONFLICT,
                        "CONFLICT",
                        format!("Duplicate value violates unique constraint: {constraint}"),
                    );
                }
            }
            tracing::error!(error = %db_err, "Database error");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                "INTERNAL_ERROR",
                INTERNAL_MESSAGE.to_string(),
            )
        }
        other => {
            tracing::error!(error = %other, "Database error");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                "INTERNAL_ERROR",
                INTERNAL_MESSAGE.to_string(),
            )
        }
    }
}
