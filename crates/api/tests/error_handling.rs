//! Tests for `AppError` → HTTP response mapping.
//!
//! These call `IntoResponse` directly on `AppError` values; no server or
//! database is involved.

use axum::http::StatusCode;
use axum::response::IntoResponse;
use http_body_util::BodyExt;
use linework_api::error::AppError;
use linework_core::error::{CoreError, ImportError};
use linework_core::store::StoreError;

/// Helper: convert an `AppError` into its status code and parsed JSON body.
async fn error_to_response(err: AppError) -> (StatusCode, serde_json::Value) {
    let response = err.into_response();
    let status = response.status();
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    let json: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
    (status, json)
}

// ---------------------------------------------------------------------------
// Test: CoreError and HTTP-specific variants
// ---------------------------------------------------------------------------

#[tokio::test]
async fn not_found_error_returns_404() {
    let err = AppError::Core(CoreError::NotFound {
        entity: "ImportJob",
        id: 42,
    });

    let (status, json) = error_to_response(err).await;

    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(json["code"], "NOT_FOUND");
    assert_eq!(json["error"], "ImportJob with id 42 not found");
}

#[tokio::test]
async fn bad_request_error_returns_400() {
    let err = AppError::BadRequest("No file received in multipart upload".into());

    let (status, json) = error_to_response(err).await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(json["code"], "BAD_REQUEST");
    assert_eq!(json["error"], "No file received in multipart upload");
}

#[tokio::test]
async fn internal_error_message_is_sanitized() {
    let err = AppError::InternalError("disk full at /srv/artifacts".into());

    let (status, json) = error_to_response(err).await;

    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(json["code"], "INTERNAL_ERROR");
    assert_eq!(json["error"], "An internal error occurred");
}

#[tokio::test]
async fn row_not_found_returns_404() {
    let (status, json) = error_to_response(AppError::Database(sqlx::Error::RowNotFound)).await;

    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(json["code"], "NOT_FOUND");
}

// ---------------------------------------------------------------------------
// Test: input errors map to 400
// ---------------------------------------------------------------------------

#[tokio::test]
async fn input_errors_return_400_with_their_own_codes() {
    let cases = [
        (ImportError::UnsupportedFormat("roads.shp".into()), "UNSUPPORTED_FORMAT"),
        (ImportError::LayerNotFound("bridges".into()), "LAYER_NOT_FOUND"),
        (ImportError::InvalidCrs("EPSG:2154".into()), "INVALID_CRS"),
        (
            ImportError::Parse {
                format: "geojson",
                message: "expected value".into(),
            },
            "PARSE_ERROR",
        ),
    ];
    for (err, code) in cases {
        let (status, json) = error_to_response(err.into()).await;
        assert_eq!(status, StatusCode::BAD_REQUEST, "{code}");
        assert_eq!(json["code"], code);
    }
}

// ---------------------------------------------------------------------------
// Test: state errors
// ---------------------------------------------------------------------------

#[tokio::test]
async fn publish_of_non_draft_returns_400() {
    let err = ImportError::NotDraft {
        id: 3,
        status: "published".into(),
    };

    let (status, json) = error_to_response(err.into()).await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(json["code"], "NOT_DRAFT");
    assert_eq!(json["error"], "Import version 3 is published, expected draft");
}

#[tokio::test]
async fn rollback_without_snapshot_returns_400() {
    let (status, json) = error_to_response(ImportError::NoSnapshot(9).into()).await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(json["code"], "NO_SNAPSHOT");
}

#[tokio::test]
async fn frozen_imports_return_403() {
    let (status, json) = error_to_response(ImportError::ImportsFrozen.into()).await;

    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(json["code"], "IMPORTS_FROZEN");
}

#[tokio::test]
async fn busy_version_returns_409() {
    let (status, json) = error_to_response(ImportError::JobAlreadyRunning(5).into()).await;

    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(json["code"], "JOB_ALREADY_RUNNING");
}

#[tokio::test]
async fn unknown_version_returns_404() {
    let (status, json) = error_to_response(ImportError::VersionNotFound(77).into()).await;

    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(json["error"], "Import version 77 not found");
}

// ---------------------------------------------------------------------------
// Test: missing artifacts are a distinct not-found
// ---------------------------------------------------------------------------

#[tokio::test]
async fn never_published_and_lost_artifacts_are_distinguished() {
    let (never_status, never) = error_to_response(ImportError::NoAppliedDiff(4).into()).await;
    let (lost_status, lost) =
        error_to_response(ImportError::ArtifactMissing("diffs/version-4/a.json".into()).into())
            .await;

    assert_eq!(never_status, StatusCode::NOT_FOUND);
    assert_eq!(lost_status, StatusCode::NOT_FOUND);
    assert_eq!(never["code"], "NOT_PUBLISHED");
    assert_eq!(lost["code"], "ARTIFACT_NOT_FOUND");
}

// ---------------------------------------------------------------------------
// Test: store failures are sanitized
// ---------------------------------------------------------------------------

#[tokio::test]
async fn store_errors_return_500_without_detail() {
    let err = ImportError::Store(StoreError::retryable("could not serialize access"));

    let (status, json) = error_to_response(err.into()).await;

    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(json["error"], "An internal error occurred");
}
