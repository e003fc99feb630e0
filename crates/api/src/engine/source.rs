//! Reading an uploaded file back into features.
//!
//! GeoJSON is parsed on the blocking pool; GeoPackage goes through the
//! SQLite reader in `linework_db::gpkg`.

use linework_core::crs::Crs;
use linework_core::error::ImportError;
use linework_core::feature::{normalize, CanonicalFeature, LayerInfo, SourceLayer};
use linework_core::geojson;
use linework_core::import_version::{file_stem, ImportFormat};
use linework_core::store::ArtifactError;
use linework_db::gpkg;
use linework_db::models::import_version::ImportVersion;

use crate::artifacts::LocalArtifactStore;

/// Where an uploaded file lives and how to read it.
#[derive(Debug, Clone, Copy)]
pub struct SourceFile<'a> {
    pub key: &'a str,
    pub file_name: &'a str,
    pub format: ImportFormat,
}

impl<'a> SourceFile<'a> {
    pub fn of(version: &'a ImportVersion) -> Result<Self, ImportError> {
        let format = version
            .format()
            .map_err(|_| ImportError::UnsupportedFormat(version.format.clone()))?;
        Ok(Self {
            key: &version.file_path,
            file_name: &version.file_name,
            format,
        })
    }
}

fn upload_error(key: &str, err: ArtifactError) -> ImportError {
    match err {
        ArtifactError::NotFound(_) => ImportError::ArtifactMissing(key.to_string()),
        other => ImportError::Artifact(other.to_string()),
    }
}

async fn parse_geojson(
    artifacts: &LocalArtifactStore,
    file: SourceFile<'_>,
    layer_name: Option<&str>,
) -> Result<SourceLayer, ImportError> {
    let path = artifacts.resolve(file.key).map_err(|e| upload_error(file.key, e))?;
    let bytes = tokio::fs::read(&path).await.map_err(|e| match e.kind() {
        std::io::ErrorKind::NotFound => ImportError::ArtifactMissing(file.key.to_string()),
        _ => ImportError::Artifact(e.to_string()),
    })?;
    let default_name = file_stem(file.file_name).to_string();
    let layer_name = layer_name.map(str::to_string);
    tokio::task::spawn_blocking(move || {
        geojson::read_layer(&bytes, &default_name, layer_name.as_deref())
    })
    .await
    .map_err(|e| ImportError::Artifact(format!("parser task failed: {e}")))?
}

/// Every layer in the file with its feature count and dominant geometry type.
pub async fn list_layers(
    artifacts: &LocalArtifactStore,
    file: SourceFile<'_>,
) -> Result<Vec<LayerInfo>, ImportError> {
    match file.format {
        ImportFormat::GeoJson => Ok(vec![parse_geojson(artifacts, file, None).await?.info()]),
        ImportFormat::GeoPackage => {
            let path = artifacts.resolve(file.key).map_err(|e| upload_error(file.key, e))?;
            if !tokio::fs::try_exists(&path).await.unwrap_or(false) {
                return Err(ImportError::ArtifactMissing(file.key.to_string()));
            }
            gpkg::list_layers(&path).await
        }
    }
}

/// Read one layer without normalizing it.
pub async fn read_layer(
    artifacts: &LocalArtifactStore,
    file: SourceFile<'_>,
    layer_name: Option<&str>,
) -> Result<SourceLayer, ImportError> {
    match file.format {
        ImportFormat::GeoJson => parse_geojson(artifacts, file, layer_name).await,
        ImportFormat::GeoPackage => {
            let path = artifacts.resolve(file.key).map_err(|e| upload_error(file.key, e))?;
            if !tokio::fs::try_exists(&path).await.unwrap_or(false) {
                return Err(ImportError::ArtifactMissing(file.key.to_string()));
            }
            gpkg::read_layer(&path, layer_name).await
        }
    }
}

/// The configured layer of a version as canonical features, using the
/// version's CRS override and identifier property.
pub async fn load_features(
    artifacts: &LocalArtifactStore,
    version: &ImportVersion,
) -> Result<Vec<CanonicalFeature>, ImportError> {
    let file = SourceFile::of(version)?;
    let crs_override = version.source_crs.as_deref().map(Crs::parse).transpose()?;
    let layer = read_layer(artifacts, file, version.layer_name.as_deref()).await?;
    Ok(normalize(layer, &version.id_property, crs_override))
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;
    use linework_core::store::ArtifactStore;
    use serde_json::json;

    use super::*;

    fn geojson_file(key: &str) -> SourceFile<'_> {
        SourceFile {
            key,
            file_name: "roads.geojson",
            format: ImportFormat::GeoJson,
        }
    }

    async fn store_with(key: &str, body: serde_json::Value) -> (tempfile::TempDir, LocalArtifactStore) {
        let dir = tempfile::tempdir().unwrap();
        let store = LocalArtifactStore::new(dir.path());
        store.put(key, serde_json::to_vec(&body).unwrap()).await.unwrap();
        (dir, store)
    }

    #[tokio::test]
    async fn geojson_has_one_layer_named_after_the_file() {
        let body = json!({
            "type": "FeatureCollection",
            "features": [
                {"type": "Feature", "id": "a", "geometry": {"type": "Point", "coordinates": [1.0, 2.0]}, "properties": {}},
                {"type": "Feature", "id": "b", "geometry": {"type": "Point", "coordinates": [3.0, 4.0]}, "properties": {}}
            ]
        });
        let (_dir, store) = store_with("uploads/u/roads.geojson", body).await;

        let layers = list_layers(&store, geojson_file("uploads/u/roads.geojson")).await.unwrap();

        assert_eq!(layers.len(), 1);
        assert_eq!(layers[0].name, "roads");
        assert_eq!(layers[0].feature_count, 2);
        assert_eq!(layers[0].geometry_type, "Point");
    }

    #[tokio::test]
    async fn unknown_geojson_layer_is_rejected() {
        let body = json!({"type": "FeatureCollection", "features": []});
        let (_dir, store) = store_with("uploads/u/roads.geojson", body).await;

        let err = read_layer(&store, geojson_file("uploads/u/roads.geojson"), Some("rivers"))
            .await
            .unwrap_err();
        assert_matches!(err, ImportError::LayerNotFound(_));
    }

    #[tokio::test]
    async fn missing_upload_is_reported_as_missing_artifact() {
        let dir = tempfile::tempdir().unwrap();
        let store = LocalArtifactStore::new(dir.path());

        let err = list_layers(&store, geojson_file("uploads/gone/roads.geojson"))
            .await
            .unwrap_err();
        assert_matches!(err, ImportError::ArtifactMissing(_));
    }
}
