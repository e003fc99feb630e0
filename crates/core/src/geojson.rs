//! GeoJSON reader.
//!
//! Accepts a `FeatureCollection`, a single `Feature`, or a bare geometry.
//! GeoJSON has exactly one layer, named after the uploaded file's stem.
//! The legacy `crs` member (pre-RFC 7946) is honoured when present.

use serde_json::Value;

use crate::crs::Crs;
use crate::error::ImportError;
use crate::feature::{Properties, SourceFeature, SourceLayer};
use crate::geometry::Geometry;

const FORMAT: &str = "geojson";

fn parse_error(message: impl Into<String>) -> ImportError {
    ImportError::Parse {
        format: FORMAT,
        message: message.into(),
    }
}

/// Parse `bytes` into its single layer.
///
/// When `layer_name` is given it must equal `default_name`; GeoJSON has no
/// other layers to pick from.
pub fn read_layer(
    bytes: &[u8],
    default_name: &str,
    layer_name: Option<&str>,
) -> Result<SourceLayer, ImportError> {
    if let Some(requested) = layer_name {
        if requested != default_name {
            return Err(ImportError::LayerNotFound(requested.to_string()));
        }
    }

    let root: Value = serde_json::from_slice(bytes).map_err(|e| parse_error(e.to_string()))?;
    let obj = root
        .as_object()
        .ok_or_else(|| parse_error("top-level value must be an object"))?;
    let crs = obj
        .get("crs")
        .filter(|v| !v.is_null())
        .map(legacy_crs)
        .transpose()?;
    let kind = obj
        .get("type")
        .and_then(Value::as_str)
        .ok_or_else(|| parse_error("top-level object has no type"))?;

    let features = match kind {
        "FeatureCollection" => obj
            .get("features")
            .and_then(Value::as_array)
            .ok_or_else(|| parse_error("FeatureCollection has no features array"))?
            .iter()
            .enumerate()
            .map(|(i, f)| read_feature(f).map_err(|msg| parse_error(format!("feature {i}: {msg}"))))
            .collect::<Result<Vec<_>, _>>()?,
        "Feature" => vec![read_feature(&root).map_err(parse_error)?],
        _ => {
            let mut feature = SourceFeature {
                id: None,
                geometry: None,
                geometry_error: None,
                properties: Properties::new(),
            };
            set_geometry(&mut feature, &root);
            if feature.geometry_error.is_some() {
                return Err(parse_error(format!("unknown GeoJSON type '{kind}'")));
            }
            vec![feature]
        }
    };

    Ok(SourceLayer {
        name: default_name.to_string(),
        crs,
        features,
    })
}

/// A malformed geometry does not fail the file; it is recorded on the
/// feature so the validator can report it against that feature.
fn read_feature(value: &Value) -> Result<SourceFeature, String> {
    let obj = value.as_object().ok_or("feature must be an object")?;
    if obj.get("type").and_then(Value::as_str) != Some("Feature") {
        return Err("expected an object of type Feature".into());
    }
    let properties = match obj.get("properties") {
        None | Some(Value::Null) => Properties::new(),
        Some(Value::Object(map)) => map.clone(),
        Some(_) => return Err("properties must be an object or null".into()),
    };

    let mut feature = SourceFeature {
        id: obj.get("id").filter(|v| !v.is_null()).cloned(),
        geometry: None,
        geometry_error: None,
        properties,
    };
    match obj.get("geometry") {
        None | Some(Value::Null) => {}
        Some(g) => set_geometry(&mut feature, g),
    }
    Ok(feature)
}

fn set_geometry(feature: &mut SourceFeature, value: &Value) {
    match Geometry::from_geojson(value) {
        Ok(g) => feature.geometry = Some(g),
        Err(e) => feature.geometry_error = Some(e),
    }
}

/// `{"type":"name","properties":{"name":"urn:ogc:def:crs:EPSG::3857"}}` or
/// the older `{"type":"EPSG","properties":{"code":3857}}`.
fn legacy_crs(value: &Value) -> Result<Crs, ImportError> {
    let props = value.get("properties");
    if let Some(name) = props.and_then(|p| p.get("name")).and_then(Value::as_str) {
        return Crs::parse(name);
    }
    if let Some(code) = props.and_then(|p| p.get("code")).and_then(Value::as_i64) {
        return Crs::from_epsg(code);
    }
    Err(ImportError::InvalidCrs(value.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    const COLLECTION: &str = r#"{
        "type": "FeatureCollection",
        "features": [
            { "type": "Feature", "id": "a", "properties": { "lanes": 2 },
              "geometry": { "type": "LineString", "coordinates": [[0, 0], [1, 1]] } },
            { "type": "Feature", "properties": null, "geometry": null },
            { "type": "Feature", "properties": {},
              "geometry": { "type": "LineString", "coordinates": 5 } }
        ]
    }"#;

    #[test]
    fn reads_feature_collection() {
        let layer = read_layer(COLLECTION.as_bytes(), "roads", None).unwrap();
        assert_eq!(layer.name, "roads");
        assert_eq!(layer.features.len(), 3);
        assert_eq!(layer.features[0].id, Some(serde_json::json!("a")));
        assert_eq!(layer.features[0].properties["lanes"], 2);
        assert!(layer.features[1].geometry.is_none());
        assert!(layer.features[2].geometry_error.is_some());
        assert_eq!(layer.crs, None);
    }

    #[test]
    fn honours_legacy_crs_member() {
        let doc = r#"{ "type": "FeatureCollection",
            "crs": { "type": "name", "properties": { "name": "urn:ogc:def:crs:EPSG::3857" } },
            "features": [] }"#;
        let layer = read_layer(doc.as_bytes(), "x", None).unwrap();
        assert_eq!(layer.crs, Some(Crs::WebMercator));
    }

    #[test]
    fn unsupported_legacy_crs_is_rejected() {
        let doc = r#"{ "type": "FeatureCollection",
            "crs": { "type": "name", "properties": { "name": "EPSG:2154" } },
            "features": [] }"#;
        assert_matches!(read_layer(doc.as_bytes(), "x", None), Err(ImportError::InvalidCrs(_)));
    }

    #[test]
    fn malformed_json_is_parse_error() {
        assert_matches!(
            read_layer(b"{ not json", "x", None),
            Err(ImportError::Parse { format: "geojson", .. })
        );
    }

    #[test]
    fn wrong_layer_name_is_not_found() {
        assert_matches!(
            read_layer(COLLECTION.as_bytes(), "roads", Some("rails")),
            Err(ImportError::LayerNotFound(name)) if name == "rails"
        );
    }

    #[test]
    fn single_feature_document() {
        let doc = r#"{ "type": "Feature", "id": 9, "properties": {},
            "geometry": { "type": "Point", "coordinates": [1, 2] } }"#;
        let layer = read_layer(doc.as_bytes(), "one", Some("one")).unwrap();
        assert_eq!(layer.features.len(), 1);
        assert_eq!(layer.features[0].geometry, Some(Geometry::Point([1.0, 2.0])));
    }
}
