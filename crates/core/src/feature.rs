//! Canonical feature model shared by the parsers, the validator and the
//! diff engine.
//!
//! Parsers produce [`SourceLayer`]s in whatever CRS the file declares;
//! [`normalize`] turns one into the canonical sequence: geometry in
//! EPSG:4326, a flat attribute map, and a resolved stable identifier.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::crs::Crs;
use crate::geometry::{BoundingBox, Geometry};

/// Flat attribute map. Nested objects are flattened to dotted keys.
pub type Properties = Map<String, Value>;

/// Attribute names read as the data-source tag, in lookup order.
pub const DATA_SOURCE_KEYS: [&str; 2] = ["data_source", "dataSource"];

/// Default attribute holding the stable identifier.
pub const DEFAULT_ID_PROPERTY: &str = "id";

/// A feature exactly as read from the file, before normalization.
#[derive(Debug, Clone, PartialEq)]
pub struct SourceFeature {
    /// The GeoJSON `id` member, if the format has one.
    pub id: Option<Value>,
    pub geometry: Option<Geometry>,
    /// Why the geometry could not be decoded, when it was present but broken.
    pub geometry_error: Option<String>,
    pub properties: Properties,
}

/// One layer of a source file.
#[derive(Debug, Clone, PartialEq)]
pub struct SourceLayer {
    pub name: String,
    /// CRS declared by the file itself, if any.
    pub crs: Option<Crs>,
    pub features: Vec<SourceFeature>,
}

/// Summary of a layer offered to the client before configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LayerInfo {
    pub name: String,
    pub feature_count: usize,
    pub geometry_type: String,
}

impl SourceLayer {
    pub fn info(&self) -> LayerInfo {
        LayerInfo {
            name: self.name.clone(),
            feature_count: self.features.len(),
            geometry_type: dominant_geometry_type(
                self.features.iter().filter_map(|f| f.geometry.as_ref()),
            ),
        }
    }
}

/// A feature in the canonical CRS with its identity resolved.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CanonicalFeature {
    /// Zero-based position in the source layer.
    pub index: usize,
    pub feature_id: Option<String>,
    pub geometry: Option<Geometry>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub geometry_error: Option<String>,
    pub properties: Properties,
}

impl CanonicalFeature {
    pub fn data_source(&self) -> Option<&str> {
        DATA_SOURCE_KEYS
            .iter()
            .filter_map(|key| self.properties.get(*key))
            .filter_map(Value::as_str)
            .map(str::trim)
            .find(|s| !s.is_empty())
    }
}

/// Reproject and resolve identifiers for every feature of `layer`.
///
/// `crs_override` wins over the CRS declared in the file; with neither,
/// coordinates are taken as EPSG:4326.
pub fn normalize(
    layer: SourceLayer,
    id_property: &str,
    crs_override: Option<Crs>,
) -> Vec<CanonicalFeature> {
    let crs = crs_override.or(layer.crs).unwrap_or(Crs::Wgs84);
    layer
        .features
        .into_iter()
        .enumerate()
        .map(|(index, source)| {
            let properties = flatten_properties(source.properties);
            let feature_id = resolve_feature_id(source.id.as_ref(), &properties, id_property);
            CanonicalFeature {
                index,
                feature_id,
                geometry: source.geometry.as_ref().map(|g| crs.reproject(g)),
                geometry_error: source.geometry_error,
                properties,
            }
        })
        .collect()
}

/// The stable identifier: the `id` member first, then `id_property`.
///
/// Strings are trimmed; blank strings count as missing. Numbers are
/// rendered the way JSON writes them.
pub fn resolve_feature_id(
    id_member: Option<&Value>,
    properties: &Properties,
    id_property: &str,
) -> Option<String> {
    id_member
        .and_then(id_to_string)
        .or_else(|| properties.get(id_property).and_then(id_to_string))
}

fn id_to_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => {
            let trimmed = s.trim();
            (!trimmed.is_empty()).then(|| trimmed.to_string())
        }
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

/// Flatten nested objects into dotted keys. Arrays are kept as values.
pub fn flatten_properties(properties: Properties) -> Properties {
    let mut out = Map::new();
    for (key, value) in properties {
        flatten_into(&mut out, key, value);
    }
    out
}

fn flatten_into(out: &mut Properties, prefix: String, value: Value) {
    match value {
        Value::Object(map) if !map.is_empty() => {
            for (key, nested) in map {
                flatten_into(out, format!("{prefix}.{key}"), nested);
            }
        }
        other => {
            out.insert(prefix, other);
        }
    }
}

/// Union of all feature extents; `None` when no feature has geometry.
pub fn scope_of(features: &[CanonicalFeature]) -> Option<BoundingBox> {
    features
        .iter()
        .filter_map(|f| f.geometry.as_ref())
        .filter_map(Geometry::bbox)
        .reduce(|mut acc, b| {
            acc.merge(&b);
            acc
        })
}

/// Most frequent geometry type, `"Unknown"` for a layer with no geometry.
///
/// Ties resolve to the alphabetically first type name.
pub fn dominant_geometry_type<'a>(geometries: impl Iterator<Item = &'a Geometry>) -> String {
    let mut counts: BTreeMap<&'static str, usize> = BTreeMap::new();
    for geometry in geometries {
        *counts.entry(geometry.geometry_type()).or_default() += 1;
    }
    counts
        .iter()
        .max_by(|a, b| a.1.cmp(b.1).then(b.0.cmp(a.0)))
        .map_or_else(|| "Unknown".to_string(), |(name, _)| (*name).to_string())
}
