//! Structural and semantic validation of a canonical feature sequence.
//!
//! Errors block publish; warnings are informational. Validation is a pure
//! function of the features and the version's configuration.

use std::collections::{BTreeSet, HashMap};

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::feature::CanonicalFeature;

// ── Issue codes ──────────────────────────────────────────────────────

pub const CODE_EMPTY_DATASET: &str = "EMPTY_DATASET";
pub const CODE_MISSING_ID: &str = "MISSING_ID";
pub const CODE_DUPLICATE_ID: &str = "DUPLICATE_ID";
pub const CODE_MISSING_GEOMETRY: &str = "MISSING_GEOMETRY";
pub const CODE_INVALID_GEOMETRY: &str = "INVALID_GEOMETRY";
pub const CODE_MISSING_ATTRIBUTE: &str = "MISSING_ATTRIBUTE";

pub const CODE_UNUSUAL_GEOMETRY_TYPE: &str = "UNUSUAL_GEOMETRY_TYPE";
pub const CODE_MIXED_GEOMETRY_TYPES: &str = "MIXED_GEOMETRY_TYPES";
pub const CODE_MISSING_DATA_SOURCE: &str = "MISSING_DATA_SOURCE";

/// Geometry types that are parseable but unexpected for linear and areal assets.
pub const UNUSUAL_GEOMETRY_TYPES: [&str; 3] = ["Point", "MultiPoint", "GeometryCollection"];

/// Per-version settings the validator reads.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ValidationConfig {
    pub required_attributes: Vec<String>,
    pub default_data_source: Option<String>,
}

/// One finding against a feature, or against the dataset when
/// `feature_index` is `None`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FeatureIssue {
    pub feature_index: Option<usize>,
    pub feature_id: Option<String>,
    pub field: String,
    pub code: String,
    pub hint: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ValidationReport {
    pub valid: bool,
    pub feature_count: usize,
    pub errors: Vec<FeatureIssue>,
    pub warnings: Vec<FeatureIssue>,
    pub geometry_types: Vec<String>,
    pub missing_id_count: usize,
    pub missing_data_source_count: usize,
}

fn issue(
    feature: Option<&CanonicalFeature>,
    field: &str,
    code: &str,
    hint: impl Into<String>,
) -> FeatureIssue {
    FeatureIssue {
        feature_index: feature.map(|f| f.index),
        feature_id: feature.and_then(|f| f.feature_id.clone()),
        field: field.to_string(),
        code: code.to_string(),
        hint: hint.into(),
    }
}

fn is_blank(value: Option<&Value>) -> bool {
    match value {
        None | Some(Value::Null) => true,
        Some(Value::String(s)) => s.trim().is_empty(),
        Some(_) => false,
    }
}

/// Broad family used to detect mixed datasets; multi-part types join
/// their single-part family.
fn geometry_family(kind: &str) -> &str {
    kind.strip_prefix("Multi").unwrap_or(kind)
}

pub fn validate(features: &[CanonicalFeature], config: &ValidationConfig) -> ValidationReport {
    let mut errors = Vec::new();
    let mut warnings = Vec::new();
    let mut geometry_types = BTreeSet::new();
    let mut first_seen: HashMap<&str, usize> = HashMap::new();
    let mut missing_id_count = 0;
    let mut missing_data_source_count = 0;

    if features.is_empty() {
        errors.push(issue(None, "features", CODE_EMPTY_DATASET, "The dataset contains no features"));
    }

    for feature in features {
        match feature.feature_id.as_deref() {
            None => {
                missing_id_count += 1;
                errors.push(issue(
                    Some(feature),
                    "id",
                    CODE_MISSING_ID,
                    "Every feature needs a stable identifier in its id member or id property",
                ));
            }
            Some(id) => {
                if let Some(first) = first_seen.get(id) {
                    errors.push(issue(
                        Some(feature),
                        "id",
                        CODE_DUPLICATE_ID,
                        format!("Identifier '{id}' was already used by feature {first}"),
                    ));
                } else {
                    first_seen.insert(id, feature.index);
                }
            }
        }

        match (&feature.geometry, &feature.geometry_error) {
            (_, Some(reason)) => errors.push(issue(
                Some(feature),
                "geometry",
                CODE_INVALID_GEOMETRY,
                format!("Geometry could not be read: {reason}"),
            )),
            (None, None) => errors.push(issue(
                Some(feature),
                "geometry",
                CODE_MISSING_GEOMETRY,
                "Feature has no geometry",
            )),
            (Some(geometry), None) => {
                let kind = geometry.geometry_type();
                geometry_types.insert(kind.to_string());
                if let Some(reason) = geometry.structural_issue() {
                    errors.push(issue(Some(feature), "geometry", CODE_INVALID_GEOMETRY, reason));
                }
                if UNUSUAL_GEOMETRY_TYPES.contains(&kind) {
                    warnings.push(issue(
                        Some(feature),
                        "geometry",
                        CODE_UNUSUAL_GEOMETRY_TYPE,
                        format!("{kind} is unusual for linear or areal assets"),
                    ));
                }
            }
        }

        for attribute in &config.required_attributes {
            if is_blank(feature.properties.get(attribute)) {
                errors.push(issue(
                    Some(feature),
                    attribute,
                    CODE_MISSING_ATTRIBUTE,
                    format!("Required attribute '{attribute}' is missing or empty"),
                ));
            }
        }

        if feature.data_source().is_none() {
            missing_data_source_count += 1;
            if config.default_data_source.is_none() {
                warnings.push(issue(
                    Some(feature),
                    "data_source",
                    CODE_MISSING_DATA_SOURCE,
                    "No data source tag and no default data source configured",
                ));
            }
        }
    }

    let families: BTreeSet<&str> = geometry_types.iter().map(|t| geometry_family(t)).collect();
    if families.len() > 1 {
        warnings.push(issue(
            None,
            "geometry",
            CODE_MIXED_GEOMETRY_TYPES,
            format!(
                "Dataset mixes geometry types: {}",
                geometry_types.iter().cloned().collect::<Vec<_>>().join(", ")
            ),
        ));
    }

    ValidationReport {
        valid: errors.is_empty(),
        feature_count: features.len(),
        errors,
        warnings,
        geometry_types: geometry_types.into_iter().collect(),
        missing_id_count,
        missing_data_source_count,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::feature::Properties;
    use crate::geometry::Geometry;
    use serde_json::json;

    fn line(index: usize, id: Option<&str>, props: Value) -> CanonicalFeature {
        CanonicalFeature {
            index,
            feature_id: id.map(str::to_string),
            geometry: Some(Geometry::LineString(vec![[0.0, 0.0], [1.0, 1.0]])),
            geometry_error: None,
            properties: props.as_object().cloned().unwrap_or_else(Properties::new),
        }
    }

    fn codes(issues: &[FeatureIssue]) -> Vec<&str> {
        issues.iter().map(|i| i.code.as_str()).collect()
    }

    #[test]
    fn clean_dataset_is_valid() {
        let features = vec![
            line(0, Some("a"), json!({ "data_source": "survey" })),
            line(1, Some("b"), json!({ "data_source": "survey" })),
        ];
        let report = validate(&features, &ValidationConfig::default());
        assert!(report.valid);
        assert_eq!(report.feature_count, 2);
        assert!(report.warnings.is_empty());
        assert_eq!(report.geometry_types, vec!["LineString"]);
    }

    #[test]
    fn missing_id_blocks_publish() {
        let features = vec![line(0, Some("a"), json!({})), line(1, None, json!({}))];
        let config = ValidationConfig {
            default_data_source: Some("city".into()),
            ..Default::default()
        };
        let report = validate(&features, &config);
        assert!(!report.valid);
        assert_eq!(report.missing_id_count, 1);
        assert_eq!(report.errors[0].feature_index, Some(1));
        assert_eq!(codes(&report.errors), vec![CODE_MISSING_ID]);
        // A default data source suppresses the warning but not the count.
        assert_eq!(report.missing_data_source_count, 2);
        assert!(report.warnings.is_empty());
    }

    #[test]
    fn duplicate_ids_are_errors() {
        let features = vec![line(0, Some("a"), json!({})), line(1, Some("a"), json!({}))];
        let report = validate(&features, &ValidationConfig::default());
        assert_eq!(codes(&report.errors), vec![CODE_DUPLICATE_ID]);
        assert_eq!(report.errors[0].feature_index, Some(1));
    }

    #[test]
    fn points_warn_without_blocking() {
        let mut feature = line(0, Some("p"), json!({ "dataSource": "gps" }));
        feature.geometry = Some(Geometry::Point([1.0, 1.0]));
        let report = validate(&[feature], &ValidationConfig::default());
        assert!(report.valid);
        assert_eq!(codes(&report.warnings), vec![CODE_UNUSUAL_GEOMETRY_TYPE]);
    }

    #[test]
    fn mixed_families_warn() {
        let mut poly = line(1, Some("b"), json!({ "data_source": "x" }));
        poly.geometry = Some(Geometry::Polygon(vec![vec![
            [0.0, 0.0], [1.0, 0.0], [1.0, 1.0], [0.0, 0.0],
        ]]));
        let features = vec![line(0, Some("a"), json!({ "data_source": "x" })), poly];
        let report = validate(&features, &ValidationConfig::default());
        assert!(report.valid);
        assert_eq!(codes(&report.warnings), vec![CODE_MIXED_GEOMETRY_TYPES]);
    }

    #[test]
    fn required_attributes_and_geometry_errors() {
        let mut broken = line(1, Some("b"), json!({ "name": "" }));
        broken.geometry = None;
        broken.geometry_error = Some("coordinates must be nested arrays".into());
        let features = vec![line(0, Some("a"), json!({ "name": "Main" })), broken];
        let config = ValidationConfig {
            required_attributes: vec!["name".into()],
            default_data_source: Some("x".into()),
        };
        let report = validate(&features, &config);
        assert_eq!(
            codes(&report.errors),
            vec![CODE_INVALID_GEOMETRY, CODE_MISSING_ATTRIBUTE]
        );
        assert_eq!(report.errors[1].field, "name");
    }

    #[test]
    fn empty_dataset_is_invalid() {
        let report = validate(&[], &ValidationConfig::default());
        assert!(!report.valid);
        assert_eq!(codes(&report.errors), vec![CODE_EMPTY_DATASET]);
        assert_eq!(report.errors[0].feature_index, None);
    }
}
