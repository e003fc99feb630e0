//! Diff engine: classify import features against in-scope production.
//!
//! The production set handed to [`compute_diff`] is every record whose
//! extent intersects the import scope, plus any record (anywhere) whose
//! identifier appears in the import. Matching is by stable identifier.
//!
//! - `added`       -- identifier absent from production.
//! - `updated`     -- matched in scope, and attributes differ, geometry
//!                    differs beyond tolerance, or the record is inactive.
//! - `relocated`   -- matched by identifier, but the production record lies
//!                    outside the scope. Always applied as an update.
//! - `unchanged`   -- matched in scope and identical, plus every in-scope
//!                    record the import does not mention that stays as it
//!                    is (inactive records, and all of them under merge-only).
//! - `deactivated` -- active in-scope records the import does not mention,
//!                    regional refresh only.
//!
//! `scope_current_count` is the number of production records intersecting
//! the scope, active or not, counted directly. Each of them lands in exactly
//! one of `updated`, `deactivated` or `unchanged`. The data-source tag is
//! not compared.

use std::collections::{BTreeSet, HashMap};

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::feature::{CanonicalFeature, Properties};
use crate::geometry::{BoundingBox, Geometry};
use crate::import_version::MergeMode;
use crate::production::ProductionRecord;

/// A single attribute difference between production and the import.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FieldChange {
    pub field: String,
    pub current_value: Value,
    pub incoming_value: Value,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AddedFeature {
    pub feature_id: String,
    pub geometry: Geometry,
    pub properties: Properties,
    pub data_source: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdatedFeature {
    pub feature_id: String,
    pub changes: Vec<FieldChange>,
    pub geometry_changed: bool,
    /// The production record was inactive and the import brings it back.
    pub reactivated: bool,
    pub geometry: Geometry,
    pub properties: Properties,
    pub data_source: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeactivatedRecord {
    pub feature_id: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DiffStats {
    pub scope_current_count: usize,
    pub import_count: usize,
    pub added: usize,
    pub updated: usize,
    pub relocated: usize,
    pub deactivated: usize,
    pub unchanged: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DiffResult {
    pub added: Vec<AddedFeature>,
    pub updated: Vec<UpdatedFeature>,
    /// Matched records found outside the scope; the import moves them in.
    pub relocated: Vec<UpdatedFeature>,
    pub deactivated: Vec<DeactivatedRecord>,
    pub unchanged: usize,
    pub stats: DiffStats,
}

/// Inputs that shape a diff besides the two record sets.
#[derive(Debug, Clone, Copy)]
pub struct DiffOptions<'a> {
    pub scope: &'a BoundingBox,
    pub merge_mode: MergeMode,
    pub default_data_source: Option<&'a str>,
}

/// Compute the change set. Pure and deterministic: the output is sorted
/// by feature id regardless of input order.
///
/// Features without an identifier or geometry are ignored; validation
/// rejects such datasets before publish. For duplicate identifiers the
/// first occurrence wins.
pub fn compute_diff(
    features: &[CanonicalFeature],
    production: &[ProductionRecord],
    options: DiffOptions<'_>,
) -> DiffResult {
    let mut incoming: HashMap<&str, (&CanonicalFeature, &Geometry)> = HashMap::new();
    for feature in features {
        if let (Some(id), Some(geometry)) = (feature.feature_id.as_deref(), &feature.geometry) {
            incoming.entry(id).or_insert((feature, geometry));
        }
    }

    let mut existing: HashMap<&str, &ProductionRecord> = HashMap::new();
    for record in production {
        existing.entry(record.feature_id.as_str()).or_insert(record);
    }

    let scope_current_count = existing
        .values()
        .filter(|record| record.intersects(options.scope))
        .count();

    let mut added = Vec::new();
    let mut updated = Vec::new();
    let mut relocated = Vec::new();
    let mut unchanged = 0;

    for (id, (feature, geometry)) in &incoming {
        let data_source = feature
            .data_source()
            .or(options.default_data_source)
            .map(str::to_string);
        match existing.get(id) {
            None => added.push(AddedFeature {
                feature_id: id.to_string(),
                geometry: (*geometry).clone(),
                properties: feature.properties.clone(),
                data_source,
            }),
            Some(record) => {
                let changes = attribute_changes(&record.properties, &feature.properties);
                let geometry_changed = !record.geometry.approx_eq(geometry);
                let reactivated = !record.is_active;
                let in_scope = record.intersects(options.scope);
                if in_scope && changes.is_empty() && !geometry_changed && !reactivated {
                    unchanged += 1;
                    continue;
                }
                let change = UpdatedFeature {
                    feature_id: id.to_string(),
                    changes,
                    geometry_changed,
                    reactivated,
                    geometry: (*geometry).clone(),
                    properties: feature.properties.clone(),
                    data_source,
                };
                if in_scope {
                    updated.push(change);
                } else {
                    relocated.push(change);
                }
            }
        }
    }

    let mut deactivated = Vec::new();
    for (id, record) in &existing {
        if incoming.contains_key(id) || !record.intersects(options.scope) {
            continue;
        }
        if record.is_active && options.merge_mode == MergeMode::RegionalRefresh {
            deactivated.push(DeactivatedRecord {
                feature_id: id.to_string(),
            });
        } else {
            unchanged += 1;
        }
    }

    added.sort_by(|a, b| a.feature_id.cmp(&b.feature_id));
    updated.sort_by(|a, b| a.feature_id.cmp(&b.feature_id));
    relocated.sort_by(|a, b| a.feature_id.cmp(&b.feature_id));
    deactivated.sort_by(|a, b| a.feature_id.cmp(&b.feature_id));

    let stats = DiffStats {
        scope_current_count,
        import_count: features.len(),
        added: added.len(),
        updated: updated.len(),
        relocated: relocated.len(),
        deactivated: deactivated.len(),
        unchanged,
    };

    DiffResult {
        added,
        updated,
        relocated,
        deactivated,
        unchanged,
        stats,
    }
}

/// Per-field differences over the union of keys, sorted by field name.
/// A missing key and an explicit `null` are the same value.
pub fn attribute_changes(current: &Properties, incoming: &Properties) -> Vec<FieldChange> {
    let keys: BTreeSet<&String> = current.keys().chain(incoming.keys()).collect();
    keys.into_iter()
        .filter_map(|key| {
            let before = current.get(key).unwrap_or(&Value::Null);
            let after = incoming.get(key).unwrap_or(&Value::Null);
            (!values_equal(before, after)).then(|| FieldChange {
                field: key.clone(),
                current_value: before.clone(),
                incoming_value: after.clone(),
            })
        })
        .collect()
}

/// JSON equality where numbers compare by value, so `1` equals `1.0`.
pub fn values_equal(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => match (x.as_f64(), y.as_f64()) {
            (Some(x), Some(y)) => x == y,
            _ => x == y,
        },
        (Value::Array(xs), Value::Array(ys)) => {
            xs.len() == ys.len() && xs.iter().zip(ys).all(|(x, y)| values_equal(x, y))
        }
        (Value::Object(xs), Value::Object(ys)) => {
            xs.len() == ys.len()
                && xs.iter().all(|(k, x)| ys.get(k).is_some_and(|y| values_equal(x, y)))
        }
        _ => a == b,
    }
}
