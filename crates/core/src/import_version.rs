//! Import version lifecycle, upload format and merge mode.
//!
//! ```text
//! draft ──publish──> published ──archive──> archived
//!   │                    │
//!   └──delete            └──rollback──> rolled_back
//! ```
//!
//! `rolled_back` and `archived` are terminal. Only drafts may be deleted.

use serde::{Deserialize, Serialize};

use crate::error::CoreError;

// ── Version status ───────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VersionStatus {
    Draft,
    Published,
    Archived,
    RolledBack,
}

impl VersionStatus {
    pub const ALL: [VersionStatus; 4] = [
        VersionStatus::Draft,
        VersionStatus::Published,
        VersionStatus::Archived,
        VersionStatus::RolledBack,
    ];

    /// String representation for display, logging, and database storage.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Draft => "draft",
            Self::Published => "published",
            Self::Archived => "archived",
            Self::RolledBack => "rolled_back",
        }
    }

    pub fn parse(s: &str) -> Result<Self, CoreError> {
        Self::ALL
            .into_iter()
            .find(|status| status.as_str() == s)
            .ok_or_else(|| CoreError::Validation(format!("Unknown import version status '{s}'")))
    }

    /// Whether a direct transition to `next` is permitted.
    pub fn can_transition_to(&self, next: VersionStatus) -> bool {
        matches!(
            (self, next),
            (Self::Draft, Self::Published)
                | (Self::Published, Self::Archived)
                | (Self::Published, Self::RolledBack)
        )
    }

    pub fn can_delete(&self) -> bool {
        matches!(self, Self::Draft)
    }
}

impl std::fmt::Display for VersionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// ── File format ──────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ImportFormat {
    GeoJson,
    GeoPackage,
}

impl ImportFormat {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::GeoJson => "geojson",
            Self::GeoPackage => "geopackage",
        }
    }

    pub fn parse(s: &str) -> Result<Self, CoreError> {
        match s {
            "geojson" => Ok(Self::GeoJson),
            "geopackage" => Ok(Self::GeoPackage),
            other => Err(CoreError::Validation(format!("Unknown import format '{other}'"))),
        }
    }

    /// Detect the format from a file name's extension (case-insensitive).
    pub fn from_file_name(name: &str) -> Option<Self> {
        let (_, ext) = name.rsplit_once('.')?;
        match ext.to_ascii_lowercase().as_str() {
            "geojson" | "json" => Some(Self::GeoJson),
            "gpkg" => Some(Self::GeoPackage),
            _ => None,
        }
    }

    /// GeoPackage files may carry many layers; GeoJSON always has one.
    pub fn is_multi_layer(&self) -> bool {
        matches!(self, Self::GeoPackage)
    }
}

impl std::fmt::Display for ImportFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// File name without directories or extension, used as the GeoJSON layer name.
pub fn file_stem(name: &str) -> &str {
    let base = name.rsplit(['/', '\\']).next().unwrap_or(name);
    match base.rsplit_once('.') {
        Some((stem, _)) if !stem.is_empty() => stem,
        _ => base,
    }
}

/// Strip directories and anything outside `[A-Za-z0-9._-]` from an upload name.
pub fn sanitize_file_name(name: &str) -> String {
    let base = name.rsplit(['/', '\\']).next().unwrap_or(name);
    let cleaned: String = base
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-') { c } else { '_' })
        .collect();
    let trimmed = cleaned.trim_start_matches('.');
    if trimmed.is_empty() {
        "upload".to_string()
    } else {
        trimmed.to_string()
    }
}

// ── Merge mode ───────────────────────────────────────────────────────

/// How in-scope production records absent from the import are treated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MergeMode {
    /// Never deactivate; records missing from the import are left alone.
    MergeOnly,
    /// Deactivate every in-scope record missing from the import.
    RegionalRefresh,
}

impl MergeMode {
    pub fn from_regional_refresh(regional_refresh: bool) -> Self {
        if regional_refresh {
            Self::RegionalRefresh
        } else {
            Self::MergeOnly
        }
    }
}
