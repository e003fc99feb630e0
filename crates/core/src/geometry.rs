//! Geometry model, GeoJSON conversion and canonical comparison.
//!
//! Geometries are two-dimensional; any Z or M ordinate in the source is
//! dropped when the geometry is constructed. Comparison never looks at the
//! raw coordinate arrays. Both sides are first reduced to a canonical form
//! (rounded coordinates, rotated and oriented rings, normalized line
//! direction, sorted multi-part members) and then compared within
//! [`COORDINATE_TOLERANCE`].

use std::cmp::Ordering;

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::{json, Value};

/// Decimal places kept when canonicalizing coordinates (about 1 cm at the equator).
pub const CANONICAL_PRECISION: i32 = 7;

/// Maximum per-ordinate difference for two canonical coordinates to be equal.
pub const COORDINATE_TOLERANCE: f64 = 1e-7;

/// An `[x, y]` coordinate pair. In the canonical CRS this is `[lon, lat]`.
pub type Position = [f64; 2];

#[derive(Debug, Clone, PartialEq)]
pub enum Geometry {
    Point(Position),
    MultiPoint(Vec<Position>),
    LineString(Vec<Position>),
    MultiLineString(Vec<Vec<Position>>),
    Polygon(Vec<Vec<Position>>),
    MultiPolygon(Vec<Vec<Vec<Position>>>),
    GeometryCollection(Vec<Geometry>),
}

// ── Bounding box ─────────────────────────────────────────────────────

/// Axis-aligned extent. Used as the import scope.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BoundingBox {
    pub min_x: f64,
    pub min_y: f64,
    pub max_x: f64,
    pub max_y: f64,
}

impl BoundingBox {
    pub fn from_position(p: &Position) -> Self {
        Self {
            min_x: p[0],
            min_y: p[1],
            max_x: p[0],
            max_y: p[1],
        }
    }

    pub fn expand(&mut self, p: &Position) {
        self.min_x = self.min_x.min(p[0]);
        self.min_y = self.min_y.min(p[1]);
        self.max_x = self.max_x.max(p[0]);
        self.max_y = self.max_y.max(p[1]);
    }

    pub fn merge(&mut self, other: &BoundingBox) {
        self.min_x = self.min_x.min(other.min_x);
        self.min_y = self.min_y.min(other.min_y);
        self.max_x = self.max_x.max(other.max_x);
        self.max_y = self.max_y.max(other.max_y);
    }

    /// Inclusive overlap test: touching edges count as intersecting.
    pub fn intersects(&self, other: &BoundingBox) -> bool {
        self.min_x <= other.max_x
            && self.max_x >= other.min_x
            && self.min_y <= other.max_y
            && self.max_y >= other.min_y
    }
}

// ── Accessors ────────────────────────────────────────────────────────

impl Geometry {
    /// The GeoJSON type name.
    pub fn geometry_type(&self) -> &'static str {
        match self {
            Self::Point(_) => "Point",
            Self::MultiPoint(_) => "MultiPoint",
            Self::LineString(_) => "LineString",
            Self::MultiLineString(_) => "MultiLineString",
            Self::Polygon(_) => "Polygon",
            Self::MultiPolygon(_) => "MultiPolygon",
            Self::GeometryCollection(_) => "GeometryCollection",
        }
    }

    /// Visit every coordinate in document order.
    pub fn for_each_position(&self, f: &mut impl FnMut(&Position)) {
        match self {
            Self::Point(p) => f(p),
            Self::MultiPoint(ps) | Self::LineString(ps) => ps.iter().for_each(f),
            Self::MultiLineString(parts) | Self::Polygon(parts) => {
                parts.iter().flatten().for_each(f)
            }
            Self::MultiPolygon(polys) => polys.iter().flatten().flatten().for_each(f),
            Self::GeometryCollection(members) => {
                for member in members {
                    member.for_each_position(f);
                }
            }
        }
    }

    /// Rebuild the geometry with every coordinate passed through `f`.
    pub fn map_positions(&self, f: &impl Fn(Position) -> Position) -> Geometry {
        let path = |ps: &Vec<Position>| ps.iter().map(|p| f(*p)).collect::<Vec<_>>();
        match self {
            Self::Point(p) => Self::Point(f(*p)),
            Self::MultiPoint(ps) => Self::MultiPoint(path(ps)),
            Self::LineString(ps) => Self::LineString(path(ps)),
            Self::MultiLineString(parts) => Self::MultiLineString(parts.iter().map(&path).collect()),
            Self::Polygon(rings) => Self::Polygon(rings.iter().map(&path).collect()),
            Self::MultiPolygon(polys) => Self::MultiPolygon(
                polys
                    .iter()
                    .map(|rings| rings.iter().map(&path).collect())
                    .collect(),
            ),
            Self::GeometryCollection(members) => {
                Self::GeometryCollection(members.iter().map(|m| m.map_positions(f)).collect())
            }
        }
    }

    /// Extent of all coordinates, or `None` for an empty geometry.
    pub fn bbox(&self) -> Option<BoundingBox> {
        let mut bbox: Option<BoundingBox> = None;
        self.for_each_position(&mut |p| match bbox.as_mut() {
            Some(b) => b.expand(p),
            None => bbox = Some(BoundingBox::from_position(p)),
        });
        bbox
    }

    /// Describe the first structural defect, if any.
    ///
    /// Checks coordinate ranges for the canonical CRS, minimum vertex
    /// counts, and ring closure.
    pub fn structural_issue(&self) -> Option<String> {
        let mut bad_coordinate = None;
        self.for_each_position(&mut |p| {
            if bad_coordinate.is_none() {
                if !p[0].is_finite() || !p[1].is_finite() {
                    bad_coordinate = Some("coordinate is not a finite number".to_string());
                } else if !(-180.0..=180.0).contains(&p[0]) || !(-90.0..=90.0).contains(&p[1]) {
                    bad_coordinate = Some(format!(
                        "coordinate [{}, {}] is outside the lon/lat range",
                        p[0], p[1]
                    ));
                }
            }
        });
        if bad_coordinate.is_some() {
            return bad_coordinate;
        }

        match self {
            Self::Point(_) => None,
            Self::MultiPoint(ps) if ps.is_empty() => Some("MultiPoint has no points".into()),
            Self::MultiPoint(_) => None,
            Self::LineString(ps) => line_issue(ps),
            Self::MultiLineString(parts) if parts.is_empty() => {
                Some("MultiLineString has no parts".into())
            }
            Self::MultiLineString(parts) => parts.iter().find_map(|ps| line_issue(ps)),
            Self::Polygon(rings) => polygon_issue(rings),
            Self::MultiPolygon(polys) if polys.is_empty() => {
                Some("MultiPolygon has no polygons".into())
            }
            Self::MultiPolygon(polys) => polys.iter().find_map(|rings| polygon_issue(rings)),
            Self::GeometryCollection(members) => {
                members.iter().find_map(|m| m.structural_issue())
            }
        }
    }
}

fn line_issue(ps: &[Position]) -> Option<String> {
    (ps.len() < 2).then(|| format!("LineString has {} vertex(es), needs at least 2", ps.len()))
}

fn polygon_issue(rings: &[Vec<Position>]) -> Option<String> {
    if rings.is_empty() {
        return Some("Polygon has no rings".into());
    }
    rings.iter().find_map(|ring| {
        if ring.len() < 4 {
            Some(format!("ring has {} vertex(es), needs at least 4", ring.len()))
        } else if ring.first() != ring.last() {
            Some("ring is not closed".into())
        } else {
            None
        }
    })
}

// ── GeoJSON conversion ───────────────────────────────────────────────

impl Geometry {
    /// Parse a GeoJSON geometry object. `null` is handled by the caller.
    pub fn from_geojson(value: &Value) -> Result<Geometry, String> {
        let obj = value
            .as_object()
            .ok_or_else(|| "geometry must be an object".to_string())?;
        let kind = obj
            .get("type")
            .and_then(Value::as_str)
            .ok_or_else(|| "geometry has no type".to_string())?;

        if kind == "GeometryCollection" {
            let members = obj
                .get("geometries")
                .and_then(Value::as_array)
                .ok_or_else(|| "GeometryCollection has no geometries array".to_string())?;
            return members
                .iter()
                .map(Geometry::from_geojson)
                .collect::<Result<Vec<_>, _>>()
                .map(Geometry::GeometryCollection);
        }

        let coords = obj
            .get("coordinates")
            .ok_or_else(|| format!("{kind} has no coordinates"))?;

        match kind {
            "Point" => position(coords).map(Geometry::Point),
            "MultiPoint" => path(coords).map(Geometry::MultiPoint),
            "LineString" => path(coords).map(Geometry::LineString),
            "MultiLineString" => nested(coords, path).map(Geometry::MultiLineString),
            "Polygon" => nested(coords, path).map(Geometry::Polygon),
            "MultiPolygon" => {
                nested(coords, |rings| nested(rings, path)).map(Geometry::MultiPolygon)
            }
            other => Err(format!("unknown geometry type '{other}'")),
        }
    }

    pub fn to_geojson(&self) -> Value {
        match self {
            Self::GeometryCollection(members) => json!({
                "type": "GeometryCollection",
                "geometries": members.iter().map(Geometry::to_geojson).collect::<Vec<_>>(),
            }),
            Self::Point(p) => json!({ "type": "Point", "coordinates": p }),
            Self::MultiPoint(ps) => json!({ "type": "MultiPoint", "coordinates": ps }),
            Self::LineString(ps) => json!({ "type": "LineString", "coordinates": ps }),
            Self::MultiLineString(parts) => {
                json!({ "type": "MultiLineString", "coordinates": parts })
            }
            Self::Polygon(rings) => json!({ "type": "Polygon", "coordinates": rings }),
            Self::MultiPolygon(polys) => json!({ "type": "MultiPolygon", "coordinates": polys }),
        }
    }
}

fn position(value: &Value) -> Result<Position, String> {
    let arr = value
        .as_array()
        .ok_or_else(|| "position must be an array".to_string())?;
    if arr.len() < 2 {
        return Err(format!("position has {} ordinate(s), needs 2", arr.len()));
    }
    let x = arr[0].as_f64().ok_or("ordinate is not a number")?;
    let y = arr[1].as_f64().ok_or("ordinate is not a number")?;
    Ok([x, y])
}

fn path(value: &Value) -> Result<Vec<Position>, String> {
    nested(value, position)
}

fn nested<T>(value: &Value, item: impl Fn(&Value) -> Result<T, String>) -> Result<Vec<T>, String> {
    value
        .as_array()
        .ok_or_else(|| "coordinates must be nested arrays".to_string())?
        .iter()
        .map(item)
        .collect()
}

impl Serialize for Geometry {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.to_geojson().serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for Geometry {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let value = Value::deserialize(deserializer)?;
        Geometry::from_geojson(&value).map_err(serde::de::Error::custom)
    }
}

// ── Canonical form ───────────────────────────────────────────────────

fn round(v: f64) -> f64 {
    let factor = 10f64.powi(CANONICAL_PRECISION);
    // Adding 0.0 folds -0.0 into 0.0.
    (v * factor).round() / factor + 0.0
}

fn round_position(p: &Position) -> Position {
    [round(p[0]), round(p[1])]
}

fn cmp_position(a: &Position, b: &Position) -> Ordering {
    a[0].total_cmp(&b[0]).then(a[1].total_cmp(&b[1]))
}

fn cmp_path(a: &[Position], b: &[Position]) -> Ordering {
    for (pa, pb) in a.iter().zip(b) {
        let ord = cmp_position(pa, pb);
        if ord != Ordering::Equal {
            return ord;
        }
    }
    a.len().cmp(&b.len())
}

fn cmp_rings(a: &[Vec<Position>], b: &[Vec<Position>]) -> Ordering {
    for (ra, rb) in a.iter().zip(b) {
        let ord = cmp_path(ra, rb);
        if ord != Ordering::Equal {
            return ord;
        }
    }
    a.len().cmp(&b.len())
}

fn dedup_path(ps: &[Position]) -> Vec<Position> {
    let mut out: Vec<Position> = Vec::with_capacity(ps.len());
    for p in ps.iter().map(round_position) {
        if out.last() != Some(&p) {
            out.push(p);
        }
    }
    out
}

fn canonical_line(ps: &[Position]) -> Vec<Position> {
    let mut line = dedup_path(ps);
    if let (Some(first), Some(last)) = (line.first(), line.last()) {
        if cmp_position(last, first) == Ordering::Less {
            line.reverse();
        }
    }
    line
}

/// Twice the signed area; positive for counter-clockwise rings.
fn signed_area(ring: &[Position]) -> f64 {
    ring.iter()
        .zip(ring.iter().cycle().skip(1))
        .map(|(a, b)| a[0] * b[1] - b[0] * a[1])
        .sum()
}

fn canonical_ring(ring: &[Position], counter_clockwise: bool) -> Vec<Position> {
    let mut open = dedup_path(ring);
    if open.len() > 1 && open.first() == open.last() {
        open.pop();
    }
    if open.len() < 3 {
        return dedup_path(ring);
    }
    let area = signed_area(&open);
    if (counter_clockwise && area < 0.0) || (!counter_clockwise && area > 0.0) {
        open.reverse();
    }
    let start = open
        .iter()
        .enumerate()
        .min_by(|(_, a), (_, b)| cmp_position(a, b))
        .map_or(0, |(i, _)| i);
    open.rotate_left(start);
    open.push(open[0]);
    open
}

fn canonical_polygon(rings: &[Vec<Position>]) -> Vec<Vec<Position>> {
    let mut iter = rings.iter();
    let Some(exterior) = iter.next() else {
        return Vec::new();
    };
    let mut holes: Vec<Vec<Position>> = iter.map(|r| canonical_ring(r, false)).collect();
    holes.sort_by(|a, b| cmp_path(a, b));
    let mut out = vec![canonical_ring(exterior, true)];
    out.extend(holes);
    out
}

impl Geometry {
    /// Reduce to a form where equivalent geometries are structurally equal.
    pub fn canonicalize(&self) -> Geometry {
        match self {
            Self::Point(p) => Self::Point(round_position(p)),
            Self::MultiPoint(ps) => {
                let mut pts: Vec<Position> = ps.iter().map(round_position).collect();
                pts.sort_by(cmp_position);
                Self::MultiPoint(pts)
            }
            Self::LineString(ps) => Self::LineString(canonical_line(ps)),
            Self::MultiLineString(parts) => {
                let mut lines: Vec<Vec<Position>> =
                    parts.iter().map(|ps| canonical_line(ps)).collect();
                lines.sort_by(|a, b| cmp_path(a, b));
                Self::MultiLineString(lines)
            }
            Self::Polygon(rings) => Self::Polygon(canonical_polygon(rings)),
            Self::MultiPolygon(polys) => {
                let mut out: Vec<Vec<Vec<Position>>> =
                    polys.iter().map(|rings| canonical_polygon(rings)).collect();
                out.sort_by(|a, b| cmp_rings(a, b));
                Self::MultiPolygon(out)
            }
            Self::GeometryCollection(members) => {
                Self::GeometryCollection(members.iter().map(Geometry::canonicalize).collect())
            }
        }
    }

    /// Canonical equality within [`COORDINATE_TOLERANCE`].
    pub fn approx_eq(&self, other: &Geometry) -> bool {
        canonical_eq(&self.canonicalize(), &other.canonicalize())
    }
}

fn close(a: &Position, b: &Position) -> bool {
    // The epsilon absorbs floating-point error left over from rounding.
    let tol = COORDINATE_TOLERANCE + 1e-12;
    (a[0] - b[0]).abs() <= tol && (a[1] - b[1]).abs() <= tol
}

fn paths_close(a: &[Position], b: &[Position]) -> bool {
    a.len() == b.len() && a.iter().zip(b).all(|(p, q)| close(p, q))
}

fn rings_close(a: &[Vec<Position>], b: &[Vec<Position>]) -> bool {
    a.len() == b.len() && a.iter().zip(b).all(|(p, q)| paths_close(p, q))
}

fn canonical_eq(a: &Geometry, b: &Geometry) -> bool {
    use Geometry::*;
    match (a, b) {
        (Point(p), Point(q)) => close(p, q),
        (MultiPoint(p), MultiPoint(q)) | (LineString(p), LineString(q)) => paths_close(p, q),
        (MultiLineString(p), MultiLineString(q)) | (Polygon(p), Polygon(q)) => rings_close(p, q),
        (MultiPolygon(p), MultiPolygon(q)) => {
            p.len() == q.len() && p.iter().zip(q).all(|(x, y)| rings_close(x, y))
        }
        (GeometryCollection(p), GeometryCollection(q)) => {
            p.len() == q.len() && p.iter().zip(q).all(|(x, y)| canonical_eq(x, y))
        }
        _ => false,
    }
}
