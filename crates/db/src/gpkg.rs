//! GeoPackage layer reader.
//!
//! A GeoPackage is an SQLite database. Feature layers are the rows of
//! `gpkg_contents` with `data_type = 'features'`; each names its geometry
//! column in `gpkg_geometry_columns` and its SRS in `gpkg_spatial_ref_sys`.
//! The file is opened read-only and never written.

use std::path::Path;

use serde_json::Value;
use sqlx::sqlite::{SqliteConnectOptions, SqliteRow, SqliteValueRef};
use sqlx::{Connection, Decode, Row, SqliteConnection, TypeInfo, ValueRef};

use linework_core::crs::Crs;
use linework_core::error::ImportError;
use linework_core::feature::{LayerInfo, Properties, SourceFeature, SourceLayer};
use linework_core::wkb::decode_gpkg;

const FORMAT: &str = "geopackage";

fn parse_error(message: impl Into<String>) -> ImportError {
    ImportError::Parse {
        format: FORMAT,
        message: message.into(),
    }
}

fn sqlite_error(err: sqlx::Error) -> ImportError {
    parse_error(err.to_string())
}

/// Quote an SQLite identifier.
fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

#[derive(Debug, Clone)]
struct FeatureTable {
    table_name: String,
    geometry_column: String,
    srs_id: i64,
}

async fn open(path: &Path) -> Result<SqliteConnection, ImportError> {
    let options = SqliteConnectOptions::new()
        .filename(path)
        .read_only(true)
        .create_if_missing(false);
    SqliteConnection::connect_with(&options)
        .await
        .map_err(sqlite_error)
}

async fn feature_tables(conn: &mut SqliteConnection) -> Result<Vec<FeatureTable>, ImportError> {
    let rows = sqlx::query(
        "SELECT c.table_name, g.column_name, g.srs_id \
         FROM gpkg_contents c \
         JOIN gpkg_geometry_columns g ON g.table_name = c.table_name \
         WHERE c.data_type = 'features' \
         ORDER BY c.table_name",
    )
    .fetch_all(&mut *conn)
    .await
    .map_err(|e| parse_error(format!("not a GeoPackage: {e}")))?;

    rows.iter()
        .map(|row| {
            Ok(FeatureTable {
                table_name: row.try_get(0).map_err(sqlite_error)?,
                geometry_column: row.try_get(1).map_err(sqlite_error)?,
                srs_id: row.try_get(2).map_err(sqlite_error)?,
            })
        })
        .collect()
}

/// Resolve a layer's SRS. `0` and `-1` are the GeoPackage "undefined"
/// entries and yield `None`.
async fn layer_crs(conn: &mut SqliteConnection, srs_id: i64) -> Result<Option<Crs>, ImportError> {
    if srs_id == 0 || srs_id == -1 {
        return Ok(None);
    }
    let row = sqlx::query(
        "SELECT organization, organization_coordsys_id \
         FROM gpkg_spatial_ref_sys WHERE srs_id = ?",
    )
    .bind(srs_id)
    .fetch_optional(&mut *conn)
    .await
    .map_err(sqlite_error)?;

    let Some(row) = row else {
        return Err(ImportError::InvalidCrs(format!("srs_id {srs_id} is not defined")));
    };
    let organization: String = row.try_get(0).map_err(sqlite_error)?;
    let code: i64 = row.try_get(1).map_err(sqlite_error)?;
    if organization.eq_ignore_ascii_case("EPSG") {
        Crs::from_epsg(code).map(Some)
    } else {
        Crs::parse(&format!("{organization}:{code}")).map(Some)
    }
}

/// Attribute columns of a table: everything except the primary key and
/// the geometry column.
async fn attribute_columns(
    conn: &mut SqliteConnection,
    table: &FeatureTable,
) -> Result<Vec<String>, ImportError> {
    let rows = sqlx::query(&format!("PRAGMA table_info({})", quote_ident(&table.table_name)))
        .fetch_all(&mut *conn)
        .await
        .map_err(sqlite_error)?;
    let mut columns = Vec::new();
    for row in rows {
        let name: String = row.try_get("name").map_err(sqlite_error)?;
        let pk: i64 = row.try_get("pk").map_err(sqlite_error)?;
        if pk == 0 && !name.eq_ignore_ascii_case(&table.geometry_column) {
            columns.push(name);
        }
    }
    Ok(columns)
}

/// Decode a cell by its stored SQLite type, not its declared type.
fn cell_value(value: SqliteValueRef<'_>) -> Result<Value, ImportError> {
    if value.is_null() {
        return Ok(Value::Null);
    }
    let type_name = value.type_info().name().to_string();
    let decoded = match type_name.as_str() {
        "INTEGER" => <i64 as Decode<sqlx::Sqlite>>::decode(value).map(Value::from),
        "REAL" => <f64 as Decode<sqlx::Sqlite>>::decode(value).map(Value::from),
        "BLOB" => <Vec<u8> as Decode<sqlx::Sqlite>>::decode(value)
            .map(|bytes| Value::String(bytes.iter().map(|b| format!("{b:02x}")).collect())),
        _ => <String as Decode<sqlx::Sqlite>>::decode(value).map(Value::String),
    };
    decoded.map_err(|e| parse_error(format!("could not decode {type_name} value: {e}")))
}

fn read_row(
    row: &SqliteRow,
    geometry_column: &str,
    columns: &[String],
) -> Result<SourceFeature, ImportError> {
    let mut properties = Properties::new();
    for column in columns {
        let raw = row.try_get_raw(column.as_str()).map_err(sqlite_error)?;
        properties.insert(column.clone(), cell_value(raw)?);
    }

    let mut feature = SourceFeature {
        id: None,
        geometry: None,
        geometry_error: None,
        properties,
    };
    let raw = row.try_get_raw(geometry_column).map_err(sqlite_error)?;
    if !raw.is_null() {
        let blob = <Vec<u8> as Decode<sqlx::Sqlite>>::decode(raw)
            .map_err(|e| parse_error(format!("geometry is not a blob: {e}")))?;
        match decode_gpkg(&blob) {
            Ok(geometry) => feature.geometry = geometry,
            Err(e) => feature.geometry_error = Some(e.to_string()),
        }
    }
    Ok(feature)
}

async fn read_table(
    conn: &mut SqliteConnection,
    table: &FeatureTable,
) -> Result<SourceLayer, ImportError> {
    let crs = layer_crs(conn, table.srs_id).await?;
    let columns = attribute_columns(conn, table).await?;
    let geometry_column = quote_ident(&table.geometry_column);
    let select_list = std::iter::once(geometry_column)
        .chain(columns.iter().map(|c| quote_ident(c)))
        .collect::<Vec<_>>()
        .join(", ");
    let rows = sqlx::query(&format!(
        "SELECT {select_list} FROM {} ORDER BY rowid",
        quote_ident(&table.table_name)
    ))
    .fetch_all(&mut *conn)
    .await
    .map_err(sqlite_error)?;

    let features = rows
        .iter()
        .map(|row| read_row(row, &table.geometry_column, &columns))
        .collect::<Result<Vec<_>, _>>()?;

    Ok(SourceLayer {
        name: table.table_name.clone(),
        crs,
        features,
    })
}

/// Summaries of every feature layer in the file.
pub async fn list_layers(path: &Path) -> Result<Vec<LayerInfo>, ImportError> {
    let mut conn = open(path).await?;
    let tables = feature_tables(&mut conn).await?;
    let mut layers = Vec::with_capacity(tables.len());
    for table in &tables {
        layers.push(read_table(&mut conn, table).await?.info());
    }
    conn.close().await.map_err(sqlite_error)?;
    Ok(layers)
}

/// Read one layer. `layer_name` may be omitted only when the file holds a
/// single feature layer.
pub async fn read_layer(path: &Path, layer_name: Option<&str>) -> Result<SourceLayer, ImportError> {
    let mut conn = open(path).await?;
    let tables = feature_tables(&mut conn).await?;
    let table = match layer_name {
        Some(name) => tables
            .iter()
            .find(|t| t.table_name == name)
            .ok_or_else(|| ImportError::LayerNotFound(name.to_string()))?,
        None => match tables.as_slice() {
            [only] => only,
            [] => return Err(parse_error("file contains no feature layers")),
            many => {
                return Err(parse_error(format!(
                    "file contains {} feature layers; choose one by name",
                    many.len()
                )))
            }
        },
    };
    let layer = read_table(&mut conn, table).await?;
    conn.close().await.map_err(sqlite_error)?;
    Ok(layer)
}
