//! GeoPackage geometry blob and WKB decoding.
//!
//! A GeoPackage blob is a small header (`GP`, version, flags, SRS id,
//! optional envelope) followed by standard WKB. Both ISO (`+1000`/`+2000`/
//! `+3000`) and EWKB (high-bit flags) dimensionality markers are accepted;
//! Z and M ordinates are read and discarded.

use crate::geometry::{Geometry, Position};

#[derive(Debug, thiserror::Error, PartialEq)]
pub enum WkbError {
    #[error("geometry blob is truncated")]
    Truncated,
    #[error("geometry blob does not start with the GP magic")]
    BadMagic,
    #[error("invalid byte order marker {0}")]
    InvalidByteOrder(u8),
    #[error("invalid GeoPackage envelope indicator {0}")]
    InvalidEnvelope(u8),
    #[error("unsupported WKB geometry type {0}")]
    UnsupportedType(u32),
}

/// Header of a GeoPackage geometry blob.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GpkgHeader {
    pub srs_id: i32,
    pub empty: bool,
    /// Offset of the WKB payload within the blob.
    pub wkb_offset: usize,
}

pub fn read_gpkg_header(blob: &[u8]) -> Result<GpkgHeader, WkbError> {
    if blob.len() < 8 {
        return Err(WkbError::Truncated);
    }
    if &blob[0..2] != b"GP" {
        return Err(WkbError::BadMagic);
    }
    let flags = blob[3];
    let little_endian = flags & 0x01 == 1;
    let envelope_len = match (flags >> 1) & 0x07 {
        0 => 0,
        1 => 32,
        2 | 3 => 48,
        4 => 64,
        other => return Err(WkbError::InvalidEnvelope(other)),
    };
    let srs_bytes = [blob[4], blob[5], blob[6], blob[7]];
    let srs_id = if little_endian {
        i32::from_le_bytes(srs_bytes)
    } else {
        i32::from_be_bytes(srs_bytes)
    };
    let wkb_offset = 8 + envelope_len;
    if blob.len() < wkb_offset {
        return Err(WkbError::Truncated);
    }
    Ok(GpkgHeader {
        srs_id,
        empty: flags & 0x10 != 0,
        wkb_offset,
    })
}

/// Decode a GeoPackage blob. Empty geometries decode to `None`.
pub fn decode_gpkg(blob: &[u8]) -> Result<Option<Geometry>, WkbError> {
    let header = read_gpkg_header(blob)?;
    if header.empty {
        return Ok(None);
    }
    let geometry = decode_wkb(&blob[header.wkb_offset..])?;
    // WKB has no empty point; GeoPackage writes it as NaN, NaN.
    if let Geometry::Point(p) = &geometry {
        if p[0].is_nan() && p[1].is_nan() {
            return Ok(None);
        }
    }
    Ok(Some(geometry))
}

pub fn decode_wkb(bytes: &[u8]) -> Result<Geometry, WkbError> {
    let mut reader = Reader { bytes, pos: 0, little_endian: true };
    reader.geometry()
}

struct Reader<'a> {
    bytes: &'a [u8],
    pos: usize,
    little_endian: bool,
}

impl Reader<'_> {
    fn take<const N: usize>(&mut self) -> Result<[u8; N], WkbError> {
        let end = self.pos + N;
        let slice = self.bytes.get(self.pos..end).ok_or(WkbError::Truncated)?;
        self.pos = end;
        let mut out = [0u8; N];
        out.copy_from_slice(slice);
        Ok(out)
    }

    fn u32(&mut self) -> Result<u32, WkbError> {
        let b = self.take::<4>()?;
        Ok(if self.little_endian { u32::from_le_bytes(b) } else { u32::from_be_bytes(b) })
    }

    fn f64(&mut self) -> Result<f64, WkbError> {
        let b = self.take::<8>()?;
        Ok(if self.little_endian { f64::from_le_bytes(b) } else { f64::from_be_bytes(b) })
    }

    fn position(&mut self, dims: usize) -> Result<Position, WkbError> {
        let x = self.f64()?;
        let y = self.f64()?;
        for _ in 2..dims {
            self.f64()?;
        }
        Ok([x, y])
    }

    fn path(&mut self, dims: usize) -> Result<Vec<Position>, WkbError> {
        let n = self.u32()? as usize;
        (0..n).map(|_| self.position(dims)).collect()
    }

    fn rings(&mut self, dims: usize) -> Result<Vec<Vec<Position>>, WkbError> {
        let n = self.u32()? as usize;
        (0..n).map(|_| self.path(dims)).collect()
    }

    /// Read the byte order and type word, returning `(base type, dims)`.
    fn header(&mut self) -> Result<(u32, usize), WkbError> {
        let [order] = self.take::<1>()?;
        self.little_endian = match order {
            0 => false,
            1 => true,
            other => return Err(WkbError::InvalidByteOrder(other)),
        };
        let raw = self.u32()?;

        // EWKB: Z = 0x8000_0000, M = 0x4000_0000, SRID = 0x2000_0000.
        let ewkb_z = raw & 0x8000_0000 != 0;
        let ewkb_m = raw & 0x4000_0000 != 0;
        if raw & 0x2000_0000 != 0 {
            self.u32()?;
        }
        let code = raw & 0x0FFF_FFFF;
        let (base, iso_dims) = match code / 1000 {
            0 => (code, 2),
            1 | 2 => (code % 1000, 3),
            3 => (code % 1000, 4),
            _ => return Err(WkbError::UnsupportedType(raw)),
        };
        let dims = iso_dims.max(2 + usize::from(ewkb_z) + usize::from(ewkb_m));
        Ok((base, dims))
    }

    fn geometry(&mut self) -> Result<Geometry, WkbError> {
        let (base, dims) = self.header()?;
        match base {
            1 => Ok(Geometry::Point(self.position(dims)?)),
            2 => Ok(Geometry::LineString(self.path(dims)?)),
            3 => Ok(Geometry::Polygon(self.rings(dims)?)),
            4 => self.members(|g| match g {
                Geometry::Point(p) => Some(p),
                _ => None,
            })
            .map(Geometry::MultiPoint),
            5 => self.members(|g| match g {
                Geometry::LineString(ps) => Some(ps),
                _ => None,
            })
            .map(Geometry::MultiLineString),
            6 => self.members(|g| match g {
                Geometry::Polygon(rings) => Some(rings),
                _ => None,
            })
            .map(Geometry::MultiPolygon),
            7 => {
                let n = self.u32()? as usize;
                (0..n)
                    .map(|_| self.geometry())
                    .collect::<Result<Vec<_>, _>>()
                    .map(Geometry::GeometryCollection)
            }
            other => Err(WkbError::UnsupportedType(other)),
        }
    }

    /// Multi-geometries nest complete WKB geometries, each with its own header.
    fn members<T>(&mut self, extract: impl Fn(Geometry) -> Option<T>) -> Result<Vec<T>, WkbError> {
        let n = self.u32()? as usize;
        let mut out = Vec::with_capacity(n.min(4096));
        for _ in 0..n {
            let member = self.geometry()?;
            let code = wkb_code(&member);
            out.push(extract(member).ok_or(WkbError::UnsupportedType(code))?);
        }
        Ok(out)
    }
}

fn wkb_code(geometry: &Geometry) -> u32 {
    match geometry {
        Geometry::Point(_) => 1,
        Geometry::LineString(_) => 2,
        Geometry::Polygon(_) => 3,
        Geometry::MultiPoint(_) => 4,
        Geometry::MultiLineString(_) => 5,
        Geometry::MultiPolygon(_) => 6,
        Geometry::GeometryCollection(_) => 7,
    }
}
