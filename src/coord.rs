//! The internal fixed-point coordinate representation used by the Entity
//! Store and Spatial Grid, and the transforms to/from PBF nanodegrees.
//!
//! A geographic point is stored as two signed 32-bit integers, mapping
//! longitude in `[-180, 180]` and latitude in `[-90, 90]` onto the full
//! signed-32 range: `x = round(lon * 2^31 / 180)`, `y = round(lat * 2^31 / 90)`.
//! Round-trip precision is about 2 cm at the equator.

use crate::error::{new_error, ErrorKind, Result};
use crate::limits::GRID_BITS;

const LON_SCALE: f64 = (1u64 << 31) as f64 / 180.0;
const LAT_SCALE: f64 = (1u64 << 31) as f64 / 90.0;

/// A point in the store's internal fixed-point representation.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct Coord {
    pub x: i32,
    pub y: i32,
}

impl Coord {
    /// Build a `Coord` from degrees, validating the input range.
    pub fn from_degrees(lon: f64, lat: f64) -> Result<Coord> {
        check_lon_range(lon)?;
        check_lat_range(lat)?;
        Ok(Coord {
            x: (lon * LON_SCALE).round() as i32,
            y: (lat * LAT_SCALE).round() as i32,
        })
    }

    /// Build a `Coord` from the nanodegree values a PBF reader produces.
    pub fn from_nanodegrees(nano_lon: i64, nano_lat: i64) -> Result<Coord> {
        Coord::from_degrees(1e-9 * nano_lon as f64, 1e-9 * nano_lat as f64)
    }

    pub fn lon(&self) -> f64 {
        f64::from(self.x) / LON_SCALE
    }

    pub fn lat(&self) -> f64 {
        f64::from(self.y) / LAT_SCALE
    }

    pub fn nano_lon(&self) -> i64 {
        (self.lon() * 1e9).round() as i64
    }

    pub fn nano_lat(&self) -> i64 {
        (self.lat() * 1e9).round() as i64
    }

    /// The spatial-grid cell this coordinate falls into. Cell coordinates
    /// derive from the top `GRID_BITS` bits of `x`/`y` reinterpreted as
    /// unsigned with the sign bit flipped, so the signed minimum (`i32::MIN`,
    /// i.e. `lon = -180` / `lat = -90`) maps to cell `0` instead of the
    /// midpoint — a plain unsigned reinterpretation would rotate the mapping
    /// by half the grid at the +-180/+-90 meridians. This tessellates the
    /// globe into `2^GRID_BITS` bins per axis.
    pub fn grid_cell(&self) -> (u32, u32) {
        let cx = ((self.x as u32) ^ 0x8000_0000) >> (32 - GRID_BITS);
        let cy = ((self.y as u32) ^ 0x8000_0000) >> (32 - GRID_BITS);
        (cx, cy)
    }
}

pub fn check_lon_range(lon: f64) -> Result<()> {
    if (-180.0..=180.0).contains(&lon) {
        Ok(())
    } else {
        Err(new_error(ErrorKind::RangeError {
            detail: format!("longitude {lon} out of range [-180, 180]"),
        }))
    }
}

pub fn check_lat_range(lat: f64) -> Result<()> {
    if (-90.0..=90.0).contains(&lat) {
        Ok(())
    } else {
        Err(new_error(ErrorKind::RangeError {
            detail: format!("latitude {lat} out of range [-90, 90]"),
        }))
    }
}

/// A bounding box in degrees, as accepted on the extract CLI surface.
#[derive(Clone, Copy, Debug)]
pub struct BoundingBox {
    pub min_lon: f64,
    pub min_lat: f64,
    pub max_lon: f64,
    pub max_lat: f64,
}

impl BoundingBox {
    pub fn parse(spec: &str) -> Result<BoundingBox> {
        let parts: Vec<&str> = spec.split(',').collect();
        if parts.len() != 4 {
            return Err(new_error(ErrorKind::RangeError {
                detail: format!("expected 'min_lon,min_lat,max_lon,max_lat', got '{spec}'"),
            }));
        }
        let parse_one = |s: &str| -> Result<f64> {
            s.trim().parse::<f64>().map_err(|_| {
                new_error(ErrorKind::RangeError {
                    detail: format!("'{s}' is not a valid number"),
                })
            })
        };
        let bbox = BoundingBox {
            min_lon: parse_one(parts[0])?,
            min_lat: parse_one(parts[1])?,
            max_lon: parse_one(parts[2])?,
            max_lat: parse_one(parts[3])?,
        };
        bbox.validate()?;
        Ok(bbox)
    }

    pub fn validate(&self) -> Result<()> {
        check_lon_range(self.min_lon)?;
        check_lon_range(self.max_lon)?;
        check_lat_range(self.min_lat)?;
        check_lat_range(self.max_lat)?;
        if self.min_lat >= self.max_lat {
            return Err(new_error(ErrorKind::RangeError {
                detail: "min lat must be less than max lat".into(),
            }));
        }
        if self.min_lon >= self.max_lon {
            return Err(new_error(ErrorKind::RangeError {
                detail: "min lon must be less than max lon".into(),
            }));
        }
        Ok(())
    }

    /// The inclusive range of grid cells this bounding box covers.
    pub fn cell_range(&self) -> Result<(u32, u32, u32, u32)> {
        let min = Coord::from_degrees(self.min_lon, self.min_lat)?;
        let max = Coord::from_degrees(self.max_lon, self.max_lat)?;
        let (min_cx, min_cy) = min.grid_cell();
        let (max_cx, max_cy) = max.grid_cell();
        Ok((min_cx, max_cx, min_cy, max_cy))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn corner_cells() {
        let sw = Coord::from_degrees(-180.0, -90.0).unwrap();
        assert_eq!(sw.grid_cell(), (0, 0));

        let ne = Coord::from_degrees(180.0 - 1e-4, 90.0 - 1e-4).unwrap();
        let (cx, cy) = ne.grid_cell();
        assert_eq!(cx, (1u32 << GRID_BITS) - 1);
        assert_eq!(cy, (1u32 << GRID_BITS) - 1);
    }

    #[test]
    fn roundtrip_precision_is_centimeter_scale() {
        let c = Coord::from_degrees(13.4050, 52.5200).unwrap();
        assert!((c.lon() - 13.4050).abs() < 1e-6);
        assert!((c.lat() - 52.5200).abs() < 1e-6);
    }

    #[test]
    fn rejects_out_of_range() {
        assert!(Coord::from_degrees(200.0, 0.0).is_err());
        assert!(Coord::from_degrees(0.0, -95.0).is_err());
    }

    #[test]
    fn bbox_rejects_inverted_range() {
        let bbox = BoundingBox {
            min_lon: 10.0,
            min_lat: 50.0,
            max_lon: 5.0,
            max_lat: 51.0,
        };
        assert!(bbox.validate().is_err());
    }
}
