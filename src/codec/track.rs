//! Geographic track normalization.
//!
//! A cruise track is an ordered list of (longitude, latitude) pairs. Three
//! input shapes are accepted — a raw coordinate-pair list, a lightweight
//! [`LineString`] object, or well-known-text — and all normalize to one WKT
//! `LINESTRING` encoding, which is what gets persisted inside a change value.

use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::error::{StoreError, StoreResult};

/// One coordinate pair, longitude first (WKT axis order).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Point {
    pub lon: f64,
    pub lat: f64,
}

/// Lightweight line geometry, as produced by GeoJSON-ish upload parsers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LineString {
    /// `[lon, lat]` pairs.
    pub coordinates: Vec<[f64; 2]>,
}

/// A normalized track. Serializes as a WKT `LINESTRING` string.
#[derive(Debug, Clone, PartialEq)]
pub struct Track {
    points: Vec<Point>,
}

impl Track {
    pub fn from_points(points: impl IntoIterator<Item = (f64, f64)>) -> Self {
        Track {
            points: points
                .into_iter()
                .map(|(lon, lat)| Point { lon, lat })
                .collect(),
        }
    }

    /// Parse a WKT `LINESTRING`. Only the linestring geometry is accepted;
    /// anything else fails rather than truncating.
    pub fn from_wkt(wkt: &str) -> StoreResult<Self> {
        let trimmed = wkt.trim();
        let upper = trimmed.to_ascii_uppercase();
        let rest = upper
            .strip_prefix("LINESTRING")
            .ok_or_else(|| StoreError::UnserializableValue {
                reason: format!("expected WKT LINESTRING, got '{trimmed}'"),
            })?;

        let rest = rest.trim_start();
        if rest == "EMPTY" {
            return Ok(Track { points: vec![] });
        }

        let body = rest
            .strip_prefix('(')
            .and_then(|s| s.strip_suffix(')'))
            .ok_or_else(|| StoreError::UnserializableValue {
                reason: format!("malformed WKT LINESTRING '{trimmed}'"),
            })?;

        let mut points = Vec::new();
        for pair in body.split(',') {
            let mut fields = pair.split_whitespace();
            let (lon, lat) = match (fields.next(), fields.next(), fields.next()) {
                (Some(lon), Some(lat), None) => (lon, lat),
                _ => {
                    return Err(StoreError::UnserializableValue {
                        reason: format!("malformed WKT coordinate pair '{pair}'"),
                    })
                }
            };
            let lon: f64 = lon.parse().map_err(|_| StoreError::UnserializableValue {
                reason: format!("bad longitude '{lon}'"),
            })?;
            let lat: f64 = lat.parse().map_err(|_| StoreError::UnserializableValue {
                reason: format!("bad latitude '{lat}'"),
            })?;
            points.push(Point { lon, lat });
        }
        Ok(Track { points })
    }

    pub fn to_wkt(&self) -> String {
        if self.points.is_empty() {
            return "LINESTRING EMPTY".to_string();
        }
        let body = self
            .points
            .iter()
            .map(|p| format!("{} {}", p.lon, p.lat))
            .collect::<Vec<_>>()
            .join(",");
        format!("LINESTRING({body})")
    }

    pub fn points(&self) -> &[Point] {
        &self.points
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }
}

impl From<LineString> for Track {
    fn from(line: LineString) -> Self {
        Track::from_points(line.coordinates.into_iter().map(|[lon, lat]| (lon, lat)))
    }
}

impl std::str::FromStr for Track {
    type Err = StoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Track::from_wkt(s)
    }
}

impl Serialize for Track {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_wkt())
    }
}

impl<'de> Deserialize<'de> for Track {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let wkt = String::deserialize(deserializer)?;
        Track::from_wkt(&wkt).map_err(D::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn all_three_input_shapes_normalize_identically() {
        let from_points = Track::from_points([(-45.5, 30.25), (-44.0, 31.0)]);
        let from_wkt = Track::from_wkt("LINESTRING(-45.5 30.25,-44 31)").unwrap();
        let from_line = Track::from(LineString {
            coordinates: vec![[-45.5, 30.25], [-44.0, 31.0]],
        });

        assert_eq!(from_points, from_wkt);
        assert_eq!(from_points, from_line);
        assert_eq!(from_points.to_wkt(), "LINESTRING(-45.5 30.25,-44 31)");
    }

    #[test]
    fn wkt_round_trips() {
        let track = Track::from_points([(0.0, 0.0), (10.125, -5.5), (20.0, 3.0)]);
        assert_eq!(Track::from_wkt(&track.to_wkt()).unwrap(), track);
    }

    #[test]
    fn empty_track_round_trips() {
        let track = Track::from_points([]);
        assert_eq!(track.to_wkt(), "LINESTRING EMPTY");
        assert_eq!(Track::from_wkt("LINESTRING EMPTY").unwrap(), track);
    }

    #[test]
    fn spaced_wkt_is_accepted() {
        let track = Track::from_wkt("LINESTRING (1 2, 3 4)").unwrap();
        assert_eq!(track.points().len(), 2);
    }

    #[test]
    fn non_linestring_geometry_is_rejected() {
        assert!(Track::from_wkt("POINT(1 2)").is_err());
        assert!(Track::from_wkt("LINESTRING(1 2 3)").is_err());
        assert!(Track::from_wkt("LINESTRING(1)").is_err());
    }
}
