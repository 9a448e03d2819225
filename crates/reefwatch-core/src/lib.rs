//! Core domain records for the ReefWatch ingestion pipeline.
//!
//! One explicit type per stage boundary: raw drafts as fetched, cleaned
//! records, the spatially merged record, and the persisted metric.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

pub const CRATE_NAME: &str = "reefwatch-core";

/// Baseline applied when an observation has no matching reef geometry.
pub const DEFAULT_REEF_BASELINE: f64 = 80.0;

/// One row of the SST/DHW gridded product as fetched, before validation.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, Default)]
pub struct ObservationDraft {
    #[serde(default, alias = "latitude")]
    pub lat: Option<f64>,
    #[serde(default, alias = "longitude")]
    pub lon: Option<f64>,
    #[serde(default)]
    pub sst: Option<f64>,
    #[serde(default)]
    pub dhw: Option<f64>,
}

/// Validated sensor reading, stamped with the run date.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Observation {
    pub latitude: f64,
    pub longitude: f64,
    pub date: NaiveDate,
    pub sst: f64,
    pub dhw: f64,
}

/// One row of the pH product as fetched, before validation.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, Default)]
pub struct PhDraft {
    #[serde(default, alias = "latitude")]
    pub lat: Option<f64>,
    #[serde(default, alias = "longitude")]
    pub lon: Option<f64>,
    #[serde(default)]
    pub ph: Option<f64>,
}

/// Validated pH reading, stamped with the run date.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PhReading {
    pub latitude: f64,
    pub longitude: f64,
    pub date: NaiveDate,
    pub ph: f64,
}

/// Reef geometry in EPSG:4326 degrees. Polygons carry their exterior ring;
/// holes are not represented.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum Geometry {
    Point { lon: f64, lat: f64 },
    Polygon { exterior: Vec<[f64; 2]> },
}

impl Geometry {
    /// Ray-casting containment test. Points enclose nothing.
    pub fn contains(&self, lon: f64, lat: f64) -> bool {
        match self {
            Geometry::Point { .. } => false,
            Geometry::Polygon { exterior } => {
                let n = exterior.len();
                if n < 3 {
                    return false;
                }
                let mut inside = false;
                let mut j = n - 1;
                for i in 0..n {
                    let (xi, yi) = (exterior[i][0], exterior[i][1]);
                    let (xj, yj) = (exterior[j][0], exterior[j][1]);
                    if (yi > lat) != (yj > lat)
                        && lon < (xj - xi) * (lat - yi) / (yj - yi) + xi
                    {
                        inside = !inside;
                    }
                    j = i;
                }
                inside
            }
        }
    }

    /// Representative coordinate: the point itself, or the ring's mean vertex.
    pub fn centroid(&self) -> (f64, f64) {
        match self {
            Geometry::Point { lon, lat } => (*lon, *lat),
            Geometry::Polygon { exterior } => {
                // GeoJSON rings repeat the first vertex at the end.
                let ring = match exterior.as_slice() {
                    [head @ .., last] if head.first() == Some(last) && head.len() >= 2 => head,
                    all => all,
                };
                if ring.is_empty() {
                    return (0.0, 0.0);
                }
                let (sx, sy) = ring
                    .iter()
                    .fold((0.0, 0.0), |(sx, sy), v| (sx + v[0], sy + v[1]));
                (sx / ring.len() as f64, sy / ring.len() as f64)
            }
        }
    }

    /// Planar distance in degrees from the centroid to the given coordinate.
    pub fn distance_deg(&self, lon: f64, lat: f64) -> f64 {
        let (cx, cy) = self.centroid();
        ((cx - lon).powi(2) + (cy - lat).powi(2)).sqrt()
    }
}

/// One reef feature as fetched, before validation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct ReefGeometryDraft {
    pub geometry: Option<Geometry>,
    pub reef_type: Option<String>,
    pub reef_health_baseline: Option<f64>,
}

/// Validated reef feature; baseline is clipped to [0, 100].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReefGeometry {
    pub geometry: Geometry,
    pub reef_type: String,
    pub reef_health_baseline: f64,
}

/// Observation joined with pH and the nearest/enclosing reef feature.
/// The observation side is authoritative; geometry attributes are nullable.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MergedRecord {
    pub latitude: f64,
    pub longitude: f64,
    pub date: NaiveDate,
    pub sst: f64,
    pub dhw: f64,
    pub ph: Option<f64>,
    pub reef_type: Option<String>,
    pub reef_health_baseline: f64,
}

/// Persisted system of record. (date, latitude, longitude) is unique;
/// a later run for the same key overwrites rather than duplicates.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OceanMetric {
    pub date: NaiveDate,
    pub latitude: f64,
    pub longitude: f64,
    pub sst: f64,
    pub dhw: f64,
    pub ph: Option<f64>,
    pub health_score: f64,
    pub anomaly: bool,
    pub forecast_ph: Option<f64>,
}

impl OceanMetric {
    /// Upsert key. Coordinates compare bitwise, matching the store's
    /// unique constraint on the raw column values.
    pub fn key(&self) -> (NaiveDate, u64, u64) {
        (self.date, self.latitude.to_bits(), self.longitude.to_bits())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn square() -> Geometry {
        Geometry::Polygon {
            exterior: vec![[0.0, 0.0], [4.0, 0.0], [4.0, 4.0], [0.0, 4.0], [0.0, 0.0]],
        }
    }

    #[test]
    fn polygon_contains_interior_point_only() {
        let poly = square();
        assert!(poly.contains(2.0, 2.0));
        assert!(!poly.contains(5.0, 2.0));
        assert!(!poly.contains(-1.0, -1.0));
    }

    #[test]
    fn point_geometry_never_encloses() {
        let point = Geometry::Point { lon: 80.0, lat: 15.0 };
        assert!(!point.contains(80.0, 15.0));
    }

    #[test]
    fn centroid_skips_closing_vertex() {
        let poly = square();
        let (cx, cy) = poly.centroid();
        assert!((cx - 2.0).abs() < 1e-9);
        assert!((cy - 2.0).abs() < 1e-9);
    }

    #[test]
    fn distance_is_planar_degrees() {
        let point = Geometry::Point { lon: 3.0, lat: 0.0 };
        assert!((point.distance_deg(0.0, 4.0) - 5.0).abs() < 1e-9);
    }
}
