//! Core data types for the positioning engine

use serde::{Deserialize, Serialize};
use std::fmt;

use super::constants::EARTH_RADIUS_M;

/// Geographic position in decimal degrees
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeoPoint {
    pub lat: f64,
    pub lng: f64,
}

impl GeoPoint {
    pub fn new(lat: f64, lng: f64) -> Self {
        Self { lat, lng }
    }

    /// True when both coordinates are finite and inside the valid degree ranges
    pub fn is_valid(&self) -> bool {
        self.lat.is_finite()
            && self.lng.is_finite()
            && self.lat.abs() <= 90.0
            && self.lng.abs() <= 180.0
    }

    /// Approximate ground distance to `other` in meters (equirectangular)
    pub fn distance_m(&self, other: &GeoPoint) -> f64 {
        let (east, north) = self.offset_m_to(other);
        (east * east + north * north).sqrt()
    }

    /// East/north offset in meters from `self` to `other`, local to `self`'s latitude
    pub fn offset_m_to(&self, other: &GeoPoint) -> (f64, f64) {
        let lat_rad = self.lat.to_radians();
        let north = (other.lat - self.lat).to_radians() * EARTH_RADIUS_M;
        let east = (other.lng - self.lng).to_radians() * EARTH_RADIUS_M * lat_rad.cos();
        (east, north)
    }
}

/// Staleness classification shared by entities and edges
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Freshness {
    Fresh,
    Stale,
    Removed,
}

impl Freshness {
    pub fn is_fresh(self) -> bool {
        self == Freshness::Fresh
    }

    /// Whether the solver still carries this record (fresh or stale)
    pub fn is_active(self) -> bool {
        self != Freshness::Removed
    }
}

impl fmt::Display for Freshness {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Freshness::Fresh => write!(f, "fresh"),
            Freshness::Stale => write!(f, "stale"),
            Freshness::Removed => write!(f, "removed"),
        }
    }
}

/// Ranging quality derived from the measured distance
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AccuracyClass {
    /// Inside the band where UWB two-way ranging is reliable
    Accurate,
    /// Closer than the reliable band (antenna near-field, multipath)
    TooClose,
    /// Beyond the reliable band
    TooFar,
}

impl fmt::Display for AccuracyClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AccuracyClass::Accurate => write!(f, "accurate"),
            AccuracyClass::TooClose => write!(f, "too_close"),
            AccuracyClass::TooFar => write!(f, "too_far"),
        }
    }
}

/// One `(idA, idB, distance)` tuple as delivered by the transport
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RangeMeasurement {
    pub id_a: String,
    pub id_b: String,
    pub distance_m: f64,
}

impl RangeMeasurement {
    pub fn new(id_a: impl Into<String>, id_b: impl Into<String>, distance_m: f64) -> Self {
        Self {
            id_a: id_a.into(),
            id_b: id_b.into(),
            distance_m,
        }
    }
}

impl<A: Into<String>, B: Into<String>> From<(A, B, f64)> for RangeMeasurement {
    fn from((id_a, id_b, distance_m): (A, B, f64)) -> Self {
        Self::new(id_a, id_b, distance_m)
    }
}

/// A batch of measurements as delivered in one transport message
pub type MeasurementBatch = Vec<RangeMeasurement>;
