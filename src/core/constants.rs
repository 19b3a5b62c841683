//! Physical constants and system parameters

/// Identifier of the UWB gateway node, preferred as geo reference anchor
pub const DEFAULT_GATEWAY_ID: &str = "B5A4";

/// Earth radius used for the local equirectangular projection (meters, WGS84 semi-major axis)
pub const EARTH_RADIUS_M: f64 = 6378137.0;

/// Lower bound of the "accurate" UWB ranging band (meters)
pub const ACCURATE_RANGE_MIN_M: f64 = 0.5;

/// Upper bound of the "accurate" UWB ranging band (meters)
pub const ACCURATE_RANGE_MAX_M: f64 = 8.0;

/// Largest distance accepted from the transport (meters)
pub const MAX_PLAUSIBLE_DISTANCE_M: f64 = 300.0;
