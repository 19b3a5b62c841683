use serde::Serialize;
use thiserror::Error;

use crate::core::AccuracyClass;
use crate::utils::config::MeasurementConfig;

/// Reasons a single `(idA, idB, distance)` tuple is dropped
#[derive(Debug, Clone, PartialEq, Serialize, Error)]
pub enum MeasurementRejection {
    #[error("Malformed measurement: {details}")]
    Malformed { details: String },
    #[error("Missing identifier in measurement")]
    MissingIdentifier,
    #[error("Measurement references '{id}' on both ends")]
    SelfReference { id: String },
    #[error("Non-finite distance: {distance}")]
    NonFiniteDistance { distance: f64 },
    #[error("Non-positive distance: {distance} m")]
    NonPositiveDistance { distance: f64 },
    #[error("Distance {distance:.2} m exceeds plausible range of {max_m:.1} m")]
    OutOfRange { distance: f64, max_m: f64 },
}

/// Classify a valid distance into the UWB accuracy bands
pub fn classify_accuracy(distance_m: f64, config: &MeasurementConfig) -> AccuracyClass {
    if distance_m < config.accurate_min_m {
        AccuracyClass::TooClose
    } else if distance_m > config.accurate_max_m {
        AccuracyClass::TooFar
    } else {
        AccuracyClass::Accurate
    }
}

/// Check one tuple and classify its distance
pub fn validate_measurement(
    id_a: &str,
    id_b: &str,
    distance_m: f64,
    config: &MeasurementConfig,
) -> Result<AccuracyClass, MeasurementRejection> {
    if id_a.trim().is_empty() || id_b.trim().is_empty() {
        return Err(MeasurementRejection::MissingIdentifier);
    }
    if id_a == id_b {
        return Err(MeasurementRejection::SelfReference { id: id_a.to_string() });
    }
    if !distance_m.is_finite() {
        return Err(MeasurementRejection::NonFiniteDistance { distance: distance_m });
    }
    if distance_m <= 0.0 {
        return Err(MeasurementRejection::NonPositiveDistance { distance: distance_m });
    }
    if distance_m > config.max_distance_m {
        return Err(MeasurementRejection::OutOfRange {
            distance: distance_m,
            max_m: config.max_distance_m,
        });
    }
    Ok(classify_accuracy(distance_m, config))
}
