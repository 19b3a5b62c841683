//! Input plausibility checks and geometric consistency diagnostics

pub mod measurement;
pub mod triangle;

pub use measurement::{classify_accuracy, validate_measurement, MeasurementRejection};
pub use triangle::{edge_residuals, find_triangle_violations, EdgeResidual, TriangleViolation};
