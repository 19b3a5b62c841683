//! Layout relaxation and geographic projection

pub mod geo;
pub mod layout;

pub use geo::{
    candidate_scale, offset_to_geo, scale_samples, smooth_scale, GeoCalibrationProjector, GeoDebouncer,
    ProjectionFrame, ProjectionStatus, ScaleUpdate, UnavailableReason,
};
pub use layout::{RelativeLayoutSolver, TickReport, GOLDEN_ANGLE};
