//! Shared distance-graph data model
//!
//! Entities and edges are owned by [`DistanceGraphStore`] and addressed by
//! identifier / [`EdgeKey`]; every other component works through the store's
//! accessors.

pub mod model;
pub mod store;

pub use model::{Edge, EdgeKey, Entity, RecordId, StateTransition};
pub use store::{BatchOutcome, DistanceGraphStore, MeasurementOutcome, RejectedMeasurement};
