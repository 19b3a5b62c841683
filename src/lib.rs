//! UWB relative positioning engine
//!
//! Turns streams of pairwise range measurements between anchors, a gateway
//! and mobile tags into a live 2-D layout, and optionally into latitude and
//! longitude through one or more GPS-fixed anchors.
//!
//! ```no_run
//! use uwb_positioning::{EngineConfig, PositioningEngine, RangeMeasurement};
//!
//! let mut engine = PositioningEngine::new(EngineConfig::default())?;
//! engine.apply_batch(&[RangeMeasurement::new("B5A4", "Room1", 2.0)], 0);
//! for step in 0..500 {
//!     engine.tick(step * 16);
//! }
//! println!("{:?}", engine.snapshot().position_of("Room1"));
//! # Ok::<(), uwb_positioning::ConfigError>(())
//! ```

pub mod algorithms;
pub mod api;
pub mod core;
pub mod graph;
pub mod processing;
pub mod simulation;
pub mod utils;
pub mod validation;

// Re-export commonly used types
pub use crate::algorithms::{
    GeoCalibrationProjector, ProjectionFrame, ProjectionStatus, RelativeLayoutSolver, TickReport, UnavailableReason,
};
pub use crate::api::{
    CallbackHandle, EngineEvent, EngineRuntime, IngestHandle, LayoutSnapshot, PositioningEngine, TickSummary,
};
pub use crate::core::{AccuracyClass, Freshness, GeoPoint, MeasurementBatch, RangeMeasurement};
pub use crate::graph::{DistanceGraphStore, Edge, EdgeKey, Entity};
pub use crate::processing::{LifecycleManager, PayloadParser};
pub use crate::utils::{
    init_logging, ConfigError, ConfigurationManager, EngineConfig, GpsAnchorConfig, LogConfig, ParameterUpdates,
};
