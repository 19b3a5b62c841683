//! Engine, runtime and consumer-facing types
//!
//! [`PositioningEngine`] is the single owner of all positioning state and can
//! be driven by hand (tests, replays) or by an [`EngineRuntime`] thread.

pub mod callback;
pub mod engine;
pub mod runtime;
pub mod types;

pub use callback::{CallbackHandle, EventBus, EventCallback};
pub use engine::{IngestHandle, IngestItem, PositioningEngine, TickSummary};
pub use runtime::{unix_time_ms, EngineRuntime};
pub use types::{EdgeView, EngineEvent, EntityView, LayoutSnapshot};
