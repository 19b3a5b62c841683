//! Utility modules for configuration and logging

pub mod config;
pub mod logging;

pub use config::{
    ConfigError, ConfigurationManager, EngineConfig, GeoConfig, GpsAnchorConfig, LifecycleConfig,
    MeasurementConfig, ParameterUpdates, RuntimeConfig, SolverConfig,
};
pub use logging::{init_logging, LogConfig, LogFormat, LogLevel};
