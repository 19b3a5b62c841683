use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use thiserror::Error;

use crate::core::{
    GeoPoint, ACCURATE_RANGE_MAX_M, ACCURATE_RANGE_MIN_M, DEFAULT_GATEWAY_ID,
    MAX_PLAUSIBLE_DISTANCE_M,
};
use crate::utils::logging::LogConfig;

/// Complete engine configuration, as loaded from / saved to JSON
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub solver: SolverConfig,
    pub lifecycle: LifecycleConfig,
    pub geo: GeoConfig,
    pub measurement: MeasurementConfig,
    pub runtime: RuntimeConfig,
    pub logging: LogConfig,
}

/// Force-relaxation parameters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SolverConfig {
    /// Spring stiffness applied to `(current - target)` length error
    pub spring_constant: f64,
    /// Velocity retained per tick (0.0 to 1.0)
    pub damping: f64,
    /// Point mass of every entity
    pub mass: f64,
    /// Physics units per meter of measured distance
    pub display_scale: f64,
    /// Repulsion numerator between unconnected entities (units^3 / tick^2)
    pub repulsion_strength: f64,
    /// Distance beyond which unconnected entities do not repel (units)
    pub repulsion_range: f64,
    /// Pull of the layout centroid toward the viewport centre
    pub centering_strength: f64,
    /// Push-back per unit of overshoot past the viewport margin
    pub boundary_strength: f64,
    /// Viewport width (units)
    pub viewport_width: f64,
    /// Viewport height (units)
    pub viewport_height: f64,
    /// Inner margin of the containment box (units)
    pub boundary_margin: f64,
    /// Velocity clamp (units per tick)
    pub max_speed: f64,
}

/// Staleness timeouts
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LifecycleConfig {
    /// Seconds without a measurement before a record turns stale
    pub stale_timeout_s: f64,
    /// Further seconds before a stale record is removed
    pub removal_timeout_s: f64,
    /// Seconds a removed record stays observable before it is dropped (never when unset)
    pub purge_after_s: Option<f64>,
}

/// Externally known GPS fix for one entity
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GpsAnchorConfig {
    pub id: String,
    pub latitude: f64,
    pub longitude: f64,
}

impl GpsAnchorConfig {
    pub fn new(id: impl Into<String>, latitude: f64, longitude: f64) -> Self {
        Self {
            id: id.into(),
            latitude,
            longitude,
        }
    }

    pub fn point(&self) -> GeoPoint {
        GeoPoint::new(self.latitude, self.longitude)
    }
}

/// Geo-calibration and projection settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GeoConfig {
    /// Whether geographic output is produced at all
    pub enabled: bool,
    /// Preferred reference anchor
    pub gateway_id: String,
    /// GPS-fixed entities
    pub anchors: Vec<GpsAnchorConfig>,
    /// Exponential smoothing factor for the scale (0.0 to 1.0)
    pub smoothing_alpha: f64,
    /// Minimum movement before a new coordinate is emitted (meters)
    pub movement_threshold_m: f64,
    /// Window over which sub-threshold movement is coalesced (milliseconds)
    pub debounce_window_ms: u64,
    /// Extra multiplier applied on top of the calibrated scale
    pub unit_multiplier: f64,
    /// Physics +y points south (screen convention)
    pub y_axis_down: bool,
    /// Rotate the layout to match the bearing between two GPS anchors
    pub heading_alignment: bool,
}

/// Input plausibility and accuracy bands
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MeasurementConfig {
    pub accurate_min_m: f64,
    pub accurate_max_m: f64,
    pub max_distance_m: f64,
    /// Relative slack allowed before a triangle counts as violated
    pub triangle_tolerance: f64,
}

/// Tick cadences for the background runtime
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    pub solver_interval_ms: u64,
    pub lifecycle_interval_ms: u64,
    pub projection_interval_ms: u64,
}

impl Default for SolverConfig {
    fn default() -> Self {
        Self {
            spring_constant: 0.1,
            damping: 0.85,
            mass: 1.0,
            display_scale: 50.0,
            repulsion_strength: 400.0,
            repulsion_range: 60.0,
            centering_strength: 0.02,
            boundary_strength: 0.05,
            viewport_width: 1000.0,
            viewport_height: 800.0,
            boundary_margin: 40.0,
            max_speed: 50.0,
        }
    }
}

impl SolverConfig {
    pub fn viewport_center(&self) -> (f64, f64) {
        (self.viewport_width / 2.0, self.viewport_height / 2.0)
    }
}

impl Default for LifecycleConfig {
    fn default() -> Self {
        Self {
            stale_timeout_s: 5.0,
            removal_timeout_s: 25.0,
            purge_after_s: None,
        }
    }
}

impl Default for GeoConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            gateway_id: DEFAULT_GATEWAY_ID.to_string(),
            anchors: Vec::new(),
            smoothing_alpha: 0.1,
            movement_threshold_m: 1.0,
            debounce_window_ms: 2000,
            unit_multiplier: 1.0,
            y_axis_down: true,
            heading_alignment: true,
        }
    }
}

impl Default for MeasurementConfig {
    fn default() -> Self {
        Self {
            accurate_min_m: ACCURATE_RANGE_MIN_M,
            accurate_max_m: ACCURATE_RANGE_MAX_M,
            max_distance_m: MAX_PLAUSIBLE_DISTANCE_M,
            triangle_tolerance: 0.05,
        }
    }
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            solver_interval_ms: 16,
            lifecycle_interval_ms: 1000,
            projection_interval_ms: 500,
        }
    }
}

/// Configuration errors
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ConfigError {
    #[error("Invalid parameter '{parameter}' = '{value}': {reason}")]
    InvalidParameter {
        parameter: String,
        value: String,
        reason: String,
    },
    #[error("Missing required parameter: {parameter}")]
    MissingParameter { parameter: String },
    #[error("I/O error: {message}")]
    IoError { message: String },
    #[error("Serialization error: {message}")]
    SerializationError { message: String },
}

impl ConfigError {
    fn invalid(parameter: &str, value: impl ToString, reason: &str) -> Self {
        ConfigError::InvalidParameter {
            parameter: parameter.to_string(),
            value: value.to_string(),
            reason: reason.to_string(),
        }
    }
}

/// Configuration validation result
#[derive(Debug, Default)]
pub struct ValidationResult {
    pub is_valid: bool,
    pub errors: Vec<ConfigError>,
    pub warnings: Vec<String>,
    pub suggestions: Vec<String>,
}

fn check_positive(parameter: &str, value: f64) -> Result<(), ConfigError> {
    if !value.is_finite() || value <= 0.0 {
        return Err(ConfigError::invalid(parameter, value, "must be a finite positive number"));
    }
    Ok(())
}

fn check_unit_interval(parameter: &str, value: f64, open_low: bool) -> Result<(), ConfigError> {
    let low_ok = if open_low { value > 0.0 } else { value >= 0.0 };
    if !value.is_finite() || !low_ok || value > 1.0 {
        let reason = if open_low {
            "must be in (0.0, 1.0]"
        } else {
            "must be in [0.0, 1.0]"
        };
        return Err(ConfigError::invalid(parameter, value, reason));
    }
    Ok(())
}

fn check_non_negative(parameter: &str, value: f64) -> Result<(), ConfigError> {
    if !value.is_finite() || value < 0.0 {
        return Err(ConfigError::invalid(parameter, value, "must be finite and non-negative"));
    }
    Ok(())
}

fn check_anchor(anchor: &GpsAnchorConfig) -> Result<(), ConfigError> {
    if anchor.id.trim().is_empty() {
        return Err(ConfigError::MissingParameter {
            parameter: "geo.anchors[].id".to_string(),
        });
    }
    if !anchor.point().is_valid() {
        return Err(ConfigError::invalid(
            &format!("geo.anchors[{}]", anchor.id),
            format!("{},{}", anchor.latitude, anchor.longitude),
            "latitude must be within ±90 and longitude within ±180 degrees",
        ));
    }
    Ok(())
}

/// Owns the live configuration, validates every change and persists to JSON
#[derive(Debug, Clone, Default)]
pub struct ConfigurationManager {
    config: EngineConfig,
    config_file_path: Option<String>,
    is_modified: bool,
}

impl ConfigurationManager {
    /// Create a manager holding the default configuration
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a manager from an existing configuration, rejecting invalid ones
    pub fn with_config(config: EngineConfig) -> Result<Self, ConfigError> {
        let validation = Self::validate(&config);
        if let Some(error) = validation.errors.into_iter().next() {
            return Err(error);
        }
        Ok(Self {
            config,
            config_file_path: None,
            is_modified: false,
        })
    }

    /// Create configuration manager and load from file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let mut manager = Self::new();
        manager.load_from_file(path)?;
        Ok(manager)
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Replace the whole configuration after validation
    pub fn update_config(&mut self, config: EngineConfig) -> Result<(), ConfigError> {
        let validation = Self::validate(&config);
        if let Some(error) = validation.errors.into_iter().next() {
            return Err(error);
        }
        self.config = config;
        self.is_modified = true;
        Ok(())
    }

    /// Load configuration from JSON file
    pub fn load_from_file<P: AsRef<Path>>(&mut self, path: P) -> Result<(), ConfigError> {
        let path_str = path.as_ref().to_string_lossy().to_string();

        let content = fs::read_to_string(&path).map_err(|e| ConfigError::IoError {
            message: format!("Failed to read config file '{}': {}", path_str, e),
        })?;

        let config: EngineConfig =
            serde_json::from_str(&content).map_err(|e| ConfigError::SerializationError {
                message: format!("Failed to parse config file '{}': {}", path_str, e),
            })?;

        let validation = Self::validate(&config);
        if let Some(error) = validation.errors.into_iter().next() {
            return Err(error);
        }
        for warning in &validation.warnings {
            tracing::warn!(file = %path_str, "{}", warning);
        }

        self.config = config;
        self.config_file_path = Some(path_str);
        self.is_modified = false;
        Ok(())
    }

    /// Save configuration to JSON file
    pub fn save_to_file<P: AsRef<Path>>(&mut self, path: P) -> Result<(), ConfigError> {
        let path_str = path.as_ref().to_string_lossy().to_string();

        let content =
            serde_json::to_string_pretty(&self.config).map_err(|e| ConfigError::SerializationError {
                message: format!("Failed to serialize config: {}", e),
            })?;

        fs::write(&path, content).map_err(|e| ConfigError::IoError {
            message: format!("Failed to write config file '{}': {}", path_str, e),
        })?;

        self.config_file_path = Some(path_str);
        self.is_modified = false;
        Ok(())
    }

    /// Save to the currently loaded file path
    pub fn save(&mut self) -> Result<(), ConfigError> {
        match self.config_file_path.clone() {
            Some(path) => self.save_to_file(path),
            None => Err(ConfigError::IoError {
                message: "No file path set for saving configuration".to_string(),
            }),
        }
    }

    /// Check if configuration has been modified since last save
    pub fn is_modified(&self) -> bool {
        self.is_modified
    }

    // Runtime Parameter Adjustment Methods

    pub fn set_spring_constant(&mut self, value: f64) -> Result<f64, ConfigError> {
        check_positive("solver.spring_constant", value)?;
        Ok(self.replace(|c| &mut c.solver.spring_constant, value))
    }

    pub fn set_damping(&mut self, value: f64) -> Result<f64, ConfigError> {
        check_unit_interval("solver.damping", value, false)?;
        Ok(self.replace(|c| &mut c.solver.damping, value))
    }

    pub fn set_mass(&mut self, value: f64) -> Result<f64, ConfigError> {
        check_positive("solver.mass", value)?;
        Ok(self.replace(|c| &mut c.solver.mass, value))
    }

    pub fn set_display_scale(&mut self, value: f64) -> Result<f64, ConfigError> {
        check_positive("solver.display_scale", value)?;
        Ok(self.replace(|c| &mut c.solver.display_scale, value))
    }

    pub fn set_stale_timeout(&mut self, seconds: f64) -> Result<f64, ConfigError> {
        check_positive("lifecycle.stale_timeout_s", seconds)?;
        Ok(self.replace(|c| &mut c.lifecycle.stale_timeout_s, seconds))
    }

    pub fn set_removal_timeout(&mut self, seconds: f64) -> Result<f64, ConfigError> {
        check_positive("lifecycle.removal_timeout_s", seconds)?;
        Ok(self.replace(|c| &mut c.lifecycle.removal_timeout_s, seconds))
    }

    pub fn set_movement_threshold(&mut self, meters: f64) -> Result<f64, ConfigError> {
        check_non_negative("geo.movement_threshold_m", meters)?;
        Ok(self.replace(|c| &mut c.geo.movement_threshold_m, meters))
    }

    pub fn set_smoothing_alpha(&mut self, alpha: f64) -> Result<f64, ConfigError> {
        check_unit_interval("geo.smoothing_alpha", alpha, true)?;
        Ok(self.replace(|c| &mut c.geo.smoothing_alpha, alpha))
    }

    pub fn set_unit_multiplier(&mut self, multiplier: f64) -> Result<f64, ConfigError> {
        check_positive("geo.unit_multiplier", multiplier)?;
        Ok(self.replace(|c| &mut c.geo.unit_multiplier, multiplier))
    }

    /// Enable or disable geographic output, returning the previous setting
    pub fn set_geo_enabled(&mut self, enabled: bool) -> bool {
        self.is_modified = true;
        std::mem::replace(&mut self.config.geo.enabled, enabled)
    }

    /// Add or replace a GPS anchor, returning the previous fix for that id
    pub fn set_gps_anchor(
        &mut self,
        anchor: GpsAnchorConfig,
    ) -> Result<Option<GpsAnchorConfig>, ConfigError> {
        check_anchor(&anchor)?;
        self.is_modified = true;
        let anchors = &mut self.config.geo.anchors;
        match anchors.iter_mut().find(|a| a.id == anchor.id) {
            Some(existing) => Ok(Some(std::mem::replace(existing, anchor))),
            None => {
                anchors.push(anchor);
                Ok(None)
            }
        }
    }

    pub fn remove_gps_anchor(&mut self, id: &str) -> Option<GpsAnchorConfig> {
        let anchors = &mut self.config.geo.anchors;
        let index = anchors.iter().position(|a| a.id == id)?;
        self.is_modified = true;
        Some(anchors.remove(index))
    }

    fn replace(&mut self, field: impl FnOnce(&mut EngineConfig) -> &mut f64, value: f64) -> f64 {
        self.is_modified = true;
        std::mem::replace(field(&mut self.config), value)
    }

    /// Batch update multiple parameters with optional rollback
    pub fn update_parameters(
        &mut self,
        updates: ParameterUpdates,
    ) -> Result<ParameterUpdateResult, ConfigError> {
        let snapshot = self.create_snapshot();
        let total_updates = updates.count_updates();
        let mut applied_updates = Vec::new();
        let mut failed_updates = Vec::new();

        let mut record = |name: &str, new_value: f64, result: Result<f64, ConfigError>| match result {
            Ok(old_value) => applied_updates.push(format!("{}: {} -> {}", name, old_value, new_value)),
            Err(e) => failed_updates.push(format!("{}: {}", name, e)),
        };

        if let Some(v) = updates.spring_constant {
            record("spring_constant", v, self.set_spring_constant(v));
        }
        if let Some(v) = updates.damping {
            record("damping", v, self.set_damping(v));
        }
        if let Some(v) = updates.mass {
            record("mass", v, self.set_mass(v));
        }
        if let Some(v) = updates.display_scale {
            record("display_scale", v, self.set_display_scale(v));
        }
        if let Some(v) = updates.stale_timeout_s {
            record("stale_timeout_s", v, self.set_stale_timeout(v));
        }
        if let Some(v) = updates.removal_timeout_s {
            record("removal_timeout_s", v, self.set_removal_timeout(v));
        }
        if let Some(v) = updates.movement_threshold_m {
            record("movement_threshold_m", v, self.set_movement_threshold(v));
        }
        if let Some(v) = updates.smoothing_alpha {
            record("smoothing_alpha", v, self.set_smoothing_alpha(v));
        }
        if let Some(v) = updates.unit_multiplier {
            record("unit_multiplier", v, self.set_unit_multiplier(v));
        }
        if let Some(enabled) = updates.geo_enabled {
            let old_value = self.set_geo_enabled(enabled);
            applied_updates.push(format!("geo_enabled: {} -> {}", old_value, enabled));
        }
        for anchor in updates.gps_anchors {
            let id = anchor.id.clone();
            match self.set_gps_anchor(anchor) {
                Ok(_) => applied_updates.push(format!("gps_anchor {}: set", id)),
                Err(e) => failed_updates.push(format!("gps_anchor {}: {}", id, e)),
            }
        }

        if !failed_updates.is_empty() && updates.rollback_on_failure {
            self.restore_from_snapshot(snapshot);
            return Err(ConfigError::InvalidParameter {
                parameter: "batch_update".to_string(),
                value: "multiple".to_string(),
                reason: format!(
                    "Batch update failed with {} errors, rolled back all changes: {}",
                    failed_updates.len(),
                    failed_updates.join("; ")
                ),
            });
        }

        Ok(ParameterUpdateResult {
            applied_updates,
            failed_updates,
            total_updates,
        })
    }

    /// Create a configuration snapshot for rollback purposes
    pub fn create_snapshot(&self) -> ConfigurationSnapshot {
        ConfigurationSnapshot {
            config: self.config.clone(),
            is_modified: self.is_modified,
        }
    }

    /// Restore configuration from a snapshot
    pub fn restore_from_snapshot(&mut self, snapshot: ConfigurationSnapshot) {
        self.config = snapshot.config;
        self.is_modified = snapshot.is_modified;
    }

    /// Validate a complete configuration
    pub fn validate(config: &EngineConfig) -> ValidationResult {
        let mut result = ValidationResult::default();
        let mut check = |outcome: Result<(), ConfigError>| {
            if let Err(e) = outcome {
                result.errors.push(e);
            }
        };

        let solver = &config.solver;
        check(check_positive("solver.spring_constant", solver.spring_constant));
        check(check_unit_interval("solver.damping", solver.damping, false));
        check(check_positive("solver.mass", solver.mass));
        check(check_positive("solver.display_scale", solver.display_scale));
        check(check_non_negative("solver.repulsion_strength", solver.repulsion_strength));
        check(check_non_negative("solver.repulsion_range", solver.repulsion_range));
        check(check_non_negative("solver.centering_strength", solver.centering_strength));
        check(check_non_negative("solver.boundary_strength", solver.boundary_strength));
        check(check_positive("solver.viewport_width", solver.viewport_width));
        check(check_positive("solver.viewport_height", solver.viewport_height));
        check(check_non_negative("solver.boundary_margin", solver.boundary_margin));
        check(check_positive("solver.max_speed", solver.max_speed));

        let lifecycle = &config.lifecycle;
        check(check_positive("lifecycle.stale_timeout_s", lifecycle.stale_timeout_s));
        check(check_positive("lifecycle.removal_timeout_s", lifecycle.removal_timeout_s));
        if let Some(purge) = lifecycle.purge_after_s {
            check(check_non_negative("lifecycle.purge_after_s", purge));
        }

        let geo = &config.geo;
        check(check_unit_interval("geo.smoothing_alpha", geo.smoothing_alpha, true));
        check(check_non_negative("geo.movement_threshold_m", geo.movement_threshold_m));
        check(check_positive("geo.unit_multiplier", geo.unit_multiplier));
        for anchor in &geo.anchors {
            check(check_anchor(anchor));
        }

        let measurement = &config.measurement;
        check(check_positive("measurement.accurate_min_m", measurement.accurate_min_m));
        check(check_positive("measurement.max_distance_m", measurement.max_distance_m));
        check(check_non_negative("measurement.triangle_tolerance", measurement.triangle_tolerance));
        if measurement.accurate_max_m < measurement.accurate_min_m {
            check(Err(ConfigError::invalid(
                "measurement.accurate_max_m",
                measurement.accurate_max_m,
                "must not be below accurate_min_m",
            )));
        }

        let runtime = &config.runtime;
        for (name, value) in [
            ("runtime.solver_interval_ms", runtime.solver_interval_ms),
            ("runtime.lifecycle_interval_ms", runtime.lifecycle_interval_ms),
            ("runtime.projection_interval_ms", runtime.projection_interval_ms),
        ] {
            if value == 0 {
                check(Err(ConfigError::invalid(name, value, "interval must be non-zero")));
            }
        }

        if solver.damping >= 0.99 {
            result
                .warnings
                .push("Damping close to 1.0 lets the layout oscillate for a long time".to_string());
        }
        if solver.spring_constant / solver.mass > 1.0 {
            result.warnings.push(
                "Spring constant over mass above 1.0 may make the explicit integration unstable"
                    .to_string(),
            );
            result
                .suggestions
                .push("Lower spring_constant or raise mass".to_string());
        }
        if geo.enabled && geo.anchors.is_empty() {
            result.warnings.push(
                "Geographic projection enabled without GPS anchors; output will be unavailable"
                    .to_string(),
            );
            result
                .suggestions
                .push(format!("Add a GPS anchor for gateway '{}'", geo.gateway_id));
        }
        if geo.smoothing_alpha > 0.5 {
            result
                .warnings
                .push("Large smoothing_alpha lets single noisy samples move the scale".to_string());
        }

        result.is_valid = result.errors.is_empty();
        result
    }
}

/// Batch parameter updates structure
#[derive(Debug, Default)]
pub struct ParameterUpdates {
    pub spring_constant: Option<f64>,
    pub damping: Option<f64>,
    pub mass: Option<f64>,
    pub display_scale: Option<f64>,
    pub stale_timeout_s: Option<f64>,
    pub removal_timeout_s: Option<f64>,
    pub movement_threshold_m: Option<f64>,
    pub smoothing_alpha: Option<f64>,
    pub unit_multiplier: Option<f64>,
    pub geo_enabled: Option<bool>,
    pub gps_anchors: Vec<GpsAnchorConfig>,
    /// Whether to rollback all changes if any update fails
    pub rollback_on_failure: bool,
}

impl ParameterUpdates {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_spring_constant(mut self, value: f64) -> Self {
        self.spring_constant = Some(value);
        self
    }

    pub fn with_damping(mut self, value: f64) -> Self {
        self.damping = Some(value);
        self
    }

    pub fn with_mass(mut self, value: f64) -> Self {
        self.mass = Some(value);
        self
    }

    pub fn with_display_scale(mut self, value: f64) -> Self {
        self.display_scale = Some(value);
        self
    }

    pub fn with_stale_timeout(mut self, seconds: f64) -> Self {
        self.stale_timeout_s = Some(seconds);
        self
    }

    pub fn with_removal_timeout(mut self, seconds: f64) -> Self {
        self.removal_timeout_s = Some(seconds);
        self
    }

    pub fn with_movement_threshold(mut self, meters: f64) -> Self {
        self.movement_threshold_m = Some(meters);
        self
    }

    pub fn with_smoothing_alpha(mut self, alpha: f64) -> Self {
        self.smoothing_alpha = Some(alpha);
        self
    }

    pub fn with_unit_multiplier(mut self, multiplier: f64) -> Self {
        self.unit_multiplier = Some(multiplier);
        self
    }

    pub fn with_geo_enabled(mut self, enabled: bool) -> Self {
        self.geo_enabled = Some(enabled);
        self
    }

    pub fn with_gps_anchor(mut self, anchor: GpsAnchorConfig) -> Self {
        self.gps_anchors.push(anchor);
        self
    }

    pub fn with_rollback_on_failure(mut self) -> Self {
        self.rollback_on_failure = true;
        self
    }

    /// Count total number of updates
    pub fn count_updates(&self) -> usize {
        [
            self.spring_constant,
            self.damping,
            self.mass,
            self.display_scale,
            self.stale_timeout_s,
            self.removal_timeout_s,
            self.movement_threshold_m,
            self.smoothing_alpha,
            self.unit_multiplier,
        ]
        .iter()
        .filter(|v| v.is_some())
        .count()
            + usize::from(self.geo_enabled.is_some())
            + self.gps_anchors.len()
    }
}

/// Result of batch parameter update
#[derive(Debug)]
pub struct ParameterUpdateResult {
    pub applied_updates: Vec<String>,
    pub failed_updates: Vec<String>,
    pub total_updates: usize,
}

/// Configuration snapshot for rollback
#[derive(Debug, Clone)]
pub struct ConfigurationSnapshot {
    config: EngineConfig,
    is_modified: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let result = ConfigurationManager::validate(&EngineConfig::default());
        assert!(result.is_valid, "{:?}", result.errors);
        assert_eq!(EngineConfig::default().geo.gateway_id, "B5A4");
        assert_eq!(EngineConfig::default().geo.smoothing_alpha, 0.1);
    }

    #[test]
    fn test_invalid_config_collects_all_errors() {
        let mut config = EngineConfig::default();
        config.solver.mass = 0.0;
        config.solver.damping = 1.5;
        config.geo.anchors.push(GpsAnchorConfig::new("GW", 95.0, 0.0));

        let result = ConfigurationManager::validate(&config);
        assert!(!result.is_valid);
        assert_eq!(result.errors.len(), 3);
        assert!(ConfigurationManager::with_config(config).is_err());
    }

    #[test]
    fn test_geo_enabled_without_anchor_warns() {
        let mut config = EngineConfig::default();
        config.geo.enabled = true;
        let result = ConfigurationManager::validate(&config);
        assert!(result.is_valid);
        assert!(!result.warnings.is_empty());
        assert!(!result.suggestions.is_empty());
    }

    #[test]
    fn test_config_file_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("engine.json");

        let mut manager = ConfigurationManager::new();
        manager
            .set_gps_anchor(GpsAnchorConfig::new("B5A4", 53.4084, -2.9916))
            .unwrap();
        manager.set_spring_constant(0.2).unwrap();
        assert!(manager.is_modified());
        manager.save_to_file(&path).unwrap();
        assert!(!manager.is_modified());

        let loaded = ConfigurationManager::from_file(&path).unwrap();
        assert_eq!(loaded.config(), manager.config());
        assert_eq!(loaded.config().geo.anchors.len(), 1);
    }

    #[test]
    fn test_partial_config_file_uses_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("partial.json");
        fs::write(&path, r#"{ "solver": { "damping": 0.7 } }"#).unwrap();

        let loaded = ConfigurationManager::from_file(&path).unwrap();
        assert_eq!(loaded.config().solver.damping, 0.7);
        assert_eq!(loaded.config().solver.mass, 1.0);
        assert_eq!(loaded.config().lifecycle, LifecycleConfig::default());
    }

    #[test]
    fn test_load_rejects_malformed_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("broken.json");
        fs::write(&path, "{ not json").unwrap();

        match ConfigurationManager::from_file(&path) {
            Err(ConfigError::SerializationError { .. }) => {}
            other => panic!("expected serialization error, got {:?}", other),
        }
        assert!(matches!(
            ConfigurationManager::from_file(dir.path().join("missing.json")),
            Err(ConfigError::IoError { .. })
        ));
    }

    #[test]
    fn test_save_without_path_fails() {
        let mut manager = ConfigurationManager::new();
        assert!(matches!(manager.save(), Err(ConfigError::IoError { .. })));
    }

    #[test]
    fn test_runtime_setters_return_previous_value() {
        let mut manager = ConfigurationManager::new();
        assert_eq!(manager.set_damping(0.5).unwrap(), 0.85);
        assert_eq!(manager.config().solver.damping, 0.5);
        assert!(manager.set_damping(1.2).is_err());
        assert!(manager.set_mass(-1.0).is_err());
        assert!(manager.set_smoothing_alpha(0.0).is_err());
        assert!(manager.set_display_scale(f64::NAN).is_err());
        assert_eq!(manager.config().solver.damping, 0.5);
        assert!(!manager.set_geo_enabled(true));
    }

    #[test]
    fn test_gps_anchor_replace_and_remove() {
        let mut manager = ConfigurationManager::new();
        assert!(manager
            .set_gps_anchor(GpsAnchorConfig::new("GW", 53.0, -2.0))
            .unwrap()
            .is_none());
        let previous = manager
            .set_gps_anchor(GpsAnchorConfig::new("GW", 53.5, -2.5))
            .unwrap();
        assert_eq!(previous.unwrap().latitude, 53.0);
        assert_eq!(manager.config().geo.anchors.len(), 1);
        assert!(manager.set_gps_anchor(GpsAnchorConfig::new("", 0.0, 0.0)).is_err());
        assert!(manager.remove_gps_anchor("GW").is_some());
        assert!(manager.remove_gps_anchor("GW").is_none());
    }

    #[test]
    fn test_batch_parameter_updates() {
        let mut manager = ConfigurationManager::new();
        let updates = ParameterUpdates::new()
            .with_spring_constant(0.05)
            .with_stale_timeout(10.0)
            .with_mass(-2.0)
            .with_geo_enabled(true);
        assert_eq!(updates.count_updates(), 4);

        let result = manager.update_parameters(updates).unwrap();
        assert_eq!(result.total_updates, 4);
        assert_eq!(result.applied_updates.len(), 3);
        assert_eq!(result.failed_updates.len(), 1);
        assert_eq!(manager.config().solver.spring_constant, 0.05);
        assert_eq!(manager.config().lifecycle.stale_timeout_s, 10.0);
    }

    #[test]
    fn test_batch_update_with_rollback() {
        let mut manager = ConfigurationManager::new();
        let updates = ParameterUpdates::new()
            .with_damping(0.5)
            .with_unit_multiplier(0.0)
            .with_rollback_on_failure();

        assert!(manager.update_parameters(updates).is_err());
        assert_eq!(manager.config().solver.damping, 0.85);
        assert!(!manager.is_modified());
    }
}
