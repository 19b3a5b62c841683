//! Geo calibration and projection
//!
//! Converts the solver's physics-unit layout into latitude/longitude through
//! one or more GPS-fixed anchors. The physics-to-meter scale is re-estimated
//! from every fresh edge whose endpoints are both placed and smoothed with an
//! exponential moving average, so a single noisy frame never snaps it.
//!
//! Local offsets are turned into degrees with the equirectangular
//! approximation around the reference anchor, which is accurate to well
//! under a centimetre over the tens of meters a UWB mesh spans.

use nalgebra::{Rotation2, Vector2};
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};
use thiserror::Error;

use crate::core::{GeoPoint, EARTH_RADIUS_M};
use crate::graph::DistanceGraphStore;
use crate::utils::config::GeoConfig;

/// Shortest physics distance that still yields a usable scale sample
const MIN_SAMPLE_UNITS: f64 = 1e-6;

/// Why no geographic coordinates were produced
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Error)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum UnavailableReason {
    #[error("Geo projection is disabled")]
    Disabled,
    #[error("No active entity has a GPS anchor")]
    NoGpsAnchor,
    #[error("Reference anchor '{id}' has not been placed by the solver yet")]
    ReferenceNotPositioned { id: String },
}

/// Whether a frame carries coordinates
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ProjectionStatus {
    Available {
        reference: String,
        /// Rotation applied to the layout before projection, radians
        rotation_rad: f64,
    },
    Unavailable(UnavailableReason),
}

impl ProjectionStatus {
    pub fn is_available(&self) -> bool {
        matches!(self, ProjectionStatus::Available { .. })
    }
}

/// Outcome of one scale re-estimation
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ScaleUpdate {
    pub previous: f64,
    /// Mean of this round's samples, if there were any
    pub candidate: Option<f64>,
    pub current: f64,
    pub samples: usize,
}

impl ScaleUpdate {
    pub fn changed(&self) -> bool {
        self.current != self.previous
    }
}

/// Result of one projection tick
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProjectionFrame {
    pub at_ms: u64,
    pub status: ProjectionStatus,
    /// Meters per physics unit after this tick
    pub scale: f64,
    pub scale_update: Option<ScaleUpdate>,
    /// Published coordinates per entity
    pub positions: BTreeMap<String, GeoPoint>,
    /// Entities whose published coordinates changed in this frame
    pub emitted: Vec<String>,
    /// Set when coalesced sub-threshold moves were flushed
    pub viewport_refresh: bool,
}

impl ProjectionFrame {
    fn unavailable(at_ms: u64, reason: UnavailableReason, scale: f64, scale_update: Option<ScaleUpdate>) -> Self {
        Self {
            at_ms,
            status: ProjectionStatus::Unavailable(reason),
            scale,
            scale_update,
            positions: BTreeMap::new(),
            emitted: Vec::new(),
            viewport_refresh: false,
        }
    }
}

/// Ratios `measured_m / rendered_units` over fresh edges with both endpoints placed
pub fn scale_samples(store: &DistanceGraphStore) -> Vec<f64> {
    store
        .fresh_edges()
        .filter_map(|edge| {
            let pa = store.entity(edge.key.first())?.active_position()?;
            let pb = store.entity(edge.key.second())?.active_position()?;
            let units = (pa - pb).norm();
            if units > MIN_SAMPLE_UNITS && edge.distance_m > 0.0 {
                Some(edge.distance_m / units)
            } else {
                None
            }
        })
        .filter(|ratio| ratio.is_finite())
        .collect()
}

/// Mean of the samples, `None` when there is nothing usable
pub fn candidate_scale(samples: &[f64]) -> Option<f64> {
    if samples.is_empty() {
        return None;
    }
    let mean = samples.iter().sum::<f64>() / samples.len() as f64;
    (mean.is_finite() && mean > 0.0).then_some(mean)
}

/// Exponential moving average; an unusable candidate keeps the previous scale
pub fn smooth_scale(previous: f64, candidate: f64, alpha: f64) -> f64 {
    if !(candidate.is_finite() && candidate > 0.0) {
        return previous;
    }
    let alpha = alpha.clamp(0.0, 1.0);
    previous * (1.0 - alpha) + candidate * alpha
}

/// Geographic point `east_m` / `north_m` away from `reference`
pub fn offset_to_geo(reference: GeoPoint, east_m: f64, north_m: f64) -> GeoPoint {
    let lat = reference.lat + (north_m / EARTH_RADIUS_M).to_degrees();
    let lng = reference.lng + (east_m / (EARTH_RADIUS_M * reference.lat.to_radians().cos())).to_degrees();
    GeoPoint::new(lat, lng)
}

/// Coalesces small coordinate changes
///
/// A move of more than `threshold_m` (or a first sighting) is published
/// immediately. An unchanged point is never published again. Smaller moves are held; once the oldest held move is
/// `window_ms` old, every held move is published together and the frame asks
/// for a viewport refresh.
#[derive(Debug, Clone)]
pub struct GeoDebouncer {
    threshold_m: f64,
    window_ms: u64,
    published: BTreeMap<String, GeoPoint>,
    pending: BTreeMap<String, GeoPoint>,
    pending_since_ms: Option<u64>,
}

impl GeoDebouncer {
    pub fn new(threshold_m: f64, window_ms: u64) -> Self {
        Self {
            threshold_m,
            window_ms,
            published: BTreeMap::new(),
            pending: BTreeMap::new(),
            pending_since_ms: None,
        }
    }

    pub fn set_limits(&mut self, threshold_m: f64, window_ms: u64) {
        self.threshold_m = threshold_m;
        self.window_ms = window_ms;
    }

    /// Offer a freshly computed point; returns true when it is published now
    pub fn offer(&mut self, id: &str, point: GeoPoint, now_ms: u64) -> bool {
        match self.published.get(id) {
            Some(last) if *last == point => {
                // Back where it was published; drop any held move
                self.pending.remove(id);
                if self.pending.is_empty() {
                    self.pending_since_ms = None;
                }
                false
            }
            Some(last) if last.distance_m(&point) <= self.threshold_m => {
                self.pending.insert(id.to_string(), point);
                self.pending_since_ms.get_or_insert(now_ms);
                false
            }
            _ => {
                self.published.insert(id.to_string(), point);
                self.pending.remove(id);
                if self.pending.is_empty() {
                    self.pending_since_ms = None;
                }
                true
            }
        }
    }

    /// Publish every held move once the window has elapsed
    pub fn flush_due(&mut self, now_ms: u64) -> Vec<String> {
        match self.pending_since_ms {
            Some(since) if now_ms.saturating_sub(since) >= self.window_ms => {
                self.pending_since_ms = None;
                let pending = std::mem::take(&mut self.pending);
                let ids = pending.keys().cloned().collect();
                self.published.extend(pending);
                ids
            }
            _ => Vec::new(),
        }
    }

    /// Forget entities that are no longer projected
    pub fn retain(&mut self, ids: &BTreeSet<String>) {
        self.published.retain(|id, _| ids.contains(id));
        self.pending.retain(|id, _| ids.contains(id));
        if self.pending.is_empty() {
            self.pending_since_ms = None;
        }
    }

    pub fn published(&self) -> &BTreeMap<String, GeoPoint> {
        &self.published
    }

    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    pub fn clear(&mut self) {
        self.published.clear();
        self.pending.clear();
        self.pending_since_ms = None;
    }
}

/// Turns the relative layout into geographic coordinates
#[derive(Debug, Clone)]
pub struct GeoCalibrationProjector {
    config: GeoConfig,
    scale: f64,
    initial_scale: f64,
    debouncer: GeoDebouncer,
    last_frame: Option<ProjectionFrame>,
}

impl GeoCalibrationProjector {
    /// Start from the configured conversion, one physics unit = `1 / display_scale` meters
    pub fn new(config: GeoConfig, display_scale: f64) -> Self {
        let initial = if display_scale.is_finite() && display_scale > 0.0 {
            1.0 / display_scale
        } else {
            1.0
        };
        Self::with_initial_scale(config, initial)
    }

    pub fn with_initial_scale(config: GeoConfig, scale: f64) -> Self {
        let debouncer = GeoDebouncer::new(config.movement_threshold_m, config.debounce_window_ms);
        Self {
            config,
            scale,
            initial_scale: scale,
            debouncer,
            last_frame: None,
        }
    }

    pub fn config(&self) -> &GeoConfig {
        &self.config
    }

    pub fn set_config(&mut self, config: GeoConfig) {
        self.debouncer
            .set_limits(config.movement_threshold_m, config.debounce_window_ms);
        if !config.enabled {
            self.debouncer.clear();
        }
        self.config = config;
    }

    pub fn set_enabled(&mut self, enabled: bool) -> bool {
        let previous = self.config.enabled;
        let mut config = self.config.clone();
        config.enabled = enabled;
        self.set_config(config);
        previous
    }

    pub fn scale(&self) -> f64 {
        self.scale
    }

    /// Return to the configured conversion
    pub fn reset_scale(&mut self) {
        self.scale = self.initial_scale;
    }

    /// Change the conversion used by `reset_scale`; the live scale is untouched
    pub fn set_initial_scale(&mut self, scale: f64) {
        if scale.is_finite() && scale > 0.0 {
            self.initial_scale = scale;
        }
    }

    /// Forget every published coordinate; the next frame republishes from scratch
    pub fn clear_published(&mut self) {
        self.debouncer.clear();
        self.last_frame = None;
    }

    pub fn last_frame(&self) -> Option<&ProjectionFrame> {
        self.last_frame.as_ref()
    }

    /// Re-estimate the scale from the current layout
    pub fn recalibrate(&mut self, store: &DistanceGraphStore) -> ScaleUpdate {
        let samples = scale_samples(store);
        let candidate = candidate_scale(&samples);
        let previous = self.scale;
        if let Some(candidate) = candidate {
            self.scale = smooth_scale(previous, candidate, self.config.smoothing_alpha);
        }
        if self.scale != previous {
            tracing::debug!(previous, current = self.scale, samples = samples.len(), "scale recalibrated");
        }
        ScaleUpdate {
            previous,
            candidate,
            current: self.scale,
            samples: samples.len(),
        }
    }

    /// Run one projection tick
    pub fn project(&mut self, store: &DistanceGraphStore, now_ms: u64) -> ProjectionFrame {
        let frame = self.build_frame(store, now_ms);
        self.last_frame = Some(frame.clone());
        frame
    }

    fn build_frame(&mut self, store: &DistanceGraphStore, now_ms: u64) -> ProjectionFrame {
        if !self.config.enabled {
            return ProjectionFrame::unavailable(now_ms, UnavailableReason::Disabled, self.scale, None);
        }
        let update = self.recalibrate(store);

        let anchors: Vec<(&str, GeoPoint, Option<Vector2<f64>>)> = store
            .gps_anchors()
            .map(|(entity, fix)| (entity.id.as_str(), fix, entity.active_position()))
            .collect();
        let Some(reference) = anchors
            .iter()
            .find(|(id, _, _)| *id == self.config.gateway_id)
            .or_else(|| anchors.first())
        else {
            return ProjectionFrame::unavailable(now_ms, UnavailableReason::NoGpsAnchor, self.scale, Some(update));
        };
        let (reference_id, reference_fix, reference_position) = *reference;
        let Some(origin) = reference_position else {
            let reason = UnavailableReason::ReferenceNotPositioned {
                id: reference_id.to_string(),
            };
            return ProjectionFrame::unavailable(now_ms, reason, self.scale, Some(update));
        };

        let rotation_rad = if self.config.heading_alignment {
            anchors
                .iter()
                .filter(|(id, _, _)| *id != reference_id)
                .find_map(|(_, fix, position)| {
                    let layout = self.to_local_m((*position)? - origin);
                    let (east, north) = reference_fix.offset_m_to(fix);
                    let geo = Vector2::new(east, north);
                    (layout.norm() > 0.0 && geo.norm() > 0.0)
                        .then(|| north.atan2(east) - layout.y.atan2(layout.x))
                })
                .unwrap_or(0.0)
        } else {
            0.0
        };
        let rotation = Rotation2::new(rotation_rad);

        let mut projected = BTreeSet::new();
        let mut emitted = Vec::new();
        for entity in store.entities() {
            let Some(position) = entity.active_position() else {
                continue;
            };
            let point = match entity.gps {
                Some(fix) => fix,
                None => {
                    let local = rotation * self.to_local_m(position - origin);
                    offset_to_geo(reference_fix, local.x, local.y)
                }
            };
            if !point.is_valid() {
                tracing::warn!(entity = %entity.id, lat = point.lat, lng = point.lng, "projected point out of range");
                continue;
            }
            if self.debouncer.offer(&entity.id, point, now_ms) {
                emitted.push(entity.id.clone());
            }
            projected.insert(entity.id.clone());
        }
        self.debouncer.retain(&projected);

        let flushed = self.debouncer.flush_due(now_ms);
        let viewport_refresh = !flushed.is_empty();
        emitted.extend(flushed);

        ProjectionFrame {
            at_ms: now_ms,
            status: ProjectionStatus::Available {
                reference: reference_id.to_string(),
                rotation_rad,
            },
            scale: self.scale,
            scale_update: Some(update),
            positions: self.debouncer.published().clone(),
            emitted,
            viewport_refresh,
        }
    }

    /// Physics-unit offset to an (east, north) offset in meters
    fn to_local_m(&self, offset: Vector2<f64>) -> Vector2<f64> {
        let meters = offset * (self.scale * self.config.unit_multiplier);
        if self.config.y_axis_down {
            Vector2::new(meters.x, -meters.y)
        } else {
            meters
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::RangeMeasurement;
    use crate::utils::config::{GpsAnchorConfig, MeasurementConfig};

    const LIVERPOOL: GeoPoint = GeoPoint {
        lat: 53.4084,
        lng: -2.9916,
    };

    fn geo_config() -> GeoConfig {
        GeoConfig {
            enabled: true,
            gateway_id: "GW".to_string(),
            anchors: vec![GpsAnchorConfig::new("GW", LIVERPOOL.lat, LIVERPOOL.lng)],
            ..GeoConfig::default()
        }
    }

    fn place(store: &mut DistanceGraphStore, id: &str, x: f64, y: f64) {
        store.entity_mut(id).unwrap().position = Some(Vector2::new(x, y));
    }

    fn gateway_store() -> DistanceGraphStore {
        let mut store = DistanceGraphStore::new(MeasurementConfig::default());
        store.apply_measurement(&RangeMeasurement::new("GW", "T1", 2.0), 0).unwrap();
        store.set_gps_anchor("GW", LIVERPOOL);
        place(&mut store, "GW", 100.0, 100.0);
        place(&mut store, "T1", 110.0, 100.0);
        store
    }

    #[test]
    fn test_tag_two_meters_east_of_gateway() {
        let store = gateway_store();
        let mut projector = GeoCalibrationProjector::with_initial_scale(geo_config(), 0.2);
        let frame = projector.project(&store, 0);

        assert!(frame.status.is_available());
        assert_eq!(frame.positions["GW"], LIVERPOOL);
        let t1 = frame.positions["T1"];
        let (east, north) = LIVERPOOL.offset_m_to(&t1);
        assert!((east - 2.0).abs() < 1e-6, "east offset {}", east);
        assert!(north.abs() < 1e-6);
        assert!((projector.scale() - 0.2).abs() < 1e-12);
    }

    #[test]
    fn test_screen_down_is_south() {
        let mut store = gateway_store();
        place(&mut store, "T1", 100.0, 110.0);
        let mut projector = GeoCalibrationProjector::with_initial_scale(geo_config(), 0.2);
        let frame = projector.project(&store, 0);

        let (east, north) = LIVERPOOL.offset_m_to(&frame.positions["T1"]);
        assert!(east.abs() < 1e-6);
        assert!((north + 2.0).abs() < 1e-6);
    }

    #[test]
    fn test_no_anchor_is_unavailable() {
        let mut store = gateway_store();
        store.clear_gps_anchor("GW");
        let mut projector = GeoCalibrationProjector::with_initial_scale(geo_config(), 0.2);
        let frame = projector.project(&store, 0);

        assert_eq!(
            frame.status,
            ProjectionStatus::Unavailable(UnavailableReason::NoGpsAnchor)
        );
        assert!(frame.positions.is_empty());
    }

    #[test]
    fn test_disabled_projection_keeps_scale() {
        let store = gateway_store();
        let mut config = geo_config();
        config.enabled = false;
        let mut projector = GeoCalibrationProjector::with_initial_scale(config, 0.5);
        let frame = projector.project(&store, 0);

        assert_eq!(frame.status, ProjectionStatus::Unavailable(UnavailableReason::Disabled));
        assert_eq!(projector.scale(), 0.5);
    }

    #[test]
    fn test_scale_is_smoothed_not_snapped() {
        let store = gateway_store();
        // Layout says 10 units for 2 m, so the candidate is 0.2
        let mut projector = GeoCalibrationProjector::with_initial_scale(geo_config(), 0.02);
        let update = projector.recalibrate(&store);

        assert_eq!(update.candidate, Some(0.2));
        assert!((update.current - (0.02 * 0.9 + 0.2 * 0.1)).abs() < 1e-12);
        for _ in 0..200 {
            projector.recalibrate(&store);
        }
        assert!((projector.scale() - 0.2).abs() < 1e-6);

        // Once converged, identical rounds barely move it
        let settled = projector.scale();
        for _ in 0..50 {
            let update = projector.recalibrate(&store);
            assert!((update.current - update.previous).abs() < 1e-7);
        }
        assert!((projector.scale() - settled).abs() < 1e-6);
    }

    #[test]
    fn test_scale_stable_when_layout_matches() {
        let store = gateway_store();
        let mut projector = GeoCalibrationProjector::with_initial_scale(geo_config(), 0.2);
        for _ in 0..100 {
            let update = projector.recalibrate(&store);
            assert_eq!(update.candidate, Some(0.2));
            assert!((update.current - 0.2).abs() < 1e-12);
        }
    }

    #[test]
    fn test_scale_held_without_samples() {
        let mut store = DistanceGraphStore::new(MeasurementConfig::default());
        store.apply_measurement(&RangeMeasurement::new("A", "B", 2.0), 0).unwrap();
        let mut projector = GeoCalibrationProjector::new(geo_config(), 50.0);
        let update = projector.recalibrate(&store);

        assert_eq!(update.samples, 0);
        assert_eq!(update.candidate, None);
        assert_eq!(projector.scale(), 0.02);
        assert!(!update.changed());
    }

    #[test]
    fn test_pure_calibration_helpers() {
        assert_eq!(candidate_scale(&[]), None);
        assert!((candidate_scale(&[0.1, 0.3]).unwrap() - 0.2).abs() < 1e-12);
        assert_eq!(smooth_scale(0.5, f64::NAN, 0.1), 0.5);
        assert_eq!(smooth_scale(0.5, 1.5, 1.0), 1.5);

        let north = offset_to_geo(LIVERPOOL, 0.0, 111.0);
        assert!((LIVERPOOL.distance_m(&north) - 111.0).abs() < 1e-6);
    }

    #[test]
    fn test_debouncer_coalesces_small_moves() {
        let mut debouncer = GeoDebouncer::new(1.0, 2_000);
        assert!(debouncer.offer("T1", LIVERPOOL, 0));

        let nudged = offset_to_geo(LIVERPOOL, 0.3, 0.0);
        assert!(!debouncer.offer("T1", nudged, 500));
        assert!(debouncer.flush_due(1_000).is_empty());
        assert_eq!(debouncer.published()["T1"], LIVERPOOL);

        assert_eq!(debouncer.flush_due(2_500), vec!["T1".to_string()]);
        assert_eq!(debouncer.published()["T1"], nudged);

        let jumped = offset_to_geo(LIVERPOOL, 5.0, 0.0);
        assert!(debouncer.offer("T1", jumped, 3_000));
        assert_eq!(debouncer.pending_count(), 0);
    }

    #[test]
    fn test_debouncer_never_republishes_unchanged_point() {
        let mut debouncer = GeoDebouncer::new(0.0, 2_000);
        assert!(debouncer.offer("T1", LIVERPOOL, 0));
        for step in 1..5 {
            assert!(!debouncer.offer("T1", LIVERPOOL, step * 500));
        }
        assert_eq!(debouncer.pending_count(), 0);
        assert!(debouncer.flush_due(10_000).is_empty());
    }

    #[test]
    fn test_debouncer_holds_move_equal_to_threshold() {
        let moved_to = offset_to_geo(LIVERPOOL, 0.0, 1.0);
        let mut debouncer = GeoDebouncer::new(LIVERPOOL.distance_m(&moved_to), 2_000);
        assert!(debouncer.offer("T1", LIVERPOOL, 0));
        assert!(!debouncer.offer("T1", moved_to, 500));
        assert_eq!(debouncer.pending_count(), 1);

        let further = offset_to_geo(LIVERPOOL, 0.0, 1.5);
        assert!(debouncer.offer("T1", further, 600));
        assert_eq!(debouncer.pending_count(), 0);
    }

    #[test]
    fn test_debouncer_drops_held_move_when_point_returns() {
        let mut debouncer = GeoDebouncer::new(1.0, 2_000);
        assert!(debouncer.offer("T1", LIVERPOOL, 0));
        assert!(!debouncer.offer("T1", offset_to_geo(LIVERPOOL, 0.3, 0.0), 500));
        assert_eq!(debouncer.pending_count(), 1);

        assert!(!debouncer.offer("T1", LIVERPOOL, 1_000));
        assert_eq!(debouncer.pending_count(), 0);
        assert!(debouncer.flush_due(3_000).is_empty());
        assert_eq!(debouncer.published()["T1"], LIVERPOOL);
    }

    #[test]
    fn test_heading_alignment_with_two_anchors() {
        let mut store = gateway_store();
        store.apply_measurement(&RangeMeasurement::new("GW", "A2", 2.0), 0).unwrap();
        // A2 is truly 2 m north of GW but the layout put it 10 units east
        let a2 = offset_to_geo(LIVERPOOL, 0.0, 2.0);
        store.set_gps_anchor("A2", a2);
        place(&mut store, "A2", 110.0, 100.0);
        place(&mut store, "T1", 110.0, 100.0);

        let mut config = geo_config();
        config.heading_alignment = true;
        let mut projector = GeoCalibrationProjector::with_initial_scale(config, 0.2);
        let frame = projector.project(&store, 0);

        match &frame.status {
            ProjectionStatus::Available { rotation_rad, .. } => {
                assert!((rotation_rad - std::f64::consts::FRAC_PI_2).abs() < 1e-6)
            }
            other => panic!("unexpected status {:?}", other),
        }
        let (east, north) = LIVERPOOL.offset_m_to(&frame.positions["T1"]);
        assert!(east.abs() < 1e-6);
        assert!((north - 2.0).abs() < 1e-6);
    }
}
