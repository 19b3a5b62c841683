//! Positioning engine
//!
//! Owns the store and the three algorithms and is the only writer to any of
//! them. Producers hand measurements over through an [`IngestHandle`], which
//! never waits on the engine; the batches are applied at the start of the
//! next tick.

use crossbeam::channel::{self, Receiver, Sender};
use std::collections::BTreeSet;

use super::callback::{CallbackHandle, EventBus, EventCallback};
use super::types::{EdgeView, EngineEvent, EntityView, LayoutSnapshot};
use crate::algorithms::{GeoCalibrationProjector, ProjectionFrame, ProjectionStatus, RelativeLayoutSolver, TickReport};
use crate::core::{MeasurementBatch, RangeMeasurement};
use crate::graph::{BatchOutcome, DistanceGraphStore};
use crate::processing::{LifecycleManager, LifecycleReport, ParseError, PayloadParser};
use crate::utils::config::{
    ConfigError, ConfigurationManager, EngineConfig, GpsAnchorConfig, ParameterUpdateResult, ParameterUpdates,
};
use crate::validation::{edge_residuals, find_triangle_violations, EdgeResidual, TriangleViolation};

/// Work queued by producers
#[derive(Debug, Clone)]
pub enum IngestItem {
    Batch(MeasurementBatch),
    /// Raw transport payload, decoded on the engine side
    Payload(String),
}

/// Cloneable, non-blocking producer side of the ingest queue
#[derive(Debug, Clone)]
pub struct IngestHandle {
    sender: Sender<IngestItem>,
}

impl IngestHandle {
    /// Queue a decoded batch; false once the engine is gone
    pub fn submit(&self, batch: MeasurementBatch) -> bool {
        self.sender.send(IngestItem::Batch(batch)).is_ok()
    }

    /// Queue a raw payload; false once the engine is gone
    pub fn submit_payload(&self, payload: impl Into<String>) -> bool {
        self.sender.send(IngestItem::Payload(payload.into())).is_ok()
    }
}

/// What one call to [`PositioningEngine::tick`] did
#[derive(Debug, Clone, Default)]
pub struct TickSummary {
    /// Queue items drained
    pub ingested: usize,
    pub solver: Option<TickReport>,
    pub lifecycle: Option<LifecycleReport>,
    pub projection: Option<ProjectionFrame>,
}

/// Time of the last run of each periodic task
#[derive(Debug, Clone, Copy, Default)]
struct Cadence {
    solver_ms: Option<u64>,
    lifecycle_ms: Option<u64>,
    projection_ms: Option<u64>,
}

fn is_due(last_ms: Option<u64>, interval_ms: u64, now_ms: u64) -> bool {
    last_ms.map_or(true, |last| now_ms.saturating_sub(last) >= interval_ms)
}

/// Single owner of the positioning state
#[derive(Debug)]
pub struct PositioningEngine {
    config: ConfigurationManager,
    store: DistanceGraphStore,
    solver: RelativeLayoutSolver,
    lifecycle: LifecycleManager,
    projector: GeoCalibrationProjector,
    parser: PayloadParser,
    events: EventBus,
    ingest_tx: Sender<IngestItem>,
    ingest_rx: Receiver<IngestItem>,
    cadence: Cadence,
    last_solver_report: Option<TickReport>,
    known_violations: BTreeSet<[String; 3]>,
}

impl PositioningEngine {
    /// Build an engine from a configuration, rejecting invalid parameters
    pub fn new(config: EngineConfig) -> Result<Self, ConfigError> {
        Ok(Self::with_manager(ConfigurationManager::with_config(config)?))
    }

    pub fn with_manager(manager: ConfigurationManager) -> Self {
        let config = manager.config().clone();
        let (ingest_tx, ingest_rx) = channel::unbounded();
        let mut store = DistanceGraphStore::new(config.measurement.clone());
        store.sync_gps_anchors(config.geo.anchors.iter().map(|a| (a.id.as_str(), a.point())));

        tracing::info!(
            anchors = config.geo.anchors.len(),
            geo_enabled = config.geo.enabled,
            display_scale = config.solver.display_scale,
            "positioning engine created"
        );

        Self {
            solver: RelativeLayoutSolver::new(config.solver.clone()),
            lifecycle: LifecycleManager::new(&config.lifecycle),
            projector: GeoCalibrationProjector::new(config.geo.clone(), config.solver.display_scale),
            parser: PayloadParser::new(),
            events: EventBus::new(),
            store,
            config: manager,
            ingest_tx,
            ingest_rx,
            cadence: Cadence::default(),
            last_solver_report: None,
            known_violations: BTreeSet::new(),
        }
    }

    pub fn config(&self) -> &EngineConfig {
        self.config.config()
    }

    pub fn store(&self) -> &DistanceGraphStore {
        &self.store
    }

    pub fn scale(&self) -> f64 {
        self.projector.scale()
    }

    pub fn ingest_handle(&self) -> IngestHandle {
        IngestHandle {
            sender: self.ingest_tx.clone(),
        }
    }

    pub fn pending_ingest(&self) -> usize {
        self.ingest_rx.len()
    }

    pub fn subscribe(&mut self, callback: EventCallback) -> CallbackHandle {
        self.events.subscribe(callback)
    }

    pub fn unsubscribe(&mut self, handle: CallbackHandle) -> bool {
        self.events.unsubscribe(handle)
    }

    pub fn set_allow_numeric_ids(&mut self, allow: bool) {
        self.parser.set_allow_numeric_ids(allow);
    }

    /// Apply a batch immediately
    pub fn apply_batch(&mut self, batch: &[RangeMeasurement], now_ms: u64) -> BatchOutcome {
        let outcome = self.store.apply_batch(batch, now_ms);
        self.publish_outcome(&outcome, now_ms);
        outcome
    }

    fn publish_outcome(&self, outcome: &BatchOutcome, now_ms: u64) {
        for applied in &outcome.applied {
            for id in &applied.created_entities {
                tracing::debug!(entity = %id, "entity created");
                self.events.publish(&EngineEvent::EntityCreated {
                    id: id.clone(),
                    at_ms: now_ms,
                });
            }
            if let Some(key) = &applied.created_edge {
                if let Some(edge) = self.store.edge(key) {
                    self.events.publish(&EngineEvent::EdgeCreated {
                        key: key.clone(),
                        distance_m: edge.distance_m,
                        accuracy: edge.accuracy,
                    });
                }
            }
            for transition in &applied.transitions {
                tracing::debug!(record = %transition.record, from = %transition.from, "revived by measurement");
                self.events.publish(&EngineEvent::StateChanged {
                    transition: transition.clone(),
                });
            }
        }
        for rejected in &outcome.rejected {
            self.events.publish(&EngineEvent::MeasurementRejected {
                index: rejected.index,
                raw: format!(
                    "[{:?},{:?},{}]",
                    rejected.measurement.id_a, rejected.measurement.id_b, rejected.measurement.distance_m
                ),
                reason: rejected.reason.clone(),
            });
        }
    }

    /// Decode and apply a raw payload immediately. Rejection indices refer to
    /// positions in the payload.
    pub fn apply_payload(&mut self, payload: &str, now_ms: u64) -> Result<BatchOutcome, ParseError> {
        let parsed = match self.parser.parse_str(payload) {
            Ok(parsed) => parsed,
            Err(e) => {
                tracing::warn!(error = %e, "dropping payload");
                self.events.publish(&EngineEvent::PayloadRejected { error: e.to_string() });
                return Err(e);
            }
        };
        for rejected in &parsed.rejected {
            tracing::warn!(index = rejected.index, raw = %rejected.raw, "rejected element: {}", rejected.reason);
            self.events.publish(&EngineEvent::MeasurementRejected {
                index: rejected.index,
                raw: rejected.raw.clone(),
                reason: rejected.reason.clone(),
            });
        }
        let mut outcome = self.store.apply_batch(&parsed.measurements, now_ms);
        for rejected in &mut outcome.rejected {
            if let Some(index) = parsed.source_index(rejected.index) {
                rejected.index = index;
            }
        }
        self.publish_outcome(&outcome, now_ms);
        Ok(outcome)
    }

    /// Drain the ingest queue into the store; returns the number of items drained
    pub fn apply_pending(&mut self, now_ms: u64) -> usize {
        let items: Vec<IngestItem> = self.ingest_rx.try_iter().collect();
        for item in &items {
            match item {
                IngestItem::Batch(batch) => {
                    self.apply_batch(batch, now_ms);
                }
                IngestItem::Payload(payload) => {
                    // Failure already reported as an event
                    let _ = self.apply_payload(payload, now_ms);
                }
            }
        }
        items.len()
    }

    /// One relaxation step
    pub fn solver_tick(&mut self) -> TickReport {
        let report = self.solver.tick(&mut self.store);
        if !report.unstable.is_empty() {
            self.events.publish(&EngineEvent::NumericalInstability {
                entities: report.unstable.clone(),
            });
        }
        self.last_solver_report = Some(report.clone());
        report
    }

    /// Age records and report newly appearing triangle violations
    pub fn lifecycle_tick(&mut self, now_ms: u64) -> LifecycleReport {
        let report = self.lifecycle.tick(&mut self.store, now_ms);
        for transition in &report.transitions {
            self.events.publish(&EngineEvent::StateChanged {
                transition: transition.clone(),
            });
        }
        if !report.purged_entities.is_empty() || !report.purged_edges.is_empty() {
            self.events.publish(&EngineEvent::RecordsPurged {
                entities: report.purged_entities.clone(),
                edges: report.purged_edges.clone(),
            });
        }

        let violations = self.triangle_violations();
        let current: BTreeSet<[String; 3]> = violations.iter().map(|v| v.ids.clone()).collect();
        let new: Vec<TriangleViolation> = violations
            .into_iter()
            .filter(|v| !self.known_violations.contains(&v.ids))
            .collect();
        if !new.is_empty() {
            for v in &new {
                tracing::warn!(
                    triangle = ?v.ids,
                    sides_m = ?v.sides_m,
                    excess_m = v.excess_m,
                    "distances violate the triangle inequality"
                );
            }
            self.events.publish(&EngineEvent::TriangleViolations { violations: new });
        }
        self.known_violations = current;

        debug_assert!(crate::processing::check_invariants(&self.store).is_empty());
        report
    }

    /// Recalibrate the scale and publish geographic coordinates
    pub fn projection_tick(&mut self, now_ms: u64) -> ProjectionFrame {
        let previous_status = self.projector.last_frame().map(|f| f.status.clone());
        let frame = self.projector.project(&self.store, now_ms);

        if let Some(update) = frame.scale_update.filter(|u| u.changed()) {
            self.events.publish(&EngineEvent::ScaleRecalibrated { update });
        }
        match &frame.status {
            ProjectionStatus::Available { .. } => {
                if !frame.emitted.is_empty() || frame.viewport_refresh {
                    self.events.publish(&EngineEvent::GeoPositions {
                        positions: frame.positions.clone(),
                        emitted: frame.emitted.clone(),
                        viewport_refresh: frame.viewport_refresh,
                    });
                }
            }
            ProjectionStatus::Unavailable(reason) => {
                if previous_status.as_ref() != Some(&frame.status) {
                    tracing::info!(reason = %reason, "geo projection unavailable");
                    self.events.publish(&EngineEvent::GeoUnavailable { reason: reason.clone() });
                }
            }
        }
        frame
    }

    /// Drain the queue, then run whichever periodic tasks are due
    pub fn tick(&mut self, now_ms: u64) -> TickSummary {
        let runtime = self.config().runtime.clone();
        let mut summary = TickSummary {
            ingested: self.apply_pending(now_ms),
            ..Default::default()
        };

        if is_due(self.cadence.solver_ms, runtime.solver_interval_ms, now_ms) {
            self.cadence.solver_ms = Some(now_ms);
            summary.solver = Some(self.solver_tick());
        }
        if is_due(self.cadence.lifecycle_ms, runtime.lifecycle_interval_ms, now_ms) {
            self.cadence.lifecycle_ms = Some(now_ms);
            summary.lifecycle = Some(self.lifecycle_tick(now_ms));
        }
        if is_due(self.cadence.projection_ms, runtime.projection_interval_ms, now_ms) {
            self.cadence.projection_ms = Some(now_ms);
            summary.projection = Some(self.projection_tick(now_ms));
        }
        summary
    }

    /// Zero all velocities; positions stay where they are
    pub fn reset_velocities(&mut self) {
        self.solver.reset_velocities(&mut self.store);
    }

    /// Forget every entity and edge. GPS anchors and the scale are kept.
    pub fn clear(&mut self) {
        self.store.clear();
        self.projector.clear_published();
        self.known_violations.clear();
        self.last_solver_report = None;
        tracing::info!("positioning state cleared");
    }

    pub fn reset_scale(&mut self) {
        self.projector.reset_scale();
    }

    /// Returns the previous setting
    pub fn set_geo_enabled(&mut self, enabled: bool) -> bool {
        let previous = self.config.set_geo_enabled(enabled);
        self.apply_config();
        previous
    }

    pub fn set_gps_anchor(&mut self, anchor: GpsAnchorConfig) -> Result<Option<GpsAnchorConfig>, ConfigError> {
        let previous = self.config.set_gps_anchor(anchor)?;
        self.apply_config();
        Ok(previous)
    }

    pub fn remove_gps_anchor(&mut self, id: &str) -> Option<GpsAnchorConfig> {
        let removed = self.config.remove_gps_anchor(id);
        self.apply_config();
        removed
    }

    pub fn update_parameters(&mut self, updates: ParameterUpdates) -> Result<ParameterUpdateResult, ConfigError> {
        let result = self.config.update_parameters(updates);
        self.apply_config();
        result
    }

    /// Change configuration through the manager's setters; components pick up
    /// the new values before this returns
    pub fn configure<T>(
        &mut self,
        change: impl FnOnce(&mut ConfigurationManager) -> Result<T, ConfigError>,
    ) -> Result<T, ConfigError> {
        let result = change(&mut self.config);
        self.apply_config();
        result
    }

    fn apply_config(&mut self) {
        let config = self.config.config().clone();
        self.solver.set_config(config.solver.clone());
        self.lifecycle.set_config(&config.lifecycle);
        self.projector.set_initial_scale(1.0 / config.solver.display_scale);
        self.projector.set_config(config.geo.clone());
        if *self.store.measurement_config() != config.measurement {
            self.store.set_measurement_config(config.measurement.clone());
        }
        self.store
            .sync_gps_anchors(config.geo.anchors.iter().map(|a| (a.id.as_str(), a.point())));
    }

    pub fn last_solver_report(&self) -> Option<&TickReport> {
        self.last_solver_report.as_ref()
    }

    pub fn last_projection(&self) -> Option<&ProjectionFrame> {
        self.projector.last_frame()
    }

    pub fn triangle_violations(&self) -> Vec<TriangleViolation> {
        find_triangle_violations(&self.store, self.config().measurement.triangle_tolerance)
    }

    pub fn residuals(&self) -> Vec<EdgeResidual> {
        edge_residuals(&self.store, self.config().solver.display_scale)
    }

    pub fn snapshot(&self) -> LayoutSnapshot {
        LayoutSnapshot {
            solver_ticks: self.solver.tick_count(),
            scale: self.projector.scale(),
            entities: self
                .store
                .entities()
                .map(|e| (e.id.clone(), EntityView::from(e)))
                .collect(),
            edges: self
                .store
                .edges()
                .map(|e| (e.key.to_string(), EdgeView::from(e)))
                .collect(),
            projection: self.projector.last_frame().cloned(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::Freshness;
    use parking_lot::Mutex;
    use std::sync::Arc;

    fn engine() -> PositioningEngine {
        PositioningEngine::new(EngineConfig::default()).unwrap()
    }

    fn recorder(engine: &mut PositioningEngine) -> Arc<Mutex<Vec<EngineEvent>>> {
        let events = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&events);
        engine.subscribe(Box::new(move |event| sink.lock().push(event.clone())));
        events
    }

    #[test]
    fn test_ingest_handle_is_drained_on_tick() {
        let mut engine = engine();
        let events = recorder(&mut engine);
        let handle = engine.ingest_handle();

        assert!(handle.submit(vec![RangeMeasurement::new("B5A4", "Room1", 2.0)]));
        assert!(handle.submit_payload(r#"[["B5A4","Room2",3.0],["Room1","Room1",1.0]]"#));
        assert_eq!(engine.pending_ingest(), 2);

        let summary = engine.tick(0);
        assert_eq!(summary.ingested, 2);
        assert_eq!(engine.store().entity_count(), 3);
        assert!(summary.solver.is_some());

        let events = events.lock();
        assert_eq!(
            events.iter().filter(|e| matches!(e, EngineEvent::EntityCreated { .. })).count(),
            3
        );
        assert!(events.iter().any(|e| matches!(e, EngineEvent::MeasurementRejected { index: 1, .. })));
    }

    #[test]
    fn test_payload_rejections_point_at_payload_positions() {
        let mut engine = engine();
        let events = recorder(&mut engine);
        let outcome = engine.apply_payload(r#"[["A",7,1.0],["B","B",1.0],["A","C",2.0]]"#, 0).unwrap();

        assert_eq!(outcome.rejected.len(), 1);
        assert_eq!(outcome.rejected[0].index, 1);
        let indices: Vec<usize> = events
            .lock()
            .iter()
            .filter_map(|e| match e {
                EngineEvent::MeasurementRejected { index, .. } => Some(*index),
                _ => None,
            })
            .collect();
        assert_eq!(indices, vec![0, 1]);
    }

    #[test]
    fn test_bad_payload_is_reported() {
        let mut engine = engine();
        let events = recorder(&mut engine);
        assert!(engine.apply_payload("{nope", 0).is_err());
        assert!(matches!(events.lock()[0], EngineEvent::PayloadRejected { .. }));
    }

    #[test]
    fn test_cadences_are_respected() {
        let mut engine = engine();
        let first = engine.tick(0);
        assert!(first.solver.is_some() && first.lifecycle.is_some() && first.projection.is_some());

        let second = engine.tick(10);
        assert!(second.solver.is_none() && second.lifecycle.is_none() && second.projection.is_none());

        let third = engine.tick(600);
        assert!(third.solver.is_some() && third.lifecycle.is_none() && third.projection.is_some());
    }

    #[test]
    fn test_lifecycle_events_and_revival() {
        let mut engine = engine();
        let events = recorder(&mut engine);
        engine.apply_batch(&[RangeMeasurement::new("A", "B", 3.0)], 0);

        engine.lifecycle_tick(6_000);
        assert_eq!(engine.store().entity("A").unwrap().state, Freshness::Stale);

        engine.apply_batch(&[RangeMeasurement::new("A", "B", 3.0)], 7_000);
        assert_eq!(engine.store().entity("A").unwrap().state, Freshness::Fresh);

        let changes = events
            .lock()
            .iter()
            .filter(|e| matches!(e, EngineEvent::StateChanged { .. }))
            .count();
        // A, B and A-B go stale, then all three come back
        assert_eq!(changes, 6);
    }

    #[test]
    fn test_triangle_violation_reported_once() {
        let mut engine = engine();
        let events = recorder(&mut engine);
        engine.apply_batch(
            &[
                RangeMeasurement::new("A", "B", 1.0),
                RangeMeasurement::new("B", "C", 1.0),
                RangeMeasurement::new("A", "C", 10.0),
            ],
            0,
        );
        engine.lifecycle_tick(100);
        engine.lifecycle_tick(200);

        let reported = events
            .lock()
            .iter()
            .filter(|e| matches!(e, EngineEvent::TriangleViolations { .. }))
            .count();
        assert_eq!(reported, 1);
    }

    #[test]
    fn test_live_config_reaches_components() {
        let mut engine = engine();
        let old = engine.configure(|c| c.set_spring_constant(0.2)).unwrap();
        assert_eq!(old, 0.1);
        assert_eq!(engine.solver.config().spring_constant, 0.2);

        assert!(engine.configure(|c| c.set_damping(1.5)).is_err());
        assert_eq!(engine.solver.config().damping, 0.85);

        assert!(!engine.set_geo_enabled(true));
        assert!(engine.projector.config().enabled);
    }

    #[test]
    fn test_gps_anchor_control() {
        let mut engine = engine();
        engine.apply_batch(&[RangeMeasurement::new("B5A4", "T1", 2.0)], 0);
        engine
            .set_gps_anchor(GpsAnchorConfig::new("B5A4", 53.4084, -2.9916))
            .unwrap();
        assert!(engine.store().entity("B5A4").unwrap().is_gps_anchor());

        assert!(engine.remove_gps_anchor("B5A4").is_some());
        assert!(!engine.store().entity("B5A4").unwrap().is_gps_anchor());
    }

    #[test]
    fn test_clear_keeps_anchors_and_scale() {
        let mut config = EngineConfig::default();
        config.geo.anchors.push(GpsAnchorConfig::new("B5A4", 53.4084, -2.9916));
        let mut engine = PositioningEngine::new(config).unwrap();
        engine.apply_batch(&[RangeMeasurement::new("B5A4", "T1", 2.0)], 0);
        let scale = engine.scale();

        engine.clear();
        assert_eq!(engine.store().entity_count(), 0);
        assert_eq!(engine.scale(), scale);

        engine.apply_batch(&[RangeMeasurement::new("B5A4", "T1", 2.0)], 10);
        assert!(engine.store().entity("B5A4").unwrap().is_gps_anchor());
    }

    #[test]
    fn test_snapshot_reflects_store() {
        let mut engine = engine();
        engine.apply_batch(&[RangeMeasurement::new("B5A4", "Room1", 2.0)], 0);
        engine.solver_tick();

        let snapshot = engine.snapshot();
        assert_eq!(snapshot.entities.len(), 2);
        assert!(snapshot.position_of("Room1").is_some());
        assert_eq!(snapshot.edges["B5A4-Room1"].distance_m, 2.0);
        assert_eq!(snapshot.solver_ticks, 1);
    }
}
