//! Snapshot and event types exposed to consumers

use serde::Serialize;
use std::collections::BTreeMap;

use crate::algorithms::{ProjectionFrame, ScaleUpdate, UnavailableReason};
use crate::core::{AccuracyClass, Freshness, GeoPoint};
use crate::graph::{Edge, EdgeKey, Entity, StateTransition};
use crate::validation::{MeasurementRejection, TriangleViolation};

/// Read-only view of one entity
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EntityView {
    pub id: String,
    /// Physics-unit position, absent until the solver seeds the entity
    pub position: Option<[f64; 2]>,
    pub velocity: [f64; 2],
    pub state: Freshness,
    pub gps: Option<GeoPoint>,
    pub last_update_ms: u64,
}

impl From<&Entity> for EntityView {
    fn from(entity: &Entity) -> Self {
        Self {
            id: entity.id.clone(),
            position: entity.position.map(|p| [p.x, p.y]),
            velocity: [entity.velocity.x, entity.velocity.y],
            state: entity.state,
            gps: entity.gps,
            last_update_ms: entity.last_update_ms,
        }
    }
}

/// Read-only view of one edge
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EdgeView {
    pub key: EdgeKey,
    pub distance_m: f64,
    pub state: Freshness,
    pub accuracy: AccuracyClass,
    pub last_update_ms: u64,
    pub measurement_count: u64,
}

impl From<&Edge> for EdgeView {
    fn from(edge: &Edge) -> Self {
        Self {
            key: edge.key.clone(),
            distance_m: edge.distance_m,
            state: edge.state,
            accuracy: edge.accuracy,
            last_update_ms: edge.last_update_ms,
            measurement_count: edge.measurement_count,
        }
    }
}

/// Consistent picture of the layout between two ticks
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LayoutSnapshot {
    pub solver_ticks: u64,
    /// Current meters per physics unit
    pub scale: f64,
    pub entities: BTreeMap<String, EntityView>,
    /// Keyed by `"A-B"`
    pub edges: BTreeMap<String, EdgeView>,
    pub projection: Option<ProjectionFrame>,
}

impl LayoutSnapshot {
    pub fn position_of(&self, id: &str) -> Option<[f64; 2]> {
        self.entities.get(id).and_then(|e| e.position)
    }
}

/// Notifications delivered to subscribers
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum EngineEvent {
    EntityCreated {
        id: String,
        at_ms: u64,
    },
    EdgeCreated {
        key: EdgeKey,
        distance_m: f64,
        accuracy: AccuracyClass,
    },
    StateChanged {
        transition: StateTransition,
    },
    MeasurementRejected {
        index: usize,
        raw: String,
        reason: MeasurementRejection,
    },
    PayloadRejected {
        error: String,
    },
    RecordsPurged {
        entities: Vec<String>,
        edges: Vec<EdgeKey>,
    },
    ScaleRecalibrated {
        update: ScaleUpdate,
    },
    NumericalInstability {
        entities: Vec<String>,
    },
    TriangleViolations {
        violations: Vec<TriangleViolation>,
    },
    GeoPositions {
        positions: BTreeMap<String, GeoPoint>,
        emitted: Vec<String>,
        viewport_refresh: bool,
    },
    GeoUnavailable {
        reason: UnavailableReason,
    },
}

impl EngineEvent {
    /// Short name used in logs
    pub fn kind(&self) -> &'static str {
        match self {
            EngineEvent::EntityCreated { .. } => "entity_created",
            EngineEvent::EdgeCreated { .. } => "edge_created",
            EngineEvent::StateChanged { .. } => "state_changed",
            EngineEvent::MeasurementRejected { .. } => "measurement_rejected",
            EngineEvent::PayloadRejected { .. } => "payload_rejected",
            EngineEvent::RecordsPurged { .. } => "records_purged",
            EngineEvent::ScaleRecalibrated { .. } => "scale_recalibrated",
            EngineEvent::NumericalInstability { .. } => "numerical_instability",
            EngineEvent::TriangleViolations { .. } => "triangle_violations",
            EngineEvent::GeoPositions { .. } => "geo_positions",
            EngineEvent::GeoUnavailable { .. } => "geo_unavailable",
        }
    }
}
