//! Entity and edge records

use nalgebra::Vector2;
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::core::{AccuracyClass, Freshness, GeoPoint};

/// Unordered pair of entity identifiers, stored in lexicographic order
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct EdgeKey {
    a: String,
    b: String,
}

impl EdgeKey {
    pub fn new(x: impl Into<String>, y: impl Into<String>) -> Self {
        let (x, y) = (x.into(), y.into());
        if x <= y {
            Self { a: x, b: y }
        } else {
            Self { a: y, b: x }
        }
    }

    pub fn first(&self) -> &str {
        &self.a
    }

    pub fn second(&self) -> &str {
        &self.b
    }

    pub fn contains(&self, id: &str) -> bool {
        self.a == id || self.b == id
    }

    /// The endpoint opposite `id`, if `id` is an endpoint
    pub fn other(&self, id: &str) -> Option<&str> {
        if self.a == id {
            Some(&self.b)
        } else if self.b == id {
            Some(&self.a)
        } else {
            None
        }
    }
}

impl fmt::Display for EdgeKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.a, self.b)
    }
}

/// A tracked identifier: anchor, gateway or mobile tag
#[derive(Debug, Clone, PartialEq)]
pub struct Entity {
    pub id: String,
    /// Solver position in physics units; `None` until the solver seeds it
    pub position: Option<Vector2<f64>>,
    /// Solver velocity in physics units per tick
    pub velocity: Vector2<f64>,
    /// Externally supplied GPS fix
    pub gps: Option<GeoPoint>,
    pub state: Freshness,
    pub last_update_ms: u64,
    pub created_ms: u64,
    /// When `state` last changed
    pub state_changed_ms: u64,
}

impl Entity {
    pub fn new(id: impl Into<String>, now_ms: u64) -> Self {
        Self {
            id: id.into(),
            position: None,
            velocity: Vector2::zeros(),
            gps: None,
            state: Freshness::Fresh,
            last_update_ms: now_ms,
            created_ms: now_ms,
            state_changed_ms: now_ms,
        }
    }

    pub fn is_gps_anchor(&self) -> bool {
        self.gps.is_some()
    }

    /// Position of an entity that still takes part in the layout
    pub fn active_position(&self) -> Option<Vector2<f64>> {
        if self.state.is_active() {
            self.position
        } else {
            None
        }
    }
}

/// A distance constraint between two entities
#[derive(Debug, Clone, PartialEq)]
pub struct Edge {
    pub key: EdgeKey,
    /// Last measured distance (meters, last writer wins)
    pub distance_m: f64,
    pub accuracy: AccuracyClass,
    pub last_update_ms: u64,
    /// Staleness from this edge's own timestamp only
    pub own_state: Freshness,
    /// Effective state: worst of `own_state` and both endpoint states
    pub state: Freshness,
    pub state_changed_ms: u64,
    pub measurement_count: u64,
}

impl Edge {
    pub fn new(key: EdgeKey, distance_m: f64, accuracy: AccuracyClass, now_ms: u64) -> Self {
        Self {
            key,
            distance_m,
            accuracy,
            last_update_ms: now_ms,
            own_state: Freshness::Fresh,
            state: Freshness::Fresh,
            state_changed_ms: now_ms,
            measurement_count: 1,
        }
    }
}

/// Identifies the record a state transition applies to
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "id", rename_all = "lowercase")]
pub enum RecordId {
    Entity(String),
    Edge(EdgeKey),
}

impl fmt::Display for RecordId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RecordId::Entity(id) => write!(f, "entity {}", id),
            RecordId::Edge(key) => write!(f, "edge {}", key),
        }
    }
}

/// Freshness change of one entity or edge
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StateTransition {
    pub record: RecordId,
    pub from: Freshness,
    pub to: Freshness,
    pub at_ms: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_edge_key_is_canonical() {
        let k1 = EdgeKey::new("B", "A");
        let k2 = EdgeKey::new("A", "B");
        assert_eq!(k1, k2);
        assert_eq!(k1.first(), "A");
        assert_eq!(k1.to_string(), "A-B");
        assert_eq!(k1.other("A"), Some("B"));
        assert_eq!(k1.other("C"), None);
        assert!(k1.contains("B"));
    }

    #[test]
    fn test_removed_entity_has_no_active_position() {
        let mut entity = Entity::new("T1", 0);
        entity.position = Some(Vector2::new(1.0, 2.0));
        assert!(entity.active_position().is_some());
        entity.state = Freshness::Removed;
        assert!(entity.active_position().is_none());
    }
}
