//! Keyed store of entities and edges
//!
//! Holds the last measured distance per pair and the freshness bookkeeping.
//! It runs no algorithms; the solver, lifecycle manager and projector read
//! and update records through the accessors below.

use nalgebra::Vector2;
use std::collections::{BTreeMap, BTreeSet};

use super::model::{Edge, EdgeKey, Entity, RecordId, StateTransition};
use crate::core::{AccuracyClass, Freshness, GeoPoint, RangeMeasurement};
use crate::utils::config::MeasurementConfig;
use crate::validation::measurement::{classify_accuracy, validate_measurement, MeasurementRejection};

/// What applying one accepted measurement changed
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MeasurementOutcome {
    pub created_entities: Vec<String>,
    pub created_edge: Option<EdgeKey>,
    /// Records brought back to `Fresh` by this measurement
    pub transitions: Vec<StateTransition>,
    pub accuracy: Option<AccuracyClass>,
}

/// One tuple that did not make it into the store
#[derive(Debug, Clone, PartialEq)]
pub struct RejectedMeasurement {
    /// Position inside the batch
    pub index: usize,
    pub measurement: RangeMeasurement,
    pub reason: MeasurementRejection,
}

/// Result of applying a whole batch
#[derive(Debug, Clone, Default)]
pub struct BatchOutcome {
    pub applied: Vec<MeasurementOutcome>,
    pub rejected: Vec<RejectedMeasurement>,
}

impl BatchOutcome {
    pub fn applied_count(&self) -> usize {
        self.applied.len()
    }
}

/// Owner of all entity and edge records
#[derive(Debug, Clone, Default)]
pub struct DistanceGraphStore {
    entities: BTreeMap<String, Entity>,
    edges: BTreeMap<EdgeKey, Edge>,
    adjacency: BTreeMap<String, BTreeSet<String>>,
    gps_fixes: BTreeMap<String, GeoPoint>,
    measurement_config: MeasurementConfig,
}

impl DistanceGraphStore {
    pub fn new(measurement_config: MeasurementConfig) -> Self {
        Self {
            measurement_config,
            ..Default::default()
        }
    }

    pub fn measurement_config(&self) -> &MeasurementConfig {
        &self.measurement_config
    }

    /// Replace the plausibility bands; existing edges are reclassified
    pub fn set_measurement_config(&mut self, config: MeasurementConfig) {
        self.measurement_config = config;
        for edge in self.edges.values_mut() {
            edge.accuracy = classify_accuracy(edge.distance_m, &self.measurement_config);
        }
    }

    /// Apply one measurement: create or refresh both entities and their edge.
    /// Last writer wins; nothing is averaged.
    pub fn apply_measurement(
        &mut self,
        measurement: &RangeMeasurement,
        now_ms: u64,
    ) -> Result<MeasurementOutcome, MeasurementRejection> {
        let accuracy = validate_measurement(
            &measurement.id_a,
            &measurement.id_b,
            measurement.distance_m,
            &self.measurement_config,
        )?;

        let mut outcome = MeasurementOutcome {
            accuracy: Some(accuracy),
            ..Default::default()
        };

        for id in [&measurement.id_a, &measurement.id_b] {
            self.touch_entity(id, now_ms, &mut outcome);
        }

        let key = EdgeKey::new(measurement.id_a.as_str(), measurement.id_b.as_str());
        match self.edges.get_mut(&key) {
            Some(edge) => {
                edge.distance_m = measurement.distance_m;
                edge.accuracy = accuracy;
                edge.last_update_ms = edge.last_update_ms.max(now_ms);
                edge.measurement_count += 1;
                edge.own_state = Freshness::Fresh;
                if edge.state != Freshness::Fresh {
                    outcome.transitions.push(StateTransition {
                        record: RecordId::Edge(key.clone()),
                        from: edge.state,
                        to: Freshness::Fresh,
                        at_ms: now_ms,
                    });
                    edge.state = Freshness::Fresh;
                    edge.state_changed_ms = now_ms;
                }
            }
            None => {
                self.adjacency
                    .entry(key.first().to_string())
                    .or_default()
                    .insert(key.second().to_string());
                self.adjacency
                    .entry(key.second().to_string())
                    .or_default()
                    .insert(key.first().to_string());
                self.edges.insert(
                    key.clone(),
                    Edge::new(key.clone(), measurement.distance_m, accuracy, now_ms),
                );
                outcome.created_edge = Some(key);
            }
        }

        Ok(outcome)
    }

    fn touch_entity(&mut self, id: &str, now_ms: u64, outcome: &mut MeasurementOutcome) {
        match self.entities.get_mut(id) {
            Some(entity) => {
                entity.last_update_ms = entity.last_update_ms.max(now_ms);
                if entity.state != Freshness::Fresh {
                    if entity.state == Freshness::Removed {
                        // Stale coordinates; let the solver seed it again
                        entity.position = None;
                        entity.velocity = Vector2::zeros();
                    }
                    outcome.transitions.push(StateTransition {
                        record: RecordId::Entity(id.to_string()),
                        from: entity.state,
                        to: Freshness::Fresh,
                        at_ms: now_ms,
                    });
                    entity.state = Freshness::Fresh;
                    entity.state_changed_ms = now_ms;
                }
            }
            None => {
                let mut entity = Entity::new(id, now_ms);
                entity.gps = self.gps_fixes.get(id).copied();
                self.entities.insert(id.to_string(), entity);
                outcome.created_entities.push(id.to_string());
            }
        }
    }

    /// Apply a batch; invalid tuples are rejected one by one, the rest is applied
    pub fn apply_batch(&mut self, batch: &[RangeMeasurement], now_ms: u64) -> BatchOutcome {
        let mut result = BatchOutcome::default();
        for (index, measurement) in batch.iter().enumerate() {
            match self.apply_measurement(measurement, now_ms) {
                Ok(outcome) => result.applied.push(outcome),
                Err(reason) => {
                    tracing::warn!(
                        index,
                        id_a = %measurement.id_a,
                        id_b = %measurement.id_b,
                        distance = measurement.distance_m,
                        "rejected measurement: {}",
                        reason
                    );
                    result.rejected.push(RejectedMeasurement {
                        index,
                        measurement: measurement.clone(),
                        reason,
                    });
                }
            }
        }
        result
    }

    pub fn entity(&self, id: &str) -> Option<&Entity> {
        self.entities.get(id)
    }

    pub fn entity_mut(&mut self, id: &str) -> Option<&mut Entity> {
        self.entities.get_mut(id)
    }

    pub fn entities(&self) -> impl Iterator<Item = &Entity> {
        self.entities.values()
    }

    pub fn entities_mut(&mut self) -> impl Iterator<Item = &mut Entity> {
        self.entities.values_mut()
    }

    pub fn entity_count(&self) -> usize {
        self.entities.len()
    }

    pub fn edge(&self, key: &EdgeKey) -> Option<&Edge> {
        self.edges.get(key)
    }

    pub fn edge_between(&self, id_a: &str, id_b: &str) -> Option<&Edge> {
        self.edges.get(&EdgeKey::new(id_a, id_b))
    }

    pub fn edges(&self) -> impl Iterator<Item = &Edge> {
        self.edges.values()
    }

    pub fn edge_count(&self) -> usize {
        self.edges.len()
    }

    /// Edges that currently constrain the layout
    pub fn fresh_edges(&self) -> impl Iterator<Item = &Edge> {
        self.edges.values().filter(|e| e.state.is_fresh())
    }

    /// All known neighbours of `id`, regardless of edge state
    pub fn neighbours<'a>(&'a self, id: &str) -> impl Iterator<Item = &'a str> + 'a {
        self.adjacency
            .get(id)
            .into_iter()
            .flat_map(|set| set.iter().map(String::as_str))
    }

    /// Whether `id` has at least one edge that is not removed
    pub fn has_active_edge(&self, id: &str) -> bool {
        self.neighbours(id).any(|other| {
            self.edges
                .get(&EdgeKey::new(id, other))
                .map_or(false, |e| e.state.is_active())
        })
    }

    /// Split borrow used by the lifecycle manager: entity states are read
    /// while edge records are updated
    pub(crate) fn entities_and_edges_mut(
        &mut self,
    ) -> (&BTreeMap<String, Entity>, impl Iterator<Item = &mut Edge>) {
        (&self.entities, self.edges.values_mut())
    }

    /// Register an externally known GPS fix; applies to the entity once it exists
    pub fn set_gps_anchor(&mut self, id: &str, fix: GeoPoint) {
        self.gps_fixes.insert(id.to_string(), fix);
        if let Some(entity) = self.entities.get_mut(id) {
            entity.gps = Some(fix);
        }
    }

    pub fn clear_gps_anchor(&mut self, id: &str) -> Option<GeoPoint> {
        if let Some(entity) = self.entities.get_mut(id) {
            entity.gps = None;
        }
        self.gps_fixes.remove(id)
    }

    /// Replace every GPS fix with the given set
    pub fn sync_gps_anchors<'a>(&mut self, anchors: impl IntoIterator<Item = (&'a str, GeoPoint)>) {
        let ids: Vec<String> = self.gps_fixes.keys().cloned().collect();
        for id in ids {
            self.clear_gps_anchor(&id);
        }
        for (id, fix) in anchors {
            self.set_gps_anchor(id, fix);
        }
    }

    /// Active entities carrying a GPS fix, ordered by id
    pub fn gps_anchors(&self) -> impl Iterator<Item = (&Entity, GeoPoint)> {
        self.entities
            .values()
            .filter(|e| e.state.is_active())
            .filter_map(|e| e.gps.map(|fix| (e, fix)))
    }

    /// Physically drop an entity and every edge touching it
    pub fn purge_entity(&mut self, id: &str) -> Option<Entity> {
        let neighbours: Vec<String> = self
            .adjacency
            .get(id)
            .map(|set| set.iter().cloned().collect())
            .unwrap_or_default();
        for other in neighbours {
            self.purge_edge(&EdgeKey::new(id, other.as_str()));
        }
        self.adjacency.remove(id);
        self.entities.remove(id)
    }

    /// Physically drop one edge
    pub fn purge_edge(&mut self, key: &EdgeKey) -> Option<Edge> {
        for (from, to) in [(key.first(), key.second()), (key.second(), key.first())] {
            if let Some(set) = self.adjacency.get_mut(from) {
                set.remove(to);
            }
        }
        self.edges.remove(key)
    }

    /// Drop all entities and edges. GPS fixes are configuration and survive.
    pub fn clear(&mut self) {
        self.entities.clear();
        self.edges.clear();
        self.adjacency.clear();
    }
}
