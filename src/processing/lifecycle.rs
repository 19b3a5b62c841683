//! Freshness state machine for entities and edges
//!
//! `fresh -> stale -> removed` as time passes without measurements; a new
//! measurement (applied by the store) brings any record straight back to
//! `fresh`. All time-driven transitions go through [`advance`], and an edge's
//! effective state always goes through [`combine_edge_state`], so the rule
//! "an edge is never fresher than either endpoint" holds by construction.

use nalgebra::Vector2;

use crate::core::Freshness;
use crate::graph::{DistanceGraphStore, EdgeKey, RecordId, StateTransition};
use crate::utils::config::LifecycleConfig;

/// Staleness thresholds in milliseconds
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Timeouts {
    /// Elapsed time after which a record is stale
    pub stale_ms: u64,
    /// Additional time after `stale_ms` before a record is removed
    pub removal_ms: u64,
}

impl Timeouts {
    pub fn from_config(config: &LifecycleConfig) -> Self {
        Self {
            stale_ms: seconds_to_ms(config.stale_timeout_s),
            removal_ms: seconds_to_ms(config.removal_timeout_s),
        }
    }
}

fn seconds_to_ms(seconds: f64) -> u64 {
    (seconds.max(0.0) * 1000.0).round() as u64
}

/// Classification from elapsed time alone
pub fn classify(elapsed_ms: u64, timeouts: &Timeouts) -> Freshness {
    if elapsed_ms > timeouts.stale_ms.saturating_add(timeouts.removal_ms) {
        Freshness::Removed
    } else if elapsed_ms > timeouts.stale_ms {
        Freshness::Stale
    } else {
        Freshness::Fresh
    }
}

/// The single time-driven transition function. Time only ever makes a record
/// older; returning to `Fresh` requires a measurement.
pub fn advance(current: Freshness, elapsed_ms: u64, timeouts: &Timeouts) -> Freshness {
    current.max(classify(elapsed_ms, timeouts))
}

/// Effective edge state: endpoint failure dominates the edge's own state
pub fn combine_edge_state(own: Freshness, endpoint_a: Freshness, endpoint_b: Freshness) -> Freshness {
    own.max(endpoint_a).max(endpoint_b)
}

/// Outcome of one lifecycle tick
#[derive(Debug, Clone, Default)]
pub struct LifecycleReport {
    pub transitions: Vec<StateTransition>,
    pub purged_entities: Vec<String>,
    pub purged_edges: Vec<EdgeKey>,
}

impl LifecycleReport {
    pub fn is_empty(&self) -> bool {
        self.transitions.is_empty() && self.purged_entities.is_empty() && self.purged_edges.is_empty()
    }
}

/// Applies the freshness state machine to every record on each tick
#[derive(Debug, Clone)]
pub struct LifecycleManager {
    timeouts: Timeouts,
    purge_after_ms: Option<u64>,
    last_tick_ms: Option<u64>,
}

impl LifecycleManager {
    pub fn new(config: &LifecycleConfig) -> Self {
        Self {
            timeouts: Timeouts::from_config(config),
            purge_after_ms: config.purge_after_s.map(seconds_to_ms),
            last_tick_ms: None,
        }
    }

    pub fn timeouts(&self) -> Timeouts {
        self.timeouts
    }

    pub fn set_config(&mut self, config: &LifecycleConfig) {
        self.timeouts = Timeouts::from_config(config);
        self.purge_after_ms = config.purge_after_s.map(seconds_to_ms);
    }

    pub fn last_tick_ms(&self) -> Option<u64> {
        self.last_tick_ms
    }

    /// Reclassify every entity, then every edge, then drop long-removed records
    pub fn tick(&mut self, store: &mut DistanceGraphStore, now_ms: u64) -> LifecycleReport {
        let mut report = LifecycleReport::default();
        let timeouts = self.timeouts;

        for entity in store.entities_mut() {
            let elapsed = now_ms.saturating_sub(entity.last_update_ms);
            let next = advance(entity.state, elapsed, &timeouts);
            if next == entity.state {
                continue;
            }
            tracing::debug!(entity = %entity.id, from = %entity.state, to = %next, elapsed_ms = elapsed, "entity freshness changed");
            if next == Freshness::Removed {
                // Detached from the solver; keep the last position for diagnostics
                entity.velocity = Vector2::zeros();
            }
            report.transitions.push(StateTransition {
                record: RecordId::Entity(entity.id.clone()),
                from: entity.state,
                to: next,
                at_ms: now_ms,
            });
            entity.state = next;
            entity.state_changed_ms = now_ms;
        }

        let (entities, edges) = store.entities_and_edges_mut();
        for edge in edges {
            let elapsed = now_ms.saturating_sub(edge.last_update_ms);
            edge.own_state = advance(edge.own_state, elapsed, &timeouts);

            let endpoint_state = |id: &str| entities.get(id).map_or(Freshness::Removed, |e| e.state);
            let next = combine_edge_state(
                edge.own_state,
                endpoint_state(edge.key.first()),
                endpoint_state(edge.key.second()),
            );
            if next == edge.state {
                continue;
            }
            tracing::debug!(edge = %edge.key, from = %edge.state, to = %next, "edge freshness changed");
            report.transitions.push(StateTransition {
                record: RecordId::Edge(edge.key.clone()),
                from: edge.state,
                to: next,
                at_ms: now_ms,
            });
            edge.state = next;
            edge.state_changed_ms = now_ms;
        }

        if let Some(purge_after) = self.purge_after_ms {
            self.purge(store, now_ms, purge_after, &mut report);
        }

        self.last_tick_ms = Some(now_ms);
        report
    }

    fn purge(
        &self,
        store: &mut DistanceGraphStore,
        now_ms: u64,
        purge_after_ms: u64,
        report: &mut LifecycleReport,
    ) {
        let expired = |state: Freshness, changed_ms: u64| {
            state == Freshness::Removed && now_ms.saturating_sub(changed_ms) >= purge_after_ms
        };

        let edges: Vec<EdgeKey> = store
            .edges()
            .filter(|e| expired(e.state, e.state_changed_ms))
            .map(|e| e.key.clone())
            .collect();
        for key in edges {
            store.purge_edge(&key);
            report.purged_edges.push(key);
        }

        let entities: Vec<String> = store
            .entities()
            .filter(|e| expired(e.state, e.state_changed_ms))
            .map(|e| e.id.clone())
            .collect();
        for id in entities {
            // Edges of a purged entity go with it
            let touching: Vec<EdgeKey> = store
                .neighbours(&id)
                .map(|other| EdgeKey::new(id.as_str(), other))
                .collect();
            store.purge_entity(&id);
            report.purged_edges.extend(touching);
            report.purged_entities.push(id);
        }

        if !report.purged_entities.is_empty() || !report.purged_edges.is_empty() {
            tracing::info!(
                entities = report.purged_entities.len(),
                edges = report.purged_edges.len(),
                "purged removed records"
            );
        }
    }
}

/// Edges whose state is fresher than one of their endpoints, or whose
/// endpoints are unknown. Empty whenever the store is consistent.
pub fn check_invariants(store: &DistanceGraphStore) -> Vec<EdgeKey> {
    store
        .edges()
        .filter(|edge| {
            let a = store.entity(edge.key.first());
            let b = store.entity(edge.key.second());
            match (a, b) {
                (Some(a), Some(b)) => edge.state < a.state.max(b.state),
                _ => true,
            }
        })
        .map(|edge| edge.key.clone())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::RangeMeasurement;
    use crate::utils::config::MeasurementConfig;

    const STALE_MS: u64 = 5_000;
    const REMOVAL_MS: u64 = 25_000;

    fn manager() -> LifecycleManager {
        LifecycleManager::new(&LifecycleConfig {
            stale_timeout_s: 5.0,
            removal_timeout_s: 25.0,
            purge_after_s: None,
        })
    }

    fn store_with(measurements: &[(&str, &str, f64)], now_ms: u64) -> DistanceGraphStore {
        let mut store = DistanceGraphStore::new(MeasurementConfig::default());
        for &(a, b, d) in measurements {
            store.apply_measurement(&RangeMeasurement::new(a, b, d), now_ms).unwrap();
        }
        store
    }

    #[test]
    fn test_classify_thresholds_are_exclusive() {
        let t = Timeouts { stale_ms: STALE_MS, removal_ms: REMOVAL_MS };
        assert_eq!(classify(STALE_MS, &t), Freshness::Fresh);
        assert_eq!(classify(STALE_MS + 1, &t), Freshness::Stale);
        assert_eq!(classify(STALE_MS + REMOVAL_MS, &t), Freshness::Stale);
        assert_eq!(classify(STALE_MS + REMOVAL_MS + 1, &t), Freshness::Removed);
    }

    #[test]
    fn test_time_never_makes_a_record_fresher() {
        let t = Timeouts { stale_ms: STALE_MS, removal_ms: REMOVAL_MS };
        assert_eq!(advance(Freshness::Removed, 0, &t), Freshness::Removed);
        assert_eq!(advance(Freshness::Stale, 10, &t), Freshness::Stale);
    }

    #[test]
    fn test_staleness_monotonicity() {
        let mut manager = manager();
        let mut store = store_with(&[("A", "B", 3.0)], 0);

        manager.tick(&mut store, STALE_MS + 1);
        assert_eq!(store.entity("A").unwrap().state, Freshness::Stale);
        assert_eq!(store.edge_between("A", "B").unwrap().state, Freshness::Stale);

        manager.tick(&mut store, STALE_MS + REMOVAL_MS + 1);
        assert_eq!(store.entity("A").unwrap().state, Freshness::Removed);
        assert_eq!(store.edge_between("A", "B").unwrap().state, Freshness::Removed);
        // Removed records stay observable
        assert_eq!(store.entity_count(), 2);

        store
            .apply_measurement(&RangeMeasurement::new("A", "B", 3.0), STALE_MS + REMOVAL_MS + 2)
            .unwrap();
        assert_eq!(store.entity("A").unwrap().state, Freshness::Fresh);
        assert_eq!(store.edge_between("A", "B").unwrap().state, Freshness::Fresh);

        let report = manager.tick(&mut store, STALE_MS + REMOVAL_MS + 3);
        assert!(report.transitions.is_empty());
    }

    #[test]
    fn test_fresh_measurement_resets_stale_entity() {
        let mut manager = manager();
        let mut store = store_with(&[("A", "B", 3.0)], 0);
        manager.tick(&mut store, STALE_MS + 100);
        assert_eq!(store.entity("B").unwrap().state, Freshness::Stale);

        store.apply_measurement(&RangeMeasurement::new("B", "A", 3.2), STALE_MS + 200).unwrap();
        assert_eq!(store.entity("B").unwrap().state, Freshness::Fresh);
        manager.tick(&mut store, STALE_MS + 300);
        assert_eq!(store.entity("B").unwrap().state, Freshness::Fresh);
    }

    #[test]
    fn test_endpoint_failure_dominates_recent_edge() {
        let mut manager = manager();
        let mut store = store_with(&[("A", "B", 3.0), ("A", "C", 4.0)], 0);

        store.apply_measurement(&RangeMeasurement::new("A", "C", 4.0), 4_000).unwrap();
        let report = manager.tick(&mut store, STALE_MS + 1_000);

        // B is stale (last seen at 0); A and C were refreshed at 4s
        assert_eq!(store.entity("B").unwrap().state, Freshness::Stale);
        assert_eq!(store.entity("A").unwrap().state, Freshness::Fresh);
        assert_eq!(store.edge_between("A", "B").unwrap().state, Freshness::Stale);
        assert_eq!(store.edge_between("A", "C").unwrap().state, Freshness::Fresh);
        assert!(check_invariants(&store).is_empty());
        assert!(report
            .transitions
            .iter()
            .any(|t| t.record == RecordId::Edge(EdgeKey::new("A", "B"))));
    }

    #[test]
    fn test_edge_never_fresh_with_stale_endpoint_over_time() {
        let mut manager = manager();
        let mut store = store_with(&[("A", "B", 3.0), ("B", "C", 4.0), ("A", "C", 5.0)], 0);

        for step in 0..80u64 {
            let now = step * 500;
            if step % 3 == 0 {
                store.apply_measurement(&RangeMeasurement::new("A", "C", 5.0), now).unwrap();
            }
            manager.tick(&mut store, now);
            assert!(check_invariants(&store).is_empty(), "violation at {}", now);
        }
    }

    #[test]
    fn test_removed_entity_velocity_is_cleared() {
        let mut manager = manager();
        let mut store = store_with(&[("A", "B", 3.0)], 0);
        store.entity_mut("A").unwrap().velocity = Vector2::new(3.0, -1.0);
        store.entity_mut("A").unwrap().position = Some(Vector2::new(1.0, 1.0));

        manager.tick(&mut store, STALE_MS + REMOVAL_MS + 1);
        let a = store.entity("A").unwrap();
        assert_eq!(a.velocity, Vector2::zeros());
        assert_eq!(a.position, Some(Vector2::new(1.0, 1.0)));
    }

    #[test]
    fn test_purge_after_configured_delay() {
        let mut manager = LifecycleManager::new(&LifecycleConfig {
            stale_timeout_s: 5.0,
            removal_timeout_s: 25.0,
            purge_after_s: Some(10.0),
        });
        let mut store = store_with(&[("A", "B", 3.0)], 0);

        let removed_at = STALE_MS + REMOVAL_MS + 1;
        manager.tick(&mut store, removed_at);
        assert_eq!(store.entity_count(), 2);

        let report = manager.tick(&mut store, removed_at + 10_000);
        assert_eq!(report.purged_entities.len(), 2);
        assert_eq!(report.purged_edges, vec![EdgeKey::new("A", "B")]);
        assert_eq!(store.entity_count(), 0);
        assert_eq!(store.edge_count(), 0);
    }
}
