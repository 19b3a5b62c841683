//! Force-directed relative layout
//!
//! Every entity is a point mass and every fresh edge a spring whose natural
//! length is the measured distance in physics units
//! (`distance_m * display_scale`). Each tick accumulates:
//! - spring forces along fresh edges, `(current - target) * spring_constant`
//! - short-range repulsion `repulsion_strength / d^2` between pairs that
//!   share no fresh or stale edge
//! - a uniform centering pull proportional to the centroid's offset from the
//!   viewport centre
//! - soft containment proportional to the overshoot past the viewport margin
//!
//! and integrates with damped explicit Euler, `v = (v + F / m) * damping`,
//! `p += v`. Inconsistent distances are never an error: the layout settles in
//! whatever approximate equilibrium the springs allow.

use nalgebra::Vector2;
use std::collections::{BTreeSet, HashMap};

use crate::graph::{DistanceGraphStore, EdgeKey};
use crate::utils::config::SolverConfig;

/// Rotation between successive seeds, in radians
pub const GOLDEN_ANGLE: f64 = 2.399963229728653;

/// Below this distance two points are treated as coincident
const COINCIDENT_EPSILON: f64 = 1e-9;

/// Displacements smaller than this do not count as movement
const MOVEMENT_EPSILON: f64 = 1e-6;

/// Summary of one relaxation step
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TickReport {
    /// Entities whose position changed
    pub moved: usize,
    /// Largest single displacement in physics units
    pub max_displacement: f64,
    /// Sum of `|current - target|` over all springs, in physics units
    pub total_tension: f64,
    /// Entities held in place this tick because of non-finite numbers
    pub unstable: Vec<String>,
    /// Entities that received their first position this tick
    pub seeded: Vec<String>,
}

impl TickReport {
    pub fn is_settled(&self, threshold: f64) -> bool {
        self.max_displacement < threshold
    }
}

struct Body {
    id: String,
    position: Vector2<f64>,
    velocity: Vector2<f64>,
    force: Vector2<f64>,
    /// Has at least one spring this tick
    connected: bool,
}

/// Damped spring-mass solver over the distance graph
#[derive(Debug, Clone)]
pub struct RelativeLayoutSolver {
    config: SolverConfig,
    tick_count: u64,
    seed_counter: u64,
}

impl RelativeLayoutSolver {
    pub fn new(config: SolverConfig) -> Self {
        Self {
            config,
            tick_count: 0,
            seed_counter: 0,
        }
    }

    pub fn config(&self) -> &SolverConfig {
        &self.config
    }

    /// Takes effect on the next tick; positions and velocities are kept
    pub fn set_config(&mut self, config: SolverConfig) {
        self.config = config;
    }

    pub fn tick_count(&self) -> u64 {
        self.tick_count
    }

    /// Zero every velocity, keeping positions. Idempotent.
    pub fn reset_velocities(&self, store: &mut DistanceGraphStore) {
        for entity in store.entities_mut() {
            entity.velocity = Vector2::zeros();
        }
    }

    /// Physics-unit length of a measured distance
    pub fn target_length(&self, distance_m: f64) -> f64 {
        distance_m * self.config.display_scale
    }

    /// Run one relaxation step
    pub fn tick(&mut self, store: &mut DistanceGraphStore) -> TickReport {
        let mut report = TickReport {
            seeded: self.seed_new_entities(store),
            ..Default::default()
        };

        let mut bodies: Vec<Body> = store
            .entities()
            .filter_map(|e| {
                e.active_position().map(|position| Body {
                    id: e.id.clone(),
                    position,
                    velocity: e.velocity,
                    force: Vector2::zeros(),
                    connected: false,
                })
            })
            .collect();
        self.tick_count += 1;
        if bodies.is_empty() {
            return report;
        }
        let index: HashMap<String, usize> = bodies
            .iter()
            .enumerate()
            .map(|(i, b)| (b.id.clone(), i))
            .collect();

        // Pairs sharing any non-removed edge never repel; only fresh edges pull
        let mut linked: BTreeSet<(usize, usize)> = BTreeSet::new();
        for edge in store.edges().filter(|e| e.state.is_active()) {
            let (Some(&i), Some(&j)) = (index.get(edge.key.first()), index.get(edge.key.second())) else {
                continue;
            };
            linked.insert((i.min(j), i.max(j)));
            if !edge.state.is_fresh() {
                continue;
            }
            let delta = bodies[j].position - bodies[i].position;
            let current = delta.norm();
            let direction = if current > COINCIDENT_EPSILON {
                delta / current
            } else {
                separation_direction(i, j)
            };
            let stretch = current - self.target_length(edge.distance_m);
            let force = direction * (stretch * self.config.spring_constant);
            bodies[i].force += force;
            bodies[j].force -= force;
            bodies[i].connected = true;
            bodies[j].connected = true;
            report.total_tension += stretch.abs();
        }

        self.apply_repulsion(&mut bodies, &linked);
        self.apply_centering(&mut bodies);
        self.apply_containment(&mut bodies);
        self.integrate(&mut bodies, &mut report);

        for body in bodies {
            if let Some(entity) = store.entity_mut(&body.id) {
                entity.position = Some(body.position);
                entity.velocity = body.velocity;
            }
        }
        report
    }

    fn apply_repulsion(&self, bodies: &mut [Body], linked: &BTreeSet<(usize, usize)>) {
        let range = self.config.repulsion_range;
        if range <= 0.0 || self.config.repulsion_strength == 0.0 {
            return;
        }
        for i in 0..bodies.len() {
            if !bodies[i].connected {
                continue;
            }
            for j in (i + 1)..bodies.len() {
                if !bodies[j].connected || linked.contains(&(i, j)) {
                    continue;
                }
                let delta = bodies[j].position - bodies[i].position;
                let d = delta.norm();
                if d >= range {
                    continue;
                }
                let direction = if d > COINCIDENT_EPSILON {
                    delta / d
                } else {
                    separation_direction(i, j)
                };
                // Clamp so coincident pairs get a bounded kick
                let magnitude = self.config.repulsion_strength / (d * d).max(1.0);
                bodies[i].force -= direction * magnitude;
                bodies[j].force += direction * magnitude;
            }
        }
    }

    fn apply_centering(&self, bodies: &mut [Body]) {
        let (cx, cy) = self.config.viewport_center();
        let centroid = bodies
            .iter()
            .fold(Vector2::zeros(), |acc: Vector2<f64>, b| acc + b.position)
            / bodies.len() as f64;
        let pull = (Vector2::new(cx, cy) - centroid) * self.config.centering_strength;
        for body in bodies.iter_mut() {
            body.force += pull;
        }
    }

    fn apply_containment(&self, bodies: &mut [Body]) {
        let margin = self.config.boundary_margin;
        let k = self.config.boundary_strength;
        let (min_x, max_x) = (margin, self.config.viewport_width - margin);
        let (min_y, max_y) = (margin, self.config.viewport_height - margin);

        // Isolated entities only feel the centering pull
        for body in bodies.iter_mut().filter(|b| b.connected) {
            let p = body.position;
            if p.x < min_x {
                body.force.x += (min_x - p.x) * k;
            } else if p.x > max_x {
                body.force.x -= (p.x - max_x) * k;
            }
            if p.y < min_y {
                body.force.y += (min_y - p.y) * k;
            } else if p.y > max_y {
                body.force.y -= (p.y - max_y) * k;
            }
        }
    }

    fn integrate(&self, bodies: &mut [Body], report: &mut TickReport) {
        let mass = self.config.mass;
        for body in bodies.iter_mut() {
            let mut velocity = (body.velocity + body.force / mass) * self.config.damping;
            let speed = velocity.norm();
            if speed > self.config.max_speed {
                velocity *= self.config.max_speed / speed;
            }
            let position = body.position + velocity;

            let finite = body.force.iter().all(|c| c.is_finite())
                && velocity.iter().all(|c| c.is_finite())
                && position.iter().all(|c| c.is_finite());
            if !finite {
                tracing::warn!(entity = %body.id, force = ?body.force, "non-finite layout state, holding position");
                body.velocity = Vector2::zeros();
                report.unstable.push(body.id.clone());
                continue;
            }

            let displacement = (position - body.position).norm();
            if displacement > MOVEMENT_EPSILON {
                report.moved += 1;
            }
            report.max_displacement = report.max_displacement.max(displacement);
            body.position = position;
            body.velocity = velocity;
        }
    }

    /// Give every active entity without a position a starting point near its
    /// already placed neighbours
    fn seed_new_entities(&mut self, store: &mut DistanceGraphStore) -> Vec<String> {
        let pending: Vec<String> = store
            .entities()
            .filter(|e| e.state.is_active() && e.position.is_none())
            .map(|e| e.id.clone())
            .collect();

        let mut seeded = Vec::with_capacity(pending.len());
        for id in pending {
            self.seed_counter += 1;
            let position = self.seed_position(store, &id);
            if let Some(entity) = store.entity_mut(&id) {
                entity.position = Some(position);
                entity.velocity = Vector2::zeros();
            }
            tracing::trace!(entity = %id, x = position.x, y = position.y, "seeded entity");
            seeded.push(id);
        }
        seeded
    }

    fn seed_position(&self, store: &DistanceGraphStore, id: &str) -> Vector2<f64> {
        let (cx, cy) = self.config.viewport_center();
        let centre = Vector2::new(cx, cy);

        let anchors: Vec<(Vector2<f64>, f64)> = store
            .neighbours(id)
            .filter_map(|other| {
                let edge = store.edge(&EdgeKey::new(id, other))?;
                if !edge.state.is_active() {
                    return None;
                }
                let position = store.entity(other)?.active_position()?;
                Some((position, self.target_length(edge.distance_m)))
            })
            .collect();

        let angle = GOLDEN_ANGLE * self.seed_counter as f64;
        let direction = Vector2::new(angle.cos(), angle.sin());
        match anchors.as_slice() {
            [] => centre,
            [(position, length)] => position + direction * *length,
            many => {
                let n = many.len() as f64;
                let centroid = many.iter().fold(Vector2::zeros(), |acc: Vector2<f64>, (p, _)| acc + p) / n;
                let mean_length = many.iter().map(|(_, l)| l).sum::<f64>() / n;
                centroid + direction * (0.25 * mean_length)
            }
        }
    }
}

/// Deterministic unit vector used to split coincident points
fn separation_direction(i: usize, j: usize) -> Vector2<f64> {
    let angle = GOLDEN_ANGLE * (i * 31 + j + 1) as f64;
    Vector2::new(angle.cos(), angle.sin())
}
