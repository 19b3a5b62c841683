//! Synthetic range data for demos and tests
//!
//! [`MeshSimulator`] stands in for a live UWB gateway: a few fixed nodes and
//! two moving tags, with Gaussian ranging noise and the occasional lost
//! sample. Runs are reproducible from a seed.

pub mod scenarios;

use nalgebra::Vector2;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::f64::consts::PI;

use crate::core::{MeasurementBatch, RangeMeasurement};

pub use scenarios::{scenario, scenario_names, Scenario};

/// Shortest distance the simulated radios report
const MIN_REPORTED_M: f64 = 0.1;

/// How a simulated node moves
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Motion {
    Fixed,
    /// `(2 cos t + 1, 2 sin t + 2)`
    Circle,
    /// `(1.5 sin 2t, 1.5 sin t + 3)`
    FigureEight,
}

impl Motion {
    fn is_mobile(self) -> bool {
        self != Motion::Fixed
    }
}

/// One simulated radio
#[derive(Debug, Clone, PartialEq)]
pub struct SimNode {
    pub id: String,
    /// Ground-truth position in meters
    pub position: Vector2<f64>,
    pub motion: Motion,
}

impl SimNode {
    pub fn fixed(id: impl Into<String>, x: f64, y: f64) -> Self {
        Self {
            id: id.into(),
            position: Vector2::new(x, y),
            motion: Motion::Fixed,
        }
    }

    pub fn mobile(id: impl Into<String>, motion: Motion) -> Self {
        let mut node = Self {
            id: id.into(),
            position: Vector2::zeros(),
            motion,
        };
        node.advance(0.0);
        node
    }

    fn advance(&mut self, t: f64) {
        match self.motion {
            Motion::Fixed => {}
            Motion::Circle => self.position = Vector2::new(2.0 * t.cos() + 1.0, 2.0 * t.sin() + 2.0),
            Motion::FigureEight => {
                self.position = Vector2::new(1.5 * (2.0 * t).sin(), 1.5 * t.sin() + 3.0)
            }
        }
    }
}

/// Noise and loss model
#[derive(Debug, Clone, PartialEq)]
pub struct SimulatorConfig {
    pub seed: u64,
    /// Standard deviation of the ranging error, meters
    pub noise_std_m: f64,
    /// Chance that a tag-to-tag pair is not ranged in a round
    pub mobile_pair_skip_probability: f64,
    /// Chance that one random measurement of a round is lost
    pub drop_probability: f64,
    /// Simulated time advanced per round
    pub time_step: f64,
}

impl Default for SimulatorConfig {
    fn default() -> Self {
        Self {
            seed: 42,
            noise_std_m: 0.1,
            mobile_pair_skip_probability: 0.3,
            drop_probability: 0.1,
            time_step: 0.1,
        }
    }
}

/// Gateway, two fixed rooms and two moving tags
#[derive(Debug, Clone)]
pub struct MeshSimulator {
    config: SimulatorConfig,
    nodes: Vec<SimNode>,
    step: u64,
    rng: StdRng,
}

impl MeshSimulator {
    pub fn new(config: SimulatorConfig) -> Self {
        let nodes = vec![
            SimNode::fixed(crate::core::DEFAULT_GATEWAY_ID, 0.0, 0.0),
            SimNode::fixed("Room1", 3.0, 2.0),
            SimNode::fixed("Room2", -2.0, 4.0),
            SimNode::mobile("TAG001", Motion::Circle),
            SimNode::mobile("TAG002", Motion::FigureEight),
        ];
        Self::with_nodes(config, nodes)
    }

    pub fn with_nodes(config: SimulatorConfig, nodes: Vec<SimNode>) -> Self {
        let rng = StdRng::seed_from_u64(config.seed);
        Self {
            config,
            nodes,
            step: 0,
            rng,
        }
    }

    pub fn nodes(&self) -> &[SimNode] {
        &self.nodes
    }

    pub fn step(&self) -> u64 {
        self.step
    }

    pub fn true_distance(&self, a: &str, b: &str) -> Option<f64> {
        let pa = self.nodes.iter().find(|n| n.id == a)?.position;
        let pb = self.nodes.iter().find(|n| n.id == b)?.position;
        Some((pa - pb).norm())
    }

    /// Move the tags one step and range every pair
    pub fn next_batch(&mut self) -> MeasurementBatch {
        self.step += 1;
        let t = self.step as f64 * self.config.time_step;
        for node in &mut self.nodes {
            node.advance(t);
        }

        let mut batch = MeasurementBatch::new();
        for i in 0..self.nodes.len() {
            for j in (i + 1)..self.nodes.len() {
                let (a, b) = (&self.nodes[i], &self.nodes[j]);
                if a.motion.is_mobile()
                    && b.motion.is_mobile()
                    && self.rng.gen_bool(self.config.mobile_pair_skip_probability)
                {
                    continue;
                }
                let truth = (a.position - b.position).norm();
                let noise = standard_normal(&mut self.rng) * self.config.noise_std_m;
                let measured = (truth + noise).max(MIN_REPORTED_M);
                let rounded = (measured * 100.0).round() / 100.0;
                batch.push(RangeMeasurement::new(a.id.clone(), b.id.clone(), rounded));
            }
        }

        if !batch.is_empty() && self.rng.gen_bool(self.config.drop_probability) {
            let lost = self.rng.gen_range(0..batch.len());
            batch.remove(lost);
        }
        batch
    }
}

/// Standard normal sample (Box-Muller)
fn standard_normal(rng: &mut StdRng) -> f64 {
    let u1: f64 = rng.gen_range(f64::EPSILON..1.0);
    let u2: f64 = rng.gen();
    (-2.0 * u1.ln()).sqrt() * (2.0 * PI * u2).cos()
}

impl Iterator for MeshSimulator {
    type Item = MeasurementBatch;

    fn next(&mut self) -> Option<Self::Item> {
        Some(self.next_batch())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_same_seed_same_batches() {
        let a: Vec<_> = MeshSimulator::new(SimulatorConfig::default()).take(20).collect();
        let b: Vec<_> = MeshSimulator::new(SimulatorConfig::default()).take(20).collect();
        assert_eq!(a, b);
    }

    #[test]
    fn test_noisy_batches_range_every_fixed_pair() {
        let mut sim = MeshSimulator::new(SimulatorConfig {
            drop_probability: 0.0,
            ..SimulatorConfig::default()
        });
        for _ in 0..20 {
            let batch = sim.next_batch();
            // 3 fixed-fixed and 6 fixed-mobile pairs are always ranged
            assert!(batch.len() >= 9);
            assert!(batch.iter().all(|m| m.distance_m.is_finite()));
        }
    }

    #[test]
    fn test_standard_normal_is_centred() {
        let mut rng = StdRng::seed_from_u64(7);
        let samples: Vec<f64> = (0..4_000).map(|_| standard_normal(&mut rng)).collect();
        let mean = samples.iter().sum::<f64>() / samples.len() as f64;
        let variance = samples.iter().map(|s| (s - mean).powi(2)).sum::<f64>() / samples.len() as f64;
        assert!(mean.abs() < 0.1);
        assert!((variance - 1.0).abs() < 0.15);
    }

    #[test]
    fn test_fixed_pairs_are_close_to_truth() {
        let config = SimulatorConfig {
            drop_probability: 0.0,
            ..SimulatorConfig::default()
        };
        let mut sim = MeshSimulator::new(config);
        for _ in 0..50 {
            let batch = sim.next_batch();
            let room_pair = batch
                .iter()
                .find(|m| m.id_a == "Room1" && m.id_b == "Room2")
                .unwrap();
            // sqrt(29); well beyond 6 sigma would be a broken noise model
            assert!((room_pair.distance_m - 29f64.sqrt()).abs() < 0.6);
            assert!(batch.iter().all(|m| m.distance_m >= MIN_REPORTED_M));
        }
    }

    #[test]
    fn test_tags_follow_their_paths() {
        let config = SimulatorConfig {
            noise_std_m: 0.0,
            ..SimulatorConfig::default()
        };
        let mut sim = MeshSimulator::new(config);
        sim.next_batch();

        let t: f64 = 0.1;
        let tag1 = &sim.nodes()[3];
        assert!((tag1.position - Vector2::new(2.0 * t.cos() + 1.0, 2.0 * t.sin() + 2.0)).norm() < 1e-12);
        let tag2 = &sim.nodes()[4];
        assert!((tag2.position - Vector2::new(1.5 * (2.0 * t).sin(), 1.5 * t.sin() + 3.0)).norm() < 1e-12);
    }

    #[test]
    fn test_noise_free_batch_is_complete() {
        let config = SimulatorConfig {
            noise_std_m: 0.0,
            mobile_pair_skip_probability: 0.0,
            drop_probability: 0.0,
            ..SimulatorConfig::default()
        };
        let mut sim = MeshSimulator::new(config);
        let batch = sim.next_batch();
        assert_eq!(batch.len(), 10);
        let gw_room1 = batch.iter().find(|m| m.id_b == "Room1" && m.id_a == "B5A4").unwrap();
        assert_eq!(gw_room1.distance_m, 3.61);
    }
}
