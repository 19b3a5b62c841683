//! Fixed measurement sets used by the demo binary and tests

use crate::core::{MeasurementBatch, RangeMeasurement};

/// A named, static layout
#[derive(Debug, Clone, PartialEq)]
pub struct Scenario {
    pub name: &'static str,
    pub description: &'static str,
    pub measurements: MeasurementBatch,
}

const SCENARIOS: &[(&str, &str, &[(&str, &str, f64)])] = &[
    (
        "simple_triangle",
        "Gateway and two rooms",
        &[("B5A4", "Room1", 2.0), ("B5A4", "Room2", 3.0), ("Room1", "Room2", 2.5)],
    ),
    (
        "square_layout",
        "Four corners of a 2 m square with both diagonals",
        &[
            ("A", "B", 2.0),
            ("B", "C", 2.0),
            ("C", "D", 2.0),
            ("D", "A", 2.0),
            ("A", "C", 2.83),
            ("B", "D", 2.83),
        ],
    ),
    (
        "star_topology",
        "Five nodes ranged only against the gateway",
        &[
            ("Gateway", "Node1", 1.5),
            ("Gateway", "Node2", 2.0),
            ("Gateway", "Node3", 2.5),
            ("Gateway", "Node4", 1.8),
            ("Gateway", "Node5", 2.2),
        ],
    ),
    (
        "mixed_ranges",
        "Distances across all accuracy bands",
        &[
            ("B5A4", "Close", 0.5),
            ("B5A4", "Medium", 5.0),
            ("B5A4", "Far", 10.0),
            ("Close", "Medium", 4.8),
            ("Medium", "Far", 6.2),
        ],
    ),
];

pub fn scenario_names() -> impl Iterator<Item = &'static str> {
    SCENARIOS.iter().map(|(name, _, _)| *name)
}

/// Look up a scenario by name
pub fn scenario(name: &str) -> Option<Scenario> {
    SCENARIOS
        .iter()
        .find(|(n, _, _)| *n == name)
        .map(|&(name, description, tuples)| Scenario {
            name,
            description,
            measurements: tuples
                .iter()
                .map(|&(a, b, d)| RangeMeasurement::new(a, b, d))
                .collect(),
        })
}
