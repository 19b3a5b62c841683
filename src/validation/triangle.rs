//! Geometric consistency of the measured graph
//!
//! Range noise can produce three distances that no planar triangle can
//! satisfy. The solver tolerates that and settles in an approximate
//! equilibrium; these helpers only report it.

use serde::Serialize;
use std::collections::BTreeSet;

use crate::graph::{DistanceGraphStore, EdgeKey};

/// Three fresh edges whose lengths break the triangle inequality
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TriangleViolation {
    /// Corner identifiers in ascending order
    pub ids: [String; 3],
    /// Side lengths in meters: `ids[0]-ids[1]`, `ids[1]-ids[2]`, `ids[0]-ids[2]`
    pub sides_m: [f64; 3],
    /// How far the longest side exceeds the sum of the other two
    pub excess_m: f64,
}

/// Rendered versus measured length of one fresh edge
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EdgeResidual {
    pub key: EdgeKey,
    pub measured_m: f64,
    pub rendered_m: f64,
    /// `rendered_m - measured_m`
    pub error_m: f64,
}

/// Find fresh triangles where the longest side is more than
/// `(1 + tolerance)` times the sum of the other two
pub fn find_triangle_violations(store: &DistanceGraphStore, tolerance: f64) -> Vec<TriangleViolation> {
    let fresh = |a: &str, b: &str| {
        store
            .edge_between(a, b)
            .filter(|e| e.state.is_fresh())
            .map(|e| e.distance_m)
    };

    let mut violations = Vec::new();
    for edge in store.fresh_edges() {
        let (a, b) = (edge.key.first(), edge.key.second());
        // Every triangle is visited once: a < b < c
        let candidates: BTreeSet<&str> = store.neighbours(b).filter(|c| *c > b).collect();
        for c in candidates {
            let (Some(bc), Some(ac)) = (fresh(b, c), fresh(a, c)) else {
                continue;
            };
            let sides = [edge.distance_m, bc, ac];
            let longest = sides.iter().copied().fold(f64::MIN, f64::max);
            let others = sides.iter().sum::<f64>() - longest;
            if longest > others * (1.0 + tolerance) {
                violations.push(TriangleViolation {
                    ids: [a.to_string(), b.to_string(), c.to_string()],
                    sides_m: sides,
                    excess_m: longest - others,
                });
            }
        }
    }
    violations
}

/// Per fresh edge, how far the current layout is from the measured distance.
/// Edges with an unpositioned endpoint are skipped.
pub fn edge_residuals(store: &DistanceGraphStore, display_scale: f64) -> Vec<EdgeResidual> {
    if !(display_scale.is_finite() && display_scale > 0.0) {
        return Vec::new();
    }
    store
        .fresh_edges()
        .filter_map(|edge| {
            let pa = store.entity(edge.key.first())?.active_position()?;
            let pb = store.entity(edge.key.second())?.active_position()?;
            let rendered_m = (pa - pb).norm() / display_scale;
            Some(EdgeResidual {
                key: edge.key.clone(),
                measured_m: edge.distance_m,
                rendered_m,
                error_m: rendered_m - edge.distance_m,
            })
        })
        .collect()
}
