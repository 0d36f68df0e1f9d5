//! The CRP algorithms: customization of overlay weights, the three query
//! variants plus the baseline Dijkstra, and path unpacking.

use crate::datastr::graph::*;

pub mod customization;
pub mod dijkstra;
pub mod query;

/// The outcome of a shortest path query: the vertex sequence of a minimum
/// cost path and its cost. An unreachable target is a normal outcome and is
/// reported as an empty path with cost `INFINITY`.
#[derive(Debug, Clone, PartialEq)]
pub struct QueryResult {
    pub path: Vec<NodeId>,
    pub distance: Weight,
}

impl QueryResult {
    pub fn unreachable() -> QueryResult {
        QueryResult {
            path: Vec::new(),
            distance: INFINITY,
        }
    }

    pub fn found(&self) -> bool {
        self.distance < INFINITY
    }
}
