//! Cost functions and metrics.
//!
//! A metric binds a cost function to a graph/overlay pair: it owns the
//! customized overlay weights and the per-vertex turn difference tables used
//! for stalling. The graph and overlay stay untouched, so any number of
//! metrics can share them (S5: swapping the metric never rebuilds topology).

use crate::algo::customization;
use crate::datastr::graph::*;
use crate::datastr::overlay::OverlayGraph;
use std::collections::HashMap;

/// The cost function, a closed sum over the supported metrics. Keeping this
/// an enum lets the customization hot loop inline the weight computation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CostFunction {
    /// Every edge costs one, paths minimize the number of edges.
    Hop,
    /// Edge cost is the stored length in meters.
    Distance,
    /// Edge cost is the approximate travel time derived from length and speed.
    Time,
}

impl CostFunction {
    pub fn from_name(name: &str) -> Option<CostFunction> {
        match name {
            "hop" => Some(CostFunction::Hop),
            "dist" => Some(CostFunction::Distance),
            "time" => Some(CostFunction::Time),
            _ => None,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            CostFunction::Hop => "hop",
            CostFunction::Distance => "dist",
            CostFunction::Time => "time",
        }
    }

    pub fn edge_weight(&self, attributes: &EdgeAttributes) -> Weight {
        match self {
            CostFunction::Hop => 1,
            CostFunction::Distance => attributes.length(),
            CostFunction::Time => travel_time(attributes),
        }
    }

    /// Turn costs only depend on the turn type. Forbidden turns get
    /// `INFINITY`, which the searches treat as unreachable.
    pub fn turn_costs(&self, turn_type: TurnType) -> Weight {
        match turn_type {
            TurnType::UTurn | TurnType::NoEntry => INFINITY,
            _ => 0,
        }
    }
}

/// Travel time in seconds, with fallback speeds by street type for edges
/// that carry none. Clamped to `INFINITY` if the conversion overflows.
fn travel_time(attributes: &EdgeAttributes) -> Weight {
    let speed = match attributes.speed() {
        0 => match attributes.street_type() {
            StreetType::Motorway => 100,
            StreetType::Trunk => 85,
            StreetType::Primary => 70,
            StreetType::Secondary => 60,
            StreetType::Tertiary => 50,
            StreetType::Unclassified => 40,
            StreetType::Residential => 20,
            StreetType::Service => 5,
            StreetType::MotorwayLink => 60,
            StreetType::TrunkLink => 60,
            StreetType::PrimaryLink => 55,
            StreetType::SecondaryLink => 50,
            StreetType::TertiaryLink => 40,
            StreetType::LivingStreet => 5,
            StreetType::Road => 50,
            StreetType::Invalid => 30,
        },
        speed => speed as u32,
    };
    let time = (3.6 * attributes.length() as f64 / speed as f64) as u64;
    if time >= INFINITY as u64 {
        INFINITY
    } else {
        time as Weight
    }
}

/// A customized metric: overlay weights plus the stalling tables.
#[derive(Debug, PartialEq)]
pub struct Metric {
    cost_function: CostFunction,
    weights: Vec<Weight>,
    // two 16 bit offsets into `turn_table_diffs` per vertex, entry diffs in
    // the low half, exit diffs in the high half
    turn_table_ptr: Vec<u32>,
    turn_table_diffs: Vec<i32>,
}

impl Metric {
    /// Customizes the cost function onto the overlay and precomputes the
    /// deduplicated turn difference matrices.
    pub fn new(graph: &Graph, overlay: &OverlayGraph, cost_function: CostFunction) -> Metric {
        let weights = customization::compute_overlay_weights(graph, overlay, &cost_function);
        let (turn_table_ptr, turn_table_diffs) = build_turn_diff_tables(graph, &cost_function);
        Metric {
            cost_function,
            weights,
            turn_table_ptr,
            turn_table_diffs,
        }
    }

    pub fn from_parts(cost_function: CostFunction, weights: Vec<Weight>, turn_table_ptr: Vec<u32>, turn_table_diffs: Vec<i32>) -> Metric {
        Metric {
            cost_function,
            weights,
            turn_table_ptr,
            turn_table_diffs,
        }
    }

    pub fn cost_function(&self) -> &CostFunction {
        &self.cost_function
    }

    pub fn edge_weight(&self, attributes: &EdgeAttributes) -> Weight {
        self.cost_function.edge_weight(attributes)
    }

    pub fn turn_costs(&self, turn_type: TurnType) -> Weight {
        self.cost_function.turn_costs(turn_type)
    }

    /// Weight of a cell edge by its offset in the overlay weight vector.
    pub fn cell_weight(&self, offset: u32) -> Weight {
        self.weights[offset as usize]
    }

    /// `max_k { T_v(i, k) - T_v(j, k) }` for entry points `i, j` of `v`,
    /// with `offset = i * in_degree + j`. The forward stalling bound.
    pub fn max_entry_turn_diff(&self, v: NodeId, offset: u32) -> i32 {
        self.turn_table_diffs[((self.turn_table_ptr[v as usize] & 0xffff) + offset) as usize]
    }

    /// `max_k { T_v(k, i) - T_v(k, j) }` for exit points `i, j` of `v`,
    /// with `offset = i * out_degree + j`. The backward stalling bound.
    pub fn max_exit_turn_diff(&self, v: NodeId, offset: u32) -> i32 {
        self.turn_table_diffs[((self.turn_table_ptr[v as usize] >> 16) + offset) as usize]
    }

    pub fn weights(&self) -> &[Weight] {
        &self.weights
    }

    pub fn turn_table_ptrs(&self) -> &[u32] {
        &self.turn_table_ptr
    }

    pub fn turn_table_diffs(&self) -> &[i32] {
        &self.turn_table_diffs
    }
}

/// Computes per vertex the entry and exit turn difference matrices,
/// deduplicated by content. Identical matrices (the common case, since most
/// vertices share a handful of turn tables) are stored once and addressed
/// through the packed 16 bit offsets.
fn build_turn_diff_tables(graph: &Graph, cost: &CostFunction) -> (Vec<u32>, Vec<i32>) {
    let mut matrix_map: HashMap<Vec<i32>, u32> = HashMap::new();
    let mut diffs: Vec<i32> = Vec::new();
    let mut ptrs = vec![0u32; graph.num_nodes()];

    let mut intern = |matrix: Vec<i32>, diffs: &mut Vec<i32>, matrix_map: &mut HashMap<Vec<i32>, u32>| -> u32 {
        if let Some(&offset) = matrix_map.get(&matrix) {
            offset
        } else {
            let offset = diffs.len() as u32;
            diffs.extend_from_slice(&matrix);
            matrix_map.insert(matrix, offset);
            offset
        }
    };

    for v in 0..graph.num_nodes() as NodeId {
        let n = graph.in_degree(v);
        let m = graph.out_degree(v);
        if n == 0 || m == 0 {
            continue;
        }

        let turn = |entry: u32, exit: u32| cost.turn_costs(graph.turn_type(v, entry as TurnOrder, exit as TurnOrder)) as i64;

        let mut entry_diffs = vec![0i32; (n * n) as usize];
        for i in 0..n {
            for j in 0..n {
                let max_diff = (0..m).map(|k| turn(i, k) - turn(j, k)).max().unwrap();
                entry_diffs[(i * n + j) as usize] = max_diff as i32;
            }
        }

        let mut exit_diffs = vec![0i32; (m * m) as usize];
        for i in 0..m {
            for j in 0..m {
                let max_diff = (0..n).map(|k| turn(k, i) - turn(k, j)).max().unwrap();
                exit_diffs[(i * m + j) as usize] = max_diff as i32;
            }
        }

        let entry_offset = intern(entry_diffs, &mut diffs, &mut matrix_map);
        let exit_offset = intern(exit_diffs, &mut diffs, &mut matrix_map);
        debug_assert!(entry_offset <= 0xffff && exit_offset <= 0xffff);
        ptrs[v as usize] = entry_offset | (exit_offset << 16);
    }

    (ptrs, diffs)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::datastr::graph::base::VertexRecord;

    fn attr(length: Weight, speed: u8) -> EdgeAttributes {
        EdgeAttributes {
            std_attributes: (length << 12) | ((speed as u32) << 4),
            max_height: 0.0,
        }
    }

    #[test]
    fn weights_per_cost_function() {
        let attributes = attr(3600, 60);
        assert_eq!(CostFunction::Hop.edge_weight(&attributes), 1);
        assert_eq!(CostFunction::Distance.edge_weight(&attributes), 3600);
        assert_eq!(CostFunction::Time.edge_weight(&attributes), 216);
    }

    #[test]
    fn forbidden_turns_are_infinite() {
        for cost in [CostFunction::Hop, CostFunction::Distance, CostFunction::Time] {
            assert_eq!(cost.turn_costs(TurnType::UTurn), INFINITY);
            assert_eq!(cost.turn_costs(TurnType::NoEntry), INFINITY);
            assert_eq!(cost.turn_costs(TurnType::None), 0);
            assert_eq!(cost.turn_costs(TurnType::StraightOn), 0);
        }
    }

    // one vertex with 2 incoming and 2 outgoing edges and a turn restriction
    fn crossing() -> Graph {
        let vertices = vec![
            VertexRecord { first_out: 0, first_in: 0, ..Default::default() },
            VertexRecord { first_out: 1, first_in: 0, ..Default::default() },
            VertexRecord { cell_ptr: 0, turn_table_ptr: 0, first_out: 2, first_in: 0, coord: Coordinate::default() },
            VertexRecord { first_out: 4, first_in: 2, ..Default::default() },
            VertexRecord { first_out: 4, first_in: 3, ..Default::default() },
            VertexRecord { first_out: 4, first_in: 4, ..Default::default() },
        ];
        let forward = vec![
            ForwardEdge { head: 2, entry_point: 0, attributes: attr(1, 0) },
            ForwardEdge { head: 2, entry_point: 1, attributes: attr(1, 0) },
            ForwardEdge { head: 3, entry_point: 0, attributes: attr(1, 0) },
            ForwardEdge { head: 4, entry_point: 0, attributes: attr(1, 0) },
        ];
        let backward = vec![
            BackwardEdge { tail: 0, exit_point: 0, attributes: attr(1, 0) },
            BackwardEdge { tail: 1, exit_point: 0, attributes: attr(1, 0) },
            BackwardEdge { tail: 2, exit_point: 0, attributes: attr(1, 0) },
            BackwardEdge { tail: 2, exit_point: 1, attributes: attr(1, 0) },
        ];
        // entry 0 may not exit via 0, everything else is unrestricted
        let turn_tables = vec![TurnType::NoEntry, TurnType::None, TurnType::None, TurnType::None];
        let mut graph = Graph::new(vertices, forward, backward, turn_tables);
        graph.assign_cells(|_| 0);
        graph
    }

    // P5: the diff tables dominate every per-exit (per-entry) difference
    #[test]
    fn stalling_tables_are_sound() {
        let graph = crossing();
        let cost = CostFunction::Hop;
        let (ptrs, diffs) = build_turn_diff_tables(&graph, &cost);
        let metric = Metric::from_parts(cost, Vec::new(), ptrs, diffs);

        let v = 2;
        let n = graph.in_degree(v);
        let m = graph.out_degree(v);
        for i in 0..n {
            for j in 0..n {
                let bound = metric.max_entry_turn_diff(v, i * n + j);
                for k in 0..m {
                    let diff = cost.turn_costs(graph.turn_type(v, i as TurnOrder, k as TurnOrder)) as i64
                        - cost.turn_costs(graph.turn_type(v, j as TurnOrder, k as TurnOrder)) as i64;
                    assert!(bound as i64 >= diff);
                }
            }
        }
        for i in 0..m {
            for j in 0..m {
                let bound = metric.max_exit_turn_diff(v, i * m + j);
                for k in 0..n {
                    let diff = cost.turn_costs(graph.turn_type(v, k as TurnOrder, i as TurnOrder)) as i64
                        - cost.turn_costs(graph.turn_type(v, k as TurnOrder, j as TurnOrder)) as i64;
                    assert!(bound as i64 >= diff);
                }
            }
        }
    }
}
