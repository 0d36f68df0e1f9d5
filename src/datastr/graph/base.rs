//! The turn aware base graph.
//!
//! Vertices and edges are stored CSR style: a vertex record holds the offsets
//! of its first outgoing and first incoming edge, a sentinel record terminates
//! the ranges. Every edge exists twice, once in the forward and once in the
//! backward edge array, and the two copies reference each other through the
//! entry/exit ordinals. Turn costs are looked up in dense per-vertex matrices
//! which are deduplicated across vertices and shared by offset.

use super::*;
use std::collections::HashMap;
use std::error::Error;
use std::fmt;

/// Raised when the offline sort by cell produces offsets which do not line up
/// with the edge arrays. Indicates corrupted input data.
#[derive(Debug)]
pub struct InternalInconsistency(pub &'static str);

impl fmt::Display for InternalInconsistency {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "internal inconsistency: {}", self.0)
    }
}

impl Error for InternalInconsistency {}

/// Per vertex data. `cell_ptr` points into the deduplicated cell number table,
/// `turn_table_ptr` into the shared turn table storage.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct VertexRecord {
    pub cell_ptr: u32,
    pub turn_table_ptr: u32,
    pub first_out: EdgeId,
    pub first_in: EdgeId,
    pub coord: Coordinate,
}

#[derive(Debug, Default, PartialEq)]
pub struct Graph {
    // n + 1 entries, the last one is a sentinel terminating both edge ranges
    vertices: Vec<VertexRecord>,
    forward_edges: Vec<ForwardEdge>,
    backward_edges: Vec<BackwardEdge>,
    turn_tables: Vec<TurnType>,
    // deduplicated packed cell numbers, indexed through VertexRecord::cell_ptr
    cell_numbers: Vec<CellNumber>,
    max_edges_in_cell: u32,
    forward_edge_cell_offset: Vec<EdgeId>,
    backward_edge_cell_offset: Vec<EdgeId>,
    // entry/exit points of the base graph -> overlay vertex ids
    overlay_vertices: HashMap<SubVertex, u32>,
}

impl Graph {
    pub fn new(vertices: Vec<VertexRecord>, forward_edges: Vec<ForwardEdge>, backward_edges: Vec<BackwardEdge>, turn_tables: Vec<TurnType>) -> Graph {
        assert!(!vertices.is_empty());
        assert_eq!(forward_edges.len(), backward_edges.len());
        assert_eq!(vertices.last().unwrap().first_out as usize, forward_edges.len());
        assert_eq!(vertices.last().unwrap().first_in as usize, backward_edges.len());

        let graph = Graph {
            vertices,
            forward_edges,
            backward_edges,
            turn_tables,
            ..Default::default()
        };
        graph.debug_check_edge_pairing();
        graph
    }

    /// Reassemble a graph from the parts of the on-disk format.
    #[allow(clippy::too_many_arguments)]
    pub fn from_parts(
        vertices: Vec<VertexRecord>,
        forward_edges: Vec<ForwardEdge>,
        backward_edges: Vec<BackwardEdge>,
        turn_tables: Vec<TurnType>,
        cell_numbers: Vec<CellNumber>,
        overlay_vertices: HashMap<SubVertex, u32>,
        max_edges_in_cell: u32,
        forward_edge_cell_offset: Vec<EdgeId>,
        backward_edge_cell_offset: Vec<EdgeId>,
    ) -> Graph {
        let graph = Graph {
            vertices,
            forward_edges,
            backward_edges,
            turn_tables,
            cell_numbers,
            max_edges_in_cell,
            forward_edge_cell_offset,
            backward_edge_cell_offset,
            overlay_vertices,
        };
        graph.debug_check_edge_pairing();
        graph
    }

    fn debug_check_edge_pairing(&self) {
        if cfg!(debug_assertions) {
            for u in 0..self.num_nodes() as NodeId {
                for e in self.exit_offset(u)..self.exit_offset(u + 1) {
                    let fwd = &self.forward_edges[e as usize];
                    let bwd = &self.backward_edges[(self.entry_offset(fwd.head) + fwd.entry_point as EdgeId) as usize];
                    debug_assert_eq!(bwd.tail, u);
                    debug_assert_eq!(bwd.exit_point as EdgeId, e - self.exit_offset(u));
                }
            }
        }
    }

    pub fn num_nodes(&self) -> usize {
        self.vertices.len() - 1
    }

    pub fn num_edges(&self) -> usize {
        self.forward_edges.len()
    }

    pub fn out_degree(&self, u: NodeId) -> u32 {
        self.vertices[u as usize + 1].first_out - self.vertices[u as usize].first_out
    }

    pub fn in_degree(&self, u: NodeId) -> u32 {
        self.vertices[u as usize + 1].first_in - self.vertices[u as usize].first_in
    }

    /// Offset of `u`s first outgoing edge, the base of its exit point ids.
    pub fn exit_offset(&self, u: NodeId) -> EdgeId {
        self.vertices[u as usize].first_out
    }

    /// Offset of `u`s first incoming edge, the base of its entry point ids.
    pub fn entry_offset(&self, u: NodeId) -> EdgeId {
        self.vertices[u as usize].first_in
    }

    pub fn forward_edge(&self, e: EdgeId) -> &ForwardEdge {
        &self.forward_edges[e as usize]
    }

    pub fn backward_edge(&self, e: EdgeId) -> &BackwardEdge {
        &self.backward_edges[e as usize]
    }

    /// The head vertex of the edge stored as backward edge `e`.
    pub fn head_of_backward_edge(&self, e: EdgeId) -> NodeId {
        let backward = self.backward_edge(e);
        let forward = self.forward_edge(self.exit_offset(backward.tail) + backward.exit_point as EdgeId);
        forward.head
    }

    /// The tail vertex of the edge stored as forward edge `e`.
    pub fn tail_of_forward_edge(&self, e: EdgeId) -> NodeId {
        let forward = self.forward_edge(e);
        let backward = self.backward_edge(self.entry_offset(forward.head) + forward.entry_point as EdgeId);
        backward.tail
    }

    /// Ordinal of forward edge `e` among the outgoing edges of its tail `u`.
    pub fn exit_order(&self, u: NodeId, e: EdgeId) -> TurnOrder {
        debug_assert!(self.exit_offset(u) <= e && e < self.exit_offset(u + 1));
        (e - self.exit_offset(u)) as TurnOrder
    }

    /// Ordinal of backward edge `e` among the incoming edges of its head `v`.
    pub fn entry_order(&self, v: NodeId, e: EdgeId) -> TurnOrder {
        debug_assert!(self.entry_offset(v) <= e && e < self.entry_offset(v + 1));
        (e - self.entry_offset(v)) as TurnOrder
    }

    pub fn turn_type(&self, u: NodeId, entry_point: TurnOrder, exit_point: TurnOrder) -> TurnType {
        debug_assert!((entry_point as u32) < self.in_degree(u));
        debug_assert!((exit_point as u32) < self.out_degree(u));
        let offset = self.vertices[u as usize].turn_table_ptr + entry_point as u32 * self.out_degree(u) + exit_point as u32;
        self.turn_tables[offset as usize]
    }

    pub fn cell_number(&self, u: NodeId) -> CellNumber {
        self.cell_numbers[self.vertices[u as usize].cell_ptr as usize]
    }

    /// Looks up the overlay vertex sitting at the given entry/exit point.
    /// Only valid for boundary points, which is guaranteed by construction
    /// for every lookup the searches perform.
    pub fn overlay_vertex(&self, u: NodeId, turn_order: TurnOrder, exit: bool) -> u32 {
        self.overlay_vertices[&SubVertex { vertex: u, turn_order, exit }]
    }

    pub fn max_edges_in_cell(&self) -> u32 {
        self.max_edges_in_cell
    }

    /// Base of the forward edge ids of the level-0 cell `v` belongs to.
    pub fn forward_edge_cell_offset(&self, v: NodeId) -> EdgeId {
        self.forward_edge_cell_offset[self.vertices[v as usize].cell_ptr as usize]
    }

    /// Base of the backward edge ids of the level-0 cell `v` belongs to.
    pub fn backward_edge_cell_offset(&self, v: NodeId) -> EdgeId {
        self.backward_edge_cell_offset[self.vertices[v as usize].cell_ptr as usize]
    }

    pub fn set_overlay_mapping(&mut self, mapping: HashMap<SubVertex, u32>) {
        self.overlay_vertices = mapping;
    }

    /// Iterates over all outgoing edges of `u` together with their exit
    /// ordinal and the turn type from the given entry point, walking the edge
    /// range and the turn table row in lock-step.
    pub fn for_out_edges_of(&self, u: NodeId, entry_point: TurnOrder, mut handle: impl FnMut(&ForwardEdge, TurnOrder, TurnType)) {
        let mut turn_table_offset = self.vertices[u as usize].turn_table_ptr + entry_point as u32 * self.out_degree(u);
        let mut exit_point = 0;
        for e in self.exit_offset(u)..self.exit_offset(u + 1) {
            handle(&self.forward_edges[e as usize], exit_point, self.turn_tables[turn_table_offset as usize]);
            exit_point += 1;
            turn_table_offset += 1;
        }
    }

    /// Iterates over all incoming edges of `v` together with their entry
    /// ordinal and the turn type towards the given exit point. The turn table
    /// is walked in column steps of the out degree.
    pub fn for_in_edges_of(&self, v: NodeId, exit_point: TurnOrder, mut handle: impl FnMut(&BackwardEdge, TurnOrder, TurnType)) {
        let out_deg = self.out_degree(v);
        let mut turn_table_offset = self.vertices[v as usize].turn_table_ptr + exit_point as u32;
        let mut entry_point = 0;
        for e in self.entry_offset(v)..self.entry_offset(v + 1) {
            handle(&self.backward_edges[e as usize], entry_point, self.turn_tables[turn_table_offset as usize]);
            entry_point += 1;
            turn_table_offset += out_deg;
        }
    }

    /// Iterates over all edges as `(tail, head, forward_edge_id)` triples.
    pub fn for_edges(&self, mut handle: impl FnMut(NodeId, NodeId, EdgeId)) {
        for u in 0..self.num_nodes() as NodeId {
            for e in self.exit_offset(u)..self.exit_offset(u + 1) {
                handle(u, self.forward_edges[e as usize].head, e);
            }
        }
    }

    /// Finds the backward edge id of the edge `(u, v)` by scanning the
    /// incoming edges of `v`. Slow, only used during overlay construction.
    pub fn find_backward_edge(&self, u: NodeId, v: NodeId) -> Option<EdgeId> {
        (self.entry_offset(v)..self.entry_offset(v + 1)).find(|&e| self.backward_edges[e as usize].tail == u)
    }

    /// Assigns every vertex its packed cell number from the partition,
    /// deduplicating the numbers into a shared table.
    pub fn assign_cells(&mut self, cell_number_of: impl Fn(NodeId) -> CellNumber) {
        let mut cell_numbers = Vec::new();
        let mut table: HashMap<CellNumber, u32> = HashMap::new();
        for u in 0..self.num_nodes() {
            let cell_number = cell_number_of(u as NodeId);
            let ptr = *table.entry(cell_number).or_insert_with(|| {
                cell_numbers.push(cell_number);
                cell_numbers.len() as u32 - 1
            });
            self.vertices[u].cell_ptr = ptr;
        }
        self.cell_numbers = cell_numbers;
    }

    /// Permutes the vertex array so that vertices sharing a level-0 cell are
    /// contiguous, rewrites the edge arrays accordingly and records per-cell
    /// edge base offsets plus the maximum edge count over all cells. Searches
    /// use the offsets to map global edge ids into small per-cell id spaces.
    pub fn sort_by_cell(&mut self) -> Result<(), InternalInconsistency> {
        let num_cells = self.cell_numbers.len();
        let n = self.num_nodes();

        let mut cell_vertices: Vec<Vec<NodeId>> = vec![Vec::new(); num_cells];
        let mut num_forward_in_cell = vec![0u32; num_cells];
        let mut num_backward_in_cell = vec![0u32; num_cells];

        self.max_edges_in_cell = 0;
        for u in 0..n {
            let cell = self.vertices[u].cell_ptr as usize;
            cell_vertices[cell].push(u as NodeId);
            num_forward_in_cell[cell] += self.out_degree(u as NodeId);
            num_backward_in_cell[cell] += self.in_degree(u as NodeId);
            self.max_edges_in_cell = self.max_edges_in_cell.max(num_forward_in_cell[cell]).max(num_backward_in_cell[cell]);
        }

        let mut new_id = vec![INVALID_ID; n];
        let mut next = 0;
        for vertices in &cell_vertices {
            for &old in vertices {
                new_id[old as usize] = next;
                next += 1;
            }
        }
        if next as usize != n {
            return Err(InternalInconsistency("cell grouping lost vertices"));
        }

        let mut vertices = vec![VertexRecord::default(); n + 1];
        let mut forward_edges = Vec::with_capacity(self.forward_edges.len());
        let mut backward_edges = Vec::with_capacity(self.backward_edges.len());
        self.forward_edge_cell_offset = vec![0; num_cells];
        self.backward_edge_cell_offset = vec![0; num_cells];

        let mut v_id = 0;
        for (cell, members) in cell_vertices.iter().enumerate() {
            self.forward_edge_cell_offset[cell] = forward_edges.len() as EdgeId;
            self.backward_edge_cell_offset[cell] = backward_edges.len() as EdgeId;
            for &old in members {
                let mut record = self.vertices[old as usize];
                record.first_out = forward_edges.len() as EdgeId;
                record.first_in = backward_edges.len() as EdgeId;
                vertices[v_id] = record;
                v_id += 1;

                for e in self.exit_offset(old)..self.exit_offset(old + 1) {
                    let mut edge = self.forward_edges[e as usize];
                    edge.head = new_id[edge.head as usize];
                    forward_edges.push(edge);
                }
                for e in self.entry_offset(old)..self.entry_offset(old + 1) {
                    let mut edge = self.backward_edges[e as usize];
                    edge.tail = new_id[edge.tail as usize];
                    backward_edges.push(edge);
                }
            }
        }

        if forward_edges.len() != self.forward_edges.len() || backward_edges.len() != self.backward_edges.len() {
            return Err(InternalInconsistency("edge offsets do not match array sizes"));
        }
        vertices[n] = VertexRecord {
            first_out: forward_edges.len() as EdgeId,
            first_in: backward_edges.len() as EdgeId,
            ..Default::default()
        };

        self.vertices = vertices;
        self.forward_edges = forward_edges;
        self.backward_edges = backward_edges;
        Ok(())
    }

    // raw accessors for serialization

    pub fn vertex(&self, u: NodeId) -> &VertexRecord {
        &self.vertices[u as usize]
    }

    pub fn cell_numbers(&self) -> &[CellNumber] {
        &self.cell_numbers
    }

    pub fn turn_tables(&self) -> &[TurnType] {
        &self.turn_tables
    }

    pub fn overlay_mappings(&self) -> impl Iterator<Item = (&SubVertex, &u32)> {
        self.overlay_vertices.iter()
    }

    pub fn num_overlay_mappings(&self) -> usize {
        self.overlay_vertices.len()
    }

    pub fn forward_edge_cell_offsets(&self) -> &[EdgeId] {
        &self.forward_edge_cell_offset
    }

    pub fn backward_edge_cell_offsets(&self) -> &[EdgeId] {
        &self.backward_edge_cell_offset
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn attr(length: Weight) -> EdgeAttributes {
        EdgeAttributes {
            std_attributes: length << 12,
            max_height: 0.0,
        }
    }

    // 0 -> 1 -> 2 and 2 -> 0, two cells {0, 1} and {2}
    fn tiny_graph() -> Graph {
        let vertices = vec![
            VertexRecord { cell_ptr: 0, turn_table_ptr: 0, first_out: 0, first_in: 0, coord: Coordinate::default() },
            VertexRecord { cell_ptr: 0, turn_table_ptr: 0, first_out: 1, first_in: 1, coord: Coordinate::default() },
            VertexRecord { cell_ptr: 1, turn_table_ptr: 0, first_out: 2, first_in: 2, coord: Coordinate::default() },
            VertexRecord { first_out: 3, first_in: 3, ..Default::default() },
        ];
        let forward = vec![
            ForwardEdge { head: 1, entry_point: 0, attributes: attr(1) },
            ForwardEdge { head: 2, entry_point: 0, attributes: attr(2) },
            ForwardEdge { head: 0, entry_point: 0, attributes: attr(3) },
        ];
        let backward = vec![
            BackwardEdge { tail: 2, exit_point: 0, attributes: attr(3) },
            BackwardEdge { tail: 0, exit_point: 0, attributes: attr(1) },
            BackwardEdge { tail: 1, exit_point: 0, attributes: attr(2) },
        ];
        let mut graph = Graph::new(vertices, forward, backward, vec![TurnType::None]);
        graph.assign_cells(|u| if u < 2 { 0 } else { 1 });
        graph
    }

    #[test]
    fn degrees_and_offsets() {
        let graph = tiny_graph();
        assert_eq!(graph.num_nodes(), 3);
        assert_eq!(graph.num_edges(), 3);
        assert_eq!(graph.out_degree(0), 1);
        assert_eq!(graph.in_degree(0), 1);
        assert_eq!(graph.exit_offset(1), 1);
        assert_eq!(graph.entry_offset(2), 2);
        assert_eq!(graph.head_of_backward_edge(1), 1);
        assert_eq!(graph.tail_of_forward_edge(1), 1);
    }

    #[test]
    fn sort_by_cell_records_offsets() {
        let mut graph = tiny_graph();
        graph.sort_by_cell().unwrap();
        assert_eq!(graph.max_edges_in_cell(), 2);
        assert_eq!(graph.forward_edge_cell_offsets(), &[0, 2]);
        assert_eq!(graph.backward_edge_cell_offsets(), &[0, 2]);
        // edges stay paired after the permutation
        for u in 0..graph.num_nodes() as NodeId {
            for e in graph.exit_offset(u)..graph.exit_offset(u + 1) {
                let fwd = *graph.forward_edge(e);
                let bwd = graph.backward_edge(graph.entry_offset(fwd.head) + fwd.entry_point as EdgeId);
                assert_eq!(bwd.tail, u);
            }
        }
    }
}
