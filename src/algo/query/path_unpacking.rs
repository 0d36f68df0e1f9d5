//! Recursive expansion of packed query paths down to base graph vertices.
//!
//! A query returns `(vertex, id)` pairs where ids below the edge count are
//! base graph entry/exit points and larger ids are overlay vertices shifted
//! by the edge count. Base pairs are copied verbatim; each consecutive pair
//! of overlay ids forms an (entry, exit) pair within one cell on the query
//! level and is expanded by re-running small Dijkstras: over the sub-cells
//! on level `l - 1`, and on the base graph inside a single level 1 cell.

use crate::datastr::graph::*;
use crate::datastr::index_heap::{IndexedMinHeap, LabeledState, State};
use crate::datastr::overlay::OverlayGraph;
use crate::metrics::Metric;

pub struct PathUnpacker<'a> {
    graph: &'a Graph,
    overlay: &'a OverlayGraph,
    // shared by the base graph searches (indexed by backward edge id) and the
    // overlay searches (indexed by overlay id); the round counter keeps the
    // two id spaces from ever observing each other's stale labels
    dist: Vec<Weight>,
    round: Vec<u32>,
    parent: Vec<VertexIdPair>,
    current_round: u32,
    graph_queue: IndexedMinHeap<LabeledState>,
    overlay_queue: IndexedMinHeap<State>,
}

impl<'a> PathUnpacker<'a> {
    pub fn new(graph: &'a Graph, overlay: &'a OverlayGraph) -> PathUnpacker<'a> {
        let label_space = graph.num_edges() + overlay.num_vertices();
        PathUnpacker {
            graph,
            overlay,
            dist: vec![INFINITY; label_space],
            round: vec![0; label_space],
            parent: vec![VertexIdPair::default(); label_space],
            current_round: 0,
            graph_queue: IndexedMinHeap::new(graph.num_edges()),
            overlay_queue: IndexedMinHeap::new(overlay.num_vertices()),
        }
    }

    fn advance_round(&mut self) -> u32 {
        if self.current_round == u32::MAX {
            self.round.iter_mut().for_each(|round| *round = 0);
            self.current_round = 0;
        }
        self.current_round += 1;
        self.current_round
    }

    /// Expands a packed path into the full base vertex sequence.
    pub fn unpack(&mut self, packed: &[VertexIdPair], s_cell: CellNumber, t_cell: CellNumber, metric: &Metric) -> Vec<NodeId> {
        let m = self.graph.num_edges() as u32;
        let mut result = Vec::new();

        let mut i = 0;
        while i < packed.len() {
            let pair = packed[i];
            if pair.id < m {
                result.push(pair.vertex);
                i += 1;
            } else {
                let entry = pair.id - m;
                let cell_number = self.overlay.vertex(entry).cell_number;
                let level = self.overlay.query_level(s_cell, t_cell, cell_number);
                i += 1;
                // overlay vertices always come in (entry, exit) pairs, an odd
                // tail means the search handed us a corrupted path
                assert!(i < packed.len(), "dangling overlay entry in packed path");
                assert!(packed[i].id >= m, "overlay entry paired with a base id");
                let exit = packed[i].id - m;
                self.unpack_in_cell(entry, exit, level, metric, &mut result);
                i += 1;
            }
        }
        result
    }

    /// Expands the overlay path segment between an entry and an exit vertex
    /// of the same level `l` cell.
    fn unpack_in_cell(&mut self, source: u32, target: u32, l: Level, metric: &Metric, result: &mut Vec<NodeId>) {
        if l == 1 {
            let source_edge = self.overlay.vertex(source).original_edge;
            let neighbor_of_target = self.overlay.vertex(target).neighbor_overlay;
            let target_edge = self.overlay.vertex(neighbor_of_target).original_edge;
            self.unpack_in_lowest_level_cell(source_edge, target_edge, metric, result);
            return;
        }

        let graph = self.graph;
        let overlay = self.overlay;
        let level_info = overlay.level_info();
        let truncated = level_info.truncate_to_level(overlay.vertex(source).cell_number, l);
        debug_assert_eq!(truncated, level_info.truncate_to_level(overlay.vertex(target).cell_number, l));

        let current = self.advance_round();
        let dist = &mut self.dist;
        let round = &mut self.round;
        let parent = &mut self.parent;
        let queue = &mut self.overlay_queue;

        dist[source as usize] = 0;
        round[source as usize] = current;
        // the queue holds entry points of sub-cells plus the target exit
        queue.push(State { key: 0, id: source });

        while let Some(State { key, id }) = queue.pop() {
            debug_assert_eq!(dist[id as usize], key);
            if id == target {
                break;
            }

            overlay.for_out_neighbors_of(id, l - 1, |exit, weight_offset| {
                let new_dist = key + metric.cell_weight(weight_offset);
                if round[exit as usize] == current && dist[exit as usize] <= new_dist {
                    return;
                }
                dist[exit as usize] = new_dist;
                round[exit as usize] = current;
                parent[exit as usize] = VertexIdPair {
                    vertex: overlay.vertex(id).original_vertex,
                    id,
                };
                if exit == target {
                    queue.push_or_decrease(State { key: new_dist, id: exit });
                }

                // cross into the next sub-cell unless that leaves the cell
                let entry = overlay.vertex(exit).neighbor_overlay;
                if level_info.truncate_to_level(overlay.vertex(entry).cell_number, l) != truncated {
                    return;
                }
                let edge = graph.forward_edge(overlay.vertex(exit).original_edge);
                let entry_dist = new_dist + metric.edge_weight(&edge.attributes);
                if round[entry as usize] == current && dist[entry as usize] <= entry_dist {
                    return;
                }
                dist[entry as usize] = entry_dist;
                round[entry as usize] = current;
                parent[entry as usize] = VertexIdPair {
                    vertex: overlay.vertex(exit).original_vertex,
                    id: exit,
                };
                queue.push_or_decrease(State { key: entry_dist, id: entry });
            });
        }
        self.overlay_queue.clear();

        assert!(
            self.round[target as usize] == current,
            "packed path names an exit unreachable from its entry"
        );

        // the parent chain alternates exit and entry vertices
        let mut overlay_path = vec![target];
        let mut u = target;
        while u != source {
            u = self.parent[u as usize].id;
            overlay_path.push(u);
        }
        assert_eq!(overlay_path.len() % 2, 0, "overlay path in cell has odd length");

        for pair in overlay_path.rchunks(2) {
            // reversed chunks: pair[1] preceded pair[0] on the path
            self.unpack_in_cell(pair[1], pair[0], l - 1, metric, result);
        }
    }

    /// The recursion base: a turn aware Dijkstra over entry point labels
    /// restricted to one level 1 cell, from the boundary edge entering the
    /// cell to the boundary edge leaving it. Appends the vertex chain from
    /// the cell's entry vertex up to the tail of the leaving edge.
    fn unpack_in_lowest_level_cell(&mut self, source_edge: EdgeId, target_edge: EdgeId, metric: &Metric, result: &mut Vec<NodeId>) {
        let graph = self.graph;
        let source_vertex = graph.head_of_backward_edge(source_edge);
        let cell_number = graph.cell_number(source_vertex);
        debug_assert_eq!(graph.cell_number(graph.backward_edge(target_edge).tail), cell_number);

        let current = self.advance_round();
        let dist = &mut self.dist;
        let round = &mut self.round;
        let parent = &mut self.parent;
        let queue = &mut self.graph_queue;

        dist[source_edge as usize] = 0;
        round[source_edge as usize] = current;
        queue.push(LabeledState {
            key: 0,
            id: source_edge,
            vertex: source_vertex,
        });

        while let Some(LabeledState { key, id, vertex: u }) = queue.pop() {
            debug_assert_eq!(dist[id as usize], key);
            if id == target_edge {
                break;
            }

            let entry_point = graph.entry_order(u, id);
            graph.for_out_edges_of(u, entry_point, |edge, _exit_point, turn_type| {
                let head = edge.head;
                let head_id = graph.entry_offset(head) + edge.entry_point as EdgeId;
                if graph.cell_number(head) != cell_number && head_id != target_edge {
                    return;
                }
                let new_dist = key + metric.turn_costs(turn_type) + metric.edge_weight(&edge.attributes);
                if new_dist >= INFINITY {
                    return;
                }
                if round[head_id as usize] == current && dist[head_id as usize] <= new_dist {
                    return;
                }
                dist[head_id as usize] = new_dist;
                round[head_id as usize] = current;
                parent[head_id as usize] = VertexIdPair { vertex: u, id };
                queue.push_or_decrease(LabeledState {
                    key: new_dist,
                    id: head_id,
                    vertex: head,
                });
            });
        }
        self.graph_queue.clear();

        assert!(
            self.round[target_edge as usize] == current,
            "packed path crosses a cell its boundary edges cannot"
        );

        let mut path = Vec::new();
        let mut u_id = target_edge;
        while self.parent[u_id as usize].id != source_edge {
            path.push(self.parent[u_id as usize].vertex);
            u_id = self.parent[u_id as usize].id;
        }
        path.push(self.parent[u_id as usize].vertex);
        result.extend(path.iter().rev());
    }
}
