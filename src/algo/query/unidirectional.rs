//! Unidirectional CRP query.
//!
//! One Dijkstra from the source entry point, relaxing base graph edges while
//! the head's query level is 0 and overlay cell edges everywhere else. Two
//! queues coexist because base labels are entry point ids and overlay labels
//! are overlay ids; the search always settles the globally smallest key.

use super::path_unpacking::PathUnpacker;
use super::endpoint_edges;
use crate::algo::QueryResult;
use crate::datastr::graph::*;
use crate::datastr::index_heap::{IndexedMinHeap, LabeledState, State};
use crate::datastr::overlay::OverlayGraph;
use crate::metrics::Metric;

pub struct UnidirectionalQuery<'a> {
    graph: &'a Graph,
    overlay: &'a OverlayGraph,
    metrics: &'a [Metric],
    // labels: entry point ids first, overlay ids shifted by the edge count
    dist: Vec<Weight>,
    round: Vec<u32>,
    parent: Vec<VertexIdPair>,
    current_round: u32,
    graph_queue: IndexedMinHeap<LabeledState>,
    overlay_queue: IndexedMinHeap<State>,
    unpacker: PathUnpacker<'a>,
}

impl<'a> UnidirectionalQuery<'a> {
    pub fn new(graph: &'a Graph, overlay: &'a OverlayGraph, metrics: &'a [Metric]) -> UnidirectionalQuery<'a> {
        let label_space = graph.num_edges() + overlay.num_vertices();
        UnidirectionalQuery {
            graph,
            overlay,
            metrics,
            dist: vec![INFINITY; label_space],
            round: vec![0; label_space],
            parent: vec![VertexIdPair::default(); label_space],
            current_round: 0,
            graph_queue: IndexedMinHeap::new(graph.num_edges()),
            overlay_queue: IndexedMinHeap::new(overlay.num_vertices()),
            unpacker: PathUnpacker::new(graph, overlay),
        }
    }

    pub fn vertex_query(&mut self, source: NodeId, target: NodeId, metric_id: usize) -> QueryResult {
        match endpoint_edges(self.graph, source, target) {
            Some((source_edge, target_edge)) => self.edge_query(source_edge, target_edge, metric_id),
            None => QueryResult::unreachable(),
        }
    }

    pub fn edge_query(&mut self, source_edge: EdgeId, target_edge: EdgeId, metric_id: usize) -> QueryResult {
        let graph = self.graph;
        let overlay = self.overlay;
        let metrics = self.metrics;
        let metric = &metrics[metric_id];
        let m = graph.num_edges() as u32;

        if self.current_round == u32::MAX {
            self.round.iter_mut().for_each(|round| *round = 0);
            self.current_round = 0;
        }
        self.current_round += 1;
        let current = self.current_round;
        self.graph_queue.clear();
        self.overlay_queue.clear();

        let s = graph.forward_edge(source_edge).head;
        let s_id = graph.entry_offset(s) + graph.forward_edge(source_edge).entry_point as EdgeId;
        let s_cell = graph.cell_number(s);
        let t = graph.backward_edge(target_edge).tail;
        let t_cell = graph.cell_number(t);
        let mut t_id = INVALID_ID;

        let mut shortest = 2 * INFINITY;
        let dist = &mut self.dist;
        let round = &mut self.round;
        let parent = &mut self.parent;
        let graph_queue = &mut self.graph_queue;
        let overlay_queue = &mut self.overlay_queue;

        dist[s_id as usize] = 0;
        round[s_id as usize] = current;
        parent[s_id as usize] = VertexIdPair { vertex: s, id: s_id };
        graph_queue.push(LabeledState { key: 0, id: s_id, vertex: s });

        while !graph_queue.is_empty() || !overlay_queue.is_empty() {
            let graph_key = graph_queue.peek().map(|state| state.key);
            let overlay_key = overlay_queue.peek().map(|state| state.key);
            let settle_base = match (graph_key, overlay_key) {
                (Some(g), Some(o)) => g < o,
                (Some(_), None) => true,
                _ => false,
            };

            if settle_base {
                let LabeledState { key, id: u_id, vertex: u } = graph_queue.pop().unwrap();
                if key > shortest {
                    break;
                }
                if u == t && key < shortest {
                    shortest = key;
                    t_id = u_id;
                }

                let entry_point = graph.entry_order(u, u_id);
                graph.for_out_edges_of(u, entry_point, |edge, _exit_point, turn_type| {
                    let v = edge.head;
                    let v_level = overlay.query_level(s_cell, t_cell, graph.cell_number(v));
                    let turn_costs = if u == s || u == t { 0 } else { metric.turn_costs(turn_type) };
                    let new_dist = key + turn_costs + metric.edge_weight(&edge.attributes);
                    if new_dist >= INFINITY {
                        return;
                    }

                    if v_level == 0 {
                        let v_id = graph.entry_offset(v) + edge.entry_point as EdgeId;
                        if round[v_id as usize] < current || new_dist < dist[v_id as usize] {
                            dist[v_id as usize] = new_dist;
                            round[v_id as usize] = current;
                            parent[v_id as usize] = VertexIdPair { vertex: u, id: u_id };
                            graph_queue.push_or_decrease(LabeledState {
                                key: new_dist,
                                id: v_id,
                                vertex: v,
                            });
                        }
                    } else {
                        let v_overlay = graph.overlay_vertex(v, edge.entry_point, false);
                        let v_id = v_overlay + m;
                        if round[v_id as usize] < current || new_dist < dist[v_id as usize] {
                            dist[v_id as usize] = new_dist;
                            round[v_id as usize] = current;
                            parent[v_id as usize] = VertexIdPair { vertex: u, id: u_id };
                            overlay_queue.push_or_decrease(State {
                                key: new_dist,
                                id: v_overlay,
                            });
                        }
                    }
                });
            } else {
                let State { key, id: u_overlay } = overlay_queue.pop().unwrap();
                let u_id = u_overlay + m;
                if key > shortest {
                    break;
                }

                let u_level = overlay.query_level(s_cell, t_cell, overlay.vertex(u_overlay).cell_number);
                overlay.for_out_neighbors_of(u_overlay, u_level, |v_overlay, weight_offset| {
                    let new_dist = key + metric.cell_weight(weight_offset);
                    if new_dist >= INFINITY {
                        return;
                    }
                    let v_id = v_overlay + m;
                    if round[v_id as usize] < current || new_dist < dist[v_id as usize] {
                        dist[v_id as usize] = new_dist;
                        round[v_id as usize] = current;
                        parent[v_id as usize] = VertexIdPair {
                            vertex: overlay.vertex(u_overlay).original_vertex,
                            id: u_id,
                        };

                        // traverse the boundary edge into the next cell
                        let v_vertex = overlay.vertex(v_overlay);
                        let w_overlay = v_vertex.neighbor_overlay;
                        let edge = graph.forward_edge(v_vertex.original_edge);
                        let crossed = new_dist + metric.edge_weight(&edge.attributes);
                        if crossed >= INFINITY {
                            return;
                        }
                        let w_level = overlay.query_level(s_cell, t_cell, overlay.vertex(w_overlay).cell_number);

                        if w_level == 0 {
                            // back on the base graph near source or target
                            let w = overlay.vertex(w_overlay).original_vertex;
                            let w_id = graph.entry_offset(w) + edge.entry_point as EdgeId;
                            if round[w_id as usize] < current || crossed < dist[w_id as usize] {
                                dist[w_id as usize] = crossed;
                                round[w_id as usize] = current;
                                parent[w_id as usize] = VertexIdPair {
                                    vertex: v_vertex.original_vertex,
                                    id: v_id,
                                };
                                graph_queue.push_or_decrease(LabeledState {
                                    key: crossed,
                                    id: w_id,
                                    vertex: w,
                                });
                            }
                        } else {
                            let w_id = w_overlay + m;
                            if round[w_id as usize] < current || crossed < dist[w_id as usize] {
                                dist[w_id as usize] = crossed;
                                round[w_id as usize] = current;
                                parent[w_id as usize] = VertexIdPair {
                                    vertex: v_vertex.original_vertex,
                                    id: v_id,
                                };
                                overlay_queue.push_or_decrease(State {
                                    key: crossed,
                                    id: w_overlay,
                                });
                            }
                        }
                    }
                });
            }
        }
        self.graph_queue.clear();
        self.overlay_queue.clear();

        if shortest >= INFINITY {
            return QueryResult::unreachable();
        }

        let mut id_path = vec![VertexIdPair { vertex: t, id: t_id }];
        let mut u_id = t_id;
        while u_id != s_id {
            id_path.push(self.parent[u_id as usize]);
            u_id = self.parent[u_id as usize].id;
        }
        id_path.reverse();

        let path = self.unpacker.unpack(&id_path, s_cell, t_cell, metric);
        QueryResult { path, distance: shortest }
    }
}
