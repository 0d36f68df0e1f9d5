//! Bidirectional CRP query and the search machinery shared with the parallel
//! variant.
//!
//! A forward search from the source and a backward search from the target
//! each run the unidirectional relaxation scheme on their own scratch. On the
//! base graph only the source and target cell can be touched, so base labels
//! live in a compact local id space: source cell entries in
//! `[0, max_edges_in_cell)`, target cell entries in the next block, overlay
//! ids after that. Distance and round labels are word sized atomics accessed
//! with relaxed ordering; the opposite direction reads them to detect
//! meetings. Observing a meeting a few settles late is harmless since the
//! tentative best length only tightens the termination bound.
//! Stalling tightens sibling entry (exit) labels from the metric's turn
//! difference tables before a label is expanded.

use super::endpoint_edges;
use super::path_unpacking::PathUnpacker;
use crate::algo::QueryResult;
use crate::datastr::graph::*;
use crate::datastr::index_heap::{IndexedMinHeap, LabeledState};
use crate::datastr::overlay::OverlayGraph;
use crate::metrics::Metric;
use std::sync::atomic::{AtomicU32, Ordering::Relaxed};

/// Distance and round labels of one search direction. Written by the owning
/// direction, read by both.
pub(crate) struct SearchLabels {
    dist: Vec<AtomicU32>,
    round: Vec<AtomicU32>,
}

impl SearchLabels {
    pub(crate) fn new(label_space: usize) -> SearchLabels {
        SearchLabels {
            dist: (0..label_space).map(|_| AtomicU32::new(INFINITY)).collect(),
            round: (0..label_space).map(|_| AtomicU32::new(0)).collect(),
        }
    }

    pub(crate) fn dist(&self, id: usize) -> Weight {
        self.dist[id].load(Relaxed)
    }

    pub(crate) fn round(&self, id: usize) -> u32 {
        self.round[id].load(Relaxed)
    }

    pub(crate) fn set(&self, id: usize, dist: Weight, round: u32) {
        self.dist[id].store(dist, Relaxed);
        self.round[id].store(round, Relaxed);
    }

    /// Stalling writes a bound without claiming the label for the round.
    pub(crate) fn set_dist(&self, id: usize, dist: Weight) {
        self.dist[id].store(dist, Relaxed);
    }

    pub(crate) fn reset_rounds(&self) {
        for round in &self.round {
            round.store(0, Relaxed);
        }
    }

    /// Clears the base graph block before a query. Stall bounds are written
    /// without rounds, so stale ones from the previous query must not survive.
    pub(crate) fn reset_base_dists(&self, overlay_offset: usize) {
        for dist in &self.dist[..overlay_offset] {
            dist.store(INFINITY, Relaxed);
        }
    }
}

/// Queues and parent pointers of one search direction, private to it.
pub(crate) struct SideScratch {
    pub(crate) graph_queue: IndexedMinHeap<LabeledState>,
    // the vertex slot of overlay queue entries carries the query level
    pub(crate) overlay_queue: IndexedMinHeap<LabeledState>,
    pub(crate) parent: Vec<VertexIdPair>,
}

impl SideScratch {
    pub(crate) fn new(base_space: usize, num_overlay: usize) -> SideScratch {
        SideScratch {
            graph_queue: IndexedMinHeap::new(base_space),
            overlay_queue: IndexedMinHeap::new(num_overlay),
            parent: vec![VertexIdPair::default(); base_space + num_overlay],
        }
    }

    pub(crate) fn clear(&mut self) {
        self.graph_queue.clear();
        self.overlay_queue.clear();
    }

    /// Smallest key over both queues, `INFINITY` when both are empty
    /// (real keys are always strictly smaller).
    pub(crate) fn min_key(&self) -> Weight {
        let graph_key = self.graph_queue.peek().map_or(INFINITY, |state| state.key);
        let overlay_key = self.overlay_queue.peek().map_or(INFINITY, |state| state.key);
        graph_key.min(overlay_key)
    }
}

/// The best meeting one direction has found so far.
#[derive(Debug, Clone, Copy)]
pub(crate) struct Meeting {
    pub length: Weight,
    pub forward_mid: VertexIdPair,
    pub backward_mid: VertexIdPair,
}

impl Meeting {
    pub(crate) fn none() -> Meeting {
        Meeting {
            length: 2 * INFINITY,
            forward_mid: VertexIdPair::default(),
            backward_mid: VertexIdPair::default(),
        }
    }
}

/// Everything both directions read during one query.
#[derive(Clone, Copy)]
pub(crate) struct SearchContext<'a> {
    pub(crate) graph: &'a Graph,
    pub(crate) overlay: &'a OverlayGraph,
    pub(crate) metric: &'a Metric,
    pub(crate) s: NodeId,
    pub(crate) t: NodeId,
    pub(crate) s_cell: CellNumber,
    pub(crate) t_cell: CellNumber,
    // id remap bases: entry ids for the forward, exit ids for the backward search
    pub(crate) entry_offset_s: i64,
    pub(crate) entry_offset_t: i64,
    pub(crate) exit_offset_s: i64,
    pub(crate) exit_offset_t: i64,
    pub(crate) max_edges: usize,
    pub(crate) overlay_offset: usize,
    pub(crate) current: u32,
}

impl<'a> SearchContext<'a> {
    fn forward_global_id(&self, id: u32) -> u32 {
        if (id as usize) < self.overlay_offset {
            let offset = if (id as usize) < self.max_edges { self.entry_offset_s } else { self.entry_offset_t };
            (id as i64 + offset) as u32
        } else {
            id - self.overlay_offset as u32 + self.graph.num_edges() as u32
        }
    }

    fn backward_global_id(&self, id: u32) -> u32 {
        if (id as usize) < self.overlay_offset {
            let offset = if (id as usize) < self.max_edges { self.exit_offset_s } else { self.exit_offset_t };
            (id as i64 + offset) as u32
        } else {
            id - self.overlay_offset as u32 + self.graph.num_edges() as u32
        }
    }
}

/// Settles one label of the forward search: pops the smaller of its two
/// queue heads, stalls sibling entries, relaxes outgoing edges and records
/// meetings against the backward labels.
pub(crate) fn settle_forward(
    ctx: &SearchContext,
    own: &SearchLabels,
    opposite: &SearchLabels,
    scratch: &mut SideScratch,
    meeting: &mut Meeting,
    best: &AtomicU32,
) {
    let SearchContext {
        graph,
        overlay,
        metric,
        s,
        t,
        s_cell,
        t_cell,
        current,
        ..
    } = *ctx;
    let SideScratch {
        graph_queue,
        overlay_queue,
        parent,
    } = scratch;

    let graph_key = graph_queue.peek().map_or(INFINITY, |state| state.key);
    let overlay_key = overlay_queue.peek().map_or(INFINITY, |state| state.key);
    if graph_key == INFINITY && overlay_key == INFINITY {
        return;
    }

    let mut record_meeting = |length: Weight, forward_mid: VertexIdPair, backward_mid: VertexIdPair, meeting: &mut Meeting| {
        if length < meeting.length {
            *meeting = Meeting {
                length,
                forward_mid,
                backward_mid,
            };
            best.fetch_min(length, Relaxed);
        }
    };

    if graph_key < overlay_key {
        let LabeledState { key, id: u_id, vertex: u } = graph_queue.pop().unwrap();
        let block_offset = if (u_id as usize) < ctx.max_edges { ctx.entry_offset_s } else { ctx.entry_offset_t };
        let entry_point = (u_id as i64 + block_offset - graph.entry_offset(u) as i64) as TurnOrder;
        debug_assert!((entry_point as u32) < graph.in_degree(u));

        // stalling: arrival at this entry bounds the other entries of u
        let in_degree = graph.in_degree(u);
        let diff_row = in_degree * entry_point as u32;
        let local_base = (graph.entry_offset(u) as i64 - block_offset) as usize;
        for j in 0..in_degree {
            let entry_id = local_base + j as usize;
            if own.round(entry_id) < current {
                let bound = (key as i64 + metric.max_entry_turn_diff(u, diff_row + j) as i64).max(0) as Weight;
                if bound < own.dist(entry_id) {
                    own.set_dist(entry_id, bound);
                }
            }
        }

        graph.for_out_edges_of(u, entry_point, |edge, _exit_point, turn_type| {
            let v = edge.head;
            let v_level = overlay.query_level(s_cell, t_cell, graph.cell_number(v));
            let turn_costs = if u == s || u == t { 0 } else { metric.turn_costs(turn_type) };
            let new_dist = key + turn_costs + metric.edge_weight(&edge.attributes);
            if new_dist >= INFINITY {
                return;
            }

            if v_level == 0 {
                let in_source_cell = graph.cell_number(v) == s_cell;
                let cell_offset = if in_source_cell { ctx.entry_offset_s } else { ctx.entry_offset_t };
                let v_id = (graph.entry_offset(v) as i64 + edge.entry_point as i64 - cell_offset) as usize;
                relax_forward_base(
                    ctx,
                    own,
                    opposite,
                    graph_queue,
                    parent,
                    &mut record_meeting,
                    meeting,
                    v,
                    v_id,
                    edge.entry_point,
                    in_source_cell,
                    new_dist,
                    VertexIdPair { vertex: u, id: u_id },
                );
            } else {
                let v_overlay = graph.overlay_vertex(v, edge.entry_point, false);
                let v_id = v_overlay as usize + ctx.overlay_offset;
                if own.round(v_id) < current || new_dist < own.dist(v_id) {
                    own.set(v_id, new_dist, current);
                    overlay_queue.push_or_decrease(LabeledState {
                        key: new_dist,
                        id: v_overlay,
                        vertex: v_level as NodeId,
                    });
                    parent[v_id] = VertexIdPair { vertex: u, id: u_id };
                    if opposite.round(v_id) == current {
                        let length = new_dist.saturating_add(opposite.dist(v_id));
                        let mid = VertexIdPair { vertex: v, id: v_id as u32 };
                        record_meeting(length, mid, mid, meeting);
                    }
                }
            }
        });
    } else {
        let LabeledState { key, id: u_overlay, vertex: level } = overlay_queue.pop().unwrap();
        let u_id = u_overlay as usize + ctx.overlay_offset;
        let u_original = overlay.vertex(u_overlay).original_vertex;

        overlay.for_out_neighbors_of(u_overlay, level as Level, |v_overlay, weight_offset| {
            let new_dist = key + metric.cell_weight(weight_offset);
            if new_dist >= INFINITY {
                return;
            }
            let v_id = v_overlay as usize + ctx.overlay_offset;
            if own.round(v_id) < current || new_dist < own.dist(v_id) {
                own.set(v_id, new_dist, current);
                parent[v_id] = VertexIdPair {
                    vertex: u_original,
                    id: u_id as u32,
                };

                // traverse the boundary edge into the next cell
                let v_vertex = overlay.vertex(v_overlay);
                let edge = graph.forward_edge(v_vertex.original_edge);
                let crossed = new_dist + metric.edge_weight(&edge.attributes);
                if crossed >= INFINITY {
                    return;
                }
                let w_overlay = v_vertex.neighbor_overlay;
                let w_vertex = overlay.vertex(w_overlay);
                let w_level = overlay.query_level(s_cell, t_cell, w_vertex.cell_number);

                if w_level == 0 {
                    // back on the base graph near source or target
                    let w = w_vertex.original_vertex;
                    let in_source_cell = w_vertex.cell_number == s_cell;
                    let cell_offset = if in_source_cell { ctx.entry_offset_s } else { ctx.entry_offset_t };
                    let w_id = (graph.entry_offset(w) as i64 + edge.entry_point as i64 - cell_offset) as usize;
                    relax_forward_base(
                        ctx,
                        own,
                        opposite,
                        graph_queue,
                        parent,
                        &mut record_meeting,
                        meeting,
                        w,
                        w_id,
                        edge.entry_point,
                        in_source_cell,
                        crossed,
                        VertexIdPair {
                            vertex: v_vertex.original_vertex,
                            id: v_id as u32,
                        },
                    );
                } else {
                    let w_id = w_overlay as usize + ctx.overlay_offset;
                    if own.round(w_id) < current || crossed < own.dist(w_id) {
                        own.set(w_id, crossed, current);
                        overlay_queue.push_or_decrease(LabeledState {
                            key: crossed,
                            id: w_overlay,
                            vertex: w_level as NodeId,
                        });
                        parent[w_id] = VertexIdPair {
                            vertex: v_vertex.original_vertex,
                            id: v_id as u32,
                        };
                        if opposite.round(w_id) == current {
                            let length = crossed.saturating_add(opposite.dist(w_id));
                            let mid = VertexIdPair {
                                vertex: w_vertex.original_vertex,
                                id: w_id as u32,
                            };
                            record_meeting(length, mid, mid, meeting);
                        }
                    }
                }
            }
        });
    }
}

/// Updates a forward base label and scans the exits of the head vertex for a
/// meeting with backward labels of the current round.
#[allow(clippy::too_many_arguments)]
fn relax_forward_base(
    ctx: &SearchContext,
    own: &SearchLabels,
    opposite: &SearchLabels,
    graph_queue: &mut IndexedMinHeap<LabeledState>,
    parent: &mut [VertexIdPair],
    record_meeting: &mut impl FnMut(Weight, VertexIdPair, VertexIdPair, &mut Meeting),
    meeting: &mut Meeting,
    v: NodeId,
    v_id: usize,
    entry_point: TurnOrder,
    in_source_cell: bool,
    new_dist: Weight,
    from: VertexIdPair,
) {
    let graph = ctx.graph;
    let metric = ctx.metric;
    let current = ctx.current;

    // an unclaimed label may still carry a stall bound proving this entry useless
    if own.round(v_id) < current && new_dist > own.dist(v_id) {
        return;
    }
    if own.round(v_id) >= current && new_dist >= own.dist(v_id) {
        return;
    }
    own.set(v_id, new_dist, current);
    graph_queue.push_or_decrease(LabeledState {
        key: new_dist,
        id: v_id as u32,
        vertex: v,
    });
    parent[v_id] = from;

    // did the backward search already reach an exit of v?
    let exit_cell_offset = if in_source_cell { ctx.exit_offset_s } else { ctx.exit_offset_t };
    let mut exit_id = (graph.exit_offset(v) as i64 - exit_cell_offset) as usize;
    graph.for_out_edges_of(v, entry_point, |_, _exit_point, turn_type| {
        if opposite.round(exit_id) == current {
            let turn_costs = if v == ctx.s || v == ctx.t { 0 } else { metric.turn_costs(turn_type) };
            let length = new_dist.saturating_add(turn_costs).saturating_add(opposite.dist(exit_id));
            record_meeting(
                length,
                VertexIdPair { vertex: v, id: v_id as u32 },
                VertexIdPair { vertex: v, id: exit_id as u32 },
                meeting,
            );
        }
        exit_id += 1;
    });
}

/// Settles one label of the backward search. Mirror image of
/// `settle_forward`: labels are exit points, relaxation walks incoming edges
/// and the boundary edges are traversed against their direction.
pub(crate) fn settle_backward(
    ctx: &SearchContext,
    own: &SearchLabels,
    opposite: &SearchLabels,
    scratch: &mut SideScratch,
    meeting: &mut Meeting,
    best: &AtomicU32,
) {
    let SearchContext {
        graph,
        overlay,
        metric,
        s,
        t,
        s_cell,
        t_cell,
        current,
        ..
    } = *ctx;
    let SideScratch {
        graph_queue,
        overlay_queue,
        parent,
    } = scratch;

    let graph_key = graph_queue.peek().map_or(INFINITY, |state| state.key);
    let overlay_key = overlay_queue.peek().map_or(INFINITY, |state| state.key);
    if graph_key == INFINITY && overlay_key == INFINITY {
        return;
    }

    let mut record_meeting = |length: Weight, forward_mid: VertexIdPair, backward_mid: VertexIdPair, meeting: &mut Meeting| {
        if length < meeting.length {
            *meeting = Meeting {
                length,
                forward_mid,
                backward_mid,
            };
            best.fetch_min(length, Relaxed);
        }
    };

    if graph_key < overlay_key {
        let LabeledState { key, id: u_id, vertex: u } = graph_queue.pop().unwrap();
        let block_offset = if (u_id as usize) < ctx.max_edges { ctx.exit_offset_s } else { ctx.exit_offset_t };
        let exit_point = (u_id as i64 + block_offset - graph.exit_offset(u) as i64) as TurnOrder;
        debug_assert!((exit_point as u32) < graph.out_degree(u));

        // stalling over the sibling exits of u
        let out_degree = graph.out_degree(u);
        let diff_row = out_degree * exit_point as u32;
        let local_base = (graph.exit_offset(u) as i64 - block_offset) as usize;
        for j in 0..out_degree {
            let exit_id = local_base + j as usize;
            if own.round(exit_id) < current {
                let bound = (key as i64 + metric.max_exit_turn_diff(u, diff_row + j) as i64).max(0) as Weight;
                if bound < own.dist(exit_id) {
                    own.set_dist(exit_id, bound);
                }
            }
        }

        graph.for_in_edges_of(u, exit_point, |edge, _entry_point, turn_type| {
            let v = edge.tail;
            let v_level = overlay.query_level(s_cell, t_cell, graph.cell_number(v));
            let turn_costs = if u == t || u == s { 0 } else { metric.turn_costs(turn_type) };
            let new_dist = key + turn_costs + metric.edge_weight(&edge.attributes);
            if new_dist >= INFINITY {
                return;
            }

            if v_level == 0 {
                let in_source_cell = graph.cell_number(v) == s_cell;
                let cell_offset = if in_source_cell { ctx.exit_offset_s } else { ctx.exit_offset_t };
                let v_id = (graph.exit_offset(v) as i64 + edge.exit_point as i64 - cell_offset) as usize;
                relax_backward_base(
                    ctx,
                    own,
                    opposite,
                    graph_queue,
                    parent,
                    &mut record_meeting,
                    meeting,
                    v,
                    v_id,
                    edge.exit_point,
                    in_source_cell,
                    new_dist,
                    VertexIdPair { vertex: u, id: u_id },
                );
            } else {
                let v_overlay = graph.overlay_vertex(v, edge.exit_point, true);
                let v_id = v_overlay as usize + ctx.overlay_offset;
                if own.round(v_id) < current || new_dist < own.dist(v_id) {
                    own.set(v_id, new_dist, current);
                    overlay_queue.push_or_decrease(LabeledState {
                        key: new_dist,
                        id: v_overlay,
                        vertex: v_level as NodeId,
                    });
                    parent[v_id] = VertexIdPair { vertex: u, id: u_id };
                    if opposite.round(v_id) == current {
                        let length = new_dist.saturating_add(opposite.dist(v_id));
                        let mid = VertexIdPair { vertex: v, id: v_id as u32 };
                        record_meeting(length, mid, mid, meeting);
                    }
                }
            }
        });
    } else {
        let LabeledState { key, id: u_overlay, vertex: level } = overlay_queue.pop().unwrap();
        let u_id = u_overlay as usize + ctx.overlay_offset;
        let u_original = overlay.vertex(u_overlay).original_vertex;

        overlay.for_in_neighbors_of(u_overlay, level as Level, |v_overlay, weight_offset| {
            let new_dist = key + metric.cell_weight(weight_offset);
            if new_dist >= INFINITY {
                return;
            }
            let v_id = v_overlay as usize + ctx.overlay_offset;
            if own.round(v_id) < current || new_dist < own.dist(v_id) {
                own.set(v_id, new_dist, current);
                parent[v_id] = VertexIdPair {
                    vertex: u_original,
                    id: u_id as u32,
                };

                // traverse the boundary edge backwards into the previous cell
                let v_vertex = overlay.vertex(v_overlay);
                let edge = *graph.backward_edge(v_vertex.original_edge);
                let crossed = new_dist + metric.edge_weight(&edge.attributes);
                if crossed >= INFINITY {
                    return;
                }
                let w_overlay = v_vertex.neighbor_overlay;
                let w_vertex = overlay.vertex(w_overlay);
                let w_level = overlay.query_level(s_cell, t_cell, w_vertex.cell_number);

                if w_level == 0 {
                    let w = w_vertex.original_vertex;
                    let in_source_cell = w_vertex.cell_number == s_cell;
                    let cell_offset = if in_source_cell { ctx.exit_offset_s } else { ctx.exit_offset_t };
                    let w_id = (graph.exit_offset(w) as i64 + edge.exit_point as i64 - cell_offset) as usize;
                    relax_backward_base(
                        ctx,
                        own,
                        opposite,
                        graph_queue,
                        parent,
                        &mut record_meeting,
                        meeting,
                        w,
                        w_id,
                        edge.exit_point,
                        in_source_cell,
                        crossed,
                        VertexIdPair {
                            vertex: v_vertex.original_vertex,
                            id: v_id as u32,
                        },
                    );
                } else {
                    let w_id = w_overlay as usize + ctx.overlay_offset;
                    if own.round(w_id) < current || crossed < own.dist(w_id) {
                        own.set(w_id, crossed, current);
                        overlay_queue.push_or_decrease(LabeledState {
                            key: crossed,
                            id: w_overlay,
                            vertex: w_level as NodeId,
                        });
                        parent[w_id] = VertexIdPair {
                            vertex: v_vertex.original_vertex,
                            id: v_id as u32,
                        };
                        if opposite.round(w_id) == current {
                            let length = crossed.saturating_add(opposite.dist(w_id));
                            let mid = VertexIdPair {
                                vertex: w_vertex.original_vertex,
                                id: w_id as u32,
                            };
                            record_meeting(length, mid, mid, meeting);
                        }
                    }
                }
            }
        });
    }
}

/// Updates a backward base label and scans the entries of the tail vertex
/// for a meeting with forward labels of the current round.
#[allow(clippy::too_many_arguments)]
fn relax_backward_base(
    ctx: &SearchContext,
    own: &SearchLabels,
    opposite: &SearchLabels,
    graph_queue: &mut IndexedMinHeap<LabeledState>,
    parent: &mut [VertexIdPair],
    record_meeting: &mut impl FnMut(Weight, VertexIdPair, VertexIdPair, &mut Meeting),
    meeting: &mut Meeting,
    v: NodeId,
    v_id: usize,
    exit_point: TurnOrder,
    in_source_cell: bool,
    new_dist: Weight,
    from: VertexIdPair,
) {
    let graph = ctx.graph;
    let metric = ctx.metric;
    let current = ctx.current;

    if own.round(v_id) < current && new_dist > own.dist(v_id) {
        return;
    }
    if own.round(v_id) >= current && new_dist >= own.dist(v_id) {
        return;
    }
    own.set(v_id, new_dist, current);
    graph_queue.push_or_decrease(LabeledState {
        key: new_dist,
        id: v_id as u32,
        vertex: v,
    });
    parent[v_id] = from;

    // did the forward search already reach an entry of v?
    let entry_cell_offset = if in_source_cell { ctx.entry_offset_s } else { ctx.entry_offset_t };
    let mut entry_id = (graph.entry_offset(v) as i64 - entry_cell_offset) as usize;
    graph.for_in_edges_of(v, exit_point, |_, _entry_point, turn_type| {
        if opposite.round(entry_id) == current {
            let turn_costs = if v == ctx.s || v == ctx.t { 0 } else { metric.turn_costs(turn_type) };
            let length = opposite.dist(entry_id).saturating_add(turn_costs).saturating_add(new_dist);
            record_meeting(
                length,
                VertexIdPair { vertex: v, id: entry_id as u32 },
                VertexIdPair { vertex: v, id: v_id as u32 },
                meeting,
            );
        }
        entry_id += 1;
    });
}

/// Per query setup shared by the sequential and parallel variant.
pub(crate) struct QuerySetup {
    pub s_global: u32,
    pub t_global: u32,
    pub s_forward_local: u32,
    pub t_backward_local: u32,
}

impl<'a> SearchContext<'a> {
    pub(crate) fn prepare(
        graph: &'a Graph,
        overlay: &'a OverlayGraph,
        metric: &'a Metric,
        source_edge: EdgeId,
        target_edge: EdgeId,
        current: u32,
    ) -> (SearchContext<'a>, QuerySetup) {
        let max_edges = graph.max_edges_in_cell() as usize;
        let s = graph.forward_edge(source_edge).head;
        let s_global = graph.entry_offset(s) + graph.forward_edge(source_edge).entry_point as EdgeId;
        let s_cell = graph.cell_number(s);
        let t = graph.backward_edge(target_edge).tail;
        let t_cell = graph.cell_number(t);
        let t_global = graph.exit_offset(t) + graph.backward_edge(target_edge).exit_point as EdgeId;

        let entry_offset_s = graph.backward_edge_cell_offset(s) as i64;
        let entry_offset_t = graph.backward_edge_cell_offset(t) as i64 - max_edges as i64;
        let exit_offset_s = graph.forward_edge_cell_offset(s) as i64;
        let exit_offset_t = graph.forward_edge_cell_offset(t) as i64 - max_edges as i64;

        let s_forward_local = (s_global as i64 - entry_offset_s) as u32;
        let t_backward_local = (t_global as i64 - if s_cell == t_cell { exit_offset_s } else { exit_offset_t }) as u32;
        debug_assert!((s_forward_local as usize) < max_edges);
        debug_assert!((t_backward_local as usize) < 2 * max_edges);

        (
            SearchContext {
                graph,
                overlay,
                metric,
                s,
                t,
                s_cell,
                t_cell,
                entry_offset_s,
                entry_offset_t,
                exit_offset_s,
                exit_offset_t,
                max_edges,
                overlay_offset: 2 * max_edges,
                current,
            },
            QuerySetup {
                s_global,
                t_global,
                s_forward_local,
                t_backward_local,
            },
        )
    }
}

/// Converts the two parent chains into a packed path in global ids, ready
/// for unpacking: source first half, meeting point, target second half. The
/// meeting vertex is contributed once, by the backward half; meetings at an
/// endpoint, where one half collapses to the endpoint itself, must not emit
/// that endpoint a second time.
pub(crate) fn extract_packed_path(
    ctx: &SearchContext,
    setup: &QuerySetup,
    forward_parent: &[VertexIdPair],
    backward_parent: &[VertexIdPair],
    meeting: &Meeting,
) -> Vec<VertexIdPair> {
    let mut id_path = Vec::new();

    let mut current = meeting.forward_mid.id;
    while forward_parent[current as usize].id != setup.s_forward_local {
        let pair = forward_parent[current as usize];
        id_path.push(VertexIdPair {
            vertex: pair.vertex,
            id: ctx.forward_global_id(pair.id),
        });
        current = pair.id;
    }
    id_path.push(VertexIdPair {
        vertex: ctx.s,
        id: setup.s_global,
    });
    id_path.reverse();

    // a meeting at the source itself is already covered by the source pair
    let met_at_source = meeting.forward_mid.id == setup.s_forward_local
        && meeting.backward_mid.vertex == ctx.s
        && (meeting.backward_mid.id as usize) < ctx.overlay_offset;
    if !met_at_source {
        id_path.push(VertexIdPair {
            vertex: meeting.backward_mid.vertex,
            id: ctx.backward_global_id(meeting.backward_mid.id),
        });
    }
    let mut current = meeting.backward_mid.id;
    while backward_parent[current as usize].id != setup.t_backward_local {
        let pair = backward_parent[current as usize];
        id_path.push(VertexIdPair {
            vertex: pair.vertex,
            id: ctx.backward_global_id(pair.id),
        });
        current = pair.id;
    }
    // unless the meeting hit the target's own label, which is already in
    if meeting.backward_mid.id != setup.t_backward_local {
        id_path.push(VertexIdPair {
            vertex: ctx.t,
            id: setup.t_global,
        });
    }

    id_path
}

/// Sequential bidirectional CRP query: both searches share one thread and
/// the direction with the smaller frontier is advanced first.
pub struct BidirectionalQuery<'a> {
    graph: &'a Graph,
    overlay: &'a OverlayGraph,
    metrics: &'a [Metric],
    forward_labels: SearchLabels,
    backward_labels: SearchLabels,
    forward: SideScratch,
    backward: SideScratch,
    current_round: u32,
    unpacker: PathUnpacker<'a>,
}

impl<'a> BidirectionalQuery<'a> {
    pub fn new(graph: &'a Graph, overlay: &'a OverlayGraph, metrics: &'a [Metric]) -> BidirectionalQuery<'a> {
        let base_space = 2 * graph.max_edges_in_cell() as usize;
        let label_space = base_space + overlay.num_vertices();
        BidirectionalQuery {
            graph,
            overlay,
            metrics,
            forward_labels: SearchLabels::new(label_space),
            backward_labels: SearchLabels::new(label_space),
            forward: SideScratch::new(base_space, overlay.num_vertices()),
            backward: SideScratch::new(base_space, overlay.num_vertices()),
            current_round: 0,
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
        let metrics = self.metrics;
        let metric = &metrics[metric_id];

        if self.current_round == u32::MAX {
            self.forward_labels.reset_rounds();
            self.backward_labels.reset_rounds();
            self.current_round = 0;
        }
        self.current_round += 1;
        self.forward.clear();
        self.backward.clear();

        let (ctx, setup) = SearchContext::prepare(graph, self.overlay, metric, source_edge, target_edge, self.current_round);
        if ctx.s == ctx.t {
            return QueryResult {
                path: vec![ctx.s],
                distance: 0,
            };
        }

        self.forward_labels.reset_base_dists(ctx.overlay_offset);
        self.backward_labels.reset_base_dists(ctx.overlay_offset);

        self.forward_labels.set(setup.s_forward_local as usize, 0, ctx.current);
        self.forward.parent[setup.s_forward_local as usize] = VertexIdPair {
            vertex: ctx.s,
            id: setup.s_forward_local,
        };
        self.forward.graph_queue.push(LabeledState {
            key: 0,
            id: setup.s_forward_local,
            vertex: ctx.s,
        });

        self.backward_labels.set(setup.t_backward_local as usize, 0, ctx.current);
        self.backward.parent[setup.t_backward_local as usize] = VertexIdPair {
            vertex: ctx.t,
            id: setup.t_backward_local,
        };
        self.backward.graph_queue.push(LabeledState {
            key: 0,
            id: setup.t_backward_local,
            vertex: ctx.t,
        });

        let best = AtomicU32::new(2 * INFINITY);
        let mut forward_meeting = Meeting::none();
        let mut backward_meeting = Meeting::none();

        loop {
            let forward_key = self.forward.min_key();
            let backward_key = self.backward.min_key();
            if forward_key == INFINITY && backward_key == INFINITY {
                break;
            }
            let tentative = forward_meeting.length.min(backward_meeting.length);
            if tentative < forward_key.saturating_add(backward_key) {
                break;
            }
            if forward_key <= backward_key {
                settle_forward(
                    &ctx,
                    &self.forward_labels,
                    &self.backward_labels,
                    &mut self.forward,
                    &mut forward_meeting,
                    &best,
                );
            } else {
                settle_backward(
                    &ctx,
                    &self.backward_labels,
                    &self.forward_labels,
                    &mut self.backward,
                    &mut backward_meeting,
                    &best,
                );
            }
        }
        self.forward.clear();
        self.backward.clear();

        let meeting = if forward_meeting.length <= backward_meeting.length {
            forward_meeting
        } else {
            backward_meeting
        };
        if meeting.length >= INFINITY {
            return QueryResult::unreachable();
        }

        let id_path = extract_packed_path(&ctx, &setup, &self.forward.parent, &self.backward.parent, &meeting);
        let path = self.unpacker.unpack(&id_path, ctx.s_cell, ctx.t_cell, metric);
        QueryResult {
            path,
            distance: meeting.length,
        }
    }
}
