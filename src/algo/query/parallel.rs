//! Parallel bidirectional CRP query: the forward and the backward search of
//! the bidirectional variant, each on its own worker, joined at the end.
//!
//! The two workers share the read-only graph, overlay and metric plus each
//! other's atomic distance labels. Each publishes its current frontier key
//! and the length of its best meeting; the opposite side folds those into
//! its termination bound. Frontier keys only grow, so a stale read makes
//! the bound conservative, never wrong, and the final answer is the best
//! meeting either side recorded.

use super::bidirectional::{
    extract_packed_path, settle_backward, settle_forward, Meeting, SearchContext, SearchLabels, SideScratch,
};
use super::endpoint_edges;
use super::path_unpacking::PathUnpacker;
use crate::algo::QueryResult;
use crate::datastr::graph::*;
use crate::datastr::index_heap::LabeledState;
use crate::datastr::overlay::OverlayGraph;
use crate::metrics::Metric;
use std::sync::atomic::{AtomicU32, Ordering::Relaxed};

pub struct ParallelQuery<'a> {
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

impl<'a> ParallelQuery<'a> {
    pub fn new(graph: &'a Graph, overlay: &'a OverlayGraph, metrics: &'a [Metric]) -> ParallelQuery<'a> {
        let base_space = 2 * graph.max_edges_in_cell() as usize;
        let label_space = base_space + overlay.num_vertices();
        ParallelQuery {
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

        self.forward_labels.set(setup.s_forward_local as usize, 0, self.current_round);
        self.forward.parent[setup.s_forward_local as usize] = VertexIdPair {
            vertex: ctx.s,
            id: setup.s_forward_local,
        };
        self.forward.graph_queue.push(LabeledState {
            key: 0,
            id: setup.s_forward_local,
            vertex: ctx.s,
        });

        self.backward_labels.set(setup.t_backward_local as usize, 0, self.current_round);
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
        let forward_frontier = AtomicU32::new(0);
        let backward_frontier = AtomicU32::new(0);

        let ctx_ref = &ctx;
        let forward_labels = &self.forward_labels;
        let backward_labels = &self.backward_labels;
        let forward_scratch = &mut self.forward;
        let backward_scratch = &mut self.backward;
        let best_ref = &best;
        let forward_frontier_ref = &forward_frontier;
        let backward_frontier_ref = &backward_frontier;

        let (forward_meeting, backward_meeting) = rayon::join(
            move || {
                let mut meeting = Meeting::none();
                loop {
                    let own_key = forward_scratch.min_key();
                    if own_key == INFINITY {
                        break;
                    }
                    forward_frontier_ref.store(own_key, Relaxed);
                    let tentative = best_ref.load(Relaxed);
                    if tentative < own_key.saturating_add(backward_frontier_ref.load(Relaxed)) {
                        break;
                    }
                    settle_forward(ctx_ref, forward_labels, backward_labels, forward_scratch, &mut meeting, best_ref);
                }
                meeting
            },
            move || {
                let mut meeting = Meeting::none();
                loop {
                    let own_key = backward_scratch.min_key();
                    if own_key == INFINITY {
                        break;
                    }
                    backward_frontier_ref.store(own_key, Relaxed);
                    let tentative = best_ref.load(Relaxed);
                    if tentative < own_key.saturating_add(forward_frontier_ref.load(Relaxed)) {
                        break;
                    }
                    settle_backward(ctx_ref, backward_labels, forward_labels, backward_scratch, &mut meeting, best_ref);
                }
                meeting
            },
        );

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
