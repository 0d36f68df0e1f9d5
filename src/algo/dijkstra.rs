//! Plain turn aware Dijkstra on the base graph.
//!
//! No overlay involved, every relaxation pays the full turn cost except at
//! the query endpoints. This is the reference all CRP query variants must
//! agree with, and a usable (if slow) query implementation in its own right.

use super::query::endpoint_edges;
use super::QueryResult;
use crate::datastr::graph::*;
use crate::datastr::index_heap::{IndexedMinHeap, LabeledState};
use crate::metrics::Metric;

pub struct DijkstraQuery<'a> {
    graph: &'a Graph,
    metrics: &'a [Metric],
    dist: Vec<Weight>,
    round: Vec<u32>,
    parent: Vec<VertexIdPair>,
    current_round: u32,
    queue: IndexedMinHeap<LabeledState>,
}

impl<'a> DijkstraQuery<'a> {
    pub fn new(graph: &'a Graph, metrics: &'a [Metric]) -> DijkstraQuery<'a> {
        let m = graph.num_edges();
        DijkstraQuery {
            graph,
            metrics,
            dist: vec![INFINITY; m],
            round: vec![0; m],
            parent: vec![VertexIdPair::default(); m],
            current_round: 0,
            queue: IndexedMinHeap::new(m),
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
            self.round.iter_mut().for_each(|round| *round = 0);
            self.current_round = 0;
        }
        self.current_round += 1;
        let current = self.current_round;
        self.queue.clear();

        let s = graph.forward_edge(source_edge).head;
        let s_id = graph.entry_offset(s) + graph.forward_edge(source_edge).entry_point as EdgeId;
        let t = graph.backward_edge(target_edge).tail;
        let mut t_id = INVALID_ID;

        let mut shortest = 2 * INFINITY;
        let dist = &mut self.dist;
        let round = &mut self.round;
        let parent = &mut self.parent;
        let queue = &mut self.queue;

        dist[s_id as usize] = 0;
        round[s_id as usize] = current;
        parent[s_id as usize] = VertexIdPair { vertex: s, id: s_id };
        queue.push(LabeledState { key: 0, id: s_id, vertex: s });

        while let Some(LabeledState { key, id: u_id, vertex: u }) = queue.pop() {
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
                let turn_costs = if u == s || u == t { 0 } else { metric.turn_costs(turn_type) };
                let new_dist = key + turn_costs + metric.edge_weight(&edge.attributes);
                if new_dist >= INFINITY {
                    return;
                }

                let v_id = graph.entry_offset(v) + edge.entry_point as EdgeId;
                if round[v_id as usize] < current || new_dist < dist[v_id as usize] {
                    dist[v_id as usize] = new_dist;
                    round[v_id as usize] = current;
                    parent[v_id as usize] = VertexIdPair { vertex: u, id: u_id };
                    queue.push_or_decrease(LabeledState {
                        key: new_dist,
                        id: v_id,
                        vertex: v,
                    });
                }
            });
        }
        self.queue.clear();

        if shortest >= INFINITY {
            return QueryResult::unreachable();
        }

        let mut path = vec![t];
        let mut u_id = t_id;
        while u_id != s_id {
            path.push(self.parent[u_id as usize].vertex);
            u_id = self.parent[u_id as usize].id;
        }
        path.reverse();

        QueryResult { path, distance: shortest }
    }
}
