//! The three CRP query variants and path unpacking.
//!
//! All queries share the same semantic contract: `edge_query(s_edge, t_edge)`
//! returns a minimum cost path from the head of the source edge to the tail
//! of the target edge, `vertex_query(s, t)` synthesizes the two edges from
//! arbitrary incident edges and therefore never charges turn costs at the
//! endpoints.

use crate::datastr::graph::*;

pub mod bidirectional;
pub mod parallel;
pub mod path_unpacking;
pub mod unidirectional;

pub use self::bidirectional::BidirectionalQuery;
pub use self::parallel::ParallelQuery;
pub use self::path_unpacking::PathUnpacker;
pub use self::unidirectional::UnidirectionalQuery;

/// Picks the edges a vertex query runs between: any incoming edge of the
/// source and any outgoing edge of the target. Returns `None` if the source
/// has no incoming or the target no outgoing edge, in which case no edge
/// query can be synthesized and the pair is reported unreachable.
pub(crate) fn endpoint_edges(graph: &Graph, source: NodeId, target: NodeId) -> Option<(EdgeId, EdgeId)> {
    if graph.in_degree(source) == 0 || graph.out_degree(target) == 0 {
        return None;
    }
    let backward_to_source = graph.backward_edge(graph.entry_offset(source));
    let source_edge = graph.exit_offset(backward_to_source.tail) + backward_to_source.exit_point as EdgeId;

    let forward_from_target = graph.forward_edge(graph.exit_offset(target));
    let target_edge = graph.entry_offset(forward_from_target.head) + forward_from_target.entry_point as EdgeId;

    Some((source_edge, target_edge))
}
