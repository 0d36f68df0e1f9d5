// Runs random vertex queries against all three CRP query implementations
// and reports running times plus a distance checksum.
//
// Usage: crp_queries <num_queries> <graph_file> <overlay_file> <metric_file> <hop|dist|time>

#[macro_use]
extern crate crp_engine;

use crp_engine::algo::query::{BidirectionalQuery, ParallelQuery, UnidirectionalQuery};
use crp_engine::algo::QueryResult;
use crp_engine::cli::CliErr;
use crp_engine::datastr::graph::NodeId;
use crp_engine::io;
use crp_engine::metrics::CostFunction;
use crp_engine::report::*;
use rand::prelude::*;
use std::env;
use std::error::Error;

fn run_queries(name: &str, queries: &[(NodeId, NodeId)], mut query: impl FnMut(NodeId, NodeId) -> QueryResult) -> u64 {
    let _context = push_context(name);
    let mut checksum = 0u64;
    let (_, time) = measure(|| {
        for &(source, target) in queries {
            checksum = checksum.wrapping_add(query(source, target).distance as u64);
        }
    });
    report!("distance_checksum", checksum);
    report!("running_time_ms", time.as_secs_f64() * 1000.0);
    if !queries.is_empty() {
        report!("avg_query_time_ms", time.as_secs_f64() * 1000.0 / queries.len() as f64);
    }
    checksum
}

fn main() -> Result<(), Box<dyn Error>> {
    let _reporter = enable_reporting("crp_queries");

    let mut args = env::args().skip(1);
    let num_queries: usize = args.next().ok_or(CliErr("no query count given"))?.parse()?;
    let graph_path = args.next().ok_or(CliErr("no graph file given"))?;
    let overlay_path = args.next().ok_or(CliErr("no overlay file given"))?;
    let metric_path = args.next().ok_or(CliErr("no metric file given"))?;
    let metric_type = args.next().ok_or(CliErr("no metric type given"))?;
    let cost_function = CostFunction::from_name(&metric_type).ok_or(CliErr("unknown metric type"))?;

    let graph = report_time("reading graph", || io::read_graph(&graph_path))?;
    let overlay = io::read_overlay_graph(&overlay_path)?;
    let metrics = vec![io::read_metric(&metric_path, cost_function)?];

    let mut rng = thread_rng();
    let queries: Vec<(NodeId, NodeId)> = (0..num_queries)
        .map(|_| {
            (
                rng.gen_range(0..graph.num_nodes() as NodeId),
                rng.gen_range(0..graph.num_nodes() as NodeId),
            )
        })
        .collect();

    let mut unidirectional = UnidirectionalQuery::new(&graph, &overlay, &metrics);
    let mut bidirectional = BidirectionalQuery::new(&graph, &overlay, &metrics);
    let mut parallel = ParallelQuery::new(&graph, &overlay, &metrics);

    let uni_checksum = run_queries("unidirectional", &queries, |s, t| unidirectional.vertex_query(s, t, 0));
    let bi_checksum = run_queries("bidirectional", &queries, |s, t| bidirectional.vertex_query(s, t, 0));
    let par_checksum = run_queries("parallel", &queries, |s, t| parallel.vertex_query(s, t, 0));

    if uni_checksum != bi_checksum || uni_checksum != par_checksum {
        return Err(Box::new(CliErr("query implementations disagree")));
    }

    Ok(())
}
