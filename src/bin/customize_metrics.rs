// Customizes one or all cost functions onto a preprocessed graph/overlay
// pair and writes the resulting metric files.
//
// Usage: customize_metrics <graph_file> <overlay_file> <metric_output_prefix> <hop|dist|time|all>

#[macro_use]
extern crate crp_engine;

use crp_engine::cli::CliErr;
use crp_engine::io;
use crp_engine::metrics::{CostFunction, Metric};
use crp_engine::report::*;
use std::env;
use std::error::Error;

fn main() -> Result<(), Box<dyn Error>> {
    let _reporter = enable_reporting("customize_metrics");

    let mut args = env::args().skip(1);
    let graph_path = args.next().ok_or(CliErr("no graph file given"))?;
    let overlay_path = args.next().ok_or(CliErr("no overlay file given"))?;
    let metric_prefix = args.next().ok_or(CliErr("no metric output prefix given"))?;
    let metric_type = args.next().ok_or(CliErr("no metric type given"))?;

    let graph = report_time("reading graph", || io::read_graph(&graph_path))?;
    let overlay = io::read_overlay_graph(&overlay_path)?;

    let cost_functions = match metric_type.as_str() {
        "all" => vec![CostFunction::Hop, CostFunction::Distance, CostFunction::Time],
        name => vec![CostFunction::from_name(name).ok_or(CliErr("unknown metric type"))?],
    };

    for cost_function in cost_functions {
        let _context = push_context(cost_function.name());
        let metric = report_time_with_key("customization", "customization_running_time_ms", || {
            Metric::new(&graph, &overlay, cost_function)
        });
        io::write_metric(&metric, format!("{}{}", metric_prefix, cost_function.name()))?;
    }

    Ok(())
}
