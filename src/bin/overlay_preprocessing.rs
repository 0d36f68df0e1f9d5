// Reads a base graph and a multi-level partition, assigns cell numbers,
// groups the graph by level-0 cell and builds the overlay graph.
//
// Usage: overlay_preprocessing <graph_file> <mlp_file> <output_dir>

#[macro_use]
extern crate crp_engine;

use crp_engine::cli::CliErr;
use crp_engine::datastr::overlay::OverlayGraph;
use crp_engine::io;
use crp_engine::report::*;
use std::env;
use std::error::Error;
use std::path::Path;

fn main() -> Result<(), Box<dyn Error>> {
    let _reporter = enable_reporting("overlay_preprocessing");

    let mut args = env::args().skip(1);
    let graph_path = args.next().ok_or(CliErr("no graph file given"))?;
    let mlp_path = args.next().ok_or(CliErr("no partition file given"))?;
    let output_dir = args.next().ok_or(CliErr("no output directory given"))?;

    let mut graph = report_time("reading graph", || io::read_graph(&graph_path))?;
    let mlp = io::read_partition(&mlp_path)?;
    report!("num_nodes", graph.num_nodes());
    report!("num_edges", graph.num_edges());
    report!("num_levels", mlp.num_levels());

    graph.assign_cells(|u| mlp.cell_number(u));
    report_time("sorting graph by cell", || graph.sort_by_cell())?;

    let overlay = report_time("building overlay graph", || OverlayGraph::construct(&mut graph, &mlp));
    report!("num_overlay_vertices", overlay.num_vertices());
    report!("weight_vector_size", overlay.weight_vector_size());

    let graph_name = Path::new(&graph_path)
        .file_name()
        .ok_or(CliErr("graph file has no file name"))?;
    let output_dir = Path::new(&output_dir);
    io::write_graph(&graph, output_dir.join(graph_name))?;
    io::write_overlay_graph(&overlay, output_dir.join(graph_name).with_extension("overlay"))?;

    Ok(())
}
