//! Reading and writing the on-disk formats: the bzip2 compressed base graph,
//! the plain text overlay graph, metric and multi-level partition files.
//!
//! All formats are line oriented text. Malformed input surfaces as
//! `io::ErrorKind::InvalidData`; loading never panics. Writers emit map
//! backed data in a deterministic order so that write/read/write cycles
//! produce identical files.

use crate::datastr::graph::base::VertexRecord;
use crate::datastr::graph::*;
use crate::datastr::overlay::{Cell, OverlayGraph, OverlayVertex};
use crate::datastr::partition::{LevelInfo, MultiLevelPartition};
use crate::metrics::{CostFunction, Metric};
use bzip2::read::BzDecoder;
use bzip2::write::BzEncoder;
use bzip2::Compression;
use std::collections::HashMap;
use std::fs::File;
use std::io::{self, BufRead, BufReader, BufWriter, Write};
use std::path::Path;
use std::str::FromStr;

fn invalid_data(message: impl Into<String>) -> io::Error {
    io::Error::new(io::ErrorKind::InvalidData, message.into())
}

fn parse<T: FromStr>(token: &str) -> io::Result<T> {
    token.parse().map_err(|_| invalid_data(format!("malformed number {:?}", token)))
}

fn parse_all<T: FromStr>(line: &str) -> io::Result<Vec<T>> {
    line.split_whitespace().map(parse).collect()
}

struct Lines<R> {
    reader: R,
    buf: String,
}

impl<R: BufRead> Lines<R> {
    fn new(reader: R) -> Lines<R> {
        Lines { reader, buf: String::new() }
    }

    fn next(&mut self) -> io::Result<&str> {
        self.buf.clear();
        let read = self.reader.read_line(&mut self.buf)?;
        if read == 0 {
            return Err(invalid_data("unexpected end of file"));
        }
        Ok(self.buf.trim_end())
    }

    /// Next line split into exactly `n` parsed tokens.
    fn fixed<T: FromStr, const N: usize>(&mut self) -> io::Result<[T; N]> {
        let tokens = parse_all(self.next()?)?;
        tokens
            .try_into()
            .map_err(|_| invalid_data(format!("expected {} fields", N)))
    }
}

// base graph

pub fn write_graph<P: AsRef<Path>>(graph: &Graph, path: P) -> io::Result<()> {
    let file = File::create(path)?;
    let mut out = BufWriter::new(BzEncoder::new(file, Compression::default()));

    writeln!(
        out,
        "{} {} {} {}",
        graph.num_nodes(),
        graph.num_edges(),
        graph.cell_numbers().len(),
        graph.num_overlay_mappings()
    )?;

    for u in 0..graph.num_nodes() as NodeId {
        let vertex = graph.vertex(u);
        writeln!(
            out,
            "{} {} {} {} {} {}",
            vertex.cell_ptr, vertex.turn_table_ptr, vertex.first_out, vertex.first_in, vertex.coord.lat, vertex.coord.lon
        )?;
    }

    for e in 0..graph.num_edges() as EdgeId {
        let edge = graph.forward_edge(e);
        writeln!(
            out,
            "{} {} {} {}",
            edge.head, edge.entry_point, edge.attributes.std_attributes, edge.attributes.max_height
        )?;
    }
    for e in 0..graph.num_edges() as EdgeId {
        let edge = graph.backward_edge(e);
        writeln!(
            out,
            "{} {} {} {}",
            edge.tail, edge.exit_point, edge.attributes.std_attributes, edge.attributes.max_height
        )?;
    }

    for cell_number in graph.cell_numbers() {
        writeln!(out, "{}", cell_number)?;
    }

    let turn_tables: Vec<String> = graph.turn_tables().iter().map(|&turn| (turn as u8).to_string()).collect();
    writeln!(out, "{}", turn_tables.join(" "))?;

    let mut mappings: Vec<(SubVertex, u32)> = graph.overlay_mappings().map(|(&sub, &id)| (sub, id)).collect();
    mappings.sort_unstable_by_key(|&(_, id)| id);
    for (sub, id) in mappings {
        writeln!(out, "{} {} {} {}", sub.vertex, sub.turn_order, sub.exit as u8, id)?;
    }

    writeln!(out, "{}", graph.max_edges_in_cell())?;
    let offsets: Vec<String> = graph.forward_edge_cell_offsets().iter().map(|offset| offset.to_string()).collect();
    writeln!(out, "{}", offsets.join(" "))?;
    let offsets: Vec<String> = graph.backward_edge_cell_offsets().iter().map(|offset| offset.to_string()).collect();
    writeln!(out, "{}", offsets.join(" "))?;

    out.into_inner().map_err(|e| e.into_error())?.finish()?;
    Ok(())
}

pub fn read_graph<P: AsRef<Path>>(path: P) -> io::Result<Graph> {
    let file = File::open(path)?;
    let mut lines = Lines::new(BufReader::new(BzDecoder::new(file)));

    let [num_vertices, num_edges, num_cells, num_mappings]: [usize; 4] = lines.fixed()?;

    let mut vertices = Vec::with_capacity(num_vertices + 1);
    for _ in 0..num_vertices {
        let line = lines.next()?;
        let mut tokens = line.split_whitespace();
        let mut token = || tokens.next().ok_or_else(|| invalid_data("vertex line must have 6 fields"));
        vertices.push(VertexRecord {
            cell_ptr: parse(token()?)?,
            turn_table_ptr: parse(token()?)?,
            first_out: parse(token()?)?,
            first_in: parse(token()?)?,
            coord: Coordinate {
                lat: parse(token()?)?,
                lon: parse(token()?)?,
            },
        });
    }
    vertices.push(VertexRecord {
        first_out: num_edges as EdgeId,
        first_in: num_edges as EdgeId,
        ..Default::default()
    });

    let mut forward_edges = Vec::with_capacity(num_edges);
    for _ in 0..num_edges {
        let line = lines.next()?;
        let mut tokens = line.split_whitespace();
        let mut token = || tokens.next().ok_or_else(|| invalid_data("edge line must have 4 fields"));
        forward_edges.push(ForwardEdge {
            head: parse(token()?)?,
            entry_point: parse(token()?)?,
            attributes: EdgeAttributes {
                std_attributes: parse(token()?)?,
                max_height: parse(token()?)?,
            },
        });
    }
    let mut backward_edges = Vec::with_capacity(num_edges);
    for _ in 0..num_edges {
        let line = lines.next()?;
        let mut tokens = line.split_whitespace();
        let mut token = || tokens.next().ok_or_else(|| invalid_data("edge line must have 4 fields"));
        backward_edges.push(BackwardEdge {
            tail: parse(token()?)?,
            exit_point: parse(token()?)?,
            attributes: EdgeAttributes {
                std_attributes: parse(token()?)?,
                max_height: parse(token()?)?,
            },
        });
    }

    let mut cell_numbers = Vec::with_capacity(num_cells);
    for _ in 0..num_cells {
        cell_numbers.push(parse::<CellNumber>(lines.next()?.trim())?);
    }

    let turn_tables: Vec<TurnType> = parse_all::<u32>(lines.next()?)?.into_iter().map(TurnType::from).collect();

    let mut overlay_vertices = HashMap::with_capacity(num_mappings);
    for _ in 0..num_mappings {
        let [vertex, turn_order, exit, id]: [u32; 4] = lines.fixed()?;
        overlay_vertices.insert(
            SubVertex {
                vertex,
                turn_order: turn_order as TurnOrder,
                exit: exit != 0,
            },
            id,
        );
    }

    let mut max_edges_in_cell = 0;
    let mut forward_offsets = vec![0; num_cells];
    let mut backward_offsets = vec![0; num_cells];
    if num_cells > 0 {
        max_edges_in_cell = parse(lines.next()?.trim())?;
        forward_offsets = parse_all(lines.next()?)?;
        backward_offsets = parse_all(lines.next()?)?;
        if forward_offsets.len() != num_cells || backward_offsets.len() != num_cells {
            return Err(invalid_data("cell offset tables must have one entry per cell"));
        }
    }

    Ok(Graph::from_parts(
        vertices,
        forward_edges,
        backward_edges,
        turn_tables,
        cell_numbers,
        overlay_vertices,
        max_edges_in_cell,
        forward_offsets,
        backward_offsets,
    ))
}

// overlay graph

pub fn write_overlay_graph<P: AsRef<Path>>(overlay: &OverlayGraph, path: P) -> io::Result<()> {
    let mut out = BufWriter::new(File::create(path)?);

    let offsets: Vec<String> = overlay.level_info().offsets().iter().map(|offset| offset.to_string()).collect();
    writeln!(out, "{}", offsets.join(" "))?;

    let counts: Vec<String> = overlay.vertex_counts_in_level().iter().map(|count| count.to_string()).collect();
    writeln!(out, "{}", counts.join(" "))?;

    for id in 0..overlay.num_vertices() as u32 {
        let vertex = overlay.vertex(id);
        write!(
            out,
            "{} {} {} {}",
            vertex.cell_number, vertex.neighbor_overlay, vertex.original_vertex, vertex.original_edge
        )?;
        for &point in &vertex.entry_exit_point {
            write!(out, " {}", point)?;
        }
        writeln!(out)?;
    }

    writeln!(out, "{}", overlay.weight_vector_size())?;

    let mapping: Vec<String> = overlay.overlay_id_mapping().iter().map(|id| id.to_string()).collect();
    writeln!(out, "{}", mapping.join(" "))?;

    for l in 1..=overlay.level_info().level_count() {
        writeln!(out, "{}", overlay.num_cells_in_level(l))?;
        let mut cells: Vec<(CellNumber, Cell)> = overlay.cells_in_level(l).map(|(number, cell)| (number, *cell)).collect();
        cells.sort_unstable_by_key(|&(_, cell)| cell.cell_offset);
        for (number, cell) in cells {
            writeln!(
                out,
                "{} {} {} {} {}",
                number, cell.num_entry_points, cell.num_exit_points, cell.cell_offset, cell.overlay_id_offset
            )?;
        }
    }

    out.flush()
}

pub fn read_overlay_graph<P: AsRef<Path>>(path: P) -> io::Result<OverlayGraph> {
    let mut lines = Lines::new(BufReader::new(File::open(path)?));

    let offsets: Vec<u8> = parse_all(lines.next()?)?;
    let level_info = LevelInfo::new(offsets);
    let num_levels = level_info.level_count();

    let vertex_counts: Vec<u32> = parse_all(lines.next()?)?;
    if vertex_counts.len() != num_levels as usize {
        return Err(invalid_data("vertex counts must have one entry per level"));
    }
    let num_vertices = vertex_counts.first().copied().unwrap_or(0);

    let mut overlay_vertices = Vec::with_capacity(num_vertices as usize);
    for _ in 0..num_vertices {
        let tokens = parse_all::<u64>(lines.next()?)?;
        if tokens.len() < 5 {
            return Err(invalid_data("overlay vertex line must have at least 5 fields"));
        }
        overlay_vertices.push(OverlayVertex {
            cell_number: tokens[0],
            neighbor_overlay: tokens[1] as u32,
            original_vertex: tokens[2] as NodeId,
            original_edge: tokens[3] as EdgeId,
            entry_exit_point: tokens[4..].iter().map(|&point| point as u32).collect(),
        });
    }

    let weight_vector_size: u32 = parse(lines.next()?.trim())?;
    let overlay_id_mapping: Vec<u32> = parse_all(lines.next()?)?;

    let mut cell_mapping = Vec::with_capacity(num_levels as usize);
    for _ in 0..num_levels {
        let cells_in_level: usize = parse(lines.next()?.trim())?;
        let mut cells = HashMap::with_capacity(cells_in_level);
        for _ in 0..cells_in_level {
            let [number, num_entry, num_exit, cell_offset, id_offset]: [u64; 5] = lines.fixed()?;
            cells.insert(
                number,
                Cell {
                    num_entry_points: num_entry as u32,
                    num_exit_points: num_exit as u32,
                    cell_offset: cell_offset as u32,
                    overlay_id_offset: id_offset as u32,
                },
            );
        }
        cell_mapping.push(cells);
    }

    Ok(OverlayGraph::from_parts(
        overlay_vertices,
        vertex_counts,
        cell_mapping,
        overlay_id_mapping,
        level_info,
        weight_vector_size,
    ))
}

// metric

pub fn write_metric<P: AsRef<Path>>(metric: &Metric, path: P) -> io::Result<()> {
    let mut out = BufWriter::new(File::create(path)?);

    writeln!(
        out,
        "{} {} {}",
        metric.weights().len(),
        metric.turn_table_ptrs().len(),
        metric.turn_table_diffs().len()
    )?;
    let weights: Vec<String> = metric.weights().iter().map(|weight| weight.to_string()).collect();
    writeln!(out, "{}", weights.join(" "))?;
    let ptrs: Vec<String> = metric.turn_table_ptrs().iter().map(|ptr| ptr.to_string()).collect();
    writeln!(out, "{}", ptrs.join(" "))?;
    let diffs: Vec<String> = metric.turn_table_diffs().iter().map(|diff| diff.to_string()).collect();
    writeln!(out, "{}", diffs.join(" "))?;

    out.flush()
}

/// Reads a metric file back. The cost function is not part of the file, the
/// caller names the one the file was customized for.
pub fn read_metric<P: AsRef<Path>>(path: P, cost_function: CostFunction) -> io::Result<Metric> {
    let mut lines = Lines::new(BufReader::new(File::open(path)?));

    let [num_weights, num_ptrs, num_diffs]: [usize; 3] = lines.fixed()?;
    let weights: Vec<Weight> = parse_all(lines.next()?)?;
    let ptrs: Vec<u32> = parse_all(lines.next()?)?;
    let diffs: Vec<i32> = parse_all(lines.next()?)?;
    if weights.len() != num_weights || ptrs.len() != num_ptrs || diffs.len() != num_diffs {
        return Err(invalid_data("metric array lengths do not match the header"));
    }

    Ok(Metric::from_parts(cost_function, weights, ptrs, diffs))
}

// multi-level partition

pub fn write_partition<P: AsRef<Path>>(partition: &MultiLevelPartition, path: P) -> io::Result<()> {
    let mut out = BufWriter::new(File::create(path)?);

    writeln!(out, "{}", partition.num_levels())?;
    for level in 0..partition.num_levels() as usize {
        writeln!(out, "{}", partition.num_cells_in_level(level))?;
    }
    writeln!(out, "{}", partition.num_vertices())?;
    for vertex in 0..partition.num_vertices() {
        writeln!(out, "{}", partition.cell_number(vertex as NodeId))?;
    }

    out.flush()
}

pub fn read_partition<P: AsRef<Path>>(path: P) -> io::Result<MultiLevelPartition> {
    let mut lines = Lines::new(BufReader::new(File::open(path)?));

    let num_levels: usize = parse(lines.next()?.trim())?;
    let mut num_cells = Vec::with_capacity(num_levels);
    for _ in 0..num_levels {
        num_cells.push(parse(lines.next()?.trim())?);
    }
    let num_vertices: usize = parse(lines.next()?.trim())?;
    let mut cell_numbers = Vec::with_capacity(num_vertices);
    for _ in 0..num_vertices {
        cell_numbers.push(parse(lines.next()?.trim())?);
    }

    Ok(MultiLevelPartition::from_parts(num_cells, cell_numbers))
}
