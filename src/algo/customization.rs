//! Customization: computing the overlay weights for a cost function.
//!
//! The weight of a cell edge from entry `i` to exit `j` is the shortest path
//! cost between the two boundary points inside the cell. Level 1 runs a turn
//! aware Dijkstra on the base graph restricted to each cell, addressing
//! labels by entry point ids shifted into a small per-cell id space. Level
//! `l >= 2` runs Dijkstra on the meta graph formed by the level `l - 1`
//! overlay vertices, using the already computed level `l - 1` weights as edge
//! weights.
//!
//! Cells of one level are independent and processed in parallel; every cell
//! writes a disjoint contiguous slice of the weight vector, which is carved
//! up with `split_at_mut` beforehand. Worker scratch (distances, rounds,
//! queue) is lazily reset through a per-scratch round counter, so no
//! per-source reinitialization is needed.

use crate::datastr::graph::*;
use crate::datastr::index_heap::{IndexedMinHeap, LabeledState, State};
use crate::datastr::overlay::{Cell, OverlayGraph};
use crate::metrics::CostFunction;
use rayon::prelude::*;

/// Computes the full overlay weight vector, level by level from the bottom.
/// Level `l` must be complete before level `l + 1` starts, since the upper
/// level searches read the lower level weights.
pub fn compute_overlay_weights(graph: &Graph, overlay: &OverlayGraph, cost: &CostFunction) -> Vec<Weight> {
    let mut weights = vec![INFINITY; overlay.weight_vector_size() as usize];
    build_lowest_level(graph, overlay, cost, &mut weights);
    for l in 2..=overlay.level_info().level_count() {
        build_level(graph, overlay, cost, l, &mut weights);
    }
    weights
}

/// The cells of one level, sorted by weight offset. Offsets of one level form
/// a contiguous block of the weight vector (assigned from the highest level
/// down during construction), which makes the disjoint carving below work.
fn sorted_cells(overlay: &OverlayGraph, l: Level) -> (Vec<(CellNumber, Cell)>, usize) {
    let mut cells: Vec<(CellNumber, Cell)> = overlay.cells_in_level(l).map(|(number, cell)| (number, *cell)).collect();
    cells.sort_unstable_by_key(|&(_, cell)| cell.cell_offset);
    let block_end = cells
        .last()
        .map(|&(_, cell)| (cell.cell_offset + cell.num_entry_points * cell.num_exit_points) as usize)
        .unwrap_or(0);
    (cells, block_end)
}

/// Pairs every cell with its disjoint mutable slice of the weight vector.
fn carve_chunks<'w>(cells: Vec<(CellNumber, Cell)>, mut block: &'w mut [Weight]) -> Vec<(CellNumber, Cell, &'w mut [Weight])> {
    let mut jobs = Vec::with_capacity(cells.len());
    let mut pos = 0;
    for (number, cell) in cells {
        let size = (cell.num_entry_points * cell.num_exit_points) as usize;
        let offset = cell.cell_offset as usize;
        let (_, tail) = block.split_at_mut(offset - pos);
        let (chunk, tail) = tail.split_at_mut(size);
        jobs.push((number, cell, chunk));
        block = tail;
        pos = offset + size;
    }
    jobs
}

struct Scratch {
    dist: Vec<Weight>,
    round: Vec<u32>,
    current_round: u32,
    queue: IndexedMinHeap<LabeledState>,
    overlay_queue: IndexedMinHeap<State>,
    // per exit overlay vertex distances of the lowest level searches
    overlay_dist: Vec<Weight>,
}

impl Scratch {
    fn new(label_space: usize, num_overlay_vertices: usize) -> Scratch {
        Scratch {
            dist: vec![INFINITY; label_space],
            round: vec![0; label_space],
            current_round: 0,
            queue: IndexedMinHeap::new(label_space),
            overlay_queue: IndexedMinHeap::new(label_space),
            overlay_dist: vec![INFINITY; num_overlay_vertices],
        }
    }
}

fn build_lowest_level(graph: &Graph, overlay: &OverlayGraph, cost: &CostFunction, weights: &mut [Weight]) {
    let (cells, _) = sorted_cells(overlay, 1);
    let jobs = carve_chunks(cells, weights);
    let label_space = graph.max_edges_in_cell() as usize;
    let num_overlay = overlay.num_vertices();

    jobs.into_par_iter().for_each_init(
        || Scratch::new(label_space, num_overlay),
        |scratch, (cell_number, cell, chunk)| {
            build_lowest_level_cell(graph, overlay, cost, cell_number, &cell, chunk, scratch);
        },
    );
}

/// One in-cell Dijkstra per entry point. A label is an entry point of a
/// vertex inside the cell; edges whose head leaves the cell record the
/// distance at the corresponding exit overlay vertex instead. The boundary
/// edge traversed beyond the exit is not part of the cell weight.
fn build_lowest_level_cell(
    graph: &Graph,
    overlay: &OverlayGraph,
    cost: &CostFunction,
    cell_number: CellNumber,
    cell: &Cell,
    chunk: &mut [Weight],
    scratch: &mut Scratch,
) {
    let Scratch {
        dist,
        round,
        current_round,
        queue,
        overlay_dist,
        ..
    } = scratch;

    for i in 0..cell.num_entry_points {
        let start_overlay = overlay.entry_point(cell, i);
        let start_vertex = overlay.vertex(start_overlay);
        let start = start_vertex.original_vertex;
        debug_assert_eq!(start_vertex.cell_number, cell_number);
        // labels are backward edge ids relative to the cell's offset
        let entry_base = graph.backward_edge_cell_offset(start);
        let start_id = start_vertex.original_edge - entry_base;
        debug_assert!((start_id as usize) < dist.len());

        *current_round += 1;
        let current = *current_round;
        dist[start_id as usize] = 0;
        round[start_id as usize] = current;
        queue.push(LabeledState {
            key: 0,
            id: start_id,
            vertex: start,
        });

        while let Some(LabeledState { key, id, vertex: u }) = queue.pop() {
            debug_assert_eq!(dist[id as usize], key);
            let entry_point = graph.entry_order(u, id + entry_base);
            graph.for_out_edges_of(u, entry_point, |edge, exit_point, turn_type| {
                let v = edge.head;
                let exit_dist = key + cost.turn_costs(turn_type);
                let new_dist = exit_dist + cost.edge_weight(&edge.attributes);
                if new_dist >= INFINITY {
                    return;
                }

                if graph.cell_number(v) == cell_number {
                    let v_id = graph.entry_offset(v) + edge.entry_point as EdgeId - entry_base;
                    debug_assert!((v_id as usize) < dist.len());
                    if round[v_id as usize] == current && new_dist >= dist[v_id as usize] {
                        return;
                    }
                    dist[v_id as usize] = new_dist;
                    round[v_id as usize] = current;
                    queue.push_or_decrease(LabeledState {
                        key: new_dist,
                        id: v_id,
                        vertex: v,
                    });
                } else {
                    // the edge leaves the cell, record the exit point distance
                    let exit_overlay = graph.overlay_vertex(u, exit_point, true);
                    if exit_dist < overlay_dist[exit_overlay as usize] {
                        overlay_dist[exit_overlay as usize] = exit_dist;
                    }
                }
            });
        }

        for j in 0..cell.num_exit_points {
            let exit = overlay.exit_point(cell, j);
            chunk[(i * cell.num_exit_points + j) as usize] = overlay_dist[exit as usize];
            overlay_dist[exit as usize] = INFINITY;
        }
    }
}

fn build_level(graph: &Graph, overlay: &OverlayGraph, cost: &CostFunction, l: Level, weights: &mut [Weight]) {
    let (cells, block_end) = sorted_cells(overlay, l);
    if cells.is_empty() {
        return;
    }
    // this level's block precedes the (already computed) blocks of the levels
    // below, so splitting there separates the writes from the reads
    let (block, lower_weights) = weights.split_at_mut(block_end);
    let lower_weights: &[Weight] = lower_weights;
    let jobs = carve_chunks(cells, block);
    let label_space = overlay.num_vertices_in_level(l - 1) as usize;

    jobs.into_par_iter().for_each_init(
        || Scratch::new(label_space, 0),
        |scratch, (cell_number, cell, chunk)| {
            build_level_cell(graph, overlay, cost, l, cell_number, &cell, chunk, lower_weights, block_end, scratch);
        },
    );
}

/// Dijkstra on the meta graph of the level `l - 1` overlay vertices of one
/// level `l` cell. Cell edges of the level below are relaxed via the stored
/// weights; the base edge linking an exit to its twin entry is traversed only
/// if the twin still lies in the same level `l` cell.
#[allow(clippy::too_many_arguments)]
fn build_level_cell(
    graph: &Graph,
    overlay: &OverlayGraph,
    cost: &CostFunction,
    l: Level,
    cell_number: CellNumber,
    cell: &Cell,
    chunk: &mut [Weight],
    lower_weights: &[Weight],
    lower_start: usize,
    scratch: &mut Scratch,
) {
    let level_info = overlay.level_info();
    let Scratch {
        dist,
        round,
        current_round,
        overlay_queue: queue,
        ..
    } = scratch;

    for i in 0..cell.num_entry_points {
        let start = overlay.entry_point(cell, i);
        *current_round += 1;
        let current = *current_round;
        dist[start as usize] = 0;
        round[start as usize] = current;
        // the queue only ever contains entry points of sub-cells
        queue.push(State { key: 0, id: start });

        while let Some(State { key, id: entry }) = queue.pop() {
            debug_assert_eq!(dist[entry as usize], key);
            debug_assert_eq!(level_info.truncate_to_level(overlay.vertex(entry).cell_number, l), cell_number);

            overlay.for_out_neighbors_of(entry, l - 1, |exit, weight_offset| {
                debug_assert!(weight_offset as usize >= lower_start);
                let new_dist = key + lower_weights[weight_offset as usize - lower_start];
                if new_dist >= INFINITY {
                    return;
                }
                if round[exit as usize] == current && new_dist >= dist[exit as usize] {
                    return;
                }
                dist[exit as usize] = new_dist;
                round[exit as usize] = current;

                // traverse the boundary edge into the neighboring sub-cell
                let exit_vertex = overlay.vertex(exit);
                let neighbor = exit_vertex.neighbor_overlay;
                if level_info.truncate_to_level(overlay.vertex(neighbor).cell_number, l) != cell_number {
                    return;
                }
                let edge_weight = cost.edge_weight(&graph.forward_edge(exit_vertex.original_edge).attributes);
                let neighbor_dist = new_dist + edge_weight;
                if neighbor_dist >= INFINITY {
                    return;
                }
                if round[neighbor as usize] == current && neighbor_dist >= dist[neighbor as usize] {
                    return;
                }
                dist[neighbor as usize] = neighbor_dist;
                round[neighbor as usize] = current;
                queue.push_or_decrease(State {
                    key: neighbor_dist,
                    id: neighbor,
                });
            });
        }

        for j in 0..cell.num_exit_points {
            let exit = overlay.exit_point(cell, j);
            chunk[(i * cell.num_exit_points + j) as usize] = if round[exit as usize] == current {
                dist[exit as usize]
            } else {
                INFINITY
            };
        }
    }
}
