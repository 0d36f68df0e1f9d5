//! The overlay graph: boundary entry/exit vertices of every cell on every
//! level, plus the layout information that lets customization and queries
//! address cell weights by plain arithmetic.
//!
//! Overlay vertices come in twin pairs, one per boundary edge: the exit
//! vertex at the tail and the entry vertex at the head. Vertices are sorted
//! by their highest boundary level (highest first), so the first
//! `vertex_count_in_level[l - 1]` vertices are exactly those that are
//! boundary vertices on level `l` or above. Per cell and level, the flat id
//! mapping array lists the cell's entry vertices followed by its exit
//! vertices, and `cell_offset` locates the cell's row-major
//! `num_entry x num_exit` weight matrix inside the metric's weight vector.

use super::graph::*;
use super::partition::{LevelInfo, MultiLevelPartition};
use std::collections::HashMap;

#[derive(Debug, Clone, PartialEq)]
pub struct OverlayVertex {
    pub original_vertex: NodeId,
    /// The twin across the boundary edge. Plain index, the pair is cyclic.
    pub neighbor_overlay: u32,
    pub cell_number: CellNumber,
    /// Forward edge id for exit vertices, backward edge id for entry vertices.
    pub original_edge: EdgeId,
    /// Ordinal of this vertex among the entries (or exits) of its cell on
    /// level `l`, for every `l` up to its highest boundary level.
    pub entry_exit_point: Vec<u32>,
}

#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Cell {
    pub num_entry_points: u32,
    pub num_exit_points: u32,
    /// Start of this cell's weight matrix in the metric weight vector.
    pub cell_offset: u32,
    /// Start of this cell's entries (then exits) in the overlay id mapping.
    pub overlay_id_offset: u32,
}

#[derive(Debug, Default, PartialEq)]
pub struct OverlayGraph {
    overlay_vertices: Vec<OverlayVertex>,
    // number of overlay vertices that are boundary vertices on level >= l
    vertex_count_in_level: Vec<u32>,
    cell_mapping: Vec<HashMap<CellNumber, Cell>>,
    overlay_id_mapping: Vec<u32>,
    level_info: LevelInfo,
    weight_vector_size: u32,
}

impl OverlayGraph {
    /// Builds the overlay for a graph that has already been sorted by cell.
    /// Registers the `(vertex, ordinal, is_exit) -> overlay id` mapping with
    /// the graph as a side effect.
    pub fn construct(graph: &mut Graph, mlp: &MultiLevelPartition) -> OverlayGraph {
        let mut overlay = OverlayGraph {
            level_info: mlp.level_info(),
            ..Default::default()
        };
        let exit_flags = overlay.build_overlay_vertices(graph, mlp.num_levels());
        overlay.build_cells(mlp.num_levels(), &exit_flags);
        overlay
    }

    pub fn from_parts(
        overlay_vertices: Vec<OverlayVertex>,
        vertex_count_in_level: Vec<u32>,
        cell_mapping: Vec<HashMap<CellNumber, Cell>>,
        overlay_id_mapping: Vec<u32>,
        level_info: LevelInfo,
        weight_vector_size: u32,
    ) -> OverlayGraph {
        OverlayGraph {
            overlay_vertices,
            vertex_count_in_level,
            cell_mapping,
            overlay_id_mapping,
            level_info,
            weight_vector_size,
        }
    }

    /// Phase 1 and 2: discover one twin pair per boundary edge, bucketed by
    /// the highest level on which the edge crosses a cell border, sort every
    /// bucket by cell number and concatenate the buckets from the highest
    /// level down. Returns for every overlay vertex whether it is an exit.
    fn build_overlay_vertices(&mut self, graph: &mut Graph, num_levels: Level) -> Vec<bool> {
        let mut vertices_by_level: Vec<Vec<OverlayVertex>> = vec![Vec::new(); num_levels as usize];

        graph.for_edges(|tail, head, forward_edge| {
            let tail_cell = graph.cell_number(tail);
            let head_cell = graph.cell_number(head);
            let boundary_level = self.level_info.highest_differing_level(tail_cell, head_cell);
            if boundary_level > 0 {
                let bucket = &mut vertices_by_level[boundary_level as usize - 1];
                let backward_edge = graph
                    .find_backward_edge(tail, head)
                    .expect("forward edge without backward counterpart");
                bucket.push(OverlayVertex {
                    original_vertex: tail,
                    neighbor_overlay: bucket.len() as u32 + 1,
                    cell_number: tail_cell,
                    original_edge: forward_edge,
                    entry_exit_point: vec![0; boundary_level as usize],
                });
                bucket.push(OverlayVertex {
                    original_vertex: head,
                    neighbor_overlay: bucket.len() as u32 - 1,
                    cell_number: head_cell,
                    original_edge: backward_edge,
                    entry_exit_point: vec![0; boundary_level as usize],
                });
            }
        });

        // suffix sums: count of vertices that are boundary on level >= l
        self.vertex_count_in_level = vec![0; num_levels as usize];
        let mut sum = 0;
        for l in (0..num_levels as usize).rev() {
            sum += vertices_by_level[l].len() as u32;
            self.vertex_count_in_level[l] = sum;
        }
        let vertex_count = sum as usize;

        let mut mapping = HashMap::with_capacity(vertex_count);
        let mut exit_flags = vec![false; vertex_count];
        self.overlay_vertices.reserve(vertex_count);

        for (l, bucket) in vertices_by_level.iter_mut().enumerate() {
            let vertex_offset = self.vertex_count_in_level[l] - bucket.len() as u32;

            let mut new_to_old: Vec<u32> = (0..bucket.len() as u32).collect();
            new_to_old.sort_unstable_by_key(|&old| bucket[old as usize].cell_number);
            let mut old_to_new = vec![0u32; bucket.len()];
            for (new, &old) in new_to_old.iter().enumerate() {
                old_to_new[old as usize] = new as u32;
            }

            let mut sorted = Vec::with_capacity(bucket.len());
            for (new, &old) in new_to_old.iter().enumerate() {
                let mut vertex = bucket[old as usize].clone();
                vertex.neighbor_overlay = old_to_new[vertex.neighbor_overlay as usize] + vertex_offset;
                let id = new as u32 + vertex_offset;

                // the first of each twin pair is the exit vertex
                let is_exit = old % 2 == 0;
                exit_flags[id as usize] = is_exit;
                let turn_order = if is_exit {
                    graph.exit_order(vertex.original_vertex, vertex.original_edge)
                } else {
                    graph.entry_order(vertex.original_vertex, vertex.original_edge)
                };
                mapping.insert(
                    SubVertex {
                        vertex: vertex.original_vertex,
                        turn_order,
                        exit: is_exit,
                    },
                    id,
                );
                sorted.push(vertex);
            }
            *bucket = sorted;
        }

        for bucket in vertices_by_level.into_iter().rev() {
            debug_assert_eq!(bucket.len() % 2, 0);
            self.overlay_vertices.extend(bucket);
        }
        debug_assert_eq!(self.overlay_vertices.len(), vertex_count);

        graph.set_overlay_mapping(mapping);
        exit_flags
    }

    /// Phase 3: group the overlay vertices of each level into cells, assign
    /// entry/exit ordinals and lay out the weight vector and id mapping.
    fn build_cells(&mut self, num_levels: Level, exit_flags: &[bool]) {
        self.cell_mapping = vec![HashMap::new(); num_levels as usize];
        let mut cell_offset = 0u32;
        let mut overlay_id_offset = 0u32;

        for l in (1..=num_levels).rev() {
            let cells = &mut self.cell_mapping[l as usize - 1];

            for v in 0..self.vertex_count_in_level[l as usize - 1] as usize {
                let truncated = self.level_info.truncate_to_level(self.overlay_vertices[v].cell_number, l);
                let cell = cells.entry(truncated).or_default();
                let ordinal = if exit_flags[v] {
                    let ordinal = cell.num_exit_points;
                    cell.num_exit_points += 1;
                    ordinal
                } else {
                    let ordinal = cell.num_entry_points;
                    cell.num_entry_points += 1;
                    ordinal
                };
                self.overlay_vertices[v].entry_exit_point[l as usize - 1] = ordinal;
            }

            for cell in cells.values_mut() {
                cell.overlay_id_offset = overlay_id_offset;
                cell.cell_offset = cell_offset;
                overlay_id_offset += cell.num_entry_points + cell.num_exit_points;
                cell_offset += cell.num_entry_points * cell.num_exit_points;
            }
        }

        self.overlay_id_mapping = vec![INVALID_ID; overlay_id_offset as usize];
        for l in (1..=num_levels).rev() {
            let cells = &self.cell_mapping[l as usize - 1];
            for v in 0..self.vertex_count_in_level[l as usize - 1] as usize {
                let vertex = &self.overlay_vertices[v];
                let truncated = self.level_info.truncate_to_level(vertex.cell_number, l);
                let cell = &cells[&truncated];
                let mut index = cell.overlay_id_offset + vertex.entry_exit_point[l as usize - 1];
                if exit_flags[v] {
                    index += cell.num_entry_points;
                }
                self.overlay_id_mapping[index as usize] = v as u32;
            }
        }

        self.weight_vector_size = cell_offset;
    }

    pub fn vertex(&self, u: u32) -> &OverlayVertex {
        &self.overlay_vertices[u as usize]
    }

    pub fn num_vertices(&self) -> usize {
        self.overlay_vertices.len()
    }

    pub fn num_vertices_in_level(&self, l: Level) -> u32 {
        debug_assert!(0 < l && l as usize <= self.vertex_count_in_level.len());
        self.vertex_count_in_level[l as usize - 1]
    }

    pub fn num_cells_in_level(&self, l: Level) -> usize {
        self.cell_mapping[l as usize - 1].len()
    }

    /// The cell record the given (untruncated) cell number belongs to on level `l`.
    pub fn cell(&self, cell_number: CellNumber, l: Level) -> &Cell {
        let truncated = self.level_info.truncate_to_level(cell_number, l);
        &self.cell_mapping[l as usize - 1][&truncated]
    }

    /// Overlay id of the `i`-th entry point of a cell.
    pub fn entry_point(&self, cell: &Cell, i: u32) -> u32 {
        debug_assert!(i < cell.num_entry_points);
        self.overlay_id_mapping[(cell.overlay_id_offset + i) as usize]
    }

    /// Overlay id of the `j`-th exit point of a cell.
    pub fn exit_point(&self, cell: &Cell, j: u32) -> u32 {
        debug_assert!(j < cell.num_exit_points);
        self.overlay_id_mapping[(cell.overlay_id_offset + cell.num_entry_points + j) as usize]
    }

    /// Iterates over all exit points reachable from entry vertex `u` inside
    /// its level `l` cell, yielding the exit overlay id and the offset of the
    /// connecting weight in the metric weight vector.
    pub fn for_out_neighbors_of(&self, u: u32, l: Level, mut handle: impl FnMut(u32, u32)) {
        let vertex = self.vertex(u);
        debug_assert!(0 < l && l as usize <= vertex.entry_exit_point.len());
        let entry_point = vertex.entry_exit_point[l as usize - 1];
        let cell = self.cell(vertex.cell_number, l);
        let weight_offset = cell.cell_offset + entry_point * cell.num_exit_points;
        let id_offset = cell.overlay_id_offset + cell.num_entry_points;
        for i in 0..cell.num_exit_points {
            handle(self.overlay_id_mapping[(id_offset + i) as usize], weight_offset + i);
        }
    }

    /// Iterates over all entry points of the cell of exit vertex `u` on level
    /// `l`, yielding the entry overlay id and the offset of the connecting
    /// weight (a column of the cell's weight matrix).
    pub fn for_in_neighbors_of(&self, u: u32, l: Level, mut handle: impl FnMut(u32, u32)) {
        let vertex = self.vertex(u);
        debug_assert!(0 < l && l as usize <= vertex.entry_exit_point.len());
        let exit_point = vertex.entry_exit_point[l as usize - 1];
        let cell = self.cell(vertex.cell_number, l);
        let weight_offset = cell.cell_offset + exit_point;
        for i in 0..cell.num_entry_points {
            handle(
                self.overlay_id_mapping[(cell.overlay_id_offset + i) as usize],
                weight_offset + cell.num_exit_points * i,
            );
        }
    }

    /// Iterates over all cells of level `l` as `(truncated cell number, cell)`.
    pub fn cells_in_level(&self, l: Level) -> impl Iterator<Item = (CellNumber, &Cell)> {
        self.cell_mapping[l as usize - 1].iter().map(|(&number, cell)| (number, cell))
    }

    pub fn level_info(&self) -> &LevelInfo {
        &self.level_info
    }

    pub fn query_level(&self, s_cell: CellNumber, t_cell: CellNumber, v_cell: CellNumber) -> Level {
        self.level_info.query_level(s_cell, t_cell, v_cell)
    }

    pub fn weight_vector_size(&self) -> u32 {
        self.weight_vector_size
    }

    pub fn overlay_id_mapping(&self) -> &[u32] {
        &self.overlay_id_mapping
    }

    pub fn vertex_counts_in_level(&self) -> &[u32] {
        &self.vertex_count_in_level
    }
}
