//! Uniform grid of cells covering the playfield
//!
//! The grid lies on the XZ plane, centred on the origin: columns run along X,
//! rows along Z. Entities outside the grid are clamped into the border cells.

use std::fmt::Write as _;

use glam::Vec3;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::sim::cell::Cell;
use crate::sim::entity::{Body, Entity};
use crate::sim::frame::{FrameCounters, SimContext};
use crate::sim::render::RenderList;
use crate::sim::store::{Store, StoreError};

/// Inclusive range of cells an entity's bounding sphere touches
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CellSpan {
    pub row_min: usize,
    pub row_max: usize,
    pub col_min: usize,
    pub col_max: usize,
}

impl CellSpan {
    /// More than one cell in either direction
    #[inline]
    pub fn overlaps_cells(&self) -> bool {
        self.row_min != self.row_max || self.col_min != self.col_max
    }

    /// `(row, column)` of every covered cell
    pub fn cells(self) -> impl Iterator<Item = (usize, usize)> {
        (self.row_min..=self.row_max)
            .flat_map(move |row| (self.col_min..=self.col_max).map(move |col| (row, col)))
    }
}

/// Occupancy summary
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GridStats {
    pub non_empty_cells: usize,
    pub mobile_entries: usize,
    pub static_entries: usize,
    pub max_per_cell: usize,
}

pub struct Grid {
    rows: usize,
    columns: usize,
    cell_size: f32,
    threaded: bool,
    /// Row-major, `rows * columns`
    cells: Vec<Cell>,
}

impl Grid {
    pub fn new(rows: usize, columns: usize, cell_size: f32, threaded: bool) -> Self {
        let rows = rows.max(1);
        let columns = columns.max(1);
        let cells = (0..rows * columns).map(|_| Cell::default()).collect();
        Self {
            rows,
            columns,
            cell_size,
            threaded,
            cells,
        }
    }

    #[inline]
    pub fn rows(&self) -> usize {
        self.rows
    }

    #[inline]
    pub fn columns(&self) -> usize {
        self.columns
    }

    #[inline]
    pub fn cell_size(&self) -> f32 {
        self.cell_size
    }

    #[inline]
    pub fn is_threaded(&self) -> bool {
        self.threaded
    }

    /// Extent along X (columns) and Z (rows)
    pub fn world_size(&self) -> (f32, f32) {
        (
            self.columns as f32 * self.cell_size,
            self.rows as f32 * self.cell_size,
        )
    }

    #[inline]
    pub fn cell(&self, row: usize, column: usize) -> Option<&Cell> {
        if row >= self.rows || column >= self.columns {
            return None;
        }
        self.cells.get(row * self.columns + column)
    }

    #[inline]
    fn cell_mut(&mut self, row: usize, column: usize) -> &mut Cell {
        &mut self.cells[row * self.columns + column]
    }

    fn clamp_index(&self, offset: f32, max: usize) -> usize {
        let index = (offset / self.cell_size).floor();
        if index.is_nan() || index < 0.0 {
            0
        } else {
            (index as usize).min(max)
        }
    }

    /// Cells covered by a sphere, clamped to the grid
    pub fn span_of(&self, position: Vec3, radius: f32) -> CellSpan {
        let (width, height) = self.world_size();
        let x = width / 2.0 + position.x;
        let z = height / 2.0 + position.z;
        CellSpan {
            row_min: self.clamp_index(z - radius, self.rows - 1),
            row_max: self.clamp_index(z + radius, self.rows - 1),
            col_min: self.clamp_index(x - radius, self.columns - 1),
            col_max: self.clamp_index(x + radius, self.columns - 1),
        }
    }

    fn place(&mut self, body: &mut Body) -> CellSpan {
        let span = self.span_of(body.position, body.bounding_radius);
        body.overlaps_cells = span.overlaps_cells();
        body.cell_span = Some(span);
        span
    }

    /// Insert a mobile entity into every cell it touches (every frame)
    pub(crate) fn add(&mut self, body: &mut Body) {
        let span = self.place(body);
        for (row, col) in span.cells() {
            self.cell_mut(row, col).add(body);
        }
    }

    /// Insert a static entity (once, at creation)
    pub(crate) fn add_static(&mut self, body: &mut Body) {
        let span = self.place(body);
        for (row, col) in span.cells() {
            self.cell_mut(row, col).add_static(body);
        }
    }

    /// Remove a static entity from the cells it was added to.
    /// Returns the number of entries removed.
    pub(crate) fn remove_static(&mut self, body: &mut Body) -> usize {
        let Some(span) = body.cell_span.take() else {
            return 0;
        };
        let id = body.id();
        span.cells()
            .filter(|&(row, col)| self.cell_mut(row, col).remove_static(id))
            .count()
    }

    /// Remove a mobile entity from this frame's cells
    pub(crate) fn remove(&mut self, body: &mut Body) -> usize {
        let Some(span) = body.cell_span.take() else {
            return 0;
        };
        let id = body.id();
        span.cells()
            .filter(|&(row, col)| self.cell_mut(row, col).remove(id))
            .count()
    }

    pub(crate) fn clear_mobile(&mut self) {
        for cell in &mut self.cells {
            cell.clear_mobile();
        }
    }

    /// Run `Cell::update` on every cell, one rayon task per row when threaded
    pub(crate) fn update(&self, ctx: &SimContext<'_>) -> Result<(), StoreError> {
        self.for_each_cell(|cell| cell.update(ctx));
        ctx.take_fault().map_or(Ok(()), Err)
    }

    pub(crate) fn resolve_collisions(&self, ctx: &SimContext<'_>) -> Result<(), StoreError> {
        self.for_each_cell(|cell| cell.resolve_collisions(ctx));
        ctx.take_fault().map_or(Ok(()), Err)
    }

    fn for_each_cell<F>(&self, f: F)
    where
        F: Fn(&Cell) + Sync,
    {
        if self.threaded {
            self.cells
                .par_chunks(self.columns)
                .for_each(|row| row.iter().for_each(&f));
        } else {
            self.cells.iter().for_each(f);
        }
    }

    /// Single threaded, row by row
    pub(crate) fn render(
        &self,
        store: &Store<Entity>,
        tick: u32,
        out: &mut RenderList,
        counters: &FrameCounters,
    ) {
        for cell in &self.cells {
            cell.render(store, tick, out, counters);
        }
    }

    pub fn stats(&self) -> GridStats {
        self.cells.iter().fold(GridStats::default(), |mut stats, cell| {
            if !cell.is_empty() {
                stats.non_empty_cells += 1;
            }
            stats.mobile_entries += cell.mobile_count();
            stats.static_entries += cell.static_count();
            stats.max_per_cell = stats.max_per_cell.max(cell.len());
            stats
        })
    }

    /// Per-cell `mobile/static` counts, one line per row
    pub fn debug_dump(&self) -> String {
        let mut out = String::with_capacity(self.cells.len() * 11 + self.rows);
        for row in self.cells.chunks(self.columns) {
            for cell in row {
                let _ = write!(out, " {:04}/{:04} ", cell.mobile_count(), cell.static_count());
            }
            out.push('\n');
        }
        tracing::trace!(grid = %out, "grid occupancy");
        out
    }
}

impl std::fmt::Debug for Grid {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Grid")
            .field("rows", &self.rows)
            .field("columns", &self.columns)
            .field("cell_size", &self.cell_size)
            .field("threaded", &self.threaded)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sim::store::Handle;

    fn body(index: u32, x: f32, z: f32, radius: f32) -> Body {
        Entity::new(
            Body::new("body")
                .as_sphere()
                .with_radius(radius)
                .with_position(Vec3::new(x, 0.0, z)),
            crate::sim::entity::Inert,
        )
        .with_id(Handle::new(index, 0))
        .body
    }

    fn counts(grid: &Grid) -> Vec<(usize, usize)> {
        grid.cells
            .iter()
            .map(|c| (c.mobile_count(), c.static_count()))
            .collect()
    }

    #[test]
    fn test_span_single_cell() {
        let grid = Grid::new(4, 4, 10.0, false);
        // world spans [-20, 20] on x and z
        let span = grid.span_of(Vec3::new(-15.0, 0.0, 5.0), 1.0);
        assert_eq!(span, CellSpan { row_min: 2, row_max: 2, col_min: 0, col_max: 0 });
        assert!(!span.overlaps_cells());
    }

    #[test]
    fn test_span_across_boundary() {
        let grid = Grid::new(4, 4, 10.0, false);
        // straddles x = 0, the line between columns 1 and 2
        let span = grid.span_of(Vec3::new(0.0, 0.0, -5.0), 1.0);
        assert_eq!(span, CellSpan { row_min: 1, row_max: 1, col_min: 1, col_max: 2 });
        assert!(span.overlaps_cells());
        assert_eq!(span.cells().collect::<Vec<_>>(), vec![(1, 1), (1, 2)]);
    }

    #[test]
    fn test_span_clamps_outside_world() {
        let grid = Grid::new(4, 4, 10.0, false);
        let span = grid.span_of(Vec3::new(-100.0, 0.0, 100.0), 1.0);
        assert_eq!(span, CellSpan { row_min: 3, row_max: 3, col_min: 0, col_max: 0 });

        let huge = grid.span_of(Vec3::ZERO, 100.0);
        assert_eq!(huge, CellSpan { row_min: 0, row_max: 3, col_min: 0, col_max: 3 });
        assert_eq!(huge.cells().count(), 16);
    }

    #[test]
    fn test_add_sets_overlap_flag() {
        let mut grid = Grid::new(4, 4, 10.0, false);
        let mut inside = body(0, -15.0, -15.0, 1.0);
        let mut spanning = body(1, 0.0, 0.0, 1.0);

        grid.add(&mut inside);
        grid.add(&mut spanning);

        assert!(!inside.overlaps_cells());
        assert!(spanning.overlaps_cells());
        assert_eq!(grid.stats().mobile_entries, 5);
        assert_eq!(grid.stats().max_per_cell, 1);
        assert!(grid.cell(0, 0).map_or(false, |c| c.contains(inside.id())));
    }

    #[test]
    fn test_static_insert_remove_round_trip() {
        let mut grid = Grid::new(4, 4, 10.0, false);
        let mut other = body(0, 12.0, 3.0, 4.0);
        grid.add_static(&mut other);
        let before = counts(&grid);

        let mut wall = body(1, 0.5, -9.0, 6.0);
        grid.add_static(&mut wall);
        assert_ne!(counts(&grid), before);

        // 2 columns x 2 rows
        assert_eq!(grid.remove_static(&mut wall), 4);
        assert_eq!(counts(&grid), before);
        assert!(grid.cell(1, 2).map_or(false, |c| c.contains(other.id())));
        assert_eq!(grid.remove_static(&mut wall), 0);
    }

    #[test]
    fn test_clear_mobile_keeps_statics() {
        let mut grid = Grid::new(2, 2, 5.0, false);
        let mut s = body(0, 0.0, 0.0, 1.0);
        let mut m = body(1, 0.0, 0.0, 1.0);
        grid.add_static(&mut s);
        grid.add(&mut m);

        grid.clear_mobile();

        let stats = grid.stats();
        assert_eq!(stats.mobile_entries, 0);
        assert_eq!(stats.static_entries, 4);
        assert_eq!(stats.non_empty_cells, 4);
    }

    #[test]
    fn test_debug_dump_layout() {
        let mut grid = Grid::new(2, 3, 10.0, false);
        let mut m = body(0, -10.0, -5.0, 1.0);
        grid.add(&mut m);

        let dump = grid.debug_dump();
        let lines: Vec<&str> = dump.lines().collect();
        assert_eq!(lines.len(), 2);
        assert!(lines[0].starts_with(" 0001/0000 "));
        assert_eq!(lines[1].matches("0000/0000").count(), 3);
    }
}
