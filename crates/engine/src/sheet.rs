//! Sparse per-sheet cell storage.
//!
//! Memory is proportional to populated cells, not sheet extent: cells live
//! in a hash map keyed by (row, col) and an absent entry IS the empty cell.
//! Mutation goes through the workbook, which keeps the dependency graph in
//! step; everything else observes the sheet through `value_at` and
//! `region_cells`.

use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};

use gridcell_core::{CellRange, Coord};

use crate::cell::{Cell, CellValue};

/// Stable sheet identity. Monotonically assigned, never reused.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SheetId(pub u64);

impl SheetId {
    #[inline]
    pub fn from_raw(raw: u64) -> Self {
        SheetId(raw)
    }

    #[inline]
    pub fn raw(&self) -> u64 {
        self.0
    }
}

/// One sheet's sparse cell store.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Sheet {
    pub id: SheetId,
    pub name: String,
    cells: FxHashMap<(usize, usize), Cell>,
}

impl Sheet {
    pub fn new(id: SheetId, name: &str) -> Self {
        Self {
            id,
            name: name.to_string(),
            cells: FxHashMap::default(),
        }
    }

    /// Number of populated cells. The sparsity invariant means this is also
    /// the store's memory footprint in cell records.
    pub fn cell_count(&self) -> usize {
        self.cells.len()
    }

    /// The cell record at a coordinate, if populated.
    pub fn cell(&self, coord: Coord) -> Option<&Cell> {
        self.cells.get(&(coord.row, coord.col))
    }

    /// The cached computed value at a coordinate. `Empty` for absent cells;
    /// never allocates a store entry.
    pub fn value_at(&self, coord: Coord) -> CellValue {
        self.cells
            .get(&(coord.row, coord.col))
            .map(|c| c.cached.clone())
            .unwrap_or(CellValue::Empty)
    }

    /// The raw input text at a coordinate (formula source or literal
    /// display), empty string for absent cells.
    pub fn raw_text(&self, coord: Coord) -> String {
        self.cells
            .get(&(coord.row, coord.col))
            .map(|c| c.input.raw_display())
            .unwrap_or_default()
    }

    pub(crate) fn cell_mut(&mut self, coord: Coord) -> Option<&mut Cell> {
        self.cells.get_mut(&(coord.row, coord.col))
    }

    /// Insert or replace a cell record, returning the previous one.
    pub(crate) fn insert(&mut self, coord: Coord, cell: Cell) -> Option<Cell> {
        self.cells.insert((coord.row, coord.col), cell)
    }

    /// Remove a cell record entirely (sparsity invariant: clearing content
    /// removes the entry, it does not zero it).
    pub(crate) fn remove(&mut self, coord: Coord) -> Option<Cell> {
        self.cells.remove(&(coord.row, coord.col))
    }

    /// Iterate all populated cells in unspecified order.
    pub fn cells_iter(&self) -> impl Iterator<Item = (Coord, &Cell)> + '_ {
        self.cells
            .iter()
            .map(|(&(row, col), cell)| (Coord::new(row, col), cell))
    }

    /// Populated cells inside a range, sorted by (row, col) for
    /// deterministic iteration. Finite and restartable.
    pub fn region_cells(&self, range: CellRange) -> Vec<(Coord, &Cell)> {
        let mut hits: Vec<(Coord, &Cell)> = self
            .cells_iter()
            .filter(|(coord, _)| range.contains(*coord))
            .collect();
        hits.sort_by_key(|(coord, _)| *coord);
        hits
    }

    /// Cached values of populated cells inside a range, sorted by (row, col).
    pub fn region_values(&self, range: CellRange) -> Vec<(Coord, CellValue)> {
        self.region_cells(range)
            .into_iter()
            .map(|(coord, cell)| (coord, cell.cached.clone()))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sheet() -> Sheet {
        Sheet::new(SheetId::from_raw(1), "Sheet1")
    }

    fn coord(s: &str) -> Coord {
        Coord::parse_a1(s).unwrap()
    }

    #[test]
    fn test_absent_cell_is_empty_and_allocates_nothing() {
        let s = sheet();
        assert_eq!(s.value_at(coord("A1")), CellValue::Empty);
        assert_eq!(s.cell_count(), 0);
    }

    #[test]
    fn test_insert_and_remove_maintain_sparsity() {
        let mut s = sheet();
        s.insert(coord("B2"), Cell::literal(CellValue::Number(5.0)));
        assert_eq!(s.cell_count(), 1);
        assert_eq!(s.value_at(coord("B2")), CellValue::Number(5.0));

        s.remove(coord("B2"));
        assert_eq!(s.cell_count(), 0);
        assert_eq!(s.value_at(coord("B2")), CellValue::Empty);
    }

    #[test]
    fn test_region_cells_sorted_and_filtered() {
        let mut s = sheet();
        s.insert(coord("C3"), Cell::literal(CellValue::Number(3.0)));
        s.insert(coord("A1"), Cell::literal(CellValue::Number(1.0)));
        s.insert(coord("B2"), Cell::literal(CellValue::Number(2.0)));
        s.insert(coord("E9"), Cell::literal(CellValue::Number(9.0)));

        let range = CellRange::parse_a1("A1:C3").unwrap();
        let cells = s.region_cells(range);
        let coords: Vec<String> = cells.iter().map(|(c, _)| c.to_a1()).collect();
        assert_eq!(coords, vec!["A1", "B2", "C3"]);
    }

    #[test]
    fn test_region_cells_restartable() {
        let mut s = sheet();
        s.insert(coord("A1"), Cell::literal(CellValue::Number(1.0)));
        let range = CellRange::parse_a1("A1:B2").unwrap();
        assert_eq!(s.region_cells(range).len(), 1);
        assert_eq!(s.region_cells(range).len(), 1);
    }

    #[test]
    fn test_raw_text() {
        let mut s = sheet();
        s.insert(coord("A1"), Cell::literal(CellValue::Number(1.5)));
        assert_eq!(s.raw_text(coord("A1")), "1.5");
        assert_eq!(s.raw_text(coord("A2")), "");
    }
}
