//! Rectangular cell ranges.

use serde::{Deserialize, Serialize};

use crate::coord::{AddressError, Coord};

/// An inclusive rectangular range of cells.
///
/// Normalized on construction so `start` is the top-left corner and `end`
/// the bottom-right. A single-cell range has `start == end`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct CellRange {
    start: Coord,
    end: Coord,
}

impl CellRange {
    /// Build a range from two corners, normalizing their order per axis.
    pub fn new(a: Coord, b: Coord) -> Self {
        Self {
            start: Coord::new(a.row.min(b.row), a.col.min(b.col)),
            end: Coord::new(a.row.max(b.row), a.col.max(b.col)),
        }
    }

    /// A range covering exactly one cell.
    pub fn single(coord: Coord) -> Self {
        Self {
            start: coord,
            end: coord,
        }
    }

    /// Parse `A1:B10` or a bare `A1` (single-cell range).
    pub fn parse_a1(text: &str) -> Result<Self, AddressError> {
        match text.split_once(':') {
            Some((a, b)) => Ok(Self::new(Coord::parse_a1(a)?, Coord::parse_a1(b)?)),
            None => Ok(Self::single(Coord::parse_a1(text)?)),
        }
    }

    #[inline]
    pub fn start(&self) -> Coord {
        self.start
    }

    #[inline]
    pub fn end(&self) -> Coord {
        self.end
    }

    pub fn to_a1(&self) -> String {
        if self.start == self.end {
            self.start.to_a1()
        } else {
            format!("{}:{}", self.start.to_a1(), self.end.to_a1())
        }
    }

    #[inline]
    pub fn contains(&self, coord: Coord) -> bool {
        self.start.row <= coord.row
            && coord.row <= self.end.row
            && self.start.col <= coord.col
            && coord.col <= self.end.col
    }

    pub fn intersects(&self, other: &CellRange) -> bool {
        !(self.end.row < other.start.row
            || self.start.row > other.end.row
            || self.end.col < other.start.col
            || self.start.col > other.end.col)
    }

    #[inline]
    pub fn row_count(&self) -> usize {
        self.end.row - self.start.row + 1
    }

    #[inline]
    pub fn col_count(&self) -> usize {
        self.end.col - self.start.col + 1
    }

    #[inline]
    pub fn cell_count(&self) -> usize {
        self.row_count() * self.col_count()
    }

    /// Row-major iteration over every coordinate in the range.
    ///
    /// Finite and restartable; callers aggregating over sparse storage
    /// should prefer iterating the populated cells instead.
    pub fn iter(&self) -> RangeIter {
        RangeIter {
            range: *self,
            next: Some(self.start),
        }
    }
}

impl std::fmt::Display for CellRange {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.to_a1())
    }
}

/// Row-major iterator over a `CellRange`.
#[derive(Clone, Debug)]
pub struct RangeIter {
    range: CellRange,
    next: Option<Coord>,
}

impl Iterator for RangeIter {
    type Item = Coord;

    fn next(&mut self) -> Option<Coord> {
        let current = self.next?;
        self.next = if current.col < self.range.end.col {
            Some(Coord::new(current.row, current.col + 1))
        } else if current.row < self.range.end.row {
            Some(Coord::new(current.row + 1, self.range.start.col))
        } else {
            None
        };
        Some(current)
    }
}

impl IntoIterator for CellRange {
    type Item = Coord;
    type IntoIter = RangeIter;

    fn into_iter(self) -> RangeIter {
        self.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn range(s: &str) -> CellRange {
        CellRange::parse_a1(s).unwrap()
    }

    #[test]
    fn test_parse_and_normalize() {
        assert_eq!(range("A1:B2"), range("B2:A1"));
        assert_eq!(range("A1").start(), range("A1").end());
        assert_eq!(range("B10:D2").start(), Coord::new(1, 1));
        assert_eq!(range("B10:D2").end(), Coord::new(9, 3));
    }

    #[test]
    fn test_contains() {
        let r = range("B2:D4");
        assert!(r.contains(Coord::new(1, 1)));
        assert!(r.contains(Coord::new(3, 3)));
        assert!(r.contains(Coord::new(2, 2)));
        assert!(!r.contains(Coord::new(0, 1)));
        assert!(!r.contains(Coord::new(1, 4)));
    }

    #[test]
    fn test_intersects() {
        assert!(range("A1:C3").intersects(&range("C3:E5")));
        assert!(range("A1:C3").intersects(&range("B2:B2")));
        assert!(!range("A1:C3").intersects(&range("D4:E5")));
        assert!(!range("A1:A10").intersects(&range("B1:B10")));
    }

    #[test]
    fn test_counts() {
        let r = range("B2:D4");
        assert_eq!(r.row_count(), 3);
        assert_eq!(r.col_count(), 3);
        assert_eq!(r.cell_count(), 9);
        assert_eq!(range("A1").cell_count(), 1);
    }

    #[test]
    fn test_iter_row_major() {
        let coords: Vec<String> = range("A1:B2").iter().map(|c| c.to_a1()).collect();
        assert_eq!(coords, vec!["A1", "B1", "A2", "B2"]);
    }

    #[test]
    fn test_iter_restartable() {
        let r = range("A1:C1");
        assert_eq!(r.iter().count(), 3);
        assert_eq!(r.iter().count(), 3);
    }

    #[test]
    fn test_display() {
        assert_eq!(range("A1:B10").to_string(), "A1:B10");
        assert_eq!(range("C3").to_string(), "C3");
    }
}
