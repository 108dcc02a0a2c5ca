//! Precedent extraction from a formula AST.
//!
//! Feeds the dependency graph: bare cell references become direct edges,
//! range references stay ranges so the graph's index can answer membership
//! without per-cell fan-out. Single-cell ranges collapse to direct refs.

use rustc_hash::FxHashSet;

use gridcell_core::{CellRange, Coord};

use super::parser::Expr;

/// Sheet-local references read by one formula.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FormulaRefs {
    pub cells: FxHashSet<Coord>,
    pub ranges: Vec<CellRange>,
}

impl FormulaRefs {
    pub fn is_empty(&self) -> bool {
        self.cells.is_empty() && self.ranges.is_empty()
    }
}

/// Collect every cell and range reference in an expression, deduplicated.
pub fn extract_refs(expr: &Expr) -> FormulaRefs {
    let mut refs = FormulaRefs::default();
    collect(expr, &mut refs);
    refs
}

fn collect(expr: &Expr, refs: &mut FormulaRefs) {
    match expr {
        Expr::Number(_) | Expr::Text(_) | Expr::Boolean(_) | Expr::Empty => {}
        Expr::CellRef { coord, .. } => {
            refs.cells.insert(*coord);
        }
        Expr::Range { range, .. } => {
            if range.cell_count() == 1 {
                refs.cells.insert(range.start());
            } else if !refs.ranges.contains(range) {
                refs.ranges.push(*range);
            }
        }
        Expr::Function { args, .. } => {
            for arg in args {
                collect(arg, refs);
            }
        }
        Expr::BinaryOp { left, right, .. } => {
            collect(left, refs);
            collect(right, refs);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::formula::parser::parse;

    fn refs_of(formula: &str) -> FormulaRefs {
        extract_refs(&parse(formula).unwrap())
    }

    fn coord(s: &str) -> Coord {
        Coord::parse_a1(s).unwrap()
    }

    #[test]
    fn test_literals_have_no_refs() {
        assert!(refs_of("=1+2*3").is_empty());
        assert!(refs_of("=\"abc\"&\"def\"").is_empty());
    }

    #[test]
    fn test_single_cell_ref() {
        let refs = refs_of("=A1+1");
        assert_eq!(refs.cells.len(), 1);
        assert!(refs.cells.contains(&coord("A1")));
        assert!(refs.ranges.is_empty());
    }

    #[test]
    fn test_range_stays_a_range() {
        let refs = refs_of("=SUM(A1:A100)");
        assert!(refs.cells.is_empty());
        assert_eq!(refs.ranges, vec![CellRange::parse_a1("A1:A100").unwrap()]);
    }

    #[test]
    fn test_single_cell_range_collapses() {
        let refs = refs_of("=SUM(B2:B2)");
        assert!(refs.ranges.is_empty());
        assert!(refs.cells.contains(&coord("B2")));
    }

    #[test]
    fn test_duplicates_deduped() {
        let refs = refs_of("=A1+A1+A1");
        assert_eq!(refs.cells.len(), 1);

        let refs = refs_of("=SUM(A1:A5)+SUM(A1:A5)");
        assert_eq!(refs.ranges.len(), 1);
    }

    #[test]
    fn test_nested_function_args() {
        let refs = refs_of("=IF(A1>0,SUM(B1:B10),C1)");
        assert!(refs.cells.contains(&coord("A1")));
        assert!(refs.cells.contains(&coord("C1")));
        assert_eq!(refs.ranges, vec![CellRange::parse_a1("B1:B10").unwrap()]);
    }

    #[test]
    fn test_mixed_direct_and_range() {
        let refs = refs_of("=A1+SUM(A1:B2)");
        assert!(refs.cells.contains(&coord("A1")));
        assert_eq!(refs.ranges.len(), 1);
    }
}
