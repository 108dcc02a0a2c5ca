//! Recompute reporting.
//!
//! Each write triggers one synchronous recompute batch; the report captures
//! what the batch did for logging and for the status surface an embedder
//! may expose.

use crate::cell_id::CellId;
use crate::error::ErrorKind;

/// An evaluation error that landed in a specific cell during a batch.
///
/// These are not failures of the batch itself: the error became the cell's
/// value and propagated to dependents. The report keeps a capped list for
/// diagnostics.
#[derive(Debug, Clone, PartialEq)]
pub struct RecalcError {
    pub cell: CellId,
    pub kind: ErrorKind,
}

/// Report from one recompute batch.
#[derive(Debug, Clone, Default)]
pub struct RecalcReport {
    /// Wall time of the batch in microseconds.
    pub duration_us: u64,

    /// Formula cells actually evaluated.
    pub cells_recomputed: usize,

    /// Cells in the dirty closure skipped because every precedent kept its
    /// value (value-stability pruning).
    pub cells_pruned: usize,

    /// Downstream cells whose cached value changed, in evaluation order.
    pub changed: Vec<CellId>,

    /// True if the topological sort hit a cycle the edge validation should
    /// have prevented. The batch was aborted and members marked `#CIRC!`.
    pub cycle_detected: bool,

    /// Evaluation errors, truncated to the configured cap.
    pub errors: Vec<RecalcError>,
}

impl RecalcReport {
    pub fn new() -> Self {
        Self::default()
    }

    /// One-line summary for logging.
    pub fn summary(&self) -> String {
        format!(
            "{} cells in {}us, changed={}, pruned={}, errors={}, cycle={}",
            self.cells_recomputed,
            self.duration_us,
            self.changed.len(),
            self.cells_pruned,
            self.errors.len(),
            self.cycle_detected,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sheet::SheetId;

    #[test]
    fn test_report_default() {
        let report = RecalcReport::new();
        assert_eq!(report.cells_recomputed, 0);
        assert_eq!(report.cells_pruned, 0);
        assert!(report.changed.is_empty());
        assert!(!report.cycle_detected);
    }

    #[test]
    fn test_summary_format() {
        let report = RecalcReport {
            duration_us: 42,
            cells_recomputed: 3,
            cells_pruned: 1,
            changed: vec![CellId::new(SheetId::from_raw(1), 0, 1)],
            cycle_detected: false,
            errors: vec![],
        };
        assert_eq!(
            report.summary(),
            "3 cells in 42us, changed=1, pruned=1, errors=0, cycle=false"
        );
    }
}
