//! Change notifications for workbook consumers.
//!
//! The UI collaborator repaints from these instead of polling; persistence
//! and analytics consumers use them to know what moved. Exactly one event
//! is emitted per successful write batch, never one per cell.

use crate::cell_id::CellId;

/// Emitted once per successful write/recompute batch.
#[derive(Debug, Clone, PartialEq)]
pub struct CellsChanged {
    /// Revision that produced these changes. Monotonically increasing,
    /// bumped once per batch.
    pub revision: u64,
    /// Downstream cells whose computed value changed during the batch,
    /// sorted by (sheet, row, col). The directly written cell is not
    /// included; its value is the write's return value.
    pub cells: Vec<CellId>,
}

/// Callback type for receiving change events.
pub type EventCallback = Box<dyn FnMut(&CellsChanged) + Send>;

/// Buffers events for inspection. Test and tooling helper.
#[derive(Default)]
pub struct EventCollector {
    events: Vec<CellsChanged>,
}

impl EventCollector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, event: CellsChanged) {
        self.events.push(event);
    }

    pub fn events(&self) -> &[CellsChanged] {
        &self.events
    }

    pub fn last(&self) -> Option<&CellsChanged> {
        self.events.last()
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    pub fn clear(&mut self) {
        self.events.clear();
    }
}
