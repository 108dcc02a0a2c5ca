//! Engine configuration.

use serde::{Deserialize, Serialize};

use gridcell_core::{MAX_COLS, MAX_ROWS};

/// Tunables for a workbook instance.
///
/// Defaults address the full grid ceiling. Bounds here cap what the store
/// accepts at write time; the formula parser always validates references
/// against the fixed grid ceiling, since parsing is pure and config-free.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Rows accepted by the store (writes beyond are rejected).
    pub max_rows: usize,
    /// Columns accepted by the store.
    pub max_cols: usize,
    /// Capacity of the rendered-display LRU cache.
    pub display_cache_capacity: usize,
    /// Cap on per-batch error entries kept in the recalc report.
    pub max_recalc_errors: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_rows: MAX_ROWS,
            max_cols: MAX_COLS,
            display_cache_capacity: 8_192,
            max_recalc_errors: 100,
        }
    }
}
