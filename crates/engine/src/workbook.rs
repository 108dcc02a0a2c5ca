//! Workbook: the owned context bundling sparse cell store, dependency
//! graph, function table and change notification for one document.
//!
//! Explicitly instantiated, never global: tests and embedders hold as many
//! independent workbooks as they like.
//!
//! # Write path
//!
//! `set_cell` is the sole mutation entry point. A formula write compiles
//! the text, validates the new edge set against the graph (cycle probe),
//! and only then commits; rejected writes leave the store and graph
//! untouched. Every committed write runs one synchronous recompute batch
//! over the dirty closure in topological order, with value-stability
//! pruning, and emits a single `CellsChanged` event.
//!
//! # Concurrency
//!
//! Single-writer/multi-reader is enforced by the ownership model: all
//! mutations take `&mut self`, readers take `&self`. The display cache is
//! the one internally locked structure, because it only ever holds
//! recomputable renderings.

use std::sync::Arc;
use std::time::Instant;

use rustc_hash::FxHashSet;

use gridcell_core::{CellRange, Coord};

use crate::cache::DisplayCache;
use crate::cell::{Cell, CellState, CellValue, RawInput};
use crate::cell_id::CellId;
use crate::config::EngineConfig;
use crate::dep_graph::{DepGraph, Precedents, RangeRef};
use crate::error::{CellWriteError, ErrorKind, FunctionError};
use crate::events::{CellsChanged, EventCallback};
use crate::formula::eval::{self, ValueResolver};
use crate::formula::functions::{Arity, FunctionImpl, FunctionTable};
use crate::formula::parser;
use crate::formula::refs::extract_refs;
use crate::recalc::{RecalcError, RecalcReport};
use crate::sheet::{Sheet, SheetId};

/// Read view over one sheet's cached values, handed to the evaluator.
///
/// Precedents are read from here, never re-evaluated: during a batch the
/// topological order guarantees a precedent's cache is already current by
/// the time a dependent reads it.
struct SheetValues<'a> {
    sheet: &'a Sheet,
}

impl ValueResolver for SheetValues<'_> {
    fn value_at(&self, coord: Coord) -> CellValue {
        self.sheet.value_at(coord)
    }

    fn populated_in(&self, range: CellRange) -> Vec<(Coord, CellValue)> {
        self.sheet.region_values(range)
    }
}

/// A workbook: sheets plus the calculation machinery that keeps them
/// consistent.
pub struct Workbook {
    config: EngineConfig,
    sheets: Vec<Sheet>,
    /// Next ID to assign to a new sheet. Monotonically increasing, never reused.
    next_sheet_id: u64,
    dep_graph: DepGraph,
    functions: FunctionTable,
    display_cache: DisplayCache,
    listeners: Vec<EventCallback>,
    /// Bumped once per successful write batch.
    revision: u64,
    /// Cumulative formula evaluations, for observing recompute fan-out.
    eval_count: u64,
    last_report: Option<RecalcReport>,
}

impl Default for Workbook {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for Workbook {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Workbook")
            .field("sheets", &self.sheets.len())
            .field("revision", &self.revision)
            .field("formula_cells", &self.dep_graph.formula_cell_count())
            .finish()
    }
}

impl Workbook {
    /// A workbook with one sheet and default configuration.
    pub fn new() -> Self {
        Self::with_config(EngineConfig::default())
    }

    pub fn with_config(config: EngineConfig) -> Self {
        let display_cache = DisplayCache::new(config.display_cache_capacity);
        Self {
            config,
            sheets: vec![Sheet::new(SheetId::from_raw(1), "Sheet1")],
            next_sheet_id: 2,
            dep_graph: DepGraph::new(),
            functions: FunctionTable::with_builtins(),
            display_cache,
            listeners: Vec::new(),
            revision: 0,
            eval_count: 0,
            last_report: None,
        }
    }

    // =========================================================================
    // Sheets
    // =========================================================================

    pub fn add_sheet(&mut self, name: &str) -> SheetId {
        let id = SheetId::from_raw(self.next_sheet_id);
        self.next_sheet_id += 1;
        self.sheets.push(Sheet::new(id, name));
        id
    }

    pub fn sheet_count(&self) -> usize {
        self.sheets.len()
    }

    pub fn sheet_ids(&self) -> Vec<SheetId> {
        self.sheets.iter().map(|s| s.id).collect()
    }

    pub fn sheet_by_id(&self, id: SheetId) -> Option<&Sheet> {
        self.sheets.iter().find(|s| s.id == id)
    }

    fn sheet_by_id_mut(&mut self, id: SheetId) -> Option<&mut Sheet> {
        self.sheets.iter_mut().find(|s| s.id == id)
    }

    // =========================================================================
    // Reads
    // =========================================================================

    /// The computed value at a coordinate. `Empty` for absent cells; never
    /// allocates a store entry.
    pub fn get_cell(&self, id: CellId) -> CellValue {
        self.sheet_by_id(id.sheet)
            .map(|s| s.value_at(id.coord()))
            .unwrap_or(CellValue::Empty)
    }

    /// The raw input at a coordinate (formula source or literal display).
    pub fn get_raw(&self, id: CellId) -> String {
        self.sheet_by_id(id.sheet)
            .map(|s| s.raw_text(id.coord()))
            .unwrap_or_default()
    }

    /// Populated cells within a region, sorted by (row, col). Finite and
    /// restartable; empty cells consume no memory and do not appear.
    pub fn iterate_region(
        &self,
        sheet: SheetId,
        range: CellRange,
    ) -> impl Iterator<Item = (Coord, CellValue)> + '_ {
        self.sheet_by_id(sheet)
            .into_iter()
            .flat_map(move |s| s.region_values(range).into_iter())
    }

    /// Evaluate a cell's formula against current cached values without
    /// touching stored state. Literal cells return their value.
    pub fn evaluate_cell(&self, id: CellId) -> CellValue {
        let Some(sheet) = self.sheet_by_id(id.sheet) else {
            return CellValue::Empty;
        };
        match sheet.cell(id.coord()) {
            Some(cell) => match &cell.ast {
                Some(ast) => {
                    let resolver = SheetValues { sheet };
                    eval::evaluate(ast, &resolver, &self.functions)
                }
                None => cell.cached.clone(),
            },
            None => CellValue::Empty,
        }
    }

    /// Rendered display string for a cell, served from the bounded LRU
    /// cache. The cache only ever holds recomputable strings; any write
    /// that changes a cell invalidates its entry.
    pub fn display_text(&self, id: CellId) -> String {
        if let Some(text) = self.display_cache.get(id) {
            return text;
        }
        let text = self.get_cell(id).display_text();
        self.display_cache.insert(id, text.clone());
        text
    }

    // =========================================================================
    // Writes
    // =========================================================================

    /// Sole mutation entry point: classify input text and store it.
    ///
    /// A leading `=` parses as a formula; otherwise the text is coerced to
    /// a numeric/boolean literal, falling back to text. Empty input clears
    /// the cell. Returns the cell's computed value after the synchronous
    /// recompute batch.
    pub fn set_cell(&mut self, id: CellId, input: &str) -> Result<CellValue, CellWriteError> {
        match RawInput::parse(input) {
            RawInput::Literal(CellValue::Empty) => {
                self.check_write_target(id)?;
                self.clear_cell(id);
                Ok(CellValue::Empty)
            }
            RawInput::Literal(value) => self.set_value(id, value),
            RawInput::Formula(source) => self.set_formula(id, &source),
        }
    }

    /// Store a literal value.
    pub fn set_value(&mut self, id: CellId, value: CellValue) -> Result<CellValue, CellWriteError> {
        self.check_write_target(id)?;
        if value.is_empty() {
            self.clear_cell(id);
            return Ok(CellValue::Empty);
        }

        let coord = id.coord();
        // Literal cells own no edges.
        self.dep_graph.clear_cell(id);

        let sheet = self
            .sheet_by_id_mut(id.sheet)
            .ok_or(CellWriteError::UnknownSheet(id.sheet.raw()))?;
        let old = sheet.value_at(coord);
        let format = sheet
            .cell(coord)
            .map(|c| c.format.clone())
            .unwrap_or_default();
        let mut cell = Cell::literal(value.clone());
        cell.format = format;
        sheet.insert(coord, cell);

        let changed = old != value;
        self.run_batch(id, false, changed);
        Ok(value)
    }

    /// Compile and store a formula.
    ///
    /// Rejections (parse error, cycle) happen before any mutation: the
    /// cell's previous formula, value and edges all survive. The AST is
    /// recompiled only when the formula text actually changed.
    pub fn set_formula(&mut self, id: CellId, source: &str) -> Result<CellValue, CellWriteError> {
        self.check_write_target(id)?;
        let source = source.trim();
        let coord = id.coord();

        // Unchanged text: reuse the compiled AST and existing edges.
        let reusable = self.sheet_by_id(id.sheet).and_then(|s| {
            s.cell(coord).and_then(|c| match (&c.input, &c.ast) {
                (RawInput::Formula(existing), Some(ast)) if existing == source => {
                    Some(ast.clone())
                }
                _ => None,
            })
        });
        if reusable.is_some() {
            self.run_batch(id, true, false);
            return Ok(self.get_cell(id));
        }

        // Compile first; a parse error mutates nothing.
        let ast = parser::parse(source).map_err(|e| {
            log::debug!("rejected formula at {}: {}", id, e);
            CellWriteError::Parse(e)
        })?;

        // Validate the new edge set before committing anything.
        let refs = extract_refs(&ast);
        let preds = Precedents {
            cells: refs
                .cells
                .iter()
                .map(|c| CellId::from_coord(id.sheet, *c))
                .collect(),
            ranges: refs
                .ranges
                .iter()
                .map(|r| RangeRef::new(id.sheet, *r))
                .collect(),
        };
        self.dep_graph.set_edges(id, preds).map_err(|e| {
            log::debug!("rejected formula at {}: {}", id, e);
            CellWriteError::Cycle(e)
        })?;

        // Committed: replace the cell, carrying the old cached value so the
        // batch can detect value stability, and the old format handle.
        let sheet = self
            .sheet_by_id_mut(id.sheet)
            .ok_or(CellWriteError::UnknownSheet(id.sheet.raw()))?;
        let old_cached = sheet
            .cell(coord)
            .map(|c| c.cached.clone())
            .unwrap_or(CellValue::Empty);
        let format = sheet
            .cell(coord)
            .map(|c| c.format.clone())
            .unwrap_or_default();
        let mut cell = Cell::formula(source.to_string(), Arc::new(ast));
        cell.cached = old_cached;
        cell.format = format;
        sheet.insert(coord, cell);

        self.run_batch(id, true, false);
        Ok(self.get_cell(id))
    }

    /// Remove a cell's content entirely.
    ///
    /// The store entry disappears (sparsity invariant); edges owned by the
    /// cell are dropped; dependents recompute against `Empty`. Edges
    /// pointing at the coordinate from other formulas survive.
    pub fn clear_cell(&mut self, id: CellId) {
        let coord = id.coord();
        let Some(sheet) = self.sheet_by_id_mut(id.sheet) else {
            return;
        };
        let Some(old) = sheet.remove(coord) else {
            return;
        };
        self.dep_graph.clear_cell(id);

        let changed = !old.cached.is_empty();
        self.run_batch(id, false, changed);
    }

    /// Register an external function (plugin surface). Rejected if the
    /// name collides with a built-in. Serialized with all other mutations
    /// by taking `&mut self`; never called during a batch.
    pub fn register_function(
        &mut self,
        name: &str,
        arity: Arity,
        imp: FunctionImpl,
    ) -> Result<(), FunctionError> {
        self.functions.register(name, arity, imp)
    }

    /// Subscribe to per-batch change events.
    pub fn subscribe(&mut self, callback: EventCallback) {
        self.listeners.push(callback);
    }

    // =========================================================================
    // Introspection
    // =========================================================================

    pub fn dep_graph(&self) -> &DepGraph {
        &self.dep_graph
    }

    pub fn functions(&self) -> &FunctionTable {
        &self.functions
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn revision(&self) -> u64 {
        self.revision
    }

    /// Cumulative count of formula evaluations across all batches.
    pub fn eval_count(&self) -> u64 {
        self.eval_count
    }

    pub fn last_recalc(&self) -> Option<&RecalcReport> {
        self.last_report.as_ref()
    }

    // =========================================================================
    // Recompute
    // =========================================================================

    fn check_write_target(&self, id: CellId) -> Result<(), CellWriteError> {
        if id.row >= self.config.max_rows || id.col >= self.config.max_cols {
            return Err(CellWriteError::OutOfBounds {
                row: id.row,
                col: id.col,
            });
        }
        if self.sheet_by_id(id.sheet).is_none() {
            return Err(CellWriteError::UnknownSheet(id.sheet.raw()));
        }
        Ok(())
    }

    /// Run the synchronous recompute batch for a committed write.
    ///
    /// Seeds: the written cell itself when it holds a formula, plus its
    /// dependents when the written value changed. The batch walks the
    /// dirty closure in topological order; a cell whose recomputed value
    /// equals its prior cache does not schedule its dependents
    /// (value-stability pruning). Runs to completion; no partial state is
    /// observable afterwards.
    fn run_batch(&mut self, written: CellId, written_is_formula: bool, written_changed: bool) {
        let start = Instant::now();
        let mut report = RecalcReport::new();
        let mut changed: Vec<CellId> = Vec::new();

        let mut seeds: FxHashSet<CellId> = FxHashSet::default();
        if written_is_formula {
            seeds.insert(written);
        }
        if written_changed {
            seeds.extend(self.dep_graph.dependents_of(written));
        }

        if !seeds.is_empty() {
            match self.dep_graph.topo_order(&seeds) {
                Ok(order) => {
                    // Cells that must actually evaluate. Grows as values
                    // change; the topological order guarantees a cell is
                    // visited only after every precedent settled.
                    let mut scheduled = seeds;
                    for cell_id in order {
                        if !scheduled.contains(&cell_id) {
                            report.cells_pruned += 1;
                            continue;
                        }
                        let Some(outcome) = self.evaluate_into_store(cell_id, &mut report) else {
                            continue;
                        };
                        if outcome {
                            if cell_id != written {
                                changed.push(cell_id);
                            }
                            scheduled.extend(self.dep_graph.dependents_of(cell_id));
                        }
                    }
                }
                Err(cycle) => {
                    // The edge validation should make this unreachable; a
                    // cycle here is a broken invariant. Abort the batch
                    // with a diagnostic rather than produce wrong values.
                    log::error!("recompute aborted, graph invariant violated: {}", cycle);
                    report.cycle_detected = true;
                    for cell_id in &cycle.cells {
                        let coord = cell_id.coord();
                        if let Some(cell) = self
                            .sheet_by_id_mut(cell_id.sheet)
                            .and_then(|s| s.cell_mut(coord))
                        {
                            if cell.cached != CellValue::Error(ErrorKind::Circular) {
                                cell.cached = CellValue::Error(ErrorKind::Circular);
                                cell.state = CellState::Error;
                                if *cell_id != written {
                                    changed.push(*cell_id);
                                }
                            }
                        }
                    }
                }
            }
        }

        changed.sort();
        changed.dedup();

        self.revision += 1;
        self.display_cache.invalidate(written);
        self.display_cache.invalidate_many(changed.iter());

        report.duration_us = start.elapsed().as_micros() as u64;
        report.changed = changed.clone();
        log::debug!("recalc rev {}: {}", self.revision, report.summary());

        let event = CellsChanged {
            revision: self.revision,
            cells: changed,
        };
        for listener in &mut self.listeners {
            listener(&event);
        }
        self.last_report = Some(report);
    }

    /// Evaluate one formula cell and store the result.
    ///
    /// Returns `None` for cells with nothing to evaluate, otherwise
    /// whether the cached value changed.
    fn evaluate_into_store(&mut self, cell_id: CellId, report: &mut RecalcReport) -> Option<bool> {
        let coord = cell_id.coord();

        let (ast, old) = {
            let sheet = self.sheet_by_id(cell_id.sheet)?;
            let cell = sheet.cell(coord)?;
            (cell.ast.clone()?, cell.cached.clone())
        };

        if let Some(cell) = self
            .sheet_by_id_mut(cell_id.sheet)
            .and_then(|s| s.cell_mut(coord))
        {
            cell.state = CellState::Evaluating;
        }

        let value = {
            let sheet = self.sheet_by_id(cell_id.sheet)?;
            let resolver = SheetValues { sheet };
            eval::evaluate(&ast, &resolver, &self.functions)
        };
        self.eval_count += 1;
        report.cells_recomputed += 1;

        if let CellValue::Error(kind) = &value {
            if report.errors.len() < self.config.max_recalc_errors {
                report.errors.push(RecalcError {
                    cell: cell_id,
                    kind: *kind,
                });
            }
        }

        let cell = self
            .sheet_by_id_mut(cell_id.sheet)
            .and_then(|s| s.cell_mut(coord))?;
        let value_changed = cell.cached != value;
        cell.state = if value.is_error() {
            CellState::Error
        } else {
            CellState::Clean
        };
        cell.cached = value;
        Some(value_changed)
    }
}
