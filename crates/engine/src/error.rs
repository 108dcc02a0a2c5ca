//! Error taxonomy for the calculation engine.
//!
//! Two families of errors exist and they do not mix:
//!
//! - Write-time rejections (`ParseError`, `CycleError`, folded into
//!   `CellWriteError`): the write is refused and nothing mutates.
//! - Runtime evaluation errors (`ErrorKind`): perfectly valid cell values
//!   that propagate through dependents like any other value.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::cell_id::CellId;

/// Runtime evaluation error stored inside `CellValue::Error`.
///
/// These are values, not failures: the sheet keeps functioning and only
/// dependents of the erroring cell inherit the kind.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ErrorKind {
    /// Division or modulo by zero.
    DivByZero,
    /// Unknown function name.
    NameError,
    /// Reference outside the valid grid, or a lookup past its range.
    RefError,
    /// Type coercion failure (e.g. arithmetic on non-numeric text).
    ValueError,
    /// Member of a circular reference discovered at recompute time.
    /// Only produced when a pre-validated batch finds a cycle, which is an
    /// internal invariant violation.
    Circular,
}

impl ErrorKind {
    /// The display code shown in a cell, e.g. `#DIV/0!`.
    pub fn code(&self) -> &'static str {
        match self {
            ErrorKind::DivByZero => "#DIV/0!",
            ErrorKind::NameError => "#NAME?",
            ErrorKind::RefError => "#REF!",
            ErrorKind::ValueError => "#VALUE!",
            ErrorKind::Circular => "#CIRC!",
        }
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.code())
    }
}

/// Formula text that failed to compile. Rejected at write time; the cell's
/// previous formula and value are untouched.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ParseError {
    #[error("formula must start with '='")]
    MissingEquals,
    #[error("empty formula")]
    EmptyFormula,
    #[error("unexpected character {ch:?} at position {pos}")]
    UnexpectedChar { ch: char, pos: usize },
    #[error("unterminated string literal")]
    UnterminatedString,
    #[error("invalid number {0:?}")]
    InvalidNumber(String),
    #[error("invalid cell reference {0:?}")]
    InvalidReference(String),
    #[error("cell reference {0:?} is outside the grid")]
    ReferenceOutOfBounds(String),
    #[error("unexpected token at position {pos}")]
    UnexpectedToken { pos: usize },
    #[error("missing closing parenthesis")]
    MissingClosingParen,
    #[error("unexpected trailing input at position {pos}")]
    TrailingInput { pos: usize },
    #[error("unexpected end of formula")]
    UnexpectedEnd,
}

/// A formula write that would introduce a cycle into the dependency graph.
///
/// Carries the offending cells for diagnostics; the graph and store are
/// left exactly as they were.
#[derive(Debug, Clone, PartialEq, Error)]
#[error("{message}")]
pub struct CycleError {
    pub cells: Vec<CellId>,
    pub message: String,
}

impl CycleError {
    pub fn self_reference(cell: CellId) -> Self {
        Self {
            cells: vec![cell],
            message: format!("cell {} references itself", cell),
        }
    }

    pub fn cycle(cells: Vec<CellId>) -> Self {
        let names: Vec<String> = cells.iter().map(|c| c.to_string()).collect();
        let message = if cells.len() <= 5 {
            format!("circular reference: {}", names.join(" -> "))
        } else {
            format!(
                "circular reference involving {} cells: {} -> ... -> {}",
                cells.len(),
                names[0],
                names[names.len() - 1]
            )
        };
        Self { cells, message }
    }
}

/// Why a `set_cell`/`set_formula` call was rejected. No mutation occurred.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum CellWriteError {
    #[error(transparent)]
    Parse(#[from] ParseError),
    #[error(transparent)]
    Cycle(#[from] CycleError),
    #[error("coordinate ({row}, {col}) is outside the configured sheet bounds")]
    OutOfBounds { row: usize, col: usize },
    #[error("unknown sheet id {0}")]
    UnknownSheet(u64),
}

/// Why a function registration was refused.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum FunctionError {
    #[error("function name {0:?} collides with a built-in")]
    BuiltinCollision(String),
    #[error("function {0:?} is already registered")]
    AlreadyRegistered(String),
    #[error("invalid function name {0:?}")]
    InvalidName(String),
}
