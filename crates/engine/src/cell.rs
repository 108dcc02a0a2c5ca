use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::error::ErrorKind;
use crate::formula::parser::Expr;

/// Horizontal text alignment
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq)]
pub enum Alignment {
    #[default]
    Left,
    Center,
    Right,
}

/// Cell formatting handle.
///
/// Opaque to the calculation core: evaluation never reads it. Owned here so
/// the presentation collaborator has somewhere to hang style state, and so
/// persistence can round-trip it with the cell.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct CellFormat {
    pub bold: bool,
    pub italic: bool,
    pub underline: bool,
    pub alignment: Alignment,
    /// Number format pattern, interpreted by the presentation layer.
    pub number_format: Option<String>,
}

/// A computed cell value.
///
/// The tagged union the whole engine trades in. No coercion happens here;
/// the coercion table is owned by the evaluator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum CellValue {
    Empty,
    Number(f64),
    Text(String),
    Boolean(bool),
    Error(ErrorKind),
}

impl Default for CellValue {
    fn default() -> Self {
        CellValue::Empty
    }
}

impl CellValue {
    pub fn is_empty(&self) -> bool {
        matches!(self, CellValue::Empty)
    }

    pub fn is_error(&self) -> bool {
        matches!(self, CellValue::Error(_))
    }

    /// Render for display. Whole numbers drop the fraction, booleans render
    /// as TRUE/FALSE, errors as their code.
    pub fn display_text(&self) -> String {
        match self {
            CellValue::Empty => String::new(),
            CellValue::Number(n) => {
                if n.fract() == 0.0 && n.abs() < 1e15 {
                    format!("{}", *n as i64)
                } else {
                    format!("{}", n)
                }
            }
            CellValue::Text(s) => s.clone(),
            CellValue::Boolean(b) => {
                if *b {
                    "TRUE".to_string()
                } else {
                    "FALSE".to_string()
                }
            }
            CellValue::Error(kind) => kind.code().to_string(),
        }
    }
}

/// Raw user input to a cell: either a literal value or formula source text.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum RawInput {
    Literal(CellValue),
    /// Formula source including the leading `=`.
    Formula(String),
}

impl RawInput {
    /// Classify input text.
    ///
    /// A leading `=` means "parse as formula"; otherwise the text is stored
    /// as a literal after numeric/boolean coercion, falling back to `Text`.
    pub fn parse(input: &str) -> Self {
        let trimmed = input.trim();

        if trimmed.is_empty() {
            return RawInput::Literal(CellValue::Empty);
        }
        if trimmed.starts_with('=') {
            return RawInput::Formula(trimmed.to_string());
        }
        if let Ok(n) = trimmed.parse::<f64>() {
            return RawInput::Literal(CellValue::Number(n));
        }
        match trimmed.to_ascii_uppercase().as_str() {
            "TRUE" => RawInput::Literal(CellValue::Boolean(true)),
            "FALSE" => RawInput::Literal(CellValue::Boolean(false)),
            _ => RawInput::Literal(CellValue::Text(trimmed.to_string())),
        }
    }

    pub fn is_formula(&self) -> bool {
        matches!(self, RawInput::Formula(_))
    }

    /// The text a cell editor would show: formula source or literal display.
    pub fn raw_display(&self) -> String {
        match self {
            RawInput::Literal(v) => v.display_text(),
            RawInput::Formula(src) => src.clone(),
        }
    }
}

/// Per-cell recomputation state.
///
/// `Evaluating` is transient and never observable outside a recompute
/// batch; `Error` is terminal until the next write to the cell.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum CellState {
    #[default]
    Clean,
    Dirty,
    Evaluating,
    Error,
}

/// One stored cell.
///
/// Exists in the store only while it has content (sparsity invariant).
/// The AST is a compile cache of the formula text, rebuilt only when the
/// text changes; `cached` is the last computed value read by dependents.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Cell {
    pub input: RawInput,
    #[serde(skip)]
    pub ast: Option<Arc<Expr>>,
    #[serde(skip)]
    pub cached: CellValue,
    #[serde(skip)]
    pub state: CellState,
    pub format: CellFormat,
}

impl Cell {
    pub fn literal(value: CellValue) -> Self {
        Self {
            cached: value.clone(),
            input: RawInput::Literal(value),
            ast: None,
            state: CellState::Clean,
            format: CellFormat::default(),
        }
    }

    pub fn formula(source: String, ast: Arc<Expr>) -> Self {
        Self {
            input: RawInput::Formula(source),
            ast: Some(ast),
            cached: CellValue::Empty,
            state: CellState::Dirty,
            format: CellFormat::default(),
        }
    }

    pub fn is_formula(&self) -> bool {
        self.input.is_formula()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_raw_input_classification() {
        assert_eq!(RawInput::parse(""), RawInput::Literal(CellValue::Empty));
        assert_eq!(RawInput::parse("  "), RawInput::Literal(CellValue::Empty));
        assert_eq!(
            RawInput::parse("42"),
            RawInput::Literal(CellValue::Number(42.0))
        );
        assert_eq!(
            RawInput::parse("-3.5"),
            RawInput::Literal(CellValue::Number(-3.5))
        );
        assert_eq!(
            RawInput::parse("true"),
            RawInput::Literal(CellValue::Boolean(true))
        );
        assert_eq!(
            RawInput::parse("FALSE"),
            RawInput::Literal(CellValue::Boolean(false))
        );
        assert_eq!(
            RawInput::parse("hello"),
            RawInput::Literal(CellValue::Text("hello".to_string()))
        );
        assert_eq!(
            RawInput::parse("=A1+1"),
            RawInput::Formula("=A1+1".to_string())
        );
    }

    #[test]
    fn test_display_text() {
        assert_eq!(CellValue::Number(3.0).display_text(), "3");
        assert_eq!(CellValue::Number(3.25).display_text(), "3.25");
        assert_eq!(CellValue::Boolean(true).display_text(), "TRUE");
        assert_eq!(CellValue::Empty.display_text(), "");
        assert_eq!(
            CellValue::Error(ErrorKind::DivByZero).display_text(),
            "#DIV/0!"
        );
    }

    #[test]
    fn test_literal_cell_cached_value() {
        let cell = Cell::literal(CellValue::Number(7.0));
        assert_eq!(cell.cached, CellValue::Number(7.0));
        assert_eq!(cell.state, CellState::Clean);
        assert!(!cell.is_formula());
    }
}
