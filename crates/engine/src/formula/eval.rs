// Formula evaluator - walks an AST against cached cell values.
//
// Coercion table (owned here, nowhere else):
//
//   context          Number  Boolean  Empty  Text(numeric)  Text(other)  Error
//   -> number        itself  1 / 0    0      parsed         #VALUE!      short-circuits
//   -> boolean       n != 0  itself   false  TRUE/FALSE     #VALUE!      short-circuits
//   -> text          display TRUE..   ""     itself         itself       short-circuits
//
// An Error value encountered anywhere short-circuits with the originating
// kind. Comparisons are numeric when both sides coerce quietly, otherwise
// case-insensitive text. Range references evaluate through `Arg` for
// function calls; a bare range in a scalar position is a #VALUE! error.

use gridcell_core::{CellRange, Coord};

use crate::cell::CellValue;
use crate::error::ErrorKind;

use super::functions::FunctionTable;
use super::parser::{Expr, Op};

/// Read access to computed cell values during evaluation.
///
/// The recompute driver hands the evaluator a view over the store's cached
/// values; precedents outside the dirty set are never re-evaluated through
/// this seam (the incremental-recalculation guarantee).
pub trait ValueResolver {
    /// Cached value at a coordinate, `Empty` if the cell is absent.
    fn value_at(&self, coord: Coord) -> CellValue;

    /// Populated cells inside a range with their cached values, sorted by
    /// (row, col). Sparse: empty cells do not appear.
    fn populated_in(&self, range: CellRange) -> Vec<(Coord, CellValue)>;
}

/// An evaluated function argument: a scalar value, or a range viewed
/// through the resolver so large ranges are never materialized per cell.
pub enum Arg<'a> {
    Scalar(CellValue),
    Range {
        range: CellRange,
        ctx: &'a dyn ValueResolver,
    },
}

impl<'a> Arg<'a> {
    /// The scalar value of this argument; a bare range has none.
    pub fn scalar(&self) -> Result<CellValue, ErrorKind> {
        match self {
            Arg::Scalar(v) => Ok(v.clone()),
            Arg::Range { .. } => Err(ErrorKind::ValueError),
        }
    }

    /// Numeric view for aggregation. Scalars coerce strictly (non-numeric
    /// text is an error); range cells contribute only their numbers, the
    /// way sheet aggregates ignore stray labels. Errors short-circuit.
    pub fn numbers(&self) -> Result<Vec<f64>, ErrorKind> {
        match self {
            Arg::Scalar(CellValue::Empty) => Ok(Vec::new()),
            Arg::Scalar(v) => Ok(vec![coerce_number(v)?]),
            Arg::Range { range, ctx } => {
                let mut out = Vec::new();
                for (_, value) in ctx.populated_in(*range) {
                    match value {
                        CellValue::Number(n) => out.push(n),
                        CellValue::Error(kind) => return Err(kind),
                        _ => {}
                    }
                }
                Ok(out)
            }
        }
    }

    /// Every non-empty value in the argument. Errors do not short-circuit
    /// here; predicates like COUNTA and ISERROR inspect them.
    pub fn values(&self) -> Vec<CellValue> {
        match self {
            Arg::Scalar(CellValue::Empty) => Vec::new(),
            Arg::Scalar(v) => vec![v.clone()],
            Arg::Range { range, ctx } => ctx
                .populated_in(*range)
                .into_iter()
                .map(|(_, v)| v)
                .collect(),
        }
    }
}

/// Coerce a value to a number per the table above.
pub fn coerce_number(value: &CellValue) -> Result<f64, ErrorKind> {
    match value {
        CellValue::Number(n) => Ok(*n),
        CellValue::Boolean(b) => Ok(if *b { 1.0 } else { 0.0 }),
        CellValue::Empty => Ok(0.0),
        CellValue::Text(s) => s.trim().parse::<f64>().map_err(|_| ErrorKind::ValueError),
        CellValue::Error(kind) => Err(*kind),
    }
}

/// Coerce a value to a boolean per the table above.
pub fn coerce_bool(value: &CellValue) -> Result<bool, ErrorKind> {
    match value {
        CellValue::Boolean(b) => Ok(*b),
        CellValue::Number(n) => Ok(*n != 0.0),
        CellValue::Empty => Ok(false),
        CellValue::Text(s) => match s.trim().to_ascii_uppercase().as_str() {
            "TRUE" => Ok(true),
            "FALSE" => Ok(false),
            _ => Err(ErrorKind::ValueError),
        },
        CellValue::Error(kind) => Err(*kind),
    }
}

/// Quiet numeric view used by comparisons: no error, just "is it numberish".
fn try_number(value: &CellValue) -> Option<f64> {
    match value {
        CellValue::Number(n) => Some(*n),
        CellValue::Boolean(b) => Some(if *b { 1.0 } else { 0.0 }),
        CellValue::Empty => Some(0.0),
        CellValue::Text(s) => s.trim().parse::<f64>().ok(),
        CellValue::Error(_) => None,
    }
}

/// Evaluate an expression to a cell value.
///
/// Never fails: runtime problems become `CellValue::Error` results that
/// propagate like any other value.
pub fn evaluate(expr: &Expr, ctx: &dyn ValueResolver, functions: &FunctionTable) -> CellValue {
    match expr {
        Expr::Number(n) => CellValue::Number(*n),
        Expr::Text(s) => CellValue::Text(s.clone()),
        Expr::Boolean(b) => CellValue::Boolean(*b),
        Expr::Empty => CellValue::Empty,
        Expr::CellRef { coord, .. } => ctx.value_at(*coord),
        // A range has no scalar value of its own.
        Expr::Range { .. } => CellValue::Error(ErrorKind::ValueError),
        Expr::Function { name, args } => {
            let evaluated: Vec<Arg> = args.iter().map(|a| eval_arg(a, ctx, functions)).collect();
            functions.call(name, &evaluated)
        }
        Expr::BinaryOp { op, left, right } => {
            let l = evaluate(left, ctx, functions);
            let r = evaluate(right, ctx, functions);
            eval_binary(*op, &l, &r)
        }
    }
}

fn eval_arg<'a>(expr: &Expr, ctx: &'a dyn ValueResolver, functions: &FunctionTable) -> Arg<'a> {
    match expr {
        Expr::Range { range, .. } => Arg::Range { range: *range, ctx },
        other => Arg::Scalar(evaluate(other, ctx, functions)),
    }
}

fn eval_binary(op: Op, left: &CellValue, right: &CellValue) -> CellValue {
    match op {
        Op::Add | Op::Sub | Op::Mul | Op::Div | Op::Pow => {
            let l = match coerce_number(left) {
                Ok(n) => n,
                Err(kind) => return CellValue::Error(kind),
            };
            let r = match coerce_number(right) {
                Ok(n) => n,
                Err(kind) => return CellValue::Error(kind),
            };
            match op {
                Op::Add => CellValue::Number(l + r),
                Op::Sub => CellValue::Number(l - r),
                Op::Mul => CellValue::Number(l * r),
                Op::Div => {
                    if r == 0.0 {
                        CellValue::Error(ErrorKind::DivByZero)
                    } else {
                        CellValue::Number(l / r)
                    }
                }
                Op::Pow => CellValue::Number(l.powf(r)),
                _ => unreachable!(),
            }
        }
        Op::Concat => {
            if let CellValue::Error(kind) = left {
                return CellValue::Error(*kind);
            }
            if let CellValue::Error(kind) = right {
                return CellValue::Error(*kind);
            }
            CellValue::Text(format!("{}{}", left.display_text(), right.display_text()))
        }
        Op::Lt | Op::Gt | Op::Eq | Op::LtEq | Op::GtEq | Op::NotEq => {
            if let CellValue::Error(kind) = left {
                return CellValue::Error(*kind);
            }
            if let CellValue::Error(kind) = right {
                return CellValue::Error(*kind);
            }
            let ordering = match (try_number(left), try_number(right)) {
                (Some(l), Some(r)) => l.partial_cmp(&r),
                _ => Some(
                    left.display_text()
                        .to_ascii_lowercase()
                        .cmp(&right.display_text().to_ascii_lowercase()),
                ),
            };
            let Some(ordering) = ordering else {
                // NaN comparison
                return CellValue::Error(ErrorKind::ValueError);
            };
            let result = match op {
                Op::Lt => ordering.is_lt(),
                Op::Gt => ordering.is_gt(),
                Op::Eq => ordering.is_eq(),
                Op::LtEq => ordering.is_le(),
                Op::GtEq => ordering.is_ge(),
                Op::NotEq => ordering.is_ne(),
                _ => unreachable!(),
            };
            CellValue::Boolean(result)
        }
    }
}
