// Built-in spreadsheet functions and the extensible function table.
//
// The table is owned and invoked only by the evaluator. The plugin
// collaborator registers additional functions through `register`, which
// refuses to shadow a built-in. Registration is a `&mut` operation, so it
// serializes with every other mutation by construction.

use ordered_float::OrderedFloat;
use rustc_hash::FxHashMap;

use gridcell_core::Coord;

use crate::cell::CellValue;
use crate::error::{ErrorKind, FunctionError};

use super::eval::{coerce_bool, coerce_number, Arg};

/// Argument-count rule checked before a function body runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Arity {
    Any,
    Exact(usize),
    AtLeast(usize),
    Between(usize, usize),
}

impl Arity {
    pub fn accepts(&self, n: usize) -> bool {
        match *self {
            Arity::Any => true,
            Arity::Exact(k) => n == k,
            Arity::AtLeast(k) => n >= k,
            Arity::Between(lo, hi) => lo <= n && n <= hi,
        }
    }
}

/// A function implementation. Receives evaluated arguments and produces a
/// value; runtime problems are returned as error values, never panics.
pub type FunctionImpl = fn(&[Arg]) -> CellValue;

struct FunctionDef {
    arity: Arity,
    imp: FunctionImpl,
    builtin: bool,
}

/// Name -> implementation mapping for function calls.
pub struct FunctionTable {
    entries: FxHashMap<String, FunctionDef>,
}

impl Default for FunctionTable {
    fn default() -> Self {
        Self::with_builtins()
    }
}

impl FunctionTable {
    /// An empty table. Mostly useful in tests.
    pub fn empty() -> Self {
        Self {
            entries: FxHashMap::default(),
        }
    }

    /// A table seeded with every built-in.
    pub fn with_builtins() -> Self {
        let mut table = Self::empty();
        for (name, arity, imp) in BUILTINS {
            table.entries.insert(
                (*name).to_string(),
                FunctionDef {
                    arity: *arity,
                    imp: *imp,
                    builtin: true,
                },
            );
        }
        table
    }

    /// Register an external function.
    ///
    /// Names are case-insensitive (stored uppercase). Collisions with
    /// built-ins and double registrations are refused.
    pub fn register(
        &mut self,
        name: &str,
        arity: Arity,
        imp: FunctionImpl,
    ) -> Result<(), FunctionError> {
        if name.is_empty()
            || !name.chars().next().is_some_and(|c| c.is_ascii_alphabetic())
            || !name
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '.')
        {
            return Err(FunctionError::InvalidName(name.to_string()));
        }

        let key = name.to_ascii_uppercase();
        if let Some(existing) = self.entries.get(&key) {
            return Err(if existing.builtin {
                FunctionError::BuiltinCollision(key)
            } else {
                FunctionError::AlreadyRegistered(key)
            });
        }

        self.entries.insert(
            key,
            FunctionDef {
                arity,
                imp,
                builtin: false,
            },
        );
        Ok(())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.entries.contains_key(&name.to_ascii_uppercase())
    }

    pub fn is_builtin(&self, name: &str) -> bool {
        self.entries
            .get(&name.to_ascii_uppercase())
            .is_some_and(|def| def.builtin)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Invoke a function by (already uppercased) name.
    ///
    /// Unknown names are `#NAME?`, arity violations `#VALUE!`.
    pub fn call(&self, name: &str, args: &[Arg]) -> CellValue {
        let Some(def) = self.entries.get(name) else {
            return CellValue::Error(ErrorKind::NameError);
        };
        if !def.arity.accepts(args.len()) {
            return CellValue::Error(ErrorKind::ValueError);
        }
        (def.imp)(args)
    }
}

impl std::fmt::Debug for FunctionTable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FunctionTable")
            .field("functions", &self.entries.len())
            .finish()
    }
}

const BUILTINS: &[(&str, Arity, FunctionImpl)] = &[
    // Math / aggregation
    ("SUM", Arity::Any, fn_sum),
    ("AVERAGE", Arity::AtLeast(1), fn_average),
    ("COUNT", Arity::AtLeast(1), fn_count),
    ("COUNTA", Arity::AtLeast(1), fn_counta),
    ("MIN", Arity::AtLeast(1), fn_min),
    ("MAX", Arity::AtLeast(1), fn_max),
    ("MEDIAN", Arity::AtLeast(1), fn_median),
    ("ABS", Arity::Exact(1), fn_abs),
    ("ROUND", Arity::Between(1, 2), fn_round),
    ("SQRT", Arity::Exact(1), fn_sqrt),
    ("POWER", Arity::Exact(2), fn_power),
    ("MOD", Arity::Exact(2), fn_mod),
    // Logic
    ("IF", Arity::Between(2, 3), fn_if),
    ("AND", Arity::AtLeast(1), fn_and),
    ("OR", Arity::AtLeast(1), fn_or),
    ("NOT", Arity::Exact(1), fn_not),
    ("IFERROR", Arity::Exact(2), fn_iferror),
    // Information
    ("ISBLANK", Arity::Exact(1), fn_isblank),
    ("ISNUMBER", Arity::Exact(1), fn_isnumber),
    ("ISTEXT", Arity::Exact(1), fn_istext),
    ("ISERROR", Arity::Exact(1), fn_iserror),
    // Text
    ("CONCATENATE", Arity::AtLeast(1), fn_concatenate),
    ("LEN", Arity::Exact(1), fn_len),
    ("UPPER", Arity::Exact(1), fn_upper),
    ("LOWER", Arity::Exact(1), fn_lower),
    ("TRIM", Arity::Exact(1), fn_trim),
    // Lookup
    ("VLOOKUP", Arity::Between(3, 4), fn_vlookup),
    ("INDEX", Arity::Between(2, 3), fn_index),
    ("MATCH", Arity::Between(2, 3), fn_match),
];

fn error(kind: ErrorKind) -> CellValue {
    CellValue::Error(kind)
}

/// Flatten every argument's numeric view, short-circuiting on errors.
fn collect_numbers(args: &[Arg]) -> Result<Vec<f64>, ErrorKind> {
    let mut out = Vec::new();
    for arg in args {
        out.extend(arg.numbers()?);
    }
    Ok(out)
}

fn fn_sum(args: &[Arg]) -> CellValue {
    match collect_numbers(args) {
        Ok(nums) => CellValue::Number(nums.iter().sum()),
        Err(kind) => error(kind),
    }
}

fn fn_average(args: &[Arg]) -> CellValue {
    match collect_numbers(args) {
        Ok(nums) if nums.is_empty() => error(ErrorKind::DivByZero),
        Ok(nums) => CellValue::Number(nums.iter().sum::<f64>() / nums.len() as f64),
        Err(kind) => error(kind),
    }
}

fn fn_count(args: &[Arg]) -> CellValue {
    match collect_numbers(args) {
        Ok(nums) => CellValue::Number(nums.len() as f64),
        Err(kind) => error(kind),
    }
}

fn fn_counta(args: &[Arg]) -> CellValue {
    let count: usize = args.iter().map(|a| a.values().len()).sum();
    CellValue::Number(count as f64)
}

fn fn_min(args: &[Arg]) -> CellValue {
    match collect_numbers(args) {
        // MIN/MAX over nothing is 0, matching sheet conventions.
        Ok(nums) if nums.is_empty() => CellValue::Number(0.0),
        Ok(nums) => CellValue::Number(nums.iter().copied().fold(f64::INFINITY, f64::min)),
        Err(kind) => error(kind),
    }
}

fn fn_max(args: &[Arg]) -> CellValue {
    match collect_numbers(args) {
        Ok(nums) if nums.is_empty() => CellValue::Number(0.0),
        Ok(nums) => CellValue::Number(nums.iter().copied().fold(f64::NEG_INFINITY, f64::max)),
        Err(kind) => error(kind),
    }
}

fn fn_median(args: &[Arg]) -> CellValue {
    let mut nums = match collect_numbers(args) {
        Ok(nums) => nums,
        Err(kind) => return error(kind),
    };
    if nums.is_empty() {
        return error(ErrorKind::ValueError);
    }
    nums.sort_by_key(|n| OrderedFloat(*n));
    let mid = nums.len() / 2;
    if nums.len() % 2 == 1 {
        CellValue::Number(nums[mid])
    } else {
        CellValue::Number((nums[mid - 1] + nums[mid]) / 2.0)
    }
}

fn scalar_number(arg: &Arg) -> Result<f64, ErrorKind> {
    coerce_number(&arg.scalar()?)
}

fn fn_abs(args: &[Arg]) -> CellValue {
    match scalar_number(&args[0]) {
        Ok(n) => CellValue::Number(n.abs()),
        Err(kind) => error(kind),
    }
}

fn fn_round(args: &[Arg]) -> CellValue {
    let n = match scalar_number(&args[0]) {
        Ok(n) => n,
        Err(kind) => return error(kind),
    };
    let digits = if args.len() > 1 {
        match scalar_number(&args[1]) {
            Ok(d) => d as i32,
            Err(kind) => return error(kind),
        }
    } else {
        0
    };
    let factor = 10f64.powi(digits);
    CellValue::Number((n * factor).round() / factor)
}

fn fn_sqrt(args: &[Arg]) -> CellValue {
    match scalar_number(&args[0]) {
        Ok(n) if n < 0.0 => error(ErrorKind::ValueError),
        Ok(n) => CellValue::Number(n.sqrt()),
        Err(kind) => error(kind),
    }
}

fn fn_power(args: &[Arg]) -> CellValue {
    match (scalar_number(&args[0]), scalar_number(&args[1])) {
        (Ok(base), Ok(exp)) => CellValue::Number(base.powf(exp)),
        (Err(kind), _) | (_, Err(kind)) => error(kind),
    }
}

fn fn_mod(args: &[Arg]) -> CellValue {
    match (scalar_number(&args[0]), scalar_number(&args[1])) {
        (Ok(_), Ok(d)) if d == 0.0 => error(ErrorKind::DivByZero),
        // Result takes the divisor's sign: n - d * floor(n / d)
        (Ok(n), Ok(d)) => CellValue::Number(n - d * (n / d).floor()),
        (Err(kind), _) | (_, Err(kind)) => error(kind),
    }
}

fn fn_if(args: &[Arg]) -> CellValue {
    let condition = match args[0].scalar().and_then(|v| coerce_bool(&v)) {
        Ok(b) => b,
        Err(kind) => return error(kind),
    };
    if condition {
        args[1].scalar().map_or_else(error, |v| v)
    } else if args.len() > 2 {
        args[2].scalar().map_or_else(error, |v| v)
    } else {
        CellValue::Boolean(false)
    }
}

fn fold_bools(args: &[Arg]) -> Result<Vec<bool>, ErrorKind> {
    let mut out = Vec::new();
    for arg in args {
        for value in arg.values() {
            out.push(coerce_bool(&value)?);
        }
    }
    Ok(out)
}

fn fn_and(args: &[Arg]) -> CellValue {
    match fold_bools(args) {
        Ok(bools) if bools.is_empty() => error(ErrorKind::ValueError),
        Ok(bools) => CellValue::Boolean(bools.into_iter().all(|b| b)),
        Err(kind) => error(kind),
    }
}

fn fn_or(args: &[Arg]) -> CellValue {
    match fold_bools(args) {
        Ok(bools) if bools.is_empty() => error(ErrorKind::ValueError),
        Ok(bools) => CellValue::Boolean(bools.into_iter().any(|b| b)),
        Err(kind) => error(kind),
    }
}

fn fn_not(args: &[Arg]) -> CellValue {
    match args[0].scalar().and_then(|v| coerce_bool(&v)) {
        Ok(b) => CellValue::Boolean(!b),
        Err(kind) => error(kind),
    }
}

fn fn_iferror(args: &[Arg]) -> CellValue {
    match args[0].scalar() {
        Ok(CellValue::Error(_)) | Err(_) => args[1].scalar().map_or_else(error, |v| v),
        Ok(value) => value,
    }
}

fn fn_isblank(args: &[Arg]) -> CellValue {
    match args[0].scalar() {
        Ok(value) => CellValue::Boolean(value.is_empty()),
        Err(kind) => error(kind),
    }
}

fn fn_isnumber(args: &[Arg]) -> CellValue {
    match args[0].scalar() {
        Ok(value) => CellValue::Boolean(matches!(value, CellValue::Number(_))),
        Err(kind) => error(kind),
    }
}

fn fn_istext(args: &[Arg]) -> CellValue {
    match args[0].scalar() {
        Ok(value) => CellValue::Boolean(matches!(value, CellValue::Text(_))),
        Err(kind) => error(kind),
    }
}

fn fn_iserror(args: &[Arg]) -> CellValue {
    match args[0].scalar() {
        Ok(value) => CellValue::Boolean(value.is_error()),
        Err(_) => CellValue::Boolean(true),
    }
}

fn scalar_text(arg: &Arg) -> Result<String, ErrorKind> {
    match arg.scalar()? {
        CellValue::Error(kind) => Err(kind),
        value => Ok(value.display_text()),
    }
}

fn fn_concatenate(args: &[Arg]) -> CellValue {
    let mut out = String::new();
    for arg in args {
        match scalar_text(arg) {
            Ok(s) => out.push_str(&s),
            Err(kind) => return error(kind),
        }
    }
    CellValue::Text(out)
}

fn fn_len(args: &[Arg]) -> CellValue {
    match scalar_text(&args[0]) {
        Ok(s) => CellValue::Number(s.chars().count() as f64),
        Err(kind) => error(kind),
    }
}

fn fn_upper(args: &[Arg]) -> CellValue {
    match scalar_text(&args[0]) {
        Ok(s) => CellValue::Text(s.to_uppercase()),
        Err(kind) => error(kind),
    }
}

fn fn_lower(args: &[Arg]) -> CellValue {
    match scalar_text(&args[0]) {
        Ok(s) => CellValue::Text(s.to_lowercase()),
        Err(kind) => error(kind),
    }
}

fn fn_trim(args: &[Arg]) -> CellValue {
    match scalar_text(&args[0]) {
        Ok(s) => CellValue::Text(s.trim().to_string()),
        Err(kind) => error(kind),
    }
}

/// Loose equality used by the lookup functions.
fn lookup_eq(a: &CellValue, b: &CellValue) -> bool {
    match (a, b) {
        (CellValue::Number(x), CellValue::Number(y)) => x == y,
        _ => a
            .display_text()
            .eq_ignore_ascii_case(&b.display_text()),
    }
}

fn fn_vlookup(args: &[Arg]) -> CellValue {
    let lookup = match args[0].scalar() {
        Ok(CellValue::Error(kind)) => return error(kind),
        Ok(v) => v,
        Err(kind) => return error(kind),
    };
    let Arg::Range { range, ctx } = &args[1] else {
        return error(ErrorKind::ValueError);
    };
    let col_index = match scalar_number(&args[2]) {
        Ok(n) if n >= 1.0 => n as usize,
        Ok(_) => return error(ErrorKind::RefError),
        Err(kind) => return error(kind),
    };
    if col_index > range.col_count() {
        return error(ErrorKind::RefError);
    }
    let approximate = if args.len() > 3 {
        match args[3].scalar().and_then(|v| coerce_bool(&v)) {
            Ok(b) => b,
            Err(kind) => return error(kind),
        }
    } else {
        false
    };

    let first_col = range.start().col;
    let result_col = first_col + col_index - 1;
    let mut best_row: Option<usize> = None;

    for row in range.start().row..=range.end().row {
        let key = ctx.value_at(Coord::new(row, first_col));
        if lookup_eq(&key, &lookup) {
            best_row = Some(row);
            break;
        }
        if approximate {
            // Largest key not exceeding the lookup, scan order (assumes
            // the first column is sorted ascending).
            if let (Ok(k), Ok(l)) = (coerce_number(&key), coerce_number(&lookup)) {
                if k <= l {
                    best_row = Some(row);
                }
            }
        }
    }

    match best_row {
        Some(row) => ctx.value_at(Coord::new(row, result_col)),
        None => error(ErrorKind::ValueError),
    }
}

fn fn_index(args: &[Arg]) -> CellValue {
    let Arg::Range { range, ctx } = &args[0] else {
        return error(ErrorKind::ValueError);
    };
    let row_num = match scalar_number(&args[1]) {
        Ok(n) if n >= 1.0 => n as usize,
        Ok(_) => return error(ErrorKind::RefError),
        Err(kind) => return error(kind),
    };
    let col_num = if args.len() > 2 {
        match scalar_number(&args[2]) {
            Ok(n) if n >= 1.0 => n as usize,
            Ok(_) => return error(ErrorKind::RefError),
            Err(kind) => return error(kind),
        }
    } else {
        1
    };
    if row_num > range.row_count() || col_num > range.col_count() {
        return error(ErrorKind::RefError);
    }
    ctx.value_at(Coord::new(
        range.start().row + row_num - 1,
        range.start().col + col_num - 1,
    ))
}

fn fn_match(args: &[Arg]) -> CellValue {
    let lookup = match args[0].scalar() {
        Ok(CellValue::Error(kind)) => return error(kind),
        Ok(v) => v,
        Err(kind) => return error(kind),
    };
    let Arg::Range { range, ctx } = &args[1] else {
        return error(ErrorKind::ValueError);
    };
    if range.row_count() > 1 && range.col_count() > 1 {
        return error(ErrorKind::ValueError);
    }
    let match_type = if args.len() > 2 {
        match scalar_number(&args[2]) {
            Ok(n) => n as i64,
            Err(kind) => return error(kind),
        }
    } else {
        1
    };

    let coords: Vec<Coord> = range.iter().collect();
    match match_type {
        0 => {
            for (i, coord) in coords.iter().enumerate() {
                if lookup_eq(&ctx.value_at(*coord), &lookup) {
                    return CellValue::Number((i + 1) as f64);
                }
            }
            error(ErrorKind::ValueError)
        }
        1 => {
            // Largest value <= lookup (assumes ascending order).
            let target = match coerce_number(&lookup) {
                Ok(n) => n,
                Err(kind) => return error(kind),
            };
            let mut best: Option<usize> = None;
            for (i, coord) in coords.iter().enumerate() {
                match coerce_number(&ctx.value_at(*coord)) {
                    Ok(n) if n <= target => best = Some(i + 1),
                    _ => {}
                }
            }
            best.map(|i| CellValue::Number(i as f64))
                .unwrap_or_else(|| error(ErrorKind::ValueError))
        }
        _ => error(ErrorKind::ValueError),
    }
}
