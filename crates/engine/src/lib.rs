pub mod cache;
pub mod cell;
pub mod cell_id;
pub mod config;
pub mod dep_graph;
pub mod error;
pub mod events;
pub mod formula;
pub mod recalc;
pub mod sheet;
pub mod workbook;

pub use cell::{Cell, CellFormat, CellValue, RawInput};
pub use cell_id::CellId;
pub use config::EngineConfig;
pub use error::{CellWriteError, CycleError, ErrorKind, FunctionError, ParseError};
pub use events::CellsChanged;
pub use formula::eval::{coerce_bool, coerce_number, Arg, ValueResolver};
pub use formula::functions::{Arity, FunctionImpl, FunctionTable};
pub use sheet::{Sheet, SheetId};
pub use workbook::Workbook;
