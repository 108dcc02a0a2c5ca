pub mod coord;
pub mod range;

pub use coord::{col_to_letters, letters_to_col, AddressError, Coord, MAX_COLS, MAX_ROWS};
pub use range::CellRange;
