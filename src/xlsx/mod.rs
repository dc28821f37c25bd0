// Minimal xlsx template engine on top of `zip` and `quick-xml`.
//
// A template is opened, edited in place and saved back. Parts the engine
// does not model (drawings, themes, printer settings, ...) are copied
// through byte for byte.
mod cell_ref;
mod styles;
mod table;
mod workbook;
mod worksheet;
mod xml;

#[cfg(test)]
pub mod testing;

pub use cell_ref::{cell_ref, CellRange};
#[cfg(test)]
pub use cell_ref::col_to_letters;
pub use styles::Stylesheet;
pub use workbook::Workbook;
pub use worksheet::{CellValue, Worksheet};
