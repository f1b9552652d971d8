//! Extract every cell of an xlsx workbook as a flat, typed table.
//!
//! Most spreadsheet readers hand back a rectangular range of values and
//! drop everything that does not round-trip cleanly as a number or a
//! string. This crate instead produces one record per cell element, in
//! document order, with the cell's address, its raw pre-resolution
//! content, its resolved type (blank, error, logical, date, numeric or
//! character) and exactly one typed value. That is the shape
//! tabular-analysis tooling wants when it has to audit what a workbook
//! actually contains.
//!
//! Typing a cell is not a local decision: shared strings live in a
//! workbook-wide pool, and whether a numeric literal is a date depends on
//! the number format attached to its style and on the workbook's date
//! system (including the 1900 system's fictitious leap day). All of that
//! shared state is loaded once into a [`WorkbookContext`], which is
//! immutable afterwards and can therefore back parallel extraction of
//! independent sheets.
//!
//! # Examples
//! ```no_run
//! use xlcells::{CellType, Workbook};
//!
//! let mut workbook = Workbook::open("report.xlsx")?;
//! let cells = workbook.worksheet_cells(0)?;
//! for i in 0..cells.len() {
//!     if cells.cell_type[i] == CellType::Date {
//!         println!("{}: {:?}", cells.address[i], cells.date[i]);
//!     }
//! }
//! # Ok::<(), xlcells::Error>(())
//! ```
#![deny(missing_docs)]

#[macro_use]
mod utils;

mod cells;
mod error;
mod formats;
mod sheet;
mod workbook;

pub use cells::{CellType, SheetCells};
pub use error::Error;
pub use formats::{builtin_format_by_code, detect_number_format, FormatKind, NumberFormat};
pub use workbook::{Workbook, WorkbookContext};
