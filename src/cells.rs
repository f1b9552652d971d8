//! Cell typing and the column-oriented sheet table.

use std::fmt;
use std::sync::OnceLock;

use chrono::{Duration, NaiveDate, NaiveDateTime, NaiveTime};
use serde::ser::{Serialize, SerializeStruct, Serializer};

static SERIAL_EPOCH: OnceLock<NaiveDateTime> = OnceLock::new();

/// <https://learn.microsoft.com/en-us/office/troubleshoot/excel/1900-and-1904-date-system>
const DAYS_1900_TO_1904: f64 = 1462.;

const MS_MULTIPLIER: f64 = 24f64 * 60f64 * 60f64 * 1e+3f64;

/// Resolved type of one worksheet cell.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CellType {
    /// Cell element present but without value content
    #[default]
    Blank,
    /// Error value such as `#DIV/0!`
    Error,
    /// Boolean
    Logical,
    /// Serial or ISO date resolved to a wall-clock timestamp
    Date,
    /// Plain number
    Numeric,
    /// Text, whether shared, inline or a cached formula string
    Character,
}

impl CellType {
    /// Lowercase name of the type, as exposed in the `cell_type` column.
    pub fn as_str(&self) -> &'static str {
        match self {
            CellType::Blank => "blank",
            CellType::Error => "error",
            CellType::Logical => "logical",
            CellType::Date => "date",
            CellType::Numeric => "numeric",
            CellType::Character => "character",
        }
    }
}

impl fmt::Display for CellType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Serialize for CellType {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

/// Every cell of one worksheet, flattened into columns of equal length.
///
/// Row *i* across all columns describes the same cell. Rows follow document
/// order of the `row`/`c` elements, which is not necessarily address order.
/// For each non-blank row exactly one of the [`logical`](Self::logical),
/// [`numeric`](Self::numeric), [`date`](Self::date),
/// [`character`](Self::character) and [`error`](Self::error) columns is
/// populated; blank rows populate none of them.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SheetCells {
    /// Declared name of the sheet the cells came from
    pub name: String,
    /// Original cell reference, e.g. "B7"; synthesized from traversal order
    /// when the source element carries no reference attribute
    pub address: Vec<String>,
    /// 1-based row number
    pub row: Vec<u32>,
    /// 1-based column number
    pub col: Vec<u32>,
    /// Raw literal as it appeared in markup, before any resolution; for a
    /// shared-string cell this is the pool index, not the text
    pub content: Vec<Option<String>>,
    /// Resolved type of each cell
    pub cell_type: Vec<CellType>,
    /// Boolean cell values
    pub logical: Vec<Option<bool>>,
    /// Plain numeric cell values
    pub numeric: Vec<Option<f64>>,
    /// Date/time cell values (UTC wall clock)
    pub date: Vec<Option<NaiveDateTime>>,
    /// Text cell values, shared strings resolved through the pool
    pub character: Vec<Option<String>>,
    /// Literal error text, e.g. "#N/A"
    pub error: Vec<Option<String>>,
    /// Raw formula text for cells carrying a cached formula result
    pub formula: Vec<Option<String>>,
    /// Declared height of the cell's row, if any
    pub height: Vec<Option<f64>>,
    /// Declared width of the cell's column, if any
    pub width: Vec<Option<f64>>,
}

impl SheetCells {
    /// Pre-size every column to `cellcount`, filled with its null marker.
    /// Columns are written exactly once afterwards and never resized.
    pub(crate) fn with_capacity(name: String, cellcount: usize) -> Self {
        SheetCells {
            name,
            address: vec![String::new(); cellcount],
            row: vec![0; cellcount],
            col: vec![0; cellcount],
            content: vec![None; cellcount],
            cell_type: vec![CellType::Blank; cellcount],
            logical: vec![None; cellcount],
            numeric: vec![None; cellcount],
            date: vec![None; cellcount],
            character: vec![None; cellcount],
            error: vec![None; cellcount],
            formula: vec![None; cellcount],
            height: vec![None; cellcount],
            width: vec![None; cellcount],
        }
    }

    /// Number of cell records (the length of every column).
    pub fn len(&self) -> usize {
        self.address.len()
    }

    /// True for a sheet with no cell elements at all.
    pub fn is_empty(&self) -> bool {
        self.address.is_empty()
    }
}

impl Serialize for SheetCells {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut s = serializer.serialize_struct("SheetCells", 14)?;
        s.serialize_field("name", &self.name)?;
        s.serialize_field("address", &self.address)?;
        s.serialize_field("row", &self.row)?;
        s.serialize_field("col", &self.col)?;
        s.serialize_field("content", &self.content)?;
        s.serialize_field("type", &self.cell_type)?;
        s.serialize_field("logical", &self.logical)?;
        s.serialize_field("numeric", &self.numeric)?;
        s.serialize_field("date", &self.date)?;
        s.serialize_field("character", &self.character)?;
        s.serialize_field("error", &self.error)?;
        s.serialize_field("formula", &self.formula)?;
        s.serialize_field("height", &self.height)?;
        s.serialize_field("width", &self.width)?;
        s.end()
    }
}

/// Convert a serial day count to a wall-clock timestamp.
///
/// The 1900 system counts from a fictitious 1900-02-29 onwards: serials
/// below 60 are shifted forward one day so that serial 1 is 1900-01-01,
/// while serials of 60 and above are taken as-is against the 1899-12-30
/// epoch, which keeps every representable date aligned with the source
/// application. Serial 60 itself has no proleptic Gregorian equivalent and
/// lands on 1900-02-28. The 1904 system is a plain offset with no quirk.
pub(crate) fn serial_to_datetime(serial: f64, is_1904: bool) -> Option<NaiveDateTime> {
    let epoch = SERIAL_EPOCH.get_or_init(|| {
        NaiveDate::from_ymd_opt(1899, 12, 30)
            .unwrap()
            .and_time(NaiveTime::MIN)
    });
    let days = if is_1904 {
        serial + DAYS_1900_TO_1904
    } else {
        serial
    };
    let days = if days >= 60.0 { days } else { days + 1.0 };
    let ms = days * MS_MULTIPLIER;
    epoch.checked_add_signed(Duration::milliseconds(ms.round() as i64))
}
