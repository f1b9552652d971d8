//! Error management module.

use std::fmt;

use quick_xml::events::attributes::AttrError;

/// An enum for all the ways opening a package or extracting a sheet can fail.
///
/// Structural failures name the package part (and, where it makes sense, the
/// row) they were detected in.
#[derive(Debug)]
pub enum Error {
    /// Io error
    Io(std::io::Error),
    /// Zip container error
    Zip(zip::result::ZipError),
    /// The package has no workbook part
    MissingWorkbook,
    /// The requested worksheet name does not exist in the workbook
    WorksheetNotFound(String),
    /// The requested sheet position is out of range
    SheetIndex {
        /// Requested zero-based index
        idx: usize,
        /// Number of sheets in the workbook
        count: usize,
    },
    /// Worksheet part absent, or its `worksheet` root element is
    MissingWorksheet(String),
    /// Worksheet has no `sheetData` row container
    MissingSheetData(String),
    /// Xml error
    Xml {
        /// Package part being parsed
        part: String,
        /// Underlying parser error
        source: quick_xml::Error,
    },
    /// Xml attribute error
    XmlAttr {
        /// Package part being parsed
        part: String,
        /// Underlying attribute error
        source: AttrError,
    },
    /// Unexpected end of xml
    XmlEof {
        /// Package part being parsed
        part: String,
        /// Element whose closing tag was expected
        expected: &'static str,
    },
    /// A cell carries a reference attribute that cannot be decoded
    UnaddressableCell {
        /// Package part being parsed
        part: String,
        /// 1-based row the cell appeared in
        row: u32,
    },
    /// Extraction was cancelled cooperatively before completing
    Cancelled(String),
}

from_err!(std::io::Error, Error, Io);
from_err!(zip::result::ZipError, Error, Zip);

impl Error {
    pub(crate) fn xml(part: &str, source: quick_xml::Error) -> Self {
        Error::Xml {
            part: part.to_string(),
            source,
        }
    }

    pub(crate) fn attr(part: &str, source: AttrError) -> Self {
        Error::XmlAttr {
            part: part.to_string(),
            source,
        }
    }

    pub(crate) fn eof(part: &str, expected: &'static str) -> Self {
        Error::XmlEof {
            part: part.to_string(),
            expected,
        }
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::Io(e) => write!(f, "I/O error: {e}"),
            Error::Zip(e) => write!(f, "Zip error: {e}"),
            Error::MissingWorkbook => write!(f, "No workbook part (xl/workbook.xml) in package"),
            Error::WorksheetNotFound(n) => write!(f, "Worksheet '{n}' not found"),
            Error::SheetIndex { idx, count } => {
                write!(f, "Sheet index {idx} out of range, workbook has {count} sheets")
            }
            Error::MissingWorksheet(p) => write!(f, "Invalid sheet xml '{p}' (no <worksheet>)"),
            Error::MissingSheetData(p) => write!(f, "Invalid sheet xml '{p}' (no <sheetData>)"),
            Error::Xml { part, source } => write!(f, "Xml error in '{part}': {source}"),
            Error::XmlAttr { part, source } => {
                write!(f, "Xml attribute error in '{part}': {source}")
            }
            Error::XmlEof { part, expected } => {
                write!(f, "Unexpected end of xml in '{part}', expecting '</{expected}>'")
            }
            Error::UnaddressableCell { part, row } => {
                write!(f, "Cell without a decodable reference in '{part}', row {row}")
            }
            Error::Cancelled(p) => write!(f, "Extraction of '{p}' was cancelled"),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::Io(e) => Some(e),
            Error::Zip(e) => Some(e),
            Error::Xml { source, .. } => Some(source),
            Error::XmlAttr { source, .. } => Some(source),
            _ => None,
        }
    }
}
