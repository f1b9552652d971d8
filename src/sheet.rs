//! Two-pass worksheet extraction.
//!
//! A sheet is streamed twice: a counting pass establishes the exact number
//! of cell elements (so every output column can be allocated to final size
//! up front) and collects column-width declarations, then a resolution pass
//! walks the same events again and fills one record per cell. Both passes
//! poll an optional cancellation flag every 1000 rows.

use std::borrow::Cow;
use std::io::{Read, Seek};
use std::sync::atomic::{AtomicBool, Ordering};

use log::warn;
use quick_xml::events::Event;
use quick_xml::name::QName;
use zip::read::ZipArchive;

use crate::cells::{serial_to_datetime, CellType, SheetCells};
use crate::error::Error;
use crate::workbook::{read_string, sheet_part_path, xml_reader, WorkbookContext, XlReader};

const CANCEL_CHECK_ROWS: u32 = 1000;

/// Everything the counting pass learns about a sheet.
#[derive(Debug, Default)]
struct Survey {
    cellcount: usize,
    /// 0-based inclusive column ranges with a declared width
    col_widths: Vec<(u32, u32, f64)>,
}

impl Survey {
    fn width_of(&self, col: u32) -> Option<f64> {
        self.col_widths
            .iter()
            .find(|(min, max, _)| (*min..=*max).contains(&col))
            .map(|(_, _, w)| *w)
    }
}

pub(crate) fn extract<RS: Read + Seek>(
    zip: &mut ZipArchive<RS>,
    context: &WorkbookContext,
    index: usize,
    cancel: Option<&AtomicBool>,
) -> Result<SheetCells, Error> {
    let name = match context.sheet_names().get(index) {
        Some(name) => name.clone(),
        None => {
            return Err(Error::SheetIndex {
                idx: index,
                count: context.sheet_names().len(),
            })
        }
    };
    let part = sheet_part_path(index);
    let survey = survey_sheet(zip, &part, cancel)?;
    let mut cells = SheetCells::with_capacity(name, survey.cellcount);
    fill_cells(zip, context, &part, &survey, &mut cells, cancel)?;
    Ok(cells)
}

fn cancelled(cancel: Option<&AtomicBool>) -> bool {
    cancel.is_some_and(|flag| flag.load(Ordering::Relaxed))
}

/// Counting pass: walk every row and cell element once so that output
/// columns can be allocated to exact size rather than grown incrementally.
fn survey_sheet<RS: Read + Seek>(
    zip: &mut ZipArchive<RS>,
    part: &str,
    cancel: Option<&AtomicBool>,
) -> Result<Survey, Error> {
    let mut xml = match xml_reader(zip, part) {
        None => return Err(Error::MissingWorksheet(part.to_string())),
        Some(x) => x?,
    };
    let mut survey = Survey::default();
    let mut saw_worksheet = false;
    let mut saw_sheet_data = false;
    let mut rows = 0u32;
    let mut buf = Vec::with_capacity(1024);
    loop {
        buf.clear();
        match xml.read_event_into(&mut buf) {
            Ok(Event::Start(ref e)) => match e.local_name().as_ref() {
                b"worksheet" => saw_worksheet = true,
                b"sheetData" => saw_sheet_data = true,
                b"c" => survey.cellcount += 1,
                b"col" => {
                    let (mut min, mut max, mut width) = (0u32, 0u32, None);
                    for a in e.attributes() {
                        let a = a.map_err(|e| Error::attr(part, e))?;
                        match a.key {
                            QName(b"min") => min = atoi_simd::parse::<u32>(&a.value).unwrap_or(0),
                            QName(b"max") => max = atoi_simd::parse::<u32>(&a.value).unwrap_or(0),
                            QName(b"width") => {
                                width = fast_float2::parse::<f64, _>(&*a.value).ok();
                            }
                            _ => (),
                        }
                    }
                    match (width, min >= 1 && max >= min) {
                        (Some(w), true) => survey.col_widths.push((min - 1, max - 1, w)),
                        (Some(_), false) => warn!("ignoring col declaration {min}..{max}"),
                        _ => (),
                    }
                }
                _ => (),
            },
            Ok(Event::End(ref e)) if e.local_name().as_ref() == b"row" => {
                rows += 1;
                if rows % CANCEL_CHECK_ROWS == 0 && cancelled(cancel) {
                    return Err(Error::Cancelled(part.to_string()));
                }
            }
            Ok(Event::Eof) => break,
            Err(e) => return Err(Error::xml(part, e)),
            _ => (),
        }
    }
    if !saw_worksheet {
        return Err(Error::MissingWorksheet(part.to_string()));
    }
    if !saw_sheet_data {
        return Err(Error::MissingSheetData(part.to_string()));
    }
    Ok(survey)
}

/// Resolution pass: walk the rows and cells again, in document order, and
/// fill one pre-allocated slot per cell element.
fn fill_cells<RS: Read + Seek>(
    zip: &mut ZipArchive<RS>,
    context: &WorkbookContext,
    part: &str,
    survey: &Survey,
    cells: &mut SheetCells,
    cancel: Option<&AtomicBool>,
) -> Result<(), Error> {
    let mut xml = match xml_reader(zip, part) {
        None => return Err(Error::MissingWorksheet(part.to_string())),
        Some(x) => x?,
    };
    let mut slot = 0usize;
    let mut row_index = 0u32; // 0-based, advanced by traversal
    let mut col_index = 0u32;
    let mut row_height: Option<f64> = None;
    let mut rows_done = 0u32;
    let mut buf = Vec::with_capacity(1024);
    let mut cell_buf = Vec::with_capacity(1024);
    let mut val_buf = Vec::with_capacity(1024);
    loop {
        buf.clear();
        match xml.read_event_into(&mut buf) {
            Ok(Event::Start(ref e)) if e.local_name().as_ref() == b"row" => {
                row_height = None;
                for a in e.attributes() {
                    let a = a.map_err(|e| Error::attr(part, e))?;
                    match a.key {
                        QName(b"r") => {
                            if let Ok(r) = atoi_simd::parse::<u32>(&a.value) {
                                row_index = r.saturating_sub(1);
                            }
                        }
                        QName(b"ht") => row_height = fast_float2::parse::<f64, _>(&*a.value).ok(),
                        _ => (),
                    }
                }
            }
            Ok(Event::End(ref e)) if e.local_name().as_ref() == b"row" => {
                row_index += 1;
                col_index = 0;
                row_height = None;
                rows_done += 1;
                if rows_done % CANCEL_CHECK_ROWS == 0 && cancelled(cancel) {
                    return Err(Error::Cancelled(part.to_string()));
                }
            }
            Ok(Event::Start(ref e)) if e.local_name().as_ref() == b"c" => {
                // all attributes in one pass
                let mut pos_attr = None;
                let mut style_attr = None;
                let mut type_attr = None;
                for a in e.attributes() {
                    let a = a.map_err(|e| Error::attr(part, e))?;
                    let Cow::Borrowed(val) = a.value else {
                        continue;
                    };
                    match a.key {
                        QName(b"r") => pos_attr = Some(val),
                        QName(b"s") => style_attr = Some(val),
                        QName(b"t") => type_attr = Some(val),
                        _ => (),
                    }
                }
                let pos = match pos_attr {
                    Some(r) => match decode_ref(r) {
                        Some((row, col)) => {
                            col_index = col;
                            (row, col)
                        }
                        None => {
                            return Err(Error::UnaddressableCell {
                                part: part.to_string(),
                                row: row_index + 1,
                            })
                        }
                    },
                    None => (row_index, col_index),
                };
                let address = match pos_attr {
                    Some(r) => String::from_utf8_lossy(r).into_owned(),
                    None => encode_ref(pos),
                };

                let mut literal: Option<String> = None;
                let mut inline: Option<String> = None;
                let mut formula: Option<String> = None;
                loop {
                    cell_buf.clear();
                    match xml.read_event_into(&mut cell_buf) {
                        Ok(Event::Start(ref ce)) => match ce.local_name().as_ref() {
                            b"v" => literal = Some(read_text(&mut xml, ce.name(), part, &mut val_buf)?),
                            b"is" => inline = read_string(&mut xml, ce.name(), part)?,
                            b"f" => {
                                formula = Some(read_text(&mut xml, ce.name(), part, &mut val_buf)?)
                                    .filter(|f| !f.is_empty());
                            }
                            _ => {
                                val_buf.clear();
                                xml.read_to_end_into(ce.name(), &mut val_buf)
                                    .map_err(|e| Error::xml(part, e))?;
                            }
                        },
                        Ok(Event::End(ref ce)) if ce.local_name().as_ref() == b"c" => break,
                        Ok(Event::Eof) => return Err(Error::eof(part, "c")),
                        Err(e) => return Err(Error::xml(part, e)),
                        _ => (),
                    }
                }

                cells.address[slot] = address;
                cells.row[slot] = pos.0 + 1;
                cells.col[slot] = pos.1 + 1;
                cells.height[slot] = row_height;
                cells.width[slot] = survey.width_of(pos.1);
                cells.formula[slot] = formula;
                resolve_cell(cells, slot, literal, inline, type_attr, style_attr, context);

                slot += 1;
                col_index += 1;
            }
            Ok(Event::Eof) => break,
            Err(e) => return Err(Error::xml(part, e)),
            _ => (),
        }
    }
    debug_assert_eq!(slot, cells.len());
    Ok(())
}

/// Classify one cell and populate its resolved-value slot.
///
/// This is a pure function of the raw cell pieces and the shared context:
/// it cross-references the shared-string pool for `t="s"` cells and the
/// number-format table for untyped numeric literals, and leaves exactly one
/// value column populated (none for blanks). The `content` column always
/// keeps the untouched literal for downstream auditing.
fn resolve_cell(
    cells: &mut SheetCells,
    slot: usize,
    literal: Option<String>,
    inline: Option<String>,
    type_attr: Option<&[u8]>,
    style_attr: Option<&[u8]>,
    context: &WorkbookContext,
) {
    // inline strings carry their text in <is>, not <v>
    if let Some(text) = inline {
        cells.content[slot] = Some(text.clone());
        cells.character[slot] = Some(text);
        cells.cell_type[slot] = CellType::Character;
        return;
    }
    let Some(literal) = literal else {
        return; // no value content at all: stays blank
    };
    if literal.is_empty() {
        cells.content[slot] = Some(literal);
        return;
    }
    match type_attr {
        Some(b"e") => {
            cells.error[slot] = Some(literal.clone());
            cells.cell_type[slot] = CellType::Error;
        }
        Some(b"b") => {
            cells.logical[slot] = Some(literal != "0");
            cells.cell_type[slot] = CellType::Logical;
        }
        Some(b"s") => match atoi_simd::parse::<usize>(literal.as_bytes()) {
            Ok(idx) => match context.shared_strings().get(idx) {
                Some(s) => {
                    cells.character[slot] = Some(s.clone());
                    cells.cell_type[slot] = CellType::Character;
                }
                None => warn!(
                    "shared string index {idx} out of range (pool holds {}), treating cell as blank",
                    context.shared_strings().len()
                ),
            },
            Err(_) => warn!("unparsable shared string index {literal:?}, treating cell as blank"),
        },
        Some(b"str") => {
            cells.character[slot] = Some(literal.clone());
            cells.cell_type[slot] = CellType::Character;
        }
        Some(b"d") => match parse_iso_datetime(&literal) {
            Some(dt) => {
                cells.date[slot] = Some(dt);
                cells.cell_type[slot] = CellType::Date;
            }
            None => {
                cells.character[slot] = Some(literal.clone());
                cells.cell_type[slot] = CellType::Character;
            }
        },
        Some(b"n") | None => resolve_number(cells, slot, &literal, style_attr, context),
        Some(t) => {
            warn!(
                "unknown cell type attribute {:?}, keeping literal as text",
                String::from_utf8_lossy(t)
            );
            cells.character[slot] = Some(literal.clone());
            cells.cell_type[slot] = CellType::Character;
        }
    }
    cells.content[slot] = Some(literal);
}

/// Untyped and `t="n"` cells: a serial date when the style's format says
/// so, a plain number otherwise, text when the literal is not a number.
fn resolve_number(
    cells: &mut SheetCells,
    slot: usize,
    literal: &str,
    style_attr: Option<&[u8]>,
    context: &WorkbookContext,
) {
    let format = style_attr
        .and_then(|s| atoi_simd::parse::<usize>(s).ok())
        .and_then(|id| context.formats().get(id));
    match fast_float2::parse::<f64, _>(literal.as_bytes()) {
        Ok(n) => {
            if format.is_some_and(|f| f.is_datetime()) {
                match serial_to_datetime(n, context.is_1904()) {
                    Some(dt) => {
                        cells.date[slot] = Some(dt);
                        cells.cell_type[slot] = CellType::Date;
                    }
                    None => {
                        warn!("serial date {n} out of range, keeping the number");
                        cells.numeric[slot] = Some(n);
                        cells.cell_type[slot] = CellType::Numeric;
                    }
                }
            } else {
                cells.numeric[slot] = Some(n);
                cells.cell_type[slot] = CellType::Numeric;
            }
        }
        Err(_) => {
            cells.character[slot] = Some(literal.to_string());
            cells.cell_type[slot] = CellType::Character;
        }
    }
}

fn parse_iso_datetime(literal: &str) -> Option<chrono::NaiveDateTime> {
    literal
        .parse::<chrono::NaiveDateTime>()
        .ok()
        .or_else(|| {
            literal
                .parse::<chrono::NaiveDate>()
                .ok()
                .map(|d| d.and_time(chrono::NaiveTime::MIN))
        })
}

fn read_text<RS: Read + Seek>(
    xml: &mut XlReader<'_, RS>,
    closing: QName<'_>,
    part: &str,
    buf: &mut Vec<u8>,
) -> Result<String, Error> {
    let mut out = String::new();
    loop {
        buf.clear();
        match xml.read_event_into(buf) {
            Ok(Event::Text(ref t)) => {
                let decoded = t.decode().map_err(quick_xml::Error::from).map_err(|e| Error::xml(part, e))?;
                out.push_str(&quick_xml::escape::unescape(&decoded).map_err(quick_xml::Error::from).map_err(|e| Error::xml(part, e))?);
            }
            Ok(Event::End(ref end)) if end.name() == closing => break,
            Ok(Event::Eof) => return Err(Error::eof(part, "v")),
            Err(e) => return Err(Error::xml(part, e)),
            _ => (),
        }
    }
    Ok(out)
}

/// Decode a cell reference like "AA12" into 0-based (row, column).
fn decode_ref(reference: &[u8]) -> Option<(u32, u32)> {
    let (mut row, mut col) = (0u32, 0u32);
    let mut pow = 1u32;
    let mut in_row = true;
    for c in reference.iter().rev() {
        match *c {
            c @ b'0'..=b'9' => {
                if !in_row {
                    return None; // digit within the column letters
                }
                row = row.checked_add((c - b'0') as u32 * pow)?;
                pow = pow.checked_mul(10)?;
            }
            c @ (b'A'..=b'Z' | b'a'..=b'z') => {
                if in_row {
                    if row == 0 {
                        return None; // no row component
                    }
                    pow = 1;
                    in_row = false;
                }
                let letter = (c.to_ascii_uppercase() - b'A') as u32 + 1;
                col = col.checked_add(letter.checked_mul(pow)?)?;
                pow = pow.checked_mul(26)?;
            }
            _ => return None,
        }
    }
    Some((row.checked_sub(1)?, col.checked_sub(1)?))
}

/// Re-encode a 0-based (row, column) position as a reference string, for
/// cells whose address has to be synthesized from traversal order.
fn encode_ref(pos: (u32, u32)) -> String {
    let mut letters = Vec::new();
    let mut num = pos.1 + 1;
    while num > 0 {
        letters.push(b'A' + ((num - 1) % 26) as u8);
        num = (num - 1) / 26;
    }
    letters.reverse();
    let mut reference: String = letters.into_iter().map(char::from).collect();
    reference.push_str(&(pos.0 + 1).to_string());
    reference
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case(b"A1", 0, 0)]
    #[case(b"B7", 6, 1)]
    #[case(b"Z1", 0, 25)]
    #[case(b"AA1", 0, 26)]
    #[case(b"aa1", 0, 26)]
    #[case(b"C107", 106, 2)]
    #[case(b"XFD1048576", 1_048_575, 16_383)]
    fn decodes_references(#[case] reference: &[u8], #[case] row: u32, #[case] col: u32) {
        assert_eq!(decode_ref(reference), Some((row, col)));
    }

    #[rstest]
    #[case(b"")]
    #[case(b"A")]
    #[case(b"12")]
    #[case(b"A0")]
    #[case(b"1A")]
    #[case(b"A-1")]
    fn rejects_bad_references(#[case] reference: &[u8]) {
        assert_eq!(decode_ref(reference), None);
    }

    #[test]
    fn encode_round_trips() {
        for reference in ["A1", "B7", "Z1", "AA1", "AZ3", "BA99", "XFD1048576"] {
            let pos = decode_ref(reference.as_bytes()).unwrap();
            assert_eq!(encode_ref(pos), reference);
        }
    }

    #[test]
    fn survey_width_lookup() {
        let survey = Survey {
            cellcount: 0,
            col_widths: vec![(0, 2, 10.5), (4, 4, 30.0)],
        };
        assert_eq!(survey.width_of(0), Some(10.5));
        assert_eq!(survey.width_of(2), Some(10.5));
        assert_eq!(survey.width_of(3), None);
        assert_eq!(survey.width_of(4), Some(30.0));
        assert_eq!(survey.width_of(5), None);
    }
}
