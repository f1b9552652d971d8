//! Workbook-wide shared state.
//!
//! A [`WorkbookContext`] holds everything that cell resolution needs across
//! sheets: the ordered sheet names, the shared-string pool, the
//! style-index → number-format table and the date system. It is built once
//! when the package is opened and never mutated afterwards, so it can be
//! shared by reference with any number of concurrent sheet extractions.

use std::collections::BTreeMap;
use std::fs::File;
use std::io::{BufReader, Read, Seek};
use std::path::Path;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;

use quick_xml::events::Event;
use quick_xml::name::QName;
use quick_xml::Reader as XmlReader;
use zip::read::{ZipArchive, ZipFile};
use zip::result::ZipError;

use crate::cells::SheetCells;
use crate::error::Error;
use crate::formats::{builtin_format_by_code, detect_number_format, NumberFormat};
use crate::sheet;

pub(crate) type XlReader<'a, RS> = XmlReader<BufReader<ZipFile<'a, RS>>>;

/// Immutable resources shared by every sheet extraction of one package.
#[derive(Debug, Default)]
pub struct WorkbookContext {
    sheet_names: Vec<String>,
    shared_strings: Vec<String>,
    formats: Vec<NumberFormat>,
    is_1904: bool,
}

impl WorkbookContext {
    /// Sheet names, ordered as declared in the workbook part. The sheet at
    /// position `i` lives in the package part `xl/worksheets/sheet{i+1}.xml`.
    pub fn sheet_names(&self) -> &[String] {
        &self.sheet_names
    }

    /// The shared-string pool; empty when the package has none.
    pub fn shared_strings(&self) -> &[String] {
        &self.shared_strings
    }

    /// Number formats indexed by cell style (`xf`) position.
    pub fn formats(&self) -> &[NumberFormat] {
        &self.formats
    }

    /// True when the workbook uses the 1904 date system.
    pub fn is_1904(&self) -> bool {
        self.is_1904
    }

    fn from_archive<RS: Read + Seek>(zip: &mut ZipArchive<RS>) -> Result<Self, Error> {
        let mut context = WorkbookContext::default();
        context.read_workbook(zip)?;
        context.read_shared_strings(zip)?;
        context.read_styles(zip)?;
        Ok(context)
    }

    fn read_workbook<RS: Read + Seek>(&mut self, zip: &mut ZipArchive<RS>) -> Result<(), Error> {
        const PART: &str = "xl/workbook.xml";
        let mut xml = match xml_reader(zip, PART) {
            None => return Err(Error::MissingWorkbook),
            Some(x) => x?,
        };
        let mut buf = Vec::with_capacity(1024);
        loop {
            buf.clear();
            match xml.read_event_into(&mut buf) {
                Ok(Event::Start(ref e)) if e.local_name().as_ref() == b"sheet" => {
                    for a in e.attributes() {
                        let a = a.map_err(|e| Error::attr(PART, e))?;
                        if a.key == QName(b"name") {
                            let name = a
                                .decode_and_unescape_value(xml.decoder())
                                .map_err(|e| Error::xml(PART, e))?;
                            self.sheet_names.push(name.into_owned());
                        }
                    }
                }
                Ok(Event::Start(ref e)) if e.name().as_ref() == b"workbookPr" => {
                    for a in e.attributes() {
                        let a = a.map_err(|e| Error::attr(PART, e))?;
                        if a.key == QName(b"date1904") {
                            let v = a
                                .decode_and_unescape_value(xml.decoder())
                                .map_err(|e| Error::xml(PART, e))?;
                            self.is_1904 = ["1", "true"].contains(&v.as_ref());
                        }
                    }
                }
                Ok(Event::End(ref e)) if e.local_name().as_ref() == b"workbook" => break,
                Ok(Event::Eof) => return Err(Error::eof(PART, "workbook")),
                Err(e) => return Err(Error::xml(PART, e)),
                _ => (),
            }
        }
        Ok(())
    }

    fn read_shared_strings<RS: Read + Seek>(
        &mut self,
        zip: &mut ZipArchive<RS>,
    ) -> Result<(), Error> {
        const PART: &str = "xl/sharedStrings.xml";
        let mut xml = match xml_reader(zip, PART) {
            // a package with only inline/numeric cells has no pool
            None => return Ok(()),
            Some(x) => x?,
        };
        let mut buf = Vec::with_capacity(1024);
        loop {
            buf.clear();
            match xml.read_event_into(&mut buf) {
                Ok(Event::Start(ref e)) if e.local_name().as_ref() == b"si" => {
                    // an entry without any text run still occupies its index
                    let s = read_string(&mut xml, e.name(), PART)?.unwrap_or_default();
                    self.shared_strings.push(s);
                }
                Ok(Event::End(ref e)) if e.local_name().as_ref() == b"sst" => break,
                Ok(Event::Eof) => return Err(Error::eof(PART, "sst")),
                Err(e) => return Err(Error::xml(PART, e)),
                _ => (),
            }
        }
        Ok(())
    }

    fn read_styles<RS: Read + Seek>(&mut self, zip: &mut ZipArchive<RS>) -> Result<(), Error> {
        const PART: &str = "xl/styles.xml";
        let mut xml = match xml_reader(zip, PART) {
            None => return Ok(()),
            Some(x) => x?,
        };
        let mut custom = BTreeMap::new();
        let mut buf = Vec::with_capacity(1024);
        let mut inner_buf = Vec::with_capacity(1024);
        loop {
            buf.clear();
            match xml.read_event_into(&mut buf) {
                Ok(Event::Start(ref e)) if e.local_name().as_ref() == b"numFmts" => loop {
                    inner_buf.clear();
                    match xml.read_event_into(&mut inner_buf) {
                        Ok(Event::Start(ref e)) if e.local_name().as_ref() == b"numFmt" => {
                            let mut id = 0u32;
                            let mut code = String::new();
                            for a in e.attributes() {
                                let a = a.map_err(|e| Error::attr(PART, e))?;
                                match a.key {
                                    QName(b"numFmtId") => {
                                        id = atoi_simd::parse::<u32>(&a.value).unwrap_or(0);
                                    }
                                    QName(b"formatCode") => {
                                        code = a
                                            .decode_and_unescape_value(xml.decoder())
                                            .map_err(|e| Error::xml(PART, e))?
                                            .into_owned();
                                    }
                                    _ => (),
                                }
                            }
                            if !code.is_empty() {
                                custom.insert(id, code);
                            }
                        }
                        Ok(Event::End(ref e)) if e.local_name().as_ref() == b"numFmts" => break,
                        Ok(Event::Eof) => return Err(Error::eof(PART, "numFmts")),
                        Err(e) => return Err(Error::xml(PART, e)),
                        _ => (),
                    }
                },
                Ok(Event::Start(ref e)) if e.local_name().as_ref() == b"cellXfs" => loop {
                    inner_buf.clear();
                    match xml.read_event_into(&mut inner_buf) {
                        Ok(Event::Start(ref e)) if e.local_name().as_ref() == b"xf" => {
                            let mut id = 0u32;
                            for a in e.attributes() {
                                let a = a.map_err(|e| Error::attr(PART, e))?;
                                if a.key == QName(b"numFmtId") {
                                    id = atoi_simd::parse::<u32>(&a.value).unwrap_or(0);
                                }
                            }
                            self.formats.push(match custom.get(&id) {
                                Some(code) => NumberFormat {
                                    kind: detect_number_format(code),
                                    code: Some(code.clone()),
                                },
                                None => NumberFormat {
                                    kind: builtin_format_by_code(id as u16),
                                    code: None,
                                },
                            });
                        }
                        Ok(Event::End(ref e)) if e.local_name().as_ref() == b"cellXfs" => break,
                        Ok(Event::Eof) => return Err(Error::eof(PART, "cellXfs")),
                        Err(e) => return Err(Error::xml(PART, e)),
                        _ => (),
                    }
                },
                Ok(Event::End(ref e)) if e.local_name().as_ref() == b"styleSheet" => break,
                Ok(Event::Eof) => break,
                Err(e) => return Err(Error::xml(PART, e)),
                _ => (),
            }
        }
        Ok(())
    }
}

/// An xlsx package opened for cell extraction.
pub struct Workbook<RS> {
    zip: ZipArchive<RS>,
    context: Arc<WorkbookContext>,
}

impl Workbook<File> {
    /// Opens a workbook package from a file path.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Workbook<File>, Error> {
        Workbook::new(File::open(path)?)
    }
}

impl<RS: Read + Seek> Workbook<RS> {
    /// Opens a workbook package from any seekable reader and builds the
    /// shared [`WorkbookContext`] from its workbook, shared-string and
    /// style parts.
    pub fn new(reader: RS) -> Result<Workbook<RS>, Error> {
        let mut zip = ZipArchive::new(reader)?;
        let context = Arc::new(WorkbookContext::from_archive(&mut zip)?);
        Ok(Workbook { zip, context })
    }

    /// Attaches an already-built context to a second reader over the same
    /// package bytes. This is the hook for extracting several sheets in
    /// parallel: build the context once, then give each thread its own
    /// `Workbook` sharing it.
    pub fn with_context(reader: RS, context: Arc<WorkbookContext>) -> Result<Workbook<RS>, Error> {
        let zip = ZipArchive::new(reader)?;
        Ok(Workbook { zip, context })
    }

    /// All sheet names of this workbook, in declaration order.
    pub fn sheet_names(&self) -> &[String] {
        self.context.sheet_names()
    }

    /// The shared, read-only workbook context.
    pub fn context(&self) -> Arc<WorkbookContext> {
        Arc::clone(&self.context)
    }

    /// Extract every cell of the sheet at `index` (0-based).
    pub fn worksheet_cells(&mut self, index: usize) -> Result<SheetCells, Error> {
        sheet::extract(&mut self.zip, &self.context, index, None)
    }

    /// Extract every cell of the named sheet.
    pub fn worksheet_cells_by_name(&mut self, name: &str) -> Result<SheetCells, Error> {
        let index = self
            .context
            .sheet_names()
            .iter()
            .position(|n| n == name)
            .ok_or_else(|| Error::WorksheetNotFound(name.to_string()))?;
        self.worksheet_cells(index)
    }

    /// Like [`worksheet_cells`](Self::worksheet_cells), but polls `cancel`
    /// every 1000 rows and aborts with [`Error::Cancelled`] once it is set.
    /// No partial table is returned for a cancelled extraction.
    pub fn worksheet_cells_cancellable(
        &mut self,
        index: usize,
        cancel: &AtomicBool,
    ) -> Result<SheetCells, Error> {
        sheet::extract(&mut self.zip, &self.context, index, Some(cancel))
    }
}

/// Worksheet parts are named by 1-based position, regardless of sheet name.
pub(crate) fn sheet_part_path(index: usize) -> String {
    format!("xl/worksheets/sheet{}.xml", index + 1)
}

pub(crate) fn xml_reader<'a, RS: Read + Seek>(
    zip: &'a mut ZipArchive<RS>,
    path: &str,
) -> Option<Result<XlReader<'a, RS>, Error>> {
    let actual_path = zip
        .file_names()
        .find(|n| n.eq_ignore_ascii_case(path))?
        .to_owned();
    match zip.by_name(&actual_path) {
        Ok(f) => {
            let mut r = XmlReader::from_reader(BufReader::new(f));
            let config = r.config_mut();
            config.check_end_names = false;
            config.trim_text(false);
            config.check_comments = false;
            config.expand_empty_elements = true;
            Some(Ok(r))
        }
        Err(ZipError::FileNotFound) => None,
        Err(e) => Some(Err(e.into())),
    }
}

/// Reads either a simple or richtext string, skipping phonetic runs.
pub(crate) fn read_string<RS>(
    xml: &mut XlReader<'_, RS>,
    closing: QName<'_>,
    part: &str,
) -> Result<Option<String>, Error>
where
    RS: Read + Seek,
{
    let mut buf = Vec::with_capacity(1024);
    let mut val_buf = Vec::with_capacity(1024);
    let mut rich_buffer: Option<String> = None;
    let mut is_phonetic_text = false;
    loop {
        buf.clear();
        match xml.read_event_into(&mut buf) {
            Ok(Event::Start(ref e)) if e.local_name().as_ref() == b"r" => {
                if rich_buffer.is_none() {
                    // richtext has multiple <r> and <t> runs for the same cell
                    rich_buffer = Some(String::new());
                }
            }
            Ok(Event::Start(ref e)) if e.local_name().as_ref() == b"rPh" => {
                is_phonetic_text = true;
            }
            Ok(Event::End(ref e)) if e.name() == closing => {
                return Ok(rich_buffer);
            }
            Ok(Event::End(ref e)) if e.local_name().as_ref() == b"rPh" => {
                is_phonetic_text = false;
            }
            Ok(Event::Start(ref e)) if e.local_name().as_ref() == b"t" && !is_phonetic_text => {
                val_buf.clear();
                let mut value = String::new();
                loop {
                    match xml.read_event_into(&mut val_buf) {
                        Ok(Event::Text(t)) => {
                            let decoded = t.decode().map_err(quick_xml::Error::from).map_err(|e| Error::xml(part, e))?;
                            value.push_str(&quick_xml::escape::unescape(&decoded).map_err(quick_xml::Error::from).map_err(|e| Error::xml(part, e))?);
                        }
                        Ok(Event::End(ref end)) if end.name() == e.name() => break,
                        Ok(Event::Eof) => return Err(Error::eof(part, "t")),
                        Err(e) => return Err(Error::xml(part, e)),
                        _ => (),
                    }
                }
                if let Some(ref mut s) = rich_buffer {
                    s.push_str(&value);
                } else {
                    // consume any remaining events up to the closing tag
                    xml.read_to_end_into(closing, &mut val_buf)
                        .map_err(|e| Error::xml(part, e))?;
                    return Ok(Some(value));
                }
            }
            Ok(Event::Eof) => return Err(Error::eof(part, "si")),
            Err(e) => return Err(Error::xml(part, e)),
            _ => (),
        }
    }
}
