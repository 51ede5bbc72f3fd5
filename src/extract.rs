//! Turning files into plain text.
//!
//! Each format is handled by an [`Extractor`]; an [`ExtractorRegistry`]
//! picks the first registered extractor that supports a file's
//! [`FileType`]. Later registrations take precedence, so callers can
//! override a built-in extractor.

use std::{io::Read, path::Path, sync::Arc};

use crate::{
    error::{Error, Result},
    types::FileType,
};

/// Maximum number of CSV records included in the extracted text.
pub const CSV_MAX_ROWS: usize = 100;

pub trait Extractor: Send + Sync {
    fn name(&self) -> &str;

    fn supports(&self, file_type: FileType) -> bool;

    /// Extract the whole text of `path`. An empty string is a valid result.
    fn extract(&self, path: &Path) -> Result<String>;
}

#[derive(Clone)]
pub struct ExtractorRegistry {
    extractors: Vec<Arc<dyn Extractor>>,
}

impl ExtractorRegistry {
    pub fn empty() -> Self {
        Self {
            extractors: Vec::new(),
        }
    }

    /// Register an extractor, taking precedence over earlier ones for the
    /// types it supports.
    pub fn register(&mut self, extractor: impl Extractor + 'static) {
        self.extractors.push(Arc::new(extractor));
    }

    pub fn get(&self, file_type: FileType) -> Option<&dyn Extractor> {
        self.extractors
            .iter()
            .rev()
            .find(|e| e.supports(file_type))
            .map(|e| e.as_ref())
    }

    pub fn extract(&self, path: &Path) -> Result<String> {
        let file_type = FileType::from_path(path);
        let extractor =
            self.get(file_type)
                .ok_or_else(|| Error::UnsupportedFormat {
                    path: path.to_path_buf(),
                    file_type: file_type.to_string(),
                })?;
        tracing::trace!(
            path = %path.display(),
            extractor = extractor.name(),
            "extracting"
        );
        extractor.extract(path)
    }
}

impl Default for ExtractorRegistry {
    /// Built-in extractors for every supported [`FileType`].
    fn default() -> Self {
        let mut registry = Self::empty();
        registry.register(TextExtractor);
        registry.register(CsvExtractor);
        registry.register(PdfExtractor);
        registry.register(ExcelExtractor);
        registry.register(WordExtractor);
        registry
    }
}

impl std::fmt::Debug for ExtractorRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_list()
            .entries(self.extractors.iter().map(|e| e.name()))
            .finish()
    }
}

/// Reads text, code and structured-data files as-is.
#[derive(Debug, Clone, Copy, Default)]
pub struct TextExtractor;

impl Extractor for TextExtractor {
    fn name(&self) -> &str {
        "text"
    }

    fn supports(&self, file_type: FileType) -> bool {
        matches!(file_type, FileType::Text | FileType::Code | FileType::Data)
    }

    fn extract(&self, path: &Path) -> Result<String> {
        let bytes = std::fs::read(path).map_err(|e| Error::from_io(path, e))?;
        Ok(decode_text(bytes))
    }
}

/// UTF-8 when valid, otherwise Latin-1 (every byte is one code point).
pub fn decode_text(bytes: Vec<u8>) -> String {
    match String::from_utf8(bytes) {
        Ok(text) => text,
        Err(e) => e.into_bytes().iter().map(|&b| b as char).collect(),
    }
}

/// Header summary followed by the first [`CSV_MAX_ROWS`] records,
/// tab-separated.
#[derive(Debug, Clone, Copy, Default)]
pub struct CsvExtractor;

impl Extractor for CsvExtractor {
    fn name(&self) -> &str {
        "csv"
    }

    fn supports(&self, file_type: FileType) -> bool {
        file_type == FileType::Csv
    }

    fn extract(&self, path: &Path) -> Result<String> {
        let file = std::fs::File::open(path).map_err(|e| Error::from_io(path, e))?;
        let mut reader = csv::ReaderBuilder::new()
            .has_headers(false)
            .flexible(true)
            .from_reader(file);

        let mut headers = None;
        let mut rows = Vec::new();
        for record in reader.records().take(CSV_MAX_ROWS) {
            let record = record.map_err(|e| Error::Extraction {
                path: path.to_path_buf(),
                reason: e.to_string(),
            })?;
            rows.push(record.iter().collect::<Vec<_>>().join("\t"));
            if headers.is_none() {
                headers = Some(record);
            }
        }

        let Some(headers) = headers else {
            return Ok(String::new());
        };
        let headers = headers.iter().collect::<Vec<_>>().join(", ");
        Ok(format!("Headers: {headers}\n\n{}", rows.join("\n")))
    }
}

/// Per-page text of a PDF. Pages that fail to extract are skipped.
#[derive(Debug, Clone, Copy, Default)]
pub struct PdfExtractor;

impl Extractor for PdfExtractor {
    fn name(&self) -> &str {
        "pdf"
    }

    fn supports(&self, file_type: FileType) -> bool {
        file_type == FileType::Pdf
    }

    fn extract(&self, path: &Path) -> Result<String> {
        use pdf_oxide::PdfDocument;

        if let Err(e) = std::fs::metadata(path) {
            return Err(Error::from_io(path, e));
        }
        let failed = |reason: String| Error::Extraction {
            path: path.to_path_buf(),
            reason,
        };

        let mut doc = PdfDocument::open(path)
            .map_err(|e| failed(format!("failed to open PDF: {e}")))?;
        let page_count = doc
            .page_count()
            .map_err(|e| failed(format!("failed to get page count: {e}")))?;

        let mut text = String::new();
        for page_idx in 0..page_count {
            match doc.extract_text(page_idx) {
                Ok(page_text) => {
                    text.push_str(&page_text);
                    text.push_str("\n\n");
                }
                Err(e) => {
                    tracing::debug!(
                        path = %path.display(),
                        page = page_idx + 1,
                        error = %e,
                        "skipping unreadable PDF page"
                    );
                }
            }
        }
        Ok(text)
    }
}

/// Every worksheet of an `.xlsx`/`.xls` workbook as a `Sheet: <name>`
/// header followed by its non-empty rows, tab-separated.
#[derive(Debug, Clone, Copy, Default)]
pub struct ExcelExtractor;

impl Extractor for ExcelExtractor {
    fn name(&self) -> &str {
        "excel"
    }

    fn supports(&self, file_type: FileType) -> bool {
        file_type == FileType::Excel
    }

    fn extract(&self, path: &Path) -> Result<String> {
        use calamine::{Data, Reader, open_workbook_auto};

        if let Err(e) = std::fs::metadata(path) {
            return Err(Error::from_io(path, e));
        }
        let failed = |reason: String| Error::Extraction {
            path: path.to_path_buf(),
            reason,
        };

        let mut workbook = open_workbook_auto(path)
            .map_err(|e| failed(format!("failed to open workbook: {e}")))?;

        let mut sheets = Vec::new();
        for name in workbook.sheet_names() {
            let range = workbook
                .worksheet_range(&name)
                .map_err(|e| failed(format!("failed to read sheet {name}: {e}")))?;
            let rows: Vec<String> = range
                .rows()
                .filter(|row| row.iter().any(|cell| !matches!(cell, Data::Empty)))
                .map(|row| {
                    row.iter()
                        .map(|cell| cell.to_string())
                        .collect::<Vec<_>>()
                        .join("\t")
                })
                .collect();
            if !rows.is_empty() {
                sheets.push(format!("Sheet: {name}\n{}", rows.join("\n")));
            }
        }
        Ok(sheets.join("\n\n"))
    }
}

/// Paragraph text of a `.docx` document, one paragraph per line. Legacy
/// binary `.doc` files are not readable.
#[derive(Debug, Clone, Copy, Default)]
pub struct WordExtractor;

/// Location of the main document part inside a `.docx` archive.
const DOCX_BODY: &str = "word/document.xml";

impl Extractor for WordExtractor {
    fn name(&self) -> &str {
        "word"
    }

    fn supports(&self, file_type: FileType) -> bool {
        file_type == FileType::Word
    }

    fn extract(&self, path: &Path) -> Result<String> {
        let is_docx = path
            .extension()
            .and_then(|e| e.to_str())
            .is_some_and(|e| e.eq_ignore_ascii_case("docx"));
        if !is_docx {
            return Err(Error::UnsupportedFormat {
                path: path.to_path_buf(),
                file_type: "legacy doc".to_string(),
            });
        }

        let file = std::fs::File::open(path).map_err(|e| Error::from_io(path, e))?;
        let failed = |reason: String| Error::Extraction {
            path: path.to_path_buf(),
            reason,
        };

        let mut archive = zip::ZipArchive::new(file)
            .map_err(|e| failed(format!("not a docx archive: {e}")))?;
        let mut xml = String::new();
        archive
            .by_name(DOCX_BODY)
            .map_err(|e| failed(format!("missing {DOCX_BODY}: {e}")))?
            .read_to_string(&mut xml)
            .map_err(|e| failed(format!("failed to read {DOCX_BODY}: {e}")))?;

        docx_paragraphs(&xml).map_err(|e| failed(format!("malformed {DOCX_BODY}: {e}")))
    }
}

/// Collect the text runs of each `w:p` paragraph.
fn docx_paragraphs(xml: &str) -> std::result::Result<String, quick_xml::Error> {
    use quick_xml::{Reader, events::Event};

    let mut reader = Reader::from_str(xml);
    let mut paragraphs = Vec::new();
    let mut current = String::new();
    let mut in_text = false;

    loop {
        match reader.read_event()? {
            Event::Start(e) if e.name().as_ref() == b"w:t" => in_text = true,
            Event::Text(t) if in_text => current.push_str(&t.unescape()?),
            Event::Empty(e) => match e.name().as_ref() {
                b"w:tab" => current.push('\t'),
                b"w:br" => current.push('\n'),
                b"w:p" => paragraphs.push(std::mem::take(&mut current)),
                _ => {}
            },
            Event::End(e) => match e.name().as_ref() {
                b"w:t" => in_text = false,
                b"w:p" => paragraphs.push(std::mem::take(&mut current)),
                _ => {}
            },
            Event::Eof => break,
            _ => {}
        }
    }
    Ok(paragraphs.join("\n"))
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Upper;

    impl Extractor for Upper {
        fn name(&self) -> &str {
            "upper"
        }

        fn supports(&self, file_type: FileType) -> bool {
            file_type == FileType::Text
        }

        fn extract(&self, path: &Path) -> Result<String> {
            Ok(std::fs::read_to_string(path)?.to_uppercase())
        }
    }

    #[test]
    fn text_files_are_read_verbatim() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("notes.md");
        std::fs::write(&path, "# Title\nbody").unwrap();
        let text = ExtractorRegistry::default().extract(&path).unwrap();
        assert_eq!(text, "# Title\nbody");
    }

    #[test]
    fn invalid_utf8_falls_back_to_latin1() {
        assert_eq!(decode_text(vec![b'c', b'a', b'f', 0xE9]), "café");
    }

    #[test]
    fn csv_includes_headers_and_rows() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("budget.csv");
        std::fs::write(&path, "month,amount\njan,10\nfeb,20\n").unwrap();

        let text = ExtractorRegistry::default().extract(&path).unwrap();
        assert!(text.starts_with("Headers: month, amount\n\n"));
        assert!(text.contains("jan\t10"));
        assert!(text.contains("feb\t20"));
    }

    #[test]
    fn csv_is_capped() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("big.csv");
        let body: String = (0..500).map(|i| format!("row{i},x\n")).collect();
        std::fs::write(&path, body).unwrap();

        let text = CsvExtractor.extract(&path).unwrap();
        assert!(text.contains("row99\t"));
        assert!(!text.contains("row100\t"));
    }

    #[test]
    fn empty_csv_is_empty_text() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("empty.csv");
        std::fs::write(&path, "").unwrap();
        assert_eq!(CsvExtractor.extract(&path).unwrap(), "");
    }

    #[test]
    fn csv_header_cells_keep_embedded_tabs() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("tabs.csv");
        std::fs::write(&path, "\"first\tname\",age\nada,36\n").unwrap();

        let text = CsvExtractor.extract(&path).unwrap();
        assert!(text.starts_with("Headers: first\tname, age\n\n"));
    }

    fn write_zip(path: &Path, parts: &[(&str, &str)]) {
        use std::io::Write;

        let mut zip = zip::ZipWriter::new(std::fs::File::create(path).unwrap());
        for (name, body) in parts {
            zip.start_file(*name, zip::write::SimpleFileOptions::default())
                .unwrap();
            zip.write_all(body.as_bytes()).unwrap();
        }
        zip.finish().unwrap();
    }

    const SHEET_NS: &str = "http://schemas.openxmlformats.org/spreadsheetml/2006/main";
    const REL_NS: &str = "http://schemas.openxmlformats.org/officeDocument/2006/relationships";

    fn write_xlsx(path: &Path) {
        let content_types = r#"<?xml version="1.0" encoding="UTF-8"?><Types xmlns="http://schemas.openxmlformats.org/package/2006/content-types"><Default Extension="xml" ContentType="application/xml"/><Default Extension="rels" ContentType="application/vnd.openxmlformats-package.relationships+xml"/><Override PartName="/xl/workbook.xml" ContentType="application/vnd.openxmlformats-officedocument.spreadsheetml.sheet.main+xml"/><Override PartName="/xl/worksheets/sheet1.xml" ContentType="application/vnd.openxmlformats-officedocument.spreadsheetml.worksheet+xml"/></Types>"#;
        let root_rels = format!(
            r#"<?xml version="1.0" encoding="UTF-8"?><Relationships xmlns="http://schemas.openxmlformats.org/package/2006/relationships"><Relationship Id="rId1" Type="{REL_NS}/officeDocument" Target="xl/workbook.xml"/></Relationships>"#
        );
        let workbook = format!(
            r#"<?xml version="1.0" encoding="UTF-8"?><workbook xmlns="{SHEET_NS}" xmlns:r="{REL_NS}"><sheets><sheet name="Budget" sheetId="1" r:id="rId1"/></sheets></workbook>"#
        );
        let workbook_rels = format!(
            r#"<?xml version="1.0" encoding="UTF-8"?><Relationships xmlns="http://schemas.openxmlformats.org/package/2006/relationships"><Relationship Id="rId1" Type="{REL_NS}/worksheet" Target="worksheets/sheet1.xml"/></Relationships>"#
        );
        let sheet = format!(
            r#"<?xml version="1.0" encoding="UTF-8"?><worksheet xmlns="{SHEET_NS}"><sheetData><row r="1"><c r="A1" t="inlineStr"><is><t>month</t></is></c><c r="B1" t="inlineStr"><is><t>revenue</t></is></c></row><row r="3"><c r="A3" t="inlineStr"><is><t>march</t></is></c><c r="B3"><v>42</v></c></row></sheetData></worksheet>"#
        );
        write_zip(
            path,
            &[
                ("[Content_Types].xml", content_types),
                ("_rels/.rels", &root_rels),
                ("xl/workbook.xml", &workbook),
                ("xl/_rels/workbook.xml.rels", &workbook_rels),
                ("xl/worksheets/sheet1.xml", &sheet),
            ],
        );
    }

    #[test]
    fn excel_sheets_are_labelled_and_blank_rows_dropped() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("budget.xlsx");
        write_xlsx(&path);

        let text = ExtractorRegistry::default().extract(&path).unwrap();
        assert!(text.starts_with("Sheet: Budget\n"), "{text:?}");
        assert!(text.contains("month\trevenue"));
        assert!(text.contains("march\t42"));
        assert!(!text.contains("\n\n"));
    }

    #[test]
    fn corrupt_workbook_is_an_extraction_error() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("sheet.xlsx");
        std::fs::write(&path, "PK").unwrap();
        let err = ExtractorRegistry::default().extract(&path).unwrap_err();
        assert!(matches!(err, Error::Extraction { .. }));
    }

    #[test]
    fn docx_paragraphs_become_lines() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("letter.docx");
        let body = r#"<?xml version="1.0" encoding="UTF-8"?><w:document xmlns:w="http://schemas.openxmlformats.org/wordprocessingml/2006/main"><w:body><w:p><w:r><w:t>Quarterly </w:t></w:r><w:r><w:t>review &amp; plan</w:t></w:r></w:p><w:p/><w:p><w:r><w:t>Next</w:t><w:tab/><w:t>steps</w:t></w:r></w:p></w:body></w:document>"#;
        write_zip(&path, &[(DOCX_BODY, body)]);

        let text = ExtractorRegistry::default().extract(&path).unwrap();
        assert_eq!(text, "Quarterly review & plan\n\nNext\tsteps");
    }

    #[test]
    fn legacy_doc_is_unsupported() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("old.doc");
        std::fs::write(&path, "binary").unwrap();
        let err = ExtractorRegistry::default().extract(&path).unwrap_err();
        assert!(matches!(err, Error::UnsupportedFormat { .. }));
    }

    #[test]
    fn malformed_pdf_is_an_extraction_error() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("broken.pdf");
        std::fs::write(&path, "not a pdf").unwrap();
        let err = ExtractorRegistry::default().extract(&path).unwrap_err();
        assert!(matches!(err, Error::Extraction { .. }));
    }

    #[test]
    fn missing_file_is_not_found() {
        let tmp = tempfile::tempdir().unwrap();
        let err = ExtractorRegistry::default()
            .extract(&tmp.path().join("gone.txt"))
            .unwrap_err();
        assert!(matches!(err, Error::NotFound { .. }));
    }

    #[test]
    fn later_registration_wins() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("a.txt");
        std::fs::write(&path, "shout").unwrap();

        let mut registry = ExtractorRegistry::default();
        registry.register(Upper);
        assert_eq!(registry.extract(&path).unwrap(), "SHOUT");
        assert_eq!(registry.get(FileType::Code).unwrap().name(), "text");
    }
}
