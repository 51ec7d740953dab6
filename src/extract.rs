//! Multi-format text extraction for harvested documents.
//!
//! Connectors supply bytes plus a content type; this module returns plain
//! UTF-8 text. PDF goes through `pdf-extract`, Office formats are unpacked
//! with `zip` and parsed with `quick-xml`, HTML is tag-stripped. Extraction
//! never panics: failures come back as [`ExtractError`] and the pipeline
//! skips the item.

use std::io::Read;
use std::path::Path;

use thiserror::Error;

pub const MIME_PDF: &str = "application/pdf";
pub const MIME_DOCX: &str =
    "application/vnd.openxmlformats-officedocument.wordprocessingml.document";
pub const MIME_PPTX: &str =
    "application/vnd.openxmlformats-officedocument.presentationml.presentation";
pub const MIME_XLSX: &str = "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet";
pub const MIME_HTML: &str = "text/html";
pub const MIME_MARKDOWN: &str = "text/markdown";
pub const MIME_PLAIN: &str = "text/plain";

/// A PDF that yields less than this much non-whitespace text is likely a
/// scan; OCR is out of scope, so the item is reported and skipped.
const MIN_TEXT_CHARS: usize = 100;

/// Maximum sheets to process in an xlsx.
const XLSX_MAX_SHEETS: usize = 100;
/// Maximum cells to process per sheet.
const XLSX_MAX_CELLS_PER_SHEET: usize = 100_000;
/// Maximum decompressed bytes read from a single ZIP entry.
const MAX_XML_ENTRY_BYTES: u64 = 50 * 1024 * 1024;

#[derive(Debug, Error)]
pub enum ExtractError {
    #[error("unsupported content-type: {0}")]
    UnsupportedContentType(String),
    #[error("document yielded only {chars} chars of text (needs OCR?)")]
    LowText { chars: usize },
    #[error("PDF extraction failed: {0}")]
    Pdf(String),
    #[error("OOXML extraction failed: {0}")]
    Ooxml(String),
}

/// Extract plain text from binary or markup content.
pub fn extract_text(bytes: &[u8], content_type: &str) -> Result<String, ExtractError> {
    match content_type {
        MIME_PDF => extract_pdf(bytes),
        MIME_DOCX => extract_docx(bytes),
        MIME_PPTX => extract_pptx(bytes),
        MIME_XLSX => extract_xlsx(bytes),
        MIME_HTML => Ok(strip_html(&String::from_utf8_lossy(bytes))),
        _ => Err(ExtractError::UnsupportedContentType(
            content_type.to_string(),
        )),
    }
}

/// Map a file extension to the content type stored with the document.
pub fn content_type_for_path(path: &Path) -> &'static str {
    match path
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase())
        .as_deref()
    {
        Some("md") | Some("markdown") => MIME_MARKDOWN,
        Some("pdf") => MIME_PDF,
        Some("docx") => MIME_DOCX,
        Some("pptx") => MIME_PPTX,
        Some("xlsx") => MIME_XLSX,
        Some("html") | Some("htm") => MIME_HTML,
        Some("csv") => "text/csv",
        Some("json") => "application/json",
        _ => MIME_PLAIN,
    }
}

/// Whether this content type needs byte-level extraction (as opposed to
/// being read as UTF-8 text directly).
pub fn is_binary_format(content_type: &str) -> bool {
    matches!(content_type, MIME_PDF | MIME_DOCX | MIME_PPTX | MIME_XLSX)
}

// ============ PDF ============

fn extract_pdf(bytes: &[u8]) -> Result<String, ExtractError> {
    let text =
        pdf_extract::extract_text_from_mem(bytes).map_err(|e| ExtractError::Pdf(e.to_string()))?;
    let chars = text.chars().filter(|c| !c.is_whitespace()).count();
    if chars < MIN_TEXT_CHARS {
        return Err(ExtractError::LowText { chars });
    }
    Ok(text)
}

// ============ OOXML ============

fn open_archive(bytes: &[u8]) -> Result<zip::ZipArchive<std::io::Cursor<&[u8]>>, ExtractError> {
    zip::ZipArchive::new(std::io::Cursor::new(bytes)).map_err(|e| ExtractError::Ooxml(e.to_string()))
}

fn read_zip_entry_bounded(
    archive: &mut zip::ZipArchive<std::io::Cursor<&[u8]>>,
    name: &str,
) -> Result<Vec<u8>, ExtractError> {
    let entry = archive
        .by_name(name)
        .map_err(|e| ExtractError::Ooxml(e.to_string()))?;
    let mut out = Vec::new();
    entry
        .take(MAX_XML_ENTRY_BYTES)
        .read_to_end(&mut out)
        .map_err(|e| ExtractError::Ooxml(e.to_string()))?;
    if out.len() as u64 >= MAX_XML_ENTRY_BYTES {
        return Err(ExtractError::Ooxml(format!(
            "ZIP entry {} exceeds size limit ({} bytes)",
            name, MAX_XML_ENTRY_BYTES
        )));
    }
    Ok(out)
}

fn extract_docx(bytes: &[u8]) -> Result<String, ExtractError> {
    let mut archive = open_archive(bytes)?;
    if !archive.file_names().any(|n| n == "word/document.xml") {
        return Err(ExtractError::Ooxml(
            "word/document.xml not found".to_string(),
        ));
    }
    let xml = read_zip_entry_bounded(&mut archive, "word/document.xml")?;
    collect_text_runs(&xml, "")
}

fn extract_pptx(bytes: &[u8]) -> Result<String, ExtractError> {
    let mut archive = open_archive(bytes)?;
    let slides = numbered_entries(&mut archive, "ppt/slides/slide");
    let mut out = String::new();
    for name in slides {
        let xml = read_zip_entry_bounded(&mut archive, &name)?;
        let text = collect_text_runs(&xml, " ")?;
        if !out.is_empty() && !text.is_empty() {
            out.push('\n');
        }
        out.push_str(&text);
    }
    Ok(out)
}

/// Entries matching `<prefix>N.xml`, sorted by N.
fn numbered_entries(
    archive: &mut zip::ZipArchive<std::io::Cursor<&[u8]>>,
    prefix: &str,
) -> Vec<String> {
    let mut names: Vec<String> = archive
        .file_names()
        .filter(|n| n.starts_with(prefix) && n.ends_with(".xml"))
        .map(|s| s.to_string())
        .collect();
    names.sort_by_key(|name| {
        name.trim_start_matches(prefix)
            .trim_end_matches(".xml")
            .parse::<u32>()
            .unwrap_or(u32::MAX)
    });
    names
}

/// Collect `<t>` text runs (WordprocessingML `w:t` and DrawingML `a:t` share
/// the local name). `joiner` is inserted between runs.
fn collect_text_runs(xml: &[u8], joiner: &str) -> Result<String, ExtractError> {
    let mut out = String::new();
    let mut reader = quick_xml::Reader::from_reader(xml);
    reader.config_mut().trim_text(true);
    let mut buf = Vec::new();
    loop {
        match reader.read_event_into(&mut buf) {
            Ok(quick_xml::events::Event::Start(e)) => {
                if e.local_name().as_ref() == b"t" {
                    if let Ok(quick_xml::events::Event::Text(te)) = reader.read_event_into(&mut buf)
                    {
                        if !out.is_empty() && !joiner.is_empty() {
                            out.push_str(joiner);
                        }
                        out.push_str(te.unescape().unwrap_or_default().as_ref());
                    }
                }
            }
            Ok(quick_xml::events::Event::Eof) => break,
            Err(e) => return Err(ExtractError::Ooxml(e.to_string())),
            _ => {}
        }
        buf.clear();
    }
    Ok(out)
}

fn extract_xlsx(bytes: &[u8]) -> Result<String, ExtractError> {
    let mut archive = open_archive(bytes)?;
    let shared = read_shared_strings(&mut archive)?;
    let sheets = numbered_entries(&mut archive, "xl/worksheets/sheet");
    let mut out = String::new();
    for name in sheets.into_iter().take(XLSX_MAX_SHEETS) {
        let xml = read_zip_entry_bounded(&mut archive, &name)?;
        let cells = collect_sheet_cells(&xml, &shared)?;
        if !out.is_empty() && !cells.is_empty() {
            out.push('\n');
        }
        out.push_str(&cells);
    }
    Ok(out)
}

fn read_shared_strings(
    archive: &mut zip::ZipArchive<std::io::Cursor<&[u8]>>,
) -> Result<Vec<String>, ExtractError> {
    // Workbooks with no string cells ship without a shared-string table.
    if !archive.file_names().any(|n| n == "xl/sharedStrings.xml") {
        return Ok(Vec::new());
    }
    let xml = read_zip_entry_bounded(archive, "xl/sharedStrings.xml")?;
    let mut strings = Vec::new();
    let mut reader = quick_xml::Reader::from_reader(xml.as_slice());
    reader.config_mut().trim_text(true);
    let mut buf = Vec::new();
    let mut in_si = false;
    loop {
        match reader.read_event_into(&mut buf) {
            Ok(quick_xml::events::Event::Start(e)) => {
                if e.local_name().as_ref() == b"si" {
                    in_si = true;
                } else if in_si && e.local_name().as_ref() == b"t" {
                    if let Ok(quick_xml::events::Event::Text(te)) = reader.read_event_into(&mut buf)
                    {
                        strings.push(te.unescape().unwrap_or_default().into_owned());
                    }
                }
            }
            Ok(quick_xml::events::Event::End(e)) => {
                if e.local_name().as_ref() == b"si" {
                    in_si = false;
                }
            }
            Ok(quick_xml::events::Event::Eof) => break,
            Err(e) => return Err(ExtractError::Ooxml(e.to_string())),
            _ => {}
        }
        buf.clear();
    }
    Ok(strings)
}

#[derive(Clone, Copy, PartialEq)]
enum CellKind {
    /// `t="s"`: `<v>` holds an index into the shared-string table.
    Shared,
    /// `t="inlineStr"`: text lives in `<is><t>` inside the cell.
    Inline,
    /// Numbers, booleans, formula results: `<v>` holds the literal value.
    Plain,
}

fn collect_sheet_cells(xml: &[u8], shared: &[String]) -> Result<String, ExtractError> {
    let mut cells: Vec<String> = Vec::new();
    let mut reader = quick_xml::Reader::from_reader(xml);
    reader.config_mut().trim_text(true);
    let mut buf = Vec::new();
    let mut in_value = false;
    let mut kind = CellKind::Plain;
    loop {
        if cells.len() >= XLSX_MAX_CELLS_PER_SHEET {
            break;
        }
        match reader.read_event_into(&mut buf) {
            Ok(quick_xml::events::Event::Start(e)) => {
                if e.local_name().as_ref() == b"c" {
                    kind = CellKind::Plain;
                    for attr in e.attributes().flatten() {
                        if attr.key.as_ref() == b"t" {
                            kind = match attr.value.as_ref() {
                                b"s" => CellKind::Shared,
                                b"inlineStr" => CellKind::Inline,
                                _ => CellKind::Plain,
                            };
                        }
                    }
                } else if e.local_name().as_ref() == b"v" {
                    in_value = true;
                } else if kind == CellKind::Inline && e.local_name().as_ref() == b"t" {
                    if let Ok(quick_xml::events::Event::Text(te)) = reader.read_event_into(&mut buf)
                    {
                        let v = te.unescape().unwrap_or_default();
                        if !v.trim().is_empty() {
                            cells.push(v.trim().to_string());
                        }
                    }
                }
            }
            Ok(quick_xml::events::Event::Text(te)) if in_value => {
                let v = te.unescape().unwrap_or_default();
                let s = v.trim();
                if !s.is_empty() {
                    match kind {
                        CellKind::Shared => {
                            if let Ok(i) = s.parse::<usize>() {
                                if let Some(text) = shared.get(i) {
                                    cells.push(text.clone());
                                }
                            }
                        }
                        CellKind::Inline => {}
                        CellKind::Plain => cells.push(s.to_string()),
                    }
                }
                in_value = false;
            }
            Ok(quick_xml::events::Event::End(e)) => {
                if e.local_name().as_ref() == b"v" {
                    in_value = false;
                } else if e.local_name().as_ref() == b"c" {
                    kind = CellKind::Plain;
                }
            }
            Ok(quick_xml::events::Event::Eof) => break,
            Err(e) => return Err(ExtractError::Ooxml(e.to_string())),
            _ => {}
        }
        buf.clear();
    }
    Ok(cells.join(" "))
}

// ============ HTML ============

/// Strip tags from HTML, dropping script/style content, decoding common
/// entities, and inserting line breaks at block-level boundaries.
pub fn strip_html(html: &str) -> String {
    let mut out = String::with_capacity(html.len() / 2);
    let bytes = html.as_bytes();
    let mut i = 0usize;
    let mut skip_until: Option<&'static str> = None;

    while i < bytes.len() {
        if bytes[i] == b'<' {
            let rest = &html[i..];
            if let Some(close) = skip_until {
                if rest.len() >= close.len() && rest[..close.len()].eq_ignore_ascii_case(close) {
                    skip_until = None;
                    i += rest.find('>').map(|p| p + 1).unwrap_or(rest.len());
                } else {
                    i += rest[1..].find('<').map(|p| p + 1).unwrap_or(rest.len());
                }
                continue;
            }

            let end = match rest.find('>') {
                Some(p) => p,
                None => break,
            };
            let tag = rest[1..end].trim();
            let name: String = tag
                .chars()
                .take_while(|c| c.is_ascii_alphanumeric())
                .collect::<String>()
                .to_ascii_lowercase();

            if name == "script" {
                skip_until = Some("</script");
            } else if name == "style" {
                skip_until = Some("</style");
            } else if is_block_tag(&name) && !out.ends_with('\n') && !out.is_empty() {
                out.push('\n');
            }
            i += end + 1;
            continue;
        }

        if skip_until.is_some() {
            i += 1;
            continue;
        }

        if bytes[i] == b'&' {
            let rest = &html[i..];
            let (decoded, consumed) = decode_entity(rest);
            out.push_str(decoded);
            i += consumed;
            continue;
        }

        let ch = html[i..].chars().next().unwrap_or('\u{FFFD}');
        out.push(ch);
        i += ch.len_utf8();
    }

    collapse_whitespace(&out)
}

fn is_block_tag(name: &str) -> bool {
    matches!(
        name,
        "p" | "br"
            | "div"
            | "section"
            | "article"
            | "li"
            | "tr"
            | "table"
            | "h1"
            | "h2"
            | "h3"
            | "h4"
            | "h5"
            | "h6"
    )
}

fn decode_entity(s: &str) -> (&'static str, usize) {
    for (entity, decoded) in [
        ("&amp;", "&"),
        ("&lt;", "<"),
        ("&gt;", ">"),
        ("&quot;", "\""),
        ("&#39;", "'"),
        ("&apos;", "'"),
        ("&nbsp;", " "),
    ] {
        if s.len() >= entity.len() && s[..entity.len()].eq_ignore_ascii_case(entity) {
            return (decoded, entity.len());
        }
    }
    ("&", 1)
}

/// Collapse runs of spaces/tabs and blank-only lines.
fn collapse_whitespace(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for line in text.lines() {
        let collapsed = line.split_whitespace().collect::<Vec<_>>().join(" ");
        if collapsed.is_empty() {
            continue;
        }
        if !out.is_empty() {
            out.push('\n');
        }
        out.push_str(&collapsed);
    }
    out
}

/// Pull the `<title>` text out of an HTML page, if any.
pub fn html_title(html: &str) -> Option<String> {
    let lower = html.to_ascii_lowercase();
    let start = lower.find("<title")?;
    let open_end = lower[start..].find('>')? + start + 1;
    let close = lower[open_end..].find("</title")? + open_end;
    let title = collapse_whitespace(&strip_html(&html[open_end..close]));
    if title.is_empty() {
        None
    } else {
        Some(title)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn unsupported_content_type_returns_error() {
        let err = extract_text(b"foo", "application/octet-stream").unwrap_err();
        assert!(matches!(err, ExtractError::UnsupportedContentType(_)));
    }

    #[test]
    fn invalid_pdf_returns_error() {
        let err = extract_text(b"not a pdf", MIME_PDF).unwrap_err();
        assert!(matches!(err, ExtractError::Pdf(_)));
    }

    #[test]
    fn invalid_zip_returns_error_for_docx() {
        let err = extract_text(b"not a zip", MIME_DOCX).unwrap_err();
        assert!(matches!(err, ExtractError::Ooxml(_)));
    }

    #[test]
    fn docx_text_runs_extracted() {
        let mut buf = Vec::new();
        {
            let mut zip = zip::ZipWriter::new(std::io::Cursor::new(&mut buf));
            zip.start_file("word/document.xml", zip::write::SimpleFileOptions::default())
                .unwrap();
            zip.write_all(
                b"<?xml version=\"1.0\"?><w:document xmlns:w=\"x\"><w:body><w:p><w:r><w:t>hello world</w:t></w:r></w:p></w:body></w:document>",
            )
            .unwrap();
            zip.finish().unwrap();
        }
        let text = extract_text(&buf, MIME_DOCX).unwrap();
        assert_eq!(text, "hello world");
    }

    #[test]
    fn xlsx_extracts_shared_numeric_and_inline_cells() {
        let mut buf = Vec::new();
        {
            let mut zip = zip::ZipWriter::new(std::io::Cursor::new(&mut buf));
            let opts = zip::write::SimpleFileOptions::default();
            zip.start_file("xl/sharedStrings.xml", opts).unwrap();
            zip.write_all(
                b"<?xml version=\"1.0\"?><sst xmlns=\"x\"><si><t>Revenue</t></si></sst>",
            )
            .unwrap();
            zip.start_file("xl/worksheets/sheet1.xml", opts).unwrap();
            zip.write_all(
                b"<?xml version=\"1.0\"?><worksheet xmlns=\"x\"><sheetData><row>\
                  <c r=\"A1\" t=\"s\"><v>0</v></c>\
                  <c r=\"B1\"><v>12345</v></c>\
                  <c r=\"C1\" t=\"inlineStr\"><is><t>note</t></is></c>\
                  </row></sheetData></worksheet>",
            )
            .unwrap();
            zip.finish().unwrap();
        }
        let text = extract_text(&buf, MIME_XLSX).unwrap();
        assert_eq!(text, "Revenue 12345 note");
    }

    #[test]
    fn xlsx_without_shared_strings_keeps_values() {
        let mut buf = Vec::new();
        {
            let mut zip = zip::ZipWriter::new(std::io::Cursor::new(&mut buf));
            zip.start_file(
                "xl/worksheets/sheet1.xml",
                zip::write::SimpleFileOptions::default(),
            )
            .unwrap();
            zip.write_all(
                b"<?xml version=\"1.0\"?><worksheet xmlns=\"x\"><sheetData><row>\
                  <c r=\"A1\"><v>7</v></c><c r=\"B1\"><v>8</v></c>\
                  </row></sheetData></worksheet>",
            )
            .unwrap();
            zip.finish().unwrap();
        }
        let text = extract_text(&buf, MIME_XLSX).unwrap();
        assert_eq!(text, "7 8");
    }

    #[test]
    fn content_type_mapping() {
        assert_eq!(content_type_for_path(Path::new("a/b.md")), MIME_MARKDOWN);
        assert_eq!(content_type_for_path(Path::new("x.PDF")), MIME_PDF);
        assert_eq!(content_type_for_path(Path::new("x.htm")), MIME_HTML);
        assert_eq!(content_type_for_path(Path::new("notes")), MIME_PLAIN);
        assert!(is_binary_format(MIME_PDF));
        assert!(!is_binary_format(MIME_MARKDOWN));
    }

    #[test]
    fn strip_html_drops_tags_and_scripts() {
        let html = "<html><head><title>T</title><style>p{color:red}</style>\
                    <script>var x = '<p>';</script></head>\
                    <body><h1>Header</h1><p>Para &amp; more.</p></body></html>";
        let text = strip_html(html);
        assert!(text.contains("Header"));
        assert!(text.contains("Para & more."));
        assert!(!text.contains("color:red"));
        assert!(!text.contains("var x"));
    }

    #[test]
    fn strip_html_inserts_block_breaks() {
        let text = strip_html("<p>one</p><p>two</p>");
        assert_eq!(text, "one\ntwo");
    }

    #[test]
    fn html_title_extracted() {
        let html = "<html><head><title>  My   Page </title></head><body></body></html>";
        assert_eq!(html_title(html).as_deref(), Some("My Page"));
        assert_eq!(html_title("<html><body>no title</body></html>"), None);
    }
}
