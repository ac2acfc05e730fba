//! Text extraction for uploaded documents (PDF, DOCX, plain text).
//!
//! The upload pipeline supplies bytes plus a [`DocumentFormat`] (usually
//! detected from the filename); this module returns plain UTF-8 text or a
//! typed [`ExtractError`]. It never panics on malformed input.

use std::fmt;
use std::io::Read;
use std::path::Path;

use thiserror::Error;

/// Maximum decompressed bytes to read from a single ZIP entry (zip-bomb protection).
const MAX_XML_ENTRY_BYTES: u64 = 50 * 1024 * 1024;

#[derive(Debug, Error)]
pub enum ExtractError {
    #[error("unsupported file type: {0} (use PDF, DOCX, or TXT)")]
    UnsupportedFormat(String),
    #[error("error reading PDF: {0}")]
    Pdf(String),
    #[error("error reading DOCX: {0}")]
    Docx(String),
    #[error("error reading TXT: {0}")]
    Text(#[from] std::string::FromUtf8Error),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DocumentFormat {
    Pdf,
    Docx,
    Text,
}

impl DocumentFormat {
    /// Detect the format from a filename extension (case-insensitive).
    pub fn from_filename(filename: &str) -> Result<Self, ExtractError> {
        let ext = Path::new(filename)
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| e.to_ascii_lowercase());

        match ext.as_deref() {
            Some("pdf") => Ok(DocumentFormat::Pdf),
            Some("docx") => Ok(DocumentFormat::Docx),
            Some("txt") => Ok(DocumentFormat::Text),
            _ => Err(ExtractError::UnsupportedFormat(filename.to_string())),
        }
    }
}

impl fmt::Display for DocumentFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            DocumentFormat::Pdf => "PDF",
            DocumentFormat::Docx => "DOCX",
            DocumentFormat::Text => "TXT",
        })
    }
}

/// Extracts plain text from uploaded bytes.
pub fn extract_text(bytes: &[u8], format: DocumentFormat) -> Result<String, ExtractError> {
    let text = match format {
        DocumentFormat::Pdf => extract_pdf(bytes)?,
        DocumentFormat::Docx => extract_docx(bytes)?,
        DocumentFormat::Text => String::from_utf8(bytes.to_vec())?,
    };
    tracing::info!("extracted {} characters from {}", text.chars().count(), format);
    Ok(text)
}

fn extract_pdf(bytes: &[u8]) -> Result<String, ExtractError> {
    pdf_extract::extract_text_from_mem(bytes).map_err(|e| ExtractError::Pdf(e.to_string()))
}

fn extract_docx(bytes: &[u8]) -> Result<String, ExtractError> {
    let mut archive = zip::ZipArchive::new(std::io::Cursor::new(bytes))
        .map_err(|e| ExtractError::Docx(e.to_string()))?;
    let entry = archive
        .by_name("word/document.xml")
        .map_err(|_| ExtractError::Docx("word/document.xml not found".to_string()))?;

    let mut doc_xml = Vec::new();
    entry
        .take(MAX_XML_ENTRY_BYTES)
        .read_to_end(&mut doc_xml)
        .map_err(|e| ExtractError::Docx(e.to_string()))?;
    if doc_xml.len() as u64 >= MAX_XML_ENTRY_BYTES {
        return Err(ExtractError::Docx(
            "word/document.xml exceeds size limit".to_string(),
        ));
    }

    extract_paragraphs(&doc_xml)
}

/// Collect `w:t` runs, one line per `w:p` paragraph.
fn extract_paragraphs(xml: &[u8]) -> Result<String, ExtractError> {
    use quick_xml::events::Event;

    let mut paragraphs: Vec<String> = Vec::new();
    let mut current = String::new();
    let mut in_text = false;
    let mut reader = quick_xml::Reader::from_reader(xml);
    let mut buf = Vec::new();

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(e)) if e.local_name().as_ref() == b"t" => in_text = true,
            Ok(Event::Text(te)) if in_text => {
                let text = te
                    .unescape()
                    .map_err(|e| ExtractError::Docx(e.to_string()))?;
                current.push_str(&text);
            }
            Ok(Event::End(e)) => match e.local_name().as_ref() {
                b"t" => in_text = false,
                b"p" => paragraphs.push(std::mem::take(&mut current)),
                _ => {}
            },
            Ok(Event::Eof) => break,
            Err(e) => return Err(ExtractError::Docx(e.to_string())),
            _ => {}
        }
        buf.clear();
    }

    if !current.is_empty() {
        paragraphs.push(current);
    }
    Ok(paragraphs.join("\n"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn docx(body: &str) -> Vec<u8> {
        let mut buf = Vec::new();
        {
            let mut zip = zip::ZipWriter::new(std::io::Cursor::new(&mut buf));
            zip.start_file(
                "word/document.xml",
                zip::write::SimpleFileOptions::default(),
            )
            .unwrap();
            let xml = format!(
                "<?xml version=\"1.0\"?><w:document xmlns:w=\"http://schemas.openxmlformats.org/wordprocessingml/2006/main\"><w:body>{}</w:body></w:document>",
                body
            );
            zip.write_all(xml.as_bytes()).unwrap();
            zip.finish().unwrap();
        }
        buf
    }

    #[test]
    fn format_from_filename() {
        assert_eq!(
            DocumentFormat::from_filename("report.PDF").unwrap(),
            DocumentFormat::Pdf
        );
        assert_eq!(
            DocumentFormat::from_filename("a/b/notes.docx").unwrap(),
            DocumentFormat::Docx
        );
        assert_eq!(
            DocumentFormat::from_filename("readme.txt").unwrap(),
            DocumentFormat::Text
        );
        assert!(matches!(
            DocumentFormat::from_filename("slides.pptx"),
            Err(ExtractError::UnsupportedFormat(_))
        ));
        assert!(DocumentFormat::from_filename("noext").is_err());
    }

    #[test]
    fn plain_text_must_be_utf8() {
        assert_eq!(
            extract_text("héllo".as_bytes(), DocumentFormat::Text).unwrap(),
            "héllo"
        );
        assert!(matches!(
            extract_text(&[0xff, 0xfe, 0x00], DocumentFormat::Text),
            Err(ExtractError::Text(_))
        ));
    }

    #[test]
    fn docx_paragraphs_become_lines() {
        let bytes = docx(
            "<w:p><w:r><w:t>Hello </w:t></w:r><w:r><w:t>world</w:t></w:r></w:p><w:p><w:r><w:t>Second &amp; last</w:t></w:r></w:p>",
        );
        let text = extract_text(&bytes, DocumentFormat::Docx).unwrap();
        assert_eq!(text, "Hello world\nSecond & last");
    }

    #[test]
    fn invalid_pdf_returns_error() {
        let err = extract_text(b"not a pdf", DocumentFormat::Pdf).unwrap_err();
        assert!(matches!(err, ExtractError::Pdf(_)));
    }

    #[test]
    fn invalid_zip_returns_error_for_docx() {
        let err = extract_text(b"not a zip", DocumentFormat::Docx).unwrap_err();
        assert!(matches!(err, ExtractError::Docx(_)));
    }
}
