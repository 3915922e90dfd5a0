//! Text extraction for downloaded report files.
//!
//! The disclosure site serves reports as PDF or DOCX, usually wrapped in a
//! ZIP archive. Extraction is keyed on the file extension and returns plain
//! UTF-8 text; it never panics, and any failure is returned so the indexer
//! can record it against the report.
//!
//! | Extension | Handling |
//! |-----------|----------|
//! | `.pdf` | `pdf-extract` |
//! | `.docx` | `word/document.xml` text runs, one line per paragraph |
//! | `.txt`, `.md` | lossy UTF-8 |
//! | `.zip` | first supported entry (PDF, then DOCX, then text) |

use std::any::Any;
use std::io::Read;
use std::path::Path;

use thiserror::Error;

/// Maximum decompressed bytes read from a single ZIP entry (zip-bomb protection).
const MAX_ENTRY_BYTES: u64 = 256 * 1024 * 1024;

/// Document formats the extractor understands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DocumentKind {
    Pdf,
    Docx,
    Text,
    Zip,
}

impl DocumentKind {
    /// Detect the format from a file name or path.
    pub fn from_name(name: &str) -> Option<Self> {
        let ext = name.rsplit_once('.')?.1.to_ascii_lowercase();
        match ext.as_str() {
            "pdf" => Some(Self::Pdf),
            "docx" => Some(Self::Docx),
            "txt" | "md" => Some(Self::Text),
            "zip" => Some(Self::Zip),
            _ => None,
        }
    }
}

#[derive(Debug, Error)]
pub enum ExtractError {
    #[error("cannot read file: {0}")]
    Io(String),

    #[error("unsupported file format: {0}")]
    UnsupportedFormat(String),

    #[error("PDF extraction failed: {0}")]
    Pdf(String),

    #[error("DOCX extraction failed: {0}")]
    Docx(String),

    #[error("archive extraction failed: {0}")]
    Archive(String),

    /// The parser crashed on malformed input.
    #[error("extractor crashed on {file}: {message}")]
    Panicked { file: String, message: String },
}

/// Read a report file from disk and extract its text.
///
/// Parsing runs on the blocking pool; a parser panic becomes
/// [`ExtractError::Panicked`] instead of unwinding into the caller.
pub async fn extract_file(path: &Path) -> Result<String, ExtractError> {
    let name = path.to_string_lossy().to_string();
    let kind = DocumentKind::from_name(&name)
        .ok_or_else(|| ExtractError::UnsupportedFormat(name.clone()))?;
    let bytes = tokio::fs::read(path)
        .await
        .map_err(|e| ExtractError::Io(format!("{}: {}", name, e)))?;
    tracing::debug!(path = %name, bytes = bytes.len(), "extracting text");

    match tokio::task::spawn_blocking(move || extract_bytes(&bytes, kind)).await {
        Ok(result) => result,
        Err(e) => {
            let message = if e.is_panic() {
                panic_message(e.into_panic())
            } else {
                e.to_string()
            };
            tracing::error!(path = %name, %message, "text extraction crashed");
            Err(ExtractError::Panicked {
                file: name,
                message,
            })
        }
    }
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

/// Extract text from in-memory file content of a known kind.
pub fn extract_bytes(bytes: &[u8], kind: DocumentKind) -> Result<String, ExtractError> {
    match kind {
        DocumentKind::Pdf => extract_pdf(bytes),
        DocumentKind::Docx => extract_docx(bytes),
        DocumentKind::Text => Ok(String::from_utf8_lossy(bytes).into_owned()),
        DocumentKind::Zip => extract_archive(bytes),
    }
}

fn extract_pdf(bytes: &[u8]) -> Result<String, ExtractError> {
    pdf_extract::extract_text_from_mem(bytes).map_err(|e| ExtractError::Pdf(e.to_string()))
}

type Archive<'a> = zip::ZipArchive<std::io::Cursor<&'a [u8]>>;

fn read_entry_bounded(archive: &mut Archive<'_>, name: &str) -> Result<Vec<u8>, ExtractError> {
    let entry = archive
        .by_name(name)
        .map_err(|e| ExtractError::Archive(e.to_string()))?;
    let mut out = Vec::new();
    entry
        .take(MAX_ENTRY_BYTES)
        .read_to_end(&mut out)
        .map_err(|e| ExtractError::Archive(e.to_string()))?;
    if out.len() as u64 >= MAX_ENTRY_BYTES {
        return Err(ExtractError::Archive(format!(
            "entry {} exceeds size limit ({} bytes)",
            name, MAX_ENTRY_BYTES
        )));
    }
    Ok(out)
}

/// Pick the best report inside a downloaded archive and extract it.
fn extract_archive(bytes: &[u8]) -> Result<String, ExtractError> {
    let mut archive = zip::ZipArchive::new(std::io::Cursor::new(bytes))
        .map_err(|e| ExtractError::Archive(e.to_string()))?;

    let mut candidates: Vec<(DocumentKind, String)> = archive
        .file_names()
        .filter(|n| !n.ends_with('/'))
        .filter_map(|n| match DocumentKind::from_name(n) {
            Some(DocumentKind::Zip) | None => None,
            Some(kind) => Some((kind, n.to_string())),
        })
        .collect();
    candidates.sort_by_key(|(kind, name)| (archive_priority(*kind), name.clone()));

    let (kind, name) = candidates
        .into_iter()
        .next()
        .ok_or_else(|| ExtractError::Archive("no supported document in archive".to_string()))?;

    tracing::debug!(entry = %name, "extracting archive entry");
    let content = read_entry_bounded(&mut archive, &name)?;
    extract_bytes(&content, kind)
}

fn archive_priority(kind: DocumentKind) -> u8 {
    match kind {
        DocumentKind::Pdf => 0,
        DocumentKind::Docx => 1,
        DocumentKind::Text => 2,
        DocumentKind::Zip => 3,
    }
}

fn extract_docx(bytes: &[u8]) -> Result<String, ExtractError> {
    let mut archive = zip::ZipArchive::new(std::io::Cursor::new(bytes))
        .map_err(|e| ExtractError::Docx(e.to_string()))?;
    let xml = read_entry_bounded(&mut archive, "word/document.xml")
        .map_err(|_| ExtractError::Docx("word/document.xml not found".to_string()))?;
    extract_paragraph_text(&xml)
}

/// Collect `<w:t>` runs, ending each `<w:p>` paragraph with a newline.
fn extract_paragraph_text(xml: &[u8]) -> Result<String, ExtractError> {
    use quick_xml::events::Event;

    let mut out = String::new();
    let mut reader = quick_xml::Reader::from_reader(xml);
    let mut buf = Vec::new();
    let mut in_text = false;
    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(e)) if e.local_name().as_ref() == b"t" => in_text = true,
            Ok(Event::Text(te)) if in_text => {
                out.push_str(te.unescape().unwrap_or_default().as_ref());
            }
            Ok(Event::End(e)) => match e.local_name().as_ref() {
                b"t" => in_text = false,
                b"p" => out.push('\n'),
                _ => {}
            },
            Ok(Event::Eof) => break,
            Err(e) => return Err(ExtractError::Docx(e.to_string())),
            _ => {}
        }
        buf.clear();
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn zip_of(entries: &[(&str, &[u8])]) -> Vec<u8> {
        let mut writer = zip::ZipWriter::new(std::io::Cursor::new(Vec::new()));
        for (name, content) in entries {
            writer
                .start_file(*name, zip::write::SimpleFileOptions::default())
                .unwrap();
            writer.write_all(content).unwrap();
        }
        writer.finish().unwrap().into_inner()
    }

    const DOCUMENT_XML: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<w:document xmlns:w="http://schemas.openxmlformats.org/wordprocessingml/2006/main">
<w:body>
<w:p><w:r><w:t>Выручка за 6 месяцев</w:t></w:r></w:p>
<w:p><w:r><w:t>Net income</w:t></w:r><w:r><w:t xml:space="preserve"> grew</w:t></w:r></w:p>
</w:body>
</w:document>"#;

    #[test]
    fn detects_kind_from_extension() {
        assert_eq!(DocumentKind::from_name("a/REPORT.PDF"), Some(DocumentKind::Pdf));
        assert_eq!(DocumentKind::from_name("r.zip"), Some(DocumentKind::Zip));
        assert_eq!(DocumentKind::from_name("notes.txt"), Some(DocumentKind::Text));
        assert_eq!(DocumentKind::from_name("report.xls"), None);
        assert_eq!(DocumentKind::from_name("noext"), None);
    }

    #[test]
    fn invalid_pdf_returns_error() {
        let err = extract_bytes(b"not a pdf", DocumentKind::Pdf).unwrap_err();
        assert!(matches!(err, ExtractError::Pdf(_)));
    }

    #[test]
    fn invalid_zip_returns_error_for_docx() {
        let err = extract_bytes(b"not a zip", DocumentKind::Docx).unwrap_err();
        assert!(matches!(err, ExtractError::Docx(_)));
    }

    #[test]
    fn docx_paragraphs_become_lines() {
        let docx = zip_of(&[("word/document.xml", DOCUMENT_XML.as_bytes())]);
        let text = extract_bytes(&docx, DocumentKind::Docx).unwrap();
        assert_eq!(text, "Выручка за 6 месяцев\nNet income grew\n");
    }

    #[test]
    fn archive_prefers_documents_over_text() {
        let docx = zip_of(&[("word/document.xml", DOCUMENT_XML.as_bytes())]);
        let archive = zip_of(&[
            ("readme.txt", b"ignore me".as_slice()),
            ("folder/report.docx", docx.as_slice()),
        ]);
        let text = extract_bytes(&archive, DocumentKind::Zip).unwrap();
        assert!(text.starts_with("Выручка"));
    }

    #[test]
    fn archive_without_documents_is_an_error() {
        let archive = zip_of(&[("image.png", b"\x89PNG".as_slice())]);
        let err = extract_bytes(&archive, DocumentKind::Zip).unwrap_err();
        assert!(matches!(err, ExtractError::Archive(_)));
    }

    /// Single-page PDF with a correct xref table. `page_entries` is spliced
    /// into the page dictionary.
    fn single_page_pdf(page_entries: &str, content: &str) -> Vec<u8> {
        let objects = [
            "<< /Type /Catalog /Pages 2 0 R >>".to_string(),
            "<< /Type /Pages /Kids [3 0 R] /Count 1 >>".to_string(),
            format!("<< /Type /Page /Parent 2 0 R{} /Contents 4 0 R >>", page_entries),
            format!(
                "<< /Length {} >>\nstream\n{}\nendstream",
                content.len(),
                content
            ),
        ];
        let mut out = b"%PDF-1.4\n".to_vec();
        let mut offsets = Vec::new();
        for (i, body) in objects.iter().enumerate() {
            offsets.push(out.len());
            out.extend_from_slice(format!("{} 0 obj\n{}\nendobj\n", i + 1, body).as_bytes());
        }
        let xref = out.len();
        out.extend_from_slice(
            format!("xref\n0 {}\n0000000000 65535 f \n", objects.len() + 1).as_bytes(),
        );
        for offset in offsets {
            out.extend_from_slice(format!("{:010} 00000 n \n", offset).as_bytes());
        }
        out.extend_from_slice(
            format!(
                "trailer\n<< /Size {} /Root 1 0 R >>\nstartxref\n{}\n%%EOF\n",
                objects.len() + 1,
                xref
            )
            .as_bytes(),
        );
        out
    }

    async fn extract_written(name: &str, bytes: &[u8]) -> Result<String, ExtractError> {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join(name);
        std::fs::write(&path, bytes).unwrap();
        extract_file(&path).await
    }

    #[tokio::test]
    async fn pdf_without_font_resources_is_an_error() {
        let pdf = single_page_pdf(
            " /MediaBox [0 0 612 792]",
            "BT /F1 12 Tf 72 712 Td (Revenue) Tj ET",
        );
        let err = extract_written("report.pdf", &pdf).await.unwrap_err();
        assert!(
            matches!(err, ExtractError::Panicked { .. } | ExtractError::Pdf(_)),
            "unexpected error: {}",
            err
        );
    }

    #[tokio::test]
    async fn pdf_without_media_box_is_an_error() {
        let pdf = single_page_pdf("", "BT /F1 12 Tf 72 712 Td (Revenue) Tj ET");
        let err = extract_written("report.pdf", &pdf).await.unwrap_err();
        assert!(matches!(
            err,
            ExtractError::Panicked { .. } | ExtractError::Pdf(_)
        ));
    }

    #[tokio::test]
    async fn zipped_broken_pdf_is_an_error() {
        let pdf = single_page_pdf(
            " /MediaBox [0 0 612 792]",
            "BT /F1 12 Tf 72 712 Td (Revenue) Tj ET",
        );
        let archive = zip_of(&[("report.pdf", pdf.as_slice())]);
        assert!(extract_written("report.zip", &archive).await.is_err());
    }

    #[tokio::test]
    async fn text_file_extracts_off_the_runtime() {
        let text = extract_written("notes.txt", "Выручка".as_bytes()).await.unwrap();
        assert_eq!(text, "Выручка");
    }

    #[tokio::test]
    async fn unsupported_file_is_an_error() {
        let err = extract_file(Path::new("/tmp/report.xls")).await.unwrap_err();
        assert!(matches!(err, ExtractError::UnsupportedFormat(_)));
    }

    #[tokio::test]
    async fn missing_file_is_an_io_error() {
        let err = extract_file(Path::new("/nonexistent/dir/report.txt"))
            .await
            .unwrap_err();
        assert!(matches!(err, ExtractError::Io(_)));
    }
}
