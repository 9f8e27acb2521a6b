use crate::error::IngestError;
use crate::models::Page;
use lopdf::Document;
use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;
use std::io::{Cursor, Read};
use std::path::Path;
use tracing::{debug, warn};

/// Pages whose cleaned text is shorter than this are treated as noise.
pub const MIN_PAGE_CHARS: usize = 50;

/// PDF pages containing any of these are shipping/invoice boilerplate.
pub const PDF_EXCLUDED_MARKERS: [&str; 2] = ["SHIP TO", "INVOICE TO"];

const PDF_LIGATURES: [(char, &str); 5] = [
    ('\u{FB00}', "ff"),
    ('\u{FB01}', "fi"),
    ('\u{FB02}', "fl"),
    ('\u{FB03}', "ffi"),
    ('\u{FB04}', "ffl"),
];

const WORD_DOCUMENT_XML: &str = "word/document.xml";
const MAX_XML_ENTRY_BYTES: u64 = 50 * 1024 * 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FileKind {
    Pdf,
    Word,
}

impl FileKind {
    /// Dispatch is by extension only; `.doc` goes to the Word reader, which
    /// understands the OOXML container and rejects anything else.
    pub fn from_extension(extension: &str) -> Result<Self, IngestError> {
        let normalized = extension.trim().trim_start_matches('.').to_ascii_lowercase();
        match normalized.as_str() {
            "pdf" => Ok(Self::Pdf),
            "docx" | "doc" => Ok(Self::Word),
            _ => Err(IngestError::UnsupportedFileType(extension.to_string())),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pdf => "pdf",
            Self::Word => "word",
        }
    }
}

/// Lower-cased extension including the leading dot, or an empty string.
pub fn file_extension(file_name: &str) -> String {
    Path::new(file_name)
        .extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| format!(".{}", ext.to_ascii_lowercase()))
        .unwrap_or_default()
}

#[derive(Debug, Clone)]
pub struct PageText {
    pub number: u32,
    pub text: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ExtractedDocument {
    pub total_pages: u32,
    pub pages: Vec<Page>,
}

pub trait DocumentExtractor {
    fn kind(&self) -> FileKind;

    /// Raw page texts in physical order, including pages that will be filtered.
    fn extract_page_bytes(&self, bytes: &[u8]) -> Result<Vec<PageText>, IngestError>;

    fn extract_pages(&self, path: &Path) -> Result<Vec<PageText>, IngestError> {
        let bytes = std::fs::read(path)?;
        self.extract_page_bytes(&bytes)
    }
}

#[derive(Default)]
pub struct LopdfExtractor;

impl LopdfExtractor {
    fn pages_from(document: &Document) -> Vec<PageText> {
        let mut pages = Vec::new();
        for (page_no, _page_id) in document.get_pages() {
            let text = match document.extract_text(&[page_no]) {
                Ok(text) => text,
                Err(error) => {
                    warn!(page = page_no, error = %error, "pdf page text unreadable, treating as empty");
                    String::new()
                }
            };
            pages.push(PageText {
                number: page_no,
                text,
            });
        }
        pages
    }
}

impl DocumentExtractor for LopdfExtractor {
    fn kind(&self) -> FileKind {
        FileKind::Pdf
    }

    fn extract_page_bytes(&self, bytes: &[u8]) -> Result<Vec<PageText>, IngestError> {
        let document =
            Document::load_mem(bytes).map_err(|error| IngestError::pdf(error.to_string()))?;
        Ok(Self::pages_from(&document))
    }

    fn extract_pages(&self, path: &Path) -> Result<Vec<PageText>, IngestError> {
        let document = Document::load(path).map_err(|error| IngestError::pdf(error.to_string()))?;
        Ok(Self::pages_from(&document))
    }
}

/// Reads `word/document.xml` and splits the body into sections at explicit
/// page breaks, rendered page breaks and paragraph-level section breaks.
#[derive(Default)]
pub struct DocxExtractor;

impl DocumentExtractor for DocxExtractor {
    fn kind(&self) -> FileKind {
        FileKind::Word
    }

    fn extract_page_bytes(&self, bytes: &[u8]) -> Result<Vec<PageText>, IngestError> {
        let mut archive = zip::ZipArchive::new(Cursor::new(bytes))
            .map_err(|error| IngestError::word(error.to_string()))?;
        let entry = archive
            .by_name(WORD_DOCUMENT_XML)
            .map_err(|error| IngestError::word(format!("{WORD_DOCUMENT_XML}: {error}")))?;

        let mut xml = Vec::new();
        entry
            .take(MAX_XML_ENTRY_BYTES)
            .read_to_end(&mut xml)
            .map_err(|error| IngestError::word(error.to_string()))?;
        if xml.len() as u64 >= MAX_XML_ENTRY_BYTES {
            return Err(IngestError::word(format!(
                "{WORD_DOCUMENT_XML} exceeds size limit"
            )));
        }

        split_word_sections(&xml)
    }
}

fn is_page_break(element: &BytesStart<'_>) -> bool {
    match element.local_name().as_ref() {
        b"lastRenderedPageBreak" => true,
        b"br" => element.attributes().flatten().any(|attribute| {
            attribute.key.local_name().as_ref() == b"type" && attribute.value.as_ref() == b"page"
        }),
        _ => false,
    }
}

fn split_word_sections(xml: &[u8]) -> Result<Vec<PageText>, IngestError> {
    let mut reader = Reader::from_reader(xml);
    let mut buf = Vec::new();
    let mut sections = Vec::new();
    let mut current = String::new();
    let mut in_text = false;
    let mut in_paragraph_props = false;
    // A break only opens a new section once text follows it, so stacked
    // explicit and rendered breaks count once.
    let mut pending_break = false;

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(element)) => match element.local_name().as_ref() {
                b"t" => in_text = true,
                b"pPr" => in_paragraph_props = true,
                b"sectPr" if in_paragraph_props => pending_break = true,
                _ => {}
            },
            Ok(Event::Empty(element)) => {
                if is_page_break(&element) {
                    pending_break = true;
                } else if element.local_name().as_ref() == b"tab" {
                    current.push(' ');
                }
            }
            Ok(Event::Text(text)) if in_text => {
                let unescaped = text
                    .unescape()
                    .map_err(|error| IngestError::word(error.to_string()))?;
                if pending_break && !unescaped.trim().is_empty() {
                    sections.push(std::mem::take(&mut current));
                    pending_break = false;
                }
                current.push_str(&unescaped);
            }
            Ok(Event::End(element)) => match element.local_name().as_ref() {
                b"t" => in_text = false,
                b"pPr" => in_paragraph_props = false,
                b"p" => current.push('\n'),
                _ => {}
            },
            Ok(Event::Eof) => break,
            Err(error) => return Err(IngestError::word(error.to_string())),
            _ => {}
        }
        buf.clear();
    }
    sections.push(current);

    Ok(sections
        .into_iter()
        .enumerate()
        .map(|(index, text)| PageText {
            number: (index + 1) as u32,
            text,
        })
        .collect())
}

pub fn normalize_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

pub fn clean_text(raw: &str, kind: FileKind) -> String {
    let collapsed = normalize_whitespace(raw);
    match kind {
        FileKind::Pdf => PDF_LIGATURES
            .iter()
            .fold(collapsed, |text, (glyph, plain)| text.replace(*glyph, plain)),
        FileKind::Word => collapsed,
    }
}

pub fn retain_page(cleaned: &str, kind: FileKind) -> bool {
    if cleaned.chars().count() < MIN_PAGE_CHARS {
        return false;
    }
    match kind {
        FileKind::Pdf => !PDF_EXCLUDED_MARKERS
            .iter()
            .any(|marker| cleaned.contains(marker)),
        FileKind::Word => true,
    }
}

pub fn extractor_for(kind: FileKind) -> Box<dyn DocumentExtractor + Send + Sync> {
    match kind {
        FileKind::Pdf => Box::new(LopdfExtractor),
        FileKind::Word => Box::new(DocxExtractor),
    }
}

/// Cleans and filters raw page texts. Retained pages keep their physical
/// 1-based numbers.
pub fn filter_pages(raw_pages: Vec<PageText>, kind: FileKind) -> ExtractedDocument {
    let total_pages = raw_pages.len() as u32;
    let pages = raw_pages
        .into_iter()
        .filter_map(|page| {
            let content = clean_text(&page.text, kind);
            if retain_page(&content, kind) {
                Some(Page {
                    page_number: page.number,
                    content,
                })
            } else {
                debug!(page = page.number, kind = kind.as_str(), "dropping page");
                None
            }
        })
        .collect();

    ExtractedDocument { total_pages, pages }
}

pub fn extract_document(path: &Path, kind: FileKind) -> Result<ExtractedDocument, IngestError> {
    let raw_pages = extractor_for(kind).extract_pages(path)?;
    Ok(filter_pages(raw_pages, kind))
}

pub fn extract(file_bytes: &[u8], file_extension: &str) -> Result<Vec<Page>, IngestError> {
    let kind = FileKind::from_extension(file_extension)?;
    let raw_pages = extractor_for(kind).extract_page_bytes(file_bytes)?;
    Ok(filter_pages(raw_pages, kind).pages)
}

#[cfg(test)]
pub(crate) mod fixtures {
    use lopdf::content::{Content, Operation};
    use lopdf::{dictionary, Document, Object, Stream};
    use std::io::Write;

    /// One PDF page per entry; empty entries become blank pages.
    pub fn pdf_with_pages(pages: &[&str]) -> Vec<u8> {
        let mut doc = Document::with_version("1.5");
        let pages_id = doc.new_object_id();
        let font_id = doc.add_object(dictionary! {
            "Type" => "Font",
            "Subtype" => "Type1",
            "BaseFont" => "Courier",
        });
        let resources_id = doc.add_object(dictionary! {
            "Font" => dictionary! {
                "F1" => font_id,
            },
        });

        let mut kids: Vec<Object> = Vec::new();
        for text in pages {
            let operations = if text.is_empty() {
                Vec::new()
            } else {
                vec![
                    Operation::new("BT", vec![]),
                    Operation::new("Tf", vec!["F1".into(), 10.into()]),
                    Operation::new("Td", vec![50.into(), 700.into()]),
                    Operation::new("Tj", vec![Object::string_literal(*text)]),
                    Operation::new("ET", vec![]),
                ]
            };
            let content = Content { operations };
            let content_id = doc.add_object(Stream::new(
                dictionary! {},
                content.encode().expect("content encodes"),
            ));
            let page_id = doc.add_object(dictionary! {
                "Type" => "Page",
                "Parent" => pages_id,
                "Contents" => content_id,
                "Resources" => resources_id,
            });
            kids.push(page_id.into());
        }

        let count = kids.len() as i64;
        doc.objects.insert(
            pages_id,
            Object::Dictionary(dictionary! {
                "Type" => "Pages",
                "Kids" => kids,
                "Count" => count,
                "MediaBox" => vec![0.into(), 0.into(), 595.into(), 842.into()],
            }),
        );
        let catalog_id = doc.add_object(dictionary! {
            "Type" => "Catalog",
            "Pages" => pages_id,
        });
        doc.trailer.set("Root", catalog_id);

        let mut buf = Vec::new();
        doc.save_to(&mut buf).expect("pdf saves");
        buf
    }

    /// Minimal docx whose body is `body_xml` (WordprocessingML inside `<w:body>`).
    pub fn docx_with_body(body_xml: &str) -> Vec<u8> {
        let mut buf = Vec::new();
        {
            let mut zip = zip::ZipWriter::new(std::io::Cursor::new(&mut buf));
            zip.start_file("word/document.xml", zip::write::SimpleFileOptions::default())
                .expect("zip entry starts");
            let xml = format!(
                "<?xml version=\"1.0\"?><w:document xmlns:w=\"http://schemas.openxmlformats.org/wordprocessingml/2006/main\"><w:body>{body_xml}</w:body></w:document>"
            );
            zip.write_all(xml.as_bytes()).expect("zip entry writes");
            zip.finish().expect("zip finishes");
        }
        buf
    }

    pub fn paragraph(text: &str) -> String {
        format!("<w:p><w:r><w:t xml:space=\"preserve\">{text}</w:t></w:r></w:p>")
    }

    pub fn page_break() -> &'static str {
        "<w:p><w:r><w:br w:type=\"page\"/></w:r></w:p>"
    }
}

#[cfg(test)]
mod tests {
    use super::fixtures::{docx_with_body, page_break, paragraph, pdf_with_pages};
    use super::*;

    const LONG: &str = "Non-emergency medical transportation services shall be provided statewide.";

    #[test]
    fn extension_dispatch_rejects_unknown_types() {
        assert_eq!(FileKind::from_extension(".PDF").ok(), Some(FileKind::Pdf));
        assert_eq!(FileKind::from_extension("docx").ok(), Some(FileKind::Word));
        assert_eq!(FileKind::from_extension(".doc").ok(), Some(FileKind::Word));
        assert!(matches!(
            FileKind::from_extension(".csv"),
            Err(IngestError::UnsupportedFileType(ext)) if ext == ".csv"
        ));
        assert_eq!(file_extension("Montana-RFP.PDF"), ".pdf");
        assert_eq!(file_extension("README"), "");
    }

    #[test]
    fn cleaning_collapses_whitespace_and_fixes_pdf_ligatures() {
        let raw = "  The \u{FB01}rst   \t\n \u{FB02}oor \u{a0} plan ";
        assert_eq!(clean_text(raw, FileKind::Pdf), "The first floor plan");
        assert_eq!(clean_text(raw, FileKind::Word), "The \u{FB01}rst \u{FB02}oor plan");
    }

    #[test]
    fn short_and_boilerplate_pdf_pages_are_dropped() {
        let raw_pages = vec![
            PageText { number: 1, text: LONG.to_string() },
            PageText { number: 2, text: "   too short   ".to_string() },
            PageText { number: 3, text: format!("SHIP TO: warehouse 4. {LONG}") },
            PageText { number: 4, text: format!("INVOICE TO accounts payable. {LONG}") },
            PageText { number: 5, text: format!("{LONG}\n\n{LONG}") },
        ];

        let extracted = filter_pages(raw_pages, FileKind::Pdf);

        assert_eq!(extracted.total_pages, 5);
        let numbers: Vec<u32> = extracted.pages.iter().map(|page| page.page_number).collect();
        assert_eq!(numbers, vec![1, 5]);
    }

    #[test]
    fn word_pages_ignore_pdf_markers() {
        let raw_pages = vec![PageText {
            number: 1,
            text: format!("SHIP TO {LONG}"),
        }];
        assert_eq!(filter_pages(raw_pages, FileKind::Word).pages.len(), 1);
    }

    #[test]
    fn pdf_pages_are_extracted_with_physical_numbers() -> Result<(), IngestError> {
        let content = "A".repeat(10) + " " + LONG;
        let bytes = pdf_with_pages(&[&content, "", &content]);

        let pages = extract(&bytes, ".pdf")?;

        assert_eq!(pages.len(), 2);
        assert_eq!(pages[0].page_number, 1);
        assert_eq!(pages[1].page_number, 3);
        assert!(pages[0].content.contains("statewide"));
        Ok(())
    }

    #[test]
    fn unreadable_pdf_is_an_extraction_error() {
        let error = extract(b"%PDF-1.4\n%broken", ".pdf").unwrap_err();
        assert!(matches!(error, IngestError::Extraction { kind: "pdf", .. }));
    }

    #[test]
    fn word_sections_split_on_page_breaks() -> Result<(), IngestError> {
        let body = format!(
            "{}{}{}{}",
            paragraph(LONG),
            page_break(),
            paragraph("Section two"),
            paragraph(LONG)
        );
        let sections = DocxExtractor.extract_page_bytes(&docx_with_body(&body))?;

        assert_eq!(sections.len(), 2);
        assert_eq!(sections[0].number, 1);
        assert!(sections[0].text.contains("statewide"));
        assert!(sections[1].text.starts_with("Section two"));
        Ok(())
    }

    #[test]
    fn stacked_word_breaks_count_once() -> Result<(), IngestError> {
        let body = format!(
            "{}{}<w:p><w:r><w:lastRenderedPageBreak/><w:t>{}</w:t></w:r></w:p>",
            paragraph(LONG),
            page_break(),
            LONG
        );
        let sections = DocxExtractor.extract_page_bytes(&docx_with_body(&body))?;
        assert_eq!(sections.len(), 2);
        Ok(())
    }

    #[test]
    fn word_runs_are_not_glued_together() -> Result<(), IngestError> {
        let body = "<w:p><w:r><w:t>Scope</w:t></w:r><w:r><w:t xml:space=\"preserve\"> of</w:t></w:r><w:r><w:tab/><w:t>work</w:t></w:r></w:p>";
        let sections = DocxExtractor.extract_page_bytes(&docx_with_body(body))?;
        assert_eq!(clean_text(&sections[0].text, FileKind::Word), "Scope of work");
        Ok(())
    }

    #[test]
    fn non_zip_word_file_is_an_extraction_error() {
        let error = extract(b"\xD0\xCF\x11\xE0 legacy doc", ".doc").unwrap_err();
        assert!(matches!(error, IngestError::Extraction { kind: "word", .. }));
    }
}
