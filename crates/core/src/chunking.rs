use crate::error::IngestError;
use crate::extractor::FileKind;
use crate::models::{Chunk, ChunkMetadata, DocumentMetadata, DocumentPage, Page};

/// Separators tried in order, coarsest first. The empty separator splits
/// into single characters.
pub const DEFAULT_SEPARATORS: [&str; 4] = ["\n\n", "\n", " ", ""];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkingConfig {
    pub chunk_size: usize,
    pub chunk_overlap: usize,
}

impl ChunkingConfig {
    pub fn new(chunk_size: usize, chunk_overlap: usize) -> Result<Self, IngestError> {
        if chunk_size == 0 {
            return Err(IngestError::InvalidChunkConfig(
                "chunk_size must be positive".to_string(),
            ));
        }
        if chunk_overlap >= chunk_size {
            return Err(IngestError::InvalidChunkConfig(format!(
                "chunk_overlap {chunk_overlap} must be smaller than chunk_size {chunk_size}"
            )));
        }
        Ok(Self {
            chunk_size,
            chunk_overlap,
        })
    }

    pub fn pdf_default() -> Self {
        Self {
            chunk_size: 250,
            chunk_overlap: 25,
        }
    }

    pub fn word_default() -> Self {
        Self {
            chunk_size: 1_000,
            chunk_overlap: 100,
        }
    }
}

/// Per-file-kind chunking profiles.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkingProfiles {
    pub pdf: ChunkingConfig,
    pub word: ChunkingConfig,
}

impl Default for ChunkingProfiles {
    fn default() -> Self {
        Self {
            pdf: ChunkingConfig::pdf_default(),
            word: ChunkingConfig::word_default(),
        }
    }
}

impl ChunkingProfiles {
    pub fn for_kind(&self, kind: FileKind) -> ChunkingConfig {
        match kind {
            FileKind::Pdf => self.pdf,
            FileKind::Word => self.word,
        }
    }
}

fn char_len(text: &str) -> usize {
    text.chars().count()
}

/// Recursive character splitter. Sizes are measured in characters. Each
/// separator is kept at the start of the piece that follows it, and merged
/// chunks are trimmed.
#[derive(Debug, Clone)]
pub struct RecursiveSplitter {
    config: ChunkingConfig,
    separators: Vec<String>,
}

impl RecursiveSplitter {
    pub fn new(config: ChunkingConfig) -> Self {
        Self {
            config,
            separators: DEFAULT_SEPARATORS.iter().map(|s| s.to_string()).collect(),
        }
    }

    pub fn config(&self) -> ChunkingConfig {
        self.config
    }

    pub fn split_text(&self, text: &str) -> Vec<String> {
        self.split_recursive(text, &self.separators)
    }

    fn split_recursive(&self, text: &str, separators: &[String]) -> Vec<String> {
        let mut separator = separators.last().map(String::as_str).unwrap_or("");
        let mut finer: &[String] = &[];
        for (position, candidate) in separators.iter().enumerate() {
            if candidate.is_empty() {
                separator = "";
                break;
            }
            if text.contains(candidate.as_str()) {
                separator = candidate;
                finer = &separators[position + 1..];
                break;
            }
        }

        let pieces = split_keeping_separator(text, separator);
        let mut chunks = Vec::new();
        let mut fitting: Vec<&str> = Vec::new();

        for piece in pieces {
            if char_len(piece) < self.config.chunk_size {
                fitting.push(piece);
                continue;
            }
            if !fitting.is_empty() {
                chunks.extend(self.merge(&fitting));
                fitting.clear();
            }
            if finer.is_empty() {
                chunks.push(piece.to_string());
            } else {
                chunks.extend(self.split_recursive(piece, finer));
            }
        }
        if !fitting.is_empty() {
            chunks.extend(self.merge(&fitting));
        }

        chunks
    }

    /// Greedily packs pieces up to `chunk_size`, carrying a tail of at most
    /// `chunk_overlap` characters into the next chunk.
    fn merge(&self, pieces: &[&str]) -> Vec<String> {
        let ChunkingConfig {
            chunk_size,
            chunk_overlap,
        } = self.config;
        let mut chunks = Vec::new();
        let mut window: std::collections::VecDeque<(&str, usize)> = Default::default();
        let mut total = 0usize;

        for piece in pieces {
            let len = char_len(piece);
            if total + len > chunk_size && !window.is_empty() {
                push_joined(&mut chunks, &window);
                while total > chunk_overlap || (total + len > chunk_size && total > 0) {
                    match window.pop_front() {
                        Some((_, front_len)) => total -= front_len,
                        None => break,
                    }
                }
            }
            window.push_back((piece, len));
            total += len;
        }
        push_joined(&mut chunks, &window);

        chunks
    }
}

fn push_joined(chunks: &mut Vec<String>, window: &std::collections::VecDeque<(&str, usize)>) {
    let joined: String = window.iter().map(|(piece, _)| *piece).collect();
    let trimmed = joined.trim();
    if !trimmed.is_empty() {
        chunks.push(trimmed.to_string());
    }
}

/// Splits on `separator`, attaching each separator to the following piece.
/// Empty pieces are dropped.
fn split_keeping_separator<'a>(text: &'a str, separator: &str) -> Vec<&'a str> {
    if separator.is_empty() {
        return text
            .char_indices()
            .map(|(start, ch)| &text[start..start + ch.len_utf8()])
            .collect();
    }

    let mut pieces = Vec::new();
    let mut start = 0;
    for (position, _) in text.match_indices(separator) {
        if position > start {
            pieces.push(&text[start..position]);
        }
        start = position;
    }
    pieces.push(&text[start..]);
    pieces.retain(|piece| !piece.is_empty());
    pieces
}

/// Splits one page and assigns document-wide indices starting at
/// `next_index`. Returns the chunks and the index after the last one.
pub fn split_page(
    document: &DocumentMetadata,
    page: &Page,
    kind: FileKind,
    splitter: &RecursiveSplitter,
    next_index: u64,
) -> (Vec<Chunk>, u64) {
    let config = splitter.config();
    let char_count = page.char_count();
    let mut cursor = next_index;
    let mut chunks = Vec::new();

    for content in splitter.split_text(&page.content) {
        chunks.push(Chunk {
            chunk_id: Chunk::make_id(&document.document_id, cursor),
            chunk_index: cursor,
            page_number: page.page_number,
            content,
            metadata: ChunkMetadata {
                document_id: document.document_id.clone(),
                document_name: Some(document.document_name.clone()),
                location: Some(document.location.clone()),
                year: Some(document.year),
                doc_type: Some(document.doc_type.clone()),
                page: page.page_number,
                total_pages: document.total_pages,
                char_count,
                chunk_method: Some(chunk_method(kind).to_string()),
                chunk_size: config.chunk_size,
                chunk_overlap: config.chunk_overlap,
                chunk_index: cursor,
                extra: Default::default(),
            },
        });
        cursor = cursor.saturating_add(1);
    }

    (chunks, cursor)
}

/// Chunks every retained page in page order. Indices are dense across the
/// whole document and never reset per page.
pub fn build_document_pages(
    document: &DocumentMetadata,
    pages: Vec<Page>,
    kind: FileKind,
    config: ChunkingConfig,
) -> Vec<DocumentPage> {
    let splitter = RecursiveSplitter::new(config);
    let mut cursor = 0u64;
    let mut document_pages = Vec::with_capacity(pages.len());

    for page in pages {
        let (chunks, next_cursor) = split_page(document, &page, kind, &splitter, cursor);
        cursor = next_cursor;
        document_pages.push(DocumentPage { page, chunks });
    }

    document_pages
}

fn chunk_method(kind: FileKind) -> &'static str {
    match kind {
        FileKind::Pdf => "smart_pdf_processor",
        FileKind::Word => "smart_word_doc_processor",
    }
}
