//! Boundary-aware document chunking.
//!
//! Trust documents are long and heavily sectioned (articles, numbered
//! provisions, legal boilerplate). The chunker prefers those section
//! boundaries; when a document has no recognizable structure it falls back
//! to page accumulation with a sentence-aligned overlap tail between
//! consecutive chunks.

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::{floor_char_boundary, short_hash, PageText};

// ============================================================================
// Chunk types
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChunkKind {
    /// Closed at a section boundary.
    Semantic,
    /// Closed by page accumulation against the size budget.
    Page,
    /// Produced by splitting an oversized chunk in the post-pass.
    Overflow,
}

/// A bounded slice of document text with provenance.
///
/// Invariant: `start_page <= min(pages) <= max(pages) <= end_page`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DocumentChunk {
    pub chunk_id: String,
    pub text: String,
    pub pages: Vec<usize>,
    pub start_page: usize,
    pub end_page: usize,
    pub start_char: usize,
    pub end_char: usize,
    pub chunk_type: ChunkKind,
    pub section_headers: Vec<String>,
    /// Read-only digest of the preceding chunk, attached after all chunks
    /// are finalized. Never ownership of the neighbor.
    pub context_before: String,
    pub context_after: String,
}

// ============================================================================
// Configuration
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChunkerConfig {
    /// Maximum characters per chunk.
    pub max_chunk_size: usize,
    /// Characters carried over between consecutive page-mode chunks.
    pub overlap_size: usize,
    /// Chunks below this are merged into their predecessor in the post-pass.
    pub min_chunk_size: usize,
    /// Pages scanned when deciding between section and page chunking.
    pub structure_scan_pages: usize,
    /// Minimum section-marker hits to enable section-aware chunking.
    pub min_section_markers: usize,
}

impl Default for ChunkerConfig {
    fn default() -> Self {
        Self {
            max_chunk_size: 15_000,
            overlap_size: 500,
            min_chunk_size: 1_000,
            structure_scan_pages: 10,
            min_section_markers: 3,
        }
    }
}

// ============================================================================
// Chunker
// ============================================================================

/// Section-boundary taxonomy for trust documents.
///
/// Anchored per line; the joined regex runs in multiline + case-insensitive
/// mode.
const SECTION_PATTERNS: &[&str] = &[
    // Articles and sections
    r"^ARTICLE\s+[IVX0-9]+[\.:]\s*.+",
    r"^SECTION\s+[0-9]+[\.:]\s*.+",
    // Numbered sections: "1. TRUST PROVISIONS", "1.1 Definitions", "A. TRUSTEE POWERS"
    r"^\d+\.\s+[A-Z][A-Z\s]+",
    r"^\d+\.\d+\s+[A-Z][a-z]+",
    r"^[A-Z]\.\s+[A-Z][A-Z\s]+",
    // Legal document markers
    r"^WHEREAS\b",
    r"^NOW,?\s+THEREFORE\b",
    r"^WITNESSETH\b",
    r"^RECITALS?\b",
    // Trust-specific sections
    r"^TRUST(?:EE)?\s+(?:POWERS?|PROVISIONS?|TERMS?)\b",
    r"^DISTRIBUTIONS?\b",
    r"^BENEFICIAR(?:Y|IES)\b",
    r"^(?:SUCCESSOR\s+)?TRUSTEE\b",
    r"^TERMINATION\b",
    r"^TAX\s+(?:PROVISIONS?|MATTERS?)\b",
    // Other structural markers
    r"^(?:SCHEDULE|EXHIBIT|APPENDIX)\s+[A-Z0-9]",
    r"^IN\s+WITNESS\s+WHEREOF\b",
];

/// Boundary-aware chunker. Build once, reuse across documents.
pub struct SmartChunker {
    config: ChunkerConfig,
    section_regex: Regex,
    paragraph_regex: Regex,
    sentence_regex: Regex,
}

impl SmartChunker {
    pub fn new(config: ChunkerConfig) -> Self {
        // The taxonomy is a compile-time constant; a malformed pattern is a
        // programming error, not an input condition.
        let section_regex = Regex::new(&format!("(?im){}", SECTION_PATTERNS.join("|")))
            .expect("section pattern taxonomy must compile");
        let paragraph_regex = Regex::new(r"\n\n+").expect("paragraph pattern must compile");
        let sentence_regex = Regex::new(r"[.!?]\s+").expect("sentence pattern must compile");
        Self {
            config,
            section_regex,
            paragraph_regex,
            sentence_regex,
        }
    }

    pub fn config(&self) -> &ChunkerConfig {
        &self.config
    }

    /// Chunk a document. Empty input yields an empty list; text that defies
    /// section analysis silently degrades to page accumulation.
    pub fn chunk_document(&self, pages: &[PageText]) -> Vec<DocumentChunk> {
        if pages.is_empty() {
            return Vec::new();
        }

        let has_sections = self.detect_sections(pages);
        let mut chunks = if has_sections {
            self.chunk_by_sections(pages)
        } else {
            self.chunk_by_pages(pages)
        };

        chunks = self.post_validate(chunks);
        self.attach_context_windows(&mut chunks);

        tracing::debug!(
            chunks = chunks.len(),
            section_mode = has_sections,
            "chunked document"
        );
        chunks
    }

    /// Scan the first few pages for section markers.
    fn detect_sections(&self, pages: &[PageText]) -> bool {
        let scan_text = pages
            .iter()
            .take(self.config.structure_scan_pages)
            .map(|p| p.text.as_str())
            .collect::<Vec<_>>()
            .join("\n");
        self.section_regex.find_iter(&scan_text).count() >= self.config.min_section_markers
    }

    // ------------------------------------------------------------------
    // Section-aware chunking
    // ------------------------------------------------------------------

    fn chunk_by_sections(&self, pages: &[PageText]) -> Vec<DocumentChunk> {
        let mut chunks = Vec::new();
        let mut acc = ChunkAccumulator::new();
        let mut total_chars = 0usize;

        for page in pages {
            let page_text = page.text.as_str();
            let page_num = page.page_number;

            let boundaries: Vec<(usize, usize)> = self
                .section_regex
                .find_iter(page_text)
                .map(|m| (m.start(), m.end()))
                .collect();

            if boundaries.is_empty() {
                self.append_segment(
                    &mut chunks,
                    &mut acc,
                    page_num,
                    page_text,
                    total_chars,
                    None,
                );
            } else {
                // Text before the first boundary belongs to the running chunk.
                let head = &page_text[..boundaries[0].0];
                if !head.trim().is_empty() {
                    self.append_segment(&mut chunks, &mut acc, page_num, head, total_chars, None);
                }

                for (i, &(start, end)) in boundaries.iter().enumerate() {
                    // Close the running chunk at the boundary if it has
                    // enough substance to stand on its own.
                    if acc.text.len() > self.config.min_chunk_size {
                        chunks.push(acc.finish(ChunkKind::Semantic, self));
                        acc = ChunkAccumulator::new();
                    }

                    let header = page_text[start..end].trim().to_string();
                    let segment_end = boundaries
                        .get(i + 1)
                        .map(|&(next_start, _)| next_start)
                        .unwrap_or(page_text.len());
                    let segment = &page_text[start..segment_end];

                    self.append_segment(
                        &mut chunks,
                        &mut acc,
                        page_num,
                        segment,
                        total_chars + start,
                        Some(header),
                    );
                }
            }

            total_chars += page_text.len();
        }

        if !acc.text.trim().is_empty() {
            chunks.push(acc.finish(ChunkKind::Semantic, self));
        }
        chunks
    }

    /// Append page/segment text to the accumulator, closing the running
    /// chunk first when the size budget would be exceeded.
    fn append_segment(
        &self,
        chunks: &mut Vec<DocumentChunk>,
        acc: &mut ChunkAccumulator,
        page_num: usize,
        segment: &str,
        start_char: usize,
        header: Option<String>,
    ) {
        if !acc.text.is_empty() && acc.text.len() + segment.len() > self.config.max_chunk_size {
            chunks.push(std::mem::replace(acc, ChunkAccumulator::new()).finish(
                ChunkKind::Semantic,
                self,
            ));
        }
        acc.push_page_text(page_num, segment, start_char);
        if let Some(h) = header {
            acc.headers.push(h);
        }
    }

    // ------------------------------------------------------------------
    // Page-accumulation fallback
    // ------------------------------------------------------------------

    fn chunk_by_pages(&self, pages: &[PageText]) -> Vec<DocumentChunk> {
        let mut chunks = Vec::new();
        let mut acc = ChunkAccumulator::new();
        let mut total_chars = 0usize;

        for page in pages {
            let page_text = page.text.as_str();
            let page_num = page.page_number;

            if acc.text.is_empty() || acc.text.len() + page_text.len() <= self.config.max_chunk_size
            {
                acc.push_page_text(page_num, page_text, total_chars);
            } else {
                let closed = std::mem::replace(&mut acc, ChunkAccumulator::new())
                    .finish(ChunkKind::Page, self);
                // New chunk is seeded with an overlap tail so no clause is
                // lost across the cut.
                let overlap = self.overlap_tail(&closed.text);
                chunks.push(closed);
                acc.text = overlap;
                acc.push_page_text(page_num, page_text, total_chars);
            }

            total_chars += page_text.len();
        }

        if !acc.text.trim().is_empty() {
            chunks.push(acc.finish(ChunkKind::Page, self));
        }
        chunks
    }

    /// Tail of `text` used to seed the next chunk: trimmed to the nearest
    /// sentence start within the overlap window, then paragraph start, then
    /// a hard character cut.
    fn overlap_tail(&self, text: &str) -> String {
        if text.len() <= self.config.overlap_size {
            return text.to_string();
        }

        let overlap_start = floor_char_boundary(text, text.len() - self.config.overlap_size);

        if let Some(m) = self.sentence_regex.find_at(text, overlap_start) {
            return format!("{}\n", text[m.end()..].trim());
        }
        if let Some(m) = self.paragraph_regex.find_at(text, overlap_start) {
            return format!("{}\n", text[m.end()..].trim());
        }
        format!("{}\n", text[overlap_start..].trim())
    }

    // ------------------------------------------------------------------
    // Post-pass: merge undersized, split oversized
    // ------------------------------------------------------------------

    fn post_validate(&self, chunks: Vec<DocumentChunk>) -> Vec<DocumentChunk> {
        let merge_budget = (self.config.max_chunk_size as f64 * 1.2) as usize;
        let split_threshold = (self.config.max_chunk_size as f64 * 1.5) as usize;

        let mut validated: Vec<DocumentChunk> = Vec::with_capacity(chunks.len());
        for chunk in chunks {
            if chunk.text.len() < self.config.min_chunk_size {
                if let Some(prev) = validated.last_mut() {
                    if prev.text.len() + chunk.text.len() <= merge_budget {
                        prev.text.push('\n');
                        prev.text.push_str(&chunk.text);
                        for p in &chunk.pages {
                            if !prev.pages.contains(p) {
                                prev.pages.push(*p);
                            }
                        }
                        prev.end_page = prev.end_page.max(chunk.end_page);
                        prev.end_char = chunk.end_char;
                        prev.section_headers.extend(chunk.section_headers);
                        continue;
                    }
                }
            }

            if chunk.text.len() > split_threshold {
                validated.extend(self.split_large_chunk(chunk));
            } else {
                validated.push(chunk);
            }
        }
        validated
    }

    fn split_large_chunk(&self, chunk: DocumentChunk) -> Vec<DocumentChunk> {
        let mut sub_chunks = Vec::new();
        let mut current = String::new();
        let mut cursor = chunk.start_char;

        let paragraphs: Vec<&str> = self.paragraph_regex.split(&chunk.text).collect();
        for para in paragraphs {
            if !current.is_empty() && current.len() + para.len() > self.config.max_chunk_size {
                let sub = self.make_chunk(
                    std::mem::take(&mut current),
                    chunk.pages.clone(),
                    chunk.start_page,
                    cursor,
                    ChunkKind::Overflow,
                    chunk.section_headers.clone(),
                );
                cursor = sub.end_char;
                sub_chunks.push(sub);
            }
            current.push_str(para);
            current.push_str("\n\n");
        }

        if !current.trim().is_empty() {
            sub_chunks.push(self.make_chunk(
                current,
                chunk.pages.clone(),
                chunk.start_page,
                cursor,
                ChunkKind::Overflow,
                chunk.section_headers.clone(),
            ));
        }

        if sub_chunks.is_empty() {
            vec![chunk]
        } else {
            sub_chunks
        }
    }

    // ------------------------------------------------------------------
    // Context digests
    // ------------------------------------------------------------------

    fn attach_context_windows(&self, chunks: &mut [DocumentChunk]) {
        let digests: Vec<String> = chunks.iter().map(|c| self.digest_chunk(c)).collect();
        for i in 0..chunks.len() {
            if i > 0 {
                chunks[i].context_before = digests[i - 1].clone();
            }
            if i + 1 < chunks.len() {
                chunks[i].context_after = digests[i + 1].clone();
            }
        }
    }

    /// Short digest of a chunk: headers, page range, first substantial
    /// sentence. Used only as generation context for neighbors.
    fn digest_chunk(&self, chunk: &DocumentChunk) -> String {
        let mut parts = Vec::new();

        if !chunk.section_headers.is_empty() {
            let heads: Vec<&str> = chunk
                .section_headers
                .iter()
                .take(3)
                .map(|s| s.as_str())
                .collect();
            parts.push(format!("Sections: {}", heads.join(", ")));
        }

        parts.push(format!("Pages {}-{}", chunk.start_page, chunk.end_page));

        for sent in self.sentence_regex.split(&chunk.text).take(5) {
            let sent = sent.trim();
            if sent.len() > 20 && !sent.starts_with("[Page") {
                let cut = floor_char_boundary(sent, 100);
                parts.push(sent[..cut].to_string());
                break;
            }
        }

        parts.join(" | ")
    }

    fn make_chunk(
        &self,
        text: String,
        pages: Vec<usize>,
        start_page: usize,
        start_char: usize,
        chunk_type: ChunkKind,
        section_headers: Vec<String>,
    ) -> DocumentChunk {
        let trimmed = text.trim().to_string();
        let head = &trimmed[..floor_char_boundary(&trimmed, 100)];
        let chunk_id = short_hash(&[head, &start_page.to_string()]);
        let end_page = pages.last().copied().unwrap_or(start_page);
        let end_char = start_char + trimmed.len();

        DocumentChunk {
            chunk_id,
            text: trimmed,
            pages,
            start_page,
            end_page,
            start_char,
            end_char,
            chunk_type,
            section_headers,
            context_before: String::new(),
            context_after: String::new(),
        }
    }
}

impl Default for SmartChunker {
    fn default() -> Self {
        Self::new(ChunkerConfig::default())
    }
}

/// Running state for the chunk being built.
struct ChunkAccumulator {
    text: String,
    pages: Vec<usize>,
    headers: Vec<String>,
    start_page: Option<usize>,
    start_char: Option<usize>,
}

impl ChunkAccumulator {
    fn new() -> Self {
        Self {
            text: String::new(),
            pages: Vec::new(),
            headers: Vec::new(),
            start_page: None,
            start_char: None,
        }
    }

    fn push_page_text(&mut self, page_num: usize, segment: &str, start_char: usize) {
        if self.start_page.is_none() {
            self.start_page = Some(page_num);
            self.start_char = Some(start_char);
        }
        if !self.pages.contains(&page_num) {
            self.pages.push(page_num);
            self.text.push_str(&format!("\n[Page {page_num}]\n"));
        }
        self.text.push_str(segment);
        self.text.push('\n');
    }

    fn finish(self, kind: ChunkKind, chunker: &SmartChunker) -> DocumentChunk {
        let start_page = self.start_page.unwrap_or(1);
        chunker.make_chunk(
            self.text,
            self.pages,
            start_page,
            self.start_char.unwrap_or(0),
            kind,
            self.headers,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn pages_of(texts: &[&str]) -> Vec<PageText> {
        texts
            .iter()
            .enumerate()
            .map(|(i, t)| PageText::new(i + 1, *t))
            .collect()
    }

    #[test]
    fn empty_input_yields_no_chunks() {
        let chunker = SmartChunker::default();
        assert!(chunker.chunk_document(&[]).is_empty());
    }

    #[test]
    fn small_document_yields_single_chunk_covering_all_pages() {
        let chunker = SmartChunker::default();
        let pages = pages_of(&["First page text.", "Second page text.", "Third page text."]);
        let chunks = chunker.chunk_document(&pages);
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].pages, vec![1, 2, 3]);
        assert_eq!(chunks[0].start_page, 1);
        assert_eq!(chunks[0].end_page, 3);
    }

    #[test]
    fn page_markers_are_embedded_in_chunk_text() {
        let chunker = SmartChunker::default();
        let pages = pages_of(&["alpha", "beta"]);
        let chunks = chunker.chunk_document(&pages);
        assert!(chunks[0].text.contains("[Page 1]"));
        assert!(chunks[0].text.contains("[Page 2]"));
    }

    #[test]
    fn section_mode_detects_article_headers() {
        let chunker = SmartChunker::default();
        let body = "x".repeat(1200);
        let pages = pages_of(&[
            &format!("ARTICLE I. Trust Estate\n{body}"),
            &format!("ARTICLE II. Trustee Powers\n{body}"),
            &format!("ARTICLE III. Distributions\n{body}"),
        ]);
        assert!(chunker.detect_sections(&pages));
        let chunks = chunker.chunk_document(&pages);
        assert!(chunks.len() >= 2, "expected a chunk per article");
        let headers: Vec<&String> = chunks.iter().flat_map(|c| &c.section_headers).collect();
        assert!(headers.iter().any(|h| h.starts_with("ARTICLE I")));
        assert!(headers.iter().any(|h| h.starts_with("ARTICLE III")));
    }

    #[test]
    fn large_unstructured_document_produces_bounded_chunks() {
        let config = ChunkerConfig::default();
        let chunker = SmartChunker::new(config.clone());

        // 60k characters of prose across 12 pages, no section markers.
        let sentence = "the quick brown fox jumps over the lazy dog. ";
        let page_text = sentence.repeat(110); // ~5,000 chars
        let texts: Vec<String> = (0..12).map(|_| page_text.clone()).collect();
        let pages: Vec<PageText> = texts
            .iter()
            .enumerate()
            .map(|(i, t)| PageText::new(i + 1, t.clone()))
            .collect();

        let chunks = chunker.chunk_document(&pages);
        assert!(chunks.len() > 1, "60k chars must produce multiple chunks");

        let limit = (config.max_chunk_size as f64 * 1.5) as usize;
        for c in &chunks {
            assert!(c.text.len() <= limit, "chunk exceeds 1.5x budget: {}", c.text.len());
        }

        // Every page is covered by some chunk, in order.
        let mut covered: Vec<usize> = chunks.iter().flat_map(|c| c.pages.clone()).collect();
        covered.dedup();
        assert_eq!(covered, (1..=12).collect::<Vec<_>>());
    }

    #[test]
    fn page_mode_chunks_carry_overlap() {
        let chunker = SmartChunker::default();
        let sentence = "income shall be distributed to the beneficiary annually. ";
        let page_text = sentence.repeat(200); // ~11,600 chars per page
        let texts: Vec<String> = (0..3).map(|_| page_text.clone()).collect();
        let pages: Vec<PageText> = texts
            .iter()
            .enumerate()
            .map(|(i, t)| PageText::new(i + 1, t.clone()))
            .collect();

        let chunks = chunker.chunk_document(&pages);
        assert!(chunks.len() >= 2);
        // The second chunk should begin with tail text from the first,
        // before its own [Page N] marker.
        let second = &chunks[1];
        let marker_pos = second.text.find("[Page").unwrap_or(0);
        assert!(marker_pos > 0, "expected overlap text before the page marker");
    }

    #[test]
    fn undersized_trailing_chunk_is_merged() {
        let chunker = SmartChunker::default();
        let body = "word ".repeat(2_900); // ~14,500 chars
        let pages = pages_of(&[&body, "tiny tail"]);
        let chunks = chunker.chunk_document(&pages);
        assert_eq!(chunks.len(), 1);
        assert!(chunks[0].text.contains("tiny tail"));
        assert_eq!(chunks[0].end_page, 2);
    }

    #[test]
    fn context_windows_reference_neighbors() {
        let chunker = SmartChunker::default();
        let page_text = "This trust agreement establishes important provisions. ".repeat(260);
        let texts: Vec<String> = (0..4).map(|_| page_text.clone()).collect();
        let pages: Vec<PageText> = texts
            .iter()
            .enumerate()
            .map(|(i, t)| PageText::new(i + 1, t.clone()))
            .collect();

        let chunks = chunker.chunk_document(&pages);
        assert!(chunks.len() >= 2);
        assert!(chunks[0].context_before.is_empty());
        assert!(!chunks[0].context_after.is_empty());
        assert!(!chunks[chunks.len() - 1].context_before.is_empty());
        assert!(chunks[chunks.len() - 1].context_after.is_empty());
    }

    #[test]
    fn overlap_tail_prefers_sentence_starts() {
        let chunker = SmartChunker::default();
        let text = format!("{}First sentence ends here. Tail sentence follows.", "x".repeat(600));
        let tail = chunker.overlap_tail(&text);
        assert!(tail.starts_with("Tail sentence"));
    }

    proptest! {
        /// Chunk page coverage: every input page number appears in some
        /// chunk's page set, regardless of page sizes.
        #[test]
        fn all_pages_covered(sizes in proptest::collection::vec(0usize..4_000, 1..12)) {
            let chunker = SmartChunker::default();
            let pages: Vec<PageText> = sizes
                .iter()
                .enumerate()
                .map(|(i, n)| PageText::new(i + 1, "provision text. ".repeat(*n / 16 + 1)))
                .collect();
            let chunks = chunker.chunk_document(&pages);
            let covered: std::collections::BTreeSet<usize> =
                chunks.iter().flat_map(|c| c.pages.clone()).collect();
            for p in 1..=sizes.len() {
                prop_assert!(covered.contains(&p), "page {} not covered", p);
            }
        }

        /// Page-range invariant holds for every produced chunk.
        #[test]
        fn page_range_invariant(sizes in proptest::collection::vec(100usize..3_000, 1..10)) {
            let chunker = SmartChunker::default();
            let pages: Vec<PageText> = sizes
                .iter()
                .enumerate()
                .map(|(i, n)| PageText::new(i + 1, "trustee shall act. ".repeat(*n / 19 + 1)))
                .collect();
            for c in chunker.chunk_document(&pages) {
                let min = c.pages.iter().min().copied().unwrap_or(c.start_page);
                let max = c.pages.iter().max().copied().unwrap_or(c.end_page);
                prop_assert!(c.start_page <= min);
                prop_assert!(min <= max);
                prop_assert!(max <= c.end_page);
            }
        }
    }
}
