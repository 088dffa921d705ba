//! Document ingestion for Trustlens
//!
//! Turns trust-law documents into the units the rest of the pipeline
//! consumes:
//! - page-tagged text (from the PDF boundary or a cache),
//! - boundary-aware chunks for extraction and retrieval,
//! - typed facts with page/char provenance,
//! - concept categories with importance weights.
//!
//! **Untrusted boundary**: this crate is heavy parsing over OCR-quality
//! text. Nothing here calls the network; pattern tables are immutable
//! values built once at startup and passed by reference.

use serde::{Deserialize, Serialize};

pub mod categorizer;
pub mod chunker;
pub mod extraction;
pub mod pdf;

pub use categorizer::{CategorySummary, ConceptCategorizer, ConceptCategory};
pub use chunker::{ChunkKind, ChunkerConfig, DocumentChunk, SmartChunker};
pub use extraction::{Fact, FactExtractor, PatternError};
pub use pdf::{PdfError, PdfParser};

// ============================================================================
// Page model
// ============================================================================

/// One page of extracted document text.
///
/// `page_number` is 1-based and contiguous across a document; a page that
/// failed extraction still gets an entry with empty `text` so char-offset
/// accounting stays consistent.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PageText {
    pub page_number: usize,
    pub text: String,
}

impl PageText {
    pub fn new(page_number: usize, text: impl Into<String>) -> Self {
        Self {
            page_number,
            text: text.into(),
        }
    }
}

/// Extracted document: full text plus per-page breakdown.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DocumentText {
    pub source_path: String,
    pub document_id: String,
    pub full_text: String,
    pub pages: Vec<PageText>,
}

impl DocumentText {
    /// Build a document from raw page texts, deriving `full_text` by
    /// concatenation. Page numbers are renumbered 1..=n if the caller
    /// passed a hole-y sequence.
    pub fn from_pages(document_id: impl Into<String>, pages: Vec<PageText>) -> Self {
        let full_text = pages
            .iter()
            .map(|p| p.text.as_str())
            .collect::<Vec<_>>()
            .join("\n");
        let pages = pages
            .into_iter()
            .enumerate()
            .map(|(i, p)| PageText::new(i + 1, p.text))
            .collect();
        Self {
            source_path: String::new(),
            document_id: document_id.into(),
            full_text,
            pages,
        }
    }

    pub fn total_chars(&self) -> usize {
        self.pages.iter().map(|p| p.text.len()).sum()
    }
}

/// Serialize chunks as JSON for downstream tooling.
pub fn chunks_to_json(chunks: &[chunker::DocumentChunk]) -> serde_json::Result<String> {
    serde_json::to_string_pretty(chunks)
}

/// Clamp a byte offset down to the nearest char boundary.
///
/// Regex match offsets are always boundaries; this is for arithmetic
/// offsets (overlap tails, context windows) that may land inside a
/// multi-byte char in OCR output.
pub(crate) fn floor_char_boundary(text: &str, mut idx: usize) -> usize {
    if idx >= text.len() {
        return text.len();
    }
    while idx > 0 && !text.is_char_boundary(idx) {
        idx -= 1;
    }
    idx
}

/// Short stable hex id from content parts.
pub(crate) fn short_hash(parts: &[&str]) -> String {
    use sha2::{Digest, Sha256};
    let mut hasher = Sha256::new();
    for (i, p) in parts.iter().enumerate() {
        if i > 0 {
            hasher.update([0u8]);
        }
        hasher.update(p.as_bytes());
    }
    let digest = hasher.finalize();
    let mut out = String::with_capacity(16);
    for b in &digest[..8] {
        out.push_str(&format!("{b:02x}"));
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn from_pages_renumbers_contiguously() {
        let doc = DocumentText::from_pages(
            "doc",
            vec![PageText::new(3, "alpha"), PageText::new(9, "beta")],
        );
        let numbers: Vec<usize> = doc.pages.iter().map(|p| p.page_number).collect();
        assert_eq!(numbers, vec![1, 2]);
        assert_eq!(doc.full_text, "alpha\nbeta");
    }

    #[test]
    fn short_hash_is_stable_and_distinguishes_parts() {
        let a = short_hash(&["trust", "1"]);
        let b = short_hash(&["trust", "1"]);
        let c = short_hash(&["trus", "t1"]);
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_eq!(a.len(), 16);
    }

    #[test]
    fn floor_char_boundary_backs_up_to_boundary() {
        let s = "a\u{00e9}b"; // 'é' is two bytes
        assert_eq!(floor_char_boundary(s, 2), 1);
        assert_eq!(floor_char_boundary(s, 3), 3);
        assert_eq!(floor_char_boundary(s, 99), s.len());
    }
}
