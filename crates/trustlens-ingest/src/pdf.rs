//! PDF Extraction Boundary
//!
//! Extracts page-tagged text from PDF documents. The rest of the pipeline
//! only sees [`DocumentText`]; the actual extraction engine sits behind the
//! `pdf` feature so the core builds without native PDF dependencies.

use std::path::Path;

use crate::{DocumentText, PageText};

#[derive(Debug, thiserror::Error)]
pub enum PdfError {
    #[error("failed to read PDF: {0}")]
    Io(#[from] std::io::Error),
    #[error("PDF text extraction failed: {0}")]
    ExtractionFailed(String),
    #[error("PDF support not enabled (build with the `pdf` feature)")]
    FeatureDisabled,
}

/// PDF parser over `pdf-extract`.
pub struct PdfParser {
    min_page_chars: usize,
}

impl Default for PdfParser {
    fn default() -> Self {
        Self { min_page_chars: 0 }
    }
}

impl PdfParser {
    pub fn new() -> Self {
        Self::default()
    }

    /// Pages with fewer characters than this are kept but logged as
    /// suspect (likely a scanned page without a text layer).
    pub fn with_min_page_chars(mut self, n: usize) -> Self {
        self.min_page_chars = n;
        self
    }

    /// Parse a PDF file into page-tagged text.
    #[cfg(feature = "pdf")]
    pub fn parse_file(&self, path: &Path) -> Result<DocumentText, PdfError> {
        let bytes = std::fs::read(path)?;
        let text = pdf_extract::extract_text_from_mem(&bytes)
            .map_err(|e| PdfError::ExtractionFailed(e.to_string()))?;

        let document_id = path
            .file_stem()
            .map(|s| s.to_string_lossy().to_string())
            .unwrap_or_else(|| "doc".to_string());

        let pages = self.split_into_pages(&text);
        let mut doc = DocumentText::from_pages(document_id, pages);
        doc.source_path = path.to_string_lossy().to_string();
        doc.full_text = text;
        Ok(doc)
    }

    #[cfg(not(feature = "pdf"))]
    pub fn parse_file(&self, _path: &Path) -> Result<DocumentText, PdfError> {
        Err(PdfError::FeatureDisabled)
    }

    /// Split raw extracted text into pages on form feeds.
    ///
    /// `pdf-extract` emits `\x0c` between pages. An empty trailing page is
    /// dropped; empty interior pages are kept so page numbers stay
    /// contiguous with the source document.
    pub fn split_into_pages(&self, text: &str) -> Vec<PageText> {
        let mut pages: Vec<PageText> = text
            .split('\x0c')
            .enumerate()
            .map(|(i, t)| PageText::new(i + 1, t))
            .collect();

        if pages.len() > 1 {
            if let Some(last) = pages.last() {
                if last.text.trim().is_empty() {
                    pages.pop();
                }
            }
        }

        for page in &pages {
            if page.text.trim().len() < self.min_page_chars {
                tracing::warn!(
                    page = page.page_number,
                    chars = page.text.trim().len(),
                    "page has little or no text layer"
                );
            }
        }

        pages
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn splits_on_form_feed_and_drops_trailing_blank() {
        let parser = PdfParser::new();
        let pages = parser.split_into_pages("first page\x0csecond page\x0c");
        assert_eq!(pages.len(), 2);
        assert_eq!(pages[0].page_number, 1);
        assert_eq!(pages[1].page_number, 2);
        assert_eq!(pages[1].text, "second page");
    }

    #[test]
    fn keeps_empty_interior_pages() {
        let parser = PdfParser::new();
        let pages = parser.split_into_pages("one\x0c\x0cthree");
        assert_eq!(pages.len(), 3);
        assert!(pages[1].text.trim().is_empty());
        assert_eq!(pages[2].page_number, 3);
    }

    #[test]
    fn single_page_without_form_feed() {
        let parser = PdfParser::new();
        let pages = parser.split_into_pages("just one page");
        assert_eq!(pages.len(), 1);
        assert_eq!(pages[0].page_number, 1);
    }
}
