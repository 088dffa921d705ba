//! Citation validation and repair.
//!
//! The terminal gate before an artifact is final. Every citation is
//! checked against the source pages: exact containment first, then fuzzy
//! re-localization on the claimed page, then a whole-document search for
//! the page the text actually lives on. `auto_correct` applies the
//! discovered repairs, removes orphaned citations, and fills dangling
//! references with typed placeholders so prose never points at nothing.

use std::collections::HashMap;

use trustlens_ingest::PageText;

use crate::fuzzy;
use crate::{
    Citation, CitationCheck, CitationCorrection, CitationValidationMeta, Summary, ValidationReport,
};

// ============================================================================
// Configuration
// ============================================================================

/// Fuzzy-match thresholds. The defaults are empirically chosen; they are
/// configuration, not constants, so they can be tuned against a labeled
/// validation set.
#[derive(Debug, Clone)]
pub struct ValidatorConfig {
    /// Minimum fuzzy score for a citation to count as verified.
    pub accept_threshold: f32,
    /// Score above which page scanning stops early.
    pub early_exit_threshold: f32,
    /// Minimum score for sentence-level citation text replacement.
    pub sentence_accept_threshold: f32,
}

impl Default for ValidatorConfig {
    fn default() -> Self {
        Self {
            accept_threshold: 80.0,
            early_exit_threshold: 95.0,
            sentence_accept_threshold: 70.0,
        }
    }
}

/// Citation types the validator itself assigns; these are never
/// re-corrected on later passes.
fn is_unrepairable_type(citation_type: &str) -> bool {
    citation_type == "placeholder" || citation_type == "error"
}

// ============================================================================
// Validator
// ============================================================================

/// Validates citations against the source document's pages.
pub struct CitationValidator {
    page_index: HashMap<usize, String>,
    config: ValidatorConfig,
}

impl CitationValidator {
    pub fn new(pages: &[PageText]) -> Self {
        Self::with_config(pages, ValidatorConfig::default())
    }

    pub fn with_config(pages: &[PageText], config: ValidatorConfig) -> Self {
        let page_index = pages
            .iter()
            .map(|p| (p.page_number, p.text.clone()))
            .collect();
        Self { page_index, config }
    }

    /// Validate every citation in a summary and report orphaned/missing
    /// references. Does not mutate the summary.
    pub fn validate(&self, summary: &Summary) -> ValidationReport {
        let mut report = ValidationReport {
            total_citations: summary.citations.len(),
            ..Default::default()
        };

        let references = summary.referenced_citation_ids();

        for (cite_id, citation) in &summary.citations {
            let check = self.validate_citation(cite_id, citation);
            if check.is_valid {
                report.valid_citations += 1;
            } else {
                report.invalid_citations += 1;
                if let Some(corrected) = self.correct_citation(citation) {
                    report.corrected_citations.push(CitationCorrection {
                        id: cite_id.clone(),
                        original: citation.clone(),
                        corrected,
                    });
                }
            }
            report.details.insert(cite_id.clone(), check);
        }

        for cite_id in summary.citations.keys() {
            if !references.contains(cite_id) {
                report.orphaned_citations.push(cite_id.clone());
            }
        }
        for reference in &references {
            if !summary.citations.contains_key(reference) {
                report.missing_citations.push(reference.clone());
            }
        }

        report
    }

    fn validate_citation(&self, cite_id: &str, citation: &Citation) -> CitationCheck {
        let mut check = CitationCheck {
            id: cite_id.to_string(),
            is_valid: false,
            exact_match: false,
            fuzzy_score: 0.0,
            page_verified: false,
            suggested_page: None,
            issues: Vec::new(),
        };

        if citation.text.is_empty() {
            check.issues.push("Empty citation text".to_string());
            return check;
        }
        if is_unrepairable_type(&citation.citation_type) {
            check.issues.push("Placeholder citation".to_string());
            return check;
        }

        match self.page_index.get(&citation.page) {
            Some(page_text) => {
                check.page_verified = true;
                if page_text.contains(&citation.text) {
                    check.exact_match = true;
                    check.is_valid = true;
                    check.fuzzy_score = 100.0;
                } else {
                    let score = fuzzy::find_in_text(
                        &citation.text,
                        page_text,
                        self.config.early_exit_threshold,
                    );
                    check.fuzzy_score = score;
                    if score > self.config.accept_threshold {
                        check.is_valid = true;
                    } else {
                        check
                            .issues
                            .push(format!("Text not found on page {}", citation.page));
                    }
                }
            }
            None => {
                check
                    .issues
                    .push(format!("Page {} not found", citation.page));
            }
        }

        // Re-localize: where does this text actually live?
        if !check.is_valid {
            if let Some(found_page) = self.find_text_in_document(&citation.text) {
                if found_page != citation.page {
                    check
                        .issues
                        .push(format!("Text actually on page {found_page}"));
                    check.suggested_page = Some(found_page);
                }
            }
        }

        check
    }

    /// Best-scoring page for a text across the whole document, if any page
    /// clears the acceptance threshold.
    fn find_text_in_document(&self, text: &str) -> Option<usize> {
        let mut best_score = 0.0f32;
        let mut best_page = None;

        // Deterministic page order.
        let mut pages: Vec<(&usize, &String)> = self.page_index.iter().collect();
        pages.sort_by_key(|(num, _)| **num);

        for (page_num, page_text) in pages {
            let score = fuzzy::find_in_text(text, page_text, self.config.early_exit_threshold);
            if score > best_score {
                best_score = score;
                best_page = Some(*page_num);
                if score > self.config.early_exit_threshold {
                    break;
                }
            }
        }

        (best_score > self.config.accept_threshold).then_some(best_page).flatten()
    }

    /// Propose a repair for an invalid citation: a page fix if the text
    /// lives elsewhere, else a sentence-level text replacement on the
    /// claimed page.
    fn correct_citation(&self, citation: &Citation) -> Option<Citation> {
        if citation.text.is_empty() || is_unrepairable_type(&citation.citation_type) {
            return None;
        }

        if let Some(correct_page) = self.find_text_in_document(&citation.text) {
            if correct_page != citation.page {
                let mut corrected = citation.clone();
                corrected.page = correct_page;
                corrected.corrected = Some(true);
                return Some(corrected);
            }
        }

        if let Some(page_text) = self.page_index.get(&citation.page) {
            if let Some((sentence, score)) = fuzzy::best_sentence_match(&citation.text, page_text) {
                if score > self.config.sentence_accept_threshold {
                    let mut corrected = citation.clone();
                    corrected.text = sentence;
                    corrected.corrected = Some(true);
                    corrected.similarity = Some(score as f64);
                    return Some(corrected);
                }
            }
        }

        None
    }

    /// Apply all discovered repairs to a summary:
    /// - page and text corrections from [`CitationValidator::validate`],
    /// - orphaned citations deleted,
    /// - missing references filled with `placeholder` citations (markers in
    ///   prose are preserved, never deleted),
    /// - repair counts stamped into `meta.citation_validation`.
    ///
    /// Idempotent: a second pass reports zero further corrections.
    pub fn auto_correct(&self, summary: &Summary) -> Summary {
        let report = self.validate(summary);
        let mut corrected = summary.clone();

        for correction in &report.corrected_citations {
            corrected
                .citations
                .insert(correction.id.clone(), correction.corrected.clone());
        }

        for orphan_id in &report.orphaned_citations {
            corrected.citations.remove(orphan_id);
        }

        let mut placeholders_added = 0usize;
        for missing_id in &report.missing_citations {
            corrected.citations.insert(
                missing_id.clone(),
                Citation {
                    page: 0,
                    text: "Citation source not found in document".to_string(),
                    citation_type: "placeholder".to_string(),
                    confidence: 0.0,
                    corrected: None,
                    similarity: None,
                },
            );
            placeholders_added += 1;
        }

        corrected.meta.citations_created = corrected.citations.len();
        corrected.meta.citation_validation = Some(CitationValidationMeta {
            valid: report.valid_citations,
            corrected: report.corrected_citations.len(),
            removed: report.orphaned_citations.len(),
            placeholders_added,
        });

        tracing::info!(
            valid = report.valid_citations,
            corrected = report.corrected_citations.len(),
            removed = report.orphaned_citations.len(),
            placeholders = placeholders_added,
            "auto-corrected summary citations"
        );

        corrected
    }
}
