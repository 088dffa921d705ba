//! Trustlens RAG: Citation-Bound Summary Generation and Validation
//!
//! The summarization half of the pipeline, built around one contract:
//! **citations precede prose, never the reverse**. For every output section
//! the generator first retrieves candidate facts, allocates citation ids
//! for the retained set, and only then asks the model for prose that may
//! reference those pre-allocated ids. The validator is the terminal gate:
//! it scans generated text for `{{cite:NNN}}` markers, verifies every
//! citation against the source pages (exactly or by fuzzy
//! re-localization), and repairs or removes violations so the final
//! artifact never contains a dangling reference.
//!
//! ```text
//!  facts ──► retrieve ──► allocate ids ──► generate prose ──► validate ──► repair
//!              (index)     (allocator)       (LLM client)     (fuzzy)      (gate)
//! ```

use std::collections::{BTreeMap, BTreeSet};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub mod fuzzy;
pub mod generator;
pub mod llm;
pub mod validator;

pub use generator::{GeneratorConfig, SectionSpec, SummaryGenerator};
pub use llm::{LlmClient, LlmError, TemplateClient};
pub use validator::{CitationValidator, ValidatorConfig};

// ============================================================================
// Citation artifact model
// ============================================================================

/// A numbered, page-verifiable excerpt binding generated prose to source
/// text. The citation id is the key of [`Summary::citations`], not a field.
///
/// `text` is always the complete fact statement: truncating citation text
/// would make the citation unverifiable against the source.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Citation {
    pub page: usize,
    pub text: String,
    #[serde(rename = "type")]
    pub citation_type: String,
    pub confidence: f64,
    /// Set by the validator when it rewrote this citation.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub corrected: Option<bool>,
    /// Similarity score of a sentence-level text replacement.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub similarity: Option<f64>,
}

/// Allocates sequential, zero-padded citation ids.
///
/// An explicit value threaded through the generation call graph: one
/// allocator per generation run keeps ids collision-free across sections.
/// Parallel section generation would give each section an allocator
/// started at a disjoint block via [`CitationAllocator::starting_at`].
#[derive(Debug, Clone)]
pub struct CitationAllocator {
    next: usize,
}

impl CitationAllocator {
    pub fn new() -> Self {
        Self { next: 1 }
    }

    pub fn starting_at(next: usize) -> Self {
        Self { next: next.max(1) }
    }

    /// Hand out the next id: "001", "002", ...
    pub fn allocate(&mut self) -> String {
        let id = format!("{:03}", self.next);
        self.next += 1;
        id
    }

    pub fn allocated(&self) -> usize {
        self.next - 1
    }
}

impl Default for CitationAllocator {
    fn default() -> Self {
        Self::new()
    }
}

// ============================================================================
// Summary artifact
// ============================================================================

/// How a section's prose came to be.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum GenerationOutcome {
    Generated,
    /// Prose generation failed; the section carries fallback content.
    /// Citations allocated for the section remain valid.
    Fallback { reason: String },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SummarySection {
    pub id: String,
    pub title: String,
    pub content: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SummaryBody {
    pub executive: String,
    pub sections: Vec<SummarySection>,
}

/// Repair statistics stamped into the summary by
/// [`validator::CitationValidator::auto_correct`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CitationValidationMeta {
    pub valid: usize,
    pub corrected: usize,
    pub removed: usize,
    pub placeholders_added: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CategoryCounts {
    pub count: usize,
    pub importance: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SummaryMeta {
    pub processing_method: String,
    pub document: String,
    pub total_facts: usize,
    pub citations_created: usize,
    pub generated_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub section_outcomes: BTreeMap<String, GenerationOutcome>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub categories: BTreeMap<String, CategoryCounts>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub chunks: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub citation_validation: Option<CitationValidationMeta>,
}

/// The terminal artifact: generated prose plus the citations mapping.
///
/// System invariant: every `{{cite:NNN}}` marker in `summary.executive` or
/// any section content has exactly one entry in `citations`, and that
/// entry's text is verifiably present on its stated page. The validator
/// enforces this.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Summary {
    pub meta: SummaryMeta,
    pub summary: SummaryBody,
    pub citations: BTreeMap<String, Citation>,
}

impl Summary {
    /// All citation ids referenced by markers anywhere in the prose.
    pub fn referenced_citation_ids(&self) -> BTreeSet<String> {
        let mut refs = markers::citation_refs(&self.summary.executive);
        for section in &self.summary.sections {
            refs.extend(markers::citation_refs(&section.content));
        }
        refs
    }
}

// ============================================================================
// Citation marker syntax
// ============================================================================

/// The literal `{{cite:NNN}}` token syntax embedded in prose.
///
/// This exact syntax is load-bearing: it is persisted bit-for-bit in the
/// artifact and the validator's scan depends on it.
pub mod markers {
    use std::collections::BTreeSet;
    use std::sync::OnceLock;

    use regex::Regex;

    static CITE_RE: OnceLock<Regex> = OnceLock::new();

    pub fn citation_regex() -> &'static Regex {
        CITE_RE.get_or_init(|| Regex::new(r"\{\{cite:(\w+)\}\}").expect("cite marker regex"))
    }

    /// Render a marker for an id: `{{cite:001}}`.
    pub fn citation_marker(id: &str) -> String {
        format!("{{{{cite:{id}}}}}")
    }

    /// All citation ids referenced in a text.
    pub fn citation_refs(text: &str) -> BTreeSet<String> {
        citation_regex()
            .captures_iter(text)
            .map(|c| c[1].to_string())
            .collect()
    }
}

// ============================================================================
// Validation report
// ============================================================================

/// Per-citation verification detail.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CitationCheck {
    pub id: String,
    pub is_valid: bool,
    pub exact_match: bool,
    pub fuzzy_score: f32,
    pub page_verified: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub suggested_page: Option<usize>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub issues: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CitationCorrection {
    pub id: String,
    pub original: Citation,
    pub corrected: Citation,
}

/// Outcome of validating every citation in a summary.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ValidationReport {
    pub total_citations: usize,
    pub valid_citations: usize,
    pub invalid_citations: usize,
    /// Defined in the citations map but never referenced by a marker.
    pub orphaned_citations: Vec<String>,
    /// Referenced by a marker but absent from the citations map.
    pub missing_citations: Vec<String>,
    pub corrected_citations: Vec<CitationCorrection>,
    pub details: BTreeMap<String, CitationCheck>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn allocator_hands_out_zero_padded_sequential_ids() {
        let mut alloc = CitationAllocator::new();
        assert_eq!(alloc.allocate(), "001");
        assert_eq!(alloc.allocate(), "002");
        assert_eq!(alloc.allocated(), 2);

        let mut block = CitationAllocator::starting_at(100);
        assert_eq!(block.allocate(), "100");
    }

    #[test]
    fn marker_syntax_round_trips_through_the_regex() {
        let marker = markers::citation_marker("042");
        assert_eq!(marker, "{{cite:042}}");
        let refs = markers::citation_refs(&format!("Income vests {marker} annually."));
        assert!(refs.contains("042"));
        assert_eq!(refs.len(), 1);
    }

    #[test]
    fn referenced_ids_span_executive_and_sections() {
        let summary = Summary {
            meta: SummaryMeta {
                processing_method: "rag".into(),
                document: "t.pdf".into(),
                total_facts: 0,
                citations_created: 0,
                generated_at: Utc::now(),
                section_outcomes: BTreeMap::new(),
                categories: BTreeMap::new(),
                chunks: None,
                citation_validation: None,
            },
            summary: SummaryBody {
                executive: "Executive {{cite:001}}.".into(),
                sections: vec![SummarySection {
                    id: "distributions".into(),
                    title: "Distribution Summary".into(),
                    content: "Income {{cite:002}} and principal {{cite:003}}.".into(),
                }],
            },
            citations: BTreeMap::new(),
        };
        let refs = summary.referenced_citation_ids();
        assert_eq!(
            refs.into_iter().collect::<Vec<_>>(),
            vec!["001".to_string(), "002".to_string(), "003".to_string()]
        );
    }

    #[test]
    fn citation_serializes_with_type_field_name() {
        let citation = Citation {
            page: 3,
            text: "The trustee shall act.".into(),
            citation_type: "trustee_power".into(),
            confidence: 0.8,
            corrected: None,
            similarity: None,
        };
        let json = serde_json::to_value(&citation).unwrap();
        assert_eq!(json["type"], "trustee_power");
        assert!(json.get("corrected").is_none());
    }
}
