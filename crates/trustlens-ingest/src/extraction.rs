//! Pattern-based fact extraction from trust document text.
//!
//! Three independent pattern families run over the text (relationships,
//! conditions, trust-specific provisions) plus a keyword-gated fallback for
//! provision sentences no structured pattern caught. Every match is widened
//! to its enclosing sentence before it is recorded; the raw match span is
//! discarded. A separate entity pass tags person names, dates, money
//! amounts, percentages and ages found near each fact.

use std::collections::HashSet;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::{floor_char_boundary, short_hash, PageText};

// ============================================================================
// Fact
// ============================================================================

/// A typed, page-located atomic claim extracted from document text.
///
/// Immutable after creation; ranking produces a re-weighted confidence via
/// [`FactExtractor::rank_by_importance`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Fact {
    /// Complete sentence containing the match.
    pub statement: String,
    /// 1-based source page.
    pub page: usize,
    /// Byte offset of the match in the full document text.
    pub char_position: usize,
    pub fact_type: String,
    /// Confidence in [0, 1].
    pub confidence: f64,
    /// `TYPE:value` tags for entities appearing in the statement.
    pub entities: Vec<String>,
    /// Surrounding context, for verification.
    pub context: String,
    /// Stable hash of (statement, page, char_position).
    pub fact_id: String,
}

impl Fact {
    pub fn new(
        statement: String,
        page: usize,
        char_position: usize,
        fact_type: impl Into<String>,
        confidence: f64,
        entities: Vec<String>,
        context: String,
    ) -> Self {
        let fact_id = short_hash(&[
            &statement,
            &page.to_string(),
            &char_position.to_string(),
        ]);
        Self {
            statement,
            page,
            char_position,
            fact_type: fact_type.into(),
            confidence,
            entities,
            context,
            fact_id,
        }
    }
}

// ============================================================================
// Pattern tables
// ============================================================================

#[derive(Debug, thiserror::Error)]
pub enum PatternError {
    #[error("pattern `{name}` failed to compile: {source}")]
    BadPattern {
        name: &'static str,
        #[source]
        source: regex::Error,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EntityKind {
    Person,
    Date,
    Money,
    Percent,
    Age,
}

impl EntityKind {
    pub fn label(self) -> &'static str {
        match self {
            EntityKind::Person => "PERSON",
            EntityKind::Date => "DATE",
            EntityKind::Money => "MONEY",
            EntityKind::Percent => "PERCENT",
            EntityKind::Age => "AGE",
        }
    }
}

/// Immutable pattern tables, built once and passed by reference into the
/// stateless extraction functions. Nothing mutates these at runtime.
pub struct PatternSet {
    entity: Vec<(EntityKind, Vec<Regex>)>,
    relationship: Vec<(Regex, &'static str)>,
    condition: Vec<(Regex, &'static str)>,
    trust: Vec<(&'static str, Vec<Regex>)>,
    provision_sentence: Regex,
    provision_keywords: &'static [&'static str],
}

fn compile(name: &'static str, pattern: &str) -> Result<Regex, PatternError> {
    Regex::new(pattern).map_err(|source| PatternError::BadPattern { name, source })
}

impl PatternSet {
    pub fn trust_documents() -> Result<Self, PatternError> {
        let entity = vec![
            (
                EntityKind::Person,
                vec![
                    compile("person_name", r"\b[A-Z][a-z]+ [A-Z][a-z]+(?:\s+[A-Z][a-z]+)?\b")?,
                    compile(
                        "person_role",
                        r"\b(?:Grantor|Settlor|Trustor|Trustee|Beneficiary)\b",
                    )?,
                ],
            ),
            (
                EntityKind::Date,
                vec![
                    compile("date_numeric", r"\b\d{1,2}[/-]\d{1,2}[/-]\d{2,4}\b")?,
                    compile(
                        "date_month_first",
                        r"\b(?:January|February|March|April|May|June|July|August|September|October|November|December)\s+\d{1,2},?\s+\d{4}\b",
                    )?,
                    compile(
                        "date_day_first",
                        r"\b\d{1,2}\s+(?:January|February|March|April|May|June|July|August|September|October|November|December)\s+\d{4}\b",
                    )?,
                ],
            ),
            (
                EntityKind::Money,
                vec![
                    compile("money_symbol", r"\$[\d,]+(?:\.\d{2})?")?,
                    compile(
                        "money_words",
                        r"\b\d+(?:,\d{3})*(?:\.\d{2})?\s*(?:dollars?|USD)\b",
                    )?,
                ],
            ),
            (
                EntityKind::Percent,
                vec![
                    compile("percent_symbol", r"\b\d+(?:\.\d+)?%")?,
                    compile("percent_words", r"\b\d+(?:\.\d+)?\s*percent\b")?,
                ],
            ),
            (
                EntityKind::Age,
                vec![
                    compile("age_of_age", r"\b\d+\s*years?\s*(?:of\s*)?age\b")?,
                    compile("age_prefix", r"\bage\s*\d+\b")?,
                    compile(
                        "age_spelled",
                        r"\b(?:eighteen|twenty-one|twenty-five|thirty|thirty-five|forty|fifty|sixty|sixty-five|seventy)\s*\(\d+\)\s*years?\b",
                    )?,
                ],
            ),
        ];

        let relationship = vec![
            (
                compile(
                    "trustee_appointment",
                    r"(?i)(\w+)\s+(?:is|shall be|was)\s+(?:the\s+)?(?:trustee|successor trustee)",
                )?,
                "trustee_appointment",
            ),
            (
                compile(
                    "beneficiary_designation",
                    r"(?i)(\w+)\s+(?:is|are)\s+(?:the\s+)?(?:beneficiary|beneficiaries)",
                )?,
                "beneficiary_designation",
            ),
            (
                compile(
                    "grantor_identification",
                    r"(?i)(?:grantor|settlor)\s+(?:is|was)\s+(\w+)",
                )?,
                "grantor_identification",
            ),
            (
                compile(
                    "authority_grant",
                    r"(?i)(\w+)\s+(?:shall|may|is authorized to)\s+(.+)",
                )?,
                "authority_grant",
            ),
            (
                compile("death_trigger", r"(?i)upon\s+the\s+death\s+of\s+(\w+)")?,
                "death_trigger",
            ),
            // Party-introduction forms common in trust agreements
            (
                compile(
                    "trust_parties",
                    r"(?i)between[,\s]+I,\s+([^,]+)[,\s]+and\s+([^,]+)[,\s]+the\s+(?:initial\s+)?trustee",
                )?,
                "trust_parties",
            ),
            (
                compile(
                    "grantor_declaration",
                    r"(?i)I,\s+([^,]+),\s+(?:as\s+)?(?:grantor|settlor|creator)",
                )?,
                "grantor_identification",
            ),
            (
                compile("initial_trustee", r"(?i)([^,]+),\s+the\s+(?:initial\s+)?trustee")?,
                "trustee_appointment",
            ),
        ];

        let condition = vec![
            (compile("condition", r"(?i)(?:if|when|upon)\s+(.+?)[,\.]")?, "condition"),
            (
                compile("provision", r"(?i)provided\s+(?:that|however)\s+(.+?)[,\.]")?,
                "provision",
            ),
            (
                compile("exception", r"(?i)(?:unless|except)\s+(.+?)[,\.]")?,
                "exception",
            ),
            (
                compile("restriction", r"(?i)subject\s+to\s+(.+?)[,\.]")?,
                "restriction",
            ),
        ];

        let trust = vec![
            (
                "trust_creation",
                vec![
                    compile(
                        "trust_dated",
                        r"(?is)(?:trust|agreement)\s+(?:dated|made|executed)\s+(?:on\s+)?(.+?)(?:\.|,)",
                    )?,
                    compile("trust_established", r"(?is)(?:established|created)\s+(?:on\s+)?(.+?)(?:\.|,)")?,
                    compile("trust_agreement_made", r"(?is)This\s+(.+?Trust)\s+Agreement\s+is\s+made")?,
                    compile(
                        "trust_named",
                        r"(?is)(?:name|named|known as)\s+(?:this trust |the |this )?(.+?(?:Trust|TRUST))",
                    )?,
                    compile("trust_title", r"(?is)The\s+(.+?(?:Trust|TRUST))\s+(?:Agreement|Document)")?,
                ],
            ),
            (
                "distribution",
                vec![
                    compile("distribute_to", r"(?is)(?:distribute|pay)\s+(.+?)\s+to\s+(.+?)(?:\.|,)")?,
                    compile("shall_receive", r"(?is)(\w+)\s+(?:shall|may)\s+receive\s+(.+?)(?:\.|,)")?,
                ],
            ),
            (
                "trustee_power",
                vec![
                    compile(
                        "trustee_authorized",
                        r"(?is)trustee\s+(?:shall|may|is authorized to)\s+(.+?)(?:\.|,)",
                    )?,
                    compile(
                        "trustee_power",
                        r"(?is)trustee\s+(?:has|have)\s+(?:the\s+)?(?:power|authority)\s+to\s+(.+?)(?:\.|,)",
                    )?,
                ],
            ),
            (
                "tax_provision",
                vec![
                    compile("named_tax", r"(?is)(?:GST|estate|income|gift)\s+tax\s+(.+?)(?:\.|,)")?,
                    compile("tax_relief", r"(?is)tax\s+(?:exemption|deduction|credit)\s+(.+?)(?:\.|,)")?,
                ],
            ),
            (
                "termination",
                vec![
                    compile("shall_terminate", r"(?is)trust\s+(?:shall|will)\s+terminate\s+(.+?)(?:\.|,)")?,
                    compile("upon_termination", r"(?is)upon\s+(?:termination|conclusion)\s+(.+?)(?:\.|,)")?,
                ],
            ),
        ];

        let provision_sentence = compile("provision_sentence", r"[A-Z][^.!?]*[.!?]")?;

        Ok(Self {
            entity,
            relationship,
            condition,
            trust,
            provision_sentence,
            provision_keywords: &[
                "shall",
                "may",
                "must",
                "trustee",
                "beneficiary",
                "distribute",
                "payment",
                "income",
                "principal",
                "power",
                "authority",
                "discretion",
                "terminate",
                "vest",
                "estate",
                "tax",
                "exempt",
            ],
        })
    }
}

// ============================================================================
// Extractor
// ============================================================================

/// Base confidences per pattern family.
const RELATIONSHIP_CONFIDENCE: f64 = 0.8;
const CONDITION_CONFIDENCE: f64 = 0.7;
const TRUST_CONFIDENCE: f64 = 0.9;
const PROVISION_CONFIDENCE: f64 = 0.6;

/// Fixed importance weights keyed by fact type. This ordering drives
/// citation-allocation priority downstream.
fn importance_weight(fact_type: &str) -> f64 {
    match fact_type {
        "trust_creation" => 1.0,
        "trustee_appointment" => 0.9,
        "beneficiary_designation" => 0.9,
        "distribution" => 0.85,
        "termination" => 0.85,
        "trustee_power" => 0.8,
        "death_trigger" => 0.8,
        "tax_provision" => 0.75,
        "condition" => 0.7,
        "authority_grant" => 0.7,
        "provision" => 0.6,
        _ => 0.5,
    }
}

/// Stateless fact extractor over an immutable [`PatternSet`].
pub struct FactExtractor {
    patterns: PatternSet,
}

impl FactExtractor {
    pub fn new() -> Result<Self, PatternError> {
        Ok(Self {
            patterns: PatternSet::trust_documents()?,
        })
    }

    pub fn with_patterns(patterns: PatternSet) -> Self {
        Self { patterns }
    }

    /// Extract all facts from a text segment.
    ///
    /// `page_num` is the 1-based page the segment begins on;
    /// `start_position` is the segment's byte offset in the full document.
    pub fn extract_facts(&self, text: &str, page_num: usize, start_position: usize) -> Vec<Fact> {
        let mut facts = Vec::new();
        // Spans of widened statements, for suppressing the fallback pass.
        let mut covered: Vec<(usize, usize)> = Vec::new();

        let entities = self.extract_entities(text);

        for (regex, fact_type) in &self.patterns.relationship {
            for m in regex.find_iter(text) {
                let statement = complete_sentence(text, m.start(), m.end());
                covered.push((m.start(), m.start() + statement.len()));
                facts.push(Fact::new(
                    statement.clone(),
                    page_num,
                    start_position + m.start(),
                    *fact_type,
                    RELATIONSHIP_CONFIDENCE,
                    entities_in_text(&statement, &entities),
                    surrounding_context(text, m.start(), m.end()),
                ));
            }
        }

        for (regex, fact_type) in &self.patterns.condition {
            for m in regex.find_iter(text) {
                let statement = complete_sentence(text, m.start(), m.end());
                covered.push((m.start(), m.start() + statement.len()));
                facts.push(Fact::new(
                    statement.clone(),
                    page_num,
                    start_position + m.start(),
                    *fact_type,
                    CONDITION_CONFIDENCE,
                    entities_in_text(&statement, &entities),
                    surrounding_context(text, m.start(), m.end()),
                ));
            }
        }

        for (fact_type, regexes) in &self.patterns.trust {
            for regex in regexes {
                for m in regex.find_iter(text) {
                    let statement = complete_sentence(text, m.start(), m.end());
                    covered.push((m.start(), m.start() + statement.len()));
                    facts.push(Fact::new(
                        statement.clone(),
                        page_num,
                        start_position + m.start(),
                        *fact_type,
                        TRUST_CONFIDENCE,
                        entities_in_text(&statement, &entities),
                        surrounding_context(text, m.start(), m.end()),
                    ));
                }
            }
        }

        // Fallback: legal-provision sentences no structured pattern caught.
        for (sent, sent_start) in self.provision_sentences(text) {
            let already_covered = covered
                .iter()
                .any(|&(lo, hi)| sent_start >= lo && sent_start <= hi);
            if already_covered {
                continue;
            }
            facts.push(Fact::new(
                sent.clone(),
                page_num,
                start_position + sent_start,
                "provision",
                PROVISION_CONFIDENCE,
                entities_in_text(&sent, &entities),
                sent,
            ));
        }

        facts
    }

    /// Extract facts from a whole document, page by page, with document-wide
    /// char offsets.
    pub fn extract_from_pages(&self, pages: &[PageText]) -> Vec<Fact> {
        let mut all_facts = Vec::new();
        let mut position = 0usize;
        for page in pages {
            all_facts.extend(self.extract_facts(&page.text, page.page_number, position));
            position += page.text.len();
        }
        all_facts
    }

    /// Remove duplicate facts. Two facts are duplicates iff their
    /// normalized statement texts are identical; the first occurrence wins.
    /// Idempotent.
    pub fn deduplicate(&self, facts: Vec<Fact>) -> Vec<Fact> {
        let mut seen = HashSet::new();
        facts
            .into_iter()
            .filter(|f| seen.insert(normalize_statement(&f.statement)))
            .collect()
    }

    /// Re-weight confidences by fact-type importance and sort descending.
    pub fn rank_by_importance(&self, mut facts: Vec<Fact>) -> Vec<Fact> {
        for fact in &mut facts {
            fact.confidence *= importance_weight(&fact.fact_type);
        }
        facts.sort_by(|a, b| b.confidence.total_cmp(&a.confidence));
        facts
    }

    // ------------------------------------------------------------------
    // Entities
    // ------------------------------------------------------------------

    fn extract_entities(&self, text: &str) -> Vec<(EntityKind, String)> {
        let mut found = Vec::new();
        for (kind, regexes) in &self.patterns.entity {
            for regex in regexes {
                for m in regex.find_iter(text) {
                    found.push((*kind, m.as_str().to_string()));
                }
            }
        }
        found
    }

    // ------------------------------------------------------------------
    // Provision-sentence fallback
    // ------------------------------------------------------------------

    fn provision_sentences(&self, text: &str) -> Vec<(String, usize)> {
        let mut sentences = Vec::new();
        for m in self.patterns.provision_sentence.find_iter(text) {
            let sent = m.as_str();
            let lower = sent.to_lowercase();
            if self
                .patterns
                .provision_keywords
                .iter()
                .any(|kw| lower.contains(kw))
            {
                sentences.push((collapse_whitespace(sent.trim()), m.start()));
            }
        }
        sentences
    }
}

// ============================================================================
// Sentence and context helpers
// ============================================================================

/// Widen a match span outward to the enclosing sentence.
///
/// Backward: nearest prior terminator followed by whitespace (within 500
/// bytes), else the nearest newline (within 200). Forward: next terminator
/// not opening a lowercase continuation (within 800 bytes), or a paragraph
/// break.
fn complete_sentence(text: &str, start: usize, end: usize) -> String {
    let bytes = text.as_bytes();

    let mut sentence_start = start;
    let back_limit = start.saturating_sub(500);
    let mut found_terminator = false;
    for i in (back_limit..start).rev() {
        if matches!(bytes[i], b'.' | b'!' | b'?' | b';')
            && i + 1 < bytes.len()
            && matches!(bytes[i + 1], b' ' | b'\n' | b'\t')
        {
            sentence_start = (i + 2).min(start);
            found_terminator = true;
            break;
        }
    }
    if !found_terminator {
        let para_limit = start.saturating_sub(200);
        for i in (para_limit..start).rev() {
            if bytes[i] == b'\n' {
                sentence_start = i + 1;
                break;
            }
        }
    }

    let mut sentence_end = end;
    let forward_limit = (end + 800).min(bytes.len());
    for i in end..forward_limit {
        if i + 1 < bytes.len() {
            let next = bytes[i + 1];
            if bytes[i] == b'.' && (matches!(next, b' ' | b'\n' | b'\t') || next.is_ascii_uppercase())
            {
                sentence_end = i + 1;
                break;
            }
            if matches!(bytes[i], b';' | b'!' | b'?') && matches!(next, b' ' | b'\n' | b'\t') {
                sentence_end = i + 1;
                break;
            }
            if bytes[i] == b'\n' && next == b'\n' {
                sentence_end = i;
                break;
            }
        } else if matches!(bytes[i], b'.' | b';' | b'!' | b'?') {
            sentence_end = i + 1;
            break;
        }
    }
    if sentence_end < end {
        sentence_end = end;
    }

    let sentence_start = floor_char_boundary(text, sentence_start);
    let sentence_end = floor_char_boundary(text, sentence_end.max(sentence_start));
    collapse_whitespace(text[sentence_start..sentence_end].trim())
}

/// Whitespace-collapsed context window around a match, ellipsised where
/// truncated.
fn surrounding_context(text: &str, start: usize, end: usize) -> String {
    const CONTEXT_CHARS: usize = 100;
    let ctx_start = floor_char_boundary(text, start.saturating_sub(CONTEXT_CHARS));
    let ctx_end = floor_char_boundary(text, (end + CONTEXT_CHARS).min(text.len()));

    let mut context = collapse_whitespace(&text[ctx_start..ctx_end]);
    if ctx_start > 0 {
        context = format!("...{context}");
    }
    if ctx_end < text.len() {
        context = format!("{context}...");
    }
    context
}

fn entities_in_text(text: &str, entities: &[(EntityKind, String)]) -> Vec<String> {
    let lower = text.to_lowercase();
    let mut seen = HashSet::new();
    let mut found = Vec::new();
    for (kind, value) in entities {
        if lower.contains(&value.to_lowercase()) {
            let tag = format!("{}:{}", kind.label(), value);
            if seen.insert(tag.clone()) {
                found.push(tag);
            }
        }
    }
    found
}

pub(crate) fn normalize_statement(s: &str) -> String {
    s.to_lowercase().split_whitespace().collect::<Vec<_>>().join(" ")
}

fn collapse_whitespace(s: &str) -> String {
    s.split_whitespace().collect::<Vec<_>>().join(" ")
}
