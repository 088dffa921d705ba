//! Integration tests for the complete Trustlens pipeline
//!
//! These tests verify end-to-end functionality across crates:
//! - Page text → chunks → facts → categories
//! - Facts → semantic index → citation-bound generation
//! - Generated summary → validation → repair
//!
//! Run with: cargo test --test integration_tests

use std::collections::BTreeMap;

use chrono::Utc;
use trustlens_index::FactIndex;
use trustlens_ingest::{
    ChunkerConfig, ConceptCategorizer, Fact, FactExtractor, PageText, SmartChunker,
};
use trustlens_rag::{
    markers, Citation, CitationValidator, Summary, SummaryBody, SummaryGenerator, SummaryMeta,
    SummarySection, TemplateClient,
};

// ============================================================================
// Helpers
// ============================================================================

fn extractor() -> FactExtractor {
    FactExtractor::new().expect("pattern tables compile")
}

fn extract_ranked(pages: &[PageText]) -> Vec<Fact> {
    let ex = extractor();
    let facts = ex.extract_from_pages(pages);
    let facts = ex.deduplicate(facts);
    ex.rank_by_importance(facts)
}

async fn generate(facts: &[Fact]) -> Summary {
    let mut index = FactIndex::new();
    index.index_facts(facts, Some("it-doc"));
    let categorizer = ConceptCategorizer::new().unwrap();
    let client = TemplateClient::new();
    let generator = SummaryGenerator::new(&index, &categorizer, &client);
    generator.generate("it-doc.pdf", facts).await
}

fn handcrafted_summary(citations: Vec<(&str, Citation)>, content: &str) -> Summary {
    Summary {
        meta: SummaryMeta {
            processing_method: "rag".into(),
            document: "it-doc.pdf".into(),
            total_facts: 0,
            citations_created: citations.len(),
            generated_at: Utc::now(),
            section_outcomes: BTreeMap::new(),
            categories: BTreeMap::new(),
            chunks: None,
            citation_validation: None,
        },
        summary: SummaryBody {
            executive: String::new(),
            sections: vec![SummarySection {
                id: "essential_info".into(),
                title: "Essential Information".into(),
                content: content.to_string(),
            }],
        },
        citations: citations
            .into_iter()
            .map(|(id, c)| (id.to_string(), c))
            .collect(),
    }
}

fn citation(page: usize, text: &str, citation_type: &str) -> Citation {
    Citation {
        page,
        text: text.to_string(),
        citation_type: citation_type.to_string(),
        confidence: 0.8,
        corrected: None,
        similarity: None,
    }
}

// ============================================================================
// Scenario A: trustee fact extraction → citation → exact validation
// ============================================================================

#[tokio::test]
async fn scenario_trustee_fact_cited_and_exact() {
    let pages = vec![
        PageText::new(1, "This Family Trust Agreement was made on January 15, 2006."),
        PageText::new(2, "John Smith is the trustee."),
        PageText::new(3, "The trust shall terminate upon final distribution of assets."),
    ];

    let facts = extract_ranked(&pages);
    let trustee = facts
        .iter()
        .find(|f| f.fact_type == "trustee_appointment")
        .expect("trustee fact extracted");
    assert_eq!(trustee.page, 2);

    let summary = generate(&facts).await;
    let trustee_citations: Vec<(&String, &Citation)> = summary
        .citations
        .iter()
        .filter(|(_, c)| c.text.contains("John Smith is the trustee"))
        .collect();
    assert!(!trustee_citations.is_empty(), "trustee fact must be cited");

    let validator = CitationValidator::new(&pages);
    let report = validator.validate(&summary);
    for (id, _) in trustee_citations {
        let detail = &report.details[id];
        assert!(detail.is_valid, "issues: {:?}", detail.issues);
        assert!(detail.exact_match);
    }
}

// ============================================================================
// Scenario B: wrong page → suggested page → auto-corrected
// ============================================================================

#[test]
fn scenario_wrong_page_is_relocated() {
    let pages: Vec<PageText> = (1..=7)
        .map(|n| {
            if n == 7 {
                PageText::new(
                    n,
                    "Thereafter the trustee shall distribute income to the beneficiaries.",
                )
            } else {
                PageText::new(n, format!("Page {n} filler text about other matters."))
            }
        })
        .collect();

    let summary = handcrafted_summary(
        vec![(
            "001",
            citation(
                5,
                "the trustee shall distribute income to the beneficiaries",
                "distribution",
            ),
        )],
        &format!("See {}.", markers::citation_marker("001")),
    );

    let validator = CitationValidator::new(&pages);
    let report = validator.validate(&summary);
    assert_eq!(report.invalid_citations, 1);
    assert_eq!(report.details["001"].suggested_page, Some(7));

    let corrected = validator.auto_correct(&summary);
    assert_eq!(corrected.citations["001"].page, 7);

    let report2 = validator.validate(&corrected);
    assert_eq!(report2.invalid_citations, 0);
}

// ============================================================================
// Scenario C: missing citation → placeholder, marker preserved
// ============================================================================

#[test]
fn scenario_missing_citation_gets_placeholder() {
    let pages = vec![PageText::new(1, "John Smith is the trustee.")];
    let marker = markers::citation_marker("099");
    let summary = handcrafted_summary(vec![], &format!("Unsupported claim {marker}."));

    let validator = CitationValidator::new(&pages);
    let report = validator.validate(&summary);
    assert!(report.missing_citations.contains(&"099".to_string()));

    let corrected = validator.auto_correct(&summary);
    let placeholder = &corrected.citations["099"];
    assert!(
        placeholder.citation_type == "placeholder" || placeholder.citation_type == "error"
    );
    assert!(
        corrected.summary.sections[0].content.contains(&marker),
        "marker must be preserved, not deleted"
    );

    // After repair there are no dangling references left.
    let report2 = validator.validate(&corrected);
    assert!(report2.missing_citations.is_empty());
}

// ============================================================================
// Scenario D: orphaned citation → flagged → removed
// ============================================================================

#[test]
fn scenario_orphaned_citation_is_removed() {
    let pages = vec![PageText::new(1, "John Smith is the trustee.")];
    let summary = handcrafted_summary(
        vec![("042", citation(1, "John Smith is the trustee.", "trustee_appointment"))],
        "No citation references in this prose.",
    );

    let validator = CitationValidator::new(&pages);
    let report = validator.validate(&summary);
    assert!(report.orphaned_citations.contains(&"042".to_string()));

    let corrected = validator.auto_correct(&summary);
    assert!(!corrected.citations.contains_key("042"));
}

// ============================================================================
// Scenario E: large document chunking
// ============================================================================

#[test]
fn scenario_large_document_chunks_are_bounded_and_ordered() {
    let config = ChunkerConfig::default();
    let chunker = SmartChunker::new(config.clone());

    // ~60,000 characters over 12 pages, no section structure.
    let sentence = "the quick brown fox jumps over the lazy dog and keeps going. ";
    let page_text = sentence.repeat(82); // ~5,080 chars per page
    let pages: Vec<PageText> = (1..=12)
        .map(|n| PageText::new(n, page_text.clone()))
        .collect();
    let total: usize = pages.iter().map(|p| p.text.len()).sum();
    assert!(total >= 60_000);

    let chunks = chunker.chunk_document(&pages);
    assert!(chunks.len() > 1, "document above the threshold must split");

    let limit = (config.max_chunk_size as f64 * 1.5) as usize;
    for chunk in &chunks {
        assert!(chunk.text.len() <= limit);
    }

    // The concatenated chunk text preserves page ordering: page markers
    // appear in non-decreasing order and cover every page.
    let combined: String = chunks
        .iter()
        .map(|c| c.text.as_str())
        .collect::<Vec<_>>()
        .join("\n");
    let marker_re = regex::Regex::new(r"\[Page (\d+)\]").unwrap();
    let mut seen_pages = Vec::new();
    for cap in marker_re.captures_iter(&combined) {
        seen_pages.push(cap[1].parse::<usize>().unwrap());
    }
    assert!(!seen_pages.is_empty());
    for pair in seen_pages.windows(2) {
        assert!(pair[0] <= pair[1], "page markers out of order: {seen_pages:?}");
    }
    let unique: std::collections::BTreeSet<usize> = seen_pages.into_iter().collect();
    assert_eq!(unique, (1..=12).collect());
}

// ============================================================================
// Referential integrity and idempotence on a full run
// ============================================================================

#[tokio::test]
async fn full_run_referential_integrity_and_idempotence() {
    let pages = vec![
        PageText::new(
            1,
            "This Family Trust Agreement is made between, I, Eric Russell, and Northern \
             Bank, the initial trustee. The trust was established on January 15, 2006.",
        ),
        PageText::new(2, "John Smith is the trustee. The grantor is Eric Russell."),
        PageText::new(
            3,
            "The trustee shall distribute all net income to the beneficiaries annually. \
             If any beneficiary attains age 35, the principal vests.",
        ),
    ];
    let facts = extract_ranked(&pages);
    let summary = generate(&facts).await;

    let validator = CitationValidator::new(&pages);
    let once = validator.auto_correct(&summary);

    // Referential integrity after repair.
    let report = validator.validate(&once);
    assert!(report.orphaned_citations.is_empty());
    assert!(report.missing_citations.is_empty());
    let refs = once.referenced_citation_ids();
    for reference in &refs {
        assert!(once.citations.contains_key(reference));
    }

    // Idempotence: a second repair pass changes nothing.
    let twice = validator.auto_correct(&once);
    assert_eq!(
        once.citations.keys().collect::<Vec<_>>(),
        twice.citations.keys().collect::<Vec<_>>()
    );
    let meta = twice.meta.citation_validation.as_ref().unwrap();
    assert_eq!(meta.corrected, 0);
    assert_eq!(meta.removed, 0);
    assert_eq!(meta.placeholders_added, 0);
}

// ============================================================================
// Chunked extraction feeds the same pipeline
// ============================================================================

#[tokio::test]
async fn chunked_extraction_still_validates() {
    let chunker = SmartChunker::default();
    let ex = extractor();

    let body =
        "The trustee shall distribute income to the beneficiaries. John Smith is the trustee. ";
    let page_text = body.repeat(70); // ~6,000 chars per page
    let pages: Vec<PageText> = (1..=10)
        .map(|n| PageText::new(n, page_text.clone()))
        .collect();

    let chunks = chunker.chunk_document(&pages);
    assert!(chunks.len() > 1);

    let mut facts = Vec::new();
    for chunk in &chunks {
        facts.extend(ex.extract_facts(&chunk.text, chunk.start_page, chunk.start_char));
    }
    let facts = ex.rank_by_importance(ex.deduplicate(facts));
    assert!(!facts.is_empty());

    let summary = generate(&facts).await;
    let validator = CitationValidator::new(&pages);
    let corrected = validator.auto_correct(&summary);
    let report = validator.validate(&corrected);

    assert!(report.orphaned_citations.is_empty());
    assert!(report.missing_citations.is_empty());
    // Chunk-extracted facts carry the chunk's first page; repair may move
    // them, but nothing may remain unverifiable.
    for (id, detail) in &report.details {
        let citation = &corrected.citations[id];
        if citation.citation_type == "placeholder" {
            continue;
        }
        assert!(
            detail.is_valid,
            "citation {id} unverifiable: {:?}",
            detail.issues
        );
    }
}
