//! Citation-bound summary generation.
//!
//! For each output section: retrieve candidate facts (semantic search on a
//! fixed topic query, plus category-filtered facts), deduplicate, truncate
//! to a bounded count, allocate citation ids for the retained set, and only
//! then generate prose that may reference those ids. The executive summary
//! follows the same discipline over the globally top-ranked facts.

use std::collections::{BTreeMap, HashSet};

use chrono::Utc;

use trustlens_index::FactIndex;
use trustlens_ingest::{ConceptCategorizer, Fact};

use crate::llm::LlmClient;
use crate::markers::citation_marker;
use crate::{
    Citation, CitationAllocator, GenerationOutcome, Summary, SummaryBody, SummaryMeta,
    SummarySection,
};

// ============================================================================
// Section table
// ============================================================================

/// A standard output section: its retrieval query, relevant concept
/// categories, and generation instructions.
pub struct SectionSpec {
    pub id: &'static str,
    pub title: &'static str,
    pub query: &'static str,
    pub categories: &'static [&'static str],
    pub top_k: usize,
    pub instructions: &'static str,
}

pub const STANDARD_SECTIONS: &[SectionSpec] = &[
    SectionSpec {
        id: "essential_info",
        title: "Essential Information",
        query: "trust name creation date grantor settlor trustee beneficiary established agreement",
        categories: &[
            "trust_creation",
            "grantor_settlor",
            "trustee_appointment",
            "beneficiary_designation",
        ],
        top_k: 20,
        instructions: "Generate the Essential Information section with:\n\
                       - Trust name and date\n\
                       - Grantor/Settlor identity\n\
                       - Initial trustees\n\
                       - Primary beneficiaries\n\n\
                       Use ONLY the provided facts and citations.",
    },
    SectionSpec {
        id: "how_it_works",
        title: "How the Trust Works",
        query: "trustee powers authority administration management discretion operate provisions",
        categories: &["trustee_powers", "administrative_provisions", "withdrawal_rights"],
        top_k: 15,
        instructions: "Generate the How the Trust Works section with:\n\
                       - Administrative structure\n\
                       - Trustee powers and limitations\n\
                       - Management provisions\n\n\
                       Use ONLY the provided facts and citations.",
    },
    SectionSpec {
        id: "important_provisions",
        title: "Important Provisions",
        query: "restrictions conditions spendthrift tax protection special provisions limitations",
        categories: &[
            "spendthrift_protection",
            "tax_provisions",
            "special_provisions",
            "termination_conditions",
        ],
        top_k: 15,
        instructions: "Generate the Important Provisions section with:\n\
                       - Key restrictions and conditions\n\
                       - Special provisions\n\
                       - Tax considerations\n\
                       - Asset protection features\n\n\
                       Use ONLY the provided facts and citations.",
    },
    SectionSpec {
        id: "distributions",
        title: "Distribution Summary",
        query: "distribution beneficiary income principal payment receive age death mandatory discretionary",
        categories: &["distribution_rules", "distribution_timing", "beneficiary_designation"],
        top_k: 20,
        instructions: "Generate the Distribution Summary section with:\n\
                       - Who receives distributions and when\n\
                       - Distribution conditions and triggers\n\
                       - Mandatory vs discretionary distributions\n\n\
                       Use ONLY the provided facts and citations.",
    },
];

// ============================================================================
// Generator
// ============================================================================

#[derive(Debug, Clone)]
pub struct GeneratorConfig {
    /// Citations allocated per section.
    pub max_citations_per_section: usize,
    /// Facts shown to the model per section prompt.
    pub facts_in_prompt: usize,
    /// Category-filtered facts appended after semantic hits.
    pub category_facts_per_section: usize,
    /// Importance floor for executive-summary facts.
    pub executive_importance_threshold: f64,
    /// Facts fed into the executive summary prompt.
    pub executive_top_facts: usize,
}

impl Default for GeneratorConfig {
    fn default() -> Self {
        Self {
            max_citations_per_section: 15,
            facts_in_prompt: 10,
            category_facts_per_section: 10,
            executive_importance_threshold: 0.7,
            executive_top_facts: 10,
        }
    }
}

/// Generates a [`Summary`] from indexed facts. Citations precede prose.
pub struct SummaryGenerator<'a> {
    index: &'a FactIndex,
    categorizer: &'a ConceptCategorizer,
    client: &'a dyn LlmClient,
    config: GeneratorConfig,
}

impl<'a> SummaryGenerator<'a> {
    pub fn new(
        index: &'a FactIndex,
        categorizer: &'a ConceptCategorizer,
        client: &'a dyn LlmClient,
    ) -> Self {
        Self {
            index,
            categorizer,
            client,
            config: GeneratorConfig::default(),
        }
    }

    pub fn with_config(mut self, config: GeneratorConfig) -> Self {
        self.config = config;
        self
    }

    /// Generate the complete summary for a document.
    ///
    /// `facts` must already be deduplicated and importance-ranked; the
    /// index must hold the same document's facts.
    pub async fn generate(&self, document_name: &str, facts: &[Fact]) -> Summary {
        let mut allocator = CitationAllocator::new();
        let mut citations: BTreeMap<String, Citation> = BTreeMap::new();
        let mut sections = Vec::with_capacity(STANDARD_SECTIONS.len());
        let mut section_outcomes = BTreeMap::new();

        let (executive, exec_outcome) = self.generate_executive(facts).await;
        section_outcomes.insert("executive".to_string(), exec_outcome);

        // Citation id allocation stays single-threaded and sequential:
        // sections are generated in order, drawing from one allocator.
        for spec in STANDARD_SECTIONS {
            let (section, outcome) = self
                .generate_section(spec, facts, &mut allocator, &mut citations)
                .await;
            section_outcomes.insert(spec.id.to_string(), outcome);
            sections.push(section);
        }

        let meta = SummaryMeta {
            processing_method: "rag".to_string(),
            document: document_name.to_string(),
            total_facts: facts.len(),
            citations_created: citations.len(),
            generated_at: Utc::now(),
            section_outcomes,
            categories: BTreeMap::new(),
            chunks: None,
            citation_validation: None,
        };

        Summary {
            meta,
            summary: SummaryBody { executive, sections },
            citations,
        }
    }

    // ------------------------------------------------------------------
    // Executive summary
    // ------------------------------------------------------------------

    async fn generate_executive(&self, facts: &[Fact]) -> (String, GenerationOutcome) {
        let mut important: Vec<(&Fact, f64)> = facts
            .iter()
            .map(|f| (f, self.categorizer.fact_importance(f)))
            .filter(|(_, importance)| *importance > self.config.executive_importance_threshold)
            .collect();
        important.sort_by(|a, b| b.1.total_cmp(&a.1));
        important.truncate(self.config.executive_top_facts);

        let fact_lines = important
            .iter()
            .map(|(f, _)| format!("- Page {}: {}", f.page, f.statement))
            .collect::<Vec<_>>()
            .join("\n");

        let prompt = format!(
            "Generate a 2-3 sentence executive summary of this trust document based on these \
             key facts:\n\n{fact_lines}\n\n\
             Focus on: trust creation date, primary purpose, and key parties.\n\
             Keep it concise and factual."
        );

        match self
            .client
            .generate_text(
                "You are a trust document analyst creating an executive summary.",
                &prompt,
            )
            .await
        {
            Ok(text) => (text, GenerationOutcome::Generated),
            Err(e) => {
                tracing::warn!(error = %e, "executive summary generation failed, using fallback");
                (
                    "This trust document establishes provisions for the management and \
                     distribution of trust assets."
                        .to_string(),
                    GenerationOutcome::Fallback {
                        reason: e.to_string(),
                    },
                )
            }
        }
    }

    // ------------------------------------------------------------------
    // Sections
    // ------------------------------------------------------------------

    async fn generate_section(
        &self,
        spec: &SectionSpec,
        all_facts: &[Fact],
        allocator: &mut CitationAllocator,
        citations: &mut BTreeMap<String, Citation>,
    ) -> (SummarySection, GenerationOutcome) {
        let relevant = self.retrieve_section_facts(spec, all_facts);

        // Allocate citations for the retained facts before any prose
        // exists. Citation text is the complete statement: truncation
        // would make it unverifiable.
        let retained: Vec<&Fact> = relevant
            .iter()
            .take(self.config.max_citations_per_section)
            .collect();
        let mut ids = Vec::with_capacity(retained.len());
        for fact in &retained {
            let id = allocator.allocate();
            citations.insert(
                id.clone(),
                Citation {
                    page: fact.page,
                    text: fact.statement.clone(),
                    citation_type: fact.fact_type.clone(),
                    confidence: fact.confidence,
                    corrected: None,
                    similarity: None,
                },
            );
            ids.push(id);
        }

        let (content, outcome) = self.generate_section_prose(spec, &retained, &ids).await;

        (
            SummarySection {
                id: spec.id.to_string(),
                title: spec.title.to_string(),
                content,
            },
            outcome,
        )
    }

    /// Candidate facts for a section: semantic hits reconstructed from the
    /// index, then category-filtered facts, deduplicated by statement text.
    fn retrieve_section_facts(&self, spec: &SectionSpec, all_facts: &[Fact]) -> Vec<Fact> {
        let mut relevant: Vec<Fact> = Vec::new();
        let mut seen: HashSet<String> = HashSet::new();

        for hit in self.index.search(spec.query, spec.top_k, None) {
            let statement = hit.metadata.fact_text.clone();
            if statement.is_empty() || !seen.insert(statement.clone()) {
                continue;
            }
            relevant.push(Fact::new(
                statement,
                hit.metadata.page,
                hit.metadata.char_position,
                hit.metadata.fact_type.clone(),
                hit.metadata.confidence,
                hit.metadata.entities.clone(),
                hit.text,
            ));
        }

        let by_category = all_facts.iter().filter(|fact| {
            self.categorizer
                .categorize_fact(fact)
                .iter()
                .any(|(name, _)| spec.categories.contains(&name.as_str()))
        });
        for fact in by_category.take(self.config.category_facts_per_section) {
            if seen.insert(fact.statement.clone()) {
                relevant.push(fact.clone());
            }
        }

        relevant
    }

    async fn generate_section_prose(
        &self,
        spec: &SectionSpec,
        facts: &[&Fact],
        ids: &[String],
    ) -> (String, GenerationOutcome) {
        let fact_lines = facts
            .iter()
            .zip(ids)
            .take(self.config.facts_in_prompt)
            .map(|(fact, id)| format!("- {} {}", fact.statement, citation_marker(id)))
            .collect::<Vec<_>>()
            .join("\n");

        let prompt = format!(
            "{}\n\nAvailable facts with citations:\n{}\n\n\
             Format the response as structured content with headers and bullet points.\n\
             Include citation references in the format {{{{cite:XXX}}}} where appropriate.\n\
             Reference only the citation ids listed above.",
            spec.instructions, fact_lines
        );

        match self
            .client
            .generate_text("You are creating a section of a trust document summary.", &prompt)
            .await
        {
            Ok(text) => (text, GenerationOutcome::Generated),
            Err(e) => {
                tracing::warn!(section = spec.id, error = %e, "section generation failed, using fallback");
                // The section is still emitted; its allocated citations
                // stay in the map (orphans are the validator's problem,
                // not an error here).
                (
                    format!(
                        "This section contains information about {}.",
                        spec.id.replace('_', " ")
                    ),
                    GenerationOutcome::Fallback {
                        reason: e.to_string(),
                    },
                )
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::{LlmError, TemplateClient};
    use async_trait::async_trait;

    fn fact(statement: &str, fact_type: &str, page: usize, confidence: f64) -> Fact {
        Fact::new(
            statement.to_string(),
            page,
            0,
            fact_type,
            confidence,
            vec![],
            String::new(),
        )
    }

    fn sample_facts() -> Vec<Fact> {
        vec![
            fact(
                "This Family Trust Agreement was made and executed on January 15, 2006.",
                "trust_creation",
                1,
                0.9,
            ),
            fact("John Smith is the trustee.", "trustee_appointment", 2, 0.72),
            fact(
                "The trustee shall distribute all net income to the beneficiary annually.",
                "distribution",
                5,
                0.765,
            ),
            fact(
                "The trust shall terminate upon the death of the last surviving beneficiary.",
                "termination",
                7,
                0.765,
            ),
        ]
    }

    async fn generate_sample() -> Summary {
        let facts = sample_facts();
        let mut index = FactIndex::new();
        index.index_facts(&facts, Some("doc"));
        let categorizer = ConceptCategorizer::new().unwrap();
        let client = TemplateClient::new();
        let generator = SummaryGenerator::new(&index, &categorizer, &client);
        generator.generate("doc.pdf", &facts).await
    }

    #[tokio::test]
    async fn all_standard_sections_are_emitted() {
        let summary = generate_sample().await;
        let ids: Vec<&str> = summary.summary.sections.iter().map(|s| s.id.as_str()).collect();
        assert_eq!(
            ids,
            vec!["essential_info", "how_it_works", "important_provisions", "distributions"]
        );
        assert!(!summary.summary.executive.is_empty());
    }

    #[tokio::test]
    async fn citation_ids_are_sequential_and_unique_across_sections() {
        let summary = generate_sample().await;
        assert!(!summary.citations.is_empty());
        let mut numbers: Vec<usize> = summary
            .citations
            .keys()
            .map(|k| k.parse::<usize>().expect("numeric id"))
            .collect();
        numbers.sort_unstable();
        let expected: Vec<usize> = (1..=numbers.len()).collect();
        assert_eq!(numbers, expected, "ids must be one contiguous sequence");
        for key in summary.citations.keys() {
            assert_eq!(key.len(), 3, "ids are zero-padded to 3 digits: {key}");
        }
    }

    #[tokio::test]
    async fn citation_text_is_never_truncated() {
        let summary = generate_sample().await;
        let statements: Vec<String> =
            sample_facts().iter().map(|f| f.statement.clone()).collect();
        for citation in summary.citations.values() {
            assert!(
                statements.contains(&citation.text),
                "citation text must be a complete fact statement: {}",
                citation.text
            );
        }
    }

    #[tokio::test]
    async fn prose_references_only_allocated_ids() {
        let summary = generate_sample().await;
        let refs = summary.referenced_citation_ids();
        for id in &refs {
            assert!(
                summary.citations.contains_key(id),
                "prose references unallocated id {id}"
            );
        }
        assert!(!refs.is_empty(), "template prose should carry markers");
    }

    #[tokio::test]
    async fn trustee_scenario_produces_trustee_citation() {
        let summary = generate_sample().await;
        let trustee: Vec<&Citation> = summary
            .citations
            .values()
            .filter(|c| c.citation_type == "trustee_appointment")
            .collect();
        assert!(!trustee.is_empty());
        assert_eq!(trustee[0].page, 2);
        assert!(trustee[0].text.contains("John Smith is the trustee"));
    }

    /// A client that always fails, for exercising fallback paths.
    struct FailingClient;

    #[async_trait]
    impl LlmClient for FailingClient {
        async fn generate_json(
            &self,
            _s: &str,
            _u: &str,
        ) -> Result<serde_json::Value, LlmError> {
            Err(LlmError::Api("down".into()))
        }
        async fn generate_text(&self, _s: &str, _u: &str) -> Result<String, LlmError> {
            Err(LlmError::Api("down".into()))
        }
    }

    #[tokio::test]
    async fn generation_failure_emits_fallback_sections_and_keeps_citations() {
        let facts = sample_facts();
        let mut index = FactIndex::new();
        index.index_facts(&facts, Some("doc"));
        let categorizer = ConceptCategorizer::new().unwrap();
        let client = FailingClient;
        let generator = SummaryGenerator::new(&index, &categorizer, &client);
        let summary = generator.generate("doc.pdf", &facts).await;

        assert_eq!(summary.summary.sections.len(), 4);
        for section in &summary.summary.sections {
            assert!(!section.content.is_empty());
        }
        // Citations were allocated before prose, so they survive the
        // generation failure.
        assert!(!summary.citations.is_empty());
        let fallbacks = summary
            .meta
            .section_outcomes
            .values()
            .filter(|o| matches!(o, GenerationOutcome::Fallback { .. }))
            .count();
        assert_eq!(fallbacks, summary.meta.section_outcomes.len());
    }
}
