//! The document processing pipeline: extraction → chunking → facts →
//! categorization → indexing → citation-bound generation → validation →
//! repair → persistence.
//!
//! Every failure path produces a structured [`ProcessingResult`] carrying
//! whatever was salvaged; callers never see a bare error for a document.

use std::path::{Path, PathBuf};
use std::time::Instant;

use anyhow::{anyhow, Context, Result};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use trustlens_index::FactIndex;
use trustlens_ingest::{
    ChunkerConfig, ConceptCategorizer, DocumentText, Fact, FactExtractor, PdfParser, SmartChunker,
};
use trustlens_rag::{
    CitationValidator, LlmClient, SummaryGenerator, ValidatorConfig,
};
use trustlens_storage::{PageCache, ProcessingLedger, ProcessingRecord};

// ============================================================================
// Options and results
// ============================================================================

#[derive(Debug, Clone)]
pub struct PipelineOptions {
    pub chunker: ChunkerConfig,
    /// Documents above this many characters are processed chunk-by-chunk,
    /// with chunk extraction fanned out across the rayon pool.
    pub chunking_threshold: usize,
    pub validator: ValidatorConfig,
    pub output_dir: PathBuf,
    pub cache_dir: Option<PathBuf>,
    pub ledger_path: Option<PathBuf>,
}

impl Default for PipelineOptions {
    fn default() -> Self {
        Self {
            chunker: ChunkerConfig::default(),
            chunking_threshold: 50_000,
            validator: ValidatorConfig::default(),
            output_dir: PathBuf::from("results"),
            cache_dir: Some(PathBuf::from("page_cache")),
            ledger_path: Some(PathBuf::from("results/ledger.jsonl")),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DocumentStats {
    pub pages: usize,
    pub characters: usize,
    pub facts_extracted: usize,
    pub citations_created: usize,
}

/// Structured outcome of one document run. `success: false` still carries
/// an error message and whatever stats were gathered before the failure.
#[derive(Debug, Serialize, Deserialize)]
pub struct ProcessingResult {
    pub success: bool,
    pub summary: Option<trustlens_rag::Summary>,
    pub validation_report: Option<trustlens_rag::ValidationReport>,
    pub processing_time_secs: f64,
    pub document_stats: DocumentStats,
    pub error_message: String,
    pub result_path: Option<PathBuf>,
}

// ============================================================================
// Processor
// ============================================================================

pub struct TrustProcessor {
    extractor: FactExtractor,
    chunker: SmartChunker,
    categorizer: ConceptCategorizer,
    cache: Option<PageCache>,
    ledger: Option<ProcessingLedger>,
    options: PipelineOptions,
}

impl TrustProcessor {
    pub fn new(options: PipelineOptions) -> Result<Self> {
        let extractor = FactExtractor::new().context("building extraction pattern tables")?;
        let chunker = SmartChunker::new(options.chunker.clone());
        let categorizer = ConceptCategorizer::new().context("building category taxonomy")?;

        let cache = match &options.cache_dir {
            Some(dir) => match PageCache::open(dir) {
                Ok(cache) => Some(cache),
                Err(e) => {
                    // A broken cache disables the optimization, nothing else.
                    tracing::warn!(error = %e, "page cache unavailable, continuing without");
                    None
                }
            },
            None => None,
        };
        let ledger = match &options.ledger_path {
            Some(path) => match ProcessingLedger::open(path) {
                Ok(ledger) => Some(ledger),
                Err(e) => {
                    tracing::warn!(error = %e, "processing ledger unavailable, continuing without");
                    None
                }
            },
            None => None,
        };

        Ok(Self {
            extractor,
            chunker,
            categorizer,
            cache,
            ledger,
            options,
        })
    }

    pub fn chunker(&self) -> &SmartChunker {
        &self.chunker
    }

    pub fn categorizer(&self) -> &ConceptCategorizer {
        &self.categorizer
    }

    // ------------------------------------------------------------------
    // Document loading
    // ------------------------------------------------------------------

    /// Load page-tagged text for a document, consulting the cache first.
    /// PDF input goes through the PDF boundary; plain text is split on
    /// form feeds.
    pub fn load_document(&self, path: &Path) -> Result<DocumentText> {
        if let Some(cache) = &self.cache {
            if let Some(hit) = cache.get(path) {
                let mut doc = DocumentText::from_pages(document_id(path), hit.pages);
                doc.source_path = hit.source_path;
                doc.full_text = hit.full_text;
                return Ok(doc);
            }
        }

        let doc = match path.extension().and_then(|e| e.to_str()) {
            Some("pdf") | Some("PDF") => PdfParser::new()
                .parse_file(path)
                .with_context(|| format!("extracting text from {}", path.display()))?,
            _ => {
                let text = std::fs::read_to_string(path)
                    .with_context(|| format!("reading {}", path.display()))?;
                let pages = PdfParser::new().split_into_pages(&text);
                let mut doc = DocumentText::from_pages(document_id(path), pages);
                doc.source_path = path.to_string_lossy().to_string();
                doc
            }
        };

        if let Some(cache) = &self.cache {
            cache.put(path, &doc.full_text, &doc.pages);
        }
        Ok(doc)
    }

    // ------------------------------------------------------------------
    // Fact extraction strategies
    // ------------------------------------------------------------------

    /// Extract, deduplicate and rank facts for a document, choosing the
    /// standard or chunked strategy by size.
    pub fn extract_facts(&self, doc: &DocumentText) -> (Vec<Fact>, Option<usize>) {
        let total_chars = doc.total_chars();

        let (raw_facts, chunk_count) = if total_chars > self.options.chunking_threshold {
            let chunks = self.chunker.chunk_document(&doc.pages);
            tracing::info!(chunks = chunks.len(), total_chars, "chunked extraction");
            // Chunk extraction is embarrassingly parallel: each worker gets
            // an independent chunk and returns an independent fact list;
            // merge is plain concatenation in chunk order.
            let per_chunk: Vec<Vec<Fact>> = chunks
                .par_iter()
                .map(|chunk| {
                    self.extractor
                        .extract_facts(&chunk.text, chunk.start_page, chunk.start_char)
                })
                .collect();
            (
                per_chunk.into_iter().flatten().collect(),
                Some(chunks.len()),
            )
        } else {
            (self.extractor.extract_from_pages(&doc.pages), None)
        };

        let facts = self.extractor.deduplicate(raw_facts);
        let facts = self.extractor.rank_by_importance(facts);
        (facts, chunk_count)
    }

    // ------------------------------------------------------------------
    // Full pipeline
    // ------------------------------------------------------------------

    /// Process one document end to end.
    pub async fn process_document(
        &self,
        path: &Path,
        client: &dyn LlmClient,
    ) -> ProcessingResult {
        let started = Instant::now();
        match self.try_process(path, client).await {
            Ok(mut result) => {
                result.processing_time_secs = started.elapsed().as_secs_f64();
                result
            }
            Err(e) => {
                tracing::error!(document = %path.display(), error = %e, "processing failed");
                ProcessingResult {
                    success: false,
                    summary: None,
                    validation_report: None,
                    processing_time_secs: started.elapsed().as_secs_f64(),
                    document_stats: DocumentStats::default(),
                    error_message: format!("{e:#}"),
                    result_path: None,
                }
            }
        }
    }

    async fn try_process(&self, path: &Path, client: &dyn LlmClient) -> Result<ProcessingResult> {
        let doc = self.load_document(path)?;
        if doc.pages.is_empty() {
            return Err(anyhow!("document has no pages"));
        }

        let (facts, chunk_count) = self.extract_facts(&doc);
        tracing::info!(
            document = %path.display(),
            pages = doc.pages.len(),
            facts = facts.len(),
            "extracted facts"
        );

        let summary = self
            .generate_summary(&doc, &facts, chunk_count, client)
            .await;
        let validator = CitationValidator::with_config(&doc.pages, self.options.validator.clone());

        let mut report = validator.validate(&summary);
        let summary = if report.invalid_citations > 0
            || !report.orphaned_citations.is_empty()
            || !report.missing_citations.is_empty()
        {
            let corrected = validator.auto_correct(&summary);
            report = validator.validate(&corrected);
            corrected
        } else {
            summary
        };

        let result_path = self.persist(path, &summary, &report)?;

        Ok(ProcessingResult {
            success: true,
            document_stats: DocumentStats {
                pages: doc.pages.len(),
                characters: doc.total_chars(),
                facts_extracted: facts.len(),
                citations_created: summary.citations.len(),
            },
            summary: Some(summary),
            validation_report: Some(report),
            processing_time_secs: 0.0,
            error_message: String::new(),
            result_path: Some(result_path),
        })
    }

    /// Generate the summary artifact for already-extracted facts.
    pub async fn generate_summary(
        &self,
        doc: &DocumentText,
        facts: &[Fact],
        chunk_count: Option<usize>,
        client: &dyn LlmClient,
    ) -> trustlens_rag::Summary {
        let mut index = FactIndex::new();
        index.index_facts(facts, Some(&doc.document_id));

        let generator = SummaryGenerator::new(&index, &self.categorizer, client);
        let document_name = Path::new(&doc.source_path)
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| doc.document_id.clone());
        let mut summary = generator.generate(&document_name, facts).await;

        summary.meta.chunks = chunk_count;
        for (name, stats) in self.categorizer.category_summary(facts) {
            summary.meta.categories.insert(
                name,
                trustlens_rag::CategoryCounts {
                    count: stats.count,
                    importance: stats.importance,
                },
            );
        }
        summary
    }

    fn persist(
        &self,
        source: &Path,
        summary: &trustlens_rag::Summary,
        report: &trustlens_rag::ValidationReport,
    ) -> Result<PathBuf> {
        std::fs::create_dir_all(&self.options.output_dir)?;
        let stamp = chrono::Utc::now().format("%Y%m%d_%H%M%S");
        let out_path = self
            .options
            .output_dir
            .join(format!("{}_rag_{stamp}.json", document_id(source)));
        std::fs::write(&out_path, serde_json::to_string_pretty(summary)?)?;

        if let Some(ledger) = &self.ledger {
            let valid_ratio = if report.total_citations > 0 {
                report.valid_citations as f64 / report.total_citations as f64
            } else {
                1.0
            };
            let record = ProcessingRecord {
                document: source.to_string_lossy().to_string(),
                processing_type: "rag_summary".to_string(),
                result_path: out_path.to_string_lossy().to_string(),
                recorded_at: chrono::Utc::now(),
                metadata: serde_json::json!({
                    "citations_count": summary.citations.len(),
                    "sections_count": summary.summary.sections.len(),
                    "processing_method": summary.meta.processing_method,
                    "validation_score": valid_ratio,
                }),
            };
            if let Err(e) = ledger.append(&record) {
                tracing::warn!(error = %e, "failed to append ledger record");
            }
        }

        Ok(out_path)
    }

    /// Process a batch of documents sequentially, one result per input.
    pub async fn process_batch(
        &self,
        paths: &[PathBuf],
        client: &dyn LlmClient,
    ) -> Vec<ProcessingResult> {
        let mut results = Vec::with_capacity(paths.len());
        for path in paths {
            tracing::info!(document = %path.display(), "batch: processing");
            results.push(self.process_document(path, client).await);
        }
        results
    }
}

fn document_id(path: &Path) -> String {
    path.file_stem()
        .map(|s| s.to_string_lossy().to_string())
        .unwrap_or_else(|| "doc".to_string())
}
