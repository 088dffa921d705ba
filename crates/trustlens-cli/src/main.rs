//! Trustlens CLI
//!
//! Unified command-line interface for:
//! - Processing trust documents into citation-backed summaries
//! - Inspecting chunks, facts and concept categories
//! - Validating and repairing citations in existing summaries
//! - Managing the page-text cache and processing history

use std::path::PathBuf;

use anyhow::{anyhow, Context, Result};
use clap::{Parser, Subcommand};
use colored::Colorize;

use trustlens_rag::{CitationValidator, LlmClient, Summary, TemplateClient};

mod pipeline;

use pipeline::{PipelineOptions, ProcessingResult, TrustProcessor};

#[derive(Parser)]
#[command(name = "trustlens")]
#[command(
    author,
    version,
    about = "Trustlens: citation-accurate summaries of trust documents"
)]
struct Cli {
    /// Generate offline with the deterministic template renderer instead
    /// of a hosted model.
    #[arg(long, global = true)]
    offline: bool,

    /// Disable the page-text cache.
    #[arg(long, global = true)]
    no_cache: bool,

    /// Output directory for summary artifacts.
    #[arg(long, default_value = "results", global = true)]
    out: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Process a document into a validated, citation-backed summary.
    Process {
        /// Input document (PDF, or plain text with form-feed page breaks)
        input: PathBuf,
    },

    /// Process every document in a directory.
    Batch {
        /// Directory to scan for .pdf and .txt documents
        dir: PathBuf,
    },

    /// Show how a document would be chunked.
    Chunk {
        input: PathBuf,
        /// Dump the chunks as JSON instead of a summary listing
        #[arg(long)]
        json: bool,
    },

    /// Extract and rank facts from a document.
    Facts {
        input: PathBuf,
        /// Show only the top N facts
        #[arg(long, default_value_t = 20)]
        top: usize,
    },

    /// Show the concept-category distribution of a document's facts.
    Categories {
        input: PathBuf,
    },

    /// Validate (and optionally repair) citations in an existing summary.
    Validate {
        /// Summary JSON produced by `process`
        summary: PathBuf,
        /// The source document the summary cites
        input: PathBuf,
        /// Write a repaired summary next to the input
        #[arg(long)]
        fix: bool,
    },

    /// Page-text cache maintenance.
    Cache {
        #[command(subcommand)]
        command: CacheCommands,
    },

    /// List recorded processing runs.
    History,
}

#[derive(Subcommand)]
enum CacheCommands {
    /// Show cache statistics.
    Stats,
    /// Remove all cached extractions.
    Clear,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .init();

    let cli = Cli::parse();

    let options = PipelineOptions {
        output_dir: cli.out.clone(),
        cache_dir: if cli.no_cache {
            None
        } else {
            Some(PathBuf::from("page_cache"))
        },
        ledger_path: Some(cli.out.join("ledger.jsonl")),
        ..Default::default()
    };
    let processor = TrustProcessor::new(options)?;

    match cli.command {
        Commands::Process { input } => {
            let client = build_client(cli.offline)?;
            let result = processor.process_document(&input, client.as_ref()).await;
            print_result(&input, &result);
            if !result.success {
                std::process::exit(1);
            }
        }

        Commands::Batch { dir } => {
            let paths = collect_documents(&dir)?;
            if paths.is_empty() {
                return Err(anyhow!("no documents found in {}", dir.display()));
            }
            println!("Processing {} documents...", paths.len());
            let client = build_client(cli.offline)?;
            let results = processor.process_batch(&paths, client.as_ref()).await;

            for (path, result) in paths.iter().zip(&results) {
                print_result(path, result);
            }
            let ok = results.iter().filter(|r| r.success).count();
            let total_time: f64 = results.iter().map(|r| r.processing_time_secs).sum();
            println!();
            println!("{}", "Batch complete".bold());
            println!("  successful: {ok}/{}", results.len());
            println!("  total time: {total_time:.1}s");
        }

        Commands::Chunk { input, json } => {
            let doc = processor.load_document(&input)?;
            let chunks = processor.chunker().chunk_document(&doc.pages);
            if json {
                println!("{}", trustlens_ingest::chunks_to_json(&chunks)?);
                return Ok(());
            }
            println!("{} chunks from {} pages:", chunks.len(), doc.pages.len());
            for (i, chunk) in chunks.iter().enumerate() {
                println!();
                println!("{}", format!("Chunk {}", i + 1).bold());
                println!("  type: {:?}", chunk.chunk_type);
                println!("  pages: {}-{}", chunk.start_page, chunk.end_page);
                println!("  size: {} chars", chunk.text.len());
                if !chunk.section_headers.is_empty() {
                    println!("  sections: {}", chunk.section_headers.join(", "));
                }
            }
        }

        Commands::Facts { input, top } => {
            let doc = processor.load_document(&input)?;
            let (facts, _) = processor.extract_facts(&doc);
            println!("{} unique facts (top {}):", facts.len(), top.min(facts.len()));
            for (i, fact) in facts.iter().take(top).enumerate() {
                println!();
                println!(
                    "{} [{}] (confidence: {:.2})",
                    format!("{}.", i + 1).bold(),
                    fact.fact_type.cyan(),
                    fact.confidence
                );
                println!("   Page {}: {}", fact.page, fact.statement);
                if !fact.entities.is_empty() {
                    let shown: Vec<&str> =
                        fact.entities.iter().take(5).map(|s| s.as_str()).collect();
                    println!("   Entities: {}", shown.join(", "));
                }
            }
        }

        Commands::Categories { input } => {
            let doc = processor.load_document(&input)?;
            let (facts, _) = processor.extract_facts(&doc);
            let summary = processor.categorizer().category_summary(&facts);
            println!("Category distribution ({} facts):", facts.len());
            for (name, stats) in summary {
                println!();
                println!("{} ({} facts)", name.bold(), stats.count);
                println!("  {}", stats.description);
                println!(
                    "  pages: {:?}  avg confidence: {:.2}  importance: {:.2}",
                    stats.pages, stats.avg_confidence, stats.importance
                );
            }
        }

        Commands::Validate { summary, input, fix } => {
            let doc = processor.load_document(&input)?;
            let text = std::fs::read_to_string(&summary)
                .with_context(|| format!("reading {}", summary.display()))?;
            let parsed: Summary =
                serde_json::from_str(&text).context("summary JSON has unexpected shape")?;

            let validator = CitationValidator::new(&doc.pages);
            let report = validator.validate(&parsed);

            println!("{}", "Citation validation".bold());
            println!("  total: {}", report.total_citations);
            println!("  valid: {}", format!("{}", report.valid_citations).green());
            println!("  invalid: {}", format!("{}", report.invalid_citations).red());
            println!("  orphaned: {}", report.orphaned_citations.len());
            println!("  missing: {}", report.missing_citations.len());
            for correction in report.corrected_citations.iter().take(5) {
                println!(
                    "  correctable {}: page {} -> {}",
                    correction.id, correction.original.page, correction.corrected.page
                );
            }

            if fix {
                let corrected = validator.auto_correct(&parsed);
                let out_path = summary.with_extension("corrected.json");
                std::fs::write(&out_path, serde_json::to_string_pretty(&corrected)?)?;
                let meta = corrected.meta.citation_validation.as_ref();
                println!();
                println!("Repaired summary written to {}", out_path.display());
                if let Some(meta) = meta {
                    println!(
                        "  corrected: {}  removed: {}  placeholders: {}",
                        meta.corrected, meta.removed, meta.placeholders_added
                    );
                }
            }
        }

        Commands::Cache { command } => {
            let cache = trustlens_storage::PageCache::open("page_cache")?;
            match command {
                CacheCommands::Stats => {
                    let stats = cache.stats();
                    println!("{}", "Page-text cache".bold());
                    println!("  entries: {}", stats.entries);
                    println!("  pages: {}", stats.total_pages);
                    println!("  characters: {}", stats.total_chars);
                }
                CacheCommands::Clear => {
                    let removed = cache.clear();
                    println!("Removed {removed} cached extractions");
                }
            }
        }

        Commands::History => {
            let ledger = trustlens_storage::ProcessingLedger::open(cli.out.join("ledger.jsonl"))?;
            let records = ledger.records()?;
            if records.is_empty() {
                println!("No processing runs recorded.");
            }
            for record in records {
                println!(
                    "{}  {}  {} -> {}",
                    record.recorded_at.format("%Y-%m-%d %H:%M:%S"),
                    record.processing_type,
                    record.document,
                    record.result_path
                );
            }
        }
    }

    Ok(())
}

/// Select the generation client: hosted provider from the environment, or
/// the deterministic offline renderer.
fn build_client(offline: bool) -> Result<Box<dyn LlmClient>> {
    if offline {
        return Ok(Box::new(TemplateClient::new()));
    }

    #[cfg(any(feature = "llm-anthropic", feature = "llm-openai"))]
    {
        match trustlens_rag::llm::providers::client_from_env() {
            Ok(client) => return Ok(client),
            Err(e) => {
                eprintln!(
                    "{} {e}; falling back to offline generation",
                    "warning:".yellow().bold()
                );
                return Ok(Box::new(TemplateClient::new()));
            }
        }
    }

    #[allow(unreachable_code)]
    Ok(Box::new(TemplateClient::new()))
}

fn collect_documents(dir: &std::path::Path) -> Result<Vec<PathBuf>> {
    let mut paths = Vec::new();
    for entry in walkdir::WalkDir::new(dir).max_depth(2) {
        let entry = entry?;
        if !entry.file_type().is_file() {
            continue;
        }
        let ext = entry
            .path()
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| e.to_ascii_lowercase());
        if matches!(ext.as_deref(), Some("pdf") | Some("txt")) {
            paths.push(entry.path().to_path_buf());
        }
    }
    paths.sort();
    Ok(paths)
}

fn print_result(path: &std::path::Path, result: &ProcessingResult) {
    println!();
    if result.success {
        println!(
            "{} {} ({:.1}s)",
            "ok".green().bold(),
            path.display(),
            result.processing_time_secs
        );
        println!(
            "  pages: {}  facts: {}  citations: {}",
            result.document_stats.pages,
            result.document_stats.facts_extracted,
            result.document_stats.citations_created
        );
        if let Some(report) = &result.validation_report {
            println!(
                "  citations valid: {}/{}",
                report.valid_citations, report.total_citations
            );
        }
        if let Some(out) = &result.result_path {
            println!("  summary: {}", out.display());
        }
    } else {
        println!("{} {}", "failed".red().bold(), path.display());
        println!("  {}", result.error_message);
    }
}
