//! Semantic retrieval index over extracted facts.
//!
//! Deterministic token-hash embeddings (sign-hashed FNV-1a into a fixed
//! dimension, L2-normalized) with an HNSW ANN structure for retrieval.
//! Determinism matters here: repeated identical queries against an
//! unchanged index must return identical results, because citation
//! allocation order depends on retrieval order.
//!
//! The index is document-scoped: [`FactIndex::index_facts`] clears any
//! previous contents before indexing, so re-processing a document never
//! produces duplicate hits. Once built, the index is read-only; concurrent
//! retrieval during a document's generation phase needs no locking beyond
//! `&self`.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use trustlens_ingest::Fact;

pub const EMBED_DIM: usize = 128;

/// Section topic queries mirrored from the generation layer, for
/// section-scoped retrieval without a generator in scope.
const SECTION_QUERIES: &[(&str, &str)] = &[
    (
        "essential_info",
        "trust name grantor settlor trustee date created established agreement",
    ),
    (
        "how_it_works",
        "administration management trustee powers authority discretion operate function",
    ),
    (
        "important_provisions",
        "restrictions conditions special terms limitations requirements prohibitions",
    ),
    (
        "distributions",
        "beneficiary distribution income principal payment receive inherit allocation",
    ),
];

// ============================================================================
// Embeddings
// ============================================================================

fn fnv1a64(s: &str) -> u64 {
    let mut h: u64 = 14695981039346656037;
    for b in s.as_bytes() {
        h ^= *b as u64;
        h = h.wrapping_mul(1099511628211);
    }
    h
}

fn tokenize(text: &str) -> Vec<String> {
    text.to_lowercase()
        .split(|c: char| !c.is_alphanumeric())
        .filter(|t| t.len() > 1)
        .map(String::from)
        .collect()
}

/// Deterministic token-hash embedding: each token hashes to a dimension and
/// a sign; the vector is L2-normalized.
pub fn embed_text(text: &str) -> [f32; EMBED_DIM] {
    let mut v = [0.0f32; EMBED_DIM];
    for t in tokenize(text) {
        let h = fnv1a64(&t);
        let idx = (h % (EMBED_DIM as u64)) as usize;
        let sign = if ((h >> 32) & 1) == 0 { 1.0 } else { -1.0 };
        v[idx] += sign;
    }
    let mut norm2 = 0.0f32;
    for x in v {
        norm2 += x * x;
    }
    if norm2 > 0.0 {
        let inv = 1.0f32 / norm2.sqrt();
        for x in v.iter_mut() {
            *x *= inv;
        }
    }
    v
}

fn dot(a: &[f32; EMBED_DIM], b: &[f32; EMBED_DIM]) -> f32 {
    let mut s = 0.0f32;
    for i in 0..EMBED_DIM {
        s += a[i] * b[i];
    }
    s
}

// ============================================================================
// Index types
// ============================================================================

/// Metadata carried with each indexed fact, used for filtering and for
/// reconstructing facts on the retrieval side.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FactMetadata {
    pub fact_type: String,
    pub page: usize,
    pub char_position: usize,
    pub confidence: f64,
    pub entities: Vec<String>,
    pub fact_text: String,
    pub document_id: Option<String>,
}

/// A retrieval hit, ordered by descending similarity in [0, 1].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchHit {
    pub id: String,
    pub text: String,
    pub metadata: FactMetadata,
    pub score: f32,
}

/// Metadata filters applied to search results.
#[derive(Debug, Clone, Default)]
pub struct SearchFilter {
    pub fact_types: Option<Vec<String>>,
    pub page: Option<usize>,
}

impl SearchFilter {
    pub fn by_fact_types(types: &[&str]) -> Self {
        Self {
            fact_types: Some(types.iter().map(|s| s.to_string()).collect()),
            page: None,
        }
    }

    pub fn by_page(page: usize) -> Self {
        Self {
            fact_types: None,
            page: Some(page),
        }
    }

    fn accepts(&self, meta: &FactMetadata) -> bool {
        if let Some(types) = &self.fact_types {
            if !types.iter().any(|t| t == &meta.fact_type) {
                return false;
            }
        }
        if let Some(page) = self.page {
            if meta.page != page {
                return false;
            }
        }
        true
    }
}

struct IndexEntry {
    fact_id: String,
    /// The text that was embedded: statement plus context.
    text: String,
    metadata: FactMetadata,
    vector: [f32; EMBED_DIM],
}

/// Per-document semantic index over facts.
pub struct FactIndex {
    document_id: Option<String>,
    entries: Vec<IndexEntry>,
    ann: Option<AnnIndex>,
}

struct AnnIndex {
    hnsw: hnsw_rs::prelude::Hnsw<'static, f32, hnsw_rs::prelude::DistL2>,
}

impl Default for FactIndex {
    fn default() -> Self {
        Self::new()
    }
}

impl FactIndex {
    pub fn new() -> Self {
        Self {
            document_id: None,
            entries: Vec::new(),
            ann: None,
        }
    }

    /// Index a document's facts, replacing any previous contents.
    ///
    /// Returns the number of facts indexed. Duplicate fact ids within the
    /// batch are skipped (first wins).
    pub fn index_facts(&mut self, facts: &[Fact], document_id: Option<&str>) -> usize {
        self.clear();
        self.document_id = document_id.map(String::from);

        let mut seen = std::collections::HashSet::new();
        for fact in facts {
            if !seen.insert(fact.fact_id.clone()) {
                continue;
            }
            let text = format!("{}\n\nContext: {}", fact.statement, fact.context);
            let vector = embed_text(&text);
            self.entries.push(IndexEntry {
                fact_id: fact.fact_id.clone(),
                text,
                metadata: FactMetadata {
                    fact_type: fact.fact_type.clone(),
                    page: fact.page,
                    char_position: fact.char_position,
                    confidence: fact.confidence,
                    entities: fact.entities.clone(),
                    fact_text: fact.statement.clone(),
                    document_id: self.document_id.clone(),
                },
                vector,
            });
        }

        self.ann = self.build_ann();
        tracing::debug!(
            indexed = self.entries.len(),
            document = self.document_id.as_deref().unwrap_or("-"),
            "indexed facts"
        );
        self.entries.len()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
        self.ann = None;
        self.document_id = None;
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn document_id(&self) -> Option<&str> {
        self.document_id.as_deref()
    }

    fn build_ann(&self) -> Option<AnnIndex> {
        if self.entries.is_empty() {
            return None;
        }
        // HNSW params (conservative defaults):
        // - `m`: max connections per layer
        // - `ef_construction`: construction search width
        let m: usize = 16;
        let ef_construction: usize = 200;
        let nb_elem = self.entries.len();
        let max_layer = 16.min((nb_elem as f32).ln().trunc() as usize).max(1);

        let hnsw = hnsw_rs::prelude::Hnsw::<f32, hnsw_rs::prelude::DistL2>::new(
            m,
            nb_elem,
            max_layer,
            ef_construction,
            hnsw_rs::prelude::DistL2 {},
        );
        for (i, entry) in self.entries.iter().enumerate() {
            hnsw.insert((&entry.vector[..], i));
        }
        Some(AnnIndex { hnsw })
    }

    /// Semantic search over the indexed facts.
    ///
    /// An empty query degrades to a metadata scan ordered by confidence —
    /// used by the by-page and by-type accessors. Results are deterministic
    /// for identical queries against an unchanged index.
    pub fn search(&self, query: &str, top_k: usize, filter: Option<&SearchFilter>) -> Vec<SearchHit> {
        if self.entries.is_empty() || top_k == 0 {
            return Vec::new();
        }

        if query.trim().is_empty() {
            return self.scan_by_metadata(top_k, filter);
        }

        let qv = embed_text(query);

        // With a filter, ANN over-fetch can starve the result set; a linear
        // scan over a per-document fact set is cheap and exact.
        let mut scored: Vec<(f32, usize)> = if filter.is_some() {
            self.entries
                .iter()
                .enumerate()
                .filter(|(_, e)| filter.map(|f| f.accepts(&e.metadata)).unwrap_or(true))
                .map(|(i, e)| (dot(&qv, &e.vector), i))
                .collect()
        } else if let Some(ann) = &self.ann {
            let k = top_k.saturating_mul(4).clamp(1, 200).min(self.entries.len());
            let ef_search = 64;
            let q = qv.to_vec();
            let mut out = Vec::new();
            for n in ann.hnsw.search(&q, k, ef_search) {
                let idx = n.d_id;
                if idx >= self.entries.len() {
                    continue;
                }
                out.push((dot(&qv, &self.entries[idx].vector), idx));
            }
            out
        } else {
            Vec::new()
        };

        scored.sort_by(|(sa, ia), (sb, ib)| sb.total_cmp(sa).then_with(|| ia.cmp(ib)));
        scored.truncate(top_k);

        scored
            .into_iter()
            .map(|(score, i)| {
                let entry = &self.entries[i];
                SearchHit {
                    id: entry.fact_id.clone(),
                    text: entry.text.clone(),
                    metadata: entry.metadata.clone(),
                    // Normalized vectors: dot product is cosine similarity,
                    // mapped from [-1, 1] into [0, 1].
                    score: ((score + 1.0) / 2.0).clamp(0.0, 1.0),
                }
            })
            .collect()
    }

    fn scan_by_metadata(&self, top_k: usize, filter: Option<&SearchFilter>) -> Vec<SearchHit> {
        let mut hits: Vec<(f64, usize)> = self
            .entries
            .iter()
            .enumerate()
            .filter(|(_, e)| filter.map(|f| f.accepts(&e.metadata)).unwrap_or(true))
            .map(|(i, e)| (e.metadata.confidence, i))
            .collect();
        hits.sort_by(|(ca, ia), (cb, ib)| cb.total_cmp(ca).then_with(|| ia.cmp(ib)));
        hits.truncate(top_k);
        hits.into_iter()
            .map(|(_, i)| {
                let entry = &self.entries[i];
                SearchHit {
                    id: entry.fact_id.clone(),
                    text: entry.text.clone(),
                    metadata: entry.metadata.clone(),
                    score: 0.0,
                }
            })
            .collect()
    }

    /// Search facts relevant to one of the standard summary sections,
    /// combining the fixed topic query with a fact-type filter.
    pub fn search_by_section(&self, section_id: &str) -> Vec<SearchHit> {
        let query = SECTION_QUERIES
            .iter()
            .find(|(id, _)| *id == section_id)
            .map(|(_, q)| *q)
            .unwrap_or(section_id);

        let filter = match section_id {
            "essential_info" => Some(SearchFilter::by_fact_types(&[
                "trust_creation",
                "trustee_appointment",
                "grantor_identification",
            ])),
            "how_it_works" => Some(SearchFilter::by_fact_types(&[
                "trustee_power",
                "authority_grant",
                "provision",
            ])),
            "important_provisions" => Some(SearchFilter::by_fact_types(&[
                "condition",
                "restriction",
                "exception",
                "tax_provision",
            ])),
            "distributions" => Some(SearchFilter::by_fact_types(&[
                "distribution",
                "beneficiary_designation",
                "death_trigger",
                "termination",
            ])),
            _ => None,
        };

        self.search(query, 20, filter.as_ref())
    }

    /// Facts similar to a given fact text.
    pub fn find_similar(&self, fact_text: &str, top_k: usize) -> Vec<SearchHit> {
        self.search(fact_text, top_k, None)
    }

    /// All indexed facts from a page, ordered by confidence.
    pub fn facts_by_page(&self, page: usize) -> Vec<SearchHit> {
        self.search("", 100, Some(&SearchFilter::by_page(page)))
    }

    /// All indexed facts of a type, ordered by confidence.
    pub fn facts_by_type(&self, fact_type: &str) -> Vec<SearchHit> {
        self.search("", 100, Some(&SearchFilter::by_fact_types(&[fact_type])))
    }

    /// Expand a hit set with related facts. Bounded: only the first few
    /// seeds are expanded, `expansion_factor` related facts each.
    pub fn expand_context(&self, hits: &[SearchHit], expansion_factor: usize) -> Vec<SearchHit> {
        let mut expanded: Vec<SearchHit> = hits.to_vec();
        let mut seen: std::collections::HashSet<String> =
            hits.iter().map(|h| h.id.clone()).collect();

        for hit in hits.iter().take(5) {
            for similar in self.find_similar(&hit.text, expansion_factor) {
                if seen.insert(similar.id.clone()) {
                    expanded.push(similar);
                }
            }
        }
        expanded
    }

    /// Index statistics: total count and fact-type distribution.
    pub fn stats(&self) -> IndexStats {
        let mut fact_types: BTreeMap<String, usize> = BTreeMap::new();
        for entry in &self.entries {
            *fact_types.entry(entry.metadata.fact_type.clone()).or_default() += 1;
        }
        IndexStats {
            total_facts: self.entries.len(),
            fact_types,
            document_id: self.document_id.clone(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexStats {
    pub total_facts: usize,
    pub fact_types: BTreeMap<String, usize>,
    pub document_id: Option<String>,
}
