//! Concept categorization for extracted facts.
//!
//! A fixed taxonomy of trust-law concepts, each with keyword and pattern
//! lists plus an importance weight. Categorization is idempotent: results
//! are memoized per `fact_id`, so the same fact always scores the same.

use std::collections::{BTreeMap, HashMap};

use parking_lot::RwLock;
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::extraction::{Fact, PatternError};

/// Minimum score for a category to be considered relevant.
const RELEVANCE_THRESHOLD: f64 = 0.1;
/// Bonus applied when the fact's own type matches the category name.
const TYPE_MATCH_BONUS: f64 = 0.3;
/// Categories reported per fact.
const TOP_CATEGORIES: usize = 3;

// ============================================================================
// Categories
// ============================================================================

/// A semantic concept category with its matching vocabulary.
pub struct ConceptCategory {
    pub name: &'static str,
    pub description: &'static str,
    keywords: &'static [&'static str],
    patterns: Vec<Regex>,
    pub importance: f64,
}

impl ConceptCategory {
    /// Match score for a text against this category, scaled by the
    /// category's importance.
    fn matches(&self, text: &str) -> f64 {
        let lower = text.to_lowercase();
        let mut score = 0.0;

        if !self.keywords.is_empty() {
            let hits = self.keywords.iter().filter(|kw| lower.contains(*kw)).count();
            score += (hits as f64 / self.keywords.len() as f64) * 0.5;
        }
        if !self.patterns.is_empty() {
            let hits = self.patterns.iter().filter(|p| p.is_match(text)).count();
            score += (hits as f64 / self.patterns.len() as f64) * 0.5;
        }

        score * self.importance
    }
}

struct CategorySpec {
    name: &'static str,
    description: &'static str,
    keywords: &'static [&'static str],
    patterns: &'static [&'static str],
    importance: f64,
}

const CATEGORY_SPECS: &[CategorySpec] = &[
    CategorySpec {
        name: "trust_creation",
        description: "Trust establishment and formation",
        keywords: &["established", "created", "dated", "made", "executed", "agreement"],
        patterns: &[
            r"trust.*(?:dated|made|executed|created).*\d{4}",
            r"(?:agreement|trust).*(?:is|was).*(?:made|created)",
            r"(?:established|formation).*trust",
        ],
        importance: 1.0,
    },
    CategorySpec {
        name: "grantor_settlor",
        description: "Grantor/Settlor identity and provisions",
        keywords: &["grantor", "settlor", "trustor", "creator", "establisher"],
        patterns: &[
            r"(?:grantor|settlor|trustor).*(?:is|was|named)",
            r"I,?\s+[A-Z][a-z]+.*(?:grantor|settlor)",
            r"(?:created|established)\s+by\s+[A-Z][a-z]+",
        ],
        importance: 0.95,
    },
    CategorySpec {
        name: "trustee_appointment",
        description: "Trustee designation and succession",
        keywords: &["trustee", "successor", "co-trustee", "appointment", "resign"],
        patterns: &[
            r"(?:trustee|successor trustee).*(?:shall be|is|appointed)",
            r"(?:appoint|designate).*trustee",
            r"(?:removal|resignation).*trustee",
        ],
        importance: 0.9,
    },
    CategorySpec {
        name: "trustee_powers",
        description: "Powers and authorities granted to trustees",
        keywords: &["power", "authority", "discretion", "may", "shall", "authorized"],
        patterns: &[
            r"trustee.*(?:may|shall|is authorized to)",
            r"(?:power|authority).*trustee",
            r"trustee.*discretion",
        ],
        importance: 0.85,
    },
    CategorySpec {
        name: "beneficiary_designation",
        description: "Beneficiary identification and classification",
        keywords: &["beneficiary", "beneficiaries", "heir", "descendant", "children"],
        patterns: &[
            r"(?:primary|contingent).*beneficiar",
            r"beneficiar.*(?:is|are|shall be)",
            r"(?:children|descendants).*beneficiar",
        ],
        importance: 0.95,
    },
    CategorySpec {
        name: "distribution_rules",
        description: "Rules for distributions and payments",
        keywords: &["distribute", "distribution", "payment", "income", "principal", "receive"],
        patterns: &[
            r"(?:distribute|pay).*(?:income|principal)",
            r"(?:mandatory|discretionary).*distribution",
            r"(?:upon|at).*(?:age|death).*(?:distribute|receive)",
        ],
        importance: 0.9,
    },
    CategorySpec {
        name: "distribution_timing",
        description: "When distributions occur",
        keywords: &["age", "death", "upon", "when", "reaching", "attaining"],
        patterns: &[
            r"(?:upon|at).*age.*\d+",
            r"(?:upon|after).*death",
            r"when.*(?:reaches|attains).*age",
        ],
        importance: 0.85,
    },
    CategorySpec {
        name: "tax_provisions",
        description: "Tax-related provisions and planning",
        keywords: &["tax", "gst", "estate", "gift", "exemption", "deduction", "marital"],
        patterns: &[
            r"(?:estate|gift|GST).*tax",
            r"tax.*(?:exemption|deduction|credit)",
            r"marital.*deduction",
        ],
        importance: 0.8,
    },
    CategorySpec {
        name: "spendthrift_protection",
        description: "Asset protection and spendthrift provisions",
        keywords: &["spendthrift", "creditor", "protection", "attachment", "alienation"],
        patterns: &[
            r"spendthrift.*(?:provision|trust|protection)",
            r"(?:creditor|attachment).*protection",
            r"(?:cannot|may not).*(?:assign|alienate)",
        ],
        importance: 0.75,
    },
    CategorySpec {
        name: "termination_conditions",
        description: "Trust termination conditions",
        keywords: &["terminate", "termination", "end", "conclusion", "final"],
        patterns: &[
            r"trust.*(?:shall|will).*terminate",
            r"(?:upon|at).*termination",
            r"final.*distribution",
        ],
        importance: 0.8,
    },
    CategorySpec {
        name: "withdrawal_rights",
        description: "Rights to withdraw assets",
        keywords: &["withdrawal", "withdraw", "crummey", "annual exclusion"],
        patterns: &[
            r"(?:right|power).*withdraw",
            r"annual.*(?:exclusion|withdrawal)",
            r"crummey.*(?:power|withdrawal)",
        ],
        importance: 0.75,
    },
    CategorySpec {
        name: "administrative_provisions",
        description: "Trust administration and management",
        keywords: &["administration", "accounting", "report", "manage", "invest"],
        patterns: &[
            r"(?:administration|management).*trust",
            r"trustee.*(?:account|report)",
            r"(?:invest|investment).*(?:power|authority)",
        ],
        importance: 0.7,
    },
    CategorySpec {
        name: "amendment_modification",
        description: "Amendment and modification provisions",
        keywords: &["amend", "modify", "revoke", "irrevocable", "change"],
        patterns: &[
            r"(?:amend|modify).*(?:trust|agreement)",
            r"(?:irrevocable|revocable).*trust",
            r"(?:cannot|may not).*(?:amend|modify|revoke)",
        ],
        importance: 0.75,
    },
    CategorySpec {
        name: "special_provisions",
        description: "Special or unique provisions",
        keywords: &["special", "specific", "particular", "unique", "exception"],
        patterns: &[
            r"(?:special|specific).*(?:provision|instruction)",
            r"(?:exception|except).*(?:to|from)",
            r"notwithstanding",
        ],
        importance: 0.65,
    },
    CategorySpec {
        name: "definitions",
        description: "Defined terms and definitions",
        keywords: &["means", "definition", "defined", "shall mean", "includes"],
        patterns: &[
            r#""[^"]+".*means"#,
            r"(?:defined|definition).*(?:as|means)",
            r"for purposes of.*(?:means|shall mean)",
        ],
        importance: 0.6,
    },
];

// ============================================================================
// Categorizer
// ============================================================================

/// Per-category statistics over a fact set.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CategorySummary {
    pub description: String,
    pub count: usize,
    pub pages: Vec<usize>,
    pub avg_confidence: f64,
    pub importance: f64,
}

/// Categorizes facts against the trust-law concept taxonomy.
pub struct ConceptCategorizer {
    categories: Vec<ConceptCategory>,
    // Memo cache keyed by fact_id: same fact always yields the same
    // categorization.
    cache: RwLock<HashMap<String, Vec<(String, f64)>>>,
}

impl ConceptCategorizer {
    pub fn new() -> Result<Self, PatternError> {
        let mut categories = Vec::with_capacity(CATEGORY_SPECS.len());
        for spec in CATEGORY_SPECS {
            let patterns = spec
                .patterns
                .iter()
                .map(|p| {
                    Regex::new(&format!("(?i){p}")).map_err(|source| PatternError::BadPattern {
                        name: spec.name,
                        source,
                    })
                })
                .collect::<Result<Vec<_>, _>>()?;
            categories.push(ConceptCategory {
                name: spec.name,
                description: spec.description,
                keywords: spec.keywords,
                patterns,
                importance: spec.importance,
            });
        }
        Ok(Self {
            categories,
            cache: RwLock::new(HashMap::new()),
        })
    }

    pub fn categories(&self) -> &[ConceptCategory] {
        &self.categories
    }

    /// Score a fact against the taxonomy: relevant categories above the
    /// threshold, best first, at most three.
    pub fn categorize_fact(&self, fact: &Fact) -> Vec<(String, f64)> {
        if let Some(cached) = self.cache.read().get(&fact.fact_id) {
            return cached.clone();
        }

        let text = format!("{} {}", fact.statement, fact.context);
        let mut scores: Vec<(String, f64)> = Vec::new();
        for category in &self.categories {
            let mut score = category.matches(&text);
            if !fact.fact_type.is_empty() && fact.fact_type.contains(category.name) {
                score = (score + TYPE_MATCH_BONUS).min(1.0);
            }
            if score > RELEVANCE_THRESHOLD {
                scores.push((category.name.to_string(), score));
            }
        }

        scores.sort_by(|a, b| b.1.total_cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
        scores.truncate(TOP_CATEGORIES);

        self.cache
            .write()
            .insert(fact.fact_id.clone(), scores.clone());
        scores
    }

    /// Group facts by primary category. Facts matching nothing land in
    /// `uncategorized`; empty groups are dropped.
    pub fn categorize_facts(&self, facts: &[Fact]) -> BTreeMap<String, Vec<Fact>> {
        let mut grouped: BTreeMap<String, Vec<Fact>> = BTreeMap::new();
        for fact in facts {
            let categories = self.categorize_fact(fact);
            let key = categories
                .first()
                .map(|(name, _)| name.clone())
                .unwrap_or_else(|| "uncategorized".to_string());
            grouped.entry(key).or_default().push(fact.clone());
        }
        grouped
    }

    pub fn category_importance(&self, category_name: &str) -> f64 {
        self.categories
            .iter()
            .find(|c| c.name == category_name)
            .map(|c| c.importance)
            .unwrap_or(0.5)
    }

    /// Categories relevant to a standard summary section.
    pub fn categories_for_section(&self, section_id: &str) -> &'static [&'static str] {
        match section_id {
            "essential_info" => &[
                "trust_creation",
                "grantor_settlor",
                "trustee_appointment",
                "beneficiary_designation",
            ],
            "how_it_works" => &[
                "trustee_powers",
                "administrative_provisions",
                "amendment_modification",
                "withdrawal_rights",
            ],
            "important_provisions" => &[
                "spendthrift_protection",
                "tax_provisions",
                "special_provisions",
                "termination_conditions",
            ],
            "distributions" => &[
                "distribution_rules",
                "distribution_timing",
                "beneficiary_designation",
                "withdrawal_rights",
            ],
            _ => &[],
        }
    }

    /// Facts whose categorization intersects a section's relevant
    /// categories.
    pub fn filter_facts_by_section<'a>(
        &self,
        facts: &'a [Fact],
        section_id: &str,
    ) -> Vec<&'a Fact> {
        let relevant = self.categories_for_section(section_id);
        facts
            .iter()
            .filter(|fact| {
                self.categorize_fact(fact)
                    .iter()
                    .any(|(name, _)| relevant.contains(&name.as_str()))
            })
            .collect()
    }

    /// Overall importance of a fact: its best weighted category score
    /// averaged with its own confidence. Uncategorizable facts fall back to
    /// half their confidence.
    pub fn fact_importance(&self, fact: &Fact) -> f64 {
        let categories = self.categorize_fact(fact);
        if categories.is_empty() {
            return fact.confidence * 0.5;
        }

        let best = categories
            .iter()
            .map(|(name, score)| score * self.category_importance(name))
            .fold(0.0f64, f64::max);

        (best + fact.confidence) / 2.0
    }

    /// Summary statistics per populated category.
    pub fn category_summary(&self, facts: &[Fact]) -> BTreeMap<String, CategorySummary> {
        let grouped = self.categorize_facts(facts);
        let mut summary = BTreeMap::new();

        for (name, group) in grouped {
            if group.is_empty() {
                continue;
            }
            let description = self
                .categories
                .iter()
                .find(|c| c.name == name)
                .map(|c| c.description.to_string())
                .unwrap_or_else(|| "Other provisions".to_string());
            let mut pages: Vec<usize> = group.iter().map(|f| f.page).collect();
            pages.sort_unstable();
            pages.dedup();
            let avg_confidence =
                group.iter().map(|f| f.confidence).sum::<f64>() / group.len() as f64;
            let importance = self.category_importance(&name);
            summary.insert(
                name,
                CategorySummary {
                    description,
                    count: group.len(),
                    pages,
                    avg_confidence,
                    importance,
                },
            );
        }
        summary
    }
}
