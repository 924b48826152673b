//! Evidence merger and relevance gate
//!
//! The core decision component: judges whether knowledge-base
//! evidence is sufficient, invokes the web-search fallback when it
//! is not, then deduplicates, ranks, and truncates the merged
//! evidence set.
//!
//! State machine per request:
//! `START -> KB_QUERIED -> {SUFFICIENT -> DONE,
//!                          INSUFFICIENT -> WEB_QUERIED -> DONE}`
//! No retries happen here; retries belong to the individual clients.

use super::{EvidenceItem, Provenance, RetrievalMode, ScoredPassage};
use crate::websearch::WebSearch;
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::sync::{Arc, OnceLock};
use studyforge_common::config::RetrievalConfig;

/// Characters of normalized text used for the dedup signature
const SIGNATURE_PREFIX_CHARS: usize = 120;

/// Character budget for a KB excerpt in the prompt
const EXCERPT_CHAR_BUDGET: usize = 500;

/// Per-request gathering options
#[derive(Debug, Clone)]
pub struct GatherOptions {
    /// Total evidence budget (1..=10)
    pub max_sources: usize,

    /// Whether web search is enabled for this request
    pub web_enabled: bool,

    /// Invoke web search even when KB evidence is sufficient
    pub force_web_search: bool,

    /// KB retrieval failed upstream (embedding or vector outage);
    /// the gate must go straight to the fallback
    pub kb_unavailable: bool,
}

/// Result of evidence gathering
#[derive(Debug, Clone)]
pub struct MergeOutcome {
    /// Ordered, deduplicated, truncated evidence
    pub evidence: Vec<EvidenceItem>,

    /// Which sources contributed
    pub retrieval_mode: RetrievalMode,

    /// Whether the web client was called at all
    pub web_invoked: bool,

    /// True iff the web client was called and returned >= 1 result
    pub web_search_used: bool,
}

/// Evidence merger with KB-sufficiency gate and web fallback
pub struct EvidenceMerger {
    web: Arc<dyn WebSearch>,
    config: RetrievalConfig,
    web_max_results: usize,
}

impl EvidenceMerger {
    pub fn new(web: Arc<dyn WebSearch>, config: RetrievalConfig, web_max_results: usize) -> Self {
        Self {
            web,
            config,
            web_max_results,
        }
    }

    /// KB evidence is sufficient when the top score clears the
    /// threshold and enough passages came back.
    fn kb_sufficient(&self, kb_hits: &[ScoredPassage]) -> bool {
        if kb_hits.len() < self.config.min_kb_hits {
            return false;
        }
        kb_hits
            .iter()
            .any(|hit| hit.score >= self.config.kb_sufficiency_threshold)
    }

    /// Gather and merge evidence for one question.
    ///
    /// `kb_hits` is the (possibly empty) output of the vector
    /// retrieval client; web search is invoked here when the gate
    /// decides KB evidence is insufficient.
    pub async fn gather(
        &self,
        question: &str,
        kb_hits: Vec<ScoredPassage>,
        opts: &GatherOptions,
    ) -> MergeOutcome {
        let sufficient = !opts.kb_unavailable && self.kb_sufficient(&kb_hits);

        let mut items: Vec<EvidenceItem> = kb_hits
            .iter()
            .map(|hit| EvidenceItem {
                excerpt: truncate_chars(&hit.passage.text, EXCERPT_CHAR_BUDGET),
                source_title: hit.passage.source_title.clone(),
                relevance_score: hit.score,
                provenance: Provenance::Kb,
            })
            .collect();

        let should_search_web =
            opts.web_enabled && (!sufficient || opts.force_web_search);

        let mut web_invoked = false;
        let mut web_result_count = 0usize;

        if should_search_web {
            web_invoked = true;
            studyforge_common::metrics::record_web_fallback();

            match self.web.search(question, self.web_max_results).await {
                Ok(results) => {
                    web_result_count = results.len();
                    items.extend(results.into_iter().map(|r| EvidenceItem {
                        excerpt: r.snippet,
                        source_title: r.title,
                        relevance_score: self.config.web_result_score,
                        provenance: Provenance::Web,
                    }));
                }
                // Web failure never fails the request; the evidence
                // set simply stays KB-only (or empty).
                Err(e) => {
                    tracing::warn!(error = %e, "Web search fallback failed");
                }
            }
        }

        let mut evidence = dedup(items);
        order(&mut evidence);
        evidence.truncate(opts.max_sources);

        let kb_count = evidence
            .iter()
            .filter(|i| i.provenance == Provenance::Kb)
            .count();
        let web_count = evidence.len() - kb_count;

        let retrieval_mode = match (kb_count > 0, web_count > 0) {
            (true, true) => RetrievalMode::Hybrid,
            (true, false) => RetrievalMode::Kb,
            (false, true) => RetrievalMode::WebOnly,
            (false, false) => RetrievalMode::None,
        };

        tracing::debug!(
            kb_hits = kb_count,
            web_hits = web_count,
            mode = retrieval_mode.as_str(),
            web_invoked = web_invoked,
            "Evidence gathered"
        );

        MergeOutcome {
            evidence,
            retrieval_mode,
            web_invoked,
            web_search_used: web_invoked && web_result_count > 0,
        }
    }
}

/// Normalized text signature: case-insensitive, whitespace-collapsed
/// prefix hashed for compact comparison.
pub fn signature(text: &str) -> String {
    static WS: OnceLock<regex_lite::Regex> = OnceLock::new();
    let ws = WS.get_or_init(|| regex_lite::Regex::new(r"\s+").expect("valid pattern"));
    let normalized = ws.replace_all(text.trim(), " ").to_lowercase();
    let prefix: String = normalized.chars().take(SIGNATURE_PREFIX_CHARS).collect();

    let mut hasher = Sha256::new();
    hasher.update(prefix.as_bytes());
    hex::encode(hasher.finalize())
}

/// Deduplicate by signature across both provenances, keeping the
/// higher-scored duplicate. Idempotent: merging a set with itself
/// yields the same set in the same order.
fn dedup(items: Vec<EvidenceItem>) -> Vec<EvidenceItem> {
    let mut kept: Vec<EvidenceItem> = Vec::with_capacity(items.len());
    let mut seen: HashMap<String, usize> = HashMap::new();

    for item in items {
        let key = signature(&item.excerpt);
        match seen.get(&key) {
            Some(&idx) => {
                if item.relevance_score > kept[idx].relevance_score {
                    kept[idx] = item;
                }
            }
            None => {
                seen.insert(key, kept.len());
                kept.push(item);
            }
        }
    }

    kept
}

/// Order by descending relevance; KB wins score ties so WEB items
/// only displace KB items when they strictly outrank them.
fn order(items: &mut [EvidenceItem]) {
    items.sort_by(|a, b| {
        b.relevance_score
            .total_cmp(&a.relevance_score)
            .then_with(|| provenance_rank(a.provenance).cmp(&provenance_rank(b.provenance)))
            .then_with(|| a.source_title.cmp(&b.source_title))
            .then_with(|| a.excerpt.cmp(&b.excerpt))
    });
}

fn provenance_rank(p: Provenance) -> u8 {
    match p {
        Provenance::Kb => 0,
        Provenance::Web => 1,
    }
}

fn truncate_chars(text: &str, budget: usize) -> String {
    if text.chars().count() <= budget {
        text.to_string()
    } else {
        text.chars().take(budget).collect()
    }
}
