//! Evidence model shared across the retrieval pipeline
//!
//! Passages come from the knowledge base, web results from the
//! search fallback; both are flattened into provenance-tagged
//! evidence items that live for the duration of one request.

mod merger;

pub use merger::{EvidenceMerger, GatherOptions, MergeOutcome};

use serde::{Deserialize, Serialize};

/// An indexed knowledge-base passage.
///
/// Immutable once indexed; created by the external ingestion
/// pipeline and owned by the vector-similarity service. The engine
/// only reads these.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Passage {
    /// Stable passage identifier
    pub id: String,

    /// Passage text
    pub text: String,

    /// Subject tag, e.g. "tin_hoc"
    pub subject: Option<String>,

    /// Grade level (3..=12)
    pub grade: Option<u8>,

    /// Chapter/lesson label
    pub chapter: Option<String>,

    /// Title of the source document
    pub source_title: String,

    /// Identifier of the stored embedding vector
    pub embedding_id: Option<String>,
}

/// A passage with its similarity score from the vector service
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScoredPassage {
    pub passage: Passage,
    pub score: f32,
}

/// Where an evidence item came from
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Provenance {
    /// Curated knowledge base (vector search)
    Kb,
    /// Live web search fallback
    Web,
}

/// Which evidence sources contributed to an answer
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum RetrievalMode {
    /// KB evidence was sufficient, web search skipped
    Kb,
    /// Web results were merged with KB evidence
    Hybrid,
    /// Zero KB hits, answered from web evidence
    WebOnly,
    /// No evidence at all; answered from context and model knowledge
    None,
}

impl RetrievalMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            RetrievalMode::Kb => "kb",
            RetrievalMode::Hybrid => "hybrid",
            RetrievalMode::WebOnly => "web_only",
            RetrievalMode::None => "none",
        }
    }
}

/// One piece of evidence handed to the synthesizer.
/// Created per-query, never persisted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EvidenceItem {
    /// Text excerpt included in the prompt
    pub excerpt: String,

    /// Title of the originating document or page
    pub source_title: String,

    /// Relevance score (similarity for KB, fixed heuristic for WEB)
    pub relevance_score: f32,

    /// Origin of this item
    pub provenance: Provenance,
}
