//! StudyForge Answer Engine
//!
//! Hybrid retrieval and answer synthesis: questions are embedded and
//! matched against a curated textbook knowledge base; when KB
//! evidence is insufficient a web-search fallback fills the gap; the
//! merged evidence and recent conversation context are handed to a
//! language-model backend that writes the final answer.
//!
//! The pipeline is deterministic given fixed upstream responses:
//! retrieval ordering, deduplication, and evidence ranking all use
//! total orders with explicit tie-breaks.

pub mod conversation;
pub mod engine;
pub mod evidence;
pub mod synthesis;
pub mod vector;
pub mod websearch;

// Re-export the pipeline entry points
pub use engine::{AnswerEngine, AnswerRequest, AnswerResult};
pub use evidence::{EvidenceItem, EvidenceMerger, Provenance, RetrievalMode};
