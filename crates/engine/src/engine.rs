//! Answer pipeline orchestration
//!
//! `AnswerEngine` wires the stages together: embed the question,
//! retrieve passages, merge evidence (with web fallback), assemble
//! conversation context, synthesize the answer, and persist the
//! exchange. Retrieval and context assembly run concurrently; they
//! are independent.

use crate::conversation::{ContextAssembler, ConversationStore, ConversationTurn, InMemoryConversationStore};
use crate::evidence::{
    EvidenceItem, EvidenceMerger, GatherOptions, MergeOutcome, RetrievalMode, ScoredPassage,
};
use crate::synthesis::{create_llm_backend, Synthesizer};
use crate::vector::{PassageFilters, QdrantClient, VectorSearch, MAX_K, MIN_K};
use crate::websearch::DuckDuckGoClient;
use futures::StreamExt;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Instant;
use studyforge_common::config::AppConfig;
use studyforge_common::embeddings::{create_embedder, Embedder};
use studyforge_common::errors::{AppError, Result};
use uuid::Uuid;

fn default_return_sources() -> bool {
    true
}

/// One answer request
#[derive(Debug, Clone, Deserialize)]
pub struct AnswerRequest {
    /// The question to answer
    pub question: String,

    /// Optional subject filter, e.g. "Tin học"
    #[serde(default)]
    pub subject: Option<String>,

    /// Optional grade filter (1..=12)
    #[serde(default)]
    pub grade: Option<u8>,

    /// Collection override
    #[serde(default)]
    pub collection: Option<String>,

    /// Evidence budget (clamped to 1..=10; configured default when absent)
    #[serde(default)]
    pub max_sources: Option<usize>,

    /// Include the evidence list in the result
    #[serde(default = "default_return_sources")]
    pub return_sources: bool,

    /// Invoke web search even when KB evidence suffices
    #[serde(default)]
    pub force_web_search: bool,

    /// Conversation to load context from and append the exchange to
    #[serde(default)]
    pub conversation_id: Option<String>,

    /// History window override
    #[serde(default)]
    pub max_history: Option<usize>,
}

impl AnswerRequest {
    pub fn new(question: impl Into<String>) -> Self {
        Self {
            question: question.into(),
            subject: None,
            grade: None,
            collection: None,
            max_sources: None,
            return_sources: true,
            force_web_search: false,
            conversation_id: None,
            max_history: None,
        }
    }
}

/// One answered question
#[derive(Debug, Clone, Serialize)]
pub struct AnswerResult {
    /// Unique id for this answer
    pub answer_id: String,

    /// Synthesized answer text
    pub answer: String,

    /// Evidence behind the answer (None when not requested)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sources: Option<Vec<EvidenceItem>>,

    /// Which retrieval paths contributed evidence
    pub retrieval_mode: RetrievalMode,

    /// Evidence items that survived merging
    pub docs_retrieved: usize,

    /// Whether web search contributed at least one result
    pub web_search_used: bool,

    /// End-to-end processing time
    pub processing_time_ms: u64,
}

/// The retrieval-and-synthesis pipeline
pub struct AnswerEngine {
    embedder: Arc<dyn Embedder>,
    vector: Arc<dyn VectorSearch>,
    merger: EvidenceMerger,
    assembler: ContextAssembler,
    store: Arc<dyn ConversationStore>,
    synthesizer: Synthesizer,
    config: AppConfig,
}

impl AnswerEngine {
    /// Assemble an engine from explicit components. Tests inject
    /// their doubles here.
    pub fn new(
        embedder: Arc<dyn Embedder>,
        vector: Arc<dyn VectorSearch>,
        merger: EvidenceMerger,
        store: Arc<dyn ConversationStore>,
        synthesizer: Synthesizer,
        config: AppConfig,
    ) -> Self {
        let assembler = ContextAssembler::new(store.clone(), config.conversation.turn_char_budget);
        Self {
            embedder,
            vector,
            merger,
            assembler,
            store,
            synthesizer,
            config,
        }
    }

    /// Build an engine from configuration with the production
    /// clients (OpenAI embeddings, Qdrant, DuckDuckGo, configured
    /// LLM backend, in-memory conversation store).
    pub fn from_config(config: AppConfig) -> Result<Self> {
        let embedder = create_embedder(&config.embedding)?;
        let vector: Arc<dyn VectorSearch> = Arc::new(QdrantClient::new(&config.vector)?);
        let web = Arc::new(DuckDuckGoClient::new(&config.web_search)?);
        let merger = EvidenceMerger::new(
            web,
            config.retrieval.clone(),
            config.web_search.max_results,
        );
        let store: Arc<dyn ConversationStore> = Arc::new(InMemoryConversationStore::new());
        let backend = create_llm_backend(&config.llm)?;
        let synthesizer = Synthesizer::new(backend, &config.llm);

        Ok(Self::new(embedder, vector, merger, store, synthesizer, config))
    }

    /// Answer one question under the configured request deadline.
    pub async fn answer(&self, request: AnswerRequest) -> Result<AnswerResult> {
        let timeout = self.config.request_timeout();
        match tokio::time::timeout(timeout, self.answer_inner(request)).await {
            Ok(result) => result,
            Err(_) => Err(AppError::RequestTimeout {
                timeout_ms: timeout.as_millis() as u64,
            }),
        }
    }

    /// Answer a batch of questions with bounded concurrency.
    ///
    /// Results come back in input order; one failing request never
    /// affects its neighbors.
    pub async fn answer_batch(&self, requests: Vec<AnswerRequest>) -> Vec<Result<AnswerResult>> {
        let concurrency = self.config.engine.batch_concurrency.max(1);
        futures::stream::iter(requests)
            .map(|request| self.answer(request))
            .buffered(concurrency)
            .collect()
            .await
    }

    async fn answer_inner(&self, request: AnswerRequest) -> Result<AnswerResult> {
        let started = Instant::now();
        validate_request(&request)?;

        let max_sources = request
            .max_sources
            .unwrap_or(self.config.retrieval.default_max_sources)
            .clamp(MIN_K, MAX_K);
        let max_history = request
            .max_history
            .unwrap_or(self.config.conversation.default_max_history);

        let opts = GatherOptions {
            max_sources,
            web_enabled: self.config.web_search.enabled,
            force_web_search: request.force_web_search,
            kb_unavailable: false,
        };

        // Retrieval and context assembly are independent
        let (merged, context) = tokio::join!(
            self.retrieve(&request, &opts),
            self.assembler
                .assemble(request.conversation_id.as_deref(), max_history),
        );
        let merged = merged?;
        let context = context?;

        let answer = match self
            .synthesizer
            .synthesize(&request.question, &merged.evidence, &context)
            .await
        {
            Ok(answer) => answer,
            // Quota exhaustion degrades to an extractive answer when
            // evidence exists, instead of failing the request.
            Err(AppError::LlmQuotaExceeded { .. }) if !merged.evidence.is_empty() => {
                tracing::warn!("LLM quota exhausted, returning extractive answer");
                degraded_answer(&merged.evidence)
            }
            Err(e) => return Err(e),
        };

        if let Some(conversation_id) = request.conversation_id.as_deref() {
            let refs: Vec<String> = merged
                .evidence
                .iter()
                .map(|item| item.source_title.clone())
                .collect();
            self.store
                .append_turn(
                    conversation_id,
                    ConversationTurn::user(request.question.clone()),
                )
                .await?;
            self.store
                .append_turn(
                    conversation_id,
                    ConversationTurn::assistant(answer.clone(), Some(refs)),
                )
                .await?;
        }

        let elapsed = started.elapsed();
        studyforge_common::metrics::record_answer(
            elapsed.as_secs_f64(),
            merged.retrieval_mode.as_str(),
            merged.evidence.len(),
        );

        tracing::info!(
            mode = merged.retrieval_mode.as_str(),
            docs = merged.evidence.len(),
            web = merged.web_search_used,
            elapsed_ms = elapsed.as_millis() as u64,
            "Question answered"
        );

        let docs_retrieved = merged.evidence.len();
        Ok(AnswerResult {
            answer_id: Uuid::new_v4().to_string(),
            answer,
            sources: if request.return_sources {
                Some(merged.evidence)
            } else {
                None
            },
            retrieval_mode: merged.retrieval_mode,
            docs_retrieved,
            web_search_used: merged.web_search_used,
            processing_time_ms: elapsed.as_millis() as u64,
        })
    }

    /// Embed the question and query the vector store, then run the
    /// merge gate. An embedding or vector outage degrades to
    /// web-only retrieval when the fallback is available.
    async fn retrieve(&self, request: &AnswerRequest, opts: &GatherOptions) -> Result<MergeOutcome> {
        let filters = PassageFilters {
            subject: request.subject.clone(),
            grade: request.grade,
            collection: request.collection.clone(),
        };

        let kb_hits: Result<Vec<ScoredPassage>> = async {
            let embedding = self.embedder.embed(&request.question).await?;
            self.vector.search(&embedding, &filters, opts.max_sources).await
        }
        .await;

        match kb_hits {
            Ok(hits) => Ok(self.merger.gather(&request.question, hits, opts).await),
            Err(e) if e.is_retrieval_recoverable() => {
                if self.config.web_search.enabled {
                    tracing::warn!(error = %e, "KB retrieval unavailable, degrading to web-only");
                    let degraded = GatherOptions {
                        kb_unavailable: true,
                        ..opts.clone()
                    };
                    Ok(self
                        .merger
                        .gather(&request.question, Vec::new(), &degraded)
                        .await)
                } else {
                    Err(AppError::RetrievalFailed {
                        message: format!("KB unavailable and web fallback disabled: {}", e),
                    })
                }
            }
            Err(e) => Err(e),
        }
    }
}

fn validate_request(request: &AnswerRequest) -> Result<()> {
    if request.question.trim().is_empty() {
        return Err(AppError::Validation {
            message: "Question must not be empty".to_string(),
            field: Some("question".to_string()),
        });
    }
    if let Some(grade) = request.grade {
        if !(1..=12).contains(&grade) {
            return Err(AppError::Validation {
                message: format!("Grade must be between 1 and 12, got {}", grade),
                field: Some("grade".to_string()),
            });
        }
    }
    Ok(())
}

/// Extractive fallback answer used when synthesis is impossible but
/// evidence exists: quote the top excerpt with its source.
fn degraded_answer(evidence: &[EvidenceItem]) -> String {
    let top = &evidence[0];
    format!(
        "The answer could not be generated right now. The most relevant \
         passage found ({}) says:\n\n{}",
        top.source_title, top.excerpt
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::evidence::{Passage, Provenance};
    use crate::synthesis::ScriptedLlm;
    use crate::vector::StaticVectorStore;
    use crate::websearch::{RecordingWebSearch, WebResult};
    use std::time::Duration;
    use studyforge_common::embeddings::MockEmbedder;
    use studyforge_common::retry::RetryPolicy;

    fn passage(id: &str, text: &str, title: &str) -> Passage {
        Passage {
            id: id.to_string(),
            text: text.to_string(),
            subject: Some("Tin học".to_string()),
            grade: Some(6),
            chapter: None,
            source_title: title.to_string(),
            embedding_id: None,
        }
    }

    fn hit(id: &str, text: &str, title: &str, score: f32) -> ScoredPassage {
        ScoredPassage {
            passage: passage(id, text, title),
            score,
        }
    }

    fn web_result(title: &str, snippet: &str) -> WebResult {
        WebResult {
            title: title.to_string(),
            snippet: snippet.to_string(),
            url: format!("https://example.com/{}", title),
        }
    }

    struct EngineBuilder {
        hits: Vec<ScoredPassage>,
        kb_failing: bool,
        web: RecordingWebSearch,
        llm: Option<ScriptedLlm>,
        config: AppConfig,
    }

    impl EngineBuilder {
        fn new() -> Self {
            Self {
                hits: Vec::new(),
                kb_failing: false,
                web: RecordingWebSearch::with_results(Vec::new()),
                llm: None,
                config: AppConfig::default(),
            }
        }

        fn kb_hits(mut self, hits: Vec<ScoredPassage>) -> Self {
            self.hits = hits;
            self
        }

        fn kb_failing(mut self) -> Self {
            self.kb_failing = true;
            self
        }

        fn web(mut self, web: RecordingWebSearch) -> Self {
            self.web = web;
            self
        }

        fn llm(mut self, llm: ScriptedLlm) -> Self {
            self.llm = Some(llm);
            self
        }

        fn config(mut self, f: impl FnOnce(&mut AppConfig)) -> Self {
            f(&mut self.config);
            self
        }

        fn build(self) -> (AnswerEngine, Arc<ScriptedLlm>, Arc<RecordingWebSearch>) {
            let vector: Arc<dyn VectorSearch> = if self.kb_failing {
                Arc::new(StaticVectorStore::failing())
            } else {
                Arc::new(StaticVectorStore::with_hits(self.hits))
            };
            let web = Arc::new(self.web);
            let llm = Arc::new(self.llm.unwrap_or_else(|| ScriptedLlm::new(Vec::new())));
            let merger = EvidenceMerger::new(
                web.clone(),
                self.config.retrieval.clone(),
                self.config.web_search.max_results,
            );
            let store: Arc<dyn ConversationStore> = Arc::new(InMemoryConversationStore::new());
            let synthesizer = Synthesizer::new(llm.clone(), &self.config.llm)
                .with_retry(RetryPolicy::new(2, Duration::from_millis(1)));

            let engine = AnswerEngine::new(
                Arc::new(MockEmbedder::new(8)),
                vector,
                merger,
                store,
                synthesizer,
                self.config,
            );
            (engine, llm, web)
        }
    }

    fn strong_hits() -> Vec<ScoredPassage> {
        vec![
            hit("p1", "Máy tính là thiết bị xử lý thông tin.", "Tin học 6", 0.92),
            hit("p2", "Thông tin được biểu diễn bằng bit.", "Tin học 6", 0.81),
        ]
    }

    #[tokio::test]
    async fn test_confident_kb_answer_skips_web() {
        let (engine, _llm, web) = EngineBuilder::new().kb_hits(strong_hits()).build();

        let result = engine
            .answer(AnswerRequest::new("Máy tính là gì?"))
            .await
            .unwrap();

        assert_eq!(result.retrieval_mode, RetrievalMode::Kb);
        assert!(!result.web_search_used);
        assert_eq!(result.docs_retrieved, 2);
        assert_eq!(web.call_count(), 0);
        let sources = result.sources.unwrap();
        assert!(sources.iter().all(|s| s.provenance == Provenance::Kb));
    }

    #[tokio::test]
    async fn test_empty_kb_falls_back_to_web() {
        let (engine, _llm, web) = EngineBuilder::new()
            .web(RecordingWebSearch::with_results(vec![web_result(
                "Wikipedia",
                "A computer processes information.",
            )]))
            .build();

        let result = engine
            .answer(AnswerRequest::new("Máy tính là gì?"))
            .await
            .unwrap();

        assert_eq!(result.retrieval_mode, RetrievalMode::WebOnly);
        assert!(result.web_search_used);
        assert_eq!(result.docs_retrieved, 1);
        assert_eq!(web.call_count(), 1);
    }

    #[tokio::test]
    async fn test_weak_kb_yields_hybrid_evidence() {
        let weak = vec![hit("p1", "Chủ đề liên quan xa.", "Tin học 6", 0.41)];
        let (engine, _llm, _web) = EngineBuilder::new()
            .kb_hits(weak)
            .web(RecordingWebSearch::with_results(vec![web_result(
                "Wikipedia",
                "Relevant web snippet.",
            )]))
            .build();

        let result = engine.answer(AnswerRequest::new("question")).await.unwrap();

        assert_eq!(result.retrieval_mode, RetrievalMode::Hybrid);
        assert!(result.web_search_used);
        assert_eq!(result.docs_retrieved, 2);
    }

    #[tokio::test]
    async fn test_no_evidence_with_web_disabled_still_answers() {
        let (engine, llm, web) = EngineBuilder::new()
            .config(|c| c.web_search.enabled = false)
            .build();

        let result = engine.answer(AnswerRequest::new("question")).await.unwrap();

        assert_eq!(result.retrieval_mode, RetrievalMode::None);
        assert!(!result.web_search_used);
        assert_eq!(result.docs_retrieved, 0);
        assert_eq!(web.call_count(), 0);
        // Synthesis still runs with the no-evidence prompt
        assert_eq!(llm.call_count(), 1);
        assert!(!result.answer.is_empty());
    }

    #[tokio::test]
    async fn test_kb_outage_degrades_to_web_only() {
        let (engine, _llm, web) = EngineBuilder::new()
            .kb_failing()
            .web(RecordingWebSearch::with_results(vec![web_result(
                "Wikipedia",
                "Fallback snippet.",
            )]))
            .build();

        let result = engine.answer(AnswerRequest::new("question")).await.unwrap();

        assert_eq!(result.retrieval_mode, RetrievalMode::WebOnly);
        assert_eq!(web.call_count(), 1);
    }

    #[tokio::test]
    async fn test_kb_outage_with_web_disabled_fails() {
        let (engine, _llm, _web) = EngineBuilder::new()
            .kb_failing()
            .config(|c| c.web_search.enabled = false)
            .build();

        let result = engine.answer(AnswerRequest::new("question")).await;
        assert!(matches!(result, Err(AppError::RetrievalFailed { .. })));
    }

    #[tokio::test]
    async fn test_llm_retries_observed_through_pipeline() {
        let llm = ScriptedLlm::new(vec![
            Err(AppError::LlmRateLimited { message: "429".into() }),
            Err(AppError::LlmRateLimited { message: "429".into() }),
            Ok("answer after retries".to_string()),
        ]);
        let (engine, llm, _web) = EngineBuilder::new()
            .kb_hits(strong_hits())
            .llm(llm)
            .build();

        let result = engine.answer(AnswerRequest::new("question")).await.unwrap();

        assert_eq!(result.answer, "answer after retries");
        assert_eq!(llm.call_count(), 3);
    }

    #[tokio::test]
    async fn test_quota_exhaustion_degrades_to_extractive_answer() {
        let llm = ScriptedLlm::new(vec![Err(AppError::LlmQuotaExceeded {
            message: "insufficient_quota".into(),
        })]);
        let (engine, llm, _web) = EngineBuilder::new()
            .kb_hits(strong_hits())
            .llm(llm)
            .build();

        let result = engine.answer(AnswerRequest::new("question")).await.unwrap();

        assert!(result.answer.contains("Tin học 6"));
        assert!(result.answer.contains("Máy tính là thiết bị xử lý thông tin."));
        assert_eq!(llm.call_count(), 1);
    }

    #[tokio::test]
    async fn test_quota_exhaustion_without_evidence_propagates() {
        let llm = ScriptedLlm::new(vec![Err(AppError::LlmQuotaExceeded {
            message: "insufficient_quota".into(),
        })]);
        let (engine, _llm, _web) = EngineBuilder::new().llm(llm).build();

        let result = engine.answer(AnswerRequest::new("question")).await;
        assert!(matches!(result, Err(AppError::LlmQuotaExceeded { .. })));
    }

    #[tokio::test]
    async fn test_empty_question_rejected() {
        let (engine, llm, _web) = EngineBuilder::new().build();

        let result = engine.answer(AnswerRequest::new("   ")).await;
        assert!(matches!(result, Err(AppError::Validation { .. })));
        assert_eq!(llm.call_count(), 0);
    }

    #[tokio::test]
    async fn test_out_of_range_grade_rejected() {
        let (engine, _llm, _web) = EngineBuilder::new().build();

        let mut request = AnswerRequest::new("question");
        request.grade = Some(13);
        let result = engine.answer(request).await;
        assert!(matches!(result, Err(AppError::Validation { .. })));
    }

    #[tokio::test]
    async fn test_docs_retrieved_matches_sources_across_budgets() {
        let hits: Vec<ScoredPassage> = (0..10)
            .map(|i| {
                hit(
                    &format!("p{}", i),
                    &format!("Passage number {} with unique content.", i),
                    &format!("Book {}", i),
                    0.9 - (i as f32) * 0.01,
                )
            })
            .collect();

        for budget in 1..=10usize {
            let (engine, _llm, _web) = EngineBuilder::new().kb_hits(hits.clone()).build();
            let mut request = AnswerRequest::new("question");
            request.max_sources = Some(budget);

            let result = engine.answer(request).await.unwrap();
            assert_eq!(result.docs_retrieved, budget);
            assert_eq!(result.sources.unwrap().len(), budget);
        }
    }

    #[tokio::test]
    async fn test_sources_omitted_when_not_requested() {
        let (engine, _llm, _web) = EngineBuilder::new().kb_hits(strong_hits()).build();

        let mut request = AnswerRequest::new("question");
        request.return_sources = false;
        let result = engine.answer(request).await.unwrap();

        assert!(result.sources.is_none());
        // Counters still reflect the merged evidence
        assert_eq!(result.docs_retrieved, 2);
    }

    #[tokio::test]
    async fn test_force_web_search_with_sufficient_kb() {
        let (engine, _llm, web) = EngineBuilder::new()
            .kb_hits(strong_hits())
            .web(RecordingWebSearch::with_results(vec![web_result(
                "Wikipedia",
                "Extra web context.",
            )]))
            .build();

        let mut request = AnswerRequest::new("question");
        request.force_web_search = true;
        let result = engine.answer(request).await.unwrap();

        assert_eq!(web.call_count(), 1);
        assert_eq!(result.retrieval_mode, RetrievalMode::Hybrid);
    }

    #[tokio::test]
    async fn test_conversation_records_both_turns() {
        let store: Arc<InMemoryConversationStore> = Arc::new(InMemoryConversationStore::new());
        let web = Arc::new(RecordingWebSearch::with_results(Vec::new()));
        let config = AppConfig::default();
        let merger = EvidenceMerger::new(
            web,
            config.retrieval.clone(),
            config.web_search.max_results,
        );
        let llm = Arc::new(ScriptedLlm::new(vec![Ok("the answer".to_string())]));
        let synthesizer = Synthesizer::new(llm, &config.llm)
            .with_retry(RetryPolicy::new(2, Duration::from_millis(1)));
        let engine = AnswerEngine::new(
            Arc::new(MockEmbedder::new(8)),
            Arc::new(StaticVectorStore::with_hits(strong_hits())),
            merger,
            store.clone(),
            synthesizer,
            config,
        );

        let mut request = AnswerRequest::new("Máy tính là gì?");
        request.conversation_id = Some("conv-1".to_string());
        engine.answer(request).await.unwrap();

        let turns = store.load_turns("conv-1", 10).await.unwrap();
        assert_eq!(turns.len(), 2);
        assert_eq!(turns[0].content, "Máy tính là gì?");
        assert_eq!(turns[1].content, "the answer");
        assert!(turns[1].evidence_refs.is_some());
    }

    #[tokio::test]
    async fn test_request_deadline_enforced() {
        // The retry backoff sleep guarantees the pipeline suspends,
        // letting the zero-second deadline fire.
        let llm = ScriptedLlm::new(vec![
            Err(AppError::LlmRateLimited { message: "429".into() }),
            Err(AppError::LlmRateLimited { message: "429".into() }),
            Ok("too late".to_string()),
        ]);
        let (engine, _llm, _web) = EngineBuilder::new()
            .kb_hits(strong_hits())
            .llm(llm)
            .config(|c| c.engine.request_timeout_secs = 0)
            .build();

        let result = engine.answer(AnswerRequest::new("question")).await;
        assert!(matches!(result, Err(AppError::RequestTimeout { .. })));
    }

    #[tokio::test]
    async fn test_batch_preserves_order_and_isolates_failures() {
        let (engine, _llm, _web) = EngineBuilder::new().kb_hits(strong_hits()).build();

        let requests = vec![
            AnswerRequest::new("first question"),
            AnswerRequest::new("   "),
            AnswerRequest::new("third question"),
        ];
        let results = engine.answer_batch(requests).await;

        assert_eq!(results.len(), 3);
        assert!(results[0].is_ok());
        assert!(matches!(results[1], Err(AppError::Validation { .. })));
        assert!(results[2].is_ok());
    }
}
