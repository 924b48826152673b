//! Configuration management for the StudyForge engine
//!
//! Supports loading configuration from:
//! - Environment variables (prefixed with APP__)
//! - Configuration files (config.toml, config.yaml)
//! - Default values
//!
//! The loaded `AppConfig` is passed explicitly into component
//! constructors at startup; nothing reads ambient global state at
//! request time.

use config::{Config, ConfigError, Environment, File};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Main application configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct AppConfig {
    /// Embedding backend configuration
    #[serde(default)]
    pub embedding: EmbeddingConfig,

    /// Vector-similarity service configuration
    #[serde(default)]
    pub vector: VectorStoreConfig,

    /// Language-model backend configuration
    #[serde(default)]
    pub llm: LlmConfig,

    /// Web search fallback configuration
    #[serde(default)]
    pub web_search: WebSearchConfig,

    /// Relevance gate and evidence merging configuration
    #[serde(default)]
    pub retrieval: RetrievalConfig,

    /// Conversation context configuration
    #[serde(default)]
    pub conversation: ConversationConfig,

    /// Request pipeline configuration
    #[serde(default)]
    pub engine: EngineConfig,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct EmbeddingConfig {
    /// Embedding provider: openai, mock
    #[serde(default = "default_embedding_provider")]
    pub provider: String,

    /// API key for the embedding service
    pub api_key: Option<String>,

    /// API base URL (for custom endpoints)
    pub api_base: Option<String>,

    /// Model to use
    #[serde(default = "default_embedding_model")]
    pub model: String,

    /// Embedding dimension
    #[serde(default = "default_embedding_dimension")]
    pub dimension: usize,

    /// Request timeout in seconds
    #[serde(default = "default_client_timeout")]
    pub timeout_secs: u64,

    /// Input longer than this is truncated at a char boundary
    #[serde(default = "default_max_input_chars")]
    pub max_input_chars: usize,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct VectorStoreConfig {
    /// Vector service endpoint (Qdrant REST)
    #[serde(default = "default_vector_endpoint")]
    pub endpoint: String,

    /// Optional API key for hosted deployments
    pub api_key: Option<String>,

    /// Collection queried when a request names none
    #[serde(default = "default_collection")]
    pub default_collection: String,

    /// Request timeout in seconds
    #[serde(default = "default_client_timeout")]
    pub timeout_secs: u64,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LlmConfig {
    /// LLM provider: openai, ollama
    #[serde(default = "default_llm_provider")]
    pub provider: String,

    /// API key (required for hosted providers)
    pub api_key: Option<String>,

    /// API base URL (for custom/self-hosted endpoints)
    pub api_base: Option<String>,

    /// Model name
    #[serde(default = "default_llm_model")]
    pub model: String,

    /// Sampling temperature
    #[serde(default = "default_temperature")]
    pub temperature: f32,

    /// Maximum output tokens
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,

    /// Request timeout in seconds
    #[serde(default = "default_llm_timeout")]
    pub timeout_secs: u64,

    /// Additional retries on transient failure
    #[serde(default = "default_llm_retries")]
    pub max_retries: u32,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct WebSearchConfig {
    /// Whether the web-search fallback is available at all
    #[serde(default = "default_web_enabled")]
    pub enabled: bool,

    /// Search region/locale, e.g. "vn-vi", "us-en"
    #[serde(default = "default_web_region")]
    pub region: String,

    /// Maximum results fetched per fallback query
    #[serde(default = "default_web_max_results")]
    pub max_results: usize,

    /// Request timeout in seconds
    #[serde(default = "default_web_timeout")]
    pub timeout_secs: u64,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RetrievalConfig {
    /// Minimum top similarity score for KB evidence to be sufficient
    #[serde(default = "default_sufficiency_threshold")]
    pub kb_sufficiency_threshold: f32,

    /// Minimum number of KB hits for sufficiency
    #[serde(default = "default_min_kb_hits")]
    pub min_kb_hits: usize,

    /// Default number of evidence items per answer (1..=10)
    #[serde(default = "default_max_sources")]
    pub default_max_sources: usize,

    /// Fixed heuristic relevance assigned to web results.
    /// Kept below the sufficiency threshold so KB items are never
    /// displaced by WEB items under default configuration.
    #[serde(default = "default_web_result_score")]
    pub web_result_score: f32,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ConversationConfig {
    /// Default number of history turns loaded per request
    #[serde(default = "default_max_history")]
    pub default_max_history: usize,

    /// Per-turn content budget in characters for the prompt
    #[serde(default = "default_turn_char_budget")]
    pub turn_char_budget: usize,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct EngineConfig {
    /// Per-request deadline in seconds
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,

    /// Concurrent pipelines during batch processing
    #[serde(default = "default_batch_concurrency")]
    pub batch_concurrency: usize,
}

// Default value functions
fn default_embedding_provider() -> String { "openai".to_string() }
fn default_embedding_model() -> String { "text-embedding-3-small".to_string() }
fn default_embedding_dimension() -> usize { 1536 }
fn default_max_input_chars() -> usize { 8000 }
fn default_client_timeout() -> u64 { 30 }
fn default_vector_endpoint() -> String { "http://localhost:6333".to_string() }
fn default_collection() -> String { "textbook_passages".to_string() }
fn default_llm_provider() -> String { "openai".to_string() }
fn default_llm_model() -> String { "gpt-4o-mini".to_string() }
fn default_temperature() -> f32 { 0.3 }
fn default_max_tokens() -> u32 { 1000 }
fn default_llm_timeout() -> u64 { 60 }
fn default_llm_retries() -> u32 { 2 }
fn default_web_enabled() -> bool { true }
fn default_web_region() -> String { "vn-vi".to_string() }
fn default_web_max_results() -> usize { 3 }
fn default_web_timeout() -> u64 { 10 }
fn default_sufficiency_threshold() -> f32 { 0.75 }
fn default_min_kb_hits() -> usize { 1 }
fn default_max_sources() -> usize { 5 }
fn default_web_result_score() -> f32 { 0.30 }
fn default_max_history() -> usize { 10 }
fn default_turn_char_budget() -> usize { 200 }
fn default_request_timeout() -> u64 { 30 }
fn default_batch_concurrency() -> usize { 4 }

impl AppConfig {
    /// Load configuration from environment and files
    pub fn load() -> Result<Self, ConfigError> {
        let env = std::env::var("APP_ENV").unwrap_or_else(|_| "development".to_string());

        let config = Config::builder()
            // Load base config file
            .add_source(File::with_name("config/default").required(false))
            // Load environment-specific config
            .add_source(File::with_name(&format!("config/{}", env)).required(false))
            // Load local overrides
            .add_source(File::with_name("config/local").required(false))
            // Load from environment variables with APP__ prefix
            // e.g., APP__RETRIEVAL__MIN_KB_HITS=2
            .add_source(
                Environment::with_prefix("APP")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        config.try_deserialize()
    }

    /// Load from a specific TOML file
    pub fn from_file(path: &str) -> Result<Self, ConfigError> {
        let config = Config::builder()
            .add_source(File::with_name(path))
            .add_source(
                Environment::with_prefix("APP")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        config.try_deserialize()
    }

    /// Get request timeout as Duration
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.engine.request_timeout_secs)
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            embedding: EmbeddingConfig::default(),
            vector: VectorStoreConfig::default(),
            llm: LlmConfig::default(),
            web_search: WebSearchConfig::default(),
            retrieval: RetrievalConfig::default(),
            conversation: ConversationConfig::default(),
            engine: EngineConfig::default(),
        }
    }
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: default_embedding_provider(),
            api_key: None,
            api_base: None,
            model: default_embedding_model(),
            dimension: default_embedding_dimension(),
            timeout_secs: default_client_timeout(),
            max_input_chars: default_max_input_chars(),
        }
    }
}

impl Default for VectorStoreConfig {
    fn default() -> Self {
        Self {
            endpoint: default_vector_endpoint(),
            api_key: None,
            default_collection: default_collection(),
            timeout_secs: default_client_timeout(),
        }
    }
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            provider: default_llm_provider(),
            api_key: None,
            api_base: None,
            model: default_llm_model(),
            temperature: default_temperature(),
            max_tokens: default_max_tokens(),
            timeout_secs: default_llm_timeout(),
            max_retries: default_llm_retries(),
        }
    }
}

impl Default for WebSearchConfig {
    fn default() -> Self {
        Self {
            enabled: default_web_enabled(),
            region: default_web_region(),
            max_results: default_web_max_results(),
            timeout_secs: default_web_timeout(),
        }
    }
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            kb_sufficiency_threshold: default_sufficiency_threshold(),
            min_kb_hits: default_min_kb_hits(),
            default_max_sources: default_max_sources(),
            web_result_score: default_web_result_score(),
        }
    }
}

impl Default for ConversationConfig {
    fn default() -> Self {
        Self {
            default_max_history: default_max_history(),
            turn_char_budget: default_turn_char_budget(),
        }
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            request_timeout_secs: default_request_timeout(),
            batch_concurrency: default_batch_concurrency(),
        }
    }
}
