//! Error types for the StudyForge engine
//!
//! Provides a comprehensive error handling system with:
//! - Distinct error types for each failure mode in the retrieval
//!   and synthesis pipeline
//! - Stable, machine-readable error codes for callers
//! - Transient/fatal classification driving the shared retry policy

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Result type alias using AppError
pub type Result<T> = std::result::Result<T, AppError>;

/// Error codes for machine-readable error identification
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    // Validation errors (1xxx)
    ValidationError,

    // Retrieval errors (2xxx)
    EmbeddingUnavailable,
    VectorStoreUnavailable,
    WebSearchFailed,
    RetrievalFailed,

    // LLM backend errors (3xxx)
    LlmUnavailable,
    LlmRateLimited,
    LlmQuotaExceeded,
    LlmAuthError,

    // Conversation store errors (4xxx)
    ConversationStoreError,
    ConversationNotFound,

    // Request lifecycle (5xxx)
    RequestTimeout,

    // Internal errors (9xxx)
    UpstreamError,
    ConfigurationError,
    SerializationError,
    InternalError,
}

impl ErrorCode {
    /// Get the numeric code for this error
    pub fn as_code(&self) -> u16 {
        match self {
            // Validation (1xxx)
            ErrorCode::ValidationError => 1001,

            // Retrieval (2xxx)
            ErrorCode::EmbeddingUnavailable => 2001,
            ErrorCode::VectorStoreUnavailable => 2002,
            ErrorCode::WebSearchFailed => 2003,
            ErrorCode::RetrievalFailed => 2004,

            // LLM (3xxx)
            ErrorCode::LlmUnavailable => 3001,
            ErrorCode::LlmRateLimited => 3002,
            ErrorCode::LlmQuotaExceeded => 3003,
            ErrorCode::LlmAuthError => 3004,

            // Conversation (4xxx)
            ErrorCode::ConversationStoreError => 4001,
            ErrorCode::ConversationNotFound => 4002,

            // Lifecycle (5xxx)
            ErrorCode::RequestTimeout => 5001,

            // Internal (9xxx)
            ErrorCode::UpstreamError => 9001,
            ErrorCode::ConfigurationError => 9002,
            ErrorCode::SerializationError => 9003,
            ErrorCode::InternalError => 9004,
        }
    }
}

/// Application error types
#[derive(Error, Debug)]
pub enum AppError {
    // Validation errors
    #[error("Validation failed: {message}")]
    Validation {
        message: String,
        field: Option<String>,
    },

    // Retrieval errors
    #[error("Embedding backend unavailable: {message}")]
    EmbeddingUnavailable { message: String },

    #[error("Vector store unavailable: {message}")]
    VectorStoreUnavailable { message: String },

    #[error("Web search failed: {message}")]
    WebSearchFailed { message: String },

    #[error("Retrieval failed with no remaining fallback: {message}")]
    RetrievalFailed { message: String },

    // LLM backend errors
    #[error("LLM backend unavailable: {message}")]
    LlmUnavailable { message: String },

    #[error("LLM backend rate limited: {message}")]
    LlmRateLimited { message: String },

    #[error("LLM quota exhausted: {message}")]
    LlmQuotaExceeded { message: String },

    #[error("LLM authentication failed: {message}")]
    LlmAuthError { message: String },

    // Conversation store errors
    #[error("Conversation store error: {message}")]
    ConversationStore { message: String },

    #[error("Conversation not found: {id}")]
    ConversationNotFound { id: String },

    // Request lifecycle
    #[error("Request deadline exceeded after {timeout_ms}ms")]
    RequestTimeout { timeout_ms: u64 },

    // Internal errors
    #[error("HTTP client error: {0}")]
    HttpClient(#[from] reqwest::Error),

    #[error("Configuration error: {message}")]
    Configuration { message: String },

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Internal error: {message}")]
    Internal { message: String },

    // Generic
    #[error("{0}")]
    Other(#[from] anyhow::Error),
}

impl AppError {
    /// Get the error code for this error
    pub fn code(&self) -> ErrorCode {
        match self {
            AppError::Validation { .. } => ErrorCode::ValidationError,
            AppError::EmbeddingUnavailable { .. } => ErrorCode::EmbeddingUnavailable,
            AppError::VectorStoreUnavailable { .. } => ErrorCode::VectorStoreUnavailable,
            AppError::WebSearchFailed { .. } => ErrorCode::WebSearchFailed,
            AppError::RetrievalFailed { .. } => ErrorCode::RetrievalFailed,
            AppError::LlmUnavailable { .. } => ErrorCode::LlmUnavailable,
            AppError::LlmRateLimited { .. } => ErrorCode::LlmRateLimited,
            AppError::LlmQuotaExceeded { .. } => ErrorCode::LlmQuotaExceeded,
            AppError::LlmAuthError { .. } => ErrorCode::LlmAuthError,
            AppError::ConversationStore { .. } => ErrorCode::ConversationStoreError,
            AppError::ConversationNotFound { .. } => ErrorCode::ConversationNotFound,
            AppError::RequestTimeout { .. } => ErrorCode::RequestTimeout,
            AppError::HttpClient(_) => ErrorCode::UpstreamError,
            AppError::Configuration { .. } => ErrorCode::ConfigurationError,
            AppError::Serialization(_) => ErrorCode::SerializationError,
            AppError::Internal { .. } => ErrorCode::InternalError,
            AppError::Other(_) => ErrorCode::InternalError,
        }
    }

    /// Whether a retry may succeed.
    ///
    /// Quota exhaustion is deliberately NOT transient: the caller is
    /// expected to apply a degraded-answer policy instead of retrying.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            AppError::EmbeddingUnavailable { .. }
                | AppError::VectorStoreUnavailable { .. }
                | AppError::WebSearchFailed { .. }
                | AppError::LlmUnavailable { .. }
                | AppError::LlmRateLimited { .. }
                | AppError::HttpClient(_)
        )
    }

    /// Whether the retrieval layer can degrade to web-only mode when
    /// this error occurs (embedding or vector store outage).
    pub fn is_retrieval_recoverable(&self) -> bool {
        matches!(
            self,
            AppError::EmbeddingUnavailable { .. } | AppError::VectorStoreUnavailable { .. }
        )
    }
}

impl From<std::io::Error> for AppError {
    fn from(err: std::io::Error) -> Self {
        AppError::Internal {
            message: err.to_string(),
        }
    }
}

impl From<config::ConfigError> for AppError {
    fn from(err: config::ConfigError) -> Self {
        AppError::Configuration {
            message: err.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_code_mapping() {
        let err = AppError::VectorStoreUnavailable {
            message: "connection refused".into(),
        };
        assert_eq!(err.code(), ErrorCode::VectorStoreUnavailable);
        assert_eq!(err.code().as_code(), 2002);
    }

    #[test]
    fn test_transient_classification() {
        let rate_limited = AppError::LlmRateLimited {
            message: "429".into(),
        };
        assert!(rate_limited.is_transient());

        let quota = AppError::LlmQuotaExceeded {
            message: "insufficient_quota".into(),
        };
        assert!(!quota.is_transient());

        let auth = AppError::LlmAuthError {
            message: "bad key".into(),
        };
        assert!(!auth.is_transient());
    }

    #[test]
    fn test_retrieval_recoverable() {
        let embedding = AppError::EmbeddingUnavailable {
            message: "timeout".into(),
        };
        assert!(embedding.is_retrieval_recoverable());

        let quota = AppError::LlmQuotaExceeded {
            message: "quota".into(),
        };
        assert!(!quota.is_retrieval_recoverable());
    }
}
