//! Web search fallback client
//!
//! Supplements the knowledge base with a small number of live
//! results when KB evidence is insufficient. Failures here degrade
//! the evidence set instead of failing the request.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use studyforge_common::config::WebSearchConfig;
use studyforge_common::errors::{AppError, Result};

/// A single web search result
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebResult {
    pub title: String,
    pub snippet: String,
    pub url: String,
}

/// Trait for web search providers
#[async_trait]
pub trait WebSearch: Send + Sync {
    /// Search the web, returning at most `max_results` results
    async fn search(&self, query: &str, max_results: usize) -> Result<Vec<WebResult>>;
}

/// DuckDuckGo instant-answer client (privacy-focused, keyless)
pub struct DuckDuckGoClient {
    client: reqwest::Client,
    region: String,
}

#[derive(Deserialize)]
struct DdgResponse {
    #[serde(default, rename = "Heading")]
    heading: String,

    #[serde(default, rename = "AbstractText")]
    abstract_text: String,

    #[serde(default, rename = "AbstractURL")]
    abstract_url: String,

    #[serde(default, rename = "RelatedTopics")]
    related_topics: Vec<DdgTopic>,
}

#[derive(Deserialize)]
struct DdgTopic {
    #[serde(default, rename = "Text")]
    text: String,

    #[serde(default, rename = "FirstURL")]
    first_url: String,

    // Category nodes nest their entries one level down
    #[serde(default, rename = "Topics")]
    topics: Vec<DdgTopic>,
}

impl DuckDuckGoClient {
    pub fn new(config: &WebSearchConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;

        Ok(Self {
            client,
            region: config.region.clone(),
        })
    }

    fn flatten_topics(topics: Vec<DdgTopic>, out: &mut Vec<WebResult>, budget: usize) {
        for topic in topics {
            if out.len() >= budget {
                return;
            }
            if !topic.text.is_empty() && !topic.first_url.is_empty() {
                // Topic text reads "Title - snippet"; keep the lead
                // fragment as the title when present.
                let (title, snippet) = match topic.text.split_once(" - ") {
                    Some((t, s)) => (t.to_string(), s.to_string()),
                    None => (topic.text.clone(), topic.text.clone()),
                };
                out.push(WebResult {
                    title,
                    snippet,
                    url: topic.first_url,
                });
            }
            if !topic.topics.is_empty() {
                Self::flatten_topics(topic.topics, out, budget);
            }
        }
    }
}

#[async_trait]
impl WebSearch for DuckDuckGoClient {
    async fn search(&self, query: &str, max_results: usize) -> Result<Vec<WebResult>> {
        let response = self
            .client
            .get("https://api.duckduckgo.com/")
            .query(&[
                ("q", query),
                ("format", "json"),
                ("no_html", "1"),
                ("skip_disambig", "1"),
                ("kl", &self.region),
            ])
            .send()
            .await
            .map_err(|e| AppError::WebSearchFailed {
                message: format!("Request failed: {}", e),
            })?;

        if !response.status().is_success() {
            return Err(AppError::WebSearchFailed {
                message: format!("Provider returned {}", response.status()),
            });
        }

        let body: DdgResponse =
            response
                .json()
                .await
                .map_err(|e| AppError::WebSearchFailed {
                    message: format!("Failed to parse response: {}", e),
                })?;

        let mut results = Vec::with_capacity(max_results);

        if !body.abstract_text.is_empty() {
            results.push(WebResult {
                title: body.heading,
                snippet: body.abstract_text,
                url: body.abstract_url,
            });
        }

        Self::flatten_topics(body.related_topics, &mut results, max_results);
        results.truncate(max_results);

        tracing::debug!(
            query = query,
            results = results.len(),
            region = %self.region,
            "Web search completed"
        );

        Ok(results)
    }
}

/// Recording test double: scripted results plus an invocation counter
pub struct RecordingWebSearch {
    results: Vec<WebResult>,
    fail: bool,
    calls: AtomicUsize,
}

impl RecordingWebSearch {
    /// Always return the given results
    pub fn with_results(results: Vec<WebResult>) -> Self {
        Self {
            results,
            fail: false,
            calls: AtomicUsize::new(0),
        }
    }

    /// Always fail with a provider error
    pub fn failing() -> Self {
        Self {
            results: Vec::new(),
            fail: true,
            calls: AtomicUsize::new(0),
        }
    }

    /// Number of times `search` was invoked
    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl WebSearch for RecordingWebSearch {
    async fn search(&self, _query: &str, max_results: usize) -> Result<Vec<WebResult>> {
        self.calls.fetch_add(1, Ordering::SeqCst);

        if self.fail {
            return Err(AppError::WebSearchFailed {
                message: "simulated provider timeout".to_string(),
            });
        }

        let mut results = self.results.clone();
        results.truncate(max_results);
        Ok(results)
    }
}
