//! Conversation context assembly
//!
//! Loads a bounded suffix of prior turns for a conversation and
//! renders it into a prompt-ready context block. The assembler is
//! read-only and idempotent; appending the new turn after synthesis
//! is the engine's single write.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use studyforge_common::errors::Result;
use tokio::sync::RwLock;

/// Turn author
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    User,
    Assistant,
}

impl Role {
    fn label(&self) -> &'static str {
        match self {
            Role::User => "User",
            Role::Assistant => "Assistant",
        }
    }
}

/// One turn of a conversation. Append-only; the engine never
/// deletes or reorders turns.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConversationTurn {
    pub role: Role,
    pub content: String,
    pub created_at: DateTime<Utc>,
    /// Source titles cited by this turn, if any
    #[serde(skip_serializing_if = "Option::is_none")]
    pub evidence_refs: Option<Vec<String>>,
}

impl ConversationTurn {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
            created_at: Utc::now(),
            evidence_refs: None,
        }
    }

    pub fn assistant(content: impl Into<String>, evidence_refs: Option<Vec<String>>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
            created_at: Utc::now(),
            evidence_refs,
        }
    }
}

/// External conversation-persistence collaborator
#[async_trait]
pub trait ConversationStore: Send + Sync {
    /// Load the most recent `limit` turns in chronological order
    /// (oldest of the window first).
    async fn load_turns(&self, conversation_id: &str, limit: usize)
        -> Result<Vec<ConversationTurn>>;

    /// Append one turn to a conversation
    async fn append_turn(&self, conversation_id: &str, turn: ConversationTurn) -> Result<()>;
}

/// Prompt-ready conversation context
#[derive(Debug, Clone, Default)]
pub struct ContextBlock {
    /// The window of turns, oldest first
    pub turns: Vec<ConversationTurn>,

    /// Rendered text for the prompt
    pub rendered: String,
}

impl ContextBlock {
    pub fn is_empty(&self) -> bool {
        self.turns.is_empty()
    }
}

/// Assembles bounded conversation context for the synthesizer
pub struct ContextAssembler {
    store: Arc<dyn ConversationStore>,
    turn_char_budget: usize,
}

impl ContextAssembler {
    pub fn new(store: Arc<dyn ConversationStore>, turn_char_budget: usize) -> Self {
        Self {
            store,
            turn_char_budget,
        }
    }

    /// Assemble context for a conversation.
    ///
    /// Returns an empty block when `conversation_id` is absent
    /// (stateless single-turn mode). Idempotent between appends.
    pub async fn assemble(
        &self,
        conversation_id: Option<&str>,
        max_history_turns: usize,
    ) -> Result<ContextBlock> {
        let Some(id) = conversation_id else {
            return Ok(ContextBlock::default());
        };

        let turns = self.store.load_turns(id, max_history_turns).await?;
        if turns.is_empty() {
            return Ok(ContextBlock::default());
        }

        let rendered = turns
            .iter()
            .map(|turn| {
                let content: String = if turn.content.chars().count() > self.turn_char_budget {
                    turn.content.chars().take(self.turn_char_budget).collect()
                } else {
                    turn.content.clone()
                };
                format!("{}: {}", turn.role.label(), content)
            })
            .collect::<Vec<_>>()
            .join("\n");

        tracing::debug!(
            conversation_id = id,
            turns = turns.len(),
            "Conversation context assembled"
        );

        Ok(ContextBlock { turns, rendered })
    }
}

/// In-memory conversation store for tests and local development
#[derive(Default)]
pub struct InMemoryConversationStore {
    conversations: RwLock<HashMap<String, Vec<ConversationTurn>>>,
}

impl InMemoryConversationStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ConversationStore for InMemoryConversationStore {
    async fn load_turns(
        &self,
        conversation_id: &str,
        limit: usize,
    ) -> Result<Vec<ConversationTurn>> {
        let conversations = self.conversations.read().await;
        let turns = conversations
            .get(conversation_id)
            .cloned()
            .unwrap_or_default();

        // Most recent `limit`, chronological order
        let skip = turns.len().saturating_sub(limit);
        Ok(turns.into_iter().skip(skip).collect())
    }

    async fn append_turn(&self, conversation_id: &str, turn: ConversationTurn) -> Result<()> {
        let mut conversations = self.conversations.write().await;
        conversations
            .entry(conversation_id.to_string())
            .or_default()
            .push(turn);
        Ok(())
    }
}
