use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Serialize;
use thiserror::Error;

use relay_core::domain::agent::{Agent, AgentId, SubAgent};
use relay_core::domain::conversation::{Conversation, ConversationId, Message};
use relay_core::domain::interview::{Interview, InterviewId};

pub mod agent;
pub mod conversation;
pub mod interview;
pub mod memory;

pub use agent::SqlAgentStore;
pub use conversation::SqlConversationRepository;
pub use interview::SqlInterviewRepository;
pub use memory::{InMemoryAgentStore, InMemoryConversationRepository, InMemoryInterviewRepository};

#[derive(Debug, Error)]
pub enum RepositoryError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("decode error: {0}")]
    Decode(String),
    #[error("constraint violation: {0}")]
    Constraint(String),
}

/// Durable record of agents and their sub-agents. The registry treats this
/// as the source of truth it reconciles against.
#[async_trait]
pub trait AgentStore: Send + Sync {
    async fn list_agents(&self) -> Result<Vec<Agent>, RepositoryError>;
    async fn find_agent(&self, id: &AgentId) -> Result<Option<Agent>, RepositoryError>;
    async fn list_sub_agents(&self, parent_id: &AgentId) -> Result<Vec<SubAgent>, RepositoryError>;
    async fn save_agent(&self, agent: Agent) -> Result<(), RepositoryError>;
    /// Rejects sub-agents whose tenant differs from the parent's, and
    /// sub-agents whose parent id does not resolve to an agent. Enforced at
    /// write time so reads never have to re-check.
    async fn save_sub_agent(&self, sub_agent: SubAgent) -> Result<(), RepositoryError>;
    async fn delete_agent(&self, id: &AgentId) -> Result<(), RepositoryError>;
}

#[async_trait]
pub trait ConversationRepository: Send + Sync {
    async fn find(&self, id: &ConversationId) -> Result<Option<Conversation>, RepositoryError>;
    async fn save(&self, conversation: Conversation) -> Result<(), RepositoryError>;
    /// The most recent `limit` messages, returned oldest-first.
    async fn recent_messages(
        &self,
        id: &ConversationId,
        limit: usize,
    ) -> Result<Vec<Message>, RepositoryError>;
    /// Persist a (user, agent) message pair atomically and bump the
    /// conversation's `updated_at`. Either both messages land or neither.
    async fn append_turn(
        &self,
        user_message: Message,
        agent_message: Message,
    ) -> Result<(), RepositoryError>;
}

#[async_trait]
pub trait InterviewRepository: Send + Sync {
    async fn find(&self, id: &InterviewId) -> Result<Option<Interview>, RepositoryError>;
    async fn save(&self, interview: Interview) -> Result<(), RepositoryError>;
}

pub(crate) fn encode_enum<T: Serialize>(value: &T) -> Result<String, RepositoryError> {
    match serde_json::to_value(value) {
        Ok(serde_json::Value::String(text)) => Ok(text),
        Ok(other) => Err(RepositoryError::Decode(format!("expected string variant, got {other}"))),
        Err(error) => Err(RepositoryError::Decode(error.to_string())),
    }
}

pub(crate) fn decode_enum<T: DeserializeOwned>(
    column: &str,
    raw: &str,
) -> Result<T, RepositoryError> {
    serde_json::from_value(serde_json::Value::String(raw.to_string()))
        .map_err(|error| RepositoryError::Decode(format!("column `{column}`: {error}")))
}

pub(crate) fn encode_json<T: Serialize>(value: &T) -> Result<String, RepositoryError> {
    serde_json::to_string(value).map_err(|error| RepositoryError::Decode(error.to_string()))
}

pub(crate) fn decode_json<T: DeserializeOwned>(
    column: &str,
    raw: &str,
) -> Result<T, RepositoryError> {
    serde_json::from_str(raw)
        .map_err(|error| RepositoryError::Decode(format!("column `{column}`: {error}")))
}
