//! In-memory repository twins for tests and wiring without a database. They
//! enforce the same write-time invariants as the SQL implementations.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::RwLock;

use relay_core::domain::agent::{Agent, AgentId, SubAgent, SubAgentId};
use relay_core::domain::conversation::{Conversation, ConversationId, Message};
use relay_core::domain::interview::{Interview, InterviewId};

use super::{
    AgentStore, ConversationRepository, InterviewRepository, RepositoryError,
};

#[derive(Clone, Default)]
pub struct InMemoryAgentStore {
    agents: Arc<RwLock<HashMap<AgentId, Agent>>>,
    sub_agents: Arc<RwLock<HashMap<SubAgentId, SubAgent>>>,
}

impl InMemoryAgentStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait::async_trait]
impl AgentStore for InMemoryAgentStore {
    async fn list_agents(&self) -> Result<Vec<Agent>, RepositoryError> {
        let agents = self.agents.read().await;
        let mut all: Vec<Agent> = agents.values().cloned().collect();
        all.sort_by(|a, b| a.id.0.cmp(&b.id.0));
        Ok(all)
    }

    async fn find_agent(&self, id: &AgentId) -> Result<Option<Agent>, RepositoryError> {
        Ok(self.agents.read().await.get(id).cloned())
    }

    async fn list_sub_agents(&self, parent_id: &AgentId) -> Result<Vec<SubAgent>, RepositoryError> {
        let sub_agents = self.sub_agents.read().await;
        let mut matching: Vec<SubAgent> = sub_agents
            .values()
            .filter(|sub| &sub.parent_id == parent_id)
            .cloned()
            .collect();
        matching.sort_by(|a, b| (a.created_at, &a.id.0).cmp(&(b.created_at, &b.id.0)));
        Ok(matching)
    }

    async fn save_agent(&self, agent: Agent) -> Result<(), RepositoryError> {
        self.agents.write().await.insert(agent.id.clone(), agent);
        Ok(())
    }

    async fn save_sub_agent(&self, sub_agent: SubAgent) -> Result<(), RepositoryError> {
        let agents = self.agents.read().await;
        let Some(parent) = agents.get(&sub_agent.parent_id) else {
            return Err(RepositoryError::Constraint(format!(
                "sub-agent parent `{}` is not a known agent",
                sub_agent.parent_id.0
            )));
        };
        if sub_agent.client_id != parent.client_id {
            return Err(RepositoryError::Constraint(format!(
                "sub-agent `{}` tenant {:?} does not match parent tenant {:?}",
                sub_agent.id.0, sub_agent.client_id, parent.client_id
            )));
        }
        drop(agents);

        self.sub_agents.write().await.insert(sub_agent.id.clone(), sub_agent);
        Ok(())
    }

    async fn delete_agent(&self, id: &AgentId) -> Result<(), RepositoryError> {
        self.agents.write().await.remove(id);
        self.sub_agents.write().await.retain(|_, sub| &sub.parent_id != id);
        Ok(())
    }
}

#[derive(Clone, Default)]
pub struct InMemoryConversationRepository {
    conversations: Arc<RwLock<HashMap<ConversationId, Conversation>>>,
    messages: Arc<RwLock<Vec<Message>>>,
}

impl InMemoryConversationRepository {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every stored message, insertion-ordered. Test helper.
    pub async fn all_messages(&self, id: &ConversationId) -> Vec<Message> {
        self.messages
            .read()
            .await
            .iter()
            .filter(|message| &message.conversation_id == id)
            .cloned()
            .collect()
    }
}

#[async_trait::async_trait]
impl ConversationRepository for InMemoryConversationRepository {
    async fn find(&self, id: &ConversationId) -> Result<Option<Conversation>, RepositoryError> {
        Ok(self.conversations.read().await.get(id).cloned())
    }

    async fn save(&self, conversation: Conversation) -> Result<(), RepositoryError> {
        self.conversations.write().await.insert(conversation.id.clone(), conversation);
        Ok(())
    }

    async fn recent_messages(
        &self,
        id: &ConversationId,
        limit: usize,
    ) -> Result<Vec<Message>, RepositoryError> {
        let messages = self.messages.read().await;
        let mut matching: Vec<Message> = messages
            .iter()
            .filter(|message| &message.conversation_id == id)
            .cloned()
            .collect();
        matching.sort_by_key(|message| message.timestamp);
        let start = matching.len().saturating_sub(limit);
        Ok(matching.split_off(start))
    }

    async fn append_turn(
        &self,
        user_message: Message,
        agent_message: Message,
    ) -> Result<(), RepositoryError> {
        if user_message.conversation_id != agent_message.conversation_id {
            return Err(RepositoryError::Constraint(
                "turn messages must belong to the same conversation".to_string(),
            ));
        }

        let mut conversations = self.conversations.write().await;
        let Some(conversation) = conversations.get_mut(&user_message.conversation_id) else {
            return Err(RepositoryError::Constraint(format!(
                "conversation `{}` does not exist",
                user_message.conversation_id.0
            )));
        };

        let mut messages = self.messages.write().await;
        if messages
            .iter()
            .any(|existing| existing.id == user_message.id || existing.id == agent_message.id)
        {
            return Err(RepositoryError::Constraint("duplicate message id".to_string()));
        }

        conversation.updated_at = agent_message.timestamp;
        conversation.unread_count += 1;
        messages.push(user_message);
        messages.push(agent_message);
        Ok(())
    }
}

#[derive(Clone, Default)]
pub struct InMemoryInterviewRepository {
    interviews: Arc<RwLock<HashMap<InterviewId, Interview>>>,
}

impl InMemoryInterviewRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait::async_trait]
impl InterviewRepository for InMemoryInterviewRepository {
    async fn find(&self, id: &InterviewId) -> Result<Option<Interview>, RepositoryError> {
        Ok(self.interviews.read().await.get(id).cloned())
    }

    async fn save(&self, interview: Interview) -> Result<(), RepositoryError> {
        self.interviews.write().await.insert(interview.id.clone(), interview);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeSet;

    use chrono::{Duration, Utc};
    use serde_json::Map;

    use relay_core::domain::agent::{
        Agent, AgentConfig, AgentId, AgentRole, AgentStatus, ClientId, RoutingConfig, SubAgent,
        SubAgentConfig, SubAgentId,
    };
    use relay_core::domain::conversation::{
        Channel, Conversation, ConversationId, ConversationStatus, Message, MessageId,
        MessageKind, Sender,
    };

    use super::{InMemoryAgentStore, InMemoryConversationRepository};
    use crate::repositories::{AgentStore, ConversationRepository, RepositoryError};

    fn agent(id: &str, client_id: Option<&str>) -> Agent {
        Agent {
            id: AgentId(id.to_string()),
            name: id.to_string(),
            slug: None,
            client_id: client_id.map(|client| ClientId(client.to_string())),
            role: AgentRole::ClientAgent,
            is_template: false,
            status: AgentStatus::Active,
            config: AgentConfig::default(),
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    fn sub_agent(id: &str, parent: &str, client_id: Option<&str>) -> SubAgent {
        SubAgent {
            id: SubAgentId(id.to_string()),
            parent_id: AgentId(parent.to_string()),
            client_id: client_id.map(|client| ClientId(client.to_string())),
            name: id.to_string(),
            routing: RoutingConfig::default(),
            inherit: BTreeSet::new(),
            config: SubAgentConfig::default(),
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    fn message(id: &str, conversation: &str, offset_secs: i64) -> Message {
        Message {
            id: MessageId(id.to_string()),
            conversation_id: ConversationId(conversation.to_string()),
            sender: Sender::Client,
            kind: MessageKind::Text,
            content: id.to_string(),
            metadata: Map::new(),
            read: false,
            timestamp: Utc::now() + Duration::seconds(offset_secs),
        }
    }

    #[tokio::test]
    async fn in_memory_store_enforces_tenant_containment() {
        let store = InMemoryAgentStore::new();
        store.save_agent(agent("agent-1", Some("client-1"))).await.expect("save agent");

        let error = store
            .save_sub_agent(sub_agent("sub-1", "agent-1", Some("client-2")))
            .await
            .expect_err("cross-tenant sub-agent must be rejected");
        assert!(matches!(error, RepositoryError::Constraint(_)));

        store
            .save_sub_agent(sub_agent("sub-1", "agent-1", Some("client-1")))
            .await
            .expect("same-tenant sub-agent saves");
    }

    #[tokio::test]
    async fn delete_agent_removes_its_sub_agents() {
        let store = InMemoryAgentStore::new();
        store.save_agent(agent("agent-1", None)).await.expect("save agent");
        store.save_sub_agent(sub_agent("sub-1", "agent-1", None)).await.expect("save sub-agent");

        store.delete_agent(&AgentId("agent-1".to_string())).await.expect("delete agent");
        let subs = store
            .list_sub_agents(&AgentId("agent-1".to_string()))
            .await
            .expect("list sub-agents");
        assert!(subs.is_empty());
    }

    #[tokio::test]
    async fn append_turn_requires_an_existing_conversation() {
        let repo = InMemoryConversationRepository::new();
        let result = repo.append_turn(message("m-1", "c-1", 0), message("m-2", "c-1", 1)).await;
        assert!(matches!(result, Err(RepositoryError::Constraint(_))));
    }

    #[tokio::test]
    async fn recent_messages_matches_sql_window_semantics() {
        let repo = InMemoryConversationRepository::new();
        repo.save(Conversation {
            id: ConversationId("c-1".to_string()),
            client_id: ClientId("client-1".to_string()),
            status: ConversationStatus::Active,
            channel: Channel::Web,
            priority: 0,
            unread_count: 0,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        })
        .await
        .expect("save conversation");

        for turn in 0..3 {
            repo.append_turn(
                message(&format!("u-{turn}"), "c-1", turn * 2),
                message(&format!("a-{turn}"), "c-1", turn * 2 + 1),
            )
            .await
            .expect("append turn");
        }

        let window = repo
            .recent_messages(&ConversationId("c-1".to_string()), 3)
            .await
            .expect("recent messages");
        let ids: Vec<&str> = window.iter().map(|m| m.id.0.as_str()).collect();
        assert_eq!(ids, vec!["a-1", "u-2", "a-2"]);
    }
}
