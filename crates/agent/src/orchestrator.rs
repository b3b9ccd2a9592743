//! Execution loop for a single user turn: registry lookup, topic routing,
//! effective-config resolution, guardrails on both sides of the LLM call,
//! and both-or-neither persistence of the message pair.

use std::sync::Arc;

use chrono::{Duration, Utc};
use serde_json::{json, Map, Value};
use thiserror::Error;
use tracing::{info, warn};
use uuid::Uuid;

use relay_core::domain::agent::{Agent, AgentId, AgentRole, AgentStatus, ClientId, SubAgentId};
use relay_core::domain::conversation::{ConversationId, Message, MessageId, MessageKind, Sender};
use relay_core::domain::interview::InterviewId;
use relay_core::errors::DomainError;
use relay_core::guardrails::{check_input, check_output, GuardrailPolicy, Violation};
use relay_core::inherit::resolve_effective;
use relay_db::repositories::{
    AgentStore, ConversationRepository, InterviewRepository, RepositoryError,
};

use crate::llm::{ChatMessage, ChatRequest, LlmClient};
use crate::registry::{AgentRegistry, RegistryError, SyncStats};
use crate::topic::TopicAnalyzer;
use crate::wizard::{WizardCollector, WizardError, WizardTurn};

/// Reply emitted for a guardrail-rejected turn.
pub const GUARDRAIL_FALLBACK_REPLY: &str = "I can't help with that.";
/// Reply emitted when the LLM call itself fails or times out.
pub const SYSTEM_ERROR_REPLY: &str = "Sorry, something went wrong on my side. Please try again.";

#[derive(Debug, Error)]
pub enum OrchestratorError {
    #[error("agent `{0}` was not found")]
    AgentNotFound(String),
    #[error("agent `{0}` is a template and cannot be invoked directly")]
    TemplateNotInvocable(String),
    #[error("agent `{0}` is not a template")]
    NotATemplate(String),
    #[error("effective config was rejected: {0}")]
    ConfigInvalid(DomainError),
    #[error("agent registry is unavailable: {0}")]
    RegistryFault(#[from] RegistryError),
    #[error("turn persistence failed: {0}")]
    Persistence(#[from] RepositoryError),
    #[error(transparent)]
    Wizard(#[from] WizardError),
}

pub struct Orchestrator {
    registry: Arc<AgentRegistry>,
    store: Arc<dyn AgentStore>,
    conversations: Arc<dyn ConversationRepository>,
    llm: Arc<dyn LlmClient>,
    analyzer: TopicAnalyzer,
    wizard: WizardCollector,
    baseline_policy: GuardrailPolicy,
    history_window: usize,
}

impl Orchestrator {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        registry: Arc<AgentRegistry>,
        store: Arc<dyn AgentStore>,
        conversations: Arc<dyn ConversationRepository>,
        interviews: Arc<dyn InterviewRepository>,
        llm: Arc<dyn LlmClient>,
        classifier_model: impl Into<String>,
        baseline_policy: GuardrailPolicy,
        history_window: usize,
    ) -> Self {
        let classifier_model = classifier_model.into();
        let analyzer = TopicAnalyzer::new(llm.clone(), classifier_model.clone());
        let wizard = WizardCollector::new(
            interviews,
            llm.clone(),
            classifier_model,
            "You are a friendly assistant collecting information step by step.",
        );
        Self {
            registry,
            store,
            conversations,
            llm,
            analyzer,
            wizard,
            baseline_policy,
            history_window,
        }
    }

    /// The hot path. One user message in, one reply out, with the message
    /// pair persisted atomically on every completed turn. Concurrent turns
    /// on the same conversation are not serialized here; per-conversation
    /// ordering is the transport's responsibility.
    pub async fn handle_turn(
        &self,
        agent_id: &AgentId,
        conversation_id: &ConversationId,
        sender_id: &str,
        text: &str,
    ) -> Result<String, OrchestratorError> {
        let correlation_id = Uuid::new_v4().to_string();

        let entry = match self.registry.get_entry(agent_id).await {
            Some(entry) => entry,
            None => {
                // Single on-demand reload before the turn is allowed to fail.
                self.registry.load_all().await?;
                self.registry
                    .get_entry(agent_id)
                    .await
                    .ok_or_else(|| OrchestratorError::AgentNotFound(agent_id.0.clone()))?
            }
        };

        if entry.agent.is_template {
            return Err(OrchestratorError::TemplateNotInvocable(agent_id.0.clone()));
        }

        let target = self.analyzer.select(text, &entry.sub_agents).await;
        let (effective, sub_agent_id) = match target {
            Some(sub) => {
                let effective = resolve_effective(&entry.agent.config, &sub.config, &sub.inherit)
                    .map_err(OrchestratorError::ConfigInvalid)?;
                (effective, Some(sub.id.clone()))
            }
            None => (entry.agent.config.clone(), None),
        };
        let policy = effective.guardrails.merge_under(&self.baseline_policy);

        let input = check_input(text, &policy);
        if let Some(violation) = &input.violation {
            info!(
                event_name = "turn.guardrail_rejected",
                correlation_id = %correlation_id,
                agent_id = %agent_id.0,
                conversation_id = %conversation_id.0,
                phase = "input",
                violation = violation.code(),
                "input guardrail rejected the turn"
            );
            self.persist_turn(
                conversation_id,
                sender_id,
                &input.text,
                GUARDRAIL_FALLBACK_REPLY,
                Some((violation, "input")),
                sub_agent_id.as_ref(),
            )
            .await?;
            return Ok(GUARDRAIL_FALLBACK_REPLY.to_string());
        }

        let history =
            self.conversations.recent_messages(conversation_id, self.history_window).await?;
        let request = ChatRequest {
            model: effective.model.clone(),
            system_prompt: effective.system_prompt.clone(),
            temperature: effective.temperature,
            max_tokens: effective.max_tokens,
            history: chat_history(&history),
            user_text: input.text.clone(),
        };

        let reply = match self.llm.complete(&request).await {
            Ok(reply) => reply,
            Err(error) => {
                // Nothing has been written yet, so nothing is persisted.
                warn!(
                    event_name = "turn.llm_failed",
                    correlation_id = %correlation_id,
                    agent_id = %agent_id.0,
                    conversation_id = %conversation_id.0,
                    error = %error,
                    "llm call failed; replying with system fallback"
                );
                return Ok(SYSTEM_ERROR_REPLY.to_string());
            }
        };

        let output = check_output(&reply, &policy);
        if let Some(violation) = &output.violation {
            info!(
                event_name = "turn.guardrail_rejected",
                correlation_id = %correlation_id,
                agent_id = %agent_id.0,
                conversation_id = %conversation_id.0,
                phase = "output",
                violation = violation.code(),
                "output guardrail rejected the reply"
            );
            self.persist_turn(
                conversation_id,
                sender_id,
                &input.text,
                GUARDRAIL_FALLBACK_REPLY,
                Some((violation, "output")),
                sub_agent_id.as_ref(),
            )
            .await?;
            return Ok(GUARDRAIL_FALLBACK_REPLY.to_string());
        }

        self.persist_turn(
            conversation_id,
            sender_id,
            &input.text,
            &reply,
            None,
            sub_agent_id.as_ref(),
        )
        .await?;

        info!(
            event_name = "turn.completed",
            correlation_id = %correlation_id,
            agent_id = %agent_id.0,
            conversation_id = %conversation_id.0,
            sub_agent_id = sub_agent_id.as_ref().map(|id| id.0.as_str()).unwrap_or("none"),
            "turn completed"
        );
        Ok(reply)
    }

    /// Wizard-driven interview turn; state lives on the interview record.
    pub async fn handle_wizard_turn(
        &self,
        interview_id: &InterviewId,
        text: &str,
    ) -> Result<WizardTurn, OrchestratorError> {
        Ok(self.wizard.handle_turn(interview_id, text).await?)
    }

    /// Administrative reconciliation against the agent store.
    pub async fn registry_sync(&self) -> Result<SyncStats, OrchestratorError> {
        Ok(self.registry.sync().await?)
    }

    /// Clone a template into a tenant-owned, directly-invocable agent.
    pub async fn clone_template(
        &self,
        template_id: &AgentId,
        tenant_id: &ClientId,
        custom_name: Option<&str>,
    ) -> Result<AgentId, OrchestratorError> {
        let template = self
            .store
            .find_agent(template_id)
            .await?
            .ok_or_else(|| OrchestratorError::AgentNotFound(template_id.0.clone()))?;
        if !template.is_template {
            return Err(OrchestratorError::NotATemplate(template_id.0.clone()));
        }

        let now = Utc::now();
        let cloned = Agent {
            id: AgentId(Uuid::new_v4().to_string()),
            name: custom_name.map(str::to_string).unwrap_or_else(|| template.name.clone()),
            slug: None,
            client_id: Some(tenant_id.clone()),
            role: AgentRole::ClientAgent,
            is_template: false,
            status: AgentStatus::Active,
            config: template.config.clone(),
            created_at: now,
            updated_at: now,
        };
        let new_id = cloned.id.clone();
        self.store.save_agent(cloned).await?;

        info!(
            event_name = "agent.template_cloned",
            template_id = %template_id.0,
            agent_id = %new_id.0,
            client_id = %tenant_id.0,
            "template cloned into tenant agent"
        );
        self.notify_agent_written().await;
        Ok(new_id)
    }

    /// Write-through hook: reconcile the registry after an observed agent
    /// mutation. Store failures keep the previous snapshot live.
    pub async fn notify_agent_written(&self) {
        if let Err(error) = self.registry.sync().await {
            warn!(
                event_name = "registry.write_through_failed",
                error = %error,
                "write-through registry sync failed; snapshot is stale"
            );
        }
    }

    async fn persist_turn(
        &self,
        conversation_id: &ConversationId,
        sender_id: &str,
        user_text: &str,
        reply_text: &str,
        violation: Option<(&Violation, &str)>,
        sub_agent_id: Option<&SubAgentId>,
    ) -> Result<(), RepositoryError> {
        let user_at = Utc::now();

        let mut user_metadata = Map::new();
        user_metadata.insert("sender_id".to_string(), json!(sender_id));

        let mut agent_metadata = Map::new();
        if let Some(sub_agent_id) = sub_agent_id {
            agent_metadata.insert("sub_agent_id".to_string(), json!(sub_agent_id.0));
        }
        if let Some((violation, phase)) = violation {
            agent_metadata.insert("violation".to_string(), Value::String(violation.code().to_string()));
            agent_metadata.insert("violation_phase".to_string(), json!(phase));
        }

        let mut user_message = Message {
            id: MessageId(Uuid::new_v4().to_string()),
            conversation_id: conversation_id.clone(),
            sender: Sender::Client,
            kind: MessageKind::Text,
            content: user_text.to_string(),
            metadata: user_metadata,
            read: false,
            timestamp: user_at,
        };
        // The client has seen their own message; only the reply is unread.
        user_message.mark_read();
        let agent_message = Message {
            id: MessageId(Uuid::new_v4().to_string()),
            conversation_id: conversation_id.clone(),
            sender: Sender::Agent,
            kind: MessageKind::Text,
            content: reply_text.to_string(),
            metadata: agent_metadata,
            read: false,
            // Strictly after the user message so the history window keeps
            // the pair in order.
            timestamp: user_at + Duration::milliseconds(1),
        };

        self.conversations.append_turn(user_message, agent_message).await
    }
}

fn chat_history(messages: &[Message]) -> Vec<ChatMessage> {
    messages
        .iter()
        .filter_map(|message| match message.sender {
            Sender::Client => Some(ChatMessage::user(message.content.clone())),
            Sender::Agent => Some(ChatMessage::assistant(message.content.clone())),
            Sender::System => None,
        })
        .collect()
}
