use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::conversation::Channel;
use crate::guardrails::GuardrailPolicy;

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AgentId(pub String);

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SubAgentId(pub String);

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ClientId(pub String);

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentRole {
    SystemOrchestrator,
    SystemSupervisor,
    ClientAgent,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentStatus {
    Active,
    Retired,
}

/// The recognized per-turn configuration of an agent. Sub-agents carry the
/// same shape with every field optional; `inherit::resolve_effective` merges
/// the two into the config one turn actually runs with.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct AgentConfig {
    pub model: String,
    pub provider: String,
    pub system_prompt: String,
    pub temperature: f32,
    pub max_tokens: u32,
    pub channel: Channel,
    #[serde(default)]
    pub tools: BTreeSet<String>,
    #[serde(default)]
    pub guardrails: GuardrailPolicy,
    #[serde(default)]
    pub topics: Vec<String>,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            model: "llama3.1".to_string(),
            provider: "ollama".to_string(),
            system_prompt: String::new(),
            temperature: 0.7,
            max_tokens: 1024,
            channel: Channel::Web,
            tools: BTreeSet::new(),
            guardrails: GuardrailPolicy::default(),
            topics: Vec::new(),
        }
    }
}

/// A sub-agent's config overlay. `None` means "fall back to the parent".
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct SubAgentConfig {
    pub model: Option<String>,
    pub provider: Option<String>,
    pub system_prompt: Option<String>,
    pub temperature: Option<f32>,
    pub max_tokens: Option<u32>,
    pub channel: Option<Channel>,
    pub tools: Option<BTreeSet<String>>,
    pub guardrails: Option<GuardrailPolicy>,
    pub topics: Option<Vec<String>>,
}

/// Keys a sub-agent may list in its inheritance set. A listed key is taken
/// from the parent verbatim; set- and sequence-valued keys union instead.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConfigKey {
    Model,
    Provider,
    SystemPrompt,
    Temperature,
    MaxTokens,
    Channel,
    Tools,
    Guardrails,
    #[serde(rename = "guardrails.keywords")]
    GuardrailKeywords,
    Topics,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoutingConfig {
    #[serde(default)]
    pub topics: Vec<String>,
    #[serde(default)]
    pub keywords: BTreeSet<String>,
}

impl RoutingConfig {
    /// A sub-agent is only addressable by the router when it declares at
    /// least one topic or keyword.
    pub fn is_addressable(&self) -> bool {
        !self.topics.is_empty() || !self.keywords.is_empty()
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Agent {
    pub id: AgentId,
    pub name: String,
    pub slug: Option<String>,
    pub client_id: Option<ClientId>,
    pub role: AgentRole,
    pub is_template: bool,
    pub status: AgentStatus,
    pub config: AgentConfig,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SubAgent {
    pub id: SubAgentId,
    pub parent_id: AgentId,
    pub client_id: Option<ClientId>,
    pub name: String,
    pub routing: RoutingConfig,
    pub inherit: BTreeSet<ConfigKey>,
    pub config: SubAgentConfig,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl SubAgent {
    /// Tenant containment: a sub-agent lives in the same tenant as its
    /// parent, including the system case where both have no tenant.
    pub fn same_tenant_as(&self, parent: &Agent) -> bool {
        self.client_id == parent.client_id
    }
}
