//! Agent orchestration runtime - the core of the relay platform.
//!
//! This crate takes an incoming user message aimed at a tenant's main agent
//! and drives it through the full turn pipeline:
//! 1. **Registry lookup** (`registry`) - in-process snapshot of agents and
//!    sub-agents, reconciled against the store on a timer and after writes
//! 2. **Topic routing** (`topic`) - keyword pre-filter plus an LLM classifier
//!    selecting at most one sub-agent per message
//! 3. **Inheritance resolution** - parent config merged with sub-agent
//!    overrides into the effective config for one turn (relay-core)
//! 4. **Guardrails** - input and output policy checks around the LLM call
//! 5. **Persistence** - the user/agent message pair lands atomically
//!
//! The wizard data-collector (`wizard`) is the one specialized agent: it
//! drives a declared field schema to completion instead of free-form chat.
//!
//! # Key Types
//!
//! - `Orchestrator` - the execution loop (see `orchestrator` module)
//! - `LlmClient` - pluggable trait over OpenAI/Anthropic/Ollama
//! - `AgentRegistry` - shared read-heavy agent cache

pub mod llm;
pub mod orchestrator;
pub mod registry;
pub mod topic;
pub mod wizard;

pub use llm::{ChatMessage, ChatRequest, ChatRole, HttpLlmClient, LlmClient, LlmError};
pub use orchestrator::{
    Orchestrator, OrchestratorError, GUARDRAIL_FALLBACK_REPLY, SYSTEM_ERROR_REPLY,
};
pub use registry::{AgentRegistry, RegistryEntry, RegistryError, SyncStats};
pub use topic::TopicAnalyzer;
pub use wizard::{WizardCollector, WizardError, WizardTurn, WIZARD_LLM_FAILURE_REPLY};
