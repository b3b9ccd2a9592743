pub mod config;
pub mod domain;
pub mod errors;
pub mod guardrails;
pub mod inherit;

pub use domain::agent::{
    Agent, AgentConfig, AgentId, AgentRole, AgentStatus, ClientId, ConfigKey, RoutingConfig,
    SubAgent, SubAgentConfig, SubAgentId,
};
pub use domain::conversation::{
    Channel, Conversation, ConversationId, ConversationStatus, Message, MessageId, MessageKind,
    Sender,
};
pub use domain::interview::{
    AnswerOutcome, FieldDescriptor, FieldType, Interview, InterviewId, WizardConfig,
    WizardFieldSpec, WizardId,
};
pub use errors::DomainError;
pub use guardrails::{GuardrailOutcome, GuardrailPolicy, PiiPolicy, Violation};
pub use inherit::resolve_effective;
