//! SQLite persistence for the relay orchestration service: pool setup,
//! embedded migrations, and repository implementations over the domain model.

pub mod connection;
pub mod migrations;
pub mod repositories;

pub use connection::{connect, connect_with, connect_with_settings, DbPool, PoolSettings};
pub use repositories::{
    AgentStore, ConversationRepository, InMemoryAgentStore, InMemoryConversationRepository,
    InMemoryInterviewRepository, InterviewRepository, RepositoryError, SqlAgentStore,
    SqlConversationRepository, SqlInterviewRepository,
};
