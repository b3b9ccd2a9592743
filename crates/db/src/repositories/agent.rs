use sqlx::sqlite::SqliteRow;
use sqlx::Row;

use relay_core::domain::agent::{Agent, AgentId, ClientId, SubAgent, SubAgentId};

use super::{decode_enum, decode_json, encode_enum, encode_json, AgentStore, RepositoryError};
use crate::DbPool;

pub struct SqlAgentStore {
    pool: DbPool,
}

impl SqlAgentStore {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

#[async_trait::async_trait]
impl AgentStore for SqlAgentStore {
    async fn list_agents(&self) -> Result<Vec<Agent>, RepositoryError> {
        let rows = sqlx::query(
            "SELECT id, name, slug, client_id, role, is_template, status, config, created_at, updated_at \
             FROM agents ORDER BY id",
        )
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(agent_from_row).collect()
    }

    async fn find_agent(&self, id: &AgentId) -> Result<Option<Agent>, RepositoryError> {
        let row = sqlx::query(
            "SELECT id, name, slug, client_id, role, is_template, status, config, created_at, updated_at \
             FROM agents WHERE id = ?",
        )
        .bind(&id.0)
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(agent_from_row).transpose()
    }

    async fn list_sub_agents(&self, parent_id: &AgentId) -> Result<Vec<SubAgent>, RepositoryError> {
        let rows = sqlx::query(
            "SELECT id, parent_agent_id, client_id, name, topics, keywords, inheritance_keys, config, created_at, updated_at \
             FROM sub_agents WHERE parent_agent_id = ? ORDER BY created_at, id",
        )
        .bind(&parent_id.0)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(sub_agent_from_row).collect()
    }

    async fn save_agent(&self, agent: Agent) -> Result<(), RepositoryError> {
        // ON CONFLICT instead of INSERT OR REPLACE: REPLACE deletes the row
        // first, which would cascade away the agent's sub-agents.
        sqlx::query(
            "INSERT INTO agents (id, name, slug, client_id, role, is_template, status, config, created_at, updated_at) \
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?) \
             ON CONFLICT (id) DO UPDATE SET \
                 name = excluded.name, slug = excluded.slug, client_id = excluded.client_id, \
                 role = excluded.role, is_template = excluded.is_template, status = excluded.status, \
                 config = excluded.config, updated_at = excluded.updated_at",
        )
        .bind(&agent.id.0)
        .bind(&agent.name)
        .bind(&agent.slug)
        .bind(agent.client_id.as_ref().map(|client| client.0.clone()))
        .bind(encode_enum(&agent.role)?)
        .bind(agent.is_template)
        .bind(encode_enum(&agent.status)?)
        .bind(encode_json(&agent.config)?)
        .bind(agent.created_at)
        .bind(agent.updated_at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn save_sub_agent(&self, sub_agent: SubAgent) -> Result<(), RepositoryError> {
        let parent_client: Option<(Option<String>,)> =
            sqlx::query_as("SELECT client_id FROM agents WHERE id = ?")
                .bind(&sub_agent.parent_id.0)
                .fetch_optional(&self.pool)
                .await?;

        let Some((parent_client,)) = parent_client else {
            return Err(RepositoryError::Constraint(format!(
                "sub-agent parent `{}` is not a known agent",
                sub_agent.parent_id.0
            )));
        };

        let sub_client = sub_agent.client_id.as_ref().map(|client| client.0.clone());
        if sub_client != parent_client {
            return Err(RepositoryError::Constraint(format!(
                "sub-agent `{}` tenant {:?} does not match parent tenant {:?}",
                sub_agent.id.0, sub_client, parent_client
            )));
        }

        sqlx::query(
            "INSERT INTO sub_agents (id, parent_agent_id, client_id, name, topics, keywords, inheritance_keys, config, created_at, updated_at) \
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?) \
             ON CONFLICT (id) DO UPDATE SET \
                 parent_agent_id = excluded.parent_agent_id, client_id = excluded.client_id, \
                 name = excluded.name, topics = excluded.topics, keywords = excluded.keywords, \
                 inheritance_keys = excluded.inheritance_keys, config = excluded.config, \
                 updated_at = excluded.updated_at",
        )
        .bind(&sub_agent.id.0)
        .bind(&sub_agent.parent_id.0)
        .bind(sub_client)
        .bind(&sub_agent.name)
        .bind(encode_json(&sub_agent.routing.topics)?)
        .bind(encode_json(&sub_agent.routing.keywords)?)
        .bind(encode_json(&sub_agent.inherit)?)
        .bind(encode_json(&sub_agent.config)?)
        .bind(sub_agent.created_at)
        .bind(sub_agent.updated_at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn delete_agent(&self, id: &AgentId) -> Result<(), RepositoryError> {
        // Sub-agents go with the parent via ON DELETE CASCADE.
        sqlx::query("DELETE FROM agents WHERE id = ?").bind(&id.0).execute(&self.pool).await?;
        Ok(())
    }
}

fn agent_from_row(row: &SqliteRow) -> Result<Agent, RepositoryError> {
    Ok(Agent {
        id: AgentId(row.get("id")),
        name: row.get("name"),
        slug: row.get("slug"),
        client_id: row.get::<Option<String>, _>("client_id").map(ClientId),
        role: decode_enum("role", &row.get::<String, _>("role"))?,
        is_template: row.get("is_template"),
        status: decode_enum("status", &row.get::<String, _>("status"))?,
        config: decode_json("config", &row.get::<String, _>("config"))?,
        created_at: row.get("created_at"),
        updated_at: row.get("updated_at"),
    })
}

fn sub_agent_from_row(row: &SqliteRow) -> Result<SubAgent, RepositoryError> {
    Ok(SubAgent {
        id: SubAgentId(row.get("id")),
        parent_id: AgentId(row.get("parent_agent_id")),
        client_id: row.get::<Option<String>, _>("client_id").map(ClientId),
        name: row.get("name"),
        routing: relay_core::domain::agent::RoutingConfig {
            topics: decode_json("topics", &row.get::<String, _>("topics"))?,
            keywords: decode_json("keywords", &row.get::<String, _>("keywords"))?,
        },
        inherit: decode_json("inheritance_keys", &row.get::<String, _>("inheritance_keys"))?,
        config: decode_json("config", &row.get::<String, _>("config"))?,
        created_at: row.get("created_at"),
        updated_at: row.get("updated_at"),
    })
}
