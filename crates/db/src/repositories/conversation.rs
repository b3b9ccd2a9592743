use sqlx::sqlite::SqliteRow;
use sqlx::Row;

use relay_core::domain::agent::ClientId;
use relay_core::domain::conversation::{Conversation, ConversationId, Message, MessageId};

use super::{decode_enum, decode_json, encode_enum, encode_json, ConversationRepository, RepositoryError};
use crate::DbPool;

pub struct SqlConversationRepository {
    pool: DbPool,
}

impl SqlConversationRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

#[async_trait::async_trait]
impl ConversationRepository for SqlConversationRepository {
    async fn find(&self, id: &ConversationId) -> Result<Option<Conversation>, RepositoryError> {
        let row = sqlx::query(
            "SELECT id, client_id, status, channel, priority, unread_count, created_at, updated_at \
             FROM conversations WHERE id = ?",
        )
        .bind(&id.0)
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(conversation_from_row).transpose()
    }

    async fn save(&self, conversation: Conversation) -> Result<(), RepositoryError> {
        sqlx::query(
            "INSERT INTO conversations (id, client_id, status, channel, priority, unread_count, created_at, updated_at) \
             VALUES (?, ?, ?, ?, ?, ?, ?, ?) \
             ON CONFLICT (id) DO UPDATE SET \
                 client_id = excluded.client_id, status = excluded.status, channel = excluded.channel, \
                 priority = excluded.priority, unread_count = excluded.unread_count, \
                 updated_at = excluded.updated_at",
        )
        .bind(&conversation.id.0)
        .bind(&conversation.client_id.0)
        .bind(encode_enum(&conversation.status)?)
        .bind(encode_enum(&conversation.channel)?)
        .bind(conversation.priority)
        .bind(conversation.unread_count as i64)
        .bind(conversation.created_at)
        .bind(conversation.updated_at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn recent_messages(
        &self,
        id: &ConversationId,
        limit: usize,
    ) -> Result<Vec<Message>, RepositoryError> {
        // Newest `limit` rows, handed back oldest-first for prompt assembly.
        let rows = sqlx::query(
            "SELECT id, conversation_id, sender, kind, content, metadata, read, timestamp \
             FROM messages WHERE conversation_id = ? \
             ORDER BY timestamp DESC, id DESC LIMIT ?",
        )
        .bind(&id.0)
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await?;

        let mut messages: Vec<Message> =
            rows.iter().map(message_from_row).collect::<Result<_, _>>()?;
        messages.reverse();
        Ok(messages)
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

        let conversation_id = user_message.conversation_id.clone();
        let turn_at = agent_message.timestamp;

        let mut tx = self.pool.begin().await?;
        insert_message(&mut tx, &user_message).await?;
        insert_message(&mut tx, &agent_message).await?;
        sqlx::query(
            "UPDATE conversations SET updated_at = ?, unread_count = unread_count + 1 WHERE id = ?",
        )
        .bind(turn_at)
        .bind(&conversation_id.0)
        .execute(&mut *tx)
        .await?;
        tx.commit().await?;

        Ok(())
    }
}

async fn insert_message(
    tx: &mut sqlx::Transaction<'_, sqlx::Sqlite>,
    message: &Message,
) -> Result<(), RepositoryError> {
    sqlx::query(
        "INSERT INTO messages (id, conversation_id, sender, kind, content, metadata, read, timestamp) \
         VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
    )
    .bind(&message.id.0)
    .bind(&message.conversation_id.0)
    .bind(encode_enum(&message.sender)?)
    .bind(encode_enum(&message.kind)?)
    .bind(&message.content)
    .bind(encode_json(&message.metadata)?)
    .bind(message.read)
    .bind(message.timestamp)
    .execute(&mut **tx)
    .await?;
    Ok(())
}

fn conversation_from_row(row: &SqliteRow) -> Result<Conversation, RepositoryError> {
    Ok(Conversation {
        id: ConversationId(row.get("id")),
        client_id: ClientId(row.get("client_id")),
        status: decode_enum("status", &row.get::<String, _>("status"))?,
        channel: decode_enum("channel", &row.get::<String, _>("channel"))?,
        priority: row.get("priority"),
        unread_count: row.get::<i64, _>("unread_count").max(0) as u32,
        created_at: row.get("created_at"),
        updated_at: row.get("updated_at"),
    })
}

fn message_from_row(row: &SqliteRow) -> Result<Message, RepositoryError> {
    Ok(Message {
        id: MessageId(row.get("id")),
        conversation_id: ConversationId(row.get("conversation_id")),
        sender: decode_enum("sender", &row.get::<String, _>("sender"))?,
        kind: decode_enum("kind", &row.get::<String, _>("kind"))?,
        content: row.get("content"),
        metadata: decode_json("metadata", &row.get::<String, _>("metadata"))?,
        read: row.get("read"),
        timestamp: row.get("timestamp"),
    })
}

#[cfg(test)]
mod tests {
    use chrono::{Duration, Utc};
    use serde_json::Map;

    use relay_core::domain::agent::ClientId;
    use relay_core::domain::conversation::{
        Channel, Conversation, ConversationId, ConversationStatus, Message, MessageId,
        MessageKind, Sender,
    };

    use crate::repositories::{ConversationRepository, SqlConversationRepository};
    use crate::{connect_with_settings, migrations};

    async fn repo() -> SqlConversationRepository {
        let pool = connect_with_settings("sqlite::memory:", 1, 5)
            .await
            .expect("pool should connect");
        migrations::run_pending(&pool).await.expect("migrations should apply");
        SqlConversationRepository::new(pool)
    }

    fn conversation(id: &str) -> Conversation {
        Conversation {
            id: ConversationId(id.to_string()),
            client_id: ClientId("client-1".to_string()),
            status: ConversationStatus::Active,
            channel: Channel::Web,
            priority: 0,
            unread_count: 0,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    fn message(id: &str, conversation: &str, sender: Sender, offset_secs: i64) -> Message {
        Message {
            id: MessageId(id.to_string()),
            conversation_id: ConversationId(conversation.to_string()),
            sender,
            kind: MessageKind::Text,
            content: format!("message {id}"),
            metadata: Map::new(),
            read: false,
            timestamp: Utc::now() + Duration::seconds(offset_secs),
        }
    }

    #[tokio::test]
    async fn conversation_round_trips() {
        let repo = repo().await;
        let saved = conversation("c-1");
        repo.save(saved.clone()).await.expect("save conversation");

        let found = repo
            .find(&saved.id)
            .await
            .expect("find conversation")
            .expect("conversation exists");
        assert_eq!(found.client_id, saved.client_id);
        assert_eq!(found.status, saved.status);
        assert_eq!(found.channel, saved.channel);
    }

    #[tokio::test]
    async fn append_turn_persists_both_messages_and_bumps_conversation() {
        let repo = repo().await;
        repo.save(conversation("c-1")).await.expect("save conversation");

        repo.append_turn(
            message("m-1", "c-1", Sender::Client, 0),
            message("m-2", "c-1", Sender::Agent, 1),
        )
        .await
        .expect("append turn");

        let messages = repo
            .recent_messages(&ConversationId("c-1".to_string()), 10)
            .await
            .expect("recent messages");
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0].sender, Sender::Client);
        assert_eq!(messages[1].sender, Sender::Agent);

        let found = repo
            .find(&ConversationId("c-1".to_string()))
            .await
            .expect("find conversation")
            .expect("conversation exists");
        assert_eq!(found.unread_count, 1);
    }

    #[tokio::test]
    async fn append_turn_is_atomic_on_duplicate_message_id() {
        let repo = repo().await;
        repo.save(conversation("c-1")).await.expect("save conversation");
        repo.append_turn(
            message("m-1", "c-1", Sender::Client, 0),
            message("m-2", "c-1", Sender::Agent, 1),
        )
        .await
        .expect("first turn");

        // Second agent message collides on primary key, so the whole turn
        // must roll back, user message included.
        let error = repo
            .append_turn(
                message("m-3", "c-1", Sender::Client, 2),
                message("m-2", "c-1", Sender::Agent, 3),
            )
            .await
            .expect_err("duplicate id must fail the turn");
        drop(error);

        let messages = repo
            .recent_messages(&ConversationId("c-1".to_string()), 10)
            .await
            .expect("recent messages");
        assert_eq!(messages.len(), 2, "rolled-back user message must not persist");
        let found = repo
            .find(&ConversationId("c-1".to_string()))
            .await
            .expect("find conversation")
            .expect("conversation exists");
        assert_eq!(found.unread_count, 1);
    }

    #[tokio::test]
    async fn recent_messages_window_is_newest_suffix_oldest_first() {
        let repo = repo().await;
        repo.save(conversation("c-1")).await.expect("save conversation");

        for turn in 0..5 {
            repo.append_turn(
                message(&format!("u-{turn}"), "c-1", Sender::Client, turn * 2),
                message(&format!("a-{turn}"), "c-1", Sender::Agent, turn * 2 + 1),
            )
            .await
            .expect("append turn");
        }

        let window = repo
            .recent_messages(&ConversationId("c-1".to_string()), 4)
            .await
            .expect("recent messages");
        let ids: Vec<&str> = window.iter().map(|m| m.id.0.as_str()).collect();
        assert_eq!(ids, vec!["u-3", "a-3", "u-4", "a-4"]);
    }

    #[tokio::test]
    async fn cross_conversation_turn_is_rejected() {
        let repo = repo().await;
        repo.save(conversation("c-1")).await.expect("save conversation");
        repo.save(conversation("c-2")).await.expect("save conversation");

        let result = repo
            .append_turn(
                message("m-1", "c-1", Sender::Client, 0),
                message("m-2", "c-2", Sender::Agent, 1),
            )
            .await;
        assert!(result.is_err());
    }
}
