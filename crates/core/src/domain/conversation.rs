use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::domain::agent::ClientId;

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ConversationId(pub String);

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MessageId(pub String);

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Channel {
    Whatsapp,
    Email,
    Web,
    Sms,
    Telegram,
    Phone,
}

impl Channel {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Whatsapp => "whatsapp",
            Self::Email => "email",
            Self::Web => "web",
            Self::Sms => "sms",
            Self::Telegram => "telegram",
            Self::Phone => "phone",
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConversationStatus {
    Active,
    Closed,
    Pending,
}

impl ConversationStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Closed => "closed",
            Self::Pending => "pending",
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Sender {
    Client,
    Agent,
    System,
}

impl Sender {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Client => "client",
            Self::Agent => "agent",
            Self::System => "system",
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageKind {
    Text,
    Image,
    Audio,
    Document,
}

impl MessageKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Text => "text",
            Self::Image => "image",
            Self::Audio => "audio",
            Self::Document => "document",
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Conversation {
    pub id: ConversationId,
    pub client_id: ClientId,
    pub status: ConversationStatus,
    pub channel: Channel,
    pub priority: i32,
    pub unread_count: u32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// A record in a conversation. Messages are immutable after insertion; the
/// only mutation the model allows is the monotonic read flag.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub id: MessageId,
    pub conversation_id: ConversationId,
    pub sender: Sender,
    pub kind: MessageKind,
    pub content: String,
    #[serde(default)]
    pub metadata: Map<String, Value>,
    pub read: bool,
    pub timestamp: DateTime<Utc>,
}

impl Message {
    /// `read` only ever transitions false -> true.
    pub fn mark_read(&mut self) {
        self.read = true;
    }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;
    use serde_json::Map;

    use crate::domain::conversation::{
        Channel, ConversationId, Message, MessageId, MessageKind, Sender,
    };

    #[test]
    fn read_flag_is_monotonic() {
        let mut message = Message {
            id: MessageId("m-1".to_string()),
            conversation_id: ConversationId("c-1".to_string()),
            sender: Sender::Client,
            kind: MessageKind::Text,
            content: "hello".to_string(),
            metadata: Map::new(),
            read: false,
            timestamp: Utc::now(),
        };

        message.mark_read();
        assert!(message.read);
        message.mark_read();
        assert!(message.read, "repeat read stays read");
    }

    #[test]
    fn channel_round_trips_through_serde() {
        for channel in
            [Channel::Whatsapp, Channel::Email, Channel::Web, Channel::Sms, Channel::Telegram]
        {
            let encoded = serde_json::to_string(&channel).expect("channel encode");
            assert_eq!(encoded, format!("\"{}\"", channel.as_str()));
        }
    }
}
