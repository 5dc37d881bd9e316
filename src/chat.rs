use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::model::{ChatId, MessageId, UserId};
use crate::view::Reply;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Sender {
    pub user_id: UserId,
    pub name: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChatKind {
    Private,
    Group,
}

/// An inbound event from the chat transport.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Update {
    Message {
        chat_id: ChatId,
        chat_kind: ChatKind,
        from: Sender,
        text: String,
    },
    Callback {
        chat_id: ChatId,
        message_id: MessageId,
        from: Sender,
        data: String,
    },
}

impl Update {
    pub fn sender(&self) -> &Sender {
        match self {
            Update::Message { from, .. } | Update::Callback { from, .. } => from,
        }
    }

    pub fn chat_id(&self) -> ChatId {
        match self {
            Update::Message { chat_id, .. } | Update::Callback { chat_id, .. } => *chat_id,
        }
    }

    pub fn kind_label(&self) -> &'static str {
        match self {
            Update::Message { .. } => "message",
            Update::Callback { .. } => "callback",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChatError {
    /// No transport is connected.
    Disconnected,
    Timeout,
    Rejected(String),
}

impl std::fmt::Display for ChatError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ChatError::Disconnected => write!(f, "chat transport disconnected"),
            ChatError::Timeout => write!(f, "chat transport timed out"),
            ChatError::Rejected(reason) => write!(f, "chat transport rejected request: {reason}"),
        }
    }
}

impl std::error::Error for ChatError {}

#[async_trait]
pub trait ChatPort: Send + Sync {
    async fn send(&self, chat_id: ChatId, reply: &Reply) -> Result<MessageId, ChatError>;
    async fn edit(
        &self,
        chat_id: ChatId,
        message_id: MessageId,
        reply: &Reply,
    ) -> Result<(), ChatError>;
}
