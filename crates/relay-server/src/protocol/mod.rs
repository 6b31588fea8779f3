//! Channel event vocabulary
//!
//! Every frame on a channel is a JSON object `{ "event": <name>, "data": <payload> }`.
//! Inbound and outbound events are closed enums so dispatch is exhaustive.

use serde::{Deserialize, Serialize};

use crate::models::{PersistedMessage, UserId};

/// Events a client may send on its channel. Channel close is not a frame;
/// it is the end of the socket stream.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "camelCase")]
pub enum InboundEvent {
    /// Bind this channel to a user identity
    Join(UserId),
    SendMessage(SendMessagePayload),
    Typing(TypingPayload),
}

impl InboundEvent {
    pub fn parse(frame: &str) -> serde_json::Result<Self> {
        serde_json::from_str(frame)
    }
}

/// Fields are optional on the wire so that missing ones surface as
/// validation failures instead of parse errors.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SendMessagePayload {
    #[serde(default)]
    pub sender_id: Option<UserId>,
    #[serde(default)]
    pub receiver_id: Option<UserId>,
    #[serde(default)]
    pub message: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TypingPayload {
    #[serde(default)]
    pub sender_id: Option<UserId>,
    #[serde(default)]
    pub receiver_id: Option<UserId>,
    #[serde(default)]
    pub is_typing: bool,
}

/// Events pushed from the server to a channel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "camelCase")]
pub enum OutboundEvent {
    ReceiveMessage(PersistedMessage),
    MessageSent(PersistedMessage),
    UserStatusUpdate(StatusUpdate),
    UserTyping(TypingNotice),
    Error(ErrorNotice),
}

impl OutboundEvent {
    pub fn status(user_id: impl Into<UserId>, is_online: bool) -> Self {
        Self::UserStatusUpdate(StatusUpdate {
            user_id: user_id.into(),
            is_online,
        })
    }

    pub fn typing(sender_id: impl Into<UserId>, is_typing: bool) -> Self {
        Self::UserTyping(TypingNotice {
            sender_id: sender_id.into(),
            is_typing,
        })
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self::Error(ErrorNotice {
            message: message.into(),
        })
    }

    /// Wire name of this event
    pub fn name(&self) -> &'static str {
        match self {
            Self::ReceiveMessage(_) => "receiveMessage",
            Self::MessageSent(_) => "messageSent",
            Self::UserStatusUpdate(_) => "userStatusUpdate",
            Self::UserTyping(_) => "userTyping",
            Self::Error(_) => "error",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusUpdate {
    pub user_id: UserId,
    pub is_online: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TypingNotice {
    pub sender_id: UserId,
    pub is_typing: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorNotice {
    pub message: String,
}
