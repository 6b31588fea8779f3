use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::ValidationFailure;

/// Opaque user identity, supplied by clients.
pub type UserId = String;

/// Longest accepted message body, in characters.
pub const MAX_MESSAGE_LEN: usize = 1000;

pub const RULE_MESSAGE_REQUIRED: &str = "Message is required";
pub const RULE_MESSAGE_TOO_LONG: &str = "Message must be less than 1000 characters";
pub const RULE_SENDER_REQUIRED: &str = "Sender ID is required";
pub const RULE_RECEIVER_REQUIRED: &str = "Receiver ID is required";

/// A message after the store accepted it. Immutable from here on.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PersistedMessage {
    pub id: String,
    pub sender_id: UserId,
    pub receiver_id: UserId,
    /// Trimmed body
    pub message: String,
    pub timestamp: DateTime<Utc>,
}

impl PersistedMessage {
    /// True when this message belongs to the conversation between `a` and `b`,
    /// in either direction.
    pub fn is_between(&self, a: &str, b: &str) -> bool {
        (self.sender_id == a && self.receiver_id == b)
            || (self.sender_id == b && self.receiver_id == a)
    }

    pub fn involves(&self, user_id: &str) -> bool {
        self.sender_id == user_id || self.receiver_id == user_id
    }
}

/// Durable online/offline state of a user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PresenceRecord {
    pub user_id: UserId,
    pub is_online: bool,
    pub last_seen: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageStats {
    pub total_messages: i64,
    pub sent_messages: i64,
    pub received_messages: i64,
}

/// A message that passed validation and is ready to be stored.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutgoingMessage {
    pub sender_id: UserId,
    pub receiver_id: UserId,
    pub body: String,
}

fn present(value: Option<&str>) -> Option<&str> {
    value.filter(|v| !v.trim().is_empty())
}

/// Check a submitted message against every rule, collecting all violations.
///
/// The length limit applies to the body as submitted; the stored body is the
/// trimmed one.
pub fn validate_message(
    sender_id: Option<&str>,
    receiver_id: Option<&str>,
    body: Option<&str>,
) -> Result<OutgoingMessage, ValidationFailure> {
    let mut errors = Vec::new();

    let trimmed = body.map(str::trim).unwrap_or_default();
    if trimmed.is_empty() {
        errors.push(RULE_MESSAGE_REQUIRED.to_string());
    }
    if body.is_some_and(|b| b.chars().count() > MAX_MESSAGE_LEN) {
        errors.push(RULE_MESSAGE_TOO_LONG.to_string());
    }

    let sender = present(sender_id);
    if sender.is_none() {
        errors.push(RULE_SENDER_REQUIRED.to_string());
    }
    let receiver = present(receiver_id);
    if receiver.is_none() {
        errors.push(RULE_RECEIVER_REQUIRED.to_string());
    }

    match (sender, receiver) {
        (Some(sender), Some(receiver)) if errors.is_empty() => Ok(OutgoingMessage {
            sender_id: sender.to_string(),
            receiver_id: receiver.to_string(),
            body: trimmed.to_string(),
        }),
        _ => Err(ValidationFailure { errors }),
    }
}
