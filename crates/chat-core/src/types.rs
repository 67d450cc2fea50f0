use std::fmt;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::ComposeError;

/// Client-generated token that correlates a composed message with its server echo.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct IdempotencyKey(String);

impl IdempotencyKey {
    /// Generate a fresh random key (UUID v4).
    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<String> for IdempotencyKey {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl From<&str> for IdempotencyKey {
    fn from(value: &str) -> Self {
        Self(value.to_owned())
    }
}

impl fmt::Display for IdempotencyKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Identity of the signed-in user, fixed for the lifetime of a store.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CurrentUser {
    /// Backend user ID.
    pub id: String,
    /// Display name, when the account has one.
    pub name: Option<String>,
    /// Avatar image URL, when the account has one.
    pub avatar_url: Option<String>,
}

impl CurrentUser {
    pub fn new(
        id: impl Into<String>,
        name: Option<String>,
        avatar_url: Option<String>,
    ) -> Self {
        Self {
            id: id.into(),
            name,
            avatar_url,
        }
    }
}

/// Sender identity attached to messages delivered by the server.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SenderIdentity {
    /// Backend user ID of the sender.
    pub id: String,
    /// Optional display name.
    pub name: Option<String>,
    /// Optional avatar image URL.
    pub avatar_url: Option<String>,
}

impl SenderIdentity {
    pub fn new(id: impl Into<String>, name: Option<String>, avatar_url: Option<String>) -> Self {
        Self {
            id: id.into(),
            name,
            avatar_url,
        }
    }
}

impl From<&CurrentUser> for SenderIdentity {
    fn from(user: &CurrentUser) -> Self {
        Self {
            id: user.id.clone(),
            name: user.name.clone(),
            avatar_url: user.avatar_url.clone(),
        }
    }
}

/// One part of a multipart message payload.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub enum MessagePart {
    /// Content carried inline in the message, tagged with a MIME-like type.
    Inline { part_type: String, content: String },
    /// Content hosted elsewhere and referenced by URL.
    Url { part_type: String, url: String },
}

impl MessagePart {
    pub fn inline(part_type: impl Into<String>, content: impl Into<String>) -> Self {
        Self::Inline {
            part_type: part_type.into(),
            content: content.into(),
        }
    }
}

/// Canonical message as delivered (or echoed) by the server.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ServerMessage {
    /// Server-assigned message ID.
    pub id: u64,
    /// Who sent the message.
    pub sender: SenderIdentity,
    /// Payload parts in server order.
    pub parts: Vec<MessagePart>,
}

impl ServerMessage {
    pub fn new(id: u64, sender: SenderIdentity, parts: Vec<MessagePart>) -> Self {
        Self { id, sender, parts }
    }
}

/// Message composed on this client that the server has not confirmed yet.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ComposedMessage {
    text: String,
    key: IdempotencyKey,
}

impl ComposedMessage {
    /// Compose a message from user input, generating a fresh idempotency key.
    ///
    /// Text that is empty after trimming is rejected.
    pub fn compose(text: impl Into<String>) -> Result<Self, ComposeError> {
        let text = text.into();
        if text.trim().is_empty() {
            return Err(ComposeError::EmptyText);
        }
        Ok(Self::with_key(text, IdempotencyKey::generate()))
    }

    /// Build a message with a caller-chosen key.
    pub fn with_key(text: impl Into<String>, key: impl Into<IdempotencyKey>) -> Self {
        Self {
            text: text.into(),
            key: key.into(),
        }
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn key(&self) -> &IdempotencyKey {
        &self.key
    }
}

/// Delivery state of a locally composed message.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum LocalMessageState {
    /// Handed to the delivery channel, no result yet.
    Pending,
    /// The delivery channel reported failure.
    Failed,
    /// The delivery channel reported success; the server echo may still be in flight.
    Sent,
}

/// One slot of the ordered message list.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub enum MessageEntry {
    /// Authoritative copy received from the server.
    FromServer(ServerMessage),
    /// Locally composed copy awaiting confirmation.
    Local {
        message: ComposedMessage,
        state: LocalMessageState,
    },
}

impl MessageEntry {
    /// Idempotency key used to merge this entry, if it carries one.
    pub fn idempotency_key(&self) -> Option<&str> {
        match self {
            Self::FromServer(message) => message.idempotency_key(),
            Self::Local { message, .. } => Some(message.key().as_str()),
        }
    }

    pub fn is_from_server(&self) -> bool {
        matches!(self, Self::FromServer(_))
    }

    pub fn is_local(&self) -> bool {
        matches!(self, Self::Local { .. })
    }
}

/// Change descriptor delivered with every store notification.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum ChangeKind {
    /// A new entry was appended at this index.
    Added(usize),
    /// The entry at this index was replaced in place.
    Updated(usize),
}

impl ChangeKind {
    pub fn index(&self) -> usize {
        match self {
            Self::Added(index) | Self::Updated(index) => *index,
        }
    }

    /// Whether the renderer should scroll to reveal the affected row.
    pub fn reveals_new_row(&self) -> bool {
        matches!(self, Self::Added(_))
    }
}

/// Immutable copy of the store state handed to listeners.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct StoreSnapshot {
    pub current_user: CurrentUser,
    pub entries: Vec<MessageEntry>,
}
