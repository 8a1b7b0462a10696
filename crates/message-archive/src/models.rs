//! Archive model types.

use chrono::{DateTime, Utc};
use stanza_model::{MessageType, StanzaIdScope};
use uuid::Uuid;

/// Whether the account sent or received a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Direction {
    Inbound,
    Outbound,
}

impl Direction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Inbound => "inbound",
            Self::Outbound => "outbound",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "inbound" => Some(Self::Inbound),
            "outbound" => Some(Self::Outbound),
            _ => None,
        }
    }
}

/// Identity of an archived message. Immutable once inserted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessageRecord {
    pub id: Uuid,
    /// Bare address of the owning account.
    pub account: String,
    /// Bare address of the other party.
    pub counterpart: String,
    pub direction: Direction,
    pub message_type: MessageType,
    pub origin_id: Option<String>,
    /// Server-assigned id issued by the account or its host.
    pub stanza_id: Option<String>,
    /// Issuer of `stanza_id`.
    pub stanza_id_scope: Option<StanzaIdScope>,
}

/// Mutable state of an archived message.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Metadata {
    pub created: Option<DateTime<Utc>>,
    pub transmitted: Option<DateTime<Utc>>,
    pub read: Option<DateTime<Utc>>,
    /// User-visible delivery error.
    pub error: Option<String>,
    pub is_carbon_copy: bool,
    /// Soft-deleted; hidden from listings until deleted.
    pub thrashed: bool,
}

impl Metadata {
    /// Metadata for a message created now and not yet transmitted.
    pub fn created_now() -> Self {
        Self {
            created: Some(Utc::now()),
            ..Self::default()
        }
    }

    pub fn with_transmitted(mut self, transmitted: DateTime<Utc>) -> Self {
        self.transmitted = Some(transmitted);
        self
    }

    pub fn with_carbon_copy(mut self, is_carbon_copy: bool) -> Self {
        self.is_carbon_copy = is_carbon_copy;
        self
    }

    /// True for an outbound message still waiting to be sent.
    pub fn is_pending(&self) -> bool {
        self.transmitted.is_none() && self.error.is_none() && !self.thrashed
    }
}

/// Identity row about to be inserted.
#[derive(Debug, Clone)]
pub struct NewMessage {
    pub id: Uuid,
    pub account: String,
    pub counterpart: String,
    pub direction: Direction,
    pub message_type: MessageType,
    pub origin_id: Option<String>,
    pub stanza_id: Option<String>,
    pub stanza_id_scope: Option<StanzaIdScope>,
}

impl NewMessage {
    pub fn into_record(self) -> MessageRecord {
        MessageRecord {
            id: self.id,
            account: self.account,
            counterpart: self.counterpart,
            direction: self.direction,
            message_type: self.message_type,
            origin_id: self.origin_id,
            stanza_id: self.stanza_id,
            stanza_id_scope: self.stanza_id_scope,
        }
    }
}

/// Message ids touched by one committed write.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ArchiveChange {
    pub inserted: Vec<Uuid>,
    pub updated: Vec<Uuid>,
    pub deleted: Vec<Uuid>,
}

impl ArchiveChange {
    pub fn inserted(id: Uuid) -> Self {
        Self {
            inserted: vec![id],
            ..Self::default()
        }
    }

    pub fn updated(id: Uuid) -> Self {
        Self {
            updated: vec![id],
            ..Self::default()
        }
    }

    pub fn deleted(id: Uuid) -> Self {
        Self {
            deleted: vec![id],
            ..Self::default()
        }
    }

    pub fn is_empty(&self) -> bool {
        self.inserted.is_empty() && self.updated.is_empty() && self.deleted.is_empty()
    }
}
