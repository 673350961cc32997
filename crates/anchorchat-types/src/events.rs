use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::ChatMessage;

/// Table a change was recorded against.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeTable {
    Messages,
    ConversationParticipants,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeOp {
    Insert,
    Update,
}

/// Committed store changes, fanned out to feed subscribers.
///
/// `seq` is the store's change-log sequence number; a single subscriber
/// always observes it strictly increasing.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum StoreEvent {
    /// A new message was persisted
    MessageInsert { seq: i64, message: ChatMessage },

    /// A message's verification flag changed
    MessageVerified {
        seq: i64,
        message_id: Uuid,
        conversation_id: Uuid,
        chain_hash: Option<String>,
        chain_verified: bool,
    },

    /// A user was added to a conversation
    ParticipantInsert {
        seq: i64,
        conversation_id: Uuid,
        user_id: Uuid,
    },
}

impl StoreEvent {
    pub fn seq(&self) -> i64 {
        match self {
            Self::MessageInsert { seq, .. }
            | Self::MessageVerified { seq, .. }
            | Self::ParticipantInsert { seq, .. } => *seq,
        }
    }

    pub fn table(&self) -> ChangeTable {
        match self {
            Self::MessageInsert { .. } | Self::MessageVerified { .. } => ChangeTable::Messages,
            Self::ParticipantInsert { .. } => ChangeTable::ConversationParticipants,
        }
    }

    pub fn op(&self) -> ChangeOp {
        match self {
            Self::MessageInsert { .. } | Self::ParticipantInsert { .. } => ChangeOp::Insert,
            Self::MessageVerified { .. } => ChangeOp::Update,
        }
    }

    /// Every store event is scoped to exactly one conversation.
    pub fn conversation_id(&self) -> Uuid {
        match self {
            Self::MessageInsert { message, .. } => message.conversation_id,
            Self::MessageVerified { conversation_id, .. } => *conversation_id,
            Self::ParticipantInsert { conversation_id, .. } => *conversation_id,
        }
    }
}

/// Commands sent FROM a feed client TO the server over WebSocket.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum FeedCommand {
    /// Replace the set of conversations this connection receives events for.
    Subscribe { conversation_ids: Vec<Uuid> },

    /// Narrow the feed to one table and operation (e.g. message inserts).
    Filter { table: ChangeTable, op: ChangeOp },
}
