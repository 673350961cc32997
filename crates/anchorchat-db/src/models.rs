//! Database row types. These map directly to SQLite rows and stay distinct
//! from the anchorchat-types models so the DB layer keeps its own shape.

use anyhow::{Result, anyhow};
use chrono::{DateTime, NaiveDateTime, Utc};

use anchorchat_types::models::{AnchorStatus, ChatMessage};

pub struct MessageRow {
    /// SQLite rowid: persistence order, and the pagination cursor.
    pub seq: i64,
    pub id: String,
    pub conversation_id: String,
    pub sender_id: String,
    pub content: String,
    pub created_at: String,
    pub chain_hash: Option<String>,
    pub chain_verified: bool,
    pub gas_used: Option<i64>,
    pub fee_native: Option<String>,
    pub anchor_status: String,
}

/// Insert payload for a message row.
pub struct NewMessage<'a> {
    pub id: &'a str,
    pub conversation_id: &'a str,
    pub sender_id: &'a str,
    pub content: &'a str,
    pub created_at: &'a str,
    pub chain_hash: Option<&'a str>,
    pub chain_verified: bool,
    pub gas_used: Option<i64>,
    pub fee_native: Option<&'a str>,
    pub anchor_status: &'a str,
}

pub struct ConversationRow {
    pub id: String,
    pub kind: String,
    pub name: Option<String>,
    pub created_by: Option<String>,
    pub created_at: String,
}

pub struct ProfileRow {
    pub user_id: String,
    pub username: String,
    pub display_name: Option<String>,
    pub wallet_address: Option<String>,
}

pub struct ChangeRow {
    pub seq: i64,
    pub table_name: String,
    pub op: String,
    pub row_id: String,
    pub conversation_id: String,
}

/// Outcome of a direct-conversation insert.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DirectInsert {
    Created(String),
    /// Another session already owns this pair.
    Existing(String),
}

impl DirectInsert {
    pub fn id(&self) -> &str {
        match self {
            Self::Created(id) | Self::Existing(id) => id,
        }
    }
}

/// Parse a stored timestamp. Rows written by this crate use RFC 3339; SQLite
/// defaults (`datetime('now')`) use "YYYY-MM-DD HH:MM:SS" without timezone.
pub fn parse_timestamp(raw: &str) -> Result<DateTime<Utc>> {
    raw.parse::<DateTime<Utc>>()
        .or_else(|_| NaiveDateTime::parse_from_str(raw, "%Y-%m-%d %H:%M:%S").map(|ndt| ndt.and_utc()))
        .map_err(|e| anyhow!("Corrupt timestamp '{}': {}", raw, e))
}

impl TryFrom<MessageRow> for ChatMessage {
    type Error = anyhow::Error;

    fn try_from(row: MessageRow) -> Result<Self> {
        Ok(ChatMessage {
            id: row.id.parse().map_err(|e| anyhow!("Corrupt message id '{}': {}", row.id, e))?,
            conversation_id: row.conversation_id.parse().map_err(|e| {
                anyhow!("Corrupt conversation_id '{}' on message '{}': {}", row.conversation_id, row.id, e)
            })?,
            sender_id: row.sender_id.parse().map_err(|e| {
                anyhow!("Corrupt sender_id '{}' on message '{}': {}", row.sender_id, row.id, e)
            })?,
            created_at: parse_timestamp(&row.created_at)?,
            content: row.content,
            chain_hash: row.chain_hash,
            chain_verified: row.chain_verified,
            gas_used: row.gas_used.and_then(|g| u64::try_from(g).ok()),
            fee_native: row.fee_native,
            anchor_status: AnchorStatus::parse(&row.anchor_status)
                .ok_or_else(|| anyhow!("Unknown anchor_status '{}'", row.anchor_status))?,
        })
    }
}
