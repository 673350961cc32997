use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// How a message's `chain_hash` came to be.
///
/// `chain_hash` alone cannot tell a locally computed fingerprint from a real
/// ledger receipt, so every message also records which path produced it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AnchorStatus {
    /// A receipt from a successful submit backs the hash.
    Anchored,
    /// The hash is a local fingerprint; a wallet was present but the submit
    /// was skipped or failed. Eligible for later reconciliation.
    Fingerprint,
    /// No wallet, no hash.
    Unanchored,
}

impl AnchorStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Anchored => "anchored",
            Self::Fingerprint => "fingerprint",
            Self::Unanchored => "unanchored",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "anchored" => Some(Self::Anchored),
            "fingerprint" => Some(Self::Fingerprint),
            "unanchored" => Some(Self::Unanchored),
            _ => None,
        }
    }
}

/// A persisted chat message with its ledger verification fields.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub id: Uuid,
    pub conversation_id: Uuid,
    pub sender_id: Uuid,
    pub content: String,
    pub created_at: DateTime<Utc>,
    pub chain_hash: Option<String>,
    pub chain_verified: bool,
    pub gas_used: Option<u64>,
    pub fee_native: Option<String>,
    pub anchor_status: AnchorStatus,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConversationKind {
    Direct,
    Group,
}

impl ConversationKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Direct => "direct",
            Self::Group => "group",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "direct" => Some(Self::Direct),
            "group" => Some(Self::Group),
            _ => None,
        }
    }
}

/// Immutable result of a successful anchor submission.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChainMessageReceipt {
    /// `0x`-prefixed 32-byte hex digest.
    pub hash: String,
    pub gas_used: u64,
    /// Fee in the chain's native decimal unit (e.g. `"0.00042"`).
    pub fee_native: String,
}

/// A message record as the ledger reports it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChainMessageRecord {
    pub from: String,
    pub to: String,
    pub content: String,
    pub content_ref: String,
    pub timestamp: u64,
    pub verified: bool,
}
