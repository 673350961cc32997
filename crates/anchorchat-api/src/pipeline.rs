//! Message delivery: optional anchoring, then durable persistence.
//!
//! Anchoring failures are logged and swallowed; the store write is the
//! only step whose failure reaches the caller.

use std::sync::Arc;

use chrono::{SecondsFormat, Utc};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use anchorchat_chain::ChainClient;
use anchorchat_chain::hash::keccak_hex;
use anchorchat_db::Database;
use anchorchat_db::models::NewMessage;
use anchorchat_types::models::{AnchorStatus, ChainMessageReceipt, ChatMessage, ConversationKind};

use crate::connection::ConnectionState;
use crate::error::{Error, Result};

/// Recipient used when a conversation has no single peer wallet.
pub const ZERO_ADDRESS: &str = "0x0000000000000000000000000000000000000000";

pub struct MessagePipeline {
    db: Arc<Database>,
    chain: Arc<dyn ChainClient>,
    connection: Arc<ConnectionState>,
}

impl MessagePipeline {
    pub fn new(db: Arc<Database>, chain: Arc<dyn ChainClient>, connection: Arc<ConnectionState>) -> Self {
        Self { db, chain, connection }
    }

    pub async fn send(&self, sender_id: Uuid, conversation_id: Uuid, content: &str) -> Result<ChatMessage> {
        if content.trim().is_empty() {
            return Err(Error::invalid_input("message content is empty"));
        }

        let recipient = self.resolve_recipient(sender_id, conversation_id).await?;

        // Snapshot eligibility once; a concurrent disconnect does not cancel
        // an anchor already in flight.
        let wallet_path = self.connection.wallet_present();
        let receipt = if self.connection.can_anchor() {
            match self.chain.submit(&recipient, content).await {
                Ok(receipt) => Some(receipt),
                Err(e) => {
                    warn!("Anchoring failed, sending without receipt: {}", e);
                    None
                }
            }
        } else {
            debug!("Anchoring skipped for message in {}", conversation_id);
            None
        };

        let sent_at = Utc::now();
        let fingerprint = fingerprint(content, sender_id, sent_at.timestamp_millis());

        let (chain_hash, chain_verified, anchor_status) = match (&receipt, wallet_path) {
            (Some(r), _) => (Some(r.hash.clone()), true, AnchorStatus::Anchored),
            (None, true) => (Some(fingerprint), false, AnchorStatus::Fingerprint),
            (None, false) => (None, false, AnchorStatus::Unanchored),
        };

        let message = ChatMessage {
            id: Uuid::new_v4(),
            conversation_id,
            sender_id,
            content: content.to_string(),
            created_at: sent_at,
            chain_hash,
            chain_verified,
            gas_used: receipt.as_ref().map(|r| r.gas_used),
            fee_native: receipt.as_ref().map(|r| r.fee_native.clone()),
            anchor_status,
        };

        self.persist(&message).await?;

        if let Some(receipt) = receipt {
            self.spawn_balance_refresh(receipt);
        }

        Ok(message)
    }

    /// Check the conversation and pick the `to` address for anchoring: the
    /// peer's wallet in a direct conversation, otherwise the zero address.
    async fn resolve_recipient(&self, sender_id: Uuid, conversation_id: Uuid) -> Result<String> {
        let db = self.db.clone();
        let cid = conversation_id.to_string();
        let sid = sender_id.to_string();

        tokio::task::spawn_blocking(move || {
            let Some(conversation) = db.get_conversation(&cid).map_err(Error::persist)? else {
                return Err(Error::invalid_input(format!("conversation {cid} does not exist")));
            };
            if !db.is_participant(&cid, &sid).map_err(Error::persist)? {
                return Err(Error::invalid_input(format!("{sid} is not a participant of {cid}")));
            }

            if ConversationKind::parse(&conversation.kind) != Some(ConversationKind::Direct) {
                return Ok(ZERO_ADDRESS.to_string());
            }

            let participants = db.participants(&cid).map_err(Error::persist)?;
            let Some(peer) = participants.iter().find(|p| **p != sid) else {
                return Ok(ZERO_ADDRESS.to_string());
            };
            let wallet = db
                .get_profile(peer)
                .map_err(Error::persist)?
                .and_then(|p| p.wallet_address)
                .filter(|w| !w.is_empty());
            Ok(wallet.unwrap_or_else(|| ZERO_ADDRESS.to_string()))
        })
        .await
        .map_err(|e| {
            error!("spawn_blocking join error: {}", e);
            Error::persist(e)
        })?
    }

    async fn persist(&self, message: &ChatMessage) -> Result<()> {
        let db = self.db.clone();
        let id = message.id.to_string();
        let conversation_id = message.conversation_id.to_string();
        let sender_id = message.sender_id.to_string();
        let content = message.content.clone();
        let created_at = message.created_at.to_rfc3339_opts(SecondsFormat::Millis, true);
        let chain_hash = message.chain_hash.clone();
        let chain_verified = message.chain_verified;
        let gas_used = message
            .gas_used
            .map(i64::try_from)
            .transpose()
            .map_err(|e| {
                error!("Gas used on message {} does not fit the store: {}", message.id, e);
                Error::persist(e)
            })?;
        let fee_native = message.fee_native.clone();
        let anchor_status = message.anchor_status;

        tokio::task::spawn_blocking(move || {
            db.insert_message(&NewMessage {
                id: &id,
                conversation_id: &conversation_id,
                sender_id: &sender_id,
                content: &content,
                created_at: &created_at,
                chain_hash: chain_hash.as_deref(),
                chain_verified,
                gas_used,
                fee_native: fee_native.as_deref(),
                anchor_status: anchor_status.as_str(),
            })
        })
        .await
        .map_err(|e| {
            error!("spawn_blocking join error: {}", e);
            Error::persist(e)
        })?
        .map_err(|e| {
            error!("Failed to persist message {}: {}", message.id, e);
            Error::persist(e)
        })?;

        info!(
            "Message {} stored in {} ({})",
            message.id,
            message.conversation_id,
            message.anchor_status.as_str()
        );
        Ok(())
    }

    fn spawn_balance_refresh(&self, receipt: ChainMessageReceipt) {
        let connection = self.connection.clone();
        tokio::spawn(async move {
            match connection.refresh_balance().await {
                Ok(balance) => debug!("Balance after anchoring {}: {}", receipt.hash, balance),
                Err(e) => warn!("Balance refresh after anchoring failed: {}", e),
            }
        });
    }
}

/// Local digest standing in for a ledger hash when no receipt exists.
pub fn fingerprint(content: &str, sender_id: Uuid, sent_at_millis: i64) -> String {
    keccak_hex(format!("{content}-{sender_id}-{sent_at_millis}").as_bytes())
}
