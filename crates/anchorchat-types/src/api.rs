use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

// -- Service auth --

/// Claims carried by callers of the reconciliation entry points.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceClaims {
    pub sub: String,
    pub role: String,
    pub exp: usize,
}

// -- Wallet --

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NetworkStatus {
    OnNetwork,
    WrongNetwork,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", content = "network", rename_all = "snake_case")]
pub enum ConnectionPhase {
    Disconnected,
    Connecting,
    Connected(NetworkStatus),
}

#[derive(Debug, Clone, Serialize)]
pub struct ConnectionSnapshot {
    pub phase: ConnectionPhase,
    pub wallet_present: bool,
    pub address: Option<String>,
    pub chain_id: Option<u64>,
    pub native_balance: String,
    pub can_anchor: bool,
    pub chain_mode: String,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SignRequest {
    pub message: String,
}

#[derive(Debug, Serialize)]
pub struct SignResponse {
    pub signature: String,
}

// -- Conversations & messages --

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DirectConversationRequest {
    pub peer_id: Uuid,
}

#[derive(Debug, Serialize)]
pub struct DirectConversationResponse {
    pub conversation_id: Uuid,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SendMessageRequest {
    pub content: String,
}

// -- Reconciliation --

/// Body of `POST /functions/blockchain-sync`: an action selector and its payload.
#[derive(Debug, Clone, Deserialize)]
pub struct ReconcileEnvelope {
    pub action: String,
    #[serde(default)]
    pub data: serde_json::Value,
}

#[derive(Debug, Clone)]
pub enum ReconcileRequest {
    SyncMessage(SyncMessageData),
    VerifyMessage(VerifyMessageData),
    GetStatus(StatusData),
}

impl TryFrom<ReconcileEnvelope> for ReconcileRequest {
    type Error = String;

    fn try_from(envelope: ReconcileEnvelope) -> Result<Self, Self::Error> {
        let data = envelope.data;
        match envelope.action.as_str() {
            "sync_message" => serde_json::from_value(data)
                .map(Self::SyncMessage)
                .map_err(|e| format!("Invalid sync_message payload: {e}")),
            "verify_message" => serde_json::from_value(data)
                .map(Self::VerifyMessage)
                .map_err(|e| format!("Invalid verify_message payload: {e}")),
            "get_status" | "get_blockchain_status" => {
                if data.is_null() {
                    return Ok(Self::GetStatus(StatusData::default()));
                }
                serde_json::from_value(data)
                    .map(Self::GetStatus)
                    .map_err(|e| format!("Invalid get_status payload: {e}"))
            }
            other => Err(format!("Unknown action: {other}")),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncMessageData {
    pub message_id: Uuid,
    #[serde(alias = "blockchainHash")]
    pub hash: String,
    pub gas_used: Option<u64>,
    #[serde(alias = "transactionFee")]
    pub fee: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct VerifyMessageData {
    pub hash: String,
    pub signature: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct StatusData {
    pub recent: Option<u32>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SyncResponse {
    pub success: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct VerifyResponse {
    pub verified: bool,
    pub updated: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RecentActivity {
    pub message_id: Uuid,
    pub created_at: DateTime<Utc>,
    pub chain_verified: bool,
    pub gas_used: Option<u64>,
    pub fee_native: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StatusResponse {
    pub total_messages: u64,
    pub verified_messages: u64,
    /// Percentage with two decimals, e.g. `"66.67"`.
    pub verification_rate: String,
    pub recent_activity: Vec<RecentActivity>,
    pub chain_mode: String,
    pub network: String,
}

// -- Errors --

#[derive(Debug, Serialize)]
pub struct ErrorBody {
    pub error: String,
    pub kind: String,
    pub retryable: bool,
}
