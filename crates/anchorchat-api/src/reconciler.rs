//! Out-of-band verification updates, driven by an external trigger.

use std::sync::Arc;

use serde_json::Value;
use tracing::{error, info, warn};

use anchorchat_chain::ChainMode;
use anchorchat_chain::hash::is_digest_hex;
use anchorchat_db::Database;
use anchorchat_db::models::parse_timestamp;
use anchorchat_types::api::{
    ReconcileRequest, RecentActivity, StatusData, StatusResponse, SyncMessageData, SyncResponse,
    VerifyMessageData, VerifyResponse,
};

use crate::error::{Error, Result};

const DEFAULT_RECENT: u32 = 10;
const MAX_RECENT: u32 = 200;

pub struct VerificationReconciler {
    db: Arc<Database>,
    chain_mode: ChainMode,
    network: String,
}

impl VerificationReconciler {
    pub fn new(db: Arc<Database>, chain_mode: ChainMode, network: impl Into<String>) -> Self {
        Self {
            db,
            chain_mode,
            network: network.into(),
        }
    }

    pub async fn handle(&self, request: ReconcileRequest) -> Result<Value> {
        let value = match request {
            ReconcileRequest::SyncMessage(data) => serde_json::to_value(self.sync(data).await?),
            ReconcileRequest::VerifyMessage(data) => serde_json::to_value(self.verify(data).await?),
            ReconcileRequest::GetStatus(data) => serde_json::to_value(self.status(data).await?),
        };
        value.map_err(|e| Error::persist(format!("response encoding failed: {e}")))
    }

    /// Mark one message verified and record its gas and fee. Repeating the
    /// call with the same arguments changes nothing.
    pub async fn sync(&self, data: SyncMessageData) -> Result<SyncResponse> {
        if data.hash.trim().is_empty() {
            return Err(Error::invalid_input("sync_message requires a hash"));
        }
        let gas_used = data
            .gas_used
            .map(i64::try_from)
            .transpose()
            .map_err(|_| Error::invalid_input("gasUsed out of range"))?;

        let db = self.db.clone();
        let id = data.message_id.to_string();
        let hash = data.hash.clone();
        let fee = data.fee.clone();
        let updated = blocking(move || db.sync_message(&id, &hash, gas_used, fee.as_deref())).await?;

        if updated == 0 {
            warn!("sync_message: no message {}", data.message_id);
        } else {
            info!("Message {} synced with {}", data.message_id, data.hash);
        }
        Ok(SyncResponse { success: updated > 0 })
    }

    /// Apply the format check to `hash` and write the result to every
    /// message carrying it. A verified message is never un-verified.
    pub async fn verify(&self, data: VerifyMessageData) -> Result<VerifyResponse> {
        let verified = is_digest_hex(&data.hash) && !data.signature.trim().is_empty();

        let db = self.db.clone();
        let hash = data.hash.clone();
        let updated = blocking(move || db.mark_verified_by_hash(&hash, verified)).await?;

        info!("verify_message {}: verified={} ({} rows)", data.hash, verified, updated);
        Ok(VerifyResponse { verified, updated })
    }

    pub async fn status(&self, data: StatusData) -> Result<StatusResponse> {
        let recent = data.recent.unwrap_or(DEFAULT_RECENT).min(MAX_RECENT);

        let db = self.db.clone();
        let ((total, verified), rows) =
            blocking(move || Ok((db.message_stats()?, db.recent_messages(recent)?))).await?;

        let mut recent_activity = Vec::with_capacity(rows.len());
        for row in rows {
            let message_id = match row.id.parse() {
                Ok(id) => id,
                Err(e) => {
                    warn!("Skipping message with corrupt id '{}': {}", row.id, e);
                    continue;
                }
            };
            let created_at = match parse_timestamp(&row.created_at) {
                Ok(ts) => ts,
                Err(e) => {
                    warn!("Skipping message {}: {}", row.id, e);
                    continue;
                }
            };
            recent_activity.push(RecentActivity {
                message_id,
                created_at,
                chain_verified: row.chain_verified,
                gas_used: row.gas_used.and_then(|g| u64::try_from(g).ok()),
                fee_native: row.fee_native,
            });
        }

        Ok(StatusResponse {
            total_messages: total,
            verified_messages: verified,
            verification_rate: verification_rate(total, verified),
            recent_activity,
            chain_mode: self.chain_mode.as_str().to_string(),
            network: self.network.clone(),
        })
    }
}

/// Percentage of verified messages with two decimals.
pub fn verification_rate(total: u64, verified: u64) -> String {
    if total == 0 {
        return "0.00".to_string();
    }
    format!("{:.2}", verified as f64 * 100.0 / total as f64)
}

async fn blocking<T, F>(f: F) -> Result<T>
where
    F: FnOnce() -> anyhow::Result<T> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| {
            error!("spawn_blocking join error: {}", e);
            Error::persist(e)
        })?
        .map_err(|e| {
            error!("Reconciliation store access failed: {}", e);
            Error::persist(e)
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rate_has_two_decimals() {
        assert_eq!(verification_rate(0, 0), "0.00");
        assert_eq!(verification_rate(3, 2), "66.67");
        assert_eq!(verification_rate(4, 4), "100.00");
    }
}
