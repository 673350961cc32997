use std::sync::Arc;

use tracing::{info, warn};

use crate::ChainConfig;
use crate::client::ChainClient;
use crate::registry::RpcChainClient;
use crate::simulated::SimulatedChainClient;

/// Probe the configured ledger once. On any failure the session keeps the
/// simulator until an explicit reconnect calls this again.
pub async fn select_chain_client(config: &ChainConfig) -> Arc<dyn ChainClient> {
    match RpcChainClient::connect(config).await {
        Ok(client) => {
            info!("Using ledger at {}", config.rpc_url);
            Arc::new(client)
        }
        Err(e) => {
            warn!(
                "Ledger at {} unavailable ({}), using simulated chain for this session",
                config.rpc_url, e
            );
            Arc::new(SimulatedChainClient::new())
        }
    }
}
