use async_trait::async_trait;
use rand::Rng;
use tracing::{debug, info};

use anchorchat_types::models::{ChainMessageReceipt, ChainMessageRecord};

use crate::abi::format_address;
use crate::client::{ChainClient, ChainMode};
use crate::error::ChainError;
use crate::hash::keccak_hex;
use crate::units::format_ether;

pub const SIMULATED_BASE_GAS: u64 = 21_000;
/// Exclusive upper bound of the random gas added on top of the base.
pub const SIMULATED_GAS_JITTER: u64 = 50_000;
/// 20 gwei
pub const SIMULATED_GAS_PRICE_WEI: u128 = 20_000_000_000;
pub const SIMULATED_BALANCE: &str = "10.0";

const SIMULATED_ACCOUNTS: usize = 10;

/// In-process stand-in for the ledger. Same contract as the RPC client:
/// deterministic content hashes, bounded random gas, and every message it
/// is asked about reads back as verified.
pub struct SimulatedChainClient {
    accounts: Vec<String>,
}

impl SimulatedChainClient {
    pub fn new() -> Self {
        let accounts = (0..SIMULATED_ACCOUNTS)
            .map(|_| format_address(&rand::random::<[u8; 20]>()))
            .collect();
        info!("Simulated chain active");
        Self { accounts }
    }

    pub fn accounts(&self) -> &[String] {
        &self.accounts
    }
}

impl Default for SimulatedChainClient {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ChainClient for SimulatedChainClient {
    fn mode(&self) -> ChainMode {
        ChainMode::Simulated
    }

    async fn submit(&self, to: &str, content: &str) -> Result<ChainMessageReceipt, ChainError> {
        let now = chrono::Utc::now().timestamp_millis();
        let hash = keccak_hex(format!("{content}{now}").as_bytes());

        let gas_used = SIMULATED_BASE_GAS + rand::rng().random_range(0..SIMULATED_GAS_JITTER);
        let fee_native = format_ether(u128::from(gas_used) * SIMULATED_GAS_PRICE_WEI);

        debug!("Simulated anchor to {}: {} (gas {}, fee {})", to, hash, gas_used, fee_native);
        Ok(ChainMessageReceipt {
            hash,
            gas_used,
            fee_native,
        })
    }

    async fn fetch(&self, _hash: &str) -> Result<ChainMessageRecord, ChainError> {
        let zero = format_address(&[0u8; 20]);
        Ok(ChainMessageRecord {
            from: self.accounts.first().cloned().unwrap_or_else(|| zero.clone()),
            to: self.accounts.get(1).cloned().unwrap_or(zero),
            content: "Simulated message content".into(),
            content_ref: String::new(),
            timestamp: chrono::Utc::now().timestamp().max(0) as u64,
            verified: true,
        })
    }

    async fn verify_signature(&self, _hash: &str, _signature: &str) -> Result<bool, ChainError> {
        Ok(true)
    }

    async fn balance(&self, _address: &str) -> Result<String, ChainError> {
        Ok(SIMULATED_BALANCE.to_string())
    }
}
