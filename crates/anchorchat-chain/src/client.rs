use async_trait::async_trait;

use anchorchat_types::models::{ChainMessageReceipt, ChainMessageRecord};

use crate::error::ChainError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChainMode {
    Rpc,
    Simulated,
}

impl ChainMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Rpc => "rpc",
            Self::Simulated => "simulated",
        }
    }
}

/// Capability contract shared by the real ledger client and the simulator.
/// Callers must not be able to tell which one is active.
#[async_trait]
pub trait ChainClient: Send + Sync {
    fn mode(&self) -> ChainMode;

    /// Anchor `content` addressed to `to` and wait for its receipt.
    async fn submit(&self, to: &str, content: &str) -> Result<ChainMessageReceipt, ChainError>;

    async fn fetch(&self, hash: &str) -> Result<ChainMessageRecord, ChainError>;

    async fn verify_signature(&self, hash: &str, signature: &str) -> Result<bool, ChainError>;

    /// Native balance of `address` as a decimal string.
    async fn balance(&self, address: &str) -> Result<String, ChainError>;
}
