//! Ledger access for anchorchat.
//!
//! [`ChainClient`] is the only surface the message pipeline sees. A session
//! picks one implementation at start-up with [`select_chain_client`]: the
//! JSON-RPC client bound to the message-registry contract when the endpoint
//! answers its handshake, otherwise the [`SimulatedChainClient`].
//!
//! The [`wallet`] module models the user's wallet (an EIP-1193 provider),
//! which gates whether anchoring is attempted at all.

pub mod abi;
pub mod client;
pub mod error;
pub mod hash;
pub mod registry;
pub mod rpc;
pub mod select;
pub mod simulated;
pub mod units;
pub mod wallet;

pub use client::{ChainClient, ChainMode};
pub use error::{ChainError, RpcError, WalletError};
pub use registry::RpcChainClient;
pub use select::select_chain_client;
pub use simulated::SimulatedChainClient;

/// Ledger endpoint and the network the session expects to be on.
#[derive(Debug, Clone)]
pub struct ChainConfig {
    pub rpc_url: String,
    pub chain_id: u64,
    pub chain_name: String,
    pub currency_symbol: String,
    /// Bind to an already deployed message registry.
    pub contract_address: Option<String>,
    /// Deploy the registry from this bytecode when no address is given.
    pub contract_bytecode: Option<String>,
}

impl ChainConfig {
    /// Local development ledger (Ganache defaults).
    pub fn local() -> Self {
        Self {
            rpc_url: "http://127.0.0.1:7545".into(),
            chain_id: 1337,
            chain_name: "Ganache Local".into(),
            currency_symbol: "ETH".into(),
            contract_address: None,
            contract_bytecode: None,
        }
    }

    /// Human-readable network label, e.g. "Ganache Local (Chain ID: 1337)".
    pub fn network_label(&self) -> String {
        format!("{} (Chain ID: {})", self.chain_name, self.chain_id)
    }
}
