//! The user's wallet: an EIP-1193 provider reached over JSON-RPC.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::json;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::ChainConfig;
use crate::error::WalletError;
use crate::rpc::JsonRpc;
use crate::units::{format_ether, parse_quantity, to_quantity};

const WALLET_TIMEOUT: Duration = Duration::from_secs(60);

/// Network registration payload for `wallet_addEthereumChain`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NetworkDefinition {
    pub chain_id: u64,
    pub chain_name: String,
    pub currency_name: String,
    pub currency_symbol: String,
    pub decimals: u8,
    pub rpc_urls: Vec<String>,
}

impl From<&ChainConfig> for NetworkDefinition {
    fn from(config: &ChainConfig) -> Self {
        Self {
            chain_id: config.chain_id,
            chain_name: config.chain_name.clone(),
            currency_name: "Ethereum".into(),
            currency_symbol: config.currency_symbol.clone(),
            decimals: 18,
            rpc_urls: vec![config.rpc_url.clone()],
        }
    }
}

/// Push notifications a wallet emits.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WalletEvent {
    AccountsChanged(Vec<String>),
    ChainChanged(u64),
}

#[async_trait]
pub trait Wallet: Send + Sync {
    /// Already-authorised accounts; never prompts.
    async fn accounts(&self) -> Result<Vec<String>, WalletError>;

    /// Ask the user to authorise accounts.
    async fn request_accounts(&self) -> Result<Vec<String>, WalletError>;

    async fn chain_id(&self) -> Result<u64, WalletError>;

    async fn switch_chain(&self, chain_id: u64) -> Result<(), WalletError>;

    async fn add_chain(&self, network: &NetworkDefinition) -> Result<(), WalletError>;

    /// Balance in decimal native units.
    async fn balance(&self, address: &str) -> Result<String, WalletError>;

    async fn sign_message(&self, address: &str, message: &str) -> Result<String, WalletError>;
}

/// EIP-1193 provider exposed over HTTP JSON-RPC.
pub struct RpcWallet {
    rpc: JsonRpc,
}

impl RpcWallet {
    pub fn new(url: impl Into<String>) -> Result<Self, WalletError> {
        let rpc = JsonRpc::new(url, WALLET_TIMEOUT).map_err(|e| WalletError::Transport(e.to_string()))?;
        Ok(Self { rpc })
    }

    async fn request<T: serde::de::DeserializeOwned>(
        &self,
        method: &str,
        params: serde_json::Value,
    ) -> Result<T, WalletError> {
        self.rpc
            .call(method, params)
            .await
            .map_err(|e| WalletError::from_rpc(e, method))
    }
}

#[async_trait]
impl Wallet for RpcWallet {
    async fn accounts(&self) -> Result<Vec<String>, WalletError> {
        self.request("eth_accounts", json!([])).await
    }

    async fn request_accounts(&self) -> Result<Vec<String>, WalletError> {
        self.request("eth_requestAccounts", json!([])).await
    }

    async fn chain_id(&self) -> Result<u64, WalletError> {
        let raw: String = self.request("eth_chainId", json!([])).await?;
        let id = parse_quantity(&raw).map_err(|message| WalletError::Provider { code: 0, message })?;
        u64::try_from(id).map_err(|_| WalletError::Provider {
            code: 0,
            message: format!("chain id {raw} out of range"),
        })
    }

    async fn switch_chain(&self, chain_id: u64) -> Result<(), WalletError> {
        let _: serde_json::Value = self
            .request(
                "wallet_switchEthereumChain",
                json!([{ "chainId": to_quantity(u128::from(chain_id)) }]),
            )
            .await?;
        Ok(())
    }

    async fn add_chain(&self, network: &NetworkDefinition) -> Result<(), WalletError> {
        let _: serde_json::Value = self
            .request(
                "wallet_addEthereumChain",
                json!([{
                    "chainId": to_quantity(u128::from(network.chain_id)),
                    "chainName": network.chain_name,
                    "nativeCurrency": {
                        "name": network.currency_name,
                        "symbol": network.currency_symbol,
                        "decimals": network.decimals,
                    },
                    "rpcUrls": network.rpc_urls,
                }]),
            )
            .await?;
        Ok(())
    }

    async fn balance(&self, address: &str) -> Result<String, WalletError> {
        let raw: String = self.request("eth_getBalance", json!([address, "latest"])).await?;
        let wei = parse_quantity(&raw).map_err(|message| WalletError::Provider { code: 0, message })?;
        Ok(format_ether(wei))
    }

    async fn sign_message(&self, address: &str, message: &str) -> Result<String, WalletError> {
        let payload = format!("0x{}", hex::encode(message.as_bytes()));
        self.request("personal_sign", json!([payload, address])).await
    }
}

/// HTTP providers cannot push. Poll accounts and network id and emit a
/// change notification whenever either differs from the last observation.
/// Returns when the receiver is dropped.
pub async fn watch_wallet(wallet: Arc<dyn Wallet>, interval: Duration, events: mpsc::Sender<WalletEvent>) {
    let mut ticker = tokio::time::interval(interval);
    let mut last_accounts: Option<Vec<String>> = None;
    let mut last_chain: Option<u64> = None;

    loop {
        ticker.tick().await;

        match wallet.accounts().await {
            Ok(accounts) => {
                if last_accounts.as_ref().is_some_and(|prev| *prev != accounts) {
                    debug!("Wallet accounts changed ({} accounts)", accounts.len());
                    if events.send(WalletEvent::AccountsChanged(accounts.clone())).await.is_err() {
                        return;
                    }
                }
                last_accounts = Some(accounts);
            }
            Err(e) => warn!("Wallet watch: accounts query failed: {}", e),
        }

        match wallet.chain_id().await {
            Ok(chain_id) => {
                if last_chain.is_some_and(|prev| prev != chain_id) {
                    debug!("Wallet network changed to {}", chain_id);
                    if events.send(WalletEvent::ChainChanged(chain_id)).await.is_err() {
                        return;
                    }
                }
                last_chain = Some(chain_id);
            }
            Err(e) => warn!("Wallet watch: chain id query failed: {}", e),
        }
    }
}
