//! JSON-RPC client bound to the on-chain message registry.
//!
//! Registry interface:
//! - `sendMessage(address to, string content, string contentRef) returns (bytes32)`
//! - `getMessage(bytes32) returns (address, address, string, string, uint256, bool)`
//! - `verifyMessage(bytes32, bytes) returns (bool)`
//! - events `MessageSent(bytes32 indexed, address indexed, address indexed, string, uint256)`
//!   and `MessageVerified(bytes32 indexed, address indexed, uint256)`

use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;
use tracing::{debug, info, warn};

use anchorchat_types::models::{ChainMessageReceipt, ChainMessageRecord};

use crate::ChainConfig;
use crate::abi::{self, Decoder, Token};
use crate::client::{ChainClient, ChainMode};
use crate::error::ChainError;
use crate::hash::keccak_hex;
use crate::rpc::JsonRpc;
use crate::units::{format_ether, parse_quantity};

/// The start-up handshake must answer within this window or the session falls
/// back to the simulator.
pub const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(3);

/// Per-call timeout once the endpoint is known to be alive.
const RPC_TIMEOUT: Duration = Duration::from_secs(15);

const RECEIPT_POLL_INTERVAL: Duration = Duration::from_millis(250);
const RECEIPT_POLL_ATTEMPTS: u32 = 120;

const SEND_MESSAGE: &str = "sendMessage(address,string,string)";
const GET_MESSAGE: &str = "getMessage(bytes32)";
const VERIFY_MESSAGE: &str = "verifyMessage(bytes32,bytes)";

pub struct RpcChainClient {
    rpc: JsonRpc,
    signer: String,
    contract: String,
    chain_id: u64,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct TxReceipt {
    status: Option<String>,
    gas_used: String,
    effective_gas_price: Option<String>,
    contract_address: Option<String>,
    #[serde(default)]
    logs: Vec<TxLog>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct TxSummary {
    gas_price: Option<String>,
}

#[derive(Debug, Deserialize)]
struct TxLog {
    #[serde(default)]
    topics: Vec<String>,
}

impl RpcChainClient {
    /// Probe the endpoint once, pick the signer, then bind to (or deploy)
    /// the registry. Any failure here means "use the simulator".
    pub async fn connect(config: &ChainConfig) -> Result<Self, ChainError> {
        let rpc = JsonRpc::new(&config.rpc_url, RPC_TIMEOUT)?;

        let chain_id: String = tokio::time::timeout(
            HANDSHAKE_TIMEOUT,
            rpc.call("eth_chainId", json!([])),
        )
        .await
        .map_err(|_| ChainError::Unavailable(format!("{} did not answer within {:?}", config.rpc_url, HANDSHAKE_TIMEOUT)))??;
        let chain_id = quantity_u64(&chain_id)?;

        if chain_id != config.chain_id {
            warn!(
                "Ledger at {} reports chain id {}, expected {}",
                config.rpc_url, chain_id, config.chain_id
            );
        }

        let accounts: Vec<String> = rpc.call("eth_accounts", json!([])).await?;
        let signer = accounts
            .into_iter()
            .next()
            .ok_or_else(|| ChainError::Unavailable("endpoint exposes no accounts".into()))?;

        let contract = match (&config.contract_address, &config.contract_bytecode) {
            (Some(address), _) => {
                let code: String = rpc.call("eth_getCode", json!([address, "latest"])).await?;
                if code.trim_start_matches("0x").is_empty() {
                    return Err(ChainError::Unavailable(format!("no registry code at {address}")));
                }
                address.clone()
            }
            (None, Some(bytecode)) => deploy(&rpc, &signer, bytecode).await?,
            (None, None) => {
                return Err(ChainError::Unavailable(
                    "no message registry address or bytecode configured".into(),
                ));
            }
        };

        info!(
            "Connected to ledger at {} (chain {}), registry {}, signer {}",
            config.rpc_url, chain_id, contract, signer
        );

        Ok(Self {
            rpc,
            signer,
            contract,
            chain_id,
        })
    }

    pub fn signer(&self) -> &str {
        &self.signer
    }

    pub fn contract(&self) -> &str {
        &self.contract
    }

    pub fn chain_id(&self) -> u64 {
        self.chain_id
    }

    /// Send a registry transaction and wait for it to be mined. Returns the
    /// transaction hash with its receipt.
    async fn transact(&self, data: Vec<u8>) -> Result<(String, TxReceipt), ChainError> {
        let tx_hash: String = self
            .rpc
            .call(
                "eth_sendTransaction",
                json!([{
                    "from": self.signer,
                    "to": self.contract,
                    "data": format!("0x{}", hex::encode(data)),
                }]),
            )
            .await?;

        let receipt = wait_for_receipt(&self.rpc, &tx_hash).await?;
        Ok((tx_hash, receipt))
    }

    /// Gas price the transaction was sent with, for receipts that omit
    /// `effectiveGasPrice`. Zero when the node cannot say.
    async fn submitted_gas_price(&self, tx_hash: &str) -> u128 {
        let tx: Option<TxSummary> = match self.rpc.call("eth_getTransactionByHash", json!([tx_hash])).await {
            Ok(tx) => tx,
            Err(e) => {
                warn!("Could not look up gas price of {}: {}", tx_hash, e);
                return 0;
            }
        };

        match tx.and_then(|t| t.gas_price).map(|p| parse_quantity(&p)) {
            Some(Ok(price)) => price,
            Some(Err(e)) => {
                warn!("Unreadable gas price on {}: {}", tx_hash, e);
                0
            }
            None => 0,
        }
    }

    async fn call(&self, data: Vec<u8>) -> Result<Vec<u8>, ChainError> {
        let out: String = self
            .rpc
            .call(
                "eth_call",
                json!([{
                    "from": self.signer,
                    "to": self.contract,
                    "data": format!("0x{}", hex::encode(data)),
                }, "latest"]),
            )
            .await?;
        Ok(abi::decode_hex(&out)?)
    }
}

#[async_trait]
impl ChainClient for RpcChainClient {
    fn mode(&self) -> ChainMode {
        ChainMode::Rpc
    }

    async fn submit(&self, to: &str, content: &str) -> Result<ChainMessageReceipt, ChainError> {
        let recipient = abi::parse_address(to).map_err(|e| ChainError::Rejected(e.to_string()))?;
        let content_ref = keccak_hex(content.as_bytes());
        let data = abi::encode_call(
            SEND_MESSAGE,
            &[
                Token::Address(recipient),
                Token::String(content.to_string()),
                Token::String(content_ref),
            ],
        );

        let (tx_hash, receipt) = self.transact(data).await?;
        if receipt.status.as_deref() == Some("0x0") {
            return Err(ChainError::Rejected("registry transaction reverted".into()));
        }

        // MessageSent's first indexed topic is the message hash
        let hash = receipt
            .logs
            .first()
            .and_then(|log| log.topics.get(1))
            .cloned()
            .unwrap_or_else(|| {
                let now = chrono::Utc::now().timestamp_millis();
                keccak_hex(format!("{content}{now}").as_bytes())
            });

        let gas_used = quantity_u64(&receipt.gas_used)?;
        let gas_price = match receipt.effective_gas_price.as_deref() {
            Some(price) => parse_quantity(price).map_err(ChainError::Decode)?,
            None => self.submitted_gas_price(&tx_hash).await,
        };
        let fee_native = format_ether(u128::from(gas_used).saturating_mul(gas_price));

        debug!("Anchored message {} (gas {}, fee {})", hash, gas_used, fee_native);
        Ok(ChainMessageReceipt {
            hash,
            gas_used,
            fee_native,
        })
    }

    async fn fetch(&self, hash: &str) -> Result<ChainMessageRecord, ChainError> {
        let key = abi::parse_bytes32(hash)?;
        let out = self.call(abi::encode_call(GET_MESSAGE, &[Token::FixedBytes32(key)])).await?;

        let d = Decoder::new(&out);
        let from = d.address(0)?;
        if from == [0u8; 20] {
            return Err(ChainError::NotFound(hash.to_string()));
        }

        Ok(ChainMessageRecord {
            from: abi::format_address(&from),
            to: abi::format_address(&d.address(1)?),
            content: d.string(2)?,
            content_ref: d.string(3)?,
            timestamp: u64::try_from(d.uint(4)?).map_err(|e| ChainError::Decode(e.to_string()))?,
            verified: d.bool(5)?,
        })
    }

    async fn verify_signature(&self, hash: &str, signature: &str) -> Result<bool, ChainError> {
        let key = abi::parse_bytes32(hash)?;
        let signature = abi::decode_hex(signature)?;
        let out = self
            .call(abi::encode_call(
                VERIFY_MESSAGE,
                &[Token::FixedBytes32(key), Token::Bytes(signature)],
            ))
            .await?;
        Ok(Decoder::new(&out).bool(0)?)
    }

    async fn balance(&self, address: &str) -> Result<String, ChainError> {
        let wei: String = self.rpc.call("eth_getBalance", json!([address, "latest"])).await?;
        Ok(format_ether(parse_quantity(&wei).map_err(ChainError::Decode)?))
    }
}

async fn deploy(rpc: &JsonRpc, signer: &str, bytecode: &str) -> Result<String, ChainError> {
    let code = if bytecode.starts_with("0x") {
        bytecode.to_string()
    } else {
        format!("0x{bytecode}")
    };

    let tx_hash: String = rpc
        .call("eth_sendTransaction", json!([{ "from": signer, "data": code }]))
        .await?;
    let receipt = wait_for_receipt(rpc, &tx_hash).await?;

    let address = receipt
        .contract_address
        .ok_or_else(|| ChainError::Rejected("registry deployment produced no contract".into()))?;
    info!("Message registry deployed at {}", address);
    Ok(address)
}

async fn wait_for_receipt(rpc: &JsonRpc, tx_hash: &str) -> Result<TxReceipt, ChainError> {
    for _ in 0..RECEIPT_POLL_ATTEMPTS {
        let receipt: Option<TxReceipt> = rpc
            .call("eth_getTransactionReceipt", json!([tx_hash]))
            .await?;
        if let Some(receipt) = receipt {
            return Ok(receipt);
        }
        tokio::time::sleep(RECEIPT_POLL_INTERVAL).await;
    }

    Err(ChainError::Unavailable(format!("no receipt for {tx_hash}")))
}

fn quantity_u64(raw: &str) -> Result<u64, ChainError> {
    let value = parse_quantity(raw).map_err(ChainError::Decode)?;
    u64::try_from(value).map_err(|_| ChainError::Decode(format!("quantity {raw} exceeds u64")))
}
