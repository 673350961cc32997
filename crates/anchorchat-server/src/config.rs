use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use uuid::Uuid;

use anchorchat_chain::ChainConfig;

const PLACEHOLDER_SECRETS: &[&str] = &["", "changeme", "change-me", "secret", "dev-secret-change-me"];

#[derive(Debug, Clone)]
pub struct Config {
    pub addr: SocketAddr,
    pub db_path: PathBuf,
    pub user_id: Uuid,
    pub chain: ChainConfig,
    pub wallet_url: Option<String>,
    pub service_secret: String,
    pub feed_poll: Duration,
    pub wallet_poll: Duration,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let var = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        let or = |key: &str, default: &str| var(key).unwrap_or_else(|| default.to_string());

        let host = or("ANCHORCHAT_HOST", "127.0.0.1");
        let port: u16 = or("ANCHORCHAT_PORT", "3100")
            .parse()
            .context("ANCHORCHAT_PORT must be a port number")?;
        let addr: SocketAddr = format!("{}:{}", host, port)
            .parse()
            .with_context(|| format!("invalid bind address {host}:{port}"))?;

        let user_id = var("ANCHORCHAT_USER_ID")
            .context("ANCHORCHAT_USER_ID is required")?
            .parse()
            .context("ANCHORCHAT_USER_ID must be a UUID")?;

        let service_secret = lookup("ANCHORCHAT_SERVICE_SECRET").unwrap_or_default();
        if PLACEHOLDER_SECRETS.contains(&service_secret.trim()) {
            bail!("ANCHORCHAT_SERVICE_SECRET must be set to a real secret");
        }

        let local = ChainConfig::local();
        let chain = ChainConfig {
            rpc_url: or("ANCHORCHAT_RPC_URL", &local.rpc_url),
            chain_id: or("ANCHORCHAT_CHAIN_ID", &local.chain_id.to_string())
                .parse()
                .context("ANCHORCHAT_CHAIN_ID must be an integer")?,
            chain_name: or("ANCHORCHAT_CHAIN_NAME", &local.chain_name),
            currency_symbol: local.currency_symbol,
            contract_address: var("ANCHORCHAT_CONTRACT_ADDRESS"),
            contract_bytecode: var("ANCHORCHAT_CONTRACT_BYTECODE"),
        };

        let feed_poll_ms: u64 = or("ANCHORCHAT_FEED_POLL_MS", "250")
            .parse()
            .context("ANCHORCHAT_FEED_POLL_MS must be an integer")?;
        let wallet_poll_secs: u64 = or("ANCHORCHAT_WALLET_POLL_SECS", "5")
            .parse()
            .context("ANCHORCHAT_WALLET_POLL_SECS must be an integer")?;

        Ok(Self {
            addr,
            db_path: PathBuf::from(or("ANCHORCHAT_DB_PATH", "anchorchat.db")),
            user_id,
            chain,
            wallet_url: var("ANCHORCHAT_WALLET_URL"),
            service_secret,
            feed_poll: Duration::from_millis(feed_poll_ms.max(10)),
            wallet_poll: Duration::from_secs(wallet_poll_secs.max(1)),
        })
    }
}
