#![allow(dead_code)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::Utc;
use uuid::Uuid;

use anchorchat_api::Session;
use anchorchat_chain::wallet::{NetworkDefinition, Wallet};
use anchorchat_chain::{ChainClient, ChainConfig, ChainError, ChainMode, SimulatedChainClient, WalletError};
use anchorchat_db::Database;
use anchorchat_types::models::{ChainMessageReceipt, ChainMessageRecord};

pub const ALICE_WALLET: &str = "0x90f8bf6a479f320ead074411a4b0e7944ea8c9c1";
pub const BOB_WALLET: &str = "0xffcf8fdee72ac11b5c542428b35eef5769c409f0";

pub fn open_db() -> (tempfile::TempDir, Arc<Database>) {
    let dir = tempfile::tempdir().unwrap();
    let db = Database::open(&dir.path().join("chat.db")).unwrap();
    (dir, Arc::new(db))
}

pub fn seed_group(db: &Database, members: &[Uuid]) -> Uuid {
    let id = Uuid::new_v4();
    let members: Vec<String> = members.iter().map(Uuid::to_string).collect();
    let refs: Vec<&str> = members.iter().map(String::as_str).collect();
    db.create_group_conversation(&id.to_string(), Some("room"), refs[0], &refs, &Utc::now().to_rfc3339())
        .unwrap();
    id
}

pub fn session(
    db: Arc<Database>,
    user_id: Uuid,
    chain: Arc<dyn ChainClient>,
    wallet: Option<Arc<dyn Wallet>>,
) -> Session {
    Session::with_chain(user_id, db, ChainConfig::local(), chain, wallet)
}

// -- Wallet --

#[derive(Debug, Clone)]
pub struct FakeWalletState {
    /// What `eth_accounts` reports.
    pub authorised: Vec<String>,
    /// What approval of `eth_requestAccounts` grants.
    pub grant: Vec<String>,
    pub chain_id: u64,
    pub known_chains: Vec<u64>,
    pub reject_switch: bool,
    pub reject_accounts: bool,
    pub switch_unsupported: bool,
    /// `None` makes balance queries fail.
    pub balance: Option<String>,
    pub calls: Vec<&'static str>,
}

pub struct FakeWallet {
    state: Mutex<FakeWalletState>,
}

impl FakeWallet {
    /// A wallet on the local network holding `balance` for `address`,
    /// not yet authorised.
    pub fn new(address: &str, balance: &str) -> Arc<Self> {
        Arc::new(Self {
            state: Mutex::new(FakeWalletState {
                authorised: vec![],
                grant: vec![address.to_string()],
                chain_id: 1337,
                known_chains: vec![1, 1337],
                reject_switch: false,
                reject_accounts: false,
                switch_unsupported: false,
                balance: Some(balance.to_string()),
                calls: vec![],
            }),
        })
    }

    pub fn with(&self, f: impl FnOnce(&mut FakeWalletState)) {
        f(&mut self.state.lock().unwrap());
    }

    pub fn state(&self) -> FakeWalletState {
        self.state.lock().unwrap().clone()
    }
}

#[async_trait]
impl Wallet for FakeWallet {
    async fn accounts(&self) -> Result<Vec<String>, WalletError> {
        let mut s = self.state.lock().unwrap();
        s.calls.push("eth_accounts");
        Ok(s.authorised.clone())
    }

    async fn request_accounts(&self) -> Result<Vec<String>, WalletError> {
        let mut s = self.state.lock().unwrap();
        s.calls.push("eth_requestAccounts");
        if s.reject_accounts {
            return Err(WalletError::Rejected);
        }
        s.authorised = s.grant.clone();
        Ok(s.authorised.clone())
    }

    async fn chain_id(&self) -> Result<u64, WalletError> {
        Ok(self.state.lock().unwrap().chain_id)
    }

    async fn switch_chain(&self, chain_id: u64) -> Result<(), WalletError> {
        let mut s = self.state.lock().unwrap();
        s.calls.push("wallet_switchEthereumChain");
        if s.switch_unsupported {
            return Err(WalletError::Unsupported("wallet_switchEthereumChain".into()));
        }
        if s.reject_switch {
            return Err(WalletError::Rejected);
        }
        if !s.known_chains.contains(&chain_id) {
            return Err(WalletError::UnknownChain);
        }
        s.chain_id = chain_id;
        Ok(())
    }

    async fn add_chain(&self, network: &NetworkDefinition) -> Result<(), WalletError> {
        let mut s = self.state.lock().unwrap();
        s.calls.push("wallet_addEthereumChain");
        s.known_chains.push(network.chain_id);
        s.chain_id = network.chain_id;
        Ok(())
    }

    async fn balance(&self, _address: &str) -> Result<String, WalletError> {
        self.state
            .lock()
            .unwrap()
            .balance
            .clone()
            .ok_or_else(|| WalletError::Transport("balance unavailable".into()))
    }

    async fn sign_message(&self, address: &str, message: &str) -> Result<String, WalletError> {
        Ok(format!("sig:{address}:{message}"))
    }
}

// -- Chain --

/// Every submit fails as if the ledger were down.
#[derive(Default)]
pub struct FailingChain {
    pub submits: AtomicUsize,
}

#[async_trait]
impl ChainClient for FailingChain {
    fn mode(&self) -> ChainMode {
        ChainMode::Rpc
    }

    async fn submit(&self, _to: &str, _content: &str) -> Result<ChainMessageReceipt, ChainError> {
        self.submits.fetch_add(1, Ordering::SeqCst);
        Err(ChainError::Unavailable("connection refused".into()))
    }

    async fn fetch(&self, hash: &str) -> Result<ChainMessageRecord, ChainError> {
        Err(ChainError::NotFound(hash.to_string()))
    }

    async fn verify_signature(&self, _hash: &str, _signature: &str) -> Result<bool, ChainError> {
        Err(ChainError::Unavailable("connection refused".into()))
    }

    async fn balance(&self, _address: &str) -> Result<String, ChainError> {
        Err(ChainError::Unavailable("connection refused".into()))
    }
}

/// A ledger whose receipts report more gas than the store can hold.
pub struct OversizedGasChain;

#[async_trait]
impl ChainClient for OversizedGasChain {
    fn mode(&self) -> ChainMode {
        ChainMode::Rpc
    }

    async fn submit(&self, _to: &str, _content: &str) -> Result<ChainMessageReceipt, ChainError> {
        Ok(ChainMessageReceipt {
            hash: format!("0x{}", "ab".repeat(32)),
            gas_used: u64::MAX,
            fee_native: "1.0".into(),
        })
    }

    async fn fetch(&self, hash: &str) -> Result<ChainMessageRecord, ChainError> {
        Err(ChainError::NotFound(hash.to_string()))
    }

    async fn verify_signature(&self, _hash: &str, _signature: &str) -> Result<bool, ChainError> {
        Ok(true)
    }

    async fn balance(&self, _address: &str) -> Result<String, ChainError> {
        Ok("10.0".into())
    }
}

/// The simulator, recording every recipient it was asked to anchor to.
#[derive(Default)]
pub struct CountingChain {
    inner: SimulatedChainClient,
    pub recipients: Mutex<Vec<String>>,
}

impl CountingChain {
    pub fn submits(&self) -> usize {
        self.recipients.lock().unwrap().len()
    }
}

#[async_trait]
impl ChainClient for CountingChain {
    fn mode(&self) -> ChainMode {
        self.inner.mode()
    }

    async fn submit(&self, to: &str, content: &str) -> Result<ChainMessageReceipt, ChainError> {
        self.recipients.lock().unwrap().push(to.to_string());
        self.inner.submit(to, content).await
    }

    async fn fetch(&self, hash: &str) -> Result<ChainMessageRecord, ChainError> {
        self.inner.fetch(hash).await
    }

    async fn verify_signature(&self, hash: &str, signature: &str) -> Result<bool, ChainError> {
        self.inner.verify_signature(hash, signature).await
    }

    async fn balance(&self, address: &str) -> Result<String, ChainError> {
        self.inner.balance(address).await
    }
}
