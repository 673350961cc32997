//! Wallet and network connectivity.
//!
//! `Disconnected -> Connecting -> Connected{on_network | wrong_network}`, and
//! any state may drop back to `Disconnected`. Locks are only held for the
//! duration of a transition, never across a wallet call; every transition
//! bumps an epoch so a slow wallet answer cannot overwrite a newer state.

use std::sync::{Arc, RwLock, RwLockWriteGuard};

use tracing::{debug, info, warn};

use anchorchat_chain::WalletError;
use anchorchat_chain::units::is_positive_decimal;
use anchorchat_chain::wallet::{NetworkDefinition, Wallet, WalletEvent};
use anchorchat_types::api::{ConnectionPhase, ConnectionSnapshot, NetworkStatus};

use crate::error::{Error, ErrorKind, Result};

const ZERO_BALANCE: &str = "0";

#[derive(Debug, Clone)]
struct Account {
    phase: ConnectionPhase,
    address: Option<String>,
    chain_id: Option<u64>,
    native_balance: String,
    epoch: u64,
}

impl Account {
    fn cleared(epoch: u64) -> Self {
        Self {
            phase: ConnectionPhase::Disconnected,
            address: None,
            chain_id: None,
            native_balance: ZERO_BALANCE.to_string(),
            epoch,
        }
    }
}

/// Outcome of a successful `connect()`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectReport {
    pub phase: ConnectionPhase,
    pub address: String,
    /// Set when the balance could not be fetched; the connection still stands.
    pub balance_error: Option<String>,
}

pub struct ConnectionState {
    wallet: Option<Arc<dyn Wallet>>,
    network: NetworkDefinition,
    account: RwLock<Account>,
}

impl ConnectionState {
    pub fn new(wallet: Option<Arc<dyn Wallet>>, network: NetworkDefinition) -> Self {
        Self {
            wallet,
            network,
            account: RwLock::new(Account::cleared(0)),
        }
    }

    pub fn wallet_present(&self) -> bool {
        self.wallet.is_some()
    }

    pub fn network(&self) -> &NetworkDefinition {
        &self.network
    }

    pub fn phase(&self) -> ConnectionPhase {
        self.read().phase
    }

    pub fn address(&self) -> Option<String> {
        self.read().address
    }

    pub fn chain_id(&self) -> Option<u64> {
        self.read().chain_id
    }

    pub fn native_balance(&self) -> String {
        self.read().native_balance
    }

    /// Anchoring is attempted only when connected with a positive balance.
    pub fn can_anchor(&self) -> bool {
        let account = self.read();
        matches!(account.phase, ConnectionPhase::Connected(_)) && is_positive_decimal(&account.native_balance)
    }

    pub fn snapshot(&self, chain_mode: &str) -> ConnectionSnapshot {
        let account = self.read();
        ConnectionSnapshot {
            phase: account.phase,
            wallet_present: self.wallet_present(),
            can_anchor: matches!(account.phase, ConnectionPhase::Connected(_))
                && is_positive_decimal(&account.native_balance),
            address: account.address,
            chain_id: account.chain_id,
            native_balance: account.native_balance,
            chain_mode: chain_mode.to_string(),
        }
    }

    /// Switch (or register) the expected network, then request accounts.
    pub async fn connect(&self) -> Result<ConnectReport> {
        let Some(wallet) = self.wallet.clone() else {
            return Err(Error::new(
                ErrorKind::WalletMissing,
                "no wallet detected; install an EIP-1193 wallet to anchor messages",
            ));
        };

        let epoch = {
            let mut account = self.write();
            account.epoch += 1;
            account.phase = ConnectionPhase::Connecting;
            account.epoch
        };

        let (address, chain_id) = match self.authorize(wallet.as_ref()).await {
            Ok(authorized) => authorized,
            Err(e) => {
                let mut account = self.write();
                if account.epoch == epoch {
                    *account = Account::cleared(epoch + 1);
                }
                warn!("Wallet connect failed: {}", e);
                return Err(e.into());
            }
        };

        let phase = ConnectionPhase::Connected(self.network_status(chain_id));
        {
            let mut account = self.write();
            if account.epoch != epoch {
                return Err(Error::new(
                    ErrorKind::ConnectFailed,
                    "connection was reset while the wallet was answering",
                ));
            }
            account.phase = phase;
            account.address = Some(address.clone());
            account.chain_id = Some(chain_id);
        }
        info!("Wallet connected as {} on chain {}", address, chain_id);

        let balance_error = match self.fetch_balance(wallet.as_ref(), epoch, &address).await {
            Ok(_) => None,
            Err(e) => Some(e),
        };

        Ok(ConnectReport {
            phase,
            address,
            balance_error,
        })
    }

    /// Pick up an already-authorised wallet without prompting. Returns
    /// whether the state is now connected.
    pub async fn restore(&self) -> bool {
        let Some(wallet) = self.wallet.clone() else {
            return false;
        };

        let accounts = match wallet.accounts().await {
            Ok(accounts) => accounts,
            Err(e) => {
                warn!("Wallet restore: accounts query failed: {}", e);
                return false;
            }
        };
        let Some(address) = accounts.into_iter().next() else {
            debug!("Wallet restore: no authorised accounts");
            return false;
        };
        let chain_id = match wallet.chain_id().await {
            Ok(id) => id,
            Err(e) => {
                warn!("Wallet restore: chain id query failed: {}", e);
                return false;
            }
        };

        let epoch = {
            let mut account = self.write();
            if account.phase != ConnectionPhase::Disconnected {
                return matches!(account.phase, ConnectionPhase::Connected(_));
            }
            account.epoch += 1;
            account.phase = ConnectionPhase::Connected(self.network_status(chain_id));
            account.address = Some(address.clone());
            account.chain_id = Some(chain_id);
            account.epoch
        };
        info!("Restored wallet session for {}", address);

        let _ = self.fetch_balance(wallet.as_ref(), epoch, &address).await;
        true
    }

    /// Clears the account immediately; no wallet call is made.
    pub fn disconnect(&self) {
        let mut account = self.write();
        let epoch = account.epoch + 1;
        *account = Account::cleared(epoch);
        debug!("Wallet disconnected");
    }

    /// Apply a wallet change notification.
    pub async fn apply(&self, event: WalletEvent) {
        let Some(wallet) = self.wallet.clone() else {
            return;
        };

        let (epoch, address) = {
            let mut account = self.write();
            if !matches!(account.phase, ConnectionPhase::Connected(_)) {
                return;
            }

            match event {
                WalletEvent::AccountsChanged(accounts) => match accounts.into_iter().next() {
                    None => {
                        let epoch = account.epoch + 1;
                        *account = Account::cleared(epoch);
                        info!("Wallet revoked all accounts, disconnected");
                        return;
                    }
                    Some(address) => {
                        if account.address.as_deref() == Some(address.as_str()) {
                            return;
                        }
                        info!("Wallet switched to account {}", address);
                        account.address = Some(address);
                    }
                },
                WalletEvent::ChainChanged(chain_id) => {
                    if account.chain_id == Some(chain_id) {
                        return;
                    }
                    info!("Wallet switched to chain {}", chain_id);
                    account.chain_id = Some(chain_id);
                    account.phase = ConnectionPhase::Connected(self.network_status(chain_id));
                }
            }

            // Balances are per account and per network
            account.native_balance = ZERO_BALANCE.to_string();
            account.epoch += 1;
            (account.epoch, account.address.clone())
        };

        if let Some(address) = address {
            let _ = self.fetch_balance(wallet.as_ref(), epoch, &address).await;
        }
    }

    /// Re-read the connected account's balance. Failure leaves the previous
    /// value in place.
    pub async fn refresh_balance(&self) -> Result<String> {
        let Some(wallet) = self.wallet.clone() else {
            return Err(Error::new(ErrorKind::WalletMissing, "no wallet detected"));
        };
        let (epoch, address) = {
            let account = self.read();
            match (&account.phase, &account.address) {
                (ConnectionPhase::Connected(_), Some(address)) => (account.epoch, address.clone()),
                _ => return Err(Error::new(ErrorKind::ConnectFailed, "wallet is not connected")),
            }
        };

        self.fetch_balance(wallet.as_ref(), epoch, &address)
            .await
            .map_err(|e| Error::new(ErrorKind::ConnectFailed, e))
    }

    /// Sign `message` with the connected account.
    pub async fn sign(&self, message: &str) -> Result<String> {
        let Some(wallet) = self.wallet.clone() else {
            return Err(Error::new(ErrorKind::WalletMissing, "no wallet detected"));
        };
        let address = {
            let account = self.read();
            match (&account.phase, &account.address) {
                (ConnectionPhase::Connected(_), Some(address)) => address.clone(),
                _ => return Err(Error::invalid_input("connect a wallet before signing")),
            }
        };

        Ok(wallet.sign_message(&address, message).await?)
    }

    async fn authorize(&self, wallet: &dyn Wallet) -> std::result::Result<(String, u64), WalletError> {
        match wallet.switch_chain(self.network.chain_id).await {
            Ok(()) => {}
            Err(WalletError::UnknownChain) => {
                info!("Registering network {} with the wallet", self.network.chain_name);
                wallet.add_chain(&self.network).await?;
            }
            Err(WalletError::Unsupported(method)) => {
                debug!("Wallet does not implement {}, continuing on its current network", method);
            }
            Err(e) => return Err(e),
        }

        let address = wallet
            .request_accounts()
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| WalletError::Provider {
                code: 0,
                message: "wallet authorised no accounts".into(),
            })?;
        let chain_id = wallet.chain_id().await?;
        Ok((address, chain_id))
    }

    async fn fetch_balance(&self, wallet: &dyn Wallet, epoch: u64, address: &str) -> std::result::Result<String, String> {
        match wallet.balance(address).await {
            Ok(balance) => {
                let mut account = self.write();
                if account.epoch == epoch && account.address.as_deref() == Some(address) {
                    account.native_balance = balance.clone();
                }
                Ok(balance)
            }
            Err(e) => {
                warn!("Balance fetch for {} failed: {}", address, e);
                Err(e.to_string())
            }
        }
    }

    fn network_status(&self, chain_id: u64) -> NetworkStatus {
        if chain_id == self.network.chain_id {
            NetworkStatus::OnNetwork
        } else {
            NetworkStatus::WrongNetwork
        }
    }

    fn read(&self) -> Account {
        self.account.read().unwrap_or_else(|e| e.into_inner()).clone()
    }

    fn write(&self) -> RwLockWriteGuard<'_, Account> {
        self.account.write().unwrap_or_else(|e| e.into_inner())
    }
}
