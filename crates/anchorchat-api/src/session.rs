//! Per-session context: the store, the selected chain client, and the
//! wallet connection, created at session start and torn down on exit.

use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{error, info};
use uuid::Uuid;

use anchorchat_chain::wallet::{NetworkDefinition, Wallet, watch_wallet};
use anchorchat_chain::{ChainClient, ChainConfig, ChainMode, select_chain_client};
use anchorchat_db::Database;
use anchorchat_types::api::ConnectionSnapshot;
use anchorchat_types::models::ChatMessage;

use crate::connection::ConnectionState;
use crate::error::{Error, Result};
use crate::pipeline::MessagePipeline;
use crate::reconciler::VerificationReconciler;
use crate::resolver::ConversationResolver;

pub const DEFAULT_HISTORY_LIMIT: u32 = 50;
pub const MAX_HISTORY_LIMIT: u32 = 200;

pub struct Session {
    user_id: Uuid,
    db: Arc<Database>,
    chain_config: ChainConfig,
    chain: RwLock<Arc<dyn ChainClient>>,
    connection: Arc<ConnectionState>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl Session {
    /// Probe the ledger once and silently restore an already-authorised
    /// wallet.
    pub async fn start(
        user_id: Uuid,
        db: Arc<Database>,
        chain_config: ChainConfig,
        wallet: Option<Arc<dyn Wallet>>,
    ) -> Self {
        let chain = select_chain_client(&chain_config).await;
        let session = Self::with_chain(user_id, db, chain_config, chain, wallet);
        if session.connection.restore().await {
            info!("Session for {} resumed with a connected wallet", user_id);
        }
        session
    }

    /// Build a session around an already selected chain client.
    pub fn with_chain(
        user_id: Uuid,
        db: Arc<Database>,
        chain_config: ChainConfig,
        chain: Arc<dyn ChainClient>,
        wallet: Option<Arc<dyn Wallet>>,
    ) -> Self {
        let network = NetworkDefinition::from(&chain_config);
        Self {
            user_id,
            db,
            chain_config,
            chain: RwLock::new(chain),
            connection: Arc::new(ConnectionState::new(wallet, network)),
            tasks: Mutex::new(Vec::new()),
        }
    }

    pub fn user_id(&self) -> Uuid {
        self.user_id
    }

    pub fn db(&self) -> &Arc<Database> {
        &self.db
    }

    pub fn connection(&self) -> &Arc<ConnectionState> {
        &self.connection
    }

    pub fn chain(&self) -> Arc<dyn ChainClient> {
        self.chain.read().unwrap_or_else(|e| e.into_inner()).clone()
    }

    pub fn chain_mode(&self) -> ChainMode {
        self.chain().mode()
    }

    pub fn network_label(&self) -> String {
        self.chain_config.network_label()
    }

    pub fn snapshot(&self) -> ConnectionSnapshot {
        self.connection.snapshot(self.chain_mode().as_str())
    }

    /// Re-run chain selection. The only way back from the simulator.
    pub async fn reconnect_chain(&self) -> ChainMode {
        let chain = select_chain_client(&self.chain_config).await;
        let mode = chain.mode();
        *self.chain.write().unwrap_or_else(|e| e.into_inner()) = chain;
        info!("Chain client reselected: {}", mode.as_str());
        mode
    }

    pub fn pipeline(&self) -> MessagePipeline {
        MessagePipeline::new(self.db.clone(), self.chain(), self.connection.clone())
    }

    pub fn resolver(&self) -> ConversationResolver {
        ConversationResolver::new(self.db.clone())
    }

    pub fn reconciler(&self) -> VerificationReconciler {
        VerificationReconciler::new(self.db.clone(), self.chain_mode(), self.network_label())
    }

    pub async fn send(&self, conversation_id: Uuid, content: &str) -> Result<ChatMessage> {
        self.pipeline().send(self.user_id, conversation_id, content).await
    }

    pub async fn get_or_create_direct(&self, peer_id: Uuid) -> Result<Uuid> {
        self.resolver().get_or_create_direct(self.user_id, peer_id).await
    }

    /// Messages of a conversation the session user participates in, oldest
    /// first. `before` is the `seq` cursor of the previous page.
    pub async fn history(&self, conversation_id: Uuid, limit: Option<u32>, before: Option<i64>) -> Result<Vec<(i64, ChatMessage)>> {
        let db = self.db.clone();
        let cid = conversation_id.to_string();
        let uid = self.user_id.to_string();
        let limit = limit.unwrap_or(DEFAULT_HISTORY_LIMIT).clamp(1, MAX_HISTORY_LIMIT);

        let rows = tokio::task::spawn_blocking(move || {
            if !db.is_participant(&cid, &uid)? {
                return Ok(None);
            }
            db.get_messages(&cid, limit, before).map(Some)
        })
        .await
        .map_err(|e| {
            error!("spawn_blocking join error: {}", e);
            Error::persist(e)
        })?
        .map_err(Error::persist)?
        .ok_or_else(|| Error::invalid_input(format!("not a participant of {conversation_id}")))?;

        rows.into_iter()
            .map(|row| {
                let seq = row.seq;
                ChatMessage::try_from(row).map(|m| (seq, m)).map_err(Error::persist)
            })
            .collect()
    }

    /// Poll the wallet for account and network changes and apply them until
    /// teardown.
    pub fn spawn_wallet_watch(self: &Arc<Self>, wallet: Arc<dyn Wallet>, interval: Duration) {
        let (tx, mut rx) = mpsc::channel(16);
        let watcher = tokio::spawn(watch_wallet(wallet, interval, tx));

        let session = self.clone();
        let applier = tokio::spawn(async move {
            while let Some(event) = rx.recv().await {
                session.connection.apply(event).await;
            }
        });

        let mut tasks = self.tasks.lock().unwrap_or_else(|e| e.into_inner());
        tasks.push(watcher);
        tasks.push(applier);
    }

    /// Drop the wallet connection and stop background tasks.
    pub fn teardown(&self) {
        self.connection.disconnect();
        let tasks = std::mem::take(&mut *self.tasks.lock().unwrap_or_else(|e| e.into_inner()));
        for task in tasks {
            task.abort();
        }
        info!("Session for {} torn down", self.user_id);
    }
}
