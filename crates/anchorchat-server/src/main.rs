mod config;

use std::sync::Arc;

use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{error, info, warn};

use anchorchat_api::{AppStateInner, Session, router};
use anchorchat_chain::wallet::{RpcWallet, Wallet};
use anchorchat_db::Database;
use anchorchat_gateway::{Dispatcher, FeedTail, run_feed_loop};

use crate::config::Config;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env if present
    let _ = dotenvy::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "anchorchat=debug,tower_http=debug".into()),
        )
        .init();

    let config = match Config::from_env() {
        Ok(config) => config,
        Err(e) => {
            error!("Configuration error: {:#}", e);
            std::process::exit(1);
        }
    };

    let db = Arc::new(Database::open(&config.db_path)?);

    let wallet: Option<Arc<dyn Wallet>> = match &config.wallet_url {
        Some(url) => match RpcWallet::new(url) {
            Ok(wallet) => Some(Arc::new(wallet) as Arc<dyn Wallet>),
            Err(e) => {
                warn!("Wallet at {} unusable ({}), continuing without one", url, e);
                None
            }
        },
        None => {
            info!("No wallet configured; messages will be sent unanchored");
            None
        }
    };

    let session = Arc::new(Session::start(config.user_id, db.clone(), config.chain.clone(), wallet.clone()).await);
    if let Some(wallet) = wallet {
        session.spawn_wallet_watch(wallet, config.wallet_poll);
    }

    let dispatcher = Dispatcher::with_backfill(db.clone());
    let tail = Arc::new(FeedTail::starting_now(db.clone(), dispatcher.clone())?);
    let feed_task = tokio::spawn(run_feed_loop(tail, config.feed_poll));

    let state = Arc::new(AppStateInner {
        session: session.clone(),
        dispatcher,
        service_secret: config.service_secret.clone(),
    });

    let app = router(state)
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http());

    info!(
        "anchorchat listening on {} as {} ({} chain, {})",
        config.addr,
        config.user_id,
        session.chain_mode().as_str(),
        session.network_label()
    );

    let listener = tokio::net::TcpListener::bind(config.addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    feed_task.abort();
    session.teardown();
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!("Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
    info!("Shutting down");
}
