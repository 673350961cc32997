//! Session core and HTTP surface.

pub mod connection;
pub mod error;
pub mod feed;
pub mod functions;
pub mod messages;
pub mod middleware;
pub mod pipeline;
pub mod reconciler;
pub mod resolver;
pub mod session;
pub mod state;
pub mod wallet;

use axum::{
    Router, middleware as axum_middleware,
    routing::{get, post},
};

pub use error::{Error, ErrorKind, Result};
pub use session::Session;
pub use state::{AppState, AppStateInner};

pub fn router(state: AppState) -> Router {
    let service_routes = Router::new()
        .route("/functions/blockchain-sync", post(functions::blockchain_sync))
        .layer(axum_middleware::from_fn_with_state(
            state.clone(),
            middleware::require_service_auth,
        ));

    Router::new()
        .route("/wallet", get(wallet::get_wallet))
        .route("/wallet/connect", post(wallet::connect_wallet))
        .route("/wallet/disconnect", post(wallet::disconnect_wallet))
        .route("/wallet/sign", post(wallet::sign_message))
        .route("/chain/reconnect", post(wallet::reconnect_chain))
        .route("/conversations/direct", post(messages::get_or_create_direct))
        .route(
            "/conversations/{id}/messages",
            get(messages::get_messages).post(messages::send_message),
        )
        .route("/feed", get(feed::feed_upgrade))
        .merge(service_routes)
        .with_state(state)
}
