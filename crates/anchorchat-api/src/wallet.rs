use axum::{Json, extract::State, response::IntoResponse};
use serde_json::json;
use tracing::info;

use anchorchat_types::api::{SignRequest, SignResponse};

use crate::error::Error;
use crate::state::AppState;

pub async fn get_wallet(State(state): State<AppState>) -> impl IntoResponse {
    Json(state.session.snapshot())
}

pub async fn connect_wallet(State(state): State<AppState>) -> Result<impl IntoResponse, Error> {
    let report = state.session.connection().connect().await?;
    Ok(Json(json!({
        "wallet": state.session.snapshot(),
        "balance_error": report.balance_error,
    })))
}

pub async fn disconnect_wallet(State(state): State<AppState>) -> impl IntoResponse {
    state.session.connection().disconnect();
    Json(state.session.snapshot())
}

pub async fn sign_message(
    State(state): State<AppState>,
    Json(req): Json<SignRequest>,
) -> Result<impl IntoResponse, Error> {
    if req.message.is_empty() {
        return Err(Error::invalid_input("nothing to sign"));
    }
    let signature = state.session.connection().sign(&req.message).await?;
    Ok(Json(SignResponse { signature }))
}

pub async fn reconnect_chain(State(state): State<AppState>) -> impl IntoResponse {
    let mode = state.session.reconnect_chain().await;
    info!("Chain reconnect requested, now {}", mode.as_str());
    Json(state.session.snapshot())
}
