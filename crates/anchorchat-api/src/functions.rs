use axum::{Json, extract::State, response::IntoResponse};
use tracing::warn;

use anchorchat_types::api::{ReconcileEnvelope, ReconcileRequest};

use crate::error::Error;
use crate::state::AppState;

/// `POST /functions/blockchain-sync`: dispatch on `action`.
pub async fn blockchain_sync(
    State(state): State<AppState>,
    Json(envelope): Json<ReconcileEnvelope>,
) -> Result<impl IntoResponse, Error> {
    let request = ReconcileRequest::try_from(envelope).map_err(|e| {
        warn!("Rejected reconciliation call: {}", e);
        Error::invalid_input(e)
    })?;
    let body = state.session.reconciler().handle(request).await?;
    Ok(Json(body))
}
