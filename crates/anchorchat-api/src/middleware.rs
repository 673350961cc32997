use axum::{
    extract::{Request, State},
    http::{StatusCode, header},
    middleware::Next,
    response::Response,
};
use jsonwebtoken::{DecodingKey, Validation, decode};
use tracing::debug;

use anchorchat_types::api::ServiceClaims;

use crate::state::AppState;

/// Reconciliation callers authenticate with a Bearer HS256 token signed with
/// the service secret.
pub async fn require_service_auth(
    State(state): State<AppState>,
    mut req: Request,
    next: Next,
) -> Result<Response, StatusCode> {
    let auth_header = req
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .ok_or(StatusCode::UNAUTHORIZED)?;

    let token = auth_header
        .strip_prefix("Bearer ")
        .ok_or(StatusCode::UNAUTHORIZED)?;

    let token_data = decode::<ServiceClaims>(
        token,
        &DecodingKey::from_secret(state.service_secret.as_bytes()),
        &Validation::default(),
    )
    .map_err(|_| StatusCode::UNAUTHORIZED)?;

    debug!("Service call from {} ({})", token_data.claims.sub, token_data.claims.role);
    req.extensions_mut().insert(token_data.claims);
    Ok(next.run(req).await)
}
