use axum::{
    extract::{State, WebSocketUpgrade},
    response::IntoResponse,
};

use anchorchat_gateway::connection::handle_feed_connection;

use crate::state::AppState;

pub async fn feed_upgrade(State(state): State<AppState>, ws: WebSocketUpgrade) -> impl IntoResponse {
    let dispatcher = state.dispatcher.clone();
    let db = state.session.db().clone();
    let user_id = state.session.user_id();
    ws.on_upgrade(move |socket| handle_feed_connection(socket, dispatcher, db, user_id))
}
