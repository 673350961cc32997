use std::sync::Arc;

use anchorchat_gateway::Dispatcher;

use crate::session::Session;

pub type AppState = Arc<AppStateInner>;

pub struct AppStateInner {
    pub session: Arc<Session>,
    pub dispatcher: Dispatcher,
    /// HS256 secret shared with reconciliation callers.
    pub service_secret: String,
}
