use std::collections::HashSet;
use std::sync::Arc;

use anyhow::Result as AnyResult;
use chrono::{SecondsFormat, Utc};
use tracing::{error, info};
use uuid::Uuid;

use anchorchat_db::Database;
use anchorchat_db::models::DirectInsert;

use crate::error::{Error, Result};

/// At most one direct conversation per unordered user pair.
pub struct ConversationResolver {
    db: Arc<Database>,
}

impl ConversationResolver {
    pub fn new(db: Arc<Database>) -> Self {
        Self { db }
    }

    pub async fn get_or_create_direct(&self, user_a: Uuid, user_b: Uuid) -> Result<Uuid> {
        if user_a == user_b {
            return Err(Error::invalid_input("a direct conversation needs two distinct users"));
        }

        let db = self.db.clone();
        let resolved = tokio::task::spawn_blocking(move || resolve_direct(&db, user_a, user_b))
            .await
            .map_err(|e| {
                error!("spawn_blocking join error: {}", e);
                Error::persist(e)
            })?
            .map_err(|e| {
                error!("Direct conversation {} <-> {} failed: {}", user_a, user_b, e);
                Error::persist(e)
            })?;

        if let DirectInsert::Created(id) = &resolved {
            info!("Created direct conversation {} for {} and {}", id, user_a, user_b);
        }

        resolved
            .id()
            .parse()
            .map_err(|e| Error::persist(format!("corrupt conversation id '{}': {}", resolved.id(), e)))
    }
}

/// Blocking resolution. Scans `user_a`'s direct conversations first; the
/// storage-level pair constraint settles races between sessions.
pub fn resolve_direct(db: &Database, user_a: Uuid, user_b: Uuid) -> AnyResult<DirectInsert> {
    let a = user_a.to_string();
    let b = user_b.to_string();
    let wanted: HashSet<&str> = HashSet::from([a.as_str(), b.as_str()]);

    for candidate in db.direct_conversations_for(&a)? {
        let participants = db.participants(&candidate)?;
        if participants.len() == 2 && participants.iter().all(|p| wanted.contains(p.as_str())) {
            return Ok(DirectInsert::Existing(candidate));
        }
    }

    let id = Uuid::new_v4().to_string();
    let now = Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true);
    db.create_direct_conversation(&id, &a, &b, &now)
}
