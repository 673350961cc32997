//! Turns `change_log` rows into [`StoreEvent`]s.
//!
//! Triggers append to `change_log` inside the writing transaction, so every
//! process sharing the database file sees the same ordered stream.

use std::sync::Arc;
use std::sync::atomic::{AtomicI64, Ordering};
use std::time::Duration;

use anyhow::{Result, anyhow};
use tracing::{debug, warn};
use uuid::Uuid;

use anchorchat_db::Database;
use anchorchat_db::models::ChangeRow;
use anchorchat_types::events::StoreEvent;
use anchorchat_types::models::ChatMessage;

use crate::dispatcher::Dispatcher;

const CHANGE_BATCH: u32 = 256;

pub struct FeedTail {
    db: Arc<Database>,
    dispatcher: Dispatcher,
    cursor: AtomicI64,
}

impl FeedTail {
    /// Start after the newest change already in the log.
    pub fn starting_now(db: Arc<Database>, dispatcher: Dispatcher) -> Result<Self> {
        let cursor = db.latest_change_seq()?;
        Ok(Self::starting_after(db, dispatcher, cursor))
    }

    pub fn starting_after(db: Arc<Database>, dispatcher: Dispatcher, seq: i64) -> Self {
        Self {
            db,
            dispatcher,
            cursor: AtomicI64::new(seq),
        }
    }

    pub fn cursor(&self) -> i64 {
        self.cursor.load(Ordering::Acquire)
    }

    /// Publish every change recorded since the last poll. Blocking; returns
    /// the number of events published.
    ///
    /// A change whose row cannot be read stops the poll with the cursor left
    /// on the change before it, so the next poll retries it.
    pub fn poll(&self) -> Result<usize> {
        let mut published = 0;

        loop {
            let after = self.cursor();
            let changes = self.db.changes_since(after, CHANGE_BATCH)?;
            let batch_len = changes.len();

            for change in changes {
                let seq = change.seq;
                let event = change_to_event(&self.db, change)
                    .map_err(|e| e.context(format!("change {seq} not published")))?;
                if let Some(event) = event {
                    self.dispatcher.publish(event);
                    published += 1;
                }
                self.cursor.store(seq, Ordering::Release);
            }

            if batch_len < CHANGE_BATCH as usize {
                return Ok(published);
            }
        }
    }
}

/// Every event recorded after `after`, read straight from the change log.
/// Blocking.
pub(crate) fn replay_after(db: &Database, after: i64) -> Result<Vec<StoreEvent>> {
    let mut events = Vec::new();
    let mut cursor = after;

    loop {
        let changes = db.changes_since(cursor, CHANGE_BATCH)?;
        let batch_len = changes.len();

        for change in changes {
            cursor = change.seq;
            if let Some(event) = change_to_event(db, change)? {
                events.push(event);
            }
        }

        if batch_len < CHANGE_BATCH as usize {
            return Ok(events);
        }
    }
}

/// Store errors propagate; rows that cannot be decoded are logged and
/// skipped since no retry will fix them.
fn change_to_event(db: &Database, change: ChangeRow) -> Result<Option<StoreEvent>> {
    let seq = change.seq;
    let conversation_id: Uuid = match change.conversation_id.parse() {
        Ok(id) => id,
        Err(e) => return Ok(skip(seq, anyhow!("bad conversation id '{}': {}", change.conversation_id, e))),
    };

    match (change.table_name.as_str(), change.op.as_str()) {
        ("messages", "insert") => {
            let Some(row) = db.get_message(&change.row_id)? else {
                return Ok(None);
            };
            match ChatMessage::try_from(row) {
                Ok(message) => Ok(Some(StoreEvent::MessageInsert { seq, message })),
                Err(e) => Ok(skip(seq, e)),
            }
        }
        ("messages", "update") => {
            let Some(row) = db.get_message(&change.row_id)? else {
                return Ok(None);
            };
            let message_id = match row.id.parse() {
                Ok(id) => id,
                Err(e) => return Ok(skip(seq, anyhow!("bad message id '{}': {}", row.id, e))),
            };
            Ok(Some(StoreEvent::MessageVerified {
                seq,
                message_id,
                conversation_id,
                chain_hash: row.chain_hash,
                chain_verified: row.chain_verified,
            }))
        }
        ("conversation_participants", "insert") => match change.row_id.parse() {
            Ok(user_id) => Ok(Some(StoreEvent::ParticipantInsert {
                seq,
                conversation_id,
                user_id,
            })),
            Err(e) => Ok(skip(seq, anyhow!("bad user id '{}': {}", change.row_id, e))),
        },
        (table, op) => {
            debug!("Ignoring change {} on {} ({})", seq, table, op);
            Ok(None)
        }
    }
}

fn skip(seq: i64, err: anyhow::Error) -> Option<StoreEvent> {
    warn!("Skipping malformed change {}: {}", seq, err);
    None
}

/// Tail the change log forever.
pub async fn run_feed_loop(tail: Arc<FeedTail>, interval: Duration) {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    loop {
        ticker.tick().await;

        let tail = tail.clone();
        match tokio::task::spawn_blocking(move || tail.poll()).await {
            Ok(Ok(0)) => {}
            Ok(Ok(n)) => debug!("Feed published {} events", n),
            Ok(Err(e)) => warn!("Feed poll failed: {}", e),
            Err(e) => warn!("Feed poll task panicked: {}", e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dispatcher::FeedFilter;
    use anchorchat_db::models::NewMessage;
    use anchorchat_types::events::{ChangeOp, ChangeTable};
    use chrono::Utc;

    fn open() -> (tempfile::TempDir, Arc<Database>) {
        let dir = tempfile::tempdir().unwrap();
        let db = Database::open(&dir.path().join("feed.db")).unwrap();
        (dir, Arc::new(db))
    }

    fn insert_message(db: &Database, conversation_id: &str, sender: &str) -> String {
        let id = Uuid::new_v4().to_string();
        let now = Utc::now().to_rfc3339();
        db.insert_message(&NewMessage {
            id: &id,
            conversation_id,
            sender_id: sender,
            content: "hi",
            created_at: &now,
            chain_hash: Some("0x01"),
            chain_verified: false,
            gas_used: None,
            fee_native: None,
            anchor_status: "fingerprint",
        })
        .unwrap();
        id
    }

    #[tokio::test]
    async fn publishes_participants_then_messages() {
        let (_dir, db) = open();
        let dispatcher = Dispatcher::new();
        let mut sub = dispatcher.subscribe(FeedFilter::all());
        let tail = FeedTail::starting_now(db.clone(), dispatcher.clone()).unwrap();

        let conv = Uuid::new_v4();
        let alice = Uuid::new_v4();
        let bob = Uuid::new_v4();
        let now = Utc::now().to_rfc3339();
        let (alice_str, bob_str) = (alice.to_string(), bob.to_string());
        db.create_group_conversation(
            &conv.to_string(),
            Some("room"),
            &alice_str,
            &[alice_str.as_str(), bob_str.as_str()],
            &now,
        )
        .unwrap();
        let message_id = insert_message(&db, &conv.to_string(), &alice.to_string());

        assert_eq!(tail.poll().unwrap(), 3);

        let first = sub.recv().await.unwrap();
        assert!(matches!(first, StoreEvent::ParticipantInsert { user_id, .. } if user_id == alice));
        let second = sub.recv().await.unwrap();
        assert!(matches!(second, StoreEvent::ParticipantInsert { user_id, .. } if user_id == bob));
        match sub.recv().await.unwrap() {
            StoreEvent::MessageInsert { message, .. } => {
                assert_eq!(message.id.to_string(), message_id);
                assert_eq!(message.conversation_id, conv);
            }
            other => panic!("unexpected event {other:?}"),
        }

        // Nothing new
        assert_eq!(tail.poll().unwrap(), 0);
    }

    #[tokio::test]
    async fn verification_change_is_an_update_event() {
        let (_dir, db) = open();
        let conv = Uuid::new_v4().to_string();
        let alice = Uuid::new_v4().to_string();
        let now = Utc::now().to_rfc3339();
        db.create_group_conversation(&conv, None, &alice, &[alice.as_str()], &now).unwrap();
        insert_message(&db, &conv, &alice);

        let dispatcher = Dispatcher::new();
        let mut sub = dispatcher.subscribe(FeedFilter {
            table: Some(ChangeTable::Messages),
            op: Some(ChangeOp::Update),
            conversations: None,
        });
        let tail = FeedTail::starting_now(db.clone(), dispatcher.clone()).unwrap();

        assert_eq!(db.mark_verified_by_hash("0x01", true).unwrap(), 1);
        // Already verified: no second change row
        assert_eq!(db.mark_verified_by_hash("0x01", true).unwrap(), 1);
        assert_eq!(tail.poll().unwrap(), 1);

        match sub.recv().await.unwrap() {
            StoreEvent::MessageVerified { chain_verified, .. } => assert!(chain_verified),
            other => panic!("unexpected event {other:?}"),
        }
    }

    #[test]
    fn writes_from_another_handle_are_seen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("shared.db");
        let ours = Arc::new(Database::open(&path).unwrap());
        let theirs = Database::open(&path).unwrap();

        let dispatcher = Dispatcher::new();
        let tail = FeedTail::starting_now(ours, dispatcher).unwrap();
        let before = tail.cursor();

        let conv = Uuid::new_v4().to_string();
        let bob = Uuid::new_v4().to_string();
        theirs
            .create_group_conversation(&conv, None, &bob, &[bob.as_str()], &Utc::now().to_rfc3339())
            .unwrap();

        assert_eq!(tail.poll().unwrap(), 1);
        assert!(tail.cursor() > before);
    }

    #[tokio::test]
    async fn unreadable_change_is_retried_on_next_poll() {
        let (_dir, db) = open();
        let dispatcher = Dispatcher::new();
        let mut sub = dispatcher.subscribe(FeedFilter::all());
        let tail = FeedTail::starting_now(db.clone(), dispatcher.clone()).unwrap();

        let conv = Uuid::new_v4().to_string();
        let alice = Uuid::new_v4().to_string();
        db.create_group_conversation(&conv, None, &alice, &[alice.as_str()], &Utc::now().to_rfc3339())
            .unwrap();
        let message_id = insert_message(&db, &conv, &alice);
        let participant_seq = db.changes_since(0, 10).unwrap()[0].seq;

        let rename = |from: &str, to: &str| {
            let sql = format!("ALTER TABLE {from} RENAME TO {to}");
            db.with_conn_mut(|conn| {
                conn.execute_batch(&sql)?;
                Ok(())
            })
            .unwrap();
        };

        // Message row unreadable: the participant goes out, the message waits
        rename("messages", "messages_offline");
        assert!(tail.poll().is_err());
        assert_eq!(tail.cursor(), participant_seq);

        rename("messages_offline", "messages");
        assert_eq!(tail.poll().unwrap(), 1);

        assert!(matches!(sub.recv().await.unwrap(), StoreEvent::ParticipantInsert { .. }));
        match sub.recv().await.unwrap() {
            StoreEvent::MessageInsert { message, .. } => assert_eq!(message.id.to_string(), message_id),
            other => panic!("unexpected event {other:?}"),
        }
    }

    #[tokio::test]
    async fn lagging_subscriber_catches_up_from_the_log() {
        let (_dir, db) = open();
        let dispatcher = Dispatcher::with_backfill(db.clone());
        let mut sub = dispatcher.subscribe(FeedFilter::all());
        let tail = FeedTail::starting_now(db.clone(), dispatcher.clone()).unwrap();

        let conv = Uuid::new_v4().to_string();
        let alice = Uuid::new_v4().to_string();
        db.create_group_conversation(&conv, None, &alice, &[alice.as_str()], &Utc::now().to_rfc3339())
            .unwrap();
        for _ in 0..1100 {
            insert_message(&db, &conv, &alice);
        }

        // More than the broadcast buffer holds, published before the subscriber reads
        assert_eq!(tail.poll().unwrap(), 1101);

        let expected: Vec<i64> = db.changes_since(0, 5000).unwrap().iter().map(|c| c.seq).collect();
        let mut delivered = Vec::with_capacity(expected.len());
        while delivered.len() < expected.len() {
            delivered.push(sub.recv().await.unwrap().seq());
        }
        assert_eq!(delivered, expected);
    }
}
