use std::collections::{HashSet, VecDeque};
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::{Arc, RwLock};
use std::time::Duration;

use tokio::sync::broadcast;
use tracing::{debug, warn};
use uuid::Uuid;

use anchorchat_db::Database;
use anchorchat_types::events::{ChangeOp, ChangeTable, StoreEvent};

use crate::tail;

const BROADCAST_CAPACITY: usize = 1024;
const REPLAY_RETRY: Duration = Duration::from_millis(250);

/// Which store events a subscriber wants. `None` means "any".
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FeedFilter {
    pub table: Option<ChangeTable>,
    pub op: Option<ChangeOp>,
    pub conversations: Option<HashSet<Uuid>>,
}

impl FeedFilter {
    pub fn all() -> Self {
        Self::default()
    }

    /// Inserts into one conversation's messages, the filter a chat view uses.
    pub fn message_inserts(conversation_id: Uuid) -> Self {
        Self {
            table: Some(ChangeTable::Messages),
            op: Some(ChangeOp::Insert),
            conversations: Some(HashSet::from([conversation_id])),
        }
    }

    pub fn matches(&self, event: &StoreEvent) -> bool {
        self.table.is_none_or(|t| t == event.table())
            && self.op.is_none_or(|o| o == event.op())
            && self
                .conversations
                .as_ref()
                .is_none_or(|set| set.contains(&event.conversation_id()))
    }
}

/// Fans store events out to every subscriber.
#[derive(Clone)]
pub struct Dispatcher {
    inner: Arc<DispatcherInner>,
}

struct DispatcherInner {
    broadcast_tx: broadcast::Sender<StoreEvent>,
    /// Change log that lagging subscribers re-read from.
    backfill: Option<Arc<Database>>,
    /// Highest seq published so far; new subscribers start after it.
    published_seq: AtomicI64,
}

impl Default for Dispatcher {
    fn default() -> Self {
        Self::new()
    }
}

impl Dispatcher {
    /// A dispatcher with no change log behind it. Subscribers that lag lose
    /// the overwritten events.
    pub fn new() -> Self {
        Self::build(None)
    }

    /// A dispatcher whose lagging subscribers catch up from `db`'s change log.
    pub fn with_backfill(db: Arc<Database>) -> Self {
        Self::build(Some(db))
    }

    fn build(backfill: Option<Arc<Database>>) -> Self {
        let (broadcast_tx, _) = broadcast::channel(BROADCAST_CAPACITY);
        Self {
            inner: Arc::new(DispatcherInner {
                broadcast_tx,
                backfill,
                published_seq: AtomicI64::new(0),
            }),
        }
    }

    pub fn subscribe(&self, filter: FeedFilter) -> Subscription {
        Subscription {
            rx: self.inner.broadcast_tx.subscribe(),
            filter: Arc::new(RwLock::new(filter)),
            last_seq: self.inner.published_seq.load(Ordering::Acquire),
            backfill: self.inner.backfill.clone(),
            backlog: VecDeque::new(),
        }
    }

    /// Publish an event to all current subscribers. Events with no
    /// subscriber are dropped.
    pub fn publish(&self, event: StoreEvent) {
        self.inner.published_seq.fetch_max(event.seq(), Ordering::AcqRel);
        let _ = self.inner.broadcast_tx.send(event);
    }

    pub fn subscriber_count(&self) -> usize {
        self.inner.broadcast_tx.receiver_count()
    }
}

/// One subscriber's view of the feed. Delivers events matching its filter
/// with strictly increasing `seq`.
pub struct Subscription {
    rx: broadcast::Receiver<StoreEvent>,
    filter: Arc<RwLock<FeedFilter>>,
    last_seq: i64,
    backfill: Option<Arc<Database>>,
    /// Events replayed from the change log after a lag, oldest first.
    backlog: VecDeque<StoreEvent>,
}

impl Subscription {
    /// Shared handle for changing the filter while another task is
    /// receiving.
    pub fn filter_handle(&self) -> Arc<RwLock<FeedFilter>> {
        self.filter.clone()
    }

    pub fn set_filter(&self, filter: FeedFilter) {
        let mut guard = self.filter.write().unwrap_or_else(|e| e.into_inner());
        *guard = filter;
    }

    /// Next matching event, or `None` once the dispatcher is gone.
    pub async fn recv(&mut self) -> Option<StoreEvent> {
        loop {
            let event = match self.backlog.pop_front() {
                Some(event) => event,
                None => match self.rx.recv().await {
                    Ok(event) => event,
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        warn!("Feed subscriber lagged by {} events after seq {}", n, self.last_seq);
                        self.catch_up().await;
                        continue;
                    }
                    Err(broadcast::error::RecvError::Closed) => return None,
                },
            };

            if event.seq() <= self.last_seq {
                continue;
            }

            let wanted = self
                .filter
                .read()
                .map(|f| f.matches(&event))
                .unwrap_or_else(|e| e.into_inner().matches(&event));
            if !wanted {
                continue;
            }

            self.last_seq = event.seq();
            return Some(event);
        }
    }

    /// Refill the backlog with everything after `last_seq`. Retries until the
    /// change log can be read.
    async fn catch_up(&mut self) {
        let Some(db) = self.backfill.clone() else {
            return;
        };

        loop {
            let db = db.clone();
            let after = self.last_seq;
            match tokio::task::spawn_blocking(move || tail::replay_after(&db, after)).await {
                Ok(Ok(events)) => {
                    debug!("Replayed {} events after seq {}", events.len(), after);
                    self.backlog.extend(events);
                    return;
                }
                Ok(Err(e)) => warn!("Feed replay after seq {} failed: {}", after, e),
                Err(e) => warn!("Feed replay task panicked: {}", e),
            }
            tokio::time::sleep(REPLAY_RETRY).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn participant(seq: i64, conversation_id: Uuid) -> StoreEvent {
        StoreEvent::ParticipantInsert {
            seq,
            conversation_id,
            user_id: Uuid::new_v4(),
        }
    }

    fn verified(seq: i64, conversation_id: Uuid) -> StoreEvent {
        StoreEvent::MessageVerified {
            seq,
            message_id: Uuid::new_v4(),
            conversation_id,
            chain_hash: Some("0xabc".into()),
            chain_verified: true,
        }
    }

    #[test]
    fn filter_matches_table_op_and_conversation() {
        let conv = Uuid::new_v4();
        let other = Uuid::new_v4();

        let filter = FeedFilter {
            table: Some(ChangeTable::Messages),
            op: Some(ChangeOp::Update),
            conversations: Some(HashSet::from([conv])),
        };
        assert!(filter.matches(&verified(1, conv)));
        assert!(!filter.matches(&verified(1, other)));
        assert!(!filter.matches(&participant(1, conv)));
        assert!(FeedFilter::all().matches(&participant(1, other)));
    }

    #[tokio::test]
    async fn subscriber_sees_increasing_seq_only() {
        let dispatcher = Dispatcher::new();
        let conv = Uuid::new_v4();
        let mut sub = dispatcher.subscribe(FeedFilter::all());

        dispatcher.publish(participant(5, conv));
        dispatcher.publish(participant(3, conv));
        dispatcher.publish(participant(5, conv));
        dispatcher.publish(participant(7, conv));

        assert_eq!(sub.recv().await.map(|e| e.seq()), Some(5));
        assert_eq!(sub.recv().await.map(|e| e.seq()), Some(7));
    }

    #[tokio::test]
    async fn filter_can_change_between_events() {
        let dispatcher = Dispatcher::new();
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();
        let mut sub = dispatcher.subscribe(FeedFilter {
            conversations: Some(HashSet::from([a])),
            ..FeedFilter::all()
        });

        dispatcher.publish(participant(1, b));
        dispatcher.publish(participant(2, a));
        assert_eq!(sub.recv().await.map(|e| e.seq()), Some(2));

        sub.set_filter(FeedFilter {
            conversations: Some(HashSet::from([b])),
            ..FeedFilter::all()
        });
        dispatcher.publish(participant(3, a));
        dispatcher.publish(participant(4, b));
        assert_eq!(sub.recv().await.map(|e| e.seq()), Some(4));
    }

    #[tokio::test]
    async fn closed_dispatcher_ends_subscription() {
        let dispatcher = Dispatcher::new();
        let mut sub = dispatcher.subscribe(FeedFilter::all());
        drop(dispatcher);
        assert!(sub.recv().await.is_none());
    }
}
