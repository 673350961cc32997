use std::collections::HashSet;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use axum::extract::ws::{Message, WebSocket};
use futures_util::{SinkExt, StreamExt};
use tracing::{info, warn};
use uuid::Uuid;

use anchorchat_db::Database;
use anchorchat_types::events::FeedCommand;

use crate::dispatcher::{Dispatcher, FeedFilter};

/// Server sends a Ping every 15 seconds; two missed Pongs drop the client.
const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(15);

/// Serve one feed client. Nothing is delivered until the client sends a
/// `Subscribe` naming conversations `user_id` participates in.
pub async fn handle_feed_connection(
    socket: WebSocket,
    dispatcher: Dispatcher,
    db: Arc<Database>,
    user_id: Uuid,
) {
    let (mut sender, mut receiver) = socket.split();

    info!("{} connected to feed", user_id);

    let mut subscription = dispatcher.subscribe(FeedFilter {
        conversations: Some(HashSet::new()),
        ..FeedFilter::all()
    });
    let filter = subscription.filter_handle();

    let pong_received = Arc::new(AtomicBool::new(true));
    let pong_flag_send = pong_received.clone();
    let pong_flag_recv = pong_received.clone();

    let mut send_task = tokio::spawn(async move {
        let mut heartbeat = tokio::time::interval(HEARTBEAT_INTERVAL);
        heartbeat.tick().await;
        let mut missed_heartbeats: u8 = 0;

        loop {
            tokio::select! {
                event = subscription.recv() => {
                    let Some(event) = event else { break };
                    let text = match serde_json::to_string(&event) {
                        Ok(text) => text,
                        Err(e) => {
                            warn!("Failed to encode feed event {}: {}", event.seq(), e);
                            continue;
                        }
                    };
                    if sender.send(Message::Text(text.into())).await.is_err() {
                        break;
                    }
                }
                _ = heartbeat.tick() => {
                    if pong_flag_send.swap(false, Ordering::Acquire) {
                        missed_heartbeats = 0;
                    } else {
                        missed_heartbeats += 1;
                        if missed_heartbeats >= 2 {
                            warn!("Feed heartbeat timeout (missed {} pongs), dropping connection", missed_heartbeats);
                            break;
                        }
                    }
                    if sender.send(Message::Ping(vec![].into())).await.is_err() {
                        break;
                    }
                }
            }
        }
    });

    let mut recv_task = tokio::spawn(async move {
        while let Some(Ok(msg)) = receiver.next().await {
            match msg {
                Message::Text(text) => match serde_json::from_str::<FeedCommand>(&text) {
                    Ok(cmd) => {
                        let current = filter.read().map(|f| f.clone()).unwrap_or_else(|e| e.into_inner().clone());
                        let next = apply_command(&db, user_id, current, cmd).await;
                        let mut guard = filter.write().unwrap_or_else(|e| e.into_inner());
                        *guard = next;
                    }
                    Err(e) => {
                        warn!(
                            "{} bad feed command: {} -- raw: {}",
                            user_id,
                            e,
                            preview(&text)
                        );
                    }
                },
                Message::Pong(_) => {
                    pong_flag_recv.store(true, Ordering::Release);
                }
                Message::Close(_) => break,
                _ => {}
            }
        }
    });

    tokio::select! {
        _ = &mut send_task => recv_task.abort(),
        _ = &mut recv_task => send_task.abort(),
    }

    info!("{} disconnected from feed", user_id);
}

/// First 200 characters of a raw client frame, for logging.
fn preview(text: &str) -> String {
    text.chars().take(200).collect()
}

async fn apply_command(db: &Arc<Database>, user_id: Uuid, mut filter: FeedFilter, cmd: FeedCommand) -> FeedFilter {
    match cmd {
        FeedCommand::Subscribe { conversation_ids } => {
            let requested = conversation_ids.len();
            let allowed = allowed_conversations(db.clone(), user_id, conversation_ids).await;
            if allowed.len() < requested {
                warn!(
                    "{} asked for {} conversations but participates in {}",
                    user_id,
                    requested,
                    allowed.len()
                );
            }
            info!("{} subscribing to {} conversations", user_id, allowed.len());
            filter.conversations = Some(allowed);
        }
        FeedCommand::Filter { table, op } => {
            filter.table = Some(table);
            filter.op = Some(op);
        }
    }
    filter
}

async fn allowed_conversations(db: Arc<Database>, user_id: Uuid, ids: Vec<Uuid>) -> HashSet<Uuid> {
    let result = tokio::task::spawn_blocking(move || {
        let user = user_id.to_string();
        let mut allowed = HashSet::new();
        for id in ids {
            if db.is_participant(&id.to_string(), &user)? {
                allowed.insert(id);
            }
        }
        Ok::<_, anyhow::Error>(allowed)
    })
    .await;

    match result {
        Ok(Ok(allowed)) => allowed,
        Ok(Err(e)) => {
            warn!("Feed subscription check failed for {}: {}", user_id, e);
            HashSet::new()
        }
        Err(e) => {
            warn!("Feed subscription task panicked: {}", e);
            HashSet::new()
        }
    }
}
