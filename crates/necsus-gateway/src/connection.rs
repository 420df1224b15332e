use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use anyhow::Result;
use axum::extract::ws::{Message, WebSocket};
use futures_util::{SinkExt, StreamExt};
use tracing::{error, info, warn};

use necsus_db::Store;

use crate::broker::{Broker, QUEUE_WARN_THRESHOLD, RoomSnapshot, Subscription};

/// Heartbeat interval: server sends a Ping every 15 seconds.
/// If 2 consecutive Pongs are missed (~30s), the connection is dropped.
const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(15);

/// Work out what a viewer who has seen everything up to `since` needs first.
///
/// If the room was cleared at or after `since`, the viewer must discard its history
/// and only messages after the clear are replayed.
pub fn load_snapshot(store: &dyn Store, room: &str, since: i64) -> Result<RoomSnapshot> {
    let mut since = since;
    let mut should_clear = false;

    if let Some(marker) = store.find_clear(room)? {
        if marker.last_cleared_id >= since {
            should_clear = true;
            since = marker.last_cleared_id;
        }
    }

    Ok(RoomSnapshot {
        should_clear,
        bots: store.bots_in_room(room)?,
        messages: store.messages_since(room, since)?,
        since,
    })
}

/// Subscribe to `room`, seeded with everything after `since`.
pub fn open_room_stream(store: &dyn Store, broker: &Broker, room: &str, since: i64) -> Result<Subscription> {
    broker.subscribe_with(room, || load_snapshot(store, room, since))
}

/// Serve a read-only stream of room events over one WebSocket until either side goes away.
pub async fn handle_connection(
    socket: WebSocket,
    broker: Broker,
    store: Arc<dyn Store>,
    room: String,
    since: i64,
) {
    let subscription = match open_room_stream(store.as_ref(), &broker, &room, since) {
        Ok(subscription) => subscription,
        Err(e) => {
            error!("Failed to open stream for room {:?}: {:#}", room, e);
            let mut socket = socket;
            let _ = socket.send(Message::Close(None)).await;
            return;
        }
    };

    let token = subscription.token().clone();
    info!("Viewer joined room {:?} (since {})", room, since);

    run_connection_loop(socket, subscription).await;

    broker.unsubscribe(&token);
    info!("Viewer left room {:?}", room);
}

async fn run_connection_loop(socket: WebSocket, mut subscription: Subscription) {
    let (mut sender, mut receiver) = socket.split();

    // Shared flag for heartbeat
    let pong_received = Arc::new(AtomicBool::new(true));
    let pong_flag_send = pong_received.clone();
    let pong_flag_recv = pong_received.clone();

    // Forward room events -> client, with heartbeat
    let mut send_task = tokio::spawn(async move {
        let mut heartbeat = tokio::time::interval(HEARTBEAT_INTERVAL);
        heartbeat.tick().await;
        let mut missed_heartbeats: u8 = 0;
        let mut lagging = false;

        loop {
            tokio::select! {
                event = subscription.recv() => {
                    let Some(event) = event else { break };

                    let backlog = subscription.backlog();
                    if backlog > QUEUE_WARN_THRESHOLD && !lagging {
                        warn!("Viewer of room {:?} is {} events behind", subscription.token().room(), backlog);
                        lagging = true;
                    } else if backlog <= QUEUE_WARN_THRESHOLD {
                        lagging = false;
                    }

                    let text = match serde_json::to_string(&event) {
                        Ok(text) => text,
                        Err(e) => {
                            error!("Failed to encode room event: {}", e);
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
                            warn!("Heartbeat timeout (missed {} pongs), dropping connection", missed_heartbeats);
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

    // The stream is read-only; we only watch for pongs and close.
    let mut recv_task = tokio::spawn(async move {
        while let Some(Ok(msg)) = receiver.next().await {
            match msg {
                Message::Pong(_) => {
                    pong_flag_recv.store(true, Ordering::Release);
                }
                Message::Close(_) => break,
                _ => {}
            }
        }
    });

    // Wait for either task to finish
    tokio::select! {
        _ = &mut send_task => recv_task.abort(),
        _ = &mut recv_task => send_task.abort(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use necsus_db::Database;
    use necsus_types::events::RoomEvent;
    use necsus_types::models::{NewBot, NewMessage};

    async fn next(sub: &mut Subscription) -> Option<RoomEvent> {
        tokio::time::timeout(Duration::from_millis(200), sub.recv())
            .await
            .ok()
            .flatten()
    }

    #[tokio::test]
    async fn late_subscriber_gets_messages_after_cursor() {
        let db = Database::open_in_memory().unwrap();
        let broker = Broker::new();

        let first = db.add_message(&NewMessage::user("r", "a", "one")).unwrap();
        let second = db.add_message(&NewMessage::user("r", "a", "two")).unwrap();
        let third = db.add_message(&NewMessage::user("r", "a", "three")).unwrap();

        let mut sub = open_room_stream(&db, &broker, "r", first.id).unwrap();

        assert_eq!(next(&mut sub).await, Some(RoomEvent::Message(second)));
        assert_eq!(next(&mut sub).await, Some(RoomEvent::Message(third)));
        assert_eq!(sub.backlog(), 0);
        assert_eq!(next(&mut sub).await, None);
    }

    #[tokio::test]
    async fn cleared_room_starts_with_clear_and_skips_old_history() {
        let db = Database::open_in_memory().unwrap();
        let broker = Broker::new();

        let old = db.add_message(&NewMessage::user("r", "a", "old")).unwrap();
        db.set_last_cleared_id("r", old.id).unwrap();
        db.delete_messages("r").unwrap();
        let bot = db
            .put_bot(&NewBot {
                id: None,
                room: "r".into(),
                name: "Echo".into(),
                responds_to: None,
                url: Some("http://bots/echo".into()),
            })
            .unwrap();
        let fresh = db.add_message(&NewMessage::user("r", "a", "fresh")).unwrap();

        let mut sub = open_room_stream(&db, &broker, "r", -1).unwrap();

        assert_eq!(next(&mut sub).await, Some(RoomEvent::clear()));
        assert_eq!(next(&mut sub).await, Some(RoomEvent::PutBot(bot)));
        assert_eq!(next(&mut sub).await, Some(RoomEvent::Message(fresh)));
    }

    #[test]
    fn cursor_past_the_clear_needs_no_clear() {
        let db = Database::open_in_memory().unwrap();
        db.set_last_cleared_id("r", 3).unwrap();

        let snapshot = load_snapshot(&db, "r", 10).unwrap();
        assert!(!snapshot.should_clear);
        assert_eq!(snapshot.since, 10);

        let snapshot = load_snapshot(&db, "r", -1).unwrap();
        assert!(snapshot.should_clear);
        assert_eq!(snapshot.since, 3);
    }
}
