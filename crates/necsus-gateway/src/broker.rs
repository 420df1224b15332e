use std::collections::{HashMap, VecDeque};
use std::convert::Infallible;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, RwLock, RwLockReadGuard, RwLockWriteGuard};

use anyhow::Result;
use tokio::sync::mpsc;
use tracing::debug;
use uuid::Uuid;

use necsus_types::events::RoomEvent;
use necsus_types::models::{Bot, Message};

/// Backlog size above which a subscriber is reported as falling behind.
/// Queues are never trimmed; this only drives the warning.
pub const QUEUE_WARN_THRESHOLD: usize = 1024;

/// What a new subscriber is seeded with before any live event.
#[derive(Debug, Clone, Default)]
pub struct RoomSnapshot {
    pub should_clear: bool,
    pub bots: Vec<Bot>,
    /// Ascending by id.
    pub messages: Vec<Message>,
    /// The viewer already has, or has discarded, every message up to this id.
    pub since: i64,
}

impl RoomSnapshot {
    /// Seed events in delivery order: an optional clear, one `put_bot` per bot, then each message.
    fn into_events(self) -> (VecDeque<RoomEvent>, i64) {
        let mut events = VecDeque::with_capacity(1 + self.bots.len() + self.messages.len());
        let mut floor = self.since;

        if self.should_clear {
            events.push_back(RoomEvent::clear());
        }
        events.extend(self.bots.into_iter().map(RoomEvent::PutBot));
        for message in self.messages {
            floor = floor.max(message.id);
            events.push_back(RoomEvent::Message(message));
        }

        (events, floor)
    }
}

/// Opaque handle used to unsubscribe.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubscriptionToken {
    room: String,
    id: Uuid,
}

impl SubscriptionToken {
    pub fn room(&self) -> &str {
        &self.room
    }
}

/// One live subscriber queue, owned by the connection that created it.
pub struct Subscription {
    token: SubscriptionToken,
    /// Snapshot events, delivered before anything live.
    seed: VecDeque<RoomEvent>,
    rx: mpsc::UnboundedReceiver<RoomEvent>,
    /// Highest message id covered by the snapshot.
    floor: i64,
}

impl Subscription {
    pub fn token(&self) -> &SubscriptionToken {
        &self.token
    }

    /// Next event, or `None` once unsubscribed and drained.
    ///
    /// Live message events the snapshot already covered are skipped.
    pub async fn recv(&mut self) -> Option<RoomEvent> {
        if let Some(event) = self.seed.pop_front() {
            return Some(event);
        }

        loop {
            let event = self.rx.recv().await?;
            match event.message_id() {
                Some(id) if id <= self.floor => continue,
                _ => return Some(event),
            }
        }
    }

    /// Events queued but not yet received.
    pub fn backlog(&self) -> usize {
        self.seed.len() + self.rx.len()
    }
}

/// Fans room events out to every live subscriber of that room.
///
/// Cheap to clone; all clones share the same subscriber set.
#[derive(Clone, Default)]
pub struct Broker {
    inner: Arc<BrokerInner>,
}

#[derive(Default)]
struct BrokerInner {
    rooms: RwLock<HashMap<String, Arc<RoomQueues>>>,
}

/// Subscribers of one room. Publishing to the room and seeding a new subscriber
/// both hold `queues`, so neither can interleave with the other.
#[derive(Default)]
struct RoomQueues {
    queues: Mutex<HashMap<Uuid, mpsc::UnboundedSender<RoomEvent>>>,
    /// Subscriptions between lookup and registration. The room is kept while non-zero.
    pending: AtomicUsize,
}

impl RoomQueues {
    fn lock(&self) -> MutexGuard<'_, HashMap<Uuid, mpsc::UnboundedSender<RoomEvent>>> {
        match self.queues.lock() {
            Ok(queues) => queues,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

impl Broker {
    pub fn new() -> Self {
        Self::default()
    }

    fn rooms_read(&self) -> RwLockReadGuard<'_, HashMap<String, Arc<RoomQueues>>> {
        match self.inner.rooms.read() {
            Ok(rooms) => rooms,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    fn rooms_write(&self) -> RwLockWriteGuard<'_, HashMap<String, Arc<RoomQueues>>> {
        match self.inner.rooms.write() {
            Ok(rooms) => rooms,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    /// Deliver an event to every queue subscribed to `room`. No-op without subscribers.
    pub fn publish(&self, room: &str, event: RoomEvent) {
        let Some(slot) = self.rooms_read().get(room).cloned() else {
            return;
        };

        for tx in slot.lock().values() {
            // A closed receiver is cleaned up by its own unsubscribe.
            let _ = tx.send(event.clone());
        }
    }

    pub fn publish_message(&self, room: &str, message: Message) {
        self.publish(room, RoomEvent::Message(message));
    }

    pub fn clear_room(&self, room: &str) {
        self.publish(room, RoomEvent::clear());
    }

    pub fn put_bot(&self, room: &str, bot: Bot) {
        self.publish(room, RoomEvent::PutBot(bot));
    }

    pub fn delete_bot(&self, room: &str, bot: Bot) {
        self.publish(room, RoomEvent::DeleteBot(bot));
    }

    /// Register a queue for `room` seeded with, in order: an optional clear,
    /// one `put_bot` per bot, then each message.
    pub fn subscribe(
        &self,
        room: &str,
        init_messages: Vec<Message>,
        init_bots: Vec<Bot>,
        should_clear: bool,
    ) -> Subscription {
        let snapshot = RoomSnapshot {
            should_clear,
            bots: init_bots,
            messages: init_messages,
            since: -1,
        };

        let Ok(subscription) = self.attach::<Infallible>(room, || Ok(snapshot));
        subscription
    }

    /// Like [`Broker::subscribe`], but the snapshot comes from `load`.
    ///
    /// `load` runs while publishing to `room` is held off, so nothing stored after
    /// the load can be missed. Other rooms are not affected.
    pub fn subscribe_with<F>(&self, room: &str, load: F) -> Result<Subscription>
    where
        F: FnOnce() -> Result<RoomSnapshot>,
    {
        self.attach(room, load)
    }

    fn attach<E>(&self, room: &str, load: impl FnOnce() -> Result<RoomSnapshot, E>) -> Result<Subscription, E> {
        let slot = {
            let mut rooms = self.rooms_write();
            let slot = rooms.entry(room.to_string()).or_default().clone();
            slot.pending.fetch_add(1, Ordering::AcqRel);
            slot
        };

        let registered = {
            let mut queues = slot.lock();
            load().map(|snapshot| {
                let (tx, rx) = mpsc::unbounded_channel();
                let id = Uuid::new_v4();
                queues.insert(id, tx);
                debug!("Subscribed {} to room {:?} ({} subscribers)", id, room, queues.len());
                (id, rx, snapshot)
            })
        };

        slot.pending.fetch_sub(1, Ordering::AcqRel);

        let (id, rx, snapshot) = match registered {
            Ok(registered) => registered,
            Err(e) => {
                self.prune(room);
                return Err(e);
            }
        };

        let (seed, floor) = snapshot.into_events();
        Ok(Subscription {
            token: SubscriptionToken {
                room: room.to_string(),
                id,
            },
            seed,
            rx,
            floor,
        })
    }

    /// Remove and close the queue. Calling it again for the same token does nothing.
    pub fn unsubscribe(&self, token: &SubscriptionToken) {
        let Some(slot) = self.rooms_read().get(&token.room).cloned() else {
            return;
        };

        if slot.lock().remove(&token.id).is_none() {
            debug!("Subscription {} in room {:?} was already removed", token.id, token.room);
            return;
        }

        debug!("Unsubscribed {} from room {:?}", token.id, token.room);
        self.prune(&token.room);
    }

    /// Forget `room` once it has no subscribers and none on the way.
    fn prune(&self, room: &str) {
        let mut rooms = self.rooms_write();

        let idle = rooms
            .get(room)
            .is_some_and(|slot| slot.pending.load(Ordering::Acquire) == 0 && slot.lock().is_empty());

        if idle {
            rooms.remove(room);
        }
    }

    /// Number of live subscribers in `room`.
    pub fn subscriber_count(&self, room: &str) -> usize {
        self.rooms_read().get(room).map_or(0, |slot| slot.lock().len())
    }
}
