use std::collections::HashMap;
use std::sync::{Arc, Mutex, Weak};

use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

/// Serializes dispatcher work per room so concurrent requests to one room
/// store and publish in a single order.
#[derive(Clone, Default)]
pub struct RoomSequencer {
    rooms: Arc<Mutex<HashMap<String, Weak<AsyncMutex<()>>>>>,
}

impl RoomSequencer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wait for this room's turn. The turn lasts until the guard is dropped.
    pub async fn lock(&self, room: &str) -> OwnedMutexGuard<()> {
        let slot = {
            let mut rooms = match self.rooms.lock() {
                Ok(rooms) => rooms,
                Err(poisoned) => poisoned.into_inner(),
            };

            match rooms.get(room).and_then(Weak::upgrade) {
                Some(slot) => slot,
                None => {
                    // Forget rooms nobody is waiting on.
                    rooms.retain(|_, slot| slot.strong_count() > 0);

                    let slot = Arc::new(AsyncMutex::new(()));
                    rooms.insert(room.to_string(), Arc::downgrade(&slot));
                    slot
                }
            }
        };

        slot.lock_owned().await
    }
}
