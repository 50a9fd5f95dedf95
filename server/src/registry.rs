//! Room registry: the shared map from room id to room state
//!
//! The registry is the only cross-request shared structure besides the
//! account store. Each room sits behind its own `tokio::sync::Mutex`, so
//! every room-state transition (join, ready, answer, timer callback, leave)
//! runs as a serialized critical section against that room, while the
//! registry's own lock is held only for map operations.

use crate::room::Room;
use log::info;
use rand::Rng;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};

pub type SharedRoom = Arc<Mutex<Room>>;

#[derive(Default)]
pub struct RoomRegistry {
    rooms: RwLock<HashMap<String, SharedRoom>>,
}

impl RoomRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn get(&self, room_id: &str) -> Option<SharedRoom> {
        self.rooms.read().await.get(room_id).cloned()
    }

    pub async fn contains(&self, room_id: &str) -> bool {
        self.rooms.read().await.contains_key(room_id)
    }

    /// Inserts a new room. Returns false when the id is already taken.
    pub async fn insert(&self, room: Room) -> bool {
        let mut rooms = self.rooms.write().await;
        if rooms.contains_key(&room.id) {
            return false;
        }
        info!("Room {} created ({} mode)", room.id, room.mode);
        rooms.insert(room.id.clone(), Arc::new(Mutex::new(room)));
        true
    }

    /// Drops a room from the map. In-flight timer tasks holding the Arc see
    /// the registry miss on their next lookup and become no-ops.
    pub async fn remove(&self, room_id: &str) -> bool {
        let removed = self.rooms.write().await.remove(room_id).is_some();
        if removed {
            info!("Room {} destroyed", room_id);
        }
        removed
    }

    /// Fresh 6-digit room id not currently in use.
    pub async fn generate_room_id(&self) -> String {
        let rooms = self.rooms.read().await;
        let mut rng = rand::thread_rng();
        loop {
            let id = format!("{:06}", rng.gen_range(0..1_000_000u32));
            if !rooms.contains_key(&id) {
                return id;
            }
        }
    }

    /// Snapshot of all rooms for iteration without holding the map lock.
    pub async fn snapshot(&self) -> Vec<(String, SharedRoom)> {
        self.rooms
            .read()
            .await
            .iter()
            .map(|(id, room)| (id.clone(), room.clone()))
            .collect()
    }

    /// Finds the room a player is seated in, if any.
    pub async fn find_by_player(&self, username: &str) -> Option<(String, SharedRoom)> {
        for (id, room) in self.snapshot().await {
            if room.lock().await.contains_player(username) {
                return Some((id, room));
            }
        }
        None
    }

    pub async fn len(&self) -> usize {
        self.rooms.read().await.len()
    }
}
