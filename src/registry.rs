//! Room registry
//!
//! Thread-safe directory of live rooms keyed by room id. Rooms are created
//! lazily on first lookup and remove themselves when reaped. The lock only
//! guards the map; room state is never touched while holding it.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use crate::client::Client;
use crate::config::RoomSettings;
use crate::error::AppError;
use crate::room::{RoomActor, RoomHandle, RoomInfo};

/// Attempts to admit a client when the resolved room terminates underneath it
const ADMIT_ATTEMPTS: usize = 2;

/// Shared room directory (cheap to clone)
#[derive(Clone)]
pub struct RoomRegistry {
    inner: Arc<RegistryInner>,
}

struct RegistryInner {
    rooms: RwLock<HashMap<String, RoomHandle>>,
    settings: RoomSettings,
}

impl RoomRegistry {
    pub fn new(settings: RoomSettings) -> Self {
        Self {
            inner: Arc::new(RegistryInner {
                rooms: RwLock::new(HashMap::new()),
                settings,
            }),
        }
    }

    /// Return the room with this id, starting it if absent.
    ///
    /// The boolean is true when the room was created by this call.
    pub async fn start_room(&self, id: &str) -> (RoomHandle, bool) {
        let mut rooms = self.inner.rooms.write().await;
        if let Some(room) = rooms.get(id) {
            return (room.clone(), false);
        }

        let (actor, handle) = RoomActor::new(id, self.clone(), self.inner.settings.clone());
        rooms.insert(id.to_string(), handle.clone());
        tokio::spawn(actor.run());

        debug!(room_id = %id, rooms = rooms.len(), "Room registered");
        (handle, true)
    }

    pub async fn find_room(&self, id: &str) -> Option<RoomHandle> {
        self.inner.rooms.read().await.get(id).cloned()
    }

    pub async fn remove_room(&self, id: &str) -> Option<RoomHandle> {
        let removed = self.inner.rooms.write().await.remove(id);
        if removed.is_some() {
            debug!(room_id = %id, "Room deregistered");
        }
        removed
    }

    /// Remove `room` only if it is still the registered instance for its id
    pub(crate) async fn remove_instance(&self, room: &RoomHandle) {
        let mut rooms = self.inner.rooms.write().await;
        if rooms.get(room.id()).is_some_and(|r| r.same_room(room)) {
            rooms.remove(room.id());
            debug!(room_id = %room.id(), rooms = rooms.len(), "Room deregistered");
        }
    }

    /// Attach a client to the room `room_id`, creating the room if needed.
    ///
    /// Retries on a fresh room if the resolved one terminated before
    /// admitting the client.
    pub async fn join(&self, room_id: &str, client: Arc<Client>) -> Result<RoomHandle, AppError> {
        let mut last_err = AppError::RoomClosed(room_id.to_string());
        for attempt in 1..=ADMIT_ATTEMPTS {
            let (room, created) = self.start_room(room_id).await;
            match room.admit(Arc::clone(&client)).await {
                Ok(()) => {
                    if created {
                        info!(
                            room_id = %room_id,
                            user_id = %client.id(),
                            "Room created by first joiner"
                        );
                    }
                    return Ok(room);
                }
                Err(e) => {
                    warn!(
                        room_id = %room_id,
                        attempt,
                        error = %e,
                        "Room terminated during admission"
                    );
                    self.remove_instance(&room).await;
                    last_err = e;
                }
            }
        }
        Err(last_err)
    }

    /// Enqueue a kick for `user_id` if it is connected to `room_id`.
    ///
    /// Returns whether the user was connected.
    pub async fn kick_member(&self, room_id: &str, user_id: &str, notice: &str) -> bool {
        let Some(room) = self.find_room(room_id).await else {
            return false;
        };
        let Some(client) = room.find_member(user_id).await else {
            return false;
        };

        info!(room_id = %room_id, user_id = %user_id, "Kicking member");
        client.kick(notice);
        true
    }

    /// Force-close a room: evict every member, then deregister it.
    ///
    /// Returns whether the room was live.
    pub async fn close_room(&self, room_id: &str) -> bool {
        let Some(room) = self.find_room(room_id).await else {
            return false;
        };
        if let Err(e) = room.close().await {
            debug!(room_id = %room_id, error = %e, "Room already stopped");
        }
        self.remove_instance(&room).await;
        true
    }

    /// Monitoring snapshot of every live room, oldest first
    pub async fn snapshot(&self) -> Vec<RoomInfo> {
        let rooms: Vec<RoomHandle> = self.inner.rooms.read().await.values().cloned().collect();

        let mut infos = Vec::with_capacity(rooms.len());
        for room in rooms {
            infos.push(room.info().await);
        }
        infos.sort_by_key(|info| info.start_time);
        infos
    }

    pub async fn room_count(&self) -> usize {
        self.inner.rooms.read().await.len()
    }
}

impl std::fmt::Debug for RoomRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RoomRegistry")
            .field("settings", &self.inner.settings)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::{Message, MessageType, Peer};
    use crate::types::Role;
    use std::time::Duration;
    use tokio::sync::mpsc;

    fn registry() -> RoomRegistry {
        RoomRegistry::new(RoomSettings {
            idle_timeout: Duration::from_secs(60),
            idle_check_interval: Duration::from_secs(10),
            queue_capacity: 16,
        })
    }

    fn test_client(id: &str) -> (Arc<Client>, mpsc::Receiver<Message>) {
        let (tx, rx) = mpsc::channel(32);
        let peer = Peer {
            id: id.to_string(),
            role: Role::PARTICIPANT,
            ..Peer::default()
        };
        (Arc::new(Client::new(peer, tx)), rx)
    }

    #[tokio::test(start_paused = true)]
    async fn test_start_room_creates_once() {
        let registry = registry();

        let (first, created) = registry.start_room("r1").await;
        assert!(created);
        let (second, created) = registry.start_room("r1").await;
        assert!(!created);
        assert!(first.same_room(&second));
        assert_eq!(registry.room_count().await, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_find_and_remove() {
        let registry = registry();
        assert!(registry.find_room("r1").await.is_none());

        registry.start_room("r1").await;
        assert!(registry.find_room("r1").await.is_some());

        assert!(registry.remove_room("r1").await.is_some());
        assert!(registry.find_room("r1").await.is_none());
        assert!(registry.remove_room("r1").await.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_remove_instance_ignores_replacement() {
        let registry = registry();
        let (old, _) = registry.start_room("r1").await;
        registry.remove_room("r1").await;
        let (new, created) = registry.start_room("r1").await;
        assert!(created);

        registry.remove_instance(&old).await;

        let live = registry.find_room("r1").await.unwrap();
        assert!(live.same_room(&new));
    }

    #[tokio::test(start_paused = true)]
    async fn test_join_creates_room() {
        let registry = registry();
        let (a, _rx) = test_client("a");

        let room = registry.join("r1", a.clone()).await.unwrap();

        assert_eq!(room.id(), "r1");
        assert_eq!(room.member_count().await, 1);
        assert!(a.room().is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn test_join_retries_after_room_stopped() {
        let registry = registry();
        let (stale, _) = registry.start_room("r1").await;
        stale.close().await.unwrap();
        tokio::time::sleep(Duration::from_millis(10)).await;

        // Re-register the dead handle to simulate losing the race with a reap
        registry
            .inner
            .rooms
            .write()
            .await
            .insert("r1".to_string(), stale.clone());

        let (a, _rx) = test_client("a");
        let room = registry.join("r1", a).await.unwrap();

        assert!(!room.same_room(&stale));
        assert_eq!(room.member_count().await, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_kick_member() {
        let registry = registry();
        let (a, mut a_rx) = test_client("a");
        registry.join("r1", a).await.unwrap();

        assert!(registry.kick_member("r1", "a", "bye").await);
        assert!(!registry.kick_member("r1", "ghost", "bye").await);
        assert!(!registry.kick_member("nope", "a", "bye").await);

        let kick = a_rx.recv().await.unwrap();
        assert_eq!(kick.kind, MessageType::Kick);
        assert_eq!(kick.data, "bye");
    }

    #[tokio::test(start_paused = true)]
    async fn test_close_room() {
        let registry = registry();
        let (a, mut a_rx) = test_client("a");
        let (b, mut b_rx) = test_client("b");
        registry.join("r1", a.clone()).await.unwrap();
        registry.join("r1", b.clone()).await.unwrap();

        assert!(registry.close_room("r1").await);
        assert!(registry.find_room("r1").await.is_none());
        assert!(!registry.close_room("r1").await);

        tokio::time::sleep(Duration::from_millis(10)).await;
        let kinds = |rx: &mut mpsc::Receiver<Message>| {
            let mut kinds = Vec::new();
            while let Ok(m) = rx.try_recv() {
                kinds.push(m.kind);
            }
            kinds
        };
        assert_eq!(kinds(&mut a_rx), vec![MessageType::Join, MessageType::Kick]);
        assert_eq!(kinds(&mut b_rx), vec![MessageType::Kick]);
        assert!(a.room().is_none() && b.room().is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_snapshot_ordered_by_start_time() {
        let registry = registry();
        registry.start_room("first").await;
        tokio::time::sleep(Duration::from_millis(5)).await;
        // Wall clock drives start_time; make sure it moves forward
        std::thread::sleep(Duration::from_millis(5));
        let (b, _rx) = test_client("b");
        registry.join("second", b).await.unwrap();

        let snapshot = registry.snapshot().await;
        let ids: Vec<&str> = snapshot.iter().map(|r| r.id.as_str()).collect();
        assert_eq!(ids, vec!["first", "second"]);
        assert_eq!(snapshot[1].client_count, 1);
        assert_eq!(snapshot[1].clients[0].id, "b");
        assert_eq!(snapshot[0].client_count, 0);
    }
}
