//! Room actor implementation
//!
//! Each room runs one event loop that owns every membership change and
//! broadcast decision for that room. Other tasks talk to it through a
//! bounded queue (`RoomHandle`) and may read the member map under a
//! shared lock; only the loop writes it.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::{mpsc, oneshot, RwLock};
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

use crate::client::Client;
use crate::config::RoomSettings;
use crate::error::AppError;
use crate::message::{Message, MessageType, Peer};
use crate::registry::RoomRegistry;

/// Notice sent to a session replaced by a newer connection of the same user
pub const DISPLACED_NOTICE: &str = "Signed in from another connection";

/// Notice sent to members of a room closed by its host
pub const CLOSED_NOTICE: &str = "The room has been closed";

/// Events processed by the room loop, one per iteration
#[derive(Debug)]
pub(crate) enum RoomEvent {
    /// Admit a client; the reply fires once it is a member
    Admit {
        client: Arc<Client>,
        respond_to: oneshot::Sender<()>,
    },
    /// Remove a client (ignored for stale sessions)
    Remove { client: Arc<Client> },
    /// Fan a message out to every other member
    Broadcast { message: Message },
    /// Evict everyone and terminate
    Close,
}

/// Membership state, written only by the room loop
#[derive(Debug)]
struct RoomState {
    members: HashMap<String, Arc<Client>>,
    max_online: usize,
    last_active: DateTime<Utc>,
}

/// Monitoring snapshot of one room
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RoomInfo {
    pub id: String,
    pub client_count: usize,
    pub start_time: DateTime<Utc>,
    pub max_online: usize,
    pub last_active: DateTime<Utc>,
    pub clients: Vec<Peer>,
}

/// Handle to a running room
#[derive(Clone)]
pub struct RoomHandle {
    id: Arc<str>,
    started_at: DateTime<Utc>,
    events: mpsc::Sender<RoomEvent>,
    state: Arc<RwLock<RoomState>>,
}

impl RoomHandle {
    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    /// True if both handles point at the same room instance
    pub fn same_room(&self, other: &RoomHandle) -> bool {
        Arc::ptr_eq(&self.state, &other.state)
    }

    /// Hand a client to the room and wait until it is admitted.
    ///
    /// Fails with `RoomClosed` if the loop terminated first.
    pub async fn admit(&self, client: Arc<Client>) -> Result<(), AppError> {
        let (tx, rx) = oneshot::channel();
        self.events
            .send(RoomEvent::Admit {
                client,
                respond_to: tx,
            })
            .await
            .map_err(|_| AppError::RoomClosed(self.id.to_string()))?;

        rx.await
            .map_err(|_| AppError::RoomClosed(self.id.to_string()))
    }

    /// Ask the room to remove a client
    pub async fn remove(&self, client: Arc<Client>) -> Result<(), AppError> {
        self.events
            .send(RoomEvent::Remove { client })
            .await
            .map_err(|_| AppError::RoomClosed(self.id.to_string()))
    }

    /// Queue a message for fan-out
    pub async fn broadcast(&self, message: Message) -> Result<(), AppError> {
        self.events
            .send(RoomEvent::Broadcast { message })
            .await
            .map_err(|_| AppError::RoomClosed(self.id.to_string()))
    }

    /// Evict every member and stop the loop
    pub async fn close(&self) -> Result<(), AppError> {
        self.events
            .send(RoomEvent::Close)
            .await
            .map_err(|_| AppError::RoomClosed(self.id.to_string()))
    }

    /// True once the loop has terminated
    pub fn is_closed(&self) -> bool {
        self.events.is_closed()
    }

    /// Look up a live member by user id
    pub async fn find_member(&self, user_id: &str) -> Option<Arc<Client>> {
        self.state.read().await.members.get(user_id).cloned()
    }

    /// Live members ordered by join time
    pub async fn members(&self) -> Vec<Arc<Client>> {
        sorted_members(&*self.state.read().await)
    }

    pub async fn member_count(&self) -> usize {
        self.state.read().await.members.len()
    }

    /// Identities of every member except `user_id`, ordered by join time
    pub async fn roster_excluding(&self, user_id: &str) -> Vec<Peer> {
        self.members()
            .await
            .into_iter()
            .filter(|c| c.id() != user_id)
            .map(|c| c.peer().clone())
            .collect()
    }

    /// Monitoring snapshot
    pub async fn info(&self) -> RoomInfo {
        // One guard so counts and member list describe the same state
        let state = self.state.read().await;
        let clients: Vec<Peer> = sorted_members(&state)
            .iter()
            .map(|c| c.peer().clone())
            .collect();

        RoomInfo {
            id: self.id.to_string(),
            client_count: clients.len(),
            start_time: self.started_at,
            max_online: state.max_online,
            last_active: state.last_active,
            clients,
        }
    }
}

fn sorted_members(state: &RoomState) -> Vec<Arc<Client>> {
    let mut members: Vec<Arc<Client>> = state.members.values().cloned().collect();
    members.sort_by(|a, b| {
        a.joined_at()
            .cmp(&b.joined_at())
            .then_with(|| a.id().cmp(b.id()))
    });
    members
}

impl std::fmt::Debug for RoomHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RoomHandle")
            .field("id", &self.id)
            .field("started_at", &self.started_at)
            .finish()
    }
}

/// The room event loop
pub(crate) struct RoomActor {
    handle: RoomHandle,
    events: mpsc::Receiver<RoomEvent>,
    registry: RoomRegistry,
    settings: RoomSettings,
    /// Last idle check that saw members (or the start time)
    idle_since: Instant,
}

impl RoomActor {
    /// Create a room actor and the handle used to reach it
    pub(crate) fn new(
        id: &str,
        registry: RoomRegistry,
        settings: RoomSettings,
    ) -> (Self, RoomHandle) {
        let (tx, rx) = mpsc::channel(settings.queue_capacity);
        let now = Utc::now();
        let handle = RoomHandle {
            id: Arc::from(id),
            started_at: now,
            events: tx,
            state: Arc::new(RwLock::new(RoomState {
                members: HashMap::new(),
                max_online: 0,
                last_active: now,
            })),
        };
        let actor = Self {
            handle: handle.clone(),
            events: rx,
            registry,
            settings,
            idle_since: Instant::now(),
        };
        (actor, handle)
    }

    /// Run the room event loop until it is reaped or closed
    pub(crate) async fn run(mut self) {
        info!(room_id = %self.handle.id, "Room started");

        let period = self.settings.idle_check_interval;
        let mut ticker = interval_at(Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                event = self.events.recv() => match event {
                    Some(RoomEvent::Admit { client, respond_to }) => {
                        self.handle_admit(client).await;
                        let _ = respond_to.send(());
                    }
                    Some(RoomEvent::Remove { client }) => self.handle_remove(client).await,
                    Some(RoomEvent::Broadcast { message }) => {
                        self.fan_out(&message).await;
                    }
                    Some(RoomEvent::Close) | None => {
                        self.handle_close().await;
                        break;
                    }
                },
                _ = ticker.tick() => {
                    if self.handle_idle_tick().await {
                        break;
                    }
                }
            }
        }

        self.release_queue();
        info!(room_id = %self.handle.id, "Room stopped");
    }

    /// Admit a client, displacing any session with the same user id
    async fn handle_admit(&mut self, client: Arc<Client>) {
        let displaced = self
            .handle
            .state
            .write()
            .await
            .members
            .remove(client.id());

        if let Some(old) = displaced {
            warn!(
                room_id = %self.handle.id,
                user_id = %old.id(),
                old_session = %old.session(),
                new_session = %client.session(),
                "Displacing stale session"
            );
            old.detach();
            self.fan_out(&Message::presence(MessageType::Leave, old.peer()))
                .await;
            old.kick(DISPLACED_NOTICE);
        }

        client.attach(self.handle.clone());
        let count = {
            let mut state = self.handle.state.write().await;
            state
                .members
                .insert(client.id().to_string(), Arc::clone(&client));
            let count = state.members.len();
            if count > state.max_online {
                state.max_online = count;
            }
            count
        };

        info!(
            room_id = %self.handle.id,
            user_id = %client.id(),
            role = %client.role(),
            members = count,
            "Client joined"
        );

        self.fan_out(&Message::presence(MessageType::Join, client.peer()))
            .await;
    }

    /// Announce and remove a client, unless a newer session replaced it
    async fn handle_remove(&mut self, client: Arc<Client>) {
        let current = self
            .handle
            .state
            .read()
            .await
            .members
            .get(client.id())
            .map(|c| c.session());

        if current != Some(client.session()) {
            debug!(
                room_id = %self.handle.id,
                user_id = %client.id(),
                "Ignoring removal of stale session"
            );
            return;
        }

        self.fan_out(&Message::presence(MessageType::Leave, client.peer()))
            .await;

        let count = {
            let mut state = self.handle.state.write().await;
            state.members.remove(client.id());
            state.members.len()
        };
        client.detach();

        info!(
            room_id = %self.handle.id,
            user_id = %client.id(),
            members = count,
            "Client left"
        );
    }

    /// Enqueue `message` on every accepting member except its sender.
    ///
    /// Returns the number of members the message was queued for.
    async fn fan_out(&self, message: &Message) -> usize {
        let Some(sender_id) = message.sender_id() else {
            debug!(
                room_id = %self.handle.id,
                kind = %message.kind,
                "Discarding broadcast without sender"
            );
            return 0;
        };

        let state = self.handle.state.read().await;
        let mut delivered = 0;
        for member in state.members.values() {
            if member.id() == sender_id || !message.receiver.accepts(member.peer()) {
                continue;
            }
            match member.send(message.clone()) {
                Ok(()) => delivered += 1,
                Err(e) => debug!(
                    room_id = %self.handle.id,
                    user_id = %member.id(),
                    kind = %message.kind,
                    error = %e,
                    "Skipping broadcast to slow client"
                ),
            }
        }
        delivered
    }

    /// Refresh or expire the idle clock; returns true when the room is reaped
    async fn handle_idle_tick(&mut self) -> bool {
        let now = Instant::now();
        {
            let mut state = self.handle.state.write().await;
            if !state.members.is_empty() {
                self.idle_since = now;
                state.last_active = Utc::now();
            }
        }

        if now.duration_since(self.idle_since) <= self.settings.idle_timeout {
            return false;
        }

        info!(
            room_id = %self.handle.id,
            idle_secs = now.duration_since(self.idle_since).as_secs(),
            "Reaping idle room"
        );
        self.registry.remove_instance(&self.handle).await;
        true
    }

    /// Evict every member
    async fn handle_close(&mut self) {
        let evicted: Vec<Arc<Client>> = self
            .handle
            .state
            .write()
            .await
            .members
            .drain()
            .map(|(_, client)| client)
            .collect();

        for client in &evicted {
            client.detach();
            client.kick(CLOSED_NOTICE);
        }

        info!(
            room_id = %self.handle.id,
            evicted = evicted.len(),
            "Room closed"
        );
        self.registry.remove_instance(&self.handle).await;
    }

    /// Stop accepting events and fail any admissions still queued
    fn release_queue(&mut self) {
        self.events.close();
        while let Ok(event) = self.events.try_recv() {
            if let RoomEvent::Admit { client, .. } = event {
                debug!(
                    room_id = %self.handle.id,
                    user_id = %client.id(),
                    "Dropping admission to terminated room"
                );
            }
        }
    }
}
