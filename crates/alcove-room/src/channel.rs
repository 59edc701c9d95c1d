use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::broadcast;
use tokio::time::Instant;
use tracing::{debug, warn};
use uuid::Uuid;

use alcove_types::events::RoomEvent;
use alcove_types::models::{Message, PresenceEntry};

use crate::error::RoomError;

/// How many recent message ids a subscription remembers for duplicate
/// filtering of the at-least-once insert feed.
const DEDUP_WINDOW: usize = 128;

#[derive(Debug, Clone)]
pub struct RoomHubConfig {
    /// Typing entries with no refresh inside this window are expired and a
    /// `is_typing = false` transition is synthesized for peers.
    pub typing_window: Duration,
    /// Per-subscriber event queue depth. A subscriber that falls further
    /// behind loses the oldest events, never stalls the room.
    pub queue_capacity: usize,
}

impl Default for RoomHubConfig {
    fn default() -> Self {
        Self {
            typing_window: Duration::from_secs(2),
            queue_capacity: 256,
        }
    }
}

/// Per-room realtime hub. Multiplexes persisted message inserts, ephemeral
/// typing signals, and presence into one event stream per subscriber.
#[derive(Clone)]
pub struct RoomHub {
    inner: Arc<HubInner>,
}

struct HubInner {
    config: RoomHubConfig,
    closed: AtomicBool,
    /// Live rooms only. A room exists while it has at least one subscriber;
    /// the entry is removed when the last handle is released.
    rooms: RwLock<HashMap<Uuid, Arc<RoomShared>>>,
}

struct RoomShared {
    room_id: Uuid,
    /// Fan-out channel. Sending never blocks; lagging receivers drop their
    /// oldest events (tokio broadcast semantics).
    events: broadcast::Sender<RoomEvent>,
    /// All mutable room state, serialized by one lock per room.
    state: Mutex<RoomState>,
}

#[derive(Default)]
struct RoomState {
    subscribers: HashMap<Uuid, SubscriberEntry>,
    typing: HashMap<Uuid, TypingEntry>,
    /// Monotonic counter. Every typing refresh takes a new epoch, so an
    /// expiry timer from a superseded signal can never clear a newer entry.
    typing_epoch: u64,
}

struct SubscriberEntry {
    user_id: Uuid,
    username: String,
    connected_at: DateTime<Utc>,
}

struct TypingEntry {
    username: String,
    epoch: u64,
}

impl RoomHub {
    pub fn new(config: RoomHubConfig) -> Self {
        Self {
            inner: Arc::new(HubInner {
                config,
                closed: AtomicBool::new(false),
                rooms: RwLock::new(HashMap::new()),
            }),
        }
    }

    /// Register a subscriber on a room. Presence for `(room, user)` starts
    /// tracking immediately; the announcement to peers is asynchronous and
    /// may land after this call returns — callers wait for the first
    /// `PresenceSync` rather than assume peers already see them.
    pub fn subscribe(
        &self,
        room_id: Uuid,
        user_id: Uuid,
        username: &str,
    ) -> Result<RoomSubscription, RoomError> {
        if self.inner.closed.load(Ordering::Acquire) {
            return Err(RoomError::ChannelUnavailable);
        }
        if room_id.is_nil() || user_id.is_nil() {
            return Err(RoomError::InvalidSubscriber);
        }

        let room = self.room_entry(room_id);
        let handle_id = Uuid::new_v4();

        // Attach the receiver before announcing, so this subscriber's first
        // event is the presence set that already includes it.
        let rx = room.events.subscribe();
        {
            let mut state = room.state.lock().expect("room state lock poisoned");
            state.subscribers.insert(
                handle_id,
                SubscriberEntry {
                    user_id,
                    username: username.to_string(),
                    connected_at: Utc::now(),
                },
            );
            let members = presence_snapshot(&state);
            let _ = room.events.send(RoomEvent::PresenceSync { members });
        }

        debug!("{} ({}) subscribed to room {}", username, user_id, room_id);

        Ok(RoomSubscription {
            shared: Arc::new(SubscriptionShared {
                hub: self.inner.clone(),
                room,
                handle_id,
                user_id,
                username: username.to_string(),
                closed: AtomicBool::new(false),
            }),
            rx,
            seen_ids: HashSet::new(),
            seen_order: VecDeque::new(),
        })
    }

    /// Insert-notification entry point: fan a freshly persisted message out
    /// to the room's live subscribers. A room nobody is watching is a no-op.
    pub fn publish_message(&self, message: &Message, sender_username: &str) {
        let room = {
            let rooms = self.inner.rooms.read().expect("rooms lock poisoned");
            rooms.get(&message.room_id).cloned()
        };
        if let Some(room) = room {
            let _ = room.events.send(RoomEvent::MessageCreate {
                id: message.id,
                room_id: message.room_id,
                sender_id: message.sender_id,
                sender_username: sender_username.to_string(),
                content: message.content.clone(),
                created_at: message.created_at,
            });
        }
    }

    /// Current presence set for a room.
    pub fn presence(&self, room_id: Uuid) -> Vec<PresenceEntry> {
        let room = {
            let rooms = self.inner.rooms.read().expect("rooms lock poisoned");
            rooms.get(&room_id).cloned()
        };
        match room {
            Some(room) => {
                let state = room.state.lock().expect("room state lock poisoned");
                presence_snapshot(&state)
            }
            None => Vec::new(),
        }
    }

    /// Stop accepting new subscribers. Existing subscriptions drain and
    /// release normally.
    pub fn shutdown(&self) {
        self.inner.closed.store(true, Ordering::Release);
    }

    fn room_entry(&self, room_id: Uuid) -> Arc<RoomShared> {
        {
            let rooms = self.inner.rooms.read().expect("rooms lock poisoned");
            if let Some(room) = rooms.get(&room_id) {
                return room.clone();
            }
        }
        let mut rooms = self.inner.rooms.write().expect("rooms lock poisoned");
        rooms
            .entry(room_id)
            .or_insert_with(|| {
                let (events, _) = broadcast::channel(self.inner.config.queue_capacity);
                Arc::new(RoomShared {
                    room_id,
                    events,
                    state: Mutex::new(RoomState::default()),
                })
            })
            .clone()
    }
}

/// A live subscription handle. Dropping it (or calling `close`) removes the
/// presence entry and invalidates pending typing timers — cleanup runs on
/// every exit path, so peers never see a ghost subscriber.
pub struct RoomSubscription {
    shared: Arc<SubscriptionShared>,
    rx: broadcast::Receiver<RoomEvent>,
    seen_ids: HashSet<Uuid>,
    seen_order: VecDeque<Uuid>,
}

/// Cheap cloneable typing-sender half of a subscription, for callers that
/// consume events and send signals from different tasks.
#[derive(Clone)]
pub struct TypingSender {
    shared: Arc<SubscriptionShared>,
}

struct SubscriptionShared {
    hub: Arc<HubInner>,
    room: Arc<RoomShared>,
    handle_id: Uuid,
    user_id: Uuid,
    username: String,
    closed: AtomicBool,
}

impl RoomSubscription {
    pub fn room_id(&self) -> Uuid {
        self.shared.room.room_id
    }

    pub fn user_id(&self) -> Uuid {
        self.shared.user_id
    }

    pub fn username(&self) -> &str {
        &self.shared.username
    }

    pub fn typing_sender(&self) -> TypingSender {
        TypingSender {
            shared: self.shared.clone(),
        }
    }

    /// Broadcast a typing signal to the other subscribers of the room —
    /// never echoed back to this handle. `true` refreshes the expiry
    /// deadline; `false` clears eagerly. Peers still expire the entry on
    /// their own if the `false` never arrives.
    pub fn send_typing(&self, is_typing: bool) {
        self.shared.send_typing(is_typing);
    }

    /// Next event for this subscriber: messages (deduplicated by id),
    /// typing transitions (self-filtered), and full presence sets. Returns
    /// `None` once the subscription is closed.
    pub async fn next_event(&mut self) -> Option<RoomEvent> {
        loop {
            if self.shared.closed.load(Ordering::Acquire) {
                return None;
            }
            match self.rx.recv().await {
                Ok(event) => {
                    match &event {
                        RoomEvent::TypingUpdate { user_id, .. }
                            if *user_id == self.shared.user_id =>
                        {
                            continue;
                        }
                        RoomEvent::MessageCreate { id, .. } => {
                            if !self.note_message(*id) {
                                continue;
                            }
                        }
                        _ => {}
                    }
                    return Some(event);
                }
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    warn!(
                        "room {} subscriber {} lagged by {} events, oldest dropped",
                        self.shared.room.room_id, self.shared.user_id, n
                    );
                    continue;
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }

    /// Idempotent: a second close on an already-closed handle is a no-op.
    pub fn close(&mut self) {
        self.shared.release();
    }

    /// Remember a message id; false means we already delivered it.
    fn note_message(&mut self, id: Uuid) -> bool {
        if !self.seen_ids.insert(id) {
            return false;
        }
        self.seen_order.push_back(id);
        if self.seen_order.len() > DEDUP_WINDOW {
            if let Some(old) = self.seen_order.pop_front() {
                self.seen_ids.remove(&old);
            }
        }
        true
    }
}

impl Drop for RoomSubscription {
    fn drop(&mut self) {
        self.shared.release();
    }
}

impl TypingSender {
    pub fn send_typing(&self, is_typing: bool) {
        self.shared.send_typing(is_typing);
    }
}

impl SubscriptionShared {
    fn send_typing(&self, is_typing: bool) {
        if self.closed.load(Ordering::Acquire) {
            return;
        }
        if is_typing {
            let (epoch, deadline) = {
                let mut state = self.room.state.lock().expect("room state lock poisoned");
                state.typing_epoch += 1;
                let epoch = state.typing_epoch;
                let deadline = Instant::now() + self.hub.config.typing_window;
                state.typing.insert(
                    self.user_id,
                    TypingEntry {
                        username: self.username.clone(),
                        epoch,
                    },
                );
                let _ = self.room.events.send(RoomEvent::TypingUpdate {
                    user_id: self.user_id,
                    username: self.username.clone(),
                    is_typing: true,
                });
                (epoch, deadline)
            };
            spawn_typing_expiry(self.room.clone(), self.user_id, epoch, deadline);
        } else {
            let mut state = self.room.state.lock().expect("room state lock poisoned");
            if let Some(entry) = state.typing.remove(&self.user_id) {
                let _ = self.room.events.send(RoomEvent::TypingUpdate {
                    user_id: self.user_id,
                    username: entry.username,
                    is_typing: false,
                });
            }
        }
    }

    fn release(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        let empty = {
            let mut state = self.room.state.lock().expect("room state lock poisoned");
            state.subscribers.remove(&self.handle_id);

            // Clear this user's typing entry unless another handle of the
            // same user is still connected.
            let user_still_here = state
                .subscribers
                .values()
                .any(|s| s.user_id == self.user_id);
            if !user_still_here {
                if let Some(entry) = state.typing.remove(&self.user_id) {
                    let _ = self.room.events.send(RoomEvent::TypingUpdate {
                        user_id: self.user_id,
                        username: entry.username,
                        is_typing: false,
                    });
                }
            }

            let members = presence_snapshot(&state);
            let _ = self.room.events.send(RoomEvent::PresenceSync { members });
            state.subscribers.is_empty()
        };

        if empty {
            // Re-check emptiness under both locks; a concurrent subscribe
            // may have revived the room since we released the state lock.
            let mut rooms = self.hub.rooms.write().expect("rooms lock poisoned");
            if let Some(room) = rooms.get(&self.room.room_id) {
                let still_empty = Arc::ptr_eq(room, &self.room)
                    && room
                        .state
                        .lock()
                        .expect("room state lock poisoned")
                        .subscribers
                        .is_empty();
                if still_empty {
                    rooms.remove(&self.room.room_id);
                }
            }
        }

        debug!(
            "{} ({}) unsubscribed from room {}",
            self.username, self.user_id, self.room.room_id
        );
    }
}

fn spawn_typing_expiry(room: Arc<RoomShared>, user_id: Uuid, epoch: u64, deadline: Instant) {
    tokio::spawn(async move {
        tokio::time::sleep_until(deadline).await;
        let mut state = room.state.lock().expect("room state lock poisoned");
        let current = matches!(state.typing.get(&user_id), Some(entry) if entry.epoch == epoch);
        if current {
            if let Some(entry) = state.typing.remove(&user_id) {
                let _ = room.events.send(RoomEvent::TypingUpdate {
                    user_id,
                    username: entry.username,
                    is_typing: false,
                });
            }
        }
    });
}

/// Full presence set, one entry per distinct user (a user with several open
/// handles appears once, with the earliest connection time).
fn presence_snapshot(state: &RoomState) -> Vec<PresenceEntry> {
    let mut by_user: HashMap<Uuid, PresenceEntry> = HashMap::new();
    for sub in state.subscribers.values() {
        by_user
            .entry(sub.user_id)
            .and_modify(|entry| {
                if sub.connected_at < entry.connected_at {
                    entry.connected_at = sub.connected_at;
                }
            })
            .or_insert_with(|| PresenceEntry {
                user_id: sub.user_id,
                username: sub.username.clone(),
                connected_at: sub.connected_at,
            });
    }
    let mut members: Vec<PresenceEntry> = by_user.into_values().collect();
    members.sort_by(|a, b| a.connected_at.cmp(&b.connected_at).then(a.user_id.cmp(&b.user_id)));
    members
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tokio::time::timeout;

    fn hub() -> RoomHub {
        RoomHub::new(RoomHubConfig::default())
    }

    fn message(room_id: Uuid, sender_id: Uuid, content: &str) -> Message {
        Message {
            id: Uuid::new_v4(),
            room_id,
            sender_id,
            content: content.to_string(),
            created_at: Utc::now(),
        }
    }

    /// Next typing transition, skipping presence/message traffic.
    async fn next_typing(sub: &mut RoomSubscription) -> (Uuid, bool) {
        loop {
            match sub.next_event().await.expect("stream ended") {
                RoomEvent::TypingUpdate {
                    user_id, is_typing, ..
                } => return (user_id, is_typing),
                _ => continue,
            }
        }
    }

    /// Drain everything currently queued without waiting for more.
    async fn drain(sub: &mut RoomSubscription) -> Vec<RoomEvent> {
        let mut events = Vec::new();
        while let Ok(Some(event)) = timeout(Duration::from_millis(1), sub.next_event()).await {
            events.push(event);
        }
        events
    }

    #[tokio::test]
    async fn presence_tracks_live_subscribers_exactly() {
        let hub = hub();
        let room = Uuid::new_v4();
        let a = hub.subscribe(room, Uuid::new_v4(), "alice").unwrap();
        let b = hub.subscribe(room, Uuid::new_v4(), "bob").unwrap();

        let names: Vec<_> = hub.presence(room).into_iter().map(|p| p.username).collect();
        assert_eq!(names, ["alice", "bob"]);

        drop(b);
        let names: Vec<_> = hub.presence(room).into_iter().map(|p| p.username).collect();
        assert_eq!(names, ["alice"]);

        drop(a);
        assert!(hub.presence(room).is_empty());
    }

    #[tokio::test]
    async fn close_is_idempotent() {
        let hub = hub();
        let room = Uuid::new_v4();
        let mut a = hub.subscribe(room, Uuid::new_v4(), "alice").unwrap();
        a.close();
        a.close();
        assert!(hub.presence(room).is_empty());
        assert!(a.next_event().await.is_none());
    }

    #[tokio::test]
    async fn subscribe_rejects_nil_ids_and_shutdown() {
        let hub = hub();
        assert_eq!(
            hub.subscribe(Uuid::nil(), Uuid::new_v4(), "alice").err(),
            Some(RoomError::InvalidSubscriber)
        );
        assert_eq!(
            hub.subscribe(Uuid::new_v4(), Uuid::nil(), "alice").err(),
            Some(RoomError::InvalidSubscriber)
        );

        hub.shutdown();
        assert_eq!(
            hub.subscribe(Uuid::new_v4(), Uuid::new_v4(), "alice").err(),
            Some(RoomError::ChannelUnavailable)
        );
    }

    #[tokio::test]
    async fn peers_receive_full_presence_sets() {
        let hub = hub();
        let room = Uuid::new_v4();
        let mut a = hub.subscribe(room, Uuid::new_v4(), "alice").unwrap();

        let b = hub.subscribe(room, Uuid::new_v4(), "bob").unwrap();
        drop(b);

        let mut sets = Vec::new();
        for event in drain(&mut a).await {
            if let RoomEvent::PresenceSync { members } = event {
                sets.push(members.into_iter().map(|m| m.username).collect::<Vec<_>>());
            }
        }
        // Own join, bob's join, bob's leave — always the full set.
        assert_eq!(sets, vec![vec!["alice".to_string()],
                              vec!["alice".to_string(), "bob".to_string()],
                              vec!["alice".to_string()]]);
    }

    #[tokio::test]
    async fn messages_dedup_by_id_and_preserve_sender_order() {
        let hub = hub();
        let room = Uuid::new_v4();
        let alice = Uuid::new_v4();
        let mut b = hub.subscribe(room, Uuid::new_v4(), "bob").unwrap();

        let m1 = message(room, alice, "first");
        let m2 = message(room, alice, "second");
        hub.publish_message(&m1, "alice");
        hub.publish_message(&m1, "alice"); // at-least-once redelivery
        hub.publish_message(&m2, "alice");

        let ids: Vec<Uuid> = drain(&mut b)
            .await
            .into_iter()
            .filter_map(|event| match event {
                RoomEvent::MessageCreate { id, .. } => Some(id),
                _ => None,
            })
            .collect();
        assert_eq!(ids, vec![m1.id, m2.id]);
    }

    #[tokio::test]
    async fn publish_without_subscribers_is_a_noop() {
        let hub = hub();
        let room = Uuid::new_v4();
        hub.publish_message(&message(room, Uuid::new_v4(), "hello"), "alice");
        assert!(hub.presence(room).is_empty());
    }

    #[tokio::test]
    async fn slow_subscriber_drops_oldest_events() {
        let hub = RoomHub::new(RoomHubConfig {
            queue_capacity: 4,
            ..RoomHubConfig::default()
        });
        let room = Uuid::new_v4();
        let alice = Uuid::new_v4();
        let mut b = hub.subscribe(room, Uuid::new_v4(), "bob").unwrap();

        let mut sent = Vec::new();
        for i in 0..10 {
            let m = message(room, alice, &format!("m{i}"));
            hub.publish_message(&m, "alice");
            sent.push(m.id);
        }

        let received: Vec<Uuid> = drain(&mut b)
            .await
            .into_iter()
            .filter_map(|event| match event {
                RoomEvent::MessageCreate { id, .. } => Some(id),
                _ => None,
            })
            .collect();

        assert!(received.len() < sent.len());
        assert_eq!(received.last(), sent.last());
        assert!(!received.contains(&sent[0]));
    }

    #[tokio::test]
    async fn typing_is_never_echoed_to_the_sender() {
        let hub = hub();
        let room = Uuid::new_v4();
        let mut a = hub.subscribe(room, Uuid::new_v4(), "alice").unwrap();
        let mut b = hub.subscribe(room, Uuid::new_v4(), "bob").unwrap();

        a.send_typing(true);

        assert_eq!(next_typing(&mut b).await, (a.user_id(), true));
        assert!(
            drain(&mut a)
                .await
                .iter()
                .all(|event| !matches!(event, RoomEvent::TypingUpdate { .. })),
            "sender must not observe its own typing signal"
        );
    }

    #[tokio::test(start_paused = true)]
    async fn typing_expires_without_an_explicit_stop() {
        let hub = hub();
        let room = Uuid::new_v4();
        let a = hub.subscribe(room, Uuid::new_v4(), "alice").unwrap();
        let mut b = hub.subscribe(room, Uuid::new_v4(), "bob").unwrap();

        a.send_typing(true);
        assert_eq!(next_typing(&mut b).await, (a.user_id(), true));

        // No stop signal; the deadline sweep synthesizes the transition.
        assert_eq!(next_typing(&mut b).await, (a.user_id(), false));
    }

    #[tokio::test(start_paused = true)]
    async fn typing_refresh_supersedes_the_older_deadline() {
        let hub = hub();
        let room = Uuid::new_v4();
        let a = hub.subscribe(room, Uuid::new_v4(), "alice").unwrap();
        let mut b = hub.subscribe(room, Uuid::new_v4(), "bob").unwrap();

        a.send_typing(true); // deadline at t=2s
        assert_eq!(next_typing(&mut b).await, (a.user_id(), true));

        tokio::time::advance(Duration::from_secs(1)).await;
        a.send_typing(true); // refreshed deadline at t=3s
        assert_eq!(next_typing(&mut b).await, (a.user_id(), true));

        // Past the first deadline: the stale timer must not fire.
        tokio::time::advance(Duration::from_millis(1500)).await;
        assert!(
            timeout(Duration::from_millis(1), b.next_event())
                .await
                .is_err(),
            "superseded timer produced an event"
        );

        // Past the refreshed deadline.
        tokio::time::advance(Duration::from_secs(1)).await;
        assert_eq!(next_typing(&mut b).await, (a.user_id(), false));
    }

    #[tokio::test]
    async fn explicit_stop_clears_once() {
        let hub = hub();
        let room = Uuid::new_v4();
        let a = hub.subscribe(room, Uuid::new_v4(), "alice").unwrap();
        let mut b = hub.subscribe(room, Uuid::new_v4(), "bob").unwrap();

        a.send_typing(true);
        a.send_typing(false);
        a.send_typing(false); // second stop has nothing to clear

        assert_eq!(next_typing(&mut b).await, (a.user_id(), true));
        assert_eq!(next_typing(&mut b).await, (a.user_id(), false));
        assert!(
            timeout(Duration::from_millis(10), b.next_event())
                .await
                .is_err()
        );
    }

    #[tokio::test]
    async fn disconnect_while_typing_clears_for_peers() {
        let hub = hub();
        let room = Uuid::new_v4();
        let a = hub.subscribe(room, Uuid::new_v4(), "alice").unwrap();
        let alice_id = a.user_id();
        let mut b = hub.subscribe(room, Uuid::new_v4(), "bob").unwrap();

        a.send_typing(true);
        assert_eq!(next_typing(&mut b).await, (alice_id, true));

        // Dropped without ever sending a stop signal.
        drop(a);
        assert_eq!(next_typing(&mut b).await, (alice_id, false));
        let names: Vec<_> = hub.presence(room).into_iter().map(|p| p.username).collect();
        assert_eq!(names, ["bob"]);
    }

    #[tokio::test]
    async fn duplicate_user_handles_collapse_in_presence() {
        let hub = hub();
        let room = Uuid::new_v4();
        let user = Uuid::new_v4();
        let first = hub.subscribe(room, user, "alice").unwrap();
        let second = hub.subscribe(room, user, "alice").unwrap();

        assert_eq!(hub.presence(room).len(), 1);

        drop(first);
        assert_eq!(hub.presence(room).len(), 1, "second handle keeps presence");

        drop(second);
        assert!(hub.presence(room).is_empty());
    }
}
