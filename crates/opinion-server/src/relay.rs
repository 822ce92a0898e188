//! Room registry and message relay.
//!
//! Every room is a sequential actor task that owns the room's history and
//! its subscriber set. All joins, posts and leaves for one room travel
//! through that actor's command channel, so arrival order, append order and
//! broadcast order are the same. Different rooms run in parallel.
//!
//! A [`Connection`] is the registry-side handle for one live socket. Dropping
//! it unsubscribes the socket from every room it joined.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use chrono::{SubsecRound, Utc};
use tokio::sync::{mpsc, oneshot, RwLock};
use tracing::{debug, info, warn};

use opinion_shared::{ConnectionId, Message, MessageDraft, RoomId, ServerEvent};

use crate::error::ServerError;

/// Outbound queue of one connection. Unbounded: the relay never waits on a
/// slow reader.
pub type Outbound = mpsc::UnboundedSender<ServerEvent>;

// ---------------------------------------------------------------------------
// Room actor
// ---------------------------------------------------------------------------

enum RoomCommand {
    Join {
        conn: ConnectionId,
        outbound: Outbound,
    },
    Post {
        conn: ConnectionId,
        draft: MessageDraft,
    },
    Leave {
        conn: ConnectionId,
    },
    History {
        reply: oneshot::Sender<Vec<Message>>,
    },
    Members {
        reply: oneshot::Sender<usize>,
    },
}

struct Room {
    id: RoomId,
    history: VecDeque<Message>,
    subscribers: HashMap<ConnectionId, Outbound>,
    /// 0 = unlimited
    history_limit: usize,
}

impl Room {
    fn new(id: RoomId, history_limit: usize) -> Self {
        Self {
            id,
            history: VecDeque::new(),
            subscribers: HashMap::new(),
            history_limit,
        }
    }

    /// Replay history to the joiner, then subscribe it.
    ///
    /// Both happen in one actor step, so every later broadcast lands in the
    /// joiner's queue after the replay and nothing is delivered twice.
    fn join(&mut self, conn: ConnectionId, outbound: Outbound) {
        let snapshot: Vec<Message> = self.history.iter().cloned().collect();
        let replayed = snapshot.len();

        if outbound.send(ServerEvent::ChatHistory(snapshot)).is_err() {
            debug!(room = %self.id, conn = %conn, "Joiner went away before history replay");
            return;
        }

        let rejoin = self.subscribers.insert(conn, outbound).is_some();
        info!(
            room = %self.id,
            conn = %conn,
            replayed,
            rejoin,
            members = self.subscribers.len(),
            "Connection joined room"
        );
    }

    fn post(&mut self, conn: ConnectionId, draft: MessageDraft) {
        // Wire timestamps carry milliseconds; store exactly what replays.
        let message = draft.accept(Utc::now().trunc_subsecs(3));

        self.history.push_back(message.clone());
        if self.history_limit > 0 {
            while self.history.len() > self.history_limit {
                self.history.pop_front();
            }
        }

        let room = &self.id;
        self.subscribers.retain(|target, tx| {
            if tx.send(ServerEvent::ReceiveMessage(message.clone())).is_ok() {
                true
            } else {
                debug!(room = %room, target = %target, "Dropping closed subscriber");
                false
            }
        });

        debug!(
            room = %self.id,
            conn = %conn,
            sender = %message.sender,
            history = self.history.len(),
            recipients = self.subscribers.len(),
            "Message relayed"
        );
    }

    fn leave(&mut self, conn: ConnectionId) {
        if self.subscribers.remove(&conn).is_some() {
            info!(
                room = %self.id,
                conn = %conn,
                members = self.subscribers.len(),
                "Connection left room"
            );
        }
    }
}

async fn run_room(mut room: Room, mut commands: mpsc::UnboundedReceiver<RoomCommand>) {
    while let Some(command) = commands.recv().await {
        match command {
            RoomCommand::Join { conn, outbound } => room.join(conn, outbound),
            RoomCommand::Post { conn, draft } => room.post(conn, draft),
            RoomCommand::Leave { conn } => room.leave(conn),
            RoomCommand::History { reply } => {
                let _ = reply.send(room.history.iter().cloned().collect());
            }
            RoomCommand::Members { reply } => {
                let _ = reply.send(room.subscribers.len());
            }
        }
    }

    debug!(room = %room.id, "Room actor stopped");
}

#[derive(Clone)]
struct RoomHandle {
    commands: mpsc::UnboundedSender<RoomCommand>,
}

impl RoomHandle {
    fn send(&self, room_id: &RoomId, command: RoomCommand) -> Result<(), ServerError> {
        self.commands
            .send(command)
            .map_err(|_| ServerError::RoomUnavailable(room_id.clone()))
    }
}

// ---------------------------------------------------------------------------
// Registry
// ---------------------------------------------------------------------------

/// Owner of all rooms for the lifetime of one server instance.
///
/// Cheap to clone; clones share the same rooms.
#[derive(Clone)]
pub struct RoomRegistry {
    rooms: Arc<RwLock<HashMap<RoomId, RoomHandle>>>,
    closed: Arc<AtomicBool>,
    history_limit: usize,
}

impl RoomRegistry {
    /// `history_limit` caps each room's retained history; 0 keeps everything.
    pub fn new(history_limit: usize) -> Self {
        Self {
            rooms: Arc::new(RwLock::new(HashMap::new())),
            closed: Arc::new(AtomicBool::new(false)),
            history_limit,
        }
    }

    /// Register a new socket whose events will be pushed into `outbound`.
    pub fn connect(&self, outbound: Outbound) -> Connection {
        Connection {
            id: ConnectionId::new(),
            registry: self.clone(),
            outbound,
            joined: HashMap::new(),
        }
    }

    /// Look up a room, spawning its actor on first use.
    async fn room(&self, room_id: &RoomId) -> Result<RoomHandle, ServerError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(ServerError::ShuttingDown);
        }

        if let Some(handle) = self.rooms.read().await.get(room_id) {
            return Ok(handle.clone());
        }

        let mut rooms = self.rooms.write().await;
        let handle = rooms.entry(room_id.clone()).or_insert_with(|| {
            let (tx, rx) = mpsc::unbounded_channel();
            tokio::spawn(run_room(Room::new(room_id.clone(), self.history_limit), rx));
            info!(room = %room_id, "Created room");
            RoomHandle { commands: tx }
        });
        Ok(handle.clone())
    }

    /// Snapshot of a room's history. Unknown rooms read as empty and are not
    /// created.
    pub async fn history(&self, room_id: &RoomId) -> Result<Vec<Message>, ServerError> {
        let Some(handle) = self.rooms.read().await.get(room_id).cloned() else {
            return Ok(Vec::new());
        };

        let (reply, rx) = oneshot::channel();
        handle.send(room_id, RoomCommand::History { reply })?;
        rx.await
            .map_err(|_| ServerError::RoomUnavailable(room_id.clone()))
    }

    /// Number of live subscribers in a room.
    pub async fn member_count(&self, room_id: &RoomId) -> usize {
        let Some(handle) = self.rooms.read().await.get(room_id).cloned() else {
            return 0;
        };

        let (reply, rx) = oneshot::channel();
        if handle.send(room_id, RoomCommand::Members { reply }).is_err() {
            return 0;
        }
        rx.await.unwrap_or(0)
    }

    pub async fn room_count(&self) -> usize {
        self.rooms.read().await.len()
    }

    pub fn history_limit(&self) -> usize {
        self.history_limit
    }

    /// Stop accepting work and release every room actor.
    ///
    /// Actors exit once the last live [`Connection`] referencing them is gone.
    pub async fn shutdown(&self) {
        self.closed.store(true, Ordering::Release);
        let mut rooms = self.rooms.write().await;
        let count = rooms.len();
        rooms.clear();
        info!(rooms = count, "Room registry shut down");
    }
}

impl Default for RoomRegistry {
    fn default() -> Self {
        Self::new(0)
    }
}

// ---------------------------------------------------------------------------
// Connection
// ---------------------------------------------------------------------------

/// Registry-side handle for one socket.
///
/// Tracks the rooms the socket joined so that dropping the handle leaves all
/// of them. Message history is never touched on disconnect.
pub struct Connection {
    id: ConnectionId,
    registry: RoomRegistry,
    outbound: Outbound,
    joined: HashMap<RoomId, RoomHandle>,
}

impl Connection {
    pub fn id(&self) -> ConnectionId {
        self.id
    }

    /// Subscribe to `room_id` and receive its history as `chat-history`.
    /// Joining an already joined room replays history again but never
    /// duplicates live delivery.
    pub async fn join(&mut self, room_id: RoomId) -> Result<(), ServerError> {
        let handle = self.registry.room(&room_id).await?;
        handle.send(
            &room_id,
            RoomCommand::Join {
                conn: self.id,
                outbound: self.outbound.clone(),
            },
        )?;
        self.joined.insert(room_id, handle);
        Ok(())
    }

    /// Append to `room_id` and broadcast to its subscribers.
    ///
    /// No membership check: posting to a room this connection never joined
    /// is accepted.
    pub async fn post(&self, room_id: RoomId, draft: MessageDraft) -> Result<(), ServerError> {
        let handle = match self.joined.get(&room_id) {
            Some(handle) => handle.clone(),
            None => self.registry.room(&room_id).await?,
        };
        handle.send(
            &room_id,
            RoomCommand::Post {
                conn: self.id,
                draft,
            },
        )
    }

    pub fn leave(&mut self, room_id: &RoomId) {
        if let Some(handle) = self.joined.remove(room_id) {
            let _ = handle.send(room_id, RoomCommand::Leave { conn: self.id });
        }
    }

    pub fn joined_rooms(&self) -> impl Iterator<Item = &RoomId> {
        self.joined.keys()
    }

    /// Leave every joined room. Same as dropping the handle.
    pub fn disconnect(self) {}
}

impl Drop for Connection {
    fn drop(&mut self) {
        for (room_id, handle) in self.joined.drain() {
            if handle
                .send(&room_id, RoomCommand::Leave { conn: self.id })
                .is_err()
            {
                warn!(room = %room_id, conn = %self.id, "Room gone before leave");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use tokio::sync::mpsc::UnboundedReceiver;

    fn client(registry: &RoomRegistry) -> (Connection, UnboundedReceiver<ServerEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (registry.connect(tx), rx)
    }

    async fn next_event(rx: &mut UnboundedReceiver<ServerEvent>) -> ServerEvent {
        tokio::time::timeout(std::time::Duration::from_secs(1), rx.recv())
            .await
            .expect("timed out waiting for event")
            .expect("outbound closed")
    }

    async fn expect_history(rx: &mut UnboundedReceiver<ServerEvent>) -> Vec<Message> {
        match next_event(rx).await {
            ServerEvent::ChatHistory(history) => history,
            other => panic!("expected chat-history, got {other:?}"),
        }
    }

    async fn expect_message(rx: &mut UnboundedReceiver<ServerEvent>) -> Message {
        match next_event(rx).await {
            ServerEvent::ReceiveMessage(message) => message,
            other => panic!("expected receive-message, got {other:?}"),
        }
    }

    /// Round-trip through the actor so every earlier command has been applied.
    async fn settle(registry: &RoomRegistry, room: &RoomId) {
        let _ = registry.member_count(room).await;
    }

    #[tokio::test]
    async fn test_join_empty_room_then_post_and_late_join() {
        let registry = RoomRegistry::default();
        let room = RoomId::from("room-42");

        let (mut first, mut first_rx) = client(&registry);
        first.join(room.clone()).await.unwrap();
        assert!(expect_history(&mut first_rx).await.is_empty());

        first
            .post(room.clone(), MessageDraft::new("hello", "doctor"))
            .await
            .unwrap();
        let echoed = expect_message(&mut first_rx).await;
        assert_eq!(echoed.content, "hello");
        assert_eq!(echoed.sender, "doctor");

        let (mut second, mut second_rx) = client(&registry);
        second.join(room.clone()).await.unwrap();
        let history = expect_history(&mut second_rx).await;
        assert_eq!(history, vec![echoed]);

        settle(&registry, &room).await;
        assert!(first_rx.try_recv().is_err(), "sender got a duplicate echo");
        assert!(second_rx.try_recv().is_err(), "joiner got a replayed message twice");
    }

    #[tokio::test]
    async fn test_history_preserves_arrival_order() {
        let registry = RoomRegistry::default();
        let room = RoomId::from("ordered");
        let (poster, _rx) = client(&registry);

        for i in 0..20 {
            poster
                .post(room.clone(), MessageDraft::new(format!("m{i}"), "patient"))
                .await
                .unwrap();
        }

        let history = registry.history(&room).await.unwrap();
        let contents: Vec<_> = history.iter().map(|m| m.content.as_str()).collect();
        let expected: Vec<_> = (0..20).map(|i| format!("m{i}")).collect();
        assert_eq!(contents, expected);
    }

    #[tokio::test]
    async fn test_late_joiner_gets_exact_prefix_without_duplicates() {
        let registry = RoomRegistry::default();
        let room = RoomId::from("replay");
        let (poster, _rx) = client(&registry);

        for i in 0..3 {
            poster
                .post(room.clone(), MessageDraft::new(format!("before-{i}"), "doctor"))
                .await
                .unwrap();
        }

        let (mut joiner, mut joiner_rx) = client(&registry);
        joiner.join(room.clone()).await.unwrap();
        poster
            .post(room.clone(), MessageDraft::new("after", "doctor"))
            .await
            .unwrap();

        let history = expect_history(&mut joiner_rx).await;
        assert_eq!(history.len(), 3);
        assert_eq!(history[2].content, "before-2");
        assert_eq!(expect_message(&mut joiner_rx).await.content, "after");

        settle(&registry, &room).await;
        assert!(joiner_rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_no_cross_room_leakage() {
        let registry = RoomRegistry::default();
        let room_a = RoomId::from("a");
        let room_b = RoomId::from("b");

        let (mut in_a, mut a_rx) = client(&registry);
        let (mut in_b, mut b_rx) = client(&registry);
        in_a.join(room_a.clone()).await.unwrap();
        in_b.join(room_b.clone()).await.unwrap();
        expect_history(&mut a_rx).await;
        expect_history(&mut b_rx).await;

        in_a
            .post(room_a.clone(), MessageDraft::new("only for a", "doctor"))
            .await
            .unwrap();
        assert_eq!(expect_message(&mut a_rx).await.content, "only for a");

        settle(&registry, &room_a).await;
        settle(&registry, &room_b).await;
        assert!(b_rx.try_recv().is_err());
        assert!(registry.history(&room_b).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_disconnect_removes_from_all_rooms() {
        let registry = RoomRegistry::default();
        let rooms = [RoomId::from("x"), RoomId::from("y")];

        let (mut leaving, mut leaving_rx) = client(&registry);
        let (poster, _poster_rx) = client(&registry);
        for room in &rooms {
            leaving.join(room.clone()).await.unwrap();
            expect_history(&mut leaving_rx).await;
        }
        assert_eq!(leaving.joined_rooms().count(), 2);

        leaving.disconnect();
        for room in &rooms {
            settle(&registry, room).await;
            assert_eq!(registry.member_count(room).await, 0);
            poster
                .post(room.clone(), MessageDraft::new("after disconnect", "doctor"))
                .await
                .unwrap();
        }

        for room in &rooms {
            settle(&registry, room).await;
            assert_eq!(registry.history(room).await.unwrap().len(), 1);
        }
        // The outbound sender was released by every room, so the queue ends.
        assert!(leaving_rx.recv().await.is_none());
    }

    #[tokio::test]
    async fn test_double_join_does_not_duplicate_delivery() {
        let registry = RoomRegistry::default();
        let room = RoomId::from("twice");

        let (mut conn, mut rx) = client(&registry);
        conn.join(room.clone()).await.unwrap();
        conn.join(room.clone()).await.unwrap();
        expect_history(&mut rx).await;
        expect_history(&mut rx).await;
        assert_eq!(registry.member_count(&room).await, 1);

        conn.post(room.clone(), MessageDraft::new("once", "patient"))
            .await
            .unwrap();
        expect_message(&mut rx).await;
        settle(&registry, &room).await;
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_leave_single_room() {
        let registry = RoomRegistry::default();
        let stay = RoomId::from("stay");
        let go = RoomId::from("go");

        let (mut conn, mut rx) = client(&registry);
        conn.join(stay.clone()).await.unwrap();
        conn.join(go.clone()).await.unwrap();
        expect_history(&mut rx).await;
        expect_history(&mut rx).await;

        conn.leave(&go);
        settle(&registry, &go).await;
        assert_eq!(registry.member_count(&go).await, 0);
        assert_eq!(registry.member_count(&stay).await, 1);
        assert_eq!(conn.joined_rooms().collect::<Vec<_>>(), vec![&stay]);
    }

    #[tokio::test]
    async fn test_post_to_room_without_subscribers_is_absorbed() {
        let registry = RoomRegistry::default();
        let room = RoomId::from("nobody-here");
        let (poster, mut rx) = client(&registry);

        poster
            .post(room.clone(), MessageDraft::new("into the void", "doctor"))
            .await
            .unwrap();

        assert_eq!(registry.history(&room).await.unwrap().len(), 1);
        assert!(rx.try_recv().is_err());
        assert_eq!(registry.room_count().await, 1);
    }

    #[tokio::test]
    async fn test_history_of_unknown_room_is_empty_and_not_created() {
        let registry = RoomRegistry::default();
        assert!(registry
            .history(&RoomId::from("ghost"))
            .await
            .unwrap()
            .is_empty());
        assert_eq!(registry.room_count().await, 0);
    }

    #[tokio::test]
    async fn test_concurrent_posts_get_distinct_positions() {
        let registry = RoomRegistry::default();
        let room = RoomId::from("busy");

        let (mut watcher, mut watcher_rx) = client(&registry);
        watcher.join(room.clone()).await.unwrap();
        expect_history(&mut watcher_rx).await;

        let mut tasks = Vec::new();
        for sender in ["doctor", "patient"] {
            let registry = registry.clone();
            let room = room.clone();
            tasks.push(tokio::spawn(async move {
                let (conn, _rx) = client(&registry);
                for i in 0..50 {
                    conn.post(room.clone(), MessageDraft::new(format!("{sender}-{i}"), sender))
                        .await
                        .unwrap();
                }
            }));
        }
        for task in tasks {
            task.await.unwrap();
        }

        let history = registry.history(&room).await.unwrap();
        assert_eq!(history.len(), 100);

        let mut seen = Vec::new();
        for _ in 0..100 {
            seen.push(expect_message(&mut watcher_rx).await);
        }
        assert_eq!(seen, history);

        // Each sender's own posts keep their relative order.
        for sender in ["doctor", "patient"] {
            let own: Vec<_> = history
                .iter()
                .filter(|m| m.sender == sender)
                .map(|m| m.content.clone())
                .collect();
            let expected: Vec<_> = (0..50).map(|i| format!("{sender}-{i}")).collect();
            assert_eq!(own, expected);
        }
    }

    #[tokio::test]
    async fn test_stored_message_matches_wire_form() {
        let registry = RoomRegistry::default();
        let room = RoomId::from("wire");
        let (poster, _rx) = client(&registry);
        poster
            .post(room.clone(), MessageDraft::new("hello", "doctor"))
            .await
            .unwrap();

        let stored = registry.history(&room).await.unwrap();
        let json = ServerEvent::ChatHistory(stored.clone()).to_json().unwrap();
        assert_eq!(
            ServerEvent::from_json(&json).unwrap(),
            ServerEvent::ChatHistory(stored)
        );
    }

    #[tokio::test]
    async fn test_history_limit_evicts_oldest() {
        let registry = RoomRegistry::new(2);
        let room = RoomId::from("capped");
        let (poster, _rx) = client(&registry);

        for content in ["one", "two", "three"] {
            poster
                .post(room.clone(), MessageDraft::new(content, "doctor"))
                .await
                .unwrap();
        }

        let history = registry.history(&room).await.unwrap();
        let contents: Vec<_> = history.iter().map(|m| m.content.as_str()).collect();
        assert_eq!(contents, ["two", "three"]);
    }

    #[tokio::test]
    async fn test_shutdown_rejects_new_work() {
        let registry = RoomRegistry::default();
        let (mut conn, _rx) = client(&registry);
        conn.join(RoomId::from("r")).await.unwrap();

        registry.shutdown().await;
        assert_eq!(registry.room_count().await, 0);
        assert!(matches!(
            conn.join(RoomId::from("other")).await,
            Err(ServerError::ShuttingDown)
        ));
    }
}
