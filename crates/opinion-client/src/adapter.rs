//! Chat client adapter.
//!
//! Bridges one conversation view to the relay: connects, joins the room,
//! keeps the local ordered message list, and forwards sends. The relay is
//! authoritative, so a sent message only shows up locally once its
//! broadcast echo comes back.
//!
//! The adapter owns its transport task. Dropping or closing it stops the
//! task and releases the connection; switching rooms always goes through
//! a full teardown.

use std::sync::{Arc, PoisonError, RwLock};

use futures::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message as WsFrame;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::{debug, info, warn};

use opinion_shared::error::ProtocolError;
use opinion_shared::{ClientEvent, Message, MessageDraft, RoomId, SendMessage, ServerEvent};

use crate::error::AdapterError;
use crate::events::AdapterEvent;
use crate::notifier::Notifier;
use crate::state::{AdapterConfig, AdapterState};

type Socket = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// State shared between the adapter handle and its transport task.
struct Shared {
    room_id: RoomId,
    state: RwLock<AdapterState>,
    messages: RwLock<Vec<Message>>,
    outbound: RwLock<Option<mpsc::UnboundedSender<ClientEvent>>>,
    notifier: Arc<dyn Notifier>,
    events: mpsc::UnboundedSender<AdapterEvent>,
}

impl Shared {
    fn state(&self) -> AdapterState {
        *self.state.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn set_state(&self, next: AdapterState) {
        let mut state = self.state.write().unwrap_or_else(PoisonError::into_inner);
        let prev = *state;
        if prev != next {
            debug!(room = %self.room_id, from = ?prev, to = ?next, "Adapter state changed");
            *state = next;
            let _ = self.events.send(AdapterEvent::StateChanged(next));
        }
    }

    fn set_outbound(&self, outbound: Option<mpsc::UnboundedSender<ClientEvent>>) {
        *self.outbound.write().unwrap_or_else(PoisonError::into_inner) = outbound;
    }

    fn apply(&self, event: ServerEvent) {
        match event {
            ServerEvent::ChatHistory(history) => {
                debug!(room = %self.room_id, messages = history.len(), "History replayed");
                *self.messages.write().unwrap_or_else(PoisonError::into_inner) = history.clone();
                self.set_state(AdapterState::Active);
                let _ = self.events.send(AdapterEvent::HistoryReplaced(history));
            }
            ServerEvent::ReceiveMessage(message) => {
                self.messages
                    .write()
                    .unwrap_or_else(PoisonError::into_inner)
                    .push(message.clone());
                self.notifier.message_arrived(&message);
                let _ = self.events.send(AdapterEvent::MessageReceived(message));
            }
        }
    }
}

/// Live binding of one view to one room.
pub struct ChatAdapter {
    shared: Arc<Shared>,
    config: AdapterConfig,
    shutdown: watch::Sender<bool>,
    task: Option<JoinHandle<()>>,
}

impl ChatAdapter {
    /// Start connecting to `room_id`. Must be called inside a tokio runtime.
    ///
    /// Returns the adapter and the stream of UI notifications.
    pub fn connect(
        config: AdapterConfig,
        room_id: RoomId,
        notifier: Arc<dyn Notifier>,
    ) -> (Self, mpsc::UnboundedReceiver<AdapterEvent>) {
        let (events, events_rx) = mpsc::unbounded_channel();
        let shared = Arc::new(Shared {
            room_id,
            state: RwLock::new(AdapterState::Disconnected),
            messages: RwLock::new(Vec::new()),
            outbound: RwLock::new(None),
            notifier,
            events,
        });
        let (shutdown, shutdown_rx) = watch::channel(false);

        shared.set_state(AdapterState::Connecting);
        let task = tokio::spawn(run(shared.clone(), config.clone(), shutdown_rx));

        (
            Self {
                shared,
                config,
                shutdown,
                task: Some(task),
            },
            events_rx,
        )
    }

    pub fn room_id(&self) -> &RoomId {
        &self.shared.room_id
    }

    pub fn state(&self) -> AdapterState {
        self.shared.state()
    }

    /// Snapshot of the local ordered message list.
    pub fn messages(&self) -> Vec<Message> {
        self.shared
            .messages
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Forward `text` to the relay as `sender`.
    ///
    /// Returns whether the message was handed to the transport. Blank text
    /// and sends while not connected are dropped with a log line.
    pub fn send(&self, text: &str, sender: &str) -> bool {
        if text.trim().is_empty() {
            debug!(room = %self.shared.room_id, "Ignoring blank message");
            return false;
        }

        let event = ClientEvent::SendMessage(SendMessage {
            room_id: self.shared.room_id.clone(),
            message: MessageDraft::new(text, sender),
        });

        let outbound = self
            .shared
            .outbound
            .read()
            .unwrap_or_else(PoisonError::into_inner);
        match outbound.as_ref() {
            Some(tx) if tx.send(event).is_ok() => true,
            _ => {
                warn!(
                    room = %self.shared.room_id,
                    state = ?self.shared.state(),
                    "Socket not connected. Cannot send message."
                );
                false
            }
        }
    }

    /// Tear down the connection and wait for the transport task to finish.
    pub async fn close(mut self) {
        self.stop();
        if let Some(task) = self.task.take() {
            let _ = task.await;
        }
    }

    /// Close this adapter, then open a fresh one for `room_id` with the same
    /// settings and notifier. Nothing from the old room reaches the new one.
    pub async fn switch_room(
        self,
        room_id: RoomId,
    ) -> (Self, mpsc::UnboundedReceiver<AdapterEvent>) {
        let config = self.config.clone();
        let notifier = self.shared.notifier.clone();
        info!(from = %self.shared.room_id, to = %room_id, "Switching room");
        self.close().await;
        Self::connect(config, room_id, notifier)
    }

    fn stop(&mut self) {
        let _ = self.shutdown.send(true);
        self.shared.set_outbound(None);
        self.shared.set_state(AdapterState::Disconnected);
    }
}

impl Drop for ChatAdapter {
    fn drop(&mut self) {
        if let Some(task) = self.task.take() {
            self.stop();
            task.abort();
            debug!(room = %self.shared.room_id, "Disconnecting socket");
        }
    }
}

/// Connect, serve, and reconnect with backoff until shut down.
async fn run(shared: Arc<Shared>, config: AdapterConfig, mut shutdown: watch::Receiver<bool>) {
    let mut backoff = config.initial_backoff;

    loop {
        shared.set_state(AdapterState::Connecting);

        let attempt = tokio::select! {
            result = connect_async(config.server_url.as_str()) => result,
            _ = shutdown.changed() => break,
        };

        match attempt {
            Ok((socket, _)) => {
                info!(room = %shared.room_id, url = %config.server_url, "Connected to relay");
                backoff = config.initial_backoff;
                match session(&shared, socket, &mut shutdown).await {
                    Ok(()) => debug!(room = %shared.room_id, "Relay connection closed"),
                    Err(e) => warn!(room = %shared.room_id, error = %e, "Relay connection lost"),
                }
            }
            Err(e) => {
                warn!(url = %config.server_url, error = %e, "Failed to connect to relay");
            }
        }

        shared.set_outbound(None);
        if *shutdown.borrow() {
            break;
        }
        shared.set_state(AdapterState::Connecting);

        tokio::select! {
            _ = tokio::time::sleep(backoff) => {}
            _ = shutdown.changed() => break,
        }
        backoff = (backoff * 2).min(config.max_backoff);
    }

    shared.set_outbound(None);
    shared.set_state(AdapterState::Disconnected);
}

/// One transport lifetime: join, then pump frames both ways.
async fn session(
    shared: &Shared,
    socket: Socket,
    shutdown: &mut watch::Receiver<bool>,
) -> Result<(), AdapterError> {
    let (mut ws_tx, mut ws_rx) = socket.split();

    shared.set_state(AdapterState::Joining);
    let join = ClientEvent::JoinRoom(shared.room_id.clone()).to_json()?;
    ws_tx.send(WsFrame::Text(join)).await?;

    // Sends are accepted only after join-room is on the wire.
    let (outbound_tx, mut outbound_rx) = mpsc::unbounded_channel::<ClientEvent>();
    shared.set_outbound(Some(outbound_tx));

    loop {
        tokio::select! {
            Some(event) = outbound_rx.recv() => {
                ws_tx.send(WsFrame::Text(event.to_json()?)).await?;
            }
            frame = ws_rx.next() => match frame {
                Some(Ok(WsFrame::Text(text))) => match ServerEvent::from_json(&text) {
                    Ok(event) => shared.apply(event),
                    Err(e) => warn!(room = %shared.room_id, error = %e, "Ignoring malformed event"),
                },
                Some(Ok(WsFrame::Binary(_))) => {
                    let e = ProtocolError::UnsupportedFrame("binary");
                    warn!(room = %shared.room_id, error = %e, "Ignoring frame");
                }
                Some(Ok(WsFrame::Close(_))) | None => return Ok(()),
                Some(Ok(_)) => {}
                Some(Err(e)) => return Err(e.into()),
            },
            _ = shutdown.changed() => {
                debug!(room = %shared.room_id, "Disconnecting socket");
                let _ = ws_tx.send(WsFrame::Close(None)).await;
                return Ok(());
            }
        }
    }
}
