//! Client core for the chat feature: one persistent connection to the
//! messaging server per authenticated session, room join/leave signalling,
//! live message and typing streams, and reconciliation of REST-fetched
//! history with live events into a single ordered, deduplicated list per
//! room.
//!
//! The embedding UI owns presentation and room selection; it is also
//! expected to re-issue `join_room` after a reconnect, which it observes
//! through [`ChatClient::connection_state`]. History stays readable while
//! the live connection is down - the experience degrades to history-only
//! rather than blocking.

use std::{
    sync::{Arc, Mutex, MutexGuard, PoisonError},
    time::Instant,
};

use futures::{SinkExt, StreamExt};
use serde::Serialize;
use shared::{
    domain::{AdminId, MessageId, RoomId, UserId},
    protocol::{
        AckResponse, AdminRoomRequest, AdminRoomResponse, ChatMessage, ClientSignal,
        MessagesResponse, RoomsResponse, RoomSummary, ServerSignal,
    },
};
use tokio::sync::{mpsc, watch};
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, info, warn};

pub mod config;
pub mod error;
mod history;
mod room;
mod subscription;
mod transport;
mod typing;

pub use config::{ChatConfig, RetryPolicy};
pub use error::ChatError;
pub use room::RoomPhase;
pub use subscription::Subscription;
pub use transport::ConnectionState;

use room::{ActiveRoom, RoomLedger};
use subscription::Topic;
use transport::{Transport, WsStream};

/// Typing change from another participant.
#[derive(Debug, Clone)]
pub struct TypingEvent {
    pub room_id: RoomId,
    pub user_id: UserId,
    pub is_typing: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PresenceChange {
    Joined,
    Left,
}

/// Another participant entered or left a room.
#[derive(Debug, Clone)]
pub struct PresenceEvent {
    pub room_id: RoomId,
    pub user_id: UserId,
    pub change: PresenceChange,
}

/// Badge update for a room that is not the active view.
#[derive(Debug, Clone)]
pub struct Notification {
    pub room_id: RoomId,
    pub message: ChatMessage,
}

struct Topics {
    messages: Topic<ChatMessage>,
    history: Topic<Vec<ChatMessage>>,
    typing: Topic<TypingEvent>,
    presence: Topic<PresenceEvent>,
    notifications: Topic<Notification>,
    errors: Topic<String>,
}

impl Topics {
    fn new() -> Self {
        Self {
            messages: Topic::new(),
            history: Topic::new(),
            typing: Topic::new(),
            presence: Topic::new(),
            notifications: Topic::new(),
            errors: Topic::new(),
        }
    }
}

#[derive(Serialize)]
struct HistoryQuery {
    limit: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    before: Option<String>,
}

/// The chat client. One instance per authenticated session; construct with
/// [`ChatClient::new`] and share the `Arc` across every room switch and UI
/// remount rather than re-creating it.
pub struct ChatClient {
    http: reqwest::Client,
    config: ChatConfig,
    credential: String,
    transport: Transport,
    rooms: Mutex<RoomLedger>,
    topics: Topics,
}

impl ChatClient {
    pub fn new(config: ChatConfig, credential: impl Into<String>) -> Arc<Self> {
        Arc::new(Self {
            http: reqwest::Client::new(),
            config,
            credential: credential.into(),
            transport: Transport::new(),
            rooms: Mutex::new(RoomLedger::default()),
            topics: Topics::new(),
        })
    }

    fn rooms(&self) -> MutexGuard<'_, RoomLedger> {
        self.rooms.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Bring up the live connection.
    ///
    /// Idempotent: resolves immediately when already connected, and a caller
    /// arriving while another attempt is in flight awaits that attempt
    /// instead of dialing a duplicate. Dialing itself runs the bounded retry
    /// schedule from [`ChatConfig::retry`]; exhaustion leaves the connection
    /// disconnected until someone calls `connect` again.
    pub async fn connect(self: &Arc<Self>) -> Result<(), ChatError> {
        let mut state = self.transport.watch();
        loop {
            let current = *state.borrow_and_update();
            match current {
                ConnectionState::Connected => return Ok(()),
                ConnectionState::Connecting => {
                    if state.changed().await.is_err() {
                        return Err(ChatError::ConnectFailed("client dropped".to_string()));
                    }
                    match *state.borrow_and_update() {
                        ConnectionState::Connected => return Ok(()),
                        ConnectionState::Disconnected => {
                            return Err(ChatError::ConnectFailed(self.transport.last_error()));
                        }
                        ConnectionState::Connecting => {}
                    }
                }
                ConnectionState::Disconnected => {
                    if self.transport.claim_dialer() {
                        return self.dial_and_install().await;
                    }
                    // lost the race; next iteration observes the winner
                }
            }
        }
    }

    /// Tear down the live connection. Local closes do not auto-reconnect.
    pub fn disconnect(&self) {
        info!("closing live connection locally");
        self.transport.close_locally();
        self.rooms().demote_live();
    }

    pub fn is_connected(&self) -> bool {
        self.transport.is_connected()
    }

    /// Watch connection state changes; the UI uses this to re-issue joins
    /// after an automatic reconnect.
    pub fn connection_state(&self) -> watch::Receiver<ConnectionState> {
        self.transport.watch()
    }

    async fn dial_and_install(self: &Arc<Self>) -> Result<(), ChatError> {
        match transport::dial_with_retries(&self.config, &self.credential).await {
            Ok(stream) => {
                self.install_stream(stream);
                Ok(())
            }
            Err(err) => {
                self.transport.record_failure(&err);
                Err(err)
            }
        }
    }

    fn install_stream(self: &Arc<Self>, stream: WsStream) {
        let (mut sink, mut source) = stream.split();
        let (outbound, mut outbound_rx) = mpsc::unbounded_channel::<ClientSignal>();

        // state flips before the reader runs, so a remote close observed
        // immediately still lands on a Connected state
        self.transport.mark_connected(outbound);

        tokio::spawn(async move {
            while let Some(signal) = outbound_rx.recv().await {
                let text = match serde_json::to_string(&signal) {
                    Ok(text) => text,
                    Err(err) => {
                        warn!(%err, "failed to encode outbound signal");
                        continue;
                    }
                };
                if let Err(err) = sink.send(Message::Text(text)).await {
                    warn!(%err, "live connection write failed");
                    break;
                }
            }
            let _ = sink.close().await;
        });

        let client = Arc::clone(self);
        tokio::spawn(async move {
            while let Some(frame) = source.next().await {
                match frame {
                    Ok(Message::Text(text)) => match serde_json::from_str::<ServerSignal>(&text) {
                        Ok(signal) => client.handle_signal(signal),
                        Err(err) => {
                            warn!(%err, "unparseable server event");
                            client
                                .topics
                                .errors
                                .publish(None, format!("invalid server event: {err}"));
                        }
                    },
                    Ok(Message::Close(_)) => break,
                    Ok(_) => {}
                    Err(err) => {
                        warn!(%err, "live connection read failed");
                        break;
                    }
                }
            }
            client.on_connection_lost();
        });
    }

    fn on_connection_lost(self: &Arc<Self>) {
        let locally_closed = self.transport.was_locally_closed();
        self.transport.mark_disconnected();
        self.rooms().demote_live();
        if locally_closed {
            info!("live connection closed");
            return;
        }

        info!("live connection lost; reconnecting");
        let client = Arc::clone(self);
        tokio::spawn(async move {
            if !client.transport.claim_dialer() {
                return; // a connect() call beat us to it
            }
            if let Err(err) = client.dial_and_install().await {
                warn!(%err, "automatic reconnection failed");
                client
                    .topics
                    .errors
                    .publish(None, format!("live connection lost: {err}"));
            }
        });
    }

    /// Enumerate the caller's conversation rooms. Unread badges shown in the
    /// room list come from this response; the local counters are primed from
    /// it rather than decremented speculatively.
    pub async fn list_rooms(&self) -> Result<Vec<RoomSummary>, ChatError> {
        let response: RoomsResponse = self
            .http
            .get(format!("{}/chat/rooms", self.config.base()))
            .bearer_auth(&self.credential)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;
        let rooms = response.into_rooms()?;
        {
            let mut ledger = self.rooms();
            for room in &rooms {
                ledger.set_unread(room.id.clone(), room.unread_count);
            }
        }
        Ok(rooms)
    }

    /// Fetch or create the staff-to-staff room with another admin.
    pub async fn admin_room(&self, other_admin_id: &AdminId) -> Result<RoomId, ChatError> {
        let response: AdminRoomResponse = self
            .http
            .post(format!("{}/chat/admin/room", self.config.base()))
            .bearer_auth(&self.credential)
            .json(&AdminRoomRequest {
                other_admin_id: other_admin_id.clone(),
            })
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;
        Ok(response.into_room_id()?)
    }

    async fn fetch_history(
        &self,
        room: &RoomId,
        limit: u32,
        before: Option<&MessageId>,
    ) -> Result<Vec<ChatMessage>, ChatError> {
        let response: MessagesResponse = self
            .http
            .get(format!(
                "{}/chat/rooms/{}/messages",
                self.config.base(),
                room
            ))
            .query(&HistoryQuery {
                limit,
                before: before.map(|id| id.as_str().to_string()),
            })
            .bearer_auth(&self.credential)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;
        Ok(response.into_messages()?)
    }

    /// Make `room` the active view.
    ///
    /// Leaves the previously joined room first, fetches one page of history
    /// (readable even while disconnected), then joins for live updates when
    /// the transport is up. Returns the reconciled list. If the selection
    /// changed while the fetch was in flight the stale response is discarded
    /// and an empty list comes back; if the fetch itself fails the room
    /// stays selected with an empty list and no live subscription.
    pub async fn open_room(&self, room: &RoomId) -> Result<Vec<ChatMessage>, ChatError> {
        {
            let mut ledger = self.rooms();
            if let Some(previous) = ledger.active.take() {
                if previous.phase == RoomPhase::Joined {
                    self.transport.send(ClientSignal::LeaveRoom {
                        room_id: previous.id,
                    });
                }
            }
            ledger.active = Some(ActiveRoom::new(room.clone()));
        }

        let fetched = self
            .fetch_history(room, self.config.history_page_size, None)
            .await;

        let list = {
            let mut ledger = self.rooms();
            let Some(active) = ledger
                .active_mut(room)
                .filter(|active| active.phase == RoomPhase::Joining)
            else {
                debug!(room = %room, "selection changed during history fetch; discarding");
                return Ok(Vec::new());
            };
            match fetched {
                Ok(page) => {
                    active.messages = history::reconcile_page(page);
                    if self.transport.is_connected() {
                        self.transport.send(ClientSignal::JoinRoom {
                            room_id: room.clone(),
                        });
                        active.phase = RoomPhase::Joined;
                    } else {
                        active.phase = RoomPhase::HistoryOnly;
                    }
                    active.messages.clone()
                }
                Err(err) => {
                    active.messages.clear();
                    active.phase = RoomPhase::HistoryOnly;
                    return Err(err);
                }
            }
        };

        if let Err(err) = self.mark_read(room).await {
            warn!(room = %room, %err, "read receipt after opening room failed");
        }
        Ok(list)
    }

    /// Deselect the active room, leaving it on the transport when live.
    pub fn close_room(&self) {
        let mut ledger = self.rooms();
        if let Some(active) = ledger.active.take() {
            if active.phase == RoomPhase::Joined {
                self.transport.send(ClientSignal::LeaveRoom {
                    room_id: active.id,
                });
            }
        }
    }

    /// Page older messages into the active room's list and return it.
    /// `before` anchors the page; it defaults to the oldest loaded message.
    pub async fn load_older(
        &self,
        room: &RoomId,
        limit: u32,
        before: Option<MessageId>,
    ) -> Result<Vec<ChatMessage>, ChatError> {
        let anchor = match before {
            Some(id) => Some(id),
            None => {
                let ledger = self.rooms();
                ledger
                    .active
                    .as_ref()
                    .filter(|active| &active.id == room)
                    .and_then(|active| active.messages.first())
                    .map(|message| message.id.clone())
            }
        };

        let page = self.fetch_history(room, limit, anchor.as_ref()).await?;

        let mut ledger = self.rooms();
        match ledger.active_mut(room) {
            Some(active) => {
                history::prepend_page(&mut active.messages, page);
                Ok(active.messages.clone())
            }
            None => Ok(history::reconcile_page(page)),
        }
    }

    /// Fire-and-forget join. Dropped with a warning while disconnected and
    /// never queued for retry; the owning UI re-issues it after reconnection.
    pub fn join_room(&self, room: &RoomId) {
        self.transport.send(ClientSignal::JoinRoom {
            room_id: room.clone(),
        });
        if self.transport.is_connected() {
            if let Some(active) = self.rooms().active_mut(room) {
                if active.phase == RoomPhase::HistoryOnly {
                    active.phase = RoomPhase::Joined;
                }
            }
        }
    }

    /// Fire-and-forget leave.
    pub fn leave_room(&self, room: &RoomId) {
        self.transport.send(ClientSignal::LeaveRoom {
            room_id: room.clone(),
        });
        if let Some(active) = self.rooms().active_mut(room) {
            if active.phase == RoomPhase::Joined {
                active.phase = RoomPhase::HistoryOnly;
            }
        }
    }

    /// Fire-and-forget send. Delivery confirmation is the `new_message` echo
    /// arriving later; there is no acknowledgment tracking, retry queue, or
    /// send-side idempotency key. Sending also stops an outstanding local
    /// typing indicator for the room.
    pub fn send_message(&self, room: &RoomId, content: impl Into<String>, receiver: Option<UserId>) {
        self.transport.send(ClientSignal::SendMessage {
            room_id: room.clone(),
            content: content.into(),
            receiver_id: receiver,
        });
        if self.rooms().take_local_typing(room) {
            self.transport.send(ClientSignal::Typing {
                room_id: room.clone(),
                is_typing: false,
            });
        }
    }

    /// Forward a typing state change as given; suppressing redundant
    /// identical states is the caller's concern.
    pub fn set_typing(&self, room: &RoomId, is_typing: bool) {
        if self.transport.is_connected() {
            self.rooms().set_local_typing(room, is_typing);
        }
        self.transport.send(ClientSignal::Typing {
            room_id: room.clone(),
            is_typing,
        });
    }

    /// Mark the active room read: the REST round-trip and the live
    /// `mark_read` signal, together. The local unread counter resets once
    /// the REST call succeeds. Only the room currently open (with history
    /// loaded) can be marked.
    pub async fn mark_read(&self, room: &RoomId) -> Result<(), ChatError> {
        {
            let ledger = self.rooms();
            let open = ledger
                .active
                .as_ref()
                .is_some_and(|active| &active.id == room && active.phase != RoomPhase::Joining);
            if !open {
                return Err(ChatError::RoomNotOpen(room.clone()));
            }
        }

        let response: AckResponse = self
            .http
            .post(format!("{}/chat/rooms/{}/read", self.config.base(), room))
            .bearer_auth(&self.credential)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;
        response.into_result()?;

        self.transport.send(ClientSignal::MarkRead {
            room_id: room.clone(),
        });
        self.rooms().reset_unread(room);
        Ok(())
    }

    fn handle_signal(self: &Arc<Self>, signal: ServerSignal) {
        match signal {
            ServerSignal::NewMessage { room_id, message } => {
                let mut deliver = true;
                let mut acknowledge = false;
                {
                    let mut ledger = self.rooms();
                    if ledger.is_active(&room_id) {
                        if let Some(active) = ledger.active_mut(&room_id) {
                            if active.phase != RoomPhase::Joining {
                                deliver =
                                    history::insert_live(&mut active.messages, message.clone());
                                acknowledge = deliver;
                            }
                        }
                    } else {
                        ledger.bump_unread(&room_id);
                    }
                }
                if deliver {
                    self.topics.messages.publish(Some(&room_id), message);
                }
                if acknowledge {
                    let client = Arc::clone(self);
                    let room = room_id.clone();
                    tokio::spawn(async move {
                        if let Err(err) = client.mark_read(&room).await {
                            debug!(room = %room, %err, "read receipt for live message failed");
                        }
                    });
                }
            }
            ServerSignal::MessagesHistory { room_id, messages } => {
                let list = {
                    let mut ledger = self.rooms();
                    match ledger.active_mut(&room_id) {
                        Some(active) => {
                            history::replace_all(&mut active.messages, messages);
                            active.messages.clone()
                        }
                        None => history::reconcile_page(messages),
                    }
                };
                self.topics.history.publish(Some(&room_id), list);
            }
            ServerSignal::UserTyping {
                user_id,
                room_id,
                is_typing,
            } => {
                {
                    let mut ledger = self.rooms();
                    if let Some(active) = ledger.active_mut(&room_id) {
                        active
                            .typing
                            .apply(user_id.clone(), is_typing, Instant::now());
                    }
                }
                self.topics.typing.publish(
                    Some(&room_id),
                    TypingEvent {
                        room_id: room_id.clone(),
                        user_id,
                        is_typing,
                    },
                );
            }
            ServerSignal::UserJoined { user_id, room_id } => {
                self.topics.presence.publish(
                    Some(&room_id),
                    PresenceEvent {
                        room_id: room_id.clone(),
                        user_id,
                        change: PresenceChange::Joined,
                    },
                );
            }
            ServerSignal::UserLeft { user_id, room_id } => {
                self.topics.presence.publish(
                    Some(&room_id),
                    PresenceEvent {
                        room_id: room_id.clone(),
                        user_id,
                        change: PresenceChange::Left,
                    },
                );
            }
            ServerSignal::MessageNotification { room_id, message } => {
                self.rooms().bump_unread(&room_id);
                self.topics
                    .notifications
                    .publish(None, Notification { room_id, message });
            }
            ServerSignal::Error { message } => {
                warn!(message = %message, "server pushed an error event");
                self.topics.errors.publish(None, message);
            }
        }
    }

    /// Reconciled message list for `room`, if it is the active view.
    pub fn messages(&self, room: &RoomId) -> Vec<ChatMessage> {
        let ledger = self.rooms();
        ledger
            .active
            .as_ref()
            .filter(|active| &active.id == room)
            .map(|active| active.messages.clone())
            .unwrap_or_default()
    }

    /// Users currently typing in `room` (derived; entries expire after the
    /// configured silence window).
    pub fn typing_users(&self, room: &RoomId) -> Vec<UserId> {
        let ledger = self.rooms();
        ledger
            .active
            .as_ref()
            .filter(|active| &active.id == room)
            .map(|active| {
                active
                    .typing
                    .active_users(Instant::now(), self.config.typing_expiry)
            })
            .unwrap_or_default()
    }

    pub fn unread_count(&self, room: &RoomId) -> u32 {
        self.rooms().unread(room)
    }

    pub fn active_room(&self) -> Option<(RoomId, RoomPhase)> {
        self.rooms()
            .active
            .as_ref()
            .map(|active| (active.id.clone(), active.phase))
    }

    pub fn on_message(&self, room: &RoomId) -> (Subscription, mpsc::UnboundedReceiver<ChatMessage>) {
        self.topics.messages.subscribe(Some(room.clone()))
    }

    pub fn on_history(
        &self,
        room: &RoomId,
    ) -> (Subscription, mpsc::UnboundedReceiver<Vec<ChatMessage>>) {
        self.topics.history.subscribe(Some(room.clone()))
    }

    pub fn on_typing(&self, room: &RoomId) -> (Subscription, mpsc::UnboundedReceiver<TypingEvent>) {
        self.topics.typing.subscribe(Some(room.clone()))
    }

    pub fn on_presence(
        &self,
        room: &RoomId,
    ) -> (Subscription, mpsc::UnboundedReceiver<PresenceEvent>) {
        self.topics.presence.subscribe(Some(room.clone()))
    }

    /// Badge updates for rooms that are not the active view.
    pub fn on_notification(&self) -> (Subscription, mpsc::UnboundedReceiver<Notification>) {
        self.topics.notifications.subscribe(None)
    }

    /// Server-pushed and transport-level errors. Terminal reconnection
    /// failures land here too.
    pub fn on_error(&self) -> (Subscription, mpsc::UnboundedReceiver<String>) {
        self.topics.errors.subscribe(None)
    }
}

#[cfg(test)]
#[path = "tests/lib_tests.rs"]
mod tests;
