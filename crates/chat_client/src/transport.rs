//! Live connection plumbing: dialing with bounded retries, connection state
//! tracking, and the best-effort outbound signal path.
//!
//! The I/O tasks themselves are spawned by [`crate::ChatClient`], which owns
//! the event routing; this module only knows how to reach the server and in
//! what state the connection currently is.

use std::sync::{
    atomic::{AtomicBool, Ordering},
    Mutex, MutexGuard, PoisonError,
};

use shared::protocol::ClientSignal;
use tokio::{
    net::TcpStream,
    sync::{mpsc, watch},
};
use tokio_tungstenite::{
    connect_async,
    tungstenite::{client::IntoClientRequest, http::header::AUTHORIZATION, http::HeaderValue},
    MaybeTlsStream, WebSocketStream,
};
use tracing::{info, warn};

use crate::{config::ChatConfig, error::ChatError};

pub(crate) type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Lifecycle of the single live connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Connection bookkeeping shared by the client and its I/O tasks.
pub(crate) struct Transport {
    state: watch::Sender<ConnectionState>,
    outbound: Mutex<Option<mpsc::UnboundedSender<ClientSignal>>>,
    locally_closed: AtomicBool,
    last_error: Mutex<Option<String>>,
}

impl Transport {
    pub(crate) fn new() -> Self {
        let (state, _) = watch::channel(ConnectionState::Disconnected);
        Self {
            state,
            outbound: Mutex::new(None),
            locally_closed: AtomicBool::new(false),
            last_error: Mutex::new(None),
        }
    }

    pub(crate) fn watch(&self) -> watch::Receiver<ConnectionState> {
        self.state.subscribe()
    }

    pub(crate) fn is_connected(&self) -> bool {
        *self.state.borrow() == ConnectionState::Connected
    }

    /// Claim the dialer role: `Disconnected -> Connecting`. Exactly one
    /// caller wins; everyone else follows the state watch instead of dialing
    /// a duplicate connection.
    pub(crate) fn claim_dialer(&self) -> bool {
        self.state.send_if_modified(|state| {
            if *state == ConnectionState::Disconnected {
                *state = ConnectionState::Connecting;
                true
            } else {
                false
            }
        })
    }

    pub(crate) fn mark_connected(&self, outbound: mpsc::UnboundedSender<ClientSignal>) {
        *lock(&self.outbound) = Some(outbound);
        self.locally_closed.store(false, Ordering::SeqCst);
        self.state.send_replace(ConnectionState::Connected);
    }

    pub(crate) fn mark_disconnected(&self) {
        lock(&self.outbound).take();
        self.state.send_replace(ConnectionState::Disconnected);
    }

    pub(crate) fn record_failure(&self, error: &ChatError) {
        *lock(&self.last_error) = Some(error.to_string());
        lock(&self.outbound).take();
        self.state.send_replace(ConnectionState::Disconnected);
    }

    pub(crate) fn last_error(&self) -> String {
        lock(&self.last_error)
            .clone()
            .unwrap_or_else(|| "connection attempt failed".to_string())
    }

    /// Tear down on the caller's initiative; suppresses auto-reconnect.
    /// Dropping the outbound sender ends the writer task, which closes the
    /// socket.
    pub(crate) fn close_locally(&self) {
        self.locally_closed.store(true, Ordering::SeqCst);
        lock(&self.outbound).take();
        self.state.send_replace(ConnectionState::Disconnected);
    }

    pub(crate) fn was_locally_closed(&self) -> bool {
        self.locally_closed.load(Ordering::SeqCst)
    }

    /// Best-effort send: while the connection is down the signal is dropped
    /// with a warning, never an error.
    pub(crate) fn send(&self, signal: ClientSignal) {
        let guard = lock(&self.outbound);
        match guard.as_ref() {
            Some(outbound) if self.is_connected() => {
                if outbound.send(signal).is_err() {
                    warn!("live connection closing; dropped outbound signal");
                }
            }
            _ => warn!(
                signal = signal_name(&signal),
                "not connected; dropped signal"
            ),
        }
    }
}

fn signal_name(signal: &ClientSignal) -> &'static str {
    match signal {
        ClientSignal::JoinRoom { .. } => "join_room",
        ClientSignal::LeaveRoom { .. } => "leave_room",
        ClientSignal::SendMessage { .. } => "send_message",
        ClientSignal::Typing { .. } => "typing",
        ClientSignal::MarkRead { .. } => "mark_read",
    }
}

/// One WebSocket handshake carrying the bearer credential.
pub(crate) async fn dial(config: &ChatConfig, credential: &str) -> Result<WsStream, ChatError> {
    let mut request = config
        .ws_url()
        .into_client_request()
        .map_err(|e| ChatError::Handshake(e.to_string()))?;
    let bearer = HeaderValue::from_str(&format!("Bearer {credential}"))
        .map_err(|e| ChatError::Handshake(format!("credential not header-safe: {e}")))?;
    request.headers_mut().insert(AUTHORIZATION, bearer);

    let (stream, _response) = connect_async(request)
        .await
        .map_err(|e| ChatError::Handshake(e.to_string()))?;
    Ok(stream)
}

/// Dial under the bounded retry schedule. Exhaustion is terminal for this
/// attempt; the caller decides whether anything retries later.
pub(crate) async fn dial_with_retries(
    config: &ChatConfig,
    credential: &str,
) -> Result<WsStream, ChatError> {
    let retry = config.retry;
    let mut last_error = String::new();
    for attempt in 1..=retry.max_attempts {
        match dial(config, credential).await {
            Ok(stream) => {
                info!(attempt, "live connection established");
                return Ok(stream);
            }
            Err(err) => {
                warn!(
                    attempt,
                    max_attempts = retry.max_attempts,
                    %err,
                    "connection attempt failed"
                );
                last_error = err.to_string();
            }
        }
        if attempt < retry.max_attempts {
            tokio::time::sleep(retry.delay_after(attempt)).await;
        }
    }
    Err(ChatError::RetriesExhausted {
        attempts: retry.max_attempts,
        last_error,
    })
}

#[cfg(test)]
mod tests {
    use shared::domain::RoomId;

    use super::*;

    #[test]
    fn only_one_caller_claims_the_dialer_role() {
        let transport = Transport::new();
        assert!(transport.claim_dialer());
        assert!(!transport.claim_dialer());

        transport.record_failure(&ChatError::Handshake("refused".to_string()));
        assert!(transport.claim_dialer());
    }

    #[test]
    fn send_while_disconnected_is_a_silent_drop() {
        let transport = Transport::new();
        transport.send(ClientSignal::JoinRoom {
            room_id: RoomId::from("r1"),
        });
        assert!(!transport.is_connected());
    }

    #[test]
    fn connected_state_round_trip() {
        let transport = Transport::new();
        let (outbound, mut rx) = mpsc::unbounded_channel();
        transport.mark_connected(outbound);
        assert!(transport.is_connected());

        transport.send(ClientSignal::MarkRead {
            room_id: RoomId::from("r1"),
        });
        let signal = rx.try_recv().expect("queued signal");
        assert_eq!(
            signal,
            ClientSignal::MarkRead {
                room_id: RoomId::from("r1"),
            }
        );

        transport.close_locally();
        assert!(!transport.is_connected());
        assert!(transport.was_locally_closed());
    }
}
