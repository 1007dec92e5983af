use shared::{domain::RoomId, error::ApiFailure};
use thiserror::Error;

/// Errors surfaced by the chat client.
///
/// Best-effort signals (`join`, `leave`, `send`, `typing`) never produce one
/// of these: while the connection is down they are dropped with a logged
/// warning instead, so opportunistic UI calls cannot fail.
#[derive(Debug, Error)]
pub enum ChatError {
    #[error("invalid server url: {0}")]
    InvalidUrl(#[from] url::ParseError),

    #[error("unsupported server url scheme `{0}`")]
    UnsupportedScheme(String),

    #[error("request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// A REST envelope came back with `success: false`.
    #[error("server rejected request: {0}")]
    Api(#[from] ApiFailure),

    #[error("transport handshake failed: {0}")]
    Handshake(String),

    /// The bounded connection retry schedule ran out.
    #[error("connection attempts exhausted after {attempts} tries: {last_error}")]
    RetriesExhausted { attempts: u32, last_error: String },

    /// A connection attempt this caller was waiting on failed.
    #[error("connection attempt failed: {0}")]
    ConnectFailed(String),

    /// Read receipts only make sense for the room currently open.
    #[error("room {0} is not the active view")]
    RoomNotOpen(RoomId),
}
