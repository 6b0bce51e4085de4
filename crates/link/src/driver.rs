//! The protocol-socket seam.
//!
//! A [`SocketDriver`] owns everything Chatwire deliberately does not: the
//! messaging network's wire protocol, cryptography, and multi-device sync.
//! Opening a socket yields an action handle plus a bounded stream of
//! lifecycle events; the connector consumes the stream and drives the
//! per-session state machine.

use std::sync::Arc;

use async_trait::async_trait;
use cw_domain::{AuthState, Result};
use parking_lot::RwLock;
use tokio::sync::mpsc;

/// Working copy of the auth state, shared between the socket (which mutates
/// it as the protocol negotiates) and the connector (which persists it).
pub type SharedAuthState = Arc<RwLock<AuthState>>;

/// Lifecycle events a socket emits, in connection order.
#[derive(Debug, Clone)]
pub enum SocketEvent {
    /// The network issued a pairing payload for out-of-band confirmation.
    /// Reissued periodically until pairing succeeds.
    PairingPayload(String),
    /// A new device login was detected mid-handshake.
    NewLogin,
    /// The socket entered (or re-entered) the connecting phase.
    Connecting,
    /// The connection is open. Tentative: the peer may not have confirmed
    /// full authentication yet.
    Open,
    /// The socket mutated the shared auth state; persist it.
    CredsChanged,
    /// The connection closed. Terminal iff the reason is a logout.
    Closed(CloseReason),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CloseReason {
    /// The session's identity was revoked; it must be re-paired.
    LoggedOut,
    ConnectionLost,
    Timeout,
    Other(String),
}

impl CloseReason {
    pub fn is_terminal(&self) -> bool {
        matches!(self, CloseReason::LoggedOut)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Presence {
    Available,
    Unavailable,
}

/// Imperative actions on a live socket.
#[async_trait]
pub trait SocketHandle: Send + Sync {
    /// Send a text message to a network address.
    async fn send_message(&self, to: &str, text: &str) -> Result<()>;

    async fn set_presence(&self, presence: Presence) -> Result<()>;

    /// Explicit logout: revokes the session identity on the network side.
    async fn logout(&self) -> Result<()>;

    /// Tear the socket down without revoking anything.
    async fn close(&self) -> Result<()>;

    /// The authenticated account identity, or `None` while the handshake has
    /// not fully completed.
    fn identity(&self) -> Option<String>;
}

/// Factory for protocol sockets.
#[async_trait]
pub trait SocketDriver: Send + Sync {
    /// Open one socket for `instance_id` with the given working auth state.
    /// Returns the action handle and the socket's event stream.
    async fn open(
        &self,
        instance_id: &str,
        auth: SharedAuthState,
    ) -> Result<(Arc<dyn SocketHandle>, mpsc::Receiver<SocketEvent>)>;
}
