//! Per-session connection state machine.
//!
//! One `Connector` owns one logical session's sockets over time: it loads
//! persisted credentials, opens a socket, confirms readiness before
//! announcing it, persists credentials on every mutation signal, and
//! transparently reconnects after recoverable closes with an explicit retry
//! loop with a constant delay (the network rate-limits reconnects itself).
//!
//! Per attempt the machine is
//! `CONNECTING → {PAIRING ⇄ CONNECTING} → OPEN_UNCONFIRMED → READY`,
//! ending in either a recoverable close (new attempt) or a terminal close
//! (logged out, connector stops).

use std::sync::Arc;
use std::time::Duration;

use cw_domain::config::LinkConfig;
use cw_domain::AuthState;
use cw_store::AuthStore;
use parking_lot::RwLock;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::driver::{Presence, SharedAuthState, SocketDriver, SocketEvent, SocketHandle};

/// Events the connector raises to its owner (the session registry).
pub enum LinkEvent {
    /// A new attempt installed this socket. The previous socket, if any, is
    /// fully torn down by the time this fires.
    Socket(Arc<dyn SocketHandle>),
    /// First pairing payload of the current attempt.
    Pairing(String),
    /// The session is fully authenticated and usable.
    Ready(Arc<dyn SocketHandle>),
    /// Recoverable close; a reconnect attempt is scheduled.
    Offline,
    /// The network revoked the session identity. No further attempts.
    Terminated,
    /// Socket construction failed; the connector stopped.
    Failed(String),
}

enum AttemptEnd {
    Terminal,
    Recoverable,
    ConstructFailed(String),
}

pub struct Connector {
    instance_id: String,
    driver: Arc<dyn SocketDriver>,
    store: Arc<dyn AuthStore>,
    cfg: LinkConfig,
}

impl Connector {
    pub fn new(
        instance_id: impl Into<String>,
        driver: Arc<dyn SocketDriver>,
        store: Arc<dyn AuthStore>,
        cfg: LinkConfig,
    ) -> Self {
        Self {
            instance_id: instance_id.into(),
            driver,
            store,
            cfg,
        }
    }

    /// Run the connector on its own task. The task ends on terminal close,
    /// construction failure, or cancellation.
    pub fn spawn(
        self,
        events: mpsc::Sender<LinkEvent>,
        cancel: CancellationToken,
    ) -> tokio::task::JoinHandle<()> {
        tokio::spawn(self.run(events, cancel))
    }

    async fn run(self, events: mpsc::Sender<LinkEvent>, cancel: CancellationToken) {
        loop {
            let end = tokio::select! {
                end = self.run_attempt(&events) => end,
                _ = cancel.cancelled() => {
                    tracing::debug!(instance = %self.instance_id, "connector cancelled");
                    return;
                }
            };

            match end {
                AttemptEnd::Terminal => {
                    tracing::info!(instance = %self.instance_id, "session logged out, stopping");
                    let _ = events.send(LinkEvent::Terminated).await;
                    return;
                }
                AttemptEnd::ConstructFailed(message) => {
                    tracing::error!(
                        instance = %self.instance_id,
                        error = %message,
                        "socket construction failed"
                    );
                    let _ = events.send(LinkEvent::Failed(message)).await;
                    return;
                }
                AttemptEnd::Recoverable => {
                    if events.send(LinkEvent::Offline).await.is_err() {
                        // Owner is gone; nothing left to reconnect for.
                        return;
                    }
                    let delay = Duration::from_secs(self.cfg.reconnect_delay_sec);
                    tracing::info!(
                        instance = %self.instance_id,
                        delay_secs = delay.as_secs(),
                        "connection lost, reconnecting"
                    );
                    tokio::select! {
                        _ = tokio::time::sleep(delay) => {}
                        _ = cancel.cancelled() => return,
                    }
                }
            }
        }
    }

    /// One connection attempt: open a socket and pump its events until it
    /// closes or stalls.
    async fn run_attempt(&self, events: &mpsc::Sender<LinkEvent>) -> AttemptEnd {
        let auth: SharedAuthState = Arc::new(RwLock::new(self.load_auth().await));

        let (handle, mut socket_events) =
            match self.driver.open(&self.instance_id, auth.clone()).await {
                Ok(opened) => opened,
                Err(e) => return AttemptEnd::ConstructFailed(e.to_string()),
            };
        let _ = events.send(LinkEvent::Socket(handle.clone())).await;

        // Per-attempt latches: one pairing payload, one ready announcement.
        let mut pairing_sent = false;
        let mut ready_sent = false;
        let mut connecting_since: Option<Instant> = None;
        let stall_bound = Duration::from_secs(self.cfg.connect_stall_sec);

        loop {
            let event = match connecting_since {
                // Stall guard: while the handshake is in flight, bound how
                // long we wait for the next event.
                Some(since) => {
                    let remaining = stall_bound.saturating_sub(since.elapsed());
                    match tokio::time::timeout(remaining, socket_events.recv()).await {
                        Ok(event) => event,
                        Err(_) => {
                            tracing::warn!(
                                instance = %self.instance_id,
                                bound_secs = stall_bound.as_secs(),
                                "handshake stalled, forcing reconnect"
                            );
                            if let Err(e) = handle.close().await {
                                tracing::debug!(instance = %self.instance_id, error = %e, "close after stall failed");
                            }
                            return AttemptEnd::Recoverable;
                        }
                    }
                }
                None => socket_events.recv().await,
            };

            let Some(event) = event else {
                // Event stream ended without a close event: the socket died.
                return AttemptEnd::Recoverable;
            };

            match event {
                SocketEvent::PairingPayload(payload) => {
                    connecting_since.get_or_insert_with(Instant::now);
                    if pairing_sent {
                        tracing::debug!(instance = %self.instance_id, "dropping reissued pairing payload");
                        continue;
                    }
                    pairing_sent = true;
                    tracing::info!(instance = %self.instance_id, "pairing payload issued");
                    let _ = events.send(LinkEvent::Pairing(payload)).await;
                }
                SocketEvent::Connecting => {
                    connecting_since.get_or_insert_with(Instant::now);
                }
                SocketEvent::NewLogin => {
                    tracing::info!(instance = %self.instance_id, "new login detected");
                    self.persist(&auth).await;
                }
                SocketEvent::CredsChanged => {
                    self.persist(&auth).await;
                }
                SocketEvent::Open => {
                    connecting_since = None;
                    if ready_sent {
                        // The socket re-reported open; readiness is a latch.
                        continue;
                    }
                    if self.confirm_ready(handle.as_ref()).await {
                        ready_sent = true;
                        self.persist(&auth).await;
                        if let Err(e) = handle.set_presence(Presence::Available).await {
                            tracing::warn!(instance = %self.instance_id, error = %e, "presence announcement failed");
                        }
                        tracing::info!(instance = %self.instance_id, "session ready");
                        let _ = events.send(LinkEvent::Ready(handle.clone())).await;
                    } else {
                        tracing::warn!(
                            instance = %self.instance_id,
                            "open reported but identity never materialized"
                        );
                    }
                }
                SocketEvent::Closed(reason) => {
                    tracing::info!(instance = %self.instance_id, reason = ?reason, "connection closed");
                    return if reason.is_terminal() {
                        AttemptEnd::Terminal
                    } else {
                        AttemptEnd::Recoverable
                    };
                }
            }
        }
    }

    /// "Open" is tentative: the socket may report it before the peer
    /// confirms authentication. Poll the session identity with a bounded
    /// grace delay before believing it.
    async fn confirm_ready(&self, handle: &dyn SocketHandle) -> bool {
        let grace = Duration::from_millis(self.cfg.ready_grace_ms);
        for _ in 0..2 {
            if handle.identity().is_some() {
                return true;
            }
            tokio::time::sleep(grace).await;
        }
        handle.identity().is_some()
    }

    async fn load_auth(&self) -> AuthState {
        match self.store.load(&self.instance_id).await {
            Some(state) => {
                tracing::info!(
                    instance = %self.instance_id,
                    backend = self.store.backend(),
                    "restored persisted credentials"
                );
                state
            }
            None => {
                tracing::info!(instance = %self.instance_id, "no persisted credentials, starting fresh");
                AuthState::fresh()
            }
        }
    }

    /// At-least-once, best-effort persistence: every mutation signal triggers
    /// a save attempt, and failures never abort a healthy connection.
    async fn persist(&self, auth: &SharedAuthState) {
        let snapshot = auth.read().clone();
        if let Err(e) = self.store.save(&self.instance_id, &snapshot).await {
            tracing::warn!(
                instance = %self.instance_id,
                backend = self.store.backend(),
                error = %e,
                "credential save failed"
            );
        }
    }
}
