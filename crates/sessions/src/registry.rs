//! In-memory registry of sessions and their lifecycle.
//!
//! One record per instance id; at most one connector attempt in flight per
//! id at any instant. Callers blocked in `create_or_resume` are resolved by
//! whichever fires first out of pairing payload, readiness, and timeout,
//! exactly once per call. A timeout abandons only the caller's wait: the
//! background attempt keeps running and later events keep the record
//! accurate for status polls.

use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use cw_domain::config::LinkConfig;
use cw_domain::{Error, Result};
use cw_link::{Connector, LinkEvent, SocketDriver, SocketHandle};
use cw_store::AuthStore;
use parking_lot::RwLock;
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;

use crate::pairing;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Public shapes
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Outcome of a `create_or_resume` call.
#[derive(Debug)]
pub enum CreateOutcome {
    /// The session is fully authenticated and usable.
    Connected,
    /// The session needs out-of-band pairing; `qr` is a rendered artifact.
    Pairing { qr: String },
}

/// Pure in-memory view of one instance. Never touches the credential store
/// or the network.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InstanceStatus {
    pub exists: bool,
    pub connected: bool,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Internal record
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// First resolution produced by an attempt, fanned out to every waiter.
#[derive(Clone)]
enum Resolution {
    Connected,
    Pairing(String),
    Failed(String),
}

struct SessionRecord {
    handle: Option<Arc<dyn SocketHandle>>,
    connected: bool,
    /// Most recent undisplayed pairing payload; cleared once connected.
    pending_pairing: Option<String>,
    /// Persisted auth state existed when the attempt started; selects the
    /// shorter resume deadline for joining callers.
    resumed: bool,
    /// Callers awaiting the first resolution of the in-flight attempt.
    waiters: Vec<oneshot::Sender<Resolution>>,
    /// Stops the connector's reconnect loop when the record is deleted.
    cancel: CancellationToken,
}

impl SessionRecord {
    fn starting(cancel: CancellationToken) -> Self {
        Self {
            handle: None,
            connected: false,
            pending_pairing: None,
            resumed: false,
            waiters: Vec::new(),
            cancel,
        }
    }

    fn take_waiters(&mut self) -> Vec<oneshot::Sender<Resolution>> {
        std::mem::take(&mut self.waiters)
    }
}

/// Settle every waiter with the same resolution. Receivers that timed out
/// and went away are skipped silently.
fn settle(waiters: Vec<oneshot::Sender<Resolution>>, resolution: &Resolution) {
    for waiter in waiters {
        let _ = waiter.send(resolution.clone());
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Registry
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// The session lifecycle manager. Explicitly constructed and injectable;
/// tests run several independent registries in one process.
pub struct SessionRegistry {
    driver: Arc<dyn SocketDriver>,
    store: Arc<dyn AuthStore>,
    cfg: LinkConfig,
    records: Arc<RwLock<HashMap<String, SessionRecord>>>,
}

/// What a `create_or_resume` call decided to do while holding the lock.
enum Plan {
    Connected,
    Pairing(String),
    Wait {
        rx: oneshot::Receiver<Resolution>,
        resumed: bool,
    },
    /// No record yet: probe the store, then try to claim the start.
    Probe,
}

impl SessionRegistry {
    pub fn new(driver: Arc<dyn SocketDriver>, store: Arc<dyn AuthStore>, cfg: LinkConfig) -> Self {
        Self {
            driver,
            store,
            cfg,
            records: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Create a session for `id`, or resume/join whatever is already there.
    ///
    /// Idempotent fast paths: a connected record answers immediately, an
    /// outstanding pairing payload is re-rendered rather than re-requested.
    /// A creation already in flight is joined, never duplicated.
    pub async fn create_or_resume(&self, id: &str) -> Result<CreateOutcome> {
        if id.is_empty() {
            return Err(Error::InvalidInput("instance id must not be empty".into()));
        }

        loop {
            match self.plan(id) {
                Plan::Connected => return Ok(CreateOutcome::Connected),
                Plan::Pairing(payload) => {
                    return Ok(CreateOutcome::Pairing {
                        qr: pairing::render_data_url(&payload)?,
                    })
                }
                Plan::Wait { rx, resumed } => return self.await_resolution(rx, resumed).await,
                Plan::Probe => {
                    // Store I/O happens before the record exists, so every
                    // record a joiner can see already carries the right
                    // `resumed` flag for its deadline.
                    let resumed = self.store.exists(id).await;

                    let rx = {
                        let mut records = self.records.write();
                        match records.entry(id.to_owned()) {
                            Entry::Occupied(_) => None,
                            Entry::Vacant(slot) => {
                                let mut record =
                                    SessionRecord::starting(CancellationToken::new());
                                record.resumed = resumed;
                                let (tx, rx) = oneshot::channel();
                                record.waiters.push(tx);
                                slot.insert(record);
                                Some(rx)
                            }
                        }
                    };

                    let Some(rx) = rx else {
                        // Another caller claimed the start while we probed.
                        continue;
                    };

                    tracing::info!(instance = %id, resumed, "starting session attempt");
                    self.start_attempt(id);
                    return self.await_resolution(rx, resumed).await;
                }
            }
        }
    }

    /// One locked pass over the record: decide how this call participates.
    fn plan(&self, id: &str) -> Plan {
        let mut records = self.records.write();
        match records.get_mut(id) {
            Some(record) if record.connected => Plan::Connected,
            Some(record) if record.pending_pairing.is_some() => {
                Plan::Pairing(record.pending_pairing.clone().unwrap_or_default())
            }
            Some(record) => {
                let (tx, rx) = oneshot::channel();
                record.waiters.push(tx);
                Plan::Wait {
                    rx,
                    resumed: record.resumed,
                }
            }
            None => Plan::Probe,
        }
    }

    /// Pure read of the in-memory record.
    pub fn status(&self, id: &str) -> InstanceStatus {
        let records = self.records.read();
        match records.get(id) {
            Some(record) => InstanceStatus {
                exists: true,
                connected: record.connected,
            },
            None => InstanceStatus {
                exists: false,
                connected: false,
            },
        }
    }

    /// The live socket handle, only while the session is fully connected,
    /// never mid-handshake or while reconnecting.
    pub fn active_handle(&self, id: &str) -> Option<Arc<dyn SocketHandle>> {
        let records = self.records.read();
        let record = records.get(id)?;
        if !record.connected {
            return None;
        }
        record.handle.clone()
    }

    /// Remove a session. Logout is best-effort (errors logged); the record
    /// is removed regardless. Persisted credentials are left in place so the
    /// instance can be manually reattached later.
    pub async fn delete(&self, id: &str) {
        let record = self.records.write().remove(id);
        let Some(mut record) = record else {
            return;
        };

        record.cancel.cancel();
        settle(
            record.take_waiters(),
            &Resolution::Failed("instance deleted".into()),
        );

        if let Some(handle) = record.handle.take() {
            if let Err(e) = handle.logout().await {
                tracing::warn!(instance = %id, error = %e, "logout failed during delete");
            }
            if let Err(e) = handle.close().await {
                tracing::debug!(instance = %id, error = %e, "close failed during delete");
            }
        }

        tracing::info!(instance = %id, "instance removed");
    }

    /// Every tracked instance id, in stable (sorted) order for display.
    pub fn list(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.records.read().keys().cloned().collect();
        ids.sort();
        ids
    }

    /// Graceful drain: stop every connector and close every live socket.
    pub async fn shutdown(&self) {
        let records: Vec<(String, SessionRecord)> = self.records.write().drain().collect();
        for (id, mut record) in records {
            record.cancel.cancel();
            settle(
                record.take_waiters(),
                &Resolution::Failed("shutting down".into()),
            );
            if let Some(handle) = record.handle.take() {
                if let Err(e) = handle.close().await {
                    tracing::debug!(instance = %id, error = %e, "close failed during shutdown");
                }
            }
        }
        tracing::info!("session registry drained");
    }

    // ── internals ────────────────────────────────────────────────────

    /// Spawn the connector and its event consumer for `id`. The consumer is
    /// the only code that mutates the record after this point, which keeps
    /// per-session event ordering intact.
    fn start_attempt(&self, id: &str) {
        let cancel = match self.records.read().get(id) {
            Some(record) => record.cancel.clone(),
            None => return,
        };

        let (tx, mut rx) = mpsc::channel::<LinkEvent>(self.cfg.event_buffer);
        Connector::new(id, self.driver.clone(), self.store.clone(), self.cfg.clone())
            .spawn(tx, cancel);

        let records = self.records.clone();
        let id = id.to_owned();
        tokio::spawn(async move {
            while let Some(event) = rx.recv().await {
                match event {
                    LinkEvent::Socket(handle) => {
                        if let Some(record) = records.write().get_mut(&id) {
                            record.handle = Some(handle);
                        }
                    }
                    LinkEvent::Pairing(payload) => {
                        let waiters = {
                            let mut records = records.write();
                            let Some(record) = records.get_mut(&id) else {
                                continue;
                            };
                            record.pending_pairing = Some(payload.clone());
                            record.take_waiters()
                        };
                        settle(waiters, &Resolution::Pairing(payload));
                    }
                    LinkEvent::Ready(handle) => {
                        let waiters = {
                            let mut records = records.write();
                            let Some(record) = records.get_mut(&id) else {
                                continue;
                            };
                            record.connected = true;
                            record.pending_pairing = None;
                            record.handle = Some(handle);
                            record.take_waiters()
                        };
                        settle(waiters, &Resolution::Connected);
                    }
                    LinkEvent::Offline => {
                        if let Some(record) = records.write().get_mut(&id) {
                            record.connected = false;
                            record.handle = None;
                        }
                    }
                    LinkEvent::Terminated => {
                        let removed = records.write().remove(&id);
                        if let Some(mut record) = removed {
                            settle(
                                record.take_waiters(),
                                &Resolution::Failed("session logged out".into()),
                            );
                        }
                        tracing::info!(instance = %id, "record dropped after terminal disconnect");
                    }
                    LinkEvent::Failed(message) => {
                        let removed = records.write().remove(&id);
                        if let Some(mut record) = removed {
                            settle(record.take_waiters(), &Resolution::Failed(message.clone()));
                        }
                        tracing::warn!(instance = %id, error = %message, "attempt failed, record dropped");
                    }
                }
            }
        });
    }

    /// Race the attempt's first resolution against the caller's deadline.
    /// The deadline depends on the path: resumes should come up quickly,
    /// fresh pairings wait for a human-visible payload.
    async fn await_resolution(
        &self,
        rx: oneshot::Receiver<Resolution>,
        resumed: bool,
    ) -> Result<CreateOutcome> {
        let deadline = if resumed {
            Duration::from_secs(self.cfg.resume_timeout_sec)
        } else {
            Duration::from_secs(self.cfg.pair_timeout_sec)
        };

        match tokio::time::timeout(deadline, rx).await {
            Ok(Ok(Resolution::Connected)) => Ok(CreateOutcome::Connected),
            Ok(Ok(Resolution::Pairing(payload))) => Ok(CreateOutcome::Pairing {
                qr: pairing::render_data_url(&payload)?,
            }),
            Ok(Ok(Resolution::Failed(message))) => Err(Error::Socket(message)),
            Ok(Err(_)) => Err(Error::Socket("attempt ended without a resolution".into())),
            Err(_) => {
                let what = if resumed {
                    "connection"
                } else {
                    "pairing payload"
                };
                Err(Error::Timeout(format!(
                    "no {what} within {}s; the attempt continues in the background",
                    deadline.as_secs()
                )))
            }
        }
    }
}
