//! In-process loopback driver.
//!
//! Simulates the protocol network without any wire traffic: fresh
//! credentials get a pairing payload and auto-pair after a short delay,
//! restored credentials connect straight away. Used by the `simulated`
//! driver config for local development and by integration tests.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use cw_domain::{Error, Result};
use parking_lot::RwLock;
use tokio::sync::mpsc;

use crate::driver::{
    CloseReason, Presence, SharedAuthState, SocketDriver, SocketEvent, SocketHandle,
};

pub struct SimDriver {
    /// How long a fresh identity waits before the simulated peer "scans" the
    /// pairing payload.
    auto_pair_delay: Duration,
}

impl Default for SimDriver {
    fn default() -> Self {
        Self {
            auto_pair_delay: Duration::from_secs(2),
        }
    }
}

impl SimDriver {
    pub fn new(auto_pair_delay: Duration) -> Self {
        Self { auto_pair_delay }
    }
}

#[async_trait]
impl SocketDriver for SimDriver {
    async fn open(
        &self,
        instance_id: &str,
        auth: SharedAuthState,
    ) -> Result<(Arc<dyn SocketHandle>, mpsc::Receiver<SocketEvent>)> {
        let (tx, rx) = mpsc::channel(16);
        let identity = Arc::new(RwLock::new(None));

        let handle = Arc::new(SimHandle {
            instance_id: instance_id.to_owned(),
            identity: identity.clone(),
            events: tx.clone(),
        });

        let instance = instance_id.to_owned();
        let auto_pair_delay = self.auto_pair_delay;
        tokio::spawn(async move {
            let _ = tx.send(SocketEvent::Connecting).await;

            let paired = auth.read().is_paired();
            if !paired {
                let payload = format!("cw-pair:{instance}:{}", uuid::Uuid::new_v4());
                if tx.send(SocketEvent::PairingPayload(payload)).await.is_err() {
                    return;
                }
                tokio::time::sleep(auto_pair_delay).await;

                // The simulated peer accepted the pairing: mint credentials.
                auth.write().creds = serde_json::json!({
                    "account": format!("sim:{instance}"),
                    "device": uuid::Uuid::new_v4().to_string(),
                });
                let _ = tx.send(SocketEvent::NewLogin).await;
                let _ = tx.send(SocketEvent::CredsChanged).await;
            }

            let account = auth
                .read()
                .creds
                .get("account")
                .and_then(|v| v.as_str())
                .unwrap_or("sim:unknown")
                .to_owned();
            *identity.write() = Some(account);
            let _ = tx.send(SocketEvent::Open).await;
        });

        Ok((handle, rx))
    }
}

struct SimHandle {
    instance_id: String,
    identity: Arc<RwLock<Option<String>>>,
    events: mpsc::Sender<SocketEvent>,
}

#[async_trait]
impl SocketHandle for SimHandle {
    async fn send_message(&self, to: &str, text: &str) -> Result<()> {
        if self.identity.read().is_none() {
            return Err(Error::Socket("socket not authenticated".into()));
        }
        tracing::info!(
            instance = %self.instance_id,
            to = %to,
            chars = text.chars().count(),
            "simulated message delivered"
        );
        Ok(())
    }

    async fn set_presence(&self, presence: Presence) -> Result<()> {
        tracing::debug!(instance = %self.instance_id, presence = ?presence, "simulated presence update");
        Ok(())
    }

    async fn logout(&self) -> Result<()> {
        *self.identity.write() = None;
        let _ = self.events.send(SocketEvent::Closed(CloseReason::LoggedOut)).await;
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        let _ = self
            .events
            .send(SocketEvent::Closed(CloseReason::Other("closed by client".into())))
            .await;
        Ok(())
    }

    fn identity(&self) -> Option<String> {
        self.identity.read().clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cw_domain::AuthState;

    #[tokio::test(start_paused = true)]
    async fn fresh_identity_pairs_then_opens() {
        let driver = SimDriver::default();
        let auth = Arc::new(RwLock::new(AuthState::fresh()));
        let (handle, mut rx) = driver.open("acct_1", auth.clone()).await.unwrap();

        assert!(matches!(rx.recv().await, Some(SocketEvent::Connecting)));
        assert!(matches!(rx.recv().await, Some(SocketEvent::PairingPayload(_))));
        assert!(matches!(rx.recv().await, Some(SocketEvent::NewLogin)));
        assert!(matches!(rx.recv().await, Some(SocketEvent::CredsChanged)));
        assert!(matches!(rx.recv().await, Some(SocketEvent::Open)));

        assert!(auth.read().is_paired());
        assert_eq!(handle.identity().as_deref(), Some("sim:acct_1"));
    }

    #[tokio::test(start_paused = true)]
    async fn restored_identity_skips_pairing() {
        let driver = SimDriver::default();
        let mut state = AuthState::fresh();
        state.creds = serde_json::json!({"account": "sim:acct_1"});
        let auth = Arc::new(RwLock::new(state));

        let (_handle, mut rx) = driver.open("acct_1", auth).await.unwrap();
        assert!(matches!(rx.recv().await, Some(SocketEvent::Connecting)));
        assert!(matches!(rx.recv().await, Some(SocketEvent::Open)));
    }

    #[tokio::test]
    async fn logout_emits_terminal_close() {
        let driver = SimDriver::new(Duration::from_millis(1));
        let mut state = AuthState::fresh();
        state.creds = serde_json::json!({"account": "sim:acct_1"});
        let auth = Arc::new(RwLock::new(state));

        let (handle, mut rx) = driver.open("acct_1", auth).await.unwrap();
        // Drain connecting + open.
        let _ = rx.recv().await;
        let _ = rx.recv().await;

        handle.logout().await.unwrap();
        assert!(matches!(
            rx.recv().await,
            Some(SocketEvent::Closed(CloseReason::LoggedOut))
        ));
        assert!(handle.identity().is_none());
    }
}
