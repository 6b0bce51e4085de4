//! Credential store adapter: one load/save/exists contract over two
//! backends (local filesystem tree, remote document store).
//!
//! The lifecycle manager is indifferent to which backend is active.
//! `exists`/`load` never fail: backend unavailability is reported as "no
//! persisted state" so callers can fall back to a fresh pairing. `save` is
//! best-effort per attempt: failures are surfaced for logging but must
//! never take down an otherwise-healthy session.

pub mod fs;
pub mod remote;

use std::sync::Arc;

use async_trait::async_trait;
use cw_domain::{AuthState, Result};

pub use fs::FsAuthStore;
pub use remote::RemoteAuthStore;

/// Uniform contract over the credential persistence backends.
#[async_trait]
pub trait AuthStore: Send + Sync {
    /// Whether persisted state exists for this instance. Backend
    /// unavailability answers `false`.
    async fn exists(&self, instance_id: &str) -> bool;

    /// Load persisted state, or `None` when absent, corrupt, or the backend
    /// is unreachable.
    async fn load(&self, instance_id: &str) -> Option<AuthState>;

    /// Persist state for this instance. Last writer wins; no cross-instance
    /// transactional guarantee.
    async fn save(&self, instance_id: &str, state: &AuthState) -> Result<()>;

    /// Short backend name for log lines.
    fn backend(&self) -> &'static str;
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Layered store
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Primary backend with an optional fallback: reads consult the primary
/// first, writes go to the primary and fall back only when it fails.
pub struct LayeredAuthStore {
    primary: Arc<dyn AuthStore>,
    fallback: Option<Arc<dyn AuthStore>>,
}

impl LayeredAuthStore {
    pub fn new(primary: Arc<dyn AuthStore>, fallback: Option<Arc<dyn AuthStore>>) -> Self {
        Self { primary, fallback }
    }
}

#[async_trait]
impl AuthStore for LayeredAuthStore {
    async fn exists(&self, instance_id: &str) -> bool {
        if self.primary.exists(instance_id).await {
            return true;
        }
        match &self.fallback {
            Some(fallback) => fallback.exists(instance_id).await,
            None => false,
        }
    }

    async fn load(&self, instance_id: &str) -> Option<AuthState> {
        if let Some(state) = self.primary.load(instance_id).await {
            return Some(state);
        }
        match &self.fallback {
            Some(fallback) => fallback.load(instance_id).await,
            None => None,
        }
    }

    async fn save(&self, instance_id: &str, state: &AuthState) -> Result<()> {
        match self.primary.save(instance_id, state).await {
            Ok(()) => Ok(()),
            Err(e) => match &self.fallback {
                Some(fallback) => {
                    tracing::warn!(
                        instance = %instance_id,
                        backend = self.primary.backend(),
                        error = %e,
                        "primary credential save failed, writing to fallback"
                    );
                    fallback.save(instance_id, state).await
                }
                None => Err(e),
            },
        }
    }

    fn backend(&self) -> &'static str {
        "layered"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Backend that refuses every call, for fallback behavior tests.
    struct DownStore {
        saves_attempted: AtomicUsize,
    }

    impl DownStore {
        fn new() -> Self {
            Self {
                saves_attempted: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl AuthStore for DownStore {
        async fn exists(&self, _instance_id: &str) -> bool {
            false
        }

        async fn load(&self, _instance_id: &str) -> Option<AuthState> {
            None
        }

        async fn save(&self, _instance_id: &str, _state: &AuthState) -> Result<()> {
            self.saves_attempted.fetch_add(1, Ordering::SeqCst);
            Err(cw_domain::Error::Store("backend down".into()))
        }

        fn backend(&self) -> &'static str {
            "down"
        }
    }

    #[tokio::test]
    async fn layered_falls_back_on_save_failure() {
        let dir = tempfile::tempdir().unwrap();
        let down = Arc::new(DownStore::new());
        let local = Arc::new(FsAuthStore::new(dir.path()));
        let layered = LayeredAuthStore::new(down.clone(), Some(local.clone()));

        let mut state = AuthState::fresh();
        state.creds = serde_json::json!({"id": "me"});
        layered.save("inst1", &state).await.unwrap();

        assert_eq!(down.saves_attempted.load(Ordering::SeqCst), 1);
        assert_eq!(local.load("inst1").await, Some(state));
    }

    #[tokio::test]
    async fn layered_exists_consults_fallback() {
        let dir = tempfile::tempdir().unwrap();
        let down = Arc::new(DownStore::new());
        let local = Arc::new(FsAuthStore::new(dir.path()));
        local.save("inst1", &AuthState::fresh()).await.unwrap();

        let layered = LayeredAuthStore::new(down, Some(local));
        assert!(layered.exists("inst1").await);
        assert!(!layered.exists("inst2").await);
    }

    #[tokio::test]
    async fn layered_without_fallback_propagates_save_error() {
        let down = Arc::new(DownStore::new());
        let layered = LayeredAuthStore::new(down, None);
        assert!(layered.save("x", &AuthState::fresh()).await.is_err());
    }
}
