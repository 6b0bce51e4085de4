//! Registry lifecycle behavior against a scripted fake driver.
//!
//! Paused-clock tests: caller deadlines and reconnect delays elapse in
//! virtual time, so even the "slow path" cases finish instantly.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use cw_domain::config::LinkConfig;
use cw_domain::{AuthState, Error, Result};
use cw_link::{CloseReason, Presence, SharedAuthState, SocketDriver, SocketEvent, SocketHandle};
use cw_sessions::{CreateOutcome, SessionRegistry};
use cw_store::AuthStore;
use parking_lot::Mutex;
use tokio::sync::mpsc;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Fixtures
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

enum Step {
    Emit(SocketEvent),
    Wait(Duration),
}

struct Script {
    steps: Vec<Step>,
    identity: Option<String>,
    fail_logout: bool,
}

impl Script {
    fn new(steps: Vec<Step>) -> Self {
        Self {
            steps,
            identity: Some("acct@net".into()),
            fail_logout: false,
        }
    }
}

struct ScriptedDriver {
    scripts: Mutex<VecDeque<Script>>,
    opens: AtomicUsize,
    closes: Arc<AtomicUsize>,
}

impl ScriptedDriver {
    fn new(scripts: Vec<Script>) -> Arc<Self> {
        Arc::new(Self {
            scripts: Mutex::new(scripts.into()),
            opens: AtomicUsize::new(0),
            closes: Arc::new(AtomicUsize::new(0)),
        })
    }

    fn opens(&self) -> usize {
        self.opens.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl SocketDriver for ScriptedDriver {
    async fn open(
        &self,
        _instance_id: &str,
        _auth: SharedAuthState,
    ) -> Result<(Arc<dyn SocketHandle>, mpsc::Receiver<SocketEvent>)> {
        self.opens.fetch_add(1, Ordering::SeqCst);
        let script = self
            .scripts
            .lock()
            .pop_front()
            .ok_or_else(|| Error::Socket("no network route".into()))?;

        let (tx, rx) = mpsc::channel(16);
        let handle = Arc::new(ScriptedHandle {
            identity: script.identity.clone(),
            fail_logout: script.fail_logout,
            closes: self.closes.clone(),
        });

        tokio::spawn(async move {
            for step in script.steps {
                match step {
                    Step::Emit(event) => {
                        if tx.send(event).await.is_err() {
                            return;
                        }
                    }
                    Step::Wait(delay) => tokio::time::sleep(delay).await,
                }
            }
            std::future::pending::<()>().await;
        });

        Ok((handle, rx))
    }
}

struct ScriptedHandle {
    identity: Option<String>,
    fail_logout: bool,
    closes: Arc<AtomicUsize>,
}

#[async_trait]
impl SocketHandle for ScriptedHandle {
    async fn send_message(&self, _to: &str, _text: &str) -> Result<()> {
        Ok(())
    }

    async fn set_presence(&self, _presence: Presence) -> Result<()> {
        Ok(())
    }

    async fn logout(&self) -> Result<()> {
        if self.fail_logout {
            return Err(Error::Socket("peer unreachable".into()));
        }
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        self.closes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn identity(&self) -> Option<String> {
        self.identity.clone()
    }
}

#[derive(Default)]
struct MemStore {
    states: Mutex<HashMap<String, AuthState>>,
}

impl MemStore {
    fn preloaded(instance_id: &str) -> Arc<Self> {
        let store = Self::default();
        let mut state = AuthState::fresh();
        state.creds = serde_json::json!({ "account": "acct@net" });
        store.states.lock().insert(instance_id.into(), state);
        Arc::new(store)
    }
}

#[async_trait]
impl AuthStore for MemStore {
    async fn exists(&self, instance_id: &str) -> bool {
        self.states.lock().contains_key(instance_id)
    }

    async fn load(&self, instance_id: &str) -> Option<AuthState> {
        self.states.lock().get(instance_id).cloned()
    }

    async fn save(&self, instance_id: &str, state: &AuthState) -> Result<()> {
        self.states.lock().insert(instance_id.into(), state.clone());
        Ok(())
    }

    fn backend(&self) -> &'static str {
        "memory"
    }
}

/// Store whose existence probe takes a while, widening the window between
/// a create call starting and its record becoming visible.
struct SlowStore {
    inner: Arc<MemStore>,
    probe_delay: Duration,
}

#[async_trait]
impl AuthStore for SlowStore {
    async fn exists(&self, instance_id: &str) -> bool {
        tokio::time::sleep(self.probe_delay).await;
        self.inner.exists(instance_id).await
    }

    async fn load(&self, instance_id: &str) -> Option<AuthState> {
        self.inner.load(instance_id).await
    }

    async fn save(&self, instance_id: &str, state: &AuthState) -> Result<()> {
        self.inner.save(instance_id, state).await
    }

    fn backend(&self) -> &'static str {
        "slow-memory"
    }
}

fn registry(driver: Arc<ScriptedDriver>, store: Arc<MemStore>) -> SessionRegistry {
    let cfg = LinkConfig {
        ready_grace_ms: 50,
        ..Default::default()
    };
    SessionRegistry::new(driver, store, cfg)
}

fn qr_of(outcome: &CreateOutcome) -> &str {
    match outcome {
        CreateOutcome::Pairing { qr } => qr,
        CreateOutcome::Connected => panic!("expected a pairing outcome"),
    }
}

/// Let spawned consumer tasks drain their queues.
async fn drain() {
    for _ in 0..8 {
        tokio::task::yield_now().await;
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[tokio::test(start_paused = true)]
async fn resume_reaches_connected() {
    let driver = ScriptedDriver::new(vec![Script::new(vec![
        Step::Emit(SocketEvent::Connecting),
        Step::Emit(SocketEvent::Open),
    ])]);
    let reg = registry(driver.clone(), MemStore::preloaded("acct_1"));

    let outcome = reg.create_or_resume("acct_1").await.unwrap();
    assert!(matches!(outcome, CreateOutcome::Connected));
    assert!(reg.status("acct_1").connected);
    assert!(reg.active_handle("acct_1").is_some());
}

#[tokio::test(start_paused = true)]
async fn fresh_instance_returns_a_pairing_artifact() {
    let driver = ScriptedDriver::new(vec![Script::new(vec![
        Step::Emit(SocketEvent::Connecting),
        Step::Emit(SocketEvent::PairingPayload("pair-me".into())),
    ])]);
    let reg = registry(driver.clone(), Arc::new(MemStore::default()));

    let outcome = reg.create_or_resume("acct_1").await.unwrap();
    let qr = qr_of(&outcome);
    assert!(qr.starts_with("data:image/svg+xml;base64,"));

    // Not connected means no usable handle, even though a socket exists.
    assert!(!reg.status("acct_1").connected);
    assert!(reg.active_handle("acct_1").is_none());
}

#[tokio::test(start_paused = true)]
async fn repeat_create_reuses_the_outstanding_payload() {
    let driver = ScriptedDriver::new(vec![Script::new(vec![
        Step::Emit(SocketEvent::Connecting),
        Step::Emit(SocketEvent::PairingPayload("pair-me".into())),
    ])]);
    let reg = registry(driver.clone(), Arc::new(MemStore::default()));

    let first = reg.create_or_resume("acct_1").await.unwrap();
    let second = reg.create_or_resume("acct_1").await.unwrap();
    assert_eq!(qr_of(&first), qr_of(&second));
    assert_eq!(driver.opens(), 1, "the second call must not reopen");
}

#[tokio::test(start_paused = true)]
async fn concurrent_creates_share_one_attempt() {
    let driver = ScriptedDriver::new(vec![Script::new(vec![
        Step::Emit(SocketEvent::Connecting),
        Step::Wait(Duration::from_secs(1)),
        Step::Emit(SocketEvent::PairingPayload("pair-me".into())),
    ])]);
    let reg = Arc::new(registry(driver.clone(), Arc::new(MemStore::default())));

    let a = {
        let reg = reg.clone();
        tokio::spawn(async move { reg.create_or_resume("acct_1").await })
    };
    let b = {
        let reg = reg.clone();
        tokio::spawn(async move { reg.create_or_resume("acct_1").await })
    };

    let a = a.await.unwrap().unwrap();
    let b = b.await.unwrap().unwrap();
    assert_eq!(qr_of(&a), qr_of(&b));
    assert_eq!(driver.opens(), 1, "concurrent callers must share one attempt");
}

#[tokio::test(start_paused = true)]
async fn joiners_arriving_during_the_store_probe_get_the_resume_deadline() {
    // The socket only opens at 15s, past the 10s resume deadline but well
    // inside the 30s fresh-pairing one. Every caller must time out on the
    // resume deadline, including one that arrives while the first is still
    // probing the store.
    let driver = ScriptedDriver::new(vec![Script::new(vec![
        Step::Emit(SocketEvent::Connecting),
        Step::Wait(Duration::from_secs(15)),
        Step::Emit(SocketEvent::Open),
    ])]);
    let store = Arc::new(SlowStore {
        inner: MemStore::preloaded("acct_1"),
        probe_delay: Duration::from_millis(500),
    });
    let cfg = LinkConfig {
        ready_grace_ms: 50,
        ..Default::default()
    };
    let reg = Arc::new(SessionRegistry::new(driver.clone(), store, cfg));

    let started = tokio::time::Instant::now();
    let a = {
        let reg = reg.clone();
        tokio::spawn(async move { reg.create_or_resume("acct_1").await })
    };
    let b = {
        let reg = reg.clone();
        tokio::spawn(async move { reg.create_or_resume("acct_1").await })
    };

    assert!(matches!(a.await.unwrap(), Err(Error::Timeout(_))));
    assert!(matches!(b.await.unwrap(), Err(Error::Timeout(_))));
    assert!(
        started.elapsed() < Duration::from_secs(12),
        "resume callers must not wait out the fresh-pairing deadline"
    );
    assert_eq!(driver.opens(), 1);
}

#[tokio::test(start_paused = true)]
async fn caller_timeout_leaves_the_attempt_running() {
    let driver = ScriptedDriver::new(vec![Script::new(vec![
        Step::Emit(SocketEvent::Connecting),
        Step::Wait(Duration::from_secs(20)),
        Step::Emit(SocketEvent::Open),
    ])]);
    let reg = registry(driver.clone(), MemStore::preloaded("acct_1"));

    // The resume deadline (10s) fires before the socket opens at 20s.
    let err = reg.create_or_resume("acct_1").await.unwrap_err();
    assert!(matches!(err, Error::Timeout(_)));
    let status = reg.status("acct_1");
    assert!(status.exists && !status.connected);

    // The background attempt keeps going; status flips once it lands.
    tokio::time::sleep(Duration::from_secs(15)).await;
    drain().await;
    assert!(reg.status("acct_1").connected);
}

#[tokio::test(start_paused = true)]
async fn terminal_disconnect_drops_the_record() {
    let driver = ScriptedDriver::new(vec![Script::new(vec![
        Step::Emit(SocketEvent::Connecting),
        Step::Emit(SocketEvent::Open),
        Step::Wait(Duration::from_secs(1)),
        Step::Emit(SocketEvent::Closed(CloseReason::LoggedOut)),
    ])]);
    let reg = registry(driver.clone(), MemStore::preloaded("acct_1"));

    let outcome = reg.create_or_resume("acct_1").await.unwrap();
    assert!(matches!(outcome, CreateOutcome::Connected));
    assert_eq!(reg.list(), vec!["acct_1".to_owned()]);

    tokio::time::sleep(Duration::from_secs(2)).await;
    drain().await;
    let status = reg.status("acct_1");
    assert!(!status.exists, "a logout must evict the record");
    assert!(reg.list().is_empty());
}

#[tokio::test(start_paused = true)]
async fn recoverable_disconnect_denies_the_handle_while_reconnecting() {
    let driver = ScriptedDriver::new(vec![
        Script::new(vec![
            Step::Emit(SocketEvent::Connecting),
            Step::Emit(SocketEvent::Open),
            Step::Wait(Duration::from_secs(1)),
            Step::Emit(SocketEvent::Closed(CloseReason::ConnectionLost)),
        ]),
        Script::new(vec![
            Step::Emit(SocketEvent::Connecting),
            Step::Emit(SocketEvent::Open),
        ]),
    ]);
    let reg = registry(driver.clone(), MemStore::preloaded("acct_1"));

    reg.create_or_resume("acct_1").await.unwrap();
    tokio::time::sleep(Duration::from_secs(2)).await;
    drain().await;

    // Mid-reconnect the record survives but refuses sends.
    let status = reg.status("acct_1");
    assert!(status.exists && !status.connected);
    assert!(reg.active_handle("acct_1").is_none());

    // After the constant reconnect delay the session comes back.
    tokio::time::sleep(Duration::from_secs(10)).await;
    drain().await;
    assert!(reg.status("acct_1").connected);
    assert!(reg.active_handle("acct_1").is_some());
    assert_eq!(driver.opens(), 2);
}

#[tokio::test(start_paused = true)]
async fn delete_succeeds_even_when_logout_fails() {
    let mut script = Script::new(vec![
        Step::Emit(SocketEvent::Connecting),
        Step::Emit(SocketEvent::Open),
    ]);
    script.fail_logout = true;
    let driver = ScriptedDriver::new(vec![script]);
    let store = MemStore::preloaded("acct_1");
    let reg = registry(driver.clone(), store.clone());

    reg.create_or_resume("acct_1").await.unwrap();
    reg.delete("acct_1").await;

    assert!(!reg.status("acct_1").exists);
    assert!(reg.list().is_empty());
    assert_eq!(driver.closes.load(Ordering::SeqCst), 1);
    // Credentials stay on disk for a later manual reattach.
    assert!(store.exists("acct_1").await);
}

#[tokio::test(start_paused = true)]
async fn delete_of_unknown_instance_is_a_no_op() {
    let driver = ScriptedDriver::new(vec![]);
    let reg = registry(driver.clone(), Arc::new(MemStore::default()));

    reg.delete("ghost").await;
    assert_eq!(driver.opens(), 0);
}

#[tokio::test(start_paused = true)]
async fn construction_failure_rejects_the_caller_and_evicts() {
    // No scripts: the driver refuses to open.
    let driver = ScriptedDriver::new(vec![]);
    let reg = registry(driver.clone(), Arc::new(MemStore::default()));

    let err = reg.create_or_resume("acct_1").await.unwrap_err();
    assert!(matches!(err, Error::Socket(_)));
    assert!(!reg.status("acct_1").exists);
}

#[tokio::test(start_paused = true)]
async fn empty_instance_id_is_rejected() {
    let driver = ScriptedDriver::new(vec![]);
    let reg = registry(driver, Arc::new(MemStore::default()));

    let err = reg.create_or_resume("").await.unwrap_err();
    assert!(matches!(err, Error::InvalidInput(_)));
}

#[tokio::test(start_paused = true)]
async fn list_is_sorted() {
    let driver = ScriptedDriver::new(vec![
        Script::new(vec![
            Step::Emit(SocketEvent::Connecting),
            Step::Emit(SocketEvent::Open),
        ]),
        Script::new(vec![
            Step::Emit(SocketEvent::Connecting),
            Step::Emit(SocketEvent::Open),
        ]),
    ]);
    let store = Arc::new(MemStore::default());
    store
        .save("zulu", &AuthState::fresh())
        .await
        .unwrap();
    store
        .save("alpha", &AuthState::fresh())
        .await
        .unwrap();
    let reg = registry(driver, store);

    reg.create_or_resume("zulu").await.unwrap();
    reg.create_or_resume("alpha").await.unwrap();
    assert_eq!(reg.list(), vec!["alpha".to_owned(), "zulu".to_owned()]);
}

#[tokio::test(start_paused = true)]
async fn shutdown_closes_live_sockets() {
    let driver = ScriptedDriver::new(vec![Script::new(vec![
        Step::Emit(SocketEvent::Connecting),
        Step::Emit(SocketEvent::Open),
    ])]);
    let reg = registry(driver.clone(), MemStore::preloaded("acct_1"));

    reg.create_or_resume("acct_1").await.unwrap();
    reg.shutdown().await;

    assert!(reg.list().is_empty());
    assert_eq!(driver.closes.load(Ordering::SeqCst), 1);
}
