//! AppState construction extracted from `main.rs` so one-shot CLI commands
//! can boot the runtime without an HTTP listener.

use std::sync::Arc;

use anyhow::Context;

use cw_domain::config::{Config, ConfigSeverity};
use cw_link::{SimDriver, SocketDriver};
use cw_sessions::SessionRegistry;
use cw_store::{AuthStore, FsAuthStore, LayeredAuthStore, RemoteAuthStore};

use crate::state::AppState;

/// Validate config, wire up every subsystem and return a fully-built
/// [`AppState`].
pub async fn build_app_state(config: Arc<Config>) -> anyhow::Result<AppState> {
    // ── Config validation ────────────────────────────────────────────
    let issues = config.validate();
    for issue in &issues {
        match issue.severity {
            ConfigSeverity::Warning => tracing::warn!("config: {issue}"),
            ConfigSeverity::Error => tracing::error!("config: {issue}"),
        }
    }
    let error_count = issues
        .iter()
        .filter(|i| i.severity == ConfigSeverity::Error)
        .count();
    if error_count > 0 {
        anyhow::bail!("config validation failed with {error_count} error(s)");
    }

    // ── Credential store ─────────────────────────────────────────────
    let store = build_store(&config).await?;
    tracing::info!(backend = store.backend(), "credential store ready");

    // ── Socket driver ────────────────────────────────────────────────
    let driver = build_driver(&config)?;
    tracing::info!(driver = %config.link.driver, "socket driver ready");

    // ── Session registry ─────────────────────────────────────────────
    let registry = Arc::new(SessionRegistry::new(driver, store, config.link.clone()));
    tracing::info!("session registry ready");

    Ok(AppState::new(config, registry))
}

/// Build the credential store stack.
///
/// With a remote backend configured the layout is remote-first with a
/// filesystem fallback per call. A remote that fails its health probe at
/// boot is skipped entirely rather than timing out on every save.
async fn build_store(config: &Config) -> anyhow::Result<Arc<dyn AuthStore>> {
    let fs = Arc::new(FsAuthStore::new(config.store.sessions_dir.clone()));

    let Some(remote_cfg) = &config.store.remote else {
        return Ok(fs);
    };

    let remote = RemoteAuthStore::new(remote_cfg)
        .with_context(|| format!("building remote store client for {}", remote_cfg.base_url))?;

    if !remote.healthy().await {
        tracing::warn!(
            url = %remote_cfg.base_url,
            "remote credential store unreachable, using filesystem only"
        );
        return Ok(fs);
    }

    tracing::info!(url = %remote_cfg.base_url, "remote credential store online");
    Ok(Arc::new(LayeredAuthStore::new(Arc::new(remote), Some(fs))))
}

fn build_driver(config: &Config) -> anyhow::Result<Arc<dyn SocketDriver>> {
    match config.link.driver.as_str() {
        "simulated" => Ok(Arc::new(SimDriver::default())),
        other => anyhow::bail!("unknown link driver {other:?} (supported: \"simulated\")"),
    }
}
