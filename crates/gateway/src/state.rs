use std::sync::Arc;

use cw_domain::config::Config;
use cw_sessions::SessionRegistry;
use regex::Regex;

/// Shared application state passed to all API handlers.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub registry: Arc<SessionRegistry>,
    /// Instance-id charset check, compiled once at boot.
    pub instance_id_re: Arc<Regex>,
}

impl AppState {
    pub fn new(config: Arc<Config>, registry: Arc<SessionRegistry>) -> Self {
        Self {
            config,
            registry,
            instance_id_re: Arc::new(
                Regex::new(r"^[A-Za-z0-9_-]+$").expect("hardcoded regex is valid"),
            ),
        }
    }
}
