use std::path::PathBuf;

use serde::{Deserialize, Serialize};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Credential store
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    /// Root directory for the filesystem backend, one subdirectory per
    /// instance id.
    #[serde(default = "d_sessions_dir")]
    pub sessions_dir: PathBuf,
    /// Remote document-store backend. When set and reachable it is tried
    /// first, the filesystem backend remains the fallback.
    #[serde(default)]
    pub remote: Option<RemoteStoreConfig>,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            sessions_dir: d_sessions_dir(),
            remote: None,
        }
    }
}

fn d_sessions_dir() -> PathBuf {
    PathBuf::from("sessions")
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RemoteStoreConfig {
    /// Base URL of the document store, e.g. `https://store.internal:8443`.
    #[serde(default)]
    pub base_url: String,
    /// Environment variable holding the API key. Unset or empty env var
    /// means unauthenticated requests.
    #[serde(default = "d_api_key_env")]
    pub api_key_env: String,
    #[serde(default = "d_timeout_ms")]
    pub timeout_ms: u64,
    /// Retries on 5xx / timeout. 4xx responses are never retried.
    #[serde(default = "d_max_retries")]
    pub max_retries: u32,
}

impl Default for RemoteStoreConfig {
    fn default() -> Self {
        Self {
            base_url: String::new(),
            api_key_env: d_api_key_env(),
            timeout_ms: d_timeout_ms(),
            max_retries: d_max_retries(),
        }
    }
}

fn d_api_key_env() -> String {
    "CW_STORE_API_KEY".into()
}

fn d_timeout_ms() -> u64 {
    5_000
}

fn d_max_retries() -> u32 {
    2
}
