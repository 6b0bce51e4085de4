//! Filesystem credential store: one directory per instance id holding the
//! serialized credential and key-mapping blobs.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use cw_domain::{AuthState, Error, Result};

use crate::AuthStore;

const CREDS_FILE: &str = "creds.json";
const KEYS_FILE: &str = "keys.json";

pub struct FsAuthStore {
    root: PathBuf,
}

impl FsAuthStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn instance_dir(&self, instance_id: &str) -> PathBuf {
        self.root.join(instance_id)
    }

    async fn read_json(path: &Path) -> Option<serde_json::Value> {
        let raw = match tokio::fs::read_to_string(path).await {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return None,
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "credential file unreadable");
                return None;
            }
        };
        match serde_json::from_str(&raw) {
            Ok(value) => Some(value),
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "credential file corrupt, ignoring");
                None
            }
        }
    }
}

#[async_trait]
impl AuthStore for FsAuthStore {
    async fn exists(&self, instance_id: &str) -> bool {
        tokio::fs::try_exists(self.instance_dir(instance_id).join(CREDS_FILE))
            .await
            .unwrap_or(false)
    }

    async fn load(&self, instance_id: &str) -> Option<AuthState> {
        let dir = self.instance_dir(instance_id);
        let creds = Self::read_json(&dir.join(CREDS_FILE)).await?;

        let keys = match Self::read_json(&dir.join(KEYS_FILE)).await {
            Some(value) => match serde_json::from_value(value) {
                Ok(keys) => keys,
                Err(e) => {
                    tracing::warn!(
                        instance = %instance_id,
                        error = %e,
                        "key mapping corrupt, restoring creds with empty keys"
                    );
                    Default::default()
                }
            },
            None => Default::default(),
        };

        Some(AuthState { creds, keys })
    }

    async fn save(&self, instance_id: &str, state: &AuthState) -> Result<()> {
        let dir = self.instance_dir(instance_id);
        tokio::fs::create_dir_all(&dir).await.map_err(Error::Io)?;

        let creds = serde_json::to_vec_pretty(&state.creds)?;
        tokio::fs::write(dir.join(CREDS_FILE), creds)
            .await
            .map_err(Error::Io)?;

        let keys = serde_json::to_vec_pretty(&state.keys)?;
        tokio::fs::write(dir.join(KEYS_FILE), keys)
            .await
            .map_err(Error::Io)?;

        tracing::debug!(instance = %instance_id, "credentials saved to filesystem");
        Ok(())
    }

    fn backend(&self) -> &'static str {
        "filesystem"
    }
}
