//! Durable authentication state for one messaging-network identity.
//!
//! The blob is deliberately opaque: the protocol socket owns its internal
//! shape, Chatwire only round-trips it through a credential store.  `creds`
//! holds the long-term identity material; `keys` holds per-peer signal key
//! material, written incrementally as the socket negotiates sessions.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Identity and key material that lets a session reconnect without re-pairing.
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct AuthState {
    /// Long-term credential blob. `null` means a fresh, never-paired identity.
    #[serde(default)]
    pub creds: serde_json::Value,
    /// Signal key material keyed by `<category>/<key id>`.
    #[serde(default)]
    pub keys: BTreeMap<String, serde_json::Value>,
}

impl AuthState {
    /// Fresh, empty credentials for a brand-new pairing.
    pub fn fresh() -> Self {
        Self::default()
    }

    /// Whether this state has ever completed a pairing.
    pub fn is_paired(&self) -> bool {
        !self.creds.is_null()
    }

    /// Slot name for a `(category, key id)` pair.
    fn slot(category: &str, key_id: &str) -> String {
        format!("{category}/{key_id}")
    }

    pub fn key(&self, category: &str, key_id: &str) -> Option<&serde_json::Value> {
        self.keys.get(&Self::slot(category, key_id))
    }

    /// Insert or replace key material. A `null` value removes the slot, which
    /// is how the protocol socket signals key deletion.
    pub fn set_key(&mut self, category: &str, key_id: &str, value: serde_json::Value) {
        let slot = Self::slot(category, key_id);
        if value.is_null() {
            self.keys.remove(&slot);
        } else {
            self.keys.insert(slot, value);
        }
    }
}
