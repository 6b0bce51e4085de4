use serde::{Deserialize, Serialize};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Protocol link
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Tuning knobs for the per-session connection state machine. The timeout
/// constants are empirical rather than load-bearing; the network itself
/// rate-limits reconnection attempts.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LinkConfig {
    /// Which socket driver to use. `"simulated"` is the in-process loopback
    /// driver for local development and tests.
    #[serde(default = "d_driver")]
    pub driver: String,
    /// How long a fresh-pairing `create` call waits for the first pairing
    /// payload before answering with a timeout.
    #[serde(default = "d_pair_timeout")]
    pub pair_timeout_sec: u64,
    /// How long a resume `create` call waits for the session to come up.
    #[serde(default = "d_resume_timeout")]
    pub resume_timeout_sec: u64,
    /// Constant delay between reconnect attempts after a recoverable close.
    #[serde(default = "d_reconnect_delay")]
    pub reconnect_delay_sec: u64,
    /// Force-close a socket that reports "connecting" for longer than this,
    /// guarding against a wedged handshake.
    #[serde(default = "d_connect_stall")]
    pub connect_stall_sec: u64,
    /// Grace delay before re-polling the session identity after the socket
    /// reports an open connection.
    #[serde(default = "d_ready_grace")]
    pub ready_grace_ms: u64,
    /// Capacity of the per-socket event channel.
    #[serde(default = "d_event_buffer")]
    pub event_buffer: usize,
}

impl Default for LinkConfig {
    fn default() -> Self {
        Self {
            driver: d_driver(),
            pair_timeout_sec: d_pair_timeout(),
            resume_timeout_sec: d_resume_timeout(),
            reconnect_delay_sec: d_reconnect_delay(),
            connect_stall_sec: d_connect_stall(),
            ready_grace_ms: d_ready_grace(),
            event_buffer: d_event_buffer(),
        }
    }
}

fn d_driver() -> String {
    "simulated".into()
}

fn d_pair_timeout() -> u64 {
    30
}

fn d_resume_timeout() -> u64 {
    10
}

fn d_reconnect_delay() -> u64 {
    5
}

fn d_connect_stall() -> u64 {
    45
}

fn d_ready_grace() -> u64 {
    3_000
}

fn d_event_buffer() -> usize {
    64
}
