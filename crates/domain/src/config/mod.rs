mod link;
mod server;
mod store;

pub use link::*;
pub use server::*;
pub use store::*;

use serde::{Deserialize, Serialize};
use std::fmt;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Top-level config
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub store: StoreConfig,
    #[serde(default)]
    pub link: LinkConfig,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Config validation
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Severity level for a configuration issue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigSeverity {
    Warning,
    Error,
}

/// A single validation finding with its severity.
#[derive(Debug, Clone)]
pub struct ConfigIssue {
    pub severity: ConfigSeverity,
    pub message: String,
}

impl fmt::Display for ConfigIssue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let tag = match self.severity {
            ConfigSeverity::Error => "ERROR",
            ConfigSeverity::Warning => "WARN",
        };
        write!(f, "[{tag}] {}", self.message)
    }
}

impl Config {
    /// Validate the loaded configuration. Error-severity issues should abort
    /// startup; warnings are logged and tolerated.
    pub fn validate(&self) -> Vec<ConfigIssue> {
        let mut issues = Vec::new();

        if self.server.port == 0 {
            issues.push(ConfigIssue {
                severity: ConfigSeverity::Error,
                message: "server.port must not be 0".into(),
            });
        }

        if self.link.pair_timeout_sec == 0 || self.link.resume_timeout_sec == 0 {
            issues.push(ConfigIssue {
                severity: ConfigSeverity::Error,
                message: "link.pair_timeout_sec and link.resume_timeout_sec must be > 0".into(),
            });
        }

        if self.link.event_buffer == 0 {
            issues.push(ConfigIssue {
                severity: ConfigSeverity::Error,
                message: "link.event_buffer must be > 0".into(),
            });
        }

        if self.link.reconnect_delay_sec == 0 {
            issues.push(ConfigIssue {
                severity: ConfigSeverity::Warning,
                message: "link.reconnect_delay_sec is 0, reconnect attempts will hammer the network"
                    .into(),
            });
        }

        if self.link.connect_stall_sec <= self.link.reconnect_delay_sec {
            issues.push(ConfigIssue {
                severity: ConfigSeverity::Warning,
                message: "link.connect_stall_sec should exceed link.reconnect_delay_sec".into(),
            });
        }

        if let Some(remote) = &self.store.remote {
            if remote.base_url.is_empty() {
                issues.push(ConfigIssue {
                    severity: ConfigSeverity::Error,
                    message: "store.remote.base_url must not be empty when [store.remote] is set"
                        .into(),
                });
            } else if !remote.base_url.starts_with("http://")
                && !remote.base_url.starts_with("https://")
            {
                issues.push(ConfigIssue {
                    severity: ConfigSeverity::Error,
                    message: format!(
                        "store.remote.base_url must be an http(s) URL, got {:?}",
                        remote.base_url
                    ),
                });
            }

            if remote.max_retries > 10 {
                issues.push(ConfigIssue {
                    severity: ConfigSeverity::Error,
                    message: format!(
                        "store.remote.max_retries must be 10 or fewer, got {}",
                        remote.max_retries
                    ),
                });
            }
        }

        if self.store.sessions_dir.as_os_str().is_empty() {
            issues.push(ConfigIssue {
                severity: ConfigSeverity::Error,
                message: "store.sessions_dir must not be empty".into(),
            });
        }

        issues
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_pass_validation() {
        let config = Config::default();
        assert!(config.validate().is_empty());
    }

    #[test]
    fn zero_port_is_an_error() {
        let mut config = Config::default();
        config.server.port = 0;
        let issues = config.validate();
        assert!(issues
            .iter()
            .any(|i| i.severity == ConfigSeverity::Error && i.message.contains("server.port")));
    }

    #[test]
    fn remote_url_scheme_is_checked() {
        let mut config = Config::default();
        config.store.remote = Some(RemoteStoreConfig {
            base_url: "ftp://example.com".into(),
            ..Default::default()
        });
        let issues = config.validate();
        assert!(issues
            .iter()
            .any(|i| i.severity == ConfigSeverity::Error && i.message.contains("base_url")));
    }

    #[test]
    fn oversized_retry_count_is_an_error() {
        let mut config = Config::default();
        config.store.remote = Some(RemoteStoreConfig {
            base_url: "https://store.internal".into(),
            max_retries: 1_000,
            ..Default::default()
        });
        let issues = config.validate();
        assert!(issues
            .iter()
            .any(|i| i.severity == ConfigSeverity::Error && i.message.contains("max_retries")));
    }

    #[test]
    fn zero_reconnect_delay_is_only_a_warning() {
        let mut config = Config::default();
        config.link.reconnect_delay_sec = 0;
        let issues = config.validate();
        assert!(issues.iter().all(|i| i.severity == ConfigSeverity::Warning));
        assert!(!issues.is_empty());
    }

    #[test]
    fn minimal_toml_parses_with_defaults() {
        let config: Config = toml::from_str(
            r#"
            [server]
            port = 8080
            "#,
        )
        .unwrap();
        assert_eq!(config.server.port, 8080);
        assert_eq!(config.link.pair_timeout_sec, 30);
        assert_eq!(config.link.resume_timeout_sec, 10);
        assert!(config.store.remote.is_none());
    }
}
