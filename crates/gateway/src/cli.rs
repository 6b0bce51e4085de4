use clap::{Parser, Subcommand};

use cw_domain::config::{Config, ConfigSeverity};

/// Chatwire, a messaging-session gateway.
#[derive(Debug, Parser)]
#[command(name = "chatwire", version, about)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Start the gateway server (default when no subcommand is given).
    Serve,
    /// Configuration utilities.
    #[command(subcommand)]
    Config(ConfigCommand),
    /// Print version information.
    Version,
}

#[derive(Debug, Subcommand)]
pub enum ConfigCommand {
    /// Parse the config file and report any errors.
    Validate,
    /// Dump the resolved configuration (with defaults) as TOML.
    Show,
}

/// Load the config from `CW_CONFIG` (default `chatwire.toml`). A missing
/// file yields the built-in defaults.
pub fn load_config() -> anyhow::Result<(Config, String)> {
    let config_path = std::env::var("CW_CONFIG").unwrap_or_else(|_| "chatwire.toml".into());

    let config = if std::path::Path::new(&config_path).exists() {
        let raw = std::fs::read_to_string(&config_path)
            .map_err(|e| anyhow::anyhow!("reading {config_path}: {e}"))?;
        toml::from_str(&raw).map_err(|e| anyhow::anyhow!("parsing {config_path}: {e}"))?
    } else {
        Config::default()
    };

    Ok((config, config_path))
}

/// Resolve the listen port: `CW_PORT` (or `PORT`) overrides the config
/// value; anything unparsable is ignored with a warning.
pub fn listen_port(config: &Config) -> u16 {
    for var in ["CW_PORT", "PORT"] {
        let Ok(raw) = std::env::var(var) else {
            continue;
        };
        match raw.parse::<u16>() {
            Ok(port) if port != 0 => return port,
            _ => tracing::warn!(var, value = %raw, "ignoring invalid port override"),
        }
    }
    config.server.port
}

/// Parse and validate the config, printing any issues.
///
/// Returns `false` when error-severity issues are found.
pub fn validate(config: &Config, config_path: &str) -> bool {
    let issues = config.validate();

    if issues.is_empty() {
        println!("Config OK ({config_path})");
        return true;
    }

    let error_count = issues
        .iter()
        .filter(|i| i.severity == ConfigSeverity::Error)
        .count();
    let warning_count = issues.len() - error_count;

    for issue in &issues {
        println!("{issue}");
    }

    println!("\n{error_count} error(s), {warning_count} warning(s) in {config_path}");

    error_count == 0
}

/// Dump the resolved config (with all defaults filled in) as TOML.
pub fn show(config: &Config) {
    match toml::to_string_pretty(config) {
        Ok(output) => print!("{output}"),
        Err(e) => {
            eprintln!("Failed to serialize config: {e}");
            std::process::exit(1);
        }
    }
}
