use std::net::IpAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{bail, Context};
use serde::Deserialize;

use crate::cli::Cli;
use crate::rules::RuleSettings;

#[derive(Debug, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub relay: RelayConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Deserialize)]
pub struct RelayConfig {
    #[serde(default = "default_buffer_size")]
    pub buffer_size: usize,
    #[serde(default = "default_idle_timeout")]
    pub idle_timeout_secs: u64,
    #[serde(default = "default_bind_host")]
    pub bind_host: String,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            buffer_size: default_buffer_size(),
            idle_timeout_secs: default_idle_timeout(),
            bind_host: default_bind_host(),
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
    #[serde(default)]
    pub journal_path: Option<PathBuf>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            journal_path: None,
        }
    }
}

// ---------------------------------------------------------------------------
// Default-value functions used by serde
// ---------------------------------------------------------------------------

fn default_buffer_size() -> usize {
    relay_engine::DEFAULT_BUFFER_SIZE
}

fn default_idle_timeout() -> u64 {
    relay_engine::DEFAULT_IDLE_TIMEOUT.as_secs()
}

fn default_bind_host() -> String {
    "0.0.0.0".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

// ---------------------------------------------------------------------------
// Loader
// ---------------------------------------------------------------------------

/// Load configuration from a YAML file.
///
/// Returns `Ok(None)` when the file does not exist, so the caller can fall
/// back to defaults and warn once logging is up.
pub fn load(path: &Path) -> anyhow::Result<Option<Config>> {
    if !path.exists() {
        return Ok(None);
    }

    let contents = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read config file {}", path.display()))?;

    let config: Config = serde_yml::from_str(&contents)
        .with_context(|| format!("failed to parse config file {}", path.display()))?;

    Ok(Some(config))
}

impl Config {
    /// Apply command-line overrides on top of file values.
    pub fn merge_cli(&mut self, cli: &Cli) {
        if let Some(size) = cli.buffer_size {
            self.relay.buffer_size = size;
        }
        if let Some(secs) = cli.idle_timeout_secs {
            self.relay.idle_timeout_secs = secs;
        }
        if let Some(ref host) = cli.bind_host {
            self.relay.bind_host = host.clone();
        }
        if let Some(ref journal) = cli.journal {
            self.logging.journal_path = Some(journal.clone());
        }
        if let Some(ref level) = cli.log_level {
            self.logging.level = level.clone();
        }
    }

    /// Check the merged configuration and derive the settings new rules
    /// start with.
    pub fn rule_settings(&self) -> anyhow::Result<RuleSettings> {
        if self.relay.buffer_size == 0 {
            bail!("relay.buffer_size must be at least 1");
        }
        if self.relay.idle_timeout_secs == 0 {
            bail!("relay.idle_timeout_secs must be at least 1");
        }
        let bind_host: IpAddr = self
            .relay
            .bind_host
            .parse()
            .with_context(|| format!("invalid relay.bind_host {:?}", self.relay.bind_host))?;

        Ok(RuleSettings {
            buffer_size: self.relay.buffer_size,
            idle_timeout: Duration::from_secs(self.relay.idle_timeout_secs),
            bind_host,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;

    fn write_config(contents: &str) -> (tempfile::TempDir, PathBuf) {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tcp-relay.yaml");
        std::fs::write(&path, contents).unwrap();
        (dir, path)
    }

    #[test]
    fn missing_file_is_not_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let loaded = load(&dir.path().join("absent.yaml")).unwrap();
        assert!(loaded.is_none());
    }

    #[test]
    fn defaults_match_engine_defaults() {
        let config = Config::default();
        let settings = config.rule_settings().unwrap();
        assert_eq!(settings.buffer_size, 64 * 1024);
        assert_eq!(settings.idle_timeout, Duration::from_secs(10));
        assert_eq!(settings.bind_host, "0.0.0.0".parse::<IpAddr>().unwrap());
        assert_eq!(config.logging.level, "info");
        assert!(config.logging.journal_path.is_none());
    }

    #[test]
    fn partial_file_keeps_other_defaults() {
        let (_dir, path) = write_config("relay:\n  buffer_size: 4096\n");
        let config = load(&path).unwrap().unwrap();
        assert_eq!(config.relay.buffer_size, 4096);
        assert_eq!(config.relay.idle_timeout_secs, 10);
        assert_eq!(config.relay.bind_host, "0.0.0.0");
    }

    #[test]
    fn full_file_is_read() {
        let (_dir, path) = write_config(
            "relay:\n  buffer_size: 1024\n  idle_timeout_secs: 3\n  bind_host: 127.0.0.1\n\
             logging:\n  level: debug\n  journal_path: /tmp/journal.jsonl\n",
        );
        let config = load(&path).unwrap().unwrap();
        assert_eq!(config.relay.idle_timeout_secs, 3);
        assert_eq!(config.relay.bind_host, "127.0.0.1");
        assert_eq!(config.logging.level, "debug");
        assert_eq!(
            config.logging.journal_path,
            Some(PathBuf::from("/tmp/journal.jsonl"))
        );
    }

    #[test]
    fn malformed_file_is_an_error() {
        let (_dir, path) = write_config("relay: [not, a, map\n");
        assert!(load(&path).is_err());
    }

    #[test]
    fn cli_overrides_file_values() {
        let (_dir, path) = write_config("relay:\n  buffer_size: 4096\n  bind_host: 10.0.0.1\n");
        let mut config = load(&path).unwrap().unwrap();
        let cli = Cli::try_parse_from(["tcp-relay", "--buffer-size", "512", "--log-level", "warn"])
            .unwrap();
        config.merge_cli(&cli);

        assert_eq!(config.relay.buffer_size, 512);
        assert_eq!(config.relay.bind_host, "10.0.0.1");
        assert_eq!(config.logging.level, "warn");
    }

    #[test]
    fn invalid_values_are_rejected() {
        let mut config = Config::default();
        config.relay.buffer_size = 0;
        assert!(config.rule_settings().is_err());

        let mut config = Config::default();
        config.relay.idle_timeout_secs = 0;
        assert!(config.rule_settings().is_err());

        let mut config = Config::default();
        config.relay.bind_host = "localhost:80".to_string();
        assert!(config.rule_settings().is_err());
    }
}
