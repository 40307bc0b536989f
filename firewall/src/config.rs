//! Rule-remove configuration loading and parsing

use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::FirewallError;

pub const DEFAULT_CONFIG_PATH: &str = "/etc/openspa/rule-remove.toml";
pub const CONFIG_PATH_ENV: &str = "SPA_RULE_REMOVE_CONFIG";
pub const IPTABLES_COMMAND_ENV: &str = "IPTABLES_COMMAND";
pub const IP6TABLES_COMMAND_ENV: &str = "IP6TABLES_COMMAND";

/// Root configuration structure
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RuleRemoveConfig {
    #[serde(default)]
    pub firewall: FirewallConfig,
    #[serde(default)]
    pub executor: ExecutorConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct FirewallConfig {
    /// Chain holding the temporary ACCEPT rules. Create it with
    /// `iptables --new-chain OPENSPA` and jump to it from INPUT.
    #[serde(default = "default_allow_chain")]
    pub allow_chain: String,
    /// Chain receiving a DROP rule when access expires, so established
    /// connections accepted by an ESTABLISHED,RELATED rule are cut off.
    #[serde(default = "default_block_chain")]
    pub block_chain: String,
    #[serde(default = "default_true")]
    pub stateless_block: bool,
    #[serde(default = "default_iptables")]
    pub iptables_command: String,
    #[serde(default = "default_ip6tables")]
    pub ip6tables_command: String,
}

impl Default for FirewallConfig {
    fn default() -> Self {
        Self {
            allow_chain: default_allow_chain(),
            block_chain: default_block_chain(),
            stateless_block: true,
            iptables_command: default_iptables(),
            ip6tables_command: default_ip6tables(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ExecutorConfig {
    /// Hard bound on one filter tool invocation.
    #[serde(default = "default_command_timeout")]
    pub command_timeout_secs: u64,
    /// Passed to the tool as `--wait`. Must stay below the command timeout.
    #[serde(default = "default_lock_wait")]
    pub lock_wait_secs: u64,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            command_timeout_secs: default_command_timeout(),
            lock_wait_secs: default_lock_wait(),
        }
    }
}

impl ExecutorConfig {
    pub fn command_timeout(&self) -> Duration {
        Duration::from_secs(self.command_timeout_secs)
    }
}

#[derive(Debug, Clone, Copy, Default, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
    #[serde(default)]
    pub format: LogFormat,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: LogFormat::default(),
        }
    }
}

fn default_allow_chain() -> String { "OPENSPA".into() }
fn default_block_chain() -> String { "OPENSPA-BLOCK".into() }
fn default_true() -> bool { true }
fn default_iptables() -> String { "iptables".into() }
fn default_ip6tables() -> String { "ip6tables".into() }
fn default_command_timeout() -> u64 { 15 }
fn default_lock_wait() -> u64 { 10 }
fn default_log_level() -> String { "info".into() }

impl RuleRemoveConfig {
    pub fn from_toml(content: &str) -> Result<Self, FirewallError> {
        toml::from_str(content).map_err(|e| FirewallError::Config(e.to_string()))
    }

    /// Replace tool names from `IPTABLES_COMMAND` / `IP6TABLES_COMMAND`.
    pub fn apply_env_overrides(&mut self) {
        self.apply_overrides(
            std::env::var(IPTABLES_COMMAND_ENV).ok(),
            std::env::var(IP6TABLES_COMMAND_ENV).ok(),
        );
    }

    fn apply_overrides(&mut self, iptables: Option<String>, ip6tables: Option<String>) {
        if let Some(cmd) = iptables.filter(|c| !c.is_empty()) {
            self.firewall.iptables_command = cmd;
        }
        if let Some(cmd) = ip6tables.filter(|c| !c.is_empty()) {
            self.firewall.ip6tables_command = cmd;
        }
    }

    pub fn validate(&self) -> Result<(), FirewallError> {
        let fw = &self.firewall;
        for (name, value) in [
            ("firewall.allow_chain", &fw.allow_chain),
            ("firewall.block_chain", &fw.block_chain),
            ("firewall.iptables_command", &fw.iptables_command),
            ("firewall.ip6tables_command", &fw.ip6tables_command),
        ] {
            if value.trim().is_empty() {
                return Err(FirewallError::Config(format!("{name} must not be empty")));
            }
        }

        let ex = &self.executor;
        if ex.command_timeout_secs == 0 {
            return Err(FirewallError::Config(
                "executor.command_timeout_secs must be greater than 0".into(),
            ));
        }
        if ex.lock_wait_secs >= ex.command_timeout_secs {
            return Err(FirewallError::Config(format!(
                "executor.lock_wait_secs ({}) must be less than command_timeout_secs ({})",
                ex.lock_wait_secs, ex.command_timeout_secs
            )));
        }
        Ok(())
    }
}

/// Resolve the config path: explicit, then `SPA_RULE_REMOVE_CONFIG`, then the default.
pub fn config_path(explicit: Option<&Path>) -> PathBuf {
    explicit
        .map(Path::to_path_buf)
        .or_else(|| std::env::var(CONFIG_PATH_ENV).ok().map(PathBuf::from))
        .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_PATH))
}

/// Where a loaded configuration came from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigSource {
    File,
    /// No file at the resolved path; built-in defaults were used
    Defaults,
}

/// Load configuration, falling back to defaults when the file does not exist.
///
/// Nothing is logged here since this runs before the subscriber is
/// installed; callers report a [`ConfigSource::Defaults`] fallback.
pub fn load_config(path: &Path) -> Result<(RuleRemoveConfig, ConfigSource), FirewallError> {
    let (mut config, source) = if path.exists() {
        let content = fs::read_to_string(path).map_err(|e| {
            FirewallError::Config(format!("failed to read {}: {e}", path.display()))
        })?;
        let config = RuleRemoveConfig::from_toml(&content).map_err(|e| {
            FirewallError::Config(format!("failed to parse {}: {e}", path.display()))
        })?;
        (config, ConfigSource::File)
    } else {
        (RuleRemoveConfig::default(), ConfigSource::Defaults)
    };

    config.apply_env_overrides();
    config.validate()?;
    Ok((config, source))
}
