//! Config schema: protocol credentials, bot behaviour, identity resolution,
//! logging and shell hooks.

use std::{collections::HashMap, path::PathBuf};

use {
    secrecy::{ExposeSecret, Secret},
    serde::{Deserialize, Serialize},
    valet_common::{StrategyKind, hooks::HookPhase},
};

/// Root configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ValetConfig {
    pub protocol: ProtocolConfig,
    pub bot: BotConfig,
    pub peers: PeersConfig,
    pub logging: LoggingConfig,
    pub hooks: Vec<ShellHookConfig>,
}

impl ValetConfig {
    /// A copy safe to print: secrets are masked.
    #[must_use]
    pub fn redacted(&self) -> Self {
        let mut copy = self.clone();
        if copy.protocol.api_hash.is_some() {
            copy.protocol.api_hash = Some(Secret::new("********".into()));
        }
        copy
    }
}

/// Credentials of the network transport.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProtocolConfig {
    pub api_id: Option<i32>,
    #[serde(
        serialize_with = "serialize_option_secret",
        skip_serializing_if = "Option::is_none"
    )]
    pub api_hash: Option<Secret<String>>,
    pub session_file: PathBuf,
}

impl Default for ProtocolConfig {
    fn default() -> Self {
        Self {
            api_id: None,
            api_hash: None,
            session_file: PathBuf::from("valet.session"),
        }
    }
}

impl ProtocolConfig {
    pub fn has_credentials(&self) -> bool {
        self.api_id.is_some() && self.api_hash.as_ref().is_some_and(|h| !h.expose_secret().is_empty())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BotConfig {
    pub command_prefix: String,
    /// Directory holding one sub-directory per script plugin.
    pub plugins_dir: PathBuf,
    /// Senders treated as privileged in addition to ourselves.
    pub sudo_users: Vec<i64>,
    /// Plugins registered but left disabled at startup.
    pub disabled_plugins: Vec<String>,
}

impl Default for BotConfig {
    fn default() -> Self {
        Self {
            command_prefix: ".".into(),
            plugins_dir: PathBuf::from("plugins"),
            sudo_users: Vec::new(),
            disabled_plugins: Vec::new(),
        }
    }
}

/// Identity cache and resolver settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PeersConfig {
    /// Sqlite file mirroring the cache. Memory only when unset.
    pub database: Option<PathBuf>,
    pub cache_expiry_secs: u64,
    pub failure_threshold: u32,
    pub strategies: Vec<StrategyKind>,
    pub dialog_limit: usize,
    pub search_limit: usize,
    pub participant_limit: usize,
    pub channel_dialog_limit: usize,
    pub channel_dialog_limit_extended: usize,
}

impl Default for PeersConfig {
    fn default() -> Self {
        Self {
            database: None,
            cache_expiry_secs: 12 * 60 * 60,
            failure_threshold: 3,
            strategies: StrategyKind::DEFAULT_ORDER.to_vec(),
            dialog_limit: 200,
            search_limit: 10,
            participant_limit: 200,
            channel_dialog_limit: 100,
            channel_dialog_limit_extended: 500,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Default `EnvFilter` directive when `RUST_LOG` is unset.
    pub level: String,
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".into(),
            json: false,
        }
    }
}

/// An external command run as a lifecycle hook.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShellHookConfig {
    pub name: String,
    pub command: String,
    pub phases: Vec<HookPhase>,
    #[serde(default)]
    pub priority: i32,
    #[serde(default = "default_hook_timeout")]
    pub timeout: u64,
    #[serde(default)]
    pub env: HashMap<String, String>,
}

fn default_hook_timeout() -> u64 {
    10
}

// ── Serde helpers for Secret<String> ────────────────────────────────────────

fn serialize_option_secret<S: serde::Serializer>(
    secret: &Option<Secret<String>>,
    serializer: S,
) -> Result<S::Ok, S::Error> {
    match secret {
        Some(s) => serializer.serialize_some(s.expose_secret()),
        None => serializer.serialize_none(),
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_document_yields_defaults() {
        let config: ValetConfig = toml::from_str("").unwrap();
        assert_eq!(config.bot.command_prefix, ".");
        assert_eq!(config.peers.failure_threshold, 3);
        assert_eq!(config.peers.cache_expiry_secs, 43_200);
        assert_eq!(config.peers.strategies, StrategyKind::DEFAULT_ORDER);
        assert!(!config.protocol.has_credentials());
    }

    #[test]
    fn hooks_parse_with_defaults() {
        let config: ValetConfig = toml::from_str(
            r#"
            [[hooks]]
            name = "audit"
            command = "./audit.sh"
            phases = ["before_command", "after_command"]
            "#,
        )
        .unwrap();
        let hook = &config.hooks[0];
        assert_eq!(hook.phases, [HookPhase::BeforeCommand, HookPhase::AfterCommand]);
        assert_eq!(hook.timeout, 10);
        assert_eq!(hook.priority, 0);
    }

    #[test]
    fn redacted_masks_the_api_hash() {
        let mut config = ValetConfig::default();
        config.protocol.api_id = Some(1);
        config.protocol.api_hash = Some(Secret::new("topsecret".into()));
        assert!(config.protocol.has_credentials());
        let shown = toml::to_string(&config.redacted()).unwrap();
        assert!(!shown.contains("topsecret"));
        assert!(shown.contains("********"));
    }

    #[test]
    fn unknown_strategy_is_a_parse_error() {
        let err = toml::from_str::<ValetConfig>("[peers]\nstrategies = [\"telepathy\"]").unwrap_err();
        assert!(err.to_string().contains("telepathy"));
    }
}
