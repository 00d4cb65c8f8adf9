//! Configuration loading, env substitution and validation.
//!
//! Config files: `valet.toml`, `valet.yaml`, or `valet.json`, searched in `./`
//! then the user config directory. `${ENV_VAR}` placeholders are expanded
//! before parsing.

pub mod env_subst;
pub mod loader;
pub mod schema;
pub mod validate;

pub use {
    loader::{
        config_dir, data_dir, discover_and_load, find_config_file, load_config, load_or_discover,
        render_config,
    },
    schema::{BotConfig, LoggingConfig, PeersConfig, ProtocolConfig, ShellHookConfig, ValetConfig},
    validate::{Diagnostic, Severity, ValidationResult, validate, validate_str},
};
