//! Plugins: native capability providers, script plugins and shell hooks.
//!
//! Every plugin registers under its own name as owner, so unloading or
//! disabling one removes exactly what it added to the router, the bus and
//! the hook registry.

pub mod builtin;
pub mod error;
pub mod exec;
pub mod host;
pub mod manifest;
pub mod plugin;
pub mod script;
pub mod shell_hook;

#[cfg(test)]
mod testing;

pub use {
    builtin::{CORE_PLUGIN, CorePlugin},
    error::{Error, Result},
    exec::{DEFAULT_EXEC_TIMEOUT, ExecOutput, exec},
    host::{HostStats, PluginHost, PluginKind, PluginStatus},
    manifest::{MANIFEST_FILE, ScriptManifest},
    plugin::{
        CommandProvider, EventProvider, HookProvider, Plugin, PluginInfo, PluginRegistrar,
        RESERVED_NAMES, Registries, Removed, attach,
    },
    script::{LoadReport, RuntimeInfo, ScriptApi, ScriptBackend, ScriptHost, ScriptPlugin, SystemInfo},
    shell_hook::{CONFIG_OWNER, ShellHook},
};
