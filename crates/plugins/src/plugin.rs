//! Plugin capabilities and owner-scoped registration.
//!
//! A plugin says what it offers through [`Plugin::commands`],
//! [`Plugin::events`] and [`Plugin::hooks`]; the host asks each capability
//! in turn and hands it a [`PluginRegistrar`] bound to the plugin's name.

use std::{future::Future, sync::Arc};

use {
    async_trait::async_trait,
    serde::{Deserialize, Serialize},
    tokio_util::sync::CancellationToken,
    tracing::debug,
    valet_commands::{CommandContext, CommandHandler, CommandRouter},
    valet_common::hooks::{HookHandler, HookPayload, HookPhase, HookRegistry},
    valet_events::{Event, EventBus, Listener, ListenerSpec},
};

use crate::error::{Error, Result};

/// Owners and listener names the host keeps for itself.
pub const RESERVED_NAMES: &[&str] = &[valet_commands::ROUTER_LISTENER, crate::shell_hook::CONFIG_OWNER];

pub(crate) fn check_reserved(name: &str) -> Result<()> {
    if RESERVED_NAMES.contains(&name) {
        return Err(Error::Reserved { name: name.to_owned() });
    }
    Ok(())
}

/// Descriptive metadata of a plugin.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PluginInfo {
    pub name: String,
    pub version: String,
    #[serde(default)]
    pub author: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
}

impl PluginInfo {
    pub fn new(name: impl Into<String>, version: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            version: version.into(),
            author: None,
            description: None,
        }
    }

    #[must_use]
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }
}

#[async_trait]
pub trait Plugin: Send + Sync {
    fn info(&self) -> PluginInfo;

    /// Called once, before the first registration.
    async fn initialize(&self) -> anyhow::Result<()> {
        Ok(())
    }

    /// Called once when the plugin is unloaded or the agent stops.
    async fn shutdown(&self) -> anyhow::Result<()> {
        Ok(())
    }

    fn commands(&self) -> Option<&dyn CommandProvider> {
        None
    }

    fn events(&self) -> Option<&dyn EventProvider> {
        None
    }

    fn hooks(&self) -> Option<&dyn HookProvider> {
        None
    }
}

pub trait CommandProvider: Send + Sync {
    fn register_commands(&self, registrar: &PluginRegistrar) -> Result<()>;
}

pub trait EventProvider: Send + Sync {
    fn register_listeners(&self, registrar: &PluginRegistrar) -> Result<()>;
}

pub trait HookProvider: Send + Sync {
    fn register_hooks(&self, registrar: &PluginRegistrar) -> Result<()>;
}

// ── Registries ──────────────────────────────────────────────────────────────

/// The three registries plugins write into.
#[derive(Clone)]
pub struct Registries {
    pub router: Arc<CommandRouter>,
    pub bus: Arc<EventBus>,
    pub hooks: Arc<HookRegistry>,
}

/// What [`Registries::unregister_all_for_owner`] removed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct Removed {
    pub commands: usize,
    pub listeners: usize,
    pub hooks: usize,
}

impl Removed {
    pub fn total(&self) -> usize {
        self.commands + self.listeners + self.hooks
    }
}

impl Registries {
    /// Remove every command, listener and hook owned by `owner`.
    pub fn unregister_all_for_owner(&self, owner: &str) -> Removed {
        let removed = Removed {
            commands: self.router.unregister_owner(owner),
            listeners: self.bus.unregister_owner(owner),
            hooks: self.hooks.unregister_owner(owner),
        };
        debug!(owner, total = removed.total(), "owner registrations removed");
        removed
    }
}

// ── Registrar ───────────────────────────────────────────────────────────────

/// Registration handle scoped to one owner.
pub struct PluginRegistrar {
    owner: String,
    registries: Registries,
}

impl PluginRegistrar {
    pub fn new(owner: impl Into<String>, registries: Registries) -> Self {
        Self {
            owner: owner.into(),
            registries,
        }
    }

    pub fn owner(&self) -> &str {
        &self.owner
    }

    pub fn router(&self) -> &Arc<CommandRouter> {
        &self.registries.router
    }

    pub fn register_command(
        &self,
        name: &str,
        description: &str,
        handler: Arc<dyn CommandHandler>,
    ) -> Result<()> {
        self.registries
            .router
            .register(name, description, &self.owner, handler)?;
        Ok(())
    }

    pub fn command<F, Fut>(&self, name: &str, description: &str, f: F) -> Result<()>
    where
        F: Fn(CommandContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        self.registries
            .router
            .register_fn(name, description, &self.owner, f)?;
        Ok(())
    }

    /// Register a listener; its owner is always this registrar's owner.
    pub fn register_listener(&self, spec: ListenerSpec, handler: Arc<dyn Listener>) -> Result<()> {
        check_reserved(&spec.name)?;
        self.registries
            .bus
            .register(spec.owner(self.owner.clone()), handler)?;
        Ok(())
    }

    pub fn listen<F, Fut>(&self, spec: ListenerSpec, f: F) -> Result<()>
    where
        F: Fn(Event, CancellationToken) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        check_reserved(&spec.name)?;
        self.registries
            .bus
            .listen(spec.owner(self.owner.clone()), f)?;
        Ok(())
    }

    pub fn register_hook(&self, handler: Arc<dyn HookHandler>) -> Result<()> {
        self.registries.hooks.register(&self.owner, handler)?;
        Ok(())
    }

    pub fn hook<F, Fut>(&self, phase: HookPhase, name: &str, priority: i32, f: F) -> Result<()>
    where
        F: Fn(HookPayload) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        self.registries
            .hooks
            .register_fn(&self.owner, phase, name, priority, f)?;
        Ok(())
    }

    /// Undo everything registered under this owner.
    pub fn rollback(&self) -> Removed {
        self.registries.unregister_all_for_owner(&self.owner)
    }
}

fn register_capabilities(plugin: &dyn Plugin, registrar: &PluginRegistrar) -> Result<()> {
    if let Some(commands) = plugin.commands() {
        commands.register_commands(registrar)?;
    }
    if let Some(events) = plugin.events() {
        events.register_listeners(registrar)?;
    }
    if let Some(hooks) = plugin.hooks() {
        hooks.register_hooks(registrar)?;
    }
    Ok(())
}

/// Ask each capability of `plugin` to register. On any failure everything
/// the plugin added so far is removed and the error returned.
pub fn attach(plugin: &dyn Plugin, registrar: &PluginRegistrar) -> Result<()> {
    let outcome = register_capabilities(plugin, registrar);
    if outcome.is_err() {
        let removed = registrar.rollback();
        debug!(plugin = registrar.owner(), removed = removed.total(), "registration rolled back");
    }
    outcome
}
