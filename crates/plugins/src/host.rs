use std::{
    collections::BTreeMap,
    sync::{
        Arc, RwLock,
        atomic::{AtomicUsize, Ordering},
    },
    time::{Duration, Instant},
};

use {
    serde::Serialize,
    tokio::sync::Mutex,
    tracing::{info, warn},
};

use crate::{
    error::{Error, Result},
    plugin::{Plugin, PluginInfo, PluginRegistrar, Registries, attach, check_reserved},
};

/// Where a plugin came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PluginKind {
    /// Shipped with the agent; cannot be disabled or unloaded.
    Builtin,
    Native,
    Script,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PluginStatus {
    #[serde(flatten)]
    pub info: PluginInfo,
    pub kind: PluginKind,
    pub enabled: bool,
}

/// Counters the script API exposes as runtime info.
#[derive(Debug)]
pub struct HostStats {
    started: Instant,
    loaded: AtomicUsize,
}

impl HostStats {
    fn new() -> Self {
        Self {
            started: Instant::now(),
            loaded: AtomicUsize::new(0),
        }
    }

    pub fn uptime(&self) -> Duration {
        self.started.elapsed()
    }

    pub fn loaded(&self) -> usize {
        self.loaded.load(Ordering::Relaxed)
    }
}

#[derive(Clone)]
struct Slot {
    plugin: Arc<dyn Plugin>,
    kind: PluginKind,
    enabled: bool,
}

/// Loaded plugins and their registrations.
///
/// Lifecycle operations are serialized by an async mutex; listings read a
/// separate lock and never wait on plugin code.
pub struct PluginHost {
    registries: Registries,
    plugins: RwLock<BTreeMap<String, Slot>>,
    lifecycle: Mutex<()>,
    stats: Arc<HostStats>,
}

impl PluginHost {
    pub fn new(registries: Registries) -> Self {
        Self {
            registries,
            plugins: RwLock::new(BTreeMap::new()),
            lifecycle: Mutex::new(()),
            stats: Arc::new(HostStats::new()),
        }
    }

    pub fn registries(&self) -> &Registries {
        &self.registries
    }

    pub fn stats(&self) -> Arc<HostStats> {
        Arc::clone(&self.stats)
    }

    fn registrar(&self, owner: &str) -> PluginRegistrar {
        PluginRegistrar::new(owner, self.registries.clone())
    }

    fn slot(&self, name: &str) -> Option<Slot> {
        self.plugins
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(name)
            .cloned()
    }

    fn sync_count(&self, plugins: &BTreeMap<String, Slot>) {
        self.stats.loaded.store(plugins.len(), Ordering::Relaxed);
    }

    /// Initialize `plugin` and register its capabilities, enabled.
    pub async fn register(&self, plugin: Arc<dyn Plugin>, kind: PluginKind) -> Result<()> {
        let _guard = self.lifecycle.lock().await;
        let info = plugin.info();
        let name = info.name.clone();
        if name.trim().is_empty() {
            return Err(Error::message("plugin name must not be empty"));
        }
        check_reserved(&name)?;
        if self.slot(&name).is_some() {
            return Err(Error::DuplicatePlugin { name });
        }

        plugin
            .initialize()
            .await
            .map_err(|e| Error::external(format!("plugin '{name}' failed to initialize"), e))?;
        if let Err(e) = attach(plugin.as_ref(), &self.registrar(&name)) {
            warn!(plugin = %name, error = %e, "plugin registration failed");
            shutdown_quietly(&name, plugin.as_ref()).await;
            return Err(e);
        }

        let mut plugins = self.plugins.write().unwrap_or_else(|e| e.into_inner());
        plugins.insert(name.clone(), Slot {
            plugin,
            kind,
            enabled: true,
        });
        self.sync_count(&plugins);
        info!(plugin = %name, version = %info.version, kind = ?kind, "plugin loaded");
        Ok(())
    }

    /// Re-register a disabled plugin. Returns false if it was already enabled.
    pub async fn enable(&self, name: &str) -> Result<bool> {
        let _guard = self.lifecycle.lock().await;
        let slot = self.slot(name).ok_or_else(|| Error::UnknownPlugin { name: name.into() })?;
        if slot.enabled {
            return Ok(false);
        }
        attach(slot.plugin.as_ref(), &self.registrar(name))?;
        self.set_enabled(name, true);
        info!(plugin = name, "plugin enabled");
        Ok(true)
    }

    /// Drop a plugin's registrations but keep it loaded.
    pub async fn disable(&self, name: &str) -> Result<bool> {
        let _guard = self.lifecycle.lock().await;
        let slot = self.slot(name).ok_or_else(|| Error::UnknownPlugin { name: name.into() })?;
        if slot.kind == PluginKind::Builtin {
            return Err(Error::Protected { name: name.into() });
        }
        if !slot.enabled {
            return Ok(false);
        }
        self.registries.unregister_all_for_owner(name);
        self.set_enabled(name, false);
        info!(plugin = name, "plugin disabled");
        Ok(true)
    }

    fn set_enabled(&self, name: &str, enabled: bool) {
        if let Some(slot) = self
            .plugins
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .get_mut(name)
        {
            slot.enabled = enabled;
        }
    }

    /// Remove a plugin and everything it registered, then shut it down.
    pub async fn unload(&self, name: &str) -> Result<()> {
        let _guard = self.lifecycle.lock().await;
        let slot = self.slot(name).ok_or_else(|| Error::UnknownPlugin { name: name.into() })?;
        if slot.kind == PluginKind::Builtin {
            return Err(Error::Protected { name: name.into() });
        }
        {
            let mut plugins = self.plugins.write().unwrap_or_else(|e| e.into_inner());
            plugins.remove(name);
            self.sync_count(&plugins);
        }
        let removed = self.registries.unregister_all_for_owner(name);
        shutdown_quietly(name, slot.plugin.as_ref()).await;
        info!(plugin = name, removed = removed.total(), "plugin unloaded");
        Ok(())
    }

    /// Unregister and shut down every plugin. Returns how many there were.
    pub async fn shutdown_all(&self) -> usize {
        let _guard = self.lifecycle.lock().await;
        let slots = {
            let mut plugins = self.plugins.write().unwrap_or_else(|e| e.into_inner());
            let taken = std::mem::take(&mut *plugins);
            self.sync_count(&plugins);
            taken
        };
        let count = slots.len();
        for (name, slot) in slots.into_iter().rev() {
            self.registries.unregister_all_for_owner(&name);
            shutdown_quietly(&name, slot.plugin.as_ref()).await;
        }
        info!(count, "plugins shut down");
        count
    }

    pub fn list(&self) -> Vec<PluginStatus> {
        self.plugins
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .values()
            .map(|slot| PluginStatus {
                info: slot.plugin.info(),
                kind: slot.kind,
                enabled: slot.enabled,
            })
            .collect()
    }

    pub fn is_enabled(&self, name: &str) -> Option<bool> {
        self.slot(name).map(|s| s.enabled)
    }
}

async fn shutdown_quietly(name: &str, plugin: &dyn Plugin) {
    if let Err(e) = plugin.shutdown().await {
        warn!(plugin = name, error = %e, "plugin shutdown failed");
    }
}
