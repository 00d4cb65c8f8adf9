use std::sync::{Arc, Mutex};

use {
    chrono::TimeDelta,
    futures::{Stream, StreamExt},
    tokio_util::sync::CancellationToken,
    tracing::{debug, info, warn},
    valet_commands::{CommandRouter, Outbound},
    valet_common::hooks::{HookPayload, HookRegistry},
    valet_config::{PeersConfig, ValetConfig},
    valet_events::{DispatchSummary, Event, EventBus},
    valet_peers::{
        IdentityCache, PeerDirectory, PeerResolver, ResolverConfig, SqliteIdentityStore,
        cache::DEFAULT_EXPIRY_SECS, strategy::Limits,
    },
    valet_plugins::{
        CorePlugin, Plugin, PluginHost, PluginKind, Registries, ScriptBackend, ScriptHost,
        ShellHook,
    },
};

use crate::{
    client::{ProtocolClient, Update},
    error::{Error, Result},
};

pub const VERSION: &str = env!("CARGO_PKG_VERSION");

pub use valet_plugins::CONFIG_OWNER;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AgentState {
    Created,
    Starting,
    Running,
    Stopping,
    Stopped,
}

/// One running account: every registry, the resolver and the plugins, wired
/// to a protocol client.
pub struct Agent {
    config: ValetConfig,
    client: Arc<dyn ProtocolClient>,
    bus: Arc<EventBus>,
    hooks: Arc<HookRegistry>,
    router: Arc<CommandRouter>,
    resolver: Arc<PeerResolver>,
    plugins: Arc<PluginHost>,
    scripts: ScriptHost,
    pending: Mutex<Vec<Arc<dyn Plugin>>>,
    shutdown: CancellationToken,
    state: Mutex<AgentState>,
}

impl Agent {
    /// Build every subsystem from `config`. Nothing talks to the network
    /// until [`Agent::start`].
    pub async fn new<C>(config: ValetConfig, client: Arc<C>) -> Result<Self>
    where
        C: ProtocolClient + 'static,
    {
        check_peers(&config.peers)?;
        let cache = build_cache(&config.peers).await;
        let resolver = Arc::new(PeerResolver::new(
            Arc::clone(&client) as Arc<dyn PeerDirectory>,
            cache,
            resolver_config(&config.peers),
        ));

        let bus = Arc::new(EventBus::new());
        bus.set_privileged_users(config.bot.sudo_users.iter().copied());
        let hooks = Arc::new(HookRegistry::new());
        let router = CommandRouter::new(
            Arc::clone(&bus),
            Arc::clone(&hooks),
            Arc::clone(&resolver),
            Arc::clone(&client) as Arc<dyn Outbound>,
            &config.bot.command_prefix,
        )?;

        // Registered up front so before_start shell hooks see the first phase.
        for hook in &config.hooks {
            hooks.register(CONFIG_OWNER, Arc::new(ShellHook::from_config(hook)))?;
        }

        let plugins = Arc::new(PluginHost::new(Registries {
            router: Arc::clone(&router),
            bus: Arc::clone(&bus),
            hooks: Arc::clone(&hooks),
        }));

        Ok(Self {
            config,
            client,
            bus,
            hooks,
            router,
            resolver,
            plugins,
            scripts: ScriptHost::new(),
            pending: Mutex::new(Vec::new()),
            shutdown: CancellationToken::new(),
            state: Mutex::new(AgentState::Created),
        })
    }

    /// Queue a native plugin for registration at start.
    #[must_use]
    pub fn with_plugin(self, plugin: Arc<dyn Plugin>) -> Self {
        self.pending
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(plugin);
        self
    }

    #[must_use]
    pub fn with_script_backend(mut self, backend: Arc<dyn ScriptBackend>) -> Self {
        self.scripts = self.scripts.with_backend(backend);
        self
    }

    pub fn config(&self) -> &ValetConfig {
        &self.config
    }

    pub fn bus(&self) -> &Arc<EventBus> {
        &self.bus
    }

    pub fn hooks(&self) -> &Arc<HookRegistry> {
        &self.hooks
    }

    pub fn router(&self) -> &Arc<CommandRouter> {
        &self.router
    }

    pub fn resolver(&self) -> &Arc<PeerResolver> {
        &self.resolver
    }

    pub fn plugins(&self) -> &Arc<PluginHost> {
        &self.plugins
    }

    /// Cancelled when the agent stops; long-running callers should watch it.
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    pub fn state(&self) -> AgentState {
        *self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn transition(&self, from: AgentState, to: AgentState) -> bool {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        if *state != from {
            return false;
        }
        *state = to;
        true
    }

    fn set_state(&self, to: AgentState) {
        *self.state.lock().unwrap_or_else(|e| e.into_inner()) = to;
    }

    // ── Lifecycle ───────────────────────────────────────────────────────────

    /// Run `before_start` hooks, load plugins, connect, then run
    /// `after_start` hooks. A failing `before_start` chain aborts the start
    /// and leaves the agent startable again.
    pub async fn start(&self) -> Result<()> {
        if !self.transition(AgentState::Created, AgentState::Starting) {
            return Err(Error::AlreadyStarted);
        }

        let before = HookPayload::BeforeStart {
            version: VERSION.into(),
        };
        if let Err(e) = self.hooks.run(&before, &self.shutdown).await {
            self.set_state(AgentState::Created);
            return Err(Error::StartAborted(e));
        }

        if let Err(e) = self.load_plugins().await {
            self.plugins.shutdown_all().await;
            self.set_state(AgentState::Created);
            return Err(e);
        }

        let self_id = match self.client.connect().await {
            Ok(id) => id,
            Err(e) => {
                self.plugins.shutdown_all().await;
                self.set_state(AgentState::Created);
                return Err(Error::connect(e));
            },
        };
        self.resolver.set_self_id(self_id);
        self.set_state(AgentState::Running);
        info!(
            self_id,
            plugins = self.plugins.list().len(),
            commands = self.router.commands().len(),
            prefix = %self.router.prefix(),
            "agent started"
        );

        let after = HookPayload::AfterStart {
            version: VERSION.into(),
            self_id: Some(self_id),
        };
        if let Err(e) = self.hooks.run(&after, &self.shutdown).await {
            warn!(error = %e, "after-start hooks failed");
        }
        Ok(())
    }

    async fn load_plugins(&self) -> Result<()> {
        self.plugins
            .register(Arc::new(CorePlugin::new(&self.plugins)), PluginKind::Builtin)
            .await?;

        let pending = std::mem::take(&mut *self.pending.lock().unwrap_or_else(|e| e.into_inner()));
        for plugin in pending {
            let name = plugin.info().name;
            if let Err(e) = self.plugins.register(plugin, PluginKind::Native).await {
                warn!(plugin = %name, error = %e, "plugin failed to load");
            }
        }

        let dir = &self.config.bot.plugins_dir;
        if self.scripts.has_backends() {
            self.scripts.load_dir(&self.plugins, dir).await;
        } else if dir.is_dir() {
            debug!(path = %dir.display(), "no script backend configured, script plugins skipped");
        }

        for name in &self.config.bot.disabled_plugins {
            if let Err(e) = self.plugins.disable(name).await {
                warn!(plugin = %name, error = %e, "cannot disable plugin");
            }
        }
        Ok(())
    }

    /// Run `before_stop` hooks, cancel the shutdown token, shut plugins
    /// down, disconnect, then run `after_stop` hooks. Hook failures are
    /// logged.
    pub async fn stop(&self) -> Result<()> {
        if !self.transition(AgentState::Running, AgentState::Stopping) {
            return Err(Error::NotRunning);
        }
        // The shutdown token is about to fire; stop hooks get their own.
        let hook_token = CancellationToken::new();
        if let Err(e) = self.hooks.run(&HookPayload::BeforeStop, &hook_token).await {
            warn!(error = %e, "before-stop hooks failed");
        }

        self.shutdown.cancel();
        let unloaded = self.plugins.shutdown_all().await;
        if let Err(e) = self.client.disconnect().await {
            warn!(error = %e, "protocol client disconnect failed");
        }

        if let Err(e) = self.hooks.run(&HookPayload::AfterStop, &hook_token).await {
            warn!(error = %e, "after-stop hooks failed");
        }
        self.set_state(AgentState::Stopped);
        info!(plugins = unloaded, "agent stopped");
        Ok(())
    }

    // ── Updates ─────────────────────────────────────────────────────────────

    /// Warm the identity cache from the update's users, then dispatch it.
    pub async fn handle_update(&self, update: Update) -> Result<DispatchSummary> {
        let warmed = self.resolver.cache_from_bulk(update.users()).await;
        if warmed > 0 {
            debug!(warmed, "identity cache warmed from update");
        }
        let event = match update {
            Update::NewMessage { message, .. } => Event::Message(message),
            Update::Raw { update, .. } => Event::Raw(update),
        };
        Ok(self.bus.dispatch(&event, &self.shutdown).await?)
    }

    /// Dispatch updates one at a time until the stream ends or the agent is
    /// stopped. Returns how many updates were dispatched.
    pub async fn run<S>(&self, updates: S) -> Result<usize>
    where
        S: Stream<Item = Update>,
    {
        let mut updates = std::pin::pin!(updates);
        let mut handled = 0;
        loop {
            let next = tokio::select! {
                () = self.shutdown.cancelled() => break,
                next = updates.next() => next,
            };
            let Some(update) = next else {
                debug!("update stream ended");
                break;
            };
            match self.handle_update(update).await {
                Ok(summary) => {
                    handled += 1;
                    if summary.failed > 0 {
                        debug!(invoked = summary.invoked, failed = summary.failed, "update had failing listeners");
                    }
                },
                Err(e) if e.is_cancelled() => break,
                Err(e) => warn!(error = %e, "update dispatch failed"),
            }
        }
        Ok(handled)
    }
}

async fn build_cache(peers: &PeersConfig) -> Arc<IdentityCache> {
    let expiry = i64::try_from(peers.cache_expiry_secs)
        .ok()
        .and_then(TimeDelta::try_seconds)
        .unwrap_or_else(|| TimeDelta::seconds(DEFAULT_EXPIRY_SECS));
    let mut cache = IdentityCache::new(expiry);

    if let Some(path) = &peers.database {
        match SqliteIdentityStore::open(path).await {
            Ok(store) => cache = cache.with_store(Arc::new(store)),
            Err(e) => warn!(path = %path.display(), error = %e, "identity store unavailable, caching in memory only"),
        }
    }

    let cache = Arc::new(cache);
    if cache.has_store() {
        let loaded = cache.load_from_store().await;
        info!(loaded, "identity cache loaded from store");
    }
    cache
}

/// Settings under which no identity could ever resolve.
fn check_peers(peers: &PeersConfig) -> Result<()> {
    if peers.failure_threshold == 0 {
        return Err(Error::InvalidConfig(
            "peers.failure_threshold must be at least 1".into(),
        ));
    }
    if peers.strategies.is_empty() {
        return Err(Error::InvalidConfig("peers.strategies must not be empty".into()));
    }
    Ok(())
}

fn resolver_config(peers: &PeersConfig) -> ResolverConfig {
    ResolverConfig {
        strategies: peers.strategies.clone(),
        failure_threshold: peers.failure_threshold,
        limits: Limits {
            dialogs: peers.dialog_limit,
            search: peers.search_limit,
            participants: peers.participant_limit,
            channel_dialogs: peers.channel_dialog_limit,
            channel_dialogs_extended: peers.channel_dialog_limit_extended,
        },
        ..ResolverConfig::default()
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use {super::*, valet_common::StrategyKind};

    #[test]
    fn resolver_config_follows_peers_section() {
        let peers = PeersConfig {
            failure_threshold: 5,
            strategies: vec![StrategyKind::Contacts],
            search_limit: 3,
            ..PeersConfig::default()
        };
        let config = resolver_config(&peers);
        assert_eq!(config.failure_threshold, 5);
        assert_eq!(config.strategies, [StrategyKind::Contacts]);
        assert_eq!(config.limits.search, 3);
        assert_eq!(config.group_strategies, StrategyKind::GROUP_ORDER);
    }

    #[rstest::rstest]
    #[case(PeersConfig { failure_threshold: 0, ..PeersConfig::default() }, "failure_threshold")]
    #[case(PeersConfig { strategies: Vec::new(), ..PeersConfig::default() }, "strategies")]
    fn unusable_peer_settings_are_rejected(#[case] peers: PeersConfig, #[case] field: &str) {
        let err = check_peers(&peers).unwrap_err();
        assert!(matches!(&err, Error::InvalidConfig(msg) if msg.contains(field)), "{err}");
        assert!(check_peers(&PeersConfig::default()).is_ok());
    }

    #[tokio::test]
    async fn oversized_expiry_falls_back_to_default() {
        let peers = PeersConfig {
            cache_expiry_secs: u64::MAX,
            ..PeersConfig::default()
        };
        let cache = build_cache(&peers).await;
        assert_eq!(cache.expiry(), TimeDelta::seconds(DEFAULT_EXPIRY_SECS));
        assert!(!cache.has_store());
    }

    #[tokio::test]
    async fn unopenable_store_degrades_to_memory() {
        let dir = tempfile::tempdir().unwrap();
        // A directory cannot be opened as a database file.
        let peers = PeersConfig {
            database: Some(dir.path().to_path_buf()),
            ..PeersConfig::default()
        };
        let cache = build_cache(&peers).await;
        assert!(!cache.has_store());
    }
}
