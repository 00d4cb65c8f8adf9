//! Script plugins.
//!
//! A [`ScriptBackend`] embeds one scripting language. When a script plugin is
//! initialized the backend evaluates its entry file and the script calls back
//! into the [`ScriptApi`] it was handed. Registrations made during evaluation
//! are held by the [`ScriptPlugin`] and replayed through the normal capability
//! providers, so enable/disable works the same as for native plugins.

use std::{
    path::Path,
    sync::{Arc, Mutex},
    time::Duration,
};

use {
    async_trait::async_trait,
    serde::Serialize,
    sysinfo::System,
    tracing::{debug, error, info, trace, warn},
    valet_commands::{CommandContext, CommandHandler, FnCommand},
    valet_common::hooks::HookHandler,
    valet_events::{Listener, ListenerSpec},
};

use crate::{
    error::{Context, Error, Result},
    exec::{ExecOutput, exec},
    host::{HostStats, PluginHost, PluginKind},
    manifest::{ScriptManifest, discover},
    plugin::{
        CommandProvider, EventProvider, HookProvider, Plugin, PluginInfo, PluginRegistrar,
    },
};

/// A language runtime able to evaluate script plugins.
#[async_trait]
pub trait ScriptBackend: Send + Sync {
    /// Short name used in logs.
    fn name(&self) -> &str;

    /// Entry-file extensions this backend evaluates, without the dot.
    fn extensions(&self) -> &[&str];

    /// Evaluate `source`. Everything the script registers goes through `api`.
    async fn load(&self, manifest: &ScriptManifest, source: &str, api: ScriptApi) -> anyhow::Result<()>;

    /// Release whatever the backend holds for `plugin`.
    async fn unload(&self, _plugin: &str) -> anyhow::Result<()> {
        Ok(())
    }
}

// ── Host API ────────────────────────────────────────────────────────────────

#[derive(Clone)]
enum Registration {
    Command {
        name: String,
        description: String,
        handler: Arc<dyn CommandHandler>,
    },
    Listener {
        spec: ListenerSpec,
        handler: Arc<dyn Listener>,
    },
    Hook(Arc<dyn HookHandler>),
}

/// Host machine facts exposed to scripts.
#[derive(Debug, Clone, Serialize)]
pub struct SystemInfo {
    pub os: Option<String>,
    pub os_version: Option<String>,
    pub kernel_version: Option<String>,
    pub hostname: Option<String>,
    pub cpu_count: usize,
    pub total_memory: u64,
    pub available_memory: u64,
    /// Resident memory of this process in bytes.
    pub process_memory: u64,
}

impl SystemInfo {
    pub fn collect() -> Self {
        let sys = System::new_all();
        let total = sys.total_memory();
        // available_memory() is 0 on some platforms.
        let available = match sys.available_memory() {
            0 => total.saturating_sub(sys.used_memory()),
            v => v,
        };
        let process_memory = sysinfo::get_current_pid()
            .ok()
            .and_then(|pid| sys.process(pid))
            .map(|p| p.memory())
            .unwrap_or(0);
        Self {
            os: System::name(),
            os_version: System::os_version(),
            kernel_version: System::kernel_version(),
            hostname: System::host_name(),
            cpu_count: sys.cpus().len(),
            total_memory: total,
            available_memory: available,
            process_memory,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RuntimeInfo {
    pub version: String,
    pub uptime_secs: u64,
    pub plugins_loaded: usize,
}

/// Functions the host exposes to one script plugin.
#[derive(Clone)]
pub struct ScriptApi {
    plugin: String,
    pending: Arc<Mutex<Vec<Registration>>>,
    stats: Arc<HostStats>,
}

impl ScriptApi {
    fn new(plugin: &str, stats: Arc<HostStats>) -> Self {
        Self {
            plugin: plugin.to_string(),
            pending: Arc::default(),
            stats,
        }
    }

    pub fn plugin(&self) -> &str {
        &self.plugin
    }

    fn push(&self, registration: Registration) {
        self.pending
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(registration);
    }

    fn take(&self) -> Vec<Registration> {
        std::mem::take(&mut *self.pending.lock().unwrap_or_else(|e| e.into_inner()))
    }

    pub fn register_command(&self, name: &str, description: &str, handler: Arc<dyn CommandHandler>) {
        self.push(Registration::Command {
            name: name.to_string(),
            description: description.to_string(),
            handler,
        });
    }

    pub fn command<F, Fut>(&self, name: &str, description: &str, f: F)
    where
        F: Fn(CommandContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        self.register_command(name, description, Arc::new(FnCommand::new(f)));
    }

    pub fn register_listener(&self, spec: ListenerSpec, handler: Arc<dyn Listener>) {
        self.push(Registration::Listener { spec, handler });
    }

    pub fn register_hook(&self, handler: Arc<dyn HookHandler>) {
        self.push(Registration::Hook(handler));
    }

    /// Log on the script's behalf. Unknown levels log at info.
    pub fn log(&self, level: &str, message: &str) {
        let plugin = self.plugin.as_str();
        match level.to_ascii_lowercase().as_str() {
            "trace" => trace!(plugin, "{message}"),
            "debug" => debug!(plugin, "{message}"),
            "warn" | "warning" => warn!(plugin, "{message}"),
            "error" => error!(plugin, "{message}"),
            _ => info!(plugin, "{message}"),
        }
    }

    pub fn system_info(&self) -> SystemInfo {
        SystemInfo::collect()
    }

    pub fn runtime_info(&self) -> RuntimeInfo {
        RuntimeInfo {
            version: env!("CARGO_PKG_VERSION").to_string(),
            uptime_secs: self.stats.uptime().as_secs(),
            plugins_loaded: self.stats.loaded(),
        }
    }

    /// Run a subprocess; `timeout` defaults to two minutes.
    pub async fn exec(&self, program: &str, args: &[String], timeout: Option<Duration>) -> Result<ExecOutput> {
        debug!(plugin = %self.plugin, program, "script exec");
        exec(program, args, timeout).await
    }
}

// ── ScriptPlugin ────────────────────────────────────────────────────────────

pub struct ScriptPlugin {
    manifest: ScriptManifest,
    backend: Arc<dyn ScriptBackend>,
    stats: Arc<HostStats>,
    registrations: Mutex<Vec<Registration>>,
}

impl ScriptPlugin {
    pub fn new(manifest: ScriptManifest, backend: Arc<dyn ScriptBackend>, stats: Arc<HostStats>) -> Self {
        Self {
            manifest,
            backend,
            stats,
            registrations: Mutex::new(Vec::new()),
        }
    }

    fn registrations(&self) -> Vec<Registration> {
        self.registrations
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }
}

#[async_trait]
impl Plugin for ScriptPlugin {
    fn info(&self) -> PluginInfo {
        self.manifest.info()
    }

    async fn initialize(&self) -> anyhow::Result<()> {
        let path = self.manifest.entry_path();
        let source = tokio::fs::read_to_string(&path).await?;
        let api = ScriptApi::new(&self.manifest.name, Arc::clone(&self.stats));
        self.backend
            .load(&self.manifest, &source, api.clone())
            .await?;
        let registrations = api.take();
        debug!(
            plugin = %self.manifest.name,
            backend = self.backend.name(),
            registrations = registrations.len(),
            "script evaluated"
        );
        *self.registrations.lock().unwrap_or_else(|e| e.into_inner()) = registrations;
        Ok(())
    }

    async fn shutdown(&self) -> anyhow::Result<()> {
        self.backend.unload(&self.manifest.name).await
    }

    fn commands(&self) -> Option<&dyn CommandProvider> {
        Some(self)
    }

    fn events(&self) -> Option<&dyn EventProvider> {
        Some(self)
    }

    fn hooks(&self) -> Option<&dyn HookProvider> {
        Some(self)
    }
}

impl CommandProvider for ScriptPlugin {
    fn register_commands(&self, registrar: &PluginRegistrar) -> Result<()> {
        for registration in self.registrations() {
            if let Registration::Command {
                name,
                description,
                handler,
            } = registration
            {
                registrar.register_command(&name, &description, handler)?;
            }
        }
        Ok(())
    }
}

impl EventProvider for ScriptPlugin {
    fn register_listeners(&self, registrar: &PluginRegistrar) -> Result<()> {
        for registration in self.registrations() {
            if let Registration::Listener { spec, handler } = registration {
                registrar.register_listener(spec, handler)?;
            }
        }
        Ok(())
    }
}

impl HookProvider for ScriptPlugin {
    fn register_hooks(&self, registrar: &PluginRegistrar) -> Result<()> {
        for registration in self.registrations() {
            if let Registration::Hook(handler) = registration {
                registrar.register_hook(handler)?;
            }
        }
        Ok(())
    }
}

// ── ScriptHost ──────────────────────────────────────────────────────────────

/// Outcome of [`ScriptHost::load_dir`].
#[derive(Debug, Default)]
pub struct LoadReport {
    pub loaded: Vec<String>,
    pub failed: Vec<(String, Error)>,
}

/// Backends by extension, and the loader that pairs manifests with them.
#[derive(Default)]
pub struct ScriptHost {
    backends: Vec<Arc<dyn ScriptBackend>>,
}

impl ScriptHost {
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_backend(mut self, backend: Arc<dyn ScriptBackend>) -> Self {
        self.backends.push(backend);
        self
    }

    pub fn has_backends(&self) -> bool {
        !self.backends.is_empty()
    }

    pub fn backend_for(&self, extension: &str) -> Option<Arc<dyn ScriptBackend>> {
        self.backends
            .iter()
            .find(|b| b.extensions().iter().any(|e| e.eq_ignore_ascii_case(extension)))
            .cloned()
    }

    /// Load one plugin directory into `host`.
    pub async fn load(&self, host: &PluginHost, dir: &Path) -> Result<String> {
        let manifest = ScriptManifest::load(dir)?;
        self.register(host, manifest).await
    }

    async fn register(&self, host: &PluginHost, manifest: ScriptManifest) -> Result<String> {
        let extension = manifest.extension().unwrap_or_default().to_string();
        let backend = self
            .backend_for(&extension)
            .ok_or(Error::NoBackend { extension })?;
        let name = manifest.name.clone();
        let plugin = ScriptPlugin::new(manifest, backend, host.stats());
        host.register(Arc::new(plugin), PluginKind::Script).await?;
        Ok(name)
    }

    /// Load every plugin under `root`. One plugin failing does not stop the
    /// others.
    pub async fn load_dir(&self, host: &PluginHost, root: &Path) -> LoadReport {
        let discovered = discover(root);
        let mut report = LoadReport::default();
        for e in discovered.errors {
            report.failed.push((root.display().to_string(), e));
        }
        for manifest in discovered.manifests {
            let name = manifest.name.clone();
            match self.register(host, manifest).await {
                Ok(name) => report.loaded.push(name),
                Err(e) => {
                    warn!(plugin = %name, error = %e, "script plugin failed to load");
                    report.failed.push((name, e));
                },
            }
        }
        info!(
            path = %root.display(),
            loaded = report.loaded.len(),
            failed = report.failed.len(),
            "script plugins loaded"
        );
        report
    }
}

/// Read a file relative to a plugin directory, for backends that support
/// `require`-style includes.
pub fn read_plugin_file(manifest: &ScriptManifest, relative: &str) -> Result<String> {
    let relative_path = Path::new(relative);
    let escapes = relative_path.is_absolute()
        || relative_path
            .components()
            .any(|c| matches!(c, std::path::Component::ParentDir));
    if escapes {
        return Err(Error::message(format!(
            "plugin '{}' may not read outside its directory",
            manifest.name
        )));
    }
    let path = manifest.dir.join(relative_path);
    std::fs::read_to_string(&path).with_context(|| format!("failed to read {}", path.display()))
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use {
        super::*,
        crate::{
            manifest::MANIFEST_FILE,
            testing::{fixture, own_message},
        },
        tokio_util::sync::CancellationToken,
        valet_common::hooks::{HookPayload, HookPhase},
        valet_events::ListenerCategory,
    };

    /// Line-oriented toy language:
    /// `command <name> <reply...>`, `listen <name>`, `hook <name>`, `fail`.
    struct LineBackend {
        unloaded: Mutex<Vec<String>>,
    }

    impl LineBackend {
        fn new() -> Arc<Self> {
            Arc::new(Self {
                unloaded: Mutex::new(Vec::new()),
            })
        }
    }

    #[async_trait]
    impl ScriptBackend for LineBackend {
        fn name(&self) -> &str {
            "line"
        }

        fn extensions(&self) -> &[&str] {
            &["line"]
        }

        async fn load(&self, _: &ScriptManifest, source: &str, api: ScriptApi) -> anyhow::Result<()> {
            for line in source.lines() {
                let words: Vec<&str> = line.split_whitespace().collect();
                match words.as_slice() {
                    ["command", name, reply @ ..] => {
                        let reply = reply.join(" ");
                        api.command(name, "scripted", move |ctx| {
                            let reply = reply.clone();
                            async move {
                                ctx.respond(&reply).await?;
                                Ok(())
                            }
                        });
                    },
                    ["listen", name] => api.register_listener(
                        ListenerSpec::new(ListenerCategory::Message, *name),
                        Arc::new(valet_events::FnListener::new(|_, _| async { Ok(()) })),
                    ),
                    ["hook", name] => {
                        api.register_hook(Arc::new(crate::shell_hook::ShellHook::new(
                            *name,
                            "exit 0",
                            vec![HookPhase::AfterStop],
                            Duration::from_secs(5),
                        )));
                    },
                    ["fail"] => anyhow::bail!("script error on purpose"),
                    ["log", level, rest @ ..] => api.log(level, &rest.join(" ")),
                    _ => {},
                }
            }
            Ok(())
        }

        async fn unload(&self, plugin: &str) -> anyhow::Result<()> {
            self.unloaded.lock().unwrap().push(plugin.to_string());
            Ok(())
        }
    }

    fn write_plugin(root: &Path, name: &str, entry: &str, source: &str) {
        let dir = root.join(name);
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(
            dir.join(MANIFEST_FILE),
            format!(r#"{{"name":"{name}","version":"0.1.0","entry":"{entry}"}}"#),
        )
        .unwrap();
        std::fs::write(dir.join(entry), source).unwrap();
    }

    #[tokio::test]
    async fn script_registrations_reach_the_registries() {
        let fx = fixture();
        let host = PluginHost::new(fx.registries.clone());
        let backend = LineBackend::new();
        let scripts = ScriptHost::new().with_backend(backend.clone());
        let root = tempfile::tempdir().unwrap();
        write_plugin(
            root.path(),
            "greeter",
            "main.line",
            "log info loading\ncommand hi hello from script\nlisten greeter-watch\nhook greeter-bye",
        );

        let report = scripts.load_dir(&host, root.path()).await;
        assert_eq!(report.loaded, ["greeter"]);
        assert!(report.failed.is_empty());

        let reg = &fx.registries;
        assert_eq!(reg.router.commands_for("greeter").len(), 1);
        assert_eq!(reg.bus.listeners(ListenerCategory::Message)[0].owner, "greeter");
        assert_eq!(reg.hooks.handlers(HookPhase::AfterStop)[0].owner, "greeter");

        let handled = reg
            .router
            .execute(&own_message(".hi"), &CancellationToken::new())
            .await
            .unwrap();
        assert!(handled);
        assert_eq!(fx.sent.last_text(), "hello from script");

        // Disabling and re-enabling replays the recorded registrations.
        host.disable("greeter").await.unwrap();
        assert!(reg.router.commands_for("greeter").is_empty());
        host.enable("greeter").await.unwrap();
        assert_eq!(reg.router.commands_for("greeter").len(), 1);

        host.unload("greeter").await.unwrap();
        assert_eq!(*backend.unloaded.lock().unwrap(), ["greeter"]);
        assert!(reg.hooks.handlers(HookPhase::AfterStop).is_empty());
    }

    #[tokio::test]
    async fn failing_script_does_not_stop_the_others() {
        let fx = fixture();
        let host = PluginHost::new(fx.registries.clone());
        let scripts = ScriptHost::new().with_backend(LineBackend::new());
        let root = tempfile::tempdir().unwrap();
        write_plugin(root.path(), "a-broken", "main.line", "command x y\nfail");
        write_plugin(root.path(), "b-other-lang", "main.py", "print()");
        write_plugin(root.path(), "c-fine", "main.line", "command ok fine");

        let report = scripts.load_dir(&host, root.path()).await;
        assert_eq!(report.loaded, ["c-fine"]);
        assert_eq!(report.failed.len(), 2);
        assert!(
            report
                .failed
                .iter()
                .any(|(_, e)| matches!(e, Error::NoBackend { extension } if extension == "py"))
        );
        assert!(fx.registries.router.commands_for("a-broken").is_empty());
        assert_eq!(host.list().len(), 1);
    }

    #[tokio::test]
    async fn runtime_info_tracks_loaded_plugins() {
        let fx = fixture();
        let host = PluginHost::new(fx.registries.clone());
        let api = ScriptApi::new("probe", host.stats());
        assert_eq!(api.runtime_info().plugins_loaded, 0);
        assert_eq!(api.runtime_info().version, env!("CARGO_PKG_VERSION"));

        let scripts = ScriptHost::new().with_backend(LineBackend::new());
        let root = tempfile::tempdir().unwrap();
        write_plugin(root.path(), "one", "main.line", "");
        scripts.load(&host, &root.path().join("one")).await.unwrap();
        assert_eq!(api.runtime_info().plugins_loaded, 1);
    }

    #[tokio::test]
    async fn system_info_and_exec_are_available() {
        let fx = fixture();
        let host = PluginHost::new(fx.registries);
        let api = ScriptApi::new("probe", host.stats());
        let info = api.system_info();
        assert!(info.total_memory > 0);

        let out = api.exec("echo", &["hi".into()], None).await.unwrap();
        assert!(out.success);
        assert_eq!(out.stdout.trim(), "hi");
    }

    #[test]
    fn backend_lookup_ignores_case() {
        let scripts = ScriptHost::new().with_backend(LineBackend::new());
        assert!(scripts.backend_for("LINE").is_some());
        assert!(scripts.backend_for("lua").is_none());
        assert!(!ScriptHost::new().has_backends());
    }

    #[test]
    fn plugin_files_stay_inside_the_directory() {
        let root = tempfile::tempdir().unwrap();
        write_plugin(root.path(), "p", "main.line", "");
        std::fs::write(root.path().join("p/lib.line"), "shared").unwrap();
        let manifest = ScriptManifest::load(&root.path().join("p")).unwrap();
        assert_eq!(read_plugin_file(&manifest, "lib.line").unwrap(), "shared");
        assert!(read_plugin_file(&manifest, "../secret").is_err());
    }

    #[tokio::test]
    async fn scripted_hooks_run_in_the_chain() {
        let fx = fixture();
        let host = PluginHost::new(fx.registries.clone());
        let scripts = ScriptHost::new().with_backend(LineBackend::new());
        let root = tempfile::tempdir().unwrap();
        write_plugin(root.path(), "bye", "main.line", "hook bye-hook");
        scripts.load_dir(&host, root.path()).await;

        fx.registries
            .hooks
            .run(&HookPayload::AfterStop, &CancellationToken::new())
            .await
            .unwrap();
        let stats = fx.registries.hooks.handler_stats("bye-hook").unwrap();
        assert_eq!(stats.call_count.load(std::sync::atomic::Ordering::Relaxed), 1);
    }
}
