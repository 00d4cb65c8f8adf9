//! The builtin `core` plugin: help, plugin management and identity cache
//! maintenance.

use std::{
    fmt::Write as _,
    sync::{Arc, Weak},
};

use {
    anyhow::{Context as _, anyhow, bail},
    async_trait::async_trait,
    valet_commands::{CommandContext, CommandRouter},
};

use crate::{
    error::Result,
    host::PluginHost,
    plugin::{CommandProvider, Plugin, PluginInfo, PluginRegistrar},
};

pub const CORE_PLUGIN: &str = "core";

pub struct CorePlugin {
    host: Weak<PluginHost>,
}

impl CorePlugin {
    pub fn new(host: &Arc<PluginHost>) -> Self {
        Self {
            host: Arc::downgrade(host),
        }
    }
}

#[async_trait]
impl Plugin for CorePlugin {
    fn info(&self) -> PluginInfo {
        PluginInfo::new(CORE_PLUGIN, env!("CARGO_PKG_VERSION"))
            .with_description("Builtin help, plugin and peer cache commands")
    }

    fn commands(&self) -> Option<&dyn CommandProvider> {
        Some(self)
    }
}

impl CommandProvider for CorePlugin {
    fn register_commands(&self, registrar: &PluginRegistrar) -> Result<()> {
        let router = Arc::downgrade(registrar.router());
        registrar.command("help", "List commands, or describe one: help [command]", move |ctx| {
            let router = router.clone();
            async move { help(&ctx, &router).await }
        })?;

        let host = self.host.clone();
        registrar.command(
            "plugins",
            "Manage plugins: plugins [list|enable|disable] <name>",
            move |ctx| {
                let host = host.clone();
                async move { plugins(&ctx, &host).await }
            },
        )?;

        registrar.command(
            "peer",
            "Identity cache: peer info <id> | peer clear <id|all> | peer stats",
            |ctx| async move { peer(&ctx).await },
        )
    }
}

async fn help(ctx: &CommandContext, router: &Weak<CommandRouter>) -> anyhow::Result<()> {
    let router = router.upgrade().context("router is gone")?;
    let prefix = router.prefix();
    let text = match ctx.arg(0) {
        Some(name) => match router.describe(name) {
            Some(info) => format!("{prefix}{}: {}\n(from {})", info.name, info.description, info.owner),
            None => format!("No command named '{name}'."),
        },
        None => {
            let mut text = String::from("Commands:");
            for info in router.commands() {
                let _ = write!(text, "\n{prefix}{} - {}", info.name, info.description);
            }
            text
        },
    };
    ctx.respond(&text).await?;
    Ok(())
}

async fn plugins(ctx: &CommandContext, host: &Weak<PluginHost>) -> anyhow::Result<()> {
    let host = host.upgrade().context("plugin host is gone")?;
    let text = match (ctx.arg(0).unwrap_or("list"), ctx.arg(1)) {
        ("list", _) => {
            let mut text = String::from("Plugins:");
            for status in host.list() {
                let state = if status.enabled { "on" } else { "off" };
                let _ = write!(
                    text,
                    "\n[{state}] {} {} ({:?})",
                    status.info.name, status.info.version, status.kind
                );
            }
            text
        },
        ("enable", Some(name)) => match host.enable(name).await? {
            true => format!("Enabled {name}."),
            false => format!("{name} is already enabled."),
        },
        ("disable", Some(name)) => match host.disable(name).await? {
            true => format!("Disabled {name}."),
            false => format!("{name} is already disabled."),
        },
        (action @ ("enable" | "disable"), None) => bail!("usage: plugins {action} <name>"),
        (other, _) => bail!("unknown action '{other}'; use list, enable or disable"),
    };
    ctx.respond(&text).await?;
    Ok(())
}

fn parse_id(raw: Option<&str>) -> anyhow::Result<i64> {
    let raw = raw.ok_or_else(|| anyhow!("missing peer id"))?;
    raw.parse()
        .with_context(|| format!("'{raw}' is not a peer id"))
}

async fn peer(ctx: &CommandContext) -> anyhow::Result<()> {
    let resolver = ctx.resolver();
    let cache = resolver.cache();
    let text = match ctx.arg(0) {
        Some("info") => {
            let id = parse_id(ctx.arg(1))?;
            let failures = cache.failure_count(id);
            match cache.get(id) {
                Some(record) => {
                    let username = record.username.as_deref().unwrap_or("-");
                    format!(
                        "Peer {id}\nusername: {username}\nname: {}\nrefreshed: {}\nfailures: {failures}",
                        record.user().display_name(),
                        record.refreshed_at.to_rfc3339(),
                    )
                },
                None if resolver.is_blocked(id) => {
                    format!("Peer {id} is not cached and blocked after {failures} failures.")
                },
                None => format!("Peer {id} is not cached (failures: {failures})."),
            }
        },
        Some("clear") => match ctx.arg(1) {
            Some("all") => {
                let total = cache.stats().total;
                cache.clear().await;
                format!("Cleared {total} cached peers.")
            },
            raw => {
                let id = parse_id(raw)?;
                resolver.invalidate(id).await;
                format!("Cleared peer {id}; the next lookup starts fresh.")
            },
        },
        Some("stats") => {
            let stats = cache.stats();
            format!(
                "Cached: {}\nExpired: {}\nFailing: {}\nPersistent: {}",
                stats.total,
                stats.expired,
                stats.failing,
                if cache.has_store() { "yes" } else { "no" }
            )
        },
        Some(other) => bail!("unknown action '{other}'; use info, clear or stats"),
        None => bail!("usage: peer info <id> | peer clear <id|all> | peer stats"),
    };
    ctx.respond(&text).await?;
    Ok(())
}
