use std::{
    collections::HashMap,
    future::Future,
    panic::AssertUnwindSafe,
    sync::{Arc, RwLock, Weak},
    time::Instant,
};

use {
    async_trait::async_trait,
    futures::{FutureExt, future::BoxFuture},
    serde::Serialize,
    tokio_util::sync::CancellationToken,
    tracing::{debug, error, info, warn},
    valet_common::{Message, hooks::{HookPayload, HookRegistry}},
    valet_events::{
        CommandEvent, Event, EventBus, ListenerCategory, ListenerFilter, ListenerSpec, Matcher,
        bus::panic_message,
    },
    valet_peers::PeerResolver,
};

use crate::{
    context::{CommandContext, Services},
    error::{Error, Result},
    outbound::Outbound,
    parse::{parse_command, raw_args},
};

/// Name of the single message listener the router keeps on the bus.
pub const ROUTER_LISTENER: &str = "command_router";
/// Priority of that listener; ordinary message listeners sit below it.
pub const ROUTER_PRIORITY: i32 = 100;
pub const DEFAULT_PREFIX: &str = ".";

// ── Handlers ────────────────────────────────────────────────────────────────

#[async_trait]
pub trait CommandHandler: Send + Sync {
    async fn call(&self, ctx: CommandContext) -> anyhow::Result<()>;
}

type CommandFn = dyn Fn(CommandContext) -> BoxFuture<'static, anyhow::Result<()>> + Send + Sync;

/// Closure-backed [`CommandHandler`].
pub struct FnCommand(Box<CommandFn>);

impl FnCommand {
    pub fn new<F, Fut>(f: F) -> Self
    where
        F: Fn(CommandContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        Self(Box::new(move |ctx| Box::pin(f(ctx))))
    }
}

#[async_trait]
impl CommandHandler for FnCommand {
    async fn call(&self, ctx: CommandContext) -> anyhow::Result<()> {
        (self.0)(ctx).await
    }
}

struct CommandEntry {
    description: String,
    owner: String,
    handler: Arc<dyn CommandHandler>,
}

/// A registered command, for listings such as `help`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CommandInfo {
    pub name: String,
    pub description: String,
    pub owner: String,
}

// ── Router ──────────────────────────────────────────────────────────────────

/// Global command registry plus the bus listener that feeds it.
pub struct CommandRouter {
    bus: Arc<EventBus>,
    hooks: Arc<HookRegistry>,
    services: Arc<Services>,
    commands: RwLock<HashMap<String, Arc<CommandEntry>>>,
    prefix: RwLock<String>,
    this: Weak<Self>,
}

impl CommandRouter {
    /// Build the router and install its listener for `prefix`.
    pub fn new(
        bus: Arc<EventBus>,
        hooks: Arc<HookRegistry>,
        resolver: Arc<PeerResolver>,
        outbound: Arc<dyn Outbound>,
        prefix: &str,
    ) -> Result<Arc<Self>> {
        let router = Arc::new_cyclic(|this| Self {
            bus,
            hooks,
            services: Arc::new(Services { resolver, outbound }),
            commands: RwLock::new(HashMap::new()),
            prefix: RwLock::new(String::new()),
            this: this.clone(),
        });
        router.set_prefix(prefix)?;
        Ok(router)
    }

    pub fn prefix(&self) -> String {
        self.prefix.read().unwrap_or_else(|e| e.into_inner()).clone()
    }

    /// Swap the router listener for one that strips `prefix`.
    ///
    /// The bus replaces the listener in one write, so each message is seen
    /// by exactly one of the old and new prefixes.
    pub fn set_prefix(&self, prefix: &str) -> Result<()> {
        if prefix.is_empty() {
            return Err(Error::InvalidPrefix {
                prefix: prefix.into(),
                reason: "must not be empty",
            });
        }
        if prefix.chars().any(char::is_whitespace) {
            return Err(Error::InvalidPrefix {
                prefix: prefix.into(),
                reason: "must not contain whitespace",
            });
        }

        let spec = ListenerSpec::new(ListenerCategory::Message, ROUTER_LISTENER)
            .owner(ROUTER_LISTENER)
            .matcher(Matcher::Prefix(prefix.to_owned()))
            .priority(ROUTER_PRIORITY)
            .filter(ListenerFilter::any_direction().privileged());
        let listener = Arc::new(RouterListener {
            router: self.this.clone(),
            prefix: prefix.to_owned(),
        });
        self.bus.replace(spec, listener)?;
        *self.prefix.write().unwrap_or_else(|e| e.into_inner()) = prefix.to_owned();
        info!(prefix, "command prefix set");
        Ok(())
    }

    pub fn parse(&self, text: &str) -> Option<(String, Vec<String>)> {
        parse_command(&self.prefix(), text)
    }

    pub fn is_command(&self, text: &str) -> bool {
        self.parse(text).is_some()
    }

    // ── Registry ────────────────────────────────────────────────────────────

    /// Register a command. A later registration under the same name wins.
    pub fn register(
        &self,
        name: &str,
        description: &str,
        owner: &str,
        handler: Arc<dyn CommandHandler>,
    ) -> Result<()> {
        if name.is_empty() || name.chars().any(char::is_whitespace) {
            return Err(Error::InvalidName { name: name.into() });
        }
        let entry = Arc::new(CommandEntry {
            description: description.into(),
            owner: owner.into(),
            handler,
        });
        let previous = self
            .commands
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .insert(name.to_owned(), entry);
        match previous {
            Some(old) => {
                info!(command = name, owner, previous_owner = %old.owner, "command replaced");
            },
            None => info!(command = name, owner, "command registered"),
        }
        Ok(())
    }

    /// Register a closure command.
    pub fn register_fn<F, Fut>(&self, name: &str, description: &str, owner: &str, f: F) -> Result<()>
    where
        F: Fn(CommandContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        self.register(name, description, owner, Arc::new(FnCommand::new(f)))
    }

    pub fn unregister(&self, name: &str) -> bool {
        self.commands
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .remove(name)
            .is_some()
    }

    /// Remove every command owned by `owner`.
    pub fn unregister_owner(&self, owner: &str) -> usize {
        let mut commands = self.commands.write().unwrap_or_else(|e| e.into_inner());
        let before = commands.len();
        commands.retain(|_, e| e.owner != owner);
        let removed = before - commands.len();
        if removed > 0 {
            debug!(owner, removed, "commands unregistered");
        }
        removed
    }

    /// Every command, sorted by name.
    pub fn commands(&self) -> Vec<CommandInfo> {
        let commands = self.commands.read().unwrap_or_else(|e| e.into_inner());
        let mut list: Vec<_> = commands
            .iter()
            .map(|(name, e)| CommandInfo {
                name: name.clone(),
                description: e.description.clone(),
                owner: e.owner.clone(),
            })
            .collect();
        list.sort_by(|a, b| a.name.cmp(&b.name));
        list
    }

    pub fn commands_for(&self, owner: &str) -> Vec<CommandInfo> {
        self.commands()
            .into_iter()
            .filter(|c| c.owner == owner)
            .collect()
    }

    pub fn describe(&self, name: &str) -> Option<CommandInfo> {
        let commands = self.commands.read().unwrap_or_else(|e| e.into_inner());
        commands.get(name).map(|e| CommandInfo {
            name: name.to_owned(),
            description: e.description.clone(),
            owner: e.owner.clone(),
        })
    }

    fn lookup(&self, name: &str) -> Option<Arc<CommandEntry>> {
        self.commands
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(name)
            .cloned()
    }

    // ── Execution ───────────────────────────────────────────────────────────

    /// Route a message with the current prefix. Returns whether a registered
    /// command ran; unknown commands and bare prefixes are not errors.
    pub async fn execute(&self, message: &Message, cancel: &CancellationToken) -> Result<bool> {
        let prefix = self.prefix();
        self.route(&prefix, message, cancel).await
    }

    async fn route(&self, prefix: &str, message: &Message, cancel: &CancellationToken) -> Result<bool> {
        let Some((name, args)) = parse_command(prefix, &message.text) else {
            return Ok(false);
        };
        let raw = raw_args(prefix, &message.text).to_owned();

        let event = Event::Command(CommandEvent {
            name: name.clone(),
            args: args.clone(),
            message: message.clone(),
        });
        self.bus.dispatch(&event, cancel).await?;

        let Some(entry) = self.lookup(&name) else {
            debug!(command = %name, "unknown command ignored");
            return Ok(false);
        };

        let before = HookPayload::BeforeCommand {
            command: name.clone(),
            args: args.clone(),
            message: message.clone(),
            plugin: entry.owner.clone(),
        };
        self.hooks.run(&before, cancel).await?;
        if cancel.is_cancelled() {
            return Err(Error::Cancelled);
        }

        let ctx = CommandContext::new(
            name.clone(),
            args.clone(),
            raw,
            message.clone(),
            entry.owner.clone(),
            cancel.clone(),
            Arc::clone(&self.services),
        );
        let started = Instant::now();
        let outcome = AssertUnwindSafe(entry.handler.call(ctx)).catch_unwind().await;
        let result = match outcome {
            Ok(Ok(())) => Ok(()),
            Ok(Err(e)) => {
                warn!(command = %name, error = %e, "command failed");
                Err(Error::handler(name.clone(), e))
            },
            Err(panic) => {
                let message = panic_message(&*panic);
                error!(command = %name, panic = %message, "command panicked");
                Err(Error::Panicked {
                    command: name.clone(),
                    message,
                })
            },
        };
        debug!(command = %name, elapsed_ms = started.elapsed().as_millis() as u64, ok = result.is_ok(), "command finished");

        let after = HookPayload::AfterCommand {
            command: name.clone(),
            args,
            message: message.clone(),
            plugin: entry.owner.clone(),
            error: result.as_ref().err().map(ToString::to_string),
        };
        if let Err(e) = self.hooks.run(&after, cancel).await {
            warn!(command = %name, error = %e, "after-command hooks failed");
        }
        result.map(|()| true)
    }
}

/// The bus-side half of the router, bound to one prefix.
struct RouterListener {
    router: Weak<CommandRouter>,
    prefix: String,
}

#[async_trait]
impl valet_events::Listener for RouterListener {
    async fn on_event(&self, event: &Event, cancel: &CancellationToken) -> anyhow::Result<()> {
        let (Some(router), Event::Message(message)) = (self.router.upgrade(), event) else {
            return Ok(());
        };
        router.route(&self.prefix, message, cancel).await?;
        Ok(())
    }
}
