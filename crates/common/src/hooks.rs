//! Lifecycle hook registry.
//!
//! Hooks are named callbacks bound to a [`HookPhase`]. Each phase owns an
//! independent chain sorted by priority (higher first, ties in registration
//! order). Running a chain is sequential and stops at the first failure; a
//! failure outside [`HookPhase::OnError`] additionally runs the error chain
//! once with the failing hook's details.

use std::{
    cmp::Reverse,
    collections::HashMap,
    fmt,
    future::Future,
    panic::AssertUnwindSafe,
    sync::{
        Arc, RwLock,
        atomic::{AtomicU64, Ordering},
    },
    time::{Duration, Instant},
};

use {
    async_trait::async_trait,
    futures::{FutureExt, future::BoxFuture},
    serde::{Deserialize, Serialize},
    tokio_util::sync::CancellationToken,
    tracing::{debug, info, warn},
};

use crate::{
    error::{Error, Result, panic_message},
    types::Message,
};

// ── HookPhase ───────────────────────────────────────────────────────────────

/// Lifecycle phases that hooks can subscribe to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HookPhase {
    BeforeStart,
    AfterStart,
    BeforeStop,
    AfterStop,
    BeforeCommand,
    AfterCommand,
    OnError,
}

impl fmt::Display for HookPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{self:?}")
    }
}

impl HookPhase {
    /// All variants, for iteration.
    pub const ALL: &'static [HookPhase] = &[
        Self::BeforeStart,
        Self::AfterStart,
        Self::BeforeStop,
        Self::AfterStop,
        Self::BeforeCommand,
        Self::AfterCommand,
        Self::OnError,
    ];
}

// ── HookPayload ─────────────────────────────────────────────────────────────

/// Typed data carried into each phase's chain.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "phase", rename_all = "snake_case")]
pub enum HookPayload {
    BeforeStart {
        version: String,
    },
    AfterStart {
        version: String,
        self_id: Option<i64>,
    },
    BeforeStop,
    AfterStop,
    BeforeCommand {
        command: String,
        args: Vec<String>,
        message: Message,
        plugin: String,
    },
    AfterCommand {
        command: String,
        args: Vec<String>,
        message: Message,
        plugin: String,
        error: Option<String>,
    },
    OnError {
        original_phase: HookPhase,
        hook_name: String,
        error: String,
    },
}

impl HookPayload {
    /// Returns the [`HookPhase`] that matches this payload.
    pub fn phase(&self) -> HookPhase {
        match self {
            Self::BeforeStart { .. } => HookPhase::BeforeStart,
            Self::AfterStart { .. } => HookPhase::AfterStart,
            Self::BeforeStop => HookPhase::BeforeStop,
            Self::AfterStop => HookPhase::AfterStop,
            Self::BeforeCommand { .. } => HookPhase::BeforeCommand,
            Self::AfterCommand { .. } => HookPhase::AfterCommand,
            Self::OnError { .. } => HookPhase::OnError,
        }
    }
}

// ── HookHandler trait ───────────────────────────────────────────────────────

/// Trait implemented by native, shell and script hook handlers.
#[async_trait]
pub trait HookHandler: Send + Sync {
    /// Unique name within each subscribed phase.
    fn name(&self) -> &str;

    /// Which phases this handler subscribes to.
    fn phases(&self) -> &[HookPhase];

    /// Priority for ordering. Higher values run first. Default is 0.
    fn priority(&self) -> i32 {
        0
    }

    /// Handle the phase. An error aborts the rest of the chain.
    async fn handle(&self, phase: HookPhase, payload: &HookPayload) -> anyhow::Result<()>;
}

type HookFn = dyn Fn(HookPayload) -> BoxFuture<'static, anyhow::Result<()>> + Send + Sync;

/// Closure-backed [`HookHandler`] bound to a single phase.
pub struct FnHook {
    name: String,
    phases: [HookPhase; 1],
    priority: i32,
    f: Box<HookFn>,
}

impl FnHook {
    pub fn new<F, Fut>(phase: HookPhase, name: impl Into<String>, priority: i32, f: F) -> Self
    where
        F: Fn(HookPayload) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        Self {
            name: name.into(),
            phases: [phase],
            priority,
            f: Box::new(move |payload| Box::pin(f(payload))),
        }
    }
}

#[async_trait]
impl HookHandler for FnHook {
    fn name(&self) -> &str {
        &self.name
    }

    fn phases(&self) -> &[HookPhase] {
        &self.phases
    }

    fn priority(&self) -> i32 {
        self.priority
    }

    async fn handle(&self, _phase: HookPhase, payload: &HookPayload) -> anyhow::Result<()> {
        (self.f)(payload.clone()).await
    }
}

// ── HookStats ───────────────────────────────────────────────────────────────

/// Per-handler call statistics.
#[derive(Default)]
pub struct HookStats {
    pub call_count: AtomicU64,
    pub failure_count: AtomicU64,
    pub total_latency_us: AtomicU64,
}

impl HookStats {
    pub fn record_success(&self, latency: Duration) {
        self.call_count.fetch_add(1, Ordering::Relaxed);
        self.total_latency_us
            .fetch_add(latency.as_micros() as u64, Ordering::Relaxed);
    }

    pub fn record_failure(&self, latency: Duration) {
        self.call_count.fetch_add(1, Ordering::Relaxed);
        self.failure_count.fetch_add(1, Ordering::Relaxed);
        self.total_latency_us
            .fetch_add(latency.as_micros() as u64, Ordering::Relaxed);
    }

    pub fn avg_latency(&self) -> Duration {
        let calls = self.call_count.load(Ordering::Relaxed);
        if calls == 0 {
            return Duration::ZERO;
        }
        let total = self.total_latency_us.load(Ordering::Relaxed);
        Duration::from_micros(total / calls)
    }
}

// ── Chain entries ───────────────────────────────────────────────────────────

#[derive(Clone)]
struct HookEntry {
    handler: Arc<dyn HookHandler>,
    owner: String,
    stats: Arc<HookStats>,
}

/// Snapshot of one registered hook, for listings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HookInfo {
    pub phase: HookPhase,
    pub name: String,
    pub owner: String,
    pub priority: i32,
}

// ── HookRegistry ────────────────────────────────────────────────────────────

/// Every phase's chain, guarded by a lock independent of other registries.
#[derive(Default)]
pub struct HookRegistry {
    chains: RwLock<HashMap<HookPhase, Vec<HookEntry>>>,
}

impl HookRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a handler under `owner` for every phase it subscribes to.
    ///
    /// Fails without touching any chain if the name is already taken in one
    /// of those phases.
    pub fn register(&self, owner: &str, handler: Arc<dyn HookHandler>) -> Result<()> {
        let mut phases: Vec<HookPhase> = Vec::with_capacity(handler.phases().len());
        for phase in handler.phases() {
            if !phases.contains(phase) {
                phases.push(*phase);
            }
        }
        if phases.is_empty() {
            return Err(Error::message(format!(
                "hook '{}' subscribes to no phase",
                handler.name()
            )));
        }

        let mut chains = self.chains.write().unwrap_or_else(|e| e.into_inner());
        for phase in &phases {
            let taken = chains
                .get(phase)
                .is_some_and(|chain| chain.iter().any(|e| e.handler.name() == handler.name()));
            if taken {
                return Err(Error::duplicate("hook", phase.to_string(), handler.name()));
            }
        }

        let stats = Arc::new(HookStats::default());
        for phase in phases {
            let chain = chains.entry(phase).or_default();
            chain.push(HookEntry {
                handler: Arc::clone(&handler),
                owner: owner.to_string(),
                stats: Arc::clone(&stats),
            });
            // Stable sort keeps registration order among equal priorities.
            chain.sort_by_key(|e| Reverse(e.handler.priority()));
        }
        info!(hook = handler.name(), owner, priority = handler.priority(), "hook registered");
        Ok(())
    }

    /// Register a closure for one phase.
    pub fn register_fn<F, Fut>(
        &self,
        owner: &str,
        phase: HookPhase,
        name: impl Into<String>,
        priority: i32,
        f: F,
    ) -> Result<()>
    where
        F: Fn(HookPayload) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        self.register(owner, Arc::new(FnHook::new(phase, name, priority, f)))
    }

    /// Remove a hook from one phase. Returns false if it was not registered.
    pub fn unregister(&self, phase: HookPhase, name: &str) -> bool {
        let mut chains = self.chains.write().unwrap_or_else(|e| e.into_inner());
        let Some(chain) = chains.get_mut(&phase) else {
            return false;
        };
        let before = chain.len();
        chain.retain(|e| e.handler.name() != name);
        before != chain.len()
    }

    /// Remove every hook registered by `owner`, across all phases.
    pub fn unregister_owner(&self, owner: &str) -> usize {
        let mut chains = self.chains.write().unwrap_or_else(|e| e.into_inner());
        let mut removed = 0;
        for chain in chains.values_mut() {
            let before = chain.len();
            chain.retain(|e| e.owner != owner);
            removed += before - chain.len();
        }
        if removed > 0 {
            debug!(owner, removed, "hooks unregistered");
        }
        removed
    }

    /// Returns true if any handlers are registered for the given phase.
    pub fn has_handlers(&self, phase: HookPhase) -> bool {
        self.chains
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(&phase)
            .is_some_and(|v| !v.is_empty())
    }

    /// The phase's chain in execution order.
    pub fn handlers(&self, phase: HookPhase) -> Vec<HookInfo> {
        self.snapshot(phase)
            .iter()
            .map(|e| HookInfo {
                phase,
                name: e.handler.name().to_string(),
                owner: e.owner.clone(),
                priority: e.handler.priority(),
            })
            .collect()
    }

    /// Stats for a named handler, shared across all its phases.
    pub fn handler_stats(&self, name: &str) -> Option<Arc<HookStats>> {
        let chains = self.chains.read().unwrap_or_else(|e| e.into_inner());
        chains
            .values()
            .flatten()
            .find(|e| e.handler.name() == name)
            .map(|e| Arc::clone(&e.stats))
    }

    fn snapshot(&self, phase: HookPhase) -> Vec<HookEntry> {
        self.chains
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(&phase)
            .cloned()
            .unwrap_or_default()
    }

    /// Run the chain for the payload's phase.
    ///
    /// Returns the first handler failure. Unless the phase is already
    /// [`HookPhase::OnError`], that failure also runs the error chain once;
    /// failures inside the error chain are only logged.
    pub async fn run(&self, payload: &HookPayload, cancel: &CancellationToken) -> Result<()> {
        let phase = payload.phase();
        let Err((name, error)) = self.run_chain(phase, payload, cancel).await? else {
            return Ok(());
        };

        let failure = Error::hook_failed(phase, name.clone(), error);
        if phase != HookPhase::OnError {
            let report = HookPayload::OnError {
                original_phase: phase,
                hook_name: name,
                error: failure.to_string(),
            };
            match self.run_chain(HookPhase::OnError, &report, cancel).await {
                Ok(Ok(())) => {},
                Ok(Err((handler, e))) => {
                    warn!(hook = %handler, error = %e, "error hook failed");
                },
                Err(e) => debug!(error = %e, "error chain interrupted"),
            }
        }
        Err(failure)
    }

    /// Outer error is cancellation; inner error names the failing handler.
    async fn run_chain(
        &self,
        phase: HookPhase,
        payload: &HookPayload,
        cancel: &CancellationToken,
    ) -> Result<std::result::Result<(), (String, anyhow::Error)>> {
        let chain = self.snapshot(phase);
        if chain.is_empty() {
            return Ok(Ok(()));
        }
        debug!(phase = %phase, count = chain.len(), "running hook chain");

        for entry in chain {
            if cancel.is_cancelled() {
                return Err(Error::Cancelled);
            }
            let start = Instant::now();
            let result = match AssertUnwindSafe(entry.handler.handle(phase, payload))
                .catch_unwind()
                .await
            {
                Ok(result) => result,
                Err(panic) => Err(anyhow::anyhow!("hook panicked: {}", panic_message(&*panic))),
            };
            let latency = start.elapsed();
            match result {
                Ok(()) => entry.stats.record_success(latency),
                Err(e) => {
                    entry.stats.record_failure(latency);
                    warn!(hook = entry.handler.name(), phase = %phase, error = %e, "hook handler failed");
                    return Ok(Err((entry.handler.name().to_string(), e)));
                },
            }
        }
        Ok(Ok(()))
    }
}
