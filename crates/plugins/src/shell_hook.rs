//! Hook handler that runs an external command.
//!
//! The payload goes to the command's stdin as JSON and the phase name is
//! exported as `VALET_HOOK_PHASE`. Exit 0 lets the chain continue; any other
//! exit status, or running past the timeout, fails the hook with stderr as
//! the reason.

use std::{collections::HashMap, process::Stdio, time::Duration};

use {
    anyhow::{Context, bail},
    async_trait::async_trait,
    tokio::{io::AsyncWriteExt, process::Command},
    tracing::debug,
    valet_common::hooks::{HookHandler, HookPayload, HookPhase},
    valet_config::ShellHookConfig,
};

pub const PHASE_ENV: &str = "VALET_HOOK_PHASE";

/// Owner of the shell hooks declared in the config file.
pub const CONFIG_OWNER: &str = "config";

pub struct ShellHook {
    name: String,
    command: String,
    phases: Vec<HookPhase>,
    priority: i32,
    timeout: Duration,
    env: HashMap<String, String>,
}

impl ShellHook {
    pub fn new(
        name: impl Into<String>,
        command: impl Into<String>,
        phases: Vec<HookPhase>,
        timeout: Duration,
    ) -> Self {
        Self {
            name: name.into(),
            command: command.into(),
            phases,
            priority: 0,
            timeout,
            env: HashMap::new(),
        }
    }

    pub fn from_config(config: &ShellHookConfig) -> Self {
        Self {
            name: config.name.clone(),
            command: config.command.clone(),
            phases: config.phases.clone(),
            priority: config.priority,
            timeout: Duration::from_secs(config.timeout),
            env: config.env.clone(),
        }
    }

    #[must_use]
    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    #[must_use]
    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }
}

#[async_trait]
impl HookHandler for ShellHook {
    fn name(&self) -> &str {
        &self.name
    }

    fn phases(&self) -> &[HookPhase] {
        &self.phases
    }

    fn priority(&self) -> i32 {
        self.priority
    }

    async fn handle(&self, phase: HookPhase, payload: &HookPayload) -> anyhow::Result<()> {
        let payload_json = serde_json::to_string(payload).context("failed to serialize hook payload")?;
        debug!(hook = %self.name, %phase, payload_len = payload_json.len(), "spawning shell hook");

        let mut child = Command::new("sh")
            .arg("-c")
            .arg(&self.command)
            .envs(&self.env)
            .env(PHASE_ENV, phase.to_string())
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .with_context(|| format!("failed to spawn hook command: {}", self.command))?;

        // Commands that ignore stdin close it early.
        if let Some(mut stdin) = child.stdin.take()
            && let Err(e) = stdin.write_all(payload_json.as_bytes()).await
            && e.kind() != std::io::ErrorKind::BrokenPipe
        {
            return Err(e.into());
        }

        let output = tokio::time::timeout(self.timeout, child.wait_with_output())
            .await
            .with_context(|| format!("hook '{}' timed out after {:?}", self.name, self.timeout))?
            .with_context(|| format!("hook '{}' failed to complete", self.name))?;

        let exit_code = output.status.code().unwrap_or(-1);
        debug!(hook = %self.name, exit_code, "shell hook completed");
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            bail!("hook '{}' exited with code {exit_code}: {}", self.name, stderr.trim());
        }
        Ok(())
    }
}
