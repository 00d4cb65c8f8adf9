use std::{future::Future, panic::AssertUnwindSafe, sync::Arc, time::Duration};

use {
    futures::FutureExt,
    tokio::task::JoinHandle,
    tokio_util::sync::CancellationToken,
    tracing::{debug, error, warn},
    uuid::Uuid,
    valet_common::Message,
    valet_events::bus::panic_message,
    valet_peers::{InputPeer, PeerResolver},
};

use crate::{error::Result, outbound::Outbound};

/// Upper bound on any task started with [`CommandContext::spawn_background`].
pub const BACKGROUND_TIMEOUT: Duration = Duration::from_secs(30);

/// Collaborators every command invocation can reach.
pub(crate) struct Services {
    pub resolver: Arc<PeerResolver>,
    pub outbound: Arc<dyn Outbound>,
}

/// Everything a command handler gets for one invocation.
#[derive(Clone)]
pub struct CommandContext {
    name: String,
    args: Vec<String>,
    raw_args: String,
    message: Message,
    owner: String,
    cancel: CancellationToken,
    services: Arc<Services>,
}

impl CommandContext {
    pub(crate) fn new(
        name: String,
        args: Vec<String>,
        raw_args: String,
        message: Message,
        owner: String,
        cancel: CancellationToken,
        services: Arc<Services>,
    ) -> Self {
        Self {
            name,
            args,
            raw_args,
            message,
            owner,
            cancel,
            services,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn args(&self) -> &[String] {
        &self.args
    }

    pub fn arg(&self, index: usize) -> Option<&str> {
        self.args.get(index).map(String::as_str)
    }

    /// Argument text with its original spacing.
    pub fn raw_args(&self) -> &str {
        &self.raw_args
    }

    pub fn message(&self) -> &Message {
        &self.message
    }

    /// Plugin that registered the command.
    pub fn owner(&self) -> &str {
        &self.owner
    }

    pub fn cancel_token(&self) -> &CancellationToken {
        &self.cancel
    }

    pub fn resolver(&self) -> &Arc<PeerResolver> {
        &self.services.resolver
    }

    pub fn outbound(&self) -> &Arc<dyn Outbound> {
        &self.services.outbound
    }

    /// The chat the command came from, addressable.
    pub async fn chat_peer(&self) -> Result<InputPeer> {
        Ok(self
            .services
            .resolver
            .addressable(self.message.chat_id, &self.cancel)
            .await?)
    }

    /// Edit our own command message in place, or reply to someone else's.
    /// Returns the id of the message now showing `text`.
    pub async fn respond(&self, text: &str) -> anyhow::Result<i32> {
        let peer = self.chat_peer().await?;
        if self.message.outgoing {
            self.services
                .outbound
                .edit_text(&peer, self.message.id, text)
                .await?;
            Ok(self.message.id)
        } else {
            self.services
                .outbound
                .send_text(&peer, text, Some(self.message.id))
                .await
        }
    }

    pub async fn reply(&self, text: &str) -> anyhow::Result<i32> {
        let peer = self.chat_peer().await?;
        self.services
            .outbound
            .send_text(&peer, text, Some(self.message.id))
            .await
    }

    /// Send to any peer id, resolving its access hash first.
    pub async fn send_to(&self, peer_id: i64, text: &str) -> anyhow::Result<i32> {
        let peer = self
            .services
            .resolver
            .addressable(peer_id, &self.cancel)
            .await?;
        self.services.outbound.send_text(&peer, text, None).await
    }

    /// Run `f` on its own task, detached from this invocation.
    ///
    /// The task gets a fresh cancellation token and is stopped after
    /// [`BACKGROUND_TIMEOUT`].
    pub fn spawn_background<F, Fut>(&self, name: &str, f: F) -> BackgroundTask
    where
        F: FnOnce(CancellationToken) -> Fut,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        spawn_task(format!("{}:{name}", self.name), BACKGROUND_TIMEOUT, f)
    }

    /// Respond, then delete the response once `delay` has passed.
    pub async fn respond_ephemeral(&self, text: &str, delay: Duration) -> anyhow::Result<BackgroundTask> {
        let message_id = self.respond(text).await?;
        let peer = self.chat_peer().await?;
        let outbound = Arc::clone(&self.services.outbound);
        Ok(spawn_task(
            format!("{}:ephemeral", self.name),
            delay + BACKGROUND_TIMEOUT,
            move |_| async move {
                tokio::time::sleep(delay).await;
                outbound.delete(&peer, message_id).await
            },
        ))
    }
}

// ── Background tasks ────────────────────────────────────────────────────────

/// Handle to a detached task.
pub struct BackgroundTask {
    pub id: Uuid,
    pub name: String,
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

impl BackgroundTask {
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }

    /// Wait for the task to end, however it ends.
    pub async fn join(self) {
        if let Err(e) = self.handle.await {
            warn!(task = %self.name, error = %e, "background task join failed");
        }
    }
}

pub(crate) fn spawn_task<F, Fut>(name: String, timeout: Duration, f: F) -> BackgroundTask
where
    F: FnOnce(CancellationToken) -> Fut,
    Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
{
    let id = Uuid::new_v4();
    let cancel = CancellationToken::new();
    let work = f(cancel.clone());
    let token = cancel.clone();
    let task_name = name.clone();

    let handle = tokio::spawn(async move {
        let outcome = tokio::select! {
            () = token.cancelled() => {
                debug!(task = %task_name, %id, "background task cancelled");
                return;
            },
            outcome = tokio::time::timeout(timeout, AssertUnwindSafe(work).catch_unwind()) => outcome,
        };
        match outcome {
            Ok(Ok(Ok(()))) => debug!(task = %task_name, %id, "background task finished"),
            Ok(Ok(Err(e))) => warn!(task = %task_name, %id, error = %e, "background task failed"),
            Ok(Err(panic)) => {
                error!(task = %task_name, %id, panic = %panic_message(&*panic), "background task panicked");
            },
            Err(_) => {
                token.cancel();
                warn!(task = %task_name, %id, timeout_secs = timeout.as_secs(), "background task timed out");
            },
        }
    });

    BackgroundTask {
        id,
        name,
        cancel,
        handle,
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicBool, Ordering};

    use super::*;

    #[tokio::test]
    async fn timeout_stops_the_task_and_cancels_its_token() {
        let seen = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&seen);
        let task = spawn_task("slow".into(), Duration::from_millis(20), move |token| async move {
            tokio::time::sleep(Duration::from_secs(10)).await;
            flag.store(true, Ordering::SeqCst);
            drop(token);
            Ok(())
        });
        let token = task.cancel.clone();
        task.join().await;
        assert!(token.is_cancelled());
        assert!(!seen.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn panics_stay_inside_the_task() {
        let explode = true;
        let task = spawn_task("boom".into(), BACKGROUND_TIMEOUT, move |_| async move {
            if explode {
                panic!("kaboom");
            }
            Ok(())
        });
        task.join().await;
    }

    #[tokio::test]
    async fn explicit_cancel_ends_the_task() {
        let task = spawn_task("idle".into(), BACKGROUND_TIMEOUT, |_| async {
            futures::future::pending::<()>().await;
            Ok(())
        });
        task.cancel();
        tokio::time::timeout(Duration::from_secs(1), task.join())
            .await
            .unwrap();
    }
}
