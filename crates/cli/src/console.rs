//! Console transport: each stdin line is a message we sent to our own saved
//! messages chat, and everything the agent sends is printed.

use std::{
    io::Write,
    sync::{
        Arc, Mutex,
        atomic::{AtomicI32, Ordering},
    },
};

use {
    anyhow::Context,
    async_trait::async_trait,
    futures::Stream,
    tokio::io::{AsyncBufRead, AsyncBufReadExt, BufReader},
    tracing::info,
    valet_commands::Outbound,
    valet_common::{Message, UserInfo},
    valet_config::ValetConfig,
    valet_peers::{ChannelInfo, DialogPage, InputPeer, PeerDirectory},
    valet_runtime::{Agent, ProtocolClient, Update},
};

pub const CONSOLE_SELF_ID: i64 = 1;

/// A client with no network behind it. Only our own account exists.
pub struct ConsoleClient<W> {
    out: Mutex<W>,
    next_id: AtomicI32,
}

impl<W: Write + Send> ConsoleClient<W> {
    pub fn new(out: W) -> Self {
        Self {
            out: Mutex::new(out),
            next_id: AtomicI32::new(1),
        }
    }

    fn next_message_id(&self) -> i32 {
        self.next_id.fetch_add(1, Ordering::Relaxed)
    }

    fn print(&self, line: &str) -> anyhow::Result<()> {
        let mut out = self.out.lock().unwrap_or_else(|e| e.into_inner());
        writeln!(out, "{line}")?;
        out.flush()?;
        Ok(())
    }

    /// Turn one typed line into an outgoing message update.
    pub fn line_update(&self, text: String) -> Update {
        Update::message(Message {
            id: self.next_message_id(),
            chat_id: CONSOLE_SELF_ID,
            sender_id: CONSOLE_SELF_ID,
            text,
            outgoing: true,
            reply_to: None,
        })
    }

    fn me(&self, id: i64) -> Option<UserInfo> {
        (id == CONSOLE_SELF_ID).then(|| UserInfo::new(CONSOLE_SELF_ID, 0).with_username("me"))
    }
}

#[async_trait]
impl<W: Write + Send> PeerDirectory for ConsoleClient<W> {
    async fn user_by_id(&self, id: i64) -> anyhow::Result<Option<UserInfo>> {
        Ok(self.me(id))
    }

    async fn user_from_message(&self, _: &InputPeer, _: i32, id: i64) -> anyhow::Result<Option<UserInfo>> {
        Ok(self.me(id))
    }

    async fn dialogs(&self, _: usize) -> anyhow::Result<DialogPage> {
        Ok(DialogPage::default())
    }

    async fn contacts(&self) -> anyhow::Result<Vec<UserInfo>> {
        Ok(Vec::new())
    }

    async fn search(&self, _: &str, _: usize) -> anyhow::Result<Vec<UserInfo>> {
        Ok(Vec::new())
    }

    async fn group_participant(&self, _: &InputPeer, _: i64) -> anyhow::Result<Option<UserInfo>> {
        Ok(None)
    }

    async fn group_members(&self, _: &InputPeer, _: &str, _: usize) -> anyhow::Result<Vec<UserInfo>> {
        Ok(Vec::new())
    }

    async fn channel_by_id(&self, _: i64) -> anyhow::Result<Option<ChannelInfo>> {
        Ok(None)
    }
}

fn describe(peer: &InputPeer) -> String {
    match peer {
        InputPeer::SelfPeer => "me".into(),
        other => other
            .peer_id()
            .map_or_else(|| "?".into(), |id| id.to_string()),
    }
}

#[async_trait]
impl<W: Write + Send> Outbound for ConsoleClient<W> {
    async fn send_text(&self, peer: &InputPeer, text: &str, reply_to: Option<i32>) -> anyhow::Result<i32> {
        let id = self.next_message_id();
        let reply = reply_to.map(|r| format!(" (reply to #{r})")).unwrap_or_default();
        self.print(&format!("[{} #{id}]{reply} {text}", describe(peer)))?;
        Ok(id)
    }

    async fn edit_text(&self, peer: &InputPeer, id: i32, text: &str) -> anyhow::Result<()> {
        self.print(&format!("[{} #{id} edited] {text}", describe(peer)))
    }

    async fn delete(&self, peer: &InputPeer, id: i32) -> anyhow::Result<()> {
        self.print(&format!("[{} #{id} deleted]", describe(peer)))
    }
}

#[async_trait]
impl<W: Write + Send> ProtocolClient for ConsoleClient<W> {
    async fn connect(&self) -> anyhow::Result<i64> {
        Ok(CONSOLE_SELF_ID)
    }
}

/// Non-empty lines of `input` as updates, until EOF or a read error.
pub fn updates<R, W>(input: R, client: Arc<ConsoleClient<W>>) -> impl Stream<Item = Update>
where
    R: AsyncBufRead + Unpin,
    W: Write + Send,
{
    futures::stream::unfold((input.lines(), client), |(mut lines, client)| async move {
        loop {
            match lines.next_line().await {
                Ok(Some(line)) if line.trim().is_empty() => continue,
                Ok(Some(line)) => {
                    let update = client.line_update(line);
                    return Some((update, (lines, client)));
                },
                Ok(None) => return None,
                Err(e) => {
                    tracing::warn!(error = %e, "console read failed");
                    return None;
                },
            }
        }
    })
}

pub async fn run(config: ValetConfig) -> anyhow::Result<()> {
    let client = Arc::new(ConsoleClient::new(std::io::stdout()));
    let agent = Agent::new(config, Arc::clone(&client))
        .await
        .context("failed to build agent")?;
    agent.start().await?;
    info!(prefix = %agent.router().prefix(), "console ready, type commands on stdin");

    let input = updates(BufReader::new(tokio::io::stdin()), client);
    tokio::select! {
        handled = agent.run(input) => {
            let handled = handled?;
            info!(handled, "console input closed");
        },
        _ = tokio::signal::ctrl_c() => info!("interrupt received"),
    }
    agent.stop().await?;
    Ok(())
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use {super::*, futures::StreamExt, support::SharedBuf};

    mod support {
        use std::sync::{Arc, Mutex};

        /// Clonable in-memory writer.
        #[derive(Clone, Default)]
        pub struct SharedBuf(pub Arc<Mutex<Vec<u8>>>);

        impl std::io::Write for SharedBuf {
            fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
                self.0.lock().unwrap().extend_from_slice(buf);
                Ok(buf.len())
            }

            fn flush(&mut self) -> std::io::Result<()> {
                Ok(())
            }
        }

        impl SharedBuf {
            pub fn text(&self) -> String {
                String::from_utf8(self.0.lock().unwrap().clone()).unwrap()
            }
        }
    }

    #[tokio::test]
    async fn lines_become_outgoing_messages() {
        let client = Arc::new(ConsoleClient::new(Vec::new()));
        let input: &[u8] = b".help\n\n  \nhello\n";
        let updates: Vec<Update> = updates(input, client).collect().await;
        assert_eq!(updates.len(), 2);
        let Update::NewMessage { message, .. } = &updates[0] else {
            panic!("expected a message");
        };
        assert_eq!(message.text, ".help");
        assert!(message.outgoing);
        assert_eq!(message.chat_id, CONSOLE_SELF_ID);
    }

    #[tokio::test]
    async fn outbound_is_printed() {
        let buf = SharedBuf::default();
        let client = ConsoleClient::new(buf.clone());
        let id = client
            .send_text(&InputPeer::SelfPeer, "hi", Some(3))
            .await
            .unwrap();
        client.edit_text(&InputPeer::SelfPeer, id, "bye").await.unwrap();
        client.delete(&InputPeer::Chat { chat_id: 5 }, 9).await.unwrap();

        let text = buf.text();
        assert!(text.contains(&format!("[me #{id}] (reply to #3) hi")), "{text}");
        assert!(text.contains(&format!("[me #{id} edited] bye")));
        assert!(text.contains("[-5 #9 deleted]"));
    }

    #[tokio::test]
    async fn console_agent_answers_help() {
        let buf = SharedBuf::default();
        let client = Arc::new(ConsoleClient::new(buf.clone()));
        let mut config = ValetConfig::default();
        config.bot.plugins_dir = "/nonexistent/valet-plugins".into();
        let agent = Agent::new(config, Arc::clone(&client)).await.unwrap();
        agent.start().await.unwrap();

        let input: &[u8] = b".help\n";
        let handled = agent.run(updates(input, client)).await.unwrap();
        assert_eq!(handled, 1);
        assert!(buf.text().contains("edited] Commands:"), "{}", buf.text());
        agent.stop().await.unwrap();
    }
}
