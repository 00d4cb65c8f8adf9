//! Shared fixtures for the crate's unit tests.

use std::sync::{Arc, Mutex};

use {
    async_trait::async_trait,
    valet_commands::{CommandRouter, DEFAULT_PREFIX, Outbound},
    valet_common::{Message, UserInfo, hooks::HookRegistry},
    valet_events::EventBus,
    valet_peers::{
        ChannelInfo, DialogPage, IdentityCache, InputPeer, PeerDirectory, PeerResolver,
        ResolverConfig,
    },
};

use crate::plugin::Registries;

pub const SELF_ID: i64 = 1;

/// Knows only the users it was given.
#[derive(Default)]
pub struct Directory(pub Vec<UserInfo>);

impl Directory {
    fn find(&self, id: i64) -> Option<UserInfo> {
        self.0.iter().find(|u| u.id == id).cloned()
    }
}

#[async_trait]
impl PeerDirectory for Directory {
    async fn user_by_id(&self, id: i64) -> anyhow::Result<Option<UserInfo>> {
        Ok(self.find(id))
    }

    async fn user_from_message(&self, _: &InputPeer, _: i32, id: i64) -> anyhow::Result<Option<UserInfo>> {
        Ok(self.find(id))
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

/// Records every outbound call as a line of text.
#[derive(Default)]
pub struct Sent(Mutex<Vec<String>>);

impl Sent {
    pub fn lines(&self) -> Vec<String> {
        self.0.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    /// Text of the most recent send or edit.
    pub fn last_text(&self) -> String {
        self.lines()
            .last()
            .and_then(|l| l.split_once(" :: ").map(|(_, t)| t.to_string()))
            .unwrap_or_default()
    }

    fn push(&self, line: String) {
        self.0.lock().unwrap_or_else(|e| e.into_inner()).push(line);
    }
}

#[async_trait]
impl Outbound for Sent {
    async fn send_text(&self, _: &InputPeer, text: &str, reply_to: Option<i32>) -> anyhow::Result<i32> {
        self.push(format!("send reply={reply_to:?} :: {text}"));
        Ok(900)
    }

    async fn edit_text(&self, _: &InputPeer, id: i32, text: &str) -> anyhow::Result<()> {
        self.push(format!("edit {id} :: {text}"));
        Ok(())
    }

    async fn delete(&self, _: &InputPeer, id: i32) -> anyhow::Result<()> {
        self.push(format!("delete {id}"));
        Ok(())
    }
}

pub struct Fixture {
    pub registries: Registries,
    pub resolver: Arc<PeerResolver>,
    pub sent: Arc<Sent>,
}

pub fn fixture_with(users: Vec<UserInfo>) -> Fixture {
    let bus = Arc::new(EventBus::new());
    let hooks = Arc::new(HookRegistry::new());
    let resolver = Arc::new(PeerResolver::new(
        Arc::new(Directory(users)),
        Arc::new(IdentityCache::default()),
        ResolverConfig::default(),
    ));
    resolver.set_self_id(SELF_ID);
    let sent = Arc::new(Sent::default());
    let router = match CommandRouter::new(
        Arc::clone(&bus),
        Arc::clone(&hooks),
        Arc::clone(&resolver),
        Arc::clone(&sent) as Arc<dyn Outbound>,
        DEFAULT_PREFIX,
    ) {
        Ok(router) => router,
        Err(e) => panic!("router: {e}"),
    };
    Fixture {
        registries: Registries { router, bus, hooks },
        resolver,
        sent,
    }
}

pub fn fixture() -> Fixture {
    fixture_with(Vec::new())
}

pub fn registries() -> Registries {
    fixture().registries
}

/// Our own message in our saved-messages chat.
pub fn own_message(text: &str) -> Message {
    Message {
        id: 42,
        chat_id: SELF_ID,
        sender_id: SELF_ID,
        text: text.into(),
        outgoing: true,
        reply_to: None,
    }
}
