//! Discovery strategies.
//!
//! Each strategy is an independent lookup of one user id against the
//! protocol client. Besides the target, a strategy hands back every other
//! user it happened to see so the resolver can warm the cache with them.

use {
    serde::{Deserialize, Serialize},
    valet_common::{StrategyKind, UserInfo},
};

use crate::directory::{InputPeer, PeerDirectory};

/// Page sizes used by the list-scanning strategies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Limits {
    pub dialogs: usize,
    pub search: usize,
    pub participants: usize,
    pub channel_dialogs: usize,
    pub channel_dialogs_extended: usize,
}

impl Default for Limits {
    fn default() -> Self {
        Self {
            dialogs: 200,
            search: 10,
            participants: 200,
            channel_dialogs: 100,
            channel_dialogs_extended: 500,
        }
    }
}

/// What a strategy has to work with besides the user id.
pub struct LookupContext<'a> {
    pub directory: &'a dyn PeerDirectory,
    pub limits: Limits,
    /// Group the user is known to belong to.
    pub group: Option<&'a InputPeer>,
    /// A message the user is known to have sent, as `(chat, message id)`.
    pub message: Option<(&'a InputPeer, i32)>,
}

/// Outcome of a strategy that reached the platform.
#[derive(Debug, Default)]
pub struct Discovery {
    pub target: Option<UserInfo>,
    pub seen: Vec<UserInfo>,
}

impl Discovery {
    fn single(user: Option<UserInfo>) -> Self {
        Self {
            target: user,
            seen: Vec::new(),
        }
    }

    fn scan(user_id: i64, users: Vec<UserInfo>) -> Self {
        let target = users.iter().find(|u| u.id == user_id).cloned();
        Self {
            target,
            seen: users,
        }
    }
}

/// Whether `kind` can run with what `ctx` provides.
pub fn applies(kind: StrategyKind, ctx: &LookupContext<'_>) -> bool {
    match kind {
        StrategyKind::Participant | StrategyKind::MemberSearch => ctx.group.is_some(),
        StrategyKind::Message => ctx.message.is_some(),
        StrategyKind::Direct
        | StrategyKind::Dialogs
        | StrategyKind::Contacts
        | StrategyKind::Search => true,
    }
}

/// Run one strategy. Callers check [`applies`] first.
pub async fn run(
    kind: StrategyKind,
    user_id: i64,
    ctx: &LookupContext<'_>,
) -> anyhow::Result<Discovery> {
    match kind {
        StrategyKind::Direct => direct(user_id, ctx).await,
        StrategyKind::Dialogs => dialogs(user_id, ctx).await,
        StrategyKind::Contacts => contacts(user_id, ctx).await,
        StrategyKind::Search => search(user_id, ctx).await,
        StrategyKind::Participant => participant(user_id, ctx).await,
        StrategyKind::MemberSearch => member_search(user_id, ctx).await,
        StrategyKind::Message => from_message(user_id, ctx).await,
    }
}

async fn direct(user_id: i64, ctx: &LookupContext<'_>) -> anyhow::Result<Discovery> {
    Ok(Discovery::single(ctx.directory.user_by_id(user_id).await?))
}

async fn dialogs(user_id: i64, ctx: &LookupContext<'_>) -> anyhow::Result<Discovery> {
    let page = ctx.directory.dialogs(ctx.limits.dialogs).await?;
    Ok(Discovery::scan(user_id, page.users))
}

async fn contacts(user_id: i64, ctx: &LookupContext<'_>) -> anyhow::Result<Discovery> {
    Ok(Discovery::scan(user_id, ctx.directory.contacts().await?))
}

async fn search(user_id: i64, ctx: &LookupContext<'_>) -> anyhow::Result<Discovery> {
    let found = ctx
        .directory
        .search(&user_id.to_string(), ctx.limits.search)
        .await?;
    Ok(Discovery::scan(user_id, found))
}

async fn participant(user_id: i64, ctx: &LookupContext<'_>) -> anyhow::Result<Discovery> {
    let Some(group) = ctx.group else {
        anyhow::bail!("no group context");
    };
    Ok(Discovery::single(
        ctx.directory.group_participant(group, user_id).await?,
    ))
}

async fn member_search(user_id: i64, ctx: &LookupContext<'_>) -> anyhow::Result<Discovery> {
    let Some(group) = ctx.group else {
        anyhow::bail!("no group context");
    };
    let members = ctx
        .directory
        .group_members(group, &user_id.to_string(), ctx.limits.participants)
        .await?;
    let mut discovery = Discovery::scan(user_id, members);
    if discovery.target.is_none() {
        // Searching by id rarely hits; the recent member list often does.
        let recent = ctx
            .directory
            .group_members(group, "", ctx.limits.participants)
            .await?;
        discovery.target = recent.iter().find(|u| u.id == user_id).cloned();
        discovery.seen.extend(recent);
    }
    Ok(discovery)
}

async fn from_message(user_id: i64, ctx: &LookupContext<'_>) -> anyhow::Result<Discovery> {
    let Some((chat, message_id)) = ctx.message else {
        anyhow::bail!("no message context");
    };
    Ok(Discovery::single(
        ctx.directory
            .user_from_message(chat, message_id, user_id)
            .await?,
    ))
}
