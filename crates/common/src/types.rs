//! Transient event data shared by the bus, the router and the identity layer.
//!
//! Chat identifiers travel as a single signed integer. Positive values are
//! one-to-one chats with a user, small negative values are basic groups, and
//! values below `-CHANNEL_ID_OFFSET` are channels or supergroups.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Offset separating basic-group ids from channel ids in the signed encoding.
pub const CHANNEL_ID_OFFSET: i64 = 1_000_000_000_000;

// ── ChatKind ────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChatKind {
    Private,
    Group,
    Channel,
}

impl ChatKind {
    #[must_use]
    pub fn of(peer_id: i64) -> Self {
        if peer_id > 0 {
            Self::Private
        } else if peer_id > -CHANNEL_ID_OFFSET {
            Self::Group
        } else {
            Self::Channel
        }
    }

    /// Groups and channels both count as multi-member chats.
    #[must_use]
    pub fn is_group(self) -> bool {
        !matches!(self, Self::Private)
    }
}

impl fmt::Display for ChatKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Private => f.write_str("private"),
            Self::Group => f.write_str("group"),
            Self::Channel => f.write_str("channel"),
        }
    }
}

// ── PeerRef ─────────────────────────────────────────────────────────────────

/// A decoded peer identifier carrying the bare id of its kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", content = "id", rename_all = "snake_case")]
pub enum PeerRef {
    User(i64),
    Chat(i64),
    Channel(i64),
}

impl PeerRef {
    /// Decode a signed peer id. Zero, and ids whose bare form does not fit
    /// an `i64`, address nothing.
    #[must_use]
    pub fn decode(peer_id: i64) -> Option<Self> {
        match ChatKind::of(peer_id) {
            _ if peer_id == 0 => None,
            ChatKind::Private => Some(Self::User(peer_id)),
            ChatKind::Group => peer_id.checked_neg().map(Self::Chat),
            ChatKind::Channel => peer_id
                .checked_neg()?
                .checked_sub(CHANNEL_ID_OFFSET)
                .filter(|&id| id > 0)
                .map(Self::Channel),
        }
    }

    /// Saturates for bare ids outside the encodable range.
    #[must_use]
    pub fn encode(self) -> i64 {
        match self {
            Self::User(id) => id,
            Self::Chat(id) => id.saturating_neg(),
            Self::Channel(id) => id.saturating_add(CHANNEL_ID_OFFSET).saturating_neg(),
        }
    }

    #[must_use]
    pub fn kind(self) -> ChatKind {
        match self {
            Self::User(_) => ChatKind::Private,
            Self::Chat(_) => ChatKind::Group,
            Self::Channel(_) => ChatKind::Channel,
        }
    }
}

// ── UserInfo ────────────────────────────────────────────────────────────────

/// Identity details as the platform reports them, including the secret
/// access hash required to address the user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserInfo {
    pub id: i64,
    pub access_hash: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub first_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_name: Option<String>,
}

impl UserInfo {
    #[must_use]
    pub fn new(id: i64, access_hash: i64) -> Self {
        Self {
            id,
            access_hash,
            username: None,
            first_name: None,
            last_name: None,
        }
    }

    #[must_use]
    pub fn with_username(mut self, username: impl Into<String>) -> Self {
        self.username = Some(username.into());
        self
    }

    /// Best human-readable label: full name, then `@username`, then the id.
    #[must_use]
    pub fn display_name(&self) -> String {
        let full = [self.first_name.as_deref(), self.last_name.as_deref()]
            .into_iter()
            .flatten()
            .filter(|s| !s.is_empty())
            .collect::<Vec<_>>()
            .join(" ");
        if !full.is_empty() {
            return full;
        }
        match &self.username {
            Some(u) => format!("@{u}"),
            None => self.id.to_string(),
        }
    }
}

// ── Message ─────────────────────────────────────────────────────────────────

/// A structured chat message as delivered by the protocol client.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub id: i32,
    /// Signed peer id of the chat the message lives in.
    pub chat_id: i64,
    pub sender_id: i64,
    #[serde(default)]
    pub text: String,
    /// Sent by the account this agent runs as.
    #[serde(default)]
    pub outgoing: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reply_to: Option<i32>,
}

impl Message {
    #[must_use]
    pub fn chat_kind(&self) -> ChatKind {
        ChatKind::of(self.chat_id)
    }
}

// ── RawUpdate ───────────────────────────────────────────────────────────────

/// A protocol update that is not a new message (edits, reads, status, ...).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawUpdate {
    pub kind: String,
    #[serde(default)]
    pub data: serde_json::Value,
}

// ── StrategyKind ────────────────────────────────────────────────────────────

/// Discovery strategies used to find a user's access hash, in the order
/// they are configured.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StrategyKind {
    /// Look the user up by id alone.
    Direct,
    /// Scan the recent conversation list.
    Dialogs,
    /// Scan the contact list.
    Contacts,
    /// Full-text search with the id as query.
    Search,
    /// Ask a group for its participant record of the user.
    Participant,
    /// Search a group's member list for the id.
    MemberSearch,
    /// Fetch the user through a message they sent.
    Message,
}

impl StrategyKind {
    /// Default order for plain lookups.
    pub const DEFAULT_ORDER: &'static [StrategyKind] =
        &[Self::Direct, Self::Dialogs, Self::Contacts, Self::Search];

    /// Extra steps tried when the user is known to be in a group.
    pub const GROUP_ORDER: &'static [StrategyKind] = &[Self::Participant, Self::MemberSearch];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Direct => "direct",
            Self::Dialogs => "dialogs",
            Self::Contacts => "contacts",
            Self::Search => "search",
            Self::Participant => "participant",
            Self::MemberSearch => "member_search",
            Self::Message => "message",
        }
    }
}

impl fmt::Display for StrategyKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
