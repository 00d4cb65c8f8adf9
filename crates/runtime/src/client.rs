//! The boundary to the chat protocol library.

use {
    async_trait::async_trait,
    serde::{Deserialize, Serialize},
    valet_commands::Outbound,
    valet_common::{Message, RawUpdate, UserInfo},
    valet_peers::PeerDirectory,
};

/// A connected account on the chat platform.
///
/// Identity lookups come from [`PeerDirectory`] and sending from
/// [`Outbound`]; this trait adds the session itself.
#[async_trait]
pub trait ProtocolClient: PeerDirectory + Outbound {
    /// Open the session and return the id of the account we run as.
    async fn connect(&self) -> anyhow::Result<i64>;

    async fn disconnect(&self) -> anyhow::Result<()> {
        Ok(())
    }
}

/// One inbound update, already decoded by the protocol client.
///
/// `users` carries every user the platform attached to the update. They warm
/// the identity cache before any listener runs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Update {
    NewMessage {
        message: Message,
        #[serde(default)]
        users: Vec<UserInfo>,
    },
    Raw {
        update: RawUpdate,
        #[serde(default)]
        users: Vec<UserInfo>,
    },
}

impl Update {
    pub fn message(message: Message) -> Self {
        Self::NewMessage {
            message,
            users: Vec::new(),
        }
    }

    pub fn raw(update: RawUpdate) -> Self {
        Self::Raw {
            update,
            users: Vec::new(),
        }
    }

    #[must_use]
    pub fn with_users(mut self, extra: Vec<UserInfo>) -> Self {
        match &mut self {
            Self::NewMessage { users, .. } | Self::Raw { users, .. } => users.extend(extra),
        }
        self
    }

    pub fn users(&self) -> &[UserInfo] {
        match self {
            Self::NewMessage { users, .. } | Self::Raw { users, .. } => users,
        }
    }
}
