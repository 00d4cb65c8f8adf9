//! The protocol client operations the identity layer depends on.

use {
    async_trait::async_trait,
    serde::{Deserialize, Serialize},
    valet_common::{PeerRef, UserInfo},
};

/// A peer in the form the protocol accepts as a call target.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum InputPeer {
    /// The account the agent runs as.
    SelfPeer,
    User { user_id: i64, access_hash: i64 },
    Chat { chat_id: i64 },
    Channel { channel_id: i64, access_hash: i64 },
}

impl InputPeer {
    /// The signed peer id, when the target is not `SelfPeer`.
    pub fn peer_id(&self) -> Option<i64> {
        match self {
            Self::SelfPeer => None,
            Self::User { user_id, .. } => Some(PeerRef::User(*user_id).encode()),
            Self::Chat { chat_id } => Some(PeerRef::Chat(*chat_id).encode()),
            Self::Channel { channel_id, .. } => Some(PeerRef::Channel(*channel_id).encode()),
        }
    }
}

/// A channel or supergroup together with its access hash.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChannelInfo {
    pub id: i64,
    pub access_hash: i64,
    #[serde(default)]
    pub title: Option<String>,
}

impl ChannelInfo {
    pub fn input_peer(&self) -> InputPeer {
        InputPeer::Channel {
            channel_id: self.id,
            access_hash: self.access_hash,
        }
    }
}

/// Peers listed in the recent conversation list.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DialogPage {
    pub users: Vec<UserInfo>,
    pub channels: Vec<ChannelInfo>,
}

/// Identity lookups offered by the protocol client.
///
/// Every method is a single network round trip. `Ok(None)` or an empty list
/// means the platform answered but did not know the peer.
#[async_trait]
pub trait PeerDirectory: Send + Sync {
    /// Look a user up by id with a zero access hash.
    async fn user_by_id(&self, user_id: i64) -> anyhow::Result<Option<UserInfo>>;

    /// Fetch a user through a message it sent in `chat`.
    async fn user_from_message(
        &self,
        chat: &InputPeer,
        message_id: i32,
        user_id: i64,
    ) -> anyhow::Result<Option<UserInfo>>;

    async fn dialogs(&self, limit: usize) -> anyhow::Result<DialogPage>;

    async fn contacts(&self) -> anyhow::Result<Vec<UserInfo>>;

    async fn search(&self, query: &str, limit: usize) -> anyhow::Result<Vec<UserInfo>>;

    /// The group's membership record for one user.
    async fn group_participant(
        &self,
        group: &InputPeer,
        user_id: i64,
    ) -> anyhow::Result<Option<UserInfo>>;

    /// Group members matching `query`; an empty query lists recent members.
    async fn group_members(
        &self,
        group: &InputPeer,
        query: &str,
        limit: usize,
    ) -> anyhow::Result<Vec<UserInfo>>;

    async fn channel_by_id(&self, channel_id: i64) -> anyhow::Result<Option<ChannelInfo>>;
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn input_peer_ids_use_signed_encoding() {
        assert_eq!(InputPeer::SelfPeer.peer_id(), None);
        assert_eq!(
            InputPeer::User {
                user_id: 9,
                access_hash: 1
            }
            .peer_id(),
            Some(9)
        );
        assert_eq!(InputPeer::Chat { chat_id: 9 }.peer_id(), Some(-9));
        let channel = ChannelInfo {
            id: 1_234_567_890,
            access_hash: 3,
            title: None,
        };
        assert_eq!(channel.input_peer().peer_id(), Some(-1_001_234_567_890));
    }
}
