use {
    chrono::{DateTime, TimeDelta, Utc},
    serde::{Deserialize, Serialize},
    valet_common::UserInfo,
};

/// A cached access hash and the display details seen alongside it.
///
/// Only valid while `now - refreshed_at` is inside the cache's expiry window;
/// a stale record counts as absent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IdentityRecord {
    pub id: i64,
    pub access_hash: i64,
    pub username: Option<String>,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub refreshed_at: DateTime<Utc>,
}

impl IdentityRecord {
    pub fn from_user(user: UserInfo, refreshed_at: DateTime<Utc>) -> Self {
        Self {
            id: user.id,
            access_hash: user.access_hash,
            username: user.username,
            first_name: user.first_name,
            last_name: user.last_name,
            refreshed_at,
        }
    }

    pub fn is_fresh(&self, now: DateTime<Utc>, expiry: TimeDelta) -> bool {
        now - self.refreshed_at < expiry
    }

    pub fn user(&self) -> UserInfo {
        UserInfo {
            id: self.id,
            access_hash: self.access_hash,
            username: self.username.clone(),
            first_name: self.first_name.clone(),
            last_name: self.last_name.clone(),
        }
    }
}
