use std::fmt;

use {serde::Serialize, thiserror::Error, valet_common::StrategyKind};

/// Why one discovery strategy did not produce the user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StrategyFailure {
    pub strategy: StrategyKind,
    pub reason: String,
}

impl fmt::Display for StrategyFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.strategy, self.reason)
    }
}

fn summarize(attempts: &[StrategyFailure]) -> String {
    if attempts.is_empty() {
        return "no applicable strategy".into();
    }
    attempts
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

#[derive(Debug, Error)]
pub enum Error {
    /// Too many consecutive failures; no network call was made.
    #[error(
        "peer {peer_id} failed to resolve {failures} times in a row; re-establish contact with it \
         (for example, have it message you) or clear its cache entry"
    )]
    Blocked { peer_id: i64, failures: u32 },

    #[error("cannot resolve peer {peer_id} ({}); clear its cache entry and retry", summarize(.attempts))]
    Unresolved {
        peer_id: i64,
        attempts: Vec<StrategyFailure>,
    },

    #[error("channel {channel_id} was not found in any reachable dialog")]
    ChannelNotFound { channel_id: i64 },

    #[error("{peer_id} does not identify a peer")]
    InvalidPeer { peer_id: i64 },

    #[error("peer resolution cancelled")]
    Cancelled,

    #[error(transparent)]
    Database(#[from] sqlx::Error),

    #[error(transparent)]
    Migrate(#[from] sqlx::migrate::MigrateError),
}

impl Error {
    /// True when retrying immediately cannot help.
    #[must_use]
    pub fn is_blocked(&self) -> bool {
        matches!(self, Self::Blocked { .. })
    }
}

pub type Result<T> = std::result::Result<T, Error>;
