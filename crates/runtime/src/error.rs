use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("agent already started")]
    AlreadyStarted,

    #[error("agent is not running")]
    NotRunning,

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("protocol client failed to connect: {source}")]
    Connect {
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    #[error("start aborted by hook: {0}")]
    StartAborted(#[source] valet_common::Error),

    #[error("operation cancelled")]
    Cancelled,

    #[error(transparent)]
    Hooks(#[from] valet_common::Error),

    #[error(transparent)]
    Events(#[from] valet_events::Error),

    #[error(transparent)]
    Commands(#[from] valet_commands::Error),

    #[error(transparent)]
    Peers(#[from] valet_peers::Error),

    #[error(transparent)]
    Plugins(#[from] valet_plugins::Error),
}

impl Error {
    #[must_use]
    pub fn connect(source: anyhow::Error) -> Self {
        Self::Connect {
            source: source.into(),
        }
    }

    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        match self {
            Self::Cancelled => true,
            Self::Hooks(e) | Self::StartAborted(e) => e.is_cancelled(),
            Self::Events(e) => e.is_cancelled(),
            Self::Commands(e) => e.is_cancelled(),
            _ => false,
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
