use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("invalid command prefix {prefix:?}: {reason}")]
    InvalidPrefix { prefix: String, reason: &'static str },

    #[error("invalid command name {name:?}")]
    InvalidName { name: String },

    #[error("command '{command}' failed: {source}")]
    Handler {
        command: String,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    /// The handler panicked; the panic was caught at the command boundary.
    #[error("command '{command}' panicked: {message}")]
    Panicked { command: String, message: String },

    #[error("command cancelled")]
    Cancelled,

    #[error(transparent)]
    Hooks(#[from] valet_common::Error),

    #[error(transparent)]
    Events(#[from] valet_events::Error),

    #[error(transparent)]
    Peers(#[from] valet_peers::Error),
}

impl Error {
    #[must_use]
    pub fn handler(command: impl Into<String>, source: anyhow::Error) -> Self {
        Self::Handler {
            command: command.into(),
            source: source.into(),
        }
    }

    /// True for shutdown-driven aborts from any layer.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        match self {
            Self::Cancelled => true,
            Self::Hooks(e) => e.is_cancelled(),
            Self::Events(e) => e.is_cancelled(),
            Self::Peers(e) => matches!(e, valet_peers::Error::Cancelled),
            _ => false,
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
