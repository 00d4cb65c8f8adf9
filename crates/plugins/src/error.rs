use std::path::{Path, PathBuf};

use {thiserror::Error, valet_common::FromMessage};

#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),

    #[error("invalid plugin manifest at {path}: {reason}")]
    InvalidManifest { path: PathBuf, reason: String },

    #[error("plugin '{name}' is already loaded")]
    DuplicatePlugin { name: String },

    #[error("no plugin named '{name}'")]
    UnknownPlugin { name: String },

    #[error("plugin '{name}' cannot be disabled or unloaded")]
    Protected { name: String },

    #[error("'{name}' is reserved for the host")]
    Reserved { name: String },

    #[error("no script backend handles .{extension} files")]
    NoBackend { extension: String },

    #[error(transparent)]
    Commands(#[from] valet_commands::Error),

    #[error(transparent)]
    Events(#[from] valet_events::Error),

    #[error(transparent)]
    Hooks(#[from] valet_common::Error),

    #[error("{message}")]
    Message { message: String },

    #[error("{context}: {source}")]
    External {
        context: String,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },
}

impl Error {
    #[must_use]
    pub fn invalid_manifest(path: &Path, reason: impl Into<String>) -> Self {
        Self::InvalidManifest {
            path: path.to_path_buf(),
            reason: reason.into(),
        }
    }

    #[must_use]
    pub fn message(message: impl Into<String>) -> Self {
        Self::Message {
            message: message.into(),
        }
    }

    #[must_use]
    pub fn external(context: impl Into<String>, source: anyhow::Error) -> Self {
        Self::External {
            context: context.into(),
            source: source.into(),
        }
    }
}

impl FromMessage for Error {
    fn from_message(message: String) -> Self {
        Self::Message { message }
    }
}

pub type Result<T> = std::result::Result<T, Error>;

valet_common::impl_context!();
