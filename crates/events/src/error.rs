use thiserror::Error;

use crate::event::ListenerCategory;

#[derive(Debug, Error)]
pub enum Error {
    #[error("listener '{name}' is already registered in the {category} category")]
    DuplicateName {
        category: ListenerCategory,
        name: String,
    },

    #[error("listener '{name}' has an invalid pattern: {source}")]
    InvalidPattern {
        name: String,
        #[source]
        source: regex::Error,
    },

    #[error("listener '{name}' has an invalid filter: {reason}")]
    InvalidFilter { name: String, reason: &'static str },

    #[error("dispatch cancelled")]
    Cancelled,
}

impl Error {
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }
}

pub type Result<T> = std::result::Result<T, Error>;
