use std::fmt;

use {
    serde::{Deserialize, Serialize},
    valet_common::{Message, RawUpdate},
};

/// Listener lists kept by the bus.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ListenerCategory {
    Raw,
    Message,
    Command,
}

impl fmt::Display for ListenerCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Raw => f.write_str("raw"),
            Self::Message => f.write_str("message"),
            Self::Command => f.write_str("command"),
        }
    }
}

/// A command parsed out of a prefixed message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandEvent {
    pub name: String,
    pub args: Vec<String>,
    pub message: Message,
}

/// One inbound event. Created per update and dropped after dispatch.
#[derive(Debug, Clone, PartialEq)]
pub enum Event {
    Raw(RawUpdate),
    Message(Message),
    Command(CommandEvent),
}

impl Event {
    /// The chat message behind this event, if any.
    pub fn message(&self) -> Option<&Message> {
        match self {
            Self::Raw(_) => None,
            Self::Message(m) => Some(m),
            Self::Command(c) => Some(&c.message),
        }
    }

    pub fn text(&self) -> Option<&str> {
        self.message().map(|m| m.text.as_str())
    }

    /// The listener category this event is addressed to.
    pub fn category(&self) -> ListenerCategory {
        match self {
            Self::Raw(_) => ListenerCategory::Raw,
            Self::Message(_) => ListenerCategory::Message,
            Self::Command(_) => ListenerCategory::Command,
        }
    }
}
