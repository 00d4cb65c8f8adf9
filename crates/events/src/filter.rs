//! Inclusion filters on direction, chat kind and privilege.

use serde::{Deserialize, Serialize};

use valet_common::Message;

/// Which messages a listener wants to see.
///
/// With neither direction flag set the listener only sees outgoing
/// messages; setting both lets every direction through. Updates without a
/// message pass every filter.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ListenerFilter {
    pub groups_only: bool,
    pub privates_only: bool,
    pub outgoing_only: bool,
    pub incoming_only: bool,
    pub privileged_only: bool,
}

impl ListenerFilter {
    /// Accept both directions.
    #[must_use]
    pub fn any_direction() -> Self {
        Self {
            outgoing_only: true,
            incoming_only: true,
            ..Self::default()
        }
    }

    #[must_use]
    pub fn incoming() -> Self {
        Self {
            incoming_only: true,
            ..Self::default()
        }
    }

    #[must_use]
    pub fn outgoing() -> Self {
        Self {
            outgoing_only: true,
            ..Self::default()
        }
    }

    #[must_use]
    pub fn groups(mut self) -> Self {
        self.groups_only = true;
        self
    }

    #[must_use]
    pub fn privates(mut self) -> Self {
        self.privates_only = true;
        self
    }

    #[must_use]
    pub fn privileged(mut self) -> Self {
        self.privileged_only = true;
        self
    }

    /// Reason this filter can never match, if any.
    pub fn conflict(&self) -> Option<&'static str> {
        (self.groups_only && self.privates_only)
            .then_some("groups_only and privates_only are mutually exclusive")
    }

    /// Whether the message passes. `privileged` is decided by the bus.
    pub fn accepts(&self, message: &Message, privileged: bool) -> bool {
        let kind = message.chat_kind();
        if self.groups_only && !kind.is_group() {
            return false;
        }
        if self.privates_only && kind.is_group() {
            return false;
        }

        let direction_ok = match (self.outgoing_only, self.incoming_only) {
            (true, true) => true,
            (false, true) => !message.outgoing,
            (true, false) | (false, false) => message.outgoing,
        };
        if !direction_ok {
            return false;
        }

        !self.privileged_only || privileged
    }
}
