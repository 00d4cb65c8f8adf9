//! Priority-ordered, filterable routing of inbound updates to listeners.
//!
//! Listeners live in per-category lists ([`ListenerCategory::Raw`],
//! [`ListenerCategory::Message`], [`ListenerCategory::Command`]). A message
//! event first reaches every raw listener, then the message listeners whose
//! matcher and filter accept it.

pub mod bus;
pub mod error;
pub mod event;
pub mod filter;
pub mod matcher;

pub use {
    bus::{DispatchSummary, EventBus, FnListener, Listener, ListenerInfo, ListenerSpec},
    error::{Error, Result},
    event::{CommandEvent, Event, ListenerCategory},
    filter::ListenerFilter,
    matcher::Matcher,
};
