//! Prefix-triggered commands on top of the event bus.
//!
//! [`CommandRouter`] owns one message listener that strips the configured
//! prefix, publishes the parsed [`valet_events::CommandEvent`], and runs the
//! registered handler between the before/after command hook chains.

pub mod context;
pub mod error;
pub mod outbound;
pub mod parse;
pub mod router;

pub use {
    context::{BACKGROUND_TIMEOUT, BackgroundTask, CommandContext},
    error::{Error, Result},
    outbound::Outbound,
    parse::parse_command,
    router::{CommandHandler, CommandInfo, CommandRouter, DEFAULT_PREFIX, FnCommand, ROUTER_LISTENER},
};
