//! The agent: wires the event bus, hook registry, command router, identity
//! resolver and plugin host to a protocol client, and drives their
//! lifecycle.

pub mod agent;
pub mod client;
pub mod error;

pub use {
    agent::{Agent, AgentState, CONFIG_OWNER, VERSION},
    client::{ProtocolClient, Update},
    error::{Error, Result},
};
