//! Shared types, error definitions, and the lifecycle hook registry used
//! across all valet crates.

pub mod error;
pub mod hooks;
pub mod types;

pub use {
    error::{Error, FromMessage, Result, panic_message},
    types::{ChatKind, Message, PeerRef, RawUpdate, StrategyKind, UserInfo},
};
