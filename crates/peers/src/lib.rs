//! Peer identity resolution.
//!
//! The platform refuses most calls that address a user unless the request
//! carries that user's access hash. [`IdentityCache`] keeps the hashes we have
//! seen (optionally mirrored to sqlite), and [`PeerResolver`] runs the
//! configured discovery strategies when the cache has nothing fresh.

pub mod cache;
pub mod directory;
pub mod error;
pub mod record;
pub mod resolver;
pub mod store;
pub mod store_sqlite;
pub mod strategy;

pub use {
    cache::{CacheStats, IdentityCache},
    directory::{ChannelInfo, DialogPage, InputPeer, PeerDirectory},
    error::{Error, Result, StrategyFailure},
    record::IdentityRecord,
    resolver::{PeerResolver, ResolverConfig},
    store::IdentityStore,
    store_sqlite::SqliteIdentityStore,
};

/// Run database migrations for the peers crate.
///
/// Creates the `peer_identities` table. Call at startup when using
/// [`store_sqlite::SqliteIdentityStore::with_pool`].
pub async fn run_migrations(pool: &sqlx::SqlitePool) -> Result<()> {
    sqlx::migrate!("./migrations")
        .set_ignore_missing(true)
        .run(pool)
        .await?;
    Ok(())
}
