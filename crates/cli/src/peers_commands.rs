use {
    anyhow::{Context, Result},
    chrono::{TimeDelta, Utc},
    clap::Subcommand,
    valet_config::ValetConfig,
    valet_peers::{IdentityRecord, IdentityStore, SqliteIdentityStore},
};

#[derive(Subcommand)]
pub enum PeersAction {
    /// List stored identities.
    List,
    /// Remove one identity by signed peer id.
    Forget { id: i64 },
    /// Remove identities older than the cache expiry.
    Purge {
        /// Remove every identity regardless of age.
        #[arg(long)]
        all: bool,
    },
}

pub async fn handle_peers(action: PeersAction, config: &ValetConfig) -> Result<()> {
    let store = open_store(config).await?;
    for line in run(action, &store, config.peers.cache_expiry_secs).await? {
        println!("{line}");
    }
    Ok(())
}

async fn open_store(config: &ValetConfig) -> Result<SqliteIdentityStore> {
    let path = config
        .peers
        .database
        .as_deref()
        .context("peers.database is not set; identities are kept in memory only")?;
    SqliteIdentityStore::open(path)
        .await
        .with_context(|| format!("failed to open identity store at {}", path.display()))
}

async fn run(action: PeersAction, store: &dyn IdentityStore, expiry_secs: u64) -> Result<Vec<String>> {
    match action {
        PeersAction::List => {
            let records = store.list().await?;
            if records.is_empty() {
                return Ok(vec!["No stored identities.".into()]);
            }
            let mut lines: Vec<String> = records.iter().map(describe).collect();
            lines.push(format!("{} identities", records.len()));
            Ok(lines)
        },
        PeersAction::Forget { id } => Ok(vec![if store.delete(id).await? {
            format!("Forgot {id}.")
        } else {
            format!("{id} is not stored.")
        }]),
        PeersAction::Purge { all: true } => {
            let removed = store.clear().await?;
            Ok(vec![format!("Removed {removed} identities.")])
        },
        PeersAction::Purge { all: false } => {
            let expiry = i64::try_from(expiry_secs)
                .ok()
                .and_then(TimeDelta::try_seconds)
                .context("peers.cache_expiry_secs is out of range")?;
            let removed = store.purge_older_than(Utc::now() - expiry).await?;
            Ok(vec![format!("Removed {removed} expired identities.")])
        },
    }
}

fn describe(record: &IdentityRecord) -> String {
    let username = record
        .username
        .as_deref()
        .map(|u| format!(" @{u}"))
        .unwrap_or_default();
    format!(
        "{:>14}  hash={:<20}{username}  refreshed {}",
        record.id,
        record.access_hash,
        record.refreshed_at.format("%Y-%m-%d %H:%M:%S UTC"),
    )
}
