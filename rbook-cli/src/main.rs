use anyhow::{anyhow, Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

use rbook_core::{
    migrate_legacy, FlatFileStore, MigrationOutcome, PendingQueue, RosterTable, SqliteStore,
    StorageAdapter, StoreConfig,
};
use rbook_sync::{CacheManager, LAST_SYNC_KEY};

mod table;

#[derive(Parser)]
#[command(name = "rollbook")]
#[command(about = "Rollbook offline attendance store", long_about = None)]
struct Cli {
    /// Database file path
    #[arg(long, global = true, default_value = "rollbook.db")]
    db: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Show last sync time, pending count and expiry
    Status {
        /// Hours after which the last sync counts as expired
        #[arg(long, default_value = "24")]
        stale_hours: i64,
    },
    /// List queued submissions
    Pending {
        /// Print JSON instead of a table
        #[arg(long)]
        json: bool,
    },
    /// Show a cached roster
    Roster {
        dept: String,
        year: u8,
        section: String,
    },
    /// Show how long ago a cache key was refreshed
    Age {
        key: String,
    },
    /// Copy a legacy flat-file store into the database
    Migrate {
        /// Legacy snapshot file
        #[arg(long)]
        legacy: PathBuf,
    },
    /// Run an upload and a download pass against a REST backend
    #[cfg(feature = "http-sync")]
    Sync {
        /// Base URL of the REST API
        #[arg(long)]
        url: String,
        /// Identity token sent as a bearer credential
        #[arg(long)]
        token: String,
        /// Faculty id whose classes are synced
        #[arg(long)]
        faculty: String,
        /// Per-call timeout in seconds
        #[arg(long, default_value = "15")]
        timeout_secs: u64,
    },
}

fn open_store(path: &PathBuf) -> Result<Arc<SqliteStore>> {
    tracing::debug!(path = %path.display(), "Opening database");
    let config = StoreConfig::at_path(path);
    let store = SqliteStore::open(&config)
        .with_context(|| format!("Failed to open database {}", path.display()))?;
    Ok(Arc::new(store))
}

fn cache_manager(store: &Arc<SqliteStore>) -> CacheManager {
    let kv: Arc<dyn StorageAdapter> = store.clone();
    CacheManager::new(kv, RosterTable::new(store.clone()))
}

#[tokio::main]
async fn main() -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Status { stale_hours } => {
            let store = open_store(&cli.db)?;
            let cache = cache_manager(&store);
            let pending = PendingQueue::new(store.clone())
                .count()
                .context("Failed to count pending submissions")?;

            let last_sync = cache
                .get_timestamp(LAST_SYNC_KEY)
                .map_or_else(|| "never".to_string(), |ts| ts.to_rfc3339());
            let rows = [
                ("last sync", last_sync),
                ("last sync age", cache.age_description(LAST_SYNC_KEY)),
                ("expired", cache.is_stale(LAST_SYNC_KEY, stale_hours).to_string()),
                ("pending", pending.to_string()),
                ("cached classes", cache.cached_class_keys().len().to_string()),
            ];
            println!("{}", table::format_pairs(&rows));
        }

        Commands::Pending { json } => {
            let store = open_store(&cli.db)?;
            let pending = PendingQueue::new(store)
                .list()
                .context("Failed to list pending submissions")?;

            if json {
                println!("{}", serde_json::to_string_pretty(&pending)?);
            } else {
                println!("{}", table::format_pending_table(&pending));
            }
        }

        Commands::Roster { dept, year, section } => {
            let store = open_store(&cli.db)?;
            match cache_manager(&store).find_cached_roster(&dept, year, &section) {
                Some(roster) => println!("{}", table::format_roster_table(&roster)),
                None => println!("No cached roster for {}-{}-{}", dept, year, section),
            }
        }

        Commands::Age { key } => {
            let store = open_store(&cli.db)?;
            println!("{}: {}", key, cache_manager(&store).age_description(&key));
        }

        Commands::Migrate { legacy } => {
            if !legacy.exists() {
                return Err(anyhow!("Legacy store not found: {}", legacy.display()));
            }
            let config = StoreConfig::at_path(&cli.db);
            let legacy_store = FlatFileStore::open(&legacy, config.batch_chunk_size)
                .context("Failed to open legacy store")?;
            let target = SqliteStore::open(&config).context("Failed to open database")?;

            match migrate_legacy(&legacy_store, &target, config.batch_chunk_size)
                .context("Migration failed")?
            {
                MigrationOutcome::AlreadyComplete => println!("Migration already complete"),
                MigrationOutcome::Migrated { copied, skipped } => {
                    println!("Migrated {} keys ({} skipped)", copied, skipped)
                }
            }
        }

        #[cfg(feature = "http-sync")]
        Commands::Sync {
            url,
            token,
            faculty,
            timeout_secs,
        } => {
            use rbook_sync::{RestRemote, SyncConfig, SyncEngine};
            use std::time::Duration;

            let timeout = Duration::from_secs(timeout_secs);
            let store = open_store(&cli.db)?;
            let remote = Arc::new(RestRemote::new(url, token, timeout)?);
            let config = SyncConfig::new(faculty).with_remote_timeout(timeout);
            let engine = SyncEngine::new(store, remote, config)?;

            let upload = engine
                .sync_pending_submissions()
                .await
                .ok_or_else(|| anyhow!("Another sync is running"))??;
            println!(
                "Upload: {} synced, {} failed, {} overwritten",
                upload.synced, upload.failed, upload.conflicts
            );
            for err in &upload.errors {
                println!("  {}", err);
            }

            let download = engine
                .sync_rosters()
                .await
                .ok_or_else(|| anyhow!("Another sync is running"))?
                .context("Roster download failed")?;
            println!("Download: {} rosters cached", download.synced);
        }
    }

    Ok(())
}
