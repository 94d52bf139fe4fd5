//! Safe-mode CLI - operator tooling for the failover layer
//!
//! Works against a directory-backed object store. The backup named by
//! `--backup` is registered as the latest full backup in an in-process
//! ledger, so every command sees exactly what the failover path would.

use anyhow::{Context, Result, anyhow, bail};
use clap::{Parser, Subcommand};
use safemode_auth::{FailoverLogin, JwtTokenIssuer, LoginResponse, SessionManager};
use safemode_backup::{
    BackupExtractor, BackupLedger, BackupLocator, FsObjectStore, MemoryKvCache, MemoryLedger,
    ResultCache,
};
use safemode_common::{BackupType, Error, Filter, QueryOptions, SortSpec};
use safemode_router::{
    ConnectionState, HealthMonitor, MemoryPrimaryStore, QueryContext, QueryRouter, parse_pipeline,
};
use safemode_store::EphemeralStoreManager;
use serde::Serialize;
use std::sync::Arc;
use std::sync::atomic::Ordering;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser, Debug)]
#[command(name = "safemode-cli")]
#[command(about = "Safe-mode failover CLI")]
#[command(version)]
struct Args {
    /// Configuration file (TOML); SAFEMODE__* environment variables override it
    #[arg(short, long, default_value = "safemode.toml")]
    config: String,

    /// Directory holding content-addressed backup blobs
    #[arg(short, long, default_value = "./backups", env = "SAFEMODE_STORE_DIR")]
    store_dir: String,

    /// Content address of the latest full backup
    #[arg(short, long, env = "SAFEMODE_BACKUP")]
    backup: Option<String>,

    /// Log level
    #[arg(long, default_value = "warn")]
    log_level: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Copy a backup file into the object store and print its address
    Import {
        /// Backup file (newline-delimited or legacy JSON, optionally gzip)
        file: String,
    },
    /// Summarize the backup: format, compression, records per category
    Probe,
    /// Extract one user's bundle
    Extract {
        /// User ID
        user_id: String,
        /// Per-category item limit (defaults to backup.item_limit)
        #[arg(short, long)]
        limit: Option<usize>,
    },
    /// Look up a profile by wallet address, or by email when it contains '@'
    Lookup {
        /// Wallet address or email
        identifier: String,
    },
    /// Run a failover query against a user's ephemeral store
    Query {
        /// User ID the query runs for
        user_id: String,
        /// Model or collection name (e.g. Order, orders, vendor-requests)
        model: String,
        /// Equality filter as a JSON object
        #[arg(short, long, default_value = "{}")]
        filter: String,
        /// Sort field
        #[arg(long)]
        sort: Option<String>,
        /// Sort descending
        #[arg(long)]
        desc: bool,
        /// Page number (1-based)
        #[arg(long, default_value_t = 1)]
        page: usize,
        /// Page size
        #[arg(long, default_value_t = 20)]
        per_page: usize,
        /// Aggregation pipeline as a JSON array (replaces filter and paging)
        #[arg(long)]
        pipeline: Option<String>,
    },
    /// Attempt a login while the primary store is unreachable
    Login {
        /// Wallet address or email
        identifier: String,
        /// Password
        #[arg(short, long, env = "SAFEMODE_PASSWORD")]
        password: String,
    },
}

/// Load configuration from file plus `SAFEMODE__SECTION__KEY` overrides
fn load_config(path: &str) -> Result<safemode_common::Config> {
    let settings = config::Config::builder()
        .add_source(config::File::with_name(path).required(false))
        .add_source(
            config::Environment::with_prefix("SAFEMODE")
                .separator("__")
                .try_parsing(true),
        )
        .build()
        .with_context(|| format!("failed to load configuration from {path}"))?;
    Ok(settings.try_deserialize()?)
}

/// Collaborators wired the way a request handler would see them
struct Services {
    config: safemode_common::Config,
    kv: Arc<MemoryKvCache>,
    extractor: Arc<BackupExtractor>,
    cache: Arc<ResultCache>,
}

impl Services {
    async fn open(config: safemode_common::Config, store_dir: &str, backup: Option<&str>) -> Result<Self> {
        let ledger = Arc::new(MemoryLedger::new());
        if let Some(address) = backup {
            ledger
                .log_backup(address, BackupType::Full, address, chrono::Utc::now(), None)
                .await
                .map_err(|e| anyhow!("failed to register backup: {e}"))?;
        }
        let kv = Arc::new(MemoryKvCache::new());
        let locator = Arc::new(BackupLocator::new(ledger, kv.clone(), config.backup.clone()));
        let extractor = Arc::new(
            BackupExtractor::new(locator, Arc::new(FsObjectStore::new(store_dir)))
                .with_scan_budget(config.backup.max_scan_lines),
        );
        let cache = Arc::new(ResultCache::new(extractor.clone(), kv.clone(), config.cache.clone()));
        Ok(Self {
            config,
            kv,
            extractor,
            cache,
        })
    }

    /// Primary store stand-in; the CLI never has a live primary
    fn health(&self) -> (Arc<MemoryPrimaryStore>, Arc<HealthMonitor>) {
        let primary = Arc::new(MemoryPrimaryStore::new());
        primary.set_state(ConnectionState::Disconnected);
        let health = Arc::new(HealthMonitor::new(primary.clone(), self.config.health.clone()));
        (primary, health)
    }
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    // Parse command line arguments
    let args = Args::parse();

    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| args.log_level.clone().into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let config = load_config(&args.config)?;
    let services = Services::open(config, &args.store_dir, args.backup.as_deref()).await?;

    match args.command {
        Commands::Import { file } => {
            let data = tokio::fs::read(&file)
                .await
                .with_context(|| format!("failed to read {file}"))?;
            let address = FsObjectStore::new(&args.store_dir).put(&data).await?;
            print_json(&serde_json::json!({ "address": address, "bytes": data.len() }))?;
        }
        Commands::Probe => {
            print_json(&services.extractor.probe().await?)?;
        }
        Commands::Extract { user_id, limit } => {
            let limit = limit.unwrap_or(services.config.backup.item_limit);
            let bundle = services.cache.get_or_extract(&user_id, limit).await?;
            let stats = services.cache.stats();
            tracing::info!(
                user_id = %user_id,
                extractions = stats.extractions.load(Ordering::Relaxed),
                hit_ratio = stats.hit_ratio(),
                "extracted user bundle"
            );
            print_json(&bundle)?;
        }
        Commands::Lookup { identifier } => {
            let profile = if identifier.contains('@') {
                services.cache.by_email(&identifier).await?
            } else {
                services.cache.by_wallet(&identifier).await?
            };
            print_json(&profile.map(|p| p.sanitized()))?;
        }
        Commands::Query {
            user_id,
            model,
            filter,
            sort,
            desc,
            page,
            per_page,
            pipeline,
        } => {
            let (primary, health) = services.health();
            let stores = Arc::new(EphemeralStoreManager::new(services.cache.clone(), services.config.store.clone()));
            let router = QueryRouter::new(primary, stores.clone(), services.config.backup.item_limit);
            let query = if health.is_healthy().await {
                QueryContext::primary(user_id)
            } else {
                QueryContext::failover(user_id)
            };

            if let Some(pipeline) = pipeline {
                let stages = parse_pipeline(&serde_json::from_str(&pipeline)?)?;
                print_json(&router.aggregate(&query, &model, &stages).await?)?;
            } else {
                let filter: Filter = serde_json::from_str(&filter).context("filter must be a JSON object")?;
                let options = match sort {
                    Some(field) if desc => QueryOptions::new().sort(SortSpec::desc(field)),
                    Some(field) => QueryOptions::new().sort(SortSpec::asc(field)),
                    None => QueryOptions::new(),
                };
                print_json(&router.find_page(&query, &model, &filter, options, page, per_page).await?)?;
            }
            stores.evict_all();
        }
        Commands::Login { identifier, password } => {
            let (_, health) = services.health();
            let tokens = Arc::new(JwtTokenIssuer::new(
                &services.config.login.jwt_secret,
                services.config.login.token_ttl(),
            )?);
            let sessions = SessionManager::new(services.kv.clone(), services.config.login.token_ttl());
            let login = FailoverLogin::new(health, services.cache.clone(), tokens, sessions, services.config.login.clone());
            let response = login
                .login(&identifier, &password, || async {
                    Err::<LoginResponse, _>(Error::PrimaryUnavailable("no primary store configured".to_string()))
                })
                .await;
            match response {
                Ok(response) => print_json(&response)?,
                Err(e) => bail!("{}", e.user_message()),
            }
        }
    }

    Ok(())
}
