use anyhow::Result;
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

use shiptrack::carrier::SpedisciOnlineClient;
use shiptrack::channel;
use shiptrack::config;
use shiptrack::db;
use shiptrack::dispatcher::{spawn_dispatch_worker, NotificationDispatcher};
use shiptrack::store::SqliteStore;
use shiptrack::tracking::{SyncOptions, TrackingSyncEngine};

#[derive(Debug, Parser)]
#[command(
    author,
    version,
    about = "Run one tracking sync batch, print its metrics and exit"
)]
struct Args {
    /// Path to YAML config file
    #[arg(long, default_value = "config.yaml")]
    config: PathBuf,

    /// Maximum shipments to refresh (defaults to tracking.sync_batch_limit)
    #[arg(long)]
    limit: Option<u32>,

    /// Refresh shipments not synced for this many minutes
    #[arg(long)]
    max_age_minutes: Option<i64>,

    /// Delay between carrier calls in milliseconds
    #[arg(long)]
    delay_ms: Option<u64>,

    /// Do not queue notifications for status changes
    #[arg(long)]
    no_notify: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_target(false)
        .compact()
        .init();

    let args = Args::parse();
    let cfg = config::load(Some(&args.config))?;
    cfg.ensure_dirs()?;

    let pool = db::init_pool(&cfg.database_url()).await?;
    db::run_migrations(&pool).await?;
    let store = Arc::new(SqliteStore::new(pool));

    let mut options = SyncOptions::from_config(&cfg.tracking);
    if let Some(limit) = args.limit {
        options.limit = limit;
    }
    if let Some(minutes) = args.max_age_minutes {
        options.max_age = chrono::Duration::minutes(minutes);
    }
    if let Some(ms) = args.delay_ms {
        options.delay = Duration::from_millis(ms);
    }

    let carrier = Arc::new(SpedisciOnlineClient::from_config(&cfg)?);
    let mut engine = TrackingSyncEngine::new(store.clone(), carrier, cfg.tracking.clone());
    let mut worker = None;
    if !args.no_notify {
        let dispatcher = Arc::new(NotificationDispatcher::new(
            store.clone(),
            store.clone(),
            store,
            channel::from_config(&cfg)?,
            cfg.notifications.dedup_window(),
        ));
        let (handle, join) = spawn_dispatch_worker(dispatcher);
        engine = engine.with_dispatch(handle);
        worker = Some(join);
    }

    info!(limit = options.limit, "running tracking sync batch");
    let metrics = engine.sync_batch(options).await;
    println!("{}", serde_json::to_string_pretty(&metrics)?);

    drop(engine);
    if let Some(join) = worker {
        join.await?;
    }
    Ok(())
}
